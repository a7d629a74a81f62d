//! 渲染统计模块
//!
//! 在 render callback 中收集统计信息。所有操作都是 lock-free 的 Relaxed 原子操作，
//! 读取端（控制线程 / UI）只要求最终一致

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// 渲染统计收集器
pub struct RenderStats {
    callback_count: AtomicU64,
    silent_count: AtomicU64,
    frames_rendered: AtomicU64,
    /// 超过周期 deadline 的回调次数
    overrun_count: AtomicU64,
    commands_applied: AtomicU64,
    last_callback_ns: AtomicU64,
    max_callback_ns: AtomicU64,
    /// 平台输出层报告的流错误
    stream_errors: AtomicU64,
}

impl Default for RenderStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderStats {
    pub fn new() -> Self {
        Self {
            callback_count: AtomicU64::new(0),
            silent_count: AtomicU64::new(0),
            frames_rendered: AtomicU64::new(0),
            overrun_count: AtomicU64::new(0),
            commands_applied: AtomicU64::new(0),
            last_callback_ns: AtomicU64::new(0),
            max_callback_ns: AtomicU64::new(0),
            stream_errors: AtomicU64::new(0),
        }
    }

    /// 在 render callback 结束时调用
    ///
    /// `elapsed_ns` 超过 `deadline_ns` 记为一次 overrun
    #[inline]
    pub fn record_cycle(&self, frames: usize, audible: bool, elapsed_ns: u64, deadline_ns: u64) {
        self.callback_count.fetch_add(1, Ordering::Relaxed);
        if audible {
            self.frames_rendered.fetch_add(frames as u64, Ordering::Relaxed);
        } else {
            self.silent_count.fetch_add(1, Ordering::Relaxed);
        }

        self.last_callback_ns.store(elapsed_ns, Ordering::Relaxed);
        self.max_callback_ns.fetch_max(elapsed_ns, Ordering::Relaxed);

        if deadline_ns > 0 && elapsed_ns > deadline_ns {
            self.overrun_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_commands(&self, count: u64) {
        if count > 0 {
            self.commands_applied.fetch_add(count, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_stream_error(&self) {
        self.stream_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// 生成报告快照
    pub fn report(&self) -> StatsReport {
        StatsReport {
            callbacks: self.callback_count.load(Ordering::Relaxed),
            silent_callbacks: self.silent_count.load(Ordering::Relaxed),
            frames_rendered: self.frames_rendered.load(Ordering::Relaxed),
            overruns: self.overrun_count.load(Ordering::Relaxed),
            commands_applied: self.commands_applied.load(Ordering::Relaxed),
            last_callback_us: self.last_callback_ns.load(Ordering::Relaxed) as f64 / 1000.0,
            max_callback_us: self.max_callback_ns.load(Ordering::Relaxed) as f64 / 1000.0,
            stream_errors: self.stream_errors.load(Ordering::Relaxed),
        }
    }
}

/// 统计报告
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsReport {
    pub callbacks: u64,
    pub silent_callbacks: u64,
    pub frames_rendered: u64,
    pub overruns: u64,
    pub commands_applied: u64,
    pub last_callback_us: f64,
    pub max_callback_us: f64,
    pub stream_errors: u64,
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "callbacks: {} (silent {}) | frames: {} | overruns: {} | cb: {:.1}µs (max {:.1}µs)",
            self.callbacks,
            self.silent_callbacks,
            self.frames_rendered,
            self.overruns,
            self.last_callback_us,
            self.max_callback_us
        )?;
        if self.stream_errors > 0 {
            write!(f, " | stream errors: {}", self.stream_errors)?;
        }
        Ok(())
    }
}
