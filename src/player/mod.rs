//! 播放器
//!
//! 拥有一次播放会话的全部部件：状态机、命令队列、引擎、输出。
//!
//! ```text
//! 控制线程 ──request──▶ TransportMachine ──SPSC──▶ RenderBridge ──▶ MixEngine
//!                              ▲                        │
//! 加载线程 ──LoadNotifier──────┘                        └──▶ AudioIo (平台计时线程)
//! ```
//!
//! 释放顺序：标记停止 → `output.stop()` → 释放输出（连同桥与引擎）。
//! 引擎因此不可能在回调仍可能运行时被释放。

pub mod events;
pub mod registry;
pub mod render;
pub mod transport;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_utils::atomic::AtomicCell;
use thiserror::Error;

pub use events::LoadNotifier;
pub use registry::{PlayerRegistry, SessionId};
pub use render::RenderBridge;
pub use transport::{EngineCommand, TransportMachine, TransportRequest, TransportState};

use crate::audio::cpal_output::CpalOutput;
use crate::audio::format::{headroom_gain, StreamFormat, DEFAULT_HEADROOM_DB};
use crate::audio::output::{AudioIo, OutputConfig, OutputError};
use crate::audio::ring_buffer;
use crate::audio::stats::{RenderStats, StatsReport};
use crate::decode::AssetSource;
use crate::engine::{LoopWindow, MixEngine, TrackEngine};

/// 播放器错误
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error("Command queue full: need {needed} slots, {free} free")]
    CommandBacklog { needed: usize, free: usize },
    #[error("Lifecycle misuse: {0}")]
    LifecycleMisuse(String),
}

/// 播放器配置
#[derive(Clone, Debug, PartialEq)]
pub struct PlayerConfig {
    /// 输出采样率
    pub sample_rate: u32,
    /// 每周期帧数
    pub buffer_frames: u32,
    /// 初始用户音量（线性）
    pub volume: f32,
    /// 固定余量（dB）
    pub headroom_db: f32,
    /// Play 安装的循环窗口
    pub loop_window: LoopWindow,
    /// 命令队列容量（向上取整到 2 的幂）
    pub command_capacity: usize,
    /// 锁定实时路径内存
    pub lock_memory: bool,
    /// 输出设备名称
    pub device: Option<String>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            buffer_frames: 512,
            volume: 1.0,
            headroom_db: DEFAULT_HEADROOM_DB,
            loop_window: LoopWindow::default(),
            command_capacity: 64,
            lock_memory: true,
            device: None,
        }
    }
}

impl PlayerConfig {
    pub fn validate(&self) -> Result<(), PlayerError> {
        let invalid = |msg: String| Err(PlayerError::InvalidConfig(msg));

        if self.sample_rate == 0 {
            return invalid("sample rate must be positive".into());
        }
        if self.buffer_frames == 0 {
            return invalid("buffer frames must be positive".into());
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return invalid(format!("volume {} out of range", self.volume));
        }
        if !self.headroom_db.is_finite() || self.headroom_db < 0.0 {
            return invalid(format!("headroom {} dB out of range", self.headroom_db));
        }
        if self.loop_window.is_empty() {
            return invalid(format!(
                "loop window [{}, {}) is empty",
                self.loop_window.start, self.loop_window.end
            ));
        }
        // Play 一次提交两条命令
        if self.command_capacity < 2 {
            return invalid("command capacity must be at least 2".into());
        }
        Ok(())
    }

    pub fn output_config(&self) -> OutputConfig {
        OutputConfig {
            sample_rate: self.sample_rate,
            buffer_frames: self.buffer_frames,
            device: self.device.clone(),
        }
    }
}

/// 加载状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoadState {
    Loading = 0,
    Ready = 1,
    Failed = 2,
}

impl LoadState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Ready,
            2 => Self::Failed,
            _ => Self::Loading,
        }
    }
}

/// 控制线程与渲染线程共享的原子状态
pub struct SharedState {
    /// 最终线性增益（用户音量 × 余量）
    volume: AtomicCell<f32>,
    position: AtomicU64,
    playing: AtomicBool,
    stopped: AtomicBool,
    load_state: AtomicU8,
}

impl SharedState {
    pub fn new(volume: f32) -> Self {
        Self {
            volume: AtomicCell::new(volume),
            position: AtomicU64::new(0),
            playing: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            load_state: AtomicU8::new(LoadState::Loading as u8),
        }
    }

    #[inline]
    pub fn volume(&self) -> f32 {
        self.volume.load()
    }

    pub fn set_volume(&self, gain: f32) {
        self.volume.store(gain);
    }

    #[inline]
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Relaxed)
    }

    /// 渲染线程每周期调用
    #[inline]
    pub fn publish(&self, position: u64, playing: bool) {
        self.position.store(position, Ordering::Relaxed);
        self.playing.store(playing, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn mark_stopped(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn load_state(&self) -> LoadState {
        LoadState::from_u8(self.load_state.load(Ordering::Acquire))
    }

    pub fn set_load_state(&self, state: LoadState) {
        self.load_state.store(state as u8, Ordering::Release);
    }
}

/// 控制路径状态：状态机 + 共享原子状态
///
/// 状态机的 Mutex 只在控制路径上（宿主线程、加载线程）获取，渲染线程从不触碰
pub(crate) struct ControlState {
    transport: Mutex<TransportMachine>,
    pub(crate) shared: Arc<SharedState>,
    pub(crate) load_reported: AtomicBool,
}

impl ControlState {
    pub(crate) fn new(machine: TransportMachine, shared: Arc<SharedState>) -> Self {
        Self {
            transport: Mutex::new(machine),
            shared,
            load_reported: AtomicBool::new(false),
        }
    }

    /// 状态机不持有跨调用的不变量，中毒后直接继续使用
    pub(crate) fn transport(&self) -> MutexGuard<'_, TransportMachine> {
        self.transport.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// 播放器
pub struct Player<O: AudioIo> {
    control: Arc<ControlState>,
    shared: Arc<SharedState>,
    stats: Arc<RenderStats>,
    output: Option<O>,
    headroom: f32,
    format: StreamFormat,
    source: AssetSource,
}

impl Player<CpalOutput> {
    /// symphonia 解码 + cpal 输出
    pub fn open(config: PlayerConfig, source: AssetSource) -> Result<Self, PlayerError> {
        let engine = TrackEngine::new(config.sample_rate);
        Self::new(config, source, engine)
    }
}

impl<O: AudioIo> Player<O> {
    /// 创建播放器并立即启动输出
    ///
    /// 输出在加载完成前（以及 Play 之前）持续输出静音
    pub fn new<E: MixEngine>(
        config: PlayerConfig,
        source: AssetSource,
        mut engine: E,
    ) -> Result<Self, PlayerError> {
        config.validate()?;

        let headroom = headroom_gain(config.headroom_db);
        let shared = Arc::new(SharedState::new(config.volume * headroom));
        let (commands, receiver) = ring_buffer::channel(config.command_capacity);
        let control = Arc::new(ControlState::new(
            TransportMachine::new(commands, config.loop_window),
            Arc::clone(&shared),
        ));

        let notifier = LoadNotifier::new(Arc::clone(&control));
        engine.open(source.clone(), notifier.into_sink());
        engine.cache_position(0);

        let stats = Arc::new(RenderStats::new());
        let bridge = RenderBridge::new(
            engine,
            receiver,
            Arc::clone(&shared),
            Arc::clone(&stats),
            config.buffer_frames as usize,
            config.lock_memory,
        );

        let output = O::start(&config.output_config(), Box::new(bridge), Arc::clone(&stats))?;

        let format = StreamFormat::new(config.sample_rate, config.buffer_frames);
        log::info!(
            "Player created: {} | {}Hz, {} frames/period, headroom {:.1} dB",
            source,
            format.sample_rate,
            format.buffer_frames,
            config.headroom_db
        );

        Ok(Self {
            control,
            shared,
            stats,
            output: Some(output),
            headroom,
            format,
            source,
        })
    }

    /// 处理传输请求，返回新状态
    pub fn transport(&self, request: TransportRequest) -> Result<TransportState, PlayerError> {
        self.control.transport().request(request)
    }

    /// 宿主的播放/暂停开关
    pub fn on_play_pause(&self, play: bool) -> Result<TransportState, PlayerError> {
        self.transport(play.into())
    }

    /// 相位重启：暂停回到起点，`delay` 之后重新开始循环播放
    ///
    /// 在调用线程上等待。多台设备以不同的 `delay` 重启即可形成固定相位差
    pub fn restart_after(&self, delay: Duration) -> Result<TransportState, PlayerError> {
        self.on_play_pause(false)?;
        wait_until(Instant::now() + delay);
        self.on_play_pause(true)
    }

    /// 设置用户音量（线性）。实际增益 = 音量 × 余量
    pub fn set_volume(&self, volume: f32) {
        let volume = if volume.is_finite() {
            volume.max(0.0)
        } else {
            0.0
        };
        self.shared.set_volume(volume * self.headroom);
    }

    /// 渲染线程当前使用的线性增益
    pub fn volume_gain(&self) -> f32 {
        self.shared.volume()
    }

    pub fn state(&self) -> TransportState {
        self.control.transport().state()
    }

    pub fn load_state(&self) -> LoadState {
        self.shared.load_state()
    }

    /// 最近一个渲染周期结束时的位置（帧）
    pub fn position(&self) -> u64 {
        self.shared.position()
    }

    pub fn is_playing(&self) -> bool {
        self.shared.is_playing()
    }

    pub fn stats(&self) -> StatsReport {
        self.stats.report()
    }

    pub fn output(&self) -> Option<&O> {
        self.output.as_ref()
    }

    pub fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }
}

/// 睡眠到截止时间前 1ms，之后自旋
fn wait_until(deadline: Instant) {
    const SPIN: Duration = Duration::from_millis(1);
    loop {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        let remaining = deadline - now;
        if remaining > SPIN {
            thread::sleep(remaining - SPIN);
        } else {
            std::hint::spin_loop();
        }
    }
}

impl<O: AudioIo> Drop for Player<O> {
    fn drop(&mut self) {
        self.shared.mark_stopped();

        if let Some(mut output) = self.output.take() {
            if let Err(e) = output.stop() {
                log::warn!("Failed to stop output cleanly: {}", e);
            }
            // 输出持有桥，桥持有引擎
            drop(output);
        }

        log::info!("Player destroyed: {}", self.source);
    }
}
