//! 解码/混音引擎
//!
//! [`MixEngine`] 是渲染回调看到的唯一引擎接口：控制路径上的命令（seek、play、
//! loop）和渲染路径上的 `process` 都在持有引擎的那个线程上调用，
//! 因此引擎本身不需要任何同步。
//!
//! 加载是异步的：`open` 立即返回，结果通过 [`EventSink`] 恰好报告一次。

pub mod track;

use std::sync::Arc;

pub use track::TrackEngine;

use crate::decode::AssetSource;

/// 默认循环窗口终点（帧）
pub const DEFAULT_LOOP_END: u64 = 1000;

/// 循环窗口 `[start, end)`，单位帧
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopWindow {
    pub start: u64,
    pub end: u64,
}

impl LoopWindow {
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// 窗口长度（帧），无效窗口为 0
    #[inline]
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LoopWindow {
    fn default() -> Self {
        Self::new(0, DEFAULT_LOOP_END)
    }
}

/// 每个渲染周期的混音参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixParams {
    /// 线性增益
    pub volume: f32,
    /// 播放速率，1.0 为原速
    pub rate: f32,
    /// 音高偏移（半音）。None 表示不变
    pub pitch: Option<f32>,
}

impl MixParams {
    /// 原速、原音高
    #[inline]
    pub fn unchanged(volume: f32) -> Self {
        Self {
            volume,
            rate: 1.0,
            pitch: None,
        }
    }
}

/// 加载结果事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    LoadSuccess { frames: u64 },
    LoadFailed { reason: String },
}

/// 事件接收端。在加载线程上调用
pub type EventSink = Arc<dyn Fn(EngineEvent) + Send + Sync>;

/// 解码/混音引擎
pub trait MixEngine: Send + 'static {
    /// 开始异步加载资源
    fn open(&mut self, source: AssetSource, events: EventSink);

    /// 预置初始解码位置
    fn cache_position(&mut self, frame: u64);

    /// 跳转。`and_stop` 同时停止播放；`smooth` 施加短淡入以消除咔哒声
    fn set_position(&mut self, frame: u64, and_stop: bool, smooth: bool);

    /// 从当前位置开始（继续）产生音频
    fn play(&mut self);

    /// 安装或清除循环窗口
    fn set_loop(&mut self, window: Option<LoopWindow>);

    /// 渲染 `frames` 帧交织立体声到 `buffer`
    ///
    /// 返回 false 表示静音，此时 `buffer` 内容未定义。实时路径：不得阻塞或分配
    fn process(&mut self, buffer: &mut [f32], frames: usize, params: MixParams) -> bool;

    /// 当前播放位置（帧）
    fn position(&self) -> u64;

    fn is_playing(&self) -> bool;
}
