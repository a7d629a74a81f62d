//! 音频核心模块
//!
//! 包含：
//! - Ring Buffer: Lock-free 命令传递
//! - Format: 流格式和样本转换
//! - Memory: 实时内存锁定
//! - Stats: 渲染统计
//! - Output: 平台输出抽象与 cpal 实现

pub mod cpal_output;
pub mod format;
pub mod memory;
pub mod output;
pub mod ring_buffer;
pub mod stats;

pub use cpal_output::CpalOutput;
pub use format::{float_to_i16, headroom_gain, StreamFormat, CHANNELS};
pub use output::{AudioIo, DeviceInfo, OutputConfig, OutputError, RenderCallback};
pub use stats::{RenderStats, StatsReport};
