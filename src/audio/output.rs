//! 平台音频输出抽象
//!
//! 输出子系统以固定周期、固定采样率在它自己的计时线程上反复调用
//! [`RenderCallback`]，并播放写入输出缓冲区的内容。
//!
//! 生命周期约定：`stop()` 返回后，回调不会再被调用；
//! 输出句柄被 drop 时回调对象随之释放（回调持有的一切也随之释放）。

use std::sync::Arc;

use thiserror::Error;

use super::stats::RenderStats;

/// Render 回调
///
/// 在音频线程上调用，必须在周期 deadline 内返回。
///
/// **绝对禁止：**
/// - 锁
/// - 分配
/// - I/O
/// - 日志
pub trait RenderCallback: Send + 'static {
    /// 向 `output`（交织立体声 i16）写入 `frames` 帧
    ///
    /// 返回 false 表示静音：`output` 未被写入，由平台层决定如何填充
    fn render(&mut self, output: &mut [i16], frames: usize, sample_rate: u32) -> bool;
}

/// 输出配置
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputConfig {
    /// 目标采样率
    pub sample_rate: u32,
    /// 每周期帧数
    pub buffer_frames: u32,
    /// 指定输出设备名称（None 表示使用系统默认设备）
    pub device: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            buffer_frames: 512,
            device: None,
        }
    }
}

/// 音频输出设备信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub default_sample_rate: Option<u32>,
    pub max_channels: u16,
}

/// 音频输出错误
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("No audio output device available")]
    NoDevice,
    #[error("Failed to enumerate output devices: {0}")]
    DeviceEnumeration(String),
    #[error("No stereo configuration at {sample_rate}Hz: {reason}")]
    UnsupportedFormat { sample_rate: u32, reason: String },
    #[error("Failed to build output stream: {0}")]
    BuildStream(String),
    #[error("Failed to start output stream: {0}")]
    StartStream(String),
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),
}

/// 音频输出子系统
///
/// `start` 成功即开始调用回调。实现必须保证 `stop()` 返回后不再有回调在执行。
pub trait AudioIo: Sized {
    fn start(
        config: &OutputConfig,
        callback: Box<dyn RenderCallback>,
        stats: Arc<RenderStats>,
    ) -> Result<Self, OutputError>;

    /// 停止输出并释放回调。重复调用是安全的
    fn stop(&mut self) -> Result<(), OutputError>;

    fn is_running(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_config_default() {
        let config = OutputConfig::default();
        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.buffer_frames, 512);
        assert!(config.device.is_none());
    }
}
