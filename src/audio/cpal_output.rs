//! cpal 输出
//!
//! 以固定周期打开立体声输出流，把设备回调转接到 [`RenderCallback`]。
//! 设备原生样本格式（i16 / f32 / u16 ...）通过预分配的 i16 周期缓冲区转换；
//! 回调报告静音时由这里填零。

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig, SupportedBufferSize};

use super::format::{samples_for, CHANNELS};
use super::output::{AudioIo, DeviceInfo, OutputConfig, OutputError, RenderCallback};
use super::stats::RenderStats;

/// cpal 输出流
pub struct CpalOutput {
    stream: Option<Stream>,
    device_name: String,
    config: StreamConfig,
    sample_format: SampleFormat,
}

impl CpalOutput {
    /// 列出所有输出设备
    pub fn list_devices() -> Result<Vec<DeviceInfo>, OutputError> {
        let host = cpal::default_host();
        let default_name = host.default_output_device().and_then(|d| d.name().ok());

        let devices = host
            .output_devices()
            .map_err(|e| OutputError::DeviceEnumeration(e.to_string()))?
            .filter_map(|device| {
                let name = device.name().ok()?;
                let default_config = device.default_output_config().ok();
                Some(DeviceInfo {
                    is_default: default_name.as_deref() == Some(name.as_str()),
                    default_sample_rate: default_config.as_ref().map(|c| c.sample_rate().0),
                    max_channels: default_config.map(|c| c.channels()).unwrap_or(0),
                    name,
                })
            })
            .collect::<Vec<_>>();

        log::debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// 按名称查找设备，找不到时回退到默认设备
    fn find_device(name: Option<&str>) -> Result<Device, OutputError> {
        let host = cpal::default_host();

        if let Some(name) = name {
            let mut devices = host
                .output_devices()
                .map_err(|e| OutputError::DeviceEnumeration(e.to_string()))?;

            if let Some(device) = devices.find(|d| d.name().ok().as_deref() == Some(name)) {
                log::info!("Using requested output device: {}", name);
                return Ok(device);
            }
            log::warn!("Output device '{}' not found, falling back to default", name);
        }

        host.default_output_device().ok_or(OutputError::NoDevice)
    }

    /// 选择支持目标采样率的立体声配置
    ///
    /// 多个候选时优先 i16（免转换），其次 f32
    fn select_config(
        device: &Device,
        sample_rate: u32,
        buffer_frames: u32,
    ) -> Result<(StreamConfig, SampleFormat), OutputError> {
        let unsupported = |reason: String| OutputError::UnsupportedFormat {
            sample_rate,
            reason,
        };

        let candidates: Vec<_> = device
            .supported_output_configs()
            .map_err(|e| unsupported(e.to_string()))?
            .filter(|range| {
                range.channels() as usize == CHANNELS
                    && range.min_sample_rate().0 <= sample_rate
                    && range.max_sample_rate().0 >= sample_rate
            })
            .collect();

        let rank = |format: SampleFormat| match format {
            SampleFormat::I16 => 0,
            SampleFormat::F32 => 1,
            _ => 2,
        };
        let range = candidates
            .into_iter()
            .min_by_key(|range| rank(range.sample_format()))
            .ok_or_else(|| unsupported("device offers no matching stereo range".to_string()))?;

        let buffer_size = match range.buffer_size() {
            &SupportedBufferSize::Range { min, max } => {
                let frames = buffer_frames.clamp(min, max);
                if frames != buffer_frames {
                    log::warn!(
                        "Period of {} frames outside device range {}..={}, using {}",
                        buffer_frames,
                        min,
                        max,
                        frames
                    );
                }
                cpal::BufferSize::Fixed(frames)
            }
            SupportedBufferSize::Unknown => cpal::BufferSize::Default,
        };

        let sample_format = range.sample_format();
        let mut config = range
            .with_sample_rate(cpal::SampleRate(sample_rate))
            .config();
        config.buffer_size = buffer_size;

        Ok((config, sample_format))
    }

    /// 构建输出流
    ///
    /// 回调内只做：调用 render、必要时填零、格式转换。无分配
    fn build_stream<T>(
        device: &Device,
        config: &StreamConfig,
        mut callback: Box<dyn RenderCallback>,
        stats: Arc<RenderStats>,
        period_frames: usize,
    ) -> Result<Stream, OutputError>
    where
        T: cpal::SizedSample + cpal::FromSample<i16>,
    {
        let sample_rate = config.sample_rate.0;
        // 周期缓冲区在回调外预分配；设备请求更大的块时分块渲染
        let mut period = vec![0i16; samples_for(period_frames.max(1))];

        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    for chunk in data.chunks_mut(period.len()) {
                        let pcm = &mut period[..chunk.len()];
                        let frames = chunk.len() / CHANNELS;

                        if !callback.render(pcm, frames, sample_rate) {
                            pcm.fill(0);
                        }
                        for (out, &sample) in chunk.iter_mut().zip(pcm.iter()) {
                            *out = <T as cpal::Sample>::from_sample(sample);
                        }
                    }
                },
                move |err| {
                    stats.record_stream_error();
                    log::error!("Output stream error: {}", err);
                },
                None,
            )
            .map_err(|e| OutputError::BuildStream(e.to_string()))
    }

    /// 设备名称
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// 设备样本格式
    pub fn sample_format(&self) -> SampleFormat {
        self.sample_format
    }

    /// 实际使用的流配置
    pub fn stream_config(&self) -> &StreamConfig {
        &self.config
    }
}

impl AudioIo for CpalOutput {
    fn start(
        config: &OutputConfig,
        callback: Box<dyn RenderCallback>,
        stats: Arc<RenderStats>,
    ) -> Result<Self, OutputError> {
        let device = Self::find_device(config.device.as_deref())?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let (stream_config, sample_format) =
            Self::select_config(&device, config.sample_rate, config.buffer_frames)?;
        let period_frames = config.buffer_frames as usize;

        let stream = match sample_format {
            SampleFormat::I16 => {
                Self::build_stream::<i16>(&device, &stream_config, callback, stats, period_frames)?
            }
            SampleFormat::F32 => {
                Self::build_stream::<f32>(&device, &stream_config, callback, stats, period_frames)?
            }
            SampleFormat::U16 => {
                Self::build_stream::<u16>(&device, &stream_config, callback, stats, period_frames)?
            }
            SampleFormat::I32 => {
                Self::build_stream::<i32>(&device, &stream_config, callback, stats, period_frames)?
            }
            other => {
                return Err(OutputError::UnsupportedFormat {
                    sample_rate: config.sample_rate,
                    reason: format!("sample format {:?}", other),
                })
            }
        };

        stream
            .play()
            .map_err(|e| OutputError::StartStream(e.to_string()))?;

        log::info!(
            "Output started: {} | {}Hz {:?} | period {:?}",
            device_name,
            stream_config.sample_rate.0,
            sample_format,
            stream_config.buffer_size
        );

        Ok(Self {
            stream: Some(stream),
            device_name,
            config: stream_config,
            sample_format,
        })
    }

    fn stop(&mut self) -> Result<(), OutputError> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };

        if let Err(e) = stream.pause() {
            log::debug!("Pausing output stream failed: {}", e);
        }
        // drop 会等待平台回调线程结束，之后回调对象才被释放
        drop(stream);

        log::info!("Audio output stopped");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
