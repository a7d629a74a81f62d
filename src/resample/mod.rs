//! 重采样模块
//!
//! 资源采样率与输出采样率不一致时，在加载线程上一次性转换整个资源。
//! 样本均为交织立体声 f32

use rubato::{
    Resampler as _, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
    WindowFunction,
};
use thiserror::Error;

use crate::audio::format::{samples_for, CHANNELS};

/// 每次送入 rubato 的输入帧数
const CHUNK_FRAMES: usize = 1024;

/// 重采样错误
#[derive(Debug, Error)]
pub enum ResampleError {
    #[error("Invalid resample rates: {from}Hz -> {to}Hz")]
    InvalidRate { from: u32, to: u32 },
    #[error("Failed to create resampler: {0}")]
    Construction(String),
    #[error("Resampling failed: {0}")]
    Process(String),
}

/// 重采样器特征
pub trait Resampler: Send {
    /// 转换交织立体声输入，结果追加到 `output`
    ///
    /// 返回追加的帧数
    fn process(&mut self, input: &[f32], output: &mut Vec<f32>) -> Result<usize, ResampleError>;
}

/// 直通重采样器（不做任何处理）
pub struct PassthroughResampler;

impl Resampler for PassthroughResampler {
    fn process(&mut self, input: &[f32], output: &mut Vec<f32>) -> Result<usize, ResampleError> {
        let whole = input.len() - input.len() % CHANNELS;
        output.extend_from_slice(&input[..whole]);
        Ok(whole / CHANNELS)
    }
}

/// rubato sinc 重采样器
///
/// 输出去掉滤波器延迟，长度为 `ceil(输入帧数 × to / from)`
pub struct SincResampler {
    from_rate: u32,
    to_rate: u32,
}

impl SincResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self { from_rate, to_rate }
    }

    /// `input_frames` 帧输入产生的输出帧数
    pub fn output_frames(&self, input_frames: usize) -> usize {
        if self.from_rate == 0 || input_frames == 0 {
            return 0;
        }
        let scaled = input_frames as u128 * self.to_rate as u128;
        scaled.div_ceil(self.from_rate as u128) as usize
    }

    fn params() -> SincInterpolationParameters {
        SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        }
    }
}

/// 交织 → 按声道
fn deinterleave(interleaved: &[f32]) -> Vec<Vec<f32>> {
    (0..CHANNELS)
        .map(|ch| {
            interleaved
                .chunks_exact(CHANNELS)
                .map(|frame| frame[ch])
                .collect()
        })
        .collect()
}

fn append_planar(planar: &mut [Vec<f32>], block: Vec<Vec<f32>>) {
    for (channel, samples) in planar.iter_mut().zip(block) {
        channel.extend(samples);
    }
}

impl Resampler for SincResampler {
    fn process(&mut self, input: &[f32], output: &mut Vec<f32>) -> Result<usize, ResampleError> {
        if self.from_rate == 0 || self.to_rate == 0 {
            return Err(ResampleError::InvalidRate {
                from: self.from_rate,
                to: self.to_rate,
            });
        }
        let in_frames = input.len() / CHANNELS;
        let expected = self.output_frames(in_frames);
        if expected == 0 {
            return Ok(0);
        }

        let ratio = self.to_rate as f64 / self.from_rate as f64;
        let mut sinc = SincFixedIn::<f32>::new(ratio, 1.1, Self::params(), CHUNK_FRAMES, CHANNELS)
            .map_err(|e| ResampleError::Construction(e.to_string()))?;
        let delay = sinc.output_delay();

        let mut planar = vec![Vec::with_capacity(delay + expected); CHANNELS];
        for chunk in input[..samples_for(in_frames)].chunks(samples_for(CHUNK_FRAMES)) {
            let block = deinterleave(chunk);
            let resampled = if block[0].len() == CHUNK_FRAMES {
                sinc.process(&block, None)
            } else {
                sinc.process_partial(Some(block.as_slice()), None)
            }
            .map_err(|e| ResampleError::Process(e.to_string()))?;
            append_planar(&mut planar, resampled);
        }

        // 冲刷滤波器中剩余的样本
        while planar[0].len() < delay + expected {
            let resampled = sinc
                .process_partial(None::<&[Vec<f32>]>, None)
                .map_err(|e| ResampleError::Process(e.to_string()))?;
            if resampled[0].is_empty() {
                break;
            }
            append_planar(&mut planar, resampled);
        }

        let frames = planar[0].len().saturating_sub(delay).min(expected);
        output.reserve(samples_for(frames));
        for i in delay..delay + frames {
            for channel in &planar {
                output.push(channel[i]);
            }
        }

        log::debug!(
            "Resampled {} frames ({}Hz) -> {} frames ({}Hz)",
            in_frames,
            self.from_rate,
            frames,
            self.to_rate
        );
        Ok(frames)
    }
}

/// 按采样率选择重采样器
pub fn resampler_for(from_rate: u32, to_rate: u32) -> Box<dyn Resampler> {
    if from_rate == to_rate {
        Box::new(PassthroughResampler)
    } else {
        Box::new(SincResampler::new(from_rate, to_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resample(from: u32, to: u32, input: &[f32]) -> Vec<f32> {
        let mut out = Vec::new();
        let frames = resampler_for(from, to).process(input, &mut out).unwrap();
        assert_eq!(out.len(), samples_for(frames));
        out
    }

    #[test]
    fn test_passthrough() {
        let mut out = Vec::new();
        let frames = PassthroughResampler
            .process(&[0.1, 0.2, 0.3, 0.4, 0.5], &mut out)
            .unwrap();
        assert_eq!(frames, 2);
        assert_eq!(out, vec![0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn test_equal_rates_are_bit_exact() {
        let input: Vec<f32> = (0..64).map(|i| i as f32 / 64.0).collect();
        assert_eq!(resample(44100, 44100, &input), input);
    }

    #[test]
    fn test_upsample_length_and_level() {
        let input = vec![0.25f32; samples_for(2400)];
        let out = resample(24000, 48000, &input);

        assert_eq!(out.len(), samples_for(4800));
        // 两端受零填充影响，只检查中段
        for &s in &out[samples_for(1000)..samples_for(3800)] {
            assert!((s - 0.25).abs() < 0.01, "sample {} off level", s);
        }
    }

    #[test]
    fn test_downsample_length() {
        let input = vec![0.25f32; samples_for(48000)];
        let out = resample(48000, 44100, &input);

        assert_eq!(out.len(), samples_for(44100));
        for &s in &out[samples_for(4000)..samples_for(40000)] {
            assert!((s - 0.25).abs() < 0.01, "sample {} off level", s);
        }
    }

    #[test]
    fn test_silence_stays_silent() {
        let out = resample(96000, 44100, &vec![0.0f32; samples_for(9600)]);
        assert_eq!(out.len(), samples_for(4410));
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_channels_stay_separate() {
        let input: Vec<f32> = (0..4800).flat_map(|_| [0.5f32, -0.5]).collect();
        let out = resample(48000, 32000, &input);

        let mid = samples_for(1600);
        assert!(out[mid] > 0.45);
        assert!(out[mid + 1] < -0.45);
    }

    #[test]
    fn test_empty_input() {
        assert!(resample(22050, 48000, &[]).is_empty());
    }

    #[test]
    fn test_zero_rate_rejected() {
        let mut out = Vec::new();
        let result = SincResampler::new(0, 48000).process(&[0.0; 4], &mut out);
        assert!(matches!(result, Err(ResampleError::InvalidRate { from: 0, .. })));
    }
}
