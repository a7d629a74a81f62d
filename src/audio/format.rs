//! 流格式与样本转换
//!
//! 渲染路径上的样本统一为交织立体声（LRLRLR...）
//! - 引擎混音输出：f32，归一化到 [-1.0, 1.0]，已乘过音量和 headroom
//! - 硬件输出：i16 定点

/// 声道数（固定立体声）
pub const CHANNELS: usize = 2;

/// f32 → i16 缩放因子（2^15）
const I16_SCALE: f32 = 32768.0;

/// 默认 headroom（dB）
pub const DEFAULT_HEADROOM_DB: f32 = 1.5;

/// 输出流格式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    /// 每个周期（一次 render callback）的帧数
    pub buffer_frames: u32,
}

impl StreamFormat {
    pub fn new(sample_rate: u32, buffer_frames: u32) -> Self {
        Self {
            sample_rate,
            buffer_frames,
        }
    }

    /// 一个周期的时长（纳秒），即 render callback 的实时 deadline
    #[inline]
    pub fn period_ns(&self) -> u64 {
        period_ns(self.buffer_frames as usize, self.sample_rate)
    }
}

/// 指定帧数对应的交织样本数
#[inline]
pub const fn samples_for(frames: usize) -> usize {
    frames * CHANNELS
}

/// `frames` 帧在 `sample_rate` 下的时长（纳秒）
#[inline]
pub fn period_ns(frames: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    frames as u64 * 1_000_000_000 / sample_rate as u64
}

/// headroom 衰减系数（幅度）：10^(-dB / 20)
///
/// 1.5 dB → ≈0.841，3 dB → ≈0.708。`db > 0` 时结果严格小于 1.0
pub fn headroom_gain(db: f32) -> f32 {
    10f32.powf(-db / 20.0)
}

/// 将交织 f32 样本转换为交织 i16 样本
///
/// 转换 `frames * 2` 个样本（受两个 slice 长度约束），返回实际转换的帧数。
/// 四舍五入后饱和到 [-32768, 32767]；`as` 转换对 NaN 给出 0。
///
/// 实时安全：无分配、无锁
#[inline]
pub fn float_to_i16(input: &[f32], output: &mut [i16], frames: usize) -> usize {
    let frames = frames
        .min(input.len() / CHANNELS)
        .min(output.len() / CHANNELS);
    let count = samples_for(frames);

    for (out, &sample) in output[..count].iter_mut().zip(&input[..count]) {
        *out = (sample * I16_SCALE).round() as i16;
    }

    frames
}
