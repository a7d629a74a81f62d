//! 解码模块
//!
//! 资源切片 → 交织立体声 f32，必要时重采样到输出采样率

pub mod decoder;
pub mod source;

use std::sync::atomic::AtomicBool;

use thiserror::Error;

pub use decoder::{AssetDecoder, AssetInfo};
pub use source::{AssetSource, FileSlice};

use crate::audio::format::CHANNELS;
use crate::resample::{resampler_for, ResampleError};

/// 解码错误
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Failed to open asset: {0}")]
    FileOpen(#[source] std::io::Error),
    #[error("Asset slice {offset}+{length} exceeds file of {file_len} bytes")]
    InvalidSlice {
        offset: u64,
        length: u64,
        file_len: u64,
    },
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),
    #[error("No audio track found")]
    NoAudioTrack,
    #[error("Failed to create decoder: {0}")]
    DecoderCreation(String),
    #[error("Decode failed: {0}")]
    DecodeFailed(String),
    #[error(transparent)]
    Resample(#[from] ResampleError),
    #[error("Asset contains no audio")]
    Empty,
    #[error("Decode cancelled")]
    Cancelled,
}

/// 解码完成的资源：交织立体声 f32
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAsset {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl DecodedAsset {
    /// 从交织立体声样本构建。多余的半帧被丢弃
    pub fn from_interleaved(mut samples: Vec<f32>, sample_rate: u32) -> Self {
        let whole = samples.len() - samples.len() % CHANNELS;
        samples.truncate(whole);
        Self {
            samples,
            sample_rate,
        }
    }

    #[inline]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[inline]
    pub fn frames(&self) -> usize {
        self.samples.len() / CHANNELS
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// 解码整个资源并重采样到 `target_rate`
pub fn load_asset(
    source: &AssetSource,
    target_rate: u32,
    cancel: &AtomicBool,
) -> Result<DecodedAsset, DecodeError> {
    let mut decoder = AssetDecoder::open(source)?;
    let info = decoder.info().clone();
    log::info!(
        "Decoding {}: {} {} | {}Hz {}ch{}",
        source,
        info.format,
        info.codec,
        info.sample_rate,
        info.channels
            .map_or_else(|| "?".to_string(), |c| c.to_string()),
        info.bit_depth
            .map(|b| format!(" {}-bit", b))
            .unwrap_or_default()
    );

    let decoded = decoder.decode_all(cancel)?;
    if decoded.is_empty() {
        return Err(DecodeError::Empty);
    }

    let samples = if info.sample_rate == target_rate {
        decoded
    } else {
        log::info!("Resampling {}Hz -> {}Hz", info.sample_rate, target_rate);
        let mut resampler = resampler_for(info.sample_rate, target_rate);
        let mut out = Vec::new();
        resampler.process(&decoded, &mut out)?;
        out
    };

    Ok(DecodedAsset::from_interleaved(samples, target_rate))
}
