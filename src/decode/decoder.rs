//! 资源解码器
//!
//! 使用 symphonia 把资源切片整体解码为交织立体声 f32：
//! - 单声道复制到左右声道
//! - 多于两个声道时只取前两个

use std::sync::atomic::{AtomicBool, Ordering};

use symphonia::core::audio::{SampleBuffer, SignalSpec};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::source::{AssetSource, FileSlice};
use super::DecodeError;
use crate::audio::format::CHANNELS;

/// 资源信息
#[derive(Debug, Clone)]
pub struct AssetInfo {
    /// 采样率
    pub sample_rate: u32,
    /// 声道数。容器未声明时为 None，解码第一个 packet 后补上
    pub channels: Option<u32>,
    /// 位深度（原始格式）
    pub bit_depth: Option<u32>,
    /// 总帧数（如果已知）
    pub total_frames: Option<u64>,
    /// 总时长（秒）
    pub duration_secs: Option<f64>,
    /// 格式名称
    pub format: String,
    /// 编解码器名称
    pub codec: String,
}

/// 资源解码器
pub struct AssetDecoder {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    info: AssetInfo,
    /// 切片字节数，限制预分配
    byte_len: u64,
}

impl AssetDecoder {
    /// 打开资源切片并探测格式
    pub fn open(source: &AssetSource) -> Result<Self, DecodeError> {
        let slice = FileSlice::open(source)?;
        if slice.is_empty() {
            return Err(DecodeError::Empty);
        }
        let byte_len = slice.len();
        let mss = MediaSourceStream::new(Box::new(slice), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = source.extension() {
            hint.with_extension(ext);
        }

        let format_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };
        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &format_opts, &MetadataOptions::default())
            .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;

        let reader = probed.format;
        let format_name = source
            .extension()
            .map(|s| s.to_uppercase())
            .unwrap_or_else(|| "Unknown".to_string());

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoAudioTrack)?;

        let track_id = track.id;
        let codec_params = &track.codec_params;

        let sample_rate = codec_params.sample_rate.ok_or(DecodeError::NoAudioTrack)?;
        let channels = codec_params.channels.map(|c| c.count() as u32);
        let total_frames = codec_params.n_frames;

        let codec_name = symphonia::default::get_codecs()
            .get_codec(codec_params.codec)
            .map(|c| c.short_name.to_string())
            .unwrap_or_else(|| "Unknown".to_string());

        let info = AssetInfo {
            sample_rate,
            channels,
            bit_depth: codec_params.bits_per_sample,
            total_frames,
            duration_secs: total_frames.map(|f| f as f64 / sample_rate as f64),
            format: format_name,
            codec: codec_name,
        };

        let decoder = symphonia::default::get_codecs()
            .make(codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::DecoderCreation(e.to_string()))?;

        Ok(Self {
            reader,
            decoder,
            track_id,
            info,
            byte_len,
        })
    }

    pub fn info(&self) -> &AssetInfo {
        &self.info
    }

    /// 预分配的样本数
    ///
    /// 头部声明的帧数不可信；8-bit 及以上的 PCM 每个样本至少占一个字节，
    /// 因此不超过切片字节数
    fn expected_samples(&self) -> usize {
        let claimed = self
            .info
            .total_frames
            .and_then(|f| usize::try_from(f).ok())
            .map_or(0, |f| f.saturating_mul(CHANNELS));
        let cap = usize::try_from(self.byte_len).unwrap_or(usize::MAX);
        claimed.min(cap)
    }

    /// 解码全部数据，返回交织立体声 f32
    ///
    /// 每个 packet 之前检查 `cancel`，置位时返回 [`DecodeError::Cancelled`]。
    /// 损坏的 packet 被跳过
    pub fn decode_all(&mut self, cancel: &AtomicBool) -> Result<Vec<f32>, DecodeError> {
        let mut samples = Vec::<f32>::new();
        let expected = self.expected_samples();
        if samples.try_reserve(expected).is_err() {
            log::debug!("Cannot reserve {} samples up front, growing on demand", expected);
        }

        let mut sample_buf: Option<SampleBuffer<f32>> = None;
        let mut buf_frames = 0usize;
        let mut buf_spec: Option<SignalSpec> = None;

        loop {
            if cancel.load(Ordering::Relaxed) {
                return Err(DecodeError::Cancelled);
            }

            let packet = match self.reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(DecodeError::DecodeFailed(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    log::debug!("Skipping corrupt packet: {}", e);
                    continue;
                }
                Err(e) => return Err(DecodeError::DecodeFailed(e.to_string())),
            };

            let spec = *decoded.spec();
            let frames = decoded.capacity();
            if sample_buf.is_none() || frames > buf_frames || buf_spec != Some(spec) {
                sample_buf = Some(SampleBuffer::new(frames as u64, spec));
                buf_frames = frames;
                buf_spec = Some(spec);
                if self.info.channels.is_none() {
                    self.info.channels = Some(spec.channels.count() as u32);
                }
            }
            let Some(buf) = sample_buf.as_mut() else {
                continue;
            };

            buf.copy_interleaved_ref(decoded);
            append_stereo(buf.samples(), spec.channels.count(), &mut samples);
        }

        Ok(samples)
    }
}

/// 把 `channels` 声道的交织样本追加为立体声
fn append_stereo(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    match channels {
        0 => {}
        1 => {
            out.reserve(interleaved.len() * CHANNELS);
            for &s in interleaved {
                out.push(s);
                out.push(s);
            }
        }
        _ => {
            out.reserve(interleaved.len() / channels * CHANNELS);
            for frame in interleaved.chunks_exact(channels) {
                out.push(frame[0]);
                out.push(frame[1]);
            }
        }
    }
}
