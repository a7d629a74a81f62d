//! 单资源循环播放引擎
//!
//! 加载线程解码整个资源，经 `OnceLock` 发布给渲染线程（读取无锁）。
//! 播放头是分数帧位置，原速时每帧精确步进 1。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};

use super::{EngineEvent, EventSink, LoopWindow, MixEngine, MixParams};
use crate::audio::format::{samples_for, CHANNELS};
use crate::decode::{load_asset, AssetSource, DecodeError, DecodedAsset};

/// 淡入长度（帧）
pub const FADE_IN_FRAMES: u32 = 128;

/// 资源加载函数：在加载线程上运行
pub type AssetLoader =
    Box<dyn FnOnce(&AssetSource, u32, &AtomicBool) -> Result<DecodedAsset, DecodeError> + Send>;

/// 线性淡入
#[derive(Debug, Clone, Copy, Default)]
struct FadeRamp {
    remaining: u32,
}

impl FadeRamp {
    fn start(&mut self) {
        self.remaining = FADE_IN_FRAMES;
    }

    #[inline]
    fn next_gain(&mut self) -> f32 {
        if self.remaining == 0 {
            return 1.0;
        }
        let gain = 1.0 - self.remaining as f32 / FADE_IN_FRAMES as f32;
        self.remaining -= 1;
        gain
    }
}

/// 单资源引擎
pub struct TrackEngine {
    target_rate: u32,
    loader: Option<AssetLoader>,
    asset: Arc<OnceLock<DecodedAsset>>,
    cancel: Arc<AtomicBool>,
    load_thread: Option<JoinHandle<()>>,

    /// 播放头（分数帧）
    head: f64,
    playing: bool,
    looping: Option<LoopWindow>,
    fade: FadeRamp,
}

impl TrackEngine {
    /// 使用 symphonia 解码，重采样到 `target_rate`
    pub fn new(target_rate: u32) -> Self {
        Self::with_loader(target_rate, Box::new(load_asset))
    }

    /// 使用自定义加载函数
    pub fn with_loader(target_rate: u32, loader: AssetLoader) -> Self {
        Self {
            target_rate,
            loader: Some(loader),
            asset: Arc::new(OnceLock::new()),
            cancel: Arc::new(AtomicBool::new(false)),
            load_thread: None,
            head: 0.0,
            playing: false,
            looping: None,
            fade: FadeRamp::default(),
        }
    }

    /// 阻塞直到加载线程结束
    fn join_loader(&mut self) {
        if let Some(handle) = self.load_thread.take() {
            if handle.join().is_err() {
                log::error!("Asset loader thread panicked");
            }
        }
    }

    /// 对当前资源生效的循环区间：终点截断到资源长度，起点越界时忽略
    #[inline]
    fn active_window(&self, total: usize) -> Option<(f64, f64)> {
        let window = self.looping?;
        let end = window.end.min(total as u64);
        (window.start < end).then_some((window.start as f64, end as f64))
    }

    fn load_main(
        loader: AssetLoader,
        source: AssetSource,
        target_rate: u32,
        asset: Arc<OnceLock<DecodedAsset>>,
        cancel: Arc<AtomicBool>,
        events: EventSink,
    ) {
        match loader(&source, target_rate, &cancel) {
            Ok(decoded) => {
                let frames = decoded.frames() as u64;
                log::info!(
                    "Loaded {}: {} frames ({:.2}s)",
                    source,
                    frames,
                    decoded.duration_secs()
                );
                if asset.set(decoded).is_err() {
                    log::warn!("Asset already published, ignoring second load");
                    return;
                }
                events(EngineEvent::LoadSuccess { frames });
            }
            Err(DecodeError::Cancelled) => {
                log::debug!("Load of {} cancelled", source);
            }
            Err(e) => {
                log::warn!("Failed to load {}: {}", source, e);
                events(EngineEvent::LoadFailed {
                    reason: e.to_string(),
                });
            }
        }
    }
}

impl MixEngine for TrackEngine {
    fn open(&mut self, source: AssetSource, events: EventSink) {
        let Some(loader) = self.loader.take() else {
            log::warn!("Engine already opened, ignoring {}", source);
            return;
        };

        log::info!("Loading: {}", source);

        let asset = Arc::clone(&self.asset);
        let cancel = Arc::clone(&self.cancel);
        let target_rate = self.target_rate;
        let sink = Arc::clone(&events);

        let spawned = thread::Builder::new()
            .name("asset-loader".to_string())
            .spawn(move || {
                Self::load_main(loader, source, target_rate, asset, cancel, events)
            });

        match spawned {
            Ok(handle) => self.load_thread = Some(handle),
            Err(e) => {
                log::error!("Failed to spawn loader thread: {}", e);
                sink(EngineEvent::LoadFailed {
                    reason: e.to_string(),
                });
            }
        }
    }

    fn cache_position(&mut self, frame: u64) {
        self.head = frame as f64;
    }

    fn set_position(&mut self, frame: u64, and_stop: bool, smooth: bool) {
        self.head = frame as f64;
        if and_stop {
            self.playing = false;
        }
        if smooth {
            self.fade.start();
        }
    }

    fn play(&mut self) {
        self.playing = true;
    }

    fn set_loop(&mut self, window: Option<LoopWindow>) {
        self.looping = window.filter(|w| !w.is_empty());
    }

    fn process(&mut self, buffer: &mut [f32], frames: usize, params: MixParams) -> bool {
        if !self.playing {
            return false;
        }
        // 未就绪：保持 playing，就绪后从当前位置开始
        let Some(asset) = self.asset.get() else {
            return false;
        };

        let frames = frames.min(buffer.len() / CHANNELS);
        let samples = asset.samples();
        let total = asset.frames();
        let window = self.active_window(total);
        let step = if params.rate.is_finite() && params.rate > 0.0 {
            params.rate as f64
        } else {
            1.0
        };

        let mut written = 0;
        for frame in buffer[..samples_for(frames)].chunks_exact_mut(CHANNELS) {
            if let Some((start, end)) = window {
                if self.head >= end {
                    self.head = start + (self.head - end) % (end - start);
                }
            }
            if self.head >= total as f64 {
                break;
            }

            let i = self.head as usize;
            let frac = (self.head - i as f64) as f32;
            let next = match window {
                Some((start, end)) if (i + 1) as f64 >= end => start as usize,
                _ => (i + 1).min(total - 1),
            };

            let gain = params.volume * self.fade.next_gain();
            for (ch, out) in frame.iter_mut().enumerate() {
                let a = samples[i * CHANNELS + ch];
                let b = samples[next * CHANNELS + ch];
                *out = (a + (b - a) * frac) * gain;
            }

            self.head += step;
            written += 1;
        }

        if written == 0 {
            self.playing = false;
            return false;
        }
        buffer[samples_for(written)..samples_for(frames)].fill(0.0);
        true
    }

    fn position(&self) -> u64 {
        self.head as u64
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}

impl Drop for TrackEngine {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Release);
        self.join_loader();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        counting_asset, event_log, failing_loader, gated_loader, ready_loader, wait_for,
    };

    /// 立即成功的加载函数，资源第 i 帧两个声道都是 i
    fn ready_engine(frames: usize) -> TrackEngine {
        let asset = counting_asset(frames, 48000);
        let mut engine = TrackEngine::with_loader(48000, ready_loader(asset));
        let (sink, _events) = event_log();
        engine.open(AssetSource::file("counting.raw"), sink);
        engine.join_loader();
        engine
    }

    fn render(engine: &mut TrackEngine, frames: usize) -> Option<Vec<f32>> {
        let mut buf = vec![f32::NAN; frames * CHANNELS];
        engine
            .process(&mut buf, frames, MixParams::unchanged(1.0))
            .then_some(buf)
    }

    #[test]
    fn test_silent_until_play() {
        let mut engine = ready_engine(100);
        assert!(render(&mut engine, 16).is_none());

        engine.play();
        let out = render(&mut engine, 4).unwrap();
        assert_eq!(out, vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);
        assert_eq!(engine.position(), 4);
    }

    #[test]
    fn test_play_before_load_is_silent_then_starts_at_zero() {
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        let asset = counting_asset(10, 48000);
        let mut engine = TrackEngine::with_loader(48000, gated_loader(asset, rx));
        let (sink, events) = event_log();
        engine.open(AssetSource::file("slow.raw"), sink);
        engine.cache_position(0);
        engine.play();

        assert!(render(&mut engine, 8).is_none());
        assert!(engine.is_playing());

        tx.send(()).unwrap();
        engine.join_loader();
        assert_eq!(
            events.lock().unwrap().as_slice(),
            &[EngineEvent::LoadSuccess { frames: 10 }]
        );
        let out = render(&mut engine, 2).unwrap();
        assert_eq!(out, vec![0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_end_of_material() {
        let mut engine = ready_engine(3);
        engine.play();

        let out = render(&mut engine, 5).unwrap();
        assert_eq!(out, vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0, 0.0, 0.0, 0.0, 0.0]);

        assert!(render(&mut engine, 5).is_none());
        assert!(!engine.is_playing());
    }

    #[test]
    fn test_loop_window_wraps() {
        let mut engine = ready_engine(100);
        engine.set_loop(Some(LoopWindow::new(2, 5)));
        engine.play();

        let out = render(&mut engine, 8).unwrap();
        let left: Vec<f32> = out.iter().step_by(2).copied().collect();
        assert_eq!(left, vec![0.0, 1.0, 2.0, 3.0, 4.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_loop_end_clamped_to_material() {
        let mut engine = ready_engine(4);
        engine.set_loop(Some(LoopWindow::new(0, 1000)));
        engine.play();

        let out = render(&mut engine, 10).unwrap();
        let left: Vec<f32> = out.iter().step_by(2).copied().collect();
        assert_eq!(left, vec![0.0, 1.0, 2.0, 3.0, 0.0, 1.0, 2.0, 3.0, 0.0, 1.0]);
    }

    #[test]
    fn test_loop_start_beyond_material_ignored() {
        let mut engine = ready_engine(3);
        engine.set_loop(Some(LoopWindow::new(10, 20)));
        engine.play();

        let out = render(&mut engine, 4).unwrap();
        assert_eq!(&out[6..], &[0.0, 0.0]);
        assert!(render(&mut engine, 4).is_none());
    }

    #[test]
    fn test_seek_and_stop() {
        let mut engine = ready_engine(100);
        engine.play();
        render(&mut engine, 10).unwrap();

        engine.set_position(0, true, false);
        assert_eq!(engine.position(), 0);
        assert!(!engine.is_playing());
        assert!(render(&mut engine, 10).is_none());

        engine.set_position(50, false, false);
        engine.play();
        assert_eq!(render(&mut engine, 1).unwrap(), vec![50.0, 50.0]);
    }

    #[test]
    fn test_smooth_seek_fades_in() {
        let mut engine = ready_engine(1000);
        engine.play();
        engine.set_position(500, false, true);

        let out = render(&mut engine, FADE_IN_FRAMES as usize + 1).unwrap();
        assert_eq!(out[0], 0.0);
        assert!(out[2] > 0.0 && out[2] < 501.0);
        let last = FADE_IN_FRAMES as usize * CHANNELS;
        assert_eq!(out[last], 500.0 + FADE_IN_FRAMES as f32);
    }

    #[test]
    fn test_varispeed_interpolates() {
        let mut engine = ready_engine(100);
        engine.play();

        let mut buf = vec![0.0; 8];
        let params = MixParams {
            volume: 1.0,
            rate: 0.5,
            pitch: None,
        };
        assert!(engine.process(&mut buf, 4, params));
        let left: Vec<f32> = buf.iter().step_by(2).copied().collect();
        assert_eq!(left, vec![0.0, 0.5, 1.0, 1.5]);
        assert_eq!(engine.position(), 2);
    }

    #[test]
    fn test_volume_applied() {
        let mut engine = ready_engine(10);
        engine.play();
        engine.set_position(4, false, false);

        let mut buf = vec![0.0; 2];
        assert!(engine.process(&mut buf, 1, MixParams::unchanged(0.5)));
        assert_eq!(buf, vec![2.0, 2.0]);
    }

    #[test]
    fn test_load_failure_reported_once() {
        let mut engine = TrackEngine::with_loader(48000, failing_loader());
        let (sink, events) = event_log();
        engine.open(AssetSource::file("broken.raw"), sink.clone());
        engine.open(AssetSource::file("again.raw"), sink);
        engine.join_loader();

        assert!(engine.asset.get().is_none());
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], EngineEvent::LoadFailed { .. }));

        drop(events);
        engine.play();
        assert!(render(&mut engine, 4).is_none());
    }

    #[test]
    fn test_drop_cancels_load() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let observed = Arc::clone(&cancelled);
        let mut engine = TrackEngine::with_loader(
            48000,
            Box::new(move |_: &AssetSource, _: u32, cancel: &AtomicBool| {
                wait_for(|| cancel.load(Ordering::Acquire));
                observed.store(true, Ordering::Release);
                Err(DecodeError::Cancelled)
            }),
        );
        let (sink, events) = event_log();
        engine.open(AssetSource::file("endless.raw"), sink);

        drop(engine);
        assert!(cancelled.load(Ordering::Acquire));
        assert!(events.lock().unwrap().is_empty());
    }
}
