//! 测试替身与测试资源

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::format::{period_ns, samples_for};
use crate::audio::output::{AudioIo, OutputConfig, OutputError, RenderCallback};
use crate::audio::stats::RenderStats;
use crate::decode::{AssetSource, DecodeError, DecodedAsset};
use crate::engine::track::AssetLoader;
use crate::engine::{EngineEvent, EventSink, LoopWindow, MixEngine, MixParams};

/// 跨线程事件记录
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: &str) {
        self.0.lock().unwrap().push(entry.to_string());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

thread_local! {
    static NEXT_JOURNAL: RefCell<Option<Journal>> = const { RefCell::new(None) };
}

/// 让本线程下一次创建的测试输出记录到 `journal`
pub fn install_journal(journal: &Journal) {
    NEXT_JOURNAL.with(|j| *j.borrow_mut() = Some(journal.clone()));
}

fn take_journal() -> Option<Journal> {
    NEXT_JOURNAL.with(|j| j.borrow_mut().take())
}

/// 轮询直到条件成立，超时 panic
pub fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within 5s");
        thread::sleep(Duration::from_millis(1));
    }
}

/// 第 i 帧两个声道都是 `i`
pub fn counting_asset(frames: usize, sample_rate: u32) -> DecodedAsset {
    let samples = (0..frames).flat_map(|i| [i as f32; 2]).collect();
    DecodedAsset::from_interleaved(samples, sample_rate)
}

/// 第 i 帧转换成 i16 后恰好是 `i`（单位增益时）
pub fn index_asset(frames: usize) -> DecodedAsset {
    let samples = (0..frames)
        .flat_map(|i| [i as f32 / 32768.0; 2])
        .collect();
    DecodedAsset::from_interleaved(samples, 48000)
}

/// 立即返回 `asset` 的加载函数
pub fn ready_loader(asset: DecodedAsset) -> AssetLoader {
    Box::new(move |_: &AssetSource, _: u32, _: &AtomicBool| Ok(asset))
}

/// 收到 `gate` 信号后才返回 `asset` 的加载函数
pub fn gated_loader(asset: DecodedAsset, gate: mpsc::Receiver<()>) -> AssetLoader {
    Box::new(move |_: &AssetSource, _: u32, _: &AtomicBool| {
        let _ = gate.recv();
        Ok(asset)
    })
}

/// 总是失败的加载函数
pub fn failing_loader() -> AssetLoader {
    Box::new(|_: &AssetSource, _: u32, _: &AtomicBool| Err(DecodeError::NoAudioTrack))
}

/// 记录所有事件的 sink
pub fn event_log() -> (EventSink, Arc<Mutex<Vec<EngineEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&events);
    let sink: EventSink = Arc::new(move |event: EngineEvent| captured.lock().unwrap().push(event));
    (sink, events)
}

/// 写入立体声 16-bit WAV 临时文件
pub fn write_wav(sample_rate: u32, frames: &[[i16; 2]]) -> tempfile::NamedTempFile {
    let file = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(file.path(), spec).unwrap();
    for frame in frames {
        writer.write_sample(frame[0]).unwrap();
        writer.write_sample(frame[1]).unwrap();
    }
    writer.finalize().unwrap();
    file
}

/// 由测试驱动的输出：测试调用 [`ManualOutput::render`] 模拟一个周期
///
/// 静音时不填充缓冲区，便于观察回调本身的行为
pub struct ManualOutput {
    callback: Mutex<Box<dyn RenderCallback>>,
    config: OutputConfig,
    running: AtomicBool,
    journal: Option<Journal>,
}

impl ManualOutput {
    pub fn render(&self, output: &mut [i16], frames: usize) -> bool {
        if !self.running.load(Ordering::Acquire) {
            return false;
        }
        let mut callback = self.callback.lock().unwrap();
        callback.render(output, frames, self.config.sample_rate)
    }
}

impl AudioIo for ManualOutput {
    fn start(
        config: &OutputConfig,
        callback: Box<dyn RenderCallback>,
        _stats: Arc<RenderStats>,
    ) -> Result<Self, OutputError> {
        Ok(Self {
            callback: Mutex::new(callback),
            config: config.clone(),
            running: AtomicBool::new(true),
            journal: take_journal(),
        })
    }

    fn stop(&mut self) -> Result<(), OutputError> {
        if self.running.swap(false, Ordering::AcqRel) {
            if let Some(journal) = &self.journal {
                journal.record("output_stopped");
            }
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// 模拟平台计时线程：以周期间隔反复调用回调
pub struct ThreadedOutput {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<Box<dyn RenderCallback>>>,
    /// 停止后收回的回调，随输出一起释放
    _retired: Option<Box<dyn RenderCallback>>,
    journal: Option<Journal>,
}

impl AudioIo for ThreadedOutput {
    fn start(
        config: &OutputConfig,
        mut callback: Box<dyn RenderCallback>,
        _stats: Arc<RenderStats>,
    ) -> Result<Self, OutputError> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let frames = config.buffer_frames as usize;
        let sample_rate = config.sample_rate;
        let period = Duration::from_nanos(period_ns(frames, sample_rate));

        let handle = thread::Builder::new()
            .name("test-output".to_string())
            .spawn(move || {
                let mut buffer = vec![0i16; samples_for(frames)];
                while flag.load(Ordering::Acquire) {
                    if !callback.render(&mut buffer, frames, sample_rate) {
                        buffer.fill(0);
                    }
                    thread::sleep(period);
                }
                callback
            })
            .map_err(|e| OutputError::StartStream(e.to_string()))?;

        Ok(Self {
            running,
            handle: Some(handle),
            _retired: None,
            journal: take_journal(),
        })
    }

    fn stop(&mut self) -> Result<(), OutputError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.running.store(false, Ordering::Release);
        let callback = handle
            .join()
            .map_err(|_| OutputError::InvalidState("output thread panicked"))?;
        self._retired = Some(callback);
        if let Some(journal) = &self.journal {
            journal.record("output_stopped");
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for ThreadedOutput {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// 探针引擎：恒定电平输出，记录调用与释放
pub struct ProbeEngine {
    journal: Journal,
    level: f32,
    playing: bool,
    position: u64,
    limit: Option<u64>,
    looping: Option<LoopWindow>,
    render_delay: Duration,
}

impl ProbeEngine {
    pub fn new(journal: Journal, level: f32) -> Self {
        Self {
            journal,
            level,
            playing: false,
            position: 0,
            limit: None,
            looping: None,
            render_delay: Duration::ZERO,
        }
    }

    pub fn with_render_delay(mut self, delay: Duration) -> Self {
        self.render_delay = delay;
        self
    }

    /// 在 `frames` 帧后结束
    pub fn set_limit(&mut self, frames: u64) {
        self.limit = Some(frames);
    }

    pub fn loop_window(&self) -> Option<LoopWindow> {
        self.looping
    }
}

impl MixEngine for ProbeEngine {
    fn open(&mut self, _source: AssetSource, events: EventSink) {
        self.journal.record("open");
        events(EngineEvent::LoadSuccess {
            frames: self.limit.unwrap_or(u64::MAX),
        });
    }

    fn cache_position(&mut self, frame: u64) {
        self.position = frame;
    }

    fn set_position(&mut self, frame: u64, and_stop: bool, _smooth: bool) {
        self.journal.record("seek");
        self.position = frame;
        if and_stop {
            self.playing = false;
        }
    }

    fn play(&mut self) {
        self.journal.record("play");
        self.playing = true;
    }

    fn set_loop(&mut self, window: Option<LoopWindow>) {
        self.journal.record("set_loop");
        self.looping = window;
    }

    fn process(&mut self, buffer: &mut [f32], frames: usize, params: MixParams) -> bool {
        self.journal.record("render");
        if !self.render_delay.is_zero() {
            thread::sleep(self.render_delay);
        }
        if !self.playing {
            return false;
        }

        let available = self
            .limit
            .map_or(frames as u64, |limit| limit.saturating_sub(self.position));
        let n = frames.min(available as usize);
        if n == 0 {
            self.playing = false;
            return false;
        }

        buffer[..samples_for(n)].fill(self.level * params.volume);
        buffer[samples_for(n)..samples_for(frames)].fill(0.0);
        self.position += n as u64;
        true
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn is_playing(&self) -> bool {
        self.playing
    }
}

impl Drop for ProbeEngine {
    fn drop(&mut self) {
        self.journal.record("engine_dropped");
    }
}
