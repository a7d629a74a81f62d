//! Phased Player - 循环播放命令行
//!
//! 加载一个资源（可以是容器文件中的一段），空格切换播放/暂停。
//! 播放时循环固定窗口，暂停时回到起点。

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;

use phased_player::audio::format::DEFAULT_HEADROOM_DB;
use phased_player::audio::CpalOutput;
use phased_player::engine::DEFAULT_LOOP_END;
use phased_player::{
    AssetSource, LoadState, LoopWindow, Player, PlayerConfig, TransportState,
};

/// 音量步进
const VOLUME_STEP: f32 = 0.05;

/// 终端原始模式 RAII 守卫
struct RawModeGuard;

impl RawModeGuard {
    /// 进入原始模式；stdin 不是终端时返回 None
    fn enter() -> Option<Self> {
        match terminal::enable_raw_mode() {
            Ok(()) => Some(Self),
            Err(e) => {
                log::debug!("Raw mode unavailable: {}", e);
                None
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// 键盘动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAction {
    Toggle,
    Restart,
    VolumeUp,
    VolumeDown,
    Quit,
}

/// 非阻塞读取一个按键动作
fn poll_key(timeout: Duration) -> io::Result<Option<KeyAction>> {
    if !event::poll(timeout)? {
        return Ok(None);
    }
    let Event::Key(key) = event::read()? else {
        return Ok(None);
    };
    if key.kind != KeyEventKind::Press {
        return Ok(None);
    }

    let action = match key.code {
        KeyCode::Char(' ') => Some(KeyAction::Toggle),
        KeyCode::Char('r') => Some(KeyAction::Restart),
        KeyCode::Char('+') | KeyCode::Char('=') => Some(KeyAction::VolumeUp),
        KeyCode::Char('-') => Some(KeyAction::VolumeDown),
        KeyCode::Char('q') | KeyCode::Esc => Some(KeyAction::Quit),
        // 原始模式下 Ctrl+C 不产生 SIGINT
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(KeyAction::Quit)
        }
        _ => None,
    };
    Ok(action)
}

/// Phased Player - real-time looping audio player
#[derive(Parser)]
#[command(name = "phased-player")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Audio file (or container holding the asset) to play
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,

    /// Byte offset of the asset inside FILE
    #[arg(long, default_value_t = 0)]
    offset: u64,

    /// Byte length of the asset (0 = to end of file)
    #[arg(long, default_value_t = 0)]
    length: u64,

    /// Output sample rate
    #[arg(short = 'r', long, default_value_t = 48000)]
    sample_rate: u32,

    /// Frames per output period
    #[arg(short, long, default_value_t = 512)]
    buffer_frames: u32,

    /// Initial volume (linear, 0.0 - 1.0)
    #[arg(long, default_value_t = 1.0)]
    volume: f32,

    /// Fixed headroom in dB
    #[arg(long, default_value_t = DEFAULT_HEADROOM_DB)]
    headroom_db: f32,

    /// End of the loop window in frames (window starts at 0)
    #[arg(long, default_value_t = DEFAULT_LOOP_END)]
    loop_end: u64,

    /// Select output device by name (use 'devices' to list)
    #[arg(short, long)]
    device: Option<String>,

    /// Start playing as soon as the player is created
    #[arg(short, long)]
    autoplay: bool,

    /// Phase delay in nanoseconds: autoplay and [r] rewind, wait this long, then play
    #[arg(long, default_value_t = 0)]
    start_delay_ns: u64,

    /// Do not lock real-time buffers in memory
    #[arg(long)]
    no_mlock: bool,

    /// Show verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List audio output devices
    Devices,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    let default_filter = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match cli.command {
        Some(Commands::Devices) => show_devices(),
        None => match cli.file {
            Some(ref file) => play(file, &cli),
            None => {
                println!("Phased Player - real-time looping audio player\n");
                println!("Usage: phased-player [OPTIONS] <FILE>");
                println!("       phased-player devices");
                println!("\nRun with --help for all options.");
                Ok(())
            }
        },
    }
}

/// 显示设备信息
fn show_devices() -> anyhow::Result<()> {
    println!("=== Audio Output Devices ===\n");

    let devices = CpalOutput::list_devices()?;
    if devices.is_empty() {
        println!("No output devices found.");
        return Ok(());
    }

    for device in &devices {
        let default_mark = if device.is_default { " *" } else { "" };
        let rate = device
            .default_sample_rate
            .map(|r| format!("{}Hz", r))
            .unwrap_or_else(|| "?".to_string());
        println!(
            "{} ({}, {}ch){}",
            device.name, rate, device.max_channels, default_mark
        );
    }

    println!();
    println!("* = system default");
    println!("Select device: phased-player -d <NAME> <file>");
    Ok(())
}

fn player_config(cli: &Cli) -> PlayerConfig {
    PlayerConfig {
        sample_rate: cli.sample_rate,
        buffer_frames: cli.buffer_frames,
        volume: cli.volume,
        headroom_db: cli.headroom_db,
        loop_window: LoopWindow::new(0, cli.loop_end),
        lock_memory: !cli.no_mlock,
        device: cli.device.clone(),
        ..Default::default()
    }
}

fn play(file: &PathBuf, cli: &Cli) -> anyhow::Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let source = AssetSource::slice(file, cli.offset, cli.length);
    println!("Phased Player - Loading: {}", source);

    let player = Player::open(player_config(cli), source)?;
    if let Some(output) = player.output() {
        println!(
            "Output: {} | {:?} | {}Hz",
            output.device_name(),
            output.sample_format(),
            output.stream_config().sample_rate.0
        );
    }

    let mut volume = cli.volume;
    let phase_delay = Duration::from_nanos(cli.start_delay_ns);
    if cli.autoplay {
        player.restart_after(phase_delay)?;
    }

    println!("Controls: [Space] play/pause | [r] phased restart | [+/-] volume | [q] quit\n");
    let raw_guard = RawModeGuard::enter();

    while running.load(Ordering::SeqCst) {
        let action = if raw_guard.is_some() {
            poll_key(Duration::from_millis(50))?
        } else {
            std::thread::sleep(Duration::from_millis(50));
            None
        };

        match action {
            Some(KeyAction::Toggle) => {
                let play = player.state() != TransportState::LoopingPlayback;
                if let Err(e) = player.on_play_pause(play) {
                    log::warn!("Transport request failed: {}", e);
                }
            }
            Some(KeyAction::Restart) => {
                if let Err(e) = player.restart_after(phase_delay) {
                    log::warn!("Phased restart failed: {}", e);
                }
            }
            Some(KeyAction::VolumeUp) => {
                volume = (volume + VOLUME_STEP).min(1.0);
                player.set_volume(volume);
            }
            Some(KeyAction::VolumeDown) => {
                volume = (volume - VOLUME_STEP).max(0.0);
                player.set_volume(volume);
            }
            Some(KeyAction::Quit) => break,
            None => {}
        }

        print_status(&player, volume)?;
    }

    drop(raw_guard);
    let report = player.stats();
    drop(player);

    println!("\r\n{}", report);
    Ok(())
}

fn print_status(player: &Player<CpalOutput>, volume: f32) -> io::Result<()> {
    let load = match player.load_state() {
        LoadState::Loading => "loading",
        LoadState::Ready => "ready",
        LoadState::Failed => "failed",
    };
    let position_secs = player.position() as f64 / player.sample_rate() as f64;
    let stats = player.stats();

    print!(
        "\r  [{:<9}] {:<7} | {:7.3}s | vol {:3.0}% | cb {:6.1}µs | overruns {}   ",
        player.state().to_string(),
        load,
        position_secs,
        volume * 100.0,
        stats.last_callback_us,
        stats.overruns
    );
    io::stdout().flush()
}
