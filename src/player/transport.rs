//! 播放状态机
//!
//! 只在控制路径上运行。每个请求被翻译成一组 [`EngineCommand`]，
//! 经 SPSC 队列交给渲染线程；一组命令要么全部入队，要么一个都不入队。

use std::fmt;

use crossbeam_utils::Backoff;

use super::PlayerError;
use crate::audio::ring_buffer::{Receiver, Sender};
use crate::engine::{LoopWindow, MixEngine};

/// 命令队列生产者半边
pub type CommandSender = Sender<EngineCommand>;
/// 命令队列消费者半边（渲染线程）
pub type CommandReceiver = Receiver<EngineCommand>;

/// 传输状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    AtStart,
    Paused,
    LoopingPlayback,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AtStart => "at start",
            Self::Paused => "paused",
            Self::LoopingPlayback => "looping",
        };
        f.write_str(name)
    }
}

/// 传输请求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportRequest {
    Pause,
    Play,
}

impl From<bool> for TransportRequest {
    /// 宿主的播放/暂停开关：true = Play
    fn from(play: bool) -> Self {
        if play {
            Self::Play
        } else {
            Self::Pause
        }
    }
}

/// 渲染线程上对引擎执行的命令
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineCommand {
    Seek { frame: u64, stop: bool, smooth: bool },
    Play,
    SetLoop(Option<LoopWindow>),
}

impl Default for EngineCommand {
    fn default() -> Self {
        Self::Seek {
            frame: 0,
            stop: true,
            smooth: false,
        }
    }
}

impl EngineCommand {
    #[inline]
    pub fn apply<E: MixEngine + ?Sized>(self, engine: &mut E) {
        match self {
            Self::Seek {
                frame,
                stop,
                smooth,
            } => engine.set_position(frame, stop, smooth),
            Self::Play => engine.play(),
            Self::SetLoop(window) => engine.set_loop(window),
        }
    }
}

const PAUSE: [EngineCommand; 1] = [EngineCommand::Seek {
    frame: 0,
    stop: true,
    smooth: false,
}];

const REWIND: [EngineCommand; 1] = [EngineCommand::Seek {
    frame: 0,
    stop: false,
    smooth: false,
}];

/// 传输状态机，持有命令队列唯一的生产者半边
pub struct TransportMachine {
    state: TransportState,
    loop_window: LoopWindow,
    load_failed: bool,
    commands: CommandSender,
}

impl TransportMachine {
    pub fn new(commands: CommandSender, loop_window: LoopWindow) -> Self {
        Self {
            state: TransportState::AtStart,
            loop_window,
            load_failed: false,
            commands,
        }
    }

    #[inline]
    pub fn state(&self) -> TransportState {
        self.state
    }

    /// 处理宿主请求，返回新状态
    ///
    /// 加载失败后 Play 不做任何事（保持静音）；Pause 仍然生效
    pub fn request(&mut self, request: TransportRequest) -> Result<TransportState, PlayerError> {
        let play = [
            EngineCommand::Play,
            EngineCommand::SetLoop(Some(self.loop_window)),
        ];
        let (commands, next): (&[EngineCommand], _) = match request {
            TransportRequest::Pause => (&PAUSE[..], TransportState::Paused),
            TransportRequest::Play if self.load_failed => {
                log::debug!("Play ignored: asset failed to load");
                return Ok(self.state);
            }
            TransportRequest::Play => (&play[..], TransportState::LoopingPlayback),
        };

        self.submit(commands)?;
        if self.state != next {
            log::debug!("Transport: {} -> {}", self.state, next);
        }
        self.state = next;
        Ok(next)
    }

    /// 加载完成。只有尚未收到任何传输请求时才回到起点
    pub fn on_load_complete(&mut self) -> Result<(), PlayerError> {
        if self.state != TransportState::AtStart {
            log::debug!("Load complete while {}, position left as is", self.state);
            return Ok(());
        }
        self.submit(&REWIND)
    }

    pub fn on_load_failed(&mut self) {
        self.load_failed = true;
    }

    /// 原子地提交一组命令
    ///
    /// 空间不足时短暂退避等待渲染线程消费，仍不足则返回 `CommandBacklog`
    fn submit(&mut self, commands: &[EngineCommand]) -> Result<(), PlayerError> {
        let needed = commands.len();
        let backoff = Backoff::new();
        while self.commands.free_space() < needed {
            if backoff.is_completed() {
                return Err(PlayerError::CommandBacklog {
                    needed,
                    free: self.commands.free_space(),
                });
            }
            backoff.snooze();
        }

        for &command in commands {
            // 单生产者：检查过的空间不会被别人占用
            if self.commands.push(command).is_err() {
                return Err(PlayerError::CommandBacklog {
                    needed,
                    free: self.commands.free_space(),
                });
            }
        }
        Ok(())
    }
}
