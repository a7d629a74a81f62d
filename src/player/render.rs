//! Render 回调桥
//!
//! 平台计时线程上的每个周期：
//! 1. 取出控制路径投递的命令并作用到引擎
//! 2. 以当前音量调用引擎渲染到预分配的 f32 草稿区
//! 3. 转换为 i16 写入输出缓冲区
//!
//! **实时约束：** 没有锁、分配、日志或 I/O。

use std::sync::Arc;
use std::time::Instant;

use super::transport::CommandReceiver;
use super::SharedState;
use crate::audio::format::{float_to_i16, period_ns, samples_for, CHANNELS};
use crate::audio::memory;
use crate::audio::output::RenderCallback;
use crate::audio::stats::RenderStats;
use crate::engine::{MixEngine, MixParams};

/// 草稿区尾部余量（样本数，256 字节）
const SCRATCH_MARGIN: usize = 64;

/// 引擎与平台输出之间的桥
///
/// 拥有引擎：桥被释放时引擎随之释放
pub struct RenderBridge<E: MixEngine> {
    engine: E,
    commands: CommandReceiver,
    shared: Arc<SharedState>,
    stats: Arc<RenderStats>,
    scratch: Box<[f32]>,
    max_frames: usize,
    scratch_locked: bool,
}

impl<E: MixEngine> RenderBridge<E> {
    pub fn new(
        engine: E,
        commands: CommandReceiver,
        shared: Arc<SharedState>,
        stats: Arc<RenderStats>,
        max_frames: usize,
        lock_memory: bool,
    ) -> Self {
        let max_frames = max_frames.max(1);
        let scratch = vec![0.0f32; samples_for(max_frames) + SCRATCH_MARGIN].into_boxed_slice();

        let scratch_locked = lock_memory && memory::lock_slice(&scratch[..]);
        if lock_memory && !commands.lock_memory() {
            log::debug!("Command queue memory not locked");
        }

        Self {
            engine,
            commands,
            shared,
            stats,
            scratch,
            max_frames,
            scratch_locked,
        }
    }

    #[inline]
    fn drain_commands(&mut self) -> u64 {
        let mut applied = 0;
        while let Some(command) = self.commands.pop() {
            command.apply(&mut self.engine);
            applied += 1;
        }
        applied
    }
}

impl<E: MixEngine> RenderCallback for RenderBridge<E> {
    fn render(&mut self, output: &mut [i16], frames: usize, sample_rate: u32) -> bool {
        if self.shared.is_stopped() {
            return false;
        }
        let started = Instant::now();

        let applied = self.drain_commands();
        let frames = frames.min(output.len() / CHANNELS);
        let params = MixParams::unchanged(self.shared.volume());

        let mut audible = false;
        let mut done = 0;
        while done < frames {
            let n = (frames - done).min(self.max_frames);
            let start = samples_for(done);
            let end = samples_for(done + n);
            let scratch = &mut self.scratch[..samples_for(n)];

            if self.engine.process(scratch, n, params) {
                // 之前的块全部静音且未写入
                if !audible && start > 0 {
                    output[..start].fill(0);
                }
                float_to_i16(scratch, &mut output[start..end], n);
                audible = true;
            } else if audible {
                output[start..end].fill(0);
            }
            done += n;
        }

        self.shared
            .publish(self.engine.position(), self.engine.is_playing());

        let elapsed = started.elapsed().as_nanos() as u64;
        self.stats.record_commands(applied);
        self.stats
            .record_cycle(frames, audible, elapsed, period_ns(frames, sample_rate));

        audible
    }
}

impl<E: MixEngine> Drop for RenderBridge<E> {
    fn drop(&mut self) {
        if self.scratch_locked {
            memory::unlock_slice(&self.scratch[..]);
        }
    }
}
