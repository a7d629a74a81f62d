//! 加载事件通知
//!
//! 在加载线程上运行。只持有控制状态的独立 `Arc`，与 Player 本身的生命周期无关。

use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::{ControlState, LoadState};
use crate::engine::{EngineEvent, EventSink};

/// 把引擎的加载结果转交给状态机
pub struct LoadNotifier {
    control: Arc<ControlState>,
}

impl LoadNotifier {
    pub(crate) fn new(control: Arc<ControlState>) -> Self {
        Self { control }
    }

    pub fn into_sink(self) -> EventSink {
        Arc::new(move |event: EngineEvent| self.handle(event))
    }

    /// 只处理第一个结果，之后的事件被忽略
    pub fn handle(&self, event: EngineEvent) {
        if self.control.load_reported.swap(true, Ordering::AcqRel) {
            log::debug!("Ignoring duplicate load event: {:?}", event);
            return;
        }

        match event {
            // 先更新状态机，再公开加载状态
            EngineEvent::LoadSuccess { frames } => {
                if let Err(e) = self.control.transport().on_load_complete() {
                    log::warn!("Failed to rewind after load: {}", e);
                }
                self.control.shared.set_load_state(LoadState::Ready);
                log::info!("Asset ready: {} frames", frames);
            }
            EngineEvent::LoadFailed { reason } => {
                self.control.transport().on_load_failed();
                self.control.shared.set_load_state(LoadState::Failed);
                log::warn!("Asset failed to load, staying silent: {}", reason);
            }
        }
    }
}
