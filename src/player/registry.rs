//! 会话注册表
//!
//! 宿主以不透明的 [`SessionId`] 引用播放器。对未知或已销毁会话的操作
//! 返回 `LifecycleMisuse`，不会静默成功。

use std::collections::HashMap;
use std::fmt;

use super::{Player, PlayerConfig, PlayerError, TransportState};
use crate::audio::cpal_output::CpalOutput;
use crate::audio::output::AudioIo;
use crate::decode::AssetSource;
use crate::engine::MixEngine;

/// 会话句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session#{}", self.0)
    }
}

/// 播放器注册表
pub struct PlayerRegistry<O: AudioIo> {
    players: HashMap<SessionId, Player<O>>,
    next_id: u64,
}

impl<O: AudioIo> Default for PlayerRegistry<O> {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayerRegistry<CpalOutput> {
    /// 以默认引擎和 cpal 输出创建会话
    pub fn open(
        &mut self,
        config: PlayerConfig,
        source: AssetSource,
    ) -> Result<SessionId, PlayerError> {
        let player = Player::open(config, source)?;
        Ok(self.insert(player))
    }
}

impl<O: AudioIo> PlayerRegistry<O> {
    pub fn new() -> Self {
        Self {
            players: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn create<E: MixEngine>(
        &mut self,
        config: PlayerConfig,
        source: AssetSource,
        engine: E,
    ) -> Result<SessionId, PlayerError> {
        let player = Player::new(config, source, engine)?;
        Ok(self.insert(player))
    }

    pub fn insert(&mut self, player: Player<O>) -> SessionId {
        let id = SessionId(self.next_id);
        self.next_id += 1;
        self.players.insert(id, player);
        log::debug!("Registered {}", id);
        id
    }

    pub fn get(&self, id: SessionId) -> Result<&Player<O>, PlayerError> {
        self.players
            .get(&id)
            .ok_or_else(|| PlayerError::LifecycleMisuse(format!("{} does not exist", id)))
    }

    pub fn play_pause(&self, id: SessionId, play: bool) -> Result<TransportState, PlayerError> {
        self.get(id)?.on_play_pause(play)
    }

    pub fn set_volume(&self, id: SessionId, volume: f32) -> Result<(), PlayerError> {
        self.get(id)?.set_volume(volume);
        Ok(())
    }

    /// 销毁会话。返回时输出已停止，引擎已释放
    pub fn destroy(&mut self, id: SessionId) -> Result<(), PlayerError> {
        let player = self.players.remove(&id).ok_or_else(|| {
            PlayerError::LifecycleMisuse(format!("{} already destroyed or never created", id))
        })?;
        drop(player);
        log::debug!("Destroyed {}", id);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Journal, ManualOutput, ProbeEngine};

    fn config() -> PlayerConfig {
        PlayerConfig {
            lock_memory: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_session_lifecycle() {
        let mut registry = PlayerRegistry::<ManualOutput>::new();
        let engine = ProbeEngine::new(Journal::default(), 0.5);
        let id = registry
            .create(config(), AssetSource::file("probe.raw"), engine)
            .unwrap();
        assert_eq!(registry.len(), 1);

        assert_eq!(
            registry.play_pause(id, true).unwrap(),
            TransportState::LoopingPlayback
        );
        registry.set_volume(id, 0.5).unwrap();
        assert!(registry.get(id).unwrap().volume_gain() < 0.5);

        registry.destroy(id).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_session_is_misuse() {
        let mut registry = PlayerRegistry::<ManualOutput>::new();
        let engine = ProbeEngine::new(Journal::default(), 0.5);
        let id = registry
            .create(config(), AssetSource::file("probe.raw"), engine)
            .unwrap();
        registry.destroy(id).unwrap();

        assert!(matches!(
            registry.play_pause(id, true),
            Err(PlayerError::LifecycleMisuse(_))
        ));
        assert!(matches!(
            registry.set_volume(id, 1.0),
            Err(PlayerError::LifecycleMisuse(_))
        ));
        assert!(matches!(
            registry.destroy(id),
            Err(PlayerError::LifecycleMisuse(_))
        ));
    }

    #[test]
    fn test_ids_are_not_reused() {
        let mut registry = PlayerRegistry::<ManualOutput>::new();
        let a = registry
            .create(config(), AssetSource::file("a.raw"), ProbeEngine::new(Journal::default(), 0.5))
            .unwrap();
        registry.destroy(a).unwrap();
        let b = registry
            .create(config(), AssetSource::file("b.raw"), ProbeEngine::new(Journal::default(), 0.5))
            .unwrap();
        assert_ne!(a, b);
        assert!(b > a);
    }
}
