//! Phased Player Library
//!
//! Real-time looping playback engine: one decoded asset, a transport state
//! machine on the control path and a lock-free render callback.

pub mod audio;
pub mod decode;
pub mod engine;
pub mod player;
pub mod resample;

#[cfg(test)]
mod testing;

pub use decode::AssetSource;
pub use engine::{LoopWindow, MixEngine, TrackEngine};
pub use player::{
    LoadState, Player, PlayerConfig, PlayerError, PlayerRegistry, SessionId, TransportRequest,
    TransportState,
};
