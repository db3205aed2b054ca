//! voxmesh Client
//!
//! Joins a voice room through the signaling server and keeps one direct peer
//! connection to every other member. Local media, speaking detection and the
//! render state all hang off a single voice session task.

pub mod audio;
pub mod broker;
pub mod config;
pub mod media;
pub mod network;
pub mod session;
pub mod speaking;
pub mod webrtc;

#[cfg(test)]
mod testing;

pub use config::ClientConfig;
pub use session::{Joined, SessionError, VoiceSession, VoiceView};
