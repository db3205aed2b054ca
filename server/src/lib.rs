//! voxmesh Server
//!
//! Voice room registry and signaling relay for peer-to-peer mesh voice.
//! Participants exchange media directly; the server only tracks who is in
//! which room and forwards connection setup messages between them.

pub mod api;
pub mod config;
pub mod voice;
pub mod ws;
