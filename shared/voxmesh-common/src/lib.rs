//! voxmesh Common Library
//!
//! Shared identifiers, participant types and the signaling protocol used by
//! both the server and the client.

pub mod error;
pub mod protocol;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
