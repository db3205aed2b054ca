//! Incoming media from one counterpart.

use std::fmt;

use tokio::task::JoinHandle;

use crate::audio::LevelMeter;

/// Kind of an incoming track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

/// A live incoming track. Dropping it stops its reader.
pub struct RemoteStream {
    pub kind: MediaKind,
    /// Level of the decoded audio (stays zero for video).
    pub meter: LevelMeter,
    reader: Option<JoinHandle<()>>,
}

impl RemoteStream {
    #[must_use]
    pub const fn new(kind: MediaKind, meter: LevelMeter, reader: JoinHandle<()>) -> Self {
        Self {
            kind,
            meter,
            reader: Some(reader),
        }
    }

    /// Stream without a reader task.
    #[must_use]
    pub const fn detached(kind: MediaKind, meter: LevelMeter) -> Self {
        Self {
            kind,
            meter,
            reader: None,
        }
    }

    /// Stop reading and zero the meter.
    pub fn stop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.meter.reset();
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.reader.as_ref().is_some_and(|r| !r.is_finished())
    }
}

impl Drop for RemoteStream {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStream")
            .field("kind", &self.kind)
            .field("level", &self.meter.level())
            .field("running", &self.is_running())
            .finish()
    }
}
