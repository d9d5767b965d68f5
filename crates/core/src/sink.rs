//! Frame sink: where accepted media payloads end up.
//!
//! Each session owns exactly one cache slot. The slot is created when
//! SETUP succeeds, overwritten by every accepted frame, and released when
//! the session is torn down. After storing a frame the sink hands it to the
//! render callback registered through [`Client::on_frame`](crate::Client::on_frame).

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::Result;

/// File name prefix of an on-disk frame slot.
pub const CACHE_FILE_PREFIX: &str = "cache-";
/// File extension of an on-disk frame slot.
pub const CACHE_FILE_EXT: &str = ".jpg";

/// One decoded frame, borrowed from the receive buffer.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub session_id: u64,
    pub sequence: u16,
    pub timestamp: u32,
    /// Raw image bytes (a JPEG for MJPEG streams).
    pub data: &'a [u8],
}

/// Render callback invoked for every stored frame.
pub type FrameCallback = Arc<dyn Fn(&Frame<'_>) + Send + Sync>;

/// Storage for the latest frame of a session.
///
/// The sink guarantees `store` and `release` are only called for a slot it
/// created, so implementations do not need to check.
pub trait FrameCache: Send {
    fn create(&mut self, session_id: u64) -> Result<()>;
    fn store(&mut self, session_id: u64, data: &[u8]) -> Result<()>;
    fn release(&mut self, session_id: u64) -> Result<()>;
}

/// In-memory frame cache.
///
/// Cloning yields another handle to the same storage, so a caller can keep
/// one to inspect what the client stored.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    slots: Arc<Mutex<HashMap<u64, Vec<u8>>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a slot exists for `session_id`.
    pub fn contains(&self, session_id: u64) -> bool {
        self.slots.lock().contains_key(&session_id)
    }

    /// Copy of the latest frame stored for `session_id`.
    pub fn frame(&self, session_id: u64) -> Option<Vec<u8>> {
        self.slots.lock().get(&session_id).cloned()
    }
}

impl FrameCache for MemoryCache {
    fn create(&mut self, session_id: u64) -> Result<()> {
        self.slots.lock().insert(session_id, Vec::new());
        Ok(())
    }

    fn store(&mut self, session_id: u64, data: &[u8]) -> Result<()> {
        let mut slots = self.slots.lock();
        let slot = slots.entry(session_id).or_default();
        slot.clear();
        slot.extend_from_slice(data);
        Ok(())
    }

    fn release(&mut self, session_id: u64) -> Result<()> {
        self.slots.lock().remove(&session_id);
        Ok(())
    }
}

/// Frame cache backed by one file per session: `<dir>/cache-<id>.jpg`.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the slot file for `session_id`.
    pub fn path_for(&self, session_id: u64) -> PathBuf {
        self.dir
            .join(format!("{CACHE_FILE_PREFIX}{session_id}{CACHE_FILE_EXT}"))
    }
}

impl FrameCache for FileCache {
    fn create(&mut self, session_id: u64) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::File::create(self.path_for(session_id))?;
        Ok(())
    }

    fn store(&mut self, session_id: u64, data: &[u8]) -> Result<()> {
        fs::write(self.path_for(session_id), data)?;
        Ok(())
    }

    fn release(&mut self, session_id: u64) -> Result<()> {
        match fs::remove_file(self.path_for(session_id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

struct SinkState {
    cache: Box<dyn FrameCache>,
    slot: Option<u64>,
}

/// Adapter between the media listener and the outside world.
///
/// Shared between the session controller (which creates and releases the
/// slot) and the media listener thread (which stores frames). Cache
/// failures are logged and never propagate into either.
pub struct FrameSink {
    state: Mutex<SinkState>,
    render: RwLock<Option<FrameCallback>>,
}

impl FrameSink {
    pub fn new(cache: Box<dyn FrameCache>) -> Self {
        Self {
            state: Mutex::new(SinkState { cache, slot: None }),
            render: RwLock::new(None),
        }
    }

    /// Replace the render callback.
    pub fn set_callback(&self, callback: FrameCallback) {
        *self.render.write() = Some(callback);
    }

    /// Session whose slot currently exists, if any.
    pub fn slot(&self) -> Option<u64> {
        self.state.lock().slot
    }

    /// Create the slot for a freshly established session.
    ///
    /// A slot left over from an earlier session is released first.
    pub fn reset(&self, session_id: u64) {
        let mut state = self.state.lock();
        if let Some(old) = state.slot.take() {
            if let Err(e) = state.cache.release(old) {
                tracing::warn!(session_id = old, error = %e, "failed to release stale frame slot");
            }
        }
        match state.cache.create(session_id) {
            Ok(()) => {
                tracing::debug!(session_id, "frame slot created");
                state.slot = Some(session_id);
            }
            Err(e) => {
                tracing::warn!(session_id, error = %e, "failed to create frame slot");
            }
        }
    }

    /// Destroy the slot of `session_id`. Does nothing if it does not exist.
    pub fn release(&self, session_id: u64) {
        let mut state = self.state.lock();
        if state.slot != Some(session_id) {
            tracing::trace!(session_id, "no frame slot to release");
            return;
        }
        state.slot = None;
        match state.cache.release(session_id) {
            Ok(()) => tracing::debug!(session_id, "frame slot released"),
            Err(e) => tracing::warn!(session_id, error = %e, "failed to release frame slot"),
        }
    }

    /// Store a frame in the current slot, then hand it to the renderer.
    ///
    /// Returns `false` when there is no slot to store into; the frame is
    /// dropped in that case.
    pub fn on_frame(&self, sequence: u16, timestamp: u32, data: &[u8]) -> bool {
        let session_id = {
            let mut state = self.state.lock();
            let Some(session_id) = state.slot else {
                tracing::trace!(seq = sequence, "frame without slot dropped");
                return false;
            };
            if let Err(e) = state.cache.store(session_id, data) {
                tracing::warn!(session_id, seq = sequence, error = %e, "failed to store frame");
            }
            session_id
        };

        let render = self.render.read().clone();
        if let Some(render) = render {
            render(&Frame {
                session_id,
                sequence,
                timestamp,
                data,
            });
        }
        true
    }
}
