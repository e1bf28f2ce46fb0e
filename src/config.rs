//! # Engine Configuration
//!
//! Configuration for the file-replay engine. Unlike a process-wide settings
//! singleton, an [`EngineConfig`] is an owned value built with a fluent
//! `with_*` API and handed to [`crate::Engine::start`] or
//! [`crate::Engine::probe`]. Nothing here is global state.

use std::path::PathBuf;
use std::sync::Arc;

/// Default input buffer size, in MiB, when not overridden.
pub const DEFAULT_BUFFER_SIZE_MIB: u32 = 2;

/// Default handoff queue capacity, in 188-byte packets, when not overridden.
pub const DEFAULT_QUEUE_CAPACITY_PACKETS: usize = 2048;

/// Callback invoked once, from the consumer thread, when the engine
/// delivers its terminal end-of-stream sentinel in non-loop mode.
pub type EofCallback = Arc<dyn Fn() + Send + Sync>;

/// Configuration recognized by the engine, matching the `filename` / `lock`
/// / `loop` / `pause` / `buffer_size` / `check_length` / `callback` options
/// of the original module.
#[derive(Clone)]
pub struct EngineConfig {
    pub(crate) filename: PathBuf,
    pub(crate) lock_path: Option<PathBuf>,
    pub(crate) loop_playback: bool,
    pub(crate) initial_pause: bool,
    pub(crate) buffer_size_mib: u32,
    pub(crate) queue_capacity_packets: usize,
    pub(crate) eof_callback: Option<EofCallback>,
}

impl EngineConfig {
    /// Creates a configuration for the given input file, with all other
    /// options at their documented defaults.
    pub fn new(filename: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            lock_path: None,
            loop_playback: false,
            initial_pause: false,
            buffer_size_mib: DEFAULT_BUFFER_SIZE_MIB,
            queue_capacity_packets: DEFAULT_QUEUE_CAPACITY_PACKETS,
            eof_callback: None,
        }
    }

    /// Sets the checkpoint lock-file path. When set, `Engine::start` seeds
    /// `skip` from its contents (rounded down to the nearest packet
    /// boundary) and `Engine::checkpoint_tick` persists the current read
    /// offset to it.
    pub fn with_lock_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.lock_path = Some(path.into());
        self
    }

    /// Enables seamless looping: a short read rewinds to offset 0 instead
    /// of delivering EOF.
    pub fn with_loop(mut self, enabled: bool) -> Self {
        self.loop_playback = enabled;
        self
    }

    /// Sets the initial pause state the pacing loop starts in.
    pub fn with_initial_pause(mut self, paused: bool) -> Self {
        self.initial_pause = paused;
        self
    }

    /// Sets the input buffer size in MiB (default 2).
    pub fn with_buffer_size_mib(mut self, mib: u32) -> Self {
        if mib > 0 {
            self.buffer_size_mib = mib;
        }
        self
    }

    /// Sets the handoff queue capacity in 188-byte packets (default 2048).
    pub fn with_queue_capacity_packets(mut self, packets: usize) -> Self {
        if packets > 0 {
            self.queue_capacity_packets = packets;
        }
        self
    }

    /// Registers a callback invoked once on EOF (non-loop mode only).
    pub fn with_eof_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.eof_callback = Some(Arc::new(callback));
        self
    }

    /// Input buffer size in bytes.
    pub fn buffer_size_bytes(&self) -> usize {
        self.buffer_size_mib as usize * 1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = EngineConfig::new("input.ts");
        assert_eq!(cfg.buffer_size_mib, DEFAULT_BUFFER_SIZE_MIB);
        assert_eq!(cfg.queue_capacity_packets, DEFAULT_QUEUE_CAPACITY_PACKETS);
        assert!(!cfg.loop_playback);
        assert!(!cfg.initial_pause);
        assert!(cfg.lock_path.is_none());
    }

    #[test]
    fn builder_overrides_apply() {
        let cfg = EngineConfig::new("input.ts")
            .with_loop(true)
            .with_initial_pause(true)
            .with_buffer_size_mib(4)
            .with_queue_capacity_packets(512)
            .with_lock_path("input.lock");
        assert!(cfg.loop_playback);
        assert!(cfg.initial_pause);
        assert_eq!(cfg.buffer_size_bytes(), 4 * 1024 * 1024);
        assert_eq!(cfg.queue_capacity_packets, 512);
        assert_eq!(
            cfg.lock_path.as_deref(),
            Some(std::path::Path::new("input.lock"))
        );
    }

    #[test]
    fn zero_overrides_are_ignored() {
        let cfg = EngineConfig::new("input.ts")
            .with_buffer_size_mib(0)
            .with_queue_capacity_packets(0);
        assert_eq!(cfg.buffer_size_mib, DEFAULT_BUFFER_SIZE_MIB);
        assert_eq!(cfg.queue_capacity_packets, DEFAULT_QUEUE_CAPACITY_PACKETS);
    }
}
