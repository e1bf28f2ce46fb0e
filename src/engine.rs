//! # Pacing Loop and Control Surface
//!
//! The engine's heart: a dedicated producer thread that drives the
//! [`crate::framing`] inspector and [`crate::reader::SourceReader`], paces
//! packet emission against PCR deltas, and exposes lifecycle control
//! (`pause`, `set_position`, `checkpoint_tick`, `length`) to any other
//! thread. Grounded on `thread_loop`/`open_file`/the `method_*` functions
//! in the original file-input module, restructured as an owned `Engine`
//! handle the way [`crate`]'s `AudioPlayer` owns its decode thread and a
//! shared `Arc<AtomicBool>` shutdown flag (see `streaming.rs`'s
//! `LocalStreamServer` for the same shutdown-flag idiom).

use std::fs;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::error::{ReplayError, Result};
use crate::framing::{self, PacketGeometry};
use crate::queue::{self, QueueConsumer, QueueProducer};
use crate::reader::SourceReader;

const PAUSE_POLL: Duration = Duration::from_micros(500);
/// Sanity window for a computed block time, in milliseconds.
const BLOCK_TIME_MAX_MS: f64 = 250.0;
/// Drift magnitude, in milliseconds, beyond which accumulators are reset.
const SYNC_DIFF_RESET_MS: f64 = 100.0;
/// Sync-diff value forced after a detected backward clock step.
const TIME_TRAVEL_SYNC_DIFF_MS: f64 = -1000.0;

const GEOMETRY_TS188: u8 = 1;
const GEOMETRY_M2TS192: u8 = 2;

fn geometry_to_tag(g: PacketGeometry) -> u8 {
    match g {
        PacketGeometry::Ts188 => GEOMETRY_TS188,
        PacketGeometry::M2ts192 => GEOMETRY_M2TS192,
    }
}

fn geometry_from_tag(tag: u8) -> Option<PacketGeometry> {
    match tag {
        GEOMETRY_TS188 => Some(PacketGeometry::Ts188),
        GEOMETRY_M2TS192 => Some(PacketGeometry::M2ts192),
        _ => None,
    }
}

/// Shared control state: written by the control side (pause/seek/stop),
/// read and occasionally advanced by the pacing loop. All fields are plain
/// atomics — no mutex is required because every transition is idempotent
/// and the producer only observes them at well-defined points in the outer
/// loop.
struct EngineHandle {
    stop: AtomicBool,
    pause: AtomicBool,
    reposition: AtomicBool,
    loop_playback: bool,
    skip: AtomicU64,
    file_size: AtomicU64,
    length_ms: AtomicU32,
    start_time_ms: AtomicU32,
    current_position_ms: AtomicU32,
    geometry: AtomicU8,
    lock_path: Option<std::path::PathBuf>,
}

impl EngineHandle {
    fn geometry(&self) -> Option<PacketGeometry> {
        geometry_from_tag(self.geometry.load(Ordering::Acquire))
    }
}

/// Result of [`Engine::probe`]: geometry and length without starting the
/// pacing thread, matching the original's `check_length` fast path.
#[derive(Debug, Clone, Copy)]
pub struct ProbeInfo {
    /// Detected packet geometry.
    pub geometry: PacketGeometry,
    /// Total file size, in bytes.
    pub file_size: u64,
    /// Stream length in ms (0 for TS188).
    pub length_ms: u32,
}

/// The file-replay engine. Owns the producer thread; dropped (or
/// explicitly [`Engine::stop`]ped), it requests the thread exit and joins
/// it.
pub struct Engine {
    handle: Arc<EngineHandle>,
    thread: Option<JoinHandle<()>>,
}

/// Loads a decimal byte offset from a checkpoint lock file, returning 0 if
/// the file is absent, empty, or unparsable (a crash between truncate and
/// write leaves an empty file, which is interpreted as "start from 0").
fn load_checkpoint(path: &std::path::Path) -> u64 {
    match fs::read_to_string(path) {
        Ok(contents) => contents.trim().parse().unwrap_or(0),
        Err(_) => 0,
    }
}

impl Engine {
    /// Opens `path`, classifies it, and closes it again without starting
    /// the pacing thread — the `check_length` fast path, for callers that
    /// only need geometry/length before committing to a full `start`.
    pub fn probe(path: impl AsRef<std::path::Path>, buffer_size: usize) -> Result<ProbeInfo> {
        let mut skip = 0u64;
        let (reader, info) = SourceReader::open(path, buffer_size, &mut skip)?;
        reader.close();
        Ok(ProbeInfo {
            geometry: info.geometry,
            file_size: info.file_size,
            length_ms: info.length_ms,
        })
    }

    /// Opens the input file and starts the pacing loop on a dedicated
    /// thread. Returns the engine handle and the consumer half of the
    /// handoff queue.
    ///
    /// Fails synchronously (no thread is spawned) on `OpenFailed`,
    /// `BadFormat`, or `NoPcr` — matching the original's "silent
    /// fatal-to-thread" behavior, but surfaced as an `Err` the caller can
    /// act on rather than a thread that quietly never starts.
    pub fn start(config: EngineConfig) -> Result<(Engine, QueueConsumer)> {
        let buffer_size = config.buffer_size_bytes();

        let mut skip = match &config.lock_path {
            Some(path) => {
                let raw = load_checkpoint(path);
                // Round down to the nearest stride once we know it; try the
                // raw value first, then each known stride, before giving up.
                raw
            }
            None => 0,
        };

        let (mut reader, info) = match SourceReader::open(&config.filename, buffer_size, &mut skip) {
            Ok(ok) => ok,
            Err(ReplayError::BadFormat(_)) | Err(ReplayError::NoPcr) if skip > 0 => {
                // Retry with skip rounded down to each known stride before
                // surfacing the failure, per the lock-file alignment Open
                // Question.
                let mut last_err = None;
                let mut opened = None;
                for stride in [framing::TS_PACKET_SIZE as u64, framing::M2TS_PACKET_SIZE as u64] {
                    let mut aligned = (skip / stride) * stride;
                    match SourceReader::open(&config.filename, buffer_size, &mut aligned) {
                        Ok(ok) => {
                            opened = Some((aligned, ok));
                            break;
                        }
                        Err(e) => last_err = Some(e),
                    }
                }
                match opened {
                    Some((aligned, ok)) => {
                        skip = aligned;
                        ok
                    }
                    None => return Err(last_err.unwrap()),
                }
            }
            Err(e) => return Err(e),
        };

        let handle = Arc::new(EngineHandle {
            stop: AtomicBool::new(false),
            pause: AtomicBool::new(config.initial_pause),
            reposition: AtomicBool::new(false),
            loop_playback: config.loop_playback,
            skip: AtomicU64::new(skip),
            file_size: AtomicU64::new(info.file_size),
            length_ms: AtomicU32::new(info.length_ms),
            start_time_ms: AtomicU32::new(info.start_time_ms),
            current_position_ms: AtomicU32::new(info.start_time_ms),
            geometry: AtomicU8::new(geometry_to_tag(info.geometry)),
            lock_path: config.lock_path.clone(),
        });

        let (producer, consumer) = queue::channel(config.queue_capacity_packets, config.eof_callback.clone())?;

        let thread_handle = {
            let handle = handle.clone();
            let filename = config.filename.clone();
            thread::Builder::new()
                .name("tsreplay-pacing".into())
                .spawn(move || {
                    pacing_loop(filename, buffer_size, reader, info.first_pcr_offset, handle, producer);
                })?
        };

        Ok((
            Engine {
                handle,
                thread: Some(thread_handle),
            },
            consumer,
        ))
    }

    /// Returns the stream length in ms (0 for TS188).
    pub fn length(&self) -> u32 {
        self.handle.length_ms.load(Ordering::Relaxed)
    }

    /// Sets or clears the pause flag. Safe to call from any thread.
    pub fn pause(&self, on: bool) {
        self.handle.pause.store(on, Ordering::Release);
    }

    /// Requests a seek to `ms` milliseconds into the stream. Only
    /// meaningful for M2TS and when `ms < length_ms`; for TS188 or
    /// out-of-range `ms`, returns 0 and takes no effect. Returns the
    /// approximate pre-seek position.
    pub fn set_position(&self, ms: u32) -> u32 {
        let geometry = self.handle.geometry();
        let length_ms = self.handle.length_ms.load(Ordering::Relaxed);
        if geometry != Some(PacketGeometry::M2ts192) || length_ms == 0 || ms >= length_ms {
            return 0;
        }

        let pre_seek_position = self
            .handle
            .current_position_ms
            .load(Ordering::Relaxed)
            .saturating_sub(self.handle.start_time_ms.load(Ordering::Relaxed));

        let file_size = self.handle.file_size.load(Ordering::Relaxed);
        let ts_count = file_size / framing::M2TS_PACKET_SIZE as u64;
        let ts_skip = (ms as u64 * ts_count) / length_ms as u64;
        self.handle
            .skip
            .store(ts_skip * framing::M2TS_PACKET_SIZE as u64, Ordering::Relaxed);
        self.handle.reposition.store(true, Ordering::Release);

        pre_seek_position
    }

    /// Writes the decimal representation of the current read offset to
    /// the configured lock file, if any, using an open-truncate-write
    /// idiom (acceptable given the tiny payload; the original's checkpoint
    /// write is similarly non-fsync'd). File mode is fixed at 0644 per
    /// spec, independent of the process umask.
    pub fn checkpoint_tick(&self) -> Result<()> {
        let Some(path) = &self.handle.lock_path else {
            return Ok(());
        };
        let skip = self.handle.skip.load(Ordering::Relaxed);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(0o644)
            .open(path)?;
        write!(file, "{skip}")?;
        Ok(())
    }

    /// Requests the pacing thread stop and joins it. Idempotent: safe to
    /// call more than once, or not at all (Drop does the same).
    pub fn stop(&mut self) {
        self.handle.stop.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn pacing_loop(
    filename: std::path::PathBuf,
    buffer_size: usize,
    mut reader: SourceReader,
    initial_pcr_offset: usize,
    handle: Arc<EngineHandle>,
    mut producer: QueueProducer,
) {
    let geometry = match handle.geometry() {
        Some(g) => g,
        None => return,
    };

    let mut cursor = initial_pcr_offset;
    let mut last_pcr = {
        let payload = framing::payload_at(&reader.buffer()[cursor..cursor + geometry.stride()], geometry);
        framing::extract_pcr(payload)
    };

    let mut time_sync_b = Instant::now();
    let mut block_time_total_ms = 0.0f64;
    let mut total_sync_diff_ms = 0.0f64;
    let mut pause_total_ms = 0.0f64;

    log::info!(
        "[{}] starting replay: geometry={:?} file_size={}",
        filename.display(),
        geometry,
        handle.file_size.load(Ordering::Relaxed)
    );

    'outer: loop {
        if handle.stop.load(Ordering::Acquire) {
            producer.push_eof();
            break;
        }

        if handle.pause.load(Ordering::Acquire) {
            while handle.pause.load(Ordering::Acquire) && !handle.stop.load(Ordering::Acquire) {
                thread::sleep(PAUSE_POLL);
            }
            time_sync_b = Instant::now();
            block_time_total_ms = 0.0;
            total_sync_diff_ms = 0.0;
            pause_total_ms = 0.0;
            continue;
        }

        if handle.reposition.swap(false, Ordering::AcqRel) {
            let mut skip = handle.skip.load(Ordering::Relaxed);
            match SourceReader::open(&filename, buffer_size, &mut skip) {
                Ok((new_reader, info)) => {
                    reader = new_reader;
                    handle.geometry.store(geometry_to_tag(info.geometry), Ordering::Release);
                    cursor = info.first_pcr_offset;
                    let payload = framing::payload_at(
                        &reader.buffer()[cursor..cursor + info.geometry.stride()],
                        info.geometry,
                    );
                    last_pcr = framing::extract_pcr(payload);
                    handle.skip.store(skip, Ordering::Relaxed);
                }
                Err(e) => {
                    log::error!("[{}] reposition failed: {e}", filename.display());
                    break;
                }
            }
            time_sync_b = Instant::now();
            block_time_total_ms = 0.0;
            total_sync_diff_ms = 0.0;
            pause_total_ms = 0.0;
            continue;
        }

        let geometry = handle.geometry().unwrap_or(geometry);
        let stride = geometry.stride();
        let filled = reader.filled();

        let block_end = framing::seek_next_pcr(&reader.buffer()[..filled], cursor, geometry);

        let block_end = match block_end {
            Some(b) => b,
            None => {
                let consumed = cursor as u64;
                let new_skip = handle.skip.load(Ordering::Relaxed) + consumed;
                let read = reader.refill(new_skip);
                cursor = 0;

                if read < buffer_size {
                    if !handle.loop_playback {
                        producer.push_eof();
                        break 'outer;
                    }
                    handle.skip.store(0, Ordering::Relaxed);
                    handle.reposition.store(true, Ordering::Release);
                } else {
                    handle.skip.store(new_skip, Ordering::Relaxed);
                }
                continue;
            }
        };

        let new_pcr = {
            let payload = framing::payload_at(&reader.buffer()[block_end..block_end + stride], geometry);
            framing::extract_pcr(payload)
        };
        let block_size_packets = ((block_end - cursor) / stride) as u64;
        let delta_pcr = framing::pcr_delta(last_pcr, new_pcr);
        let block_time_ms = framing::pcr_delta_to_ms(delta_pcr);
        last_pcr = new_pcr;

        if !(0.0..=BLOCK_TIME_MAX_MS).contains(&block_time_ms) {
            log::error!(
                "{}",
                ReplayError::BadBlockTime {
                    block_time_ms,
                    block_size: block_size_packets
                }
            );
            cursor = block_end;
            time_sync_b = Instant::now();
            block_time_total_ms = 0.0;
            total_sync_diff_ms = 0.0;
            pause_total_ms = 0.0;
            continue;
        }

        block_time_total_ms += block_time_ms;

        let effective_ms = block_time_ms + total_sync_diff_ms;
        let per_packet_ns: u64 = if effective_ms > 0.0 {
            ((effective_ms * 1_000_000.0) / block_size_packets as f64) as u64
        } else {
            0
        };

        if geometry == PacketGeometry::M2ts192 {
            let payload = &reader.buffer()[block_end..block_end + stride];
            let ms = framing::m2ts_time_ms(payload);
            handle.current_position_ms.store(ms, Ordering::Relaxed);
        }

        let block_start_wall = Instant::now();
        let mut cumulative_target_ns: u64 = 0;
        let mut current_sleep_ns = per_packet_ns;
        let mut pause_block_ns: u64 = 0;
        let mut aborted_by_reposition = false;
        let mut aborted_by_time_travel = false;

        let mut packet_offset = cursor;
        while packet_offset < block_end {
            if handle.pause.load(Ordering::Acquire) {
                let pause_start = Instant::now();
                while handle.pause.load(Ordering::Acquire) && !handle.stop.load(Ordering::Acquire) {
                    thread::sleep(PAUSE_POLL);
                }
                let pause_stop = Instant::now();
                match pause_stop.checked_duration_since(pause_start) {
                    Some(d) => pause_block_ns += d.as_nanos() as u64,
                    None => handle.reposition.store(true, Ordering::Release),
                }
            }

            if handle.stop.load(Ordering::Acquire) {
                producer.push_eof();
                return;
            }

            if handle.reposition.load(Ordering::Acquire) {
                aborted_by_reposition = true;
                break;
            }

            let payload = framing::payload_at(&reader.buffer()[packet_offset..packet_offset + stride], geometry);
            producer.push(payload);
            packet_offset += stride;

            if current_sleep_ns > 0 {
                thread::sleep(Duration::from_nanos(current_sleep_ns));
            }

            cumulative_target_ns += per_packet_ns;
            match Instant::now().checked_duration_since(block_start_wall) {
                None => {
                    log::warn!("[{}] {}", filename.display(), ReplayError::TimeTravel);
                    aborted_by_time_travel = true;
                    break;
                }
                Some(elapsed) => {
                    let elapsed_ns = (elapsed.as_nanos() as u64).saturating_sub(pause_block_ns);
                    current_sleep_ns = if elapsed_ns > cumulative_target_ns {
                        0
                    } else {
                        per_packet_ns
                    };
                }
            }
        }

        pause_total_ms += pause_block_ns as f64 / 1_000_000.0;
        cursor = packet_offset;

        if aborted_by_reposition {
            continue;
        }
        if aborted_by_time_travel {
            time_sync_b = Instant::now();
            block_time_total_ms = 0.0;
            total_sync_diff_ms = 0.0;
            pause_total_ms = 0.0;
            continue;
        }
        cursor = block_end;

        match Instant::now().checked_duration_since(time_sync_b) {
            None => {
                log::warn!("[{}] {}", filename.display(), ReplayError::TimeTravel);
                total_sync_diff_ms = TIME_TRAVEL_SYNC_DIFF_MS;
            }
            Some(elapsed) => {
                let wall_elapsed_ms = elapsed.as_secs_f64() * 1000.0;
                total_sync_diff_ms = block_time_total_ms - wall_elapsed_ms - pause_total_ms;
            }
        }

        if total_sync_diff_ms.abs() > SYNC_DIFF_RESET_MS {
            log::warn!(
                "[{}] wrong syncing time: {total_sync_diff_ms:.2}ms, resetting accumulators",
                filename.display()
            );
            time_sync_b = Instant::now();
            block_time_total_ms = 0.0;
            total_sync_diff_ms = 0.0;
            pause_total_ms = 0.0;
        }
    }

    handle.skip.store(0, Ordering::Relaxed);
    log::info!("[{}] pacing loop exited", filename.display());
}
