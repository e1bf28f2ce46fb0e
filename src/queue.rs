//! # Synchronized Handoff Queue
//!
//! A bounded, lock-free-on-the-hot-path ring of 188-byte payloads paired
//! with a pollable notification stream. The ring itself is
//! [`ringbuf::HeapRb`] (already a dependency of the sibling `slain-core`
//! crate in this codebase's pack, used there the same way — split into a
//! producer half and a consumer half, `try_push`/`try_pop` on the hot
//! path). The notification stream is a Unix domain socket pair, standing
//! in for the original's `socketpair(AF_LOCAL, SOCK_STREAM, 0, ...)`: one
//! byte per event, `0x00` for "payload enqueued" and `0xFF` for
//! "end of stream", selectable via [`std::os::unix::io::AsRawFd`] so a
//! consumer's own event loop can integrate it.

use std::io::{Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::config::EofCallback;
use crate::error::{ReplayError, Result};
use crate::framing::TS_PACKET_SIZE;

const NOTIFY_PAYLOAD: u8 = 0x00;
const NOTIFY_EOF: u8 = 0xFF;

/// One handoff-queue slot: exactly one TS188 payload.
pub type Slot = [u8; TS_PACKET_SIZE];

/// Outcome of [`QueueConsumer::pop`].
#[derive(Debug)]
pub enum PopOutcome {
    /// A payload was popped from the ring.
    Payload(Slot),
    /// The producer posted the terminal end-of-stream sentinel.
    Eof,
}

/// The producer (write) half of the handoff queue. Owned exclusively by
/// the pacing loop thread.
pub struct QueueProducer {
    ring: HeapProd<Slot>,
    notify: UnixStream,
    overflow: u64,
}

/// The consumer (read) half of the handoff queue. Owned exclusively by
/// the downstream consumer thread/event loop.
pub struct QueueConsumer {
    ring: HeapCons<Slot>,
    notify: UnixStream,
    eof_callback: Option<EofCallback>,
}

/// Creates a handoff queue with the given capacity (in packets) and splits
/// it into its producer and consumer halves.
pub fn channel(capacity_packets: usize, eof_callback: Option<EofCallback>) -> Result<(QueueProducer, QueueConsumer)> {
    let ring = HeapRb::<Slot>::new(capacity_packets.max(1));
    let (prod, cons) = ring.split();
    let (notify_tx, notify_rx) = UnixStream::pair()?;

    Ok((
        QueueProducer {
            ring: prod,
            notify: notify_tx,
            overflow: 0,
        },
        QueueConsumer {
            ring: cons,
            notify: notify_rx,
            eof_callback,
        },
    ))
}

impl QueueProducer {
    /// Pushes one 188-byte payload.
    ///
    /// If the ring is at capacity, the payload is dropped (drop-newest)
    /// and an internal overflow counter is incremented; no copy happens
    /// and no notification is sent. The next successful push logs one
    /// aggregated "dropped N packets" message and resets the counter, per
    /// [`ReplayError::RingOverflow`].
    pub fn push(&mut self, payload: &[u8]) {
        debug_assert_eq!(payload.len(), TS_PACKET_SIZE);
        let mut slot: Slot = [0u8; TS_PACKET_SIZE];
        slot.copy_from_slice(payload);

        match self.ring.try_push(slot) {
            Ok(()) => {
                if self.overflow > 0 {
                    log::error!(
                        "{}",
                        ReplayError::RingOverflow {
                            dropped: self.overflow
                        }
                    );
                    self.overflow = 0;
                }
                self.notify_send(NOTIFY_PAYLOAD);
            }
            Err(_slot) => {
                self.overflow += 1;
            }
        }
    }

    /// Posts the terminal end-of-stream sentinel. Always attempted, even
    /// if the ring is full, since it carries no payload bytes.
    pub fn push_eof(&mut self) {
        self.notify_send(NOTIFY_EOF);
    }

    /// Number of payloads dropped since the last successfully-flushed
    /// overflow message (producer-only bookkeeping, not shared with the
    /// consumer).
    pub fn overflow_count(&self) -> u64 {
        self.overflow
    }

    fn notify_send(&mut self, byte: u8) {
        match self.notify.write(&[byte]) {
            Ok(1) => {}
            Ok(n) => {
                log::error!(
                    "{}",
                    ReplayError::NotifyFailed(format!("wrote {n} of 1 byte(s)"))
                );
            }
            Err(e) => {
                log::error!("{}", ReplayError::NotifyFailed(e.to_string()));
            }
        }
    }
}

impl QueueConsumer {
    /// Blocks reading one notification byte. Returns [`PopOutcome::Eof`]
    /// (invoking the registered EOF callback, if any) on `0xFF`, or the
    /// next payload from the ring on `0x00`.
    pub fn pop(&mut self) -> Result<PopOutcome> {
        let mut cmd = [0u8; 1];
        self.notify.read_exact(&mut cmd).map_err(|e| {
            ReplayError::NotifyFailed(format!("failed to read notification: {e}"))
        })?;

        if cmd[0] == NOTIFY_EOF {
            if let Some(cb) = &self.eof_callback {
                cb();
            }
            return Ok(PopOutcome::Eof);
        }

        match self.ring.try_pop() {
            Some(slot) => Ok(PopOutcome::Payload(slot)),
            None => Err(ReplayError::NotifyFailed(
                "received payload notification but ring was empty".into(),
            )),
        }
    }

    /// Number of payloads currently buffered in the ring.
    pub fn len(&self) -> usize {
        self.ring.occupied_len()
    }

    /// True if the ring currently holds no payloads.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

impl AsRawFd for QueueConsumer {
    /// Exposes the notification stream's read end so a consumer's own
    /// event loop can poll it, matching `asc_event_init(mod->sync.fd[1], ...)`
    /// in the original.
    fn as_raw_fd(&self) -> RawFd {
        self.notify.as_raw_fd()
    }
}
