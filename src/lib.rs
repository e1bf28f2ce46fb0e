#![doc(html_root_url = "https://docs.rs/tsreplay/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::missing_crate_level_docs)]

//! # tsreplay - PCR-paced MPEG-TS file replay
//!
//! `tsreplay` reads an MPEG Transport Stream (or Blu-ray M2TS) recording
//! from disk and emits it packet-by-packet at the pace dictated by its own
//! embedded PCR (Program Clock Reference) timestamps, as if it were a live
//! broadcast feed. A dedicated thread paces emission against wall-clock
//! time using the inter-PCR deltas found in the stream itself; a bounded
//! handoff queue delivers paced packets to a consumer thread (a network
//! sender, a second muxer, a test harness) without blocking the producer
//! on a slow consumer.
//!
//! ## Quick Start
//!
//! Add this to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! tsreplay = "0.1.0"
//! ```
//!
//! ### Replaying a file
//!
//! ```rust,no_run
//! use tsreplay::{Engine, EngineConfig};
//! use tsreplay::queue::PopOutcome;
//!
//! # fn main() -> tsreplay::Result<()> {
//! let config = EngineConfig::new("recording.ts").with_loop(true);
//! let (mut engine, mut consumer) = Engine::start(config)?;
//!
//! loop {
//!     match consumer.pop()? {
//!         PopOutcome::Payload(packet) => {
//!             // forward `packet` (188 bytes) downstream
//!             let _ = packet;
//!         }
//!         PopOutcome::Eof => break,
//!     }
//! }
//!
//! engine.stop();
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - [`framing`]: pure functions for packet-geometry classification and PCR
//!   extraction
//! - [`reader`]: positioned file reads and initial classification
//! - [`queue`]: the bounded, pollable handoff queue between the pacing
//!   thread and a consumer
//! - [`engine`]: the pacing loop and control surface
//! - [`error`]: the engine's error taxonomy
//! - [`config`]: engine configuration

/// Engine configuration.
pub mod config;

/// Pacing loop and control surface.
pub mod engine;

/// Error types and utilities.
pub mod error;

/// Packet-geometry classification and PCR extraction.
pub mod framing;

/// Synchronized handoff queue between the pacing thread and a consumer.
pub mod queue;

/// Positioned source file reads and initial classification.
pub mod reader;

pub use config::EngineConfig;
pub use engine::{Engine, ProbeInfo};
pub use error::{ReplayError, Result};
pub use framing::PacketGeometry;
