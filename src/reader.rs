//! # Source Reader
//!
//! Owns a positioned, read-only file handle and a reusable input buffer.
//! Fills the buffer from a byte offset via positional reads (`pread`,
//! exposed on Unix as [`std::os::unix::fs::FileExt::read_at`]) so the
//! pacing loop never has to seek the underlying file descriptor. Grounded
//! on `open_file`/`pread` in the original file-input module, recast with
//! `std::fs` in place of raw `open`/`fstat`/`pread` syscalls.

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::error::{ReplayError, Result};
use crate::framing::{self, PacketGeometry};

/// Outcome of [`SourceReader::open`]: the detected geometry plus, for
/// M2TS, the total stream length derived from the trailing packet.
pub struct OpenInfo {
    /// Detected packet geometry.
    pub geometry: PacketGeometry,
    /// Byte offset of the first PCR-bearing packet found in the initial buffer.
    pub first_pcr_offset: usize,
    /// Total file size in bytes.
    pub file_size: u64,
    /// M2TS start timestamp, in ms (0 for TS188).
    pub start_time_ms: u32,
    /// M2TS total length, in ms (0 for TS188 or if the trailer read failed).
    pub length_ms: u32,
}

/// A positioned file handle and its reusable input buffer.
pub struct SourceReader {
    path: PathBuf,
    file: File,
    buffer: Vec<u8>,
    /// Number of valid bytes currently in `buffer` (a short read leaves this < buffer.len()).
    filled: usize,
}

impl SourceReader {
    /// Opens `path` read-only, sizes its input buffer to `buffer_size`
    /// bytes, and performs the initial classification read at `skip`.
    ///
    /// If `skip >= file_size`, it is reset to 0 and a warning is logged.
    /// Fails with [`ReplayError::OpenFailed`] if the file cannot be opened,
    /// [`ReplayError::BadFormat`] if classification fails, or
    /// [`ReplayError::NoPcr`] if no usable PCR exists in the initial
    /// buffer.
    pub fn open(path: impl AsRef<Path>, buffer_size: usize, skip: &mut u64) -> Result<(Self, OpenInfo)> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| ReplayError::OpenFailed {
            path: path.display().to_string(),
            source,
        })?;

        let file_size = file
            .metadata()
            .map_err(|source| ReplayError::OpenFailed {
                path: path.display().to_string(),
                source,
            })?
            .len();

        if *skip >= file_size {
            log::warn!(
                "[{}] skip value {} is greater than the file size {}",
                path.display(),
                skip,
                file_size
            );
            *skip = 0;
        }

        let mut buffer = vec![0u8; buffer_size];
        let read = file.read_at(&mut buffer, *skip).unwrap_or(0);
        if read < buffer.len() {
            log::warn!("[{}] file is too small", path.display());
        }
        let valid = &buffer[..read];

        let geometry = framing::classify(valid).ok_or_else(|| {
            log::error!("[{}] wrong file format", path.display());
            ReplayError::BadFormat(format!("{} bytes classified", valid.len()))
        })?;

        let first_pcr_offset = {
            let stride = geometry.stride();
            let payload_off = geometry.payload_offset();
            let mut found = None;
            let mut offset = 0usize;
            while offset + stride <= valid.len() {
                let packet = &valid[offset..offset + stride];
                if framing::has_pcr(&packet[payload_off..]) {
                    found = Some(offset);
                    break;
                }
                offset += stride;
            }
            found.ok_or_else(|| {
                log::error!("[{}] first PCR is not found", path.display());
                ReplayError::NoPcr
            })?
        };

        let mut start_time_ms = 0u32;
        let mut length_ms = 0u32;
        if geometry == PacketGeometry::M2ts192 {
            start_time_ms = framing::m2ts_time_ms(&valid[first_pcr_offset..]);

            let mut tail = [0u8; framing::M2TS_PACKET_SIZE];
            let tail_off = file_size.saturating_sub(framing::M2TS_PACKET_SIZE as u64);
            match file.read_at(&mut tail, tail_off) {
                Ok(n) if n == tail.len() && tail[4] == 0x47 => {
                    let stop_time_ms = framing::m2ts_time_ms(&tail[4..]);
                    length_ms = stop_time_ms.saturating_sub(start_time_ms);
                }
                _ => {
                    log::warn!("[{}] failed to get M2TS file length", path.display());
                }
            }
        }

        let reader = SourceReader {
            path,
            file,
            buffer,
            filled: read,
        };
        let info = OpenInfo {
            geometry,
            first_pcr_offset,
            file_size,
            start_time_ms,
            length_ms,
        };
        Ok((reader, info))
    }

    /// Re-fills the input buffer from `skip`. Returns the number of bytes
    /// read; a short read (fewer than `buffer.len()`) signals the file is
    /// exhausted.
    pub fn refill(&mut self, skip: u64) -> usize {
        let read = self.file.read_at(&mut self.buffer, skip).unwrap_or(0);
        self.filled = read;
        read
    }

    /// The full input buffer (only `[0, filled)` holds bytes from the most
    /// recent successful read/refill).
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Number of valid bytes from the most recent read/refill.
    pub fn filled(&self) -> usize {
        self.filled
    }

    /// Total size of the input buffer.
    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    /// Path this reader was opened against.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Closes the reader. Idempotent: dropping a `SourceReader` more than
    /// once is not possible in Rust, but calling `close` after an error is
    /// always safe since the underlying `File` closes on drop regardless.
    pub fn close(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::TS_PACKET_SIZE;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn ts188_packet(pcr: Option<u64>) -> [u8; TS_PACKET_SIZE] {
        let mut pkt = [0u8; TS_PACKET_SIZE];
        pkt[0] = 0x47;
        if let Some(pcr) = pcr {
            pkt[3] = 0x20;
            pkt[4] = 7;
            pkt[5] = 0x10;
            let base = pcr / 300;
            let ext = pcr % 300;
            pkt[6] = (base >> 25) as u8;
            pkt[7] = (base >> 17) as u8;
            pkt[8] = (base >> 9) as u8;
            pkt[9] = (base >> 1) as u8;
            pkt[10] = (((base & 1) as u8) << 7) | (((ext >> 8) & 1) as u8);
            pkt[11] = (ext & 0xff) as u8;
        }
        pkt
    }

    fn write_ts_file(packets: usize, pcr_every: usize) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        for i in 0..packets {
            let pcr = if i % pcr_every == 0 {
                Some((i as u64) * 27_000_000)
            } else {
                None
            };
            f.write_all(&ts188_packet(pcr)).unwrap();
        }
        f.flush().unwrap();
        f
    }

    #[test]
    fn open_detects_ts188_and_first_pcr() {
        let file = write_ts_file(10, 1);
        let mut skip = 0u64;
        let (_reader, info) =
            SourceReader::open(file.path(), 4 * TS_PACKET_SIZE, &mut skip).unwrap();
        assert_eq!(info.geometry, PacketGeometry::Ts188);
        assert_eq!(info.first_pcr_offset, 0);
    }

    #[test]
    fn open_fails_with_no_pcr() {
        let mut f = NamedTempFile::new().unwrap();
        for _ in 0..10 {
            f.write_all(&ts188_packet(None)).unwrap();
        }
        f.flush().unwrap();
        let mut skip = 0u64;
        let result = SourceReader::open(f.path(), 4 * TS_PACKET_SIZE, &mut skip);
        assert!(matches!(result, Err(ReplayError::NoPcr)));
    }

    #[test]
    fn open_resets_skip_past_eof() {
        let file = write_ts_file(10, 1);
        let mut skip = 1_000_000u64;
        let (_reader, _info) =
            SourceReader::open(file.path(), 4 * TS_PACKET_SIZE, &mut skip).unwrap();
        assert_eq!(skip, 0);
    }

    #[test]
    fn refill_reports_short_read_at_eof() {
        let file = write_ts_file(4, 1);
        let mut skip = 0u64;
        let (mut reader, _info) =
            SourceReader::open(file.path(), 4 * TS_PACKET_SIZE, &mut skip).unwrap();
        let n = reader.refill(4 * TS_PACKET_SIZE as u64);
        assert_eq!(n, 0);
    }
}
