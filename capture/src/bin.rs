//! Capture File Format
//!
//! A `.bin` capture file is an optional 32-byte header followed by raw IQ
//! bytes. The header holds four little-endian IEEE-754 f64 fields:
//! `fc_requested`, `fc_programmed`, `fs_requested`, `fs_programmed`. A NaN
//! field means "unknown"; a file whose first field reads as exactly zero has
//! no header at all. Samples are `(I, Q)` byte pairs in offset-binary,
//! mapped into [-1, 1) as `(u - 127.5) / 128.0`.

use crate::CaptureError;
use bytes::{Buf, BufMut, BytesMut};
use num_complex::Complex64;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::debug;

/// Header length in bytes when present
pub const HEADER_LEN: usize = 32;

/// Capture file header. Any field may be NaN ("unknown").
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinHeader {
    pub fc_requested: f64,
    pub fc_programmed: f64,
    pub fs_requested: f64,
    pub fs_programmed: f64,
}

impl BinHeader {
    /// Parse a header from the first bytes of a capture file. Returns `None`
    /// when the leading field is zero, which marks a headerless file.
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_LEN {
            return None;
        }
        let mut cursor = &buf[..HEADER_LEN];
        let fc_requested = cursor.get_f64_le();
        if fc_requested == 0.0 {
            return None;
        }
        Some(Self {
            fc_requested,
            fc_programmed: cursor.get_f64_le(),
            fs_requested: cursor.get_f64_le(),
            fs_programmed: cursor.get_f64_le(),
        })
    }

    /// Serialize the header
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = BytesMut::with_capacity(HEADER_LEN);
        buf.put_f64_le(self.fc_requested);
        buf.put_f64_le(self.fc_programmed);
        buf.put_f64_le(self.fs_requested);
        buf.put_f64_le(self.fs_programmed);
        let mut out = [0u8; HEADER_LEN];
        out.copy_from_slice(&buf);
        out
    }
}

/// Decode one IQ byte pair into a complex sample
#[inline]
pub fn decode_sample(i: u8, q: u8) -> Complex64 {
    Complex64::new(
        (i as f64 - 127.5) / 128.0,
        (q as f64 - 127.5) / 128.0,
    )
}

/// Encode one complex sample into an IQ byte pair, clamping to byte range
#[inline]
pub fn encode_sample(s: Complex64) -> (u8, u8) {
    let clamp = |x: f64| (x * 128.0 + 127.5).round().clamp(0.0, 255.0) as u8;
    (clamp(s.re), clamp(s.im))
}

/// Decode an IQ byte stream into complex samples
pub fn decode_samples(bytes: &[u8]) -> Result<Vec<Complex64>, CaptureError> {
    if bytes.len() % 2 != 0 {
        return Err(CaptureError::TruncatedSample);
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|p| decode_sample(p[0], p[1]))
        .collect())
}

/// Read a capture file: header (if any) plus either the first `limit`
/// complex samples or, when `limit` is `None`, the whole file.
pub fn read_bin(
    path: &Path,
    limit: Option<usize>,
) -> Result<(Option<BinHeader>, Vec<Complex64>), CaptureError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;

    let header = BinHeader::parse(&bytes);
    let body = if header.is_some() {
        &bytes[HEADER_LEN..]
    } else {
        &bytes[..]
    };
    debug!(
        "read {} bytes from {} (header: {})",
        bytes.len(),
        path.display(),
        header.is_some()
    );

    let mut samples = decode_samples(body)?;
    if let Some(n) = limit {
        if samples.len() < n {
            return Err(CaptureError::TooShort {
                got: samples.len(),
                need: n,
            });
        }
        samples.truncate(n);
    }
    Ok((header, samples))
}

/// Write a capture file with a fully populated header
pub fn write_bin(
    path: &Path,
    header: &BinHeader,
    samples: &[Complex64],
) -> Result<(), CaptureError> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(&header.to_bytes())?;
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let (i, q) = encode_sample(s);
        bytes.push(i);
        bytes.push(q);
    }
    writer.write_all(&bytes)?;
    writer.flush()?;
    debug!("wrote {} samples to {}", samples.len(), path.display());
    Ok(())
}
