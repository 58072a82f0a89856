//! Capture Acquisition Entry Point
//!
//! `capture()` is the blocking request the acquisition core makes: give me a
//! buffer of complex samples tagged with the requested and programmed center
//! frequencies. Replay from `.bin` files is implemented here; a live tuner
//! implements the [`CaptureSource`] trait and is injected by the caller.

use crate::bin::{read_bin, write_bin, BinHeader};
use crate::CaptureError;
use common::{CAPLENGTH, FS_LTE};
use num_complex::Complex64;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// A filled capture buffer with its tuning context
#[derive(Debug, Clone)]
pub struct Capture {
    pub samples: Vec<Complex64>,
    pub fc_requested: f64,
    pub fc_programmed: f64,
    pub fs_programmed: f64,
}

/// Seam for a live tuner front-end. The acquisition core only ever sees the
/// returned [`Capture`]; blocking behaviour is the implementor's business.
pub trait CaptureSource {
    /// Tune to `fc_requested` (Hz) and deliver at least `n` complex samples
    fn capture(&mut self, fc_requested: f64, n: usize) -> Result<Capture, CaptureError>;
}

/// Capture request parameters
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Center frequency to request from the tuner, Hz
    pub fc_requested: f64,
    /// Crystal correction in ppm, applied when no recorded header overrides it
    pub correction: f64,
    /// Record the delivered buffer to this path
    pub record_path: Option<PathBuf>,
    /// Replay from this path instead of touching hardware
    pub load_path: Option<PathBuf>,
    /// When replaying, return the entire file instead of CAPLENGTH samples
    pub read_all: bool,
}

impl CaptureConfig {
    pub fn replay(load_path: PathBuf) -> Self {
        Self {
            fc_requested: f64::NAN,
            correction: 0.0,
            record_path: None,
            load_path: Some(load_path),
            read_all: false,
        }
    }
}

/// Acquire one capture buffer.
///
/// When replaying, the file header (if present and populated) determines the
/// tuning context; otherwise `fc_programmed` falls back to
/// `fc_requested * (1 + correction * 1e-6)`. A live source, when given, is
/// used whenever no replay path is set.
pub fn capture(
    config: &CaptureConfig,
    live: Option<&mut dyn CaptureSource>,
) -> Result<Capture, CaptureError> {
    let mut cap = match &config.load_path {
        Some(path) => {
            let limit = if config.read_all { None } else { Some(CAPLENGTH) };
            let (header, samples) = read_bin(path, limit)?;

            let mut fc_requested = config.fc_requested;
            let mut fc_programmed = f64::NAN;
            let mut fs_programmed = FS_LTE / 16.0;
            if let Some(h) = header {
                if h.fc_requested.is_finite() {
                    fc_requested = h.fc_requested;
                }
                if h.fc_programmed.is_finite() {
                    fc_programmed = h.fc_programmed;
                }
                if h.fs_programmed.is_finite() {
                    fs_programmed = h.fs_programmed;
                }
            } else {
                debug!("no header in {}; relying on request parameters", path.display());
            }
            if !fc_requested.is_finite() {
                return Err(CaptureError::InvalidConfig(
                    "replay file has no header and no fc_requested was given".into(),
                ));
            }
            if !fc_programmed.is_finite() {
                fc_programmed = fc_requested * (1.0 + config.correction * 1e-6);
            }
            info!(
                "replayed {} samples, fc_requested {:.3} MHz, fc_programmed {:.3} MHz",
                samples.len(),
                fc_requested / 1e6,
                fc_programmed / 1e6
            );
            Capture {
                samples,
                fc_requested,
                fc_programmed,
                fs_programmed,
            }
        }
        None => {
            let source = live.ok_or(CaptureError::NoDevice)?;
            source.capture(config.fc_requested, CAPLENGTH)?
        }
    };

    if !config.read_all && cap.samples.len() < CAPLENGTH {
        return Err(CaptureError::TooShort {
            got: cap.samples.len(),
            need: CAPLENGTH,
        });
    }
    if !config.read_all {
        cap.samples.truncate(CAPLENGTH);
    }

    if let Some(path) = &config.record_path {
        let header = BinHeader {
            fc_requested: cap.fc_requested,
            fc_programmed: cap.fc_programmed,
            fs_requested: FS_LTE / 16.0,
            fs_programmed: cap.fs_programmed,
        };
        if let Err(e) = write_bin(path, &header, &cap.samples) {
            warn!("failed to record capture to {}: {}", path.display(), e);
        }
    }

    Ok(cap)
}
