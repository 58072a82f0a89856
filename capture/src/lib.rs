//! IQ Capture Interfaces Library
//!
//! This crate provides the capture collaborator consumed by the acquisition
//! core: recording and replaying `.bin` capture files and the seam a live
//! tuner driver plugs into.

pub mod bin;
pub mod source;

use thiserror::Error;

/// Capture errors
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("capture too short: got {got} complex samples, need {need}")]
    TooShort { got: usize, need: usize },

    #[error("truncated sample stream: trailing I byte without Q")]
    TruncatedSample,

    #[error("no capture source: live tuner support is not compiled in")]
    NoDevice,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
