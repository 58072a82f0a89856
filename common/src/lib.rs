//! Shared Types for the LTE Cell Scanner
//!
//! Defines the cell record produced by the acquisition pipeline and the
//! numeric helpers used throughout the workspace.

pub mod types;
pub mod utils;

/// LTE reference sample rate, Hz. All capture-rate math in the workspace is
/// expressed relative to FS_LTE/16 = 1.92 Msps.
pub const FS_LTE: f64 = 30.72e6;

/// Number of complex samples one acquisition consumes (~80 ms at FS_LTE/16)
pub const CAPLENGTH: usize = 153_600;
