//! Frame Geometry Constants
//!
//! Everything here is expressed at the FS_LTE/16 = 1.92 Msps capture rate,
//! where one slot is 960 samples, one frame is 19,200 and the PSS repeats
//! every half frame.

pub use common::{CAPLENGTH, FS_LTE};

/// PSS time-domain template length: 128-sample body plus a 9-sample prefix
pub const PSS_TD_LEN: usize = 137;

/// DFT size covering the six center resource blocks at the capture rate
pub const N_FFT: usize = 128;

/// Occupied PSS/SSS subcarriers (DC excluded)
pub const N_SC_SYNC: usize = 62;

/// Subcarriers kept in the time/frequency grid (six RBs, DC excluded)
pub const N_SC_TFG: usize = 72;

/// Samples per half frame; PSS correlation peaks alias onto this interval
pub const HALF_FRAME: usize = 9600;

/// Samples per frame
pub const FRAME_LEN: usize = 19_200;

/// Width of the sliding window used by the received-power estimator: two
/// OFDM symbols at the capture rate
pub const SP_WINDOW: usize = 274;

/// Number of PSS roots / `n_id_2` values
pub const N_PSS: usize = 3;

/// Number of `n_id_1` cell identity groups
pub const N_ID_1_MAX: usize = 168;

/// PBCH convolutional payload: 24 MIB bits plus 16 CRC bits
pub const PBCH_K: usize = 40;
