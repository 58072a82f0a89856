//! Cell Record and Frame-Structure Types
//!
//! The `Cell` record is built up in stages: the PSS search fills in identity
//! and coarse timing, the SSS stage adds the sync parameters, the fine and
//! super-fine frequency estimators add their offsets, and the blind MIB
//! decode adds the broadcast configuration. Fields a stage did not reach are
//! absent.

use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

/// Cyclic prefix type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpType {
    Normal,
    Extended,
}

impl CpType {
    /// Downlink OFDM symbols per slot
    pub fn n_symb_dl(&self) -> usize {
        match self {
            CpType::Normal => 7,
            CpType::Extended => 6,
        }
    }

    /// Cyclic prefix length in samples at the 1.92 Msps rate.
    /// Normal CP slots start with one long prefix followed by six short ones.
    pub fn cp_len(&self, sym_num: usize) -> usize {
        match self {
            CpType::Normal => {
                if sym_num == 0 {
                    10
                } else {
                    9
                }
            }
            CpType::Extended => 32,
        }
    }
}

/// Duplex mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DuplexMode {
    /// Frequency Division Duplex
    Fdd,
    /// Time Division Duplex
    Tdd,
}

/// Downlink bandwidth as signalled by the 3-bit MIB field
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum DlBandwidth {
    Rb6 = 0,
    Rb15 = 1,
    Rb25 = 2,
    Rb50 = 3,
    Rb75 = 4,
    Rb100 = 5,
}

impl DlBandwidth {
    /// Number of downlink resource blocks
    pub fn n_rb_dl(&self) -> u16 {
        match self {
            DlBandwidth::Rb6 => 6,
            DlBandwidth::Rb15 => 15,
            DlBandwidth::Rb25 => 25,
            DlBandwidth::Rb50 => 50,
            DlBandwidth::Rb75 => 75,
            DlBandwidth::Rb100 => 100,
        }
    }
}

/// PHICH duration (1-bit MIB field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhichDuration {
    Normal,
    Extended,
}

/// PHICH resource (2-bit MIB field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive, Serialize, Deserialize)]
pub enum PhichResource {
    OneSixth = 0,
    Half = 1,
    One = 2,
    Two = 3,
}

impl PhichResource {
    /// The Ng ratio carried by this field
    pub fn ratio(&self) -> f64 {
        match self {
            PhichResource::OneSixth => 1.0 / 6.0,
            PhichResource::Half => 0.5,
            PhichResource::One => 1.0,
            PhichResource::Two => 2.0,
        }
    }
}

/// Synchronization parameters recovered by the SSS maximum-likelihood stage.
/// Present only when the winning likelihood passed the sigma gate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SyncInfo {
    /// Cell identity group, 0..=167
    pub n_id_1: u16,
    pub cp_type: CpType,
    pub duplex_mode: DuplexMode,
    /// Start of the frame CP, fractional capture-buffer sample index
    pub frame_start: f64,
}

/// Master Information Block contents recovered by the blind PBCH decode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mib {
    /// Number of cell-specific reference signal ports, one of 1, 2, 4
    pub n_ports: u8,
    pub bandwidth: DlBandwidth,
    pub phich_duration: PhichDuration,
    pub phich_resource: PhichResource,
    /// System frame number of the frame at `frame_start`, 0..=1023
    pub sfn: u16,
}

/// One detected (or candidate) downlink cell.
///
/// `fc_requested`/`fc_programmed` come from the capture; the PSS peak search
/// fills `n_id_2`, `ind`, `freq` and `pss_pow`; everything later is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    /// Center frequency requested from the tuner, Hz
    pub fc_requested: f64,
    /// Center frequency the tuner actually programmed, Hz
    pub fc_programmed: f64,
    /// PSS sequence index, 0..=2
    pub n_id_2: u8,
    /// PSS peak sample index modulo 9600
    pub ind: usize,
    /// Coarse frequency offset from the search set, Hz
    pub freq: f64,
    /// Raw peak correlation power
    pub pss_pow: f64,
    /// Fine frequency offset from the PSS/SSS comparison, Hz
    pub freq_fine: Option<f64>,
    /// Super-fine frequency offset from the reference-signal FOE, Hz
    pub freq_superfine: Option<f64>,
    pub sync: Option<SyncInfo>,
    pub mib: Option<Mib>,
}

impl Cell {
    /// Create a candidate cell as emitted by the PSS peak search
    pub fn new(
        fc_requested: f64,
        fc_programmed: f64,
        n_id_2: u8,
        ind: usize,
        freq: f64,
        pss_pow: f64,
    ) -> Self {
        Self {
            fc_requested,
            fc_programmed,
            n_id_2,
            ind,
            freq,
            pss_pow,
            freq_fine: None,
            freq_superfine: None,
            sync: None,
            mib: None,
        }
    }

    /// Physical cell identity, available once the SSS stage has run
    pub fn n_id_cell(&self) -> Option<u16> {
        self.sync
            .as_ref()
            .map(|s| 3 * s.n_id_1 + self.n_id_2 as u16)
    }

    /// Best frequency-offset estimate available so far, Hz
    pub fn frequency_offset(&self) -> f64 {
        self.freq_superfine.or(self.freq_fine).unwrap_or(self.freq)
    }

    /// True downlink center frequency implied by the current offset estimate
    pub fn fc_true(&self) -> f64 {
        self.fc_requested - self.frequency_offset()
    }

    /// Clock-error ratio implied by the current offset estimate
    pub fn k_factor(&self) -> f64 {
        (self.fc_requested - self.frequency_offset()) / self.fc_programmed
    }
}
