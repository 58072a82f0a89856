//! LTE Downlink Blind Cell Acquisition
//!
//! This crate implements the acquisition pipeline: given ~80 ms of complex
//! baseband at FS_LTE/16, detect every cell on the carrier and recover its
//! identity, timing, frame structure and MIB. The stages are deliberately
//! separable — PSS coarse search, SSS maximum likelihood, PSS/SSS fine
//! frequency estimation, grid extraction with super-fine corrections,
//! per-port channel estimation and the blind PBCH decode — and
//! [`search_cells`] chains them for one capture buffer.

pub mod chan_est;
pub mod constants;
pub mod conv;
pub mod crc;
pub mod dsp;
pub mod foe;
pub mod grid;
pub mod pbch;
pub mod pn;
pub mod ppm;
pub mod pss;
pub mod rom;
pub mod rs_dl;
pub mod sss;
pub mod tfg;

use crate::constants::CAPLENGTH;
use crate::dsp::Dft128;
use crate::grid::Arr2;
use crate::rs_dl::RsDl;
use common::types::Cell;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Acquisition errors
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("capture too short: got {got} complex samples, need {need}")]
    CaptureTooShort { got: usize, need: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Default frequency search set: -100 kHz to +100 kHz in 5 kHz steps
pub fn default_f_search_set() -> Vec<f64> {
    (-20..=20).map(|k| k as f64 * 5e3).collect()
}

fn default_ds_comb_arm() -> usize {
    2
}

fn default_n_sigma() -> f64 {
    9.0
}

fn default_twist() -> bool {
    true
}

fn default_k_factor() -> f64 {
    1.0
}

/// Acquisition parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearcherConfig {
    /// Coarse frequency-offset hypotheses, Hz
    #[serde(default = "default_f_search_set")]
    pub f_search_set: Vec<f64>,
    /// Delay-spread combining arm, samples
    #[serde(default = "default_ds_comb_arm")]
    pub ds_comb_arm: usize,
    /// PSS detection threshold, sigmas above the noise mean
    #[serde(default = "default_n_sigma")]
    pub thresh1_n_sigma: f64,
    /// SSS maximum-likelihood gate, sigmas above the likelihood mean
    #[serde(default = "default_n_sigma")]
    pub thresh2_n_sigma: f64,
    /// Whether the sampling clock and LO share one crystal
    #[serde(default = "default_twist")]
    pub sampling_carrier_twist: bool,
    /// Initial clock-error ratio, used when twist is disabled
    #[serde(default = "default_k_factor")]
    pub k_factor: f64,
}

impl Default for SearcherConfig {
    fn default() -> Self {
        Self {
            f_search_set: default_f_search_set(),
            ds_comb_arm: default_ds_comb_arm(),
            thresh1_n_sigma: default_n_sigma(),
            thresh2_n_sigma: default_n_sigma(),
            sampling_carrier_twist: default_twist(),
            k_factor: default_k_factor(),
        }
    }
}

/// Read-only per-stage outputs kept for inspection
pub struct SearchDiagnostics {
    pub sp_incoherent: Vec<f64>,
    pub xc_incoherent_collapsed_pow: Arr2<f64>,
    pub xc_incoherent_collapsed_frq: Arr2<usize>,
    pub n_comb_xc: usize,
    pub n_comb_sp: usize,
    /// Sampling-clock error from the pre-search; NaN when it did not run
    /// or did not lock
    pub ppm: f64,
}

/// Result of one acquisition run
pub struct SearchOutput {
    /// Detected cells in decreasing order of raw PSS peak power
    pub cells: Vec<Cell>,
    pub diagnostics: SearchDiagnostics,
}

/// Run the full acquisition pipeline over one capture buffer.
///
/// The buffer is never mutated; the returned cells carry everything each
/// stage managed to recover. A cell whose SSS gate failed under both duplex
/// hypotheses is dropped; a cell whose blind MIB decode failed is returned
/// without MIB fields.
pub fn search_cells(
    capbuf: &[Complex64],
    fc_requested: f64,
    fc_programmed: f64,
    fs_programmed: f64,
    config: &SearcherConfig,
) -> Result<SearchOutput, SearchError> {
    if capbuf.len() < CAPLENGTH {
        return Err(SearchError::CaptureTooShort {
            got: capbuf.len(),
            need: CAPLENGTH,
        });
    }
    if config.f_search_set.is_empty() {
        return Err(SearchError::InvalidConfig(
            "empty frequency search set".into(),
        ));
    }

    let mut f_search_set = config.f_search_set.clone();
    let mut k_factor = config.k_factor;
    let mut ppm = f64::NAN;
    if !config.sampling_carrier_twist {
        // Clock independent of the LO: estimate the sampling error first
        // and shrink the frequency grid when the pre-search locks.
        let fo_set = ppm::pss_fo_set_gen(&f_search_set);
        ppm = ppm::sampling_ppm_f_search_set_by_pss(capbuf, &fo_set, &mut f_search_set);
        if ppm.is_finite() {
            k_factor = 1.0 + ppm * 1e-6;
            debug!("pre-search locked: ppm {:.3}, k_factor {:.9}", ppm, k_factor);
        } else {
            debug!("pre-search did not lock; sweeping the full grid");
        }
    }

    let xc = pss::xc_correlate(
        capbuf,
        &f_search_set,
        fc_requested,
        fc_programmed,
        fs_programmed,
        config.sampling_carrier_twist,
        k_factor,
    );
    let (xc_incoherent_single, n_comb_xc) = pss::xc_combine(
        &xc,
        &f_search_set,
        fc_requested,
        fc_programmed,
        fs_programmed,
        config.sampling_carrier_twist,
        k_factor,
    );
    let xc_incoherent = pss::xc_delay_spread(&xc_incoherent_single, config.ds_comb_arm);
    let (_sp, sp_incoherent, n_comb_sp) = pss::sp_est(capbuf);
    let (collapsed_pow, collapsed_frq) = pss::xc_peak_freq(&xc_incoherent);
    let z_th1 = pss::detection_threshold(
        &sp_incoherent,
        n_comb_xc,
        config.ds_comb_arm,
        config.thresh1_n_sigma,
    );
    let candidates = pss::peak_search(
        &collapsed_pow,
        &collapsed_frq,
        &z_th1,
        &f_search_set,
        fc_requested,
        fc_programmed,
        &xc_incoherent_single,
        config.ds_comb_arm,
    );
    debug!("{} PSS candidates above threshold", candidates.len());

    let dft = Dft128::new();
    let mut cells = Vec::new();
    for mut cell in candidates {
        // FDD first, then the TDD hypothesis with its own offsets
        let mut sync = None;
        for tdd in [false, true] {
            sync = sss::sss_detect(
                &cell,
                capbuf,
                config.thresh2_n_sigma,
                fc_requested,
                fc_programmed,
                fs_programmed,
                config.sampling_carrier_twist,
                k_factor,
                tdd,
                &dft,
            );
            if sync.is_some() {
                break;
            }
        }
        let Some(sync) = sync else {
            debug!(
                "candidate n_id_2 {} ind {} failed the SSS gate",
                cell.n_id_2, cell.ind
            );
            continue;
        };

        let freq_fine = foe::pss_sss_foe(
            &cell,
            &sync,
            capbuf,
            fc_requested,
            fc_programmed,
            fs_programmed,
            config.sampling_carrier_twist,
            k_factor,
            &dft,
        );
        cell.freq_fine = Some(freq_fine);
        cell.sync = Some(sync);

        let tfg_k_factor = pss::twist_k_factor(
            config.sampling_carrier_twist,
            fc_requested,
            fc_programmed,
            freq_fine,
            k_factor,
        );
        let tfg = tfg::extract_tfg(
            &sync,
            freq_fine,
            capbuf,
            fs_programmed,
            tfg_k_factor,
            &dft,
        );

        let n_id_cell = 3 * sync.n_id_1 + cell.n_id_2 as u16;
        let rs_dl = RsDl::new(n_id_cell, sync.cp_type);
        let corrected = tfg::tfoec(
            &sync,
            &tfg,
            &rs_dl,
            fc_requested,
            fc_programmed,
            config.sampling_carrier_twist,
        );
        cell.freq_superfine = Some(freq_fine + corrected.residual_f);

        cell.mib = pbch::decode_mib(&sync, n_id_cell, &corrected.grid, &rs_dl);
        match &cell.mib {
            Some(mib) => info!(
                "cell {}: {:?} {:?} ports {} n_rb_dl {} sfn {} f_off {:.0} Hz",
                n_id_cell,
                sync.duplex_mode,
                sync.cp_type,
                mib.n_ports,
                mib.bandwidth.n_rb_dl(),
                mib.sfn,
                cell.frequency_offset()
            ),
            None => warn!(
                "cell {}: identity and timing recovered but no MIB hypothesis passed CRC",
                n_id_cell
            ),
        }
        cells.push(cell);
    }

    Ok(SearchOutput {
        cells,
        diagnostics: SearchDiagnostics {
            sp_incoherent,
            xc_incoherent_collapsed_pow: collapsed_pow,
            xc_incoherent_collapsed_frq: collapsed_frq,
            n_comb_xc,
            n_comb_sp,
            ppm,
        },
    })
}
