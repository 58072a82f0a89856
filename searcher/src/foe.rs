//! PSS/SSS Fine Frequency-Offset Estimation
//!
//! The coarse search pins the frequency offset to within half the search
//! step. Comparing the phase of the channel estimate derived from each PSS
//! with the weighted correlation against its known SSS, accumulated over
//! every reachable pair in the buffer, refines the offset by more than an
//! order of magnitude.

use crate::constants::{FS_LTE, HALF_FRAME};
use crate::dsp::{extract_psss, sigpower, Dft128};
use crate::pss::twist_k_factor;
use crate::rom::ROM_TABLES;
use common::types::{Cell, CpType, DuplexMode, SyncInfo};
use common::utils::wrap;
use num_complex::Complex64;
use std::f64::consts::PI;
use tracing::debug;

/// Smooth a 62-subcarrier channel estimate by averaging +-6 neighbours
fn smooth_h(h_raw: &[Complex64]) -> Vec<Complex64> {
    let n = h_raw.len();
    (0..n)
        .map(|t| {
            let lo = t.saturating_sub(6);
            let hi = (t + 6).min(n - 1);
            let sum: Complex64 = h_raw[lo..=hi].iter().sum();
            sum / (hi - lo + 1) as f64
        })
        .collect()
}

/// Estimate the fine frequency offset for a synchronized cell
#[allow(clippy::too_many_arguments)]
pub fn pss_sss_foe(
    cell: &Cell,
    sync: &SyncInfo,
    capbuf: &[Complex64],
    fc_requested: f64,
    fc_programmed: f64,
    fs_programmed: f64,
    sampling_carrier_twist: bool,
    k_factor_in: f64,
    dft: &Dft128,
) -> f64 {
    let k_factor = twist_k_factor(
        sampling_carrier_twist,
        fc_requested,
        fc_programmed,
        cell.freq,
        k_factor_in,
    );
    let frac = 16.0 / FS_LTE * fs_programmed * k_factor;
    let tdd = sync.duplex_mode == DuplexMode::Tdd;

    // SSS-to-PSS spacing and the first SSS DFT position in the buffer
    let (pss_sss_dist, mut first_sss_dft_location) = match (sync.cp_type, tdd) {
        (CpType::Normal, false) => (
            ((128.0 + 9.0) * frac).round() as usize,
            sync.frame_start + (960.0 - 128.0 - 9.0 - 128.0) * frac,
        ),
        (CpType::Normal, true) => (
            ((3.0 * (128.0 + 9.0) + 1.0) * frac).round() as usize,
            sync.frame_start + (1920.0 - 128.0) * frac,
        ),
        (CpType::Extended, false) => (
            ((128.0 + 32.0) * frac).round() as usize,
            sync.frame_start + (960.0 - 128.0 - 32.0 - 128.0) * frac,
        ),
        (CpType::Extended, true) => (
            ((3.0 * (128.0 + 32.0) * frac)).round() as usize,
            sync.frame_start + (1920.0 - 128.0) * frac,
        ),
    };

    first_sss_dft_location = wrap(
        first_sss_dft_location,
        -0.5,
        2.0 * HALF_FRAME as f64 - 0.5,
    );
    let mut sn = if first_sss_dft_location - HALF_FRAME as f64 * k_factor > -0.5 {
        first_sss_dft_location -= HALF_FRAME as f64 * k_factor;
        10u8
    } else {
        0u8
    };

    let n_cap = capbuf.len();
    let limit = (n_cap - 127 - pss_sss_dist - 100) as f64;
    let mut sss_dft_loc_set = Vec::new();
    let mut loc = first_sss_dft_location;
    while loc <= limit {
        sss_dft_loc_set.push(loc);
        loc += HALF_FRAME as f64 * frac;
    }

    // Weighted accumulation over every SSS/PSS pair. With no residual
    // frequency offset the accumulator has zero phase.
    let mut m_acc = Complex64::default();
    for &loc in sss_dft_loc_set.iter() {
        let sss_dft_location = loc.round() as usize;
        let pss_dft_location = sss_dft_location + pss_sss_dist;

        let mut h_raw = extract_psss(
            &capbuf[pss_dft_location..pss_dft_location + 128],
            -cell.freq,
            k_factor,
            fs_programmed,
            dft,
        );
        for (h, p) in h_raw
            .iter_mut()
            .zip(ROM_TABLES.pss_fd[cell.n_id_2 as usize].iter())
        {
            *h *= p.conj();
        }
        let h_sm = smooth_h(&h_raw);
        let diff: Vec<Complex64> = h_sm
            .iter()
            .zip(h_raw.iter())
            .map(|(s, r)| s - r)
            .collect();
        let np = sigpower(&diff);

        // The frequency shift of each window starts at phase zero; re-align
        // the SSS window's phase reference with the PSS window's.
        let mut sss_raw = extract_psss(
            &capbuf[sss_dft_location..sss_dft_location + 128],
            -cell.freq,
            k_factor,
            fs_programmed,
            dft,
        );
        let align = Complex64::from_polar(
            1.0,
            PI * cell.freq / (FS_LTE / 16.0 / 2.0) * pss_sss_dist as f64,
        );
        let sss_fd = ROM_TABLES.sss_fd(sync.n_id_1, cell.n_id_2, sn);
        for (s, &known) in sss_raw.iter_mut().zip(sss_fd.iter()) {
            *s = *s * align * known as f64;
        }

        for t in 0..h_raw.len() {
            let h2 = h_sm[t].norm_sqr();
            let w = h2 / (2.0 * h2 * np + np * np);
            m_acc += sss_raw[t].conj() * h_raw[t] * w;
        }

        sn = 10 - sn;
    }

    let freq_fine = cell.freq
        + m_acc.arg() / (2.0 * PI) / (1.0 / (fs_programmed * k_factor) * pss_sss_dist as f64);
    debug!(
        "fine FOE: coarse {:.1} Hz -> fine {:.1} Hz over {} pairs",
        cell.freq,
        freq_fine,
        sss_dft_loc_set.len()
    );
    freq_fine
}
