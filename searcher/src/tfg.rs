//! Time/Frequency Grid Extraction and Super-Fine Offset Correction
//!
//! Shifts the capture buffer by the fine frequency estimate, slices it into
//! OFDM symbols at the fractional symbol stride, and produces the
//! 72-subcarrier grid the channel estimator and PBCH decoder work on. A
//! second, reference-signal-driven estimation pass then removes the
//! residual frequency and timing offsets.

use crate::constants::{FS_LTE, N_FFT, N_SC_TFG};
use crate::dsp::{fshift, Dft128};
use crate::grid::Arr2;
use crate::rs_dl::RsDl;
use common::types::{CpType, SyncInfo};
use num_complex::Complex64;
use std::f64::consts::PI;
use tracing::debug;

/// Subcarrier index vector [-36..-1, 1..36]
fn cn_vector() -> Vec<f64> {
    (-36..=36)
        .filter(|&c| c != 0)
        .map(|c| c as f64)
        .collect()
}

/// Rotate one grid row by a per-subcarrier phase ramp: a DFT taken `late`
/// samples after where it should have been is walked back in frequency.
fn compensate_late(row: &mut [Complex64], late: f64, cn: &[f64]) {
    for (v, &c) in row.iter_mut().zip(cn.iter()) {
        *v *= Complex64::from_polar(1.0, -2.0 * PI * late / N_FFT as f64 * c);
    }
}

/// Extracted grid with the fractional time each DFT should have occupied
pub struct Tfg {
    pub grid: Arr2<Complex64>,
    pub timestamps: Vec<f64>,
    pub k_factor: f64,
}

/// Extract six frames plus two slots of OFDM symbols starting at the frame
/// boundary.
pub fn extract_tfg(
    sync: &SyncInfo,
    freq_fine: f64,
    capbuf: &[Complex64],
    fs_programmed: f64,
    k_factor: f64,
    dft: &Dft128,
) -> Tfg {
    let n_symb_dl = sync.cp_type.n_symb_dl();
    let frac = 16.0 / FS_LTE * fs_programmed * k_factor;

    let mut dft_location = sync.frame_start
        + match sync.cp_type {
            CpType::Normal => 10.0 * frac,
            CpType::Extended => 32.0 * frac,
        };
    // Start one frame earlier when the buffer allows it
    let frame_samples = 0.01 * fs_programmed * k_factor;
    if dft_location - frame_samples > -0.5 {
        dft_location -= frame_samples;
    }

    let capbuf_foc = fshift(capbuf, -freq_fine, fs_programmed * k_factor);

    let n_ofdm = 6 * 10 * 2 * n_symb_dl + 2 * n_symb_dl;
    let mut grid: Arr2<Complex64> = Arr2::new(n_ofdm, N_SC_TFG);
    let mut timestamps = Vec::with_capacity(n_ofdm);
    let mut sym_num = 0usize;
    for t in 0..n_ofdm {
        let start = dft_location.round() as usize;
        debug_assert!(start + N_FFT <= capbuf_foc.len());
        let spectrum = dft.run(&capbuf_foc[start..start + N_FFT]);
        let row = grid.row_mut(t);
        row[..36].copy_from_slice(&spectrum[N_FFT - 36..]);
        row[36..].copy_from_slice(&spectrum[1..37]);
        timestamps.push(dft_location);

        dft_location += match sync.cp_type {
            CpType::Extended => (128.0 + 32.0) * frac,
            CpType::Normal => {
                let step = if sym_num == 6 { 128.0 + 10.0 } else { 128.0 + 9.0 };
                sym_num = (sym_num + 1) % 7;
                step * frac
            }
        };
    }

    // The DFT was taken at the nearest sample boundary; shift each row to
    // where it should have been.
    let cn = cn_vector();
    for t in 0..n_ofdm {
        let late = timestamps[t].round() - timestamps[t];
        compensate_late(grid.row_mut(t), late, &cn);
    }

    Tfg {
        grid,
        timestamps,
        k_factor,
    }
}

/// Result of the super-fine pass
pub struct TfoecOutput {
    pub grid: Arr2<Complex64>,
    pub timestamps: Vec<f64>,
    /// Residual frequency offset measured from the reference symbols, Hz
    pub residual_f: f64,
}

/// Measure and correct the residual frequency offset using the port-0
/// reference symbols, then measure and correct the residual timing offset.
///
/// FOE compares each reference symbol with the same subcarrier one slot
/// later; TOE compares subcarrier k with subcarrier k+3 of the next
/// reference-bearing symbol, which is why FOE must run first.
#[allow(clippy::too_many_arguments)]
pub fn tfoec(
    sync: &SyncInfo,
    tfg: &Tfg,
    rs_dl: &RsDl,
    fc_requested: f64,
    fc_programmed: f64,
    sampling_carrier_twist: bool,
) -> TfoecOutput {
    let n_symb_dl = sync.cp_type.n_symb_dl();
    let n_ofdm = tfg.grid.rows();
    let n_slot = n_ofdm / n_symb_dl;

    // Super-fine FOE over both port-0 RS symbols of every slot
    let mut foe = Complex64::default();
    for sym_num in [0, n_symb_dl - 3] {
        let mut rs_extracted: Arr2<Complex64> = Arr2::new(n_slot, 12);
        for t in 0..n_slot {
            let shift = rs_dl.shift(t % 20, sym_num, 0);
            let rs = rs_dl.rs(t % 20, sym_num);
            let row = tfg.grid.row(t * n_symb_dl + sym_num);
            for m in 0..12 {
                *rs_extracted.at_mut(t, m) = row[shift + 6 * m] * rs[m].conj();
            }
        }
        for m in 0..12 {
            for t in 0..n_slot - 1 {
                foe += rs_extracted.at(t, m).conj() * rs_extracted.at(t + 1, m);
            }
        }
    }
    let residual_f = foe.arg() / (2.0 * PI) / 0.0005;

    let k_factor_residual = if sampling_carrier_twist {
        (fc_requested - residual_f) / fc_programmed
    } else {
        tfg.k_factor
    };

    // FOC; inter-carrier interference is left uncorrected, which is
    // acceptable at the offsets remaining after the fine FOE.
    let cn = cn_vector();
    let mut grid = tfg.grid.clone();
    let timestamps: Vec<f64> = tfg
        .timestamps
        .iter()
        .map(|&ts| k_factor_residual * ts)
        .collect();
    for t in 0..n_ofdm {
        let rot = Complex64::from_polar(
            1.0,
            -2.0 * PI * residual_f * timestamps[t] / (FS_LTE / 16.0),
        );
        for v in grid.row_mut(t).iter_mut() {
            *v *= rot;
        }
        let late = tfg.timestamps[t] - timestamps[t];
        compensate_late(grid.row_mut(t), late, &cn);
    }

    // TOE across consecutive RS-bearing symbols
    let mut toe = Complex64::default();
    for t in 0..2 * n_slot - 1 {
        let extract = |idx: usize| -> (Vec<Complex64>, usize) {
            let sym_num = if idx & 1 == 1 { n_symb_dl - 3 } else { 0 };
            let slot_num = (idx >> 1) % 20;
            let offset = (idx >> 1) * n_symb_dl + sym_num;
            // Port 0: the shift does not depend on the slot
            let shift = rs_dl.shift(0, sym_num, 0);
            let rs = rs_dl.rs(slot_num, sym_num);
            let row = grid.row(offset);
            let v: Vec<Complex64> = (0..12)
                .map(|m| row[shift + 6 * m] * rs[m].conj())
                .collect();
            (v, shift)
        };
        let (cur_v, cur_shift) = extract(t);
        let (next_v, next_shift) = extract(t + 1);
        let (r1v, r2v) = if cur_shift < next_shift {
            (cur_v, next_v)
        } else {
            (next_v, cur_v)
        };
        let toe1: Complex64 = r1v
            .iter()
            .zip(r2v.iter())
            .map(|(a, b)| a.conj() * b)
            .sum();
        let toe2: Complex64 = r2v[..11]
            .iter()
            .zip(r1v[1..].iter())
            .map(|(a, b)| a.conj() * b)
            .sum();
        toe += toe1 + toe2;
    }
    let delay = -toe.arg() / 3.0 / (2.0 * PI / N_FFT as f64);
    debug!("superfine: residual_f {:.2} Hz, delay {:.3} samples", residual_f, delay);

    // TOC: one common subcarrier-dependent ramp
    for t in 0..n_ofdm {
        for (v, &c) in grid.row_mut(t).iter_mut().zip(cn.iter()) {
            *v *= Complex64::from_polar(1.0, 2.0 * PI / N_FFT as f64 * delay * c);
        }
    }

    TfoecOutput {
        grid,
        timestamps,
        residual_f,
    }
}
