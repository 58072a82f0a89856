//! PSS Coarse Search
//!
//! Cross-correlates the capture buffer against frequency-shifted versions of
//! the three PSS templates, combines the correlations incoherently across
//! half-frames and adjacent delay taps, and extracts peaks against a
//! per-index noise threshold.

use crate::constants::{HALF_FRAME, N_PSS, PSS_TD_LEN, SP_WINDOW};
use crate::dsp::{fshift, tshift_right};
use crate::grid::{Arr2, Arr3};
use crate::rom::ROM_TABLES;
use common::types::Cell;
use common::utils::{udb10, wrap_idx};
use num_complex::{Complex32, Complex64};
use rayon::prelude::*;
use tracing::debug;

/// Frequency-dependent clock ratio: in twist mode the sampling clock and the
/// LO share one crystal, so every frequency-offset hypothesis implies its
/// own sampling-rate ratio.
#[inline]
pub fn twist_k_factor(
    sampling_carrier_twist: bool,
    fc_requested: f64,
    fc_programmed: f64,
    f_off: f64,
    k_factor: f64,
) -> f64 {
    if sampling_carrier_twist {
        (fc_requested - f_off) / fc_programmed
    } else {
        k_factor
    }
}

/// Correlate the capture buffer against each (PSS, frequency) template pair.
///
/// Correlations run at the full 2x rate with no predecimation, which filters
/// and correlates in one pass and keeps the usable offset range limited only
/// by the capture bandwidth. This is by far the heaviest loop in the
/// pipeline; the (PSS, frequency) lanes are independent and are sharded
/// across worker threads, each owning a disjoint contiguous slab.
#[allow(clippy::too_many_arguments)]
pub fn xc_correlate(
    capbuf: &[Complex64],
    f_search_set: &[f64],
    fc_requested: f64,
    fc_programmed: f64,
    fs_programmed: f64,
    sampling_carrier_twist: bool,
    k_factor: f64,
) -> Arr3<Complex32> {
    let n_cap = capbuf.len();
    let n_k = n_cap - (PSS_TD_LEN - 1);
    let n_f = f_search_set.len();

    let mut xc: Arr3<Complex32> = Arr3::new_mid_contiguous(N_PSS, n_k, n_f);
    xc.data_mut()
        .par_chunks_mut(n_k)
        .enumerate()
        .for_each(|(lane, slab)| {
            let t = lane / n_f;
            let foi = lane % n_f;
            let f_off = f_search_set[foi];
            let k = twist_k_factor(
                sampling_carrier_twist,
                fc_requested,
                fc_programmed,
                f_off,
                k_factor,
            );
            let mut template = fshift(&ROM_TABLES.pss_td[t], f_off, fs_programmed * k);
            for v in template.iter_mut() {
                *v = v.conj() / PSS_TD_LEN as f64;
            }
            for (pos, out) in slab.iter_mut().enumerate() {
                let mut acc = Complex64::default();
                for (m, &tv) in template.iter().enumerate() {
                    acc += tv * capbuf[pos + m];
                }
                *out = Complex32::new(acc.re as f32, acc.im as f32);
            }
        });
    xc
}

/// Received-power estimate over a sliding two-OFDM-symbol window, combined
/// incoherently across half-frames and aligned with the correlation peaks.
pub fn sp_est(capbuf: &[Complex64]) -> (Vec<f64>, Vec<f64>, usize) {
    let n_cap = capbuf.len();
    let n_comb_sp = (n_cap - (PSS_TD_LEN - 1) - PSS_TD_LEN) / HALF_FRAME;
    let n_sp = n_comb_sp * HALF_FRAME;

    let mut sp = vec![0.0f64; n_sp];
    let mut acc = 0.0;
    for s in capbuf.iter().take(SP_WINDOW) {
        acc += s.norm_sqr();
    }
    sp[0] = acc / SP_WINDOW as f64;
    for t in 1..n_sp {
        acc += capbuf[t + SP_WINDOW - 1].norm_sqr() - capbuf[t - 1].norm_sqr();
        sp[t] = acc / SP_WINDOW as f64;
    }

    let mut sp_incoherent = vec![0.0f64; HALF_FRAME];
    for m in 0..n_comb_sp {
        for idx in 0..HALF_FRAME {
            sp_incoherent[idx] += sp[m * HALF_FRAME + idx];
        }
    }
    for v in sp_incoherent.iter_mut() {
        *v /= n_comb_sp as f64;
    }
    tshift_right(&mut sp_incoherent, PSS_TD_LEN);

    (sp, sp_incoherent, n_comb_sp)
}

/// Incoherently combine the correlations across half-frames.
///
/// The stride between successive PSS occurrences is not an integer number of
/// capture samples: with a large frequency offset the true half-frame
/// spacing deviates from 9600 samples, and combining at the wrong stride
/// smears the peak. The per-hypothesis `k_factor` supplies the stride, which
/// is also what lets neighbouring tuned centers disambiguate the true
/// downlink frequency.
#[allow(clippy::too_many_arguments)]
pub fn xc_combine(
    xc: &Arr3<Complex32>,
    f_search_set: &[f64],
    fc_requested: f64,
    fc_programmed: f64,
    fs_programmed: f64,
    sampling_carrier_twist: bool,
    k_factor: f64,
) -> (Arr3<f32>, usize) {
    let (_, n_k, n_f) = xc.shape();
    let n_comb_xc = (n_k - 100) / HALF_FRAME;

    let mut single: Arr3<f32> = Arr3::new(N_PSS, HALF_FRAME, n_f);
    for foi in 0..n_f {
        let k = twist_k_factor(
            sampling_carrier_twist,
            fc_requested,
            fc_programmed,
            f_search_set[foi],
            k_factor,
        );
        for t in 0..N_PSS {
            for m in 0..n_comb_xc {
                let start = (m as f64 * 0.005 * k * fs_programmed).round() as usize;
                for idx in 0..HALF_FRAME {
                    let v = xc.at(t, idx + start, foi);
                    *single.at_mut(t, idx, foi) += v.norm_sqr();
                }
            }
            for idx in 0..HALF_FRAME {
                *single.at_mut(t, idx, foi) /= n_comb_xc as f32;
            }
        }
    }
    (single, n_comb_xc)
}

/// Combine adjacent delay taps that likely belong to one delay spread
pub fn xc_delay_spread(single: &Arr3<f32>, ds_comb_arm: usize) -> Arr3<f32> {
    let (_, _, n_f) = single.shape();
    let mut out: Arr3<f32> = Arr3::new(N_PSS, HALF_FRAME, n_f);
    let norm = (2 * ds_comb_arm + 1) as f32;
    for foi in 0..n_f {
        for t in 0..N_PSS {
            for idx in 0..HALF_FRAME {
                let mut acc = single.at(t, idx, foi);
                for d in 1..=ds_comb_arm {
                    acc += single.at(t, wrap_idx(idx as isize - d as isize, HALF_FRAME), foi);
                    acc += single.at(t, wrap_idx(idx as isize + d as isize, HALF_FRAME), foi);
                }
                *out.at_mut(t, idx, foi) = acc / norm;
            }
        }
    }
    out
}

/// For every (PSS, delay) bin keep only the strongest frequency hypothesis
pub fn xc_peak_freq(xc_incoherent: &Arr3<f32>) -> (Arr2<f64>, Arr2<usize>) {
    let (_, _, n_f) = xc_incoherent.shape();
    let mut pow: Arr2<f64> = Arr2::new(N_PSS, HALF_FRAME);
    let mut frq: Arr2<usize> = Arr2::new(N_PSS, HALF_FRAME);
    for t in 0..N_PSS {
        for idx in 0..HALF_FRAME {
            let mut best_pow = xc_incoherent.at(t, idx, 0) as f64;
            let mut best_foi = 0usize;
            for foi in 1..n_f {
                let v = xc_incoherent.at(t, idx, foi) as f64;
                if v > best_pow {
                    best_pow = v;
                    best_foi = foi;
                }
            }
            *pow.at_mut(t, idx) = best_pow;
            *frq.at_mut(t, idx) = best_foi;
        }
    }
    (pow, frq)
}

/// Per-index detection threshold.
///
/// Under noise only, the combined correlation metric at index `idx` has mean
/// `sp_incoherent[idx] * E_td / 137^2` (E_td is the template energy) and is
/// an average of `n_comb_xc * (2 * ds_comb_arm + 1)` squared-magnitude
/// terms, so its standard deviation shrinks by the square root of that
/// count. The threshold is the noise mean inflated by `n_sigma` such
/// standard deviations.
pub fn detection_threshold(
    sp_incoherent: &[f64],
    n_comb_xc: usize,
    ds_comb_arm: usize,
    n_sigma: f64,
) -> Vec<f64> {
    let e_td = PSS_TD_LEN as f64 / 128.0;
    let n_avg = (n_comb_xc * (2 * ds_comb_arm + 1)) as f64;
    let scale = e_td / (PSS_TD_LEN as f64 * PSS_TD_LEN as f64);
    sp_incoherent
        .iter()
        .map(|&sp| sp * scale * (1.0 + n_sigma / n_avg.sqrt()))
        .collect()
}

/// Iteratively extract peaks, strongest first, suppressing the neighbourhood
/// of each accepted peak.
#[allow(clippy::too_many_arguments)]
pub fn peak_search(
    xc_incoherent_collapsed_pow: &Arr2<f64>,
    xc_incoherent_collapsed_frq: &Arr2<usize>,
    z_th1: &[f64],
    f_search_set: &[f64],
    fc_requested: f64,
    fc_programmed: f64,
    xc_incoherent_single: &Arr3<f32>,
    ds_comb_arm: usize,
) -> Vec<Cell> {
    let mut working = xc_incoherent_collapsed_pow.clone();
    let mut cells = Vec::new();

    loop {
        // Largest remaining peak across all PSS indices and delays
        let mut peak_pow = f64::NEG_INFINITY;
        let mut peak_n_id_2 = 0usize;
        let mut peak_ind = 0usize;
        for t in 0..N_PSS {
            for idx in 0..HALF_FRAME {
                if working.at(t, idx) > peak_pow {
                    peak_pow = working.at(t, idx);
                    peak_n_id_2 = t;
                    peak_ind = idx;
                }
            }
        }
        if peak_pow < z_th1[peak_ind] || peak_pow <= 0.0 {
            break;
        }

        // The collapsed metric sums energy across the delay-spread arm; pick
        // the strongest single tap inside the arm as the reported index.
        let foi = xc_incoherent_collapsed_frq.at(peak_n_id_2, peak_ind);
        let mut best_pow = f32::NEG_INFINITY;
        let mut best_ind = peak_ind;
        for d in -(ds_comb_arm as isize)..=(ds_comb_arm as isize) {
            let t_wrap = wrap_idx(peak_ind as isize + d, HALF_FRAME);
            let v = xc_incoherent_single.at(peak_n_id_2, t_wrap, foi);
            if v > best_pow {
                best_pow = v;
                best_ind = t_wrap;
            }
        }

        debug!(
            "PSS peak: n_id_2 {} ind {} freq {:.1} Hz pow {:.3e}",
            peak_n_id_2, best_ind, f_search_set[foi], peak_pow
        );
        cells.push(Cell::new(
            fc_requested,
            fc_programmed,
            peak_n_id_2 as u8,
            best_ind,
            f_search_set[foi],
            peak_pow,
        ));

        // No peaks with the same PSS within 274 samples of this one
        for d in -274isize..=274 {
            *working.at_mut(peak_n_id_2, wrap_idx(peak_ind as isize + d, HALF_FRAME)) = 0.0;
        }
        // Peers on the other PSS indices within 274 samples and within 8 dB
        // are cross-correlation artifacts of the same transmission
        let thresh = peak_pow * udb10(-8.0);
        for n in 0..N_PSS {
            if n == peak_n_id_2 {
                continue;
            }
            for d in -274isize..=274 {
                let idx = wrap_idx(peak_ind as isize + d, HALF_FRAME);
                if working.at(n, idx) >= thresh {
                    *working.at_mut(n, idx) = 0.0;
                }
            }
        }
        // The repetitive CRS produces correlation ghosts roughly 14 dB down
        // during every CRS symbol; drop everything 12 dB below this peak
        let thresh = peak_pow * udb10(-12.0);
        for n in 0..N_PSS {
            for idx in 0..HALF_FRAME {
                if working.at(n, idx) < thresh {
                    *working.at_mut(n, idx) = 0.0;
                }
            }
        }
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_peak_fixture() -> (Arr2<f64>, Arr2<usize>, Arr3<f32>) {
        let mut pow: Arr2<f64> = Arr2::new(N_PSS, HALF_FRAME);
        let frq: Arr2<usize> = Arr2::new(N_PSS, HALF_FRAME);
        let mut single: Arr3<f32> = Arr3::new(N_PSS, HALF_FRAME, 1);
        *pow.at_mut(1, 5000) = 10.0;
        *single.at_mut(1, 5001, 0) = 4.0;
        *single.at_mut(1, 5000, 0) = 3.0;
        (pow, frq, single)
    }

    #[test]
    fn test_peak_search_refines_index_within_arm() {
        let (pow, frq, single) = single_peak_fixture();
        let z = vec![1.0; HALF_FRAME];
        let f = vec![0.0];
        let cells = peak_search(&pow, &frq, &z, &f, 740e6, 740e6, &single, 2);
        assert_eq!(cells.len(), 1);
        assert_eq!(cells[0].n_id_2, 1);
        assert_eq!(cells[0].ind, 5001);
        assert_eq!(cells[0].pss_pow, 10.0);
    }

    #[test]
    fn test_peak_search_below_threshold_is_silent() {
        let (pow, frq, single) = single_peak_fixture();
        let z = vec![100.0; HALF_FRAME];
        let f = vec![0.0];
        let cells = peak_search(&pow, &frq, &z, &f, 740e6, 740e6, &single, 2);
        assert!(cells.is_empty());
    }

    #[test]
    fn test_peak_search_suppresses_same_pss_neighbourhood() {
        let (mut pow, frq, single) = single_peak_fixture();
        // A second, weaker peak 100 samples away on the same PSS must die
        *pow.at_mut(1, 5100) = 9.0;
        let z = vec![1.0; HALF_FRAME];
        let f = vec![0.0];
        let cells = peak_search(&pow, &frq, &z, &f, 740e6, 740e6, &single, 2);
        assert_eq!(cells.len(), 1);
    }

    #[test]
    fn test_peak_search_emits_descending_power() {
        let mut pow: Arr2<f64> = Arr2::new(N_PSS, HALF_FRAME);
        let frq: Arr2<usize> = Arr2::new(N_PSS, HALF_FRAME);
        let single: Arr3<f32> = Arr3::new(N_PSS, HALF_FRAME, 1);
        *pow.at_mut(0, 1000) = 8.0;
        *pow.at_mut(2, 4000) = 10.0;
        *pow.at_mut(1, 7000) = 6.0;
        let z = vec![1.0; HALF_FRAME];
        let f = vec![0.0];
        let cells = peak_search(&pow, &frq, &z, &f, 740e6, 740e6, &single, 2);
        assert_eq!(cells.len(), 3);
        for pair in cells.windows(2) {
            assert!(pair[0].pss_pow >= pair[1].pss_pow);
        }
        assert_eq!(cells[0].n_id_2, 2);
    }

    #[test]
    fn test_sp_est_flat_signal() {
        let capbuf = vec![Complex64::new(1.0, 0.0); 153_600];
        let (sp, sp_inc, n_comb) = sp_est(&capbuf);
        assert_eq!(n_comb, 15);
        assert!((sp[0] - 1.0).abs() < 1e-9);
        assert!((sp_inc[4711] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_scales_with_power() {
        let sp = vec![1.0, 2.0];
        let th = detection_threshold(&sp, 15, 2, 9.0);
        assert!((th[1] / th[0] - 2.0).abs() < 1e-12);
        // Inflation factor above the noise mean
        let noise_mean = 1.0 * (137.0 / 128.0) / (137.0 * 137.0);
        assert!(th[0] > noise_mean);
        assert!(th[0] < 3.0 * noise_mean);
    }
}
