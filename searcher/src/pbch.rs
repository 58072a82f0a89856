//! PBCH Extraction and Blind MIB Decode
//!
//! The PBCH occupies the first four OFDM symbols of the second slot of
//! frame 0, but frame 0 is not yet known: four frame-timing guesses are
//! tried, and for each guess the 1, 2 and 4 antenna-port hypotheses are
//! equalized, demodulated, dematched, Viterbi-decoded and checked against
//! the port-masked CRC. The first hypothesis that passes yields the MIB.

use crate::chan_est::chan_est;
use crate::constants::PBCH_K;
use crate::conv::{conv_decode, rate_dematch};
use crate::crc::{apply_port_mask, crc16_bits};
use crate::grid::Arr2;
use crate::pn::lte_pn;
use crate::rs_dl::RsDl;
use common::types::{CpType, DlBandwidth, Mib, PhichDuration, PhichResource, SyncInfo};
use num_complex::Complex64;
use num_traits::FromPrimitive;
use std::f64::consts::SQRT_2;
use tracing::debug;

/// Iterate the PBCH resource elements of four consecutive frames in
/// extraction order, calling `f(frame, symbol, subcarrier)`.
///
/// Positions that may carry a cell-specific reference signal are skipped:
/// subcarriers congruent to the cell identity modulo 3 in symbols 0 and 1,
/// and also symbol 3 under the extended prefix.
fn for_each_pbch_re<F: FnMut(usize, usize, usize)>(
    n_id_cell: u16,
    cp_type: CpType,
    mut f: F,
) {
    let v_shift_m3 = (n_id_cell % 3) as usize;
    let n_symb_dl = cp_type.n_symb_dl();
    for fr in 0..4 {
        for sym in 0..4 {
            for sc in 0..72 {
                if sc % 3 == v_shift_m3
                    && (sym == 0 || sym == 1 || (sym == 3 && n_symb_dl == 6))
                {
                    continue;
                }
                f(fr, sym, sc);
            }
        }
    }
}

/// Soft bits carried by one PBCH period
fn m_bit(cp_type: CpType) -> usize {
    match cp_type {
        CpType::Normal => 1920,
        CpType::Extended => 1728,
    }
}

/// Pull the PBCH symbols and their per-port channel estimates out of a grid
/// slice that starts at a frame boundary.
fn pbch_extract(
    sync: &SyncInfo,
    n_id_cell: u16,
    tfg: &Arr2<Complex64>,
    row_base: usize,
    ce: &[Arr2<Complex64>; 4],
) -> (Vec<Complex64>, Arr2<Complex64>) {
    let n_symb_dl = sync.cp_type.n_symb_dl();
    let n_re = m_bit(sync.cp_type) / 2;
    let mut pbch_sym = Vec::with_capacity(n_re);
    let mut pbch_ce: Arr2<Complex64> = Arr2::new(4, n_re);
    let mut idx = 0usize;
    for_each_pbch_re(n_id_cell, sync.cp_type, |fr, sym, sc| {
        let row = row_base + fr * 10 * 2 * n_symb_dl + n_symb_dl + sym;
        pbch_sym.push(tfg.at(row, sc));
        for port in 0..4 {
            *pbch_ce.at_mut(port, idx) = ce[port].at(row, sc);
        }
        idx += 1;
    });
    debug_assert_eq!(idx, n_re);
    (pbch_sym, pbch_ce)
}

/// Channel-compensate the PBCH symbols under a port-count hypothesis,
/// returning the estimated transmit symbols and their effective noise power.
fn equalize(
    pbch_sym: &[Complex64],
    pbch_ce: &Arr2<Complex64>,
    np_v: &[f64; 4],
    n_ports: u8,
) -> (Vec<Complex64>, Vec<f64>) {
    let n = pbch_sym.len();
    let mut syms = vec![Complex64::default(); n];
    let mut np = vec![0.0f64; n];
    if n_ports == 1 {
        for t in 0..n {
            let h = pbch_ce.at(0, t);
            let gain = h.conj() / h.norm_sqr();
            syms[t] = pbch_sym[t] * gain;
            np[t] = np_v[0] * gain.norm_sqr();
        }
        return (syms, np);
    }

    // Space-frequency block code: zero-forcing over symbol pairs
    for t in (0..n).step_by(2) {
        let (h1, h2, np_temp) = if n_ports == 2 {
            (
                (pbch_ce.at(0, t) + pbch_ce.at(0, t + 1)) / 2.0,
                (pbch_ce.at(1, t) + pbch_ce.at(1, t + 1)) / 2.0,
                (np_v[0] + np_v[1]) / 2.0,
            )
        } else if t % 4 == 0 {
            (
                (pbch_ce.at(0, t) + pbch_ce.at(0, t + 1)) / 2.0,
                (pbch_ce.at(2, t) + pbch_ce.at(2, t + 1)) / 2.0,
                (np_v[0] + np_v[2]) / 2.0,
            )
        } else {
            (
                (pbch_ce.at(1, t) + pbch_ce.at(1, t + 1)) / 2.0,
                (pbch_ce.at(3, t) + pbch_ce.at(3, t + 1)) / 2.0,
                (np_v[1] + np_v[3]) / 2.0,
            )
        };
        let x1 = pbch_sym[t];
        let x2 = pbch_sym[t + 1];
        let scale = h1.norm_sqr() + h2.norm_sqr();
        syms[t] = (h1.conj() * x1 + h2 * x2.conj()) / scale;
        syms[t + 1] = ((-h2.conj() * x1 + h1 * x2.conj()) / scale).conj();
        np[t] = (h1.norm() / scale).powi(2) * np_temp + (h2.norm() / scale).powi(2) * np_temp;
        np[t + 1] = np[t];
    }
    // The transmit-diversity precoder costs 3 dB per symbol
    for s in syms.iter_mut() {
        *s *= SQRT_2;
    }
    (syms, np)
}

/// QPSK soft demodulation; positive means bit 1. Non-finite values (from a
/// degenerate channel estimate) are neutralized instead of propagated.
fn demodulate(syms: &[Complex64], np: &[f64]) -> Vec<f64> {
    let mut e = Vec::with_capacity(syms.len() * 2);
    for (s, &n) in syms.iter().zip(np.iter()) {
        for v in [-2.0 * SQRT_2 * s.re / n, -2.0 * SQRT_2 * s.im / n] {
            e.push(if v.is_finite() { v } else { 0.0 });
        }
    }
    e
}

/// Unpack a decoded 24-bit MIB payload
fn unpack_mib(bits: &[u8], n_ports: u8, frame_timing_guess: usize) -> Option<Mib> {
    let bandwidth = DlBandwidth::from_u8(bits[0] * 4 + bits[1] * 2 + bits[2])?;
    let phich_duration = if bits[3] == 1 {
        PhichDuration::Extended
    } else {
        PhichDuration::Normal
    };
    let phich_resource = PhichResource::from_u8(bits[4] * 2 + bits[5])?;
    let mut sfn_high = 0u16;
    for &b in &bits[6..14] {
        sfn_high = (sfn_high << 1) | b as u16;
    }
    let sfn = ((sfn_high as i32) * 4 - frame_timing_guess as i32).rem_euclid(1024) as u16;
    Some(Mib {
        n_ports,
        bandwidth,
        phich_duration,
        phich_resource,
        sfn,
    })
}

/// Blindly decode the MIB from a corrected time/frequency grid.
///
/// Channel estimates are produced for all four port hypotheses up front;
/// the frame-timing and port-count hypotheses are then scanned until a CRC
/// match. Returns `None` when every combination fails.
pub fn decode_mib(
    sync: &SyncInfo,
    n_id_cell: u16,
    tfg: &Arr2<Complex64>,
    rs_dl: &RsDl,
) -> Option<Mib> {
    let n_symb_dl = sync.cp_type.n_symb_dl();

    let mut ce = Vec::with_capacity(4);
    let mut np_v = [0.0f64; 4];
    for port in 0..4 {
        let (ce_port, np) = chan_est(sync, rs_dl, tfg, port);
        ce.push(ce_port);
        np_v[port] = np;
    }
    let ce: [Arr2<Complex64>; 4] = match ce.try_into() {
        Ok(a) => a,
        Err(_) => return None,
    };

    let scr = lte_pn(n_id_cell as u32, m_bit(sync.cp_type));
    for frame_timing_guess in 0..4usize {
        let row_base = frame_timing_guess * 10 * 2 * n_symb_dl;
        let (pbch_sym, pbch_ce) = pbch_extract(sync, n_id_cell, tfg, row_base, &ce);

        for n_ports in [1u8, 2, 4] {
            let (syms, np) = equalize(&pbch_sym, &pbch_ce, &np_v, n_ports);
            let mut e_est = demodulate(&syms, &np);
            for (v, &s) in e_est.iter_mut().zip(scr.iter()) {
                if s == 1 {
                    *v = -*v;
                }
            }
            let d_est = rate_dematch(&e_est, PBCH_K);
            let c_est = conv_decode(&d_est);

            let mut crc = crc16_bits(&c_est[..24]);
            apply_port_mask(&mut crc, n_ports);
            if crc == c_est[24..PBCH_K] {
                debug!(
                    "MIB hit: guess {} ports {}",
                    frame_timing_guess, n_ports
                );
                if let Some(mib) = unpack_mib(&c_est[..24], n_ports, frame_timing_guess) {
                    return Some(mib);
                }
            }
        }
    }
    None
}

/// Assemble the 24 MIB payload bits. Shared by the decoder's tests and the
/// synthesis fixtures.
pub fn pack_mib_bits(mib: &Mib) -> [u8; 24] {
    let mut bits = [0u8; 24];
    let bw = mib.bandwidth as u8;
    bits[0] = (bw >> 2) & 1;
    bits[1] = (bw >> 1) & 1;
    bits[2] = bw & 1;
    bits[3] = (mib.phich_duration == PhichDuration::Extended) as u8;
    let res = mib.phich_resource as u8;
    bits[4] = (res >> 1) & 1;
    bits[5] = res & 1;
    let sfn_high = mib.sfn >> 2;
    for i in 0..8 {
        bits[6 + i] = ((sfn_high >> (7 - i)) & 1) as u8;
    }
    bits
}
