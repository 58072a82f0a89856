//! Synchronization Sequence Tables
//!
//! Process-wide read-only tables: the three PSS Zadoff-Chu sequences in both
//! frequency and time domain, and the 168 x 3 x 2 SSS sequence family.
//! Initialized once on first touch, never mutated.

use crate::constants::{N_FFT, N_ID_1_MAX, N_PSS, N_SC_SYNC, PSS_TD_LEN};
use crate::dsp::idft128;
use num_complex::Complex64;
use std::f64::consts::PI;
use std::sync::LazyLock;

/// Zadoff-Chu roots for `n_id_2` = 0, 1, 2
const PSS_ROOTS: [u32; N_PSS] = [25, 29, 34];

/// Read-only sequence tables
pub struct RomTables {
    /// Frequency-domain PSS, 62 subcarriers per root
    pub pss_fd: [[Complex64; N_SC_SYNC]; N_PSS],
    /// Time-domain PSS templates: 128-sample body with a 9-sample cyclic
    /// prefix, unit energy over the body
    pub pss_td: [[Complex64; PSS_TD_LEN]; N_PSS],
    /// SSS values, +-1, indexed by (n_id_1, n_id_2, half-frame, subcarrier)
    sss_fd: Vec<i8>,
}

pub static ROM_TABLES: LazyLock<RomTables> = LazyLock::new(RomTables::generate);

impl RomTables {
    /// Frequency-domain SSS for one identity at slot 0 or slot 10
    pub fn sss_fd(&self, n_id_1: u16, n_id_2: u8, slot: u8) -> &[i8] {
        debug_assert!((n_id_1 as usize) < N_ID_1_MAX);
        debug_assert!((n_id_2 as usize) < N_PSS);
        debug_assert!(slot == 0 || slot == 10);
        let half = if slot == 0 { 0 } else { 1 };
        let base =
            ((n_id_1 as usize * N_PSS + n_id_2 as usize) * 2 + half) * N_SC_SYNC;
        &self.sss_fd[base..base + N_SC_SYNC]
    }

    fn generate() -> Self {
        let mut pss_fd = [[Complex64::default(); N_SC_SYNC]; N_PSS];
        let mut pss_td = [[Complex64::default(); PSS_TD_LEN]; N_PSS];
        for (t, &root) in PSS_ROOTS.iter().enumerate() {
            pss_fd[t] = pss_fd_sequence(root);
            pss_td[t] = pss_td_template(&pss_fd[t]);
        }

        let mut sss_fd = vec![0i8; N_ID_1_MAX * N_PSS * 2 * N_SC_SYNC];
        for n_id_1 in 0..N_ID_1_MAX as u16 {
            for n_id_2 in 0..N_PSS as u8 {
                for (half, slot) in [0u8, 10u8].iter().enumerate() {
                    let seq = sss_sequence(n_id_1, n_id_2, *slot);
                    let base = ((n_id_1 as usize * N_PSS + n_id_2 as usize) * 2
                        + half)
                        * N_SC_SYNC;
                    sss_fd[base..base + N_SC_SYNC].copy_from_slice(&seq);
                }
            }
        }

        Self {
            pss_fd,
            pss_td,
            sss_fd,
        }
    }
}

/// Length-63 Zadoff-Chu sequence with the DC element punctured
fn pss_fd_sequence(root: u32) -> [Complex64; N_SC_SYNC] {
    let u = root as f64;
    let mut d = [Complex64::default(); N_SC_SYNC];
    for (n, v) in d.iter_mut().enumerate() {
        let m = n as f64;
        let phase = if n < 31 {
            -PI * u * m * (m + 1.0) / 63.0
        } else {
            -PI * u * (m + 1.0) * (m + 2.0) / 63.0
        };
        *v = Complex64::from_polar(1.0, phase);
    }
    d
}

/// Map the 62 subcarriers onto the 128-point spectrum, transform, and
/// prepend the 9-sample prefix. Scaled so the 128-sample body has unit
/// energy, which fixes the statistics the detection threshold relies on.
fn pss_td_template(fd: &[Complex64; N_SC_SYNC]) -> [Complex64; PSS_TD_LEN] {
    let mut spectrum = vec![Complex64::default(); N_FFT];
    spectrum[N_FFT - 31..].copy_from_slice(&fd[..31]);
    spectrum[1..32].copy_from_slice(&fd[31..]);
    let body = idft128(&spectrum);
    let scale = (N_FFT as f64 / N_SC_SYNC as f64).sqrt();

    let mut td = [Complex64::default(); PSS_TD_LEN];
    for (i, v) in td[9..].iter_mut().enumerate() {
        *v = body[i] * scale;
    }
    for (i, v) in td[..9].iter_mut().enumerate() {
        *v = body[N_FFT - 9 + i] * scale;
    }
    td
}

/// One 31-bit m-sequence defined by its feedback taps, BPSK mapped
fn m_sequence(taps: &[usize]) -> [i8; 31] {
    let mut x = [0u8; 36];
    x[4] = 1;
    for i in 0..31 {
        let mut next = 0u8;
        for &t in taps {
            next ^= x[i + t];
        }
        x[i + 5] = next;
    }
    let mut s = [0i8; 31];
    for i in 0..31 {
        s[i] = 1 - 2 * x[i] as i8;
    }
    s
}

/// SSS sequence for one identity pair and half-frame
fn sss_sequence(n_id_1: u16, n_id_2: u8, slot: u8) -> [i8; N_SC_SYNC] {
    // m0/m1 derivation
    let q_prime = n_id_1 as usize / 30;
    let q = (n_id_1 as usize + q_prime * (q_prime + 1) / 2) / 30;
    let m_prime = n_id_1 as usize + q * (q + 1) / 2;
    let m0 = m_prime % 31;
    let m1 = (m0 + m_prime / 31 + 1) % 31;

    // Base sequences: s from x^5+x^2+1, c from x^5+x^3+1,
    // z from x^5+x^4+x^2+x+1
    let s_tilde = m_sequence(&[0, 2]);
    let c_tilde = m_sequence(&[0, 3]);
    let z_tilde = m_sequence(&[0, 1, 2, 4]);

    let n2 = n_id_2 as usize;
    let mut d = [0i8; N_SC_SYNC];
    for n in 0..31 {
        let s0_m0 = s_tilde[(n + m0) % 31];
        let s1_m1 = s_tilde[(n + m1) % 31];
        let c0 = c_tilde[(n + n2) % 31];
        let c1 = c_tilde[(n + n2 + 3) % 31];
        let z1_m0 = z_tilde[(n + (m0 % 8)) % 31];
        let z1_m1 = z_tilde[(n + (m1 % 8)) % 31];
        if slot == 0 {
            d[2 * n] = s0_m0 * c0;
            d[2 * n + 1] = s1_m1 * c1 * z1_m0;
        } else {
            d[2 * n] = s1_m1 * c0;
            d[2 * n + 1] = s0_m0 * c1 * z1_m1;
        }
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::sigpower;

    #[test]
    fn test_pss_fd_unit_magnitude() {
        for t in 0..N_PSS {
            for v in ROM_TABLES.pss_fd[t].iter() {
                assert!((v.norm() - 1.0).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_pss_td_energy_and_prefix() {
        for t in 0..N_PSS {
            let td = &ROM_TABLES.pss_td[t];
            // Unit energy over the body, prefix is a copy of the tail
            let body_energy: f64 = td[9..].iter().map(|v| v.norm_sqr()).sum();
            assert!((body_energy - 1.0).abs() < 1e-9);
            for i in 0..9 {
                assert!((td[i] - td[PSS_TD_LEN - 9 + i]).norm() < 1e-12);
            }
        }
    }

    #[test]
    fn test_pss_roots_nearly_orthogonal() {
        // Cross-correlation between different roots well below autocorrelation
        for a in 0..N_PSS {
            for b in 0..N_PSS {
                let dot: Complex64 = ROM_TABLES.pss_td[a][9..]
                    .iter()
                    .zip(ROM_TABLES.pss_td[b][9..].iter())
                    .map(|(x, y)| x.conj() * y)
                    .sum();
                if a == b {
                    assert!((dot.norm() - 1.0).abs() < 1e-9);
                } else {
                    assert!(dot.norm() < 0.35);
                }
            }
        }
        let _ = sigpower(&ROM_TABLES.pss_td[0]);
    }

    #[test]
    fn test_sss_values_and_distinctness() {
        for &v in ROM_TABLES.sss_fd(25, 1, 0) {
            assert!(v == 1 || v == -1);
        }
        assert_ne!(ROM_TABLES.sss_fd(25, 1, 0), ROM_TABLES.sss_fd(25, 1, 10));
        assert_ne!(ROM_TABLES.sss_fd(25, 1, 0), ROM_TABLES.sss_fd(26, 1, 0));
        assert_ne!(ROM_TABLES.sss_fd(25, 1, 0), ROM_TABLES.sss_fd(25, 2, 0));
    }

    #[test]
    fn test_sss_even_entries_swap_between_half_frames() {
        // d(2n) uses s0^(m0) in the first half and s1^(m1) in the second
        let a = ROM_TABLES.sss_fd(100, 2, 0);
        let b = ROM_TABLES.sss_fd(100, 2, 10);
        let mut any_diff = false;
        for n in 0..31 {
            if a[2 * n] != b[2 * n] {
                any_diff = true;
            }
        }
        assert!(any_diff);
    }
}
