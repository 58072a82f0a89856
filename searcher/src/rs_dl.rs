//! Cell-Specific Reference Signals
//!
//! Known pilot values and subcarrier shifts for the center six resource
//! blocks, for antenna ports 0 through 3. The pilot values depend only on
//! the cell identity, the slot, the symbol and the CP type; the center-band
//! extraction makes them independent of the (still unknown) cell bandwidth.

use crate::pn::lte_pn;
use common::types::CpType;
use num_complex::Complex64;
use std::f64::consts::FRAC_1_SQRT_2;

/// Reference-signal index of the first center-band pilot in the sequence
/// defined over the maximum bandwidth: m' = m + 110 - 6 for m = 0..12.
const M_PRIME_BASE: usize = 104;

/// Pilots per RS-bearing OFDM symbol inside the 72-subcarrier window
pub const N_RS: usize = 12;

/// Precomputed reference-signal values for one cell
pub struct RsDl {
    n_symb_dl: usize,
    v_shift: usize,
    /// Indexed by slot * n_symb_dl + symbol
    rs: Vec<[Complex64; N_RS]>,
}

impl RsDl {
    pub fn new(n_id_cell: u16, cp_type: CpType) -> Self {
        let n_symb_dl = cp_type.n_symb_dl();
        let n_cp = match cp_type {
            CpType::Normal => 1u32,
            CpType::Extended => 0u32,
        };

        let mut rs = Vec::with_capacity(20 * n_symb_dl);
        for ns in 0..20u32 {
            for l in 0..n_symb_dl as u32 {
                let c_init = 1024 * (7 * (ns + 1) + l + 1) * (2 * n_id_cell as u32 + 1)
                    + 2 * n_id_cell as u32
                    + n_cp;
                let c = lte_pn(c_init, 2 * (M_PRIME_BASE + N_RS));
                let mut row = [Complex64::default(); N_RS];
                for (m, v) in row.iter_mut().enumerate() {
                    let mp = M_PRIME_BASE + m;
                    *v = Complex64::new(
                        FRAC_1_SQRT_2 * (1.0 - 2.0 * c[2 * mp] as f64),
                        FRAC_1_SQRT_2 * (1.0 - 2.0 * c[2 * mp + 1] as f64),
                    );
                }
                rs.push(row);
            }
        }

        Self {
            n_symb_dl,
            v_shift: (n_id_cell % 6) as usize,
            rs,
        }
    }

    /// Pilot values for one slot/symbol
    pub fn rs(&self, slot: usize, sym: usize) -> &[Complex64; N_RS] {
        &self.rs[(slot % 20) * self.n_symb_dl + sym]
    }

    /// First pilot subcarrier within the 72-subcarrier window
    pub fn shift(&self, slot: usize, sym: usize, port: usize) -> usize {
        let v = match port {
            0 => {
                if sym == 0 {
                    0
                } else {
                    3
                }
            }
            1 => {
                if sym == 0 {
                    3
                } else {
                    0
                }
            }
            2 => 3 * (slot % 2),
            _ => 3 + 3 * (slot % 2),
        };
        (v + self.v_shift) % 6
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rs_unit_power_qpsk() {
        let rs = RsDl::new(387, CpType::Normal);
        for slot in 0..20 {
            for sym in [0, 4] {
                for v in rs.rs(slot, sym).iter() {
                    assert!((v.norm_sqr() - 1.0).abs() < 1e-12);
                    assert!((v.re.abs() - FRAC_1_SQRT_2).abs() < 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_rs_varies_with_slot_and_cell() {
        let a = RsDl::new(387, CpType::Normal);
        let b = RsDl::new(388, CpType::Normal);
        assert_ne!(a.rs(0, 0), a.rs(1, 0));
        assert_ne!(a.rs(0, 0), b.rs(0, 0));
    }

    #[test]
    fn test_shift_pattern() {
        let rs = RsDl::new(6, CpType::Normal); // v_shift = 0
        assert_eq!(rs.shift(0, 0, 0), 0);
        assert_eq!(rs.shift(0, 4, 0), 3);
        assert_eq!(rs.shift(0, 0, 1), 3);
        assert_eq!(rs.shift(0, 4, 1), 0);
        assert_eq!(rs.shift(0, 1, 2), 0);
        assert_eq!(rs.shift(1, 1, 2), 3);
        assert_eq!(rs.shift(0, 1, 3), 3);
        assert_eq!(rs.shift(1, 1, 3), 0);

        let rs = RsDl::new(7, CpType::Normal); // v_shift = 1
        assert_eq!(rs.shift(0, 0, 0), 1);
        assert_eq!(rs.shift(0, 4, 0), 4);
    }

    #[test]
    fn test_ports_are_frequency_orthogonal_within_a_symbol() {
        // Ports 0 and 1 never share a pilot subcarrier in the same symbol
        let rs = RsDl::new(123, CpType::Extended);
        for slot in 0..20 {
            for sym in [0, 3] {
                assert_ne!(rs.shift(slot, sym, 0), rs.shift(slot, sym, 1));
            }
        }
    }
}
