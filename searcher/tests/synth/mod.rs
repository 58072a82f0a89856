//! Downlink Signal Synthesis
//!
//! Builds baseband LTE downlink frames (PSS, SSS, cell-specific reference
//! signals and an encoded PBCH) at the 1.92 Msps capture rate, for feeding
//! the acquisition pipeline with signals whose every parameter is known.

use common::types::{Cell, CpType, DlBandwidth, DuplexMode, Mib, PhichDuration, PhichResource};
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use searcher::constants::FRAME_LEN;
use searcher::conv::{conv_encode, rate_match};
use searcher::crc::{apply_port_mask, crc16_bits};
use searcher::dsp::{idft128, sigpower};
use searcher::pbch::pack_mib_bits;
use searcher::pn::lte_pn;
use searcher::rom::ROM_TABLES;
use searcher::rs_dl::RsDl;
use std::f64::consts::FRAC_1_SQRT_2;

/// Everything that defines one synthesized cell
#[derive(Debug, Clone)]
pub struct SynthParams {
    pub n_id_1: u16,
    pub n_id_2: u8,
    pub cp_type: CpType,
    pub duplex_mode: DuplexMode,
    pub n_ports: u8,
    pub bandwidth: DlBandwidth,
    pub phich_duration: PhichDuration,
    pub phich_resource: PhichResource,
    /// System frame number of the first generated frame
    pub sfn0: u16,
    pub n_frames: usize,
    pub amplitude: f64,
    /// Carrier frequency offset applied to the output, Hz
    pub freq_offset: f64,
}

impl Default for SynthParams {
    fn default() -> Self {
        Self {
            n_id_1: 25,
            n_id_2: 1,
            cp_type: CpType::Normal,
            duplex_mode: DuplexMode::Fdd,
            n_ports: 1,
            bandwidth: DlBandwidth::Rb50,
            phich_duration: PhichDuration::Normal,
            phich_resource: PhichResource::OneSixth,
            sfn0: 199,
            n_frames: 10,
            amplitude: 1.0,
            freq_offset: 0.0,
        }
    }
}

impl SynthParams {
    pub fn n_id_cell(&self) -> u16 {
        3 * self.n_id_1 + self.n_id_2 as u16
    }
}

/// Map a sync-channel subcarrier index (0..62) to a grid column (0..72)
fn sync_col(i: usize) -> usize {
    let cn = if i < 31 { i as i32 - 31 } else { i as i32 - 30 };
    if cn < 0 {
        (cn + 36) as usize
    } else {
        (cn + 35) as usize
    }
}

/// One frame's resource grid over the center six RBs
fn frame_grid(p: &SynthParams, rs_dl: &RsDl, sfn: u16) -> Vec<Vec<Complex64>> {
    let n_symb = p.cp_type.n_symb_dl();
    let mut grid = vec![vec![Complex64::default(); 72]; 20 * n_symb];

    // Cell-specific reference signals per transmit port
    let ports: &[usize] = match p.n_ports {
        1 => &[0],
        2 => &[0, 1],
        _ => &[0, 1, 2, 3],
    };
    for &port in ports {
        let syms: Vec<usize> = if port <= 1 {
            vec![0, n_symb - 3]
        } else {
            vec![1]
        };
        for slot in 0..20 {
            for &sym in syms.iter() {
                let shift = rs_dl.shift(slot, sym, port);
                let rs = rs_dl.rs(slot, sym);
                for m in 0..12 {
                    grid[slot * n_symb + sym][shift + 6 * m] = rs[m];
                }
            }
        }
    }

    // Synchronization signals
    let pss = &ROM_TABLES.pss_fd[p.n_id_2 as usize];
    match p.duplex_mode {
        DuplexMode::Fdd => {
            for (slot, variant) in [(0usize, 0u8), (10, 10)] {
                let pss_row = slot * n_symb + n_symb - 1;
                let sss_row = slot * n_symb + n_symb - 2;
                let sss = ROM_TABLES.sss_fd(p.n_id_1, p.n_id_2, variant);
                for i in 0..62 {
                    grid[pss_row][sync_col(i)] = pss[i];
                    grid[sss_row][sync_col(i)] = Complex64::new(sss[i] as f64, 0.0);
                }
            }
        }
        DuplexMode::Tdd => {
            // PSS in the third symbol of subframes 1 and 6, SSS in the last
            // symbol of subframes 0 and 5
            for (pss_slot, sss_slot, variant) in [(2usize, 1usize, 0u8), (12, 11, 10)] {
                let pss_row = pss_slot * n_symb + 2;
                let sss_row = sss_slot * n_symb + n_symb - 1;
                let sss = ROM_TABLES.sss_fd(p.n_id_1, p.n_id_2, variant);
                for i in 0..62 {
                    grid[pss_row][sync_col(i)] = pss[i];
                    grid[sss_row][sync_col(i)] = Complex64::new(sss[i] as f64, 0.0);
                }
            }
        }
    }

    // PBCH: this frame carries segment (sfn mod 4) of the codeword built
    // for the 40 ms period starting at the surrounding multiple of 4
    let m_bit = match p.cp_type {
        CpType::Normal => 1920,
        CpType::Extended => 1728,
    };
    let period_base = sfn & !3;
    let segment = (sfn % 4) as usize;
    let mib = Mib {
        n_ports: p.n_ports,
        bandwidth: p.bandwidth,
        phich_duration: p.phich_duration,
        phich_resource: p.phich_resource,
        sfn: period_base,
    };
    let payload = pack_mib_bits(&mib);
    let mut crc = crc16_bits(&payload);
    apply_port_mask(&mut crc, p.n_ports);
    let mut c = payload.to_vec();
    c.extend_from_slice(&crc);
    let e = rate_match(&conv_encode(&c), m_bit);
    let scr = lte_pn(p.n_id_cell() as u32, m_bit);
    let syms: Vec<Complex64> = e
        .iter()
        .zip(scr.iter())
        .map(|(&b, &s)| b ^ s)
        .collect::<Vec<u8>>()
        .chunks_exact(2)
        .map(|pair| {
            Complex64::new(
                FRAC_1_SQRT_2 * (1.0 - 2.0 * pair[0] as f64),
                FRAC_1_SQRT_2 * (1.0 - 2.0 * pair[1] as f64),
            )
        })
        .collect();
    let n_re_frame = m_bit / 2 / 4;
    let seg_syms = &syms[segment * n_re_frame..(segment + 1) * n_re_frame];

    // Resource elements in the same order the receiver extracts them
    let v3 = (p.n_id_cell() % 3) as usize;
    let mut positions = Vec::with_capacity(n_re_frame);
    for sym in 0..4usize {
        for sc in 0..72usize {
            if sc % 3 == v3 && (sym == 0 || sym == 1 || (sym == 3 && n_symb == 6)) {
                continue;
            }
            positions.push((sym, sc));
        }
    }
    assert_eq!(positions.len(), n_re_frame);

    for pair in 0..n_re_frame / 2 {
        let x1 = seg_syms[2 * pair];
        let x2 = seg_syms[2 * pair + 1];
        // Two or four ports transmit the space-frequency block code; with
        // flat unit channels the received pair is the sum over ports
        let (v1, v2) = if p.n_ports == 1 {
            (x1, x2)
        } else {
            (
                (x1 - x2.conj()) * FRAC_1_SQRT_2,
                (x2 + x1.conj()) * FRAC_1_SQRT_2,
            )
        };
        let (sym1, sc1) = positions[2 * pair];
        let (sym2, sc2) = positions[2 * pair + 1];
        grid[n_symb + sym1][sc1] = v1;
        grid[n_symb + sym2][sc2] = v2;
    }

    grid
}

/// Generate `n_frames` frames of baseband at 1.92 Msps
pub fn synthesize(p: &SynthParams) -> Vec<Complex64> {
    let n_symb = p.cp_type.n_symb_dl();
    let rs_dl = RsDl::new(p.n_id_cell(), p.cp_type);
    let mut out = Vec::with_capacity(p.n_frames * FRAME_LEN);
    for fi in 0..p.n_frames {
        let sfn = (p.sfn0 + fi as u16) % 1024;
        let grid = frame_grid(p, &rs_dl, sfn);
        for slot in 0..20 {
            for sym in 0..n_symb {
                let row = &grid[slot * n_symb + sym];
                let mut spec = vec![Complex64::default(); 128];
                for (col, &v) in row.iter().enumerate() {
                    let cn = if col < 36 { col as i32 - 36 } else { col as i32 - 35 };
                    spec[((cn + 128) % 128) as usize] = v;
                }
                let td = idft128(&spec);
                let cp = p.cp_type.cp_len(sym);
                out.extend(td[128 - cp..].iter().map(|v| v * p.amplitude));
                out.extend(td.iter().map(|v| v * p.amplitude));
            }
        }
    }

    if p.freq_offset != 0.0 {
        let fs = 1.92e6;
        for (n, v) in out.iter_mut().enumerate() {
            *v *= Complex64::from_polar(
                1.0,
                2.0 * std::f64::consts::PI * p.freq_offset * n as f64 / fs,
            );
        }
    }
    out
}

/// Add white Gaussian noise at the given SNR (dB, relative to the average
/// signal power), deterministically seeded.
pub fn awgn(signal: &mut [Complex64], snr_db: f64, seed: u64) {
    let p_sig = sigpower(signal);
    let p_noise = p_sig / 10.0_f64.powf(snr_db / 10.0);
    let dist = Normal::new(0.0, (p_noise / 2.0).sqrt()).unwrap();
    let mut rng = StdRng::seed_from_u64(seed);
    for v in signal.iter_mut() {
        *v += Complex64::new(dist.sample(&mut rng), dist.sample(&mut rng));
    }
}

/// Convenience checks shared by the scenarios
pub fn assert_identity(cell: &Cell, p: &SynthParams) {
    assert_eq!(cell.n_id_2, p.n_id_2);
    let sync = cell.sync.as_ref().expect("sync parameters missing");
    assert_eq!(sync.n_id_1, p.n_id_1);
    assert_eq!(sync.cp_type, p.cp_type);
    assert_eq!(sync.duplex_mode, p.duplex_mode);
    assert_eq!(cell.n_id_cell(), Some(p.n_id_cell()));
}
