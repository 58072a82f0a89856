//! End-to-End Acquisition Scenarios
//!
//! Synthetic downlink signals with known parameters are pushed through the
//! full pipeline and every recovered field is checked.

mod synth;

use common::types::{CpType, DlBandwidth, DuplexMode, PhichDuration, PhichResource};
use common::CAPLENGTH;
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use searcher::constants::FRAME_LEN;
use searcher::{search_cells, SearcherConfig};
use synth::{assert_identity, awgn, synthesize, SynthParams};

const FC: f64 = 740e6;
const FS: f64 = 1.92e6;

/// Capture window into a synthesized stream, skipping into the first frame
/// so the buffer does not start on a frame boundary.
const WINDOW_OFFSET: usize = 2000;

/// Expected frame start, derived from the synthesis timing alone: the
/// synthesizer places frame boundaries at multiples of FRAME_LEN in the
/// stream, the capture starts WINDOW_OFFSET samples in, and the reported
/// frame start sits two samples inside the prefix.
const EXPECTED_FRAME_START: f64 = (FRAME_LEN - WINDOW_OFFSET) as f64 - 2.0;

fn window(stream: &[Complex64], offset: usize) -> Vec<Complex64> {
    stream[offset..offset + CAPLENGTH].to_vec()
}

fn narrow_config() -> SearcherConfig {
    SearcherConfig {
        f_search_set: vec![-10e3, -5e3, 0.0, 5e3, 10e3],
        ..Default::default()
    }
}

#[test]
fn clean_fdd_normal_one_port() {
    let params = SynthParams::default(); // n_id 76, 50 RB, FDD, normal CP
    let stream = synthesize(&params);
    let capbuf = window(&stream, WINDOW_OFFSET);

    let out = search_cells(&capbuf, FC, FC, FS, &narrow_config()).unwrap();
    assert_eq!(out.cells.len(), 1);
    let cell = &out.cells[0];
    assert_identity(cell, &params);

    // Coarse timing and frequency
    assert_eq!(cell.freq, 0.0);
    assert!((cell.ind as i64 - 8423).abs() <= 1, "ind = {}", cell.ind);

    // Frame start lands just inside the prefix of the first full frame
    let sync = cell.sync.as_ref().unwrap();
    assert!(
        (sync.frame_start - EXPECTED_FRAME_START).abs() <= 2.0,
        "frame_start = {}",
        sync.frame_start
    );
    assert!(sync.frame_start >= -0.5 && sync.frame_start < 2.0 * 9600.0 - 0.5);

    // Frequency estimates converge to zero on a clean signal
    let fine = cell.freq_fine.unwrap();
    let superfine = cell.freq_superfine.unwrap();
    assert!(fine.abs() < 100.0, "freq_fine = {}", fine);
    assert!(superfine.abs() < 50.0, "freq_superfine = {}", superfine);
    // Super-fine FOE is idempotent when no frequency error remains
    assert!((superfine - fine).abs() < 10.0);

    // Full MIB
    let mib = cell.mib.as_ref().expect("MIB decode failed");
    assert_eq!(mib.n_ports, 1);
    assert_eq!(mib.bandwidth, DlBandwidth::Rb50);
    assert_eq!(mib.phich_duration, PhichDuration::Normal);
    assert_eq!(mib.phich_resource, PhichResource::OneSixth);
    assert_eq!(mib.sfn, 200);
}

#[test]
fn large_frequency_offset_with_presearch() {
    let params = SynthParams {
        freq_offset: 47e3,
        ..Default::default()
    };
    let stream = synthesize(&params);
    let capbuf = window(&stream, WINDOW_OFFSET);

    // Independent clock: the ppm pre-search shrinks the grid first
    let config = SearcherConfig {
        sampling_carrier_twist: false,
        ..Default::default()
    };
    let out = search_cells(&capbuf, FC, FC, FS, &config).unwrap();
    assert!(!out.cells.is_empty());
    let cell = &out.cells[0];
    assert_identity(cell, &params);

    assert!(out.diagnostics.ppm.is_finite());
    assert!(out.diagnostics.ppm.abs() < 5.0, "ppm = {}", out.diagnostics.ppm);

    assert_eq!(cell.freq, 45e3);
    let fine = cell.freq_fine.unwrap();
    assert!((fine - 47e3).abs() < 200.0, "freq_fine = {}", fine);
    let superfine = cell.freq_superfine.unwrap();
    assert!((superfine - 47e3).abs() < 20.0, "freq_superfine = {}", superfine);

    let mib = cell.mib.as_ref().expect("MIB decode failed");
    assert_eq!(mib.sfn, 200);
}

#[test]
fn tdd_extended_cp_two_ports() {
    let params = SynthParams {
        n_id_1: 100,
        n_id_2: 2,
        cp_type: CpType::Extended,
        duplex_mode: DuplexMode::Tdd,
        n_ports: 2,
        bandwidth: DlBandwidth::Rb25,
        phich_resource: PhichResource::Half,
        ..Default::default()
    };
    let stream = synthesize(&params);
    let capbuf = window(&stream, WINDOW_OFFSET);

    let config = SearcherConfig {
        f_search_set: vec![-5e3, 0.0, 5e3],
        ..Default::default()
    };
    let out = search_cells(&capbuf, FC, FC, FS, &config).unwrap();
    assert!(!out.cells.is_empty());
    let cell = &out.cells[0];
    assert_identity(cell, &params);
    assert!((cell.ind as i64 - 263).abs() <= 1, "ind = {}", cell.ind);

    let sync = cell.sync.as_ref().unwrap();
    assert_eq!(sync.duplex_mode, DuplexMode::Tdd);
    assert_eq!(sync.cp_type, CpType::Extended);
    assert!(
        (sync.frame_start - EXPECTED_FRAME_START).abs() <= 2.0,
        "frame_start = {}",
        sync.frame_start
    );

    // The two-port CRC mask must have been applied for this to decode
    let mib = cell.mib.as_ref().expect("MIB decode failed");
    assert_eq!(mib.n_ports, 2);
    assert_eq!(mib.bandwidth, DlBandwidth::Rb25);
    assert_eq!(mib.phich_resource, PhichResource::Half);
    assert_eq!(mib.sfn, 200);
}

#[test]
fn low_snr_acquisition() {
    let params = SynthParams::default();
    let stream = synthesize(&params);
    let mut capbuf = window(&stream, WINDOW_OFFSET);
    awgn(&mut capbuf, -9.0, 1);

    let config = SearcherConfig {
        f_search_set: vec![-5e3, 0.0, 5e3],
        ..Default::default()
    };
    let out = search_cells(&capbuf, FC, FC, FS, &config).unwrap();
    assert!(!out.cells.is_empty(), "no cell found at -9 dB");
    let cell = &out.cells[0];
    assert_identity(cell, &params);
    let mib = cell.mib.as_ref().expect("MIB decode failed at -9 dB");
    assert_eq!(mib.sfn, 200);
    assert_eq!(mib.bandwidth, DlBandwidth::Rb50);
}

#[test]
fn two_cells_strongest_first() {
    let a = SynthParams::default();
    let b = SynthParams {
        n_id_1: 30,
        n_id_2: 0,
        // 6 dB below cell A
        amplitude: 10.0_f64.powf(-6.0 / 20.0),
        ..Default::default()
    };
    let stream_a = synthesize(&a);
    let stream_b = synthesize(&b);
    // Different timing: cell B's frames are shifted 3000 samples early
    let capbuf: Vec<Complex64> = (0..CAPLENGTH)
        .map(|i| stream_a[WINDOW_OFFSET + i] + stream_b[WINDOW_OFFSET + 3000 + i])
        .collect();

    let config = SearcherConfig {
        f_search_set: vec![-5e3, 0.0, 5e3],
        ..Default::default()
    };
    let out = search_cells(&capbuf, FC, FC, FS, &config).unwrap();
    assert!(out.cells.len() >= 2, "found {} cells", out.cells.len());

    // Strict ordering by raw peak power
    for pair in out.cells.windows(2) {
        assert!(pair[0].pss_pow >= pair[1].pss_pow);
    }
    assert_identity(&out.cells[0], &a);
    assert_identity(&out.cells[1], &b);
    assert!(out.cells[0].pss_pow > 2.0 * out.cells[1].pss_pow);
}

#[test]
fn noise_only_stays_silent() {
    let dist = Normal::new(0.0, std::f64::consts::FRAC_1_SQRT_2).unwrap();
    let mut rng = StdRng::seed_from_u64(7);
    let capbuf: Vec<Complex64> = (0..CAPLENGTH)
        .map(|_| Complex64::new(dist.sample(&mut rng), dist.sample(&mut rng)))
        .collect();

    let out = search_cells(&capbuf, FC, FC, FS, &narrow_config()).unwrap();
    assert!(
        out.cells.is_empty(),
        "false positives on pure noise: {:?}",
        out.cells
    );
}

#[test]
fn pure_pss_template_is_located_exactly() {
    use searcher::grid::Arr2;
    use searcher::pss;
    use searcher::rom::ROM_TABLES;

    let f_set = vec![0.0, 5e3];
    let f_true = 5e3;
    let inject_at = 4000usize;

    for p in 0..3u8 {
        // A train of frequency-shifted templates every half frame over a
        // small noise floor
        let mut capbuf = vec![Complex64::new(1e-4, -1e-4); CAPLENGTH];
        let shifted = searcher::dsp::fshift(&ROM_TABLES.pss_td[p as usize], f_true, FS);
        let mut pos = inject_at;
        while pos + shifted.len() <= CAPLENGTH {
            for (m, &v) in shifted.iter().enumerate() {
                capbuf[pos + m] += v;
            }
            pos += 9600;
        }

        let xc = pss::xc_correlate(&capbuf, &f_set, FC, FC, FS, true, 1.0);
        let (single, n_comb_xc) = pss::xc_combine(&xc, &f_set, FC, FC, FS, true, 1.0);
        let combined = pss::xc_delay_spread(&single, 2);
        let (_sp, sp_incoherent, _n) = pss::sp_est(&capbuf);
        let (pow, frq): (Arr2<f64>, Arr2<usize>) = pss::xc_peak_freq(&combined);
        let z_th1 = pss::detection_threshold(&sp_incoherent, n_comb_xc, 2, 9.0);
        let cells = pss::peak_search(&pow, &frq, &z_th1, &f_set, FC, FC, &single, 2);

        assert!(!cells.is_empty(), "template {} not detected", p);
        assert_eq!(cells[0].n_id_2, p);
        assert_eq!(cells[0].freq, f_true);
        assert!(
            (cells[0].ind as i64 - inject_at as i64).abs() <= 1,
            "template {} located at {}",
            p,
            cells[0].ind
        );
    }
}
