//! Shared DSP Primitives
//!
//! Frequency shifting, the 128-point DFT used everywhere in the pipeline,
//! and a handful of small vector helpers.

use crate::constants::{N_FFT, N_SC_SYNC};
use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::f64::consts::PI;
use std::sync::Arc;

/// Multiply a sequence by a complex exponential of frequency `f` Hz at
/// sample rate `fs`, phase zero at the first sample.
pub fn fshift(x: &[Complex64], f: f64, fs: f64) -> Vec<Complex64> {
    let step = 2.0 * PI * f / fs;
    x.iter()
        .enumerate()
        .map(|(n, &v)| v * Complex64::from_polar(1.0, step * n as f64))
        .collect()
}

/// In-place variant of [`fshift`]
pub fn fshift_inplace(x: &mut [Complex64], f: f64, fs: f64) {
    let step = 2.0 * PI * f / fs;
    for (n, v) in x.iter_mut().enumerate() {
        *v *= Complex64::from_polar(1.0, step * n as f64);
    }
}

/// Cached unnormalised forward 128-point DFT
pub struct Dft128 {
    fft: Arc<dyn Fft<f64>>,
}

impl Default for Dft128 {
    fn default() -> Self {
        Self::new()
    }
}

impl Dft128 {
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        Self {
            fft: planner.plan_fft_forward(N_FFT),
        }
    }

    /// Transform exactly 128 samples
    pub fn run(&self, input: &[Complex64]) -> Vec<Complex64> {
        debug_assert_eq!(input.len(), N_FFT);
        let mut buf = input.to_vec();
        self.fft.process(&mut buf);
        buf
    }
}

/// Unnormalised inverse 128-point DFT scaled by 1/N, the exact inverse of
/// [`Dft128::run`]. Used by the ROM template construction and the tests.
pub fn idft128(spectrum: &[Complex64]) -> Vec<Complex64> {
    debug_assert_eq!(spectrum.len(), N_FFT);
    let mut planner = FftPlanner::new();
    let ifft = planner.plan_fft_inverse(N_FFT);
    let mut buf = spectrum.to_vec();
    ifft.process(&mut buf);
    for v in buf.iter_mut() {
        *v /= N_FFT as f64;
    }
    buf
}

/// Average power of a sequence
pub fn sigpower(x: &[Complex64]) -> f64 {
    if x.is_empty() {
        return 0.0;
    }
    x.iter().map(|v| v.norm_sqr()).sum::<f64>() / x.len() as f64
}

/// Circularly shift a vector right by `n` positions
pub fn tshift_right<T: Copy>(x: &mut [T], n: usize) {
    let len = x.len();
    if len > 0 {
        x.rotate_right(n % len);
    }
}

/// Frequency-shift a 128-sample window, undo a two-sample-early DFT
/// placement by circular rotation, transform, and keep the 62 sync
/// subcarriers `[-31..-1, 1..31]`.
///
/// The two-sample rotation pairs with the convention that sync DFTs are
/// taken two samples inside the cyclic prefix.
pub fn extract_psss(
    window: &[Complex64],
    foc_freq: f64,
    k_factor: f64,
    fs_programmed: f64,
    dft: &Dft128,
) -> Vec<Complex64> {
    let mut shifted = fshift(window, foc_freq, fs_programmed * k_factor);
    shifted.rotate_left(2);
    let spectrum = dft.run(&shifted);
    let mut out = Vec::with_capacity(N_SC_SYNC);
    out.extend_from_slice(&spectrum[N_FFT - 31..]);
    out.extend_from_slice(&spectrum[1..32]);
    out
}

/// Linear interpolation of complex samples `(xs, ys)` onto integer points
/// `0..n`. The sample abscissae must be strictly increasing and span the
/// evaluation range.
pub fn interp1(xs: &[f64], ys: &[Complex64], n: usize) -> Vec<Complex64> {
    debug_assert_eq!(xs.len(), ys.len());
    debug_assert!(xs.len() >= 2);
    let mut out = Vec::with_capacity(n);
    let mut seg = 0usize;
    for i in 0..n {
        let x = i as f64;
        while seg + 2 < xs.len() && x > xs[seg + 1] {
            seg += 1;
        }
        let (x0, x1) = (xs[seg], xs[seg + 1]);
        let t = (x - x0) / (x1 - x0);
        out.push(ys[seg] * (1.0 - t) + ys[seg + 1] * t);
    }
    out
}
