//! Sampling-PPM and Frequency Pre-Search
//!
//! Used when the sampling clock is independent of the LO (external mixer or
//! LNB front-ends). Before the full coarse search runs, a bank of
//! frequency-shifted PSS templates is slid over the first two radio frames;
//! templates that fire are then verified for half-frame periodicity across
//! the whole buffer, which yields the sampling-clock error in ppm and a
//! much smaller frequency search set.

use crate::constants::{FS_LTE, HALF_FRAME, N_PSS, PSS_TD_LEN};
use crate::dsp::fshift;
use crate::rom::ROM_TABLES;
use num_complex::Complex64;
use tracing::debug;

/// Correlation threshold on the squared magnitude of a unit-power window
/// against a unit-power template
pub const MOVING_CORR_TH: f64 = 25.0 * 265.1154;

/// Steps retained behind the first threshold crossing
const RING_DEPTH: usize = 64;

/// Search window around each predicted PSS location
const MAX_OFFSET: usize = 32;

/// Retained candidates per PSS index
const MAX_RESERVE_PER_PSS: usize = 8;

/// Bank of conjugated, frequency-shifted, unit-power PSS templates.
/// Row `pss_idx * num_fo + fo_idx` matches PSS `pss_idx` at frequency
/// offset `fo_search_set[fo_idx]`.
pub struct PssFoSet {
    templates: Vec<Vec<Complex64>>,
    num_fo: usize,
}

impl PssFoSet {
    pub fn num_rows(&self) -> usize {
        self.templates.len()
    }

    pub fn pss_idx(&self, row: usize) -> usize {
        row / self.num_fo
    }

    pub fn fo_idx(&self, row: usize) -> usize {
        row % self.num_fo
    }
}

/// Pre-generate the template bank at the nominal LTE/16 rate
pub fn pss_fo_set_gen(fo_search_set: &[f64]) -> PssFoSet {
    let sampling_rate = FS_LTE / 16.0;
    let num_fo = fo_search_set.len();
    let mut templates = Vec::with_capacity(N_PSS * num_fo);
    for pss_idx in 0..N_PSS {
        for &f_off in fo_search_set.iter() {
            let mut t = fshift(&ROM_TABLES.pss_td[pss_idx], f_off, sampling_rate);
            for v in t.iter_mut() {
                *v = v.conj();
            }
            // Unit average power per sample
            let energy: f64 = t.iter().map(|v| v.norm_sqr()).sum();
            let scale = (t.len() as f64 / energy).sqrt();
            for v in t.iter_mut() {
                *v *= scale;
            }
            templates.push(t);
        }
    }
    PssFoSet { templates, num_fo }
}

/// Squared correlation magnitudes of a unit-power window against every
/// template in `rows` (all rows when `rows` is `None`).
fn window_corr(
    s: &[Complex64],
    pos: usize,
    set: &PssFoSet,
    rows: Option<&[usize]>,
) -> Vec<f64> {
    let win = &s[pos..pos + PSS_TD_LEN];
    let energy: f64 = win.iter().map(|v| v.norm_sqr()).sum();
    let scale = if energy > 0.0 {
        (PSS_TD_LEN as f64 / energy).sqrt()
    } else {
        0.0
    };
    let run = |row: usize| -> f64 {
        let acc: Complex64 = set.templates[row]
            .iter()
            .zip(win.iter())
            .map(|(t, w)| t * w)
            .sum();
        (acc * scale).norm_sqr()
    };
    match rows {
        Some(rows) => rows.iter().map(|&r| run(r)).collect(),
        None => (0..set.num_rows()).map(run).collect(),
    }
}

/// One retained template hit from the moving correlation
#[derive(Debug, Clone, Copy)]
struct Hit {
    row: usize,
    time: usize,
    corr: f64,
}

/// Slide a unit-power window over `s` until any template crosses `th`, keep
/// sliding a little further, and return the strongest hits (best window
/// position per template) among templates within 2x of the best.
fn pss_moving_corr(s: &[Complex64], set: &PssFoSet, th: f64) -> Vec<Hit> {
    let n_rows = set.num_rows();
    let n_pos = s.len() - (PSS_TD_LEN - 1);
    // Ring of recent correlation rows, newest first
    let mut ring: Vec<Vec<f64>> = Vec::new();

    let mut crossing = None;
    for pos in 0..n_pos {
        let corr = window_corr(s, pos, set, None);
        ring.insert(0, corr);
        ring.truncate(2 * RING_DEPTH + 1);
        if ring[0].iter().any(|&c| c > th) {
            crossing = Some(pos);
            break;
        }
    }
    let Some(cross_pos) = crossing else {
        return Vec::new();
    };

    let last_pos = (cross_pos + RING_DEPTH).min(n_pos - 1);
    for pos in cross_pos + 1..=last_pos {
        let corr = window_corr(s, pos, set, None);
        ring.insert(0, corr);
        ring.truncate(2 * RING_DEPTH + 1);
    }

    // Best position per template over the retained ring
    let mut hits: Vec<Hit> = (0..n_rows)
        .map(|row| {
            let mut best = (0usize, f64::NEG_INFINITY);
            for (back, corr) in ring.iter().enumerate() {
                if corr[row] > best.1 {
                    best = (back, corr[row]);
                }
            }
            Hit {
                row,
                time: last_pos - best.0,
                corr: best.1,
            }
        })
        .collect();
    hits.sort_by(|a, b| b.corr.total_cmp(&a.corr));

    // Keep templates within 2x of the strongest, at most 8 per PSS index
    let floor = hits[0].corr / 2.0;
    hits.retain(|h| h.corr >= floor);
    let mut kept = Vec::new();
    let mut per_pss = [0usize; N_PSS];
    for h in hits {
        let p = set.pss_idx(h.row);
        if per_pss[p] < MAX_RESERVE_PER_PSS {
            per_pss[p] += 1;
            kept.push(h);
        }
    }
    kept
}

/// Correlate the retained templates inside a fixed window and return the
/// peak position and value for each.
fn pss_fix_location_corr(
    s: &[Complex64],
    start: usize,
    end: usize,
    set: &PssFoSet,
    rows: &[usize],
) -> Vec<(usize, f64)> {
    let mut best = vec![(start, f64::NEG_INFINITY); rows.len()];
    for pos in start..=end {
        let corr = window_corr(s, pos, set, Some(rows));
        for (b, &c) in best.iter_mut().zip(corr.iter()) {
            if c > b.1 {
                *b = (pos, c);
            }
        }
    }
    best
}

/// Per-candidate periodicity record
struct Track {
    hit: Hit,
    times: Vec<usize>,
    corrs: Vec<f64>,
    valid: Vec<bool>,
}

/// Estimate the sampling-clock error and refine the frequency search set.
///
/// On success the search set is replaced with the surviving frequency
/// candidates (plus up to one candidate per unrepresented PSS index) and the
/// ppm estimate is returned. When nothing crosses the threshold or no valid
/// hit sequence exists, NaN is returned and the set is left unchanged; the
/// caller falls back to the full-grid coarse search.
pub fn sampling_ppm_f_search_set_by_pss(
    s: &[Complex64],
    set: &PssFoSet,
    fo_search_set: &mut Vec<f64>,
) -> f64 {
    let two_frames = (2 * 2 * HALF_FRAME).min(s.len());
    let hits = pss_moving_corr(&s[..two_frames], set, MOVING_CORR_TH);
    if hits.is_empty() {
        debug!("no PSS correlation above the pre-search threshold");
        return f64::NAN;
    }

    // Step forward in half-frame multiples, re-acquiring each hit inside a
    // +-32 sample window; misses are replaced by their prediction.
    let mut tracks: Vec<Track> = hits
        .iter()
        .map(|&hit| Track {
            hit,
            times: vec![hit.time],
            corrs: vec![hit.corr],
            valid: vec![true],
        })
        .collect();
    let rows: Vec<usize> = hits.iter().map(|h| h.row).collect();
    let max_pos = s.len() - PSS_TD_LEN;
    loop {
        let next: Vec<usize> = tracks
            .iter()
            .map(|t| t.times[t.times.len() - 1] + HALF_FRAME)
            .collect();
        let lo = next.iter().min().copied().unwrap_or(0);
        let hi = next.iter().max().copied().unwrap_or(0);
        if hi + MAX_OFFSET > max_pos - 1 {
            break;
        }
        let found = pss_fix_location_corr(s, lo - MAX_OFFSET, hi + MAX_OFFSET, set, &rows);
        for ((track, &(time, corr)), &predicted) in
            tracks.iter_mut().zip(found.iter()).zip(next.iter())
        {
            let ok = corr >= MOVING_CORR_TH * 0.75;
            track.times.push(if ok { time } else { predicted });
            track.corrs.push(corr);
            track.valid.push(ok);
        }
    }

    // Fit ppm per candidate from the first and last valid hits
    let min_span = s.len() / HALF_FRAME / 2;
    struct PpmFit {
        track_idx: usize,
        ppm: f64,
    }
    let mut fits: Vec<PpmFit> = Vec::new();
    for (i, track) in tracks.iter().enumerate() {
        let first = track.valid.iter().position(|&v| v);
        let last = track.valid.iter().rposition(|&v| v);
        let (Some(sp), Some(ep)) = (first, last) else {
            continue;
        };
        if ep - sp < min_span {
            continue;
        }
        let distance = (track.times[ep] - track.times[sp]) as f64;
        let expected = (HALF_FRAME * (ep - sp)) as f64;
        fits.push(PpmFit {
            track_idx: i,
            ppm: 1.0e6 * (distance - expected) / expected,
        });
    }
    if fits.is_empty() {
        debug!("no valid PSS hit sequence in the pre-search");
        return f64::NAN;
    }

    let freq_of = |track_idx: usize| fo_search_set[set.fo_idx(tracks[track_idx].hit.row)];
    let pss_of = |track_idx: usize| set.pss_idx(tracks[track_idx].hit.row);
    let sum_corr = |track_idx: usize| -> f64 {
        let t = &tracks[track_idx];
        t.corrs
            .iter()
            .zip(t.valid.iter())
            .filter(|(_, &v)| v)
            .map(|(&c, _)| c)
            .sum()
    };

    if fits.len() == 1 {
        let ppm = fits[0].ppm;
        *fo_search_set = vec![freq_of(fits[0].track_idx)];
        debug!("pre-search: single candidate, ppm {:.2}", ppm);
        return ppm;
    }

    if fits.len() == 2 {
        let ppm = (fits[0].ppm + fits[1].ppm) / 2.0;
        if ((fits[1].ppm - fits[0].ppm) / fits[0].ppm).abs() > 1.0 / 20.0 {
            // Disagreement: keep both frequency candidates
            let mut freqs = vec![freq_of(fits[0].track_idx), freq_of(fits[1].track_idx)];
            freqs.dedup_by(|a, b| a == b);
            *fo_search_set = freqs;
            debug!("pre-search: two disagreeing candidates, ppm {:.2}", ppm);
            return ppm;
        }
    }

    // Three or more (or two agreeing): optionally drop the single largest
    // outlier, unless that would discard too large a share of the points.
    let mut kept: Vec<usize> = (0..fits.len()).collect();
    let mut dropped: Vec<usize> = Vec::new();
    let ppms: Vec<f64> = fits.iter().map(|f| f.ppm).collect();
    let mean = ppms.iter().sum::<f64>() / ppms.len() as f64;
    let var = ppms.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / (ppms.len() - 1) as f64;
    let mut extra_frequency = false;
    if fits.len() >= 3 && var > 0.01 {
        let outlier = (0..fits.len())
            .max_by(|&a, &b| (ppms[a] - mean).abs().total_cmp(&(ppms[b] - mean).abs()))
            .unwrap_or(0);
        let n_drop = ppms
            .iter()
            .filter(|&&p| p == ppms[outlier])
            .count();
        if (n_drop as f64) >= (fits.len() as f64) * 3.0 / 8.0 {
            debug!("pre-search: too many ppm outliers, keeping all candidates");
            extra_frequency = true;
        } else {
            kept.retain(|&i| ppms[i] != ppms[outlier]);
            dropped = (0..fits.len()).filter(|i| !kept.contains(i)).collect();
        }
    }
    let ppm = kept.iter().map(|&i| ppms[i]).sum::<f64>() / kept.len() as f64;

    // Choose the frequency with the strongest accumulated correlation
    let best_kept = kept
        .iter()
        .copied()
        .max_by(|&a, &b| {
            sum_corr(fits[a].track_idx).total_cmp(&sum_corr(fits[b].track_idx))
        })
        .unwrap_or(0);
    let mut chosen_tracks = vec![fits[best_kept].track_idx];
    if extra_frequency {
        // Also carry the strongest candidate from the outlier group
        let pool: Vec<usize> = if dropped.contains(&best_kept) {
            kept.clone()
        } else {
            dropped.clone()
        };
        if let Some(extra) = pool.iter().copied().max_by(|&a, &b| {
            sum_corr(fits[a].track_idx).total_cmp(&sum_corr(fits[b].track_idx))
        }) {
            chosen_tracks.push(fits[extra].track_idx);
        }
    }

    // Guarantee one candidate per PSS index that fired at all
    let represented: Vec<usize> = chosen_tracks.iter().map(|&t| pss_of(t)).collect();
    for pss_idx in 0..N_PSS {
        if represented.contains(&pss_idx) {
            continue;
        }
        if let Some(extra) = fits
            .iter()
            .filter(|f| pss_of(f.track_idx) == pss_idx)
            .max_by(|a, b| sum_corr(a.track_idx).total_cmp(&sum_corr(b.track_idx)))
        {
            chosen_tracks.push(extra.track_idx);
        }
    }

    let mut freqs: Vec<f64> = chosen_tracks.iter().map(|&t| freq_of(t)).collect();
    freqs.sort_by(|a, b| a.total_cmp(b));
    freqs.dedup();
    debug!(
        "pre-search: ppm {:.2}, refined search set {:?}",
        ppm, freqs
    );
    *fo_search_set = freqs;
    ppm
}
