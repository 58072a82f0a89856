//! Channel Estimation and Hexagonal Interpolation
//!
//! Raw channel estimates are taken at the reference-symbol positions of one
//! antenna port, smoothed with a seven-point stencil over the hexagonal RS
//! lattice, and interpolated onto the full grid by walking Delaunay-style
//! triangles between adjacent RS rows.

use crate::dsp::interp1;
use crate::grid::Arr2;
use crate::rs_dl::RsDl;
use common::types::SyncInfo;
use num_complex::Complex64;

/// OFDM symbol rows that carry reference symbols for a port
fn rs_row_set(n_ofdm: usize, n_symb_dl: usize, port: usize) -> Vec<usize> {
    if port <= 1 {
        let mut set: Vec<usize> = (0..n_ofdm)
            .step_by(n_symb_dl)
            .chain((n_symb_dl - 3..n_ofdm).step_by(n_symb_dl))
            .collect();
        set.sort_unstable();
        set
    } else {
        (1..n_ofdm).step_by(n_symb_dl).collect()
    }
}

/// Channel estimate for one antenna-port hypothesis: the full-grid estimate
/// and the noise power implied by the smoothing residual.
pub fn chan_est(
    sync: &SyncInfo,
    rs_dl: &RsDl,
    tfg: &Arr2<Complex64>,
    port: usize,
) -> (Arr2<Complex64>, f64) {
    let n_symb_dl = sync.cp_type.n_symb_dl();
    let n_ofdm = tfg.rows();
    let rs_set = rs_row_set(n_ofdm, n_symb_dl, port);
    let n_rs_ofdm = rs_set.len();

    // Raw estimates, 12 per RS-bearing symbol
    let mut ce_raw: Arr2<Complex64> = Arr2::new(n_rs_ofdm, 12);
    let mut shift = [0usize; 2];
    let mut slot_num = 0usize;
    for (t, &row_idx) in rs_set.iter().enumerate() {
        let sym_num = row_idx % n_symb_dl;
        let sh = rs_dl.shift(slot_num % 20, sym_num, port);
        if t <= 1 {
            shift[t] = sh;
        }
        let rs = rs_dl.rs(slot_num, sym_num);
        let row = tfg.row(row_idx);
        for m in 0..12 {
            *ce_raw.at_mut(t, m) = row[sh + 6 * m] * rs[m].conj();
        }
        if (t & 1 == 1) || port >= 2 {
            slot_num = (slot_num + 1) % 20;
        }
    }

    // Seven-point hexagonal smoothing:
    //
    //   1   2   3   4   5   6
    //     7   8   9   A   B
    //   C   D   E   F   G   H
    //
    // the filtered estimate at 8 averages 2, 3, 7, 8, 9, D and E.
    let mut ce_filt: Arr2<Complex64> = Arr2::new(n_rs_ofdm, 12);
    let mut current_row_leftmost = shift[0] < shift[1];
    for t in 0..n_rs_ofdm {
        for k in 0..12usize {
            let own: Vec<usize> = [k.wrapping_sub(1), k, k + 1]
                .into_iter()
                .filter(|&i| i < 12)
                .collect();
            let mut total: Complex64 = own.iter().map(|&i| ce_raw.at(t, i)).sum();
            let mut n_total = own.len();

            let neigh: Vec<usize> = if shift[0] == shift[1] {
                own.clone()
            } else if current_row_leftmost {
                [k.wrapping_sub(1), k].into_iter().filter(|&i| i < 12).collect()
            } else {
                [k, k + 1].into_iter().filter(|&i| i < 12).collect()
            };
            if t != 0 {
                total += neigh.iter().map(|&i| ce_raw.at(t - 1, i)).sum::<Complex64>();
                n_total += neigh.len();
            }
            if t != n_rs_ofdm - 1 {
                total += neigh.iter().map(|&i| ce_raw.at(t + 1, i)).sum::<Complex64>();
                n_total += neigh.len();
            }
            *ce_filt.at_mut(t, k) = total / n_total as f64;
        }
        current_row_leftmost = !current_row_leftmost;
    }

    // Noise power from the smoothing residual
    let mut np = 0.0;
    for t in 0..n_rs_ofdm {
        for k in 0..12 {
            np += (ce_filt.at(t, k) - ce_raw.at(t, k)).norm_sqr();
        }
    }
    np /= (n_rs_ofdm * 12) as f64;

    let ce_tfg = ce_interp_hex(&ce_filt, &shift, n_ofdm, &rs_set);
    (ce_tfg, np)
}

/// Extrapolate the row edges so both ends carry a vertex at subcarriers 0
/// and 71.
fn hex_extend(row_x: &mut Vec<f64>, row_val: &mut Vec<Complex64>) {
    if row_x[0] != 0.0 {
        let v = row_val[0] - row_x[0] * (row_val[1] - row_val[0]) / (row_x[1] - row_x[0]);
        row_x.insert(0, 0.0);
        row_val.insert(0, v);
    }
    let n = row_x.len();
    if row_x[n - 1] != 71.0 {
        let v = row_val[n - 1]
            + (71.0 - row_x[n - 1]) * (row_val[n - 1] - row_val[n - 2])
                / (row_x[n - 1] - row_x[n - 2]);
        row_x.push(71.0);
        row_val.push(v);
    }
}

#[derive(Clone, Copy)]
struct Vertex {
    x_sc: f64,
    y_symnum: f64,
    val: Complex64,
}

/// Plane through three vertices: val = a*x + b*y + c. The third column of
/// the system is all ones, so a closed-form 2x2 solve suffices.
fn plane_through(v: &[Vertex; 3]) -> (Complex64, Complex64, Complex64) {
    let (x0, y0) = (v[0].x_sc, v[0].y_symnum);
    let det = (v[1].x_sc - x0) * (v[2].y_symnum - y0)
        - (v[1].y_symnum - y0) * (v[2].x_sc - x0);
    let dv1 = v[1].val - v[0].val;
    let dv2 = v[2].val - v[0].val;
    let a = (dv1 * (v[2].y_symnum - y0) - dv2 * (v[1].y_symnum - y0)) / det;
    let b = (dv2 * (v[1].x_sc - x0) - dv1 * (v[2].x_sc - x0)) / det;
    let c = v[0].val - a * x0 - b * y0;
    (a, b, c)
}

/// Interpolate the filtered hexagonal lattice onto the full grid by walking
/// triangles left to right between each pair of adjacent RS rows.
fn ce_interp_hex(
    ce_filt: &Arr2<Complex64>,
    shift: &[usize; 2],
    n_ofdm: usize,
    rs_set: &[usize],
) -> Arr2<Complex64> {
    let n_rs_ofdm = rs_set.len();
    let mut ce_tfg: Arr2<Complex64> = Arr2::new(n_ofdm, 72);

    for t in 0..n_rs_ofdm - 1 {
        let mut top_row_x: Vec<f64> = (0..12)
            .map(|m| (shift[t & 1] + 6 * m) as f64)
            .collect();
        let mut top_row_val: Vec<Complex64> = ce_filt.row(t).to_vec();
        hex_extend(&mut top_row_x, &mut top_row_val);
        let mut bot_row_x: Vec<f64> = (0..12)
            .map(|m| (shift[1 - (t & 1)] + 6 * m) as f64)
            .collect();
        let mut bot_row_val: Vec<Complex64> = ce_filt.row(t + 1).to_vec();
        hex_extend(&mut bot_row_x, &mut bot_row_val);

        // The first RS row itself is not covered by the triangle walk
        if t == 0 {
            let interped = interp1(&top_row_x, &top_row_val, 72);
            ce_tfg.row_mut(rs_set[0]).copy_from_slice(&interped);
        }

        let top_y = rs_set[t] as f64;
        let bot_y = rs_set[t + 1] as f64;
        let mut top_used;
        let mut bot_used;
        let mut tri: [Vertex; 3];
        if top_row_x[1] < bot_row_x[1] {
            tri = [
                Vertex { x_sc: top_row_x[0], y_symnum: top_y, val: top_row_val[0] },
                Vertex { x_sc: bot_row_x[0], y_symnum: bot_y, val: bot_row_val[0] },
                Vertex { x_sc: top_row_x[1], y_symnum: top_y, val: top_row_val[1] },
            ];
            top_used = 1;
            bot_used = 0;
        } else {
            tri = [
                Vertex { x_sc: bot_row_x[0], y_symnum: bot_y, val: bot_row_val[0] },
                Vertex { x_sc: top_row_x[0], y_symnum: top_y, val: top_row_val[0] },
                Vertex { x_sc: bot_row_x[1], y_symnum: bot_y, val: bot_row_val[1] },
            ];
            top_used = 0;
            bot_used = 1;
        }

        let spacing = rs_set[t + 1] - rs_set[t];
        let mut x_offset = vec![0usize; spacing + 1];
        loop {
            let (a_p, b_p, c_p) = plane_through(&tri);

            // Rightmost edge of the triangle: x = a_l * y + b_l
            let (x1, y1) = (tri[1].x_sc, tri[1].y_symnum);
            let (x2, y2) = (tri[2].x_sc, tri[2].y_symnum);
            let a_l = (x1 - x2) / (y1 - y2);
            let b_l = (y1 * x2 - y2 * x1) / (y1 - y2);

            // Paint every resource element under this triangle
            for r in 1..=spacing {
                let y = (rs_set[t] + r) as f64;
                while x_offset[r] < 72 && (x_offset[r] as f64) <= a_l * y + b_l {
                    *ce_tfg.at_mut(rs_set[t] + r, x_offset[r]) =
                        a_p * x_offset[r] as f64 + b_p * y + c_p;
                    x_offset[r] += 1;
                }
            }
            if x_offset[1..].iter().all(|&x| x == 72) {
                break;
            }

            // Advance whichever row supplied the right vertex
            if tri[2].y_symnum == top_y {
                tri[0] = tri[1];
                tri[1] = tri[2];
                bot_used += 1;
                tri[2] = Vertex {
                    x_sc: bot_row_x[bot_used],
                    y_symnum: bot_y,
                    val: bot_row_val[bot_used],
                };
            } else {
                tri[0] = tri[1];
                tri[1] = tri[2];
                top_used += 1;
                tri[2] = Vertex {
                    x_sc: top_row_x[top_used],
                    y_symnum: top_y,
                    val: top_row_val[top_used],
                };
            }
        }
    }

    // Rows outside the RS span replicate the nearest RS row
    for t in 0..rs_set[0] {
        let src = ce_tfg.row(rs_set[0]).to_vec();
        ce_tfg.row_mut(t).copy_from_slice(&src);
    }
    for t in rs_set[n_rs_ofdm - 1] + 1..n_ofdm {
        let src = ce_tfg.row(rs_set[n_rs_ofdm - 1]).to_vec();
        ce_tfg.row_mut(t).copy_from_slice(&src);
    }

    ce_tfg
}
