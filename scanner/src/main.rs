//! LTE Cell Scanner CLI
//!
//! Sweeps a carrier range (or replays a capture file), runs the blind
//! acquisition pipeline on each capture buffer and reports every cell
//! found.

use anyhow::{Context, Result};
use clap::Parser;
use common::types::{Cell, DuplexMode};
use common::utils::db10;
use capture::source::{capture, CaptureConfig};
use searcher::search_cells;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

mod config;
use config::ScanConfig;

/// Carrier raster the sweep walks on
const SWEEP_STEP: f64 = 100e3;

/// LTE downlink cell scanner
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// First center frequency to search, Hz
    #[arg(short = 's', long)]
    freq_start: Option<f64>,

    /// Last center frequency to search, Hz (defaults to freq-start)
    #[arg(short = 'e', long)]
    freq_end: Option<f64>,

    /// Crystal correction factor in ppm
    #[arg(short = 'i', long, default_value_t = 0.0)]
    correction: f64,

    /// Replay IQ samples from a .bin capture file
    #[arg(short = 'l', long)]
    load: Option<PathBuf>,

    /// Record the capture buffer to a .bin file
    #[arg(short = 'r', long)]
    record: Option<PathBuf>,

    /// Path to a YAML parameter file
    #[arg(short = 'c', long)]
    config: Option<String>,

    /// Dump the full cell records as YAML after the report
    #[arg(long)]
    dump: bool,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    fmt().with_env_filter(env_filter).with_target(true).init();

    let scan_config = match &args.config {
        Some(path) => {
            info!("loading parameters from {}", path);
            ScanConfig::from_yaml_file(path)?
        }
        None => ScanConfig::default(),
    };
    let searcher_config = scan_config.searcher_config();

    // Replay runs once; a live sweep walks the 100 kHz carrier raster
    let sweep: Vec<Option<f64>> = match (&args.load, args.freq_start) {
        (Some(_), fc) => vec![fc],
        (None, Some(start)) => {
            let end = args.freq_end.unwrap_or(start);
            if end < start {
                anyhow::bail!("freq-end {} is below freq-start {}", end, start);
            }
            let n = ((end - start) / SWEEP_STEP).round() as usize;
            (0..=n).map(|k| Some(start + k as f64 * SWEEP_STEP)).collect()
        }
        (None, None) => {
            anyhow::bail!("either --freq-start or --load must be given")
        }
    };

    let mut cells: Vec<Cell> = Vec::new();
    for fc in sweep {
        let cap_config = CaptureConfig {
            fc_requested: fc.unwrap_or(f64::NAN),
            correction: args.correction,
            record_path: args.record.clone(),
            load_path: args.load.clone(),
            read_all: false,
        };
        let cap = capture(&cap_config, None)
            .context("failed to acquire a capture buffer")?;

        info!(
            "searching fc {:.3} MHz ({} samples)",
            cap.fc_requested / 1e6,
            cap.samples.len()
        );
        let output = search_cells(
            &cap.samples,
            cap.fc_requested,
            cap.fc_programmed,
            cap.fs_programmed,
            &searcher_config,
        )?;
        if output.diagnostics.ppm.is_finite() {
            info!("sampling clock error: {:.3} ppm", output.diagnostics.ppm);
        }
        cells.extend(output.cells);
    }

    // Neighbouring tuned centers bracket the same cell; keep the strongest
    // record per (identity, true frequency)
    cells.sort_by(|a, b| b.pss_pow.total_cmp(&a.pss_pow));
    let mut seen: Vec<(Option<u16>, i64)> = Vec::new();
    cells.retain(|c| {
        let key = (c.n_id_cell(), (c.fc_true() / SWEEP_STEP).round() as i64);
        if seen.contains(&key) {
            false
        } else {
            seen.push(key);
            true
        }
    });

    report(&cells);
    if args.dump {
        println!("{}", serde_yaml::to_string(&cells)?);
    }
    Ok(())
}

/// Human-readable cell report, strongest first
fn report(cells: &[Cell]) {
    if cells.is_empty() {
        warn!("no cells found");
        return;
    }
    println!(
        "{:>7} {:>4} {:>9} {:>6} {:>6} {:>6} {:>5} {:>12} {:>10} {:>9}",
        "cell-id", "dpx", "CP", "ports", "RB", "PHICH", "SFN", "fc-true/MHz", "f-off/Hz", "pow/dB"
    );
    for cell in cells {
        let (id, dpx, cp) = match &cell.sync {
            Some(s) => (
                format!("{}", 3 * s.n_id_1 + cell.n_id_2 as u16),
                match s.duplex_mode {
                    DuplexMode::Fdd => "FDD",
                    DuplexMode::Tdd => "TDD",
                },
                format!("{:?}", s.cp_type),
            ),
            None => (format!("? ({})", cell.n_id_2), "?", "?".into()),
        };
        let (ports, rb, phich, sfn) = match &cell.mib {
            Some(m) => (
                format!("{}", m.n_ports),
                format!("{}", m.bandwidth.n_rb_dl()),
                format!("{:?}", m.phich_resource),
                format!("{}", m.sfn),
            ),
            None => ("-".into(), "-".into(), "-".into(), "-".into()),
        };
        println!(
            "{:>7} {:>4} {:>9} {:>6} {:>6} {:>6} {:>5} {:>12.4} {:>10.0} {:>9.1}",
            id,
            dpx,
            cp,
            ports,
            rb,
            phich,
            sfn,
            cell.fc_true() / 1e6,
            cell.frequency_offset(),
            db10(cell.pss_pow)
        );
    }
}
