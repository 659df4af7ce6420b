// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! halo-run
//!
//! Partitions a lattice into slabs, runs one worker thread per slab over an
//! in-process mesh, and checks that every ghost record matches its owner after
//! the static exchange and after each dynamic step.
use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Cell, Table};
use halo_core::{LatticeDims, LatticeModel};
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod config;
mod run;

use config::{ConfigService, FsConfigStore, HaloRunConfig, RUN_CONFIG_KEY};
use run::WorkerReport;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModelArg {
    D3q15,
    D3q19,
    D3q27,
}

impl From<ModelArg> for LatticeModel {
    fn from(arg: ModelArg) -> Self {
        match arg {
            ModelArg::D3q15 => Self::D3Q15,
            ModelArg::D3q19 => Self::D3Q19,
            ModelArg::D3q27 => Self::D3Q27,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding `halo-run.json`; flags override its values
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Write the effective configuration back to the config directory
    #[arg(long, requires = "config_dir")]
    save_config: bool,

    /// Number of worker threads
    #[arg(short, long)]
    workers: Option<usize>,

    /// Lattice dimensions as NX,NY,NZ (or a single edge length)
    #[arg(long, value_parser = parse_dims)]
    dims: Option<LatticeDims>,

    /// Velocity set
    #[arg(long, value_enum)]
    model: Option<ModelArg>,

    /// Dynamic exchanges after the static one
    #[arg(short, long)]
    steps: Option<u32>,

    /// Ghost depth in sites
    #[arg(long)]
    halo_width: Option<u32>,

    /// Print reports as JSON instead of a table
    #[arg(long)]
    json: bool,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn parse_dims(raw: &str) -> Result<LatticeDims, String> {
    let parts = raw
        .split([',', 'x'])
        .map(|p| p.trim().parse::<u64>().map_err(|e| format!("{p:?}: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    match parts.as_slice() {
        [n] => Ok(LatticeDims::cube(*n)),
        [nx, ny, nz] => Ok(LatticeDims::new(*nx, *ny, *nz)),
        _ => Err(format!("expected 1 or 3 extents, got {}", parts.len())),
    }
}

fn load_config(args: &Args) -> Result<HaloRunConfig> {
    let mut cfg = match &args.config_dir {
        Some(dir) => ConfigService::new(FsConfigStore::at(dir))
            .load(RUN_CONFIG_KEY)
            .with_context(|| format!("failed to load config from {}", dir.display()))?
            .unwrap_or_default(),
        None => HaloRunConfig::default(),
    };
    if let Some(workers) = args.workers {
        cfg.workers = workers;
    }
    if let Some(dims) = args.dims {
        cfg.dims = dims;
    }
    if let Some(model) = args.model {
        cfg.model = model.into();
    }
    if let Some(steps) = args.steps {
        cfg.steps = steps;
    }
    if let Some(width) = args.halo_width {
        cfg.halo_width = width;
    }
    Ok(cfg)
}

fn render_table(reports: &[WorkerReport]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Worker",
        "Owned",
        "Needs",
        "Sources",
        "Sent / exchange",
        "Ghosts",
        "Mismatches",
        "Batches",
    ]);
    for r in reports {
        let sources = r
            .sources
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        table.add_row(vec![
            Cell::new(r.rank),
            Cell::new(r.owned),
            Cell::new(r.needs),
            Cell::new(if sources.is_empty() { "-".into() } else { sources }),
            Cell::new(r.sent_per_exchange),
            Cell::new(r.ghosts),
            Cell::new(r.mismatches),
            Cell::new(r.batches),
        ]);
    }
    table
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let cfg = load_config(&args)?;
    if args.save_config {
        if let Some(dir) = &args.config_dir {
            ConfigService::new(FsConfigStore::at(dir))
                .save(RUN_CONFIG_KEY, &cfg)
                .with_context(|| format!("failed to save config to {}", dir.display()))?;
            info!(dir = %dir.display(), "configuration saved");
        }
    }

    let reports = run::run(&cfg)?;

    let mut out = std::io::stdout().lock();
    if args.json {
        serde_json::to_writer_pretty(&mut out, &reports)?;
        writeln!(out)?;
    } else {
        writeln!(out, "{}", render_table(&reports))?;
    }

    let mismatches: usize = reports.iter().map(|r| r.mismatches).sum();
    if mismatches > 0 {
        bail!("{mismatches} ghost values differ from their owners");
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn dims_accept_cube_and_triples() {
        assert_eq!(parse_dims("6").unwrap(), LatticeDims::cube(6));
        assert_eq!(parse_dims("4,5,6").unwrap(), LatticeDims::new(4, 5, 6));
        assert_eq!(parse_dims("4x5x6").unwrap(), LatticeDims::new(4, 5, 6));
        assert!(parse_dims("4,5").is_err());
        assert!(parse_dims("a").is_err());
    }

    #[test]
    fn flags_override_defaults() {
        let args = Args::parse_from(["halo-run", "--workers", "3", "--model", "d3q27"]);
        let cfg = load_config(&args).unwrap();
        assert_eq!(cfg.workers, 3);
        assert_eq!(cfg.model, LatticeModel::D3Q27);
        assert_eq!(cfg.steps, HaloRunConfig::default().steps);
    }
}
