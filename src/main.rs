// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! spack CLI - a minimal static module bundler

use clap::Parser;
use owo_colors::OwoColorize;
use spack_core::{Bundler, Config, EntryConfig, VERSION};
use std::path::PathBuf;

const DEFAULT_CONFIG_FILE: &str = "spack.config.json";

#[derive(Parser)]
#[command(
    name = "spack",
    about = "A minimal static module bundler",
    version = VERSION,
    author = "Pegasus Heavy Industries"
)]
struct Cli {
    /// Path to a JSON config file (defaults to spack.config.json if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Entry file, overriding the config
    #[arg(short, long)]
    entry: Option<String>,

    /// Output directory, overriding the config
    #[arg(short, long)]
    out_dir: Option<PathBuf>,

    /// Empty the output directory before writing
    #[arg(long)]
    clean: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("spack=debug,spack_core=debug")
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("spack=warn,spack_core=warn")
            .init();
    }

    let mut config = load_config(&cli)?;
    tracing::debug!(root = %config.root.display(), "loaded configuration");
    if let Some(entry) = cli.entry {
        config.entry = EntryConfig::Single(entry);
    }
    if let Some(out_dir) = cli.out_dir {
        config.output_dir = out_dir;
    }
    if cli.clean {
        config.clean = true;
    }

    // Resolution walks ancestor directories, so the root must be absolute.
    let cwd = std::env::current_dir()?;
    config.root = spack_core::fs::normalize(&cwd.join(&config.root));
    if config.output_dir.is_relative() {
        config.output_dir = cwd.join(&config.output_dir);
    }

    match Bundler::new(config).build() {
        Ok(report) => {
            for chunk in &report.chunks {
                println!(
                    "{} {} ({}, {} modules)",
                    "emitted".green().bold(),
                    chunk.path.display(),
                    format_bytes(chunk.bytes),
                    chunk.modules
                );
            }
            if report.assets > 0 {
                println!("{} {} asset(s)", "emitted".green().bold(), report.assets);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    match &cli.config {
        Some(path) => Ok(Config::load(path)?),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            if default.is_file() {
                Ok(Config::load(&default)?)
            } else {
                Ok(Config::default())
            }
        }
    }
}

fn format_bytes(bytes: usize) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.1} MiB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.1} KiB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}
