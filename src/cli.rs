use crate::constants::DEFAULT_TOPOLOGY;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// hydra CLI application
#[derive(Parser)]
#[command(name = "hydra")]
#[command(about = "Run a topology of local services, each in a selectable mode")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Topology file
    #[arg(short, long, default_value = DEFAULT_TOPOLOGY, global = true)]
    pub topology: PathBuf,
    /// Mode override (format: SERVICE=MODE)
    #[arg(short, long = "mode", value_parser = parse_selection, global = true)]
    pub modes: Vec<(String, String)>,
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start every service and stream their logs until Ctrl-C
    Run,
    /// List services and their modes
    List,
    /// Show what each service would be started with, without starting it
    Resolve,
}

fn parse_selection(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((service, mode)) if !service.is_empty() && !mode.is_empty() => {
            Ok((service.to_string(), mode.to_string()))
        }
        _ => Err(format!("expected SERVICE=MODE, got '{}'", value)),
    }
}
