//! Command-line interface for `aed`.
//!
//! Every flag is optional; unset flags fall back to the settings file, then
//! to built-in defaults.

use std::path::PathBuf;

use clap::Parser;

/// Real-time acoustic event detection
#[derive(Parser, Debug, Default)]
#[command(name = "aed", version, about = "Real-time acoustic event detection")]
pub struct Cli {
    /// Path to a JSON settings file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// ONNX classifier model (requires the `onnx` feature)
    #[arg(long, value_name = "PATH")]
    pub model: Option<PathBuf>,

    /// Class labels: one per line, or an `index,mid,display_name` CSV
    #[arg(long, value_name = "PATH")]
    pub labels: Option<PathBuf>,

    /// Classifier intra-op thread count
    #[arg(long, short = 't', value_name = "N")]
    pub threads: Option<usize>,

    /// Input device: "default", an index from --list-devices, or an exact name
    #[arg(long, short = 'd', value_name = "DEVICE", conflicts_with = "wav")]
    pub device: Option<String>,

    /// Replay a WAV file at real-time pace instead of capturing
    #[arg(long, value_name = "PATH")]
    pub wav: Option<PathBuf>,

    /// Number of classes reported per record
    #[arg(long, short = 'k', value_name = "K")]
    pub top_k: Option<usize>,

    /// Write JSON lines here instead of stdout
    #[arg(long, short = 'o', value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Print available input devices and exit
    #[arg(long)]
    pub list_devices: bool,
}
