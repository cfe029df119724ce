//! ddrdaq CLI arguments.
//!
//! This module contains the definition of the CLI arguments for the ddrdaq
//! demo binary.

use clap::Parser;
use std::path::PathBuf;

/// ddrdaq CLI arguments.
#[derive(Parser, Debug, Clone, PartialEq)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Playback sine frequency in Hz
    #[clap(long, default_value_t = 10e3)]
    pub frequency: f64,

    /// Playback sine amplitude in digital codes
    #[clap(long, default_value_t = 1000)]
    pub amplitude: u16,

    /// Playback sine offset in digital codes
    #[clap(long, default_value_t = 0x2000)]
    pub offset: u16,

    /// Bitstream version of the simulated instrument
    #[clap(long, default_value_t = 2)]
    pub producer_version: u32,

    /// Number of capture chunks to read
    #[clap(long, default_value_t = 4)]
    pub chunks: usize,

    /// Bulk blocks per capture chunk
    #[clap(long, default_value_t = 40)]
    pub blocks_per_chunk: usize,

    /// Output base path; writes <output>.dat and <output>.json
    #[clap(long, default_value = "capture")]
    pub output: PathBuf,
}
