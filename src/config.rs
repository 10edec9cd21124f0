//! Configuration module.
//!
//! This module defines the command-line interface (CLI) for the merger using `clap`,
//! and the [`MergeOptions`] the library takes in its place when driven programmatically.

use clap::{Parser, Subcommand, ValueEnum};
use std::fmt;
use std::path::PathBuf;

/// Minimum number of wasted bytes before it's worthwhile to compact the result.
pub const DEFAULT_COMPACT_WASTE_THRESHOLD: u32 = 1024 * 1024;

/// What to do when both inputs define the same class.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollisionPolicy {
    /// Abort the merge, naming the duplicated type.
    Fail,
    /// Keep the definition from the first input and drop the other.
    #[default]
    KeepFirst,
}

impl fmt::Display for CollisionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollisionPolicy::Fail => f.write_str("fail"),
            CollisionPolicy::KeepFirst => f.write_str("keep-first"),
        }
    }
}

/// Knobs for a single merge invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOptions {
    pub collision_policy: CollisionPolicy,
    /// A result wasting more than this many bytes is compacted by a second pass.
    pub compact_waste_threshold: u32,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            collision_policy: CollisionPolicy::KeepFirst,
            compact_waste_threshold: DEFAULT_COMPACT_WASTE_THRESHOLD,
        }
    }
}

/// Merges two Dalvik executables into one.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    #[command(subcommand)]
    pub command: Command,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info", help = "Set the logging level")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Combine two dex files into one. If both define the same class, a's copy is used.
    Merge {
        /// Output dex file
        output: PathBuf,
        /// First input; wins collisions under keep-first
        input_a: PathBuf,
        /// Second input
        input_b: PathBuf,

        #[arg(long, value_enum, default_value_t = CollisionPolicy::KeepFirst)]
        collision_policy: CollisionPolicy,

        /// Wasted bytes tolerated before the result is compacted
        #[arg(long, default_value_t = DEFAULT_COMPACT_WASTE_THRESHOLD)]
        compact_waste_threshold: u32,
    },
    /// Print the table of contents of a dex file.
    Info {
        input: PathBuf,
    },
}
