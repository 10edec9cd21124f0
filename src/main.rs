//! Entry point for the dexmerge tool.
//!
//! This file handles high-level application flow:
//! 1. Parse command-line arguments using `clap`.
//! 2. Install the `tracing` subscriber at the requested level.
//! 3. Map the input files into memory and parse their tables of contents.
//! 4. Merge, then write the result and report sizes and timing.
//!
//! Error handling is done via `anyhow`.

use anyhow::{Context, Result};
use clap::Parser;
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use dexmerge::config::{Command, Config};
use dexmerge::{DexImage, MergeOptions};

fn main() -> Result<()> {
    let config = Config::parse();

    // RUST_LOG takes precedence over --log-level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .with_context(|| format!("invalid log level {:?}", config.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match config.command {
        Command::Merge {
            output,
            input_a,
            input_b,
            collision_policy,
            compact_waste_threshold,
        } => {
            let options = MergeOptions {
                collision_policy,
                compact_waste_threshold,
            };
            merge(&output, &input_a, &input_b, options)
        }
        Command::Info { input } => info(&input),
    }
}

/// Maps a file into memory.
fn map_file(path: &Path) -> Result<Mmap> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    // SAFETY: the map is read-only and inputs are not expected to change while we run.
    let mmap = unsafe { Mmap::map(&file) }.with_context(|| format!("failed to map {}", path.display()))?;
    Ok(mmap)
}

fn kib(len: usize) -> f64 {
    len as f64 / 1024.0
}

fn merge(output: &Path, input_a: &Path, input_b: &Path, options: MergeOptions) -> Result<()> {
    let mmap_a = map_file(input_a)?;
    let mmap_b = map_file(input_b)?;
    let dex_a = DexImage::parse(&mmap_a[..]).with_context(|| format!("failed to parse {}", input_a.display()))?;
    let dex_b = DexImage::parse(&mmap_b[..]).with_context(|| format!("failed to parse {}", input_b.display()))?;

    let start = Instant::now();
    let merged = dexmerge::merge(&dex_a, &dex_b, options)?;
    let elapsed = start.elapsed();

    println!(
        "Merged dex A ({} defs/{:.1}KiB) with dex B ({} defs/{:.1}KiB). Result is {} defs/{:.1}KiB. Took {:.1}s",
        dex_a.class_def_count(),
        kib(dex_a.len()),
        dex_b.class_def_count(),
        kib(dex_b.len()),
        merged.class_def_count(),
        kib(merged.len()),
        elapsed.as_secs_f64()
    );

    std::fs::write(output, merged.into_bytes()).with_context(|| format!("failed to write {}", output.display()))?;
    Ok(())
}

fn info(input: &Path) -> Result<()> {
    let mmap = map_file(input)?;
    let dex = DexImage::parse(&mmap[..]).with_context(|| format!("failed to parse {}", input.display()))?;
    let toc = dex.toc();

    println!(
        "{}: version {:03}, {} bytes, checksum {}",
        input.display(),
        toc.version(),
        toc.file_size,
        if dex.verify_checksum() { "ok" } else { "MISMATCH" }
    );
    for (kind, section) in toc.sections() {
        println!(
            "  {:<26} off 0x{:08x}  count {:>7}  bytes {:>9}",
            kind.name(),
            section.off,
            section.size,
            section.byte_count
        );
    }
    Ok(())
}
