use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};

use srlmerge_core::format::PROTOCOL_VERSION_MAX;
use srlmerge_core::{read_body, read_header, Merger, TopLevelElement};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "srlmerge",
    about = "Merge independently-encoded Sereal documents into a single document",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge Sereal documents, in argument order, into one document
    Merge {
        /// Input documents
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Destination file ("-" writes to stdout)
        #[arg(short, long)]
        output: PathBuf,
        /// Top-level container: array | arrayref
        #[arg(long, default_value = "arrayref")]
        top_level: String,
        /// Sereal protocol version of the merged document (1-4)
        #[arg(long, default_value_t = PROTOCOL_VERSION_MAX)]
        protocol: u8,
    },
    /// Print header metadata of a Sereal document
    Inspect {
        /// Sereal document to inspect
        file: PathBuf,
    },
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn top_level_from_name(name: &str) -> anyhow::Result<TopLevelElement> {
    match name {
        "array" => Ok(TopLevelElement::Array),
        "arrayref" | "ref" => Ok(TopLevelElement::ArrayRef),
        other => anyhow::bail!(
            "unknown top-level '{}'. Valid options: array, arrayref",
            other
        ),
    }
}

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

// ── Subcommand implementations ─────────────────────────────────────────────

fn run_merge(
    inputs: Vec<PathBuf>,
    output: PathBuf,
    top_level: &str,
    protocol: u8,
) -> anyhow::Result<()> {
    let mut merger = Merger::new();
    merger.protocol_version = protocol;
    merger.top_level = top_level_from_name(top_level)?;

    let t0 = Instant::now();
    let mut total_in = 0u64;

    for path in &inputs {
        let doc = fs::read(path).with_context(|| format!("reading input {:?}", path))?;
        total_in += doc.len() as u64;
        merger
            .append(&doc)
            .with_context(|| format!("merging {:?}", path))?;
    }

    let merged = merger.finish()?.to_vec();
    let elapsed = t0.elapsed();

    if output.to_str() == Some("-") {
        io::stdout().write_all(&merged)?;
    } else {
        fs::write(&output, &merged)
            .with_context(|| format!("writing output file {:?}", output))?;
    }

    eprintln!("  documents   : {}", inputs.len());
    eprintln!("  elements    : {}", merger.element_count());
    eprintln!("  input bytes : {}", human_bytes(total_in));
    eprintln!("  merged      : {}", human_bytes(merged.len() as u64));
    eprintln!(
        "  ratio       : {:.2}x",
        total_in as f64 / merged.len() as f64
    );
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_inspect(file: PathBuf) -> anyhow::Result<()> {
    let doc = fs::read(&file).with_context(|| format!("reading {:?}", file))?;
    let header = read_header(&doc)?;

    println!("=== Sereal document: {:?} ===", file);
    println!();
    println!("  protocol version : {}", header.version);
    println!("  body encoding    : {}", header.encoding.name());
    println!("  body offset      : {}", header.body_start);
    println!("  file on disk     : {}", human_bytes(doc.len() as u64));
    println!(
        "  body on wire     : {}",
        human_bytes((doc.len() - header.body_start) as u64)
    );

    let (_, body) = read_body(&doc)?;
    println!("  body raw         : {}", human_bytes(body.len() as u64));

    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Merge {
            inputs,
            output,
            top_level,
            protocol,
        } => run_merge(inputs, output, &top_level, protocol),
        Commands::Inspect { file } => run_inspect(file),
    }
}
