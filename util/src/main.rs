/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use cpu_time::ProcessTime;
use env_logger::Builder;
use log::{LevelFilter, info};

use std::{
    fs,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use streamflate::{
    CodecBackend, DeflateDecoder, DeflateEncoder, StreamConfig, StreamFormat, StreamStats,
    WriteSink, inflate_whole_buffer,
};

#[derive(Parser)]
#[command(name = "streamflate_util")]
#[command(about = "Compresses or decompresses a file with the chunked deflate driver", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Size of the scratch chunk the codec writes into on every step
    #[arg(long, default_value_t = streamflate::DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Compression level (0-9)
    #[arg(short = 'c', long, default_value = "6")]
    level: u8,

    /// framing of the compressed stream
    #[arg(long, default_value = "zlib")]
    #[arg(value_enum)]
    format: FormatArg,

    /// deflate implementation to use
    #[arg(long, default_value = "miniz")]
    #[arg(value_enum)]
    backend: BackendArg,

    /// level of logging to use
    #[arg(long, default_value = "Error")]
    loglevel: LevelFilter,

    /// Whether to verify the compression by decompressing and comparing to original
    #[arg(long, default_value = "false")]
    verify: bool,
}

#[derive(Subcommand)]
enum Command {
    /// compress <input> into <output>
    Compress { input: PathBuf, output: PathBuf },
    /// decompress <input> into <output>
    Decompress { input: PathBuf, output: PathBuf },
}

#[derive(Clone, Copy, ValueEnum)]
enum FormatArg {
    Zlib,
    Raw,
    Gzip,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    Miniz,
    Flate2,
}

impl Cli {
    fn config(&self) -> StreamConfig {
        StreamConfig {
            chunk_size: self.chunk_size,
            level: self.level,
            format: match self.format {
                FormatArg::Zlib => StreamFormat::Zlib,
                FormatArg::Raw => StreamFormat::Raw,
                FormatArg::Gzip => StreamFormat::Gzip,
            },
            backend: match self.backend {
                BackendArg::Miniz => CodecBackend::Miniz,
                BackendArg::Flate2 => CodecBackend::Flate2,
            },
        }
    }
}

/// runs one direction over the whole input file, streaming the result into the output file
fn run_to_file(
    input: &[u8],
    output: &Path,
    run: impl FnOnce(&[u8], &mut WriteSink<BufWriter<fs::File>>) -> streamflate::Result<StreamStats>,
) -> anyhow::Result<StreamStats> {
    let file = fs::File::create(output).with_context(|| format!("creating {:?}", output))?;
    let mut sink = WriteSink::new(BufWriter::new(file));

    let stats = run(input, &mut sink)?;

    sink.into_inner()
        .flush()
        .with_context(|| format!("writing {:?}", output))?;
    Ok(stats)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    Builder::new().filter_level(cli.loglevel).init();

    let config = cli.config();

    match &cli.command {
        Command::Compress { input, output } => {
            let original = fs::read(input).with_context(|| format!("reading {:?}", input))?;

            let start = ProcessTime::now();
            let mut encoder = DeflateEncoder::new(&config)?;
            let stats = run_to_file(&original, output, |i, sink| {
                encoder.compress_into_bytestream(i, sink)
            })?;

            println!(
                "compressed {} -> {} bytes ({:.1}%) in {} steps cpu={:?}",
                stats.bytes_consumed,
                stats.bytes_produced,
                ratio(stats.bytes_produced, stats.bytes_consumed),
                stats.steps,
                start.elapsed()
            );

            if cli.verify {
                let start = ProcessTime::now();
                let compressed = fs::read(output)?;
                let recreated = inflate_whole_buffer(&compressed, &config)?;
                if recreated != original {
                    bail!("verification failed: decompressed data does not match input");
                }
                info!("verified in cpu={:?}", start.elapsed());
                println!("verified ok");
            }
        }
        Command::Decompress { input, output } => {
            let compressed = fs::read(input).with_context(|| format!("reading {:?}", input))?;

            let start = ProcessTime::now();
            let mut decoder = DeflateDecoder::new(&config)?;
            let stats = run_to_file(&compressed, output, |i, sink| {
                decoder.decompress_into_bytestream(i, sink)
            })?;

            println!(
                "decompressed {} -> {} bytes in {} steps cpu={:?}",
                stats.bytes_consumed,
                stats.bytes_produced,
                stats.steps,
                start.elapsed()
            );

            if stats.bytes_consumed < compressed.len() {
                println!(
                    "{} trailing bytes after the end of the stream were ignored",
                    compressed.len() - stats.bytes_consumed
                );
            }

            if cli.verify {
                // recompressing won't give back the same bytes, so check the round trip instead
                let recreated = fs::read(output)?;
                let mut encoder = DeflateEncoder::new(&config)?;
                let recompressed = encoder.compress(&recreated)?;
                if inflate_whole_buffer(&recompressed, &config)? != recreated {
                    bail!("verification failed: round trip does not match");
                }
                println!("verified ok");
            }
        }
    }

    Ok(())
}

fn ratio(compressed: usize, original: usize) -> f64 {
    if original == 0 {
        0.0
    } else {
        compressed as f64 * 100.0 / original as f64
    }
}
