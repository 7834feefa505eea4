//! mzunpack-cli - Command-line interface for mzunpack
//!
//! Detects which historical packer produced an MZ executable and recovers
//! the original code image, registers, and relocation table.

use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use mzunpack::{create_decompressor, CompressionType, ContainerParams};
use std::path::PathBuf;
use std::process;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "mzunpack-cli")]
#[command(about = "A CLI tool for unpacking DOS-era compressed executables")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect the packer and print header-derived facts
    Info {
        /// Packed executable to inspect
        input: PathBuf,
    },

    /// Decompress the code image into a file
    Unpack {
        /// Packed executable
        input: PathBuf,

        /// Output file for the decompressed code image
        output: PathBuf,

        /// Packer format (auto-detected by default)
        #[arg(short, long, value_enum, default_value_t = CliFormat::Auto)]
        format: CliFormat,

        /// Force overwrite of output file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CliFormat {
    Auto,
    Exepack,
    Lzexe090,
    Lzexe091,
    Pklite,
    KnowledgeDynamics,
}

fn main() {
    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Info { ref input } => cmd_info(input, cli.quiet),
        Commands::Unpack {
            ref input,
            ref output,
            format,
            force,
        } => cmd_unpack(input, output, format, force, cli.quiet),
    };

    if let Err(message) = outcome {
        eprintln!("Error: {message}");
        process::exit(1);
    }
}

fn read_u16le(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Container parameters straight from the MZ header.
fn container_params(data: &[u8]) -> ContainerParams {
    ContainerParams {
        header_paragraphs: read_u16le(data, 0x08).unwrap_or(2),
        pklite_info: read_u16le(data, 0x1C).unwrap_or(0),
    }
}

/// Signature-based packer detection.
///
/// LZEXE writes its magic into the reserved words at 0x0E; Knowledge
/// Dynamics self-extractors begin their code section with a fixed jump;
/// EXEPACK closes its sub-header with "RB"; PKLITE keeps its version in
/// the reserved word at 0x1C.
fn detect(data: &[u8]) -> Option<CompressionType> {
    if data.get(0..2) != Some(&b"MZ"[..]) {
        return None;
    }

    if let Some(magic) = data.get(0x0E..0x12) {
        if magic == b"LZ09" {
            return Some(CompressionType::Lzexe090);
        }
        if magic == b"LZ91" {
            return Some(CompressionType::Lzexe091);
        }
    }

    if data.get(0x200..0x203) == Some(&[0xE9, 0x99, 0x00][..]) {
        return Some(CompressionType::KnowledgeDynamics);
    }

    // EXEPACK: "RB" at the end of the sub-header located at cs:ip
    if let (Some(header_paragraphs), Some(cs), Some(ip)) = (
        read_u16le(data, 0x08),
        read_u16le(data, 0x16),
        read_u16le(data, 0x14),
    ) {
        if ip == 16 || ip == 18 {
            let header_offset = (usize::from(header_paragraphs) + usize::from(cs)) * 16;
            if let Some(signature) = read_u16le(data, header_offset + usize::from(ip) - 2) {
                if signature == 0x4252 {
                    return Some(CompressionType::Exepack);
                }
            }
        }
    }

    if let Some(info) = read_u16le(data, 0x1C) {
        if mzunpack::pklite::is_supported_info(info) {
            return Some(CompressionType::Pklite);
        }
    }

    None
}

fn format_to_type(format: CliFormat, data: &[u8]) -> Result<CompressionType, String> {
    match format {
        CliFormat::Auto => {
            detect(data).ok_or_else(|| "no known packer signature found".to_string())
        }
        CliFormat::Exepack => Ok(CompressionType::Exepack),
        CliFormat::Lzexe090 => Ok(CompressionType::Lzexe090),
        CliFormat::Lzexe091 => Ok(CompressionType::Lzexe091),
        CliFormat::Pklite => Ok(CompressionType::Pklite),
        CliFormat::KnowledgeDynamics => Ok(CompressionType::KnowledgeDynamics),
    }
}

fn cmd_info(input: &PathBuf, quiet: bool) -> Result<(), String> {
    let data =
        std::fs::read(input).map_err(|e| format!("cannot read {}: {e}", input.display()))?;

    let compression = detect(&data).ok_or_else(|| "no known packer signature found".to_string())?;
    let params = container_params(&data);
    let decompressor = create_decompressor(compression, params)
        .ok_or_else(|| "uncompressed image".to_string())?;

    println!("File:       {}", input.display());
    println!("Packer:     {}", decompressor.name());
    println!("File size:  {} bytes", data.len());
    println!("MZ header:  {} paragraphs", params.header_paragraphs);
    if compression == CompressionType::Pklite {
        println!("Info word:  {:#06x}", params.pklite_info);
        let pklite =
            mzunpack::PkliteDecompressor::new(params.pklite_info, params.header_paragraphs);
        if let Ok(info) = pklite.read_parameters(&data) {
            println!(
                "Declared:   {} bytes from {} compressed, data at +{:#x}",
                info.decomp_size, info.compressed_size, info.data_offset
            );
            println!(
                "Flags:      large_model={} xor={} trailing_raw={} checksum={}",
                info.large_model, info.xor_obfuscation, info.uncompressed_region, info.has_checksum
            );
        }
    }

    if !quiet {
        match decompressor.decompress(&data) {
            Ok(result) => {
                println!("Unpacked:   {} bytes", result.code.len());
                println!(
                    "Entry:      {:04X}:{:04X}  stack {:04X}:{:04X}",
                    result.initial_cs, result.initial_ip, result.initial_ss, result.initial_sp
                );
                println!("Relocs:     {}", result.relocations.len());
            }
            Err(e) => println!("Unpacked:   decode failed ({e})"),
        }
    }

    Ok(())
}

fn cmd_unpack(
    input: &PathBuf,
    output: &PathBuf,
    format: CliFormat,
    force: bool,
    quiet: bool,
) -> Result<(), String> {
    if output.exists() && !force {
        return Err(format!(
            "output file {} exists (use --force to overwrite)",
            output.display()
        ));
    }

    let data =
        std::fs::read(input).map_err(|e| format!("cannot read {}: {e}", input.display()))?;
    let compression = format_to_type(format, &data)?;
    let params = container_params(&data);
    let decompressor = create_decompressor(compression, params)
        .ok_or_else(|| "uncompressed image".to_string())?;

    let progress = if quiet {
        None
    } else {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap(),
        );
        bar.set_message(format!("unpacking with {}", decompressor.name()));
        Some(bar)
    };

    let start = Instant::now();
    let result = decompressor
        .decompress(&data)
        .map_err(|e| format!("{}: {e}", decompressor.name()))?;
    let elapsed = start.elapsed();

    if let Some(bar) = progress {
        bar.finish_and_clear();
    }

    std::fs::write(output, &result.code)
        .map_err(|e| format!("cannot write {}: {e}", output.display()))?;

    if !quiet {
        println!(
            "{}: {} -> {} bytes in {:.2?}",
            decompressor.name(),
            data.len(),
            result.code.len(),
            elapsed
        );
        println!(
            "Entry {:04X}:{:04X}, stack {:04X}:{:04X}, {} relocations",
            result.initial_cs,
            result.initial_ip,
            result.initial_ss,
            result.initial_sp,
            result.relocations.len()
        );
        println!("Wrote {}", output.display());
    }

    Ok(())
}
