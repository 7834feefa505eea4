//! mzunpack - Rust decompressors for DOS-era executable packers
//!
//! This crate recovers the original code image from executables packed by
//! the historical in-place compressors: Microsoft EXEPACK, LZEXE 0.90 and
//! 0.91, PKWARE PKLITE, and the Knowledge Dynamics LZW packer. Each
//! decoder reconstructs byte-exact output plus the CPU register state and
//! relocation table the loader needs to run the unpacked program.
//!
//! Container parsing (MZ/NE/PE headers, section tables, format detection)
//! is the caller's business: the caller detects the compression type by
//! signature, builds the matching decompressor through the factory, and
//! hands `decompress` the raw packed image.
//!
//! # Example
//!
//! ```no_run
//! use mzunpack::{create_decompressor, CompressionType, ContainerParams};
//!
//! let packed = std::fs::read("PACKED.EXE")?;
//! let params = ContainerParams { header_paragraphs: 2, pklite_info: 0 };
//! let decompressor = create_decompressor(CompressionType::Lzexe091, params)
//!     .expect("compressed type always yields a decompressor");
//!
//! let result = decompressor.decompress(&packed)?;
//! println!(
//!     "{}: {} bytes, entry {:04X}:{:04X}, {} relocations",
//!     decompressor.name(),
//!     result.code.len(),
//!     result.initial_cs,
//!     result.initial_ip,
//!     result.relocations.len(),
//! );
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

// Public modules
pub mod common;
pub mod decompressor;
pub mod error;
pub mod exepack;
pub mod knowledge_dynamics;
pub mod lzexe;
pub mod pklite;

// Internal plumbing
mod bitstream;

// Re-export commonly used types
pub use common::{
    DecodeError, DecompressionResult, Relocation, Result, MAX_IMAGE_BYTES, PARAGRAPH,
};
pub use decompressor::{create_decompressor, CompressionType, ContainerParams, Decompressor};
pub use exepack::ExepackDecompressor;
pub use knowledge_dynamics::KnowledgeDynamicsDecompressor;
pub use lzexe::{LzexeDecompressor, LzexeVersion};
pub use pklite::{PkliteDecompressor, PkliteInfo};

/// Decompress a packed image in one call: build the decompressor for
/// `compression` and run it over `data`.
///
/// Returns `None` for [`CompressionType::None`]; any decode failure
/// surfaces as the inner `Err`.
pub fn unpack_bytes(
    data: &[u8],
    compression: CompressionType,
    params: ContainerParams,
) -> Option<Result<DecompressionResult>> {
    create_decompressor(compression, params).map(|d| d.decompress(data))
}
