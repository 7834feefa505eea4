//! Decompressor contract and factory
//!
//! The set of legacy packers is fixed and finite, so the polymorphism is a
//! closed enum rather than trait objects: callers get exhaustiveness
//! checking and static dispatch, and the factory is a pure mapping from
//! the detected compression type to a configured decompressor value.

use crate::common::{DecompressionResult, Result};
use crate::exepack::ExepackDecompressor;
use crate::knowledge_dynamics::KnowledgeDynamicsDecompressor;
use crate::lzexe::{LzexeDecompressor, LzexeVersion};
use crate::pklite::PkliteDecompressor;

/// Compression schemes found in the code sections of legacy executables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    /// The code section is not compressed
    None,
    /// Microsoft EXEPACK
    Exepack,
    /// LZEXE 0.90
    Lzexe090,
    /// LZEXE 0.91
    Lzexe091,
    /// PKWARE PKLITE
    Pklite,
    /// Knowledge Dynamics LZW
    KnowledgeDynamics,
}

/// Construction parameters recovered from the container header before the
/// compressed body is available.
#[derive(Debug, Clone, Copy)]
pub struct ContainerParams {
    /// MZ header size in 16-byte paragraphs (`e_cparhdr`)
    pub header_paragraphs: u16,
    /// The PKLITE info word from the reserved header field at 0x1C;
    /// ignored by the other algorithms
    pub pklite_info: u16,
}

impl Default for ContainerParams {
    fn default() -> Self {
        // two paragraphs is the ubiquitous 32-byte MZ header
        Self {
            header_paragraphs: 2,
            pklite_info: 0,
        }
    }
}

/// One of the four concrete decompressors, behind a single capability
/// surface: `decompress` and `name`.
#[derive(Debug, Clone, Copy)]
pub enum Decompressor {
    /// EXEPACK backward FILL/COPY decoder
    Exepack(ExepackDecompressor),
    /// LZEXE sliding-window decoder (either version)
    Lzexe(LzexeDecompressor),
    /// PKLITE bit-oriented LZ decoder
    Pklite(PkliteDecompressor),
    /// Knowledge Dynamics LZW decoder
    KnowledgeDynamics(KnowledgeDynamicsDecompressor),
}

impl Decompressor {
    /// Decompress the packed image. Construction never reads the packed
    /// bytes; all validation happens here.
    pub fn decompress(&self, data: &[u8]) -> Result<DecompressionResult> {
        match self {
            Decompressor::Exepack(d) => d.decompress(data),
            Decompressor::Lzexe(d) => d.decompress(data),
            Decompressor::Pklite(d) => d.decompress(data),
            Decompressor::KnowledgeDynamics(d) => d.decompress(data),
        }
    }

    /// Static algorithm identifier for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Decompressor::Exepack(d) => d.name(),
            Decompressor::Lzexe(d) => d.name(),
            Decompressor::Pklite(d) => d.name(),
            Decompressor::KnowledgeDynamics(d) => d.name(),
        }
    }
}

/// Build the decompressor for a detected compression type, or `None` for
/// an uncompressed code section.
pub fn create_decompressor(
    compression: CompressionType,
    params: ContainerParams,
) -> Option<Decompressor> {
    match compression {
        CompressionType::None => None,
        CompressionType::Exepack => Some(Decompressor::Exepack(ExepackDecompressor::new(
            params.header_paragraphs,
        ))),
        CompressionType::Lzexe090 => Some(Decompressor::Lzexe(LzexeDecompressor::new(
            LzexeVersion::V090,
            params.header_paragraphs,
        ))),
        CompressionType::Lzexe091 => Some(Decompressor::Lzexe(LzexeDecompressor::new(
            LzexeVersion::V091,
            params.header_paragraphs,
        ))),
        CompressionType::Pklite => Some(Decompressor::Pklite(PkliteDecompressor::new(
            params.pklite_info,
            params.header_paragraphs,
        ))),
        CompressionType::KnowledgeDynamics => Some(Decompressor::KnowledgeDynamics(
            KnowledgeDynamicsDecompressor::new(),
        )),
    }
}
