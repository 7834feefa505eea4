//! Common types and constants for the legacy-executable decompressors
//!
//! This module defines the result model shared by every algorithm, the
//! crate-wide error type, and the handful of MZ header offsets the
//! decompressors need to locate their own sub-headers.

use thiserror::Error;

/// A single load-time relocation: an address inside the decompressed image
/// that the loader must patch with the load segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    /// 16-bit segment part of the address
    pub segment: u16,
    /// 16-bit offset within the segment
    pub offset: u16,
}

impl Relocation {
    /// Create a relocation from a (segment, offset) pair
    pub fn new(segment: u16, offset: u16) -> Self {
        Self { segment, offset }
    }
}

/// Result of decompressing a packed executable's code image
///
/// `code` holds the fully decompressed program image, without the packer's
/// header or stub. The register fields carry the CPU state the loader must
/// install before transferring control, recovered from the packer's own
/// sub-header rather than the (overwritten) MZ header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecompressionResult {
    /// Decompressed program image
    pub code: Vec<u8>,
    /// Header fragment preserved verbatim (algorithm-specific, often empty)
    pub extra_header: Vec<u8>,
    /// Initial code segment
    pub initial_cs: u16,
    /// Initial instruction pointer
    pub initial_ip: u16,
    /// Initial stack segment
    pub initial_ss: u16,
    /// Initial stack pointer
    pub initial_sp: u16,
    /// Minimum extra memory the program needs, in 16-byte paragraphs
    pub min_extra_paragraphs: u16,
    /// Maximum extra memory the program wants, in 16-byte paragraphs
    pub max_extra_paragraphs: u16,
    /// Checksum word carried through for downstream validation
    pub checksum: u16,
    /// Load-time relocations, in on-disk order
    pub relocations: Vec<Relocation>,
}

impl Default for DecompressionResult {
    fn default() -> Self {
        Self {
            code: Vec::new(),
            extra_header: Vec::new(),
            initial_cs: 0,
            initial_ip: 0,
            initial_ss: 0,
            initial_sp: 0,
            min_extra_paragraphs: 0,
            // "no limit" when the source format has no concept of an upper bound
            max_extra_paragraphs: 0xFFFF,
            checksum: 0,
            relocations: Vec::new(),
        }
    }
}

/// Error type for decode operations
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Input is too short for a required structure
    #[error("input too short: need {needed} bytes, have {have}")]
    InputTooShort {
        /// Bytes required
        needed: usize,
        /// Bytes available
        have: usize,
    },

    /// A format signature did not match
    #[error("bad signature: expected {expected:#06x}, found {found:#06x}")]
    BadSignature {
        /// Signature the format requires
        expected: u16,
        /// Signature actually present
        found: u16,
    },

    /// A sub-header has an impossible length
    #[error("bad sub-header length: {0} bytes")]
    BadHeaderLength(usize),

    /// The PKLITE info word names a variant this crate cannot service
    #[error("unsupported PKLITE variant: info word {0:#06x}")]
    UnsupportedVariant(u16),

    /// The EXEPACK skip length field is out of range
    #[error("invalid skip length {0}")]
    InvalidSkipLen(u16),

    /// An unknown command byte was found in the opcode stream
    #[error("unknown command byte {command:#04x} at offset {offset}")]
    UnknownCommand {
        /// Offending command byte
        command: u8,
        /// Offset of the command within the compressed stream
        offset: usize,
    },

    /// A command would read before the start of the compressed stream
    #[error("command would read before the start of the compressed stream")]
    SourceUnderflow,

    /// A command would write before the start of the output buffer
    #[error("command would write before the start of the output buffer")]
    DestinationUnderflow,

    /// Backward decompression terminated without covering the whole buffer
    #[error("decompression left a gap: write position {dst}, compressed length {compressed_len}")]
    Gap {
        /// Final write position
        dst: usize,
        /// Length of the compressed region
        compressed_len: usize,
    },

    /// A back-reference points outside the already-produced output
    #[error("invalid back-reference distance {distance} with {produced} bytes produced")]
    InvalidDistance {
        /// Distance the stream encoded
        distance: usize,
        /// Output bytes produced so far
        produced: usize,
    },

    /// A dictionary code references an entry that does not exist yet
    #[error("invalid dictionary code {code:#06x} (next free entry {next_free:#06x})")]
    InvalidCode {
        /// Offending code
        code: u16,
        /// First unassigned dictionary entry
        next_free: u16,
    },

    /// Internal decoder state exceeded its fixed bounds
    #[error("decoder state overflow: {0}")]
    StateOverflow(&'static str),

    /// The compressed stream ended before the declared output was produced
    #[error("unexpected end of compressed data")]
    UnexpectedEof,

    /// A declared or produced output size exceeds the real-mode address space
    #[error("output size {size} exceeds the {limit}-byte real-mode limit")]
    SizeLimit {
        /// Declared or produced size
        size: usize,
        /// The enforced limit
        limit: usize,
    },

    /// The produced output does not match the declared uncompressed size
    #[error("decompressed size mismatch: declared {declared}, produced {produced}")]
    SizeMismatch {
        /// Size the header declared
        declared: usize,
        /// Size actually produced
        produced: usize,
    },
}

/// Result type alias for decode operations
pub type Result<T> = std::result::Result<T, DecodeError>;

/// One real-mode paragraph: the 16-byte allocation granularity of the 8086
pub const PARAGRAPH: usize = 16;

/// Upper bound on any decompressed image: one real-mode address space.
/// Declared sizes beyond this are rejected before allocation.
pub const MAX_IMAGE_BYTES: usize = 0x10_0000;

// MZ header word offsets the decompressors read to find their sub-headers.
// Full container parsing lives outside this crate.

/// Offset of the bytes-in-last-page word (`e_cblp`)
pub const MZ_BYTES_IN_LAST_PAGE: usize = 0x02;
/// Offset of the page-count word (`e_cp`)
pub const MZ_NUM_PAGES: usize = 0x04;
/// Offset of the relocation-count word (`e_crlc`)
pub const MZ_NUM_RELOCS: usize = 0x06;
/// Offset of the header-size-in-paragraphs word (`e_cparhdr`)
pub const MZ_HEADER_PARAGRAPHS: usize = 0x08;
/// Offset of the minimum-allocation word (`e_minalloc`)
pub const MZ_MIN_ALLOC: usize = 0x0A;
/// Offset of the maximum-allocation word (`e_maxalloc`)
pub const MZ_MAX_ALLOC: usize = 0x0C;
/// Offset of the initial SS word (`e_ss`)
pub const MZ_INITIAL_SS: usize = 0x0E;
/// Offset of the initial SP word (`e_sp`)
pub const MZ_INITIAL_SP: usize = 0x10;
/// Offset of the checksum word (`e_csum`)
pub const MZ_CHECKSUM: usize = 0x12;
/// Offset of the initial IP word (`e_ip`)
pub const MZ_INITIAL_IP: usize = 0x14;
/// Offset of the initial CS word (`e_cs`)
pub const MZ_INITIAL_CS: usize = 0x16;
/// Offset of the relocation-table-offset word (`e_lfarlc`)
pub const MZ_RELOC_OFFSET: usize = 0x18;

/// Read a little-endian word, failing with `InputTooShort` past the end
pub(crate) fn read_u16le(data: &[u8], offset: usize) -> Result<u16> {
    match data.get(offset..offset + 2) {
        Some(b) => Ok(u16::from_le_bytes([b[0], b[1]])),
        None => Err(DecodeError::InputTooShort {
            needed: offset + 2,
            have: data.len(),
        }),
    }
}

/// Number of paragraphs needed to hold `n` bytes, rounding up
pub(crate) fn paragraphs(n: usize) -> usize {
    n.div_ceil(PARAGRAPH)
}
