//! EXEPACK decompressor (Microsoft's backward FILL/COPY scheme)
//!
//! EXEPACK appends a small sub-header, a decompression stub, and a packed
//! relocation table after the compressed program image. The compressed
//! stream is expanded in place, backwards: commands are read from the end
//! of the stream toward its start and bytes are written from the end of
//! the destination buffer toward its start. COPY sources always lie ahead
//! of the write cursor, so overlapping copies must run byte-by-byte in
//! descending order to reproduce the stub's behavior.

use crate::common::{
    paragraphs, read_u16le, DecodeError, DecompressionResult, Relocation, Result, PARAGRAPH,
    MZ_BYTES_IN_LAST_PAGE, MZ_INITIAL_CS, MZ_INITIAL_IP, MZ_MAX_ALLOC, MZ_MIN_ALLOC, MZ_NUM_PAGES,
};

/// The "RB" marker closing every EXEPACK sub-header.
const SIGNATURE: u16 = 0x4252;

/// Instruction suffix shared by all known decompression stubs:
/// `int 0x21; mov ax, 0x4cff; int 0x21`.
const STUB_SUFFIX: &[u8] = b"\xcd\x21\xb8\xff\x4c\xcd\x21";

/// The stub's error string ("Packed file is corrupt") that follows the
/// suffix and precedes the packed relocation table.
const STUB_TRAILER_LEN: usize = 22;

const CMD_FILL: u8 = 0xB0;
const CMD_COPY: u8 = 0xB2;

/// Sub-header fields, read from `cs:0000` of the packed image.
#[derive(Debug)]
struct ExepackHeader {
    real_ip: u16,
    real_cs: u16,
    // mem_start is stub scratch space and never parsed
    exepack_size: u16,
    real_sp: u16,
    real_ss: u16,
    dest_len: u16,
    skip_len: u16,
}

/// Everything `decompress` derives from the headers before touching the
/// compressed stream.
#[derive(Debug)]
struct ExepackParams {
    header: ExepackHeader,
    header_offset: usize,
    header_len: usize,
    compressed_len: usize,
    uncompressed_len: usize,
}

/// Decompressor for EXEPACK-packed MZ executables.
#[derive(Debug, Clone, Copy)]
pub struct ExepackDecompressor {
    header_paragraphs: u16,
}

impl ExepackDecompressor {
    /// Create a decompressor for an image whose MZ header spans
    /// `header_paragraphs` paragraphs.
    pub fn new(header_paragraphs: u16) -> Self {
        Self { header_paragraphs }
    }

    /// Static algorithm identifier for diagnostics.
    pub fn name(&self) -> &'static str {
        "EXEPACK"
    }

    fn read_parameters(&self, data: &[u8]) -> Result<ExepackParams> {
        let initial_ip = read_u16le(data, MZ_INITIAL_IP)?;
        let initial_cs = read_u16le(data, MZ_INITIAL_CS)?;

        let file_start = usize::from(self.header_paragraphs) * PARAGRAPH;
        let header_offset = file_start + usize::from(initial_cs) * PARAGRAPH;

        // The sub-header runs from cs:0000 to cs:ip; 16 bytes for the old
        // layout, 18 when the skip_len field is present.
        let header_len = usize::from(initial_ip);
        let uses_skip_len = match header_len {
            16 => false,
            18 => true,
            _ => return Err(DecodeError::BadHeaderLength(header_len)),
        };

        if data.len() < header_offset + header_len {
            return Err(DecodeError::InputTooShort {
                needed: header_offset + header_len,
                have: data.len(),
            });
        }
        let hdr = &data[header_offset..header_offset + header_len];

        let header = ExepackHeader {
            real_ip: read_u16le(hdr, 0)?,
            real_cs: read_u16le(hdr, 2)?,
            exepack_size: read_u16le(hdr, 6)?,
            real_sp: read_u16le(hdr, 8)?,
            real_ss: read_u16le(hdr, 10)?,
            dest_len: read_u16le(hdr, 12)?,
            skip_len: if uses_skip_len {
                read_u16le(hdr, 14)?
            } else {
                1
            },
        };
        let signature = read_u16le(hdr, header_len - 2)?;
        if signature != SIGNATURE {
            return Err(DecodeError::BadSignature {
                expected: SIGNATURE,
                found: signature,
            });
        }

        // skip_len is one greater than the number of padding paragraphs
        // between the compressed data and the sub-header; zero would mean
        // minus one paragraph.
        let skip_padding = usize::from(
            header
                .skip_len
                .checked_sub(1)
                .ok_or(DecodeError::InvalidSkipLen(header.skip_len))?,
        ) * PARAGRAPH;

        let compressed_len = (usize::from(initial_cs) * PARAGRAPH)
            .checked_sub(skip_padding)
            .ok_or(DecodeError::InvalidSkipLen(header.skip_len))?;
        let uncompressed_len = (usize::from(header.dest_len) * PARAGRAPH)
            .checked_sub(skip_padding)
            .ok_or(DecodeError::InvalidSkipLen(header.skip_len))?;

        Ok(ExepackParams {
            header,
            header_offset,
            header_len,
            compressed_len,
            uncompressed_len,
        })
    }

    /// Decompress a packed MZ image and recover code, registers, and the
    /// packed relocation table.
    pub fn decompress(&self, data: &[u8]) -> Result<DecompressionResult> {
        let params = self.read_parameters(data)?;

        let mut result = DecompressionResult {
            initial_ip: params.header.real_ip,
            initial_cs: params.header.real_cs,
            initial_sp: params.header.real_sp,
            initial_ss: params.header.real_ss,
            // EXEPACK does not preserve the original checksum
            checksum: 0,
            max_extra_paragraphs: read_u16le(data, MZ_MAX_ALLOC)?,
            ..Default::default()
        };

        let file_start = usize::from(self.header_paragraphs) * PARAGRAPH;
        if data.len() < file_start + params.compressed_len {
            return Err(DecodeError::InputTooShort {
                needed: file_start + params.compressed_len,
                have: data.len(),
            });
        }

        let mut buf = data[file_start..file_start + params.compressed_len].to_vec();
        decompress_backward(&mut buf, params.compressed_len, params.uncompressed_len)?;
        result.code = buf;

        result.min_extra_paragraphs = self.min_extra_paragraphs(data, result.code.len())?;
        result.relocations = self.parse_stub_relocations(data, &params)?;

        Ok(result)
    }

    /// The unpacked image needs whatever the packed image needed, adjusted
    /// by how much larger the code grew during expansion.
    fn min_extra_paragraphs(&self, data: &[u8], code_len: usize) -> Result<u16> {
        let min_alloc = read_u16le(data, MZ_MIN_ALLOC)?;
        let num_pages = read_u16le(data, MZ_NUM_PAGES)?;
        let bytes_in_last = read_u16le(data, MZ_BYTES_IN_LAST_PAGE)?;

        let mut file_end = i64::from(num_pages) * 512;
        if bytes_in_last != 0 {
            file_end -= 512 - i64::from(bytes_in_last);
        }
        let file_start = usize::from(self.header_paragraphs) * PARAGRAPH;
        let packed_body = usize::try_from(file_end)
            .unwrap_or(0)
            .saturating_sub(file_start);

        let needed = paragraphs(packed_body) + usize::from(min_alloc);
        Ok(needed.saturating_sub(paragraphs(code_len)) as u16)
    }

    /// Find the packed relocation table behind the decompression stub.
    /// Stub variants this crate does not recognize yield an empty table
    /// rather than an error.
    fn parse_stub_relocations(
        &self,
        data: &[u8],
        params: &ExepackParams,
    ) -> Result<Vec<Relocation>> {
        let stub_start = params.header_offset + params.header_len;
        let stub_and_relocs_len = usize::from(params.header.exepack_size)
            .checked_sub(params.header_len)
            .ok_or(DecodeError::BadHeaderLength(params.header_len))?;

        if data.len() < stub_start + stub_and_relocs_len {
            return Err(DecodeError::InputTooShort {
                needed: stub_start + stub_and_relocs_len,
                have: data.len(),
            });
        }
        let stub_and_relocs = &data[stub_start..stub_start + stub_and_relocs_len];

        match locate_stub_end(stub_and_relocs) {
            Some(stub_len) if stub_len <= stub_and_relocs.len() => {
                parse_packed_relocations(&stub_and_relocs[stub_len..])
            }
            _ => Ok(Vec::new()),
        }
    }
}

/// Skip up to 15 bytes of 0xFF alignment padding from the end of
/// `buf[..pos]` and return the adjusted position.
fn unpad(buf: &[u8], mut pos: usize) -> usize {
    for _ in 0..15 {
        if pos == 0 || buf[pos - 1] != 0xFF {
            break;
        }
        pos -= 1;
    }
    pos
}

/// The backward expansion loop. Commands are read from `buf[..compressed_len]`
/// back to front and output is written back to front toward index 0; the
/// buffer grows to `uncompressed_len` first so late reads and early writes
/// share one allocation, exactly like the resident stub.
fn decompress_backward(
    buf: &mut Vec<u8>,
    compressed_len: usize,
    uncompressed_len: usize,
) -> Result<()> {
    let mut src = compressed_len;
    let mut dst = uncompressed_len;

    if dst > buf.len() {
        buf.resize(dst, 0);
    }

    src = unpad(buf, src);

    loop {
        src = src.checked_sub(1).ok_or(DecodeError::SourceUnderflow)?;
        let command = buf[src];

        src = src.checked_sub(2).ok_or(DecodeError::SourceUnderflow)?;
        let length = usize::from(u16::from_le_bytes([buf[src], buf[src + 1]]));

        match command & 0xFE {
            CMD_FILL => {
                src = src.checked_sub(1).ok_or(DecodeError::SourceUnderflow)?;
                let fill = buf[src];
                dst = dst
                    .checked_sub(length)
                    .ok_or(DecodeError::DestinationUnderflow)?;
                for i in 0..length {
                    buf[dst + i] = fill;
                }
            }
            CMD_COPY => {
                src = src
                    .checked_sub(length)
                    .ok_or(DecodeError::SourceUnderflow)?;
                dst = dst
                    .checked_sub(length)
                    .ok_or(DecodeError::DestinationUnderflow)?;
                // Source and destination ranges may overlap; copying the
                // highest byte first matches the stub's rep movsb with DF set.
                for i in (0..length).rev() {
                    buf[dst + i] = buf[src + i];
                }
            }
            _ => {
                return Err(DecodeError::UnknownCommand {
                    command,
                    offset: src + 2,
                });
            }
        }

        if command & 0x01 != 0 {
            break;
        }
    }

    // The write cursor must consume at least everything past the compressed
    // stream; stopping short would leave uninitialized bytes between them.
    if compressed_len < dst {
        return Err(DecodeError::Gap {
            dst,
            compressed_len,
        });
    }

    buf.truncate(uncompressed_len);
    Ok(())
}

/// Find the end of the decompression stub by matching the shared
/// instruction suffix, and skip the trailing error string. Returns `None`
/// for stub variants outside the pattern table.
fn locate_stub_end(stub: &[u8]) -> Option<usize> {
    stub.windows(STUB_SUFFIX.len())
        .position(|window| window == STUB_SUFFIX)
        .map(|i| i + STUB_SUFFIX.len() + STUB_TRAILER_LEN)
}

/// Decode the packed relocation table: sixteen groups, one per 4-bit
/// segment prefix, each a count word followed by that many offset words.
/// Empty groups are common mid-table; only the group structure terminates
/// parsing, never a zero count.
fn parse_packed_relocations(reloc_data: &[u8]) -> Result<Vec<Relocation>> {
    let mut relocations = Vec::new();
    let mut pos = 0;

    for segment_index in 0..16u16 {
        let count = read_u16le(reloc_data, pos).map_err(|_| DecodeError::UnexpectedEof)?;
        pos += 2;

        for _ in 0..count {
            let offset = read_u16le(reloc_data, pos).map_err(|_| DecodeError::UnexpectedEof)?;
            pos += 2;
            relocations.push(Relocation::new(segment_index * 0x1000, offset));
        }
    }

    Ok(relocations)
}
