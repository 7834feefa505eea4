//! PKLITE decompressor (PKWARE's executable packer)
//!
//! PKLITE images identify their release through the reserved MZ header
//! word at offset 0x1C. The info word drives everything: where the
//! compressed bit-stream starts, whether literal bytes are XOR-obfuscated,
//! which length-code table is in effect, and how the relocation table is
//! packed. The body is a bit-oriented LZ stream; after its end sentinel
//! come the relocation table and a footer with the real SS/SP/CS and
//! checksum.

mod codes;
mod params;

use crate::bitstream::BitReader;
use crate::common::{
    DecodeError, DecompressionResult, Relocation, Result, MAX_IMAGE_BYTES, PARAGRAPH,
};
use codes::{LENGTH_EOF, LENGTH_SEGMENT_MARK, LENGTH_UNCOMPRESSED};

/// Whether an info word names a PKLITE release this crate can decode.
/// Container layers use this to tell a PKLITE image from an executable
/// that merely has data in the reserved header word.
pub fn is_supported_info(info: u16) -> bool {
    params::is_supported(info)
}

/// Header-derived facts about a PKLITE image, available without running
/// the decoder. Mirrors what the release's entry stub knows about itself.
#[derive(Debug, Clone, Copy)]
pub struct PkliteInfo {
    /// Declared decompressed size in bytes (an upper bound)
    pub decomp_size: u32,
    /// Declared compressed size in bytes
    pub compressed_size: u32,
    /// Size of the attached decompression stub
    pub decompressor_size: u32,
    /// Offset of the compressed stream, relative to the MZ header end
    pub data_offset: u32,
    /// A verbatim trailing region follows the compressed stream
    pub uncompressed_region: bool,
    /// The image carries a checksum over the decompressed code
    pub has_checksum: bool,
    /// Literal bytes are XOR-obfuscated
    pub xor_obfuscation: bool,
    /// The wide length-code table is in effect
    pub large_model: bool,
}

/// Decompressor for PKLITE-packed MZ executables.
#[derive(Debug, Clone, Copy)]
pub struct PkliteDecompressor {
    info: u16,
    header_paragraphs: u16,
}

impl PkliteDecompressor {
    /// Create a decompressor from the container-derived construction
    /// parameters: the info word at MZ header offset 0x1C and the header
    /// size in paragraphs. The info word is validated during `decompress`.
    pub fn new(pklite_info: u16, header_paragraphs: u16) -> Self {
        Self {
            info: pklite_info,
            header_paragraphs,
        }
    }

    /// Static algorithm identifier for diagnostics.
    pub fn name(&self) -> &'static str {
        "PKLITE"
    }

    /// Derive the parameter block from a packed image without running the
    /// decoder, for diagnostics and container-layer reporting.
    pub fn read_parameters(&self, data: &[u8]) -> Result<PkliteInfo> {
        let params = self.derive_params(data)?;
        Ok(PkliteInfo {
            decomp_size: params.decomp_size,
            compressed_size: params.compressed_size,
            decompressor_size: params.decompressor_size,
            data_offset: params.data_offset,
            uncompressed_region: params.uncompressed_region,
            has_checksum: params.has_checksum,
            xor_obfuscation: params.xor_obfuscation(),
            large_model: params.large_model(),
        })
    }

    fn derive_params(&self, data: &[u8]) -> Result<params::PkliteParams> {
        if !params::is_supported(self.info) {
            return Err(DecodeError::UnsupportedVariant(self.info));
        }
        let header_len = usize::from(self.header_paragraphs) * PARAGRAPH;
        let stub = data.get(header_len..).ok_or(DecodeError::InputTooShort {
            needed: header_len,
            have: data.len(),
        })?;
        params::read_parameters(self.info, stub)
    }

    /// Decompress a packed MZ image and recover code, registers, and the
    /// relocation table.
    pub fn decompress(&self, data: &[u8]) -> Result<DecompressionResult> {
        let header_len = usize::from(self.header_paragraphs) * PARAGRAPH;
        let params = self.derive_params(data)?;

        let decomp_size = params.decomp_size as usize;
        if decomp_size > MAX_IMAGE_BYTES {
            return Err(DecodeError::SizeLimit {
                size: decomp_size,
                limit: MAX_IMAGE_BYTES,
            });
        }

        let mut reader = BitReader::new(data);
        reader.seek(header_len + params.data_offset as usize)?;

        let mut result = DecompressionResult {
            code: expand(&mut reader, &params, decomp_size)?,
            // the (possibly reclassified) info word rides along so a
            // repacker can restore it
            extra_header: params.info.to_le_bytes().to_vec(),
            ..Default::default()
        };

        // The relocation table and footer follow the compressed body.
        result.relocations = if params.xor_obfuscation() {
            read_reloc_table_long(&mut reader)?
        } else {
            read_reloc_table_short(&mut reader)?
        };

        result.initial_ss = reader.word()?;
        result.initial_sp = reader.word()?;
        result.initial_cs = reader.word()?;
        result.initial_ip = 0;
        result.min_extra_paragraphs =
            (decomp_size.saturating_sub(result.code.len()).wrapping_add(0x0F) >> 4) as u16;
        result.checksum = reader.word()?;

        Ok(result)
    }
}

/// The main expansion loop, bounded by the declared decompressed size.
fn expand(
    reader: &mut BitReader<'_>,
    params: &params::PkliteParams,
    decomp_size: usize,
) -> Result<Vec<u8>> {
    let mut code: Vec<u8> = Vec::new();

    while code.len() < decomp_size {
        if reader.bit()? == 0 {
            let mut b = reader.byte()?;
            if params.xor_obfuscation() {
                b ^= reader.count();
            }
            code.push(b);
            continue;
        }

        // A set control bit starts a length prefix code; its first three
        // bits are 1, b, b.
        let mut seed: u16 = 1;
        seed = reader.bit()? | (seed << 1);
        seed = reader.bit()? | (seed << 1);
        let length = if params.large_model() {
            codes::read_length_large(seed, reader, params.uncompressed_region)?
        } else {
            codes::read_length_small(seed, reader, params.uncompressed_region)?
        };

        match length {
            LENGTH_EOF => break,
            LENGTH_SEGMENT_MARK => continue,
            LENGTH_UNCOMPRESSED => {
                // The tail of the image is stored as-is after the bit
                // stream's current data byte.
                while code.len() < decomp_size {
                    let b = reader.byte()?;
                    code.push(b);
                }
                break;
            }
            length => {
                // Two-byte matches always address the last 256 bytes and
                // skip the base-offset code.
                let base = if length != 2 {
                    codes::read_base_offset(reader)?
                } else {
                    0
                };
                let distance = usize::from(base) + usize::from(reader.byte()?);
                if distance == 0 || distance > code.len() {
                    return Err(DecodeError::InvalidDistance {
                        distance,
                        produced: code.len(),
                    });
                }
                let mut src = code.len() - distance;
                // distance < length repeats the pattern, as with LZEXE
                for _ in 0..length {
                    let b = code[src];
                    code.push(b);
                    src += 1;
                }
            }
        }
    }

    Ok(code)
}

/// Short relocation format: byte count, shared segment word, then the
/// offsets. A zero count terminates the table.
fn read_reloc_table_short(reader: &mut BitReader<'_>) -> Result<Vec<Relocation>> {
    let mut relocations = Vec::new();
    loop {
        let count = reader.byte()?;
        if count == 0 {
            break;
        }
        let segment = reader.word()?;
        for _ in 0..count {
            let offset = reader.word()?;
            relocations.push(Relocation::new(segment, offset));
        }
    }
    Ok(relocations)
}

/// Long relocation format: word count per group, the segment advancing by
/// 0x0FFF between groups. A count of 0xFFFF terminates the table; empty
/// groups do not.
fn read_reloc_table_long(reader: &mut BitReader<'_>) -> Result<Vec<Relocation>> {
    let mut relocations = Vec::new();
    let mut segment: u16 = 0;
    loop {
        let count = reader.word()?;
        if count == 0xFFFF {
            break;
        }
        for _ in 0..count {
            let offset = reader.word()?;
            relocations.push(Relocation::new(segment, offset));
        }
        segment = segment.wrapping_add(0x0FFF);
    }
    Ok(relocations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::testutil::BitStreamBuilder;

    const HEADER_PARAGRAPHS: u16 = 2;
    const HEADER_LEN: usize = HEADER_PARAGRAPHS as usize * PARAGRAPH;

    /// Assemble a minimal packed image: MZ header space, a stub window
    /// carrying the parameter bytes, and the given stream at the variant's
    /// data offset.
    fn build_image(stub_bytes: &[(usize, u8)], data_offset: usize, stream: &[u8]) -> Vec<u8> {
        let mut image = vec![0u8; HEADER_LEN + data_offset];
        for &(pos, value) in stub_bytes {
            image[HEADER_LEN + pos] = value;
        }
        image.extend_from_slice(stream);
        image
    }

    fn footer(ss: u16, sp: u16, cs: u16, checksum: u16) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&ss.to_le_bytes());
        out.extend_from_slice(&sp.to_le_bytes());
        out.extend_from_slice(&cs.to_le_bytes());
        out.extend_from_slice(&checksum.to_le_bytes());
        out
    }

    #[test]
    fn test_literals_and_footer() {
        // info 0x0100: small model, no obfuscation, data at 0x1D0,
        // declared size 0x20
        let mut b = BitStreamBuilder::new();
        b.bit(0).byte(b'H');
        b.bit(0).byte(b'I');
        b.bits(&[1, 0, 1, 1]).byte(0xFF); // end sentinel
        b.byte(0); // empty short relocation table
        b.bytes(&footer(0x0102, 0x0304, 0x0506, 0x0708));

        let image = build_image(&[(1, 0x02)], 0x1D0, &b.build());
        let result = PkliteDecompressor::new(0x0100, HEADER_PARAGRAPHS)
            .decompress(&image)
            .unwrap();

        assert_eq!(result.code, b"HI");
        assert_eq!(result.initial_ss, 0x0102);
        assert_eq!(result.initial_sp, 0x0304);
        assert_eq!(result.initial_cs, 0x0506);
        assert_eq!(result.initial_ip, 0);
        assert_eq!(result.checksum, 0x0708);
        assert_eq!(result.min_extra_paragraphs, (0x20 - 2 + 0x0F) >> 4);
        assert_eq!(result.extra_header, vec![0x00, 0x01]);
        assert!(result.relocations.is_empty());
    }

    #[test]
    fn test_match_small_model() {
        // 'A', then length 3 at distance 1, then end
        let mut b = BitStreamBuilder::new();
        b.bit(0).byte(b'A');
        b.bits(&[1, 0, 0]); // seed 4 resolves to length 3
        b.bit(1).byte(0x01); // base 0, distance 1
        b.bits(&[1, 0, 1, 1]).byte(0xFF);
        b.byte(0);
        b.bytes(&footer(0, 0, 0, 0));

        let image = build_image(&[(1, 0x01)], 0x1D0, &b.build());
        let result = PkliteDecompressor::new(0x0100, HEADER_PARAGRAPHS)
            .decompress(&image)
            .unwrap();
        assert_eq!(result.code, b"AAAA");
    }

    #[test]
    fn test_match_large_model() {
        // info 0x2105: large model, data at 0x290
        let mut b = BitStreamBuilder::new();
        b.bit(0).byte(b'A');
        b.bits(&[1, 1, 1]); // seed 7 resolves to length 3
        b.bit(1).byte(0x01);
        b.bits(&[1, 0, 1, 1, 1, 0, 0]).byte(0xFF); // end sentinel via 0x5C
        b.byte(0);
        b.bytes(&footer(0, 0, 0, 0));

        let image = build_image(&[(1, 0x01)], 0x290, &b.build());
        let result = PkliteDecompressor::new(0x2105, HEADER_PARAGRAPHS)
            .decompress(&image)
            .unwrap();
        assert_eq!(result.code, b"AAAA");
    }

    #[test]
    fn test_xor_obfuscation_and_long_relocs() {
        // info 0x1103: literals arrive XORed with the remaining-bit count
        let mut b = BitStreamBuilder::new();
        b.bit(0).byte(b'H' ^ 15);
        b.bit(0).byte(b'I' ^ 14);
        b.bits(&[1, 0, 1, 1]).byte(0xFF);
        // long table: group 0 has one offset, then terminator
        b.bytes(&1u16.to_le_bytes());
        b.bytes(&0x0042u16.to_le_bytes());
        b.bytes(&0xFFFFu16.to_le_bytes());
        b.bytes(&footer(0x1111, 0x2222, 0x3333, 0x4444));

        let image = build_image(&[(1, 0x02)], 0x1E0, &b.build());
        let result = PkliteDecompressor::new(0x1103, HEADER_PARAGRAPHS)
            .decompress(&image)
            .unwrap();
        assert_eq!(result.code, b"HI");
        assert_eq!(result.relocations, vec![Relocation::new(0, 0x0042)]);
        assert_eq!(result.initial_ss, 0x1111);
    }

    #[test]
    fn test_short_reloc_table_groups() {
        let mut b = BitStreamBuilder::new();
        b.bits(&[1, 0, 1, 1]).byte(0xFF); // empty body
        b.byte(2); // two offsets in segment 0x0010
        b.bytes(&0x0010u16.to_le_bytes());
        b.bytes(&0x0100u16.to_le_bytes());
        b.bytes(&0x0200u16.to_le_bytes());
        b.byte(1); // one offset in segment 0x0300
        b.bytes(&0x0300u16.to_le_bytes());
        b.bytes(&0x0005u16.to_le_bytes());
        b.byte(0);
        b.bytes(&footer(0, 0, 0, 0));

        let image = build_image(&[(1, 0x01)], 0x1D0, &b.build());
        let result = PkliteDecompressor::new(0x0100, HEADER_PARAGRAPHS)
            .decompress(&image)
            .unwrap();
        assert_eq!(
            result.relocations,
            vec![
                Relocation::new(0x0010, 0x0100),
                Relocation::new(0x0010, 0x0200),
                Relocation::new(0x0300, 0x0005),
            ]
        );
    }

    #[test]
    fn test_unsupported_info_word() {
        let image = vec![0u8; 0x400];
        assert!(matches!(
            PkliteDecompressor::new(0x4242, HEADER_PARAGRAPHS).decompress(&image),
            Err(DecodeError::UnsupportedVariant(0x4242))
        ));
    }

    #[test]
    fn test_bad_distance_fails() {
        // a match before any literal has been produced
        let mut b = BitStreamBuilder::new();
        b.bits(&[1, 0, 0]);
        b.bit(1).byte(0x01);

        let image = build_image(&[(1, 0x01)], 0x1D0, &b.build());
        assert!(matches!(
            PkliteDecompressor::new(0x0100, HEADER_PARAGRAPHS).decompress(&image),
            Err(DecodeError::InvalidDistance { .. })
        ));
    }

    #[test]
    fn test_truncated_body_fails() {
        let mut b = BitStreamBuilder::new();
        b.bit(0).byte(b'A');
        b.bit(0);
        let image = build_image(&[(1, 0x01)], 0x1D0, &b.build());
        assert!(matches!(
            PkliteDecompressor::new(0x0100, HEADER_PARAGRAPHS).decompress(&image),
            Err(DecodeError::UnexpectedEof)
        ));
    }
}
