//! PKLITE parameter derivation
//!
//! PKLITE never stores its geometry in one clean structure: the
//! decompressed size, compressed size, stub size, and the offset of the
//! compressed data are scattered through the entry stub at positions that
//! shifted from release to release. The reserved MZ header word at offset
//! 0x1C (the "info word": minor version, major version, and flag bits)
//! identifies the release, and this module maps each known info word to
//! the byte positions that hold its parameters.

use crate::common::{DecodeError, Result};

/// Bit in the info word that marks XOR obfuscation of literal bytes (and
/// selects the long relocation-table format).
pub(crate) const FLAG_XOR_OBFUSCATION: u16 = 0x1000;

/// Bit in the info word that marks the large compression model (wide
/// length-code table).
pub(crate) const FLAG_LARGE_MODEL: u16 = 0x2000;

/// Parameters derived from the info word and the entry stub.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PkliteParams {
    /// Info word after reclassification (the 1.14 stubs that really carry
    /// 1.32 payloads are renamed during derivation)
    pub info: u16,
    /// Declared decompressed size in bytes (an upper bound: BSS included)
    pub decomp_size: u32,
    /// Declared compressed size in bytes
    pub compressed_size: u32,
    /// Size of the attached decompression stub
    pub decompressor_size: u32,
    /// Offset of the compressed bit-stream, relative to the MZ header end
    /// (SYS-file prefixes already folded in)
    pub data_offset: u32,
    /// A verbatim trailing region follows the compressed stream
    pub uncompressed_region: bool,
    /// The image carries a checksum over the decompressed code
    pub has_checksum: bool,
}

impl PkliteParams {
    /// Literal bytes are XORed with the bit reader's remaining-bit count.
    pub(crate) fn xor_obfuscation(&self) -> bool {
        self.info & FLAG_XOR_OBFUSCATION != 0
    }

    /// The wide length-code table is in effect.
    pub(crate) fn large_model(&self) -> bool {
        self.info & FLAG_LARGE_MODEL != 0
    }
}

/// Whether this crate knows the parameter positions for an info word.
pub(crate) fn is_supported(info: u16) -> bool {
    matches!(info & 0x0FFF, 0x10C | 0x10D | 0x10E | 0x10F | 0x132 | 0x103)
        || matches!(info, 0x1114 | 0x3114 | 0x100 | 0x105 | 0x2105 | 0x210A)
}

/// Derive the decode parameters for `info` from `stub`, the code image
/// immediately following the MZ header.
pub(crate) fn read_parameters(info: u16, stub: &[u8]) -> Result<PkliteParams> {
    let byte = |i: usize| -> Result<u32> {
        stub.get(i)
            .copied()
            .map(u32::from)
            .ok_or(DecodeError::InputTooShort {
                needed: i + 1,
                have: stub.len(),
            })
    };
    let word = |i: usize| -> Result<u32> { Ok(byte(i)? | (byte(i + 1)? << 8)) };

    let mut info = info;
    let mut params = PkliteParams {
        info,
        decomp_size: 0,
        compressed_size: 0,
        decompressor_size: 0,
        data_offset: 0,
        uncompressed_region: false,
        has_checksum: false,
    };

    // The 1.14 stubs beginning with PUSH AX are repackaged 1.32 images.
    if (info == 0x1114 || info == 0x3114) && byte(0)? == 0x50 {
        info = (info & 0xF000) | 0x132;
        params.info = info;
    }

    match info {
        0x0100 | 0x0103 | 0x1103 | 0x2103 | 0x3103 | 0x0105 | 0x2105 => {
            params.decomp_size = (byte(1)? << 4) + (byte(2)? << 12);
            params.compressed_size = (byte(4)? << 4) + (byte(5)? << 12);
            params.decompressor_size =
                (byte(0x21)? << 1) + (byte(0x22)? << 9) + byte(0x27)? + (byte(0x28)? << 8);
            params.data_offset = match info {
                0x1103 => 0x1E0,
                0x2103 | 0x2105 => 0x290,
                0x3103 => 0x2A0,
                _ => 0x1D0,
            };
        }

        0x210A => {
            params.decomp_size = (byte(1)? << 4) + (byte(2)? << 12) + 0x100;
            params.compressed_size = (byte(4)? << 4) + (byte(5)? << 12);
            params.decompressor_size =
                (byte(0x37)? << 1) + (byte(0x38)? << 9) + byte(0x3C)? + (byte(0x3D)? << 8);
            params.data_offset = 0x290;
        }

        0x010C | 0x110C | 0x210C | 0x310C | 0x010D | 0x110D | 0x210D | 0x310D => {
            params.decomp_size = (byte(1)? << 4) + (byte(2)? << 12) + 0x100;
            params.compressed_size = (byte(4)? << 4) + (byte(5)? << 12);
            params.decompressor_size =
                (byte(0x1D)? << 1) + (byte(0x1E)? << 9) + byte(0x23)? + (byte(0x24)? << 8);
            params.data_offset = match info {
                0x210C | 0x310C | 0x210D | 0x310D => 0x290,
                0x110C | 0x110D => 0x1E0,
                _ => 0x1D0,
            };
        }

        0x010E | 0x010F | 0x210F => {
            // .SYS images of the 1.0F family start with a short jump the
            // loader never strips; fold its length into the data offset.
            let mut shift = 0;
            if byte(0)? == 0xEB && (info == 0x010F || info == 0x210F) {
                shift = byte(1)? + 2;
            }
            params.decomp_size = (byte(1)? << 4) + (byte(2)? << 12) + 0x100;
            params.compressed_size = (byte(4)? << 4) + (byte(5)? << 12);
            params.decompressor_size =
                (byte(0x37)? << 1) + (byte(0x38)? << 9) + byte(0x3D)? + (byte(0x3E)? << 8);
            let base = if info == 0x210F { 0x290 } else { 0x1D0 };
            params.data_offset = base + shift;
        }

        0x110E | 0x310E | 0x110F | 0x310F => {
            params.decomp_size = (byte(1)? << 4) + (byte(2)? << 12) + 0x100;
            params.compressed_size = (byte(4)? << 4) + (byte(5)? << 12);
            params.decompressor_size =
                (byte(0x35)? << 1) + (byte(0x36)? << 9) + byte(0x38)? + (byte(0x39)? << 8);
            params.data_offset = match info {
                0x310E | 0x310F => 0x2C0,
                _ => 0x200,
            };
        }

        0x210E => {
            params.decomp_size = (byte(1)? << 4) + (byte(2)? << 12) + 0x100;
            params.compressed_size = (byte(4)? << 4) + (byte(5)? << 12);
            params.decompressor_size =
                (byte(0x36)? << 1) + (byte(0x37)? << 9) + byte(0x3C)? + (byte(0x3D)? << 8);
            params.data_offset = 0x290;
        }

        0x1114 => {
            params.decomp_size = (byte(1)? << 4) + (byte(2)? << 12) + 0x100;
            params.compressed_size = word(4)?;
            params.decompressor_size = (byte(0x34)? << 1) + (byte(0x35)? << 9);
            params.data_offset = relative_data_offset(word(0x37)?);
        }

        0x3114 => {
            params.decomp_size = (byte(1)? << 4) + (byte(2)? << 12) + 0x100;
            params.compressed_size = word(4)?;
            params.decompressor_size = (byte(0x3C)? << 1) + (byte(0x3D)? << 9);
            params.data_offset = relative_data_offset(word(0x3F)?);
        }

        0x0132 | 0x2132 => {
            params.decomp_size = (byte(2)? << 4) + (byte(3)? << 12) + 0x100;
            params.compressed_size = word(5)?;
            params.decompressor_size = (byte(0x48)? << 1) + (byte(0x49)? << 9);
            let probe = params.decompressor_size << 1;
            if probe == 0x0E || probe == 0x13F {
                params.uncompressed_region = true;
            }
            params.decompressor_size = (params.decompressor_size + 0x62) & !0xF;
            params.data_offset = params.decompressor_size;
        }

        0x1132 | 0x3132 => {
            params.decomp_size = (byte(2)? << 4) + (byte(3)? << 12) + 0x100;
            params.compressed_size = word(5)?;
            params.decompressor_size = (byte(0x56)? << 1) + (byte(0x57)? << 9);
            let probe = word(0x59)?;
            if matches!(probe, 0x36A | 0x334 | 0x42A | 0x3F4) {
                params.has_checksum = true;
            }
            if matches!(probe, 0x36A | 0x42A | 0x35C | 0x41A) {
                params.uncompressed_region = true;
            }
            params.data_offset = relative_data_offset(probe);
        }

        _ => return Err(DecodeError::UnsupportedVariant(info)),
    }

    Ok(params)
}

/// The 1.14/1.32 stubs store the data position as an IP-relative address;
/// rebase it onto the code image (the wrapping constants come straight
/// from the stub's own arithmetic).
fn relative_data_offset(raw: u32) -> u32 {
    raw.wrapping_add(0xFF10).wrapping_add(0xFFFF_0000) & 0xFFFF_FFF0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_set() {
        for info in [
            0x0100, 0x0103, 0x1103, 0x2105, 0x210A, 0x010C, 0x310D, 0x010E, 0x210F, 0x1114,
            0x0132, 0x3132,
        ] {
            assert!(is_supported(info), "{info:#06x}");
        }
        for info in [0x0000, 0x0101, 0x0200, 0x4100, 0xFFFF] {
            assert!(!is_supported(info), "{info:#06x}");
        }
    }

    #[test]
    fn test_v100_parameters() {
        let mut stub = vec![0u8; 0x60];
        stub[1] = 0x02; // decomp 0x020
        stub[2] = 0x01; // + 0x1000
        stub[4] = 0x05; // comp 0x050
        stub[5] = 0x00;
        stub[0x21] = 0x10;
        stub[0x22] = 0x01;
        stub[0x27] = 0x04;
        stub[0x28] = 0x00;

        let params = read_parameters(0x0100, &stub).unwrap();
        assert_eq!(params.decomp_size, 0x1020);
        assert_eq!(params.compressed_size, 0x0050);
        assert_eq!(params.decompressor_size, 0x10 * 2 + 0x01 * 512 + 0x04);
        assert_eq!(params.data_offset, 0x1D0);
        assert!(!params.xor_obfuscation());
        assert!(!params.large_model());
        assert!(!params.uncompressed_region);
    }

    #[test]
    fn test_flag_bits() {
        let stub = vec![0u8; 0x60];
        let params = read_parameters(0x1103, &stub).unwrap();
        assert!(params.xor_obfuscation());
        assert!(!params.large_model());
        assert_eq!(params.data_offset, 0x1E0);

        let params = read_parameters(0x2105, &stub).unwrap();
        assert!(!params.xor_obfuscation());
        assert!(params.large_model());
        assert_eq!(params.data_offset, 0x290);
    }

    #[test]
    fn test_sys_shift() {
        let mut stub = vec![0u8; 0x60];
        stub[0] = 0xEB; // jmp short
        stub[1] = 0x10;
        let params = read_parameters(0x010F, &stub).unwrap();
        assert_eq!(params.data_offset, 0x1D0 + 0x10 + 2);

        // the 1.0E release never shipped as .SYS, so no shift applies
        let params = read_parameters(0x010E, &stub).unwrap();
        assert_eq!(params.data_offset, 0x1D0);
    }

    #[test]
    fn test_v150_flags() {
        let mut stub = vec![0u8; 0x60];
        stub[0x59] = 0x5C; // probe word 0x035C
        stub[0x5A] = 0x03;
        let params = read_parameters(0x1132, &stub).unwrap();
        assert!(params.uncompressed_region);
        assert!(!params.has_checksum);
        assert_eq!(params.data_offset, (0x35C + 0xFF10u32).wrapping_sub(0x1_0000) & !0xF);

        let mut stub = vec![0u8; 0x60];
        stub[0x59] = 0xF4;
        stub[0x5A] = 0x03; // probe word 0x03F4
        let params = read_parameters(0x1132, &stub).unwrap();
        assert!(params.has_checksum);
        assert!(!params.uncompressed_region);
    }

    #[test]
    fn test_v114_reclassified_as_v132() {
        let mut stub = vec![0u8; 0x60];
        stub[0] = 0x50; // push ax
        let params = read_parameters(0x1114, &stub).unwrap();
        assert_eq!(params.info, 0x1132);
    }

    #[test]
    fn test_short_stub_rejected() {
        let stub = vec![0u8; 0x10];
        assert!(matches!(
            read_parameters(0x0100, &stub),
            Err(DecodeError::InputTooShort { .. })
        ));
    }
}
