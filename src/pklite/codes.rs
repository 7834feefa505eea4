//! PKLITE prefix-code decoding
//!
//! Match lengths and the high byte of match distances are Huffman-style
//! prefix codes. The decoder shifts control bits into an accumulator until
//! the accumulated value hits a known codeword, exactly reproducing the
//! jump tables of the resident stub. Three sentinels escape the normal
//! length range: end of stream, a segment boundary marker (large model
//! only), and the switch to the verbatim trailing region.

use crate::bitstream::BitReader;
use crate::common::Result;

/// Sentinel: end of the compressed stream.
pub(crate) const LENGTH_EOF: u16 = 0xFFFF;
/// Sentinel: segment boundary marker, no output.
pub(crate) const LENGTH_SEGMENT_MARK: u16 = 0xFFFE;
/// Sentinel: the remainder of the image is stored verbatim.
pub(crate) const LENGTH_UNCOMPRESSED: u16 = 0xFFFD;

/// Resolve a match-length code under the small compression model. `seed`
/// carries the first three control bits (1, b, b); more bits are drawn as
/// needed.
pub(crate) fn read_length_small(
    seed: u16,
    reader: &mut BitReader<'_>,
    uncompressed_region: bool,
) -> Result<u16> {
    let mut code = seed;
    loop {
        let resolved = match code {
            0x04 => 3,
            0x0A => 2,
            0x0B => {
                // escape: one raw byte extends the length range
                let mut long = 0x0A + u16::from(reader.byte()?);
                if long == 0x109 {
                    long = LENGTH_EOF;
                }
                if long == 0x108 && uncompressed_region {
                    long = LENGTH_UNCOMPRESSED;
                }
                long
            }
            0x0C => 4,
            0x0D => 5,
            0x1C => 6,
            0x1D => 7,
            0x1E => 8,
            0x1F => 9,
            _ => {
                code = reader.bit()? | (code << 1);
                continue;
            }
        };
        return Ok(resolved);
    }
}

/// Resolve a match-length code under the large compression model.
pub(crate) fn read_length_large(
    seed: u16,
    reader: &mut BitReader<'_>,
    uncompressed_region: bool,
) -> Result<u16> {
    let mut code = seed;
    loop {
        let resolved = match code {
            0x006 => 2,
            0x007 => 3,
            0x008 => 4,
            0x012 => 5,
            0x013 => 6,
            0x014 => 7,
            0x02A => 8,
            0x02B => 9,
            0x02C => 0x0A,
            0x05A => 0x0B,
            0x05B => 0x0C,
            0x05C => {
                let mut long = 0x19 + u16::from(reader.byte()?);
                if long == 0x118 {
                    long = LENGTH_EOF;
                }
                if long == 0x117 {
                    long = LENGTH_SEGMENT_MARK;
                }
                if long == 0x116 && !uncompressed_region {
                    long = LENGTH_UNCOMPRESSED;
                }
                long
            }
            0x0BA => 0x0D,
            0x0BB => 0x0E,
            0x0BC => 0x0F,
            0x17A => 0x10,
            0x17B => 0x11,
            0x17C => 0x12,
            0x2FA => 0x13,
            0x2FB => 0x14,
            0x2FC => 0x15,
            0x2FD => 0x16,
            0x2FE => 0x17,
            0x2FF => 0x18,
            _ => {
                code = reader.bit()? | (code << 1);
                continue;
            }
        };
        return Ok(resolved);
    }
}

/// Read the base (high byte) of a match distance. A leading 1 bit means
/// base 0; otherwise the code tree spreads the bases 0x100..0x1F00 over
/// two to eight further bits.
pub(crate) fn read_base_offset(reader: &mut BitReader<'_>) -> Result<u16> {
    loop {
        let mut code = reader.bit()?;
        if code == 1 {
            return Ok(0);
        }
        code = reader.bit()? | (code << 1);
        code = reader.bit()? | (code << 1);
        code = reader.bit()? | (code << 1);
        match code {
            0 => return Ok(0x100),
            1 => return Ok(0x200),
            _ => {}
        }
        code = reader.bit()? | (code << 1);
        match code {
            4 => return Ok(0x300),
            5 => return Ok(0x400),
            6 => return Ok(0x500),
            7 => return Ok(0x600),
            _ => {}
        }
        code = reader.bit()? | (code << 1);
        match code {
            0x10 => return Ok(0x700),
            0x11 => return Ok(0x800),
            0x12 => return Ok(0x900),
            0x13 => return Ok(0xA00),
            0x14 => return Ok(0xB00),
            0x15 => return Ok(0xC00),
            0x16 => return Ok(0xD00),
            _ => {}
        }
        code = reader.bit()? | (code << 1);
        if code >= 0x2E {
            return Ok((code & 0x1F) << 8);
        }
        // falls back to the top of the stub's decode loop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::testutil::BitStreamBuilder;

    fn reader_for(data: &[u8]) -> BitReader<'_> {
        BitReader::new(data)
    }

    #[test]
    fn test_small_direct_codes() {
        let data = [0u8; 4];
        assert_eq!(
            read_length_small(0x04, &mut reader_for(&data), false).unwrap(),
            3
        );
        // 5 needs one more bit: 0 -> 0x0A resolves to 2
        let mut b = BitStreamBuilder::new();
        b.bit(0);
        let data = b.build();
        assert_eq!(
            read_length_small(0x05, &mut reader_for(&data), false).unwrap(),
            2
        );
        // 7 -> two more bits 0,0 -> 0x1C resolves to 6
        let mut b = BitStreamBuilder::new();
        b.bits(&[0, 0]);
        let data = b.build();
        assert_eq!(
            read_length_small(0x07, &mut reader_for(&data), false).unwrap(),
            6
        );
    }

    #[test]
    fn test_small_long_escape() {
        // 0x0B + byte 0x20 = length 0x2A
        let mut b = BitStreamBuilder::new();
        b.bit(1).byte(0x20);
        let data = b.build();
        assert_eq!(
            read_length_small(0x05, &mut reader_for(&data), false).unwrap(),
            0x2A
        );
    }

    #[test]
    fn test_small_sentinels() {
        let mut b = BitStreamBuilder::new();
        b.bit(1).byte(0xFF);
        let data = b.build();
        assert_eq!(
            read_length_small(0x05, &mut reader_for(&data), false).unwrap(),
            LENGTH_EOF
        );

        // 0x108 is a plain length without the flag, a sentinel with it
        let mut b = BitStreamBuilder::new();
        b.bit(1).byte(0xFE);
        let data = b.build();
        assert_eq!(
            read_length_small(0x05, &mut reader_for(&data), false).unwrap(),
            0x108
        );
        let mut b = BitStreamBuilder::new();
        b.bit(1).byte(0xFE);
        let data = b.build();
        assert_eq!(
            read_length_small(0x05, &mut reader_for(&data), true).unwrap(),
            LENGTH_UNCOMPRESSED
        );
    }

    #[test]
    fn test_large_direct_codes() {
        let data = [0u8; 4];
        assert_eq!(
            read_length_large(0x06, &mut reader_for(&data), false).unwrap(),
            2
        );
        assert_eq!(
            read_length_large(0x07, &mut reader_for(&data), false).unwrap(),
            3
        );
        // 4 -> bit 0 -> 8 resolves to 4
        let mut b = BitStreamBuilder::new();
        b.bit(0);
        let data = b.build();
        assert_eq!(
            read_length_large(0x04, &mut reader_for(&data), false).unwrap(),
            4
        );
    }

    #[test]
    fn test_large_sentinels() {
        // 5 -> bits 1,1,0,0 walk to 0x5C, byte 0xFF -> EOF
        let mut b = BitStreamBuilder::new();
        b.bits(&[1, 1, 0, 0]).byte(0xFF);
        let data = b.build();
        assert_eq!(
            read_length_large(0x05, &mut reader_for(&data), false).unwrap(),
            LENGTH_EOF
        );

        let mut b = BitStreamBuilder::new();
        b.bits(&[1, 1, 0, 0]).byte(0xFE);
        let data = b.build();
        assert_eq!(
            read_length_large(0x05, &mut reader_for(&data), false).unwrap(),
            LENGTH_SEGMENT_MARK
        );
    }

    #[test]
    fn test_base_offset_zero() {
        let mut b = BitStreamBuilder::new();
        b.bit(1);
        let data = b.build();
        assert_eq!(read_base_offset(&mut reader_for(&data)).unwrap(), 0);
    }

    #[test]
    fn test_base_offset_tree() {
        // 0, then 0,0,0 -> 0x100
        let mut b = BitStreamBuilder::new();
        b.bits(&[0, 0, 0, 0]);
        let data = b.build();
        assert_eq!(read_base_offset(&mut reader_for(&data)).unwrap(), 0x100);

        // 0, then 0,0,1 -> 1 -> 0x200
        let mut b = BitStreamBuilder::new();
        b.bits(&[0, 0, 0, 1]);
        let data = b.build();
        assert_eq!(read_base_offset(&mut reader_for(&data)).unwrap(), 0x200);

        // 0, then 0,1,0, then 0 -> 4 -> 0x300
        let mut b = BitStreamBuilder::new();
        b.bits(&[0, 0, 1, 0, 0]);
        let data = b.build();
        assert_eq!(read_base_offset(&mut reader_for(&data)).unwrap(), 0x300);

        // deepest tier: 0, 1,1,1, 1, 1, 1 -> 0x3F -> 0x1F00
        let mut b = BitStreamBuilder::new();
        b.bits(&[0, 1, 1, 1, 1, 1, 1]);
        let data = b.build();
        assert_eq!(read_base_offset(&mut reader_for(&data)).unwrap(), 0x1F00);
    }

    #[test]
    fn test_truncated_code_fails() {
        // no control words left to draw bits from
        assert!(read_length_small(0x05, &mut reader_for(&[]), false).is_err());
        assert!(read_length_large(0x05, &mut reader_for(&[]), false).is_err());
        assert!(read_base_offset(&mut reader_for(&[])).is_err());
    }
}
