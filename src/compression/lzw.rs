//! LZW codec as used by TIFF (compression 5)
//!
//! Codes are packed MSB-first, start at 9 bits and grow to 12 bits one code
//! early ("early change"), which is what libtiff writes.

use std::collections::HashMap;
use crate::error::{Error, Result};

const CLEAR_CODE: u16 = 256;
const EOI_CODE: u16 = 257;
const FIRST_CODE: usize = 258;
const MIN_BITS: u8 = 9;
const MAX_BITS: u8 = 12;
const MAX_CODES: usize = 1 << MAX_BITS;

/// Decompresses LZW compressed data
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::with_capacity(data.len() * 2);
    // Each table entry is a (start, len) span of already decoded output.
    let mut table: Vec<(usize, usize)> = Vec::with_capacity(MAX_CODES - FIRST_CODE);
    let mut reader = BitReader::new(data);
    let mut width = MIN_BITS;
    let mut previous: Option<(usize, usize)> = None;

    while let Some(code) = reader.read_bits(width) {
        if code == EOI_CODE {
            break;
        }

        if code == CLEAR_CODE {
            table.clear();
            width = MIN_BITS;
            previous = None;
            continue;
        }

        let start = output.len();
        let len = if code < CLEAR_CODE {
            output.push(code as u8);
            1
        } else {
            let index = code as usize - FIRST_CODE;
            if index < table.len() {
                let (pos, len) = table[index];
                output.extend_from_within(pos..pos + len);
                len
            } else if index == table.len() {
                let (pos, len) = previous.ok_or_else(|| {
                    Error::InvalidFormat("LZW: code references an empty table".to_string())
                })?;
                output.extend_from_within(pos..pos + len);
                output.push(output[pos]);
                len + 1
            } else {
                return Err(Error::InvalidFormat(format!("Invalid LZW code: {}", code)));
            }
        };

        if let Some((pos, prev_len)) = previous {
            if FIRST_CODE + table.len() < MAX_CODES {
                table.push((pos, prev_len + 1));
            }
        }
        previous = Some((start, len));

        let next_code = FIRST_CODE + table.len();
        if next_code + 1 >= (1 << width) && width < MAX_BITS {
            width += 1;
        }
    }

    Ok(output)
}

/// Compresses data into a TIFF LZW stream
pub fn compress(data: &[u8]) -> Vec<u8> {
    let mut writer = BitWriter::with_capacity(data.len() / 2 + 8);
    let mut dictionary: HashMap<(u16, u8), u16> = HashMap::new();
    let mut next_code = FIRST_CODE;
    let mut width = MIN_BITS;

    writer.write_bits(CLEAR_CODE, width);

    let Some((&first, rest)) = data.split_first() else {
        writer.write_bits(EOI_CODE, width);
        return writer.finish();
    };

    let mut current = first as u16;
    for &byte in rest {
        if let Some(&code) = dictionary.get(&(current, byte)) {
            current = code;
            continue;
        }

        writer.write_bits(current, width);
        dictionary.insert((current, byte), next_code as u16);
        next_code += 1;

        if next_code == MAX_CODES - 2 {
            writer.write_bits(CLEAR_CODE, width);
            dictionary.clear();
            next_code = FIRST_CODE;
            width = MIN_BITS;
        } else if next_code >= (1 << width) && width < MAX_BITS {
            width += 1;
        }

        current = byte as u16;
    }

    writer.write_bits(current, width);
    // The decoder adds one more entry after the final code.
    next_code += 1;
    if next_code >= (1 << width) && width < MAX_BITS {
        width += 1;
    }
    writer.write_bits(EOI_CODE, width);
    writer.finish()
}

/// Reads MSB-first variable-width codes
struct BitReader<'a> {
    data: &'a [u8],
    byte_index: usize,
    buffer: u32,
    buffered_bits: u8,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            byte_index: 0,
            buffer: 0,
            buffered_bits: 0,
        }
    }

    fn read_bits(&mut self, count: u8) -> Option<u16> {
        while self.buffered_bits < count {
            let byte = *self.data.get(self.byte_index)?;
            self.byte_index += 1;
            self.buffer = (self.buffer << 8) | byte as u32;
            self.buffered_bits += 8;
        }

        let shift = self.buffered_bits - count;
        let code = (self.buffer >> shift) & ((1u32 << count) - 1);
        self.buffered_bits = shift;
        self.buffer &= (1u32 << shift) - 1;
        Some(code as u16)
    }
}

/// Writes MSB-first variable-width codes
struct BitWriter {
    output: Vec<u8>,
    buffer: u32,
    buffered_bits: u8,
}

impl BitWriter {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            output: Vec::with_capacity(capacity),
            buffer: 0,
            buffered_bits: 0,
        }
    }

    fn write_bits(&mut self, code: u16, count: u8) {
        self.buffer = (self.buffer << count) | code as u32;
        self.buffered_bits += count;
        while self.buffered_bits >= 8 {
            self.buffered_bits -= 8;
            self.output.push((self.buffer >> self.buffered_bits) as u8);
        }
        self.buffer &= (1u32 << self.buffered_bits) - 1;
    }

    fn finish(mut self) -> Vec<u8> {
        if self.buffered_bits > 0 {
            self.output.push((self.buffer << (8 - self.buffered_bits)) as u8);
        }
        self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_reader_msb_first() {
        let data = vec![0b1101_0010, 0b1011_0101];
        let mut reader = BitReader::new(&data);

        assert_eq!(reader.read_bits(3), Some(0b110));
        assert_eq!(reader.read_bits(5), Some(0b10010));
        assert_eq!(reader.read_bits(8), Some(0b1011_0101));
        assert_eq!(reader.read_bits(1), None);
    }

    #[test]
    fn test_known_stream() {
        // CLEAR, 'A', 'B', 258 ("AB"), EOI at 9 bits each
        let mut writer = BitWriter::with_capacity(8);
        for code in [CLEAR_CODE, 65, 66, 258, EOI_CODE] {
            writer.write_bits(code, 9);
        }
        let stream = writer.finish();
        assert_eq!(decompress(&stream).unwrap(), b"ABAB".to_vec());
    }

    #[test]
    fn test_kwkwk_case() {
        // "AAA" encodes as 'A', 258 where 258 is not yet in the decoder table
        let mut writer = BitWriter::with_capacity(8);
        for code in [CLEAR_CODE, 65, 258, EOI_CODE] {
            writer.write_bits(code, 9);
        }
        assert_eq!(decompress(&writer.finish()).unwrap(), b"AAA".to_vec());
    }

    #[test]
    fn test_code_width_growth_and_table_reset() {
        // Enough distinct pairs to pass 10, 11 and 12 bit widths and force a clear
        let data: Vec<u8> = (0..200_000u32)
            .map(|i| ((i * 7919) ^ (i >> 3)) as u8)
            .collect();
        let compressed = compress(&data);
        assert_eq!(decompress(&compressed).unwrap(), data);
    }

    #[test]
    fn test_empty_input() {
        assert!(decompress(&compress(&[])).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_code() {
        let mut writer = BitWriter::with_capacity(8);
        for code in [CLEAR_CODE, 300, EOI_CODE] {
            writer.write_bits(code, 9);
        }
        assert!(decompress(&writer.finish()).is_err());
    }
}
