//! PackBits block decoding (compression 32773)

use crate::error::{Error, Result};

/// Decompresses a PackBits run-length encoded block
///
/// Header `n` in 0..=127 copies `n + 1` literal bytes, -127..=-1 repeats the
/// next byte `1 - n` times and -128 is a no-op.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut output = Vec::with_capacity(data.len() * 2);
    let mut rest = data;

    while let Some((&header, tail)) = rest.split_first() {
        let header = header as i8;
        rest = tail;

        match header {
            -128 => {}
            0..=127 => {
                let count = header as usize + 1;
                if rest.len() < count {
                    return Err(Error::InvalidFormat(format!(
                        "PackBits: literal run of {} bytes truncated to {}",
                        count,
                        rest.len()
                    )));
                }
                let (literal, tail) = rest.split_at(count);
                output.extend_from_slice(literal);
                rest = tail;
            }
            -127..=-1 => {
                let (&byte, tail) = rest.split_first().ok_or_else(|| {
                    Error::InvalidFormat("PackBits: missing repeated byte".to_string())
                })?;
                let count = (1 - header as isize) as usize;
                output.resize(output.len() + count, byte);
                rest = tail;
            }
        }
    }

    Ok(output)
}
