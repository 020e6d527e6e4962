//! Tile identifiers and their canonical string form
//!
//! A tile id encodes its 1-based grid position as `r{row:03}_c{col:03}`.
//! The padding is a minimum width, so `r1234_c005` is valid too.

use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use crate::error::{Error, Result};

const ROW_MARKER: char = 'r';
const COL_MARKER: char = 'c';
const SEPARATOR: char = '_';
const MIN_DIGITS: usize = 3;

/// Grid position of a tile, both indices 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId {
    pub row: u32,
    pub col: u32,
}

impl TileId {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Locates a tile id inside a tile file name of the form `<layer>_<id>.<ext>`
    pub fn find_in_name(file_name: &str) -> Option<TileId> {
        let stem = match file_name.rfind('.') {
            Some(dot) => &file_name[..dot],
            None => file_name,
        };
        // The id is the last two '_'-separated parts of the stem
        let col_sep = stem.rfind(SEPARATOR)?;
        let row_sep = stem[..col_sep].rfind(SEPARATOR).map_or(0, |i| i + 1);
        decode(&stem[row_sep..]).ok().map(|(row, col)| TileId::new(row, col))
    }
}

/// Encodes a 1-based (row, col) as a tile id string
pub fn encode(row: u32, col: u32) -> String {
    format!(
        "{ROW_MARKER}{row:0width$}{SEPARATOR}{COL_MARKER}{col:0width$}",
        width = MIN_DIGITS
    )
}

/// Decodes a tile id string back to its (row, col)
pub fn decode(id: &str) -> Result<(u32, u32)> {
    let invalid = |reason: &str| Error::Addressing(format!("Invalid tile id '{}': {}", id, reason));

    let rest = id
        .strip_prefix(ROW_MARKER)
        .ok_or_else(|| invalid("missing row marker"))?;
    let (row, col) = rest
        .split_once(SEPARATOR)
        .ok_or_else(|| invalid("missing separator"))?;
    let col = col
        .strip_prefix(COL_MARKER)
        .ok_or_else(|| invalid("missing column marker"))?;

    Ok((parse_index(row, &invalid)?, parse_index(col, &invalid)?))
}

fn parse_index(digits: &str, invalid: &dyn Fn(&str) -> Error) -> Result<u32> {
    if digits.len() < MIN_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid("index must be at least three ASCII digits"));
    }
    // Longer numbers never carry extra leading zeros
    if digits.len() > MIN_DIGITS && digits.starts_with('0') {
        return Err(invalid("non-canonical zero padding"));
    }
    let value: u32 = digits.parse().map_err(|_| invalid("index out of range"))?;
    if value == 0 {
        return Err(invalid("indices are 1-based"));
    }
    Ok(value)
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode(self.row, self.col))
    }
}

impl FromStr for TileId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        decode(s).map(|(row, col)| TileId::new(row, col))
    }
}

impl Serialize for TileId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TileId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode() {
        assert_eq!(encode(1, 1), "r001_c001");
        assert_eq!(encode(12, 345), "r012_c345");
        assert_eq!(encode(1234, 5), "r1234_c005");
        assert_eq!(TileId::new(3, 7).to_string(), "r003_c007");
    }

    #[test]
    fn test_decode_rejects_malformed() {
        for bad in [
            "", "r001", "001_c001", "r001_001", "r001-c001", "r0a1_c001", "r001_c001x",
            "r000_c001", "r01_c001", "r0012_c001", " r001_c001", "r001_c",
        ] {
            assert!(
                matches!(decode(bad), Err(Error::Addressing(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_ordering_is_row_major() {
        let mut ids = vec![TileId::new(2, 1), TileId::new(1, 3), TileId::new(1, 1)];
        ids.sort();
        assert_eq!(ids, vec![TileId::new(1, 1), TileId::new(1, 3), TileId::new(2, 1)]);
    }

    #[test]
    fn test_find_in_name() {
        assert_eq!(TileId::find_in_name("dem_r002_c010.tif"), Some(TileId::new(2, 10)));
        assert_eq!(TileId::find_in_name("land_cover_r001_c001.geojson"), Some(TileId::new(1, 1)));
        assert_eq!(TileId::find_in_name("r004_c004.tif"), Some(TileId::new(4, 4)));
        assert_eq!(TileId::find_in_name("dem_final.tif"), None);
        assert_eq!(TileId::find_in_name("manifest.csv"), None);
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&TileId::new(5, 6)).unwrap();
        assert_eq!(json, "\"r005_c006\"");
        let back: TileId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TileId::new(5, 6));
        assert!(serde_json::from_str::<TileId>("\"tile-5\"").is_err());
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(row in 1u32..=10_000, col in 1u32..=10_000) {
            prop_assert_eq!(decode(&encode(row, col)).unwrap(), (row, col));
        }
    }
}
