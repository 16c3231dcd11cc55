//! BIT and BIT VARYING.
//!
//! Binary layout: `int32 bit_count` followed by the bits packed most
//! significant first, the last byte padded with zeros.

use std::fmt;

use crate::error::{Error, Result};

use super::Reader;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BitString {
    len: usize,
    bytes: Vec<u8>,
}

impl BitString {
    pub fn from_bits(bits: impl IntoIterator<Item = bool>) -> Self {
        let mut out = Self::default();
        for bit in bits {
            out.push(bit);
        }
        out
    }

    pub fn push(&mut self, bit: bool) {
        if self.len % 8 == 0 {
            self.bytes.push(0);
        }
        if bit && let Some(last) = self.bytes.last_mut() {
            *last |= 0x80 >> (self.len % 8);
        }
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> Option<bool> {
        if index >= self.len {
            return None;
        }
        Some(self.bytes[index / 8] & (0x80 >> (index % 8)) != 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).filter_map(|i| self.get(i))
    }

    /// Packed bits, most significant first.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn from_binary(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes, "BIT");
        let len = r.i32()?;
        let len = usize::try_from(len)
            .map_err(|_| Error::Decode(format!("negative BIT length {}", len)))?;
        let packed = r.rest();
        if packed.len() != len.div_ceil(8) {
            return Err(Error::Decode(format!(
                "BIT length {} does not match {} data bytes",
                len,
                packed.len()
            )));
        }
        let mut bytes = packed.to_vec();
        if len % 8 != 0
            && let Some(last) = bytes.last_mut()
        {
            *last &= 0xff << (8 - len % 8);
        }
        Ok(Self { len, bytes })
    }

    pub fn write_binary(&self, buf: &mut Vec<u8>) -> Result<()> {
        let len = i32::try_from(self.len).map_err(|_| Error::Encode("BIT value too long".into()))?;
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(&self.bytes);
        Ok(())
    }

    pub fn parse(s: &str) -> Result<Self> {
        let mut out = Self::default();
        for c in s.chars() {
            match c {
                '0' => out.push(false),
                '1' => out.push(true),
                _ => return Err(Error::Decode(format!("invalid BIT text: {:?}", s))),
            }
        }
        Ok(out)
    }
}

impl fmt::Display for BitString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text: String = self.iter().map(|b| if b { '1' } else { '0' }).collect();
        f.write_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packing() {
        let bits = BitString::parse("1011000011").unwrap();
        assert_eq!(bits.len(), 10);
        assert_eq!(bits.as_bytes(), &[0b1011_0000, 0b1100_0000]);
        assert_eq!(bits.get(2), Some(true));
        assert_eq!(bits.get(10), None);
        assert_eq!(bits.to_string(), "1011000011");

        let mut buf = Vec::new();
        bits.write_binary(&mut buf).unwrap();
        assert_eq!(&buf[..4], &10_i32.to_be_bytes());
        assert_eq!(BitString::from_binary(&buf).unwrap(), bits);
    }

    #[test]
    fn test_empty_and_invalid() {
        let empty = BitString::parse("").unwrap();
        assert!(empty.is_empty());
        assert_eq!(BitString::from_binary(&[0, 0, 0, 0]).unwrap(), empty);
        assert!(BitString::parse("10x").is_err());
        // 9 bits need two bytes
        assert!(BitString::from_binary(&[0, 0, 0, 9, 0xff]).is_err());
        assert!(BitString::from_binary(&[0xff, 0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn test_padding_bits_cleared() {
        let bits = BitString::from_binary(&[0, 0, 0, 3, 0xff]).unwrap();
        assert_eq!(bits, BitString::from_bits([true, true, true]));
    }
}
