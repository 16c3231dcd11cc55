//! COPY protocol backend messages.

use crate::error::Result;
use crate::protocol::codec::{read_u8, read_u16};
use crate::protocol::types::FormatCode;

/// Body shared by CopyInResponse, CopyOutResponse and CopyBothResponse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyFormat {
    /// Overall format (0=text, 1=binary)
    pub format: FormatCode,
    /// Per-column format codes
    pub column_formats: Vec<FormatCode>,
}

impl CopyFormat {
    fn parse(payload: &[u8]) -> Result<Self> {
        let (format_byte, rest) = read_u8(payload)?;
        let (num_columns, mut rest) = read_u16(rest)?;

        let mut column_formats = Vec::with_capacity(num_columns as usize);
        for _ in 0..num_columns {
            let (fmt, remaining) = read_u16(rest)?;
            column_formats.push(FormatCode::from_u16(fmt));
            rest = remaining;
        }

        Ok(Self {
            format: FormatCode::from_u16(format_byte as u16),
            column_formats,
        })
    }

    /// Check if binary format is used.
    pub fn is_binary(&self) -> bool {
        self.format.is_binary()
    }
}

/// CopyInResponse message - server is ready to receive COPY data.
#[derive(Debug, Clone)]
pub struct CopyInResponse(pub CopyFormat);

impl CopyInResponse {
    /// Parse a CopyInResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        CopyFormat::parse(payload).map(Self)
    }
}

/// CopyOutResponse message - server is about to send COPY data.
#[derive(Debug, Clone)]
pub struct CopyOutResponse(pub CopyFormat);

impl CopyOutResponse {
    /// Parse a CopyOutResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        CopyFormat::parse(payload).map(Self)
    }
}

/// CopyData message - COPY data (used in both directions).
#[derive(Debug, Clone, Copy)]
pub struct CopyData<'a> {
    /// Raw data bytes
    pub data: &'a [u8],
}

impl<'a> CopyData<'a> {
    /// Parse a CopyData message from payload bytes.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        Ok(Self { data: payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_in_response() {
        let payload = [0, 0, 2, 0, 0, 0, 0];
        let resp = CopyInResponse::parse(&payload).unwrap();
        assert!(!resp.0.is_binary());
        assert_eq!(resp.0.column_formats.len(), 2);
    }

    #[test]
    fn test_copy_out_response_binary() {
        let payload = [1, 0, 1, 0, 1];
        let resp = CopyOutResponse::parse(&payload).unwrap();
        assert!(resp.0.is_binary());
        assert_eq!(resp.0.column_formats, vec![FormatCode::Binary]);
    }

    #[test]
    fn test_copy_response_truncated() {
        assert!(CopyInResponse::parse(&[0, 0, 3, 0, 0]).is_err());
    }
}
