//! Row framing inside a block payload.
//!
//! A block is a run of rows, each encoded as
//! `[row length (4 bytes BE)][postcard(Vec<ColumnValue>)]`.
//! The payload is opaque to the transport; only the worker side walks it.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};
use crate::types::ColumnValue;
use crate::MAX_BLOCK_SIZE;

/// Size of the per-row length prefix
pub const ROW_HEADER_SIZE: usize = 4;

/// Accumulates encoded rows into a block payload
#[derive(Debug, Default)]
pub struct BlockBuilder {
    buf: BytesMut,
    rows: usize,
}

impl BlockBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one row
    pub fn push_row(&mut self, row: &[ColumnValue]) -> Result<()> {
        let encoded = postcard::to_allocvec(row)?;
        let size = self.buf.len() + ROW_HEADER_SIZE + encoded.len();
        if size > MAX_BLOCK_SIZE {
            return Err(ProtocolError::MessageTooLarge(size, MAX_BLOCK_SIZE));
        }
        let len = u32::try_from(encoded.len())
            .map_err(|_| ProtocolError::MessageTooLarge(encoded.len(), u32::MAX as usize))?;
        self.buf.put_u32(len);
        self.buf.extend_from_slice(&encoded);
        self.rows += 1;
        Ok(())
    }

    /// Number of rows appended so far
    pub fn row_count(&self) -> usize {
        self.rows
    }

    /// Encoded size in bytes
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Seal the block
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }

    /// Encode a whole batch of rows in one go
    pub fn encode<'a, I>(rows: I) -> Result<Bytes>
    where
        I: IntoIterator<Item = &'a [ColumnValue]>,
    {
        let mut builder = Self::new();
        for row in rows {
            builder.push_row(row)?;
        }
        Ok(builder.finish())
    }
}

/// Iterator over the rows of a block payload.
///
/// Yields `Err` once on the first framing or decoding error and then stops.
#[derive(Debug, Clone)]
pub struct RowIter<'a> {
    data: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> RowIter<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            failed: false,
        }
    }

    /// Byte position of the next row
    pub fn position(&self) -> usize {
        self.pos
    }

    fn fail(&mut self, reason: impl Into<String>) -> Option<Result<Vec<ColumnValue>>> {
        self.failed = true;
        Some(Err(ProtocolError::CorruptBlock {
            position: self.pos,
            reason: reason.into(),
        }))
    }
}

impl Iterator for RowIter<'_> {
    type Item = Result<Vec<ColumnValue>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.data.len() {
            return None;
        }

        let remaining = &self.data[self.pos..];
        if remaining.len() < ROW_HEADER_SIZE {
            return self.fail("truncated row header");
        }
        let len = u32::from_be_bytes([remaining[0], remaining[1], remaining[2], remaining[3]])
            as usize;
        let body = &remaining[ROW_HEADER_SIZE..];
        if body.len() < len {
            return self.fail(format!(
                "row declares {} bytes but only {} remain",
                len,
                body.len()
            ));
        }

        match postcard::from_bytes::<Vec<ColumnValue>>(&body[..len]) {
            Ok(row) => {
                self.pos += ROW_HEADER_SIZE + len;
                Some(Ok(row))
            }
            Err(e) => self.fail(e.to_string()),
        }
    }
}
