//! Block assembly
//!
//! [`AppendBuffer`] turns a stream of reads into blocks no larger than the
//! backend's ceiling. Reads are never split: a read that would overflow the
//! block being assembled is held back as lookahead and opens the next block.
//!
//! ```text
//! reads:   [abcde] [fghij] [klmno]          ceiling = 8
//! block 1: abcde            (fghij would make 10 > 8, carried over)
//! block 2: fghij            (klmno would make 10 > 8, carried over)
//! block 3: klmno
//! ```

use crate::error::StorageError;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::io;

/// Per-call block assembly state
#[derive(Debug)]
pub struct AppendBuffer {
    max_block_size: usize,
    /// Read that did not fit the previous block
    lookahead: Option<Bytes>,
    exhausted: bool,
}

impl AppendBuffer {
    pub fn new(max_block_size: usize) -> Self {
        Self {
            max_block_size,
            lookahead: None,
            exhausted: false,
        }
    }

    pub fn max_block_size(&self) -> usize {
        self.max_block_size
    }

    /// Bytes carried over into the next block
    pub fn pending(&self) -> usize {
        self.lookahead.as_ref().map_or(0, Bytes::len)
    }

    /// Assemble the next block from lookahead plus fresh reads.
    ///
    /// Returns `Ok(None)` once the input has ended and nothing is pending.
    /// A single read larger than the ceiling fails with `LimitExceeded`
    /// without returning the partially assembled block.
    pub async fn next_block<S>(&mut self, input: &mut S) -> Result<Option<Bytes>, StorageError>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin,
    {
        let mut block = BytesMut::new();
        if let Some(carried) = self.lookahead.take() {
            block.extend_from_slice(&carried);
        }

        while !self.exhausted {
            let chunk = match input.next().await {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => return Err(StorageError::Read(e)),
                None => {
                    self.exhausted = true;
                    break;
                }
            };

            if chunk.len() > self.max_block_size {
                return Err(StorageError::LimitExceeded(format!(
                    "read of {} bytes exceeds the maximum block size of {} bytes",
                    chunk.len(),
                    self.max_block_size
                )));
            }

            if block.len() + chunk.len() > self.max_block_size {
                self.lookahead = Some(chunk);
                break;
            }

            block.extend_from_slice(&chunk);
        }

        if block.is_empty() {
            return Ok(None);
        }
        Ok(Some(block.freeze()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn reads(parts: &[&'static [u8]]) -> impl Stream<Item = io::Result<Bytes>> + Unpin {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p)))
                .collect::<Vec<_>>(),
        )
    }

    async fn drain(
        buffer: &mut AppendBuffer,
        input: &mut (impl Stream<Item = io::Result<Bytes>> + Unpin),
    ) -> Result<Vec<Bytes>, StorageError> {
        let mut blocks = Vec::new();
        while let Some(block) = buffer.next_block(input).await? {
            blocks.push(block);
        }
        Ok(blocks)
    }

    #[tokio::test]
    async fn test_single_block_when_everything_fits() {
        let mut input = reads(&[b"abcde", b"fghij", b"klmno"]);
        let mut buffer = AppendBuffer::new(15);

        let blocks = drain(&mut buffer, &mut input).await.unwrap();
        assert_eq!(blocks, vec![Bytes::from_static(b"abcdefghijklmno")]);
    }

    #[tokio::test]
    async fn test_carry_over_at_boundary() {
        let mut input = reads(&[b"abcde", b"fghij", b"klmno"]);
        let mut buffer = AppendBuffer::new(8);

        let first = buffer.next_block(&mut input).await.unwrap().unwrap();
        assert_eq!(first, Bytes::from_static(b"abcde"));
        assert_eq!(buffer.pending(), 5);

        let rest = drain(&mut buffer, &mut input).await.unwrap();
        assert_eq!(
            rest,
            vec![Bytes::from_static(b"fghij"), Bytes::from_static(b"klmno")]
        );
        assert_eq!(buffer.pending(), 0);
    }

    #[tokio::test]
    async fn test_exact_fit_packs_reads() {
        let mut input = reads(&[b"abcd", b"efgh", b"ij"]);
        let mut buffer = AppendBuffer::new(8);

        let blocks = drain(&mut buffer, &mut input).await.unwrap();
        assert_eq!(
            blocks,
            vec![Bytes::from_static(b"abcdefgh"), Bytes::from_static(b"ij")]
        );
    }

    #[tokio::test]
    async fn test_empty_input_yields_nothing() {
        let mut input = reads(&[]);
        let mut buffer = AppendBuffer::new(8);
        assert!(buffer.next_block(&mut input).await.unwrap().is_none());
        // Stays exhausted
        assert!(buffer.next_block(&mut input).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_reads_are_skipped() {
        let mut input = reads(&[b"", b"ab", b"", b"cd", b""]);
        let mut buffer = AppendBuffer::new(8);

        let blocks = drain(&mut buffer, &mut input).await.unwrap();
        assert_eq!(blocks, vec![Bytes::from_static(b"abcd")]);
    }

    #[tokio::test]
    async fn test_oversized_read_fails() {
        let mut input = reads(&[b"abc", b"123456789"]);
        let mut buffer = AppendBuffer::new(8);

        let result = buffer.next_block(&mut input).await;
        assert!(matches!(result, Err(StorageError::LimitExceeded(_))));
    }

    #[tokio::test]
    async fn test_read_error_surfaces() {
        let mut input = stream::iter(vec![
            Ok(Bytes::from_static(b"ab")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer went away")),
        ]);
        let mut buffer = AppendBuffer::new(8);

        let result = buffer.next_block(&mut input).await;
        assert!(matches!(result, Err(StorageError::Read(_))));
    }
}
