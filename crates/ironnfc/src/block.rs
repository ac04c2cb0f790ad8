//! Block-level read/write with automatic paging.
//!
//! Reads larger than one packet and writes larger than one block are split
//! into sub-exchanges issued eagerly and reassembled in request order.

use futures_util::future::join_all;
use ironnfc_apdu::{ReadBinary, Response, UpdateBinary, CLA_PROPRIETARY};

use crate::backend::ReaderBackend;
use crate::reader::Reader;
use crate::{ReaderError, ReaderErrorExt as _, ReaderResult, ReaderResultExt as _};

/// Paging parameters for [`Reader::read_with`].
///
/// The defaults are MIFARE-Classic-shaped; other tags may want different
/// values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Bytes per block on the tag.
    pub block_size: usize,
    /// Largest read issued in one exchange.
    pub packet_size: usize,
    /// Class byte of the Read Binary command.
    pub read_class: u8,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            block_size: 4,
            packet_size: 16,
            read_class: CLA_PROPRIETARY,
        }
    }
}

/// Sub-read plan: `(start block, length)` per exchange, in request order.
fn read_chunks(block: u16, length: usize, block_size: usize, packet_size: usize) -> Vec<(u16, usize)> {
    let mut chunks = Vec::with_capacity(length.div_ceil(packet_size));
    let mut offset = 0;

    while offset < length {
        let start = block + (offset / block_size) as u16;
        chunks.push((start, packet_size.min(length - offset)));
        offset += packet_size;
    }

    chunks
}

impl<B: ReaderBackend> Reader<B> {
    /// Reads `length` bytes starting at `block` with the default paging
    /// parameters.
    pub async fn read(&self, block: u16, length: usize) -> ReaderResult<Vec<u8>> {
        self.read_with(block, length, ReadOptions::default()).await
    }

    /// Reads `length` bytes starting at `block`, splitting into concurrent
    /// packet-sized sub-reads when needed.
    pub async fn read_with(&self, block: u16, length: usize, options: ReadOptions) -> ReaderResult<Vec<u8>> {
        if options.block_size == 0 || options.packet_size == 0 {
            return Err(ReaderError::reason("read", "block size and packet size must be non-zero"));
        }

        if length <= options.packet_size {
            return self.read_chunk(block, length, options).await;
        }

        let chunks = read_chunks(block, length, options.block_size, options.packet_size);
        let results = join_all(
            chunks
                .iter()
                .map(|&(start, chunk_len)| self.read_chunk(start, chunk_len, options)),
        )
        .await;

        let mut data = Vec::with_capacity(length);
        for result in results {
            data.extend(result?);
        }

        Ok(data)
    }

    async fn read_chunk(&self, block: u16, length: usize, options: ReadOptions) -> ReaderResult<Vec<u8>> {
        let length = u8::try_from(length)
            .map_err(|_| ReaderError::reason("read", format!("a {length}-byte read does not fit a short APDU")))?;

        let frame = ReadBinary {
            class: options.read_class,
            block,
            length,
        }
        .to_bytes();

        let raw = self
            .transmit(&frame, usize::from(length) + 2)
            .await
            .with_context("read")?;

        Response::parse("read", &raw)
            .and_then(|response| response.into_payload("read"))
            .map_err(ReaderError::apdu)
    }

    /// Writes `data` starting at `block` with the default 4-byte block size.
    pub async fn write(&self, block: u8, data: &[u8]) -> ReaderResult<()> {
        self.write_with(block, data, 4).await
    }

    /// Writes `data` starting at `block`, one Update Binary per block, all
    /// issued concurrently.
    ///
    /// `data` must be a non-zero multiple of `block_size` bytes.
    pub async fn write_with(&self, block: u8, data: &[u8], block_size: usize) -> ReaderResult<()> {
        if block_size == 0 || data.len() < block_size || data.len() % block_size != 0 {
            return Err(ReaderError::invalid_data_length("write", data.len(), block_size));
        }

        if data.len() == block_size {
            return self.write_chunk(block, data).await;
        }

        let results = join_all(
            data.chunks(block_size)
                .enumerate()
                .map(|(i, chunk)| self.write_chunk(block + i as u8, chunk)),
        )
        .await;

        for result in results {
            result?;
        }

        Ok(())
    }

    async fn write_chunk(&self, block: u8, data: &[u8]) -> ReaderResult<()> {
        let frame = UpdateBinary { block, data }.to_bytes();

        let raw = self.transmit(&frame, 2).await.with_context("write")?;

        Response::parse("write", &raw)
            .and_then(|response| response.expect_success("write"))
            .map_err(ReaderError::apdu)
    }
}
