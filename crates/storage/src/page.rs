use crate::error::{StorageError, StorageResult};

pub type PageIndex = u64;

pub const PAGE_SIZE: usize = 4096;
pub const PAGE_MAGIC: [u8; 4] = *b"BZDB";
pub const PAGE_VERSION: u8 = 0x01;
pub const PAGE_HEADER_SIZE: usize = PAGE_MAGIC.len() + 1;
/// Largest payload that fits behind the framing header.
pub const MAX_PAYLOAD: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

/// Frames a payload into a full page: `[magic][version][payload][zero-pad]`.
pub fn frame(payload: &[u8]) -> StorageResult<[u8; PAGE_SIZE]> {
    if payload.len() > MAX_PAYLOAD {
        return Err(StorageError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    let mut buf = [0u8; PAGE_SIZE];
    buf[..PAGE_MAGIC.len()].copy_from_slice(&PAGE_MAGIC);
    buf[PAGE_MAGIC.len()] = PAGE_VERSION;
    buf[PAGE_HEADER_SIZE..PAGE_HEADER_SIZE + payload.len()].copy_from_slice(payload);
    Ok(buf)
}

/// Extracts a payload from a raw page.
///
/// An all-zero page is a hole and yields `None`. A page with the expected
/// header yields the payload with its trailing zero run trimmed (so a
/// header-only page yields an empty payload). Anything else is orphaned and
/// fails with `InvalidHeader`.
pub fn unframe(index: PageIndex, buf: &[u8; PAGE_SIZE]) -> StorageResult<Option<Vec<u8>>> {
    if has_valid_header(buf) {
        let payload = &buf[PAGE_HEADER_SIZE..];
        let end = payload
            .iter()
            .rposition(|byte| *byte != 0)
            .map_or(0, |pos| pos + 1);
        return Ok(Some(payload[..end].to_vec()));
    }
    if buf.iter().all(|byte| *byte == 0) {
        return Ok(None);
    }
    Err(StorageError::InvalidHeader { index })
}

/// Header check used by `unframe` and by the orphan counter in stats.
pub fn has_valid_header(buf: &[u8]) -> bool {
    buf.len() >= PAGE_HEADER_SIZE
        && buf[..PAGE_MAGIC.len()] == PAGE_MAGIC
        && buf[PAGE_MAGIC.len()] == PAGE_VERSION
}
