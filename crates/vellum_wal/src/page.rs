//! On-disk log page layout.
//!
//! Every segment file is a run of fixed-size pages:
//!
//! | bytes | field |
//! |-------|-------|
//! | 0..8  | magic, plain or encrypted variant |
//! | 8..16 | XXH64 checksum of the used record area |
//! | 16..20 | id of the last operation that touched the page |
//! | 20..22 | used bytes, header included |
//! | 22..  | length-prefixed record entries |
//!
//! All integers are little-endian. A record entry is a 4-byte content
//! length followed by the content; content may continue across page
//! boundaries, skipping each following page's header. A zero length
//! prefix, or a tail with fewer than four free bytes, marks the rest of
//! the page as padding.
//!
//! When encryption is on, everything from the checksum onward is
//! AES-128-CTR encrypted with a nonce derived from the base nonce, the
//! segment id and the page index. The magic stays in plaintext so a
//! reader can tell an encrypted page from a plain one before touching
//! the key.

use aes::cipher::{KeyIvInit, StreamCipher};

use xxhash_rust::xxh64::xxh64;

use crate::config::EncryptionConfig;
use crate::error::{WalError, WalResult};

type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;

/// Marker stamped on plaintext pages.
pub const PAGE_MAGIC: u64 = u64::from_le_bytes(*b"VELWALPG");
/// Marker stamped on encrypted pages.
pub const PAGE_MAGIC_ENCRYPTED: u64 = u64::from_le_bytes(*b"VELWALPE");

/// Seed for the page checksum.
const CHECKSUM_SEED: u64 = 0x9747_b28c;

const MAGIC_OFFSET: usize = 0;
const CHECKSUM_OFFSET: usize = 8;
const OPERATION_ID_OFFSET: usize = 16;
const USED_OFFSET: usize = 20;

/// Offset of the first record byte on every page.
pub const RECORDS_OFFSET: usize = 22;

/// Width of the per-record length prefix.
pub const LENGTH_PREFIX: usize = 4;

/// Bytes a record entry occupies before page-boundary overhead.
#[must_use]
pub const fn entry_size(content_len: usize) -> usize {
    content_len + LENGTH_PREFIX
}

/// Record bytes one page can hold.
#[must_use]
pub const fn page_capacity(page_size: usize) -> usize {
    page_size - RECORDS_OFFSET
}

/// Outcome of validating a page read back from a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageCheck {
    /// The page is intact.
    Valid(PageInfo),
    /// The page failed validation and everything from it on is the
    /// torn tail of the log.
    Broken,
}

/// Header fields of a valid page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    /// Bytes of the page that carry data, header included.
    pub used: usize,
    /// Id of the last operation whose record touched this page.
    pub last_operation_id: u32,
}

/// Per-page AES-128-CTR keystream derived from a base nonce.
pub struct PageCipher {
    key: crate::config::AesKey,
    base_nonce: [u8; 16],
}

impl PageCipher {
    /// Creates a cipher from encryption settings.
    #[must_use]
    pub fn new(config: &EncryptionConfig) -> Self {
        Self {
            key: config.key.clone(),
            base_nonce: config.base_nonce,
        }
    }

    /// Encrypts or decrypts `bytes` in place. CTR mode is symmetric,
    /// the same call does both directions.
    pub fn apply(&self, segment: u64, page_index: u64, bytes: &mut [u8]) {
        let nonce = self.nonce_for(segment, page_index);
        let mut cipher = Aes128Ctr::new(&self.key.0.into(), &nonce.into());
        cipher.apply_keystream(bytes);
    }

    /// Mixes the page coordinates into the base nonce so no two pages
    /// share a keystream.
    fn nonce_for(&self, segment: u64, page_index: u64) -> [u8; 16] {
        let mut nonce = self.base_nonce;
        for (i, byte) in page_index.to_le_bytes().iter().enumerate() {
            nonce[i] ^= byte;
        }
        for (i, byte) in segment.to_le_bytes().iter().enumerate() {
            nonce[8 + i] ^= byte;
        }
        nonce
    }
}

impl std::fmt::Debug for PageCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PageCipher(..)")
    }
}

/// Finalizes a page before it goes to disk: stamps the header, checksums
/// the used area and encrypts when a cipher is configured.
///
/// `page` must be exactly one page long and its record area must
/// already be filled; bytes past `used` are padding and stay zero.
pub fn seal_page(
    page: &mut [u8],
    used: usize,
    last_operation_id: u32,
    segment: u64,
    page_index: u64,
    cipher: Option<&PageCipher>,
) {
    debug_assert!(used >= RECORDS_OFFSET && used <= page.len());

    let magic = if cipher.is_some() {
        PAGE_MAGIC_ENCRYPTED
    } else {
        PAGE_MAGIC
    };
    page[MAGIC_OFFSET..MAGIC_OFFSET + 8].copy_from_slice(&magic.to_le_bytes());
    page[OPERATION_ID_OFFSET..OPERATION_ID_OFFSET + 4]
        .copy_from_slice(&last_operation_id.to_le_bytes());
    page[USED_OFFSET..USED_OFFSET + 2].copy_from_slice(&(used as u16).to_le_bytes());

    let checksum = xxh64(&page[RECORDS_OFFSET..used], CHECKSUM_SEED);
    page[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 8].copy_from_slice(&checksum.to_le_bytes());

    if let Some(cipher) = cipher {
        cipher.apply(segment, page_index, &mut page[CHECKSUM_OFFSET..]);
    }
}

/// Validates a page read back from a segment, decrypting it in place
/// when needed.
///
/// Returns [`PageCheck::Broken`] for any mismatch a torn or corrupted
/// write could produce. An encrypted page found while no key is
/// configured is not a broken page; it is a fatal error.
pub fn check_page(
    page: &mut [u8],
    segment: u64,
    page_index: u64,
    cipher: Option<&PageCipher>,
) -> WalResult<PageCheck> {
    if page.len() < RECORDS_OFFSET {
        return Ok(PageCheck::Broken);
    }

    let mut magic_bytes = [0u8; 8];
    magic_bytes.copy_from_slice(&page[MAGIC_OFFSET..MAGIC_OFFSET + 8]);
    let magic = u64::from_le_bytes(magic_bytes);

    if magic == PAGE_MAGIC_ENCRYPTED {
        let Some(cipher) = cipher else {
            return Err(WalError::EncryptionKeyRequired {
                segment,
                page_index,
            });
        };
        cipher.apply(segment, page_index, &mut page[CHECKSUM_OFFSET..]);
    } else if magic != PAGE_MAGIC {
        return Ok(PageCheck::Broken);
    }

    let used = usize::from(u16::from_le_bytes([page[USED_OFFSET], page[USED_OFFSET + 1]]));
    if used < RECORDS_OFFSET || used > page.len() {
        return Ok(PageCheck::Broken);
    }

    let mut stored = [0u8; 8];
    stored.copy_from_slice(&page[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 8]);
    let checksum = xxh64(&page[RECORDS_OFFSET..used], CHECKSUM_SEED);
    if checksum != u64::from_le_bytes(stored) {
        return Ok(PageCheck::Broken);
    }

    let last_operation_id = u32::from_le_bytes([
        page[OPERATION_ID_OFFSET],
        page[OPERATION_ID_OFFSET + 1],
        page[OPERATION_ID_OFFSET + 2],
        page[OPERATION_ID_OFFSET + 3],
    ]);

    Ok(PageCheck::Valid(PageInfo {
        used,
        last_operation_id,
    }))
}

// === Position arithmetic ===
//
// A position is a byte offset inside a segment file. Record content
// lives only in the record areas of pages; these helpers move through
// that content space, stepping over page headers and tails too short
// to hold a length prefix. The writer, the position assignment walk
// and the scanner all share them, which keeps assigned positions equal
// to the offsets records really land at.

/// Snaps a position to the nearest valid record start at or after it.
#[must_use]
pub fn normalize_position(position: u64, page_size: usize) -> u64 {
    let page_size = page_size as u64;
    let page = position / page_size;
    let offset = position % page_size;

    if offset < RECORDS_OFFSET as u64 {
        return page * page_size + RECORDS_OFFSET as u64;
    }
    if page_size - offset < LENGTH_PREFIX as u64 {
        return (page + 1) * page_size + RECORDS_OFFSET as u64;
    }
    position
}

/// Advances a position by `len` content bytes, skipping page headers.
#[must_use]
pub fn advance_position(position: u64, len: usize, page_size: usize) -> u64 {
    let page_size_u64 = page_size as u64;
    let mut position = position;
    let mut remaining = len as u64;

    while remaining > 0 {
        let offset = position % page_size_u64;
        if offset < RECORDS_OFFSET as u64 {
            position = (position / page_size_u64) * page_size_u64 + RECORDS_OFFSET as u64;
            continue;
        }
        let available = page_size_u64 - offset;
        let step = available.min(remaining);
        position += step;
        remaining -= step;
    }
    position
}

/// Returns the position one past the last byte of a record entry that
/// starts at `position`.
#[must_use]
pub fn entry_end(position: u64, content_len: usize, page_size: usize) -> u64 {
    let start = normalize_position(position, page_size);
    advance_position(start + LENGTH_PREFIX as u64, content_len, page_size)
}

/// Snaps a position to the first record start of a fresh page. Used
/// for milestones, which close the page they land behind.
#[must_use]
pub fn align_to_fresh_page(position: u64, page_size: usize) -> u64 {
    let page_size = page_size as u64;
    let page = position / page_size;
    let offset = position % page_size;

    if offset <= RECORDS_OFFSET as u64 {
        page * page_size + RECORDS_OFFSET as u64
    } else {
        (page + 1) * page_size + RECORDS_OFFSET as u64
    }
}
