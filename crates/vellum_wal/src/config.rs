//! Log configuration.

use std::time::Duration;

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{WalError, WalResult};
use crate::page::{LENGTH_PREFIX, RECORDS_OFFSET};

/// AES-128 key material for page encryption.
///
/// The key is wiped from memory when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AesKey(pub [u8; 16]);

impl std::fmt::Debug for AesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AesKey(..)")
    }
}

/// Page encryption settings: a key plus the base nonce that per-page
/// nonces are derived from.
#[derive(Debug, Clone)]
pub struct EncryptionConfig {
    /// AES-128 key used in CTR mode.
    pub key: AesKey,
    /// Base nonce mixed with segment and page indices.
    pub base_nonce: [u8; 16],
}

impl EncryptionConfig {
    /// Creates encryption settings from raw key and nonce material.
    #[must_use]
    pub const fn new(key: [u8; 16], base_nonce: [u8; 16]) -> Self {
        Self {
            key: AesKey(key),
            base_nonce,
        }
    }
}

/// Configuration for opening a log.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Size of one log page in bytes.
    pub page_size: usize,

    /// Maximum size of a segment file before a new one is started.
    pub max_segment_size: u64,

    /// Buffered bytes that trigger a flush without waiting for the timer.
    pub flush_threshold: u64,

    /// How often the background writer flushes buffered records.
    pub flush_interval: Duration,

    /// Records buffered between milestones before a flush is forced.
    pub milestone_interval: u32,

    /// Whether every flush also syncs the segment file to disk.
    pub sync_on_flush: bool,

    /// Page encryption, disabled by default.
    pub encryption: Option<EncryptionConfig>,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            page_size: 4096,
            max_segment_size: 64 * 1024 * 1024, // 64 MB
            flush_threshold: 1024 * 1024,       // 1 MB
            flush_interval: Duration::from_millis(100),
            milestone_interval: 1024,
            sync_on_flush: true,
            encryption: None,
        }
    }
}

impl WalConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the log page size.
    #[must_use]
    pub const fn page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Sets the maximum segment file size.
    #[must_use]
    pub const fn max_segment_size(mut self, size: u64) -> Self {
        self.max_segment_size = size;
        self
    }

    /// Sets the buffered-bytes flush trigger.
    #[must_use]
    pub const fn flush_threshold(mut self, bytes: u64) -> Self {
        self.flush_threshold = bytes;
        self
    }

    /// Sets the background flush interval.
    #[must_use]
    pub const fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Sets how many records may sit between milestones.
    #[must_use]
    pub const fn milestone_interval(mut self, records: u32) -> Self {
        self.milestone_interval = records;
        self
    }

    /// Sets whether flushes sync to disk.
    #[must_use]
    pub const fn sync_on_flush(mut self, value: bool) -> Self {
        self.sync_on_flush = value;
        self
    }

    /// Enables page encryption.
    #[must_use]
    pub fn encryption(mut self, encryption: EncryptionConfig) -> Self {
        self.encryption = Some(encryption);
        self
    }

    /// Largest record payload one segment can hold. Record content
    /// spans pages, so the cap is the record area of a whole segment
    /// less one page of headroom for the entry that precedes it.
    #[must_use]
    pub fn max_record_size(&self) -> usize {
        let pages = (self.max_segment_size as usize / self.page_size).saturating_sub(1);
        pages * (self.page_size - RECORDS_OFFSET) - LENGTH_PREFIX
    }

    /// Checks the configuration before a log is opened.
    pub fn validate(&self) -> WalResult<()> {
        if !self.page_size.is_power_of_two() {
            return Err(WalError::invalid_config(format!(
                "page size {} must be a power of two",
                self.page_size
            )));
        }
        if self.page_size < 512 {
            return Err(WalError::invalid_config(format!(
                "page size {} is below the 512 byte minimum",
                self.page_size
            )));
        }
        // The page header stores the used count in two bytes.
        if self.page_size > 32 * 1024 {
            return Err(WalError::invalid_config(format!(
                "page size {} exceeds the 32 KiB maximum",
                self.page_size
            )));
        }
        if self.max_segment_size > u64::from(u32::MAX / 2) {
            return Err(WalError::invalid_config(format!(
                "segment size {} exceeds the 2 GiB position limit",
                self.max_segment_size
            )));
        }
        let page_size = self.page_size as u64;
        if self.max_segment_size < page_size * 4 {
            return Err(WalError::invalid_config(format!(
                "segment size {} must hold at least four {} byte pages",
                self.max_segment_size, self.page_size
            )));
        }
        if self.max_segment_size % page_size != 0 {
            return Err(WalError::invalid_config(format!(
                "segment size {} must be a multiple of the page size {}",
                self.max_segment_size, self.page_size
            )));
        }
        if self.milestone_interval == 0 {
            return Err(WalError::invalid_config(
                "milestone interval must be at least one record",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = WalConfig::default();
        assert_eq!(config.page_size, 4096);
        assert!(config.sync_on_flush);
        assert!(config.encryption.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn builder_pattern() {
        let config = WalConfig::new()
            .page_size(8192)
            .max_segment_size(8192 * 16)
            .sync_on_flush(false);

        assert_eq!(config.page_size, 8192);
        assert_eq!(config.max_segment_size, 8192 * 16);
        assert!(!config.sync_on_flush);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_non_power_of_two_page() {
        let config = WalConfig::new().page_size(5000);
        assert!(matches!(
            config.validate(),
            Err(WalError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn rejects_page_too_large_for_the_header() {
        let config = WalConfig::new()
            .page_size(64 * 1024)
            .max_segment_size(64 * 1024 * 16);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_tiny_segment() {
        let config = WalConfig::new().max_segment_size(4096);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_unaligned_segment() {
        let config = WalConfig::new().max_segment_size(4096 * 4 + 17);
        assert!(config.validate().is_err());
    }

    #[test]
    fn key_debug_does_not_leak() {
        let key = AesKey([7; 16]);
        assert_eq!(format!("{key:?}"), "AesKey(..)");
    }
}
