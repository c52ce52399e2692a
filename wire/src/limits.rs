//! Configurable limits for bounded decoding.

/// Decode-time limits for server messages and demo frames.
///
/// Every length read from a message is validated against these before any
/// allocation takes place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Maximum payload size of a single message in bytes.
    pub max_msg_len: usize,

    /// Maximum areamask length in bytes.
    pub max_areamask_bytes: usize,

    /// Number of addressable configstrings.
    pub max_configstrings: usize,

    /// Maximum length of any string field in bytes.
    pub max_string_len: usize,

    /// Maximum entity records in one snapshot or gamestate.
    pub max_entities: usize,

    /// Maximum size of one download block.
    pub max_download_block: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_msg_len: 32 * 1024,
            max_areamask_bytes: 32,
            max_configstrings: 1024,
            // Big info strings are the longest strings a server sends.
            max_string_len: 8192,
            max_entities: 1024,
            max_download_block: 2048,
        }
    }
}

impl Limits {
    /// Creates limits suitable for testing with smaller values.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            max_msg_len: 4096,
            max_areamask_bytes: 8,
            max_configstrings: 64,
            max_string_len: 256,
            max_entities: 64,
            max_download_block: 256,
        }
    }

    /// Creates limits with no restrictions (use with caution).
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            max_msg_len: usize::MAX,
            max_areamask_bytes: usize::MAX,
            max_configstrings: usize::MAX,
            max_string_len: usize::MAX,
            max_entities: usize::MAX,
            max_download_block: usize::MAX,
        }
    }
}
