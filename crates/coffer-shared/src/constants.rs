/// Version of the internal sync message format. Files registered with an
/// older version must be reset before they can sync again.
pub const SYNC_FORMAT_VERSION: i64 = 2;

/// Media type of binary sync requests and responses
pub const SYNC_CONTENT_TYPE: &str = "application/actual-sync";

/// Media type of encrypted snapshot uploads
pub const ENCRYPTED_FILE_CONTENT_TYPE: &str = "application/encrypted-file";

/// Value of the `X-ACTUAL-SYNC-METHOD` response header
pub const SYNC_METHOD: &str = "simple";

/// Largest counter value a timestamp can carry
pub const MAX_COUNTER: u16 = 0xFFFF;

/// Node ids are rendered left-padded to this many characters
pub const NODE_ID_LENGTH: usize = 16;

/// Exclusive upper bound on timestamp millis (year 10000)
pub const MAX_MILLIS: u64 = 253_402_300_800_000;

/// Maximum clock drift tolerated by the hybrid logical clock (5 minutes)
pub const MAX_DRIFT_MS: u64 = 5 * 60 * 1000;

/// Width a trie key is right-padded to when turned back into a time
pub const TRIE_KEY_DIGITS: usize = 16;

/// Children kept per trie level by the default prune
pub const TRIE_PRUNE_KEEP: usize = 2;

/// Milliseconds per trie bucket (one minute)
pub const TRIE_BUCKET_MS: u64 = 60 * 1000;
