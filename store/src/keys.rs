//! Well-known settings keys. Most of these concern the trust
//! configuration, i.e. the definitions of configuration sources.
use crate::key::Key;

/// The prefix for all keys that affect store configuration.
pub const SETTINGS_PREFIX: &str = "org.chromium.settings";

/// Prefix to all trust configuration, below [`SETTINGS_PREFIX`].
pub const SOURCES: &str = "sources";

/// Key suffixes relevant to source definitions.
pub mod sources {
    /// Friendly name for the source.
    pub const NAME: &str = "name";
    /// Status string indicating the source's status.
    pub const STATUS: &str = "status";
    /// A string identifying the type of source.
    pub const TYPE: &str = "type";
    /// Access control rule subtree.
    pub const ACCESS: &str = "access";
    /// Comma-separated list of blob formats to try, in order.
    pub const BLOB_FORMAT: &str = "blob_format";
    /// NVRAM space holding install attributes parameters.
    pub const NVRAM_INDEX: &str = "nvram_index";
    /// Base64-encoded ed25519 public key for signed sources.
    pub const PUBLIC_KEY: &str = "pubkey";
}

/// The key all store configuration lives under.
pub fn settings_prefix() -> Key {
    Key::parse(SETTINGS_PREFIX).expect("well-known prefix is a valid key")
}

/// The key all trust configuration lives under.
pub fn sources_prefix() -> Key {
    settings_prefix().extend([SOURCES])
}
