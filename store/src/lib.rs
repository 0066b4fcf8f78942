//! # Trusted multi-source settings store core
//!
//! Multiple administrative authorities ("sources") independently submit
//! signed settings documents; this crate merges them into one causally
//! consistent, hierarchical key to value view.
//!
//! ## Documents and causality
//! A [`SettingsDocument`] is an immutable bundle of value assignments and
//! subtree deletions under hierarchical [`Key`]s, stamped with a
//! [`VersionStamp`] vector clock. Documents whose stamps are ordered
//! supersede one another; concurrent documents may coexist only if they
//! don't overlap. The [`SettingsMap`] maintains the merged view and
//! reports, per mutation, exactly which keys changed and which documents no
//! longer provide anything.
//!
//! ## Trust as configuration
//! Trust itself is expressed as settings: a bootstrap trusted document
//! declares the initial source(s) under the reserved
//! `org.chromium.settings.sources.<id>` subtree, and sources may delegate
//! subsets of the key space to further sources through access rules. A
//! [`Source`] reflects that configuration; its [`SourceDelegate`] performs
//! the source-type-specific signature checks.
//!
//! ## Ingestion
//! The [`DocumentManager`] owns everything: it parses incoming blobs
//! through the [`SettingsBlobParserRegistry`], validates them with the
//! claimed source's delegate, orders them by version stamp, applies access
//! control, persists accepted blobs in the [`BlobStore`], inserts the
//! decoded document into the map, and whenever trust configuration keys
//! change, re-parses the affected sources and revalidates all of their
//! documents, cascading retractions across delegations. Observers receive
//! one callback per accepted blob with the union of all key changes.
pub mod attributes;
pub mod blob_store;
pub mod container;
pub mod delegate;
pub mod document;
pub mod key;
pub mod keys;
pub mod manager;
pub mod map;
pub mod nvram;
pub mod parser;
pub mod service;
pub mod signed;
pub mod source;
pub mod testing;
mod util;
pub mod version;

pub use crate::blob_store::{BlobStore, Handle};
pub use crate::container::{LockedSettingsContainer, LockedVersionComponent};
pub use crate::delegate::{RejectingDelegate, SourceDelegate, SourceDelegateFactory};
pub use crate::document::{has_overlap, ManagedDocument, SettingsDocument};
pub use crate::key::Key;
pub use crate::manager::{DocumentManager, InsertionStatus};
pub use crate::map::{Collision, Mutation, SettingsMap};
pub use crate::nvram::{LockState, NVRam};
pub use crate::parser::SettingsBlobParserRegistry;
pub use crate::service::{SettingsObserver, SettingsService};
pub use crate::signed::Keypair;
pub use crate::source::{make_source_key, SettingStatus, Source};
pub use crate::version::VersionStamp;
