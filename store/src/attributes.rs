//! The install attributes blob format and its NVRAM-bound delegate.
//!
//! Install attributes are a write-once bundle of name/value pairs whose
//! digest is anchored in a locked hardware NVRAM space. Documents decoded
//! from them carry no deletions and no version stamp, so they can never
//! supersede values received from other sources.
use crate::container::{LockedSettingsContainer, LockedVersionComponent};
use crate::delegate::SourceDelegate;
use crate::document::SettingsDocument;
use crate::key::Key;
use crate::keys;
use crate::nvram::NVRam;
use crate::service::SettingsService;
use crate::source::make_source_key;
use crate::util;
use crate::version::VersionStamp;
use bytecheck::CheckBytes;
use rkyv::validation::validators::check_archived_root;
use rkyv::{Archive, Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

/// Format tag for install attributes blobs.
pub const FORMAT_INSTALL_ATTRIBUTES: &str = "install_attributes";

pub const SIZE_BYTES: usize = 4;
pub const FLAGS_BYTES: usize = 1;
pub const SALT_BYTES_V1: usize = 7;
pub const SALT_BYTES_V2: usize = 32;
pub const DIGEST_BYTES: usize = 32;
pub const NVRAM_BYTES_V1: usize = SIZE_BYTES + FLAGS_BYTES + SALT_BYTES_V1 + DIGEST_BYTES;
pub const NVRAM_BYTES_V2: usize = SIZE_BYTES + FLAGS_BYTES + SALT_BYTES_V2 + DIGEST_BYTES;

#[derive(Archive, Deserialize, Serialize)]
#[archive_attr(derive(CheckBytes))]
pub struct Attribute {
    pub name: String,
    pub value: Vec<u8>,
}

/// The install attributes wire encoding: a flat list of attributes.
#[derive(Default, Archive, Deserialize, Serialize)]
#[archive_attr(derive(CheckBytes))]
pub struct InstallAttributes {
    pub version: u32,
    pub attributes: Vec<Attribute>,
}

/// Serialises an install attributes bundle.
pub fn encode_install_attributes(attributes: &InstallAttributes) -> Vec<u8> {
    util::archive(attributes)
}

/// A container wrapping raw install attributes bytes. Parsing never fails;
/// all verification happens against NVRAM in the delegate.
pub struct InstallAttributesContainer {
    data: Vec<u8>,
}

/// Parses an install attributes blob.
pub fn parse_install_attributes(
    _format: &str,
    blob: &[u8],
) -> Option<Box<dyn LockedSettingsContainer>> {
    Some(Box::new(InstallAttributesContainer {
        data: blob.to_vec(),
    }))
}

impl LockedSettingsContainer for InstallAttributesContainer {
    fn data(&self) -> &[u8] {
        &self.data
    }

    fn decode_payload(self: Box<Self>) -> Option<Box<dyn SettingsDocument>> {
        let archived = check_archived_root::<InstallAttributes>(&self.data).ok()?;
        let mut values = BTreeMap::new();
        for attribute in archived.attributes.iter() {
            // Legacy writers NUL-terminate attribute names; strip that and
            // skip anything that still isn't a valid key.
            let name = attribute.name.as_str().trim_end_matches('\0');
            if let Ok(key) = Key::parse(name) {
                values.insert(key, attribute.value.to_vec());
            }
        }
        Some(Box::new(InstallAttributesDocument {
            values,
            version_stamp: VersionStamp::new(),
        }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct InstallAttributesDocument {
    values: BTreeMap<Key, Vec<u8>>,
    version_stamp: VersionStamp,
}

impl SettingsDocument for InstallAttributesDocument {
    fn value(&self, key: &Key) -> Option<&[u8]> {
        self.values.get(key).map(Vec::as_slice)
    }

    fn keys(&self, prefix: &Key) -> BTreeSet<Key> {
        util::map_range(prefix, &self.values)
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn deletions(&self, _prefix: &Key) -> BTreeSet<Key> {
        // Install attributes never contain deletions.
        BTreeSet::new()
    }

    fn version_stamp(&self) -> &VersionStamp {
        &self.version_stamp
    }

    fn has_keys_or_deletions(&self, prefix: &Key) -> bool {
        util::map_range(prefix, &self.values).next().is_some()
    }
}

/// Validates install attributes blobs against the size, salt and digest
/// bound in a locked NVRAM space.
pub struct InstallAttributesSourceDelegate {
    nvram: Rc<dyn NVRam>,
    nvram_index: u32,
}

impl InstallAttributesSourceDelegate {
    pub fn new(nvram: Rc<dyn NVRam>, nvram_index: u32) -> Self {
        Self { nvram, nvram_index }
    }

    /// Factory function for the `install_attributes` source type; the NVRAM
    /// space index comes from `settings.sources.<id>.nvram_index`.
    pub fn create(
        nvram: Rc<dyn NVRam>,
        source_id: &str,
        settings: &dyn SettingsService,
    ) -> Option<Box<dyn SourceDelegate>> {
        let index_key = make_source_key(source_id).extend([keys::sources::NVRAM_INDEX]);
        let value = settings.value(&index_key)?;
        let value = std::str::from_utf8(value).ok()?;
        let nvram_index = parse_nvram_index(value)?;
        Some(Box::new(Self::new(nvram, nvram_index)))
    }

    /// Reads `(size, salt, digest)` from the NVRAM space, which must be
    /// write locked.
    fn extract_nvram_parameters(&self) -> Option<(usize, Vec<u8>, Vec<u8>)> {
        let lock = match self.nvram.is_space_locked(self.nvram_index) {
            Ok(lock) => lock,
            Err(err) => {
                tracing::warn!("failed to query NVRAM space {}: {}", self.nvram_index, err);
                return None;
            }
        };
        if !lock.locked_for_writing {
            tracing::warn!("NVRAM space {} not locked", self.nvram_index);
            return None;
        }

        let data = match self.nvram.read_space(self.nvram_index) {
            Ok(data) => data,
            Err(err) => {
                tracing::error!("failed to read NVRAM space {}: {}", self.nvram_index, err);
                return None;
            }
        };
        let salt_bytes = match data.len() {
            NVRAM_BYTES_V1 => SALT_BYTES_V1,
            NVRAM_BYTES_V2 => SALT_BYTES_V2,
            size => {
                tracing::error!("unexpected NVRAM size {}", size);
                return None;
            }
        };

        // The size field is stored in inverted byte order: accumulate the
        // four bytes little-endian, then swap.
        let mut stored_size = 0u32;
        for (index, byte) in data[..SIZE_BYTES].iter().enumerate() {
            stored_size |= (*byte as u32) << (index * 8);
        }
        let size = stored_size.swap_bytes() as usize;

        let salt_offset = SIZE_BYTES + FLAGS_BYTES;
        let digest_offset = salt_offset + salt_bytes;
        let salt = data[salt_offset..digest_offset].to_vec();
        let digest = data[digest_offset..digest_offset + DIGEST_BYTES].to_vec();
        Some((size, salt, digest))
    }
}

impl SourceDelegate for InstallAttributesSourceDelegate {
    fn validate_container(&self, container: &dyn LockedSettingsContainer) -> bool {
        let (size, salt, digest) = match self.extract_nvram_parameters() {
            Some(parameters) => parameters,
            None => return false,
        };

        let data = container.data();
        if data.len() != size {
            tracing::warn!("blob size {} doesn't match NVRAM: {}", data.len(), size);
            return false;
        }

        let digest: [u8; DIGEST_BYTES] = match digest.as_slice().try_into() {
            Ok(digest) => digest,
            Err(_) => return false,
        };
        let mut salted = data.to_vec();
        salted.extend_from_slice(&salt);
        if blake3::hash(&salted) != blake3::Hash::from(digest) {
            tracing::warn!("blob digest doesn't match NVRAM");
            return false;
        }

        true
    }

    fn validate_version_component(&self, _component: &dyn LockedVersionComponent) -> bool {
        false
    }
}

/// Parses an NVRAM index given as decimal or `0x…` hexadecimal.
fn parse_nvram_index(value: &str) -> Option<u32> {
    if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        value.parse().ok()
    }
}
