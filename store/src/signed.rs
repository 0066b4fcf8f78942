//! The signed settings blob format and its source delegate.
//!
//! A blob is an archived [`SignedBlob`]: the archived [`DocumentPayload`]
//! bytes, an ed25519 signature over them, and one signed version stamp
//! slice per source that contributed a clock component. Each slice is
//! validated by the delegate of the source it names.
use crate::container::{LockedSettingsContainer, LockedVersionComponent};
use crate::delegate::SourceDelegate;
use crate::document::SettingsDocument;
use crate::key::Key;
use crate::keys;
use crate::service::SettingsService;
use crate::source::make_source_key;
use crate::util;
use crate::version::VersionStamp;
use bytecheck::CheckBytes;
use ed25519_dalek::{PublicKey, SecretKey, Signature, Signer, Verifier};
use rkyv::validation::validators::check_archived_root;
use rkyv::{Archive, Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};

/// Format tag for signed settings blobs; also registered as the default
/// (empty) tag.
pub const FORMAT_SIGNED: &str = "signed";

/// An ed25519 keypair derived from a 32 byte seed.
#[derive(Clone, Copy)]
pub struct Keypair([u8; 32]);

impl Keypair {
    pub fn generate() -> Self {
        let mut secret = [0; 32];
        getrandom::getrandom(&mut secret).unwrap();
        Self(secret)
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self(seed)
    }

    fn to_keypair(self) -> ed25519_dalek::Keypair {
        let secret = SecretKey::from_bytes(&self.0).unwrap();
        let public = PublicKey::from(&secret);
        ed25519_dalek::Keypair { secret, public }
    }

    pub fn public_key(self) -> PublicKey {
        self.to_keypair().public
    }

    /// The encoding expected at `settings.sources.<id>.pubkey`.
    pub fn public_key_base64(self) -> String {
        base64::encode(self.public_key().as_bytes())
    }

    pub fn sign(self, message: &[u8]) -> Vec<u8> {
        self.to_keypair().sign(message).to_bytes().to_vec()
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Keypair({})", hex::encode(&self.public_key().as_bytes()[0..2]))
    }
}

/// One signed version stamp slice: the named source's clock value, signed
/// with that source's key.
#[derive(Clone, Archive, Deserialize, Serialize)]
#[archive_attr(derive(CheckBytes))]
pub struct VersionComponentBlob {
    pub source_id: String,
    pub counter: u64,
    pub signature: Vec<u8>,
}

/// The byte sequence a version component signature covers.
pub fn component_message(source_id: &str, counter: u64) -> Vec<u8> {
    let mut message = source_id.as_bytes().to_vec();
    message.extend_from_slice(&counter.to_be_bytes());
    message
}

#[derive(Archive, Deserialize, Serialize)]
#[archive_attr(derive(CheckBytes))]
pub struct ValueEntry {
    pub key: String,
    pub value: Vec<u8>,
}

/// The protected payload: value assignments plus subtree deletions.
#[derive(Default, Archive, Deserialize, Serialize)]
#[archive_attr(derive(CheckBytes))]
pub struct DocumentPayload {
    pub values: Vec<ValueEntry>,
    pub deletions: Vec<String>,
}

/// The outer blob.
#[derive(Archive, Deserialize, Serialize)]
#[archive_attr(derive(CheckBytes))]
pub struct SignedBlob {
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
    pub components: Vec<VersionComponentBlob>,
}

/// The in-memory document decoded from a [`DocumentPayload`].
struct SignedDocument {
    values: BTreeMap<Key, Vec<u8>>,
    deletions: BTreeSet<Key>,
    version_stamp: VersionStamp,
}

impl SettingsDocument for SignedDocument {
    fn value(&self, key: &Key) -> Option<&[u8]> {
        self.values.get(key).map(Vec::as_slice)
    }

    fn keys(&self, prefix: &Key) -> BTreeSet<Key> {
        util::map_range(prefix, &self.values)
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn deletions(&self, prefix: &Key) -> BTreeSet<Key> {
        util::set_range(prefix, &self.deletions).cloned().collect()
    }

    fn version_stamp(&self) -> &VersionStamp {
        &self.version_stamp
    }

    fn has_keys_or_deletions(&self, prefix: &Key) -> bool {
        util::map_range(prefix, &self.values).next().is_some()
            || util::has_keys(prefix, &self.deletions)
    }
}

/// Decodes an archived [`DocumentPayload`] into a settings document
/// carrying `version_stamp`. Fails on malformed bytes or invalid keys.
/// Also used for the bootstrap trusted document, which is a bare payload
/// with an empty stamp.
pub fn decode_document(
    payload: &[u8],
    version_stamp: VersionStamp,
) -> Option<Box<dyn SettingsDocument>> {
    let archived = check_archived_root::<DocumentPayload>(payload).ok()?;
    let mut values = BTreeMap::new();
    for entry in archived.values.iter() {
        let key = Key::parse(entry.key.as_str()).ok()?;
        values.insert(key, entry.value.to_vec());
    }
    let mut deletions = BTreeSet::new();
    for deletion in archived.deletions.iter() {
        deletions.insert(Key::parse(deletion.as_str()).ok()?);
    }
    Some(Box::new(SignedDocument {
        values,
        deletions,
        version_stamp,
    }))
}

/// A parsed but unvalidated signed blob.
pub struct SignedContainer {
    blob: SignedBlob,
    components: Vec<SignedVersionComponent>,
}

pub struct SignedVersionComponent(VersionComponentBlob);

impl SignedVersionComponent {
    pub fn blob(&self) -> &VersionComponentBlob {
        &self.0
    }
}

impl LockedVersionComponent for SignedVersionComponent {
    fn source_id(&self) -> &str {
        &self.0.source_id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl SignedContainer {
    fn new(blob: SignedBlob) -> Self {
        let components = blob
            .components
            .iter()
            .cloned()
            .map(SignedVersionComponent)
            .collect();
        Self { blob, components }
    }

    pub fn payload(&self) -> &[u8] {
        &self.blob.payload
    }

    pub fn signature(&self) -> &[u8] {
        &self.blob.signature
    }
}

impl LockedSettingsContainer for SignedContainer {
    fn data(&self) -> &[u8] {
        &self.blob.payload
    }

    fn version_components(&self) -> Vec<&dyn LockedVersionComponent> {
        self.components
            .iter()
            .map(|component| component as &dyn LockedVersionComponent)
            .collect()
    }

    fn decode_payload(self: Box<Self>) -> Option<Box<dyn SettingsDocument>> {
        let mut version_stamp = VersionStamp::new();
        for component in &self.blob.components {
            if component.counter == 0 {
                return None;
            }
            version_stamp.set(&component.source_id, component.counter);
        }
        decode_document(&self.blob.payload, version_stamp)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Parses a signed settings blob.
pub fn parse_signed_blob(_format: &str, blob: &[u8]) -> Option<Box<dyn LockedSettingsContainer>> {
    let archived = check_archived_root::<SignedBlob>(blob).ok()?;
    let blob: SignedBlob = archived.deserialize(&mut rkyv::Infallible).ok()?;
    Some(Box::new(SignedContainer::new(blob)))
}

/// Validates blobs signed with a per-source ed25519 key configured at
/// `settings.sources.<id>.pubkey`.
pub struct SignedSourceDelegate {
    public_key: PublicKey,
}

impl SignedSourceDelegate {
    pub fn new(public_key: PublicKey) -> Self {
        Self { public_key }
    }

    /// Factory function for the `signed` source type. Yields no delegate if
    /// the public key is missing or malformed.
    pub fn create(
        source_id: &str,
        settings: &dyn SettingsService,
    ) -> Option<Box<dyn SourceDelegate>> {
        let key = make_source_key(source_id).extend([keys::sources::PUBLIC_KEY]);
        let encoded = settings.value(&key)?;
        let bytes = base64::decode(encoded).ok()?;
        let public_key = PublicKey::from_bytes(&bytes).ok()?;
        Some(Box::new(Self::new(public_key)))
    }

    fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let signature: [u8; 64] = match signature.try_into() {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        self.public_key
            .verify(message, &Signature::from(signature))
            .is_ok()
    }
}

impl SourceDelegate for SignedSourceDelegate {
    fn validate_container(&self, container: &dyn LockedSettingsContainer) -> bool {
        match container.as_any().downcast_ref::<SignedContainer>() {
            Some(signed) => self.verify(signed.payload(), signed.signature()),
            None => false,
        }
    }

    fn validate_version_component(&self, component: &dyn LockedVersionComponent) -> bool {
        match component.as_any().downcast_ref::<SignedVersionComponent>() {
            Some(component) => {
                let blob = component.blob();
                self.verify(
                    &component_message(&blob.source_id, blob.counter),
                    &blob.signature,
                )
            }
            None => false,
        }
    }
}

/// Produces signed settings blobs.
#[derive(Default)]
pub struct SignedBlobBuilder {
    payload: DocumentPayload,
    components: Vec<VersionComponentBlob>,
}

impl SignedBlobBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_value(mut self, key: &Key, value: impl Into<Vec<u8>>) -> Self {
        self.payload.values.push(ValueEntry {
            key: key.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn delete(mut self, prefix: &Key) -> Self {
        self.payload.deletions.push(prefix.to_string());
        self
    }

    /// Adds the version stamp component for `source_id`, signed with that
    /// source's key.
    pub fn component(mut self, source_id: &str, counter: u64, keypair: &Keypair) -> Self {
        let signature = keypair.sign(&component_message(source_id, counter));
        self.components.push(VersionComponentBlob {
            source_id: source_id.to_string(),
            counter,
            signature,
        });
        self
    }

    /// Adds a version stamp component with an arbitrary signature.
    pub fn raw_component(mut self, source_id: &str, counter: u64, signature: Vec<u8>) -> Self {
        self.components.push(VersionComponentBlob {
            source_id: source_id.to_string(),
            counter,
            signature,
        });
        self
    }

    /// Serialises and signs the blob with the issuing source's key.
    pub fn sign(self, keypair: &Keypair) -> Vec<u8> {
        let payload = util::archive(&self.payload);
        let signature = keypair.sign(&payload);
        util::archive(&SignedBlob {
            payload,
            signature,
            components: self.components,
        })
    }

    /// Serialises the bare payload, the encoding used for the bootstrap
    /// trusted document.
    pub fn into_payload(self) -> Vec<u8> {
        util::archive(&self.payload)
    }
}
