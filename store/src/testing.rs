//! Test doubles for exercising the store without real wire formats or
//! hardware.
use crate::container::{LockedSettingsContainer, LockedVersionComponent};
use crate::delegate::SourceDelegate;
use crate::document::SettingsDocument;
use crate::key::Key;
use crate::nvram::{LockState, NVRam};
use crate::service::SettingsService;
use crate::util;
use crate::version::VersionStamp;
use anyhow::{anyhow, Result};
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A settings document assembled directly from value and deletion sets.
#[derive(Clone, Default, Debug)]
pub struct MockSettingsDocument {
    version_stamp: VersionStamp,
    values: BTreeMap<Key, Vec<u8>>,
    deletions: BTreeSet<Key>,
}

impl MockSettingsDocument {
    pub fn new(version_stamp: VersionStamp) -> Self {
        Self {
            version_stamp,
            ..Default::default()
        }
    }

    pub fn set_value(&mut self, key: Key, value: impl Into<Vec<u8>>) {
        self.values.insert(key, value.into());
    }

    pub fn clear_value(&mut self, key: &Key) {
        self.values.remove(key);
    }

    pub fn clear_values(&mut self) {
        self.values.clear();
    }

    pub fn set_deletion(&mut self, key: Key) {
        self.deletions.insert(key);
    }

    pub fn clear_deletion(&mut self, key: &Key) {
        self.deletions.remove(key);
    }

    pub fn clear_deletions(&mut self) {
        self.deletions.clear();
    }
}

impl SettingsDocument for MockSettingsDocument {
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

/// A version component whose validity is a test-controlled flag.
#[derive(Clone)]
pub struct MockLockedVersionComponent {
    source_id: String,
    valid: bool,
}

impl MockLockedVersionComponent {
    pub fn new(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            valid: true,
        }
    }

    pub fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl LockedVersionComponent for MockLockedVersionComponent {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A container wrapping a mock document, with test-controlled validity.
#[derive(Clone)]
pub struct MockLockedSettingsContainer {
    components: BTreeMap<String, MockLockedVersionComponent>,
    payload: Option<MockSettingsDocument>,
    valid: bool,
}

impl MockLockedSettingsContainer {
    pub fn new(payload: Option<MockSettingsDocument>) -> Self {
        Self {
            components: BTreeMap::new(),
            payload,
            valid: true,
        }
    }

    pub fn set_valid(&mut self, valid: bool) {
        self.valid = valid;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Returns the version component for `source_id`, creating it if
    /// absent.
    pub fn version_component_mut(&mut self, source_id: &str) -> &mut MockLockedVersionComponent {
        self.components
            .entry(source_id.to_string())
            .or_insert_with(|| MockLockedVersionComponent::new(source_id))
    }
}

impl LockedSettingsContainer for MockLockedSettingsContainer {
    fn version_components(&self) -> Vec<&dyn LockedVersionComponent> {
        self.components
            .values()
            .map(|component| component as &dyn LockedVersionComponent)
            .collect()
    }

    fn decode_payload(self: Box<Self>) -> Option<Box<dyn SettingsDocument>> {
        self.payload
            .map(|document| Box::new(document) as Box<dyn SettingsDocument>)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Hands out clones of staged containers, keyed by blob contents. Register
/// a closure forwarding to [`MockBlobParser::parse`] in a parser registry
/// to use it.
#[derive(Default)]
pub struct MockBlobParser {
    containers: RefCell<HashMap<Vec<u8>, MockLockedSettingsContainer>>,
    next_blob_id: Cell<u32>,
}

impl MockBlobParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a container and returns the blob bytes that parse to it.
    pub fn register(&self, container: MockLockedSettingsContainer) -> Vec<u8> {
        let id = self.next_blob_id.get();
        self.next_blob_id.set(id + 1);
        let blob = format!("blob_{}", id).into_bytes();
        self.containers.borrow_mut().insert(blob.clone(), container);
        blob
    }

    /// Drops the container staged for `blob`.
    pub fn unregister(&self, blob: &[u8]) {
        self.containers.borrow_mut().remove(blob);
    }

    /// Mutates a staged container in place.
    pub fn with_container(&self, blob: &[u8], mutate: impl FnOnce(&mut MockLockedSettingsContainer)) {
        let mut containers = self.containers.borrow_mut();
        mutate(containers.get_mut(blob).expect("blob not staged"));
    }

    pub fn parse(&self, _format: &str, blob: &[u8]) -> Option<Box<dyn LockedSettingsContainer>> {
        self.containers
            .borrow()
            .get(blob)
            .map(|container| Box::new(container.clone()) as Box<dyn LockedSettingsContainer>)
    }
}

/// Accepts exactly the containers and components staged as valid.
pub struct MockSourceDelegate;

impl SourceDelegate for MockSourceDelegate {
    fn validate_container(&self, container: &dyn LockedSettingsContainer) -> bool {
        container
            .as_any()
            .downcast_ref::<MockLockedSettingsContainer>()
            .map_or(false, |container| container.is_valid())
    }

    fn validate_version_component(&self, component: &dyn LockedVersionComponent) -> bool {
        component
            .as_any()
            .downcast_ref::<MockLockedVersionComponent>()
            .map_or(false, |component| component.is_valid())
    }
}

/// An in-memory settings view.
#[derive(Default)]
pub struct MockSettingsService {
    values: BTreeMap<Key, Vec<u8>>,
}

impl MockSettingsService {
    pub fn set_value(&mut self, key: Key, value: impl Into<Vec<u8>>) {
        self.values.insert(key, value.into());
    }

    pub fn remove_value(&mut self, key: &Key) {
        self.values.remove(key);
    }
}

impl SettingsService for MockSettingsService {
    fn value(&self, key: &Key) -> Option<&[u8]> {
        self.values.get(key).map(Vec::as_slice)
    }

    fn keys(&self, prefix: &Key) -> BTreeSet<Key> {
        util::map_range(prefix, &self.values)
            .map(|(key, _)| key.clone())
            .collect()
    }
}

/// One NVRAM space of the mock.
#[derive(Clone, Default)]
pub struct MockNVRamSpace {
    pub locked_for_reading: bool,
    pub locked_for_writing: bool,
    pub data: Vec<u8>,
}

/// An NVRAM fake with arbitrary test-defined spaces.
#[derive(Default)]
pub struct MockNVRam {
    spaces: RefCell<HashMap<u32, MockNVRamSpace>>,
}

impl MockNVRam {
    pub fn set_space(&self, index: u32, space: MockNVRamSpace) {
        self.spaces.borrow_mut().insert(index, space);
    }

    pub fn with_space(&self, index: u32, mutate: impl FnOnce(&mut MockNVRamSpace)) {
        let mut spaces = self.spaces.borrow_mut();
        mutate(spaces.get_mut(&index).expect("space not defined"));
    }

    pub fn delete_space(&self, index: u32) {
        self.spaces.borrow_mut().remove(&index);
    }
}

impl NVRam for MockNVRam {
    fn is_space_locked(&self, index: u32) -> Result<LockState> {
        self.spaces
            .borrow()
            .get(&index)
            .map(|space| LockState {
                locked_for_reading: space.locked_for_reading,
                locked_for_writing: space.locked_for_writing,
            })
            .ok_or_else(|| anyhow!("no NVRAM space at {}", index))
    }

    fn read_space(&self, index: u32) -> Result<Vec<u8>> {
        self.spaces
            .borrow()
            .get(&index)
            .map(|space| space.data.clone())
            .ok_or_else(|| anyhow!("no NVRAM space at {}", index))
    }
}

#[cfg(test)]
pub(crate) fn init_logging() {
    use tracing_subscriber::EnvFilter;
    tracing_log::LogTracer::init().ok();
    let env = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| "info".to_owned());
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(env))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}
