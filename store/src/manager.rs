use crate::blob_store::{BlobStore, Handle};
use crate::container::LockedSettingsContainer;
use crate::delegate::SourceDelegateFactory;
use crate::document::{ManagedDocument, SettingsDocument};
use crate::key::Key;
use crate::keys;
use crate::map::SettingsMap;
use crate::parser::{SettingsBlobParserRegistry, DEFAULT_FORMAT};
use crate::service::{SettingsObserver, SettingsService};
use crate::source::{SettingStatus, Source};
use crate::util;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use std::ops::Bound;
use std::path::PathBuf;
use std::rc::{Rc, Weak};

/// Outcome of one blob insertion.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InsertionStatus {
    Success,
    /// The claimed source id is not configured.
    UnknownSource,
    /// No registered parser recognised the blob under any format allowed by
    /// the source.
    ParseError,
    /// The container or one of its version components failed validation.
    ValidationError,
    /// The container payload could not be decoded into a document.
    BadPayload,
    /// The persistent blob store refused the blob.
    StorageFailure,
    /// The source already issued a document with this value of its own
    /// version stamp component.
    VersionClash,
    /// The document touches keys the source's access rules do not permit.
    AccessViolation,
    /// The document is concurrent to and overlaps an inserted document.
    Collision,
}

struct SourceMapEntry {
    source: Source,
    /// Documents owned by this source, ascending by the source's own
    /// version stamp component.
    documents: Vec<Rc<ManagedDocument>>,
}

impl SourceMapEntry {
    fn new(source_id: &str) -> Self {
        Self {
            source: Source::new(source_id),
            documents: Vec::new(),
        }
    }
}

/// Orchestrates blob ingestion: parsing, validation, causal ordering,
/// insertion into the settings map, cascading revalidation of the trust
/// graph, blob persistence and observer notification. Each mutation runs to
/// completion as one step; the manager is the only mutator of the settings
/// map, the source map and the blob store.
pub struct DocumentManager {
    parser: Rc<SettingsBlobParserRegistry>,
    delegate_factory: Rc<SourceDelegateFactory>,
    trusted_document: Rc<ManagedDocument>,
    blob_store: BlobStore,
    settings_map: SettingsMap,
    sources: BTreeMap<String, SourceMapEntry>,
    observers: Vec<Weak<dyn SettingsObserver>>,
}

impl DocumentManager {
    /// Creates a manager. The trusted document must carry an empty version
    /// stamp so it can neither collide with nor supersede anything; it is
    /// owned by the manager for life and never stored or revalidated.
    pub fn new(
        parser: Rc<SettingsBlobParserRegistry>,
        delegate_factory: Rc<SourceDelegateFactory>,
        storage_path: impl Into<PathBuf>,
        trusted_document: Box<dyn SettingsDocument>,
    ) -> Self {
        assert!(
            trusted_document.version_stamp().is_empty(),
            "trusted document must carry an empty version stamp"
        );
        Self {
            parser,
            delegate_factory,
            trusted_document: Rc::new(ManagedDocument::new(trusted_document, "", None)),
            blob_store: BlobStore::new(storage_path),
            settings_map: SettingsMap::new(),
            sources: BTreeMap::new(),
            observers: Vec::new(),
        }
    }

    /// Clears the map, installs the trusted document, derives the initial
    /// trust configuration and replays previously accepted blobs for every
    /// configured source. Replay failures are logged but not fatal.
    pub fn init(&mut self) {
        self.settings_map.clear();
        self.sources.clear();

        let mutation = self
            .settings_map
            .insert_document(self.trusted_document.clone())
            .expect("trusted document cannot collide");
        if !mutation.unreferenced.is_empty() {
            tracing::error!("initial settings document is empty");
        }
        let mut changed_keys = mutation.modified_keys;
        self.update_trust_configuration(&mut changed_keys);

        if self.sources.is_empty() {
            tracing::warn!("initial settings document has not added any sources");
        }

        // Walk the source map in id order. Replayed documents may configure
        // further sources; those land later in the walk and get replayed
        // too.
        let mut cursor: Option<String> = None;
        loop {
            let source_id = match &cursor {
                None => self.sources.keys().next().cloned(),
                Some(current) => self
                    .sources
                    .range((Bound::Excluded(current.clone()), Bound::Unbounded))
                    .map(|(id, _)| id)
                    .next()
                    .cloned(),
            };
            let source_id = match source_id {
                Some(source_id) => source_id,
                None => break,
            };

            let handles = match self.blob_store.list(&source_id) {
                Ok(handles) => handles,
                Err(err) => {
                    tracing::error!("failed to list blobs for source {}: {}", source_id, err);
                    Vec::new()
                }
            };
            for handle in handles {
                match self.blob_store.load(&handle) {
                    Ok(blob) => {
                        let status = self.insert_stored_blob(&source_id, &blob, handle);
                        if status != InsertionStatus::Success {
                            tracing::error!(
                                "failed to load settings blob for source {}: {:?}",
                                source_id,
                                status
                            );
                        }
                    }
                    Err(err) => {
                        tracing::error!(
                            "failed to read settings blob for source {}: {}",
                            source_id,
                            err
                        );
                    }
                }
            }
            assert!(
                self.sources.contains_key(&source_id),
                "sources cannot remove themselves"
            );
            cursor = Some(source_id);
        }
    }

    /// Returns the currently visible value for `key`.
    pub fn value(&self, key: &Key) -> Option<&[u8]> {
        self.settings_map.value(key)
    }

    /// Enumerates all keys with visible values at or below `prefix`.
    pub fn keys(&self, prefix: &Key) -> BTreeSet<Key> {
        self.settings_map.keys(prefix)
    }

    /// True if `source_id` is currently configured.
    pub fn has_source(&self, source_id: &str) -> bool {
        self.sources.contains_key(source_id)
    }

    /// Registers `observer`; it is retained weakly.
    pub fn add_observer(&mut self, observer: &Rc<dyn SettingsObserver>) {
        self.observers.push(Rc::downgrade(observer));
    }

    pub fn remove_observer(&mut self, observer: &Rc<dyn SettingsObserver>) {
        self.observers.retain(|existing| {
            existing
                .upgrade()
                .map_or(false, |existing| !Rc::ptr_eq(&existing, observer))
        });
    }

    /// Validates and inserts a settings blob submitted for `source_id`.
    /// Either the blob fully takes effect and observers see one
    /// notification, or nothing happens and only the status is returned.
    pub fn insert_blob(&mut self, source_id: &str, blob: &[u8]) -> InsertionStatus {
        let document = match self.parse_blob(source_id, blob) {
            Ok(document) => document,
            Err(status) => return status,
        };

        let handle = match self.blob_store.store(source_id, blob) {
            Ok(handle) => handle,
            Err(err) => {
                tracing::error!("failed to store blob for source {}: {}", source_id, err);
                return InsertionStatus::StorageFailure;
            }
        };

        let status = self.insert_document(Rc::new(ManagedDocument::new(
            document,
            source_id,
            Some(handle.clone()),
        )));
        if status != InsertionStatus::Success {
            if let Err(err) = self.blob_store.purge(&handle) {
                tracing::error!("failed to purge blob: {}", err);
            }
        }
        status
    }

    /// Replays a blob already present in the store, reusing its handle. A
    /// failing replay leaves the blob on disk.
    fn insert_stored_blob(
        &mut self,
        source_id: &str,
        blob: &[u8],
        handle: Handle,
    ) -> InsertionStatus {
        let document = match self.parse_blob(source_id, blob) {
            Ok(document) => document,
            Err(status) => return status,
        };
        self.insert_document(Rc::new(ManagedDocument::new(
            document,
            source_id,
            Some(handle),
        )))
    }

    /// Source lookup, parsing, container and version component validation,
    /// payload decoding.
    fn parse_blob(
        &self,
        source_id: &str,
        blob: &[u8],
    ) -> Result<Box<dyn SettingsDocument>, InsertionStatus> {
        let source = match self.find_source(source_id) {
            Some(source) => source,
            None => return Err(InsertionStatus::UnknownSource),
        };
        let container = self.parse_and_validate_blob(source, blob)?;
        match container.decode_payload() {
            Some(document) => Ok(document),
            None => Err(InsertionStatus::BadPayload),
        }
    }

    fn parse_and_validate_blob(
        &self,
        source: &Source,
        blob: &[u8],
    ) -> Result<Box<dyn LockedSettingsContainer>, InsertionStatus> {
        // Try the formats allowed by the source; without configured formats
        // fall back to the default one.
        let mut container = None;
        for format in source.blob_formats() {
            container = self.parser.parse(format, blob);
            if container.is_some() {
                break;
            }
        }
        if container.is_none() && source.blob_formats().is_empty() {
            container = self.parser.parse(DEFAULT_FORMAT, blob);
        }
        let container = match container {
            Some(container) => container,
            None => return Err(InsertionStatus::ParseError),
        };

        if !source.delegate().validate_container(container.as_ref()) {
            return Err(InsertionStatus::ValidationError);
        }

        // Each embedded version stamp slice is checked by the delegate of
        // the source it names; an unknown source fails the blob.
        for component in container.version_components() {
            let valid = self
                .find_source(component.source_id())
                .map_or(false, |source| {
                    source.delegate().validate_version_component(component)
                });
            if !valid {
                return Err(InsertionStatus::ValidationError);
            }
        }

        Ok(container)
    }

    fn insert_document(&mut self, document: Rc<ManagedDocument>) -> InsertionStatus {
        debug_assert!(!document.source_id().is_empty());
        let source_id = document.source_id().to_string();
        let entry = self
            .sources
            .get_mut(&source_id)
            .expect("source vanished during insertion");

        // All documents from one source must be in well-defined order with
        // respect to each other, overlapping or not: the source's own
        // version stamp component is a unique counter.
        let own_component = document.version_stamp().get(&source_id);
        let insertion_point = entry
            .documents
            .partition_point(|existing| existing.version_stamp().get(&source_id) < own_component);
        if entry
            .documents
            .get(insertion_point)
            .map_or(false, |existing| {
                existing.version_stamp().get(&source_id) == own_component
            })
        {
            return InsertionStatus::VersionClash;
        }

        if !entry
            .source
            .check_access(document.document(), SettingStatus::Active)
        {
            return InsertionStatus::AccessViolation;
        }

        let mutation = match self.settings_map.insert_document(document.clone()) {
            Ok(mutation) => mutation,
            Err(_) => return InsertionStatus::Collision,
        };
        entry.documents.insert(insertion_point, document);

        // The insertion may have left documents without any remaining
        // references, possibly including the new one if it was immediately
        // shadowed.
        for unreferenced in &mutation.unreferenced {
            if !self.purge_blob_and_document(unreferenced) {
                tracing::error!("failed to purge unreferenced document");
            }
        }

        let mut changed_keys = mutation.modified_keys;
        self.update_trust_configuration(&mut changed_keys);
        self.notify_observers(&changed_keys);
        InsertionStatus::Success
    }

    /// Re-parses and revalidates every source whose configuration keys
    /// changed. Configuration changes cascade: retracting a document can
    /// change the trust keys of sources it delegated to, which are then
    /// queued in turn. Documents are only ever removed here, which bounds
    /// the loop.
    fn update_trust_configuration(&mut self, changed_keys: &mut BTreeSet<Key>) {
        let mut queue = BinaryHeap::new();
        Self::enqueue_changed_sources(changed_keys, &mut queue);

        while let Some(source_id) = queue.pop() {
            // Skip contiguous duplicates.
            while queue.peek() == Some(&source_id) {
                queue.pop();
            }

            let entry = self
                .sources
                .entry(source_id.clone())
                .or_insert_with(|| SourceMapEntry::new(&source_id));

            // Re-parse the source configuration. A source whose entire
            // configuration vanished is purged once its documents are
            // handled.
            let purge_source = !entry
                .source
                .update(self.delegate_factory.as_ref(), &self.settings_map);

            self.revalidate_source_documents(&source_id, changed_keys, &mut queue);

            if purge_source {
                self.sources.remove(&source_id);
            }
        }
    }

    fn revalidate_source_documents(
        &mut self,
        source_id: &str,
        changed_keys: &mut BTreeSet<Key>,
        queue: &mut BinaryHeap<String>,
    ) {
        let documents = match self.sources.get(source_id) {
            Some(entry) => entry.documents.clone(),
            None => return,
        };

        let mut obsolete = Vec::new();
        for document in documents {
            if self.revalidate_document(source_id, &document) {
                continue;
            }
            let mutation = self.settings_map.remove_document(&document);
            Self::enqueue_changed_sources(&mutation.modified_keys, queue);
            changed_keys.extend(mutation.modified_keys);
            obsolete.extend(mutation.unreferenced);
        }

        for document in obsolete {
            if !self.purge_blob_and_document(&document) {
                tracing::error!("failed to purge unreferenced document");
            }
        }
    }

    /// Re-runs the parse and validation pipeline for a stored document
    /// against the current source configuration. Withdrawn status is
    /// sufficient here: a document accepted while its source was active may
    /// linger after withdrawal.
    fn revalidate_document(&self, source_id: &str, document: &Rc<ManagedDocument>) -> bool {
        let source = match self.find_source(source_id) {
            Some(source) => source,
            None => return false,
        };
        let handle = match document.blob() {
            Some(handle) => handle,
            None => return false,
        };
        let blob = match self.blob_store.load(handle) {
            Ok(blob) => blob,
            Err(err) => {
                tracing::error!("failed to re-load blob for source {}: {}", source_id, err);
                return false;
            }
        };
        if self.parse_and_validate_blob(source, &blob).is_err() {
            return false;
        }
        source.check_access(document.document(), SettingStatus::Withdrawn)
    }

    /// Detaches `document` from its source entry and deletes its stored
    /// blob. Returns false if either step fails.
    fn purge_blob_and_document(&mut self, document: &Rc<ManagedDocument>) -> bool {
        let entry = match self.sources.get_mut(document.source_id()) {
            Some(entry) => entry,
            None => return false,
        };
        let position = match entry
            .documents
            .iter()
            .position(|existing| Rc::ptr_eq(existing, document))
        {
            Some(position) => position,
            None => return false,
        };
        entry.documents.remove(position);
        match document.blob() {
            Some(handle) => self.blob_store.purge(handle).is_ok(),
            None => false,
        }
    }

    /// Queues the source id segment of every changed key below the trust
    /// configuration prefix, in a max-priority queue.
    fn enqueue_changed_sources(changed_keys: &BTreeSet<Key>, queue: &mut BinaryHeap<String>) {
        let sources_prefix = keys::sources_prefix();
        let mut last_source_id = String::new();
        for key in util::set_range(&sources_prefix, changed_keys) {
            let suffix = match key.suffix(&sources_prefix) {
                Some(suffix) => suffix,
                None => continue,
            };
            let (source_id, _) = suffix.split_first();
            let source_id = source_id.as_str().to_string();
            if !source_id.is_empty() && source_id != last_source_id {
                queue.push(source_id.clone());
            }
            last_source_id = source_id;
        }
    }

    fn find_source(&self, source_id: &str) -> Option<&Source> {
        self.sources.get(source_id).map(|entry| &entry.source)
    }

    fn notify_observers(&mut self, changed_keys: &BTreeSet<Key>) {
        self.observers.retain(|observer| observer.upgrade().is_some());
        let observers: Vec<Rc<dyn SettingsObserver>> =
            self.observers.iter().filter_map(Weak::upgrade).collect();
        for observer in observers {
            observer.on_settings_changed(changed_keys);
        }
    }
}

impl SettingsService for DocumentManager {
    fn value(&self, key: &Key) -> Option<&[u8]> {
        DocumentManager::value(self, key)
    }

    fn keys(&self, prefix: &Key) -> BTreeSet<Key> {
        DocumentManager::keys(self, prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::make_source_key;
    use crate::testing::{
        init_logging, MockBlobParser, MockLockedSettingsContainer, MockSettingsDocument,
        MockSourceDelegate,
    };
    use crate::version::VersionStamp;
    use std::cell::RefCell;

    const SOURCE0: &str = "source0";
    const SOURCE1: &str = "source1";
    const SOURCE2: &str = "source2";
    const SHARED_KEY: &str = "shared";

    fn key(s: &str) -> Key {
        s.parse().unwrap()
    }

    #[derive(Default)]
    struct RecordingObserver {
        notifications: RefCell<Vec<BTreeSet<Key>>>,
    }

    impl SettingsObserver for RecordingObserver {
        fn on_settings_changed(&self, keys: &BTreeSet<Key>) {
            self.notifications.borrow_mut().push(keys.clone());
        }
    }

    fn configure_source(
        document: &mut MockSettingsDocument,
        source_id: &str,
        status: SettingStatus,
        access_rules: &[(Key, SettingStatus)],
    ) {
        document.set_value(
            make_source_key(source_id).extend([keys::sources::STATUS]),
            status.as_str(),
        );
        document.set_value(
            make_source_key(source_id).extend([keys::sources::NAME]),
            source_id,
        );
        document.set_value(
            make_source_key(source_id).extend([keys::sources::TYPE]),
            source_id,
        );
        for (rule, rule_status) in access_rules {
            document.set_value(
                make_source_key(source_id)
                    .extend([keys::sources::ACCESS])
                    .append(rule),
                rule_status.as_str(),
            );
        }
    }

    /// The bootstrap document: source0 may write its sentinel key and the
    /// trust configuration of source1 and source2.
    fn trusted_document() -> Box<dyn SettingsDocument> {
        let mut document = MockSettingsDocument::new(VersionStamp::new());
        configure_source(
            &mut document,
            SOURCE0,
            SettingStatus::Active,
            &[
                (key(SOURCE0), SettingStatus::Active),
                (make_source_key(SOURCE1), SettingStatus::Active),
                (make_source_key(SOURCE2), SettingStatus::Active),
            ],
        );
        Box::new(document)
    }

    struct Fixture {
        tempdir: tempfile::TempDir,
        parser: Rc<MockBlobParser>,
        registry: Rc<SettingsBlobParserRegistry>,
        factory: Rc<SourceDelegateFactory>,
        version: VersionStamp,
        observer: Rc<RecordingObserver>,
        manager: DocumentManager,
    }

    impl Fixture {
        fn new() -> Self {
            init_logging();
            let tempdir = tempfile::tempdir().unwrap();
            let parser = Rc::new(MockBlobParser::new());
            let registry = Rc::new(SettingsBlobParserRegistry::new());
            {
                let parser = parser.clone();
                registry.register(
                    DEFAULT_FORMAT,
                    Box::new(move |format, blob| parser.parse(format, blob)),
                );
            }
            let factory = Rc::new(SourceDelegateFactory::new());
            for source in [SOURCE0, SOURCE1, SOURCE2] {
                factory.register(source, Box::new(|_, _| Some(Box::new(MockSourceDelegate))));
            }

            let mut manager = DocumentManager::new(
                registry.clone(),
                factory.clone(),
                tempdir.path().to_path_buf(),
                trusted_document(),
            );
            manager.init();

            let mut fixture = Self {
                tempdir,
                parser,
                registry,
                factory,
                version: VersionStamp::new(),
                observer: Rc::new(RecordingObserver::default()),
                manager,
            };
            let observer: Rc<dyn SettingsObserver> = fixture.observer.clone();
            fixture.manager.add_observer(&observer);
            fixture
        }

        fn reinitialize_manager(&mut self) {
            self.manager = DocumentManager::new(
                self.registry.clone(),
                self.factory.clone(),
                self.tempdir.path().to_path_buf(),
                trusted_document(),
            );
            self.manager.init();
        }

        /// Creates a settings document with a bumped version stamp.
        fn make_document(&mut self, source_id: &str) -> MockSettingsDocument {
            let next = self.version.get(source_id) + 1;
            self.version.set(source_id, next);
            MockSettingsDocument::new(self.version.clone())
        }

        fn insert_document(
            &mut self,
            document: MockSettingsDocument,
            source_id: &str,
        ) -> InsertionStatus {
            let blob = self
                .parser
                .register(MockLockedSettingsContainer::new(Some(document)));
            self.manager.insert_blob(source_id, &blob)
        }

        fn configure_trusted_source(&mut self, source_id: &str) {
            let mut document = self.make_document(SOURCE0);
            configure_source(
                &mut document,
                source_id,
                SettingStatus::Active,
                &[
                    (key(source_id), SettingStatus::Active),
                    (key(SHARED_KEY), SettingStatus::Active),
                ],
            );
            assert_eq!(
                self.insert_document(document, SOURCE0),
                InsertionStatus::Success
            );
        }

        /// Sets a key serving as the sentinel for whether the source's
        /// settings are still in effect. Returns the backing blob bytes.
        fn add_sentinel_value(&mut self, source_id: &str) -> Vec<u8> {
            let mut document = self.make_document(source_id);
            document.set_value(key(source_id), source_id);
            let blob = self
                .parser
                .register(MockLockedSettingsContainer::new(Some(document)));
            assert_eq!(
                self.manager.insert_blob(source_id, &blob),
                InsertionStatus::Success
            );
            blob
        }

        fn check_sentinels(&self, present: &[&str], absent: &[&str]) {
            for source in present {
                assert_eq!(
                    self.manager.value(&key(source)),
                    Some(source.as_bytes()),
                    "sentinel value {} missing or wrong",
                    source
                );
            }
            for source in absent {
                assert_eq!(
                    self.manager.value(&key(source)),
                    None,
                    "sentinel value {} unexpectedly present",
                    source
                );
            }
        }

        /// Changes the trust of `source_id`'s own sentinel key.
        fn set_trust_for_sentinel_key(&mut self, source_id: &str, status: SettingStatus) {
            let mut document = self.make_document(SOURCE0);
            document.set_value(
                make_source_key(source_id)
                    .extend([keys::sources::ACCESS])
                    .append(&key(source_id)),
                status.as_str(),
            );
            assert_eq!(
                self.insert_document(document, SOURCE0),
                InsertionStatus::Success
            );
        }

        fn last_notification(&self) -> BTreeSet<Key> {
            self.observer
                .notifications
                .borrow()
                .last()
                .cloned()
                .expect("no observer notification")
        }
    }

    #[test]
    fn bootstrap_only() {
        let fixture = Fixture::new();
        assert!(fixture.manager.has_source(SOURCE0));
        assert!(!fixture.manager.has_source(SOURCE1));
        assert_eq!(fixture.manager.value(&key(SOURCE0)), None);
        assert!(fixture.manager.keys(&key(SOURCE0)).is_empty());
    }

    #[test]
    fn value_insertion_and_removal() {
        let mut fixture = Fixture::new();
        fixture.configure_trusted_source(SOURCE1);
        let test_key = key(SOURCE1);

        // Insert a document with a fresh key.
        let mut document = fixture.make_document(SOURCE1);
        document.set_value(test_key.clone(), "42");
        assert_eq!(
            fixture.insert_document(document, SOURCE1),
            InsertionStatus::Success
        );
        assert_eq!(fixture.manager.value(&test_key), Some("42".as_bytes()));
        assert!(fixture.last_notification().contains(&test_key));

        // Update the value.
        let mut document = fixture.make_document(SOURCE1);
        document.set_value(test_key.clone(), "string");
        assert_eq!(
            fixture.insert_document(document, SOURCE1),
            InsertionStatus::Success
        );
        assert_eq!(fixture.manager.value(&test_key), Some("string".as_bytes()));
        assert!(fixture.last_notification().contains(&test_key));

        // Clear the value.
        let mut document = fixture.make_document(SOURCE1);
        document.set_deletion(test_key.clone());
        assert_eq!(
            fixture.insert_document(document, SOURCE1),
            InsertionStatus::Success
        );
        assert_eq!(fixture.manager.value(&test_key), None);
        assert!(fixture.last_notification().contains(&test_key));
    }

    #[test]
    fn trust_change() {
        let mut fixture = Fixture::new();
        fixture.configure_trusted_source(SOURCE1);
        fixture.add_sentinel_value(SOURCE1);
        fixture.check_sentinels(&[SOURCE1], &[]);

        // Remove trust; the sentinel value disappears.
        let mut document = fixture.make_document(SOURCE0);
        configure_source(&mut document, SOURCE1, SettingStatus::Invalid, &[]);
        assert_eq!(
            fixture.insert_document(document, SOURCE0),
            InsertionStatus::Success
        );
        fixture.check_sentinels(&[], &[SOURCE1]);
        assert!(fixture.last_notification().contains(&key(SOURCE1)));
    }

    #[test]
    fn cascading_removal() {
        let mut fixture = Fixture::new();

        // source0 adds source1 and grants it access to source2's config.
        let mut document = fixture.make_document(SOURCE0);
        configure_source(
            &mut document,
            SOURCE1,
            SettingStatus::Active,
            &[
                (key(SOURCE1), SettingStatus::Active),
                (make_source_key(SOURCE2), SettingStatus::Active),
            ],
        );
        assert_eq!(
            fixture.insert_document(document, SOURCE0),
            InsertionStatus::Success
        );
        fixture.add_sentinel_value(SOURCE1);

        // source1 extends trust to source2.
        let mut document = fixture.make_document(SOURCE1);
        configure_source(
            &mut document,
            SOURCE2,
            SettingStatus::Active,
            &[(key(SOURCE2), SettingStatus::Active)],
        );
        assert_eq!(
            fixture.insert_document(document, SOURCE1),
            InsertionStatus::Success
        );
        fixture.add_sentinel_value(SOURCE2);

        fixture.check_sentinels(&[SOURCE1, SOURCE2], &[]);

        // Revoking source1 invalidates source2 as well.
        let mut document = fixture.make_document(SOURCE0);
        configure_source(&mut document, SOURCE1, SettingStatus::Invalid, &[]);
        assert_eq!(
            fixture.insert_document(document, SOURCE0),
            InsertionStatus::Success
        );
        fixture.check_sentinels(&[], &[SOURCE1, SOURCE2]);
        let notification = fixture.last_notification();
        assert!(notification.contains(&key(SOURCE1)));
        assert!(notification.contains(&key(SOURCE2)));
        // source2 lost its entire configuration and is gone from the map.
        assert!(!fixture.manager.has_source(SOURCE2));
    }

    #[test]
    fn trust_change_deletion() {
        let mut fixture = Fixture::new();
        fixture.configure_trusted_source(SOURCE1);
        fixture.add_sentinel_value(SOURCE1);
        fixture.check_sentinels(&[SOURCE1], &[]);

        // Remove trust via a subtree deletion of source1's configuration.
        let mut document = fixture.make_document(SOURCE0);
        document.set_deletion(make_source_key(SOURCE1));
        assert_eq!(
            fixture.insert_document(document, SOURCE0),
            InsertionStatus::Success
        );
        fixture.check_sentinels(&[], &[SOURCE1]);
        assert!(fixture.last_notification().contains(&key(SOURCE1)));
        // Without any remaining configuration the source itself is purged.
        assert!(!fixture.manager.has_source(SOURCE1));
    }

    #[test]
    fn trust_change_access_rules() {
        let mut fixture = Fixture::new();
        fixture.configure_trusted_source(SOURCE1);
        fixture.add_sentinel_value(SOURCE1);
        fixture.check_sentinels(&[SOURCE1], &[]);

        fixture.set_trust_for_sentinel_key(SOURCE1, SettingStatus::Invalid);
        fixture.check_sentinels(&[], &[SOURCE1]);
    }

    #[test]
    fn trust_change_withdrawn_source() {
        let mut fixture = Fixture::new();
        fixture.configure_trusted_source(SOURCE1);
        fixture.add_sentinel_value(SOURCE1);
        fixture.check_sentinels(&[SOURCE1], &[]);

        // Switch the source to withdrawn state.
        let mut document = fixture.make_document(SOURCE0);
        configure_source(&mut document, SOURCE1, SettingStatus::Withdrawn, &[]);
        assert_eq!(
            fixture.insert_document(document, SOURCE0),
            InsertionStatus::Success
        );

        // The value remains present, but source1 may no longer change it.
        fixture.check_sentinels(&[SOURCE1], &[]);
        let mut document = fixture.make_document(SOURCE1);
        document.set_value(key(SOURCE1), "change");
        assert_eq!(
            fixture.insert_document(document, SOURCE1),
            InsertionStatus::AccessViolation
        );
    }

    #[test]
    fn trust_change_withdrawn_access_rules() {
        let mut fixture = Fixture::new();
        fixture.configure_trusted_source(SOURCE1);
        fixture.add_sentinel_value(SOURCE1);
        fixture.check_sentinels(&[SOURCE1], &[]);

        fixture.set_trust_for_sentinel_key(SOURCE1, SettingStatus::Withdrawn);

        fixture.check_sentinels(&[SOURCE1], &[]);
        let mut document = fixture.make_document(SOURCE1);
        document.set_value(key(SOURCE1), "change");
        assert_eq!(
            fixture.insert_document(document, SOURCE1),
            InsertionStatus::AccessViolation
        );
    }

    #[test]
    fn insertion_failure_invalid_source() {
        let mut fixture = Fixture::new();

        // source1 is configured, but in invalid state.
        let mut document = fixture.make_document(SOURCE0);
        configure_source(
            &mut document,
            SOURCE1,
            SettingStatus::Invalid,
            &[(key(SOURCE1), SettingStatus::Active)],
        );
        assert_eq!(
            fixture.insert_document(document, SOURCE0),
            InsertionStatus::Success
        );

        let document = fixture.make_document(SOURCE1);
        assert_eq!(
            fixture.insert_document(document, SOURCE1),
            InsertionStatus::AccessViolation
        );
    }

    #[test]
    fn insertion_failure_access_rules() {
        let mut fixture = Fixture::new();
        fixture.configure_trusted_source(SOURCE1);

        // A key the source has no rule for is denied.
        let mut document = fixture.make_document(SOURCE1);
        document.set_value(key("A"), "42");
        assert_eq!(
            fixture.insert_document(document, SOURCE1),
            InsertionStatus::AccessViolation
        );
    }

    #[test]
    fn insertion_failure_reserved_tree() {
        let mut fixture = Fixture::new();
        fixture.configure_trusted_source(SOURCE1);

        // Writing the own trust configuration is denied.
        let mut document = fixture.make_document(SOURCE1);
        document.set_value(
            make_source_key(SOURCE1).extend([keys::sources::STATUS]),
            "active",
        );
        assert_eq!(
            fixture.insert_document(document, SOURCE1),
            InsertionStatus::AccessViolation
        );

        // Writing another source's trust configuration without a grant is
        // denied as well.
        let mut document = fixture.make_document(SOURCE1);
        document.set_value(
            make_source_key(SOURCE2).extend([keys::sources::STATUS]),
            "active",
        );
        assert_eq!(
            fixture.insert_document(document, SOURCE1),
            InsertionStatus::AccessViolation
        );

        // A deletion covering the trust configuration root is denied.
        let mut document = fixture.make_document(SOURCE1);
        document.set_deletion(key("org"));
        assert_eq!(
            fixture.insert_document(document, SOURCE1),
            InsertionStatus::AccessViolation
        );
    }

    #[test]
    fn insertion_failure_version_clash() {
        let mut fixture = Fixture::new();
        fixture.configure_trusted_source(SOURCE1);
        fixture.add_sentinel_value(SOURCE1);

        // A document reusing the source's own version stamp component fails
        // even without any overlap.
        let mut version_stamp = fixture.version.clone();
        version_stamp.set(SOURCE2, fixture.version.get(SOURCE2) + 1);
        assert!(version_stamp.is_after(&fixture.version));
        let document = MockSettingsDocument::new(version_stamp);
        assert_eq!(
            fixture.insert_document(document, SOURCE1),
            InsertionStatus::VersionClash
        );
    }

    #[test]
    fn insertion_failure_version_collision() {
        let mut fixture = Fixture::new();
        fixture.configure_trusted_source(SOURCE1);
        fixture.configure_trusted_source(SOURCE2);

        let initial_version = fixture.version.clone();

        let mut document = fixture.make_document(SOURCE1);
        document.set_value(key(SHARED_KEY), "42");
        assert_eq!(
            fixture.insert_document(document, SOURCE1),
            InsertionStatus::Success
        );

        // A concurrent document touching the same key collides.
        let previous_version = fixture.version.clone();
        fixture.version = initial_version;
        let mut document = fixture.make_document(SOURCE2);
        document.set_value(key(SHARED_KEY), "0");
        assert!(previous_version.is_concurrent(&fixture.version));
        assert_eq!(
            fixture.insert_document(document, SOURCE2),
            InsertionStatus::Collision
        );
        assert_eq!(
            fixture.manager.value(&key(SHARED_KEY)),
            Some("42".as_bytes())
        );
    }

    #[test]
    fn insert_blob_unknown_source() {
        let mut fixture = Fixture::new();
        let document = fixture.make_document(SOURCE1);
        assert_eq!(
            fixture.insert_document(document, SOURCE1),
            InsertionStatus::UnknownSource
        );
    }

    #[test]
    fn insert_blob_parse_error() {
        let mut fixture = Fixture::new();
        fixture.configure_trusted_source(SOURCE1);
        assert_eq!(
            fixture.manager.insert_blob(SOURCE1, b"unregistered"),
            InsertionStatus::ParseError
        );
    }

    #[test]
    fn insert_blob_validation_error_no_delegate() {
        let mut fixture = Fixture::new();
        fixture.factory.register(SOURCE1, Box::new(|_, _| None));
        fixture.configure_trusted_source(SOURCE1);

        let document = fixture.make_document(SOURCE1);
        assert_eq!(
            fixture.insert_document(document, SOURCE1),
            InsertionStatus::ValidationError
        );
    }

    #[test]
    fn insert_blob_validation_error_container() {
        let mut fixture = Fixture::new();
        fixture.configure_trusted_source(SOURCE1);

        let document = fixture.make_document(SOURCE1);
        let mut container = MockLockedSettingsContainer::new(Some(document));
        container.set_valid(false);
        let blob = fixture.parser.register(container);
        assert_eq!(
            fixture.manager.insert_blob(SOURCE1, &blob),
            InsertionStatus::ValidationError
        );
    }

    #[test]
    fn insert_blob_validation_error_version_component() {
        let mut fixture = Fixture::new();
        fixture.configure_trusted_source(SOURCE1);

        let document = fixture.make_document(SOURCE1);
        let mut container = MockLockedSettingsContainer::new(Some(document));
        container.version_component_mut(SOURCE1).set_valid(false);
        let blob = fixture.parser.register(container);
        assert_eq!(
            fixture.manager.insert_blob(SOURCE1, &blob),
            InsertionStatus::ValidationError
        );
    }

    #[test]
    fn insert_blob_validation_error_unknown_component_source() {
        let mut fixture = Fixture::new();
        fixture.configure_trusted_source(SOURCE1);

        let document = fixture.make_document(SOURCE1);
        let mut container = MockLockedSettingsContainer::new(Some(document));
        container.version_component_mut("ghost");
        let blob = fixture.parser.register(container);
        assert_eq!(
            fixture.manager.insert_blob(SOURCE1, &blob),
            InsertionStatus::ValidationError
        );
    }

    #[test]
    fn insert_blob_bad_payload() {
        let mut fixture = Fixture::new();
        fixture.configure_trusted_source(SOURCE1);
        let blob = fixture
            .parser
            .register(MockLockedSettingsContainer::new(None));
        assert_eq!(
            fixture.manager.insert_blob(SOURCE1, &blob),
            InsertionStatus::BadPayload
        );
    }

    #[test]
    fn insert_blob_on_startup() {
        let mut fixture = Fixture::new();
        fixture.add_sentinel_value(SOURCE0);
        fixture.reinitialize_manager();
        fixture.check_sentinels(&[SOURCE0], &[]);
    }

    #[test]
    fn container_not_parseable_on_revalidation() {
        let mut fixture = Fixture::new();
        fixture.configure_trusted_source(SOURCE1);
        let blob = fixture.add_sentinel_value(SOURCE1);
        fixture.parser.unregister(&blob);
        fixture.set_trust_for_sentinel_key(SOURCE1, SettingStatus::Withdrawn);
        fixture.check_sentinels(&[], &[SOURCE1]);
    }

    #[test]
    fn container_validation_failure_on_revalidation() {
        let mut fixture = Fixture::new();
        fixture.configure_trusted_source(SOURCE1);
        let blob = fixture.add_sentinel_value(SOURCE1);
        fixture
            .parser
            .with_container(&blob, |container| container.set_valid(false));
        fixture.set_trust_for_sentinel_key(SOURCE1, SettingStatus::Withdrawn);
        fixture.check_sentinels(&[], &[SOURCE1]);
    }

    #[test]
    fn version_component_validation_failure_on_revalidation() {
        let mut fixture = Fixture::new();
        fixture.configure_trusted_source(SOURCE1);

        let mut document = fixture.make_document(SOURCE1);
        document.set_value(key(SOURCE1), SOURCE1);
        let mut container = MockLockedSettingsContainer::new(Some(document));
        container.version_component_mut(SOURCE1);
        let blob = fixture.parser.register(container);
        assert_eq!(
            fixture.manager.insert_blob(SOURCE1, &blob),
            InsertionStatus::Success
        );
        fixture.check_sentinels(&[SOURCE1], &[]);

        fixture.parser.with_container(&blob, |container| {
            container.version_component_mut(SOURCE1).set_valid(false);
        });
        fixture.set_trust_for_sentinel_key(SOURCE1, SettingStatus::Withdrawn);
        fixture.check_sentinels(&[], &[SOURCE1]);
    }

    #[test]
    fn shadowed_insertion_is_immediately_purged() {
        let mut fixture = Fixture::new();
        fixture.configure_trusted_source(SOURCE1);
        let stale_version = fixture.version.clone();

        let mut document = fixture.make_document(SOURCE1);
        document.set_value(key(SOURCE1), "new");
        assert_eq!(
            fixture.insert_document(document, SOURCE1),
            InsertionStatus::Success
        );

        // An earlier-stamped document whose only key is already bound by a
        // later one never becomes visible; its blob is dropped again.
        assert!(stale_version.is_before(&fixture.version));
        let mut document = MockSettingsDocument::new(stale_version);
        document.set_value(key(SOURCE1), "stale");
        assert_eq!(
            fixture.insert_document(document, SOURCE1),
            InsertionStatus::Success
        );
        assert_eq!(fixture.manager.value(&key(SOURCE1)), Some("new".as_bytes()));
        let stored: Vec<_> = std::fs::read_dir(fixture.tempdir.path().join(SOURCE1))
            .unwrap()
            .collect();
        assert_eq!(stored.len(), 1);
    }
}
