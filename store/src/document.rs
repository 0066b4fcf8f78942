use crate::blob_store::Handle;
use crate::key::Key;
use crate::version::VersionStamp;
use std::collections::BTreeSet;

/// A read-only bundle of value assignments and subtree deletions stamped
/// with a vector clock. Documents are immutable after construction.
pub trait SettingsDocument {
    /// Returns the value bound at exactly `key`, if any.
    fn value(&self, key: &Key) -> Option<&[u8]>;

    /// Returns all keys with value bindings at or below `prefix`.
    fn keys(&self, prefix: &Key) -> BTreeSet<Key>;

    /// Returns all subtree deletion markers at or below `prefix`.
    fn deletions(&self, prefix: &Key) -> BTreeSet<Key>;

    /// Returns the version stamp of this document.
    fn version_stamp(&self) -> &VersionStamp;

    /// True if the document binds a value or carries a deletion at or below
    /// `prefix`.
    fn has_keys_or_deletions(&self, prefix: &Key) -> bool;
}

/// True if any value assignments or subtree deletions of `a` and `b`
/// overlap, i.e. there are keys that are equal or one is an ancestor of the
/// other.
pub fn has_overlap(a: &dyn SettingsDocument, b: &dyn SettingsDocument) -> bool {
    let root = Key::root();
    if intersects(&a.keys(&root), &b.keys(&root)) {
        return true;
    }
    a.deletions(&root)
        .iter()
        .any(|deletion| b.has_keys_or_deletions(deletion))
        || b.deletions(&root)
            .iter()
            .any(|deletion| a.has_keys_or_deletions(deletion))
}

fn intersects(a: &BTreeSet<Key>, b: &BTreeSet<Key>) -> bool {
    a.intersection(b).next().is_some()
}

/// A settings document plus the tracking data the manager keeps for it: the
/// owning source and the blob store handle its raw bytes live under. The
/// bootstrap trusted document carries neither.
pub struct ManagedDocument {
    document: Box<dyn SettingsDocument>,
    source_id: String,
    blob: Option<Handle>,
}

impl ManagedDocument {
    pub fn new(
        document: Box<dyn SettingsDocument>,
        source_id: impl Into<String>,
        blob: Option<Handle>,
    ) -> Self {
        Self {
            document,
            source_id: source_id.into(),
            blob,
        }
    }

    /// The id of the source that submitted this document.
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// The blob store handle of the raw blob this document was decoded from.
    pub fn blob(&self) -> Option<&Handle> {
        self.blob.as_ref()
    }

    /// The wrapped document.
    pub fn document(&self) -> &dyn SettingsDocument {
        self.document.as_ref()
    }
}

impl SettingsDocument for ManagedDocument {
    fn value(&self, key: &Key) -> Option<&[u8]> {
        self.document.value(key)
    }

    fn keys(&self, prefix: &Key) -> BTreeSet<Key> {
        self.document.keys(prefix)
    }

    fn deletions(&self, prefix: &Key) -> BTreeSet<Key> {
        self.document.deletions(prefix)
    }

    fn version_stamp(&self) -> &VersionStamp {
        self.document.version_stamp()
    }

    fn has_keys_or_deletions(&self, prefix: &Key) -> bool {
        self.document.has_keys_or_deletions(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockSettingsDocument;
    use proptest::prelude::*;

    fn key(s: &str) -> Key {
        s.parse().unwrap()
    }

    fn document(values: &[&str], deletions: &[&str]) -> MockSettingsDocument {
        let mut document = MockSettingsDocument::new(VersionStamp::new());
        for value in values {
            document.set_value(key(value), *value);
        }
        for deletion in deletions {
            document.set_deletion(key(deletion));
        }
        document
    }

    #[test]
    fn disjoint_documents_do_not_overlap() {
        let a = document(&["A.B"], &["C"]);
        let b = document(&["A.C"], &["D"]);
        assert!(!has_overlap(&a, &b));
    }

    #[test]
    fn equal_keys_overlap() {
        let a = document(&["A.B"], &[]);
        let b = document(&["A.B"], &[]);
        assert!(has_overlap(&a, &b));
    }

    #[test]
    fn deletion_hitting_a_key_overlaps() {
        let a = document(&[], &["A"]);
        let b = document(&["A.B.C"], &[]);
        assert!(has_overlap(&a, &b));
        assert!(has_overlap(&b, &a));
    }

    #[test]
    fn deletion_hitting_a_deletion_overlaps() {
        let a = document(&[], &["A.B"]);
        let b = document(&[], &["A"]);
        assert!(has_overlap(&a, &b));
    }

    fn arb_document() -> impl Strategy<Value = MockSettingsDocument> {
        (
            prop::collection::btree_set("[a-c](\\.[a-c]){0,2}", 0..4),
            prop::collection::btree_set("[a-c](\\.[a-c]){0,2}", 0..2),
        )
            .prop_map(|(values, deletions)| {
                let mut document = MockSettingsDocument::new(VersionStamp::new());
                for value in values {
                    document.set_value(Key::parse(&value).unwrap(), value.as_bytes());
                }
                for deletion in deletions {
                    document.set_deletion(Key::parse(&deletion).unwrap());
                }
                document
            })
    }

    proptest! {
        #[test]
        fn overlap_is_symmetric(a in arb_document(), b in arb_document()) {
            prop_assert_eq!(has_overlap(&a, &b), has_overlap(&b, &a));
        }
    }
}
