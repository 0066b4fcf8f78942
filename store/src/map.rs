use crate::document::{has_overlap, ManagedDocument, SettingsDocument};
use crate::key::Key;
use crate::service::SettingsService;
use crate::util;
use crate::version::VersionStamp;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

/// The outcome of a successful map mutation: the keys whose externally
/// visible value changed and the documents that no longer provide any value
/// or active deletion.
#[derive(Default)]
pub struct Mutation {
    pub modified_keys: BTreeSet<Key>,
    pub unreferenced: Vec<Rc<ManagedDocument>>,
}

/// Insertion failure: the document is concurrent to and overlaps an
/// already-inserted document.
#[derive(Debug)]
pub struct Collision;

/// The merged live view over all currently inserted documents.
///
/// `values` names, per key, the latest document providing a value; the
/// `deletions` map names, per prefix, the latest document whose subtree
/// deletion is in force. `documents` keeps every document still providing
/// something, in ascending version stamp order, so that removals can
/// restore previously shadowed state.
#[derive(Default)]
pub struct SettingsMap {
    documents: Vec<Rc<ManagedDocument>>,
    values: BTreeMap<Key, Rc<ManagedDocument>>,
    deletions: BTreeMap<Key, Rc<ManagedDocument>>,
}

impl SettingsMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empties the map.
    pub fn clear(&mut self) {
        self.values.clear();
        self.deletions.clear();
        self.documents.clear();
    }

    /// Returns the currently visible value for `key`. A deletion marker is
    /// not a value; prefixes carrying only deletions yield nothing.
    pub fn value(&self, key: &Key) -> Option<&[u8]> {
        self.values.get(key).and_then(|document| document.value(key))
    }

    /// Returns every key currently bound at or below `prefix`.
    pub fn keys(&self, prefix: &Key) -> BTreeSet<Key> {
        util::map_range(prefix, &self.values)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Inserts a document. Fails without touching any state if the document
    /// is concurrent to and overlaps an already-inserted document.
    pub fn insert_document(&mut self, document: Rc<ManagedDocument>) -> Result<Mutation, Collision> {
        for existing in &self.documents {
            if existing.version_stamp().is_concurrent(document.version_stamp())
                && has_overlap(existing.as_ref(), document.as_ref())
            {
                return Err(Collision);
            }
        }

        let mut mutation = Mutation::default();
        let mut root = BTreeSet::new();
        root.insert(Key::root());
        self.apply_subset(&document, &root, &mut mutation.modified_keys);

        // Documents clobbered by the insertion may have lost their last
        // value or deletion slot.
        self.collect_unreferenced(&mut mutation.unreferenced);

        if self.is_referenced(&document) {
            let position = self
                .documents
                .iter()
                .position(|existing| existing.version_stamp().is_after(document.version_stamp()))
                .unwrap_or(self.documents.len());
            self.documents.insert(position, document);
        } else {
            // The new document did not become active at all.
            mutation.unreferenced.push(document);
        }

        Ok(mutation)
    }

    /// Removes a document. Removing a document that is not present is a
    /// no-op. Keys shadowed by the removed document shine through again
    /// from earlier documents.
    pub fn remove_document(&mut self, document: &Rc<ManagedDocument>) -> Mutation {
        let mut mutation = Mutation::default();
        let position = match self
            .documents
            .iter()
            .position(|existing| Rc::ptr_eq(existing, document))
        {
            Some(position) => position,
            None => return mutation,
        };

        // Collect everything the document currently provides and drop it.
        let mut restore = BTreeSet::new();
        let value_keys: Vec<Key> = self
            .values
            .iter()
            .filter(|(_, owner)| Rc::ptr_eq(owner, document))
            .map(|(key, _)| key.clone())
            .collect();
        for key in value_keys {
            self.values.remove(&key);
            mutation.modified_keys.insert(key.clone());
            restore.insert(key);
        }
        let deletion_prefixes: Vec<Key> = self
            .deletions
            .iter()
            .filter(|(_, owner)| Rc::ptr_eq(owner, document))
            .map(|(key, _)| key.clone())
            .collect();
        for prefix in deletion_prefixes {
            self.deletions.remove(&prefix);
            restore.insert(prefix);
        }

        // Reinstall whatever now shines through at the dropped prefixes.
        // Walking the earlier documents latest-first lets the later-deletion
        // and later-assignment checks suppress state that would only be
        // clobbered again, keeping the modified key report exact.
        let earlier: Vec<Rc<ManagedDocument>> = self.documents[..position].to_vec();
        for document in earlier.iter().rev() {
            self.apply_subset(document, &restore, &mut mutation.modified_keys);
        }

        self.collect_unreferenced(&mut mutation.unreferenced);
        mutation
    }

    /// Applies the parts of `document` at or below each prefix in
    /// `prefixes`. Deletions are processed first so that value assignments
    /// in the same document survive its own deletions: a deletion at the
    /// same version stamp is not strictly later.
    fn apply_subset(
        &mut self,
        document: &Rc<ManagedDocument>,
        prefixes: &BTreeSet<Key>,
        modified_keys: &mut BTreeSet<Key>,
    ) {
        for prefix in prefixes {
            for deletion in document.deletions(prefix) {
                if !self.has_later_subtree_deletion(&deletion, document.version_stamp()) {
                    self.delete_subtree(&deletion, document.version_stamp(), modified_keys);
                    self.deletions.insert(deletion, document.clone());
                }
            }
            for key in document.keys(prefix) {
                if !self.has_later_subtree_deletion(&key, document.version_stamp())
                    && !self.has_later_value_assignment(&key, document.version_stamp())
                {
                    modified_keys.insert(key.clone());
                    self.values.insert(key, document.clone());
                }
            }
        }
    }

    /// Drops every value and deletion at or below `prefix` that is strictly
    /// before `upper_limit`.
    fn delete_subtree(
        &mut self,
        prefix: &Key,
        upper_limit: &VersionStamp,
        modified_keys: &mut BTreeSet<Key>,
    ) {
        let doomed: Vec<Key> = util::map_range(prefix, &self.deletions)
            .filter(|(_, owner)| owner.version_stamp().is_before(upper_limit))
            .map(|(key, _)| key.clone())
            .collect();
        for key in doomed {
            self.deletions.remove(&key);
        }

        let doomed: Vec<Key> = util::map_range(prefix, &self.values)
            .filter(|(_, owner)| owner.version_stamp().is_before(upper_limit))
            .map(|(key, _)| key.clone())
            .collect();
        for key in doomed {
            modified_keys.insert(key.clone());
            self.values.remove(&key);
        }
    }

    fn has_later_value_assignment(&self, key: &Key, lower_bound: &VersionStamp) -> bool {
        self.values
            .get(key)
            .map_or(false, |owner| owner.version_stamp().is_after(lower_bound))
    }

    /// Checks for a strictly later deletion at `key` or an ancestor of it.
    fn has_later_subtree_deletion(&self, key: &Key, lower_bound: &VersionStamp) -> bool {
        let mut current = key.clone();
        loop {
            if let Some(owner) = self.deletions.get(&current) {
                if owner.version_stamp().is_after(lower_bound) {
                    return true;
                }
            }
            current = current.parent();
            if current.is_root() {
                return false;
            }
        }
    }

    fn is_referenced(&self, document: &Rc<ManagedDocument>) -> bool {
        self.values
            .values()
            .chain(self.deletions.values())
            .any(|owner| Rc::ptr_eq(owner, document))
    }

    /// Moves every document without a remaining value or deletion slot out
    /// of the sorted list and into `unreferenced`.
    fn collect_unreferenced(&mut self, unreferenced: &mut Vec<Rc<ManagedDocument>>) {
        let mut index = 0;
        while index < self.documents.len() {
            if self.is_referenced(&self.documents[index]) {
                index += 1;
            } else {
                unreferenced.push(self.documents.remove(index));
            }
        }
    }
}

impl SettingsService for SettingsMap {
    fn value(&self, key: &Key) -> Option<&[u8]> {
        SettingsMap::value(self, key)
    }

    fn keys(&self, prefix: &Key) -> BTreeSet<Key> {
        SettingsMap::keys(self, prefix)
    }
}
