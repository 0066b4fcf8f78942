use crate::delegate::{RejectingDelegate, SourceDelegate, SourceDelegateFactory};
use crate::document::SettingsDocument;
use crate::key::Key;
use crate::keys;
use crate::service::SettingsService;
use crate::util;
use std::collections::BTreeMap;

/// Setting status values, in most permissive to least permissive order.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum SettingStatus {
    /// Settings from the source are valid and updates are accepted.
    Active,
    /// Settings already present in the system remain valid, but no new
    /// settings are accepted.
    Withdrawn,
    /// All settings are considered invalid.
    Invalid,
}

impl SettingStatus {
    /// Decodes a status string. Anything unrecognised is `Invalid`.
    pub fn parse(status: &str) -> Self {
        match status {
            "active" => Self::Active,
            "withdrawn" => Self::Withdrawn,
            _ => Self::Invalid,
        }
    }

    /// The string identifier for this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Withdrawn => "withdrawn",
            Self::Invalid => "invalid",
        }
    }
}

/// The key all configuration for `source_id` resides under.
pub fn make_source_key(source_id: &str) -> Key {
    // Nested source ids are not supported; the id is a single flat segment.
    keys::sources_prefix().extend([source_id])
}

/// The trust configuration for one source as currently derivable from the
/// merged settings, and the access decisions that follow from it.
pub struct Source {
    id: String,
    name: String,
    status: SettingStatus,
    delegate: Box<dyn SourceDelegate>,
    /// Maps key prefixes to the status within which this source may provide
    /// matching keys. The longest matching prefix wins; no match denies.
    access: BTreeMap<Key, SettingStatus>,
    blob_formats: Vec<String>,
}

impl Source {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            status: SettingStatus::Invalid,
            delegate: Box::new(RejectingDelegate),
            access: BTreeMap::new(),
            blob_formats: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> SettingStatus {
        self.status
    }

    pub fn delegate(&self) -> &dyn SourceDelegate {
        self.delegate.as_ref()
    }

    /// The blob formats to try when parsing blobs for this source, in
    /// order.
    pub fn blob_formats(&self) -> &[String] {
        &self.blob_formats
    }

    /// Rebuilds the source from the settings view. Returns false if the
    /// view holds no configuration for this source at all.
    pub fn update(&mut self, factory: &SourceDelegateFactory, settings: &dyn SettingsService) -> bool {
        let source_key = make_source_key(&self.id);
        let has_config = !settings.keys(&source_key).is_empty();

        self.name = settings
            .value(&source_key.extend([keys::sources::NAME]))
            .map(|value| String::from_utf8_lossy(value).into_owned())
            .unwrap_or_default();

        self.status = settings
            .value(&source_key.extend([keys::sources::STATUS]))
            .map(|value| SettingStatus::parse(&String::from_utf8_lossy(value)))
            .unwrap_or(SettingStatus::Invalid);

        self.delegate = factory
            .create(&self.id, settings)
            .unwrap_or_else(|| Box::new(RejectingDelegate));

        self.access.clear();
        let access_prefix = source_key.extend([keys::sources::ACCESS]);
        for access_key in settings.keys(&access_prefix) {
            let status = settings
                .value(&access_key)
                .map(|value| SettingStatus::parse(&String::from_utf8_lossy(value)))
                .unwrap_or(SettingStatus::Invalid);
            match access_key.suffix(&access_prefix) {
                Some(rule_key) => {
                    self.access.insert(rule_key, status);
                }
                None => unreachable!("access key {} outside {}", access_key, access_prefix),
            }
        }

        self.blob_formats = settings
            .value(&source_key.extend([keys::sources::BLOB_FORMAT]))
            .map(|value| {
                String::from_utf8_lossy(value)
                    .split(',')
                    .map(str::trim)
                    .filter(|format| !format.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        has_config
    }

    /// Checks whether this source may make every value assignment and
    /// subtree deletion in `document`, requiring the relevant access rules
    /// to be at least as permissive as `threshold`.
    pub fn check_access(&self, document: &dyn SettingsDocument, threshold: SettingStatus) -> bool {
        if self.status > threshold {
            return false;
        }

        let trust_config_begin = keys::sources_prefix();
        let trust_config_end = make_source_key(&self.id).prefix_upper_bound();
        let root = Key::root();

        for key in document.keys(&root) {
            // Writes into the trust configuration of this source itself or
            // any higher-precedence source are denied outright.
            if trust_config_begin <= key && key < trust_config_end {
                return false;
            }
            if !self.rule_within(&key, threshold) {
                return false;
            }
        }

        for deletion in document.deletions(&root) {
            // A deletion reaching into the off-bounds trust section, or one
            // whose prefix contains it, would wipe the rules granting
            // access.
            if (trust_config_begin <= deletion && deletion < trust_config_end)
                || deletion.is_prefix_of(&trust_config_begin)
            {
                return false;
            }
            if !self.rule_within(&deletion, threshold) {
                return false;
            }
            // Every rule inside the deleted subtree must be within the
            // threshold as well, or the deletion would silently wipe keys
            // the source never had permission for.
            if util::map_range(&deletion, &self.access).any(|(_, status)| *status > threshold) {
                return false;
            }
        }

        true
    }

    fn rule_within(&self, key: &Key, threshold: SettingStatus) -> bool {
        self.find_matching_access_rule(key)
            .map_or(false, |status| status <= threshold)
    }

    /// Finds the most specific access rule whose prefix matches `key`.
    fn find_matching_access_rule(&self, key: &Key) -> Option<SettingStatus> {
        let mut lookup = key.clone();
        loop {
            let (rule_key, status) = self.access.range(..=lookup.clone()).next_back()?;
            if rule_key.is_prefix_of(key) {
                return Some(*status);
            }
            // The largest rule at or below the lookup is not an ancestor;
            // retry from the point where the two diverge.
            lookup = lookup.common_prefix(rule_key);
        }
    }
}
