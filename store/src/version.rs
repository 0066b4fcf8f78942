//! A vector clock keyed by source id.
use std::collections::BTreeMap;

/// A sparse vector clock. Components are keyed by source id; absent entries
/// count as zero, explicit entries are strictly positive.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VersionStamp {
    clocks: BTreeMap<String, u64>,
}

impl VersionStamp {
    /// Returns the empty stamp.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the clock component for `source_id`. `value` must be positive.
    pub fn set(&mut self, source_id: &str, value: u64) {
        assert!(value > 0, "clock components are strictly positive");
        self.clocks.insert(source_id.to_string(), value);
    }

    /// Returns the clock component for `source_id`, zero if absent.
    pub fn get(&self, source_id: &str) -> u64 {
        self.clocks.get(source_id).copied().unwrap_or_default()
    }

    /// True if the stamp has no explicit components.
    pub fn is_empty(&self) -> bool {
        self.clocks.is_empty()
    }

    /// Iterates the explicit components in source id order.
    pub fn components(&self) -> impl Iterator<Item = (&str, u64)> {
        self.clocks.iter().map(|(id, value)| (id.as_str(), *value))
    }

    /// True if `self` happened strictly before `rhs`: no component of `self`
    /// exceeds the corresponding one in `rhs`, and at least one is smaller.
    pub fn is_before(&self, rhs: &VersionStamp) -> bool {
        let mut strictly_less = false;
        for (id, value) in &self.clocks {
            let other = rhs.get(id);
            if *value > other {
                return false;
            }
            if *value < other {
                strictly_less = true;
            }
        }
        // A component only present on the right also makes the left earlier.
        strictly_less || rhs.clocks.keys().any(|id| !self.clocks.contains_key(id))
    }

    /// True if `self` happened strictly after `rhs`.
    pub fn is_after(&self, rhs: &VersionStamp) -> bool {
        rhs.is_before(self)
    }

    /// True if there is no causal relationship between `self` and `rhs`.
    /// Equal stamps are concurrent.
    pub fn is_concurrent(&self, rhs: &VersionStamp) -> bool {
        !self.is_before(rhs) && !rhs.is_before(self)
    }
}
