use crate::key::Key;
use std::collections::BTreeSet;

/// Read access to a merged settings view.
pub trait SettingsService {
    /// Returns the currently visible value for `key`.
    fn value(&self, key: &Key) -> Option<&[u8]>;

    /// Enumerates all keys with visible values at or below `prefix`.
    fn keys(&self, prefix: &Key) -> BTreeSet<Key>;
}

/// Observer for settings changes. Callbacks are invoked synchronously at
/// the end of a successful mutation and must not call back into the
/// manager.
pub trait SettingsObserver {
    /// `keys` holds every key whose visible value changed.
    fn on_settings_changed(&self, keys: &BTreeSet<Key>);
}
