use crate::container::{LockedSettingsContainer, LockedVersionComponent};
use crate::keys;
use crate::service::SettingsService;
use crate::source::make_source_key;
use std::cell::RefCell;
use std::collections::HashMap;

/// Source-type-specific validation of settings blobs.
pub trait SourceDelegate {
    /// Container-level integrity check for a blob claimed to originate from
    /// this source.
    fn validate_container(&self, container: &dyn LockedSettingsContainer) -> bool;

    /// Checks one protected version stamp slice, identified by its own
    /// source id, against this source's rules.
    fn validate_version_component(&self, component: &dyn LockedVersionComponent) -> bool;
}

/// The fallback delegate: rejects everything.
pub struct RejectingDelegate;

impl SourceDelegate for RejectingDelegate {
    fn validate_container(&self, _container: &dyn LockedSettingsContainer) -> bool {
        false
    }

    fn validate_version_component(&self, _component: &dyn LockedVersionComponent) -> bool {
        false
    }
}

/// A function building the delegate for one source, given the source id and
/// the current settings view.
pub type DelegateFactoryFn =
    Box<dyn Fn(&str, &dyn SettingsService) -> Option<Box<dyn SourceDelegate>>>;

/// Creates source delegates keyed by the `type` string in the source
/// configuration.
#[derive(Default)]
pub struct SourceDelegateFactory {
    functions: RefCell<HashMap<String, DelegateFactoryFn>>,
}

impl SourceDelegateFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `function` for the source type `source_type`.
    pub fn register(&self, source_type: &str, function: DelegateFactoryFn) {
        self.functions
            .borrow_mut()
            .insert(source_type.to_string(), function);
    }

    /// Builds the delegate for `source_id` from its configured type. An
    /// unknown type yields the rejecting default, an absent type yields
    /// `None`.
    pub fn create(
        &self,
        source_id: &str,
        settings: &dyn SettingsService,
    ) -> Option<Box<dyn SourceDelegate>> {
        let type_key = make_source_key(source_id).extend([keys::sources::TYPE]);
        let source_type = settings.value(&type_key)?;
        let source_type = String::from_utf8_lossy(source_type).into_owned();
        match self.functions.borrow().get(&source_type) {
            Some(function) => function(source_id, settings),
            None => Some(Box::new(RejectingDelegate)),
        }
    }
}
