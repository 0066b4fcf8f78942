use credence_store::{DocumentManager, InsertionStatus, Key, SettingsObserver};
use std::rc::Rc;
use thiserror::Error;

/// Errors surfaced by the service interface.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid key {0:?}")]
    InvalidKey(String),
    #[error("no value for key {0:?}")]
    NotFound(String),
    #[error("unknown source {0:?}")]
    UnknownSource(String),
    #[error("malformed settings blob")]
    MalformedBlob,
    #[error("settings blob failed validation")]
    ValidationFailed,
    #[error("failed to persist settings blob")]
    Storage,
    #[error("version stamp already used by this source")]
    VersionClash,
    #[error("access denied")]
    AccessDenied,
    #[error("conflicts with concurrently submitted settings")]
    Collision,
}

/// The string-keyed service surface over a document manager: read a value,
/// enumerate keys, submit a settings blob on behalf of a source.
pub struct Frontend {
    manager: DocumentManager,
}

impl Frontend {
    pub fn new(manager: DocumentManager) -> Self {
        Self { manager }
    }

    /// Returns the value stored at `key`.
    pub fn get(&self, key: &str) -> Result<Vec<u8>, Error> {
        let key = parse_key(key)?;
        self.manager
            .value(&key)
            .map(|value| value.to_vec())
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    /// Enumerates all keys with values at or below `prefix`.
    pub fn enumerate(&self, prefix: &str) -> Result<Vec<String>, Error> {
        let prefix = parse_key(prefix)?;
        Ok(self
            .manager
            .keys(&prefix)
            .iter()
            .map(Key::to_string)
            .collect())
    }

    /// Submits a settings blob for `source_id`. Either the blob fully takes
    /// effect or nothing happens and the reason is returned.
    pub fn update(&mut self, source_id: &str, blob: &[u8]) -> Result<(), Error> {
        match self.manager.insert_blob(source_id, blob) {
            InsertionStatus::Success => Ok(()),
            InsertionStatus::UnknownSource => Err(Error::UnknownSource(source_id.to_string())),
            InsertionStatus::ParseError | InsertionStatus::BadPayload => Err(Error::MalformedBlob),
            InsertionStatus::ValidationError => Err(Error::ValidationFailed),
            InsertionStatus::StorageFailure => Err(Error::Storage),
            InsertionStatus::VersionClash => Err(Error::VersionClash),
            InsertionStatus::AccessViolation => Err(Error::AccessDenied),
            InsertionStatus::Collision => Err(Error::Collision),
        }
    }

    pub fn add_observer(&mut self, observer: &Rc<dyn SettingsObserver>) {
        self.manager.add_observer(observer);
    }

    pub fn remove_observer(&mut self, observer: &Rc<dyn SettingsObserver>) {
        self.manager.remove_observer(observer);
    }
}

fn parse_key(key: &str) -> Result<Key, Error> {
    Key::parse(key).map_err(|_| Error::InvalidKey(key.to_string()))
}
