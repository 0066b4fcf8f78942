use crate::document::SettingsDocument;
use std::any::Any;

/// One protected slice of a blob's version stamp, identified by the source
/// it belongs to. Wrapping the slice keeps delegate validation independent
/// of the binary encoding.
pub trait LockedVersionComponent {
    /// The source id this component belongs to.
    fn source_id(&self) -> &str;

    /// Concrete-type access for delegate implementations.
    fn as_any(&self) -> &dyn Any;
}

/// A parsed but not yet validated wrapper around a settings document
/// payload plus any embedded per-source version stamp signatures. The
/// validation logic itself is source specific and lives in the
/// corresponding `SourceDelegate`.
pub trait LockedSettingsContainer {
    /// The protected data payload; empty if unavailable.
    fn data(&self) -> &[u8] {
        &[]
    }

    /// The protected version stamp components for delegate validation. A
    /// container without components yields a document without a version
    /// stamp, which only passes insertion if the keys it touches are not
    /// present yet.
    fn version_components(&self) -> Vec<&dyn LockedVersionComponent> {
        Vec::new()
    }

    /// Extracts the enclosed settings document, consuming the container.
    fn decode_payload(self: Box<Self>) -> Option<Box<dyn SettingsDocument>>;

    /// Concrete-type access for delegate implementations.
    fn as_any(&self) -> &dyn Any;
}
