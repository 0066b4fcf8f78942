use crate::container::LockedSettingsContainer;
use std::cell::RefCell;
use std::collections::HashMap;

/// The format tag every deployment registers a parser for.
pub const DEFAULT_FORMAT: &str = "";

/// A function turning raw blob bytes into an unvalidated container.
pub type BlobParserFn = Box<dyn Fn(&str, &[u8]) -> Option<Box<dyn LockedSettingsContainer>>>;

/// Maps blob format tags to parser functions.
#[derive(Default)]
pub struct SettingsBlobParserRegistry {
    parsers: RefCell<HashMap<String, BlobParserFn>>,
}

impl SettingsBlobParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `parser` for `format`, replacing any previous parser.
    pub fn register(&self, format: &str, parser: BlobParserFn) {
        self.parsers.borrow_mut().insert(format.to_string(), parser);
    }

    /// Parses `blob` according to `format`. Unknown formats yield nothing.
    pub fn parse(&self, format: &str, blob: &[u8]) -> Option<Box<dyn LockedSettingsContainer>> {
        self.parsers
            .borrow()
            .get(format)
            .and_then(|parser| parser(format, blob))
    }
}
