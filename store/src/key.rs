use anyhow::{anyhow, Result};
use std::str::FromStr;

/// A hierarchical settings identifier: dot-separated components drawn from
/// `[A-Za-z0-9_]`. The empty string is the root key. Because `.` sorts below
/// every component byte, the keys of a subtree form one contiguous range in
/// byte-wise lexicographic order.
#[derive(Clone, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Key(String);

impl Key {
    /// Returns the root key.
    pub fn root() -> Self {
        Self::default()
    }

    /// Checks whether `s` is a valid key string. The root key is valid.
    pub fn is_valid(s: &str) -> bool {
        s.is_empty()
            || s.split('.').all(|component| {
                !component.is_empty()
                    && component
                        .bytes()
                        .all(|b| b.is_ascii_alphanumeric() || b == b'_')
            })
    }

    /// Parses a key from its string representation.
    pub fn parse(s: &str) -> Result<Self> {
        if !Self::is_valid(s) {
            return Err(anyhow!("invalid key {:?}", s));
        }
        Ok(Self(s.to_string()))
    }

    /// Returns the string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this is the root key.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the parent key. The parent of the root key is the root key.
    pub fn parent(&self) -> Key {
        match self.0.rfind('.') {
            Some(position) => Key(self.0[..position].to_string()),
            None => Key::root(),
        }
    }

    /// Appends another key as a suffix.
    pub fn append(&self, other: &Key) -> Key {
        if self.is_root() {
            other.clone()
        } else if other.is_root() {
            self.clone()
        } else {
            Key(format!("{}.{}", self.0, other.0))
        }
    }

    /// Extends the key with the given components.
    pub fn extend<'a>(&self, components: impl IntoIterator<Item = &'a str>) -> Key {
        let mut key = self.0.clone();
        for component in components {
            debug_assert!(Key::is_valid(component) && !component.is_empty());
            if !key.is_empty() {
                key.push('.');
            }
            key.push_str(component);
        }
        Key(key)
    }

    /// Splits off the leading component, returning it together with the
    /// remaining suffix. Both are the root key for the root key.
    pub fn split_first(&self) -> (Key, Key) {
        match self.0.find('.') {
            Some(position) => (
                Key(self.0[..position].to_string()),
                Key(self.0[position + 1..].to_string()),
            ),
            None => (self.clone(), Key::root()),
        }
    }

    /// Returns the longest common prefix of `self` and `other`.
    pub fn common_prefix(&self, other: &Key) -> Key {
        let mut prefix = String::new();
        for (a, b) in self.components().zip(other.components()) {
            if a != b {
                break;
            }
            if !prefix.is_empty() {
                prefix.push('.');
            }
            prefix.push_str(a);
        }
        Key(prefix)
    }

    /// Returns the suffix of `self` after `prefix`, or `None` if `prefix` is
    /// not a prefix of `self`.
    pub fn suffix(&self, prefix: &Key) -> Option<Key> {
        if !prefix.is_prefix_of(self) {
            return None;
        }
        if prefix.is_root() {
            Some(self.clone())
        } else if self == prefix {
            Some(Key::root())
        } else {
            Some(Key(self.0[prefix.0.len() + 1..].to_string()))
        }
    }

    /// Checks whether this key is a prefix of `other`. True for equal keys.
    pub fn is_prefix_of(&self, other: &Key) -> bool {
        self.is_root()
            || other.0 == self.0
            || (other.0.len() > self.0.len()
                && other.0.as_bytes()[self.0.len()] == b'.'
                && other.0.starts_with(&self.0))
    }

    /// The smallest key sorting after every key that has this key as a
    /// prefix, used as the exclusive upper bound of a subtree range. Must
    /// not be called on the root key.
    pub fn prefix_upper_bound(&self) -> Key {
        debug_assert!(!self.is_root());
        // '/' is the byte right after '.', and '.' sorts below every
        // component byte.
        let mut bound = self.0.clone();
        bound.push('/');
        Key(bound)
    }

    /// Iterates the components of this key.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('.').filter(|component| !component.is_empty())
    }
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Key({:?})", self.0)
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Key {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Key::parse(s)
    }
}
