//! Attributes are the facts that make up a world-state: a key, an optional
//! value (`key=value`) and a polarity (required vs forbidden).
//!
//! Set membership uses *key equivalence*: `k`, `k=a` and `k=b` all belong to
//! one equivalence class, so at most one polarity/value pair per key exists
//! in an [`AttributeSet`] and a forbid of the whole key supersedes any valued
//! entry (and vice-versa).

use crate::parsing::ParseError;
use itertools::Itertools;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A single fact with a key, an optional value and a polarity flag.
///
/// Textual forms: `k`, `k=v`, `!k`, `!k=v`. The string form round-trips
/// through [`FromStr`]/[`fmt::Display`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Attribute {
    key: String,
    value: Option<String>,
    forbidden: bool,
}

impl Attribute {
    /// A required attribute parsed from `k` or `k=v` text (no `!` handling).
    pub fn required(text: &str) -> Attribute {
        Attribute::split(text, false)
    }

    /// A forbidden attribute parsed from `k` or `k=v` text.
    pub fn forbidden(text: &str) -> Attribute {
        Attribute::split(text, true)
    }

    pub fn valued(key: &str, value: &str, forbidden: bool) -> Attribute {
        Attribute {
            key: key.to_string(),
            value: Some(value.to_string()),
            forbidden,
        }
    }

    fn split(text: &str, forbidden: bool) -> Attribute {
        match text.split_once('=') {
            Some((key, value)) => Attribute {
                key: key.trim().to_string(),
                value: Some(value.trim().to_string()),
                forbidden,
            },
            None => Attribute {
                key: text.trim().to_string(),
                value: None,
                forbidden,
            },
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    pub fn is_forbidden(&self) -> bool {
        self.forbidden
    }

    /// The same fact with the forbidden polarity.
    pub fn negated(&self) -> Attribute {
        Attribute {
            key: self.key.clone(),
            value: self.value.clone(),
            forbidden: true,
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.forbidden {
            write!(f, "!")?;
        }
        write!(f, "{}", self.key)?;
        if let Some(value) = &self.value {
            write!(f, "={value}")?;
        }
        Ok(())
    }
}

impl FromStr for Attribute {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let (text, forbidden) = match text.strip_prefix('!') {
            Some(rest) => (rest, true),
            None => (text, false),
        };
        let attr = Attribute::split(text, forbidden);
        if attr.key.is_empty() {
            return Err(ParseError::EmptyAttribute { text: s.to_string() });
        }
        Ok(attr)
    }
}

/// Value and polarity of one equivalence class.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Entry {
    value: Option<String>,
    forbidden: bool,
}

impl Entry {
    fn to_attribute(&self, key: &str) -> Attribute {
        Attribute {
            key: key.to_string(),
            value: self.value.clone(),
            forbidden: self.forbidden,
        }
    }
}

/// An ordered collection of attributes, at most one per key.
///
/// Inserting an attribute whose key is already present *replaces* the
/// existing entry, whatever its value or polarity. Iteration order is
/// lexicographic by key. The printed form is `a,!b,c=1`.
///
/// A forbidden attribute held in a *state* is semantically equivalent to
/// absence (it only exists transiently while resolving changes); a forbidden
/// attribute in *dependencies* means the exact fact must not appear.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttributeSet {
    entries: BTreeMap<String, Entry>,
}

impl AttributeSet {
    pub fn new() -> AttributeSet {
        AttributeSet::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Attributes in key order.
    pub fn iter(&self) -> impl Iterator<Item = Attribute> + '_ {
        self.entries.iter().map(|(key, entry)| entry.to_attribute(key))
    }

    /// Upsert a required attribute parsed from `k` or `k=v` text.
    pub fn require(&mut self, text: &str) {
        self.insert(Attribute::required(text));
    }

    /// Upsert a forbidden attribute parsed from `k` or `k=v` text.
    pub fn forbid(&mut self, text: &str) {
        self.insert(Attribute::forbidden(text));
    }

    /// Upsert by key equivalence: any same-key entry is replaced.
    pub fn insert(&mut self, attr: Attribute) {
        self.entries.insert(
            attr.key,
            Entry {
                value: attr.value,
                forbidden: attr.forbidden,
            },
        );
    }

    /// Remove the whole equivalence class of `text` (`k` or `k=v`).
    pub fn erase(&mut self, text: &str) -> bool {
        let key = text.split_once('=').map(|(k, _)| k).unwrap_or(text);
        self.entries.remove(key.trim()).is_some()
    }

    /// `true` iff every required attribute in `needle` has an exact
    /// (key, value) match in `self` that is not forbidden, and every
    /// forbidden attribute in `needle` is absent or also forbidden.
    ///
    /// A same-key entry with a different value counts as absent.
    pub fn contains_all(&self, needle: &AttributeSet) -> bool {
        needle.entries.iter().all(|(key, want)| match self.entries.get(key) {
            Some(have) if have.value == want.value => have.forbidden == want.forbidden,
            _ => want.forbidden,
        })
    }

    /// `true` iff some attribute in `needle` has an exact (key, value) match
    /// in `self` with the same polarity.
    ///
    /// A polarity mismatch on an exact value match vetoes the whole query:
    /// candidate filtering relies on a step that *removes* a wanted fact not
    /// counting as producing it.
    pub fn contains_any(&self, needle: &AttributeSet) -> bool {
        let mut found = false;
        for (key, want) in &needle.entries {
            if let Some(have) = self.entries.get(key) {
                if have.value == want.value {
                    if have.forbidden != want.forbidden {
                        return false;
                    }
                    found = true;
                }
            }
        }
        found
    }

    /// Merge a change-set: forbidden attributes erase their equivalence
    /// class, required attributes upsert.
    pub fn apply_changes(&mut self, changes: &AttributeSet) {
        for (key, change) in &changes.entries {
            if change.forbidden {
                self.entries.remove(key);
            } else {
                self.entries.insert(key.clone(), change.clone());
            }
        }
    }

    /// What must change in `self` to satisfy `target`.
    ///
    /// Returns `(required, discard)`: attributes that must be added, and
    /// forbidden markers for entries that must go away first. A same-key
    /// entry with the wrong value yields both a discard of the old value and
    /// a requirement for the new one.
    pub fn differences(&self, target: &AttributeSet) -> (AttributeSet, AttributeSet) {
        let mut required = AttributeSet::new();
        let mut discard = AttributeSet::new();
        for (key, want) in &target.entries {
            match self.entries.get(key) {
                None => {
                    if !want.forbidden {
                        required.insert(want.to_attribute(key));
                    }
                }
                Some(have) if have.value != want.value => {
                    if !want.forbidden {
                        if !have.forbidden {
                            discard.insert(have.to_attribute(key).negated());
                            required.insert(want.to_attribute(key));
                        }
                    } else if want.value.is_none() {
                        discard.insert(have.to_attribute(key).negated());
                    }
                }
                Some(_) => {
                    if want.forbidden {
                        discard.insert(want.to_attribute(key));
                    }
                }
            }
        }
        (required, discard)
    }
}

impl fmt::Display for AttributeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.iter().format(","))
    }
}

impl FromStr for AttributeSet {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = AttributeSet::new();
        for attr in crate::parsing::parse_attribute_list(s)? {
            set.insert(attr);
        }
        Ok(set)
    }
}

impl FromIterator<Attribute> for AttributeSet {
    fn from_iter<T: IntoIterator<Item = Attribute>>(iter: T) -> Self {
        let mut set = AttributeSet::new();
        for attr in iter {
            set.insert(attr);
        }
        set
    }
}
