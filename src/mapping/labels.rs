// Label maps: per-map label tables and deterministic key remapping.
use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::error::{Error, ErrorKind};

/// Name of the reserved "unassigned" label in every table.
pub const UNASSIGNED_NAME: &str = "???";

#[derive(Clone, Debug, PartialEq)]
pub struct Label {
    pub name: String,
    pub rgba: [f32; 4],
}

impl Label {
    pub fn new(name: impl Into<String>, rgba: [f32; 4]) -> Self {
        Self {
            name: name.into(),
            rgba,
        }
    }

    pub fn unassigned() -> Self {
        Self::new(UNASSIGNED_NAME, [0.0, 0.0, 0.0, 0.0])
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LabelTable {
    labels: BTreeMap<i32, Label>,
}

impl LabelTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unassigned() -> Self {
        let mut table = Self::new();
        table.ensure_unassigned();
        table
    }

    pub fn insert(&mut self, key: i32, label: Label) -> Result<(), Error> {
        if self.labels.contains_key(&key) {
            return Err(Error::new(ErrorKind::Format)
                .with_message("label key is used twice in one table")
                .with_key(key as i64));
        }
        if label.name == UNASSIGNED_NAME && self.unassigned_key().is_some() {
            return Err(Error::new(ErrorKind::Format)
                .with_message("label table has more than one unassigned label")
                .with_key(key as i64));
        }
        self.labels.insert(key, label);
        Ok(())
    }

    pub fn get(&self, key: i32) -> Option<&Label> {
        self.labels.get(&key)
    }

    pub fn contains_key(&self, key: i32) -> bool {
        self.labels.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = i32> + '_ {
        self.labels.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, &Label)> + '_ {
        self.labels.iter().map(|(key, label)| (*key, label))
    }

    pub fn unassigned_key(&self) -> Option<i32> {
        self.labels
            .iter()
            .find(|(_, label)| label.name == UNASSIGNED_NAME)
            .map(|(key, _)| *key)
    }

    /// Returns the unassigned key, adding the label at 0 (or the first free key) if absent.
    pub fn ensure_unassigned(&mut self) -> i32 {
        if let Some(key) = self.unassigned_key() {
            return key;
        }
        let key = if self.labels.contains_key(&0) {
            self.smallest_unused_key(|_| false)
        } else {
            0
        };
        self.labels.insert(key, Label::unassigned());
        key
    }

    fn smallest_unused_key(&self, taken: impl Fn(i32) -> bool) -> i32 {
        let mut candidate = 1;
        while self.labels.contains_key(&candidate) || taken(candidate) {
            candidate += 1;
        }
        candidate
    }

    /// Applies `remap`, moving each label object to its new key.
    ///
    /// Keys that are not remapped keep their value unless a remap target now
    /// occupies it; those receive the smallest positive key unused by both the
    /// old and the new table. The unassigned label keeps its identity even when
    /// its key changes.
    pub fn remap_keys(&mut self, remap: &KeyRemap) -> Result<RemapOutcome, Error> {
        for (old, _) in remap.pairs() {
            if !self.labels.contains_key(&old) {
                return Err(Error::new(ErrorKind::DuplicateOrMissingInput)
                    .with_message("remap source key does not exist in the label table")
                    .with_key(old as i64));
            }
        }
        let unassigned_before = self.unassigned_key();

        let mut next: BTreeMap<i32, Label> = BTreeMap::new();
        let mut key_map = BTreeMap::new();
        for (old, new) in remap.pairs() {
            if let Some(label) = self.labels.get(&old) {
                next.insert(new, label.clone());
                key_map.insert(old, new);
            }
        }

        let mut displaced = Vec::new();
        for (key, label) in &self.labels {
            if key_map.contains_key(key) {
                continue;
            }
            if next.contains_key(key) {
                displaced.push(*key);
                continue;
            }
            next.insert(*key, label.clone());
            key_map.insert(*key, *key);
        }

        let mut synthesized = Vec::with_capacity(displaced.len());
        for key in displaced {
            let fresh = self.smallest_unused_key(|candidate| next.contains_key(&candidate));
            if let Some(label) = self.labels.get(&key) {
                next.insert(fresh, label.clone());
            }
            key_map.insert(key, fresh);
            synthesized.push((key, fresh));
            tracing::warn!(
                old_key = key,
                new_key = fresh,
                "label key collided with a remap target; assigned a fresh key"
            );
        }

        let unassigned = unassigned_before.and_then(|key| key_map.get(&key).map(|new| (key, *new)));
        self.labels = next;
        Ok(RemapOutcome {
            key_map,
            synthesized,
            unassigned,
        })
    }
}

/// A validated set of `old -> new` label key requests.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyRemap {
    pairs: BTreeMap<i32, i32>,
}

impl KeyRemap {
    pub fn new(pairs: impl IntoIterator<Item = (i32, i32)>) -> Result<Self, Error> {
        let mut map = BTreeMap::new();
        let mut targets = BTreeMap::new();
        for (old, new) in pairs {
            if map.insert(old, new).is_some() {
                return Err(Error::new(ErrorKind::DuplicateOrMissingInput)
                    .with_message("label key is remapped more than once")
                    .with_key(old as i64));
            }
            if let Some(first) = targets.insert(new, old) {
                return Err(Error::new(ErrorKind::DuplicateOrMissingInput)
                    .with_message(format!(
                        "keys {first} and {old} are both remapped to the same key"
                    ))
                    .with_key(new as i64));
            }
        }
        Ok(Self { pairs: map })
    }

    /// Parses one `old new` pair per line; blank lines and `#` comments are skipped.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let mut pairs = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            let content = line.split('#').next().unwrap_or_default().trim();
            if content.is_empty() {
                continue;
            }
            let fields: Vec<&str> = content.split_whitespace().collect();
            let parsed = match fields.as_slice() {
                [old, new] => old.parse::<i32>().ok().zip(new.parse::<i32>().ok()),
                _ => None,
            };
            let Some(pair) = parsed else {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message(format!(
                        "line {}: expected two integer keys, found '{content}'",
                        line_no + 1
                    ))
                    .with_hint("Each line should read `<old key> <new key>`."));
            };
            pairs.push(pair);
        }
        Self::new(pairs)
    }

    pub fn pairs(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        self.pairs.iter().map(|(old, new)| (*old, *new))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RemapOutcome {
    /// Final key for every key of the original table.
    pub key_map: BTreeMap<i32, i32>,
    /// `(original, fresh)` keys assigned to resolve collisions.
    pub synthesized: Vec<(i32, i32)>,
    pub unassigned: Option<(i32, i32)>,
}

impl RemapOutcome {
    pub fn apply(&self, key: i32) -> Option<i32> {
        self.key_map.get(&key).copied()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NamedLabelMap {
    pub name: String,
    pub metadata: BTreeMap<String, String>,
    pub table: LabelTable,
}

impl NamedLabelMap {
    pub fn new(name: impl Into<String>, table: LabelTable) -> Self {
        Self {
            name: name.into(),
            metadata: BTreeMap::new(),
            table,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LabelsMap {
    maps: Vec<NamedLabelMap>,
}

impl LabelsMap {
    pub fn new(maps: Vec<NamedLabelMap>) -> Self {
        Self { maps }
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn maps(&self) -> &[NamedLabelMap] {
        &self.maps
    }

    pub fn map(&self, index: usize) -> Option<&NamedLabelMap> {
        self.maps.get(index)
    }

    pub fn map_mut(&mut self, index: usize) -> Option<&mut NamedLabelMap> {
        self.maps.get_mut(index)
    }

    pub fn push(&mut self, map: NamedLabelMap) {
        self.maps.push(map);
    }
}
