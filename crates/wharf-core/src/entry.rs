//! Directory entry records.
//!
//! A listing or stat returns open records mapping a small field id to either
//! a string or a 64-bit number, so backends can ship whatever metadata they
//! have without the engine caring. Convenience predicates (`is_dir`,
//! `is_link`) are derived from the fields, never stored.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::ResourceUrl;

/// Type bits for the [`EntryField::FileType`] field (Unix `S_IFMT` values).
pub const FILE_TYPE_FILE: i64 = 0o100000;
pub const FILE_TYPE_DIR: i64 = 0o040000;
pub const FILE_TYPE_SYMLINK: i64 = 0o120000;

/// Well-known entry field ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum EntryField {
    Name,
    Url,
    LocalPath,
    Size,
    AccessTime,
    ModificationTime,
    CreationTime,
    Permissions,
    FileType,
    LinkTarget,
    Hidden,
    Owner,
    Group,
}

impl From<EntryField> for u8 {
    fn from(f: EntryField) -> u8 {
        f as u8
    }
}

impl TryFrom<u8> for EntryField {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        use EntryField::*;
        const ALL: [EntryField; 13] = [
            Name, Url, LocalPath, Size, AccessTime, ModificationTime, CreationTime, Permissions,
            FileType, LinkTarget, Hidden, Owner, Group,
        ];
        ALL.get(v as usize)
            .copied()
            .ok_or_else(|| format!("unknown entry field id {v}"))
    }
}

/// Value of an entry field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryValue {
    Text(String),
    Number(i64),
}

impl EntryValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Number(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }
}

/// One file or directory as reported by a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord {
    fields: IndexMap<EntryField, EntryValue>,
}

impl EntryRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// A plain file entry.
    pub fn file(name: impl Into<String>, size: i64) -> Self {
        let mut rec = Self::new();
        rec.set_text(EntryField::Name, name);
        rec.set_number(EntryField::Size, size);
        rec.set_number(EntryField::FileType, FILE_TYPE_FILE);
        rec
    }

    /// A directory entry.
    pub fn directory(name: impl Into<String>) -> Self {
        let mut rec = Self::new();
        rec.set_text(EntryField::Name, name);
        rec.set_number(EntryField::FileType, FILE_TYPE_DIR);
        rec
    }

    /// A symlink entry pointing at `target`.
    pub fn symlink(name: impl Into<String>, target: impl Into<String>) -> Self {
        let mut rec = Self::new();
        rec.set_text(EntryField::Name, name);
        rec.set_number(EntryField::FileType, FILE_TYPE_SYMLINK);
        rec.set_text(EntryField::LinkTarget, target);
        rec
    }

    pub fn set_text(&mut self, field: EntryField, value: impl Into<String>) -> &mut Self {
        self.fields.insert(field, EntryValue::Text(value.into()));
        self
    }

    pub fn set_number(&mut self, field: EntryField, value: i64) -> &mut Self {
        self.fields.insert(field, EntryValue::Number(value));
        self
    }

    pub fn text(&self, field: EntryField) -> Option<&str> {
        self.fields.get(&field).and_then(EntryValue::as_text)
    }

    pub fn number(&self, field: EntryField) -> Option<i64> {
        self.fields.get(&field).and_then(EntryValue::as_number)
    }

    pub fn name(&self) -> &str {
        self.text(EntryField::Name).unwrap_or("")
    }

    /// Rewrite the name, used when recursive listings re-emit child entries
    /// under a path prefix.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.set_text(EntryField::Name, name);
    }

    pub fn size(&self) -> i64 {
        self.number(EntryField::Size).unwrap_or(0)
    }

    pub fn permissions(&self) -> Option<i64> {
        self.number(EntryField::Permissions)
    }

    pub fn mtime(&self) -> Option<i64> {
        self.number(EntryField::ModificationTime)
    }

    pub fn ctime(&self) -> Option<i64> {
        self.number(EntryField::CreationTime)
    }

    pub fn link_target(&self) -> Option<&str> {
        self.text(EntryField::LinkTarget).filter(|t| !t.is_empty())
    }

    /// URL override supplied by the backend, if any.
    pub fn url(&self) -> Option<ResourceUrl> {
        self.text(EntryField::Url)
            .and_then(|u| ResourceUrl::parse(u).ok())
    }

    pub fn local_path(&self) -> Option<&str> {
        self.text(EntryField::LocalPath)
    }

    /// Derived: the type bits indicate a directory.
    pub fn is_dir(&self) -> bool {
        self.number(EntryField::FileType)
            .is_some_and(|t| t & 0o170000 == FILE_TYPE_DIR)
    }

    /// Derived: a non-empty link target is present.
    pub fn is_link(&self) -> bool {
        self.link_target().is_some()
    }

    pub fn is_hidden(&self) -> bool {
        self.number(EntryField::Hidden).is_some_and(|h| h != 0) || self.name().starts_with('.')
    }

    /// True for the `.` / `..` bookkeeping entries.
    pub fn is_dot_entry(&self) -> bool {
        matches!(self.name(), "." | "..")
    }

    pub fn fields(&self) -> impl Iterator<Item = (&EntryField, &EntryValue)> {
        self.fields.iter()
    }
}
