//! Backend capability registry.

use crate::ResourceUrl;

/// Where the destination file name comes from when copying onto a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyNameSource {
    /// Use the last component of the source URL.
    FromUrl,
    /// Use the name reported by the source's entry record.
    Name,
}

/// Answers "can this backend do X?" questions for a URL's protocol.
///
/// The engine consults these before choosing a strategy: a `false` answer
/// steers it to a fallback up front, a lying `true` is recovered from when
/// the worker reports `UnsupportedAction`.
pub trait Capabilities: Send + Sync {
    /// The backend can rename within itself.
    fn can_rename_in_place(&self, url: &ResourceUrl) -> bool;

    /// The backend can copy within itself.
    fn can_copy_in_place(&self, url: &ResourceUrl) -> bool;

    /// The backend can rename a local file into itself.
    fn can_rename_from_file(&self, url: &ResourceUrl) -> bool;

    /// The backend can rename out to a local file.
    fn can_rename_to_file(&self, url: &ResourceUrl) -> bool;

    /// The backend can copy a local file into itself.
    fn can_copy_from_file(&self, url: &ResourceUrl) -> bool;

    /// The backend can copy out to a local file.
    fn can_copy_to_file(&self, url: &ResourceUrl) -> bool;

    /// The backend supports deletion at all.
    fn supports_deleting(&self, url: &ResourceUrl) -> bool;

    /// The backend deletes directories recursively with one command.
    fn can_delete_recursive(&self, url: &ResourceUrl) -> bool;

    /// The backend supports directory listing.
    fn supports_listing(&self, url: &ResourceUrl) -> bool;

    /// Which name a copy onto this backend should use.
    fn file_name_used_for_copying(&self, url: &ResourceUrl) -> CopyNameSource;

    /// Resume interrupted transfers without asking.
    fn auto_resume(&self) -> bool;
}

/// Capabilities of the local `file` backend: everything in-place, nothing
/// cross-protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalCapabilities;

impl Capabilities for LocalCapabilities {
    fn can_rename_in_place(&self, url: &ResourceUrl) -> bool {
        url.is_local()
    }

    fn can_copy_in_place(&self, url: &ResourceUrl) -> bool {
        url.is_local()
    }

    fn can_rename_from_file(&self, url: &ResourceUrl) -> bool {
        url.is_local()
    }

    fn can_rename_to_file(&self, url: &ResourceUrl) -> bool {
        url.is_local()
    }

    fn can_copy_from_file(&self, url: &ResourceUrl) -> bool {
        url.is_local()
    }

    fn can_copy_to_file(&self, url: &ResourceUrl) -> bool {
        url.is_local()
    }

    fn supports_deleting(&self, _url: &ResourceUrl) -> bool {
        true
    }

    fn can_delete_recursive(&self, url: &ResourceUrl) -> bool {
        url.is_local()
    }

    fn supports_listing(&self, _url: &ResourceUrl) -> bool {
        true
    }

    fn file_name_used_for_copying(&self, _url: &ResourceUrl) -> CopyNameSource {
        CopyNameSource::FromUrl
    }

    fn auto_resume(&self) -> bool {
        false
    }
}
