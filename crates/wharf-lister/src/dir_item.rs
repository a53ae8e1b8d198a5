//! One directory's cached listing.

use wharf_core::{EntryRecord, ResourceUrl};

/// A directory snapshot held by the listing cache.
///
/// While a listing is in flight the item accumulates entries and is not yet
/// complete; once the listing finishes it holds the full set. Idle complete
/// items move to the cached registry and may carry a passive watch.
#[derive(Debug)]
pub struct DirItem {
    url: ResourceUrl,
    entries: Vec<EntryRecord>,
    complete: bool,
    watched: bool,
}

impl DirItem {
    pub fn new(url: ResourceUrl) -> Self {
        Self {
            url,
            entries: Vec::new(),
            complete: false,
            watched: false,
        }
    }

    /// Where the directory actually lives. Differs from the requested URL
    /// after a listing redirect or an external rename.
    pub fn url(&self) -> &ResourceUrl {
        &self.url
    }

    pub fn set_url(&mut self, url: ResourceUrl) {
        self.url = url;
    }

    pub fn entries(&self) -> &[EntryRecord] {
        &self.entries
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Whether a passive filesystem watch is active on this item.
    pub fn is_watched(&self) -> bool {
        self.watched
    }

    pub fn set_watched(&mut self, watched: bool) {
        self.watched = watched;
    }

    pub(crate) fn replace_entries(&mut self, entries: Vec<EntryRecord>) {
        self.entries = entries;
        self.complete = true;
    }

    pub(crate) fn remove_entry(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.name() != name);
        self.entries.len() != before
    }

    pub(crate) fn find_entry_mut(&mut self, name: &str) -> Option<&mut EntryRecord> {
        self.entries.iter_mut().find(|e| e.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_entry_reports_whether_it_existed() {
        let mut item = DirItem::new(ResourceUrl::parse("/d").unwrap());
        item.replace_entries(vec![EntryRecord::file("a", 1), EntryRecord::file("b", 2)]);
        assert!(item.remove_entry("a"));
        assert!(!item.remove_entry("a"));
        assert_eq!(item.entries().len(), 1);
    }
}
