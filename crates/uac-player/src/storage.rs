//! Block storage collaborator (the SD card on the target).

use std::fs;
use std::io::{self, Read};
use std::path::Path;

/// Kind of a directory entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Other,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

pub trait Storage: Send + Sync {
    /// Entries of `dir` in the storage's native order. Ordering is not sorted.
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<DirEntry>>;

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;

    fn stat(&self, path: &Path) -> io::Result<EntryKind>;
}

/// Local filesystem storage.
#[derive(Clone, Copy, Debug, Default)]
pub struct FsStorage;

impl Storage for FsStorage {
    fn list_dir(&self, dir: &Path) -> io::Result<Vec<DirEntry>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                tracing::debug!(path = ?entry.path(), "skipping non-UTF-8 file name");
                continue;
            };
            let kind = entry
                .file_type()
                .map(kind_of)
                .unwrap_or(EntryKind::Other);
            out.push(DirEntry { name, kind });
        }
        Ok(out)
    }

    fn open(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(fs::File::open(path)?))
    }

    fn stat(&self, path: &Path) -> io::Result<EntryKind> {
        Ok(kind_of(fs::metadata(path)?.file_type()))
    }
}

fn kind_of(ft: fs::FileType) -> EntryKind {
    if ft.is_file() {
        EntryKind::File
    } else if ft.is_dir() {
        EntryKind::Dir
    } else {
        EntryKind::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_storage_lists_and_stats_entries() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.mp3"), b"abc").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let storage = FsStorage;
        let mut entries = storage.list_dir(dir.path()).unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(
            entries,
            vec![
                DirEntry::new("a.mp3", EntryKind::File),
                DirEntry::new("sub", EntryKind::Dir),
            ]
        );
        assert_eq!(storage.stat(&dir.path().join("a.mp3")).unwrap(), EntryKind::File);
        assert_eq!(storage.stat(&dir.path().join("sub")).unwrap(), EntryKind::Dir);
        assert!(storage.stat(&dir.path().join("missing.mp3")).is_err());

        let mut body = String::new();
        storage
            .open(&dir.path().join("a.mp3"))
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        assert_eq!(body, "abc");
    }
}
