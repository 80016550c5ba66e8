use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use unicode_segmentation::UnicodeSegmentation;

use crate::config::StorageOptions;
use crate::identity::{validate_key, IdentityPolicy};

mod error;

pub use error::{DecodeWarning, Result, StoreError};

pub const NOTE_EXTENSION: &str = "txt";
pub const TITLE_DISPLAY_LEN: usize = 50;
const TMP_EXTENSION: &str = "txt.tmp";
const UNTITLED: &str = "(No Title)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub key: String,
    pub body: String,
}

impl Note {
    pub fn title(&self) -> String {
        display_title(&self.body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NoteSummary {
    pub key: String,
    pub title: String,
}

#[derive(Debug, Default)]
pub struct Listing {
    pub notes: Vec<NoteSummary>,
    pub warnings: Vec<DecodeWarning>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Saved,
    /// Blank body removed the note that was stored at the key.
    Removed,
    /// Blank body and nothing stored at the key.
    Discarded,
}

/// Handle to a directory of `<key>.txt` files. Cloning shares the write lock.
///
/// Mutations are serialized through [`NoteStore::lock`] within this process
/// only; other processes writing to the same directory are not coordinated.
#[derive(Clone)]
pub struct NoteStore {
    root: Arc<PathBuf>,
    options: Arc<StorageOptions>,
    write_lock: Arc<Mutex<()>>,
}

impl NoteStore {
    pub fn open(options: &StorageOptions) -> Result<Self> {
        let store = Self {
            root: Arc::new(options.notes_dir.clone()),
            options: Arc::new(options.clone()),
            write_lock: Arc::new(Mutex::new(())),
        };
        store.ensure_root()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    pub fn policy(&self) -> IdentityPolicy {
        self.options.identity
    }

    fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&*self.root).map_err(|err| StoreError::io(&*self.root, err))
    }

    fn note_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(format!("{key}.{NOTE_EXTENSION}")))
    }

    /// Enters the store's critical section. Every mutation goes through the
    /// returned guard.
    pub fn lock(&self) -> Result<StoreGuard<'_>> {
        let guard = self.write_lock.lock();
        self.ensure_root()?;
        Ok(StoreGuard {
            store: self,
            _guard: guard,
        })
    }

    pub fn list(&self) -> Result<Listing> {
        let (files, mut warnings) = self.scan()?;
        let mut notes = Vec::with_capacity(files.len());
        for (key, path) in files {
            match fs::read_to_string(&path) {
                Ok(body) => notes.push(NoteSummary {
                    title: display_title(&body),
                    key,
                }),
                Err(err) => warnings.push(DecodeWarning::new(file_label(&path), err)),
            }
        }
        notes.sort_by(|a, b| {
            a.title
                .to_lowercase()
                .cmp(&b.title.to_lowercase())
                .then_with(|| a.key.cmp(&b.key))
        });
        Ok(Listing { notes, warnings })
    }

    pub fn read(&self, key: &str) -> Result<Note> {
        let path = self.note_path(key)?;
        match fs::read_to_string(&path) {
            Ok(body) => Ok(Note {
                key: key.to_string(),
                body,
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
            Err(err) => Err(StoreError::io(path, err)),
        }
    }

    /// Reads every note with its body, skipping the ones that fail to decode.
    pub fn load_all(&self) -> Result<(Vec<Note>, Vec<DecodeWarning>)> {
        let (files, mut warnings) = self.scan()?;
        let mut notes = Vec::with_capacity(files.len());
        for (key, path) in files {
            match fs::read_to_string(&path) {
                Ok(body) => notes.push(Note { key, body }),
                Err(err) => warnings.push(DecodeWarning::new(file_label(&path), err)),
            }
        }
        notes.sort_by(|a, b| a.key.cmp(&b.key));
        Ok((notes, warnings))
    }

    pub fn write(&self, key: &str, body: &str) -> Result<WriteOutcome> {
        self.lock()?.write(key, body)
    }

    /// Returns whether a file was actually removed. Missing keys are not an error.
    pub fn delete(&self, key: &str) -> Result<bool> {
        self.lock()?.delete(key)
    }

    /// Like [`write`](Self::write) but refuses to create a note that does not exist.
    pub fn edit(&self, key: &str, body: &str) -> Result<WriteOutcome> {
        let guard = self.lock()?;
        if !guard.exists(key)? {
            tracing::warn!(%key, "note not found for editing");
            return Err(StoreError::NotFound {
                key: key.to_string(),
            });
        }
        guard.write(key, body)
    }

    /// Mints a key with the configured policy and stores the note under it.
    /// A blank body creates nothing.
    pub fn create(&self, body: &str, title_hint: Option<&str>) -> Result<Option<String>> {
        if body.trim().is_empty() {
            tracing::info!("ignoring empty new note");
            return Ok(None);
        }
        let desired = title_hint
            .filter(|title| !title.trim().is_empty())
            .unwrap_or(body);
        let guard = self.lock()?;
        let key = guard.mint(Some(desired))?;
        guard.write(&key, body)?;
        tracing::info!(%key, "note created");
        Ok(Some(key))
    }

    fn scan(&self) -> Result<(Vec<(String, PathBuf)>, Vec<DecodeWarning>)> {
        self.ensure_root()?;
        let entries = fs::read_dir(&*self.root).map_err(|err| StoreError::io(&*self.root, err))?;
        let mut files = Vec::new();
        let mut warnings = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warnings.push(DecodeWarning::new(self.root.display().to_string(), err));
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().map(|ty| ty.is_file()).unwrap_or(false) {
                continue;
            }
            if path.extension().and_then(|ext| ext.to_str()) != Some(NOTE_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                warnings.push(DecodeWarning::new(
                    file_label(&path),
                    "file name is not valid UTF-8",
                ));
                continue;
            };
            if stem.starts_with('.') {
                continue;
            }
            if let Err(err) = validate_key(stem) {
                warnings.push(DecodeWarning::new(file_label(&path), err));
                continue;
            }
            files.push((stem.to_string(), path));
        }
        Ok((files, warnings))
    }
}

/// Held for the duration of a store mutation; see [`NoteStore::lock`].
pub struct StoreGuard<'a> {
    store: &'a NoteStore,
    _guard: MutexGuard<'a, ()>,
}

impl StoreGuard<'_> {
    pub fn exists(&self, key: &str) -> Result<bool> {
        let path = self.store.note_path(key)?;
        path.try_exists().map_err(|err| StoreError::io(path, err))
    }

    /// Stems of every note file currently on disk.
    pub fn keys(&self) -> Result<HashSet<String>> {
        Ok(self.scan_keys()?.0)
    }

    /// Same as [`keys`](Self::keys), also returning the files that were
    /// left out because their names are not usable keys.
    pub fn scan_keys(&self) -> Result<(HashSet<String>, Vec<DecodeWarning>)> {
        let (files, warnings) = self.store.scan()?;
        Ok((files.into_iter().map(|(key, _)| key).collect(), warnings))
    }

    pub fn mint(&self, desired: Option<&str>) -> Result<String> {
        let existing = self.keys()?;
        self.store.policy().mint(desired, &existing)
    }

    pub fn write(&self, key: &str, body: &str) -> Result<WriteOutcome> {
        let path = self.store.note_path(key)?;
        if body.trim().is_empty() && self.store.options.delete_on_empty_save {
            let removed = self.delete(key)?;
            return Ok(if removed {
                WriteOutcome::Removed
            } else {
                WriteOutcome::Discarded
            });
        }

        let tmp_path = path.with_extension(TMP_EXTENSION);
        fs::write(&tmp_path, body).map_err(|err| StoreError::io(&tmp_path, err))?;
        if let Err(err) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(StoreError::io(path, err));
        }
        tracing::info!(%key, bytes = body.len(), "note saved");
        Ok(WriteOutcome::Saved)
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        let path = self.store.note_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(%key, "note deleted");
                Ok(true)
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(%key, "delete of missing note ignored");
                Ok(false)
            }
            Err(err) => Err(StoreError::io(path, err)),
        }
    }
}

/// First line of the body, trimmed and cut to [`TITLE_DISPLAY_LEN`] graphemes.
pub fn display_title(body: &str) -> String {
    let first = body.lines().next().unwrap_or_default().trim();
    if first.is_empty() {
        return UNTITLED.to_string();
    }
    first.graphemes(true).take(TITLE_DISPLAY_LEN).collect()
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn storage_options(root: &TempDir) -> StorageOptions {
        let mut options = StorageOptions::default();
        options.notes_dir = root.path().join("notes");
        options
    }

    fn init_store() -> anyhow::Result<(TempDir, NoteStore)> {
        let temp = TempDir::new()?;
        let store = NoteStore::open(&storage_options(&temp))?;
        Ok((temp, store))
    }

    #[test]
    fn open_creates_missing_root_and_tolerates_existing() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let options = storage_options(&temp);
        assert!(!options.notes_dir.exists());
        NoteStore::open(&options)?;
        NoteStore::open(&options)?;
        assert!(options.notes_dir.is_dir());
        Ok(())
    }

    #[test]
    fn list_sorts_titles_case_insensitively() -> anyhow::Result<()> {
        let (_temp, store) = init_store()?;
        store.write("b", "banana\nyellow")?;
        store.write("a", "Cherry")?;
        store.write("c", "apple pie")?;
        store.write("d", "\nbody without title")?;

        let listing = store.list()?;
        let titles: Vec<_> = listing.notes.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, ["(No Title)", "apple pie", "banana", "Cherry"]);
        assert!(listing.warnings.is_empty());
        Ok(())
    }

    #[test]
    fn list_truncates_long_titles() -> anyhow::Result<()> {
        let (_temp, store) = init_store()?;
        let title = "é".repeat(80);
        store.write("long", &format!("{title}\nrest"))?;
        let listing = store.list()?;
        assert_eq!(listing.notes[0].title.chars().count(), TITLE_DISPLAY_LEN);
        Ok(())
    }

    #[test]
    fn list_skips_undecodable_files_with_warning() -> anyhow::Result<()> {
        let (_temp, store) = init_store()?;
        store.write("good", "readable")?;
        fs::write(store.root().join("broken.txt"), [0xff, 0xfe, 0x00, 0x80])?;
        fs::write(store.root().join("ignored.md"), "not a note")?;
        fs::create_dir(store.root().join("folder.txt"))?;

        let listing = store.list()?;
        assert_eq!(listing.notes.len(), 1);
        assert_eq!(listing.notes[0].key, "good");
        assert_eq!(listing.warnings.len(), 1);
        assert_eq!(listing.warnings[0].subject, "broken.txt");
        Ok(())
    }

    #[test]
    fn read_missing_note_is_not_found() -> anyhow::Result<()> {
        let (_temp, store) = init_store()?;
        assert_matches!(store.read("nope"), Err(StoreError::NotFound { ref key }) if key == "nope");
        Ok(())
    }

    #[test]
    fn write_then_read_round_trips_body() -> anyhow::Result<()> {
        let (_temp, store) = init_store()?;
        assert_eq!(store.write("k", "first\nsecond")?, WriteOutcome::Saved);
        assert_eq!(store.write("k", "replaced")?, WriteOutcome::Saved);
        let note = store.read("k")?;
        assert_eq!(note.body, "replaced");
        assert_eq!(note.title(), "replaced");

        let leftovers: Vec<_> = fs::read_dir(store.root())?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
        Ok(())
    }

    #[test]
    fn delete_is_idempotent() -> anyhow::Result<()> {
        let (_temp, store) = init_store()?;
        store.write("k", "body")?;
        assert!(store.delete("k")?);
        assert!(!store.delete("k")?);
        assert!(!store.delete("never-existed")?);
        assert_matches!(store.read("k"), Err(StoreError::NotFound { .. }));
        Ok(())
    }

    #[test]
    fn traversal_keys_are_rejected_before_touching_disk() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let options = storage_options(&temp);
        let store = NoteStore::open(&options)?;

        assert_matches!(
            store.write("../../etc/passwd", "x"),
            Err(StoreError::InvalidKey { .. })
        );
        assert_matches!(store.write("../escape", "x"), Err(StoreError::InvalidKey { .. }));
        assert_matches!(store.read("../notes/x"), Err(StoreError::InvalidKey { .. }));
        assert_matches!(store.delete("/abs"), Err(StoreError::InvalidKey { .. }));
        assert!(!temp.path().join("escape.txt").exists());
        assert_eq!(fs::read_dir(temp.path())?.count(), 1);
        Ok(())
    }

    #[test]
    fn empty_save_deletes_when_configured() -> anyhow::Result<()> {
        let (_temp, store) = init_store()?;
        assert!(store.options().delete_on_empty_save);
        store.write("k", "content")?;
        assert_eq!(store.write("k", "   \n\t")?, WriteOutcome::Removed);
        assert_matches!(store.read("k"), Err(StoreError::NotFound { .. }));
        assert_eq!(store.write("k", "")?, WriteOutcome::Discarded);
        Ok(())
    }

    #[test]
    fn empty_save_persists_when_deletion_disabled() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let mut options = storage_options(&temp);
        options.delete_on_empty_save = false;
        let store = NoteStore::open(&options)?;

        store.write("k", "content")?;
        assert_eq!(store.write("k", "")?, WriteOutcome::Saved);
        assert_eq!(store.read("k")?.body, "");
        assert_eq!(store.list()?.notes[0].title, "(No Title)");
        Ok(())
    }

    #[test]
    fn edit_requires_existing_note() -> anyhow::Result<()> {
        let (_temp, store) = init_store()?;
        assert_matches!(store.edit("ghost", "boo"), Err(StoreError::NotFound { .. }));
        assert!(store.list()?.notes.is_empty());
        store.write("real", "v1")?;
        store.edit("real", "v2")?;
        assert_eq!(store.read("real")?.body, "v2");
        Ok(())
    }

    #[test]
    fn create_uses_opaque_ids_by_default() -> anyhow::Result<()> {
        let (_temp, store) = init_store()?;
        let key = store.create("Groceries\nmilk", None)?.expect("note created");
        assert!(IdentityPolicy::OpaqueId.matches_key_format(&key));
        assert_eq!(store.read(&key)?.title(), "Groceries");
        assert_eq!(store.create("  ", None)?, None);
        assert_eq!(store.list()?.notes.len(), 1);
        Ok(())
    }

    #[test]
    fn create_with_title_policy_suffixes_collisions() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let mut options = storage_options(&temp);
        options.identity = IdentityPolicy::TitleDerived;
        let store = NoteStore::open(&options)?;

        let first = store.create("Weekly plan\nmonday", None)?;
        let second = store.create("other body", Some("Weekly plan"))?;
        let third = store.create("Weekly plan", Some("   "))?;
        assert_eq!(first.as_deref(), Some("Weekly_plan"));
        assert_eq!(second.as_deref(), Some("Weekly_plan_1"));
        assert_eq!(third.as_deref(), Some("Weekly_plan_2"));
        assert_eq!(store.read("Weekly_plan")?.body, "Weekly plan\nmonday");
        Ok(())
    }

    #[test]
    fn load_all_returns_bodies_sorted_by_key() -> anyhow::Result<()> {
        let (_temp, store) = init_store()?;
        store.write("b", "two")?;
        store.write("a", "one")?;
        let (notes, warnings) = store.load_all()?;
        assert!(warnings.is_empty());
        assert_eq!(
            notes,
            vec![
                Note { key: "a".into(), body: "one".into() },
                Note { key: "b".into(), body: "two".into() },
            ]
        );
        Ok(())
    }

    #[test]
    fn concurrent_creates_from_cloned_handles_get_distinct_keys() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let mut options = storage_options(&temp);
        options.identity = IdentityPolicy::TitleDerived;
        let store = NoteStore::open(&options)?;

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || store.create(&format!("same\n{i}"), None))
            })
            .collect();
        let mut keys = HashSet::new();
        for handle in handles {
            let key = handle.join().expect("create thread panicked")?;
            assert!(keys.insert(key.expect("non-empty body creates a note")));
        }

        assert_eq!(keys.len(), 8);
        assert!(keys.contains("same"));
        assert_eq!(store.list()?.notes.len(), 8);
        Ok(())
    }
}
