use std::io::{Cursor, Read, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::storage::{DecodeWarning, Note, NoteStore, Result, StoreError, NOTE_EXTENSION};

pub const EXPORT_FILE_NAME: &str = "notes_export.zip";
pub const EXPORT_MIME_TYPE: &str = "application/zip";

/// Top-level folders some archivers add next to the real content.
const METADATA_DIRS: &[&str] = &["__MACOSX"];

/// A `(name, body)` pair pulled out of an archive, not yet accepted as a note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Base file name with the `.txt` extension, directories stripped.
    pub name: String,
    pub body: String,
}

impl ArchiveEntry {
    pub fn stem(&self) -> &str {
        self.name
            .strip_suffix(NOTE_EXTENSION)
            .and_then(|rest| rest.strip_suffix('.'))
            .unwrap_or(&self.name)
    }
}

#[derive(Debug, Default)]
pub struct DecodedArchive {
    pub entries: Vec<ArchiveEntry>,
    pub warnings: Vec<DecodeWarning>,
}

#[derive(Debug)]
pub struct StoreExport {
    pub bytes: Vec<u8>,
    pub note_count: usize,
    pub warnings: Vec<DecodeWarning>,
}

/// Packs notes into a deflated zip, one `<key>.txt` entry each. An empty
/// slice yields a valid archive with no entries.
pub fn export_notes(notes: &[Note]) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);

    for note in notes {
        let name = format!("{}.{NOTE_EXTENSION}", note.key);
        zip.start_file(name.as_str(), options)
            .map_err(StoreError::ArchiveWrite)?;
        zip.write_all(note.body.as_bytes())
            .map_err(|err| StoreError::io(&name, err))?;
        tracing::debug!(%name, "added note to archive");
    }

    let cursor = zip.finish().map_err(StoreError::ArchiveWrite)?;
    Ok(cursor.into_inner())
}

/// Exports everything currently readable in the store.
pub fn export_store(store: &NoteStore) -> Result<StoreExport> {
    let (notes, warnings) = store.load_all()?;
    let bytes = export_notes(&notes)?;
    tracing::info!(
        notes = notes.len(),
        skipped = warnings.len(),
        bytes = bytes.len(),
        "notes export completed"
    );
    Ok(StoreExport {
        bytes,
        note_count: notes.len(),
        warnings,
    })
}

/// Unpacks the note entries of an uploaded archive.
///
/// Directories, hidden entries, archiver metadata and files without the
/// `.txt` extension are skipped silently. Entries that cannot be read, are
/// not UTF-8 or exceed `max_entry_bytes` become warnings. Only a container
/// that is not a zip at all fails.
pub fn decode(bytes: &[u8], max_entry_bytes: u64) -> Result<DecodedArchive> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(StoreError::BadArchive)?;
    let mut decoded = DecodedArchive::default();

    for index in 0..archive.len() {
        let mut file = match archive.by_index(index) {
            Ok(file) => file,
            Err(err) => {
                decoded
                    .warnings
                    .push(DecodeWarning::new(format!("archive entry #{index}"), err));
                continue;
            }
        };

        let raw_name = file.name().to_string();
        if file.is_dir() || raw_name.ends_with('/') || raw_name.ends_with('\\') {
            tracing::debug!(name = %raw_name, "skipping directory entry");
            continue;
        }
        if is_hidden_or_metadata(&raw_name) {
            tracing::debug!(name = %raw_name, "skipping hidden or metadata entry");
            continue;
        }
        let name = base_name(&raw_name);
        if !has_note_extension(name) {
            tracing::debug!(name = %raw_name, "skipping entry without note extension");
            continue;
        }

        if file.size() > max_entry_bytes {
            decoded.warnings.push(DecodeWarning::new(
                name,
                format!("entry is {} bytes, limit is {max_entry_bytes}", file.size()),
            ));
            continue;
        }

        let mut raw = Vec::new();
        if let Err(err) = file.by_ref().take(max_entry_bytes + 1).read_to_end(&mut raw) {
            decoded.warnings.push(DecodeWarning::new(name, err));
            continue;
        }
        if raw.len() as u64 > max_entry_bytes {
            decoded.warnings.push(DecodeWarning::new(
                name,
                format!("entry exceeds the {max_entry_bytes} byte limit"),
            ));
            continue;
        }

        match String::from_utf8(raw) {
            Ok(body) => decoded.entries.push(ArchiveEntry {
                name: name.to_string(),
                body,
            }),
            Err(err) => decoded.warnings.push(DecodeWarning::new(name, err)),
        }
    }

    Ok(decoded)
}

fn is_hidden_or_metadata(name: &str) -> bool {
    name.split(['/', '\\'])
        .filter(|component| !component.is_empty())
        .any(|component| component.starts_with('.') || METADATA_DIRS.contains(&component))
}

fn base_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

fn has_note_extension(name: &str) -> bool {
    name.strip_suffix(NOTE_EXTENSION)
        .and_then(|rest| rest.strip_suffix('.'))
        .is_some_and(|stem| !stem.is_empty())
}
