use std::fmt;

use serde::Serialize;

use crate::archive::{self, ArchiveEntry};
use crate::storage::{DecodeWarning, NoteStore, Result, WriteOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImportAction {
    /// Entry name was already a valid, unused key.
    Kept,
    /// Entry got a freshly minted key.
    Renamed,
    /// Blank body with `delete_on_empty_save` set; nothing written.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportOutcome {
    pub original_name: String,
    pub resolved_key: String,
    pub action: ImportAction,
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub outcomes: Vec<ImportOutcome>,
    pub warnings: Vec<DecodeWarning>,
}

impl ImportReport {
    pub fn imported(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.action != ImportAction::Skipped)
            .count()
    }
}

impl fmt::Display for ImportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Imported {} of {} entries",
            self.imported(),
            self.outcomes.len() + self.warnings.len()
        )?;
        for outcome in &self.outcomes {
            let action = match outcome.action {
                ImportAction::Kept => "kept",
                ImportAction::Renamed => "renamed",
                ImportAction::Skipped => "skipped, empty body",
            };
            writeln!(
                f,
                "  {} -> {} ({action})",
                outcome.original_name, outcome.resolved_key
            )?;
        }
        if !self.warnings.is_empty() {
            writeln!(f, "Warnings:")?;
            for warning in &self.warnings {
                writeln!(f, "  {warning}")?;
            }
        }
        Ok(())
    }
}

/// Merges archive entries into the store without overwriting anything.
///
/// Runs as one critical section. Each entry is checked against the store as
/// left by the entries before it, so duplicate names inside one archive
/// still resolve to distinct keys.
pub fn reconcile(entries: &[ArchiveEntry], store: &NoteStore) -> Result<ImportReport> {
    let policy = store.policy();
    let guard = store.lock()?;
    let (mut existing, warnings) = guard.scan_keys()?;
    let mut report = ImportReport {
        warnings,
        ..ImportReport::default()
    };

    for entry in entries {
        let stem = entry.stem();
        let reusable = policy.matches_key_format(stem)
            && !policy.is_taken(stem, &existing)
            && !guard.exists(stem)?;

        let (key, action) = if reusable {
            (stem.to_string(), ImportAction::Kept)
        } else {
            let key = policy.mint(Some(stem), &existing)?;
            tracing::warn!(name = %entry.name, %key, "imported note renamed to avoid a conflict");
            (key, ImportAction::Renamed)
        };

        let action = match guard.write(&key, &entry.body)? {
            WriteOutcome::Saved => {
                existing.insert(key.clone());
                action
            }
            WriteOutcome::Removed | WriteOutcome::Discarded => ImportAction::Skipped,
        };
        tracing::info!(name = %entry.name, %key, ?action, "imported note");
        report.outcomes.push(ImportOutcome {
            original_name: entry.name.clone(),
            resolved_key: key,
            action,
        });
    }

    Ok(report)
}

/// Decodes an uploaded archive and reconciles its entries into the store.
pub fn import_archive(bytes: &[u8], store: &NoteStore) -> Result<ImportReport> {
    tracing::info!(bytes = bytes.len(), "starting notes import");
    let decoded = archive::decode(bytes, store.options().max_entry_bytes)?;
    let mut report = reconcile(&decoded.entries, store)?;
    let mut warnings = decoded.warnings;
    warnings.append(&mut report.warnings);
    report.warnings = warnings;
    tracing::info!(
        imported = report.imported(),
        warnings = report.warnings.len(),
        "notes import completed"
    );
    Ok(report)
}
