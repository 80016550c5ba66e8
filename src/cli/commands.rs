use std::fmt::Write as _;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;

use crate::archive::{self, EXPORT_FILE_NAME, EXPORT_MIME_TYPE};
use crate::config::AppConfig;
use crate::reconcile::{self, ImportReport};
use crate::storage::{Listing, NoteStore, WriteOutcome};

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Print the listing as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct KeyArgs {
    /// Note key (file name without `.txt`)
    pub key: String,
}

#[derive(Args, Debug, Clone)]
pub struct NewArgs {
    /// Title used as the key hint by the title-derived policy
    #[arg(long)]
    pub title: Option<String>,
    /// Provide the note body inline. If omitted, reads from stdin.
    #[arg(long)]
    pub body: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct EditArgs {
    /// Note key (file name without `.txt`)
    pub key: String,
    /// Provide the note body inline. If omitted, reads from stdin.
    #[arg(long)]
    pub body: Option<String>,
}

pub type SaveArgs = EditArgs;

#[derive(Args, Debug, Clone)]
pub struct ExportArgs {
    /// Destination file (defaults to notes_export.zip in the working directory)
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ImportArgs {
    /// Zip archive to import
    pub path: PathBuf,
}

pub fn list_notes(config: &AppConfig, store: &NoteStore, args: ListArgs) -> Result<()> {
    let listing = store.list().context("listing notes")?;
    if args.json {
        let json = serde_json::to_string_pretty(&listing.notes).context("serializing listing")?;
        println!("{json}");
    } else {
        print!("{}", render_listing(&listing, config.list_title_width));
    }
    for warning in &listing.warnings {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

fn render_listing(listing: &Listing, width: usize) -> String {
    let mut out = String::new();
    if listing.notes.is_empty() {
        out.push_str("(no notes)\n");
    }
    for note in &listing.notes {
        let _ = writeln!(out, "{:<width$}  {}", note.title, note.key);
    }
    if !listing.warnings.is_empty() {
        let total = listing.notes.len() + listing.warnings.len();
        let _ = writeln!(
            out,
            "listed {} of {} notes; {} unreadable",
            listing.notes.len(),
            total,
            listing.warnings.len()
        );
    }
    out
}

pub fn show_note(store: &NoteStore, args: KeyArgs) -> Result<()> {
    let note = store.read(&args.key)?;
    print!("{}", note.body);
    if !note.body.ends_with('\n') {
        println!();
    }
    Ok(())
}

pub fn new_note(store: &NoteStore, args: NewArgs) -> Result<()> {
    let body = body_or_stdin(args.body)?;
    match store
        .create(&body, args.title.as_deref())
        .context("creating note")?
    {
        Some(key) => println!("Created note {key}"),
        None => println!("Empty note discarded"),
    }
    Ok(())
}

pub fn edit_note(store: &NoteStore, args: EditArgs) -> Result<()> {
    let body = body_or_stdin(args.body)?;
    let outcome = store
        .edit(&args.key, &body)
        .with_context(|| format!("editing note {}", args.key))?;
    println!("{}", describe_write(&args.key, outcome));
    Ok(())
}

pub fn save_note(store: &NoteStore, args: SaveArgs) -> Result<()> {
    let body = body_or_stdin(args.body)?;
    let outcome = store
        .write(&args.key, &body)
        .with_context(|| format!("saving note {}", args.key))?;
    println!("{}", describe_write(&args.key, outcome));
    Ok(())
}

fn describe_write(key: &str, outcome: WriteOutcome) -> String {
    match outcome {
        WriteOutcome::Saved => format!("Saved note {key}"),
        WriteOutcome::Removed => format!("Deleted note {key} (empty body)"),
        WriteOutcome::Discarded => format!("Nothing saved for {key} (empty body)"),
    }
}

pub fn delete_note(store: &NoteStore, args: KeyArgs) -> Result<()> {
    if store.delete(&args.key)? {
        println!("Deleted note {}", args.key);
    } else {
        tracing::warn!(key = %args.key, "attempted to delete non-existent note");
        println!("Note {} was already gone", args.key);
    }
    Ok(())
}

pub fn export_notes(store: &NoteStore, args: ExportArgs) -> Result<()> {
    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(EXPORT_FILE_NAME));
    let export = archive::export_store(store).context("building export archive")?;
    fs::write(&output, &export.bytes)
        .with_context(|| format!("writing export {}", output.display()))?;
    println!(
        "Exported {} notes to {} ({EXPORT_MIME_TYPE})",
        export.note_count,
        output.display()
    );
    for warning in &export.warnings {
        eprintln!("warning: {warning}");
    }
    Ok(())
}

pub fn import_notes(store: &NoteStore, args: ImportArgs) -> Result<()> {
    let report = run_import(store, &args.path)?;
    print!("{report}");
    Ok(())
}

fn run_import(store: &NoteStore, path: &Path) -> Result<ImportReport> {
    let is_zip = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
    if !is_zip {
        bail!("{} is not a .zip file", path.display());
    }
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let report = reconcile::import_archive(&bytes, store)
        .with_context(|| format!("importing {}", path.display()))?;
    Ok(report)
}

fn body_or_stdin(body: Option<String>) -> Result<String> {
    if let Some(body) = body {
        return Ok(body);
    }
    match read_stdin()? {
        Some(body) => Ok(body),
        None => bail!("provide --body or pipe the note body on stdin"),
    }
}

fn read_stdin() -> Result<Option<String>> {
    if atty::is(atty::Stream::Stdin) {
        return Ok(None);
    }
    let mut buf = String::new();
    io::stdin().read_to_string(&mut buf)?;
    Ok(Some(buf))
}
