use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{ConfigLoader, CONFIG_ENV, DATA_ENV};
use crate::storage::NoteStore;

pub mod commands;

use self::commands::{EditArgs, ExportArgs, ImportArgs, KeyArgs, ListArgs, NewArgs, SaveArgs};

#[derive(Parser, Debug)]
#[command(
    name = "flatnotes",
    version,
    about = "Plain-text notes, one file per note"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Override the config file location (takes precedence over FLATNOTES_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over FLATNOTES_DATA)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List notes sorted by title
    List(ListArgs),
    /// Print a note's full body
    Show(KeyArgs),
    /// Create a note, minting its key from the configured identity policy
    New(NewArgs),
    /// Replace the body of an existing note
    Edit(EditArgs),
    /// Write a body under an explicit key, creating or overwriting it
    Save(SaveArgs),
    /// Delete a note (succeeds when it is already gone)
    Delete(KeyArgs),
    /// Export every note into a zip archive
    Export(ExportArgs),
    /// Import notes from a zip archive without overwriting existing ones
    Import(ImportArgs),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var(CONFIG_ENV, path);
    }
    if let Some(path) = &cli.data_dir {
        env::set_var(DATA_ENV, path);
    }

    let loader = ConfigLoader::discover()?;
    init_tracing(&cli.log_level)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;
    let config = loader.load_or_init()?;
    let store = NoteStore::open(&config.storage)
        .with_context(|| format!("opening notes directory {}", config.storage.notes_dir.display()))?;
    tracing::debug!(
        config = %loader.paths().config_file.display(),
        root = %store.root().display(),
        identity = %store.policy(),
        "note store ready"
    );

    match cli.command {
        Commands::List(args) => commands::list_notes(&config, &store, args),
        Commands::Show(args) => commands::show_note(&store, args),
        Commands::New(args) => commands::new_note(&store, args),
        Commands::Edit(args) => commands::edit_note(&store, args),
        Commands::Save(args) => commands::save_note(&store, args),
        Commands::Delete(args) => commands::delete_note(&store, args),
        Commands::Export(args) => commands::export_notes(&store, args),
        Commands::Import(args) => commands::import_notes(&store, args),
    }
}

fn init_tracing(level: &str) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
        Ok(())
    })
    .map(|_| ())
}
