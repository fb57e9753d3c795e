// `tandem files`: manage saved source files.

use std::path::PathBuf;

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use serde::Serialize;
use tandem_client::{ClientConfig, FileStore, SqliteFileStore};
use tandem_common::types::CodeFile;
use uuid::Uuid;

use crate::exit_code::ExitCode;
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct FilesArgs {
    /// Database path, overriding the config file.
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: FilesCommand,
}

#[derive(Debug, Subcommand)]
enum FilesCommand {
    /// List saved files, oldest first
    List,
    /// Save a local file
    Save {
        path: PathBuf,
        /// Name to save under. Defaults to the file name.
        #[arg(long)]
        name: Option<String>,
        #[arg(long, short = 'l', default_value = "plaintext")]
        language: String,
    },
    /// Print a saved file's content
    Show { id: Uuid },
    /// Delete a saved file
    Delete { id: Uuid },
}

#[derive(Debug, Serialize, PartialEq)]
struct FileSummary {
    id: Uuid,
    name: String,
    language: String,
    created: DateTime<Utc>,
    bytes: usize,
}

impl From<&CodeFile> for FileSummary {
    fn from(file: &CodeFile) -> Self {
        Self {
            id: file.id,
            name: file.name.clone(),
            language: file.language.clone(),
            created: file.created,
            bytes: file.content.len(),
        }
    }
}

#[derive(Debug, Serialize)]
struct Deleted {
    id: Uuid,
    deleted: bool,
}

pub fn run(args: FilesArgs, format: OutputFormat) -> anyhow::Result<ExitCode> {
    let path = match args.db {
        Some(path) => path,
        None => ClientConfig::load()
            .files_db_path()
            .ok_or_else(|| anyhow!("cannot locate a home directory; pass --db"))?,
    };
    let store = SqliteFileStore::open(&path).with_context(|| format!("failed to open `{}`", path.display()))?;
    execute(&store, args.command, format)
}

fn execute(store: &dyn FileStore, command: FilesCommand, format: OutputFormat) -> anyhow::Result<ExitCode> {
    match command {
        FilesCommand::List => {
            let files = list(store)?;
            output::print_output(format, &files, |files| format_list(files))?;
        }
        FilesCommand::Save { path, name, language } => {
            let file = save(store, &path, name, language)?;
            output::print_output(format, &FileSummary::from(&file), |s| format!("saved {} as {}", s.name, s.id))?;
        }
        FilesCommand::Show { id } => {
            let file = find(store, id)?;
            output::print_output(format, &file, |f| f.content.trim_end_matches('\n').to_owned())?;
        }
        FilesCommand::Delete { id } => {
            if !store.delete(id)? {
                return Err(anyhow!("file {id} not found"));
            }
            output::print_output(format, &Deleted { id, deleted: true }, |d| format!("deleted {}", d.id))?;
        }
    }
    Ok(ExitCode::Success)
}

fn list(store: &dyn FileStore) -> anyhow::Result<Vec<FileSummary>> {
    Ok(store.get_all()?.iter().map(FileSummary::from).collect())
}

fn save(store: &dyn FileStore, path: &std::path::Path, name: Option<String>, language: String) -> anyhow::Result<CodeFile> {
    let content = std::fs::read_to_string(path).with_context(|| format!("failed to read `{}`", path.display()))?;
    let name = name
        .or_else(|| path.file_name().map(|n| n.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "untitled".to_owned());
    let file = CodeFile::new(name, language, content);
    store.put(&file)?;
    Ok(file)
}

fn find(store: &dyn FileStore, id: Uuid) -> anyhow::Result<CodeFile> {
    store.get_all()?.into_iter().find(|file| file.id == id).ok_or_else(|| anyhow!("file {id} not found"))
}

fn format_list(files: &[FileSummary]) -> String {
    if files.is_empty() {
        return "no saved files".to_owned();
    }
    files
        .iter()
        .map(|f| format!("{}  {:<20} {:<12} {}", f.id, f.name, f.language, f.created.format("%Y-%m-%d %H:%M")))
        .collect::<Vec<_>>()
        .join("\n")
}
