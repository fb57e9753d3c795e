// CLI subcommand dispatch.

use anyhow::Context;
use clap::Subcommand;

use crate::exit_code::ExitCode;
use crate::output::OutputFormat;

pub mod files;
pub mod join;
pub mod run;

#[derive(Subcommand)]
pub enum Command {
    /// Join a room: stream the shared text and presence, append stdin lines
    Join(join::JoinArgs),
    /// Execute a source file on the code execution service
    Run(run::RunArgs),
    /// Manage saved files
    Files(files::FilesArgs),
}

pub fn run(cmd: Command, format: OutputFormat) -> anyhow::Result<ExitCode> {
    match cmd {
        Command::Join(args) => join::run(args, format),
        Command::Run(args) => run::run(args, format),
        Command::Files(args) => files::run(args, format),
    }
}

pub(crate) fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread().enable_all().build().context("failed to start async runtime")
}
