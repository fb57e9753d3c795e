// `tandem run`: execute a source file on the code execution service.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::Args;
use serde::Serialize;
use tandem_client::{ClientConfig, CodeExecutor, PistonExecutor};
use tandem_common::types::{ExecutionRequest, ExecutionResult};

use crate::exit_code::ExitCode;
use crate::output::{self, OutputFormat};

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Source file to execute, or `-` for stdin.
    file: PathBuf,
    /// Language name understood by the service. Inferred from the file extension when omitted.
    #[arg(long, short = 'l')]
    language: Option<String>,
    /// Execution service base URL, overriding the config file.
    #[arg(long)]
    execution_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct RunReport {
    language: String,
    #[serde(flatten)]
    result: ExecutionResult,
}

pub fn run(args: RunArgs, format: OutputFormat) -> anyhow::Result<ExitCode> {
    let language = match args.language {
        Some(language) => language,
        None => match language_for(&args.file) {
            Some(language) => language.to_owned(),
            None => bail!("cannot infer a language for `{}`; pass --language", args.file.display()),
        },
    };
    let source = read_source(&args.file)?;

    let config = ClientConfig::load();
    let base_url = args.execution_url.unwrap_or_else(|| config.execution_url().to_owned());
    let executor = PistonExecutor::new(&base_url)?;
    let request = ExecutionRequest { language: language.clone(), source };

    tracing::debug!(url = %executor.execute_url(), language = %request.language, "executing");
    let result = super::runtime()?.block_on(executor.execute(&request))?;

    let success = result.exit.success();
    if !result.stderr.is_empty() && format == OutputFormat::Human {
        eprint!("{}", result.stderr);
    }
    output::print_output(format, &RunReport { language, result }, format_human)?;
    Ok(if success { ExitCode::Success } else { ExitCode::ProgramFailed })
}

fn read_source(file: &Path) -> anyhow::Result<String> {
    if file.as_os_str() == "-" {
        let mut source = String::new();
        std::io::stdin().read_to_string(&mut source).context("failed to read source from stdin")?;
        return Ok(source);
    }
    std::fs::read_to_string(file).with_context(|| format!("failed to read `{}`", file.display()))
}

fn language_for(file: &Path) -> Option<&'static str> {
    let language = match file.extension()?.to_str()? {
        "py" => "python",
        "js" | "mjs" => "javascript",
        "ts" => "typescript",
        "rs" => "rust",
        "go" => "go",
        "java" => "java",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" => "c++",
        "rb" => "ruby",
        "sh" => "bash",
        _ => return None,
    };
    Some(language)
}

fn format_human(report: &RunReport) -> String {
    let mut out = report.result.stdout.trim_end_matches('\n').to_owned();
    if !report.result.exit.success() {
        if !out.is_empty() {
            out.push('\n');
        }
        match (&report.result.exit.signal, report.result.exit.code) {
            (Some(signal), _) => out.push_str(&format!("[{} killed by {signal}]", report.language)),
            (None, Some(code)) => out.push_str(&format!("[{} exited with {code}]", report.language)),
            (None, None) => out.push_str(&format!("[{} did not report an exit status]", report.language)),
        }
    }
    out
}
