// Remote code execution through a Piston-compatible HTTP API.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tandem_common::types::{ExecutionRequest, ExecutionResult, ExitStatus};
use tracing::debug;
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("invalid execution url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("execution request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("execution service rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("execution service returned an unexpected body: {0}")]
    MalformedResponse(String),
}

/// Runs source text in a named language and reports what it printed.
pub trait CodeExecutor: Send + Sync {
    fn execute(
        &self,
        request: &ExecutionRequest,
    ) -> impl Future<Output = Result<ExecutionResult, ExecutionError>> + Send;
}

#[derive(Debug, Clone)]
pub struct PistonExecutor {
    client: reqwest::Client,
    execute_url: Url,
}

impl PistonExecutor {
    pub fn new(base_url: &str) -> Result<Self, ExecutionError> {
        let invalid = |reason: String| ExecutionError::InvalidUrl { url: base_url.to_owned(), reason };
        let base = Url::parse(base_url.trim_end_matches('/')).map_err(|error| invalid(error.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme `{}`", base.scheme())));
        }
        let execute_url =
            Url::parse(&format!("{}/execute", base.as_str().trim_end_matches('/'))).map_err(|e| invalid(e.to_string()))?;
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, execute_url })
    }

    pub fn execute_url(&self) -> &Url {
        &self.execute_url
    }
}

#[derive(Debug, Serialize)]
struct PistonRequest<'a> {
    language: &'a str,
    version: &'a str,
    files: [PistonFile<'a>; 1],
}

#[derive(Debug, Serialize)]
struct PistonFile<'a> {
    name: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct PistonResponse {
    run: Option<PistonStage>,
    compile: Option<PistonStage>,
}

#[derive(Debug, Deserialize)]
struct PistonStage {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    code: Option<i32>,
    signal: Option<String>,
}

impl From<PistonStage> for ExecutionResult {
    fn from(stage: PistonStage) -> Self {
        Self { stdout: stage.stdout, stderr: stage.stderr, exit: ExitStatus { code: stage.code, signal: stage.signal } }
    }
}

#[derive(Debug, Deserialize)]
struct PistonErrorBody {
    message: String,
}

impl CodeExecutor for PistonExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecutionError> {
        let body = PistonRequest {
            language: &request.language,
            version: "*",
            files: [PistonFile { name: "main", content: &request.source }],
        };
        debug!(language = %request.language, bytes = request.source.len(), url = %self.execute_url, "executing source");
        let response = self.client.post(self.execute_url.clone()).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        parse_response(status.as_u16(), &text)
    }
}

fn parse_response(status: u16, body: &str) -> Result<ExecutionResult, ExecutionError> {
    if !(200..300).contains(&status) {
        let message = serde_json::from_str::<PistonErrorBody>(body)
            .map(|error| error.message)
            .unwrap_or_else(|_| body.trim().to_owned());
        return Err(ExecutionError::Rejected { status, message });
    }
    let parsed: PistonResponse =
        serde_json::from_str(body).map_err(|error| ExecutionError::MalformedResponse(error.to_string()))?;

    // A failed compile stage is the whole story; the run stage never happened.
    if let Some(compile) = parsed.compile {
        let exit = ExitStatus { code: compile.code, signal: compile.signal.clone() };
        if !exit.success() {
            return Ok(compile.into());
        }
    }
    parsed
        .run
        .map(ExecutionResult::from)
        .ok_or_else(|| ExecutionError::MalformedResponse("missing `run` stage".to_owned()))
}
