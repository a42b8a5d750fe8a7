//! Per-item operations the CLI can drive.
//!
//! - `Exec` spawns a command for every item, writes the payload to its stdin
//!   and takes trimmed stdout as the value. A non-zero exit is a failure.
//! - `Http` POSTs `{"id": .., "payload": ..}` to a URL and takes the response
//!   body as the value. A non-2xx status is a failure.

use crate::input::Record;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Environment variable carrying the item id into `--exec` commands.
pub const ITEM_ID_ENV: &str = "RATEBATCH_ITEM_ID";

/// The operation selected on the command line.
pub enum Operation {
    Exec(ExecOperation),
    Http(HttpOperation),
}

impl Operation {
    pub async fn call(&self, record: Record) -> Result<String, String> {
        match self {
            Self::Exec(op) => op.call(record).await,
            Self::Http(op) => op.call(record).await,
        }
    }

    /// Short label for headers and logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Exec(op) => format!("exec: {}", op.program),
            Self::Http(op) => format!("POST {}", op.url),
        }
    }
}

pub struct ExecOperation {
    program: String,
    args: Vec<String>,
}

impl ExecOperation {
    /// Split a command line on whitespace into program and arguments.
    pub fn parse(command: &str) -> Result<Self, String> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| "--exec requires a command".to_string())?;

        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    async fn call(&self, record: Record) -> Result<String, String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env(ITEM_ID_ENV, &record.id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to spawn '{}': {}", self.program, e))?;

        // Feed stdin while draining stdout; a filter like `cat` blocks on a
        // full stdout pipe long before it has read a large payload.
        let stdin = child.stdin.take();
        let payload = record.payload.into_bytes();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // A command that ignores its input may close stdin early.
                let _ = stdin.write_all(&payload).await;
            }
        };

        let ((), output) = tokio::join!(feed, child.wait_with_output());
        let output =
            output.map_err(|e| format!("failed to wait for '{}': {}", self.program, e))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.lines().next().unwrap_or("").trim();
            Err(format!("{} {}", output.status, detail).trim().to_string())
        }
    }
}

pub struct HttpOperation {
    client: reqwest::Client,
    url: String,
}

impl HttpOperation {
    pub fn new(url: &str) -> Result<Self, String> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(format!("--url must start with http:// or https://, got '{}'", url));
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("ratebatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {}", e))?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    async fn call(&self, record: Record) -> Result<String, String> {
        let response = self
            .client
            .post(&self.url)
            .json(&record)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| format!("failed to read response: {}", e))?;

        if status.is_success() {
            Ok(body.trim().to_string())
        } else {
            let snippet: String = body.chars().take(200).collect();
            Err(format!("HTTP {}: {}", status.as_u16(), snippet.trim()))
        }
    }
}
