//! External process code generator.
//!
//! The generator executable receives the [`GenerationInput`] as one JSON
//! document on stdin and reports progress as JSON lines on stdout:
//!
//! ```text
//! {"type":"log","level":"info","message":"Generating entity Customer","meta":{}}
//! {"type":"module","path":"src/entities/customer.ts","code":"..."}
//! {"type":"error","message":"field type not supported"}
//! ```
//!
//! Lines written to stderr are forwarded as debug records.

use appforge_core::generator::{
    CodeGenerator, GenerationInput, GeneratorLevel, GeneratorLogger, Module,
};
use appforge_core::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// One line of generator output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GeneratorEvent {
    Log {
        level: GeneratorLevel,
        message: String,
        #[serde(default)]
        meta: serde_json::Value,
    },
    Module {
        path: String,
        code: String,
    },
    Error {
        message: String,
    },
}

/// Runs a generator executable per build.
#[derive(Debug, Clone)]
pub struct ProcessGenerator {
    command: String,
    args: Vec<String>,
}

impl ProcessGenerator {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

/// Accumulated result of reading stdout.
#[derive(Default)]
struct Collected {
    modules: Vec<Module>,
    errors: Vec<String>,
}

impl Collected {
    fn handle_line(&mut self, line: &str, logger: &GeneratorLogger) {
        if line.trim().is_empty() {
            return;
        }
        match serde_json::from_str::<GeneratorEvent>(line) {
            Ok(GeneratorEvent::Log {
                level,
                message,
                meta,
            }) => logger.log(level, message, meta),
            Ok(GeneratorEvent::Module { path, code }) => self.modules.push(Module { path, code }),
            Ok(GeneratorEvent::Error { message }) => {
                logger.error(message.clone());
                self.errors.push(message);
            }
            Err(e) => {
                logger.log(
                    GeneratorLevel::Warn,
                    format!("Unrecognized generator output: {line}"),
                    serde_json::json!({ "error": e.to_string() }),
                );
            }
        }
    }
}

/// Decode one output line, replacing invalid UTF-8 and dropping a trailing
/// carriage return.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

#[async_trait]
impl CodeGenerator for ProcessGenerator {
    async fn generate(
        &self,
        input: GenerationInput,
        logger: GeneratorLogger,
    ) -> Result<Vec<Module>> {
        let payload = serde_json::to_vec(&input)
            .map_err(|e| Error::Internal(format!("failed to encode generator input: {e}")))?;

        info!(
            command = %self.command,
            entities = input.entities.len(),
            roles = input.roles.len(),
            "Starting code generator"
        );

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::StageFailed(format!("failed to start {}: {e}", self.command)))?;

        let (Some(mut stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(Error::Internal("generator pipes unavailable".to_string()));
        };

        // Feed stdin separately so a chatty generator cannot block on a full
        // stdout pipe while we are still writing.
        let writer = tokio::spawn(async move {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await
        });

        // Split on raw bytes: a line that is not UTF-8 must not stop the
        // reader, or the child blocks on a full pipe.
        let mut stdout_lines = BufReader::new(stdout).split(b'\n');
        let mut stderr_lines = BufReader::new(stderr).split(b'\n');
        let mut stdout_open = true;
        let mut stderr_open = true;
        let mut collected = Collected::default();

        while stdout_open || stderr_open {
            tokio::select! {
                line = stdout_lines.next_segment(), if stdout_open => match line {
                    Ok(Some(line)) => collected.handle_line(&decode_line(&line), &logger),
                    Ok(None) => stdout_open = false,
                    Err(e) => {
                        warn!(error = %e, "Error reading generator stdout");
                        collected
                            .errors
                            .push(format!("failed to read generator output: {e}"));
                        stdout_open = false;
                        if let Err(e) = child.start_kill() {
                            debug!(error = %e, "Generator already exited");
                        }
                    }
                },
                line = stderr_lines.next_segment(), if stderr_open => match line {
                    Ok(Some(line)) => logger.debug(decode_line(&line)),
                    Ok(None) => stderr_open = false,
                    Err(e) => {
                        warn!(error = %e, "Error reading generator stderr");
                        stderr_open = false;
                    }
                },
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| Error::StageFailed(format!("failed to wait for generator: {e}")))?;

        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Generator closed stdin early"),
            Err(e) => warn!(error = %e, "Generator stdin task failed"),
        }

        if !collected.errors.is_empty() {
            return Err(Error::StageFailed(collected.errors.join("; ")));
        }
        if !status.success() {
            return Err(Error::StageFailed(format!("generator exited with {status}")));
        }

        info!(modules = collected.modules.len(), "Code generation finished");
        Ok(collected.modules)
    }
}
