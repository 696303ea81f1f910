//! Agent invocation.
//!
//! The [`AgentInvoker`] trait decouples orchestration from the agent backend.
//! [`CommandInvoker`] pipes the prompt into a configured command and parses
//! its stdout; tests use scripted invokers that return predetermined outputs
//! without spawning processes.
//!
//! Invocation never fails outright: once its own retries are exhausted an
//! invoker returns a role-typed `blocked` output, which the attempt loop
//! handles like any other blocked response.

use std::path::PathBuf;
use std::process::Command;
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::digest::head;
use crate::core::output::{AgentOutput, Usage};
use crate::core::types::AgentRole;
use crate::io::config::{AgentConfig, ModelConfig};
use crate::io::process::run_command_with_timeout;

/// Default user message sent after the composed prompt.
pub const EXECUTE_MESSAGE: &str = "Execute your task.";

const CORRECTIVE_MESSAGE: &str = "Your previous response was not valid JSON. \
Respond with ONLY a JSON object matching the required format. \
No markdown and no explanation, just the JSON.";

/// Agent stdout beyond this many bytes is discarded.
const RESPONSE_LIMIT_BYTES: usize = 4 * 1024 * 1024;

/// One request to an agent.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub role: AgentRole,
    /// Composed system prompt.
    pub prompt: String,
    pub model: ModelConfig,
    /// User message appended after the prompt.
    pub message: String,
}

impl AgentRequest {
    pub fn new(role: AgentRole, prompt: String, model: ModelConfig) -> Self {
        Self {
            role,
            prompt,
            model,
            message: EXECUTE_MESSAGE.to_string(),
        }
    }
}

/// What an invocation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub output: AgentOutput,
    pub usage: Usage,
}

/// Abstraction over agent backends.
pub trait AgentInvoker {
    fn invoke(&self, request: &AgentRequest) -> Invocation;
}

/// Invoker that runs `agent.command` with the prompt on stdin.
#[derive(Debug, Clone)]
pub struct CommandInvoker {
    config: AgentConfig,
    timeout: Duration,
    workdir: PathBuf,
}

impl CommandInvoker {
    pub fn new(config: AgentConfig, timeout: Duration, workdir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            timeout,
            workdir: workdir.into(),
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.config.backoff_base_secs.saturating_pow(attempt + 1))
    }

    /// One process run; returns stdout on success.
    fn run_once(&self, request: &AgentRequest, message: &str) -> Result<String> {
        let (program, args) = self
            .config
            .command
            .split_first()
            .ok_or_else(|| anyhow!("agent.command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&self.workdir)
            .env("CONDUCTOR_ROLE", request.role.as_str())
            .env("CONDUCTOR_MODEL", &request.model.model)
            .env("CONDUCTOR_PROVIDER", &request.model.provider)
            .env("CONDUCTOR_MAX_TOKENS", request.model.max_tokens.to_string())
            .env("CONDUCTOR_TEMPERATURE", request.model.temperature.to_string());
        let input = format!("{}\n\n---\n\n{}\n", request.prompt, message);

        let output =
            run_command_with_timeout(cmd, Some(input.as_bytes()), self.timeout, RESPONSE_LIMIT_BYTES)?;
        if output.timed_out {
            return Err(anyhow!(
                "agent command timed out after {} seconds",
                self.timeout.as_secs()
            ));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "agent command failed with status {:?}: {}",
                output.status.code(),
                head(output.stderr_text().trim(), 300)
            ));
        }
        Ok(output.stdout_text())
    }
}

impl AgentInvoker for CommandInvoker {
    #[instrument(skip_all, fields(role = %request.role, model = %request.model.model))]
    fn invoke(&self, request: &AgentRequest) -> Invocation {
        let mut message = request.message.clone();
        let mut corrected = false;
        let mut last_problem = String::new();
        let mut attempt = 0u32;

        while attempt < self.config.max_retries.max(1) {
            info!(attempt, "invoking agent");
            match self.run_once(request, &message) {
                Ok(raw) => match parse_agent_response(request.role, &raw) {
                    Ok((output, usage)) => {
                        debug!(status = %output.status(), "agent response parsed");
                        return Invocation { output, usage };
                    }
                    Err(err) => {
                        warn!(err = %err, "malformed agent response");
                        last_problem = format!("{err}; last response: {}", head(raw.trim(), 200));
                        if corrected {
                            break;
                        }
                        corrected = true;
                        message = CORRECTIVE_MESSAGE.to_string();
                        continue;
                    }
                },
                Err(err) => {
                    last_problem = format!("{err:#}");
                    attempt += 1;
                    if attempt < self.config.max_retries {
                        let wait = self.backoff(attempt - 1);
                        warn!(attempt, wait_secs = wait.as_secs(), err = %last_problem, "agent call failed, retrying");
                        thread::sleep(wait);
                    }
                }
            }
        }

        warn!(problem = %last_problem, "agent invocation gave up");
        Invocation {
            output: AgentOutput::blocked(
                request.role,
                format!(
                    "Agent invocation failed after {} attempts: {last_problem}",
                    self.config.max_retries.max(1)
                ),
            ),
            usage: Usage::default(),
        }
    }
}

fn fenced_block<'a>(text: &'a str, opener: &str) -> Option<&'a str> {
    let start = text.find(opener)?;
    let body_start = start + text[start..].find('\n')? + 1;
    let body_len = text[body_start..].find("```")?;
    Some(text[body_start..body_start + body_len].trim())
}

fn outermost(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// Extract a JSON object or array from free-form model output.
///
/// Tries, in order: the whole text, a ```json fence, a generic fence, the
/// outermost braces, the outermost brackets.
pub fn extract_json(text: &str) -> Result<Value, String> {
    let stripped = text.trim();
    if (stripped.starts_with('{') || stripped.starts_with('['))
        && let Ok(value) = serde_json::from_str(stripped)
    {
        return Ok(value);
    }
    let candidates = [
        fenced_block(stripped, "```json"),
        fenced_block(stripped, "```").filter(|body| body.starts_with('{') || body.starts_with('[')),
        outermost(stripped, '{', '}'),
        outermost(stripped, '[', ']'),
    ];
    for candidate in candidates.into_iter().flatten() {
        if let Ok(value) = serde_json::from_str(candidate) {
            return Ok(value);
        }
    }
    Err("no JSON object found in response".to_string())
}

/// Parse raw agent output into the variant for `role`, plus any reported usage.
pub fn parse_agent_response(role: AgentRole, raw: &str) -> Result<(AgentOutput, Usage), String> {
    let mut value = extract_json(raw)?;
    let usage = value
        .as_object_mut()
        .and_then(|object| object.remove("usage"))
        .and_then(|usage| serde_json::from_value::<Usage>(usage).ok())
        .unwrap_or_default();
    let output = AgentOutput::parse(role, value)?;
    Ok((output, usage))
}
