//! Conductor configuration stored in `{home}/conductor.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::AgentRole;
use crate::io::state_store::write_atomic;

/// Conductor configuration (TOML).
///
/// Intended to be edited by humans. Missing fields fall back to defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConductorConfig {
    pub engine: EngineConfig,
    pub agent: AgentConfig,
    pub models: ModelsConfig,
}

/// Budgets and switches for the orchestration loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Build/validate cycles per retry loop.
    pub max_attempts: u32,
    /// Timeout for each workspace command and agent call.
    pub command_timeout_secs: u64,
    /// Characters of stdout/stderr kept per command.
    pub output_tail_bytes: usize,
    /// Escalation-triggered retry cycles per task within one run.
    pub max_escalation_retries: u32,
    /// Escalations a task may ever accumulate; unbounded when absent.
    pub max_escalations_per_task: Option<u32>,
    /// Stop `run` at the first task that does not finish.
    pub stop_on_failure: bool,
    /// Run the retrospective when the project completes.
    pub retro_on_complete: bool,
    /// Existing source handed to the builder, in bytes.
    pub source_budget_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            command_timeout_secs: 300,
            output_tail_bytes: 2000,
            max_escalation_retries: 1,
            max_escalations_per_task: None,
            stop_on_failure: true,
            retro_on_complete: true,
            source_budget_bytes: 80_000,
        }
    }
}

impl EngineConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

/// How agents are reached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Program and arguments; the prompt is written to its stdin.
    pub command: Vec<String>,
    /// Retries after a failed invocation.
    pub max_retries: u32,
    /// Backoff before retry `n` is `backoff_base_secs^n` seconds.
    pub backoff_base_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: ["codex", "exec", "--skip-git-repo-check", "-"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            max_retries: 3,
            backoff_base_secs: 2,
        }
    }
}

/// Model settings passed to the agent command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub model: String,
    pub provider: String,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            provider: "anthropic".to_string(),
            max_tokens: 4096,
            temperature: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelsConfig {
    pub planner: ModelConfig,
    pub coder: ModelConfig,
    pub qa: ModelConfig,
    pub distiller: ModelConfig,
}

impl ModelsConfig {
    pub fn for_role(&self, role: AgentRole) -> &ModelConfig {
        match role {
            AgentRole::Planner => &self.planner,
            AgentRole::Coder => &self.coder,
            AgentRole::Qa => &self.qa,
            AgentRole::Distiller => &self.distiller,
        }
    }
}

impl ConductorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.engine.max_attempts == 0 {
            return Err(anyhow!("engine.max_attempts must be > 0"));
        }
        if self.engine.command_timeout_secs == 0 {
            return Err(anyhow!("engine.command_timeout_secs must be > 0"));
        }
        if self.engine.output_tail_bytes == 0 {
            return Err(anyhow!("engine.output_tail_bytes must be > 0"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        for role in [
            AgentRole::Planner,
            AgentRole::Coder,
            AgentRole::Qa,
            AgentRole::Distiller,
        ] {
            let model = self.models.for_role(role);
            if model.model.trim().is_empty() {
                return Err(anyhow!("models.{role}.model must be non-empty"));
            }
            if model.max_tokens == 0 {
                return Err(anyhow!("models.{role}.max_tokens must be > 0"));
            }
            if !(0.0..=2.0).contains(&model.temperature) {
                return Err(anyhow!("models.{role}.temperature must be within 0.0..=2.0"));
            }
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ConductorConfig::default()`.
pub fn load_config(path: &Path) -> Result<ConductorConfig> {
    if !path.exists() {
        let cfg = ConductorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ConductorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ConductorConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, ConductorConfig::default());
        assert_eq!(cfg.engine.max_attempts, 3);
        assert_eq!(cfg.engine.command_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("conductor.toml");
        let mut cfg = ConductorConfig::default();
        cfg.engine.max_escalations_per_task = Some(4);
        cfg.models.qa.model = "small".to_string();
        write_config(&path, &cfg).expect("write");
        assert_eq!(load_config(&path).expect("load"), cfg);
    }

    /// Partial files only override the keys they name.
    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("conductor.toml");
        fs::write(
            &path,
            "[engine]\nmax_attempts = 5\n\n[models.coder]\nmodel = \"big\"\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.engine.max_attempts, 5);
        assert_eq!(cfg.engine.output_tail_bytes, 2000);
        assert_eq!(cfg.models.coder.model, "big");
        assert_eq!(cfg.models.coder.max_tokens, 4096);
        assert_eq!(cfg.models.planner, ModelConfig::default());
    }

    #[test]
    fn rejects_zero_attempts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("conductor.toml");
        fs::write(&path, "[engine]\nmax_attempts = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("max_attempts must be > 0"));
    }

    #[test]
    fn rejects_empty_agent_command() {
        let mut cfg = ConductorConfig::default();
        cfg.agent.command.clear();
        assert!(cfg.validate().is_err());
    }
}
