//! Role-typed agent responses.
//!
//! Every response shares an [`Envelope`]; each role adds its own fields. The
//! set of variants is closed: [`AgentOutput::parse`] picks the variant from
//! the role that was requested, never from the payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::types::{AgentRole, AgentStatus, CommandResult, FileOperation};

/// Fields common to every agent response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub role: AgentRole,
    pub status: AgentStatus,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub next_action: String,
    #[serde(default)]
    pub files_touched: Vec<String>,
}

impl Envelope {
    pub fn new(role: AgentRole, status: AgentStatus, summary: impl Into<String>) -> Self {
        Self {
            role,
            status,
            summary: summary.into(),
            next_action: String::new(),
            files_touched: Vec::new(),
        }
    }
}

/// Validation verdict. Anything unrecognized counts as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    Blocked,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Escalation decision returned by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Retry,
    HumanNeeded,
    #[serde(other)]
    Unrecognized,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoderOutput {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default)]
    pub file_operations: Vec<FileOperation>,
    /// Shell commands the builder wants run after its changes are applied.
    #[serde(default)]
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaOutput {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default)]
    pub verdict: Verdict,
    #[serde(default)]
    pub violations: Vec<String>,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub commands_run: Vec<CommandResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannerOutput {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default)]
    pub artifact_content: String,
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default, deserialize_with = "resolution_or_none")]
    pub resolution: Option<Resolution>,
    #[serde(default)]
    pub guidance: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistillerOutput {
    #[serde(flatten)]
    pub envelope: Envelope,
    #[serde(default)]
    pub retro_content: String,
    #[serde(default)]
    pub proposed_lessons: Vec<String>,
}

/// Empty strings and nulls both mean "no resolution given".
fn resolution_or_none<'de, D>(deserializer: D) -> Result<Option<Resolution>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(match raw.as_deref().map(str::trim) {
        None | Some("") => None,
        Some("retry") => Some(Resolution::Retry),
        Some("human_needed") => Some(Resolution::HumanNeeded),
        Some(_) => Some(Resolution::Unrecognized),
    })
}

/// Token accounting reported alongside a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AgentOutput {
    Coder(CoderOutput),
    Qa(QaOutput),
    Planner(PlannerOutput),
    Distiller(DistillerOutput),
}

impl AgentOutput {
    pub fn envelope(&self) -> &Envelope {
        match self {
            AgentOutput::Coder(out) => &out.envelope,
            AgentOutput::Qa(out) => &out.envelope,
            AgentOutput::Planner(out) => &out.envelope,
            AgentOutput::Distiller(out) => &out.envelope,
        }
    }

    pub fn role(&self) -> AgentRole {
        match self {
            AgentOutput::Coder(_) => AgentRole::Coder,
            AgentOutput::Qa(_) => AgentRole::Qa,
            AgentOutput::Planner(_) => AgentRole::Planner,
            AgentOutput::Distiller(_) => AgentRole::Distiller,
        }
    }

    pub fn status(&self) -> AgentStatus {
        self.envelope().status
    }

    /// Degraded response used when an invocation cannot produce a usable result.
    pub fn blocked(role: AgentRole, summary: impl Into<String>) -> Self {
        let mut envelope = Envelope::new(role, AgentStatus::Blocked, summary);
        envelope.next_action = "escalate".to_string();
        match role {
            AgentRole::Coder => AgentOutput::Coder(CoderOutput {
                envelope,
                file_operations: Vec::new(),
                commands: Vec::new(),
            }),
            AgentRole::Qa => AgentOutput::Qa(QaOutput {
                envelope,
                verdict: Verdict::Blocked,
                violations: Vec::new(),
                notes: String::new(),
                commands_run: Vec::new(),
            }),
            AgentRole::Planner => AgentOutput::Planner(PlannerOutput {
                envelope,
                artifact_content: String::new(),
                decisions: Vec::new(),
                resolution: None,
                guidance: String::new(),
            }),
            AgentRole::Distiller => AgentOutput::Distiller(DistillerOutput {
                envelope,
                retro_content: String::new(),
                proposed_lessons: Vec::new(),
            }),
        }
    }

    /// Parse a JSON object as the variant for `role`.
    ///
    /// The envelope `role` is always overwritten with `role`, so a response
    /// that omits or misreports it still lands in the right variant.
    pub fn parse(role: AgentRole, mut value: Value) -> Result<Self, String> {
        let Some(object) = value.as_object_mut() else {
            return Err("agent response is not a JSON object".to_string());
        };
        object.insert("role".to_string(), Value::String(role.as_str().to_string()));
        let parsed = match role {
            AgentRole::Coder => serde_json::from_value(value).map(AgentOutput::Coder),
            AgentRole::Qa => serde_json::from_value(value).map(AgentOutput::Qa),
            AgentRole::Planner => serde_json::from_value(value).map(AgentOutput::Planner),
            AgentRole::Distiller => serde_json::from_value(value).map(AgentOutput::Distiller),
        };
        parsed.map_err(|err| format!("invalid {role} response: {err}"))
    }

    pub fn as_coder(&self) -> Option<&CoderOutput> {
        match self {
            AgentOutput::Coder(out) => Some(out),
            _ => None,
        }
    }

    pub fn as_qa(&self) -> Option<&QaOutput> {
        match self {
            AgentOutput::Qa(out) => Some(out),
            _ => None,
        }
    }

    pub fn as_planner(&self) -> Option<&PlannerOutput> {
        match self {
            AgentOutput::Planner(out) => Some(out),
            _ => None,
        }
    }

    pub fn as_distiller(&self) -> Option<&DistillerOutput> {
        match self {
            AgentOutput::Distiller(out) => Some(out),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_fills_role_from_request() {
        let output = AgentOutput::parse(
            AgentRole::Coder,
            json!({"status": "complete", "summary": "wrote main.rs", "commands": ["ls"]}),
        )
        .expect("parse");
        assert_eq!(output.role(), AgentRole::Coder);
        assert_eq!(output.envelope().role, AgentRole::Coder);
        assert_eq!(output.as_coder().expect("coder").commands, vec!["ls"]);
    }

    #[test]
    fn parse_overrides_misreported_role() {
        let output = AgentOutput::parse(
            AgentRole::Qa,
            json!({"role": "coder", "status": "passed", "summary": "ok", "verdict": "pass"}),
        )
        .expect("parse");
        let qa = output.as_qa().expect("qa");
        assert_eq!(qa.envelope.role, AgentRole::Qa);
        assert_eq!(qa.verdict, Verdict::Pass);
    }

    /// Unknown verdict strings and missing verdicts both degrade to `Unknown`.
    #[test]
    fn unknown_verdict_is_tolerated() {
        let output = AgentOutput::parse(
            AgentRole::Qa,
            json!({"status": "failed", "summary": "hmm", "verdict": "maybe"}),
        )
        .expect("parse");
        assert_eq!(output.as_qa().expect("qa").verdict, Verdict::Unknown);

        let output = AgentOutput::parse(AgentRole::Qa, json!({"status": "failed"})).expect("parse");
        assert_eq!(output.as_qa().expect("qa").verdict, Verdict::Unknown);
    }

    #[test]
    fn resolution_parsing_distinguishes_missing_and_unrecognized() {
        let parse = |resolution: Value| {
            AgentOutput::parse(
                AgentRole::Planner,
                json!({"status": "complete", "summary": "s", "resolution": resolution}),
            )
            .expect("parse")
            .as_planner()
            .expect("planner")
            .resolution
        };
        assert_eq!(parse(json!("retry")), Some(Resolution::Retry));
        assert_eq!(parse(json!("human_needed")), Some(Resolution::HumanNeeded));
        assert_eq!(parse(json!("")), None);
        assert_eq!(parse(Value::Null), None);
        assert_eq!(parse(json!("give_up")), Some(Resolution::Unrecognized));
    }

    #[test]
    fn parse_rejects_invalid_status() {
        let err = AgentOutput::parse(AgentRole::Coder, json!({"status": "done"})).unwrap_err();
        assert!(err.contains("invalid coder response"), "{err}");
    }

    #[test]
    fn parse_rejects_non_object() {
        let err = AgentOutput::parse(AgentRole::Coder, json!([1, 2])).unwrap_err();
        assert!(err.contains("not a JSON object"));
    }

    #[test]
    fn blocked_output_matches_role() {
        for role in [
            AgentRole::Planner,
            AgentRole::Coder,
            AgentRole::Qa,
            AgentRole::Distiller,
        ] {
            let output = AgentOutput::blocked(role, "gave up");
            assert_eq!(output.role(), role);
            assert_eq!(output.status(), AgentStatus::Blocked);
            assert_eq!(output.envelope().next_action, "escalate");
        }
    }
}
