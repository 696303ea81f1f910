//! Retrospective pass over a completed project.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use tracing::{info, instrument};

use crate::core::digest::retro_context;
use crate::core::types::{AgentRole, AgentStatus, ProjectState};
use crate::engine::{Engine, LogSlot};
use crate::io::agent::AgentInvoker;
use crate::io::artifacts::{read_lessons, write_artifact, write_lesson};
use crate::io::prompt::{PromptInputs, PromptKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetroReport {
    pub retro_path: PathBuf,
    pub lessons: Vec<PathBuf>,
}

/// Ask the distiller for a retrospective and store it with its lessons.
///
/// The retro lands in `docs/retros/{version}-retro.md`; each proposed lesson
/// becomes `{lessons_dir}/{project}-{version}-{n}.md`.
#[instrument(skip_all, fields(project = %state.project_name, version = %state.version))]
pub fn run_retrospective<A: AgentInvoker>(
    engine: &Engine<'_, A>,
    state: &ProjectState,
    lessons_dir: &Path,
) -> Result<RetroReport> {
    let logs = engine.ledger.load_all()?.logs;
    let existing: Vec<String> = read_lessons(lessons_dir)?
        .into_iter()
        .map(|(_, body)| body)
        .collect();
    let context = retro_context(state, &logs, &existing);
    let spec = engine.spec(state)?;
    let plan = engine.plan(state)?;
    let prompt = engine.prompts.compose(
        PromptKind::Distiller,
        &PromptInputs {
            project: &state.project_name,
            version: &state.version,
            spec: &spec,
            plan: &plan,
            extra_context: &context,
            ..PromptInputs::default()
        },
    )?;

    let retro_id = format!("{}-retro", state.version);
    let call = engine.call_agent(AgentRole::Distiller, prompt, &retro_id);
    engine.record(
        &call,
        LogSlot {
            task_id: &retro_id,
            attempt: 0,
            round: 0,
        },
        Vec::new(),
    )?;
    let Some(distiller) = call
        .output
        .as_distiller()
        .filter(|out| out.envelope.status != AgentStatus::Blocked)
    else {
        bail!(
            "distiller could not write the retrospective: {}",
            call.output.envelope().summary
        );
    };

    let body = if distiller.retro_content.trim().is_empty() {
        distiller.envelope.summary.clone()
    } else {
        distiller.retro_content.clone()
    };
    let retro_path = engine.paths.retro_path(&state.version);
    write_artifact(&retro_path, &format!("{}\n", body.trim_end()))?;

    let mut lessons = Vec::new();
    for lesson in distiller
        .proposed_lessons
        .iter()
        .filter(|lesson| !lesson.trim().is_empty())
    {
        let name = format!(
            "{}-{}-{}",
            state.project_name,
            state.version,
            lessons.len() + 1
        );
        lessons.push(write_lesson(lessons_dir, &name, lesson)?);
    }
    info!(lessons = lessons.len(), path = %retro_path.display(), "retrospective written");
    Ok(RetroReport {
        retro_path,
        lessons,
    })
}
