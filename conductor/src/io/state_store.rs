//! Project state storage (`projects/{name}/state.json`).
//!
//! The whole aggregate is rewritten on every save; writes go through a temp
//! file and a rename so a crash never leaves a half-written document.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::core::invariants::validate_invariants;
use crate::core::types::ProjectState;

/// Load project state and check its invariants.
pub fn load_state(path: &Path) -> Result<ProjectState> {
    debug!(path = %path.display(), "loading project state");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read state {}", path.display()))?;
    let state: ProjectState = serde_json::from_str(&contents)
        .with_context(|| format!("parse state {}", path.display()))?;
    let errors = validate_invariants(&state);
    if !errors.is_empty() {
        bail!(
            "invariant violations in {}:\n- {}",
            path.display(),
            errors.join("\n- ")
        );
    }
    debug!(
        project = %state.project_name,
        phase = %state.phase,
        tasks = state.tasks.len(),
        "project state loaded"
    );
    Ok(state)
}

/// Atomically write project state to disk (temp file + rename).
pub fn write_state(path: &Path, state: &ProjectState) -> Result<()> {
    debug!(path = %path.display(), phase = %state.phase, "writing project state");
    let mut buf = serde_json::to_string_pretty(state).context("serialize project state")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path
        .file_name()
        .with_context(|| format!("path missing file name {}", path.display()))?
        .to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TaskState;
    use crate::test_support::{executing_project, task};

    /// Verifies write -> read preserves all fields.
    #[test]
    fn state_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        let mut state = executing_project(vec![
            task("T1", 1, TaskState::Done, &[]),
            task("T2", 2, TaskState::Ready, &["T1"]),
        ]);
        state.task_mut("T2").expect("T2").acceptance_criteria = vec!["works".to_string()];

        write_state(&path, &state).expect("write");
        assert_eq!(load_state(&path).expect("load"), state);
        assert!(!temp.path().join("state.json.tmp").exists());
    }

    #[test]
    fn enum_spellings_are_snake_case() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        let state = executing_project(vec![task("T1", 1, TaskState::InProgress, &[])]);
        write_state(&path, &state).expect("write");
        let raw = fs::read_to_string(&path).expect("read");
        assert!(raw.contains("\"phase\": \"executing\""));
        assert!(raw.contains("\"state\": \"in_progress\""));
    }

    /// A document violating invariants is rejected on load.
    #[test]
    fn load_rejects_invariant_violations() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("state.json");
        let mut state = executing_project(vec![task("T1", 1, TaskState::Ready, &["T9"])]);
        state.tasks_approved = false;
        write_state(&path, &state).expect("write");
        let err = load_state(&path).unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("requires tasks_approved"), "{message}");
        assert!(message.contains("unknown task 'T9'"), "{message}");
    }

    #[test]
    fn load_missing_file_fails_with_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = load_state(&temp.path().join("missing.json")).unwrap_err();
        assert!(format!("{err:#}").contains("missing.json"));
    }
}
