//! Home and project layout, plus scaffolding for new projects.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::types::ProjectState;
use crate::io::process::run_command_with_timeout;
use crate::io::state_store::write_state;

const GIT_INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Directories created for every project, relative to its root.
pub const PROJECT_DIRS: &[&str] = &[
    "docs/brainstorm",
    "docs/spec",
    "docs/plans",
    "docs/tasks",
    "docs/decisions",
    "docs/retros",
    "logs/runs",
    "src",
];

const STARTER_PREFERENCES: &str = "\
# Project preferences for {project}.
# Deep-merged over the home preferences.toml; project values win.
# Keys prefixed with must_ in the home file are hard guardrails and cannot be overridden.

# [coding]
# style_guide = \"project-specific rules here\"

# [testing]
# prefer_integration_tests = true
";

/// Canonical paths under the conductor home directory.
#[derive(Debug, Clone)]
pub struct HomePaths {
    pub root: PathBuf,
    pub projects_dir: PathBuf,
    pub lessons_dir: PathBuf,
    pub config_path: PathBuf,
    pub preferences_path: PathBuf,
}

impl HomePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            projects_dir: root.join("projects"),
            lessons_dir: root.join("knowledge").join("lessons"),
            config_path: root.join("conductor.toml"),
            preferences_path: root.join("preferences.toml"),
            root,
        }
    }

    pub fn project(&self, name: &str) -> ProjectPaths {
        ProjectPaths::new(self.projects_dir.join(name))
    }
}

/// Canonical paths within one project directory.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub state_path: PathBuf,
    pub docs_dir: PathBuf,
    pub runs_dir: PathBuf,
    pub src_dir: PathBuf,
    pub preferences_path: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let docs_dir = root.join("docs");
        Self {
            state_path: root.join("state.json"),
            runs_dir: root.join("logs").join("runs"),
            src_dir: root.join("src"),
            preferences_path: root.join("preferences.toml"),
            docs_dir,
            root,
        }
    }

    pub fn brainstorm_path(&self, version: &str) -> PathBuf {
        self.docs_dir
            .join("brainstorm")
            .join(format!("{version}-notes.md"))
    }

    pub fn spec_path(&self, version: &str) -> PathBuf {
        self.docs_dir.join("spec").join(format!("{version}.md"))
    }

    pub fn plan_path(&self, version: &str) -> PathBuf {
        self.docs_dir.join("plans").join(format!("{version}.md"))
    }

    pub fn tasks_path(&self, version: &str) -> PathBuf {
        self.docs_dir
            .join("tasks")
            .join(format!("{version}.tasks.json"))
    }

    pub fn retro_path(&self, version: &str) -> PathBuf {
        self.docs_dir
            .join("retros")
            .join(format!("{version}-retro.md"))
    }

    pub fn exists(&self) -> bool {
        self.state_path.is_file()
    }
}

/// Project names become directory names, so keep them to a safe alphabet.
pub fn validate_project_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !valid {
        return Err(anyhow!(
            "invalid project name '{name}' (use letters, digits, '-', '_' or '.')"
        ));
    }
    Ok(())
}

/// Create the project directory tree, starter preferences and initial state.
///
/// Refuses to touch a directory that already exists. The project root also
/// becomes a git repository when `git` is available.
#[instrument(skip_all, fields(project = name, version))]
pub fn init_project(home: &HomePaths, name: &str, version: &str) -> Result<ProjectState> {
    validate_project_name(name)?;
    let paths = home.project(name);
    if paths.root.exists() {
        return Err(anyhow!(
            "project '{name}' already exists at {}",
            paths.root.display()
        ));
    }
    for dir in PROJECT_DIRS {
        let path = paths.root.join(dir);
        fs::create_dir_all(&path).with_context(|| format!("create {}", path.display()))?;
    }
    write_if_missing(
        &paths.preferences_path,
        &STARTER_PREFERENCES.replace("{project}", name),
    )?;
    let state = ProjectState::new(name, version);
    write_state(&paths.state_path, &state)?;
    init_repository("git", &paths.root);
    debug!(root = %paths.root.display(), "project initialized");
    Ok(state)
}

/// Run `<program> init` in `root`. Failure is logged and otherwise ignored.
fn init_repository(program: &str, root: &Path) -> bool {
    let mut cmd = Command::new(program);
    cmd.arg("init").arg("--quiet").current_dir(root);
    match run_command_with_timeout(cmd, None, GIT_INIT_TIMEOUT, 4096) {
        Ok(output) if output.status.success() => {
            debug!(root = %root.display(), "initialized repository");
            true
        }
        Ok(output) => {
            warn!(
                root = %root.display(),
                stderr = %output.stderr_text().trim(),
                "repository init failed; continuing without version control"
            );
            false
        }
        Err(err) => {
            warn!(
                root = %root.display(),
                err = %format!("{err:#}"),
                "could not run {program}; continuing without version control"
            );
            false
        }
    }
}

fn write_if_missing(path: &Path, contents: &str) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}
