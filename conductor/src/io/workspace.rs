//! Workspace operations against a project's source tree.
//!
//! The [`Workspace`] trait is the seam between the attempt loop and the
//! filesystem/shell. [`LocalWorkspace`] applies changes under
//! `projects/{name}/src` and runs commands through `sh -c`; tests use a
//! scripted workspace instead.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, instrument, warn};
use walkdir::{DirEntry, WalkDir};

use crate::core::digest::{head, tail};
use crate::core::types::{CommandResult, FileAction, FileOperation};
use crate::io::process::run_command_with_timeout;

/// Directory names never shown to agents.
pub const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "dist",
    ".next",
    "__pycache__",
    ".venv",
    ".cache",
];

/// File extensions whose contents are handed to the builder.
pub const SOURCE_EXTENSIONS: &[&str] = &[
    "js", "jsx", "ts", "tsx", "vue", "svelte", "py", "go", "rs", "html", "css", "scss", "json",
    "yaml", "yml", "toml", "md",
];

const EMPTY_TREE: &str = "(empty, no files yet)";

/// Line prefixes that introduce an import in the languages we scan.
const IMPORT_PREFIXES: &[&str] = &["import ", "from ", "use ", "export "];

/// Result of applying file operations. Per-operation problems never abort the batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Paths created, rewritten or deleted, in operation order.
    pub touched: Vec<String>,
    /// Operations that were refused or failed.
    pub errors: Vec<String>,
}

/// Side effects the attempt loop needs from a project workspace.
pub trait Workspace {
    /// Apply create/edit/delete operations relative to the source root.
    fn apply(&self, operations: &[FileOperation]) -> ApplyReport;
    /// Run each command in order. Failures and timeouts become results, never errors.
    fn run(&self, commands: &[String]) -> Vec<CommandResult>;
    /// Build/lint commands inferred from the project's manifest files.
    fn detect_build_commands(&self) -> Vec<String>;
    /// Indented listing of the source tree.
    fn file_tree(&self) -> String;
    /// Existing file contents, capped at `budget` characters in total.
    fn read_sources(&self, budget: usize) -> String;
    /// For each source file, the files importing it and their import lines.
    /// Empty when nothing imports anything.
    fn dependents_map(&self) -> String;
}

/// Workspace rooted at a directory on the local disk.
#[derive(Debug, Clone)]
pub struct LocalWorkspace {
    root: PathBuf,
    timeout: Duration,
    tail_chars: usize,
}

impl LocalWorkspace {
    pub fn new(root: impl Into<PathBuf>, timeout: Duration, tail_chars: usize) -> Self {
        Self {
            root: root.into(),
            timeout,
            tail_chars,
        }
    }

    fn run_one(&self, command: &str) -> CommandResult {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(&self.root);
        match run_command_with_timeout(cmd, None, self.timeout, self.tail_chars.saturating_mul(4)) {
            Ok(output) if output.timed_out => CommandResult {
                command: command.to_string(),
                exit_code: -1,
                stdout: tail(&output.stdout_text(), self.tail_chars).to_string(),
                stderr: format!(
                    "Command timed out after {} seconds",
                    self.timeout.as_secs()
                ),
            },
            Ok(output) => CommandResult {
                command: command.to_string(),
                exit_code: output.status.code().unwrap_or(-1),
                stdout: tail(&output.stdout_text(), self.tail_chars).to_string(),
                stderr: tail(&output.stderr_text(), self.tail_chars).to_string(),
            },
            Err(err) => CommandResult {
                command: command.to_string(),
                exit_code: -1,
                stdout: String::new(),
                stderr: format!("failed to run command: {err:#}"),
            },
        }
    }
}

/// `line` names `stem` as a whole word, e.g. `./util` or `util::f` but not `utility`.
fn mentions_stem(line: &str, stem: &str) -> bool {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    line.match_indices(stem).any(|(at, _)| {
        let before = line[..at].chars().next_back();
        let after = line[at + stem.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}

fn is_import_line(line: &str) -> bool {
    IMPORT_PREFIXES.iter().any(|prefix| line.starts_with(prefix)) || line.contains("require(")
}

/// Relative, non-empty and free of `..`: the only paths an agent may touch.
pub fn safe_relative_path(path: &str) -> Option<PathBuf> {
    let candidate = Path::new(path);
    if path.trim().is_empty() {
        return None;
    }
    let mut clean = PathBuf::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!clean.as_os_str().is_empty()).then_some(clean)
}

fn is_skipped(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| SKIP_DIRS.contains(&name) || name == ".DS_Store")
}

fn walk(root: &Path) -> impl Iterator<Item = DirEntry> {
    WalkDir::new(root)
        .sort_by(|a, b| {
            let a_file = !a.file_type().is_dir();
            let b_file = !b.file_type().is_dir();
            (a_file, a.file_name()).cmp(&(b_file, b.file_name()))
        })
        .into_iter()
        .filter_entry(|entry| !is_skipped(entry))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(err = %err, "skipping unreadable path");
                None
            }
        })
}

impl Workspace for LocalWorkspace {
    #[instrument(skip_all, fields(root = %self.root.display(), operations = operations.len()))]
    fn apply(&self, operations: &[FileOperation]) -> ApplyReport {
        let mut report = ApplyReport::default();
        for op in operations {
            let Some(relative) = safe_relative_path(&op.path) else {
                warn!(path = %op.path, "refusing path outside the workspace");
                report
                    .errors
                    .push(format!("refused path outside the workspace: {}", op.path));
                continue;
            };
            let target = self.root.join(&relative);
            let outcome = match op.action {
                FileAction::Create | FileAction::Edit => {
                    let written = match target.parent() {
                        Some(parent) => fs::create_dir_all(parent),
                        None => Ok(()),
                    }
                    .and_then(|()| fs::write(&target, &op.content));
                    written.map(|()| true)
                }
                FileAction::Delete if target.is_file() => fs::remove_file(&target).map(|()| true),
                FileAction::Delete => {
                    debug!(path = %op.path, "skip delete, not found");
                    Ok(false)
                }
            };
            match outcome {
                Ok(true) => report.touched.push(op.path.clone()),
                Ok(false) => {}
                Err(err) => {
                    warn!(path = %op.path, err = %err, "file operation failed");
                    report.errors.push(format!("{}: {err}", op.path));
                }
            }
        }
        report
    }

    #[instrument(skip_all, fields(root = %self.root.display(), commands = commands.len()))]
    fn run(&self, commands: &[String]) -> Vec<CommandResult> {
        if let Err(err) = fs::create_dir_all(&self.root) {
            warn!(err = %err, "could not create workspace root");
        }
        commands
            .iter()
            .map(|command| {
                let result = self.run_one(command);
                debug!(command = %command, exit_code = result.exit_code, "command finished");
                result
            })
            .collect()
    }

    fn detect_build_commands(&self) -> Vec<String> {
        let package_json = self.root.join("package.json");
        if package_json.is_file() {
            let scripts = fs::read_to_string(&package_json)
                .ok()
                .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
                .and_then(|value| value.get("scripts").cloned());
            let mut commands = Vec::new();
            if let Some(scripts) = scripts {
                if scripts.get("build").is_some() {
                    commands.push("npm run build".to_string());
                }
                if scripts.get("lint").is_some() {
                    commands.push("npm run lint".to_string());
                }
            }
            if commands.is_empty() {
                commands.push("npm run build".to_string());
            }
            return commands;
        }
        if self.root.join("Cargo.toml").is_file() {
            return vec!["cargo build".to_string()];
        }
        if self.root.join("pyproject.toml").is_file() || self.root.join("setup.py").is_file() {
            return vec!["python -m compileall -q .".to_string()];
        }
        if self.root.join("go.mod").is_file() {
            return vec!["go build ./...".to_string()];
        }
        Vec::new()
    }

    fn file_tree(&self) -> String {
        if !self.root.is_dir() {
            return EMPTY_TREE.to_string();
        }
        let lines: Vec<String> = walk(&self.root)
            .filter(|entry| entry.depth() > 0)
            .map(|entry| {
                let indent = "  ".repeat(entry.depth() - 1);
                let name = entry.file_name().to_string_lossy();
                if entry.file_type().is_dir() {
                    format!("{indent}{name}/")
                } else {
                    format!("{indent}{name}")
                }
            })
            .collect();
        if lines.is_empty() {
            EMPTY_TREE.to_string()
        } else {
            lines.join("\n")
        }
    }

    fn read_sources(&self, budget: usize) -> String {
        if !self.root.is_dir() {
            return String::new();
        }
        let mut files: Vec<(String, String)> = Vec::new();
        let mut used = 0usize;
        let mut sources: Vec<DirEntry> = walk(&self.root)
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext))
            })
            .collect();
        sources.sort_by(|a, b| a.path().cmp(b.path()));

        for entry in sources {
            let Ok(bytes) = fs::read(entry.path()) else {
                continue;
            };
            let content = String::from_utf8_lossy(&bytes).into_owned();
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path())
                .display()
                .to_string();
            let size = content.chars().count();
            if used + size > budget {
                let remaining = budget.saturating_sub(used);
                if remaining > 200 {
                    files.push((relative, format!("{}\n... (truncated)", head(&content, remaining))));
                }
                break;
            }
            used += size;
            files.push((relative, content));
        }

        if files.is_empty() {
            return String::new();
        }
        let mut parts = vec![
            "## Existing File Contents".to_string(),
            String::new(),
            "Below are the current contents of the project files. When editing a file, \
             start from this content; do not rewrite files from scratch unless the task requires it."
                .to_string(),
            String::new(),
        ];
        for (path, content) in files {
            parts.push(format!("### {path}\n```\n{content}\n```\n"));
        }
        parts.join("\n")
    }

    #[instrument(skip_all, fields(root = %self.root.display()))]
    fn dependents_map(&self) -> String {
        if !self.root.is_dir() {
            return String::new();
        }
        let sources: Vec<(String, String, String)> = walk(&self.root)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let path = entry.path();
                let ext = path.extension()?.to_str()?;
                if !SOURCE_EXTENSIONS.contains(&ext) {
                    return None;
                }
                let stem = path.file_stem()?.to_str()?.to_string();
                let relative = path.strip_prefix(&self.root).ok()?.display().to_string();
                let content = fs::read_to_string(path).ok()?;
                Some((relative, stem, content))
            })
            .collect();

        let mut dependents: BTreeMap<&str, BTreeSet<(&str, &str)>> = BTreeMap::new();
        for (importer, _, content) in &sources {
            for line in content.lines().map(str::trim).filter(|line| is_import_line(line)) {
                for (target, stem, _) in &sources {
                    if target != importer && mentions_stem(line, stem) {
                        dependents
                            .entry(target.as_str())
                            .or_default()
                            .insert((importer.as_str(), line));
                    }
                }
            }
        }
        if dependents.is_empty() {
            return String::new();
        }
        debug!(targets = dependents.len(), "import map built");

        let mut lines = vec![
            "## Import Dependency Map".to_string(),
            String::new(),
            "If you change a file listed below, keep the names its importers use. \
             If you rename or remove one, update every importer in the same set of file operations."
                .to_string(),
            String::new(),
        ];
        for (target, importers) in dependents {
            lines.push(format!("### {target}"));
            for (importer, line) in importers {
                lines.push(format!("  - `{importer}`: `{line}`"));
            }
            lines.push(String::new());
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace(root: &Path) -> LocalWorkspace {
        LocalWorkspace::new(root, Duration::from_secs(10), 2000)
    }

    fn op(action: FileAction, path: &str, content: &str) -> FileOperation {
        FileOperation {
            action,
            path: path.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn apply_creates_edits_and_deletes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = workspace(temp.path());
        let report = ws.apply(&[
            op(FileAction::Create, "src/lib.rs", "pub fn a() {}"),
            op(FileAction::Create, "old.txt", "bye"),
        ]);
        assert_eq!(report.touched, vec!["src/lib.rs", "old.txt"]);

        let report = ws.apply(&[
            op(FileAction::Edit, "src/lib.rs", "pub fn b() {}"),
            op(FileAction::Delete, "old.txt", ""),
            op(FileAction::Delete, "never-existed.txt", ""),
        ]);
        assert_eq!(report.touched, vec!["src/lib.rs", "old.txt"]);
        assert!(report.errors.is_empty());
        assert_eq!(
            fs::read_to_string(temp.path().join("src/lib.rs")).expect("read"),
            "pub fn b() {}"
        );
        assert!(!temp.path().join("old.txt").exists());
    }

    #[test]
    fn apply_refuses_escaping_paths() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().join("src");
        let ws = workspace(&root);
        let report = ws.apply(&[
            op(FileAction::Create, "../escape.txt", "x"),
            op(FileAction::Create, "/etc/evil", "x"),
        ]);
        assert!(report.touched.is_empty());
        assert_eq!(report.errors.len(), 2);
        assert!(!temp.path().join("escape.txt").exists());
    }

    #[test]
    fn safe_paths_are_normalized() {
        assert_eq!(safe_relative_path("./a/b.rs"), Some(PathBuf::from("a/b.rs")));
        assert_eq!(safe_relative_path("a/../b"), None);
        assert_eq!(safe_relative_path(""), None);
        assert_eq!(safe_relative_path("."), None);
    }

    #[cfg(unix)]
    #[test]
    fn run_reports_failures_without_erroring() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = workspace(temp.path());
        let results = ws.run(&["echo hi".to_string(), "echo bad >&2; exit 4".to_string()]);
        assert_eq!(results[0].exit_code, 0);
        assert_eq!(results[0].stdout, "hi\n");
        assert_eq!(results[1].exit_code, 4);
        assert_eq!(results[1].stderr, "bad\n");
    }

    #[cfg(unix)]
    #[test]
    fn run_turns_timeouts_into_results() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = LocalWorkspace::new(temp.path(), Duration::from_secs(1), 2000);
        let results = ws.run(&["exec sleep 5".to_string()]);
        assert_eq!(results[0].exit_code, -1);
        assert_eq!(results[0].stderr, "Command timed out after 1 seconds");
    }

    #[test]
    fn detects_build_commands_from_manifests() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = workspace(temp.path());
        assert!(ws.detect_build_commands().is_empty());

        fs::write(temp.path().join("Cargo.toml"), "[package]").expect("write");
        assert_eq!(ws.detect_build_commands(), vec!["cargo build"]);

        fs::write(
            temp.path().join("package.json"),
            r#"{"scripts": {"lint": "eslint .", "build": "vite build"}}"#,
        )
        .expect("write");
        assert_eq!(
            ws.detect_build_commands(),
            vec!["npm run build", "npm run lint"]
        );

        fs::write(temp.path().join("package.json"), "not json").expect("write");
        assert_eq!(ws.detect_build_commands(), vec!["npm run build"]);
    }

    #[test]
    fn file_tree_lists_dirs_first_and_skips_noise() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = workspace(temp.path());
        assert_eq!(ws.file_tree(), EMPTY_TREE);

        fs::create_dir_all(temp.path().join("src")).expect("mkdir");
        fs::create_dir_all(temp.path().join("node_modules/pkg")).expect("mkdir");
        fs::write(temp.path().join("src/main.rs"), "fn main() {}").expect("write");
        fs::write(temp.path().join("README.md"), "hi").expect("write");
        assert_eq!(ws.file_tree(), "src/\n  main.rs\nREADME.md");
    }

    #[test]
    fn read_sources_respects_budget() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = workspace(temp.path());
        fs::write(temp.path().join("a.rs"), "a".repeat(300)).expect("write");
        fs::write(temp.path().join("b.rs"), "b".repeat(300)).expect("write");
        fs::write(temp.path().join("image.png"), "binary").expect("write");

        let all = ws.read_sources(10_000);
        assert!(all.contains("### a.rs"));
        assert!(all.contains("### b.rs"));
        assert!(!all.contains("image.png"));

        let partial = ws.read_sources(550);
        assert!(partial.contains("### a.rs"));
        assert!(partial.contains("... (truncated)"));

        let tight = ws.read_sources(350);
        assert!(tight.contains("### a.rs"));
        assert!(!tight.contains("### b.rs"));
    }

    #[test]
    fn dependents_map_lists_importers_with_their_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = workspace(temp.path());
        assert_eq!(ws.dependents_map(), "");

        fs::create_dir_all(temp.path().join("src/lib")).expect("mkdir");
        fs::write(
            temp.path().join("src/lib/api.ts"),
            "export function load() {}\n",
        )
        .expect("write");
        fs::write(
            temp.path().join("src/App.tsx"),
            "import { load } from './lib/api';\nimport { hive } from './apiary';\nimport React from 'react';\nconst api = 1;\n",
        )
        .expect("write");
        fs::write(
            temp.path().join("src/apiary.ts"),
            "export const hive = [];\n",
        )
        .expect("write");
        fs::write(temp.path().join("main.py"), "from helpers import clean\n").expect("write");
        fs::write(temp.path().join("helpers.py"), "def clean(): pass\n").expect("write");

        let map = ws.dependents_map();
        assert!(map.starts_with("## Import Dependency Map"));
        assert!(map.contains("### src/lib/api.ts\n  - `src/App.tsx`: `import { load } from './lib/api';`"));
        assert!(map.contains("### helpers.py\n  - `main.py`: `from helpers import clean`"));
        assert!(map.contains("### src/apiary.ts\n  - `src/App.tsx`: `import { hive } from './apiary';`"));
        assert_eq!(map.matches("import { hive }").count(), 1);
        assert!(!map.contains("const api = 1"));
    }

    #[test]
    fn dependents_map_is_empty_without_imports() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = workspace(temp.path());
        fs::write(temp.path().join("a.rs"), "fn a() {}\n").expect("write");
        fs::write(temp.path().join("b.rs"), "fn b() {}\n").expect("write");
        assert_eq!(ws.dependents_map(), "");
    }
}
