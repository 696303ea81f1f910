//! Project documents: spec, plan, task breakdown, retrospective and lessons.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use jsonschema::validator_for;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::core::invariants::{GraphNode, validate_task_graph};
use crate::core::types::Task;
use crate::io::agent::extract_json;
use crate::io::state_store::write_atomic;

const TASK_BREAKDOWN_SCHEMA: &str = include_str!("../../schemas/task_breakdown.schema.json");

/// Read a document, `None` when it does not exist or is blank.
pub fn read_artifact(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read artifact {}", path.display()))?;
    Ok((!contents.trim().is_empty()).then_some(contents))
}

pub fn write_artifact(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    write_atomic(path, contents)
}

#[derive(Debug, Deserialize)]
struct TaskEntry {
    id: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    acceptance_criteria: Vec<String>,
    #[serde(default)]
    order: Option<i64>,
    #[serde(default)]
    dependencies: Vec<String>,
}

/// Parse a task breakdown document into `new` tasks for `version`.
///
/// Accepts a JSON array or an object with a `tasks` array, optionally inside
/// a markdown fence. Missing `order` values follow list position (1-based).
#[instrument(skip_all, fields(version))]
pub fn parse_task_breakdown(text: &str, version: &str) -> Result<Vec<Task>> {
    let value = extract_json(text).map_err(|err| anyhow!("task breakdown: {err}"))?;
    let list = match value {
        Value::Array(_) => value,
        Value::Object(mut object) => object
            .remove("tasks")
            .ok_or_else(|| anyhow!("task breakdown object has no `tasks` array"))?,
        _ => bail!("task breakdown must be a JSON array of tasks"),
    };

    let schema: Value =
        serde_json::from_str(TASK_BREAKDOWN_SCHEMA).context("parse task breakdown schema")?;
    let validator = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {err}"))?;
    let messages: Vec<String> = validator.iter_errors(&list).map(|e| e.to_string()).collect();
    if !messages.is_empty() {
        bail!("task breakdown schema validation failed: {}", messages.join("; "));
    }

    let entries: Vec<TaskEntry> =
        serde_json::from_value(list).context("deserialize task breakdown")?;
    if entries.is_empty() {
        bail!("task breakdown contains no tasks");
    }

    let nodes: Vec<GraphNode<'_>> = entries
        .iter()
        .map(|entry| GraphNode {
            id: &entry.id,
            dependencies: &entry.dependencies,
        })
        .collect();
    let errors = validate_task_graph(&nodes);
    if !errors.is_empty() {
        bail!("task breakdown is invalid: {}", errors.join("; "));
    }

    let tasks: Vec<Task> = entries
        .into_iter()
        .enumerate()
        .map(|(idx, entry)| {
            let mut task = Task::new(entry.id, entry.title, version);
            task.description = entry.description;
            task.acceptance_criteria = entry.acceptance_criteria;
            task.order = entry.order.unwrap_or(idx as i64 + 1);
            task.dependencies = entry.dependencies;
            task
        })
        .collect();
    debug!(count = tasks.len(), "task breakdown parsed");
    Ok(tasks)
}

/// Canonical JSON form stored under `docs/tasks/`.
pub fn render_task_breakdown(tasks: &[Task]) -> Result<String> {
    let entries: Vec<Value> = tasks
        .iter()
        .map(|task| {
            serde_json::json!({
                "id": task.id,
                "title": task.title,
                "description": task.description,
                "acceptance_criteria": task.acceptance_criteria,
                "order": task.order,
                "dependencies": task.dependencies,
            })
        })
        .collect();
    let mut buf = serde_json::to_string_pretty(&entries)?;
    buf.push('\n');
    Ok(buf)
}

/// Lessons in `dir` as (name, body) pairs, sorted by file name.
pub fn read_lessons(dir: &Path) -> Result<Vec<(String, String)>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("read lessons dir {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "md"))
        .collect();
    paths.sort();

    let mut lessons = Vec::new();
    for path in paths {
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read lesson {}", path.display()))?;
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        lessons.push((name, contents.trim().to_string()));
    }
    Ok(lessons)
}

/// All lessons joined under `### name` headings, for prompts.
pub fn load_lessons(dir: &Path) -> Result<String> {
    let blocks: Vec<String> = read_lessons(dir)?
        .into_iter()
        .map(|(name, body)| format!("### {name}\n\n{body}"))
        .collect();
    Ok(blocks.join("\n\n"))
}

pub fn write_lesson(dir: &Path, name: &str, contents: &str) -> Result<PathBuf> {
    let path = dir.join(format!("{name}.md"));
    let mut body = contents.trim().to_string();
    body.push('\n');
    write_artifact(&path, &body)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TaskState;

    #[test]
    fn parses_array_and_defaults_order() {
        let text = r#"[
            {"id": "T1", "title": "first", "acceptance_criteria": ["a"]},
            {"id": "T2", "title": "second", "order": 7, "dependencies": ["T1"]}
        ]"#;
        let tasks = parse_task_breakdown(text, "v1").expect("parse");
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].order, 1);
        assert_eq!(tasks[1].order, 7);
        assert_eq!(tasks[1].dependencies, vec!["T1".to_string()]);
        assert!(tasks.iter().all(|t| t.state == TaskState::New && t.version == "v1"));
    }

    #[test]
    fn accepts_fenced_object_with_tasks_key() {
        let text = "Here is the breakdown:\n```json\n{\"tasks\": [{\"id\": \"A\", \"title\": \"a\"}]}\n```";
        let tasks = parse_task_breakdown(text, "v2").expect("parse");
        assert_eq!(tasks[0].id, "A");
    }

    #[test]
    fn rejects_cycles_unknown_dependencies_and_bad_shapes() {
        let cycle = r#"[{"id": "A", "title": "a", "dependencies": ["B"]},
                        {"id": "B", "title": "b", "dependencies": ["A"]}]"#;
        let err = parse_task_breakdown(cycle, "v1").expect_err("cycle");
        assert!(format!("{err:#}").contains("dependency cycle"));

        let unknown = r#"[{"id": "A", "title": "a", "dependencies": ["Z"]}]"#;
        let err = parse_task_breakdown(unknown, "v1").expect_err("unknown");
        assert!(format!("{err:#}").contains("unknown task 'Z'"));

        let missing_title = r#"[{"id": "A"}]"#;
        let err = parse_task_breakdown(missing_title, "v1").expect_err("schema");
        assert!(format!("{err:#}").contains("schema validation failed"));

        assert!(parse_task_breakdown("[]", "v1").is_err());
        assert!(parse_task_breakdown("\"just text\"", "v1").is_err());
    }

    #[test]
    fn lessons_are_sorted_and_joined() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_lesson(temp.path(), "b", "second").expect("write");
        write_lesson(temp.path(), "a", "first").expect("write");
        fs::write(temp.path().join("ignored.txt"), "x").expect("write");

        let lessons = load_lessons(temp.path()).expect("load");
        assert_eq!(lessons, "### a\n\nfirst\n\n### b\n\nsecond");
        assert_eq!(load_lessons(&temp.path().join("none")).expect("load"), "");
    }

    #[test]
    fn blank_artifacts_read_as_missing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("docs/spec/v1.md");
        assert_eq!(read_artifact(&path).expect("read"), None);
        write_artifact(&path, "  \n").expect("write");
        assert_eq!(read_artifact(&path).expect("read"), None);
        write_artifact(&path, "# Spec\n").expect("write");
        assert_eq!(read_artifact(&path).expect("read").as_deref(), Some("# Spec\n"));
    }
}
