//! Home and project preferences (`preferences.toml`).
//!
//! Project preferences are deep-merged over the home file. Keys prefixed with
//! `must_` in the home file are guardrails: a project may repeat them but not
//! change their value.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use toml::{Table, Value};
use tracing::debug;

/// Parse a preferences file; a missing file is an empty table.
pub fn load_preferences(path: &Path) -> Result<Table> {
    if !path.exists() {
        return Ok(Table::new());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    contents
        .parse::<Table>()
        .with_context(|| format!("parse {}", path.display()))
}

/// `{ value = ..., description = ... }` compares by `value`.
fn effective_value(value: &Value) -> &Value {
    match value {
        Value::Table(table) => table.get("value").unwrap_or(value),
        other => other,
    }
}

/// Dotted keys of `must_*` entries in `base` that `overlay` changes.
pub fn find_must_conflicts(base: &Table, overlay: &Table) -> Vec<String> {
    let mut conflicts = Vec::new();
    collect_conflicts(base, overlay, "", &mut conflicts);
    conflicts
}

fn collect_conflicts(base: &Table, overlay: &Table, prefix: &str, out: &mut Vec<String>) {
    for (key, value) in base {
        let full_key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        let Some(other) = overlay.get(key) else {
            continue;
        };
        if key.starts_with("must_") {
            if effective_value(value) != effective_value(other) {
                out.push(full_key);
            }
        } else if let (Value::Table(inner), Value::Table(other_inner)) = (value, other) {
            collect_conflicts(inner, other_inner, &full_key, out);
        }
    }
}

/// Deep merge, `overlay` wins on scalars and arrays.
pub fn deep_merge(base: &Table, overlay: &Table) -> Table {
    let mut merged = base.clone();
    for (key, value) in overlay {
        let combined = match (merged.get(key), value) {
            (Some(Value::Table(existing)), Value::Table(incoming)) => {
                Value::Table(deep_merge(existing, incoming))
            }
            _ => value.clone(),
        };
        merged.insert(key.clone(), combined);
    }
    merged
}

/// Merge home and project preferences, refusing `must_*` overrides.
pub fn merge_preferences(home_path: &Path, project_path: &Path) -> Result<Table> {
    let home = load_preferences(home_path)?;
    let project = load_preferences(project_path)?;
    let conflicts = find_must_conflicts(&home, &project);
    if !conflicts.is_empty() {
        bail!(
            "project preferences conflict with must_* rules: {}; these require human resolution",
            conflicts.join(", ")
        );
    }
    let merged = deep_merge(&home, &project);
    debug!(keys = merged.len(), "preferences merged");
    Ok(merged)
}

/// Render merged preferences for inclusion in prompts.
pub fn render_preferences(preferences: &Table) -> Result<String> {
    if preferences.is_empty() {
        return Ok(String::new());
    }
    toml::to_string_pretty(preferences).context("serialize preferences")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(raw: &str) -> Table {
        raw.parse::<Table>().expect("toml")
    }

    #[test]
    fn project_wins_in_deep_merge() {
        let base = table("[coding]\nstyle = \"pep8\"\nline = 100\n[testing]\nfast = true\n");
        let overlay = table("[coding]\nline = 120\n");
        let merged = deep_merge(&base, &overlay);
        assert_eq!(merged["coding"]["style"].as_str(), Some("pep8"));
        assert_eq!(merged["coding"]["line"].as_integer(), Some(120));
        assert_eq!(merged["testing"]["fast"].as_bool(), Some(true));
    }

    #[test]
    fn must_override_is_a_conflict() {
        let base = table("[security]\nmust_use_tls = true\nlevel = 1\n");
        let overlay = table("[security]\nmust_use_tls = false\nlevel = 2\n");
        assert_eq!(find_must_conflicts(&base, &overlay), vec!["security.must_use_tls"]);
    }

    #[test]
    fn repeating_a_must_value_is_fine() {
        let base = table("must_lint = true\n");
        let overlay = table("must_lint = true\n");
        assert!(find_must_conflicts(&base, &overlay).is_empty());
    }

    #[test]
    fn structured_preferences_compare_by_value() {
        let base = table("[must_license]\nvalue = \"MIT\"\ndescription = \"house rule\"\n");
        let overlay = table("must_license = \"MIT\"\n");
        assert!(find_must_conflicts(&base, &overlay).is_empty());

        let overlay = table("must_license = \"GPL\"\n");
        assert_eq!(find_must_conflicts(&base, &overlay), vec!["must_license"]);
    }

    #[test]
    fn merge_preferences_reports_conflicts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let home = temp.path().join("home.toml");
        let project = temp.path().join("project.toml");
        fs::write(&home, "must_tests = true\n").expect("write");
        fs::write(&project, "must_tests = false\n").expect("write");
        let err = merge_preferences(&home, &project).unwrap_err();
        assert!(err.to_string().contains("must_tests"));
    }

    #[test]
    fn missing_files_merge_to_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let merged =
            merge_preferences(&temp.path().join("a.toml"), &temp.path().join("b.toml")).expect("merge");
        assert!(merged.is_empty());
        assert_eq!(render_preferences(&merged).expect("render"), "");
    }
}
