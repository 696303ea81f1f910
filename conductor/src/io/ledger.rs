//! Run ledger: one immutable JSON file per agent invocation under `logs/runs/`.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::{debug, instrument, warn};

use crate::core::types::RunLog;

/// Upper bound on collision suffixes before giving up.
const MAX_COLLISION_SUFFIX: u32 = 1000;

/// Append-only store of [`RunLog`] records for one project.
#[derive(Debug, Clone)]
pub struct RunLedger {
    dir: PathBuf,
}

/// Records read back from disk plus the files that could not be read.
#[derive(Debug, Default)]
pub struct LedgerScan {
    pub logs: Vec<RunLog>,
    pub skipped: Vec<String>,
}

impl RunLedger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Base file stem: `{task_id}_{role}_{attempt}`, suffixed `_r{round}` after escalations.
    pub fn file_stem(log: &RunLog) -> String {
        let mut stem = format!("{}_{}_{}", log.task_id, log.role, log.attempt);
        if log.round > 0 {
            stem.push_str(&format!("_r{}", log.round));
        }
        stem
    }

    /// Write `log` to a fresh file. Existing records are never overwritten:
    /// a name collision gets a numeric suffix.
    #[instrument(skip_all, fields(task_id = %log.task_id, role = %log.role, attempt = log.attempt))]
    pub fn append(&self, log: &RunLog) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create ledger dir {}", self.dir.display()))?;
        let mut buf = serde_json::to_string_pretty(log).context("serialize run log")?;
        buf.push('\n');

        let stem = Self::file_stem(log);
        for suffix in 0..MAX_COLLISION_SUFFIX {
            let name = if suffix == 0 {
                format!("{stem}.json")
            } else {
                format!("{stem}-{suffix}.json")
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(buf.as_bytes())
                        .with_context(|| format!("write run log {}", path.display()))?;
                    debug!(path = %path.display(), "run log written");
                    return Ok(path);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => {
                    return Err(err).with_context(|| format!("create run log {}", path.display()));
                }
            }
        }
        bail!("too many run logs named {stem} in {}", self.dir.display())
    }

    /// Every readable record, sorted by (task, round, attempt, timestamp).
    ///
    /// Malformed files are skipped with a warning and listed in `skipped`.
    pub fn load_all(&self) -> Result<LedgerScan> {
        let mut scan = LedgerScan::default();
        if !self.dir.exists() {
            return Ok(scan);
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)
            .with_context(|| format!("read ledger dir {}", self.dir.display()))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        for path in paths {
            match read_log(&path) {
                Ok(log) => scan.logs.push(log),
                Err(err) => {
                    warn!(path = %path.display(), err = %format!("{err:#}"), "skipping malformed run log");
                    scan.skipped.push(path.display().to_string());
                }
            }
        }
        scan.logs.sort_by(|a, b| {
            (&a.task_id, a.round, a.attempt, a.timestamp).cmp(&(
                &b.task_id,
                b.round,
                b.attempt,
                b.timestamp,
            ))
        });
        Ok(scan)
    }

    /// Run history of one task in (round, attempt, timestamp) order.
    pub fn task_history(&self, task_id: &str) -> Result<Vec<RunLog>> {
        let scan = self.load_all()?;
        Ok(scan
            .logs
            .into_iter()
            .filter(|log| log.task_id == task_id)
            .collect())
    }
}

fn read_log(path: &Path) -> Result<RunLog> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}
