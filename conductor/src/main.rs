//! `conductor`: drive a project from brainstorm to completion with agents.
//!
//! Project state lives under `{home}/projects/{name}/state.json`; the home
//! defaults to the current directory.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};

use conductor::commands::{CommandError, Conductor};
use conductor::core::types::Task;
use conductor::escalation::TaskOutcome;
use conductor::exit_codes;
use conductor::io::agent::CommandInvoker;
use conductor::io::workspace::LocalWorkspace;
use conductor::logging;
use conductor::pipeline::PipelineStop;
use conductor::reporter::ConsoleReporter;
use conductor::status::render;

#[derive(Parser)]
#[command(
    name = "conductor",
    version,
    about = "Phase and task orchestration for agent-driven projects"
)]
struct Cli {
    /// Conductor home holding `conductor.toml`, `projects/` and `knowledge/`.
    #[arg(long, global = true, env = "CONDUCTOR_HOME", default_value = ".")]
    home: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a project in the brainstorm phase.
    New {
        project: String,
        #[arg(long, default_value = "v1")]
        version: String,
    },
    /// Approve the current phase and advance to the next one.
    Approve {
        project: String,
        /// Document to store for this step (brainstorm notes, spec or plan).
        #[arg(long)]
        artifact: Option<PathBuf>,
    },
    /// Generate tasks from the approved spec and plan.
    Tasks {
        project: String,
        /// Read the task breakdown JSON from a file instead of asking the planner.
        #[arg(long)]
        from: Option<PathBuf>,
    },
    /// Run every eligible task in dependency order.
    Run {
        project: String,
        /// Do not ask for confirmation between tasks.
        #[arg(short, long)]
        yes: bool,
    },
    /// Run one task by id; a blocked task is reset first.
    Task { project: String, task_id: String },
    /// Show phase, tasks and escalations.
    Status {
        project: String,
        #[arg(long)]
        json: bool,
    },
    /// Write the retrospective for a completed project.
    Retro { project: String },
}

fn main() {
    logging::init();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Usage errors share the generic failure code; help and version succeed.
            let code = if err.use_stderr() {
                exit_codes::INVALID
            } else {
                exit_codes::OK
            };
            let _ = err.print();
            process::exit(code);
        }
    };
    if let Err(err) = run(cli) {
        eprintln!("error: {err:#}");
        process::exit(err.exit_code());
    }
}

fn run(cli: Cli) -> Result<(), CommandError> {
    let reporter = ConsoleReporter;
    let conductor = Conductor::open(&cli.home, &reporter)?;
    let invoker = |workdir: &Path| {
        CommandInvoker::new(
            conductor.config.agent.clone(),
            conductor.config.engine.command_timeout(),
            workdir,
        )
    };
    let workspace = |project: &str| {
        LocalWorkspace::new(
            conductor.project_paths(project).src_dir,
            conductor.config.engine.command_timeout(),
            conductor.config.engine.output_tail_bytes,
        )
    };

    match cli.command {
        Command::New { project, version } => {
            conductor.create_project(&project, &version)?;
        }
        Command::Approve { project, artifact } => {
            let phase = conductor.approve_phase(&project, artifact.as_deref())?;
            println!("{project} is now in phase {phase}");
        }
        Command::Tasks { project, from } => {
            let root = conductor.project_paths(&project).root;
            let tasks = conductor.generate_tasks(&project, from.as_deref(), &invoker(&root))?;
            for task in tasks {
                println!("  {:<12} {}", task.id, task.title);
            }
        }
        Command::Run { project, yes } => {
            let workspace = workspace(&project);
            let invoker = invoker(&conductor.project_paths(&project).root);
            let report = conductor.run_all(&project, &invoker, &workspace, |next| {
                yes || confirm(next)
            })?;
            print_stop(&report.stop);
            if let Some(retro) = report.retro {
                println!("retrospective: {}", retro.retro_path.display());
            }
        }
        Command::Task { project, task_id } => {
            let workspace = workspace(&project);
            let invoker = invoker(&conductor.project_paths(&project).root);
            let outcome = conductor.run_single(&project, &task_id, &invoker, &workspace)?;
            print_outcome(&task_id, &outcome);
        }
        Command::Status { project, json } => {
            let snapshot = conductor.status(&project)?;
            if json {
                let text = serde_json::to_string_pretty(&snapshot)
                    .map_err(|err| CommandError::Other(err.into()))?;
                println!("{text}");
            } else {
                println!("{}", render(&snapshot));
            }
        }
        Command::Retro { project } => {
            let root = conductor.project_paths(&project).root;
            let retro = conductor.retrospective(&project, &invoker(&root))?;
            println!("retrospective: {}", retro.retro_path.display());
            for lesson in retro.lessons {
                println!("lesson: {}", lesson.display());
            }
        }
    }
    Ok(())
}

/// Ask on stdin whether to start `next`. Anything but yes stops the run.
fn confirm(next: &Task) -> bool {
    print!("next: [{}] {}. Continue? [Y/n] ", next.id, next.title);
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "" | "y" | "yes")
}

fn print_stop(stop: &PipelineStop) {
    match stop {
        PipelineStop::Complete => println!("all tasks complete"),
        PipelineStop::Interrupted { tasks } => {
            println!(
                "stopped: interrupted mid-attempt: {}; restart each with `conductor task`",
                tasks.join(", ")
            );
        }
        PipelineStop::Blocked { tasks } => {
            println!("stopped: blocked tasks need attention: {}", tasks.join(", "));
        }
        PipelineStop::WaitingOnDependencies { tasks } => {
            println!("stopped: waiting on dependencies: {}", tasks.join(", "));
        }
        PipelineStop::NothingToRun => println!("nothing to run"),
        PipelineStop::TaskFailed { task_id, outcome } => print_outcome(task_id, outcome),
        PipelineStop::Paused => println!("paused; run again to continue"),
    }
}

fn print_outcome(task_id: &str, outcome: &TaskOutcome) {
    match outcome {
        TaskOutcome::Done => println!("[{task_id}] done"),
        TaskOutcome::Blocked { reason } => println!("[{task_id}] blocked: {reason}"),
        TaskOutcome::HumanNeeded { reason } => {
            println!("[{task_id}] needs a human: {reason}");
        }
        TaskOutcome::EscalationUnresolved { reason } => {
            println!("[{task_id}] escalation unresolved: {reason}");
            println!("  review the run logs and retry with `conductor task`");
        }
    }
}
