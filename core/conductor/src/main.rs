//! conductor: headless observer for filesystem-coordinated agent projects.
//!
//! Every query prints JSON to stdout. Diagnostics go to stderr and to
//! `~/.conductor/logs/`.
//!
//! ## Subcommands
//!
//! - `watch`: Stream notifications as JSON lines; reads control commands on stdin
//! - `events`, `timeline`, `requests`, `stats`, `tail`: Activity log views
//! - `health`: Agent health with derived warnings
//! - `get`, `put`, `docs`: State documents
//! - `signals`, `touch`: Signal files
//! - `knowledge`, `manifest`: Knowledge files and launcher manifest

mod logging;
mod watch;

use clap::{Parser, Subcommand};
use conductor_core::{Conductor, ConductorError, ObserverConfig};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "conductor")]
#[command(about = "Observe and steer filesystem-coordinated agent projects")]
#[command(version)]
struct Cli {
    /// Project root (defaults to the current directory)
    #[arg(long, global = true, value_name = "PATH")]
    project: Option<PathBuf>,

    /// Config file (defaults to $CONDUCTOR_CONFIG, then ~/.conductor/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch projects and print notifications as JSON lines
    Watch {
        /// Projects to track; the first becomes active
        #[arg(value_name = "PROJECT")]
        projects: Vec<PathBuf>,
    },

    /// Recent activity log events
    Events {
        /// Only events correlated with this request id or token
        #[arg(long)]
        request: Option<String>,

        /// Keep only the last N events
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Phase timeline reconstructed from the activity log
    Timeline {
        #[arg(long)]
        request: Option<String>,
    },

    /// Requests seen in the log plus the pending handoff
    Requests,

    /// Session statistics
    Stats,

    /// Last raw lines of the activity log
    Tail {
        #[arg(short = 'n', long, default_value_t = 20)]
        lines: usize,
    },

    /// Agent health with derived warnings
    Health,

    /// Read a state document
    Get {
        #[arg(value_name = "DOC")]
        name: String,

        /// Print the stored bytes unchanged
        #[arg(long)]
        raw: bool,
    },

    /// Atomically replace a state document
    Put {
        #[arg(value_name = "DOC")]
        name: String,

        /// Document content as JSON
        #[arg(value_name = "JSON")]
        json: String,
    },

    /// List state documents
    Docs,

    /// List signal files
    Signals,

    /// Touch a signal file to wake the agent waiting on it
    Touch {
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// List knowledge files, or print one
    Knowledge {
        #[arg(value_name = "NAME")]
        name: Option<String>,
    },

    /// Launcher manifest
    Manifest,
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        if e.is_user_facing() {
            eprintln!("conductor: {e}");
        } else {
            tracing::error!(error = %e, "conductor failed");
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), ConductorError> {
    let config = ObserverConfig::load(cli.config)?;
    let mut conductor = Conductor::new(config);

    if let Commands::Watch { projects } = cli.command {
        let projects = if projects.is_empty() {
            vec![project_root(cli.project.as_deref())?]
        } else {
            projects
        };
        return watch::run(conductor, &projects);
    }

    // One-shot queries never start watchers.
    let root = project_root(cli.project.as_deref())?;
    conductor.open_project(&root)?;

    match cli.command {
        Commands::Watch { .. } => unreachable!("handled above"),
        Commands::Events { request, limit } => {
            print(&conductor.get_recent_events(request.as_deref(), limit))
        }
        Commands::Timeline { request } => {
            let timeline = conductor.get_timeline(request.as_deref());
            print(&json!({
                "phases": timeline.phases,
                "lanes": timeline.lanes(),
                "longest": timeline.longest(),
                "dead_time_ms": timeline.dead_time_total().num_milliseconds(),
            }))
        }
        Commands::Requests => print(&conductor.list_requests()),
        Commands::Stats => print(&conductor.session_stats()),
        Commands::Tail { lines } => {
            for line in conductor.read_log_tail(lines)? {
                println!("{line}");
            }
            Ok(())
        }
        Commands::Health => {
            let report = conductor.get_health();
            print(&json!({
                "agents": report.records,
                "stagger": report.stagger_message(),
            }))
        }
        Commands::Get { name, raw } => {
            if raw {
                match conductor.get_document_raw(&name) {
                    Some(content) => print!("{content}"),
                    None => println!("null"),
                }
                Ok(())
            } else {
                print(&conductor.get_document(&name).unwrap_or(Value::Null))
            }
        }
        Commands::Put { name, json } => {
            let value: Value = serde_json::from_str(&json).map_err(|e| ConductorError::Json {
                context: format!("Document {name} is not valid JSON"),
                source: e,
            })?;
            conductor.write_document(&name, &value)
        }
        Commands::Docs => print(&conductor.list_documents()),
        Commands::Signals => print(&conductor.list_signals()),
        Commands::Touch { name } => print(&conductor.touch_signal(&name)?),
        Commands::Knowledge { name: None } => print(&conductor.list_knowledge()),
        Commands::Knowledge { name: Some(name) } => {
            match conductor.read_knowledge(&name)? {
                Some(content) => print!("{content}"),
                None => {
                    return Err(ConductorError::InvalidArgument(format!(
                        "No knowledge file named {name}"
                    )))
                }
            }
            Ok(())
        }
        Commands::Manifest => print(&conductor.read_manifest()),
    }
}

fn project_root(explicit: Option<&Path>) -> Result<PathBuf, ConductorError> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => std::env::current_dir()
            .map_err(|e| ConductorError::Io {
                context: "Failed to resolve current directory".to_string(),
                source: e,
            }),
    }
}

fn print<T: Serialize + ?Sized>(value: &T) -> Result<(), ConductorError> {
    let text = serde_json::to_string_pretty(value).map_err(|e| ConductorError::Json {
        context: "Failed to render output".to_string(),
        source: e,
    })?;
    println!("{text}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "conductor",
            "events",
            "--request",
            "req-1",
            "--limit",
            "5",
            "--project",
            "/work/app",
        ])
        .unwrap();
        assert_eq!(cli.project, Some(PathBuf::from("/work/app")));
        match cli.command {
            Commands::Events { request, limit } => {
                assert_eq!(request.as_deref(), Some("req-1"));
                assert_eq!(limit, Some(5));
            }
            _ => panic!("expected events"),
        }
    }

    #[test]
    fn watch_accepts_several_projects() {
        let cli = Cli::try_parse_from(["conductor", "watch", "/a", "/b"]).unwrap();
        match cli.command {
            Commands::Watch { projects } => assert_eq!(projects.len(), 2),
            _ => panic!("expected watch"),
        }
    }

    #[test]
    fn put_requires_json_argument() {
        assert!(Cli::try_parse_from(["conductor", "put", "handoff.json"]).is_err());
    }
}
