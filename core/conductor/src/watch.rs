//! Long-running `watch` command.
//!
//! Prints every notification as one JSON line on stdout. Outcomes of project
//! operations are printed the same way, tagged with `"type": "outcome"`.
//!
//! Control commands, one per stdin line:
//!
//! - `add <path>` / `switch <path>` / `remove <path>`
//! - `list`
//! - `retry`
//! - `quit`
//!
//! Scopes whose directory was missing are retried every
//! `watch.retry_interval_secs`.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Instant;

use conductor_core::{ChannelSubscriber, Conductor, ConductorError, Notification};
use serde::Serialize;
use serde_json::json;

#[derive(Debug, PartialEq, Eq)]
enum Control {
    Add(PathBuf),
    Switch(PathBuf),
    Remove(PathBuf),
    List,
    Retry,
    Quit,
}

fn parse_control(line: &str) -> Result<Control, String> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };
    let path = || {
        if rest.is_empty() {
            Err(format!("{verb} needs a project path"))
        } else {
            Ok(PathBuf::from(rest))
        }
    };
    match verb {
        "add" => path().map(Control::Add),
        "switch" => path().map(Control::Switch),
        "remove" => path().map(Control::Remove),
        "list" => Ok(Control::List),
        "retry" => Ok(Control::Retry),
        "quit" | "exit" => Ok(Control::Quit),
        other => Err(format!("unknown command: {other}")),
    }
}

enum Input {
    Notification(Notification),
    Control(Control),
    Closed,
}

pub fn run(mut conductor: Conductor, projects: &[PathBuf]) -> Result<(), ConductorError> {
    let (tx, rx) = mpsc::channel::<Input>();

    let (note_tx, note_rx) = mpsc::channel::<Notification>();
    conductor.subscribe(Arc::new(ChannelSubscriber::new(note_tx)));
    let forward = tx.clone();
    std::thread::spawn(move || {
        for notification in note_rx {
            if forward.send(Input::Notification(notification)).is_err() {
                return;
            }
        }
    });

    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match parse_control(&line) {
                Ok(control) => {
                    if tx.send(Input::Control(control)).is_err() {
                        return;
                    }
                }
                Err(message) => tracing::warn!(input = %line, "{message}"),
            }
        }
        let _ = tx.send(Input::Closed);
    });

    for project in projects {
        report("add", conductor.add_project(project));
    }

    let retry_every = conductor.config().watch.retry_interval();
    let mut next_retry = Instant::now() + retry_every;
    let mut stdin_open = true;

    loop {
        let wait = next_retry.saturating_duration_since(Instant::now());
        match rx.recv_timeout(wait) {
            Ok(Input::Notification(notification)) => emit(&notification),
            Ok(Input::Control(Control::Quit)) => break,
            Ok(Input::Control(control)) => handle(&mut conductor, control),
            Ok(Input::Closed) => {
                // Keep watching when stdin is not interactive.
                stdin_open = false;
                tracing::debug!("stdin closed, control commands disabled");
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if Instant::now() >= next_retry {
            if let Some(outcome) = conductor.retry_watchers() {
                if !outcome.started.is_empty() {
                    emit_outcome("retry", &outcome);
                }
            }
            next_retry = Instant::now() + retry_every;
        }
    }

    tracing::info!(stdin_open, "Watch stopped");
    conductor.shutdown();
    Ok(())
}

fn handle(conductor: &mut Conductor, control: Control) {
    match control {
        Control::Add(path) => report("add", conductor.add_project(&path)),
        Control::Switch(path) => report("switch", conductor.switch_project(&path)),
        Control::Remove(path) => report("remove", conductor.remove_project(&path)),
        Control::List => emit_outcome("list", &conductor.list_projects()),
        Control::Retry => emit_outcome("retry", &conductor.retry_watchers()),
        Control::Quit => {}
    }
}

fn report<T: Serialize>(op: &str, result: Result<T, ConductorError>) {
    match result {
        Ok(outcome) => emit_outcome(op, &outcome),
        Err(err) => {
            tracing::warn!(op, error = %err, "Project operation failed");
            emit(&json!({ "type": "error", "op": op, "message": err.to_string() }));
        }
    }
}

fn emit_outcome<T: Serialize + ?Sized>(op: &str, outcome: &T) {
    emit(&json!({ "type": "outcome", "op": op, "result": outcome }));
}

fn emit<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string(value) {
        Ok(line) => println!("{line}"),
        Err(err) => tracing::warn!(error = %err, "Failed to render notification"),
    }
}
