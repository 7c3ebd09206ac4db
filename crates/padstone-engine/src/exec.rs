//! Adapter for an external engine program.
//!
//! The program is run as `<program> validate` or `<program> apply` with the
//! JSON-encoded [`EngineRequest`] on stdin. `validate` answers with a single
//! [`Diagnostics`] object. `apply` streams one JSON event per line:
//! `{"event":"state","state":{..}}` after each change, then exactly one
//! terminal `{"event":"done","state":{..}}` or `{"event":"error","message":".."}`.

use crate::backend::{Diagnostics, ProvisioningEngine, StateCallback};
use crate::request::EngineRequest;
use crate::EngineError;
use padstone_state::StateDocument;
use serde::Deserialize;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum ApplyEvent {
    State { state: StateDocument },
    Done { state: StateDocument },
    Error { message: String },
}

pub struct ExecEngine {
    program: PathBuf,
}

impl ExecEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Start `<program> <command>` and feed it the request on a writer thread.
    fn spawn(
        &self,
        command: &str,
        request: &EngineRequest,
    ) -> Result<(Child, std::thread::JoinHandle<std::io::Result<()>>), EngineError> {
        let payload = serde_json::to_vec(request)?;
        let mut child = Command::new(&self.program)
            .arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                EngineError::Unavailable(format!("{}: {e}", self.program.display()))
            })?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Protocol("engine stdin unavailable".to_owned()))?;
        let writer = std::thread::spawn(move || stdin.write_all(&payload));
        debug!("started {} {command}", self.program.display());
        Ok((child, writer))
    }
}

fn kill(child: &mut Child) {
    if let Err(e) = child.kill() {
        warn!("failed to stop engine process: {e}");
    }
    let _ = child.wait();
}

fn join_writer(writer: std::thread::JoinHandle<std::io::Result<()>>) -> Result<(), EngineError> {
    match writer.join() {
        Ok(result) => result.map_err(EngineError::Io),
        Err(_) => Err(EngineError::Protocol("request writer panicked".to_owned())),
    }
}

impl ProvisioningEngine for ExecEngine {
    fn name(&self) -> &'static str {
        "exec"
    }

    fn validate(&self, request: &EngineRequest) -> Result<Diagnostics, EngineError> {
        let (child, writer) = self.spawn("validate", request)?;
        let output = child.wait_with_output()?;
        if let Err(e) = join_writer(writer) {
            debug!("request not fully written: {e}");
        }
        if !output.status.success() {
            return Err(EngineError::Plan(format!(
                "engine validate exited with {}",
                output.status
            )));
        }
        serde_json::from_slice(&output.stdout)
            .map_err(|e| EngineError::Protocol(format!("invalid validate response: {e}")))
    }

    fn plan_and_apply(
        &self,
        request: &EngineRequest,
        on_state: StateCallback<'_>,
    ) -> Result<StateDocument, EngineError> {
        let (mut child, writer) = self.spawn("apply", request)?;
        let Some(stdout) = child.stdout.take() else {
            kill(&mut child);
            return Err(EngineError::Protocol("engine stdout unavailable".to_owned()));
        };

        let mut outcome = None;
        for line in BufReader::new(stdout).lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    kill(&mut child);
                    return Err(EngineError::Io(e));
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let event: ApplyEvent = match serde_json::from_str(&line) {
                Ok(event) => event,
                Err(e) => {
                    kill(&mut child);
                    return Err(EngineError::Protocol(format!("invalid apply event: {e}")));
                }
            };
            match event {
                ApplyEvent::State { mut state } => {
                    state.normalize();
                    if let Err(hook) = on_state(&state) {
                        kill(&mut child);
                        return Err(EngineError::Halted(hook));
                    }
                }
                ApplyEvent::Done { mut state } => {
                    state.normalize();
                    outcome = Some(Ok(state));
                    break;
                }
                ApplyEvent::Error { message } => {
                    outcome = Some(Err(EngineError::Apply(message)));
                    break;
                }
            }
        }

        let status = child.wait()?;
        // A child that exits early may leave the request unread.
        if let Err(e) = join_writer(writer) {
            debug!("request not fully written: {e}");
        }
        match outcome {
            Some(Ok(state)) => {
                on_state(&state).map_err(EngineError::Halted)?;
                Ok(state)
            }
            Some(Err(e)) => Err(e),
            None if !status.success() => Err(EngineError::Apply(format!(
                "engine exited with {status} without reporting a result"
            ))),
            None => Err(EngineError::Protocol(
                "engine closed its output without a terminal event".to_owned(),
            )),
        }
    }
}
