//! In-memory fakes for the transport and container seams (testing only)
//!
//! - `ScriptedRegistryApi`: answers by path with scripted responses and
//!   records every request
//! - `FakeContainerTool`: succeeds by default, records every invocation,
//!   can fail, panic or raise a completion signal on a chosen subcommand

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::api::{ApiRequest, ApiResponse, Method, RegistryApi};
use crate::container::{CommandOutput, ContainerCommand, ContainerTool};
use crate::error::{ContainerError, TransportError};
use crate::signal::CompletionSignal;

// ---------------------------------------------------------------------------
// ScriptedRegistryApi
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Scripted {
    Respond(ApiResponse),
    Fail(String),
}

/// Registry API fake answering from per-path scripts.
///
/// A path's script is consumed in order; its last entry repeats once the
/// rest are used. Paths with no script answer `404`.
#[derive(Debug, Default)]
pub struct ScriptedRegistryApi {
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl ScriptedRegistryApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for `path`.
    pub fn respond(self, path: &str, status: u16, body: &str) -> Self {
        self.push(path, Scripted::Respond(ApiResponse::new(status, body)))
    }

    /// Queue a transport error for `path`.
    pub fn fail(self, path: &str, message: &str) -> Self {
        self.push(path, Scripted::Fail(message.to_string()))
    }

    fn push(self, path: &str, entry: Scripted) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(entry);
        self
    }

    /// Every request sent so far, in order.
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests sent to `path`.
    pub fn requests_to(&self, path: &str) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path == path)
            .collect()
    }

    /// Methods and paths of every request, in order.
    pub fn calls(&self) -> Vec<(Method, String)> {
        self.requests()
            .into_iter()
            .map(|r| (r.method, r.path))
            .collect()
    }
}

#[async_trait]
impl RegistryApi for ScriptedRegistryApi {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let path = request.path.clone();
        self.requests.lock().unwrap().push(request);

        let entry = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(&path) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match entry {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::Fail(message)) => Err(TransportError::Http(message)),
            None => Ok(ApiResponse::new(404, "not found")),
        }
    }
}

// ---------------------------------------------------------------------------
// FakeContainerTool
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Behaviour {
    Exit(i32),
    Stdout(String),
    Error(String),
    Panic,
    Raise(CompletionSignal),
}

/// Container tool fake; every subcommand exits 0 unless told otherwise.
#[derive(Debug, Default)]
pub struct FakeContainerTool {
    behaviours: HashMap<String, Behaviour>,
    calls: Mutex<Vec<ContainerCommand>>,
}

impl FakeContainerTool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exit with `code` on `subcommand`.
    pub fn failing_on(mut self, subcommand: &str, code: i32) -> Self {
        self.behaviours
            .insert(subcommand.to_string(), Behaviour::Exit(code));
        self
    }

    /// Print `stdout` and exit 0 on `subcommand`.
    pub fn with_stdout(mut self, subcommand: &str, stdout: &str) -> Self {
        self.behaviours
            .insert(subcommand.to_string(), Behaviour::Stdout(stdout.to_string()));
        self
    }

    /// Return a spawn error on `subcommand`.
    pub fn erroring_on(mut self, subcommand: &str, reason: &str) -> Self {
        self.behaviours
            .insert(subcommand.to_string(), Behaviour::Error(reason.to_string()));
        self
    }

    /// Panic on `subcommand`.
    pub fn panicking_on(mut self, subcommand: &str) -> Self {
        self.behaviours
            .insert(subcommand.to_string(), Behaviour::Panic);
        self
    }

    /// Raise `signal` on `subcommand`, then exit 0.
    pub fn raising_on(mut self, subcommand: &str, signal: &CompletionSignal) -> Self {
        self.behaviours
            .insert(subcommand.to_string(), Behaviour::Raise(signal.clone()));
        self
    }

    pub fn calls(&self) -> Vec<ContainerCommand> {
        self.calls.lock().unwrap().clone()
    }

    pub fn subcommands(&self) -> Vec<String> {
        self.calls()
            .iter()
            .map(|c| c.subcommand().to_string())
            .collect()
    }
}

#[async_trait]
impl ContainerTool for FakeContainerTool {
    async fn run(&self, command: &ContainerCommand) -> Result<CommandOutput, ContainerError> {
        self.calls.lock().unwrap().push(command.clone());

        let output = |exit_code: i32, stdout: &str| CommandOutput {
            exit_code,
            stdout: stdout.to_string(),
            stderr: if exit_code == 0 {
                String::new()
            } else {
                format!("{} failed", command.subcommand())
            },
            duration_ms: 1,
        };

        match self.behaviours.get(command.subcommand()) {
            None => Ok(output(0, "")),
            Some(Behaviour::Exit(code)) => Ok(output(*code, "")),
            Some(Behaviour::Stdout(stdout)) => Ok(output(0, stdout)),
            Some(Behaviour::Error(reason)) => Err(ContainerError::Spawn {
                tool: "fake".to_string(),
                reason: reason.clone(),
            }),
            Some(Behaviour::Raise(signal)) => {
                signal.raise();
                Ok(output(0, ""))
            }
            Some(Behaviour::Panic) => panic!("fake container tool panicked on {}", command.subcommand()),
        }
    }
}
