//! Execution engine for loaded functions and ad-hoc snippets.
//!
//! Code never runs inside this process. Each session owns one interpreter
//! child, started on first use and killed when the [`Executor`] is dropped.
//! The child runs a small driver that keeps a single namespace alive for the
//! whole session and answers one request per line:
//!
//! - a request is a JSON object `{"label", "code"}` on the child's stdin
//! - the reply is a JSON object `{"output", "error"}` on the child's stdout
//! - while a request runs, its stdout goes into a buffer inside the child,
//!   so the session's own output stream is never swapped
//! - a failing snippet becomes an error description on the
//!   [`ExecutionOutcome`], never an `Err`
//!
//! The set of loaded definitions lives in a [`FunctionRegistry`] owned by the
//! [`Executor`]. If the child dies, the next request starts a fresh one and
//! replays the registry into it.

use crate::config::InterpreterConfig;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tracing::{debug, info, warn};

/// Python program run with `-c`. User code executes in `namespace`, so the
/// driver's own names never show up in the user's globals. The reply stream
/// is a duplicate of the original stdout; fd 1 itself is pointed at stderr
/// so stray low-level writes cannot corrupt it. `input()` sees an empty
/// stream instead of the request pipe.
const DRIVER: &str = r#"import contextlib
import io
import json
import os
import sys
import traceback


def serve():
    requests = sys.stdin.buffer
    replies = os.fdopen(os.dup(1), "w", encoding="utf-8")
    os.dup2(2, 1)
    sys.stdin = io.StringIO()
    namespace = {"__name__": "__main__", "__builtins__": __builtins__}
    while True:
        line = requests.readline()
        if not line:
            return
        request = json.loads(line.decode("utf-8"))
        captured = io.StringIO()
        error = None
        try:
            with contextlib.redirect_stdout(captured):
                exec(compile(request["code"], request["label"], "exec"), namespace)
        except BaseException as exc:
            error = "".join(traceback.format_exception_only(type(exc), exc)).rstrip()
        replies.write(json.dumps({"output": captured.getvalue(), "error": error}) + "\n")
        replies.flush()


serve()
"#;

const INTERPRETER_EXITED: &str =
    "interpreter exited unexpectedly; loaded functions will be restored on the next run";

/// Result of one run: everything written to stdout, plus the error if the run failed.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExecutionOutcome {
    pub output: String,
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// A definition available to every subsequent run.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedFunction {
    pub name: String,
    pub code: String,
}

/// Per-session record of loaded definitions.
///
/// Keeps load order. Loading a name again replaces its source in place.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    functions: Vec<LoadedFunction>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, code: &str) {
        match self.functions.iter_mut().find(|f| f.name == name) {
            Some(existing) => existing.code = code.to_string(),
            None => self.functions.push(LoadedFunction {
                name: name.to_string(),
                code: code.to_string(),
            }),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.iter().any(|f| f.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.functions.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    fn definitions(&self) -> &[LoadedFunction] {
        &self.functions
    }
}

// =============================================================================
// Traits for Dependency Injection
// =============================================================================

/// Trait for starting interpreter processes.
///
/// This abstraction enables testing without spawning real processes.
pub trait ProcessRunner: Send + Sync {
    /// Starts a long-lived program and returns a line channel to it.
    fn spawn(&self, program: &str, args: &[&str]) -> Result<Box<dyn InterpreterChannel>>;

    /// Checks if a program exists in PATH.
    fn program_exists(&self, program: &str) -> bool;
}

/// Line-oriented link to a running interpreter.
pub trait InterpreterChannel: Send {
    /// Sends one request line and waits for one reply line.
    ///
    /// Returns `None` once the interpreter has gone away.
    fn exchange(&mut self, request: &str) -> Result<Option<String>>;
}

/// Starts programs with a cleared environment and piped stdin and stdout.
pub struct SystemProcessRunner;

impl ProcessRunner for SystemProcessRunner {
    fn spawn(&self, program: &str, args: &[&str]) -> Result<Box<dyn InterpreterChannel>> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to start interpreter '{}'", program))?;
        let requests = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("Interpreter stdin is not piped"))?;
        let replies = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("Interpreter stdout is not piped"))?;
        debug!("Started interpreter '{}' (pid {})", program, child.id());

        Ok(Box::new(ChildChannel {
            child,
            requests,
            replies: BufReader::new(replies),
        }))
    }

    fn program_exists(&self, program: &str) -> bool {
        which::which(program).is_ok()
    }
}

struct ChildChannel {
    child: Child,
    requests: ChildStdin,
    replies: BufReader<ChildStdout>,
}

impl InterpreterChannel for ChildChannel {
    fn exchange(&mut self, request: &str) -> Result<Option<String>> {
        let sent = writeln!(self.requests, "{}", request).and_then(|_| self.requests.flush());
        match sent {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::BrokenPipe => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let mut reply = String::new();
        if self.replies.read_line(&mut reply)? == 0 {
            return Ok(None);
        }
        Ok(Some(reply))
    }
}

impl Drop for ChildChannel {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[derive(Serialize)]
struct Request<'a> {
    label: &'a str,
    code: &'a str,
}

// =============================================================================
// Executor Implementation
// =============================================================================

/// Runs snippets in the session's live namespace.
///
/// # Example
///
/// ```ignore
/// let mut executor = Executor::new(InterpreterConfig::default());
/// executor.define("add_two", "def add_two(x):\n    return x + 2\n")?;
/// let outcome = executor.run("print(add_two(40))")?;
/// assert_eq!(outcome.output, "42\n");
/// ```
pub struct Executor {
    interpreter: InterpreterConfig,
    registry: FunctionRegistry,
    runner: Box<dyn ProcessRunner>,
    channel: Option<Box<dyn InterpreterChannel>>,
}

impl Executor {
    pub fn new(interpreter: InterpreterConfig) -> Self {
        Self::with_runner(interpreter, Box::new(SystemProcessRunner))
    }

    /// Creates an executor with a custom process runner (for testing).
    pub fn with_runner(interpreter: InterpreterConfig, runner: Box<dyn ProcessRunner>) -> Self {
        Self {
            interpreter,
            registry: FunctionRegistry::new(),
            runner,
            channel: None,
        }
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Loads a definition into the session namespace.
    ///
    /// Whatever the source prints is returned as-is, a definition rather than
    /// an invocation. The definition joins the registry only if it runs
    /// without raising.
    ///
    /// # Errors
    ///
    /// Only infrastructure failures (interpreter missing, spawn, broken
    /// protocol) are errors. A definition that raises is reported on the
    /// outcome.
    pub fn define(&mut self, name: &str, code: &str) -> Result<ExecutionOutcome> {
        info!("Loading function '{}' into the session namespace", name);
        let outcome = self.execute(name, code)?;

        if outcome.is_success() {
            self.registry.insert(name, code);
            info!("Function '{}' loaded ({} in session)", name, self.registry.len());
        } else {
            warn!("Function '{}' failed to load: {:?}", name, outcome.error);
        }
        Ok(outcome)
    }

    /// Runs an ad-hoc snippet and captures its output.
    ///
    /// Names the snippet binds stay in the namespace for later runs.
    ///
    /// # Errors
    ///
    /// Only infrastructure failures are errors. Failures raised by the
    /// snippet itself are reported on the returned outcome.
    pub fn run(&mut self, snippet: &str) -> Result<ExecutionOutcome> {
        info!("Executing snippet against {} loaded function(s)", self.registry.len());
        self.execute("<execute>", snippet)
    }

    fn execute(&mut self, label: &str, code: &str) -> Result<ExecutionOutcome> {
        let request = serde_json::to_string(&Request { label, code })?;
        let mut channel = match self.channel.take() {
            Some(channel) => channel,
            None => self.start()?,
        };

        match channel.exchange(&request)? {
            Some(reply) => {
                let reply = reply.trim_end();
                let outcome: ExecutionOutcome = serde_json::from_str(reply)
                    .with_context(|| format!("Unreadable reply from interpreter: {}", reply))?;
                self.channel = Some(channel);
                Ok(outcome)
            }
            None => {
                warn!("Interpreter exited while running '{}'", label);
                Ok(ExecutionOutcome {
                    output: String::new(),
                    error: Some(INTERPRETER_EXITED.to_string()),
                })
            }
        }
    }

    /// Starts the interpreter and replays the registry into it.
    fn start(&self) -> Result<Box<dyn InterpreterChannel>> {
        let program = self.interpreter.program.as_str();
        if !self.runner.program_exists(program) {
            return Err(anyhow!(
                "Interpreter '{}' is not installed. Install it or set [interpreter] in the config file.",
                program
            ));
        }

        let mut args: Vec<&str> = self.interpreter.args.iter().map(String::as_str).collect();
        args.extend(["-c", DRIVER]);
        debug!("Starting {} {:?} with the session driver", program, self.interpreter.args);
        let mut channel = self.runner.spawn(program, &args)?;

        for function in self.registry.definitions() {
            let request = serde_json::to_string(&Request {
                label: &function.name,
                code: &function.code,
            })?;
            if channel.exchange(&request)?.is_none() {
                return Err(anyhow!(
                    "Interpreter exited while restoring function '{}'",
                    function.name
                ));
            }
        }
        if !self.registry.is_empty() {
            info!("Restored {} function(s) into a new interpreter", self.registry.len());
        }

        Ok(channel)
    }
}
