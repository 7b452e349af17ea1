//! Rule execution lifecycle: single-flight guard, process spawning, output
//! capture, and completion notifications.
//!
//! `trigger` never blocks and never returns an error; every outcome of a run
//! (non-zero exit, spawn failure, callback error) surfaces only on the
//! notification stream, so one misbehaving action can never take the
//! dispatcher down.

use std::process::Stdio;
use std::sync::atomic::Ordering;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, ChildStdout, Command};
use tracing::{debug, error, info, warn};

use crate::event::Event;
use crate::notify::Notifier;

use super::Rule;
use super::action::{Action, CallbackFn, ShellAction};

/// Exit code reported when the action process cannot be started at all.
pub const SPAWN_FAILURE_CODE: i32 = 127;

/// Stdout lines matching this are promoted to error level when the rule's
/// `classify_output` flag is on.
static ERROR_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error|fail|fatal").expect("hard-coded pattern"));

impl Rule {
    /// Starts an execution for `event` without blocking the caller.
    ///
    /// When a run is already in flight and `concurrent_okay` is off, emits a
    /// `Declined` notification and starts nothing. Otherwise emits `Running`
    /// and hands the run to a background task; completion arrives later as
    /// `Complete` (or `Error` for a failed callback).
    pub fn trigger(self: &Arc<Self>, event: Event, notifier: Notifier) {
        if self.concurrent_okay {
            self.busy.store(true, Ordering::Release);
        } else if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            info!(rule = %self.name, "declining to execute while still in progress");
            notifier.declined(&self.name);
            return;
        }

        notifier.running(&self.name);

        let rule = Arc::clone(self);
        tokio::spawn(async move {
            match &rule.action {
                Action::Shell(shell) => rule.run_shell(shell, &event, &notifier).await,
                Action::Callback(callback) => {
                    let callback = Arc::clone(callback);
                    rule.run_callback(callback, event, &notifier).await;
                }
            }
        });
    }

    async fn run_shell(&self, shell: &ShellAction, event: &Event, notifier: &Notifier) {
        debug!(rule = %self.name, "executing command");

        let line = match shell.command_line(event, &self.extra_args) {
            Ok(line) => line,
            Err(err) => {
                warn!(rule = %self.name, %err, "could not serialize event for command");
                self.finish(notifier, SPAWN_FAILURE_CODE, err.to_string(), event);
                return;
            }
        };

        info!(rule = %self.name, command = %line, "starting execution");

        let spawned = Command::new("/bin/sh")
            .arg("-c")
            .arg(&line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(err) => {
                warn!(rule = %self.name, %err, "failed to spawn command");
                self.finish(notifier, SPAWN_FAILURE_CODE, err.to_string(), event);
                return;
            }
        };

        let errors = Mutex::new(String::new());
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // Drain both pipes to EOF before looking at the exit status, so every
        // line attributed to this run lands in the buffer before `Complete`.
        tokio::join!(
            self.consume_stdout(stdout, &errors),
            self.consume_stderr(stderr, &errors),
        );

        let exit_code = match child.wait().await {
            Ok(status) => status.code().unwrap_or(-1),
            Err(err) => {
                warn!(rule = %self.name, %err, "failed to reap command");
                SPAWN_FAILURE_CODE
            }
        };

        info!(rule = %self.name, exit_code, "execution complete");

        let buffered = errors
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        self.finish(notifier, exit_code, buffered, event);
    }

    async fn run_callback(&self, callback: CallbackFn, event: Event, notifier: &Notifier) {
        debug!(rule = %self.name, "calling function");

        match callback(event.clone(), self.extra_args.clone()).await {
            Ok(()) => {
                debug!(rule = %self.name, "function complete");
                self.finish(notifier, 0, String::new(), &event);
            }
            Err(err) => {
                warn!(rule = %self.name, %err, "problem running function");
                self.busy.store(false, Ordering::Release);
                notifier.error(&self.name, err.to_string());
            }
        }
    }

    async fn consume_stdout(&self, stdout: Option<ChildStdout>, errors: &Mutex<String>) {
        let Some(stdout) = stdout else { return };
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if self.classify_output && ERROR_LINE.is_match(&line) {
                error!(rule = %self.name, "{line}");
                append_line(errors, &line);
            } else {
                debug!(rule = %self.name, "{line}");
            }
        }
    }

    async fn consume_stderr(&self, stderr: Option<ChildStderr>, errors: &Mutex<String>) {
        let Some(stderr) = stderr else { return };
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            error!(rule = %self.name, "{line}");
            append_line(errors, &line);
        }
    }

    /// Clears the busy flag, then emits `Complete`. The flag is cleared
    /// first so a subscriber reacting to the notification may re-trigger
    /// the rule immediately.
    fn finish(&self, notifier: &Notifier, exit_code: i32, error_output: String, event: &Event) {
        self.busy.store(false, Ordering::Release);
        notifier.complete(
            &self.name,
            exit_code,
            error_output,
            &event.repository,
            event.branch(),
        );
    }
}

fn append_line(buffer: &Mutex<String>, line: &str) {
    let mut buffer = buffer.lock().unwrap_or_else(PoisonError::into_inner);
    buffer.push_str(line);
    buffer.push('\n');
}
