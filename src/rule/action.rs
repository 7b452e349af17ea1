//! Action variants a rule can carry.
//!
//! The shell-vs-callback choice is made once at construction and dispatched
//! as a tagged union, not by runtime inspection.

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::event::Event;

/// Error reported by a callback action.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// An in-process callback action.
///
/// Receives the event and the rule's extra arguments. Resolving to `Err`
/// ends the run with an `Error` notification instead of `Complete`.
pub type CallbackFn = Arc<
    dyn Fn(Event, Vec<String>) -> BoxFuture<'static, Result<(), CallbackError>> + Send + Sync,
>;

/// An external command action.
#[derive(Debug, Clone)]
pub struct ShellAction {
    /// The command to run.
    pub script: String,

    /// Optional prefix prepended to the command (e.g. an interpreter).
    pub prefix: Option<String>,

    /// Forward the serialized event instead of positional repo/branch args.
    pub send_event: bool,
}

impl ShellAction {
    /// Assembles the command line for one invocation.
    ///
    /// Joins, in order: the prefix, the command, then either the serialized
    /// event (`send_event`) or the positional list `<repository> <branch>`,
    /// plus the after-commit for push events and the rule's extra arguments.
    /// An absent ref yields no branch argument.
    pub(crate) fn command_line(
        &self,
        event: &Event,
        extra_args: &[String],
    ) -> Result<String, serde_json::Error> {
        let mut parts: Vec<String> = Vec::new();

        if let Some(prefix) = &self.prefix {
            parts.push(prefix.clone());
        }
        parts.push(self.script.clone());

        if self.send_event {
            parts.push(serde_json::to_string(event)?);
        } else {
            parts.push(event.repository.clone());

            let branch = event.branch();
            if !branch.is_empty() {
                parts.push(branch.to_string());
            }

            if event.kind == "push" {
                if let Some(after) = &event.after_commit {
                    parts.push(after.clone());
                }
            }

            parts.extend(extra_args.iter().cloned());
        }

        Ok(parts.join(" "))
    }
}

/// What a rule does when it matches.
pub enum Action {
    /// Spawn an external command.
    Shell(ShellAction),

    /// Invoke an in-process callback.
    Callback(CallbackFn),
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Shell(shell) => f.debug_tuple("Shell").field(shell).finish(),
            Action::Callback(_) => f.write_str("Callback"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn push_event(repo: &str, git_ref: &str, after: Option<&str>) -> Event {
        let mut payload = json!({
            "repository": { "name": repo },
            "ref": git_ref,
        });
        if let Some(after) = after {
            payload["after"] = json!(after);
        }
        Event::from_payload("push", payload).unwrap()
    }

    #[test]
    fn positional_args_include_repo_branch_and_commit() {
        let action = ShellAction {
            script: "/usr/local/bin/deploy".to_string(),
            prefix: None,
            send_event: false,
        };
        let event = push_event("foobie", "refs/heads/master", Some("abc123"));

        let line = action.command_line(&event, &[]).unwrap();
        assert_eq!(line, "/usr/local/bin/deploy foobie master abc123");
    }

    #[test]
    fn commit_is_only_added_for_push_events() {
        let action = ShellAction {
            script: "/usr/local/bin/deploy".to_string(),
            prefix: None,
            send_event: false,
        };
        let mut event = push_event("foobie", "refs/heads/master", Some("abc123"));
        event.kind = "issues".to_string();

        let line = action.command_line(&event, &[]).unwrap();
        assert_eq!(line, "/usr/local/bin/deploy foobie master");
    }

    #[test]
    fn prefix_and_extra_args_wrap_the_invocation() {
        let action = ShellAction {
            script: "scripts/build.sh".to_string(),
            prefix: Some("bash".to_string()),
            send_event: false,
        };
        let event = push_event("foobie", "refs/heads/main", None);
        let args = vec!["--verbose".to_string(), "--fast".to_string()];

        let line = action.command_line(&event, &args).unwrap();
        assert_eq!(line, "bash scripts/build.sh foobie main --verbose --fast");
    }

    #[test]
    fn missing_ref_omits_the_branch_argument() {
        let action = ShellAction {
            script: "/bin/handle".to_string(),
            prefix: None,
            send_event: false,
        };
        let event =
            Event::from_payload("issues", json!({"repository": {"name": "foobie"}})).unwrap();

        let line = action.command_line(&event, &[]).unwrap();
        assert_eq!(line, "/bin/handle foobie");
    }

    #[test]
    fn send_event_forwards_the_serialized_event() {
        let action = ShellAction {
            script: "/bin/handle".to_string(),
            prefix: None,
            send_event: true,
        };
        let event = push_event("foobie", "refs/heads/main", None);

        let line = action.command_line(&event, &["ignored".to_string()]).unwrap();
        let serialized = serde_json::to_string(&event).unwrap();
        assert_eq!(line, format!("/bin/handle {serialized}"));
    }
}
