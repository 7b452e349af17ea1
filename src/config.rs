//! Rule configuration: options, validation, and rules-file loading.
//!
//! A [`RuleConfig`] is the declarative shape of one rule. Shell rules can be
//! loaded from a JSON rules file; callback rules are attached
//! programmatically with [`RuleConfig::with_callback`]. Validation happens
//! once, in [`RuleConfig::build`]: a process never starts with an invalid
//! rule.

use std::fmt;
use std::path::Path;
use std::sync::atomic::AtomicBool;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::rule::{Action, CallbackFn, Rule, ShellAction};

/// Errors constructing rules from configuration. All fatal: an invalid rule
/// stops startup rather than silently not firing.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The `event` option is missing or empty.
    #[error("rules require an `event` string")]
    MissingEvent,

    /// The repo `pattern` option is missing or empty.
    #[error("rules require a repo `pattern`")]
    MissingPattern,

    /// A pattern failed to compile.
    #[error("invalid `{field}` regex: {source}")]
    InvalidPattern {
        field: &'static str,
        source: regex::Error,
    },

    /// Neither a script nor a callback was configured.
    #[error("rules require either a `script` or a callback")]
    MissingAction,

    /// Both a script and a callback were configured.
    #[error("rules take either a `script` or a callback, not both")]
    AmbiguousAction,

    /// The rules file could not be read.
    #[error("failed to read rules file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    /// The rules file could not be parsed.
    #[error("failed to parse rules file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

fn default_classify() -> bool {
    true
}

/// Options for a single rule, as they appear in a rules file.
#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    /// Event-kind filter; `*` matches every kind.
    pub event: String,

    /// Regex matched against the repository name.
    pub pattern: String,

    /// Optional regex matched against the branch.
    #[serde(default)]
    pub branch_pattern: Option<String>,

    /// External command to run on match.
    #[serde(default)]
    pub script: Option<String>,

    /// Optional prefix prepended to `script` (e.g. an interpreter).
    #[serde(default)]
    pub cmd: Option<String>,

    /// Extra arguments appended to every invocation.
    #[serde(default)]
    pub args: Vec<String>,

    /// Forward the full serialized event instead of positional args.
    #[serde(default)]
    pub send_event: bool,

    /// Allow overlapping runs of this rule.
    #[serde(default)]
    pub concurrent_okay: bool,

    /// Promote error-looking stdout lines to error level and into the
    /// captured error output. On by default; turn off for actions whose
    /// legitimate output trips the heuristic.
    #[serde(default = "default_classify")]
    pub classify_output: bool,

    /// In-process callback action. Not expressible in a rules file.
    #[serde(skip)]
    pub callback: Option<CallbackFn>,
}

impl RuleConfig {
    /// Starts a config with the two required matching options.
    pub fn new(event: impl Into<String>, pattern: impl Into<String>) -> Self {
        RuleConfig {
            event: event.into(),
            pattern: pattern.into(),
            branch_pattern: None,
            script: None,
            cmd: None,
            args: Vec::new(),
            send_event: false,
            concurrent_okay: false,
            classify_output: true,
            callback: None,
        }
    }

    /// Sets the external command to run on match.
    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }

    /// Sets the in-process callback to run on match.
    pub fn with_callback(mut self, callback: CallbackFn) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Sets the branch pattern.
    pub fn with_branch_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.branch_pattern = Some(pattern.into());
        self
    }

    /// Sets the command prefix.
    pub fn with_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.cmd = Some(cmd.into());
        self
    }

    /// Sets the extra arguments.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Forwards the full serialized event to shell actions.
    pub fn with_send_event(mut self, send_event: bool) -> Self {
        self.send_event = send_event;
        self
    }

    /// Allows overlapping runs of this rule.
    pub fn with_concurrent_okay(mut self, concurrent_okay: bool) -> Self {
        self.concurrent_okay = concurrent_okay;
        self
    }

    /// Toggles the stdout error-promotion heuristic.
    pub fn with_classify_output(mut self, classify_output: bool) -> Self {
        self.classify_output = classify_output;
        self
    }

    /// Validates the options and compiles them into a [`Rule`].
    pub fn build(self) -> Result<Rule, ConfigError> {
        if self.event.is_empty() {
            return Err(ConfigError::MissingEvent);
        }
        if self.pattern.is_empty() {
            return Err(ConfigError::MissingPattern);
        }

        let repo_pattern = Regex::new(&self.pattern).map_err(|source| {
            ConfigError::InvalidPattern {
                field: "pattern",
                source,
            }
        })?;
        let branch_pattern = self
            .branch_pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|source| ConfigError::InvalidPattern {
                field: "branch_pattern",
                source,
            })?;

        let action = match (self.script, self.callback) {
            (Some(script), None) => Action::Shell(ShellAction {
                script,
                prefix: self.cmd,
                send_event: self.send_event,
            }),
            (None, Some(callback)) => Action::Callback(callback),
            (None, None) => return Err(ConfigError::MissingAction),
            (Some(_), Some(_)) => return Err(ConfigError::AmbiguousAction),
        };

        Ok(Rule {
            name: format!("rule:{}:{}", repo_pattern.as_str(), self.event),
            event_filter: self.event,
            repo_pattern,
            branch_pattern,
            action,
            extra_args: self.args,
            concurrent_okay: self.concurrent_okay,
            classify_output: self.classify_output,
            busy: AtomicBool::new(false),
        })
    }
}

impl fmt::Debug for RuleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleConfig")
            .field("event", &self.event)
            .field("pattern", &self.pattern)
            .field("branch_pattern", &self.branch_pattern)
            .field("script", &self.script)
            .field("cmd", &self.cmd)
            .field("args", &self.args)
            .field("send_event", &self.send_event)
            .field("concurrent_okay", &self.concurrent_okay)
            .field("classify_output", &self.classify_output)
            .field("callback", &self.callback.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Loads shell-action rules from a JSON file holding an array of
/// [`RuleConfig`] objects.
pub fn load_rules(path: &Path) -> Result<Vec<Rule>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;

    let configs: Vec<RuleConfig> =
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;

    configs.into_iter().map(RuleConfig::build).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_shell_rule() {
        let rule = RuleConfig::new("*", "foo")
            .with_script("/usr/local/bin/fortune")
            .build()
            .unwrap();

        assert_eq!(rule.name(), "rule:foo:*");
        assert!(!rule.is_busy());
    }

    #[test]
    fn requires_an_event() {
        let err = RuleConfig::new("", "foo")
            .with_script("/bin/true")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingEvent));
    }

    #[test]
    fn requires_a_pattern() {
        let err = RuleConfig::new("*", "")
            .with_script("/bin/true")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingPattern));
    }

    #[test]
    fn rejects_an_invalid_pattern() {
        let err = RuleConfig::new("*", "(")
            .with_script("/bin/true")
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidPattern { field: "pattern", .. }
        ));
    }

    #[test]
    fn rejects_an_invalid_branch_pattern() {
        let err = RuleConfig::new("*", "foo")
            .with_script("/bin/true")
            .with_branch_pattern("[")
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidPattern {
                field: "branch_pattern",
                ..
            }
        ));
    }

    #[test]
    fn requires_exactly_one_action() {
        let err = RuleConfig::new("*", "foo").build().unwrap_err();
        assert!(matches!(err, ConfigError::MissingAction));

        use futures::FutureExt;
        let callback: CallbackFn =
            std::sync::Arc::new(|_event, _args| async { Ok(()) }.boxed());
        let err = RuleConfig::new("*", "foo")
            .with_script("/bin/true")
            .with_callback(callback)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::AmbiguousAction));
    }

    #[test]
    fn loads_rules_from_a_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(
            &path,
            r#"[
                {"event": "push", "pattern": "foo", "script": "/bin/true", "args": ["x"]},
                {"event": "*", "pattern": "bar", "script": "/bin/false", "concurrent_okay": true}
            ]"#,
        )
        .unwrap();

        let rules = load_rules(&path).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].name(), "rule:foo:push");
        assert_eq!(rules[1].name(), "rule:bar:*");
    }

    #[test]
    fn rejects_unknown_rules_file_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(
            &path,
            r#"[{"event": "push", "pattern": "foo", "script": "/bin/true", "nope": 1}]"#,
        )
        .unwrap();

        let err = load_rules(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_rules_file_is_an_io_error() {
        let err = load_rules(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
