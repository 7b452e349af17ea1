//! Rules: configured match-and-act units.
//!
//! A rule pairs an immutable matching predicate (event kind, repo pattern,
//! optional branch pattern) with an [`Action`] and a per-rule single-flight
//! guard. Rules are built once at startup from [`RuleConfig`] and live for
//! the whole process.
//!
//! [`RuleConfig`]: crate::config::RuleConfig

mod action;
mod exec;


pub use action::{Action, CallbackError, CallbackFn, ShellAction};
pub use exec::SPAWN_FAILURE_CODE;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use regex::Regex;

use crate::event::Event;

/// A configured matcher plus the action to run on match.
pub struct Rule {
    pub(crate) name: String,
    pub(crate) event_filter: String,
    pub(crate) repo_pattern: Regex,
    pub(crate) branch_pattern: Option<Regex>,
    pub(crate) action: Action,
    pub(crate) extra_args: Vec<String>,
    pub(crate) concurrent_okay: bool,
    pub(crate) classify_output: bool,

    /// Single-flight guard: set for the duration of a run.
    pub(crate) busy: AtomicBool,
}

impl Rule {
    /// The derived identifier, `rule:<pattern>:<event>`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a run is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Pure matching predicate, short-circuiting on the first failing leg:
    /// event kind (or `*`), then repo pattern, then branch pattern.
    ///
    /// An event without a ref has the empty branch; a configured branch
    /// pattern then only matches if it matches the empty string.
    pub fn matches(&self, event: &Event) -> bool {
        if self.event_filter != "*" && self.event_filter != event.kind {
            return false;
        }

        if !self.repo_pattern.is_match(&event.repository) {
            return false;
        }

        match &self.branch_pattern {
            Some(pattern) => pattern.is_match(event.branch()),
            None => true,
        }
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("event_filter", &self.event_filter)
            .field("repo_pattern", &self.repo_pattern.as_str())
            .field(
                "branch_pattern",
                &self.branch_pattern.as_ref().map(Regex::as_str),
            )
            .field("action", &self.action)
            .field("concurrent_okay", &self.concurrent_okay)
            .field("busy", &self.busy)
            .finish_non_exhaustive()
    }
}
