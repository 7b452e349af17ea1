//! Decoded webhook deliveries.
//!
//! The HTTP boundary verifies and decodes inbound deliveries before handing
//! an [`Event`] to the dispatcher. Events are immutable: created once per
//! delivery, read by every rule, dropped when routing finishes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Prefix stripped from a git ref when deriving the branch name.
const REFS_HEADS: &str = "refs/heads/";

/// Errors turning a raw payload into an [`Event`].
#[derive(Debug, Error)]
pub enum EventDecodeError {
    /// The payload carries no `repository.name`.
    #[error("missing repository information in payload")]
    MissingRepository,
}

/// One decoded webhook delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event kind from the delivery headers (e.g. "push").
    pub kind: String,

    /// Name of the repository the event belongs to.
    pub repository: String,

    /// Git ref, when the event carries one (e.g. "refs/heads/main").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_ref: Option<String>,

    /// Head commit after a push-like event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_commit: Option<String>,

    /// The raw decoded payload, forwarded verbatim to actions that ask for it.
    pub payload: Value,
}

impl Event {
    /// Builds an event from the delivery's event kind and decoded JSON body.
    ///
    /// Pulls out only the fields rules match on (`repository.name`, `ref`,
    /// `after`); the rest of the payload rides along untouched.
    pub fn from_payload(
        kind: impl Into<String>,
        payload: Value,
    ) -> Result<Self, EventDecodeError> {
        let repository = payload
            .get("repository")
            .and_then(|repo| repo.get("name"))
            .and_then(Value::as_str)
            .ok_or(EventDecodeError::MissingRepository)?
            .to_string();

        let git_ref = payload
            .get("ref")
            .and_then(Value::as_str)
            .map(str::to_string);
        let after_commit = payload
            .get("after")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Event {
            kind: kind.into(),
            repository,
            git_ref,
            after_commit,
            payload,
        })
    }

    /// The branch this event refers to: the ref with any `refs/heads/`
    /// prefix stripped, or the empty string when there is no ref.
    pub fn branch(&self) -> &str {
        match &self.git_ref {
            Some(git_ref) => git_ref.strip_prefix(REFS_HEADS).unwrap_or(git_ref),
            None => "",
        }
    }
}
