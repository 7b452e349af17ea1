//! Lifecycle notifications for rule executions.
//!
//! The dispatcher owns a broadcast channel; any collaborator (logging, chat
//! reporting) may [`subscribe`](Notifier::subscribe) and consume the stream.
//! Send errors are ignored: a dispatcher with no subscribers still runs its
//! rules.

use tokio::sync::broadcast;

/// Capacity of the notification channel. Slow subscribers past this lag
/// lose the oldest notifications, never block the rules.
const CHANNEL_CAPACITY: usize = 256;

/// One lifecycle notification from a rule execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleNotification {
    /// A rule began an execution.
    Running {
        /// The rule's derived name.
        rule: String,
    },

    /// A rule refused to re-enter while a run was still in flight.
    ///
    /// Informational, not a failure: the in-flight run continues.
    Declined {
        /// The rule's derived name.
        rule: String,
    },

    /// A run finished, successfully or not.
    Complete {
        /// The rule's derived name.
        rule: String,
        /// Exit code of the action (0 = success, 127 = spawn failure).
        exit_code: i32,
        /// Error-level output captured during the run.
        error_output: String,
        /// Repository the triggering event belonged to.
        repository: String,
        /// Branch derived from the triggering event's ref.
        branch: String,
    },

    /// A callback action reported an error. No `Complete` follows for
    /// that run.
    Error {
        /// The rule's derived name.
        rule: String,
        /// The reported error, rendered for display.
        error: String,
    },
}

/// Sending half of the notification stream, handed to rules at trigger time.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<RuleNotification>,
}

impl Notifier {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Notifier { tx }
    }

    /// Subscribes a new observer to the notification stream.
    pub fn subscribe(&self) -> broadcast::Receiver<RuleNotification> {
        self.tx.subscribe()
    }

    pub(crate) fn running(&self, rule: &str) {
        self.send(RuleNotification::Running {
            rule: rule.to_string(),
        });
    }

    pub(crate) fn declined(&self, rule: &str) {
        self.send(RuleNotification::Declined {
            rule: rule.to_string(),
        });
    }

    pub(crate) fn complete(
        &self,
        rule: &str,
        exit_code: i32,
        error_output: String,
        repository: &str,
        branch: &str,
    ) {
        self.send(RuleNotification::Complete {
            rule: rule.to_string(),
            exit_code,
            error_output,
            repository: repository.to_string(),
            branch: branch.to_string(),
        });
    }

    pub(crate) fn error(&self, rule: &str, error: String) {
        self.send(RuleNotification::Error {
            rule: rule.to_string(),
            error,
        });
    }

    fn send(&self, notification: RuleNotification) {
        // A send error only means nobody is listening right now.
        let _ = self.tx.send(notification);
    }
}
