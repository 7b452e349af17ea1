//! Event routing: evaluate every rule against an incoming event and trigger
//! the matches.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use crate::event::Event;
use crate::notify::{Notifier, RuleNotification};
use crate::rule::Rule;

/// Routes decoded webhook events to matching rules.
///
/// Holds the rules in configuration order; every matching rule fires. One
/// rule declining to run (already busy) never affects its neighbors, and no
/// action outcome ever propagates back out of [`route`](Dispatcher::route).
pub struct Dispatcher {
    rules: Vec<Arc<Rule>>,
    notifier: Notifier,
}

impl Dispatcher {
    /// Creates a dispatcher over the given rules, keeping their order.
    pub fn new(rules: Vec<Rule>) -> Self {
        info!(rule_count = rules.len(), "creating dispatcher");
        Dispatcher {
            rules: rules.into_iter().map(Arc::new).collect(),
            notifier: Notifier::new(),
        }
    }

    /// Subscribes an observer to rule lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<RuleNotification> {
        self.notifier.subscribe()
    }

    /// Routes one event: every matching rule is triggered, independently.
    ///
    /// Never blocks on an action; execution outcomes arrive on the
    /// notification stream.
    pub fn route(&self, event: &Event) {
        info!(
            kind = %event.kind,
            repository = %event.repository,
            "processing event"
        );

        for rule in &self.rules {
            if !rule.matches(event) {
                trace!(rule = %rule.name(), "rule does not match");
                continue;
            }

            debug!(rule = %rule.name(), "rule matches; spawning the exec");
            rule.trigger(event.clone(), self.notifier.clone());
        }
    }
}
