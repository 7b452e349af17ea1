//! Human-readable completion reporting.
//!
//! Consumes the dispatcher's notification stream, formats each outcome, and
//! forwards the text to a [`NotificationSink`]. The sink wraps the actual
//! transport (a chat webhook, usually) and owns chunking and retry behavior;
//! it always receives the complete text.

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::notify::RuleNotification;

/// Where formatted reports go.
pub trait NotificationSink: Send + Sync {
    /// Delivers one report. Delivery failures are the sink's problem to log;
    /// reporting never fails the engine.
    fn deliver(&self, text: String) -> BoxFuture<'_, ()>;
}

impl<S: NotificationSink + ?Sized> NotificationSink for std::sync::Arc<S> {
    fn deliver(&self, text: String) -> BoxFuture<'_, ()> {
        (**self).deliver(text)
    }
}

/// A sink that writes reports to the log. The default when no chat
/// transport is wired up.
#[derive(Debug, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn deliver(&self, text: String) -> BoxFuture<'_, ()> {
        async move {
            info!(target: "report", "{text}");
        }
        .boxed()
    }
}

/// Formats rule lifecycle notifications and forwards them to a sink.
pub struct Reporter<S> {
    sink: S,
    hostname: String,
}

impl<S: NotificationSink> Reporter<S> {
    /// Creates a reporter. The hostname is included in success reports so
    /// multi-host deployments can tell runs apart.
    pub fn new(sink: S, hostname: impl Into<String>) -> Self {
        Reporter {
            sink,
            hostname: hostname.into(),
        }
    }

    /// Consumes the stream until the dispatcher goes away.
    pub async fn run(self, mut notifications: broadcast::Receiver<RuleNotification>) {
        loop {
            match notifications.recv().await {
                Ok(notification) => self.handle(notification).await,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "reporter fell behind; notifications dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn handle(&self, notification: RuleNotification) {
        match notification {
            RuleNotification::Running { rule } => {
                info!(%rule, "execution started");
            }
            RuleNotification::Declined { rule } => {
                info!(%rule, "execution declined; previous run still in flight");
            }
            RuleNotification::Complete {
                rule,
                exit_code,
                error_output,
                repository,
                branch,
            } => {
                if exit_code == 0 {
                    self.sink
                        .deliver(self.success_message(&rule, &repository, &branch))
                        .await;
                } else {
                    warn!(%rule, exit_code, "execution failed");
                    self.sink
                        .deliver(failure_message(&rule, exit_code, &error_output))
                        .await;
                }
            }
            RuleNotification::Error { rule, error } => {
                warn!(%rule, %error, "callback reported an error");
                self.sink.deliver(format!("{rule}: callback error: {error}")).await;
            }
        }
    }

    fn success_message(&self, rule: &str, repository: &str, branch: &str) -> String {
        if branch.is_empty() {
            format!(
                "execution complete: {repository}: {rule}; hostname={}",
                self.hostname
            )
        } else {
            format!(
                "execution complete: {repository}:{branch}: {rule}; hostname={}",
                self.hostname
            )
        }
    }
}

fn failure_message(rule: &str, exit_code: i32, error_output: &str) -> String {
    let mut message = format!("{rule} exited with code {exit_code}");
    if !error_output.is_empty() {
        message.push('\n');
        message.push_str(error_output);
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::Notifier;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::timeout;

    #[derive(Default)]
    struct RecordingSink {
        messages: Mutex<Vec<String>>,
    }

    impl NotificationSink for RecordingSink {
        fn deliver(&self, text: String) -> BoxFuture<'_, ()> {
            async move {
                self.messages.lock().unwrap().push(text);
            }
            .boxed()
        }
    }

    fn reporter(sink: Arc<RecordingSink>) -> Reporter<Arc<RecordingSink>> {
        Reporter::new(sink, "testhost")
    }

    #[tokio::test]
    async fn successful_completion_reports_repo_branch_and_host() {
        let sink = Arc::new(RecordingSink::default());
        reporter(Arc::clone(&sink))
            .handle(RuleNotification::Complete {
                rule: "rule:foo:*".to_string(),
                exit_code: 0,
                error_output: String::new(),
                repository: "foobie".to_string(),
                branch: "master".to_string(),
            })
            .await;

        let messages = sink.messages.lock().unwrap();
        assert_eq!(
            messages.as_slice(),
            ["execution complete: foobie:master: rule:foo:*; hostname=testhost"]
        );
    }

    #[tokio::test]
    async fn branchless_completion_omits_the_branch() {
        let sink = Arc::new(RecordingSink::default());
        reporter(Arc::clone(&sink))
            .handle(RuleNotification::Complete {
                rule: "rule:foo:issues".to_string(),
                exit_code: 0,
                error_output: String::new(),
                repository: "foobie".to_string(),
                branch: String::new(),
            })
            .await;

        let messages = sink.messages.lock().unwrap();
        assert_eq!(
            messages.as_slice(),
            ["execution complete: foobie: rule:foo:issues; hostname=testhost"]
        );
    }

    #[tokio::test]
    async fn failed_completion_carries_the_captured_output() {
        let sink = Arc::new(RecordingSink::default());
        reporter(Arc::clone(&sink))
            .handle(RuleNotification::Complete {
                rule: "rule:foo:*".to_string(),
                exit_code: 3,
                error_output: "boom\n".to_string(),
                repository: "foobie".to_string(),
                branch: "master".to_string(),
            })
            .await;

        let messages = sink.messages.lock().unwrap();
        assert_eq!(
            messages.as_slice(),
            ["rule:foo:* exited with code 3\nboom\n"]
        );
    }

    #[tokio::test]
    async fn running_and_declined_are_log_only() {
        let sink = Arc::new(RecordingSink::default());
        let reporter = reporter(Arc::clone(&sink));
        reporter
            .handle(RuleNotification::Running {
                rule: "rule:foo:*".to_string(),
            })
            .await;
        reporter
            .handle(RuleNotification::Declined {
                rule: "rule:foo:*".to_string(),
            })
            .await;

        assert!(sink.messages.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_drains_the_stream_until_the_dispatcher_drops() {
        let sink = Arc::new(RecordingSink::default());
        let notifier = Notifier::new();
        let rx = notifier.subscribe();
        let handle = tokio::spawn(reporter(Arc::clone(&sink)).run(rx));

        notifier.complete("rule:foo:*", 0, String::new(), "foobie", "main");
        notifier.error("rule:foo:*", "x".to_string());
        drop(notifier);

        timeout(Duration::from_secs(5), handle)
            .await
            .expect("reporter did not stop")
            .unwrap();

        let messages = sink.messages.lock().unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages[1].contains("callback error: x"));
    }
}
