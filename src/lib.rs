//! Webhook rule dispatch engine.
//!
//! Receives decoded webhook events, matches each one against a configured
//! set of rules, and runs every matching rule's action (an external command
//! or an in-process callback) without blocking the caller. A per-rule
//! single-flight guard prevents overlapping runs unless a rule explicitly
//! allows them, error output is captured per run, and lifecycle
//! notifications (running, declined, complete, error) are published on a
//! broadcast stream for reporting collaborators.
//!
//! The HTTP boundary (signature verification, payload decoding) and the
//! notification transport are deliberately outside this crate's core; they
//! hand in an [`Event`] via [`Dispatcher::route`] and consume the stream
//! via [`Dispatcher::subscribe`].

pub mod config;
pub mod dispatch;
pub mod event;
pub mod notify;
pub mod report;
pub mod rule;

pub use config::{ConfigError, RuleConfig, load_rules};
pub use dispatch::Dispatcher;
pub use event::Event;
pub use notify::RuleNotification;
pub use rule::Rule;
