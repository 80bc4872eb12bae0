// src/notify/mod.rs

//! Failure notifications.
//!
//! The executor decides *when* to notify and hands a [`Notification`] to a
//! [`Notifier`]; how it is delivered (mail, chat, webhook) is up to the
//! implementation. [`LogNotifier`] is the built-in one and only writes a
//! structured log line per event.

use std::fmt;

use tracing::{error, warn};

use crate::config::model::DefaultSection;
use crate::engine::TaskId;

/// Kind of notification event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationEvent {
    /// A task attempt failed and the task will be retried.
    TaskRetry,
    /// A task failed its last allowed attempt.
    TaskFailed,
    /// The run ended `failed`. Emitted exactly once per failed run.
    RunFailed,
}

impl NotificationEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationEvent::TaskRetry => "task_retry",
            NotificationEvent::TaskFailed => "task_failed",
            NotificationEvent::RunFailed => "run_failed",
        }
    }
}

impl fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub event: NotificationEvent,
    pub run_id: String,
    /// `None` only for a run cancelled before any task was launched.
    pub task_id: Option<TaskId>,
    pub attempt: u32,
}

/// Which attempt-level events are sent. `RunFailed` is always sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationPolicy {
    pub on_retry: bool,
    pub on_failure: bool,
}

impl Default for NotificationPolicy {
    fn default() -> Self {
        Self {
            on_retry: false,
            on_failure: true,
        }
    }
}

impl NotificationPolicy {
    pub fn from_defaults(default: &DefaultSection) -> Self {
        Self {
            on_retry: default.email_on_retry,
            on_failure: default.email_on_failure,
        }
    }

    pub fn allows(&self, event: NotificationEvent) -> bool {
        match event {
            NotificationEvent::TaskRetry => self.on_retry,
            NotificationEvent::TaskFailed => self.on_failure,
            NotificationEvent::RunFailed => true,
        }
    }
}

/// Delivery side of the notification contract.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification);
}

/// Writes each notification to the log, tagged with owner and recipients.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier {
    owner: Option<String>,
    recipients: Vec<String>,
}

impl LogNotifier {
    pub fn new(owner: Option<String>, recipients: Vec<String>) -> Self {
        Self { owner, recipients }
    }

    pub fn from_defaults(default: &DefaultSection) -> Self {
        Self::new(default.owner.clone(), default.email.clone())
    }
}

impl Notifier for LogNotifier {
    fn notify(&self, n: &Notification) {
        let owner = self.owner.as_deref().unwrap_or("-");
        let recipients = self.recipients.join(",");
        let task = n.task_id.as_deref().unwrap_or("-");

        match n.event {
            NotificationEvent::TaskRetry => warn!(
                event = %n.event,
                run_id = %n.run_id,
                task = %task,
                attempt = n.attempt,
                owner = %owner,
                recipients = %recipients,
                "notification: task attempt failed; retry scheduled"
            ),
            NotificationEvent::TaskFailed | NotificationEvent::RunFailed => error!(
                event = %n.event,
                run_id = %n.run_id,
                task = %task,
                attempt = n.attempt,
                owner = %owner,
                recipients = %recipients,
                "notification: pipeline failure"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_failure_ignores_policy_flags() {
        let quiet = NotificationPolicy {
            on_retry: false,
            on_failure: false,
        };
        assert!(!quiet.allows(NotificationEvent::TaskRetry));
        assert!(!quiet.allows(NotificationEvent::TaskFailed));
        assert!(quiet.allows(NotificationEvent::RunFailed));
    }

    #[test]
    fn policy_follows_email_flags() {
        let default = DefaultSection {
            email_on_retry: true,
            email_on_failure: true,
            ..DefaultSection::default()
        };
        let policy = NotificationPolicy::from_defaults(&default);
        assert!(policy.allows(NotificationEvent::TaskRetry));
        assert!(policy.allows(NotificationEvent::TaskFailed));
    }
}
