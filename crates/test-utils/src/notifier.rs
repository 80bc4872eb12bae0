use std::sync::{Arc, Mutex};

use chainrun::notify::{Notification, NotificationEvent, Notifier};

/// Notifier that keeps every notification for later assertions.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self, event: NotificationEvent) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.event == event)
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: &Notification) {
        self.sent.lock().unwrap().push(notification.clone());
    }
}
