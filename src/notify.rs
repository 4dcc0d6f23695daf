// 🔔 Support notification - who hears about a failed production phase
//
// Delivery to the configured webhook is out of scope; the URL is only logged.

use std::sync::Mutex;

pub trait SupportNotifier {
    fn notify_failure(&self, phase: &str, message: &str);
}

/// Emits an error event carrying the configured support channel
#[derive(Debug, Default)]
pub struct LogNotifier {
    pub webhook: Option<String>,
}

impl LogNotifier {
    pub fn new(webhook: Option<String>) -> Self {
        LogNotifier { webhook }
    }
}

impl SupportNotifier for LogNotifier {
    fn notify_failure(&self, phase: &str, message: &str) {
        tracing::error!(
            phase,
            webhook = self.webhook.as_deref().unwrap_or("<none>"),
            "SUPPORT ALERT: {}",
            message
        );
    }
}

/// Keeps notifications in memory
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl SupportNotifier for RecordingNotifier {
    fn notify_failure(&self, phase: &str, message: &str) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((phase.to_string(), message.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_notifier_keeps_messages() {
        let notifier = RecordingNotifier::default();
        notifier.notify_failure("dm3_prod", "pre-flight checks failed");

        assert_eq!(
            notifier.sent(),
            vec![("dm3_prod".to_string(), "pre-flight checks failed".to_string())]
        );
    }

    #[test]
    fn test_log_notifier_does_not_panic_without_webhook() {
        LogNotifier::new(None).notify_failure("dm3_prod", "boom");
    }
}
