//! Rate-limited desktop notifications. The transport itself (`notify-rust`,
//! a thin binding over the OS notification bus) is an external collaborator;
//! this module only owns the dedup policy in front of it.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEDUP_WINDOW: Duration = Duration::from_secs(10);
/// Bound on any subprocess error excerpt bundled into a notification body.
pub const EXCERPT_CAP_BYTES: usize = 1200;

pub struct Notifier {
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl Default for Notifier {
    fn default() -> Self {
        Notifier {
            last_sent: Mutex::new(HashMap::new()),
        }
    }
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends `title`/`message` through the desktop transport unless a call
    /// with the same `key` fired within the last 10 seconds.
    pub fn notify(&self, key: &str, title: &str, message: &str) {
        {
            let mut last = self.last_sent.lock().unwrap();
            if let Some(at) = last.get(key) {
                if at.elapsed() < DEDUP_WINDOW {
                    return;
                }
            }
            last.insert(key.to_string(), Instant::now());
        }
        send(title, message);
    }
}

fn send(title: &str, message: &str) {
    if let Err(e) = notify_rust::Notification::new().summary(title).body(message).show() {
        log::debug!("desktop notification transport unavailable: {}", e);
    }
}

/// Truncates `text` to at most `EXCERPT_CAP_BYTES`, on a char boundary.
pub fn cap_excerpt(text: &str) -> String {
    if text.len() <= EXCERPT_CAP_BYTES {
        return text.to_string();
    }
    let mut end = EXCERPT_CAP_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedups_same_key_within_window() {
        let notifier = Notifier::new();
        notifier.notify("k", "t", "m1");
        let before = notifier.last_sent.lock().unwrap().get("k").copied();
        notifier.notify("k", "t", "m2");
        let after = notifier.last_sent.lock().unwrap().get("k").copied();
        assert_eq!(before, after);
    }

    #[test]
    fn caps_excerpt_length() {
        let long = "x".repeat(5000);
        let capped = cap_excerpt(&long);
        assert!(capped.len() <= EXCERPT_CAP_BYTES + 4);
    }
}
