//! Feedback tracking: remembers generated replies so a later Good/Bad press
//! can be tied back to the exchange it rates.

use md5::{Digest, Md5};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::chatbot::message::now_timestamp;

/// Callback payload prefix for feedback buttons.
const PAYLOAD_PREFIX: &str = "feedback";

/// A generated reply awaiting feedback.
#[derive(Debug, Clone)]
pub struct FeedbackEntry {
    pub id: String,
    pub user_message: String,
    pub bot_response: String,
    pub chat_id: i64,
    pub timestamp: String,
    created: Instant,
}

impl FeedbackEntry {
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created)
    }
}

/// Decides when an entry stops being resolvable.
pub trait EvictionPolicy: Send + Sync {
    fn is_expired(&self, entry: &FeedbackEntry, now: Instant) -> bool;

    /// True when `is_expired` can never return true; the store then skips
    /// its sweep on insert.
    fn never_expires(&self) -> bool {
        false
    }
}

/// Entries live until the process exits.
pub struct KeepForever;

impl EvictionPolicy for KeepForever {
    fn is_expired(&self, _entry: &FeedbackEntry, _now: Instant) -> bool {
        false
    }

    fn never_expires(&self) -> bool {
        true
    }
}

/// Entries expire a fixed time after they were registered.
pub struct TimeToLive(pub Duration);

impl EvictionPolicy for TimeToLive {
    fn is_expired(&self, entry: &FeedbackEntry, now: Instant) -> bool {
        entry.age(now) > self.0
    }
}

/// Derive the feedback identifier for an exchange.
///
/// Lowercase hex MD5 of `"{chat_id}:{prompt}:{response}"`; 32 chars, which
/// keeps `feedback:Good:{id}` inside Telegram's 64-byte callback limit.
pub fn feedback_id(chat_id: i64, prompt: &str, response: &str) -> String {
    let digest = Md5::digest(format!("{chat_id}:{prompt}:{response}").as_bytes());
    format!("{:x}", digest)
}

/// Callback payload carried by a feedback button.
pub fn payload(label: &str, id: &str) -> String {
    format!("{PAYLOAD_PREFIX}:{label}:{id}")
}

/// Split `feedback:{label}:{id}` into `(label, id)`.
pub fn parse_payload(data: &str) -> Option<(&str, &str)> {
    let mut parts = data.splitn(3, ':');
    if parts.next()? != PAYLOAD_PREFIX {
        return None;
    }
    let label = parts.next()?;
    let id = parts.next()?;
    if label.is_empty() || id.is_empty() {
        return None;
    }
    Some((label, id))
}

/// Application-scoped map of feedback id to exchange.
pub struct FeedbackStore {
    entries: Mutex<HashMap<String, FeedbackEntry>>,
    policy: Box<dyn EvictionPolicy>,
}

impl FeedbackStore {
    pub fn new(policy: Box<dyn EvictionPolicy>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            policy,
        }
    }

    /// Register an exchange and return its identifier.
    ///
    /// Registering the same exchange twice refreshes the entry.
    pub fn register(&self, chat_id: i64, user_message: &str, bot_response: &str) -> String {
        let id = feedback_id(chat_id, user_message, bot_response);
        let now = Instant::now();
        let entry = FeedbackEntry {
            id: id.clone(),
            user_message: user_message.to_string(),
            bot_response: bot_response.to_string(),
            chat_id,
            timestamp: now_timestamp(),
            created: now,
        };

        let mut entries = self.lock();
        if !self.policy.never_expires() {
            let before = entries.len();
            entries.retain(|_, e| !self.policy.is_expired(e, now));
            if entries.len() < before {
                debug!("Evicted {} feedback entries", before - entries.len());
            }
        }
        entries.insert(id.clone(), entry);
        id
    }

    /// Look up an entry. Expired entries are reported as absent.
    pub fn get(&self, id: &str) -> Option<FeedbackEntry> {
        let entries = self.lock();
        entries
            .get(id)
            .filter(|e| !self.policy.is_expired(e, Instant::now()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, FeedbackEntry>> {
        // A panic while holding the lock leaves the map intact; keep using it.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for FeedbackStore {
    fn default() -> Self {
        Self::new(Box::new(KeepForever))
    }
}
