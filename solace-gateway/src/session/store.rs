//! In-memory session store with per-session locking and deadline-based expiry.
//!
//! The map itself sits behind a short-lived synchronous mutex that is never
//! held across an `.await`. Each session has its own async mutex, so work on
//! one session (including an upstream call made while holding a
//! [`SessionHandle`]) never blocks another session.
//!
//! Expiry is a deadline stored next to each session. Every lookup discards a
//! session whose deadline has passed, and [`SessionStore::sweep`] reclaims the
//! ones nobody asks for again. A session that is held or awaited by an
//! exchange is never discarded, even past its deadline; the exchange refreshes
//! the deadline when it finishes.

use super::types::{ConversationHistory, ConversationTurn, HistoryError};
use crate::clock::{system_clock, SharedClock};
use solace_common::SessionSettings;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Store parameters.
#[derive(Debug, Clone)]
pub struct SessionStoreConfig {
    /// Lifetime of a session from creation or from its last refresh.
    pub ttl: Duration,
    /// Truncation limit applied to every history.
    pub max_turns: Option<usize>,
    /// Persona instruction seeded into new histories.
    pub system_prompt: String,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_turns: None,
            system_prompt: super::types::SYSTEM_PROMPT.to_string(),
        }
    }
}

impl From<&SessionSettings> for SessionStoreConfig {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            ttl: settings.ttl(),
            max_turns: settings.max_turns,
            ..Self::default()
        }
    }
}

/// A conversation owned by the store.
#[derive(Debug)]
struct Session {
    id: String,
    history: ConversationHistory,
}

struct Slot {
    expires_at: Instant,
    session: Arc<AsyncMutex<Session>>,
}

impl Slot {
    /// Some request holds this session or is queued on its lock.
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.session) > 1
    }

    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at || self.in_use()
    }
}

/// Session store keyed by opaque session id.
#[derive(Clone)]
pub struct SessionStore {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
    config: Arc<SessionStoreConfig>,
    clock: SharedClock,
}

impl SessionStore {
    pub fn new(config: SessionStoreConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: SessionStoreConfig, clock: SharedClock) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            config: Arc::new(config),
            clock,
        }
    }

    pub fn config(&self) -> &SessionStoreConfig {
        &self.config
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot>> {
        self.slots
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Return the live session for `id`, creating it when absent or expired.
    /// The flag is `true` when a new session was created.
    fn slot(&self, id: &str) -> (Arc<AsyncMutex<Session>>, bool) {
        let now = self.clock.now();
        let mut slots = self.lock_slots();

        if let Some(slot) = slots.get(id) {
            if slot.is_live(now) {
                return (Arc::clone(&slot.session), false);
            }
            tracing::debug!(session_id = id, "Session expired, starting fresh");
        }

        let session = Arc::new(AsyncMutex::new(Session {
            id: id.to_string(),
            history: ConversationHistory::new(self.config.system_prompt.clone())
                .with_max_turns(self.config.max_turns),
        }));
        slots.insert(
            id.to_string(),
            Slot {
                expires_at: now + self.config.ttl,
                session: Arc::clone(&session),
            },
        );
        tracing::debug!(session_id = id, active = slots.len(), "Session created");
        (session, true)
    }

    /// Snapshot of the history for `id`, seeding a new session if needed.
    pub async fn get_or_create(&self, id: &str) -> ConversationHistory {
        let (session, _) = self.slot(id);
        let session = session.lock().await;
        session.history.clone()
    }

    /// Append one turn to the session's history.
    pub async fn append(&self, id: &str, turn: ConversationTurn) -> Result<(), HistoryError> {
        let (session, _) = self.slot(id);
        let mut session = session.lock().await;
        session.history.push(turn)
    }

    /// Exclusive access to a session for the duration of one exchange.
    ///
    /// Concurrent callers for the same id queue here in arrival order.
    pub async fn acquire(&self, id: &str) -> SessionHandle {
        let (session, created) = self.slot(id);
        SessionHandle {
            guard: session.lock_owned().await,
            created,
        }
    }

    /// Replace the pending deadline for `id` with `now + ttl`.
    /// Returns `false` if the session no longer exists.
    pub fn schedule_expiry(&self, id: &str, ttl: Duration) -> bool {
        let now = self.clock.now();
        let mut slots = self.lock_slots();
        match slots.get_mut(id) {
            Some(slot) => {
                slot.expires_at = now + ttl;
                true
            }
            None => false,
        }
    }

    /// Remove all state for `id`.
    pub fn delete(&self, id: &str) -> bool {
        self.lock_slots().remove(id).is_some()
    }

    /// Remove every idle session whose deadline has passed. Returns the number removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut slots = self.lock_slots();
        let before = slots.len();
        slots.retain(|_, slot| slot.is_live(now));
        before - slots.len()
    }

    /// Number of sessions currently held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.lock_slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Locked session. Dropping it lets the next request for the same id proceed.
pub struct SessionHandle {
    guard: OwnedMutexGuard<Session>,
    created: bool,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.guard.id
    }

    /// Whether this exchange created the session.
    pub fn is_new(&self) -> bool {
        self.created
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.guard.history
    }

    pub fn append(&mut self, turn: ConversationTurn) -> Result<(), HistoryError> {
        self.guard.history.push(turn)
    }
}
