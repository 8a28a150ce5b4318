//! Store-level actions: typed session operations that become multi-path
//! update batches.
//!
//! The store owns a debounced [`UpdateQueue`] for high-frequency staged
//! edits (the live-session path) and shares the same sink for the direct
//! writes that must land immediately: starting, saving, and discarding a
//! session, and saving preferences.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;

use crate::errors::{Result, SyncError};
use crate::model::{
    DrinkingSession, DrinksList, Preferences, SessionId, Timestamp, TzOffset, UserId, UserStatus,
    Validate,
};
use crate::paths::{routes, FieldPath, KeyGenerator, UpdateMap};
use crate::queue::UpdateQueue;
use crate::sink::UpdateSink;

/// Partial edit of a session, staged through the batching queue.
///
/// Only set fields are written; each one lands at its own child path so
/// concurrent edits to different fields never clobber each other.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionPatch {
    /// Replace the full drinks list.
    pub drinks: Option<DrinksList>,
    /// Set the blackout flag.
    pub blackout: Option<bool>,
    /// Set the note.
    pub note: Option<String>,
    /// Move the session end.
    pub end_time: Option<Timestamp>,
    /// Set or clear the live marker.
    pub ongoing: Option<bool>,
}

impl SessionPatch {
    fn fields(&self) -> Result<Vec<(&'static str, Value)>> {
        let mut fields = Vec::new();
        if let Some(drinks) = &self.drinks {
            fields.push(("drinks", serde_json::to_value(drinks)?));
        }
        if let Some(blackout) = self.blackout {
            fields.push(("blackout", Value::Bool(blackout)));
        }
        if let Some(note) = &self.note {
            fields.push(("note", Value::String(note.clone())));
        }
        if let Some(end_time) = self.end_time {
            fields.push(("end_time", Value::from(end_time)));
        }
        if let Some(ongoing) = self.ongoing {
            fields.push(("ongoing", Value::Bool(ongoing)));
        }
        Ok(fields)
    }
}

/// Typed actions over one user's synced data.
pub struct SessionStore<S>
where
    S: UpdateSink<Key = FieldPath, Value = Value>,
{
    sink: Arc<S>,
    queue: UpdateQueue<Arc<S>>,
    user: UserId,
    keys: Mutex<KeyGenerator>,
}

impl<S> SessionStore<S>
where
    S: UpdateSink<Key = FieldPath, Value = Value>,
{
    /// Store with a default-configured queue in front of `sink`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(sink: S, user: UserId) -> Self {
        let sink = Arc::new(sink);
        let queue = UpdateQueue::new(Arc::clone(&sink));
        Self::from_parts(sink, queue, user)
    }

    /// Store around an already-shared sink and a queue built over it,
    /// for callers that configure the queue themselves.
    #[must_use]
    pub fn from_parts(sink: Arc<S>, queue: UpdateQueue<Arc<S>>, user: UserId) -> Self {
        Self {
            sink,
            queue,
            user,
            keys: Mutex::new(KeyGenerator::new()),
        }
    }

    /// The user this store writes for.
    #[must_use]
    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// Mint a fresh session id for the given wall-clock time.
    #[must_use]
    pub fn next_session_id(&self, now: Timestamp) -> SessionId {
        self.keys.lock().next_key(now)
    }

    async fn apply_direct(&self, updates: UpdateMap) -> Result<()> {
        self.sink
            .apply(updates)
            .await
            .map_err(|error| SyncError::FlushFailed(error.to_string()))
    }

    /// Start recording a live session: create the session under a fresh
    /// id and point the user's status at it, in one direct write.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::FlushFailed` if the write is rejected and
    /// `SyncError::Serde` if encoding fails.
    pub async fn start_live_session(
        &self,
        now: Timestamp,
        timezone: TzOffset,
    ) -> Result<(SessionId, DrinkingSession)> {
        let id = self.next_session_id(now);
        let session = DrinkingSession::live(now, timezone);
        let status = UserStatus {
            last_online: now,
            latest_session_id: Some(id.clone()),
            latest_session: Some(session.clone()),
        };
        let mut updates = UpdateMap::new();
        updates.insert(
            routes::user_session(&self.user, &id),
            serde_json::to_value(&session)?,
        );
        updates.insert(routes::user_status(&self.user), serde_json::to_value(&status)?);
        self.apply_direct(updates).await?;
        Ok((id, session))
    }

    /// Stage a partial edit of a session on the batching queue. With
    /// `mirror_status` the same fields are also staged under the user's
    /// denormalized latest-session status.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Serde` if a field cannot be encoded and
    /// `SyncError::InvalidPathSegment` if a path cannot be formed. The
    /// eventual network write reports through the queue's failure hook,
    /// never here.
    pub fn stage_session_update(
        &self,
        id: &SessionId,
        patch: &SessionPatch,
        mirror_status: bool,
    ) -> Result<()> {
        let fields = patch.fields()?;
        if fields.is_empty() {
            return Ok(());
        }
        let session_base = routes::user_session(&self.user, id);
        let status_base = routes::user_status_latest_session(&self.user);
        let mut updates = Vec::with_capacity(fields.len() * 2);
        for (field, value) in fields {
            if mirror_status {
                updates.push((status_base.child(field)?, value.clone()));
            }
            updates.push((session_base.child(field)?, value));
        }
        self.queue.enqueue(updates);
        Ok(())
    }

    /// Final write of a whole session. The live marker is stripped; when
    /// the session was live, the user's status is rewritten to match.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Schema` if the session fails validation,
    /// `SyncError::Serde` on encoding failure, and
    /// `SyncError::FlushFailed` if the write is rejected.
    pub async fn save_session(
        &self,
        id: &SessionId,
        session: &DrinkingSession,
        now: Timestamp,
        was_live: bool,
    ) -> Result<()> {
        session.validate()?;
        let mut session = session.clone();
        session.ongoing = None;

        let mut updates = UpdateMap::new();
        updates.insert(
            routes::user_session(&self.user, id),
            serde_json::to_value(&session)?,
        );
        if was_live {
            let status = UserStatus {
                last_online: now,
                latest_session_id: Some(id.clone()),
                latest_session: Some(session),
            };
            updates.insert(routes::user_status(&self.user), serde_json::to_value(&status)?);
        }
        self.apply_direct(updates).await
    }

    /// Delete a session. When it was the live one, the user's status
    /// drops its latest-session fields in the same write.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Serde` on encoding failure and
    /// `SyncError::FlushFailed` if the write is rejected.
    pub async fn discard_session(
        &self,
        id: &SessionId,
        now: Timestamp,
        was_live: bool,
    ) -> Result<()> {
        let mut updates = UpdateMap::new();
        updates.insert(routes::user_session(&self.user, id), Value::Null);
        if was_live {
            let status = UserStatus {
                last_online: now,
                latest_session_id: None,
                latest_session: None,
            };
            updates.insert(routes::user_status(&self.user), serde_json::to_value(&status)?);
        }
        self.apply_direct(updates).await
    }

    /// Validate and write the whole preferences object, directly.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Schema` if the preferences fail validation,
    /// `SyncError::Serde` on encoding failure, and
    /// `SyncError::FlushFailed` if the write is rejected.
    pub async fn save_preferences(&self, preferences: &Preferences) -> Result<()> {
        preferences.validate()?;
        let mut updates = UpdateMap::new();
        updates.insert(
            routes::user_preferences(&self.user),
            serde_json::to_value(preferences)?,
        );
        self.apply_direct(updates).await
    }

    /// Flush staged edits right now instead of waiting out the window.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::FlushFailed` if the forced flush is rejected,
    /// or `SyncError::RetriesExhausted` when the rejection abandons the
    /// batch at the retry bound.
    pub async fn flush_pending(&self) -> Result<()> {
        self.queue.flush_now().await
    }

    /// Whether a staged-edit flush is in flight.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.queue.is_pending()
    }

    /// Watch channel mirroring [`SessionStore::is_pending`].
    #[must_use]
    pub fn subscribe_pending(&self) -> watch::Receiver<bool> {
        self.queue.subscribe_pending()
    }

    /// Number of staged fields not yet flushed.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.queue.pending_len()
    }

    /// Drain staged edits and stop the queue worker.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::FlushFailed` if the final flush is rejected.
    pub async fn shutdown(self) -> Result<()> {
        let Self { queue, .. } = self;
        queue.shutdown().await
    }
}
