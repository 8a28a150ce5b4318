//! Slash-separated field paths, the route table for synced entities, and
//! ordered key generation.
//!
//! Every write is addressed by a [`FieldPath`]. Paths are validated at
//! construction, so a path that exists is a path the backing store will
//! accept.

use std::collections::HashMap;
use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SyncError};
use crate::model::{SessionId, Timestamp};

/// Characters that may not appear in a path segment.
pub const INVALID_PATH_CHARS: [char; 5] = ['.', '#', '$', '[', ']'];

/// Check one path segment against the reserved-character rules.
pub(crate) fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty()
        || segment.contains('/')
        || segment.contains(INVALID_PATH_CHARS)
    {
        return Err(SyncError::InvalidPathSegment {
            segment: segment.to_owned(),
        });
    }
    Ok(())
}

/// A validated, slash-separated path addressing one field in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath(String);

impl FieldPath {
    /// Join segments into a path, validating each one.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidPathSegment` if any segment is empty or
    /// carries a reserved character, or if no segments were given.
    pub fn new<I, T>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut path = String::new();
        for segment in segments {
            let segment = segment.as_ref();
            validate_segment(segment)?;
            if !path.is_empty() {
                path.push('/');
            }
            path.push_str(segment);
        }
        if path.is_empty() {
            return Err(SyncError::InvalidPathSegment {
                segment: String::new(),
            });
        }
        Ok(Self(path))
    }

    /// Extend this path by one validated segment.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::InvalidPathSegment` if the segment is empty or
    /// carries a reserved character.
    pub fn child(&self, segment: &str) -> Result<Self> {
        validate_segment(segment)?;
        Ok(Self(format!("{}/{segment}", self.0)))
    }

    /// The path as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for FieldPath {
    type Error = SyncError;

    fn try_from(path: String) -> Result<Self> {
        for segment in path.split('/') {
            validate_segment(segment)?;
        }
        Ok(Self(path))
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.0
    }
}

impl AsRef<str> for FieldPath {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A batch of field writes. A `null` value clears the field.
pub type UpdateMap = HashMap<FieldPath, serde_json::Value>;

/// Compute the writes that turn `before` into `after` under `base`:
/// changed and added keys become sets, keys missing from `after` become
/// `null` clears.
///
/// # Errors
///
/// Returns `SyncError::InvalidPathSegment` if an object key cannot appear
/// in a field path.
pub fn diff_updates(
    base: &FieldPath,
    before: &serde_json::Map<String, serde_json::Value>,
    after: &serde_json::Map<String, serde_json::Value>,
) -> Result<UpdateMap> {
    let mut updates = UpdateMap::new();
    for (key, value) in after {
        if before.get(key) != Some(value) {
            updates.insert(base.child(key)?, value.clone());
        }
    }
    for key in before.keys() {
        if !after.contains_key(key) {
            updates.insert(base.child(key)?, serde_json::Value::Null);
        }
    }
    Ok(updates)
}

/// Route builders for the entities this crate syncs.
pub mod routes {
    use super::FieldPath;
    use crate::model::{SessionId, UserId};

    /// `user_drinking_sessions/<user>`
    #[must_use]
    pub fn user_sessions(user: &UserId) -> FieldPath {
        FieldPath(format!("user_drinking_sessions/{user}"))
    }

    /// `user_drinking_sessions/<user>/<session>`
    #[must_use]
    pub fn user_session(user: &UserId, session: &SessionId) -> FieldPath {
        FieldPath(format!("user_drinking_sessions/{user}/{session}"))
    }

    /// `user_drinking_sessions/<user>/<session>/drinks`
    #[must_use]
    pub fn user_session_drinks(user: &UserId, session: &SessionId) -> FieldPath {
        FieldPath(format!("user_drinking_sessions/{user}/{session}/drinks"))
    }

    /// `user_preferences/<user>`
    #[must_use]
    pub fn user_preferences(user: &UserId) -> FieldPath {
        FieldPath(format!("user_preferences/{user}"))
    }

    /// `user_status/<user>`
    #[must_use]
    pub fn user_status(user: &UserId) -> FieldPath {
        FieldPath(format!("user_status/{user}"))
    }

    /// `user_status/<user>/latest_session`
    #[must_use]
    pub fn user_status_latest_session(user: &UserId) -> FieldPath {
        FieldPath(format!("user_status/{user}/latest_session"))
    }
}

/// Alphabet for generated keys, ordered by ASCII code so that key order
/// matches generation order.
const PUSH_CHARS: &[u8; 64] =
    b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

/// Generator of 20-character session keys that sort by creation time.
///
/// Keys open with 8 characters encoding the millisecond timestamp and
/// close with 12 random characters. Keys minted within the same
/// millisecond reuse the random tail incremented by one, which keeps them
/// strictly increasing.
#[derive(Debug)]
pub struct KeyGenerator {
    last_ms: Timestamp,
    last_rand: [u8; 12],
}

impl KeyGenerator {
    /// Fresh generator with no minting history.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_ms: Timestamp::MIN,
            last_rand: [0; 12],
        }
    }

    /// Mint the next key for the given wall-clock time.
    pub fn next_key(&mut self, now: Timestamp) -> SessionId {
        if now == self.last_ms {
            // Same millisecond: bump the previous tail instead of rolling
            // new randomness, so order within the millisecond holds.
            for slot in self.last_rand.iter_mut().rev() {
                if *slot == 63 {
                    *slot = 0;
                } else {
                    *slot += 1;
                    break;
                }
            }
        } else {
            let mut rng = rand::thread_rng();
            for slot in &mut self.last_rand {
                *slot = rng.gen_range(0..64u8);
            }
            self.last_ms = now;
        }

        let mut key = String::with_capacity(20);
        let mut stamp = [0u8; 8];
        let mut ms = now.max(0) as u64;
        for slot in stamp.iter_mut().rev() {
            *slot = PUSH_CHARS[(ms % 64) as usize];
            ms /= 64;
        }
        key.extend(stamp.iter().map(|&b| b as char));
        key.extend(self.last_rand.iter().map(|&b| PUSH_CHARS[b as usize] as char));
        SessionId::new_unchecked(key)
    }
}

impl Default for KeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}
