//! Cached platform user directory and assignee resolution.
//!
//! Rule actions carry human-entered assignee identifiers — a numeric id,
//! an email, or an exact display name. Before a writeback those must
//! resolve to the platform's canonical person id; empty, unknown, and
//! ambiguous identifiers abort the apply.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

use crate::board::{BoardReader, BoardUser};
use crate::error::{AssigneeResolutionError, Result};

pub struct UserDirectory {
    reader: Arc<dyn BoardReader>,
    ttl: Duration,
    cache: RwLock<Option<CachedUsers>>,
}

struct CachedUsers {
    fetched_at: Instant,
    users: Arc<Vec<BoardUser>>,
}

impl UserDirectory {
    pub fn new(reader: Arc<dyn BoardReader>, ttl: Duration) -> Self {
        Self {
            reader,
            ttl,
            cache: RwLock::new(None),
        }
    }

    /// Current user list, refreshed through the reader when the cache is
    /// older than the TTL.
    pub async fn users(&self) -> Result<Arc<Vec<BoardUser>>> {
        if let Some(cached) = self.cache.read().as_ref()
            && cached.fetched_at.elapsed() < self.ttl
        {
            return Ok(Arc::clone(&cached.users));
        }

        let users = Arc::new(self.reader.list_users().await?);
        debug!(count = users.len(), "User directory refreshed");
        *self.cache.write() = Some(CachedUsers {
            fetched_at: Instant::now(),
            users: Arc::clone(&users),
        });
        Ok(users)
    }

    /// Resolve a human-entered identifier to a canonical person id.
    pub async fn resolve(&self, identifier: &str) -> Result<i64> {
        let users = self.users().await?;
        Ok(resolve_in(&users, identifier)?)
    }
}

/// Pure resolution against a user list: numeric id, then email (contains
/// `@`), then case-insensitive exact display name.
pub fn resolve_in(
    users: &[BoardUser],
    identifier: &str,
) -> std::result::Result<i64, AssigneeResolutionError> {
    let identifier = identifier.trim();
    if identifier.is_empty() {
        return Err(AssigneeResolutionError::Empty);
    }

    let matches: Vec<&BoardUser> = if let Ok(id) = identifier.parse::<i64>() {
        users.iter().filter(|u| u.id == id).collect()
    } else if identifier.contains('@') {
        users
            .iter()
            .filter(|u| u.email.eq_ignore_ascii_case(identifier))
            .collect()
    } else {
        users
            .iter()
            .filter(|u| u.name.eq_ignore_ascii_case(identifier))
            .collect()
    };

    match matches.as_slice() {
        [] => Err(AssigneeResolutionError::NotFound(identifier.to_string())),
        [user] => Ok(user.id),
        many => Err(AssigneeResolutionError::Ambiguous {
            identifier: identifier.to_string(),
            count: many.len(),
        }),
    }
}
