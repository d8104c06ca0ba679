use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use log::{debug, warn};
use tokio::time::Instant;

use crate::quiz::scoring::normalize;
use crate::quiz::{Difficulty, Question, QuestionKind};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    topic: String,
    kind: QuestionKind,
    difficulty: Difficulty,
}

impl CacheKey {
    pub fn new(topic: &str, kind: QuestionKind, difficulty: Difficulty) -> Self {
        Self {
            topic: normalize(topic),
            kind,
            difficulty,
        }
    }
}

struct CacheEntry {
    questions: Vec<Question>,
    stored_at: Instant,
}

/// Recently generated question sets, reused for an identical request
/// within the time-to-live.
pub struct QuizCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
}

impl QuizCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Vec<Question>> {
        {
            let entries = self.entries.read().unwrap_or_else(|poisoned| {
                warn!("QuizCache read lock poisoned, recovering");
                poisoned.into_inner()
            });
            match entries.get(key) {
                Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                    return Some(entry.questions.clone())
                }
                Some(_) => {}
                None => return None,
            }
        }

        self.evict_if_expired(key);
        None
    }

    /// Re-checks expiry under the write lock, since a `put` may have
    /// refreshed the entry after the read lock was released.
    fn evict_if_expired(&self, key: &CacheKey) {
        let mut entries = self.write();
        if entries
            .get(key)
            .is_some_and(|entry| entry.stored_at.elapsed() >= self.ttl)
        {
            debug!("Evicting expired quiz cache entry for '{}'", key.topic);
            entries.remove(key);
        }
    }

    pub fn put(&self, key: CacheKey, questions: Vec<Question>) {
        self.write().insert(
            key,
            CacheEntry {
                questions,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.write().unwrap_or_else(|poisoned| {
            warn!("QuizCache write lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}
