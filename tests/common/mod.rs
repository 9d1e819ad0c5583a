#![allow(dead_code)]

mod mocks;

pub use mocks::MockWriter;

use std::{hash::Hash, sync::Arc};

use dashmap::{DashMap, mapref::entry::Entry};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use spring_batch_engine::{
    BatchError,
    core::item::{ItemProcessor, ItemProcessorResult, ItemWriter, ItemWriterResult},
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Keeps every written chunk, in write order.
pub struct RecordingWriter<T> {
    chunks: Mutex<Vec<Vec<T>>>,
}

impl<T> Default for RecordingWriter<T> {
    fn default() -> Self {
        Self {
            chunks: Mutex::new(Vec::new()),
        }
    }
}

impl<T: Clone> RecordingWriter<T> {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn chunk_sizes(&self) -> Vec<usize> {
        self.chunks.lock().iter().map(Vec::len).collect()
    }

    pub fn items(&self) -> Vec<T> {
        self.chunks.lock().iter().flatten().cloned().collect()
    }
}

impl<T: Clone> ItemWriter<T> for RecordingWriter<T> {
    fn write(&self, items: &[T]) -> ItemWriterResult {
        self.chunks.lock().push(items.to_vec());
        Ok(())
    }
}

/// Filters out items whose key was already seen, across threads.
pub struct DuplicateFilter<T, K> {
    seen: DashMap<K, ()>,
    key: fn(&T) -> K,
}

impl<T, K: Eq + Hash> DuplicateFilter<T, K> {
    pub fn new(key: fn(&T) -> K) -> Self {
        Self {
            seen: DashMap::new(),
            key,
        }
    }
}

impl<T: Clone, K: Eq + Hash> ItemProcessor<T, T> for DuplicateFilter<T, K> {
    fn process(&self, item: &T) -> ItemProcessorResult<T> {
        match self.seen.entry((self.key)(item)) {
            Entry::Occupied(_) => Ok(None),
            Entry::Vacant(entry) => {
                entry.insert(());
                Ok(Some(item.clone()))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Normal,
    Silver,
    Gold,
    Vip,
}

impl Level {
    fn threshold(self) -> Option<(i64, Level)> {
        match self {
            Level::Normal => Some((200_000, Level::Silver)),
            Level::Silver => Some((300_000, Level::Gold)),
            Level::Gold => Some((500_000, Level::Vip)),
            Level::Vip => None,
        }
    }

    pub fn next_level(self, total_amount: i64) -> Option<Level> {
        self.threshold()
            .filter(|(threshold, _)| total_amount >= *threshold)
            .map(|(_, next)| next)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub level: Level,
    pub total_amount: i64,
}

impl User {
    pub fn available_level_up(&self) -> bool {
        self.level.next_level(self.total_amount).is_some()
    }

    pub fn level_up(&self) -> User {
        User {
            level: self.level.next_level(self.total_amount).unwrap_or(self.level),
            ..self.clone()
        }
    }
}

/// `size` users of each of the four spending profiles, ids starting at 1.
pub fn users(size: i64) -> Vec<User> {
    [1_000, 200_000, 300_000, 500_000]
        .iter()
        .enumerate()
        .flat_map(|(profile, amount)| {
            (0..size).map(move |n| {
                let id = profile as i64 * size + n + 1;
                User {
                    id,
                    username: format!("user{}", id),
                    level: Level::Normal,
                    total_amount: *amount,
                }
            })
        })
        .collect()
}

/// In-memory user table shared by the steps of a job.
#[derive(Default)]
pub struct UserRepository {
    users: DashMap<i64, User>,
}

impl UserRepository {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn save_all(&self, users: Vec<User>) {
        for user in users {
            self.users.insert(user.id, user);
        }
    }

    pub fn find_by_id_between(&self, min: i64, max: i64) -> Vec<User> {
        let mut users: Vec<User> = self
            .users
            .iter()
            .filter(|entry| (min..=max).contains(entry.key()))
            .map(|entry| entry.value().clone())
            .collect();
        users.sort_by_key(|user| user.id);
        users
    }

    pub fn find_all(&self) -> Vec<User> {
        self.find_by_id_between(i64::MIN, i64::MAX)
    }

    pub fn bounds(&self) -> Result<(i64, i64), BatchError> {
        let ids: Vec<i64> = self.users.iter().map(|entry| *entry.key()).collect();
        match (ids.iter().min(), ids.iter().max()) {
            (Some(min), Some(max)) => Ok((*min, *max)),
            _ => Err(BatchError::Configuration("no users".to_string())),
        }
    }

    pub fn count_by_level(&self, level: Level) -> usize {
        self.users.iter().filter(|entry| entry.level == level).count()
    }
}

/// Saves leveled-up users back into the repository.
pub struct UserWriter {
    repository: Arc<UserRepository>,
}

impl UserWriter {
    pub fn new(repository: Arc<UserRepository>) -> Self {
        Self { repository }
    }
}

impl ItemWriter<User> for UserWriter {
    fn write(&self, items: &[User]) -> ItemWriterResult {
        self.repository
            .save_all(items.iter().map(User::level_up).collect());
        Ok(())
    }
}

/// Keeps users that can level up, filters out the others.
pub fn level_up_filter(user: &User) -> ItemProcessorResult<User> {
    Ok(user.available_level_up().then(|| user.clone()))
}
