use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::cache_store::DbCache;

// Base of the numeric lock keys; the per-(user, key) cache id is added to it.
pub const SEMAPHORE_KEY_BASE: u64 = 0xa5e6_3947;

#[derive(Default)]
struct Semaphore {
    taken: Mutex<bool>,
    released: Condvar,
}

impl Semaphore {
    fn acquire(&self) {
        let mut taken = self.taken.lock();
        while *taken {
            self.released.wait(&mut taken);
        }
        *taken = true;
    }

    fn release(&self) {
        let mut taken = self.taken.lock();
        *taken = false;
        self.released.notify_one();
    }
}

pub struct Concurrency {
    cache: DbCache,
    enabled: bool,
    semaphores: Mutex<HashMap<u64, Arc<Semaphore>>>,
}

impl Concurrency {
    pub fn new(cache: DbCache, enabled: bool) -> Self {
        Self {
            cache,
            enabled,
            semaphores: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn mutex_reserve(&self, user: &str, key: &str) -> MutexGuard {
        if !self.enabled {
            warn!("Mutex facility is disabled; {} for user {} runs unguarded", key, user);
            return MutexGuard { semaphore: None };
        }

        let id = match self.cache.forced_get_id(user, &format!("mutex_key.{}", key)) {
            Ok(id) => id,
            Err(err) => {
                warn!("Failed to derive mutex key {} for user {}: {}", key, user, err);
                return MutexGuard { semaphore: None };
            }
        };
        let lock_key = SEMAPHORE_KEY_BASE.wrapping_add(id);

        let semaphore = {
            let mut semaphores = self.semaphores.lock();
            Arc::clone(semaphores.entry(lock_key).or_default())
        };
        semaphore.acquire();
        MutexGuard {
            semaphore: Some(semaphore),
        }
    }
}

#[must_use]
pub struct MutexGuard {
    semaphore: Option<Arc<Semaphore>>,
}

impl MutexGuard {
    pub fn is_held(&self) -> bool {
        self.semaphore.is_some()
    }
}

impl Drop for MutexGuard {
    fn drop(&mut self) {
        if let Some(semaphore) = self.semaphore.take() {
            semaphore.release();
        }
    }
}
