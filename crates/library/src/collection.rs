use std::time::Duration;

use common::{fingerprint, Collection};
use tracing::{debug, warn};

use crate::LibraryError;

pub const COLLECTION_PURPOSE: &str = "collection";
pub const COLLECTION_BLOB_KEY: &str = "music_collection.json";
pub const DEFAULT_COLLECTION_TTL: Duration = Duration::from_secs(5 * 365 * 24 * 60 * 60);

// Scoped to one user.
pub trait BlobStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, LibraryError>;
    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), LibraryError>;
}

pub trait TokenCache {
    fn get(&self, user: &str, purpose: &str) -> Result<Option<String>, LibraryError>;
    fn add(&self, user: &str, purpose: &str, token: &str) -> Result<(), LibraryError>;
    fn remove(&self, user: &str, purpose: &str) -> Result<(), LibraryError>;
}

pub trait CollectionSource {
    fn to_collection(&self, user: &str) -> Result<Collection, LibraryError>;
}

pub struct CollectionCache<'a> {
    source: &'a dyn CollectionSource,
    tokens: &'a dyn TokenCache,
    blobs: &'a dyn BlobStore,
    ttl: Duration,
}

impl<'a> CollectionCache<'a> {
    // `blobs` must belong to the user later passed to the getters.
    pub fn new(
        source: &'a dyn CollectionSource,
        tokens: &'a dyn TokenCache,
        blobs: &'a dyn BlobStore,
    ) -> Self {
        Self {
            source,
            tokens,
            blobs,
            ttl: DEFAULT_COLLECTION_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn get_validity_hash(&self, user: &str) -> Result<Option<String>, LibraryError> {
        self.tokens.get(user, COLLECTION_PURPOSE)
    }

    pub fn get_snapshot(&self, user: &str) -> Result<Vec<u8>, LibraryError> {
        if let Some(snapshot) = self.cached_snapshot(user)? {
            return Ok(snapshot);
        }

        let collection = self.source.to_collection(user)?;
        let snapshot = serde_json::to_vec(&collection)?;
        self.store(user, &snapshot)?;
        Ok(snapshot)
    }

    fn cached_snapshot(&self, user: &str) -> Result<Option<Vec<u8>>, LibraryError> {
        if self.tokens.get(user, COLLECTION_PURPOSE)?.is_none() {
            return Ok(None);
        }
        let snapshot = self.blobs.get(COLLECTION_BLOB_KEY)?;
        if snapshot.is_none() {
            debug!(
                "Inconsistent collection state for user {}: hash found but data missing; removing the hash",
                user
            );
            self.tokens.remove(user, COLLECTION_PURPOSE)?;
        }
        Ok(snapshot)
    }

    fn store(&self, user: &str, snapshot: &[u8]) -> Result<(), LibraryError> {
        let hash = fingerprint(snapshot);
        match self.tokens.add(user, COLLECTION_PURPOSE, &hash) {
            Ok(()) => {}
            Err(LibraryError::UniqueViolation { .. }) => {
                // The winner's document is kept; ours is served once and dropped.
                let winner = self.tokens.get(user, COLLECTION_PURPOSE).ok().flatten();
                if winner.as_deref() == Some(hash.as_str()) {
                    warn!(
                        "Race condition: collection for user {} cached twice, ignoring latter",
                        user
                    );
                } else {
                    warn!(
                        "Race condition: collection for user {} cached twice with different content (cached {:?}, served {}); ignoring latter",
                        user, winner, hash
                    );
                }
                return Ok(());
            }
            Err(err) => return Err(err),
        }

        if let Err(err) = self.blobs.set(COLLECTION_BLOB_KEY, snapshot, self.ttl) {
            warn!(
                "Failed to store collection for user {}: {}; it will be rebuilt on next request",
                user, err
            );
        }
        Ok(())
    }
}

pub fn invalidate(tokens: &dyn TokenCache, user: &str) -> Result<(), LibraryError> {
    tokens.remove(user, COLLECTION_PURPOSE)
}
