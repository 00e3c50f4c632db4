use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use redb::{Database, ReadableTable, TableDefinition, TableError};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::collection::{BlobStore, TokenCache};
use crate::storage::is_valid_user_id;
use crate::{
    decode_value, encode_value, now_secs, prefix_key, remove_prefixed, user_key, LibraryError,
};

const CACHE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("cache");
const CACHE_IDS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("cache_ids");
const CACHE_META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("cache_meta");

const NEXT_ID_KEY: &str = "next_id";

pub const MAX_CACHE_VALUE_LEN: usize = 2048;

#[derive(Clone)]
pub struct DbCache {
    db: Arc<Database>,
}

impl DbCache {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn init_tables(&self) -> Result<(), LibraryError> {
        let write_txn = self.db.begin_write()?;
        {
            let _ = write_txn.open_table(CACHE_TABLE)?;
            let _ = write_txn.open_table(CACHE_IDS_TABLE)?;
            let _ = write_txn.open_table(CACHE_META_TABLE)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn forced_get_id(&self, user: &str, purpose: &str) -> Result<u64, LibraryError> {
        let key = user_key(user, purpose);
        {
            let read_txn = self.db.begin_read()?;
            match read_txn.open_table(CACHE_IDS_TABLE) {
                Ok(table) => {
                    if let Some(value) = table.get(key.as_str())? {
                        return decode_value(value.value());
                    }
                }
                Err(TableError::TableDoesNotExist(_)) => {}
                Err(err) => return Err(err.into()),
            };
        }

        let write_txn = self.db.begin_write()?;
        let id = {
            let mut ids = write_txn.open_table(CACHE_IDS_TABLE)?;
            let existing: Option<u64> = match ids.get(key.as_str())? {
                Some(value) => Some(decode_value(value.value())?),
                None => None,
            };
            match existing {
                Some(id) => id,
                None => {
                    let mut meta = write_txn.open_table(CACHE_META_TABLE)?;
                    let id = meta.get(NEXT_ID_KEY)?.map(|value| value.value()).unwrap_or(1);
                    meta.insert(NEXT_ID_KEY, id + 1)?;
                    let bytes = encode_value(&id)?;
                    ids.insert(key.as_str(), bytes.as_slice())?;
                    id
                }
            }
        };
        write_txn.commit()?;
        Ok(id)
    }

    pub fn remove_all(&self, user: &str) -> Result<usize, LibraryError> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(CACHE_TABLE)?;
            remove_prefixed(&mut table, &prefix_key(user))?
        };
        write_txn.commit()?;
        Ok(removed)
    }
}

impl TokenCache for DbCache {
    fn get(&self, user: &str, purpose: &str) -> Result<Option<String>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(CACHE_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let key = user_key(user, purpose);
        let value = match table.get(key.as_str())? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(value)
    }

    fn add(&self, user: &str, purpose: &str, token: &str) -> Result<(), LibraryError> {
        if token.len() > MAX_CACHE_VALUE_LEN {
            return Err(LibraryError::ValueTooLarge {
                len: token.len(),
                max: MAX_CACHE_VALUE_LEN,
            });
        }
        let key = user_key(user, purpose);
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CACHE_TABLE)?;
            if table.get(key.as_str())?.is_some() {
                return Err(LibraryError::UniqueViolation {
                    user: user.to_string(),
                    purpose: purpose.to_string(),
                });
            }
            let bytes = encode_value(&token.to_string())?;
            table.insert(key.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn remove(&self, user: &str, purpose: &str) -> Result<(), LibraryError> {
        let key = user_key(user, purpose);
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(CACHE_TABLE)?;
            table.remove(key.as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct BlobEntry {
    expires_at: u64,
    data: Vec<u8>,
}

#[derive(Clone, Debug)]
pub struct FileBlobCache {
    root: PathBuf,
}

impl FileBlobCache {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn for_user(&self, user: &str) -> Result<UserBlobCache, LibraryError> {
        if !is_valid_user_id(user) {
            return Err(LibraryError::InvalidUser(user.to_string()));
        }
        Ok(UserBlobCache {
            dir: self.root.join(user),
        })
    }
}

#[derive(Clone, Debug)]
pub struct UserBlobCache {
    dir: PathBuf,
}

impl UserBlobCache {
    pub fn remove(&self, key: &str) -> Result<(), LibraryError> {
        match fs::remove_file(self.entry_path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(sanitize_key(key))
    }
}

impl BlobStore for UserBlobCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, LibraryError> {
        let path = self.entry_path(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let entry: BlobEntry = match decode_value(&bytes) {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Dropping unreadable cache entry {}: {}", path.display(), err);
                let _ = fs::remove_file(&path);
                return Ok(None);
            }
        };
        if entry.expires_at <= now_secs() {
            let _ = fs::remove_file(&path);
            return Ok(None);
        }
        Ok(Some(entry.data))
    }

    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), LibraryError> {
        fs::create_dir_all(&self.dir)?;
        let entry = BlobEntry {
            expires_at: now_secs().saturating_add(ttl.as_secs()),
            data: value.to_vec(),
        };
        let bytes = encode_value(&entry)?;
        let path = self.entry_path(key);
        write_atomic(&path, &bytes)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), LibraryError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(format!(".tmp{}", std::process::id()));
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(())
}

fn sanitize_key(key: &str) -> String {
    let cleaned: String = key
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.trim_start_matches('.') {
        "" => "_".to_string(),
        rest => rest.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use redb::backends::InMemoryBackend;
    use redb::Database;

    use common::Collection;

    use super::{sanitize_key, DbCache, FileBlobCache, MAX_CACHE_VALUE_LEN};
    use crate::collection::{BlobStore, CollectionCache, CollectionSource, TokenCache};
    use crate::LibraryError;

    fn cache() -> DbCache {
        let db = Database::builder()
            .create_with_backend(InMemoryBackend::new())
            .unwrap();
        let cache = DbCache::new(Arc::new(db));
        cache.init_tables().unwrap();
        cache
    }

    #[test]
    fn add_is_unique_per_user_and_purpose() {
        let cache = cache();
        cache.add("alice", "collection", "abc").unwrap();
        let err = cache.add("alice", "collection", "def").unwrap_err();
        assert!(matches!(err, LibraryError::UniqueViolation { .. }));
        assert_eq!(cache.get("alice", "collection").unwrap().as_deref(), Some("abc"));

        cache.add("bob", "collection", "xyz").unwrap();
        cache.remove("alice", "collection").unwrap();
        assert_eq!(cache.get("alice", "collection").unwrap(), None);
        assert_eq!(cache.get("bob", "collection").unwrap().as_deref(), Some("xyz"));
        cache.add("alice", "collection", "def").unwrap();
    }

    #[test]
    fn rejects_oversized_values() {
        let cache = cache();
        let big = "x".repeat(MAX_CACHE_VALUE_LEN + 1);
        let err = cache.add("alice", "collection", &big).unwrap_err();
        assert!(matches!(err, LibraryError::ValueTooLarge { .. }));
        assert_eq!(cache.get("alice", "collection").unwrap(), None);
    }

    #[test]
    fn forced_ids_are_stable_and_distinct() {
        let cache = cache();
        let a = cache.forced_get_id("alice", "mutex_key.scan").unwrap();
        let b = cache.forced_get_id("bob", "mutex_key.scan").unwrap();
        assert_ne!(a, b);
        assert_eq!(cache.forced_get_id("alice", "mutex_key.scan").unwrap(), a);
    }

    #[test]
    fn remove_all_only_touches_one_user() {
        let cache = cache();
        cache.add("alice", "collection", "1").unwrap();
        cache.add("alice", "other", "2").unwrap();
        cache.add("alicia", "collection", "3").unwrap();
        assert_eq!(cache.remove_all("alice").unwrap(), 2);
        assert_eq!(cache.get("alicia", "collection").unwrap().as_deref(), Some("3"));
    }

    #[test]
    fn blob_cache_round_trip_and_expiry() {
        let tmp = tempfile::tempdir().unwrap();
        let blobs = FileBlobCache::new(tmp.path().to_path_buf());
        let alice = blobs.for_user("alice").unwrap();
        let bob = blobs.for_user("bob").unwrap();

        alice
            .set("music_collection.json", b"{}", Duration::from_secs(3600))
            .unwrap();
        assert_eq!(alice.get("music_collection.json").unwrap(), Some(b"{}".to_vec()));
        assert_eq!(bob.get("music_collection.json").unwrap(), None);

        alice.set("stale", b"old", Duration::ZERO).unwrap();
        assert_eq!(alice.get("stale").unwrap(), None);

        alice.remove("music_collection.json").unwrap();
        assert_eq!(alice.get("music_collection.json").unwrap(), None);
        assert!(blobs.for_user("../x").is_err());
    }

    #[test]
    fn unreadable_blob_is_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let blobs = FileBlobCache::new(tmp.path().to_path_buf());
        let alice = blobs.for_user("alice").unwrap();
        alice
            .set("music_collection.json", b"{}", Duration::from_secs(3600))
            .unwrap();
        let path = tmp.path().join("alice").join("music_collection.json");
        std::fs::write(&path, b"garbage").unwrap();

        assert_eq!(alice.get("music_collection.json").unwrap(), None);
        assert!(!path.exists());
    }

    struct EmptySource;

    impl CollectionSource for EmptySource {
        fn to_collection(&self, _user: &str) -> Result<Collection, LibraryError> {
            Ok(Collection::default())
        }
    }

    #[test]
    fn corrupt_collection_blob_heals() {
        let tmp = tempfile::tempdir().unwrap();
        let tokens = cache();
        let blobs = FileBlobCache::new(tmp.path().to_path_buf());
        let alice = blobs.for_user("alice").unwrap();
        let collection = CollectionCache::new(&EmptySource, &tokens, &alice);

        let warm = collection.get_snapshot("alice").unwrap();
        std::fs::write(tmp.path().join("alice").join("music_collection.json"), b"garbage").unwrap();

        assert_eq!(collection.get_snapshot("alice").unwrap(), warm);
        assert_eq!(alice.get("music_collection.json").unwrap(), Some(warm.clone()));
        assert!(collection.get_validity_hash("alice").unwrap().is_some());
    }

    #[test]
    fn keys_cannot_escape_user_dir() {
        assert_eq!(sanitize_key("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_key(".."), "_");
        assert_eq!(sanitize_key("music_collection.json"), "music_collection.json");
    }
}
