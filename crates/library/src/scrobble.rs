use std::sync::Arc;

use common::Track;
use redb::{Database, ReadableTable, TableDefinition, TableError};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{decode_value, encode_value, user_key, LibraryError};

const PLAY_LOG_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("play_log");
const NOW_PLAYING_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("now_playing");

pub trait Scrobbler: Send + Sync {
    fn record_track_played(&self, track: &Track, played_at: u64) -> Result<(), LibraryError>;
    fn set_now_playing(&self, track: &Track, started_at: u64) -> Result<(), LibraryError>;
}

pub struct AggregateScrobbler {
    scrobblers: Vec<Arc<dyn Scrobbler>>,
}

impl AggregateScrobbler {
    pub fn new(scrobblers: Vec<Arc<dyn Scrobbler>>) -> Self {
        Self { scrobblers }
    }
}

impl Scrobbler for AggregateScrobbler {
    fn record_track_played(&self, track: &Track, played_at: u64) -> Result<(), LibraryError> {
        for scrobbler in &self.scrobblers {
            if let Err(err) = scrobbler.record_track_played(track, played_at) {
                warn!("Scrobble of track {} failed: {}", track.id, err);
            }
        }
        Ok(())
    }

    fn set_now_playing(&self, track: &Track, started_at: u64) -> Result<(), LibraryError> {
        for scrobbler in &self.scrobblers {
            if let Err(err) = scrobbler.set_now_playing(track, started_at) {
                warn!("Now playing update for track {} failed: {}", track.id, err);
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayStats {
    pub play_count: u64,
    pub last_played: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NowPlaying {
    pub track_id: String,
    pub started_at: u64,
}

#[derive(Clone)]
pub struct PlayLogScrobbler {
    db: Arc<Database>,
}

impl PlayLogScrobbler {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn init_tables(&self) -> Result<(), LibraryError> {
        let write_txn = self.db.begin_write()?;
        {
            let _ = write_txn.open_table(PLAY_LOG_TABLE)?;
            let _ = write_txn.open_table(NOW_PLAYING_TABLE)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn play_stats(&self, user: &str, track_id: &str) -> Result<PlayStats, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(PLAY_LOG_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(PlayStats::default()),
            Err(err) => return Err(err.into()),
        };
        let key = user_key(user, track_id);
        let stats = match table.get(key.as_str())? {
            Some(value) => decode_value(value.value())?,
            None => PlayStats::default(),
        };
        Ok(stats)
    }

    pub fn now_playing(&self, user: &str) -> Result<Option<NowPlaying>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(NOW_PLAYING_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let entry = match table.get(user)? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(entry)
    }
}

impl Scrobbler for PlayLogScrobbler {
    fn record_track_played(&self, track: &Track, played_at: u64) -> Result<(), LibraryError> {
        let key = user_key(&track.user_id, &track.id);
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(PLAY_LOG_TABLE)?;
            let mut stats: PlayStats = match table.get(key.as_str())? {
                Some(value) => decode_value(value.value())?,
                None => PlayStats::default(),
            };
            stats.play_count += 1;
            stats.last_played = Some(stats.last_played.map_or(played_at, |t| t.max(played_at)));
            let bytes = encode_value(&stats)?;
            table.insert(key.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn set_now_playing(&self, track: &Track, started_at: u64) -> Result<(), LibraryError> {
        let entry = NowPlaying {
            track_id: track.id.clone(),
            started_at,
        };
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(NOW_PLAYING_TABLE)?;
            let bytes = encode_value(&entry)?;
            table.insert(track.user_id.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}
