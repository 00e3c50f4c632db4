use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::{
    parent_relpath, relpath_from, stable_id, Album, Artist, Collection, CollectionAlbum,
    CollectionArtist, CollectionTrack, FolderNode, NodeId, Track, TrackId,
};
use metadata::{read_tags, MetadataError, TrackTags};
use redb::{
    CommitError, Database, DatabaseError, ReadableTable, StorageError, TableDefinition, TableError,
    TransactionError,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use walkdir::WalkDir;

pub mod cache_store;
pub mod collection;
pub mod concurrency;
pub mod folders;
pub mod nodes;
pub mod scrobble;
pub mod storage;

pub use cache_store::{DbCache, FileBlobCache, UserBlobCache};
pub use collection::{
    invalidate as invalidate_collection, BlobStore, CollectionCache, CollectionSource, TokenCache,
};
pub use concurrency::{Concurrency, MutexGuard};
pub use folders::{FolderIndex, FolderInfo, FolderReconciler, LibraryRoot, NodeLookup};
pub use nodes::{NodeEntry, NodeStore};
pub use scrobble::{AggregateScrobbler, NowPlaying, PlayLogScrobbler, PlayStats, Scrobbler};
pub use storage::{Mount, UserStorage};

pub(crate) const KEY_SEP: char = '\x1f';

const UNKNOWN_ARTIST: &str = "Unknown Artist";
const UNKNOWN_ALBUM: &str = "Unknown album";

const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "oga", "opus", "m4a", "mp4", "aac", "wav", "wma", "aif", "aiff", "ape",
    "wv", "mpc",
];

const TRACKS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tracks");
const TRACKS_BY_FILE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("tracks_by_file");
const ARTISTS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("artists");
const ALBUMS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("albums");
const USER_STATS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("user_stats");

#[derive(Clone)]
pub struct Library {
    db: Arc<Database>,
}

impl Library {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn open_db(path: &Path) -> Result<Arc<Database>, LibraryError> {
        let db = open_or_create_db(path)?;
        Ok(Arc::new(db))
    }

    pub fn init_tables(&self) -> Result<(), LibraryError> {
        let write_txn = self.db.begin_write()?;
        {
            let _ = write_txn.open_table(TRACKS_TABLE)?;
            let _ = write_txn.open_table(TRACKS_BY_FILE_TABLE)?;
            let _ = write_txn.open_table(ARTISTS_TABLE)?;
            let _ = write_txn.open_table(ALBUMS_TABLE)?;
            let _ = write_txn.open_table(USER_STATS_TABLE)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn db(&self) -> Arc<Database> {
        Arc::clone(&self.db)
    }

    pub fn scan_user(
        &self,
        storage: &UserStorage,
        nodes: &NodeStore,
    ) -> Result<LibraryStats, LibraryError> {
        let user = storage.user();
        let files = collect_audio_files(storage);
        info!("Found {} audio files for user {}", files.len(), user);

        let registered = register_files(&self.db, storage, &files)?;
        // Make sure the root exists even for an empty library.
        storage.library_root(nodes)?;

        let mut drafts = Vec::with_capacity(files.len());
        for (file, (file_id, folder_id)) in files.iter().zip(registered) {
            let tags = match read_tags(&file.path) {
                Ok(tags) => tags,
                Err(err) => {
                    warn!("Tag read failed for {:?}: {}", file.path, err);
                    TrackTags::default()
                }
            };
            drafts.push(TrackDraft {
                file_id,
                folder_id,
                title_fallback: file_stem(&file.path),
                mimetype: audio_mimetype(&file.path),
                tags,
            });
        }

        let index = build_index(user, drafts);
        let stats = index.stats();
        write_index(&self.db, user, &index)?;
        info!(
            "Indexed {} tracks, {} albums, {} artists for user {}",
            stats.tracks, stats.albums, stats.artists, user
        );
        Ok(stats)
    }

    pub fn reset_user(&self, user: &str) -> Result<(), LibraryError> {
        let write_txn = self.db.begin_write()?;
        clear_user(&write_txn, user)?;
        write_txn.commit()?;
        info!("Index reset for user {}", user);
        Ok(())
    }

    pub fn stats(&self, user: &str) -> Result<LibraryStats, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(USER_STATS_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(LibraryStats::default()),
            Err(err) => return Err(err.into()),
        };
        let stats = match table.get(user)? {
            Some(value) => decode_value(value.value())?,
            None => LibraryStats::default(),
        };
        Ok(stats)
    }

    pub fn get_track(&self, user: &str, track_id: &str) -> Result<Option<Track>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(TRACKS_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let key = user_key(user, track_id);
        let track = match table.get(key.as_str())? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        Ok(track)
    }

    pub fn find_by_file_id(
        &self,
        user: &str,
        file_id: NodeId,
    ) -> Result<Option<Track>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(TRACKS_BY_FILE_TABLE) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let key = user_key(user, &file_id.to_string());
        let track_id: Option<String> = match table.get(key.as_str())? {
            Some(value) => Some(decode_value(value.value())?),
            None => None,
        };
        match track_id {
            Some(track_id) => self.get_track(user, &track_id),
            None => Ok(None),
        }
    }

    pub fn track_and_folder_ids(
        &self,
        user: &str,
    ) -> Result<BTreeMap<NodeId, Vec<TrackId>>, LibraryError> {
        let mut out: BTreeMap<NodeId, Vec<TrackId>> = BTreeMap::new();
        for track in self.user_rows::<Track>(TRACKS_TABLE, user)? {
            out.entry(track.folder_id).or_default().push(track.id);
        }
        Ok(out)
    }

    pub fn find_all_folders(
        &self,
        storage: &UserStorage,
        nodes: &NodeStore,
    ) -> Result<Vec<FolderNode>, LibraryError> {
        let root = storage.library_root(nodes)?;
        let lookup = storage.lookup(nodes);
        let tracks_by_folder = self.track_and_folder_ids(storage.user())?;
        FolderReconciler::new(&root, nodes, &lookup).reconcile(tracks_by_folder)
    }

    pub fn to_collection(&self, user: &str) -> Result<Collection, LibraryError> {
        let artists = self.user_rows::<Artist>(ARTISTS_TABLE, user)?;
        let albums = self.user_rows::<Album>(ALBUMS_TABLE, user)?;
        let tracks = self.user_rows::<Track>(TRACKS_TABLE, user)?;
        Ok(assemble_collection(artists, albums, tracks))
    }

    fn user_rows<T: for<'de> Deserialize<'de>>(
        &self,
        definition: TableDefinition<'static, &'static str, &'static [u8]>,
        user: &str,
    ) -> Result<Vec<T>, LibraryError> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(definition) {
            Ok(table) => table,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let prefix = prefix_key(user);
        let end = prefix_end(&prefix);
        let mut rows = Vec::new();
        for entry in table.range(prefix.as_str()..end.as_str())? {
            let entry = entry?;
            rows.push(decode_value(entry.1.value())?);
        }
        Ok(rows)
    }
}

impl CollectionSource for Library {
    fn to_collection(&self, user: &str) -> Result<Collection, LibraryError> {
        Library::to_collection(self, user)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LibraryStats {
    pub artists: usize,
    pub albums: usize,
    pub tracks: usize,
}

#[derive(Debug)]
pub enum LibraryError {
    Io(std::io::Error),
    Metadata(MetadataError),
    Redb(redb::Error),
    Bincode(Box<bincode::ErrorKind>),
    Json(serde_json::Error),
    KeyParse(String),
    InvalidUser(String),
    UniqueViolation { user: String, purpose: String },
    ValueTooLarge { len: usize, max: usize },
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::Io(err) => write!(f, "io error: {}", err),
            LibraryError::Metadata(err) => write!(f, "metadata error: {}", err),
            LibraryError::Redb(err) => write!(f, "db error: {}", err),
            LibraryError::Bincode(err) => write!(f, "bincode error: {}", err),
            LibraryError::Json(err) => write!(f, "json error: {}", err),
            LibraryError::KeyParse(value) => write!(f, "key parse error: {}", value),
            LibraryError::InvalidUser(user) => write!(f, "invalid user id: {:?}", user),
            LibraryError::UniqueViolation { user, purpose } => {
                write!(f, "cache entry already exists: {} / {}", user, purpose)
            }
            LibraryError::ValueTooLarge { len, max } => {
                write!(f, "value too large: {} bytes (max {})", len, max)
            }
        }
    }
}

impl std::error::Error for LibraryError {}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        LibraryError::Io(err)
    }
}

impl From<MetadataError> for LibraryError {
    fn from(err: MetadataError) -> Self {
        LibraryError::Metadata(err)
    }
}

impl From<redb::Error> for LibraryError {
    fn from(err: redb::Error) -> Self {
        LibraryError::Redb(err)
    }
}

impl From<DatabaseError> for LibraryError {
    fn from(err: DatabaseError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TableError> for LibraryError {
    fn from(err: TableError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<TransactionError> for LibraryError {
    fn from(err: TransactionError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<StorageError> for LibraryError {
    fn from(err: StorageError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<CommitError> for LibraryError {
    fn from(err: CommitError) -> Self {
        LibraryError::Redb(err.into())
    }
}

impl From<Box<bincode::ErrorKind>> for LibraryError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        LibraryError::Bincode(err)
    }
}

impl From<serde_json::Error> for LibraryError {
    fn from(err: serde_json::Error) -> Self {
        LibraryError::Json(err)
    }
}

fn open_or_create_db(path: &Path) -> Result<Database, LibraryError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if path.exists() {
        Ok(Database::open(path)?)
    } else {
        Ok(Database::create(path)?)
    }
}

struct AudioFile {
    storage_id: String,
    relpath: String,
    path: PathBuf,
}

struct TrackDraft {
    file_id: NodeId,
    folder_id: NodeId,
    title_fallback: String,
    mimetype: String,
    tags: TrackTags,
}

#[derive(Default)]
struct UserIndex {
    artists: BTreeMap<String, Artist>,
    albums: BTreeMap<String, Album>,
    tracks: Vec<Track>,
}

impl UserIndex {
    fn stats(&self) -> LibraryStats {
        LibraryStats {
            artists: self.artists.len(),
            albums: self.albums.len(),
            tracks: self.tracks.len(),
        }
    }

    fn artist_id(&mut self, user: &str, name: &str) -> String {
        let id = stable_id(&format!("{}{}artist{}{}", user, KEY_SEP, KEY_SEP, name.to_lowercase()));
        self.artists.entry(id.clone()).or_insert_with(|| Artist {
            id: id.clone(),
            name: name.to_string(),
        });
        id
    }
}

fn collect_audio_files(storage: &UserStorage) -> Vec<AudioFile> {
    let mut files = Vec::new();
    let home_id = storage.home_storage_id();
    walk_audio(
        storage.home_dir(),
        &storage.library_dir(),
        &home_id,
        &mut files,
    );
    for mount in storage.library_mounts() {
        walk_audio(&mount.path, &mount.path, &mount.storage_id(), &mut files);
    }
    files
}

fn walk_audio(base: &Path, start: &Path, storage_id: &str, out: &mut Vec<AudioFile>) {
    if !start.is_dir() {
        return;
    }
    for entry in WalkDir::new(start)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
    {
        if !entry.file_type().is_file() || !is_audio_file(entry.path()) {
            continue;
        }
        let Some(relpath) = relpath_from(base, entry.path()) else {
            continue;
        };
        out.push(AudioFile {
            storage_id: storage_id.to_string(),
            relpath,
            path: entry.into_path(),
        });
    }
}

fn register_files(
    db: &Database,
    storage: &UserStorage,
    files: &[AudioFile],
) -> Result<Vec<(NodeId, NodeId)>, LibraryError> {
    let write_txn = db.begin_write()?;
    let mut out = Vec::with_capacity(files.len());
    {
        let home_id = storage.home_storage_id();
        nodes::register_in(&write_txn, &home_id, storage.library_relpath(), true)?;
        for mount in storage.library_mounts() {
            if let Some(parent) = parent_relpath(&mount.mount_point) {
                nodes::register_in(&write_txn, &home_id, parent, true)?;
            }
            nodes::register_in(&write_txn, &mount.storage_id(), "", true)?;
        }
        for file in files {
            let (file_id, parent) =
                nodes::register_in(&write_txn, &file.storage_id, &file.relpath, false)?;
            let folder_id = parent.ok_or_else(|| LibraryError::KeyParse(file.relpath.clone()))?;
            out.push((file_id, folder_id));
        }
    }
    write_txn.commit()?;
    Ok(out)
}

fn build_index(user: &str, drafts: Vec<TrackDraft>) -> UserIndex {
    let mut index = UserIndex::default();
    for draft in drafts {
        let tags = draft.tags;
        let track_artist = tags
            .artist
            .clone()
            .or_else(|| tags.album_artist.clone())
            .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());
        let album_artist = tags
            .album_artist
            .clone()
            .or_else(|| tags.artist.clone())
            .unwrap_or_else(|| UNKNOWN_ARTIST.to_string());
        let album_name = tags.album.clone().unwrap_or_else(|| UNKNOWN_ALBUM.to_string());

        let artist_id = index.artist_id(user, &track_artist);
        let album_artist_id = index.artist_id(user, &album_artist);
        let album_id = stable_id(&format!(
            "{}{}album{}{}{}{}",
            user,
            KEY_SEP,
            KEY_SEP,
            album_artist_id,
            KEY_SEP,
            album_name.to_lowercase()
        ));

        let disc = tags.disc_no.unwrap_or(1).max(1);
        let album = index.albums.entry(album_id.clone()).or_insert_with(|| Album {
            id: album_id.clone(),
            artist_id: album_artist_id.clone(),
            name: album_name.clone(),
            year: None,
            disc_count: 1,
        });
        album.disc_count = album.disc_count.max(disc);
        album.year = match (album.year, tags.year) {
            (Some(current), Some(year)) => Some(current.min(year)),
            (current, year) => current.or(year),
        };

        index.tracks.push(Track {
            id: track_id_for(user, draft.file_id),
            user_id: user.to_string(),
            file_id: draft.file_id,
            folder_id: draft.folder_id,
            artist_id,
            album_id,
            title: tags.title.clone().unwrap_or(draft.title_fallback),
            number: tags.track_no,
            disc: tags.disc_no,
            year: tags.year,
            length_secs: tags.length_secs,
            bitrate: tags.bitrate,
            mimetype: draft.mimetype,
            genre: tags.genre,
        });
    }
    index
}

fn write_index(db: &Database, user: &str, index: &UserIndex) -> Result<(), LibraryError> {
    let write_txn = db.begin_write()?;
    clear_user(&write_txn, user)?;
    {
        let mut tracks_table = write_txn.open_table(TRACKS_TABLE)?;
        let mut by_file_table = write_txn.open_table(TRACKS_BY_FILE_TABLE)?;
        let mut artists_table = write_txn.open_table(ARTISTS_TABLE)?;
        let mut albums_table = write_txn.open_table(ALBUMS_TABLE)?;
        let mut stats_table = write_txn.open_table(USER_STATS_TABLE)?;

        for artist in index.artists.values() {
            let bytes = encode_value(artist)?;
            artists_table.insert(user_key(user, &artist.id).as_str(), bytes.as_slice())?;
        }
        for album in index.albums.values() {
            let bytes = encode_value(album)?;
            albums_table.insert(user_key(user, &album.id).as_str(), bytes.as_slice())?;
        }
        for track in &index.tracks {
            let bytes = encode_value(track)?;
            tracks_table.insert(user_key(user, &track.id).as_str(), bytes.as_slice())?;
            let id_bytes = encode_value(&track.id)?;
            by_file_table.insert(
                user_key(user, &track.file_id.to_string()).as_str(),
                id_bytes.as_slice(),
            )?;
        }
        let stats = encode_value(&index.stats())?;
        stats_table.insert(user, stats.as_slice())?;
    }
    write_txn.commit()?;
    Ok(())
}

fn clear_user(txn: &redb::WriteTransaction, user: &str) -> Result<(), LibraryError> {
    let prefix = prefix_key(user);
    for definition in [TRACKS_TABLE, TRACKS_BY_FILE_TABLE, ARTISTS_TABLE, ALBUMS_TABLE] {
        let mut table = txn.open_table(definition)?;
        remove_prefixed(&mut table, &prefix)?;
    }
    let mut stats_table = txn.open_table(USER_STATS_TABLE)?;
    stats_table.remove(user)?;
    Ok(())
}

pub(crate) fn remove_prefixed(
    table: &mut redb::Table<&str, &[u8]>,
    prefix: &str,
) -> Result<usize, LibraryError> {
    let end = prefix_end(prefix);
    let mut keys = Vec::new();
    for entry in table.range(prefix..end.as_str())? {
        let entry = entry?;
        keys.push(entry.0.value().to_string());
    }
    for key in &keys {
        table.remove(key.as_str())?;
    }
    Ok(keys.len())
}

fn assemble_collection(artists: Vec<Artist>, albums: Vec<Album>, tracks: Vec<Track>) -> Collection {
    let mut tracks_by_album: HashMap<String, Vec<CollectionTrack>> = HashMap::new();
    for track in tracks {
        tracks_by_album
            .entry(track.album_id.clone())
            .or_default()
            .push(collection_track(track));
    }

    let mut albums_by_artist: HashMap<String, Vec<CollectionAlbum>> = HashMap::new();
    for album in albums {
        let mut tracks = tracks_by_album.remove(&album.id).unwrap_or_default();
        if tracks.is_empty() {
            continue;
        }
        tracks.sort_by(|a, b| {
            (a.disk.unwrap_or(1), a.number.unwrap_or(u16::MAX), a.title.to_lowercase())
                .cmp(&(b.disk.unwrap_or(1), b.number.unwrap_or(u16::MAX), b.title.to_lowercase()))
        });
        albums_by_artist
            .entry(album.artist_id.clone())
            .or_default()
            .push(CollectionAlbum {
                id: album.id,
                name: album.name,
                year: album.year,
                disk: album.disc_count,
                tracks,
            });
    }

    let mut out: Vec<CollectionArtist> = artists
        .into_iter()
        .filter_map(|artist| {
            let mut albums = albums_by_artist.remove(&artist.id)?;
            albums.sort_by(|a, b| {
                (a.name.to_lowercase(), a.year, &a.id).cmp(&(b.name.to_lowercase(), b.year, &b.id))
            });
            Some(CollectionArtist {
                id: artist.id,
                name: artist.name,
                albums,
            })
        })
        .collect();
    out.sort_by(|a, b| (a.name.to_lowercase(), &a.id).cmp(&(b.name.to_lowercase(), &b.id)));
    Collection { artists: out }
}

pub fn collection_track(track: Track) -> CollectionTrack {
    CollectionTrack {
        id: track.id,
        title: track.title,
        number: track.number,
        disk: track.disc,
        artist_id: track.artist_id,
        length: track.length_secs,
        file_id: track.file_id,
        mimetype: track.mimetype,
    }
}

pub fn track_id_for(user: &str, file_id: NodeId) -> TrackId {
    stable_id(&format!("{}{}{}", user, KEY_SEP, file_id))
}

pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            AUDIO_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

pub fn audio_mimetype(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_default()
}

pub(crate) fn encode_value<T: Serialize>(value: &T) -> Result<Vec<u8>, LibraryError> {
    Ok(bincode::serialize(value)?)
}

pub(crate) fn decode_value<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, LibraryError> {
    Ok(bincode::deserialize(bytes)?)
}

pub(crate) fn user_key(user: &str, id: &str) -> String {
    let mut out = prefix_key(user);
    out.push_str(id);
    out
}

pub(crate) fn prefix_key(prefix: &str) -> String {
    let mut out = String::new();
    out.push_str(prefix);
    out.push(KEY_SEP);
    out
}

fn prefix_end(prefix: &str) -> String {
    let mut end = prefix.to_string();
    end.push('\u{10ffff}');
    end
}

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;

    use common::{Album, Artist, Track};
    use redb::backends::InMemoryBackend;
    use redb::Database;

    use super::{assemble_collection, is_audio_file, track_id_for, Library, Mount, NodeStore, UserStorage};
    use tempfile::TempDir;

    fn open() -> (Library, NodeStore) {
        let db = Arc::new(
            Database::builder()
                .create_with_backend(InMemoryBackend::new())
                .unwrap(),
        );
        let library = Library::new(Arc::clone(&db));
        library.init_tables().unwrap();
        let nodes = NodeStore::new(db);
        nodes.init_tables().unwrap();
        (library, nodes)
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"not really audio").unwrap();
    }

    fn fixture(tmp: &TempDir) -> UserStorage {
        let home = tmp.path().join("home");
        let shared = tmp.path().join("shared");
        touch(&home.join("alice/Music/top.mp3"));
        touch(&home.join("alice/Music/Rock/Album/01 Song.flac"));
        touch(&home.join("alice/Music/Rock/Album/cover.jpg"));
        touch(&home.join("alice/Documents/memo.mp3"));
        touch(&shared.join("Live/gig.ogg"));
        fs::create_dir_all(home.join("alice/Music/Shared")).unwrap();
        let mount = Mount {
            name: "shared".to_string(),
            path: shared,
            mount_point: "Music/Shared".to_string(),
            users: vec!["alice".to_string()],
        };
        UserStorage::new(&home, "alice", "Music", &[mount]).unwrap()
    }

    #[test]
    fn recognizes_audio_extensions() {
        assert!(is_audio_file(Path::new("a/b.MP3")));
        assert!(is_audio_file(Path::new("x.flac")));
        assert!(!is_audio_file(Path::new("cover.jpg")));
        assert!(!is_audio_file(Path::new("README")));
    }

    #[test]
    fn scan_indexes_library_and_mounts_only() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = fixture(&tmp);
        let (library, nodes) = open();

        let stats = library.scan_user(&storage, &nodes).unwrap();
        assert_eq!(stats.tracks, 3);
        assert_eq!(stats.artists, 1);
        assert_eq!(stats.albums, 1);
        assert_eq!(library.stats("alice").unwrap(), stats);
        assert_eq!(library.stats("bob").unwrap().tracks, 0);

        let top = nodes.find("home::alice", "Music/top.mp3").unwrap().unwrap();
        let track = library.find_by_file_id("alice", top).unwrap().unwrap();
        assert_eq!(track.title, "top");
        assert_eq!(track.mimetype, "audio/mpeg");
        assert_eq!(track.id, track_id_for("alice", top));
        assert_eq!(library.get_track("alice", &track.id).unwrap(), Some(track.clone()));
        assert!(library.get_track("bob", &track.id).unwrap().is_none());
    }

    #[test]
    fn rescan_is_stable_and_reset_clears() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = fixture(&tmp);
        let (library, nodes) = open();

        library.scan_user(&storage, &nodes).unwrap();
        let first = library.to_collection("alice").unwrap();
        library.scan_user(&storage, &nodes).unwrap();
        assert_eq!(library.to_collection("alice").unwrap(), first);

        library.reset_user("alice").unwrap();
        assert_eq!(library.stats("alice").unwrap().tracks, 0);
        assert!(library.to_collection("alice").unwrap().artists.is_empty());
        assert!(library.track_and_folder_ids("alice").unwrap().is_empty());
    }

    #[test]
    fn folder_tree_connects_home_and_mount_folders() {
        let tmp = tempfile::tempdir().unwrap();
        let storage = fixture(&tmp);
        let (library, nodes) = open();
        library.scan_user(&storage, &nodes).unwrap();

        let folders = library.find_all_folders(&storage, &nodes).unwrap();
        let root = storage.library_root(&nodes).unwrap();
        let ids: HashSet<_> = folders.iter().map(|f| f.id).collect();
        assert_eq!(ids.len(), folders.len());

        for folder in &folders {
            match folder.parent {
                Some(parent) => assert!(ids.contains(&parent), "dangling parent of {}", folder.name),
                None => assert_eq!(folder.id, root.id),
            }
        }

        let root_entry = folders.iter().find(|f| f.id == root.id).unwrap();
        assert_eq!(root_entry.track_ids.len(), 1);

        let names: HashSet<_> = folders.iter().map(|f| f.name.as_str()).collect();
        for name in ["Rock", "Album", "Shared", "Live"] {
            assert!(names.contains(name), "missing folder {}", name);
        }
        let shared = folders.iter().find(|f| f.name == "Shared").unwrap();
        assert_eq!(shared.parent, Some(root.id));
        let track_count: usize = folders.iter().map(|f| f.track_ids.len()).sum();
        assert_eq!(track_count, 3);
    }

    #[test]
    fn collection_groups_by_album_artist_and_sorts() {
        let artist = |id: &str, name: &str| Artist {
            id: id.to_string(),
            name: name.to_string(),
        };
        let album = |id: &str, artist_id: &str, name: &str| Album {
            id: id.to_string(),
            artist_id: artist_id.to_string(),
            name: name.to_string(),
            year: Some(2001),
            disc_count: 1,
        };
        let track = |id: &str, album_id: &str, number: u16| Track {
            id: id.to_string(),
            user_id: "alice".to_string(),
            file_id: number as u64,
            folder_id: 1,
            artist_id: "guest".to_string(),
            album_id: album_id.to_string(),
            title: format!("Song {}", number),
            number: Some(number),
            disc: None,
            year: None,
            length_secs: Some(180),
            bitrate: None,
            mimetype: "audio/flac".to_string(),
            genre: None,
        };

        let collection = assemble_collection(
            vec![artist("b", "beta"), artist("a", "Alpha"), artist("guest", "Guest")],
            vec![album("x", "b", "Zed"), album("y", "b", "Amber"), album("z", "a", "Empty")],
            vec![track("t2", "x", 2), track("t1", "x", 1), track("t3", "y", 1)],
        );

        // Artists without albums holding tracks are left out.
        assert_eq!(collection.artists.len(), 1);
        let beta = &collection.artists[0];
        assert_eq!(beta.name, "beta");
        assert_eq!(beta.albums[0].name, "Amber");
        let zed = &beta.albums[1];
        let order: Vec<_> = zed.tracks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(order, vec!["t1", "t2"]);
        assert_eq!(zed.tracks[0].artist_id, "guest");
    }
}
