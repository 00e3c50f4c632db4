use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub type NodeId = u64;

pub type TrackId = String;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Artist {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Album {
    pub id: String,
    pub artist_id: String,
    pub name: String,
    pub year: Option<i32>,
    #[serde(default)]
    pub disc_count: u16,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Track {
    pub id: TrackId,
    pub user_id: String,
    pub file_id: NodeId,
    pub folder_id: NodeId,
    pub artist_id: String,
    pub album_id: String,
    pub title: String,
    pub number: Option<u16>,
    pub disc: Option<u16>,
    pub year: Option<i32>,
    pub length_secs: Option<u32>,
    pub bitrate: Option<u32>,
    pub mimetype: String,
    #[serde(default)]
    pub genre: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Collection {
    pub artists: Vec<CollectionArtist>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionArtist {
    pub id: String,
    pub name: String,
    pub albums: Vec<CollectionAlbum>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionAlbum {
    pub id: String,
    pub name: String,
    pub year: Option<i32>,
    pub disk: u16,
    pub tracks: Vec<CollectionTrack>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionTrack {
    pub id: TrackId,
    pub title: String,
    pub number: Option<u16>,
    pub disk: Option<u16>,
    pub artist_id: String,
    pub length: Option<u32>,
    pub file_id: NodeId,
    pub mimetype: String,
}

// One entry of the folder view of a library. `parent` is `None` only for the library root.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FolderNode {
    pub id: NodeId,
    pub name: String,
    pub parent: Option<NodeId>,
    pub track_ids: Vec<TrackId>,
}

pub fn stable_id(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}

pub fn fingerprint(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

pub fn relpath_from(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(path_to_slash_string(rel))
}

pub fn join_relpath(root: &Path, relpath: &str) -> PathBuf {
    let mut out = PathBuf::from(root);
    for part in relpath.split('/') {
        if part.is_empty() {
            continue;
        }
        out.push(part);
    }
    out
}

pub fn parent_relpath(relpath: &str) -> Option<&str> {
    if relpath.is_empty() {
        return None;
    }
    match relpath.rfind('/') {
        Some(idx) => Some(&relpath[..idx]),
        None => Some(""),
    }
}

pub fn relpath_name(relpath: &str) -> &str {
    match relpath.rfind('/') {
        Some(idx) => &relpath[idx + 1..],
        None => relpath,
    }
}

pub fn normalize_relpath(value: &str) -> String {
    value
        .split(['/', '\\'])
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}

fn path_to_slash_string(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    parts.join("/")
}
