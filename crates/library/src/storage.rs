use std::path::{Path, PathBuf};

use common::{join_relpath, normalize_relpath, parent_relpath, relpath_name, NodeId};
use serde::{Deserialize, Serialize};

use crate::folders::{FolderInfo, LibraryRoot, NodeLookup};
use crate::nodes::{NodeEntry, NodeStore};
use crate::LibraryError;

const HOME_STORAGE_PREFIX: &str = "home::";
const MOUNT_STORAGE_PREFIX: &str = "mount::";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Mount {
    pub name: String,
    pub path: PathBuf,
    pub mount_point: String,
    #[serde(default)]
    pub users: Vec<String>,
}

impl Mount {
    pub fn storage_id(&self) -> String {
        format!("{}{}", MOUNT_STORAGE_PREFIX, self.name)
    }

    pub fn visible_to(&self, user: &str) -> bool {
        self.users.iter().any(|u| u == user)
    }
}

#[derive(Clone, Debug)]
pub struct UserStorage {
    user: String,
    home: PathBuf,
    music_folder: String,
    mounts: Vec<Mount>,
}

impl UserStorage {
    pub fn new(
        storage_root: &Path,
        user: &str,
        music_folder: &str,
        mounts: &[Mount],
    ) -> Result<Self, LibraryError> {
        if !is_valid_user_id(user) {
            return Err(LibraryError::InvalidUser(user.to_string()));
        }
        let mounts = mounts
            .iter()
            .filter(|mount| mount.visible_to(user))
            .map(|mount| Mount {
                mount_point: normalize_relpath(&mount.mount_point),
                ..mount.clone()
            })
            .filter(|mount| !mount.mount_point.is_empty())
            .collect();
        Ok(Self {
            user: user.to_string(),
            home: storage_root.join(user),
            music_folder: normalize_relpath(music_folder),
            mounts,
        })
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn home_dir(&self) -> &Path {
        &self.home
    }

    pub fn exists(&self) -> bool {
        self.home.is_dir()
    }

    pub fn home_storage_id(&self) -> String {
        format!("{}{}", HOME_STORAGE_PREFIX, self.user)
    }

    pub fn library_relpath(&self) -> &str {
        &self.music_folder
    }

    pub fn library_dir(&self) -> PathBuf {
        join_relpath(&self.home, &self.music_folder)
    }

    pub fn mounts(&self) -> &[Mount] {
        &self.mounts
    }

    pub fn library_mounts(&self) -> impl Iterator<Item = &Mount> {
        self.mounts
            .iter()
            .filter(move |mount| is_within(&mount.mount_point, &self.music_folder))
    }

    pub fn library_root(&self, nodes: &NodeStore) -> Result<LibraryRoot, LibraryError> {
        let storage_id = self.home_storage_id();
        let id = match nodes.find(&storage_id, &self.music_folder)? {
            Some(id) => id,
            None => nodes.register(&storage_id, &self.music_folder, true)?,
        };
        Ok(LibraryRoot { id, storage_id })
    }

    pub fn disk_path(&self, entry: &NodeEntry) -> Option<PathBuf> {
        if entry.storage_id == self.home_storage_id() {
            return Some(join_relpath(&self.home, &entry.relpath));
        }
        self.mount_for(&entry.storage_id)
            .map(|mount| join_relpath(&mount.path, &entry.relpath))
    }

    pub fn file_path(
        &self,
        nodes: &NodeStore,
        file_id: NodeId,
    ) -> Result<Option<PathBuf>, LibraryError> {
        let Some(entry) = nodes.get(file_id)? else {
            return Ok(None);
        };
        if entry.is_dir {
            return Ok(None);
        }
        Ok(self.disk_path(&entry).filter(|path| path.is_file()))
    }

    pub fn lookup<'a>(&'a self, nodes: &'a NodeStore) -> UserNodeLookup<'a> {
        UserNodeLookup {
            storage: self,
            nodes,
        }
    }

    fn mount_for(&self, storage_id: &str) -> Option<&Mount> {
        self.mounts
            .iter()
            .find(|mount| mount.storage_id() == storage_id)
    }
}

pub struct UserNodeLookup<'a> {
    storage: &'a UserStorage,
    nodes: &'a NodeStore,
}

impl NodeLookup for UserNodeLookup<'_> {
    fn folder_by_id(&self, id: NodeId) -> Result<Option<FolderInfo>, LibraryError> {
        let Some(entry) = self.nodes.get(id)? else {
            return Ok(None);
        };
        if !entry.is_dir {
            return Ok(None);
        }
        let Some(path) = self.storage.disk_path(&entry) else {
            return Ok(None);
        };
        if !path.is_dir() {
            return Ok(None);
        }

        if entry.parent.is_some() {
            return Ok(Some(FolderInfo {
                name: entry.name,
                parent: entry.parent,
            }));
        }

        // A storage root: a mount root is shown at its mount point in the home storage.
        match self.storage.mount_for(&entry.storage_id) {
            Some(mount) => {
                let parent = match parent_relpath(&mount.mount_point) {
                    Some(parent_path) => self
                        .nodes
                        .find(&self.storage.home_storage_id(), parent_path)?,
                    None => None,
                };
                Ok(Some(FolderInfo {
                    name: relpath_name(&mount.mount_point).to_string(),
                    parent,
                }))
            }
            None => Ok(Some(FolderInfo {
                name: entry.name,
                parent: None,
            })),
        }
    }
}

pub fn is_valid_user_id(user: &str) -> bool {
    !user.is_empty()
        && user != "."
        && user != ".."
        && user.len() <= 64
        && user
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.' | '@'))
}

fn is_within(relpath: &str, folder: &str) -> bool {
    if folder.is_empty() {
        return true;
    }
    relpath == folder
        || (relpath.len() > folder.len()
            && relpath.starts_with(folder)
            && relpath.as_bytes()[folder.len()] == b'/')
}
