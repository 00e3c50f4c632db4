use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use common::{FolderNode, NodeId, TrackId};
use tracing::debug;

use crate::LibraryError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FolderInfo {
    pub name: String,
    pub parent: Option<NodeId>,
}

// Ids missing from the returned map are not local folders of that storage.
pub trait FolderIndex {
    fn names_and_parents(
        &self,
        ids: &[NodeId],
        storage_id: &str,
    ) -> Result<HashMap<NodeId, FolderInfo>, LibraryError>;
}

pub trait NodeLookup {
    fn folder_by_id(&self, id: NodeId) -> Result<Option<FolderInfo>, LibraryError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LibraryRoot {
    pub id: NodeId,
    pub storage_id: String,
}

pub struct FolderReconciler<'a> {
    root: &'a LibraryRoot,
    index: &'a dyn FolderIndex,
    lookup: &'a dyn NodeLookup,
}

impl<'a> FolderReconciler<'a> {
    pub fn new(
        root: &'a LibraryRoot,
        index: &'a dyn FolderIndex,
        lookup: &'a dyn NodeLookup,
    ) -> Self {
        Self {
            root,
            index,
            lookup,
        }
    }

    pub fn reconcile(
        &self,
        tracks_by_folder: BTreeMap<NodeId, Vec<TrackId>>,
    ) -> Result<Vec<FolderNode>, LibraryError> {
        let mut result: Vec<FolderNode> = Vec::new();
        let mut known: HashSet<NodeId> = HashSet::new();
        let mut unresolved: HashSet<NodeId> = HashSet::new();
        let mut root_tracks: Vec<TrackId> = Vec::new();
        known.insert(self.root.id);

        let ids: Vec<NodeId> = tracks_by_folder
            .keys()
            .copied()
            .filter(|id| *id != self.root.id)
            .collect();
        let bulk = self.index.names_and_parents(&ids, &self.root.storage_id)?;

        for (folder_id, track_ids) in tracks_by_folder {
            if folder_id == self.root.id {
                root_tracks.extend(track_ids);
                continue;
            }
            known.insert(folder_id);
            match self.resolve(folder_id, &bulk)? {
                Some(info) => result.push(self.entry(folder_id, info, track_ids)),
                None => {
                    debug!(
                        "Folder {} is not visible; mapping {} tracks under the library root",
                        folder_id,
                        track_ids.len()
                    );
                    root_tracks.extend(track_ids);
                    unresolved.insert(folder_id);
                }
            }
        }

        result.push(FolderNode {
            id: self.root.id,
            name: String::new(),
            parent: None,
            track_ids: root_tracks,
        });

        self.fill_missing_parents(&mut result, &mut known, &mut unresolved)?;
        Ok(result)
    }

    // Each id is resolved at most once.
    fn fill_missing_parents(
        &self,
        result: &mut Vec<FolderNode>,
        known: &mut HashSet<NodeId>,
        unresolved: &mut HashSet<NodeId>,
    ) -> Result<(), LibraryError> {
        let mut pass_start = 0usize;

        loop {
            let pending: BTreeSet<NodeId> = result[pass_start..]
                .iter()
                .filter_map(|node| node.parent)
                .filter(|parent| !known.contains(parent))
                .collect();
            if pending.is_empty() {
                break;
            }

            let ids: Vec<NodeId> = pending.iter().copied().collect();
            let bulk = self.index.names_and_parents(&ids, &self.root.storage_id)?;
            pass_start = result.len();
            for folder_id in ids {
                known.insert(folder_id);
                match self.resolve(folder_id, &bulk)? {
                    Some(info) => result.push(self.entry(folder_id, info, Vec::new())),
                    None => {
                        debug!("Ancestor folder {} is not visible", folder_id);
                        unresolved.insert(folder_id);
                    }
                }
            }
        }

        if !unresolved.is_empty() {
            for node in result.iter_mut() {
                if matches!(node.parent, Some(parent) if unresolved.contains(&parent)) {
                    node.parent = Some(self.root.id);
                }
            }
        }
        Ok(())
    }

    fn resolve(
        &self,
        folder_id: NodeId,
        bulk: &HashMap<NodeId, FolderInfo>,
    ) -> Result<Option<FolderInfo>, LibraryError> {
        if let Some(info) = bulk.get(&folder_id) {
            return Ok(Some(info.clone()));
        }
        self.lookup.folder_by_id(folder_id)
    }

    fn entry(&self, folder_id: NodeId, info: FolderInfo, track_ids: Vec<TrackId>) -> FolderNode {
        // The root's own parent lies outside the library.
        let parent = if folder_id == self.root.id {
            None
        } else {
            Some(info.parent.unwrap_or(self.root.id))
        };
        FolderNode {
            id: folder_id,
            name: info.name,
            parent,
            track_ids,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::{BTreeMap, HashMap, HashSet};

    use common::{FolderNode, NodeId, TrackId};

    use super::{FolderIndex, FolderInfo, FolderReconciler, LibraryRoot, NodeLookup};
    use crate::LibraryError;

    const ROOT: NodeId = 10;
    const STORAGE: &str = "home::alice";

    #[derive(Default)]
    struct FakeIndex {
        folders: HashMap<NodeId, FolderInfo>,
        calls: RefCell<Vec<Vec<NodeId>>>,
    }

    impl FakeIndex {
        fn with(mut self, id: NodeId, name: &str, parent: Option<NodeId>) -> Self {
            self.folders.insert(
                id,
                FolderInfo {
                    name: name.to_string(),
                    parent,
                },
            );
            self
        }
    }

    impl FolderIndex for FakeIndex {
        fn names_and_parents(
            &self,
            ids: &[NodeId],
            storage_id: &str,
        ) -> Result<HashMap<NodeId, FolderInfo>, LibraryError> {
            assert_eq!(storage_id, STORAGE);
            self.calls.borrow_mut().push(ids.to_vec());
            Ok(ids
                .iter()
                .filter_map(|id| self.folders.get(id).map(|info| (*id, info.clone())))
                .collect())
        }
    }

    #[derive(Default)]
    struct FakeLookup {
        folders: HashMap<NodeId, FolderInfo>,
    }

    impl FakeLookup {
        fn with(mut self, id: NodeId, name: &str, parent: Option<NodeId>) -> Self {
            self.folders.insert(
                id,
                FolderInfo {
                    name: name.to_string(),
                    parent,
                },
            );
            self
        }
    }

    impl NodeLookup for FakeLookup {
        fn folder_by_id(&self, id: NodeId) -> Result<Option<FolderInfo>, LibraryError> {
            Ok(self.folders.get(&id).cloned())
        }
    }

    fn root() -> LibraryRoot {
        LibraryRoot {
            id: ROOT,
            storage_id: STORAGE.to_string(),
        }
    }

    fn tracks(pairs: &[(NodeId, &[&str])]) -> BTreeMap<NodeId, Vec<TrackId>> {
        pairs
            .iter()
            .map(|(folder, ids)| (*folder, ids.iter().map(|id| id.to_string()).collect()))
            .collect()
    }

    fn by_id(nodes: &[FolderNode]) -> HashMap<NodeId, &FolderNode> {
        nodes.iter().map(|node| (node.id, node)).collect()
    }

    fn assert_connected(nodes: &[FolderNode]) {
        let ids: HashSet<NodeId> = nodes.iter().map(|node| node.id).collect();
        assert_eq!(ids.len(), nodes.len(), "duplicate folder entries");
        for node in nodes {
            match node.parent {
                Some(parent) => assert!(ids.contains(&parent), "dangling parent {}", parent),
                None => assert_eq!(node.id, ROOT),
            }
        }
    }

    #[test]
    fn fills_intermediate_folders() {
        // A (11) lives in B (12) which has no tracks; C (13) sits directly under the root.
        let index = FakeIndex::default()
            .with(11, "A", Some(12))
            .with(12, "B", Some(ROOT))
            .with(13, "C", Some(ROOT));
        let lookup = FakeLookup::default();
        let root = root();
        let reconciler = FolderReconciler::new(&root, &index, &lookup);

        let nodes = reconciler
            .reconcile(tracks(&[(11, &["t1", "t2"]), (13, &["t3"])]))
            .unwrap();

        assert_connected(&nodes);
        assert_eq!(nodes.len(), 4);
        let map = by_id(&nodes);
        let b = map[&12];
        assert_eq!(b.name, "B");
        assert_eq!(b.parent, Some(ROOT));
        assert!(b.track_ids.is_empty());
        assert_eq!(map[&11].parent, Some(12));
        assert_eq!(map[&13].parent, Some(ROOT));
        assert_eq!(nodes.iter().filter(|node| node.id == 12).count(), 1);
    }

    #[test]
    fn root_tracks_stay_in_root_bucket() {
        // The bulk index knows the root with a parent outside the library.
        let index = FakeIndex::default()
            .with(ROOT, "Music", Some(1))
            .with(11, "A", Some(ROOT));
        let lookup = FakeLookup::default().with(ROOT, "Music", Some(1));
        let root = root();
        let reconciler = FolderReconciler::new(&root, &index, &lookup);

        let nodes = reconciler
            .reconcile(tracks(&[(ROOT, &["r1"]), (11, &["a1"])]))
            .unwrap();

        assert_connected(&nodes);
        let map = by_id(&nodes);
        let root_node = map[&ROOT];
        assert_eq!(root_node.parent, None);
        assert_eq!(root_node.name, "");
        assert_eq!(root_node.track_ids, vec!["r1".to_string()]);
        assert_eq!(nodes.iter().filter(|node| node.id == ROOT).count(), 1);
        assert!(!index.calls.borrow()[0].contains(&ROOT));
    }

    #[test]
    fn unresolvable_folder_tracks_go_to_root() {
        let index = FakeIndex::default().with(11, "A", Some(ROOT));
        let lookup = FakeLookup::default();
        let root = root();
        let reconciler = FolderReconciler::new(&root, &index, &lookup);

        let nodes = reconciler
            .reconcile(tracks(&[(11, &["a1"]), (99, &["gone1", "gone2"])]))
            .unwrap();

        assert_connected(&nodes);
        let map = by_id(&nodes);
        assert!(!map.contains_key(&99));
        assert_eq!(
            map[&ROOT].track_ids,
            vec!["gone1".to_string(), "gone2".to_string()]
        );
        assert_eq!(map[&11].track_ids, vec!["a1".to_string()]);
    }

    #[test]
    fn child_of_invisible_track_folder_is_rehomed_to_root() {
        // 50 holds tracks but cannot be resolved; its child 51 can.
        let index = FakeIndex::default();
        let lookup = FakeLookup::default().with(51, "Child", Some(50));
        let root = root();
        let reconciler = FolderReconciler::new(&root, &index, &lookup);

        let nodes = reconciler
            .reconcile(tracks(&[(50, &["a"]), (51, &["b"])]))
            .unwrap();

        assert_connected(&nodes);
        let map = by_id(&nodes);
        assert!(!map.contains_key(&50));
        assert_eq!(map[&51].parent, Some(ROOT));
        assert_eq!(map[&51].track_ids, vec!["b".to_string()]);
        assert_eq!(map[&ROOT].track_ids, vec!["a".to_string()]);
    }

    #[test]
    fn virtual_folders_resolve_through_lookup() {
        // 20 is a mount root shown inside B (12); 21 is a folder inside the mount.
        let index = FakeIndex::default().with(12, "B", Some(ROOT));
        let lookup = FakeLookup::default()
            .with(20, "Shared", Some(12))
            .with(21, "Live", Some(20));
        let root = root();
        let reconciler = FolderReconciler::new(&root, &index, &lookup);

        let nodes = reconciler.reconcile(tracks(&[(21, &["s1"])])).unwrap();

        assert_connected(&nodes);
        let map = by_id(&nodes);
        assert_eq!(map[&21].parent, Some(20));
        assert_eq!(map[&20].parent, Some(12));
        assert_eq!(map[&20].name, "Shared");
        assert_eq!(map[&12].parent, Some(ROOT));
        assert_eq!(nodes.len(), 4);
    }

    #[test]
    fn unresolvable_ancestor_is_replaced_by_root() {
        let index = FakeIndex::default();
        let lookup = FakeLookup::default().with(30, "Orphan", Some(31));
        let root = root();
        let reconciler = FolderReconciler::new(&root, &index, &lookup);

        let nodes = reconciler.reconcile(tracks(&[(30, &["o1"])])).unwrap();

        assert_connected(&nodes);
        let map = by_id(&nodes);
        assert_eq!(map[&30].parent, Some(ROOT));
        assert!(!map.contains_key(&31));
    }

    #[test]
    fn parentless_folder_is_attached_to_root() {
        let index = FakeIndex::default().with(40, "Top", None);
        let lookup = FakeLookup::default();
        let root = root();
        let reconciler = FolderReconciler::new(&root, &index, &lookup);

        let nodes = reconciler.reconcile(tracks(&[(40, &["x"])])).unwrap();

        assert_connected(&nodes);
        assert_eq!(by_id(&nodes)[&40].parent, Some(ROOT));
    }

    #[test]
    fn deep_nesting_terminates() {
        let mut index = FakeIndex::default();
        let depth: NodeId = 5_000;
        for id in 100..100 + depth {
            let parent = if id == 100 { ROOT } else { id - 1 };
            index = index.with(id, &format!("d{}", id), Some(parent));
        }
        let lookup = FakeLookup::default();
        let root = root();
        let reconciler = FolderReconciler::new(&root, &index, &lookup);

        let nodes = reconciler
            .reconcile(tracks(&[(100 + depth - 1, &["deep"])]))
            .unwrap();

        assert_connected(&nodes);
        assert_eq!(nodes.len() as NodeId, depth + 1);
    }

    #[test]
    fn empty_library_yields_only_root() {
        let index = FakeIndex::default();
        let lookup = FakeLookup::default();
        let root = root();
        let reconciler = FolderReconciler::new(&root, &index, &lookup);

        let nodes = reconciler.reconcile(BTreeMap::new()).unwrap();

        assert_eq!(
            nodes,
            vec![FolderNode {
                id: ROOT,
                name: String::new(),
                parent: None,
                track_ids: Vec::new(),
            }]
        );
    }
}
