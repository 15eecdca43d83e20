use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard,
    },
};

use async_trait::async_trait;
use monoutils::CommandError;

use crate::{
    naming::{self, Volume},
    MonoblockError, MonoblockResult,
};

use super::{VolumeBackend, EXIT_BUSY, EXIT_NOT_FOUND};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An in-memory image graph that behaves like an RBD pool for the deletion walk.
///
/// Images are keyed by their pool-qualified backend name. Clone edges are kept as parent pointers
/// on the clone, the way the backend stores them, and rewritten when a parent is renamed.
#[derive(Debug, Default)]
pub(crate) struct MemoryBackend {
    images: Mutex<BTreeMap<String, Image>>,
    log: Mutex<Vec<String>>,
    fail_queries: AtomicBool,
    fail_removals: Mutex<BTreeSet<String>>,
}

#[derive(Debug, Default, Clone)]
struct Image {
    snapshots: BTreeMap<String, bool>,
    parent: Option<(String, String)>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MemoryBackend {
    /// Adds an image with no snapshots.
    pub(crate) fn add_volume(&self, vol: &Volume) {
        self.images().insert(key(vol), Image::default());
    }

    /// Adds a protected snapshot to an existing image.
    pub(crate) fn add_snapshot(&self, vol: &Volume, snapshot: &str) {
        if let Some(image) = self.images().get_mut(&key(vol)) {
            image.snapshots.insert(snapshot.to_string(), true);
        }
    }

    /// Adds `clone` as a clone of `source@snapshot`.
    pub(crate) fn add_clone(&self, source: &Volume, snapshot: &str, clone: &Volume) {
        self.images().insert(
            key(clone),
            Image {
                parent: Some((key(source), snapshot.to_string())),
                ..Default::default()
            },
        );
    }

    /// Returns true if the image behind `vol` exists.
    pub(crate) fn exists(&self, vol: &Volume) -> bool {
        self.images().contains_key(&key(vol))
    }

    /// Every image name in the pool, sorted.
    pub(crate) fn image_names(&self) -> Vec<String> {
        self.images().keys().cloned().collect()
    }

    /// Snapshot names of an image, sorted.
    pub(crate) fn snapshot_names(&self, vol: &Volume) -> Vec<String> {
        self.images()
            .get(&key(vol))
            .map(|image| image.snapshots.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Every mutation and unmap performed, in order.
    pub(crate) fn log(&self) -> Vec<String> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Makes every query fail as if the cluster were unreachable.
    pub(crate) fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Makes removing the image behind `vol` fail as if the cluster rejected it.
    pub(crate) fn fail_removal(&self, vol: &Volume) {
        if let Ok(mut fail) = self.fail_removals.lock() {
            fail.insert(key(vol));
        }
    }

    fn images(&self) -> MutexGuard<'_, BTreeMap<String, Image>> {
        self.images
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, entry: String) {
        if let Ok(mut log) = self.log.lock() {
            log.push(entry);
        }
    }

    fn check_reachable(&self, op: &str) -> MonoblockResult<()> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(failure(op, 110, "connection timed out"));
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn key(vol: &Volume) -> String {
    naming::encode(&vol.parent(), true)
}

fn failure(op: &str, code: i32, stderr: &str) -> MonoblockError {
    MonoblockError::Backend(CommandError::new("rbd", [op], Some(code), stderr))
}

fn children_of(images: &BTreeMap<String, Image>, parent: &str, snapshot: &str) -> Vec<String> {
    images
        .iter()
        .filter(|(_, image)| {
            matches!(&image.parent, Some((p, s)) if p == parent && s == snapshot)
        })
        .map(|(name, _)| name.clone())
        .collect()
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl VolumeBackend for MemoryBackend {
    async fn list_snapshots(&self, vol: &Volume) -> MonoblockResult<Vec<String>> {
        self.check_reachable("snap ls")?;
        let images = self.images();
        let image = images
            .get(&key(vol))
            .ok_or_else(|| failure("snap ls", EXIT_NOT_FOUND, "image not found"))?;

        if image.snapshots.is_empty() {
            return Err(MonoblockError::not_found(key(vol)));
        }

        Ok(image.snapshots.keys().cloned().collect())
    }

    async fn volume_parent(&self, vol: &Volume) -> MonoblockResult<String> {
        self.check_reachable("info")?;
        let images = self.images();
        let image = images
            .get(&key(vol))
            .ok_or_else(|| failure("info", EXIT_NOT_FOUND, "image not found"))?;

        match &image.parent {
            Some((parent, snapshot)) => Ok(format!("{}@{}", parent, snapshot)),
            None => Err(MonoblockError::not_found(key(vol))),
        }
    }

    async fn list_snapshot_clones(
        &self,
        vol: &Volume,
        snapshot: &str,
    ) -> MonoblockResult<Vec<String>> {
        self.check_reachable("children")?;
        let images = self.images();
        let exists = images
            .get(&key(vol))
            .is_some_and(|image| image.snapshots.contains_key(snapshot));
        if !exists {
            return Err(failure("children", EXIT_NOT_FOUND, "snapshot not found"));
        }

        let clones = children_of(&images, &key(vol), snapshot);
        if clones.is_empty() {
            return Err(MonoblockError::not_found(format!("{}@{}", key(vol), snapshot)));
        }

        Ok(clones)
    }

    async fn unmap(&self, vol: &Volume, _until_unmapped: bool) -> MonoblockResult<()> {
        self.record(format!("unmap {}", naming::encode(vol, true)));
        Ok(())
    }

    async fn delete_volume(&self, vol: &Volume) -> MonoblockResult<()> {
        let rejected = self
            .fail_removals
            .lock()
            .is_ok_and(|fail| fail.contains(&key(vol)));
        if rejected {
            return Err(failure("rm", libc::EIO, "input/output error"));
        }

        let mut images = self.images();
        match images.get(&key(vol)) {
            None => return Err(failure("rm", EXIT_NOT_FOUND, "image not found")),
            Some(image) if !image.snapshots.is_empty() => {
                return Err(failure("rm", libc::ENOTEMPTY, "image has snapshots"))
            }
            Some(_) => {}
        }

        images.remove(&key(vol));
        drop(images);
        self.record(format!("rm {}", key(vol)));
        Ok(())
    }

    async fn unprotect_snapshot(&self, vol: &Volume, snapshot: &str) -> MonoblockResult<()> {
        let mut images = self.images();
        let has_children = !children_of(&images, &key(vol), snapshot).is_empty();
        let protected = images
            .get_mut(&key(vol))
            .and_then(|image| image.snapshots.get_mut(snapshot))
            .ok_or_else(|| failure("snap unprotect", EXIT_NOT_FOUND, "snapshot not found"))?;

        if has_children {
            return Err(failure("snap unprotect", EXIT_BUSY, "snapshot has children"));
        }

        *protected = false;
        drop(images);
        self.record(format!("unprotect {}@{}", key(vol), snapshot));
        Ok(())
    }

    async fn delete_snapshot(&self, vol: &Volume, snapshot: &str) -> MonoblockResult<()> {
        let mut images = self.images();
        let image = images
            .get_mut(&key(vol))
            .ok_or_else(|| failure("snap rm", EXIT_NOT_FOUND, "image not found"))?;

        match image.snapshots.get(snapshot) {
            None => return Err(failure("snap rm", EXIT_NOT_FOUND, "snapshot not found")),
            Some(true) => return Err(failure("snap rm", EXIT_BUSY, "snapshot is protected")),
            Some(false) => {}
        }

        image.snapshots.remove(snapshot);
        drop(images);
        self.record(format!("snap rm {}@{}", key(vol), snapshot));
        Ok(())
    }

    async fn mark_volume_deleted(&self, vol: &Volume, new_name: &str) -> MonoblockResult<()> {
        let target = key(&vol.parent().renamed(new_name).with_zombie(true));
        let mut images = self.images();
        let image = images
            .remove(&key(vol))
            .ok_or_else(|| failure("mv", EXIT_NOT_FOUND, "image not found"))?;
        images.insert(target.clone(), image);

        for clone in images.values_mut() {
            if let Some((parent, _)) = clone.parent.as_mut() {
                if *parent == key(vol) {
                    *parent = target.clone();
                }
            }
        }

        drop(images);
        self.record(format!("mv {} {}", key(vol), target));
        Ok(())
    }

    async fn rename_snapshot(&self, vol: &Volume, old: &str, new: &str) -> MonoblockResult<()> {
        let mut images = self.images();
        let image = images
            .get_mut(&key(vol))
            .ok_or_else(|| failure("snap rename", EXIT_NOT_FOUND, "image not found"))?;
        let protected = image
            .snapshots
            .remove(old)
            .ok_or_else(|| failure("snap rename", EXIT_NOT_FOUND, "snapshot not found"))?;
        image.snapshots.insert(new.to_string(), protected);

        for clone in images.values_mut() {
            if let Some((parent, snapshot)) = clone.parent.as_mut() {
                if *parent == key(vol) && snapshot == old {
                    *snapshot = new.to_string();
                }
            }
        }

        drop(images);
        self.record(format!("snap rename {}@{} {}", key(vol), old, new));
        Ok(())
    }
}
