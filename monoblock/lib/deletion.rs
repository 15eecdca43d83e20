//! Dependency-aware deletion of volumes and snapshots.
//!
//! The backend keeps no record of which clones hang off which snapshot other than the parent
//! pointer on each clone, so the dependency graph is rebuilt from backend queries on every walk.
//! Anything that cannot be removed yet because a live clone still depends on it is renamed into
//! zombie form and left in place. Zombies are re-examined whenever one of their dependents goes
//! away and are purged as soon as nothing depends on them.
//!
//! Callers must serialize deletions of the same volume; the walk is not atomic.

use async_recursion::async_recursion;

use crate::{
    backend::VolumeBackend,
    naming::{self, CloneRef, Volume},
    MonoblockResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// How a deletion request ended. Failures come back as the `Err` arm of the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The entity was physically removed.
    Deleted,

    /// The entity is still needed by a clone and now carries the zombie marker.
    Zombified,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Deletes a volume, or turns it into a zombie if a live clone still depends on one of its
/// snapshots.
///
/// Every snapshot of the volume is deleted first. If the volume is itself a clone of a zombie, or
/// of a zombie snapshot, that parent is re-examined once the volume is gone.
pub async fn delete_volume<B>(backend: &B, vol: &Volume) -> MonoblockResult<DeleteOutcome>
where
    B: VolumeBackend + ?Sized,
{
    delete_volume_inner(backend, &vol.parent(), true).await
}

/// Deletes a snapshot, or turns it into a zombie if a live clone still depends on it.
///
/// Zombie clones of the snapshot are deleted along the way. If the owning volume is a zombie and
/// the snapshot was removed, the volume is re-examined as well.
pub async fn delete_snapshot<B>(
    backend: &B,
    vol: &Volume,
    snapshot: &str,
) -> MonoblockResult<DeleteOutcome>
where
    B: VolumeBackend + ?Sized,
{
    delete_snapshot_inner(backend, &vol.parent(), snapshot, true).await
}

/// `revisit_parent` is false when the caller is already deleting the parent snapshot.
#[async_recursion]
async fn delete_volume_inner<B>(
    backend: &B,
    vol: &Volume,
    revisit_parent: bool,
) -> MonoblockResult<DeleteOutcome>
where
    B: VolumeBackend + ?Sized,
{
    let snapshots = match backend.list_snapshots(vol).await {
        Ok(snapshots) => snapshots,
        Err(e) if e.is_not_found() => {
            remove_image(backend, vol, revisit_parent).await?;
            return Ok(DeleteOutcome::Deleted);
        }
        Err(e) => return Err(e),
    };

    let mut zombified = 0;
    for snapshot in &snapshots {
        if delete_snapshot_inner(backend, vol, snapshot, false).await? == DeleteOutcome::Zombified
        {
            zombified += 1;
        }
    }

    if zombified == 0 {
        remove_image(backend, vol, revisit_parent).await?;
        return Ok(DeleteOutcome::Deleted);
    }

    backend.unmap(vol, true).await?;
    if vol.zombie() {
        return Ok(DeleteOutcome::Zombified);
    }

    let new_name = naming::zombie_volume_name(vol.get_name());
    backend.mark_volume_deleted(vol, &new_name).await?;
    tracing::debug!(
        "kept {} as zombie {}: {} snapshot(s) still cloned",
        naming::encode(vol, true),
        new_name,
        zombified
    );

    Ok(DeleteOutcome::Zombified)
}

/// `revisit_volume` is false when the caller is already deleting the owning volume.
#[async_recursion]
async fn delete_snapshot_inner<B>(
    backend: &B,
    vol: &Volume,
    snapshot: &str,
    revisit_volume: bool,
) -> MonoblockResult<DeleteOutcome>
where
    B: VolumeBackend + ?Sized,
{
    let clones = match backend.list_snapshot_clones(vol, snapshot).await {
        Ok(clones) => clones,
        Err(e) if e.is_not_found() => Vec::new(),
        Err(e) => return Err(e),
    };

    let mut can_delete = true;
    for clone in &clones {
        let clone = CloneRef::parse(clone)?.into_volume(vol.get_content_type());

        // A live clone is still referenced upstream and blocks the snapshot outright.
        if !clone.zombie() {
            can_delete = false;
            continue;
        }

        if delete_volume_inner(backend, &clone, false).await? == DeleteOutcome::Zombified {
            can_delete = false;
        }
    }

    if can_delete {
        purge_snapshot(backend, vol, snapshot, revisit_volume).await?;
        return Ok(DeleteOutcome::Deleted);
    }

    if naming::is_zombie_snapshot(snapshot) {
        return Ok(DeleteOutcome::Zombified);
    }

    let new_name = naming::zombie_snapshot_name();
    backend.unmap(&vol.snapshot(snapshot), true).await?;
    backend.rename_snapshot(vol, snapshot, &new_name).await?;
    tracing::debug!(
        "kept {} as zombie snapshot {}: still cloned",
        naming::encode(&vol.snapshot(snapshot), true),
        new_name
    );

    Ok(DeleteOutcome::Zombified)
}

/// Unmaps and removes a volume image, then re-examines its parent snapshot if that was only kept
/// around for this clone.
async fn remove_image<B>(backend: &B, vol: &Volume, revisit_parent: bool) -> MonoblockResult<()>
where
    B: VolumeBackend + ?Sized,
{
    let parent = if revisit_parent {
        match backend.volume_parent(vol).await {
            Ok(parent) => Some(naming::decode_parent(&parent)?),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        }
    } else {
        None
    };

    backend.unmap(vol, true).await?;
    backend.delete_volume(vol).await?;
    tracing::debug!("deleted {}", naming::encode(vol, true));

    if let Some((parent_vol, parent_snapshot)) = parent {
        // Live parents are still referenced upstream and stay untouched.
        if parent_vol.zombie() || naming::is_zombie_snapshot(&parent_snapshot) {
            delete_snapshot_inner(backend, &parent_vol, &parent_snapshot, true).await?;
        }
    }

    Ok(())
}

/// Unprotects, unmaps and removes a snapshot nothing depends on any more.
async fn purge_snapshot<B>(
    backend: &B,
    vol: &Volume,
    snapshot: &str,
    revisit_volume: bool,
) -> MonoblockResult<()>
where
    B: VolumeBackend + ?Sized,
{
    backend.unprotect_snapshot(vol, snapshot).await?;
    backend.unmap(&vol.snapshot(snapshot), true).await?;
    backend.delete_snapshot(vol, snapshot).await?;
    tracing::debug!("deleted {}", naming::encode(&vol.snapshot(snapshot), true));

    if revisit_volume && vol.zombie() {
        if let Err(e) = delete_volume_inner(backend, vol, true).await {
            tracing::warn!(
                "failed to clean up zombie volume {}: {}",
                naming::encode(vol, true),
                e
            );
        }
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
