use async_trait::async_trait;

use crate::{naming::Volume, MonoblockResult};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// The backend queries and mutations the dependency-aware deletion walk needs.
///
/// "Nothing there" answers come back as [`MonoblockError::NotFound`](crate::MonoblockError::NotFound)
/// and must never be produced for a failed query.
#[async_trait]
pub trait VolumeBackend: Send + Sync {
    /// Lists the snapshot names of a volume. `NotFound` if it has none.
    async fn list_snapshots(&self, vol: &Volume) -> MonoblockResult<Vec<String>>;

    /// Returns the parent of a clone as `<pool>/<image>@<snapshot>`. `NotFound` if the volume is
    /// not a clone.
    async fn volume_parent(&self, vol: &Volume) -> MonoblockResult<String>;

    /// Lists the clones of a snapshot as `<pool>/<image>`. `NotFound` if it has none.
    async fn list_snapshot_clones(&self, vol: &Volume, snapshot: &str)
        -> MonoblockResult<Vec<String>>;

    /// Unmaps the volume, or the snapshot it is qualified with, from the kernel.
    ///
    /// Already unmapped is success. With `until_unmapped` the unmap is repeated until the
    /// backend reports nothing left to unmap.
    async fn unmap(&self, vol: &Volume, until_unmapped: bool) -> MonoblockResult<()>;

    /// Physically removes a volume image.
    async fn delete_volume(&self, vol: &Volume) -> MonoblockResult<()>;

    /// Removes the protection of a snapshot. Already unprotected is success.
    async fn unprotect_snapshot(&self, vol: &Volume, snapshot: &str) -> MonoblockResult<()>;

    /// Physically removes a snapshot.
    async fn delete_snapshot(&self, vol: &Volume, snapshot: &str) -> MonoblockResult<()>;

    /// Renames a volume into zombie form under `new_name`.
    async fn mark_volume_deleted(&self, vol: &Volume, new_name: &str) -> MonoblockResult<()>;

    /// Renames a snapshot of a volume.
    async fn rename_snapshot(&self, vol: &Volume, old: &str, new: &str) -> MonoblockResult<()>;
}
