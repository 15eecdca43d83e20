use monoutils::{CommandError, CommandRunner, MonoutilsError};

use crate::{
    backend::{image_name, Rbd, EXIT_BUSY, EXIT_INVALID},
    naming::{self, Volume},
    MonoblockError, MonoblockResult,
};

use super::SysfsDevices;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// What a single unmap round ended with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnmapState {
    /// One mapping was removed. More may be stacked.
    Unmapped,

    /// Nothing was mapped.
    AlreadyUnmapped,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<R> Rbd<R>
where
    R: CommandRunner,
{
    /// Returns the kernel device registry this driver reads.
    pub fn devices(&self) -> SysfsDevices {
        SysfsDevices::new(self.get_config().get_sysfs_root())
    }

    /// Maps a volume, or the snapshot it is qualified with, and returns the new device path.
    pub async fn map_volume(&self, vol: &Volume) -> MonoblockResult<String> {
        let mut args = self.pool_args();
        args.extend(["map".to_string(), naming::encode(vol, false)]);

        let output = self.run_rbd(&args).await?;
        let path = parse_device_path(&output)
            .ok_or_else(|| MonoblockError::MappedPathNotFound(output.clone()))?;

        tracing::debug!("mapped {} to {}", naming::encode(vol, true), path);
        Ok(path)
    }

    /// Finds the device a volume is mapped to, mapping it if asked to.
    ///
    /// A snapshot only matches a device showing that snapshot; a live volume only matches a
    /// device showing no snapshot. Returns whether the volume was freshly mapped along with the
    /// device path.
    pub async fn mapped_device_path(
        &self,
        vol: &Volume,
        map_if_missing: bool,
    ) -> MonoblockResult<(bool, String)> {
        let pool = self.get_config().get_osd_pool_name();
        let name = image_name(vol);

        let found = self.devices().list().await?.into_iter().find(|device| {
            device.pool == *pool
                && device.name == name
                && device.current_snap.as_deref() == vol.get_snapshot().as_deref()
        });

        if let Some(device) = found {
            return Ok((false, device.device_path()));
        }

        if !map_if_missing {
            return Err(MonoblockError::NotMapped(naming::encode(vol, true)));
        }

        Ok((true, self.map_volume(vol).await?))
    }

    /// Unmaps a volume, or the snapshot it is qualified with.
    ///
    /// Not being mapped counts as success. A busy device is retried up to the configured number
    /// of times. With `until_unmapped`, unmapping repeats until nothing is left, which removes
    /// stacked mappings of the same image.
    pub async fn unmap_image(&self, vol: &Volume, until_unmapped: bool) -> MonoblockResult<()> {
        loop {
            let state = self.unmap_once(vol).await?;
            if !until_unmapped || state == UnmapState::AlreadyUnmapped {
                return Ok(());
            }
        }
    }

    async fn unmap_once(&self, vol: &Volume) -> MonoblockResult<UnmapState> {
        let mut args = self.pool_args();
        args.extend(["unmap".to_string(), naming::encode(vol, false)]);

        let rbd_bin = self.get_config().get_rbd_bin();
        let retries = self.get_config().get_unmap_busy_retries().max(1);
        let mut last_busy = None;

        for attempt in 1..=retries {
            match self.get_runner().run(rbd_bin, &args).await {
                Ok(_) => {
                    tracing::debug!("unmapped {}", naming::encode(vol, true));
                    return Ok(UnmapState::Unmapped);
                }
                Err(MonoutilsError::CommandFailed(e)) if e.exited_with(EXIT_INVALID) => {
                    return Ok(UnmapState::AlreadyUnmapped);
                }
                Err(MonoutilsError::CommandFailed(e)) if e.exited_with(EXIT_BUSY) => {
                    tracing::debug!(
                        "{} busy on unmap attempt {}/{}",
                        naming::encode(vol, true),
                        attempt,
                        retries
                    );

                    last_busy = Some(e);
                    if attempt < retries {
                        tokio::time::sleep(self.get_config().unmap_retry_delay()).await;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        let source = last_busy
            .unwrap_or_else(|| CommandError::new(rbd_bin.as_str(), args, Some(EXIT_BUSY), ""));

        Err(MonoblockError::UnmapBusy {
            volume: naming::encode(vol, true),
            attempts: retries,
            source,
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Extracts the device path from `rbd map` output, which may carry warnings before it.
fn parse_device_path(output: &str) -> Option<String> {
    let start = output.find("/dev/rbd")?;
    let path = output[start..].split_whitespace().next()?;
    Some(path.to_string())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
