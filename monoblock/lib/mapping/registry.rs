use std::{
    io,
    path::{Path, PathBuf},
};

use getset::Getters;
use tokio::fs;

use crate::MonoblockResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The kernel's registry of mapped RBD devices, one numbered directory per device.
#[derive(Debug, Clone, Getters)]
pub struct SysfsDevices {
    /// The registry root, usually `/sys/devices/rbd`.
    #[getset(get = "pub with_prefix")]
    root: PathBuf,
}

/// One mapped RBD device as seen by the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedDevice {
    /// The device number, as in `/dev/rbd<id>`.
    pub id: u32,

    /// The pool of the backing image.
    pub pool: String,

    /// The backing image name.
    pub name: String,

    /// The mapped snapshot, `None` for the live image.
    pub current_snap: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SysfsDevices {
    /// Creates a registry reader rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Lists every readable mapped device.
    ///
    /// A missing root means the kernel module is not loaded, so nothing is mapped. Entries that
    /// are not device numbers or lack a pool or name are skipped. Any other read failure is an
    /// error, since skipping a mapped device would get it mapped a second time.
    pub async fn list(&self) -> MonoblockResult<Vec<MappedDevice>> {
        if !fs::try_exists(&self.root).await? {
            return Ok(Vec::new());
        }

        let mut devices = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u32>().ok())
            else {
                continue;
            };

            let dir = entry.path();
            let (Some(pool), Some(name)) = (
                read_attribute(&dir, "pool").await?,
                read_attribute(&dir, "name").await?,
            ) else {
                continue;
            };

            let current_snap = read_attribute(&dir, "current_snap")
                .await?
                .filter(|snap| snap != "-");

            devices.push(MappedDevice {
                id,
                pool,
                name,
                current_snap,
            });
        }

        devices.sort_by_key(|device| device.id);
        Ok(devices)
    }
}

impl MappedDevice {
    /// The block device path, `/dev/rbd<id>`.
    pub fn device_path(&self) -> String {
        format!("/dev/rbd{}", self.id)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Reads a trimmed attribute file. Missing and empty attributes are `None`.
async fn read_attribute(dir: &Path, attribute: &str) -> MonoblockResult<Option<String>> {
    let value = match fs::read_to_string(dir.join(attribute)).await {
        Ok(value) => value,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let value = value.trim();
    Ok((!value.is_empty()).then(|| value.to_string()))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
