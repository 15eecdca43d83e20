use std::{fmt, str::FromStr};

use getset::{CopyGetters, Getters};
use serde::{Deserialize, Serialize};

use crate::MonoblockError;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The logical kind of a volume. Each kind owns a prefix in the backend namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VolumeType {
    /// A container root filesystem.
    Container,

    /// A virtual machine disk.
    VirtualMachine,

    /// A cached image that instances are cloned from.
    Image,

    /// A user-managed custom volume.
    Custom,
}

/// What a volume holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// A filesystem. Has no suffix in the backend name.
    #[default]
    Filesystem,

    /// A raw block device, suffixed `.block`.
    Block,

    /// An ISO image, suffixed `.iso`. Only custom volumes carry this.
    Iso,
}

/// The identity of a volume, or of one of its snapshots, on an RBD pool.
///
/// Never persisted: built from caller parameters or decoded from backend strings with
/// [`decode_qualified`](super::decode_qualified).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Getters, CopyGetters)]
pub struct Volume {
    /// The OSD pool holding the image.
    #[getset(get = "pub with_prefix")]
    pool: String,

    /// The logical kind of the volume.
    #[getset(get_copy = "pub with_prefix")]
    vol_type: VolumeType,

    /// What the volume holds.
    #[getset(get_copy = "pub with_prefix")]
    content_type: ContentType,

    /// The logical name, without any prefix or suffix.
    #[getset(get = "pub with_prefix")]
    name: String,

    /// The filesystem hint carried by image volumes.
    #[getset(get = "pub with_prefix")]
    filesystem: Option<String>,

    /// Whether the volume is a zombie: deleted upstream but kept for its dependents.
    #[getset(get_copy = "pub")]
    zombie: bool,

    /// The backend snapshot name when this refers to a point-in-time state.
    #[getset(get = "pub with_prefix")]
    snapshot: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl VolumeType {
    /// All volume types, in the order names are matched against them.
    pub const ALL: [VolumeType; 4] = [
        VolumeType::Container,
        VolumeType::VirtualMachine,
        VolumeType::Image,
        VolumeType::Custom,
    ];

    /// Returns the backend name prefix of this type.
    pub fn prefix(&self) -> &'static str {
        match self {
            VolumeType::Container => "container",
            VolumeType::VirtualMachine => "virtual-machine",
            VolumeType::Image => "image",
            VolumeType::Custom => "custom",
        }
    }
}

impl ContentType {
    /// Returns the backend name suffix of this content type.
    pub fn suffix(&self) -> Option<&'static str> {
        match self {
            ContentType::Filesystem => None,
            ContentType::Block => Some(".block"),
            ContentType::Iso => Some(".iso"),
        }
    }
}

impl Volume {
    /// Creates a live, non-zombie volume.
    pub fn new(
        pool: impl Into<String>,
        vol_type: VolumeType,
        content_type: ContentType,
        name: impl Into<String>,
    ) -> Self {
        Self {
            pool: pool.into(),
            vol_type,
            content_type,
            name: name.into(),
            filesystem: None,
            zombie: false,
            snapshot: None,
        }
    }

    /// Sets the filesystem hint. Only encoded for image volumes.
    pub fn with_filesystem(mut self, filesystem: impl Into<String>) -> Self {
        self.filesystem = Some(filesystem.into());
        self
    }

    /// Sets the zombie flag.
    pub fn with_zombie(mut self, zombie: bool) -> Self {
        self.zombie = zombie;
        self
    }

    /// Returns the same volume qualified by a backend snapshot name.
    pub fn snapshot(&self, snapshot: impl Into<String>) -> Self {
        Self {
            snapshot: Some(snapshot.into()),
            ..self.clone()
        }
    }

    /// Returns the live volume this refers to, dropping any snapshot qualifier.
    pub fn parent(&self) -> Self {
        Self {
            snapshot: None,
            ..self.clone()
        }
    }

    /// Returns a copy with a different logical name, keeping type, content and hint.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// Returns true if this refers to a snapshot rather than the live volume.
    pub fn is_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for VolumeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

impl FromStr for VolumeType {
    type Err = MonoblockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VolumeType::ALL
            .into_iter()
            .find(|t| t.prefix() == s)
            .ok_or_else(|| MonoblockError::UnrecognizedType(s.to_string()))
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentType::Filesystem => f.write_str("filesystem"),
            ContentType::Block => f.write_str("block"),
            ContentType::Iso => f.write_str("iso"),
        }
    }
}

impl FromStr for ContentType {
    type Err = MonoblockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "filesystem" | "fs" => Ok(ContentType::Filesystem),
            "block" => Ok(ContentType::Block),
            "iso" => Ok(ContentType::Iso),
            _ => Err(MonoblockError::custom(anyhow::anyhow!(
                "unknown content type: {s}"
            ))),
        }
    }
}

impl fmt::Display for Volume {
    /// Formats the volume as its pool-qualified backend name.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&super::encode(self, true))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
