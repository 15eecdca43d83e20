//! Bidirectional mapping between [`Volume`] identities and flat RBD image names.
//!
//! ## Format
//!
//! ```text
//! [<pool>/][zombie_]<type>_<name>[_<filesystem>][.block|.iso][@<snapshot>]
//! ```
//!
//! - `<type>` is one of `container`, `virtual-machine`, `image` or `custom`.
//! - `_<filesystem>` is only written for image volumes that carry a filesystem hint.
//! - `.block` marks block content on any type, `.iso` marks ISO content on custom volumes.
//!
//! ## Known ambiguity
//!
//! The filesystem hint of an image is recovered by splitting off the last `_`-delimited token.
//! An image whose own name contains `_` and has no hint decodes with a bogus hint. Image names
//! are fingerprints in practice so this does not come up, but the heuristic cannot tell.

use std::str::FromStr;

use uuid::Uuid;

use crate::{MonoblockError, MonoblockResult};

use super::{ContentType, Volume, VolumeType};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The prefix marking a volume or snapshot as a zombie.
pub const ZOMBIE_PREFIX: &str = "zombie_";

/// The prefix of snapshots taken on behalf of a user-visible snapshot.
pub const SNAPSHOT_PREFIX: &str = "snapshot_";

/// Separates the pool from the image name.
pub const POOL_DELIMITER: char = '/';

/// Separates the image name from the snapshot name.
pub const SNAPSHOT_DELIMITER: char = '@';

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A clone as reported by `rbd children`: `<pool>/[zombie_]<type>_<name>`.
///
/// Content kind is not disambiguated here; the caller already knows which snapshot the clone
/// hangs off and supplies it in [`CloneRef::into_volume`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloneRef {
    /// The pool holding the clone.
    pub pool: String,

    /// The type of the clone.
    pub vol_type: VolumeType,

    /// The clone name after the type prefix, content suffix included.
    pub name: String,

    /// Whether the clone is a zombie.
    pub zombie: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CloneRef {
    /// Parses a clone reference.
    pub fn parse(clone: &str) -> MonoblockResult<Self> {
        let (pool, image) = clone
            .split_once(POOL_DELIMITER)
            .ok_or_else(|| MonoblockError::malformed(clone, "pool delimiter not found"))?;

        let (zombie, image) = strip_zombie(image);
        let (vol_type, name) = image
            .split_once('_')
            .ok_or_else(|| MonoblockError::malformed(clone, "type delimiter not found"))?;

        let vol_type = vol_type
            .parse::<VolumeType>()
            .map_err(|_| MonoblockError::UnrecognizedType(clone.to_string()))?;

        if name.is_empty() {
            return Err(MonoblockError::malformed(clone, "empty volume name"));
        }

        Ok(Self {
            pool: pool.to_string(),
            vol_type,
            name: name.to_string(),
            zombie,
        })
    }

    /// Builds the clone's volume, assuming it holds `content_type`.
    pub fn into_volume(self, content_type: ContentType) -> Volume {
        let name = match content_type.suffix() {
            Some(suffix) => self
                .name
                .strip_suffix(suffix)
                .map(str::to_string)
                .unwrap_or(self.name),
            None => self.name,
        };

        Volume::new(self.pool, self.vol_type, content_type, name).with_zombie(self.zombie)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Encodes a volume into its backend name, optionally prefixed with the pool.
pub fn encode(vol: &Volume, with_pool: bool) -> String {
    let mut out = String::new();

    if with_pool {
        out.push_str(vol.get_pool());
        out.push(POOL_DELIMITER);
    }

    if vol.zombie() {
        out.push_str(ZOMBIE_PREFIX);
    }

    out.push_str(vol.get_vol_type().prefix());
    out.push('_');
    out.push_str(vol.get_name());

    if vol.get_vol_type() == VolumeType::Image {
        if let Some(filesystem) = vol.get_filesystem() {
            out.push('_');
            out.push_str(filesystem);
        }
    }

    if let Some(suffix) = vol.get_content_type().suffix() {
        out.push_str(suffix);
    }

    if let Some(snapshot) = vol.get_snapshot() {
        out.push(SNAPSHOT_DELIMITER);
        out.push_str(snapshot);
    }

    out
}

/// Decodes a pool-qualified backend name.
pub fn decode_qualified(qualified: &str) -> MonoblockResult<Volume> {
    let (pool, image) = qualified
        .split_once(POOL_DELIMITER)
        .ok_or_else(|| MonoblockError::malformed(qualified, "pool delimiter not found"))?;

    if pool.is_empty() {
        return Err(MonoblockError::malformed(qualified, "empty pool name"));
    }

    decode(pool, image)
}

/// Decodes a backend image name that lives on `pool`.
pub fn decode(pool: &str, image: &str) -> MonoblockResult<Volume> {
    let (zombie, rest) = strip_zombie(image);

    let (vol_type, rest) = VolumeType::ALL
        .into_iter()
        .find_map(|t| {
            rest.strip_prefix(t.prefix())
                .and_then(|r| r.strip_prefix('_'))
                .map(|r| (t, r))
        })
        .ok_or_else(|| MonoblockError::UnrecognizedType(image.to_string()))?;

    let (rest, snapshot) = match rest.rsplit_once(SNAPSHOT_DELIMITER) {
        Some((name, snapshot)) => (name, Some(snapshot)),
        None => (rest, None),
    };

    let (rest, content_type) = if let Some(name) = rest.strip_suffix(".block") {
        (name, ContentType::Block)
    } else if let Some(name) = rest
        .strip_suffix(".iso")
        .filter(|_| vol_type == VolumeType::Custom)
    {
        (name, ContentType::Iso)
    } else {
        (rest, ContentType::Filesystem)
    };

    let (name, filesystem) = match rest.rsplit_once('_') {
        Some((name, filesystem)) if vol_type == VolumeType::Image => (name, Some(filesystem)),
        _ => (rest, None),
    };

    if name.is_empty() {
        return Err(MonoblockError::malformed(image, "empty volume name"));
    }

    let mut vol = Volume::new(pool, vol_type, content_type, name).with_zombie(zombie);
    if let Some(filesystem) = filesystem {
        vol = vol.with_filesystem(filesystem);
    }

    if let Some(snapshot) = snapshot {
        if snapshot.is_empty() {
            return Err(MonoblockError::malformed(image, "empty snapshot name"));
        }

        vol = vol.snapshot(snapshot);
    }

    Ok(vol)
}

/// Splits a parent reference as printed by `rbd info`: `<pool>/<image>@<snapshot>`.
///
/// Returns the parent volume without its snapshot qualifier, and the snapshot name.
pub fn decode_parent(parent: &str) -> MonoblockResult<(Volume, String)> {
    let vol = decode_qualified(parent)?;
    let snapshot = vol
        .get_snapshot()
        .clone()
        .ok_or_else(|| MonoblockError::malformed(parent, "parent has no snapshot"))?;

    Ok((vol.parent(), snapshot))
}

/// Returns the backend snapshot name for a user-visible snapshot.
pub fn user_snapshot_name(name: &str) -> String {
    format!("{}{}", SNAPSHOT_PREFIX, name)
}

/// Returns a fresh, unique zombie snapshot name.
pub fn zombie_snapshot_name() -> String {
    format!("{}{}{}", ZOMBIE_PREFIX, SNAPSHOT_PREFIX, Uuid::new_v4())
}

/// Returns a fresh, unique name to park a zombie volume under.
pub fn zombie_volume_name(name: &str) -> String {
    format!("{}_{}", name, Uuid::new_v4())
}

/// Returns true if a snapshot name carries the zombie marker.
pub fn is_zombie_snapshot(snapshot: &str) -> bool {
    snapshot.starts_with(ZOMBIE_PREFIX)
}

fn strip_zombie(image: &str) -> (bool, &str) {
    match image.strip_prefix(ZOMBIE_PREFIX) {
        Some(rest) => (true, rest),
        None => (false, image),
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FromStr for Volume {
    type Err = MonoblockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_qualified(s)
    }
}

impl FromStr for CloneRef {
    type Err = MonoblockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CloneRef::parse(s)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
