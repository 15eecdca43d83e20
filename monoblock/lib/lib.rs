//! `monoblock` manages block-device-backed volumes on a Ceph RBD pool.
//!
//! # Overview
//!
//! Volumes of containers, virtual machines, images and custom disks live as RBD images in one
//! OSD pool. monoblock handles:
//! - Encoding volume identities into flat RBD image names and back
//! - Snapshot and clone lifecycles
//! - Deleting volumes and snapshots that other volumes still depend on
//! - Mapping images to kernel block devices
//! - Incremental replication of volumes between hosts
//!
//! # Zombies
//!
//! RBD refuses to delete a snapshot that still has clones, and there is no side database of
//! clone edges. When something is deleted upstream while a clone still depends on it, it is
//! renamed with a `zombie_` prefix instead and purged as soon as its last dependent goes away.
//! See [`deletion`].
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use monoblock::{
//!     backend::Rbd,
//!     config::RbdConfig,
//!     deletion::{self, DeleteOutcome},
//!     naming::{ContentType, VolumeType},
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = RbdConfig::builder().osd_pool_name("incus").build();
//!     let rbd = Rbd::new(config);
//!
//!     let image = rbd
//!         .volume(VolumeType::Image, ContentType::Filesystem, "f00d")
//!         .with_filesystem("ext4");
//!     rbd.create_volume(&image, 10 << 30).await?;
//!     rbd.create_snapshot(&image, "readonly").await?;
//!     rbd.protect_snapshot(&image, "readonly").await?;
//!
//!     let container = rbd.volume(VolumeType::Container, ContentType::Filesystem, "c1");
//!     rbd.create_clone(&image, "readonly", &container).await?;
//!
//!     // The image is kept as a zombie until the container is gone.
//!     assert_eq!(deletion::delete_volume(&rbd, &image).await?, DeleteOutcome::Zombified);
//!     deletion::delete_volume(&rbd, &container).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`naming`] - Volume identities and their backend names
//! - [`config`] - Pool configuration
//! - [`backend`] - The `rbd` CLI driver
//! - [`mapping`] - Kernel device mapping
//! - [`deletion`] - Dependency-aware deletion
//! - [`transfer`] - Differential send and receive
//! - [`cli`] - Command-line arguments

#![warn(missing_docs)]
#![allow(clippy::module_inception)]

mod error;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod backend;
pub mod cli;
pub mod config;
pub mod deletion;
pub mod mapping;
pub mod naming;
pub mod transfer;

pub use error::*;
