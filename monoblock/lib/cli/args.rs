use std::{net::SocketAddr, path::PathBuf};

use clap::{
    builder::styling::{AnsiColor, Effects, Styles},
    Args, Parser,
};

use crate::naming::{self, ContentType, Volume, VolumeType};

//-------------------------------------------------------------------------------------------------
// Types
//-------------------------------------------------------------------------------------------------

/// monoblock - Manage RBD-backed volumes, snapshots and clones
#[derive(Debug, Parser)]
#[command(name = "monoblock", author, about, version, styles = styles())]
pub struct MonoblockArgs {
    /// The subcommand to run
    #[command(subcommand)]
    pub subcommand: MonoblockSubcommand,

    /// Path to the pool configuration file
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available subcommands
#[derive(Debug, Parser)]
pub enum MonoblockSubcommand {
    /// Print the backend name of a volume
    #[command(name = "encode")]
    Encode {
        /// The pool to qualify the name with
        #[arg(short, long)]
        pool: Option<String>,

        /// The volume
        #[command(flatten)]
        volume: VolumeArgs,

        /// Encode the zombie form
        #[arg(long)]
        zombie: bool,
    },

    /// Print the identity behind a pool-qualified backend name
    #[command(name = "decode")]
    Decode {
        /// The backend name, `<pool>/<image>[@<snapshot>]`
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Create a volume
    #[command(name = "create")]
    Create {
        /// The volume
        #[command(flatten)]
        volume: VolumeArgs,

        /// Size in bytes
        #[arg(short, long)]
        size: u64,
    },

    /// Create and protect a snapshot of a volume
    #[command(name = "snapshot")]
    Snapshot {
        /// The volume
        #[command(flatten)]
        volume: VolumeArgs,

        /// The user-visible snapshot name
        #[arg(short = 'S', long)]
        snapshot: String,
    },

    /// Delete a volume, keeping it as a zombie while clones depend on it
    #[command(name = "delete")]
    Delete {
        /// The volume
        #[command(flatten)]
        volume: VolumeArgs,
    },

    /// Delete a snapshot, keeping it as a zombie while clones depend on it
    #[command(name = "delete-snapshot")]
    DeleteSnapshot {
        /// The volume
        #[command(flatten)]
        volume: VolumeArgs,

        /// The user-visible snapshot name
        #[arg(short = 'S', long)]
        snapshot: String,
    },

    /// Print the device a volume is mapped to
    #[command(name = "map")]
    Map {
        /// The volume
        #[command(flatten)]
        volume: VolumeArgs,

        /// Map a snapshot instead of the live volume
        #[arg(short = 'S', long)]
        snapshot: Option<String>,

        /// Fail instead of mapping when no device is found
        #[arg(long)]
        no_map: bool,
    },

    /// Unmap a volume
    #[command(name = "unmap")]
    Unmap {
        /// The volume
        #[command(flatten)]
        volume: VolumeArgs,

        /// Unmap a snapshot instead of the live volume
        #[arg(short = 'S', long)]
        snapshot: Option<String>,

        /// Keep unmapping until nothing is left
        #[arg(long)]
        all: bool,
    },

    /// Send a differential export to a peer running `receive`
    #[command(name = "send")]
    Send {
        /// The pool-qualified backend name to export, optionally with a snapshot
        name: String,

        /// Only send changes since this backend snapshot
        #[arg(long)]
        from: Option<String>,

        /// The peer to connect to
        #[arg(long)]
        peer: SocketAddr,
    },

    /// Receive a differential export from a peer running `send`
    #[command(name = "receive")]
    Receive {
        /// The pool-qualified backend name to import into
        name: String,

        /// The address to listen on
        #[arg(long)]
        listen: SocketAddr,
    },
}

/// The identity of a volume on the configured pool.
#[derive(Debug, Clone, Args)]
pub struct VolumeArgs {
    /// The volume type
    #[arg(short = 't', long = "type", default_value = "custom")]
    pub vol_type: VolumeType,

    /// What the volume holds: filesystem, block or iso
    #[arg(long, default_value = "filesystem")]
    pub content: ContentType,

    /// The filesystem hint of an image volume
    #[arg(long)]
    pub filesystem: Option<String>,

    /// The logical volume name
    pub name: String,
}

//-------------------------------------------------------------------------------------------------
// Methods
//-------------------------------------------------------------------------------------------------

impl VolumeArgs {
    /// Builds the live volume on `pool`.
    pub fn to_volume(&self, pool: &str) -> Volume {
        let vol = Volume::new(pool, self.vol_type, self.content, self.name.as_str());
        match &self.filesystem {
            Some(filesystem) => vol.with_filesystem(filesystem.as_str()),
            None => vol,
        }
    }

    /// Builds the volume qualified with a user-visible snapshot, if given.
    pub fn to_snapshot(&self, pool: &str, snapshot: Option<&str>) -> Volume {
        let vol = self.to_volume(pool);
        match snapshot {
            Some(snapshot) => vol.snapshot(naming::user_snapshot_name(snapshot)),
            None => vol,
        }
    }
}

//-------------------------------------------------------------------------------------------------
// Functions
//-------------------------------------------------------------------------------------------------

/// Returns a `Styles` object with the default styles for the CLI.
pub fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default())
        .error(AnsiColor::Red.on_default() | Effects::BOLD)
        .valid(AnsiColor::Green.on_default() | Effects::BOLD)
        .invalid(AnsiColor::Red.on_default() | Effects::BOLD)
}

//-------------------------------------------------------------------------------------------------
// Tests
//-------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_args_are_consistent() {
        MonoblockArgs::command().debug_assert();
    }

    #[test]
    fn test_parse_snapshot_args() -> anyhow::Result<()> {
        let args = MonoblockArgs::try_parse_from([
            "monoblock",
            "--config",
            "/etc/monoblock.yaml",
            "unmap",
            "--type",
            "virtual-machine",
            "--content",
            "block",
            "vm1",
            "-S",
            "s0",
            "--all",
        ])?;

        assert_eq!(args.config, Some(PathBuf::from("/etc/monoblock.yaml")));
        match args.subcommand {
            MonoblockSubcommand::Unmap {
                volume,
                snapshot,
                all,
            } => {
                assert!(all);
                let vol = volume.to_snapshot("incus", snapshot.as_deref());
                assert_eq!(
                    naming::encode(&vol, true),
                    "incus/virtual-machine_vm1.block@snapshot_s0"
                );
            }
            other => panic!("unexpected subcommand: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn test_unknown_volume_type_is_rejected() {
        assert!(MonoblockArgs::try_parse_from(["monoblock", "delete", "-t", "widget", "w1"]).is_err());
    }
}
