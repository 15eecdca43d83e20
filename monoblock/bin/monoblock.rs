use std::path::PathBuf;

use clap::Parser;
use monoblock::{
    backend::Rbd,
    cli::{MonoblockArgs, MonoblockSubcommand, VolumeArgs},
    config::{RbdConfig, DEFAULT_CONFIG_FILENAME},
    deletion::{self, DeleteOutcome},
    naming::{self, Volume},
    MonoblockResult,
};
use tokio::net::{TcpListener, TcpStream};
use tracing_subscriber::EnvFilter;

//--------------------------------------------------------------------------------------------------
// Functions: main
//--------------------------------------------------------------------------------------------------

#[tokio::main]
async fn main() -> MonoblockResult<()> {
    let args = MonoblockArgs::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.subcommand {
        MonoblockSubcommand::Encode {
            pool,
            volume,
            zombie,
        } => {
            let vol = volume
                .to_volume(pool.as_deref().unwrap_or_default())
                .with_zombie(zombie);
            println!("{}", naming::encode(&vol, pool.is_some()));
        }
        MonoblockSubcommand::Decode { names } => {
            for name in names {
                print_volume(&naming::decode_qualified(&name)?);
            }
        }
        MonoblockSubcommand::Create { volume, size } => {
            let rbd = load_driver(args.config).await?;
            let vol = pool_volume(&rbd, &volume);
            rbd.create_volume(&vol, size).await?;
            println!("{}", vol);
        }
        MonoblockSubcommand::Snapshot { volume, snapshot } => {
            let rbd = load_driver(args.config).await?;
            let vol = pool_volume(&rbd, &volume);
            let snapshot = naming::user_snapshot_name(&snapshot);
            rbd.create_snapshot(&vol, &snapshot).await?;
            rbd.protect_snapshot(&vol, &snapshot).await?;
            println!("{}", vol.snapshot(snapshot));
        }
        MonoblockSubcommand::Delete { volume } => {
            let rbd = load_driver(args.config).await?;
            let vol = pool_volume(&rbd, &volume);
            let outcome = deletion::delete_volume(&rbd, &vol).await?;
            print_outcome(&vol, outcome);
        }
        MonoblockSubcommand::DeleteSnapshot { volume, snapshot } => {
            let rbd = load_driver(args.config).await?;
            let vol = pool_volume(&rbd, &volume);
            let snapshot = naming::user_snapshot_name(&snapshot);
            let outcome = deletion::delete_snapshot(&rbd, &vol, &snapshot).await?;
            print_outcome(&vol.snapshot(snapshot), outcome);
        }
        MonoblockSubcommand::Map {
            volume,
            snapshot,
            no_map,
        } => {
            let rbd = load_driver(args.config).await?;
            let vol = volume.to_snapshot(rbd.get_config().get_osd_pool_name(), snapshot.as_deref());
            let (mapped, path) = rbd.mapped_device_path(&vol, !no_map).await?;
            if mapped {
                tracing::info!("mapped {} to {}", vol, path);
            }
            println!("{}", path);
        }
        MonoblockSubcommand::Unmap {
            volume,
            snapshot,
            all,
        } => {
            let rbd = load_driver(args.config).await?;
            let vol = volume.to_snapshot(rbd.get_config().get_osd_pool_name(), snapshot.as_deref());
            rbd.unmap_image(&vol, all).await?;
        }
        MonoblockSubcommand::Send { name, from, peer } => {
            let rbd = load_driver(args.config).await?;
            let conn = TcpStream::connect(peer).await?;
            tracing::info!("sending {} to {}", name, peer);
            rbd.send_volume(conn, &name, from.as_deref(), None).await?;
        }
        MonoblockSubcommand::Receive { name, listen } => {
            let rbd = load_driver(args.config).await?;
            let listener = TcpListener::bind(listen).await?;
            tracing::info!("waiting for a sender on {}", listener.local_addr()?);
            let (conn, peer) = listener.accept().await?;
            tracing::info!("receiving {} from {}", name, peer);
            rbd.receive_volume(&name, conn, None).await?;
        }
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

async fn load_driver(path: Option<PathBuf>) -> MonoblockResult<Rbd> {
    let path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILENAME));
    let config = RbdConfig::load(&path).await?;
    Ok(Rbd::new(config))
}

fn pool_volume(rbd: &Rbd, volume: &VolumeArgs) -> Volume {
    volume.to_volume(rbd.get_config().get_osd_pool_name())
}

fn print_volume(vol: &Volume) {
    println!("pool:       {}", vol.get_pool());
    println!("type:       {}", vol.get_vol_type());
    println!("content:    {}", vol.get_content_type());
    println!("name:       {}", vol.get_name());
    if let Some(filesystem) = vol.get_filesystem() {
        println!("filesystem: {}", filesystem);
    }
    println!("zombie:     {}", vol.zombie());
    if let Some(snapshot) = vol.get_snapshot() {
        println!("snapshot:   {}", snapshot);
    }
}

fn print_outcome(vol: &Volume, outcome: DeleteOutcome) {
    match outcome {
        DeleteOutcome::Deleted => println!("deleted {}", vol),
        DeleteOutcome::Zombified => println!("kept {} as a zombie", vol),
    }
}
