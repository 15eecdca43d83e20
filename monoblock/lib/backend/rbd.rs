use async_trait::async_trait;
use getset::Getters;
use monoutils::{CommandRunner, SystemCommandRunner};
use serde_json::Value;

use crate::{
    config::RbdConfig,
    naming::{self, ContentType, Volume, VolumeType},
    MonoblockError, MonoblockResult,
};

use super::VolumeBackend;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Exit code of `rbd`/`ceph` when the object does not exist.
pub const EXIT_NOT_FOUND: i32 = libc::ENOENT;

/// Exit code of `rbd` when the device or snapshot is busy.
pub const EXIT_BUSY: i32 = libc::EBUSY;

/// Exit code of `rbd` for an invalid argument, which for unmap means "not mapped".
pub const EXIT_INVALID: i32 = libc::EINVAL;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A driver for one RBD pool, issuing `rbd` and `ceph` administrative commands.
///
/// Commands go through a [`CommandRunner`] so the exit-code handling can be exercised without a
/// cluster.
#[derive(Debug, Clone, Getters)]
pub struct Rbd<R = SystemCommandRunner> {
    /// The pool configuration.
    #[getset(get = "pub with_prefix")]
    config: RbdConfig,

    /// Runs the administrative tools.
    #[getset(get = "pub with_prefix")]
    runner: R,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Rbd {
    /// Creates a driver that runs the real tools.
    pub fn new(config: RbdConfig) -> Self {
        Self::with_runner(config, SystemCommandRunner)
    }
}

impl<R> Rbd<R>
where
    R: CommandRunner,
{
    /// Creates a driver with a custom command runner.
    pub fn with_runner(config: RbdConfig, runner: R) -> Self {
        Self { config, runner }
    }

    /// Returns a live volume on this driver's pool.
    pub fn volume(
        &self,
        vol_type: VolumeType,
        content_type: ContentType,
        name: impl Into<String>,
    ) -> Volume {
        Volume::new(
            self.config.get_osd_pool_name().clone(),
            vol_type,
            content_type,
            name,
        )
    }

    /// Checks whether the OSD pool exists.
    ///
    /// Exit code 2 means it definitely does not; any other failure is surfaced since it may just
    /// as well be a network or cluster problem.
    pub async fn osd_pool_exists(&self) -> MonoblockResult<bool> {
        let args = self.ceph_args(["osd", "pool", "get", self.pool(), "size"]);
        match self.runner.run(self.config.get_ceph_bin(), &args).await {
            Ok(_) => Ok(true),
            Err(e) if e.exit_code() == Some(EXIT_NOT_FOUND) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Destroys the OSD pool including every image still in it.
    ///
    /// Succeeds even if the pool does not exist.
    pub async fn osd_delete_pool(&self) -> MonoblockResult<()> {
        let args = self.ceph_args([
            "osd",
            "pool",
            "delete",
            self.pool(),
            self.pool(),
            "--yes-i-really-really-mean-it",
        ]);
        self.runner.run(self.config.get_ceph_bin(), &args).await?;
        Ok(())
    }

    /// Creates a volume image of `size_bytes`.
    pub async fn create_volume(&self, vol: &Volume, size_bytes: u64) -> MonoblockResult<()> {
        let mut args = self.pool_args();
        args.extend(self.feature_args());
        args.extend(["--size".to_string(), format!("{}B", size_bytes)]);
        args.extend(["create".to_string(), image_name(vol)]);

        self.run_rbd(&args).await?;
        tracing::debug!("created rbd volume {}", image_name(vol));
        Ok(())
    }

    /// Resizes a volume image. The filesystem inside is left alone.
    ///
    /// Resizes can fail transiently while the image is being opened elsewhere, so a failure is
    /// retried up to the configured number of attempts before it is surfaced.
    pub async fn resize_volume(
        &self,
        vol: &Volume,
        size_bytes: u64,
        allow_shrink: bool,
    ) -> MonoblockResult<()> {
        let mut args = vec!["resize".to_string()];
        if allow_shrink {
            args.push("--allow-shrink".to_string());
        }

        args.extend(self.pool_args());
        args.extend(["--size".to_string(), format!("{}B", size_bytes)]);
        args.push(image_name(vol));

        let attempts = self.config.get_resize_attempts().max(1);
        let mut attempt = 1;
        loop {
            match self.run_rbd(&args).await {
                Ok(_) => return Ok(()),
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        "resize of {} failed (attempt {}/{}): {}",
                        image_name(vol),
                        attempt,
                        attempts,
                        e
                    );
                    attempt += 1;
                    tokio::time::sleep(self.config.resize_retry_delay()).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Renames a volume image, keeping type, content and filesystem hint.
    ///
    /// The image should be unmapped first: mapping it again under the new name would leave it
    /// mapped twice and undeletable.
    pub async fn rename_volume(&self, vol: &Volume, new_name: &str) -> MonoblockResult<()> {
        let target = vol.parent().renamed(new_name);
        self.move_image(vol, &target).await
    }

    /// Creates a read-write snapshot of a volume.
    pub async fn create_snapshot(&self, vol: &Volume, snapshot: &str) -> MonoblockResult<()> {
        let mut args = self.pool_args();
        args.extend([
            "snap".to_string(),
            "create".to_string(),
            "--snap".to_string(),
            snapshot.to_string(),
            image_name(vol),
        ]);

        self.run_rbd(&args).await?;
        Ok(())
    }

    /// Protects a snapshot so it can be cloned. Already protected is success.
    pub async fn protect_snapshot(&self, vol: &Volume, snapshot: &str) -> MonoblockResult<()> {
        let mut args = self.pool_args();
        args.extend([
            "snap".to_string(),
            "protect".to_string(),
            "--snap".to_string(),
            snapshot.to_string(),
            image_name(vol),
        ]);

        self.run_rbd_idempotent(&args).await
    }

    /// Clones a protected snapshot into a new volume.
    pub async fn create_clone(
        &self,
        source: &Volume,
        snapshot: &str,
        target: &Volume,
    ) -> MonoblockResult<()> {
        let mut args = self.client_args();
        args.extend(self.feature_args());
        args.extend([
            "clone".to_string(),
            naming::encode(&source.snapshot(snapshot), true),
            naming::encode(&target.parent(), true),
        ]);

        self.run_rbd(&args).await?;
        Ok(())
    }

    /// Runs `rbd` and converts its failure.
    pub(crate) async fn run_rbd(&self, args: &[String]) -> MonoblockResult<String> {
        Ok(self.runner.run(self.config.get_rbd_bin(), args).await?)
    }

    /// Runs `rbd`, treating "busy" and "invalid" exits as "already in that state".
    ///
    /// `rbd snap protect` answers EBUSY for an already protected snapshot and `unprotect`
    /// answers EINVAL for an already unprotected one. Both codes are accepted for both.
    async fn run_rbd_idempotent(&self, args: &[String]) -> MonoblockResult<()> {
        match self.runner.run(self.config.get_rbd_bin(), args).await {
            Ok(_) => Ok(()),
            Err(e) if matches!(e.exit_code(), Some(EXIT_BUSY) | Some(EXIT_INVALID)) => {
                tracing::debug!("rbd already in requested state: {}", e);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn move_image(&self, from: &Volume, to: &Volume) -> MonoblockResult<()> {
        let mut args = self.client_args();
        args.extend([
            "mv".to_string(),
            naming::encode(&from.parent(), true),
            naming::encode(to, true),
        ]);

        self.run_rbd(&args).await?;
        tracing::debug!(
            "renamed rbd volume {} to {}",
            naming::encode(&from.parent(), true),
            naming::encode(to, true)
        );
        Ok(())
    }

    fn pool(&self) -> &str {
        self.config.get_osd_pool_name()
    }

    /// `--id <user> --cluster <cluster>`
    pub(crate) fn client_args(&self) -> Vec<String> {
        vec![
            "--id".to_string(),
            self.config.get_user_name().clone(),
            "--cluster".to_string(),
            self.config.get_cluster_name().clone(),
        ]
    }

    /// `--id <user> --cluster <cluster> --pool <pool>`
    pub(crate) fn pool_args(&self) -> Vec<String> {
        let mut args = self.client_args();
        args.extend(["--pool".to_string(), self.pool().to_string()]);
        args
    }

    fn ceph_args<'a>(&self, rest: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut args = vec![
            "--name".to_string(),
            format!("client.{}", self.config.get_user_name()),
            "--cluster".to_string(),
            self.config.get_cluster_name().clone(),
        ];
        args.extend(rest.into_iter().map(str::to_string));
        args
    }

    fn feature_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        for feature in self.config.get_rbd_features() {
            args.extend(["--image-feature".to_string(), feature.clone()]);
        }

        if let Some(data_pool) = self.config.get_data_pool_name() {
            args.extend(["--data-pool".to_string(), data_pool.clone()]);
        }

        args
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// The pool-relative name of the live image behind a volume.
pub(crate) fn image_name(vol: &Volume) -> String {
    naming::encode(&vol.parent(), false)
}

/// Parses `rbd snap ls --format json` output into snapshot names.
fn parse_snapshot_list(output: &str) -> MonoblockResult<Vec<String>> {
    let entries: Vec<Value> = serde_json::from_str(output)?;

    entries
        .iter()
        .map(|entry| match entry.get("name") {
            Some(Value::String(name)) => Ok(name.trim().to_string()),
            Some(_) => Err(MonoblockError::UnexpectedOutput(
                "\"name\" property did not have string type".to_string(),
            )),
            None => Err(MonoblockError::UnexpectedOutput(
                "no \"name\" property found".to_string(),
            )),
        })
        .collect()
}

/// Extracts the parent from `rbd info` output, if there is one.
fn parse_parent(info: &str) -> Option<String> {
    info.lines()
        .find_map(|line| line.split_once("parent: ").map(|(_, parent)| parent.trim()))
        .filter(|parent| !parent.is_empty())
        .map(str::to_string)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl<R> VolumeBackend for Rbd<R>
where
    R: CommandRunner,
{
    async fn list_snapshots(&self, vol: &Volume) -> MonoblockResult<Vec<String>> {
        let mut args = self.pool_args();
        args.extend([
            "--format".to_string(),
            "json".to_string(),
            "snap".to_string(),
            "ls".to_string(),
            image_name(vol),
        ]);

        let snapshots = parse_snapshot_list(&self.run_rbd(&args).await?)?;
        if snapshots.is_empty() {
            return Err(MonoblockError::not_found(format!(
                "snapshots of {}",
                image_name(vol)
            )));
        }

        Ok(snapshots)
    }

    async fn volume_parent(&self, vol: &Volume) -> MonoblockResult<String> {
        let mut args = self.pool_args();
        args.extend(["info".to_string(), image_name(vol)]);

        let info = self.run_rbd(&args).await?;
        parse_parent(&info)
            .ok_or_else(|| MonoblockError::not_found(format!("parent of {}", image_name(vol))))
    }

    async fn list_snapshot_clones(
        &self,
        vol: &Volume,
        snapshot: &str,
    ) -> MonoblockResult<Vec<String>> {
        let mut args = self.pool_args();
        args.extend([
            "children".to_string(),
            "--image".to_string(),
            image_name(vol),
            "--snap".to_string(),
            snapshot.to_string(),
        ]);

        let output = self.run_rbd(&args).await?;
        let clones: Vec<String> = output.split_whitespace().map(str::to_string).collect();
        if clones.is_empty() {
            return Err(MonoblockError::not_found(format!(
                "clones of {}@{}",
                image_name(vol),
                snapshot
            )));
        }

        Ok(clones)
    }

    async fn unmap(&self, vol: &Volume, until_unmapped: bool) -> MonoblockResult<()> {
        self.unmap_image(vol, until_unmapped).await
    }

    async fn delete_volume(&self, vol: &Volume) -> MonoblockResult<()> {
        let mut args = self.pool_args();
        args.extend(["rm".to_string(), image_name(vol)]);

        self.run_rbd(&args).await?;
        tracing::debug!("deleted rbd volume {}", image_name(vol));
        Ok(())
    }

    async fn unprotect_snapshot(&self, vol: &Volume, snapshot: &str) -> MonoblockResult<()> {
        let mut args = self.pool_args();
        args.extend([
            "snap".to_string(),
            "unprotect".to_string(),
            "--snap".to_string(),
            snapshot.to_string(),
            image_name(vol),
        ]);

        self.run_rbd_idempotent(&args).await
    }

    async fn delete_snapshot(&self, vol: &Volume, snapshot: &str) -> MonoblockResult<()> {
        let mut args = self.pool_args();
        args.extend([
            "snap".to_string(),
            "rm".to_string(),
            naming::encode(&vol.snapshot(snapshot), false),
        ]);

        self.run_rbd(&args).await?;
        tracing::debug!("deleted rbd snapshot {}@{}", image_name(vol), snapshot);
        Ok(())
    }

    async fn mark_volume_deleted(&self, vol: &Volume, new_name: &str) -> MonoblockResult<()> {
        let target = vol.parent().renamed(new_name).with_zombie(true);
        self.move_image(vol, &target).await
    }

    async fn rename_snapshot(&self, vol: &Volume, old: &str, new: &str) -> MonoblockResult<()> {
        let mut args = self.client_args();
        args.extend([
            "snap".to_string(),
            "rename".to_string(),
            naming::encode(&vol.snapshot(old), true),
            naming::encode(&vol.snapshot(new), true),
        ]);

        self.run_rbd(&args).await?;
        tracing::debug!(
            "renamed rbd snapshot {}@{} to {}",
            image_name(vol),
            old,
            new
        );
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::backend::ScriptedRunner;

    use super::*;

    fn driver(runner: &ScriptedRunner) -> Rbd<&ScriptedRunner> {
        let config = RbdConfig::builder()
            .osd_pool_name("incus")
            .user_name("admin")
            .data_pool_name("ec")
            .unmap_retry_delay_ms(0)
            .resize_attempts(3)
            .resize_retry_delay_ms(0)
            .build();
        Rbd::with_runner(config, runner)
    }

    fn container(name: &str) -> Volume {
        Volume::new("incus", VolumeType::Container, ContentType::Filesystem, name)
    }

    #[tokio::test]
    async fn test_create_volume_arguments() -> anyhow::Result<()> {
        let runner = ScriptedRunner::default();
        driver(&runner).create_volume(&container("c1"), 1024).await?;

        assert_eq!(
            runner.calls(),
            vec!["rbd --id admin --cluster ceph --pool incus --image-feature layering --data-pool ec --size 1024B create container_c1"]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_osd_pool_exists_interprets_exit_codes() -> anyhow::Result<()> {
        let runner = ScriptedRunner::default();
        runner.push_ok("3\n");
        runner.push_exit(EXIT_NOT_FOUND, "pool not found");
        runner.push_exit(110, "timed out");

        let rbd = driver(&runner);
        assert!(rbd.osd_pool_exists().await?);
        assert!(!rbd.osd_pool_exists().await?);

        let err = rbd.osd_pool_exists().await.unwrap_err();
        assert!(!err.is_not_found());
        assert_eq!(err.exit_code(), Some(110));

        assert_eq!(
            runner.calls()[0],
            "ceph --name client.admin --cluster ceph osd pool get incus size"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_list_snapshots() -> anyhow::Result<()> {
        let runner = ScriptedRunner::default();
        runner.push_ok(r#"[{"id":4,"name":"snapshot_s0 ","size":10},{"id":5,"name":"zombie_snapshot_x"}]"#);
        runner.push_ok("[]");
        runner.push_ok(r#"[{"id":4}]"#);
        runner.push_exit(EXIT_NOT_FOUND, "image not found");

        let rbd = driver(&runner);
        let vol = container("c1");

        assert_eq!(
            rbd.list_snapshots(&vol).await?,
            vec!["snapshot_s0".to_string(), "zombie_snapshot_x".to_string()]
        );
        assert!(rbd.list_snapshots(&vol).await.unwrap_err().is_not_found());
        assert!(matches!(
            rbd.list_snapshots(&vol).await,
            Err(MonoblockError::UnexpectedOutput(_))
        ));

        // A missing image is a backend failure, not an empty snapshot list.
        let err = rbd.list_snapshots(&vol).await.unwrap_err();
        assert!(matches!(err, MonoblockError::Backend(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_volume_parent() -> anyhow::Result<()> {
        let runner = ScriptedRunner::default();
        runner.push_ok(
            "rbd image 'container_c2':\n\tsize 10 GiB\n\tparent: incus/image_f00d_ext4@readonly\n\toverlap: 10 GiB\n",
        );
        runner.push_ok("rbd image 'container_c1':\n\tsize 10 GiB\n");

        let rbd = driver(&runner);
        assert_eq!(
            rbd.volume_parent(&container("c2")).await?,
            "incus/image_f00d_ext4@readonly"
        );
        assert!(rbd
            .volume_parent(&container("c1"))
            .await
            .unwrap_err()
            .is_not_found());
        Ok(())
    }

    #[tokio::test]
    async fn test_list_snapshot_clones() -> anyhow::Result<()> {
        let runner = ScriptedRunner::default();
        runner.push_ok("incus/container_a\nincus/zombie_container_b_1\n");
        runner.push_ok("\n");

        let rbd = driver(&runner);
        let vol = Volume::new("incus", VolumeType::Image, ContentType::Filesystem, "f00d")
            .with_filesystem("ext4");

        assert_eq!(
            rbd.list_snapshot_clones(&vol, "readonly").await?,
            vec!["incus/container_a", "incus/zombie_container_b_1"]
        );
        assert!(rbd
            .list_snapshot_clones(&vol, "readonly")
            .await
            .unwrap_err()
            .is_not_found());

        assert_eq!(
            runner.calls()[0],
            "rbd --id admin --cluster ceph --pool incus children --image image_f00d_ext4 --snap readonly"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_protect_and_unprotect_accept_both_state_codes() -> anyhow::Result<()> {
        let runner = ScriptedRunner::default();
        runner.push_exit(EXIT_BUSY, "already protected");
        runner.push_exit(EXIT_INVALID, "already protected");
        runner.push_exit(EXIT_BUSY, "already unprotected");
        runner.push_exit(EXIT_INVALID, "already unprotected");
        runner.push_exit(EXIT_NOT_FOUND, "no such snapshot");

        let rbd = driver(&runner);
        let vol = container("c1");

        rbd.protect_snapshot(&vol, "snapshot_s0").await?;
        rbd.protect_snapshot(&vol, "snapshot_s0").await?;
        rbd.unprotect_snapshot(&vol, "snapshot_s0").await?;
        rbd.unprotect_snapshot(&vol, "snapshot_s0").await?;
        assert!(rbd.unprotect_snapshot(&vol, "snapshot_s0").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_resize_retries_transient_failures() -> anyhow::Result<()> {
        let runner = ScriptedRunner::default();
        runner.push_exits(110, 2);

        let rbd = driver(&runner);
        rbd.resize_volume(&container("c1"), 2048, true).await?;

        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(
            calls[2],
            "rbd resize --allow-shrink --id admin --cluster ceph --pool incus --size 2048B container_c1"
        );

        runner.push_exits(110, 3);
        let err = rbd
            .resize_volume(&container("c1"), 4096, false)
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), Some(110));
        assert_eq!(runner.calls().len(), 6);
        Ok(())
    }

    #[tokio::test]
    async fn test_rename_volume_and_delete_pool_arguments() -> anyhow::Result<()> {
        let runner = ScriptedRunner::default();
        let rbd = driver(&runner);
        let image = Volume::new("incus", VolumeType::Image, ContentType::Block, "f00d")
            .with_filesystem("ext4");

        rbd.rename_volume(&image.snapshot("snapshot_s0"), "beef").await?;
        rbd.osd_delete_pool().await?;

        assert_eq!(
            runner.calls(),
            vec![
                "rbd --id admin --cluster ceph mv incus/image_f00d_ext4.block incus/image_beef_ext4.block",
                "ceph --name client.admin --cluster ceph osd pool delete incus incus --yes-i-really-really-mean-it",
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_renames_use_qualified_names() -> anyhow::Result<()> {
        let runner = ScriptedRunner::default();
        let rbd = driver(&runner);
        let vol = Volume::new("incus", VolumeType::VirtualMachine, ContentType::Block, "v1");

        rbd.mark_volume_deleted(&vol, "v1_abc").await?;
        rbd.rename_snapshot(&vol, "snapshot_s0", "zombie_snapshot_1").await?;
        rbd.create_clone(&vol, "snapshot_s0", &container("c9")).await?;
        rbd.delete_snapshot(&vol, "snapshot_s0").await?;

        let calls = runner.calls();
        assert_eq!(
            calls[0],
            "rbd --id admin --cluster ceph mv incus/virtual-machine_v1.block incus/zombie_virtual-machine_v1_abc.block"
        );
        assert_eq!(
            calls[1],
            "rbd --id admin --cluster ceph snap rename incus/virtual-machine_v1.block@snapshot_s0 incus/virtual-machine_v1.block@zombie_snapshot_1"
        );
        assert_eq!(
            calls[2],
            "rbd --id admin --cluster ceph --image-feature layering --data-pool ec clone incus/virtual-machine_v1.block@snapshot_s0 incus/container_c9"
        );
        assert_eq!(
            calls[3],
            "rbd --id admin --cluster ceph --pool incus snap rm virtual-machine_v1.block@snapshot_s0"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_resize_arguments() -> anyhow::Result<()> {
        let runner = ScriptedRunner::default();
        driver(&runner)
            .resize_volume(&container("c1"), 2048, true)
            .await?;

        assert_eq!(
            runner.calls(),
            vec!["rbd resize --allow-shrink --id admin --cluster ceph --pool incus --size 2048B container_c1"]
        );
        Ok(())
    }
}
