use std::{path::Path, time::Duration};

use getset::{CopyGetters, Getters};
use serde::{Deserialize, Deserializer, Serialize};
use typed_builder::TypedBuilder;

use crate::{MonoblockError, MonoblockResult};

use super::defaults::{
    DEFAULT_CEPH_BIN, DEFAULT_CLUSTER_NAME, DEFAULT_RBD_BIN, DEFAULT_RBD_FEATURE,
    DEFAULT_RESIZE_ATTEMPTS, DEFAULT_RESIZE_RETRY_DELAY_MS, DEFAULT_SYSFS_ROOT,
    DEFAULT_UNMAP_BUSY_RETRIES, DEFAULT_UNMAP_RETRY_DELAY_MS, DEFAULT_USER_NAME,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Connection and tuning settings for one RBD storage pool.
///
/// ## Required Fields
/// - `osd_pool_name`: The OSD pool holding the images.
///
/// ## Optional Fields
/// - `cluster_name`: The ceph cluster name (`ceph`).
/// - `user_name`: The ceph client user (`admin`).
/// - `data_pool_name`: A separate pool for image data.
/// - `rbd_features`: Image features to enable on create and clone (`layering`). Accepts a list or
///   a comma separated string.
/// - `rbd_bin` / `ceph_bin`: The administrative tools to run.
/// - `sysfs_root`: Where mapped devices are listed.
/// - `unmap_busy_retries`: Busy responses tolerated per unmap.
/// - `unmap_retry_delay_ms`: Delay between busy unmap attempts.
/// - `resize_attempts`: How often a failing resize is tried (`20`).
/// - `resize_retry_delay_ms`: Delay between resize attempts.
///
/// ## Examples
///
/// ```rust
/// use monoblock::config::RbdConfig;
///
/// let config = RbdConfig::builder()
///     .osd_pool_name("incus")
///     .user_name("incus")
///     .build();
///
/// assert_eq!(config.get_cluster_name(), "ceph");
/// assert_eq!(config.get_rbd_features(), &["layering".to_string()]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder, Getters, CopyGetters)]
#[serde(rename_all = "snake_case")]
pub struct RbdConfig {
    /// The ceph cluster name.
    #[serde(default = "default_cluster_name")]
    #[builder(default = DEFAULT_CLUSTER_NAME.to_string(), setter(into))]
    #[getset(get = "pub with_prefix")]
    cluster_name: String,

    /// The ceph client user.
    #[serde(default = "default_user_name")]
    #[builder(default = DEFAULT_USER_NAME.to_string(), setter(into))]
    #[getset(get = "pub with_prefix")]
    user_name: String,

    /// The OSD pool holding the images.
    #[builder(setter(into))]
    #[getset(get = "pub with_prefix")]
    osd_pool_name: String,

    /// A separate pool for image data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(strip_option, into))]
    #[getset(get = "pub with_prefix")]
    data_pool_name: Option<String>,

    /// Image features enabled on create and clone.
    #[serde(default = "default_rbd_features", deserialize_with = "deserialize_features")]
    #[builder(default = default_rbd_features())]
    #[getset(get = "pub with_prefix")]
    rbd_features: Vec<String>,

    /// The `rbd` binary.
    #[serde(default = "default_rbd_bin")]
    #[builder(default = DEFAULT_RBD_BIN.to_string(), setter(into))]
    #[getset(get = "pub with_prefix")]
    rbd_bin: String,

    /// The `ceph` binary.
    #[serde(default = "default_ceph_bin")]
    #[builder(default = DEFAULT_CEPH_BIN.to_string(), setter(into))]
    #[getset(get = "pub with_prefix")]
    ceph_bin: String,

    /// Where the kernel lists mapped RBD devices.
    #[serde(default = "default_sysfs_root")]
    #[builder(default = DEFAULT_SYSFS_ROOT.to_string(), setter(into))]
    #[getset(get = "pub with_prefix")]
    sysfs_root: String,

    /// Busy responses tolerated per unmap.
    #[serde(default = "default_unmap_busy_retries")]
    #[builder(default = DEFAULT_UNMAP_BUSY_RETRIES)]
    #[getset(get_copy = "pub with_prefix")]
    unmap_busy_retries: u32,

    /// Delay between busy unmap attempts, in milliseconds.
    #[serde(default = "default_unmap_retry_delay_ms")]
    #[builder(default = DEFAULT_UNMAP_RETRY_DELAY_MS)]
    #[getset(get_copy = "pub with_prefix")]
    unmap_retry_delay_ms: u64,

    /// How many times a resize is attempted.
    #[serde(default = "default_resize_attempts")]
    #[builder(default = DEFAULT_RESIZE_ATTEMPTS)]
    #[getset(get_copy = "pub with_prefix")]
    resize_attempts: u32,

    /// Delay between resize attempts, in milliseconds.
    #[serde(default = "default_resize_retry_delay_ms")]
    #[builder(default = DEFAULT_RESIZE_RETRY_DELAY_MS)]
    #[getset(get_copy = "pub with_prefix")]
    resize_retry_delay_ms: u64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RbdConfig {
    /// Loads and validates a YAML configuration file.
    pub async fn load(path: impl AsRef<Path>) -> MonoblockResult<Self> {
        let contents = tokio::fs::read_to_string(path.as_ref()).await?;
        let config: RbdConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;

        tracing::debug!(
            "loaded rbd config for pool {} from {}",
            config.osd_pool_name,
            path.as_ref().display()
        );

        Ok(config)
    }

    /// Checks that the configuration can be turned into valid backend commands.
    ///
    /// Every problem is collected so the caller sees all of them at once.
    pub fn validate(&self) -> MonoblockResult<()> {
        let mut errors = Vec::new();

        if self.osd_pool_name.is_empty() {
            errors.push("osd_pool_name must not be empty".to_string());
        } else if self.osd_pool_name.contains(['/', '@']) {
            errors.push(format!(
                "osd_pool_name '{}' must not contain '/' or '@'",
                self.osd_pool_name
            ));
        }

        for (field, value) in [
            ("cluster_name", &self.cluster_name),
            ("user_name", &self.user_name),
            ("rbd_bin", &self.rbd_bin),
            ("ceph_bin", &self.ceph_bin),
            ("sysfs_root", &self.sysfs_root),
        ] {
            if value.is_empty() {
                errors.push(format!("{} must not be empty", field));
            }
        }

        if matches!(&self.data_pool_name, Some(name) if name.is_empty()) {
            errors.push("data_pool_name must not be empty when set".to_string());
        }

        if self.unmap_busy_retries == 0 {
            errors.push("unmap_busy_retries must be at least 1".to_string());
        }

        if self.resize_attempts == 0 {
            errors.push("resize_attempts must be at least 1".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(MonoblockError::InvalidConfig(errors))
        }
    }

    /// Returns the delay between busy unmap attempts.
    pub fn unmap_retry_delay(&self) -> Duration {
        Duration::from_millis(self.unmap_retry_delay_ms)
    }

    /// Returns the delay between resize attempts.
    pub fn resize_retry_delay(&self) -> Duration {
        Duration::from_millis(self.resize_retry_delay_ms)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Splits a comma separated feature list, dropping empty entries.
pub fn split_features(features: &str) -> Vec<String> {
    features
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}

fn deserialize_features<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Features {
        List(Vec<String>),
        Joined(String),
    }

    let features = match Features::deserialize(deserializer)? {
        Features::List(list) => list
            .iter()
            .flat_map(|f| split_features(f))
            .collect::<Vec<_>>(),
        Features::Joined(joined) => split_features(&joined),
    };

    if features.is_empty() {
        return Ok(default_rbd_features());
    }

    Ok(features)
}

fn default_cluster_name() -> String {
    DEFAULT_CLUSTER_NAME.to_string()
}

fn default_user_name() -> String {
    DEFAULT_USER_NAME.to_string()
}

fn default_rbd_features() -> Vec<String> {
    vec![DEFAULT_RBD_FEATURE.to_string()]
}

fn default_rbd_bin() -> String {
    DEFAULT_RBD_BIN.to_string()
}

fn default_ceph_bin() -> String {
    DEFAULT_CEPH_BIN.to_string()
}

fn default_sysfs_root() -> String {
    DEFAULT_SYSFS_ROOT.to_string()
}

fn default_unmap_busy_retries() -> u32 {
    DEFAULT_UNMAP_BUSY_RETRIES
}

fn default_unmap_retry_delay_ms() -> u64 {
    DEFAULT_UNMAP_RETRY_DELAY_MS
}

fn default_resize_attempts() -> u32 {
    DEFAULT_RESIZE_ATTEMPTS
}

fn default_resize_retry_delay_ms() -> u64 {
    DEFAULT_RESIZE_RETRY_DELAY_MS
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
