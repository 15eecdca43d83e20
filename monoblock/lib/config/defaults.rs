//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The default ceph cluster name.
pub const DEFAULT_CLUSTER_NAME: &str = "ceph";

/// The default ceph user name.
pub const DEFAULT_USER_NAME: &str = "admin";

/// The image feature enabled when none are configured.
///
/// Kept minimal so the kernel RBD module supports every feature the userspace tool enables.
pub const DEFAULT_RBD_FEATURE: &str = "layering";

/// The default `rbd` binary.
pub const DEFAULT_RBD_BIN: &str = "rbd";

/// The default `ceph` binary.
pub const DEFAULT_CEPH_BIN: &str = "ceph";

/// Where the kernel lists mapped RBD devices.
pub const DEFAULT_SYSFS_ROOT: &str = "/sys/devices/rbd";

/// How many busy responses an unmap tolerates before giving up.
pub const DEFAULT_UNMAP_BUSY_RETRIES: u32 = 10;

/// How long to wait between busy unmap attempts, in milliseconds.
pub const DEFAULT_UNMAP_RETRY_DELAY_MS: u64 = 1000;

/// How many times a resize is attempted before its failure is surfaced.
pub const DEFAULT_RESIZE_ATTEMPTS: u32 = 20;

/// How long to wait between resize attempts, in milliseconds.
pub const DEFAULT_RESIZE_RETRY_DELAY_MS: u64 = 500;

/// The file name looked up when no config path is given.
pub const DEFAULT_CONFIG_FILENAME: &str = "monoblock.yaml";
