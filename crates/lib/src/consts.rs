/// Name of the per-project working directory (`<root>/.enb`).
pub const APP_DIR: &str = ".enb";

/// Directory inside [`APP_DIR`] holding temporary build state.
pub const TMP_DIR: &str = "tmp";

/// File name of the persisted cache blob.
pub const CACHE_FILENAME: &str = "cache.json";

/// Version of the persisted cache layout. Blobs with another version are ignored.
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// Placeholder in target names replaced by the node's base name.
pub const TARGET_NAME_PLACEHOLDER: &str = "?";

/// Requested target list entry expanding to the node's default targets.
pub const TARGET_WILDCARD: &str = "*";

/// Disables cache load/save when set to a truthy value.
pub const ENV_NO_CACHE: &str = "ENB_NO_CACHE";

/// Overrides the directory holding the cache blob.
pub const ENV_CACHE_DIR: &str = "ENB_CACHE_DIR";

/// Turns missing targets into warnings instead of run failures.
pub const ENV_LENIENT: &str = "ENB_LENIENT";
