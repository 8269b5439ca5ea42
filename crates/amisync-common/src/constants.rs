//! System-wide constants and default paths.

use std::path::PathBuf;
use std::time::Duration;

/// Default time-to-live of the persisted image cache, in milliseconds.
pub const DEFAULT_CACHE_TTL_MS: u64 = 1_800_000;

/// File name of the persisted image cache inside the OS temp directory.
pub const CACHE_FILE_NAME: &str = "amisync-product-images.json";

/// Wildcard product code: a task carrying it applies to every product.
pub const PRODUCT_CODE_ALL: &str = "all";

/// Product codes targeted when no product is given on the command line.
pub const KNOWN_PRODUCTS: &[&str] = &["fortigate", "fortianalyzer"];

/// Lookup filter restricting results to publicly listed images.
pub const PUBLIC_FILTER_KEY: &str = "is-public";

/// Sub-map of a region map holding artifact location strings.
pub const LOCATION_MAP_KEY: &str = "AMI";

/// Placeholder substituted by the canonical version key in key patterns.
pub const VERSION_NUM_TOKEN: &str = "${versionNum}";

/// Application name used in log output.
pub const APP_NAME: &str = "amisync";

/// Returns the default cache TTL as a [`Duration`].
#[must_use]
pub const fn default_cache_ttl() -> Duration {
    Duration::from_millis(DEFAULT_CACHE_TTL_MS)
}

/// Returns the default location of the persisted image cache.
pub fn default_cache_file() -> PathBuf {
    std::env::temp_dir().join(CACHE_FILE_NAME)
}
