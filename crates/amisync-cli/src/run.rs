//! Wires the run configuration to the cache, lookup, and patcher.

use std::sync::Arc;

use amisync_common::constants;
use amisync_common::store::{FsJsonStore, JsonStore};
use amisync_image::cache::ImageCache;
use amisync_image::lookup::AwsCliLookup;
use amisync_image::resolver::ImageResolver;
use amisync_image::version;
use amisync_template::patcher::TemplatePatcher;
use amisync_template::task::load_tasks;
use anyhow::Context;

use crate::cli::Cli;
use crate::output;

/// Executes one run.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the cache cannot be
/// reset, the task file cannot be loaded, or patching fails.
pub async fn execute(cli: &Cli) -> anyhow::Result<()> {
    let config = cli.run_config().context("invalid command line")?;
    for target in &config.products {
        for v in &target.versions {
            let _ = version::coerce(v)
                .with_context(|| format!("invalid version requested for {}", target.product))?;
        }
    }

    tracing::info!(
        app = constants::APP_NAME,
        operation = %config.operation,
        templates = %config.template_dir.display(),
        tasks = %config.task_file.display(),
        "run started"
    );

    let store: Arc<dyn JsonStore> = Arc::new(FsJsonStore);
    let cache = Arc::new(ImageCache::new(Arc::clone(&store), &config.cache));
    if config.cache.reset {
        cache.reset().context("failed to reset image cache")?;
    }
    if cache.is_persistent() {
        tracing::info!(
            path = %cache.path().display(),
            ttl = %output::format_duration(config.cache.ttl),
            "image cache enabled"
        );
    }

    let mut lookup = AwsCliLookup::new();
    if let Some(credentials) = cli.credentials().context("invalid credentials")? {
        lookup = lookup.with_credentials(credentials);
    }
    let resolver = ImageResolver::new(Arc::new(lookup), cache);

    let tasks = load_tasks(store.as_ref(), &config.task_file)
        .context("failed to load task definitions")?;
    let patcher = TemplatePatcher::new(store, &config.template_dir, resolver)
        .with_operation(config.operation)
        .with_default_version(config.default_version.clone());

    let report = patcher
        .run_all(&tasks, &config.products)
        .await
        .context("failed to patch templates")?;
    output::log_report(&report);
    Ok(())
}
