//! Command-line arguments and their translation into a [`RunConfig`].

use std::path::PathBuf;
use std::time::Duration;

use amisync_common::config::{self, CacheSettings, Operation, RunConfig};
use amisync_common::constants;
use amisync_common::error::{AmisyncError, Result};
use amisync_image::lookup::AwsCredentials;
use clap::{Parser, ValueEnum};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// amisync: publish machine image versions into deployment templates.
#[derive(Parser, Debug)]
#[command(name = "amisync", version, about, long_about = None)]
pub struct Cli {
    /// Directory holding the templates named by tasks.
    #[arg(short = 'd', long = "directory", default_value = ".")]
    pub directory: PathBuf,

    /// Task definition file.
    #[arg(short = 't', long = "task-file")]
    pub task_file: PathBuf,

    /// Operation applied by every task.
    #[arg(short = 'o', long, default_value_t = Operation::Add)]
    pub operation: Operation,

    /// Shorthand for `--operation add`.
    #[arg(short = 'A', long, conflicts_with_all = ["delete", "operation"])]
    pub add: bool,

    /// Shorthand for `--operation delete`.
    #[arg(short = 'D', long, conflicts_with = "operation")]
    pub delete: bool,

    /// Product code to patch; every known product when omitted.
    #[arg(short = 'p', long)]
    pub product: Option<String>,

    /// Versions to publish, whitespace separated.
    #[arg(short = 'n', long = "target-version", num_args = 1..)]
    pub target_versions: Vec<String>,

    /// Per-product versions, e.g. `fortigate=6.2.3,6.4.1 fortianalyzer=6.4.0`.
    #[arg(short = 'e', long = "product-version", num_args = 1..)]
    pub product_versions: Vec<String>,

    /// Preferred default for parameter tasks; the highest requested version
    /// when omitted or not requested.
    #[arg(long)]
    pub default_version: Option<String>,

    /// Do not read or write the persisted image cache.
    #[arg(long)]
    pub no_cache: bool,

    /// Invalidate the persisted image cache before the run.
    #[arg(long)]
    pub reset_cache: bool,

    /// Lifetime of the persisted image cache, in milliseconds.
    #[arg(long, default_value_t = constants::DEFAULT_CACHE_TTL_MS)]
    pub cache_ttl: u64,

    /// Location of the persisted image cache.
    #[arg(long)]
    pub cache_file: Option<PathBuf>,

    /// AWS access key id.
    #[arg(short = 'k', long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    pub access_key_id: Option<String>,

    /// AWS secret access key.
    #[arg(short = 's', long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub secret_access_key: Option<String>,

    /// AWS region used for calls that name none.
    #[arg(short = 'r', long, env = "AWS_DEFAULT_REGION")]
    pub aws_region: Option<String>,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Cli {
    /// Operation selected by `--operation` or its shorthands.
    pub const fn effective_operation(&self) -> Operation {
        if self.delete {
            Operation::Delete
        } else if self.add {
            Operation::Add
        } else {
            self.operation
        }
    }

    /// Builds the run configuration.
    ///
    /// # Errors
    ///
    /// Returns `AmisyncError::Config` if a product-version pair is malformed
    /// or no version is requested at all.
    pub fn run_config(&self) -> Result<RunConfig> {
        let products = config::select_products(
            self.product.as_deref(),
            &self.target_versions,
            &self.product_versions,
        )?;
        if products.iter().all(|p| p.versions.is_empty()) {
            return Err(AmisyncError::Config {
                message: "no version requested; use --target-version or --product-version"
                    .into(),
            });
        }

        Ok(RunConfig {
            template_dir: self.directory.clone(),
            task_file: self.task_file.clone(),
            operation: self.effective_operation(),
            products,
            default_version: self.default_version.clone(),
            cache: CacheSettings {
                enabled: !self.no_cache,
                ttl: Duration::from_millis(self.cache_ttl),
                reset: self.reset_cache,
                path: self
                    .cache_file
                    .clone()
                    .unwrap_or_else(constants::default_cache_file),
            },
        })
    }

    /// Explicit AWS credentials, when given.
    ///
    /// # Errors
    ///
    /// Returns `AmisyncError::Config` if only one of the key pair is given.
    pub fn credentials(&self) -> Result<Option<AwsCredentials>> {
        match (&self.access_key_id, &self.secret_access_key) {
            (Some(id), Some(secret)) => Ok(Some(AwsCredentials {
                access_key_id: id.clone(),
                secret_access_key: secret.clone(),
                default_region: self.aws_region.clone(),
            })),
            (None, None) => Ok(None),
            _ => Err(AmisyncError::Config {
                message: "access key id and secret access key must be given together".into(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["amisync", "-t", "tasks.json"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).expect("parse")
    }

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_select_known_products() {
        let cli = parse(&["-n", "6.2.3 6.4.1", "-k", "id", "-s", "secret"]);
        let config = cli.run_config().expect("config");
        assert_eq!(config.operation, Operation::Add);
        assert_eq!(config.template_dir, PathBuf::from("."));
        assert_eq!(config.products.len(), constants::KNOWN_PRODUCTS.len());
        assert_eq!(config.products[0].versions, vec!["6.2.3", "6.4.1"]);
        assert!(config.cache.enabled);
        assert_eq!(config.cache.ttl, constants::default_cache_ttl());
        assert_eq!(config.cache.path, constants::default_cache_file());
    }

    #[test]
    fn delete_shorthand_selects_delete() {
        let cli = parse(&["-D", "-p", "fortigate", "-n", "6.4.1", "-k", "id", "-s", "x"]);
        assert_eq!(cli.effective_operation(), Operation::Delete);
        let config = cli.run_config().expect("config");
        assert_eq!(config.products.len(), 1);
        assert_eq!(config.products[0].product, "fortigate");
    }

    #[test]
    fn operation_flag_parses_value() {
        let cli = parse(&["-o", "delete", "-n", "6.4.1", "-k", "id", "-s", "x"]);
        assert_eq!(cli.effective_operation(), Operation::Delete);
    }

    #[test]
    fn add_and_delete_conflict() {
        let err = Cli::try_parse_from(["amisync", "-t", "t.json", "-A", "-D"]).expect_err("conflict");
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn unknown_operation_is_rejected() {
        assert!(Cli::try_parse_from(["amisync", "-t", "t.json", "-o", "purge"]).is_err());
    }

    #[test]
    fn cache_flags_map_to_settings() {
        let cli = parse(&[
            "-n",
            "6.4.1",
            "--no-cache",
            "--reset-cache",
            "--cache-ttl",
            "1000",
            "--cache-file",
            "/tmp/images.json",
            "-k",
            "id",
            "-s",
            "x",
        ]);
        let cache = cli.run_config().expect("config").cache;
        assert!(!cache.enabled);
        assert!(cache.reset);
        assert_eq!(cache.ttl, Duration::from_secs(1));
        assert_eq!(cache.path, PathBuf::from("/tmp/images.json"));
    }

    #[test]
    fn run_without_versions_is_rejected() {
        let cli = parse(&["-p", "fortigate", "-k", "id", "-s", "x"]);
        assert!(matches!(cli.run_config(), Err(AmisyncError::Config { .. })));
    }

    #[test]
    fn credentials_require_both_keys() {
        let mut cli = parse(&["-n", "6.4.1", "-k", "id", "-s", "secret", "-r", "us-east-1"]);
        let creds = cli.credentials().expect("credentials").expect("present");
        assert_eq!(creds.access_key_id, "id");
        assert_eq!(creds.default_region.as_deref(), Some("us-east-1"));

        cli.secret_access_key = None;
        assert!(cli.credentials().is_err());
    }

    #[test]
    fn log_format_defaults_to_text() {
        let cli = parse(&["-n", "6.4.1", "--log-format", "json"]);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(parse(&["-n", "6.4.1"]).log_format, LogFormat::Text);
    }

    #[test]
    fn default_version_is_unset_unless_given() {
        let config = parse(&["-n", "6.2.3 6.4.1", "-k", "id", "-s", "x"])
            .run_config()
            .expect("config");
        assert_eq!(config.default_version, None);

        let args = ["-n", "6.2.3 6.4.1", "--default-version", "6.2.3", "-k", "id", "-s", "x"];
        let config = parse(&args)
            .run_config()
            .expect("config");
        assert_eq!(config.default_version.as_deref(), Some("6.2.3"));
    }
}
