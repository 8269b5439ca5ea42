//! Image inventory lookup.
//!
//! [`ImageLookup`] is the seam to the external inventory service. The
//! production implementation, [`AwsCliLookup`], shells out to
//! `aws ec2 describe-images`.

use std::ffi::OsString;
use std::fmt;

use amisync_common::error::{AmisyncError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::artifact::RawImage;

/// A `(key, value)` filter applied by the lookup service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupFilter {
    /// Filter name.
    pub key: String,
    /// Filter value; may contain service-side wildcards.
    pub value: String,
}

impl LookupFilter {
    /// Creates a filter.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Lists inventory entries of one region.
#[async_trait]
pub trait ImageLookup: Send + Sync + fmt::Debug {
    /// Returns every entry in `region` matching all `filters`.
    ///
    /// No timeout is imposed; a hung service hangs the caller.
    ///
    /// # Errors
    ///
    /// Returns `AmisyncError::Lookup` if the service call fails or its
    /// response cannot be decoded.
    async fn describe_images(
        &self,
        region: &str,
        filters: &[LookupFilter],
    ) -> Result<Vec<RawImage>>;
}

/// Programmatic credentials handed to the AWS CLI.
#[derive(Clone)]
pub struct AwsCredentials {
    /// Access key id.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Region used for calls that carry none.
    pub default_region: Option<String>,
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("default_region", &self.default_region)
            .finish()
    }
}

/// Lookup backed by the `aws` command-line tool.
///
/// Credentials are passed through the child process environment only; the
/// caller's environment is left untouched.
#[derive(Debug, Clone)]
pub struct AwsCliLookup {
    program: OsString,
    credentials: Option<AwsCredentials>,
}

#[derive(Debug, Deserialize)]
struct DescribeImagesOutput {
    #[serde(rename = "Images", default)]
    images: Vec<RawImage>,
}

impl AwsCliLookup {
    /// Creates a lookup using `aws` from `PATH` and its ambient credentials.
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: OsString::from("aws"),
            credentials: None,
        }
    }

    /// Uses explicit credentials instead of the ambient ones.
    #[must_use]
    pub fn with_credentials(mut self, credentials: AwsCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Overrides the executable invoked.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<OsString>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self, region: &str, filters: &[LookupFilter]) -> Command {
        let mut cmd = Command::new(&self.program);
        let _ = cmd.args(describe_images_args(region, filters));
        if let Some(creds) = &self.credentials {
            let _ = cmd
                .env("AWS_ACCESS_KEY_ID", creds.access_key_id.trim())
                .env("AWS_SECRET_ACCESS_KEY", creds.secret_access_key.trim());
            if let Some(default_region) = &creds.default_region {
                let _ = cmd.env("AWS_DEFAULT_REGION", default_region.trim());
            }
        }
        let _ = cmd.env("AWS_DEFAULT_OUTPUT", "json");
        cmd
    }
}

impl Default for AwsCliLookup {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageLookup for AwsCliLookup {
    async fn describe_images(
        &self,
        region: &str,
        filters: &[LookupFilter],
    ) -> Result<Vec<RawImage>> {
        tracing::debug!(region, ?filters, "querying image inventory");
        let lookup_error = |message: String| AmisyncError::Lookup {
            region: region.to_owned(),
            message,
        };

        let output = self
            .command(region, filters)
            .output()
            .await
            .map_err(|e| lookup_error(format!("failed to execute aws CLI: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(lookup_error(format!(
                "aws CLI exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        decode_images(&output.stdout).map_err(|e| lookup_error(e.to_string()))
    }
}

/// Builds the `aws` argument list for one query.
#[must_use]
pub fn describe_images_args(region: &str, filters: &[LookupFilter]) -> Vec<String> {
    let mut args = vec!["ec2".to_owned(), "describe-images".to_owned()];
    if !filters.is_empty() {
        args.push("--filters".to_owned());
        args.extend(
            filters
                .iter()
                .map(|f| format!("Name={},Values={}", f.key, f.value)),
        );
    }
    args.extend([
        "--region".to_owned(),
        region.to_owned(),
        "--output".to_owned(),
        "json".to_owned(),
    ]);
    args
}

/// Decodes a `describe-images` JSON response.
///
/// # Errors
///
/// Returns an error if `stdout` is not a valid response document.
pub fn decode_images(stdout: &[u8]) -> Result<Vec<RawImage>> {
    let parsed: DescribeImagesOutput = serde_json::from_slice(stdout)?;
    Ok(parsed.images)
}
