//! Run configuration model.
//!
//! Built by the CLI layer and consumed by the image cache and the template
//! patcher as plain parameters.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{AmisyncError, Result};

/// What a run does to the targeted templates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Publish the requested versions into the templates.
    #[default]
    Add,
    /// Withdraw the requested versions from the templates.
    Delete,
}

impl FromStr for Operation {
    type Err = AmisyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "add" => Ok(Self::Add),
            "delete" => Ok(Self::Delete),
            other => Err(AmisyncError::Config {
                message: format!("unknown operation: {other}"),
            }),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "add"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// A product code and the versions requested for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductVersions {
    /// Product code, e.g. `fortigate`.
    pub product: String,
    /// Requested versions in the order given by the user.
    pub versions: Vec<String>,
}

/// Image cache behavior for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Whether the cache snapshot is persisted between runs.
    pub enabled: bool,
    /// Lifetime of a persisted snapshot.
    pub ttl: Duration,
    /// Whether to invalidate the persisted snapshot before the run.
    pub reset: bool,
    /// Location of the persisted snapshot.
    pub path: PathBuf,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: constants::default_cache_ttl(),
            reset: false,
            path: constants::default_cache_file(),
        }
    }
}

/// Root configuration for one amisync run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Directory holding the templates named by tasks.
    pub template_dir: PathBuf,
    /// Path of the task definition file.
    pub task_file: PathBuf,
    /// Operation applied by every task.
    pub operation: Operation,
    /// Products to patch, processed in order.
    pub products: Vec<ProductVersions>,
    /// Preferred `Default` for parameter tasks.
    pub default_version: Option<String>,
    /// Image cache behavior.
    pub cache: CacheSettings,
}

/// Builds the product list for a run.
///
/// Explicit `prod=v1,v2` pairs take precedence. Otherwise `target_versions`
/// applies to `product`, or to every known product code when none is given.
/// Pairs and version lists may be passed as separate values or as a single
/// whitespace-separated string.
///
/// # Errors
///
/// Returns `AmisyncError::Config` if a pair has no `=` or names no product.
pub fn select_products(
    product: Option<&str>,
    target_versions: &[String],
    product_version_pairs: &[String],
) -> Result<Vec<ProductVersions>> {
    let pairs: Vec<&str> = product_version_pairs
        .iter()
        .flat_map(|p| p.split_whitespace())
        .collect();

    if !pairs.is_empty() {
        return pairs.into_iter().map(parse_pair).collect();
    }

    let versions: Vec<String> = target_versions
        .iter()
        .flat_map(|v| v.split_whitespace())
        .map(str::to_owned)
        .collect();

    let products: Vec<&str> =
        product.map_or_else(|| constants::KNOWN_PRODUCTS.to_vec(), |p| vec![p]);
    Ok(products
        .into_iter()
        .map(|p| ProductVersions {
            product: p.to_owned(),
            versions: versions.clone(),
        })
        .collect())
}

fn parse_pair(pair: &str) -> Result<ProductVersions> {
    let (product, versions) = pair.split_once('=').ok_or_else(|| AmisyncError::Config {
        message: format!("product-version pair '{pair}' is not of the form product=v1,v2"),
    })?;
    if product.is_empty() {
        return Err(AmisyncError::Config {
            message: format!("product-version pair '{pair}' names no product"),
        });
    }
    Ok(ProductVersions {
        product: product.to_owned(),
        versions: versions
            .split(',')
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_owned()).collect()
    }

    #[test]
    fn operation_parses_known_values() {
        assert_eq!("add".parse::<Operation>().expect("add"), Operation::Add);
        assert_eq!(
            "delete".parse::<Operation>().expect("delete"),
            Operation::Delete
        );
    }

    #[test]
    fn operation_rejects_unknown_value() {
        let err = "purge".parse::<Operation>().expect_err("must fail");
        assert!(err.to_string().contains("unknown operation: purge"));
    }

    #[test]
    fn select_products_prefers_explicit_pairs() {
        let selected = select_products(
            Some("fortigate"),
            &strings(&["9.9.9"]),
            &strings(&["fortigate=6.2.3,6.4.1 fortianalyzer=6.4.0"]),
        )
        .expect("select");
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].product, "fortigate");
        assert_eq!(selected[0].versions, strings(&["6.2.3", "6.4.1"]));
        assert_eq!(selected[1].product, "fortianalyzer");
        assert_eq!(selected[1].versions, strings(&["6.4.0"]));
    }

    #[test]
    fn select_products_defaults_to_known_products() {
        let selected = select_products(None, &strings(&["6.2.3 6.4.1"]), &[]).expect("select");
        let names: Vec<&str> = selected.iter().map(|p| p.product.as_str()).collect();
        assert_eq!(names, constants::KNOWN_PRODUCTS);
        assert!(selected.iter().all(|p| p.versions == strings(&["6.2.3", "6.4.1"])));
    }

    #[test]
    fn select_products_honors_single_product() {
        let selected =
            select_products(Some("fortianalyzer"), &strings(&["6.4.0"]), &[]).expect("select");
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].product, "fortianalyzer");
    }

    #[test]
    fn select_products_rejects_pair_without_separator() {
        assert!(select_products(None, &[], &strings(&["fortigate"])).is_err());
        assert!(select_products(None, &[], &strings(&["=6.4.0"])).is_err());
    }

    #[test]
    fn cache_settings_default_is_enabled() {
        let settings = CacheSettings::default();
        assert!(settings.enabled);
        assert!(!settings.reset);
        assert_eq!(settings.ttl, constants::default_cache_ttl());
    }
}
