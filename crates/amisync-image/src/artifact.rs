//! Image records and inventory-name parsing.

use std::fmt;

use amisync_common::constants;
use amisync_common::error::{AmisyncError, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::lookup::LookupFilter;

/// Licensing mode of an image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variant {
    /// Pay-as-you-go.
    #[default]
    #[serde(rename = "PAYG")]
    Payg,
    /// Bring-your-own-license.
    #[serde(rename = "BYOL")]
    Byol,
}

impl Variant {
    /// Maps a task's free-form model name to a variant.
    ///
    /// Only `BYOL` (any case) selects [`Variant::Byol`]; anything else,
    /// including an absent model, selects [`Variant::Payg`].
    #[must_use]
    pub fn from_model(model: Option<&str>) -> Self {
        match model {
            Some(m) if m.trim().eq_ignore_ascii_case("BYOL") => Self::Byol,
            _ => Self::Payg,
        }
    }

    /// Returns the canonical upper-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Payg => "PAYG",
            Self::Byol => "BYOL",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inventory entry as returned by the lookup service.
///
/// Only the fields amisync reads are typed; everything else is carried
/// along untouched so the cache persists the full entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawImage {
    /// Display name, matched against the finder's model pattern.
    #[serde(rename = "Name", default)]
    pub name: String,
    /// Image identifier written into region maps.
    #[serde(rename = "ImageId", default)]
    pub image_id: String,
    /// Image location written into the location map.
    #[serde(rename = "ImageLocation", default)]
    pub image_location: String,
    /// Remaining inventory attributes.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A resolved image.
///
/// Records produced from entries that could not be parsed carry neither a
/// variant nor a version and are never cached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Licensing mode parsed from the display name.
    pub variant: Option<Variant>,
    /// Version token parsed from the display name.
    pub version: Option<String>,
    /// The inventory entry the record was parsed from.
    pub raw: Option<RawImage>,
}

impl ArtifactRecord {
    /// A record for an entry that failed to parse.
    #[must_use]
    pub const fn malformed() -> Self {
        Self {
            variant: None,
            version: None,
            raw: None,
        }
    }

    /// Whether the record lacks the fields needed to cache it.
    #[must_use]
    pub const fn is_malformed(&self) -> bool {
        self.variant.is_none() || self.version.is_none()
    }

    /// Image identifier, or an empty string when unknown.
    #[must_use]
    pub fn image_id(&self) -> &str {
        self.raw.as_ref().map_or("", |r| r.image_id.as_str())
    }

    /// Image location, or an empty string when unknown.
    #[must_use]
    pub fn image_location(&self) -> &str {
        self.raw.as_ref().map_or("", |r| r.image_location.as_str())
    }
}

/// Model tokens identifying each variant in display names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMatching {
    /// Token captured for pay-as-you-go images.
    pub payg: String,
}

/// How to find and parse a product's images in the inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageFinder {
    /// Lookup filter key, e.g. `name`.
    pub key_name: String,
    /// Lookup filter value, e.g. `FortiGate-VM64-AWS*`.
    pub key_pattern: String,
    /// Regex over display names capturing the model token (group 1) and the
    /// version token (group 2).
    pub model_pattern: String,
    /// Variant classification tokens.
    pub model_matching: ModelMatching,
}

impl ImageFinder {
    /// Filters sent to the lookup service: the key pattern plus the
    /// public-listing flag.
    #[must_use]
    pub fn filters(&self) -> Vec<LookupFilter> {
        vec![
            LookupFilter::new(&self.key_name, &self.key_pattern),
            LookupFilter::new(constants::PUBLIC_FILTER_KEY, "true"),
        ]
    }

    /// Compiles the model pattern.
    ///
    /// Matching is case-insensitive and multi-line.
    ///
    /// # Errors
    ///
    /// Returns `AmisyncError::InvalidPattern` if the pattern does not compile.
    pub fn compile(&self) -> Result<NameMatcher> {
        let regex = RegexBuilder::new(&self.model_pattern)
            .case_insensitive(true)
            .multi_line(true)
            .build()
            .map_err(|e| AmisyncError::InvalidPattern {
                pattern: self.model_pattern.clone(),
                message: e.to_string(),
            })?;
        Ok(NameMatcher {
            regex,
            payg_token: self.model_matching.payg.clone(),
        })
    }
}

/// Compiled form of an [`ImageFinder`]'s parsing rules.
#[derive(Debug, Clone)]
pub struct NameMatcher {
    regex: Regex,
    payg_token: String,
}

impl NameMatcher {
    /// Parses an inventory entry into a record.
    ///
    /// The variant is PAYG when the captured model token equals the finder's
    /// PAYG token exactly, and BYOL otherwise. An entry whose name does not
    /// match, or matches without a version token, yields
    /// [`ArtifactRecord::malformed`].
    #[must_use]
    pub fn parse(&self, raw: RawImage) -> ArtifactRecord {
        match self.tokens(&raw.name) {
            Some((variant, version)) => ArtifactRecord {
                variant: Some(variant),
                version: Some(version),
                raw: Some(raw),
            },
            None => ArtifactRecord::malformed(),
        }
    }

    fn tokens(&self, name: &str) -> Option<(Variant, String)> {
        let caps = self.regex.captures(name)?;
        let version = caps.get(2).map(|m| m.as_str()).filter(|v| !v.is_empty())?;
        let variant = if caps.get(1).map(|m| m.as_str()) == Some(self.payg_token.as_str()) {
            Variant::Payg
        } else {
            Variant::Byol
        };
        Some((variant, version.to_owned()))
    }
}
