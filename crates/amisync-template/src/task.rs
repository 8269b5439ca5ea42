//! Declarative patch tasks.
//!
//! A task file is a JSON array of task definitions. Each definition names
//! the template it patches and what to write there:
//!
//! - `parameter` tasks rewrite a parameter's `AllowedValues` and `Default`.
//! - `ami` tasks fill a version key map and a per-region image map.

use std::path::Path;

use amisync_common::constants;
use amisync_common::error::{AmisyncError, Result};
use amisync_common::store::JsonStore;
use amisync_image::artifact::{ImageFinder, Variant};
use serde::{Deserialize, Serialize};

/// Kind of patch a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Rewrite a template parameter's allowed and default values.
    Parameter,
    /// Fill a version key map and region image map.
    Ami,
    /// Any type amisync does not know; such tasks are skipped.
    #[serde(other)]
    Unsupported,
}

/// One task definition as read from the task file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Human-readable task name.
    #[serde(default)]
    pub name: String,
    /// Patch kind.
    #[serde(rename = "type")]
    pub kind: TaskKind,
    /// Template file, relative to the template directory. When empty the
    /// task patches the template of the preceding task.
    #[serde(default)]
    pub template_name: Option<String>,
    /// Product code the task applies to, or `all`.
    #[serde(default)]
    pub product: String,
    /// Parameter node (`parameter` tasks).
    #[serde(default)]
    pub node_path: Option<String>,
    /// Version key map node (`ami` tasks).
    #[serde(default)]
    pub key_path: Option<String>,
    /// Region image map node (`ami` tasks).
    #[serde(default)]
    pub map_path: Option<String>,
    /// Key map value template containing `${versionNum}` (`ami` tasks).
    #[serde(default)]
    pub key_pattern: Option<String>,
    /// How to find the product's images (`ami` tasks).
    #[serde(default)]
    pub ami_finder: Option<ImageFinder>,
    /// Regions to populate (`ami` tasks).
    #[serde(default)]
    pub regions: Vec<String>,
    /// Licensing model, `PAYG` or `BYOL` (`ami` tasks).
    #[serde(default)]
    pub model: Option<String>,
}

/// Fields of an `ami` task, validated.
#[derive(Debug, Clone, Copy)]
pub struct AmiTask<'a> {
    /// Version key map node.
    pub key_path: &'a str,
    /// Region image map node.
    pub map_path: &'a str,
    /// Key map value template.
    pub key_pattern: &'a str,
    /// Image finder.
    pub finder: &'a ImageFinder,
    /// Regions to populate.
    pub regions: &'a [String],
    /// Variant selected by the task's model.
    pub variant: Variant,
}

/// What a task does, with its required fields resolved.
#[derive(Debug, Clone, Copy)]
pub enum TaskAction<'a> {
    /// Rewrite the parameter at `node_path`.
    Parameter {
        /// Parameter node.
        node_path: &'a str,
    },
    /// Populate image maps.
    Ami(AmiTask<'a>),
    /// Unknown task type.
    Unsupported,
}

impl Task {
    /// Whether the task applies to `product`.
    #[must_use]
    pub fn applies_to(&self, product: &str) -> bool {
        self.product == constants::PRODUCT_CODE_ALL || self.product == product
    }

    /// Template this task switches to, if it names one.
    #[must_use]
    pub fn template(&self) -> Option<&str> {
        self.template_name.as_deref().filter(|t| !t.is_empty())
    }

    /// Resolves the task's action, checking the fields its kind requires.
    ///
    /// # Errors
    ///
    /// Returns `AmisyncError::InvalidTask` if a required field is missing, or
    /// `AmisyncError::InvalidPattern` if an `ami` task's model pattern does
    /// not compile.
    pub fn action(&self) -> Result<TaskAction<'_>> {
        match self.kind {
            TaskKind::Parameter => Ok(TaskAction::Parameter {
                node_path: self.required("nodePath", self.node_path.as_deref())?,
            }),
            TaskKind::Ami => {
                let finder = self.ami_finder.as_ref().ok_or_else(|| self.missing("amiFinder"))?;
                let _ = finder.compile()?;
                Ok(TaskAction::Ami(AmiTask {
                    key_path: self.required("keyPath", self.key_path.as_deref())?,
                    map_path: self.required("mapPath", self.map_path.as_deref())?,
                    key_pattern: self.required("keyPattern", self.key_pattern.as_deref())?,
                    finder,
                    regions: &self.regions,
                    variant: Variant::from_model(self.model.as_deref()),
                }))
            }
            TaskKind::Unsupported => Ok(TaskAction::Unsupported),
        }
    }

    fn required<'a>(&self, field: &str, value: Option<&'a str>) -> Result<&'a str> {
        value.filter(|v| !v.is_empty()).ok_or_else(|| self.missing(field))
    }

    fn missing(&self, field: &str) -> AmisyncError {
        AmisyncError::InvalidTask {
            task: self.name.clone(),
            message: format!("{:?} task requires '{field}'", self.kind),
        }
    }
}

/// Reads and validates the task list at `path`.
///
/// # Errors
///
/// Returns an error if the file is missing or unreadable, is not a list of
/// task definitions, or contains an invalid task.
pub fn load_tasks(store: &dyn JsonStore, path: &Path) -> Result<Vec<Task>> {
    let document = store.read(path)?.ok_or_else(|| AmisyncError::NotFound {
        kind: "task file",
        id: path.display().to_string(),
    })?;
    let tasks: Vec<Task> = serde_json::from_value(document)?;
    for task in &tasks {
        let _ = task.action()?;
    }
    tracing::info!(path = %path.display(), count = tasks.len(), "task definitions loaded");
    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use amisync_common::store::MemoryJsonStore;
    use serde_json::json;

    use super::*;

    fn ami_task() -> serde_json::Value {
        json!({
            "name": "update fgt ami",
            "type": "ami",
            "templateName": "main.template.json",
            "product": "fortigate",
            "keyPath": "Mappings.VersionKey.Map",
            "mapPath": "Mappings.RegionMap",
            "keyPattern": "FGT${versionNum}",
            "amiFinder": {
                "keyName": "name",
                "keyPattern": "FortiGate-VM64-AWS*",
                "modelPattern": "FortiGate-VM64-AWS(ONDEMAND|) build\\d+ \\((\\d+\\.\\d+\\.\\d+)\\) GA",
                "modelMatching": { "payg": "ONDEMAND" }
            },
            "regions": ["us-east-1", "eu-west-1"],
            "model": "byol"
        })
    }

    #[test]
    fn ami_task_deserializes_and_validates() {
        let task: Task = serde_json::from_value(ami_task()).expect("decode");
        let TaskAction::Ami(ami) = task.action().expect("action") else {
            panic!("expected ami action");
        };
        assert_eq!(ami.key_path, "Mappings.VersionKey.Map");
        assert_eq!(ami.regions.len(), 2);
        assert_eq!(ami.variant, Variant::Byol);
        assert_eq!(ami.finder.model_matching.payg, "ONDEMAND");
    }

    #[test]
    fn ami_task_without_finder_is_invalid() {
        let mut value = ami_task();
        let _ = value.as_object_mut().expect("object").remove("amiFinder");
        let task: Task = serde_json::from_value(value).expect("decode");
        let err = task.action().expect_err("must fail");
        assert!(err.to_string().contains("amiFinder"));
    }

    #[test]
    fn ami_task_with_broken_pattern_is_invalid() {
        let mut value = ami_task();
        value["amiFinder"]["modelPattern"] = json!("(");
        let task: Task = serde_json::from_value(value).expect("decode");
        assert!(matches!(
            task.action(),
            Err(AmisyncError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn parameter_task_requires_node_path() {
        let task: Task =
            serde_json::from_value(json!({ "name": "p", "type": "parameter", "product": "all" }))
                .expect("decode");
        assert!(matches!(task.action(), Err(AmisyncError::InvalidTask { .. })));
    }

    #[test]
    fn unknown_type_is_unsupported() {
        let task: Task =
            serde_json::from_value(json!({ "name": "x", "type": "output", "product": "all" }))
                .expect("decode");
        assert_eq!(task.kind, TaskKind::Unsupported);
        assert!(matches!(task.action(), Ok(TaskAction::Unsupported)));
    }

    #[test]
    fn applies_to_matches_product_or_wildcard() {
        let mut task: Task = serde_json::from_value(ami_task()).expect("decode");
        assert!(task.applies_to("fortigate"));
        assert!(!task.applies_to("fortianalyzer"));
        task.product = "all".into();
        assert!(task.applies_to("fortianalyzer"));
    }

    #[test]
    fn empty_template_name_is_no_template() {
        let mut task: Task = serde_json::from_value(ami_task()).expect("decode");
        task.template_name = Some(String::new());
        assert_eq!(task.template(), None);
    }

    #[test]
    fn load_tasks_reports_missing_file() {
        let store = MemoryJsonStore::new();
        let err = load_tasks(&store, Path::new("tasks.json")).expect_err("must fail");
        assert!(matches!(err, AmisyncError::NotFound { kind: "task file", .. }));
    }

    #[test]
    fn load_tasks_reads_list() {
        let store = MemoryJsonStore::with_document("tasks.json", json!([ami_task()]));
        let tasks = load_tasks(&store, Path::new("tasks.json")).expect("load");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].kind, TaskKind::Ami);
    }
}
