//! Template patching.
//!
//! Tasks are processed in file order. Consecutive tasks naming the same
//! template (or naming none) share one in-memory document, which is loaded
//! when the first of them is reached and flushed before the next template
//! is loaded or when the task list ends.
//!
//! Within one document, image resolution for every `ami` task is issued
//! concurrently to warm the cache. The document itself is then mutated by
//! each task in order, in a single pass, reading resolved images back from
//! the cache.

use std::path::PathBuf;
use std::sync::Arc;

use amisync_common::config::{Operation, ProductVersions};
use amisync_common::constants;
use amisync_common::error::{AmisyncError, Result};
use amisync_common::store::JsonStore;
use amisync_image::artifact::ArtifactRecord;
use amisync_image::resolver::ImageResolver;
use amisync_image::version;
use futures::future::try_join_all;
use serde_json::{Map, Value};

use crate::task::{AmiTask, Task, TaskAction};
use crate::tree_path;

const ALLOWED_VALUES: &str = "AllowedValues";
const DEFAULT: &str = "Default";

/// Outcome of one or more patch passes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchReport {
    /// Templates written back, in write order.
    pub documents_written: Vec<PathBuf>,
    /// Tasks that ran against a document.
    pub tasks_applied: usize,
    /// Tasks skipped for another product, for lack of a template, or for an
    /// unsupported type.
    pub tasks_skipped: usize,
    /// `(region, version)` slots written empty because no image was found.
    pub missing_artifacts: usize,
}

impl PatchReport {
    /// Adds the counts of `other` to this report.
    pub fn absorb(&mut self, other: Self) {
        self.documents_written.extend(other.documents_written);
        self.tasks_applied += other.tasks_applied;
        self.tasks_skipped += other.tasks_skipped;
        self.missing_artifacts += other.missing_artifacts;
    }
}

#[derive(Debug, Clone, Copy)]
enum DocumentState<'a> {
    NoActiveDocument,
    ActiveDocument(&'a str),
}

#[derive(Debug)]
struct PlannedTask<'a> {
    task: &'a Task,
    action: TaskAction<'a>,
}

#[derive(Debug)]
struct DocumentBatch<'a> {
    template: &'a str,
    tasks: Vec<PlannedTask<'a>>,
}

struct VersionKey {
    version: String,
    num: String,
    key: String,
}

/// Applies task lists to the templates of one directory.
#[derive(Debug, Clone)]
pub struct TemplatePatcher {
    store: Arc<dyn JsonStore>,
    template_dir: PathBuf,
    resolver: ImageResolver,
    operation: Operation,
    default_version: Option<String>,
}

impl TemplatePatcher {
    /// Creates a patcher adding versions to templates under `template_dir`.
    #[must_use]
    pub fn new(
        store: Arc<dyn JsonStore>,
        template_dir: impl Into<PathBuf>,
        resolver: ImageResolver,
    ) -> Self {
        Self {
            store,
            template_dir: template_dir.into(),
            resolver,
            operation: Operation::Add,
            default_version: None,
        }
    }

    /// Sets the operation applied by every task.
    #[must_use]
    pub const fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = operation;
        self
    }

    /// Sets the preferred `Default` for parameter tasks.
    #[must_use]
    pub fn with_default_version(mut self, default_version: Option<String>) -> Self {
        self.default_version = default_version;
        self
    }

    /// Runs `tasks` once per product, in order.
    ///
    /// # Errors
    ///
    /// Stops at the first pass that fails; see [`TemplatePatcher::run`].
    pub async fn run_all(
        &self,
        tasks: &[Task],
        products: &[ProductVersions],
    ) -> Result<PatchReport> {
        let mut report = PatchReport::default();
        for target in products {
            report.absorb(self.run(tasks, target).await?);
        }
        Ok(report)
    }

    /// Runs `tasks` for one product.
    ///
    /// # Errors
    ///
    /// Returns an error if a requested version is invalid, a task definition
    /// is invalid, a template is missing or unreadable, or a template cannot
    /// be written. Missing images and unreachable template nodes are logged
    /// and do not fail the run.
    pub async fn run(&self, tasks: &[Task], target: &ProductVersions) -> Result<PatchReport> {
        for v in &target.versions {
            let _ = version::coerce(v)?;
        }
        tracing::info!(
            product = %target.product,
            versions = ?target.versions,
            operation = %self.operation,
            "patching templates"
        );

        let mut report = PatchReport::default();
        let batches = plan(tasks, &target.product, &mut report)?;
        for batch in &batches {
            self.patch_document(batch, target, &mut report).await?;
        }
        Ok(report)
    }

    async fn patch_document(
        &self,
        batch: &DocumentBatch<'_>,
        target: &ProductVersions,
        report: &mut PatchReport,
    ) -> Result<()> {
        let path = self.template_dir.join(batch.template);
        let mut document = self
            .store
            .read(&path)?
            .ok_or_else(|| AmisyncError::NotFound {
                kind: "template",
                id: path.display().to_string(),
            })?;
        tracing::debug!(path = %path.display(), tasks = batch.tasks.len(), "template loaded");

        if self.operation == Operation::Add {
            self.warm_cache(&batch.tasks, target).await?;
        }

        for planned in &batch.tasks {
            tracing::info!(
                task = %planned.task.name,
                template = batch.template,
                "running task"
            );
            let applied = match planned.action {
                TaskAction::Parameter { node_path } => {
                    self.apply_parameter(&mut document, node_path, &target.versions)
                }
                TaskAction::Ami(ami) => {
                    report.missing_artifacts += self.apply_ami(&mut document, &ami, target)?;
                    true
                }
                TaskAction::Unsupported => {
                    tracing::warn!(
                        task = %planned.task.name,
                        "unsupported task type, skipped task"
                    );
                    false
                }
            };
            if applied {
                report.tasks_applied += 1;
            } else {
                report.tasks_skipped += 1;
            }
        }

        self.store.write(&path, &document)?;
        tracing::info!(path = %path.display(), "template saved");
        report.documents_written.push(path);
        Ok(())
    }

    async fn warm_cache(
        &self,
        tasks: &[PlannedTask<'_>],
        target: &ProductVersions,
    ) -> Result<()> {
        let product = target.product.as_str();
        let versions = target.versions.as_slice();
        let warmups = tasks
            .iter()
            .filter_map(|planned| match planned.action {
                TaskAction::Ami(ami) => Some(ami),
                _ => None,
            })
            .map(|ami| async move {
                for region in ami.regions {
                    // Results are read back from the cache when the region map is written.
                    let _ = self
                        .resolver
                        .resolve(product, ami.finder, region, versions, ami.variant)
                        .await?;
                }
                Ok::<_, AmisyncError>(())
            });
        let _ = try_join_all(warmups).await?;
        Ok(())
    }

    // Returns whether the parameter node was rewritten.
    fn apply_parameter(&self, document: &mut Value, node_path: &str, versions: &[String]) -> bool {
        let Some(mut node) = tree_path::get_exact(document, node_path).cloned() else {
            tracing::error!(path = node_path, "parameter node not found, skipped task");
            return false;
        };
        let Some(fields) = node.as_object_mut() else {
            tracing::error!(path = node_path, "parameter node is not an object, skipped task");
            return false;
        };

        let allowed = match self.operation {
            Operation::Add => version::sorted_descending(versions),
            Operation::Delete => {
                let kept: Vec<String> = fields
                    .get(ALLOWED_VALUES)
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .filter_map(Value::as_str)
                    .filter(|v| !is_requested(v, versions))
                    .map(str::to_owned)
                    .collect();
                version::sorted_descending(&kept)
            }
        };

        let current = fields
            .get(DEFAULT)
            .and_then(Value::as_str)
            .filter(|d| self.operation == Operation::Delete && allowed.iter().any(|a| a == d))
            .map(str::to_owned);
        let default = current.or_else(|| self.pick_default(&allowed));

        let _ = fields.insert(
            ALLOWED_VALUES.to_owned(),
            Value::Array(allowed.into_iter().map(Value::String).collect()),
        );
        match default {
            Some(d) => {
                let _ = fields.insert(DEFAULT.to_owned(), Value::String(d));
            }
            None => {
                let _ = fields.remove(DEFAULT);
            }
        }
        tree_path::set(document, node_path, node)
    }

    // The configured default when it is allowed, else the highest allowed
    // version. `allowed` is sorted descending.
    fn pick_default(&self, allowed: &[String]) -> Option<String> {
        self.default_version
            .as_ref()
            .filter(|d| allowed.contains(d))
            .or_else(|| allowed.first())
            .cloned()
    }

    fn apply_ami(
        &self,
        document: &mut Value,
        ami: &AmiTask<'_>,
        target: &ProductVersions,
    ) -> Result<usize> {
        let keys = target
            .versions
            .iter()
            .map(|v| {
                let num = version::normalize(v)?;
                Ok(VersionKey {
                    version: v.clone(),
                    key: ami.key_pattern.replace(constants::VERSION_NUM_TOKEN, &num),
                    num,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        match self.operation {
            Operation::Add => self.add_images(document, ami, target, &keys),
            Operation::Delete => {
                remove_images(document, ami, &keys);
                Ok(0)
            }
        }
    }

    fn add_images(
        &self,
        document: &mut Value,
        ami: &AmiTask<'_>,
        target: &ProductVersions,
        keys: &[VersionKey],
    ) -> Result<usize> {
        let mut key_map = map_node(document, ami.key_path);
        match key_map.as_object_mut() {
            Some(entries) => {
                for k in keys {
                    let _ = entries.insert(k.num.clone(), Value::String(k.key.clone()));
                }
                let _ = tree_path::set(document, ami.key_path, key_map);
            }
            None => {
                tracing::error!(path = ami.key_path, "key map is not an object, left unchanged");
            }
        }

        let mut region_map = map_node(document, ami.map_path);
        let Some(regions) = region_map.as_object_mut() else {
            tracing::error!(path = ami.map_path, "region map is not an object, left unchanged");
            return Ok(0);
        };
        let missing = self.fill_region_map(regions, ami, target, keys)?;
        let _ = tree_path::set(document, ami.map_path, region_map);
        Ok(missing)
    }

    fn fill_region_map(
        &self,
        regions: &mut Map<String, Value>,
        ami: &AmiTask<'_>,
        target: &ProductVersions,
        keys: &[VersionKey],
    ) -> Result<usize> {
        let cache = self.resolver.cache();
        let mut missing = 0;
        for region in ami.regions {
            for k in keys {
                let image = cache.get(&target.product, region, &k.version, ami.variant)?;
                if image.is_none() {
                    tracing::error!(
                        product = %target.product,
                        region = %region,
                        version = %k.version,
                        variant = %ami.variant,
                        "image id cannot be found, ensure its availability before automating it"
                    );
                    missing += 1;
                }
                let location = image.as_ref().map_or("", ArtifactRecord::image_location);
                let id = image.as_ref().map_or("", ArtifactRecord::image_id);
                write_slot(regions, constants::LOCATION_MAP_KEY, &k.key, location);
                write_slot(regions, region, &k.key, id);
            }
        }
        Ok(missing)
    }
}

/// Groups applicable tasks into per-template batches.
fn plan<'a>(
    tasks: &'a [Task],
    product: &str,
    report: &mut PatchReport,
) -> Result<Vec<DocumentBatch<'a>>> {
    let mut state = DocumentState::NoActiveDocument;
    let mut batches: Vec<DocumentBatch<'a>> = Vec::new();

    for task in tasks {
        if !task.applies_to(product) {
            tracing::info!(task = %task.name, product, "product not matched, skipped task");
            report.tasks_skipped += 1;
            continue;
        }
        let action = task.action()?;

        state = match (state, task.template()) {
            (DocumentState::ActiveDocument(current), Some(next)) if current == next => state,
            (_, Some(next)) => {
                batches.push(DocumentBatch {
                    template: next,
                    tasks: Vec::new(),
                });
                DocumentState::ActiveDocument(next)
            }
            (DocumentState::ActiveDocument(_), None) => state,
            (DocumentState::NoActiveDocument, None) => {
                tracing::warn!(task = %task.name, "no template to patch, skipped task");
                report.tasks_skipped += 1;
                continue;
            }
        };

        if let Some(batch) = batches.last_mut() {
            batch.tasks.push(PlannedTask { task, action });
        }
    }
    Ok(batches)
}

// Drops the versions' entries from the key map and the region map. Maps
// that are absent, or hold none of the entries, are left untouched.
fn remove_images(document: &mut Value, ami: &AmiTask<'_>, keys: &[VersionKey]) {
    if let Some(mut key_map) = tree_path::get_exact(document, ami.key_path).cloned() {
        let removed = key_map.as_object_mut().map_or(0, |entries| {
            keys.iter().filter(|k| entries.remove(&k.num).is_some()).count()
        });
        if removed > 0 {
            let _ = tree_path::set(document, ami.key_path, key_map);
        }
    }

    let Some(mut region_map) = tree_path::get_exact(document, ami.map_path).cloned() else {
        return;
    };
    let mut removed = 0;
    if let Some(regions) = region_map.as_object_mut() {
        for sub in std::iter::once(constants::LOCATION_MAP_KEY)
            .chain(ami.regions.iter().map(String::as_str))
        {
            if let Some(slots) = regions.get_mut(sub).and_then(Value::as_object_mut) {
                removed += keys.iter().filter(|k| slots.remove(&k.key).is_some()).count();
            }
        }
    }
    if removed > 0 {
        let _ = tree_path::set(document, ami.map_path, region_map);
    }
}

// Existing node at `path`, or an empty object when the last segment is absent.
fn map_node(document: &Value, path: &str) -> Value {
    tree_path::get_exact(document, path)
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()))
}

fn write_slot(map: &mut Map<String, Value>, sub: &str, key: &str, value: &str) {
    let slot = map.entry(sub.to_owned()).or_insert(Value::Null);
    if slot.is_null() {
        *slot = Value::Object(Map::new());
    }
    match slot.as_object_mut() {
        Some(slots) => {
            let _ = slots.insert(key.to_owned(), Value::String(value.to_owned()));
        }
        None => tracing::error!(map = sub, key, "map entry is not an object, left unchanged"),
    }
}

fn is_requested(candidate: &str, requested: &[String]) -> bool {
    requested.iter().any(|r| {
        r == candidate
            || matches!(
                (version::canonical(r), version::canonical(candidate)),
                (Ok(a), Ok(b)) if a == b
            )
    })
}
