//! Definition store.
//!
//! Owns every [`MockDefinition`] and [`Scenario`]. Readers get an immutable
//! [`Catalog`] behind an `Arc`; mutations run one at a time under a writer
//! lock, are written through to the snapshot file, and only then published.

use crate::definition::{
    validate_scenario_name, MockDefinition, MockPatch, NewMockDefinition, Scenario, ScenarioSpec,
    DEFAULT_SCENARIO,
};
use crate::error::{StorageError, StoreError, StoreResult, ValidationErrors};
use crate::pattern::PathPattern;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info};

const SNAPSHOT_VERSION: u32 = 1;

/// A definition together with its compiled path pattern.
#[derive(Debug, Clone)]
pub struct Entry {
    pub definition: MockDefinition,
    pub pattern: PathPattern,
}

/// Immutable view of the store contents.
#[derive(Debug, Clone)]
pub struct Catalog {
    entries: Vec<Entry>,
    scenarios: BTreeMap<String, Scenario>,
    active_scenario: String,
    revision: u64,
}

impl Catalog {
    fn empty(now: DateTime<Utc>) -> Self {
        let mut scenarios = BTreeMap::new();
        scenarios.insert(
            DEFAULT_SCENARIO.to_string(),
            Scenario::new(DEFAULT_SCENARIO, now),
        );
        Self {
            entries: Vec::new(),
            scenarios,
            active_scenario: DEFAULT_SCENARIO.to_string(),
            revision: 0,
        }
    }

    /// All entries in creation order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn entry(&self, id: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.definition.id == id)
    }

    pub fn scenario(&self, name: &str) -> Option<&Scenario> {
        self.scenarios.get(name)
    }

    pub fn scenarios(&self) -> impl Iterator<Item = &Scenario> {
        self.scenarios.values()
    }

    /// Scenario used when a request carries no override.
    pub fn active_scenario(&self) -> &str {
        &self.active_scenario
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Scenarios consulted, in order, when resolving under `scenario`:
    /// the scenario itself, its parents, then `default`.
    pub fn fallback_chain(&self, scenario: &str) -> Vec<String> {
        let mut chain: Vec<String> = Vec::new();
        let mut current = Some(scenario.to_string());

        while let Some(name) = current {
            if chain.contains(&name) {
                break;
            }
            current = self.scenarios.get(&name).and_then(|s| s.parent.clone());
            chain.push(name);
        }

        if !chain.iter().any(|n| n == DEFAULT_SCENARIO) {
            chain.push(DEFAULT_SCENARIO.to_string());
        }
        chain
    }

    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    fn ensure_scenario(&mut self, name: &str, now: DateTime<Utc>) {
        if !self.scenarios.contains_key(name) {
            info!(scenario = %name, "Creating scenario");
            self.scenarios
                .insert(name.to_string(), Scenario::new(name, now));
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.definition.id == id)
    }

    fn to_snapshot(&self) -> Snapshot {
        Snapshot {
            version: SNAPSHOT_VERSION,
            active_scenario: self.active_scenario.clone(),
            revision: self.revision,
            scenarios: self.scenarios.values().cloned().collect(),
            definitions: self.entries.iter().map(|e| e.definition.clone()).collect(),
        }
    }

    fn from_snapshot(snapshot: Snapshot, path: &Path) -> Result<Self, StorageError> {
        let corrupt = |reason: String| StorageError::Corrupt {
            path: path.to_path_buf(),
            reason,
        };

        if snapshot.version > SNAPSHOT_VERSION {
            return Err(corrupt(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }

        let now = Utc::now();
        let mut catalog = Self::empty(now);
        catalog.revision = snapshot.revision;

        for scenario in snapshot.scenarios {
            catalog.scenarios.insert(scenario.name.clone(), scenario);
        }

        for definition in snapshot.definitions {
            let pattern = PathPattern::parse(&definition.path_pattern)
                .map_err(|e| corrupt(format!("definition {}: {}", definition.id, e)))?;
            if catalog.position(&definition.id).is_some() {
                return Err(corrupt(format!("duplicate definition id {}", definition.id)));
            }
            catalog.revision = catalog.revision.max(definition.revision);
            catalog.ensure_scenario(&definition.scenario, now);
            catalog.entries.push(Entry {
                definition,
                pattern,
            });
        }

        if catalog.scenarios.contains_key(&snapshot.active_scenario) {
            catalog.active_scenario = snapshot.active_scenario;
        }
        Ok(catalog)
    }
}

/// On-disk layout of the catalog.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    active_scenario: String,
    revision: u64,
    #[serde(default)]
    scenarios: Vec<Scenario>,
    #[serde(default)]
    definitions: Vec<MockDefinition>,
}

/// Result of a mutation closure.
enum Outcome<T> {
    /// The catalog changed and must be persisted and published
    Changed(T),
    /// Nothing to write
    Unchanged(T),
}

/// The durable catalog of mock definitions and scenarios.
pub struct DefinitionStore {
    current: RwLock<Arc<Catalog>>,
    writer: Mutex<()>,
    snapshot_path: Option<PathBuf>,
}

impl DefinitionStore {
    /// A store without a backing file.
    pub fn in_memory() -> Self {
        Self::with_catalog(Catalog::empty(Utc::now()), None)
    }

    /// Load the snapshot at `path`. A missing file starts an empty catalog.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let catalog = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: Snapshot =
                    serde_json::from_slice(&bytes).map_err(|e| StorageError::Corrupt {
                        path: path.clone(),
                        reason: e.to_string(),
                    })?;
                let catalog = Catalog::from_snapshot(snapshot, &path)?;
                info!(
                    path = %path.display(),
                    definitions = catalog.entries.len(),
                    scenarios = catalog.scenarios.len(),
                    "Loaded mock definitions"
                );
                catalog
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No snapshot found, starting with an empty catalog");
                Catalog::empty(Utc::now())
            }
            Err(source) => return Err(StorageError::Io { path, source }),
        };

        Ok(Self::with_catalog(catalog, Some(path)))
    }

    fn with_catalog(catalog: Catalog, snapshot_path: Option<PathBuf>) -> Self {
        Self {
            current: RwLock::new(Arc::new(catalog)),
            writer: Mutex::new(()),
            snapshot_path,
        }
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Consistent read view of the whole catalog.
    pub async fn snapshot(&self) -> Arc<Catalog> {
        self.current.read().await.clone()
    }

    /// Create a definition.
    pub async fn create(&self, input: NewMockDefinition) -> StoreResult<MockDefinition> {
        let valid = input.validate().map_err(StoreError::Validation)?;

        self.mutate(move |catalog, now| {
            catalog.ensure_scenario(&valid.scenario, now);
            let revision = catalog.next_revision();
            let definition = MockDefinition {
                id: uuid::Uuid::new_v4().to_string(),
                scenario: valid.scenario,
                name: valid.name,
                method: valid.method,
                path_pattern: valid.pattern.as_str().to_string(),
                priority: valid.priority,
                enabled: valid.enabled,
                response: valid.response,
                delay: valid.delay,
                created_at: now,
                updated_at: now,
                revision,
            };
            catalog.entries.push(Entry {
                definition: definition.clone(),
                pattern: valid.pattern,
            });
            debug!(mock_id = %definition.id, "Created mock definition");
            Ok(Outcome::Changed(definition))
        })
        .await
    }

    /// Merge `patch` into the definition `id`.
    pub async fn update(&self, id: &str, patch: MockPatch) -> StoreResult<MockDefinition> {
        self.mutate(|catalog, now| {
            let idx = catalog
                .position(id)
                .ok_or_else(|| StoreError::definition_not_found(id))?;

            let mut input = catalog.entries[idx].definition.to_input();
            patch.apply_to(&mut input);
            let valid = input.validate().map_err(StoreError::Validation)?;

            catalog.ensure_scenario(&valid.scenario, now);
            let revision = catalog.next_revision();
            let entry = &mut catalog.entries[idx];
            let def = &mut entry.definition;
            def.scenario = valid.scenario;
            def.name = valid.name;
            def.method = valid.method;
            def.path_pattern = valid.pattern.as_str().to_string();
            def.priority = valid.priority;
            def.enabled = valid.enabled;
            def.response = valid.response;
            def.delay = valid.delay;
            def.updated_at = now;
            def.revision = revision;
            entry.pattern = valid.pattern;

            debug!(mock_id = %id, "Updated mock definition");
            Ok(Outcome::Changed(entry.definition.clone()))
        })
        .await
    }

    /// Delete a definition. Deleting an absent id is a no-op.
    pub async fn delete(&self, id: &str) -> StoreResult<()> {
        self.mutate(|catalog, _| match catalog.position(id) {
            Some(idx) => {
                catalog.entries.remove(idx);
                catalog.next_revision();
                debug!(mock_id = %id, "Deleted mock definition");
                Ok(Outcome::Changed(()))
            }
            None => Ok(Outcome::Unchanged(())),
        })
        .await
    }

    pub async fn get(&self, id: &str) -> StoreResult<MockDefinition> {
        self.snapshot()
            .await
            .entry(id)
            .map(|e| e.definition.clone())
            .ok_or_else(|| StoreError::definition_not_found(id))
    }

    /// Definitions in creation order, optionally restricted to one scenario.
    pub async fn list(&self, scenario: Option<&str>) -> Vec<MockDefinition> {
        let catalog = self.snapshot().await;
        catalog
            .entries()
            .iter()
            .filter(|e| scenario.map_or(true, |s| e.definition.scenario == s))
            .map(|e| e.definition.clone())
            .collect()
    }

    pub async fn scenarios(&self) -> Vec<Scenario> {
        self.snapshot().await.scenarios().cloned().collect()
    }

    pub async fn get_scenario(&self, name: &str) -> StoreResult<Scenario> {
        self.snapshot()
            .await
            .scenario(name)
            .cloned()
            .ok_or_else(|| StoreError::scenario_not_found(name))
    }

    /// Create a scenario or edit its parent/description.
    pub async fn upsert_scenario(&self, name: &str, spec: ScenarioSpec) -> StoreResult<Scenario> {
        validate_scenario_name(name)
            .map_err(|message| StoreError::Validation(ValidationErrors::single("name", message)))?;

        self.mutate(|catalog, now| {
            if let Some(parent) = &spec.parent {
                validate_parent(catalog, name, parent)?;
            }

            let scenario = catalog
                .scenarios
                .entry(name.to_string())
                .or_insert_with(|| Scenario::new(name, now));
            if spec.parent.is_some() {
                scenario.parent = spec.parent;
            }
            if spec.description.is_some() {
                scenario.description = spec.description;
            }
            let scenario = scenario.clone();
            catalog.next_revision();
            Ok(Outcome::Changed(scenario))
        })
        .await
    }

    /// Delete a scenario and every definition in it.
    ///
    /// Children are re-parented to `default`; the active scenario falls back
    /// to `default` if it was the deleted one. `default` itself cannot be
    /// deleted.
    pub async fn delete_scenario(&self, name: &str) -> StoreResult<()> {
        if name == DEFAULT_SCENARIO {
            return Err(StoreError::Validation(ValidationErrors::single(
                "name",
                "the default scenario cannot be deleted",
            )));
        }

        self.mutate(|catalog, _| {
            if catalog.scenarios.remove(name).is_none() {
                return Ok(Outcome::Unchanged(()));
            }

            let before = catalog.entries.len();
            catalog.entries.retain(|e| e.definition.scenario != name);
            for scenario in catalog.scenarios.values_mut() {
                if scenario.parent.as_deref() == Some(name) {
                    scenario.parent = Some(DEFAULT_SCENARIO.to_string());
                }
            }
            if catalog.active_scenario == name {
                catalog.active_scenario = DEFAULT_SCENARIO.to_string();
            }
            catalog.next_revision();

            info!(
                scenario = %name,
                definitions_removed = before - catalog.entries.len(),
                "Deleted scenario"
            );
            Ok(Outcome::Changed(()))
        })
        .await
    }

    pub async fn active_scenario(&self) -> String {
        self.snapshot().await.active_scenario().to_string()
    }

    /// Switch the process-wide scenario used when no override is given.
    pub async fn set_active_scenario(&self, name: &str) -> StoreResult<()> {
        self.mutate(|catalog, _| {
            if !catalog.scenarios.contains_key(name) {
                return Err(StoreError::scenario_not_found(name));
            }
            if catalog.active_scenario == name {
                return Ok(Outcome::Unchanged(()));
            }
            catalog.active_scenario = name.to_string();
            catalog.next_revision();
            info!(scenario = %name, "Active scenario changed");
            Ok(Outcome::Changed(()))
        })
        .await
    }

    /// Apply one mutation: clone, edit, persist, publish.
    ///
    /// The writer lock is held for the whole sequence so mutations never
    /// interleave. Readers keep seeing the previous catalog until publish.
    async fn mutate<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Catalog, DateTime<Utc>) -> StoreResult<Outcome<T>>,
    {
        let _guard = self.writer.lock().await;

        let mut next = Catalog::clone(&*self.snapshot().await);
        let value = match f(&mut next, Utc::now())? {
            Outcome::Unchanged(value) => return Ok(value),
            Outcome::Changed(value) => value,
        };

        if let Some(path) = &self.snapshot_path {
            if let Err(e) = write_snapshot(path, &next).await {
                error!(
                    path = %path.display(),
                    error = %e,
                    "Failed to write snapshot, mutation discarded"
                );
                return Err(e.into());
            }
        }

        *self.current.write().await = Arc::new(next);
        Ok(value)
    }
}

fn validate_parent(catalog: &Catalog, name: &str, parent: &str) -> StoreResult<()> {
    let invalid = |message: String| -> StoreResult<()> {
        Err(StoreError::Validation(ValidationErrors::single("parent", message)))
    };

    if name == DEFAULT_SCENARIO {
        return invalid("the default scenario cannot have a parent".to_string());
    }
    if !catalog.scenarios.contains_key(parent) {
        return invalid(format!("unknown parent scenario {:?}", parent));
    }
    if catalog.fallback_chain(parent).iter().any(|n| n == name) {
        return invalid(format!(
            "making {:?} the parent of {:?} would create a cycle",
            parent, name
        ));
    }
    Ok(())
}

/// Write the catalog to `path` through a temporary file and rename.
async fn write_snapshot(path: &Path, catalog: &Catalog) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec_pretty(&catalog.to_snapshot())?;
    let io_err = |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, &bytes).await.map_err(io_err)?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_err(e));
    }
    Ok(())
}
