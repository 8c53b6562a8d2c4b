//! Tool catalog: loads tool documents from a directory, validates them, and
//! publishes atomic, hot-reloadable snapshots for the planner to query.

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use router_core::{validate_tool, RegistryDocument, Tool, ToolValidationError};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::{Duration, Instant};

const DEBOUNCE: Duration = Duration::from_millis(200);

/// Errors produced while loading or watching the tool catalog.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Failed to read the registry directory or a document within it.
    #[error("io error reading '{path}': {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// A document failed to parse as YAML or JSON.
    #[error("failed to parse '{path}': {source}")]
    Parse {
        /// Path that failed to parse.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_yaml::Error,
    },
    /// A document failed the embedded JSON Schema.
    #[error("'{path}' failed schema validation: {source}")]
    Schema {
        /// Path that failed validation.
        path: PathBuf,
        /// Underlying schema error.
        #[source]
        source: router_core::SchemaError,
    },
    /// A document parsed and passed schema validation but violates a
    /// semantic invariant (see [`router_core::validate_tool`]).
    #[error("'{path}' failed invariant validation: {source}")]
    Invariant {
        /// Path that failed validation.
        path: PathBuf,
        /// Underlying invariant error.
        #[source]
        source: ToolValidationError,
    },
    /// A document passed schema validation but did not deserialize into the
    /// Rust tool model (should not happen if the schema is kept in sync).
    #[error("'{path}' did not match the tool model: {source}")]
    Deserialize {
        /// Path that failed to deserialize.
        path: PathBuf,
        /// Underlying deserialize error.
        #[source]
        source: serde_json::Error,
    },
    /// Two documents declared the same tool id.
    #[error("duplicate tool id '{0}'")]
    DuplicateId(String),
    /// Failed to set up the filesystem watcher.
    #[error("failed to watch registry directory: {0}")]
    Watch(String),
}

/// An immutable, point-in-time view of the tool catalog.
#[derive(Debug)]
pub struct RegistrySnapshot {
    tools: HashMap<String, Tool>,
    /// Ids in load order (sorted-path order), so that callers iterating the
    /// snapshot — and the scorer's tie-break — see a deterministic order
    /// rather than `HashMap`'s arbitrary one.
    order: Vec<String>,
    loaded_at_ms: u64,
}

impl RegistrySnapshot {
    /// All tools in the snapshot, in load order.
    pub fn list(&self) -> impl Iterator<Item = &Tool> {
        self.order.iter().filter_map(move |id| self.tools.get(id))
    }

    /// Look up a tool by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Tool> {
        self.tools.get(id)
    }

    /// Tools that declare the given capability name, in load order.
    pub fn by_capability<'a>(&'a self, capability: &'a str) -> impl Iterator<Item = &'a Tool> {
        self.list().filter(move |t| t.capabilities.iter().any(|c| c.name == capability))
    }

    /// Number of tools currently loaded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the snapshot has no tools.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Wall-clock timestamp (ms) at which this snapshot was built.
    #[must_use]
    pub fn loaded_at_ms(&self) -> u64 {
        self.loaded_at_ms
    }

    /// The `{tools, updatedAt}` view of this snapshot (spec §4.1's
    /// `getRegistry()`), in load order.
    #[must_use]
    pub fn as_document(&self) -> RegistryDocument {
        RegistryDocument { tools: self.list().cloned().collect(), updated_at: format_rfc3339_ms(self.loaded_at_ms) }
    }
}

fn format_rfc3339_ms(ms: u64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_millis(i64::try_from(ms).unwrap_or(i64::MAX))
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| "1970-01-01T00:00:00+00:00".to_string())
}

/// Observer hook for registry reload outcomes, used to drive metrics.
/// Mirrors the teacher's `PolicyObserver` pattern: a process-wide, swappable
/// observer rather than a constructor parameter threaded through every call
/// site.
pub trait RegistryObserver: Send + Sync {
    /// Called after a successful reload with the new tool count.
    fn on_reload_ok(&self, tool_count: usize) {
        let _ = tool_count;
    }
    /// Called after a failed reload; the previous snapshot remains live.
    fn on_reload_err(&self, error: &RegistryError) {
        let _ = error;
    }
}

static OBSERVER: OnceLock<RwLock<Option<Arc<dyn RegistryObserver>>>> = OnceLock::new();

fn observer_cell() -> &'static RwLock<Option<Arc<dyn RegistryObserver>>> {
    OBSERVER.get_or_init(|| RwLock::new(None))
}

/// Install a process-wide registry observer, replacing any previous one.
pub fn set_observer(observer: Arc<dyn RegistryObserver>) {
    *observer_cell().write().expect("registry observer lock poisoned") = Some(observer);
}

fn notify_ok(count: usize) {
    if let Some(obs) = observer_cell().read().expect("registry observer lock poisoned").as_ref() {
        obs.on_reload_ok(count);
    }
}

fn notify_err(err: &RegistryError) {
    if let Some(obs) = observer_cell().read().expect("registry observer lock poisoned").as_ref() {
        obs.on_reload_err(err);
    }
}

fn parse_single_tool(path: &Path, json: Value) -> Result<Vec<Tool>, RegistryError> {
    router_core::schema::validate_tool_document(&json)
        .map_err(|e| RegistryError::Schema { path: path.into(), source: e })?;
    let tool: Tool = serde_json::from_value(json)
        .map_err(|e| RegistryError::Deserialize { path: path.into(), source: e })?;
    validate_tool(&tool).map_err(|e| RegistryError::Invariant { path: path.into(), source: e })?;
    Ok(vec![tool])
}

fn parse_registry_document(path: &Path, json: Value) -> Result<Vec<Tool>, RegistryError> {
    router_core::schema::validate_registry_document(&json)
        .map_err(|e| RegistryError::Schema { path: path.into(), source: e })?;
    let doc: RegistryDocument = serde_json::from_value(json)
        .map_err(|e| RegistryError::Deserialize { path: path.into(), source: e })?;
    for tool in &doc.tools {
        validate_tool(tool).map_err(|e| RegistryError::Invariant { path: path.into(), source: e })?;
    }
    Ok(doc.tools)
}

/// Parse one on-disk document into the tools it declares. A document is
/// either a registry document (`{tools: [...], updatedAt}`, spec §4.1 shape
/// (a)) or a single tool (shape (b)); the two are distinguished by the
/// presence of a top-level `tools` key before either schema is applied.
fn parse_registry_entries(path: &Path) -> Result<Vec<Tool>, RegistryError> {
    let text =
        std::fs::read_to_string(path).map_err(|e| RegistryError::Io { path: path.into(), source: e })?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(&text).map_err(|e| RegistryError::Parse { path: path.into(), source: e })?;
    let json = serde_json::to_value(&value).expect("yaml value converts to json");
    if json.get("tools").is_some() {
        parse_registry_document(path, json)
    } else {
        parse_single_tool(path, json)
    }
}

/// Load every `.yaml`/`.yml`/`.json` document directly under `dir` into a
/// snapshot. The rebuild is all-or-nothing: any single document failing
/// parsing, schema, or invariant validation fails the whole reload and the
/// caller keeps its previous snapshot.
pub fn load_dir(dir: &Path) -> Result<RegistrySnapshot, RegistryError> {
    let entries = std::fs::read_dir(dir).map_err(|e| RegistryError::Io { path: dir.into(), source: e })?;
    let mut tools = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| RegistryError::Io { path: dir.into(), source: e })?;
        let path = entry.path();
        let is_doc = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml") | Some("json")
        );
        if path.is_file() && is_doc {
            paths.push(path);
        }
    }
    paths.sort();
    for path in paths {
        for tool in parse_registry_entries(&path)? {
            let id = tool.id.clone();
            if tools.insert(id.clone(), tool).is_some() {
                return Err(RegistryError::DuplicateId(id));
            }
            order.push(id);
        }
    }
    Ok(RegistrySnapshot { tools, order, loaded_at_ms: router_core::ids::now_ms() })
}

/// Owns the live registry snapshot and, optionally, a background filesystem
/// watcher that keeps it current.
pub struct RegistryService {
    dir: PathBuf,
    inner: RwLock<Arc<RegistrySnapshot>>,
}

impl RegistryService {
    /// Load the initial snapshot from `dir`. Fails if the directory cannot
    /// be read or any document in it is invalid.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Arc<Self>, RegistryError> {
        let dir = dir.into();
        let snapshot = load_dir(&dir)?;
        notify_ok(snapshot.len());
        Ok(Arc::new(Self { dir, inner: RwLock::new(Arc::new(snapshot)) }))
    }

    /// Current snapshot (cheap `Arc` clone).
    #[must_use]
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.inner.read().expect("registry snapshot lock poisoned").clone()
    }

    /// The `{tools, updatedAt}` view of the current snapshot (spec §4.1's
    /// `getRegistry()`).
    #[must_use]
    pub fn get_registry(&self) -> RegistryDocument {
        self.snapshot().as_document()
    }

    fn reload(&self) {
        match load_dir(&self.dir) {
            Ok(snapshot) => {
                let count = snapshot.len();
                *self.inner.write().expect("registry snapshot lock poisoned") = Arc::new(snapshot);
                tracing::info!(tool_count = count, "registry.reload");
                notify_ok(count);
            }
            Err(err) => {
                tracing::warn!(error = %err, "registry.reload failed, keeping previous snapshot");
                notify_err(&err);
            }
        }
    }

    /// Start a background thread that watches the registry directory and
    /// reloads the snapshot on change, debounced to avoid reload storms
    /// during a burst of writes.
    pub fn watch(self: &Arc<Self>) -> Result<(), RegistryError> {
        let (tx, rx) = channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(tx, Config::default())
            .map_err(|e| RegistryError::Watch(e.to_string()))?;
        watcher
            .watch(&self.dir, RecursiveMode::NonRecursive)
            .map_err(|e| RegistryError::Watch(e.to_string()))?;
        let svc = Arc::clone(self);
        std::thread::spawn(move || {
            let _keep_alive = watcher;
            let mut last_reload = Instant::now() - DEBOUNCE;
            for res in rx {
                if res.is_err() {
                    continue;
                }
                if last_reload.elapsed() < DEBOUNCE {
                    continue;
                }
                last_reload = Instant::now();
                svc.reload();
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_tool(dir: &Path, file: &str, yaml: &str) {
        fs::write(dir.join(file), yaml).unwrap();
    }

    const FAST: &str = r#"
id: fast
name: Fast Search
version: "1.0.0"
capabilities:
  - name: patient.search
endpoint:
  type: http
  url: https://fast.example
  timeout_ms: 1000
"#;

    const SLOW: &str = r#"
id: slow
name: Slow Search
version: "1.0.0"
capabilities:
  - name: patient.search
endpoint:
  type: http
  url: https://slow.example
  timeout_ms: 5000
"#;

    #[test]
    fn loads_multiple_valid_tools() {
        let dir = tempfile::tempdir().unwrap();
        write_tool(dir.path(), "fast.yaml", FAST);
        write_tool(dir.path(), "slow.yaml", SLOW);
        let snapshot = load_dir(dir.path()).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.by_capability("patient.search").count(), 2);
    }

    #[test]
    fn duplicate_id_fails_the_whole_reload() {
        let dir = tempfile::tempdir().unwrap();
        write_tool(dir.path(), "fast.yaml", FAST);
        write_tool(dir.path(), "fast2.yaml", FAST);
        let result = load_dir(dir.path());
        assert!(matches!(result, Err(RegistryError::DuplicateId(_))));
    }

    #[test]
    fn invalid_document_fails_the_whole_reload() {
        let dir = tempfile::tempdir().unwrap();
        write_tool(dir.path(), "fast.yaml", FAST);
        write_tool(dir.path(), "bad.yaml", "id: bad\nname: Bad\nversion: \"1.0\"\ncapabilities: []\n");
        let result = load_dir(dir.path());
        assert!(result.is_err());
    }

    #[test]
    fn empty_directory_yields_empty_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = load_dir(dir.path()).unwrap();
        assert!(snapshot.is_empty());
    }

    const BUNDLE: &str = r#"
tools:
  - id: fast
    name: Fast Search
    version: "1.0.0"
    capabilities:
      - name: patient.search
    endpoint:
      type: http
      url: https://fast.example
      timeout_ms: 1000
  - id: slow
    name: Slow Search
    version: "1.0.0"
    capabilities:
      - name: patient.search
    endpoint:
      type: http
      url: https://slow.example
      timeout_ms: 5000
updatedAt: "2026-01-01T00:00:00Z"
"#;

    #[test]
    fn loads_a_registry_document_bundle() {
        let dir = tempfile::tempdir().unwrap();
        write_tool(dir.path(), "bundle.yaml", BUNDLE);
        let snapshot = load_dir(dir.path()).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.get("fast").is_some());
        assert!(snapshot.get("slow").is_some());
    }

    #[test]
    fn registry_document_and_single_tool_files_coexist_in_one_reload() {
        let dir = tempfile::tempdir().unwrap();
        write_tool(dir.path(), "bundle.yaml", BUNDLE);
        write_tool(
            dir.path(),
            "extra.yaml",
            "id: extra\nname: Extra\nversion: \"1.0.0\"\ncapabilities:\n  - name: patient.search\n",
        );
        let snapshot = load_dir(dir.path()).unwrap();
        assert_eq!(snapshot.len(), 3);
    }

    #[test]
    fn invalid_tool_inside_a_registry_document_fails_the_whole_reload() {
        let dir = tempfile::tempdir().unwrap();
        write_tool(
            dir.path(),
            "bundle.yaml",
            "tools:\n  - id: \"\"\n    name: Bad\n    version: \"1.0\"\n    capabilities: []\nupdatedAt: \"2026-01-01T00:00:00Z\"\n",
        );
        let result = load_dir(dir.path());
        assert!(result.is_err());
    }

    #[test]
    fn get_registry_exposes_tools_and_updated_at() {
        let dir = tempfile::tempdir().unwrap();
        write_tool(dir.path(), "fast.yaml", FAST);
        let service = RegistryService::load(dir.path()).unwrap();
        let doc = service.get_registry();
        assert_eq!(doc.tools.len(), 1);
        assert_eq!(doc.tools[0].id, "fast");
        assert!(!doc.updated_at.is_empty());
    }

    #[test]
    fn service_exposes_loaded_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        write_tool(dir.path(), "fast.yaml", FAST);
        let service = RegistryService::load(dir.path()).unwrap();
        assert_eq!(service.snapshot().len(), 1);
        assert!(service.snapshot().get("fast").is_some());
    }

    #[test]
    fn failed_reload_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        write_tool(dir.path(), "fast.yaml", FAST);
        let service = RegistryService::load(dir.path()).unwrap();
        fs::write(dir.path().join("bad.yaml"), "not: [valid").unwrap();
        service.reload();
        assert_eq!(service.snapshot().len(), 1);
    }
}
