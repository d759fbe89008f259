//! File-backed catalog and preference sources
//!
//! Both files are JSON. The watcher observes their parent directories so
//! that atomic replacements (write to temp file, rename) are picked up too.
//! A file that fails to parse leaves the previous snapshot in place.

use super::preferences::PreferenceSnapshot;
use super::resolver::CatalogResolver;
use crate::models::InstanceOffering;
use crate::observability::{ProvisionerMetrics, StructuredLogger};
use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Load instance offerings from a JSON array
pub async fn load_catalog_file(path: &Path) -> Result<Vec<InstanceOffering>> {
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read catalog file {}", path.display()))?;
    serde_json::from_slice(&content)
        .with_context(|| format!("Failed to parse catalog file {}", path.display()))
}

/// Load scoped allow-list preferences
pub async fn load_preferences_file(path: &Path) -> Result<PreferenceSnapshot> {
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read preferences file {}", path.display()))?;
    serde_json::from_slice(&content)
        .with_context(|| format!("Failed to parse preferences file {}", path.display()))
}

/// Which source a filesystem event touched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    Catalog,
    Preferences,
}

/// Keeps a `CatalogResolver` in sync with its source files
pub struct CatalogWatcher {
    resolver: Arc<CatalogResolver>,
    catalog_path: Option<PathBuf>,
    preferences_path: Option<PathBuf>,
    metrics: ProvisionerMetrics,
    logger: StructuredLogger,
}

impl CatalogWatcher {
    pub fn new(
        resolver: Arc<CatalogResolver>,
        catalog_path: Option<PathBuf>,
        preferences_path: Option<PathBuf>,
    ) -> Self {
        Self {
            resolver,
            catalog_path,
            preferences_path,
            metrics: ProvisionerMetrics::new(),
            logger: StructuredLogger::new("catalog"),
        }
    }

    /// Name reported in structured catalog events
    pub fn with_instance_name(mut self, name: impl Into<String>) -> Self {
        self.logger = StructuredLogger::new(name);
        self
    }

    fn apply_catalog(&self, offerings: Vec<InstanceOffering>) {
        self.resolver.refresh_catalog(offerings);
        let view = self.resolver.view();
        let catalog = view.catalog();
        self.metrics
            .set_catalog(catalog.len() as i64, catalog.generation());
        self.logger
            .log_catalog_refreshed(catalog.generation(), catalog.len(), catalog.fingerprint());
    }

    /// Load both sources once; errors here are fatal for startup
    pub async fn load_initial(&self) -> Result<()> {
        if let Some(path) = &self.preferences_path {
            let preferences = load_preferences_file(path).await?;
            self.resolver.refresh_preferences(preferences);
        }
        if let Some(path) = &self.catalog_path {
            let offerings = load_catalog_file(path).await?;
            self.apply_catalog(offerings);
        }
        Ok(())
    }

    /// Start watching; stops when the returned handle is dropped
    pub async fn start(self) -> Result<SourceWatcherHandle> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = tx.send(event);
                }
            },
            notify::Config::default(),
        )
        .context("Failed to create filesystem watcher")?;

        for path in self.watched_paths() {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .with_context(|| format!("Failed to watch {}", dir.display()))?;
            info!(path = %path.display(), "Watching provisioning source");
        }

        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    continue;
                }
                for kind in self.touched_sources(&event) {
                    self.reload(kind).await;
                }
            }
            debug!("Source watcher channel closed");
        });

        Ok(SourceWatcherHandle {
            _watcher: watcher,
            _task: task,
        })
    }

    fn watched_paths(&self) -> Vec<&Path> {
        self.catalog_path
            .iter()
            .chain(self.preferences_path.iter())
            .map(PathBuf::as_path)
            .collect()
    }

    fn touched_sources(&self, event: &Event) -> Vec<SourceKind> {
        let mut kinds = Vec::new();
        for path in &event.paths {
            if same_file_name(path, self.catalog_path.as_deref())
                && !kinds.contains(&SourceKind::Catalog)
            {
                kinds.push(SourceKind::Catalog);
            }
            if same_file_name(path, self.preferences_path.as_deref())
                && !kinds.contains(&SourceKind::Preferences)
            {
                kinds.push(SourceKind::Preferences);
            }
        }
        kinds
    }

    async fn reload(&self, kind: SourceKind) {
        match kind {
            SourceKind::Catalog => {
                let Some(path) = &self.catalog_path else {
                    return;
                };
                match load_catalog_file(path).await {
                    Ok(offerings) => self.apply_catalog(offerings),
                    Err(e) => warn!(error = %e, "Keeping previous catalog"),
                }
            }
            SourceKind::Preferences => {
                let Some(path) = &self.preferences_path else {
                    return;
                };
                match load_preferences_file(path).await {
                    Ok(preferences) => self.resolver.refresh_preferences(preferences),
                    Err(e) => warn!(error = %e, "Keeping previous preferences"),
                }
            }
        }
    }
}

fn same_file_name(event_path: &Path, source: Option<&Path>) -> bool {
    match (event_path.file_name(), source.and_then(Path::file_name)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Handle to a running source watcher
/// Stops watching when dropped
pub struct SourceWatcherHandle {
    _watcher: RecommendedWatcher,
    _task: tokio::task::JoinHandle<()>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const CATALOG: &str = r#"[
        {"type": "m5.large", "region": "us-east-1", "priceModel": "on_demand",
         "vCPU": 2, "memoryGB": 8, "pricePerUnit": 0.096, "publishedAt": "2024-01-01T00:00:00Z"}
    ]"#;

    #[tokio::test]
    async fn test_load_initial_sources() {
        let dir = TempDir::new().unwrap();
        let catalog_path = dir.path().join("catalog.json");
        let preferences_path = dir.path().join("preferences.json");
        tokio::fs::write(&catalog_path, CATALOG).await.unwrap();
        tokio::fs::write(&preferences_path, r#"{"global": {"instanceTypes": "m5.*"}}"#)
            .await
            .unwrap();

        let resolver = Arc::new(CatalogResolver::new("us-east-1"));
        let watcher = CatalogWatcher::new(
            resolver.clone(),
            Some(catalog_path),
            Some(preferences_path),
        );
        watcher.load_initial().await.unwrap();

        assert!(resolver.is_instance_allowed("m5.large", None, None));
        assert_eq!(resolver.view().catalog().generation(), 1);
    }

    #[tokio::test]
    async fn test_malformed_catalog_is_an_error() {
        let dir = TempDir::new().unwrap();
        let catalog_path = dir.path().join("catalog.json");
        tokio::fs::write(&catalog_path, "{not json").await.unwrap();

        assert!(load_catalog_file(&catalog_path).await.is_err());
    }

    #[tokio::test]
    async fn test_reload_keeps_previous_on_parse_error() {
        let dir = TempDir::new().unwrap();
        let catalog_path = dir.path().join("catalog.json");
        tokio::fs::write(&catalog_path, CATALOG).await.unwrap();

        let resolver = Arc::new(CatalogResolver::new("us-east-1"));
        let watcher = CatalogWatcher::new(resolver.clone(), Some(catalog_path.clone()), None);
        watcher.load_initial().await.unwrap();

        tokio::fs::write(&catalog_path, "[{").await.unwrap();
        watcher.reload(SourceKind::Catalog).await;

        let view = resolver.view();
        assert_eq!(view.catalog().generation(), 1);
        assert!(view.catalog().contains("us-east-1", "m5.large"));
    }

    #[test]
    fn test_touched_sources_by_file_name() {
        let resolver = Arc::new(CatalogResolver::new("us-east-1"));
        let watcher = CatalogWatcher::new(
            resolver,
            Some(PathBuf::from("/etc/provisioner/catalog.json")),
            Some(PathBuf::from("/etc/provisioner/preferences.json")),
        );

        let event = Event::new(EventKind::Any)
            .add_path(PathBuf::from("/etc/provisioner/catalog.json"))
            .add_path(PathBuf::from("/etc/provisioner/other.json"));
        assert_eq!(watcher.touched_sources(&event), vec![SourceKind::Catalog]);
    }
}
