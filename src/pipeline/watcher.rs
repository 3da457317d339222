// Debounced source watcher

use std::collections::BTreeSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::grammar::Language;

/// Watches a directory for changes to source files of one language and
/// reports them in batches once the directory has been quiet for the
/// debounce interval.
pub struct SourceWatcher {
    watch_path: PathBuf,
    extensions: BTreeSet<String>,
    debounce: Duration,
}

impl SourceWatcher {
    pub fn new(watch_path: PathBuf, language: Language, debounce: Duration) -> Self {
        Self {
            watch_path,
            extensions: language.extensions().iter().map(|e| e.to_string()).collect(),
            debounce,
        }
    }

    /// Run until the event stream closes, calling `on_change` with each
    /// batch of changed paths.
    pub async fn watch<F, Fut>(&self, mut on_change: F) -> Result<()>
    where
        F: FnMut(Vec<PathBuf>) -> Fut,
        Fut: Future<Output = ()>,
    {
        info!("Starting file watcher for: {}", self.watch_path.display());

        let (tx, mut rx) = mpsc::unbounded_channel();

        // notify calls back on its own thread
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if tx.send(event).is_err() {
                        debug!("File event dropped, watcher is shutting down");
                    }
                }
                Err(e) => error!("File watch error: {}", e),
            },
            Config::default(),
        )?;
        watcher.watch(&self.watch_path, RecursiveMode::Recursive)?;

        info!("File watcher started. Monitoring for changes...");

        while let Some(event) = rx.recv().await {
            let mut batch = BTreeSet::new();
            self.collect(&event, &mut batch);
            if batch.is_empty() {
                continue;
            }
            // Keep absorbing events until the directory settles.
            loop {
                match tokio::time::timeout(self.debounce, rx.recv()).await {
                    Ok(Some(event)) => self.collect(&event, &mut batch),
                    Ok(None) => break,
                    Err(_) => break,
                }
            }
            debug!("Debounced {} changed files", batch.len());
            on_change(batch.into_iter().collect()).await;
        }

        Ok(())
    }

    fn collect(&self, event: &Event, batch: &mut BTreeSet<PathBuf>) {
        if !matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
        ) {
            return;
        }
        for path in &event.paths {
            if self.is_source_file(path) {
                batch.insert(path.clone());
            }
        }
    }

    fn is_source_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.extensions.contains(&ext.to_ascii_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind};

    fn watcher() -> SourceWatcher {
        SourceWatcher::new(PathBuf::from("."), Language::Python, Duration::from_millis(10))
    }

    #[test]
    fn test_collects_matching_extensions() {
        let watcher = watcher();
        let mut batch = BTreeSet::new();
        let event = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("src/app.py"))
            .add_path(PathBuf::from("README.md"));
        watcher.collect(&event, &mut batch);
        assert_eq!(batch.len(), 1);
        assert!(batch.contains(Path::new("src/app.py")));
    }

    #[test]
    fn test_ignores_access_events() {
        let watcher = watcher();
        let mut batch = BTreeSet::new();
        let event = Event::new(EventKind::Access(notify::event::AccessKind::Any)).add_path(PathBuf::from("a.py"));
        watcher.collect(&event, &mut batch);
        assert!(batch.is_empty());

        let event = Event::new(EventKind::Create(CreateKind::File)).add_path(PathBuf::from("b.py"));
        watcher.collect(&event, &mut batch);
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn test_debounces_burst_of_writes() {
        let dir = tempfile::tempdir().unwrap();
        let watch_path = dir.path().to_path_buf();
        let watcher = SourceWatcher::new(watch_path.clone(), Language::Python, Duration::from_millis(200));
        let (batches_tx, mut batches_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            watcher
                .watch(move |paths| {
                    let batches_tx = batches_tx.clone();
                    async move {
                        let _ = batches_tx.send(paths);
                    }
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        for i in 0..3 {
            std::fs::write(watch_path.join("main.py"), format!("x = {}\n", i)).unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let batch = tokio::time::timeout(Duration::from_secs(5), batches_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(batch.iter().any(|p| p.ends_with("main.py")));
        task.abort();
    }
}
