//! Asynchronous Asset Loading
//!
//! Every load is tagged with the run id of the session that issued it and
//! bounded by a timeout. The session decides on arrival whether the result
//! still belongs to it; this module never applies anything.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::error::AssetLoadError;

/// Session generation counter stamped on every load.
pub type RunId = u64;

/// Source of raw asset bytes (base artwork, decoration bitmaps, fonts,
/// previously uploaded photos).
pub trait AssetLoader {
    fn fetch(&self, reference: &str) -> impl Future<Output = Result<Vec<u8>, String>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded(Vec<u8>),
    TimedOut,
    Failed(String),
}

/// A finished load, still carrying the run id it was issued under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedLoad {
    pub run_id: RunId,
    pub reference: String,
    pub outcome: LoadOutcome,
    pub timeout_ms: u64,
}

impl TaggedLoad {
    pub fn is_current(&self, run_id: RunId) -> bool {
        self.run_id == run_id
    }

    pub fn into_bytes(self) -> Result<Vec<u8>, AssetLoadError> {
        match self.outcome {
            LoadOutcome::Loaded(bytes) => Ok(bytes),
            LoadOutcome::TimedOut => Err(AssetLoadError::TimedOut {
                reference: self.reference,
                timeout_ms: self.timeout_ms,
            }),
            LoadOutcome::Failed(reason) => Err(AssetLoadError::Failed {
                reference: self.reference,
                reason,
            }),
        }
    }
}

/// Fetch one asset under `run_id`, giving up after `timeout`.
pub async fn load_tagged<L: AssetLoader>(
    loader: &L,
    reference: &str,
    run_id: RunId,
    timeout: Duration,
) -> TaggedLoad {
    let outcome = match tokio::time::timeout(timeout, loader.fetch(reference)).await {
        Ok(Ok(bytes)) => LoadOutcome::Loaded(bytes),
        Ok(Err(reason)) => LoadOutcome::Failed(reason),
        Err(_) => LoadOutcome::TimedOut,
    };
    if !matches!(outcome, LoadOutcome::Loaded(_)) {
        log::warn!("Asset {} (run {}) did not load: {:?}", reference, run_id, outcome);
    }
    TaggedLoad {
        run_id,
        reference: reference.to_string(),
        outcome,
        timeout_ms: timeout.as_millis() as u64,
    }
}

/// Fetch `references` one after another under the same run id.
pub async fn load_all<L: AssetLoader>(
    loader: &L,
    references: &[String],
    run_id: RunId,
    timeout: Duration,
) -> Vec<TaggedLoad> {
    let mut results = Vec::with_capacity(references.len());
    for reference in references {
        results.push(load_tagged(loader, reference, run_id, timeout).await);
    }
    results
}

/// Assets held in memory, keyed by reference.
#[derive(Debug, Clone, Default)]
pub struct MemoryAssetLoader {
    assets: HashMap<String, Vec<u8>>,
}

impl MemoryAssetLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, reference: impl Into<String>, bytes: Vec<u8>) {
        self.assets.insert(reference.into(), bytes);
    }

    pub fn with(mut self, reference: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.insert(reference, bytes);
        self
    }
}

impl AssetLoader for MemoryAssetLoader {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>, String> {
        self.assets
            .get(reference)
            .cloned()
            .ok_or_else(|| format!("no asset named {}", reference))
    }
}

/// Assets read from a local directory; references are relative paths.
#[derive(Debug, Clone)]
pub struct DirectoryAssetLoader {
    root: PathBuf,
}

impl DirectoryAssetLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, reference: &str) -> Result<PathBuf, String> {
        let relative = Path::new(reference);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(format!("reference {} escapes the asset root", reference));
        }
        Ok(self.root.join(relative))
    }
}

impl AssetLoader for DirectoryAssetLoader {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>, String> {
        let path = self.resolve(reference)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| format!("{}: {}", path.display(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowLoader;

    impl AssetLoader for SlowLoader {
        async fn fetch(&self, _reference: &str) -> Result<Vec<u8>, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_memory_loader_outcomes() {
        let loader = MemoryAssetLoader::new().with("a.png", vec![1, 2, 3]);
        let refs = vec!["a.png".to_string(), "missing.png".to_string()];
        let results = load_all(&loader, &refs, 7, Duration::from_secs(1)).await;
        assert_eq!(results[0].outcome, LoadOutcome::Loaded(vec![1, 2, 3]));
        assert!(matches!(results[1].outcome, LoadOutcome::Failed(_)));
        assert!(results.iter().all(|r| r.is_current(7)));
        assert!(matches!(
            results[1].clone().into_bytes(),
            Err(AssetLoadError::Failed { .. })
        ));
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let result = load_tagged(&SlowLoader, "slow.ttf", 1, Duration::from_millis(10)).await;
        assert_eq!(result.outcome, LoadOutcome::TimedOut);
        assert_eq!(
            result.into_bytes(),
            Err(AssetLoadError::TimedOut {
                reference: "slow.ttf".into(),
                timeout_ms: 10
            })
        );
    }

    #[tokio::test]
    async fn test_directory_loader_stays_in_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("frames")).unwrap();
        std::fs::write(dir.path().join("frames/base.png"), b"png").unwrap();
        let loader = DirectoryAssetLoader::new(dir.path());
        assert_eq!(loader.fetch("frames/base.png").await.unwrap(), b"png".to_vec());
        assert!(loader.fetch("../etc/passwd").await.is_err());
        assert!(loader.fetch("/etc/passwd").await.is_err());
    }
}
