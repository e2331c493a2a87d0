//! Transient audio artifact storage for the Ringline platform.
//!
//! Every piece of audio that crosses the telephony boundary — caller
//! recordings coming in, synthesized replies going out — lives here for the
//! duration of its usefulness. Artifacts are files under a store directory,
//! tracked by an in-memory retention index.
//!
//! Expiry alone does not make an artifact deletable: an artifact referenced
//! by an active call's most recent instruction stays retrievable until that
//! call releases it, so reaping can never race a pending playback fetch.

use ringline_types::ArtifactKind;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur during artifact operations.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact not found: {0}")]
    NotFound(String),

    #[error("artifact storage io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A stored artifact's metadata.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub artifact_id: String,
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub created_at: Instant,
    pub expires_at: Instant,
    /// Pinned artifacts (the pre-recorded fallback audio) never expire.
    pub pinned: bool,
}

#[derive(Default)]
struct StoreIndex {
    artifacts: HashMap<String, Artifact>,
    /// Artifact IDs referenced by each active call's latest instruction.
    in_use: HashMap<String, HashSet<String>>,
}

/// File-backed store for transient audio artifacts.
pub struct ArtifactStore {
    dir: PathBuf,
    retention: Duration,
    index: Mutex<StoreIndex>,
}

impl ArtifactStore {
    /// Opens (creating if needed) a store rooted at `dir`. New artifacts
    /// expire `retention` after creation.
    pub fn new(dir: impl AsRef<Path>, retention: Duration) -> Result<Self, ArtifactError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            retention,
            index: Mutex::new(StoreIndex::default()),
        })
    }

    /// Persists `bytes` as a new artifact and returns its metadata.
    pub fn create(&self, kind: ArtifactKind, bytes: &[u8]) -> Result<Artifact, ArtifactError> {
        self.create_inner(kind, bytes, false)
    }

    /// Persists `bytes` as a pinned artifact that is never reaped. Used for
    /// the pre-recorded "call back later" audio loaded at startup.
    pub fn create_pinned(&self, kind: ArtifactKind, bytes: &[u8]) -> Result<Artifact, ArtifactError> {
        self.create_inner(kind, bytes, true)
    }

    fn create_inner(
        &self,
        kind: ArtifactKind,
        bytes: &[u8],
        pinned: bool,
    ) -> Result<Artifact, ArtifactError> {
        let artifact_id = Uuid::new_v4().to_string();
        let path = self.dir.join(format!("{}.{}", artifact_id, kind.extension()));

        std::fs::write(&path, bytes)?;

        let now = Instant::now();
        let artifact = Artifact {
            artifact_id: artifact_id.clone(),
            kind,
            path,
            created_at: now,
            expires_at: now + self.retention,
            pinned,
        };

        self.lock().artifacts.insert(artifact_id, artifact.clone());
        Ok(artifact)
    }

    /// Reads an artifact's bytes.
    ///
    /// Returns `NotFound` for unknown or already-reaped IDs. Known-but-
    /// expired artifacts are still served: expiry makes an artifact
    /// *eligible* for deletion, it does not revoke pending retrievals.
    pub fn retrieve(&self, artifact_id: &str) -> Result<Vec<u8>, ArtifactError> {
        let path = {
            let index = self.lock();
            match index.artifacts.get(artifact_id) {
                Some(artifact) => artifact.path.clone(),
                None => return Err(ArtifactError::NotFound(artifact_id.to_string())),
            }
        };
        Ok(std::fs::read(path)?)
    }

    /// Looks up an artifact's metadata.
    pub fn get(&self, artifact_id: &str) -> Option<Artifact> {
        self.lock().artifacts.get(artifact_id).cloned()
    }

    /// Records the artifacts referenced by `call_sid`'s latest instruction,
    /// replacing any previously recorded set for that call.
    pub fn mark_in_use(&self, call_sid: &str, artifact_ids: &[String]) {
        let mut index = self.lock();
        if artifact_ids.is_empty() {
            index.in_use.remove(call_sid);
        } else {
            index
                .in_use
                .insert(call_sid.to_string(), artifact_ids.iter().cloned().collect());
        }
    }

    /// Drops the in-use set for a call that has ended.
    pub fn release(&self, call_sid: &str) {
        self.lock().in_use.remove(call_sid);
    }

    /// Deletes expired artifacts that no active call references.
    ///
    /// Returns the number deleted. File removal failures are logged and the
    /// index entry dropped anyway; a leaked file is recovered on the next
    /// process start, a dangling index entry would serve 404s forever.
    pub fn reap(&self) -> usize {
        let now = Instant::now();
        let doomed: Vec<Artifact> = {
            let mut index = self.lock();
            let referenced: HashSet<String> =
                index.in_use.values().flatten().cloned().collect();
            let ids: Vec<String> = index
                .artifacts
                .values()
                .filter(|a| !a.pinned && a.expires_at <= now && !referenced.contains(&a.artifact_id))
                .map(|a| a.artifact_id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| index.artifacts.remove(&id))
                .collect()
        };

        let count = doomed.len();
        for artifact in doomed {
            if let Err(e) = std::fs::remove_file(&artifact.path) {
                tracing::warn!(
                    artifact_id = %artifact.artifact_id,
                    error = %e,
                    "failed to delete reaped artifact file"
                );
            }
        }
        count
    }

    /// Deletes every non-pinned artifact regardless of expiry or use.
    /// Called on process shutdown.
    pub fn purge(&self) -> usize {
        let doomed: Vec<Artifact> = {
            let mut index = self.lock();
            index.in_use.clear();
            let ids: Vec<String> = index
                .artifacts
                .values()
                .filter(|a| !a.pinned)
                .map(|a| a.artifact_id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| index.artifacts.remove(&id))
                .collect()
        };

        let count = doomed.len();
        for artifact in doomed {
            let _ = std::fs::remove_file(&artifact.path);
        }
        count
    }

    fn lock(&self) -> MutexGuard<'_, StoreIndex> {
        match self.index.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                // A panicked holder leaves the index structurally intact;
                // the worst case is a stale entry, which the reaper clears.
                tracing::error!("artifact index lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_retention(retention: Duration) -> (tempfile::TempDir, ArtifactStore) {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let store = ArtifactStore::new(dir.path(), retention).expect("should open store");
        (dir, store)
    }

    #[test]
    fn create_and_retrieve_roundtrip() {
        let (_dir, store) = store_with_retention(Duration::from_secs(60));

        let artifact = store
            .create(ArtifactKind::SynthesizedReply, b"pcm-bytes")
            .expect("create should succeed");
        assert!(artifact.path.exists());

        let bytes = store
            .retrieve(&artifact.artifact_id)
            .expect("retrieve should succeed");
        assert_eq!(bytes, b"pcm-bytes");
    }

    #[test]
    fn retrieve_unknown_is_not_found() {
        let (_dir, store) = store_with_retention(Duration::from_secs(60));
        let err = store.retrieve("no-such-artifact").unwrap_err();
        assert!(matches!(err, ArtifactError::NotFound(_)));
    }

    #[test]
    fn reap_deletes_expired_artifacts() {
        let (_dir, store) = store_with_retention(Duration::ZERO);

        let artifact = store
            .create(ArtifactKind::IncomingRecording, b"expired")
            .expect("create should succeed");

        assert_eq!(store.reap(), 1);
        assert!(!artifact.path.exists(), "file should be deleted");
        assert!(matches!(
            store.retrieve(&artifact.artifact_id),
            Err(ArtifactError::NotFound(_))
        ));
    }

    #[test]
    fn reap_spares_unexpired_artifacts() {
        let (_dir, store) = store_with_retention(Duration::from_secs(300));
        store
            .create(ArtifactKind::SynthesizedReply, b"fresh")
            .expect("create should succeed");
        assert_eq!(store.reap(), 0);
    }

    #[test]
    fn reap_never_deletes_in_use_artifacts() {
        let (_dir, store) = store_with_retention(Duration::ZERO);

        let artifact = store
            .create(ArtifactKind::SynthesizedReply, b"playing")
            .expect("create should succeed");
        store.mark_in_use("CA1", &[artifact.artifact_id.clone()]);

        assert_eq!(store.reap(), 0, "in-use artifact must survive expiry");
        assert!(store.retrieve(&artifact.artifact_id).is_ok());

        store.release("CA1");
        assert_eq!(store.reap(), 1, "released artifact becomes reapable");
    }

    #[test]
    fn mark_in_use_replaces_previous_set() {
        let (_dir, store) = store_with_retention(Duration::ZERO);

        let first = store
            .create(ArtifactKind::SynthesizedReply, b"first")
            .expect("create should succeed");
        let second = store
            .create(ArtifactKind::SynthesizedReply, b"second")
            .expect("create should succeed");

        store.mark_in_use("CA1", &[first.artifact_id.clone()]);
        store.mark_in_use("CA1", &[second.artifact_id.clone()]);

        assert_eq!(store.reap(), 1, "only the superseded artifact is reaped");
        assert!(matches!(
            store.retrieve(&first.artifact_id),
            Err(ArtifactError::NotFound(_))
        ));
        assert!(store.retrieve(&second.artifact_id).is_ok());
    }

    #[test]
    fn pinned_artifacts_survive_reap_and_purge() {
        let (_dir, store) = store_with_retention(Duration::ZERO);

        let pinned = store
            .create_pinned(ArtifactKind::SynthesizedReply, b"call back later")
            .expect("create should succeed");
        store
            .create(ArtifactKind::SynthesizedReply, b"transient")
            .expect("create should succeed");

        assert_eq!(store.reap(), 1);
        assert_eq!(store.purge(), 0);
        assert!(store.retrieve(&pinned.artifact_id).is_ok());
    }
}
