//! Build coordinator — registers build requests and applies job results.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use vecswap_core::{IndexKind, epoch_secs};
use vecswap_state::{BuildStats, IndexVersion, RegistryError, VersionRegistry};

use crate::client::{BuildExecutor, BuildJob};
use crate::error::BuildError;

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("submitting build for {version_id} failed: {source}")]
    Submit {
        version_id: String,
        #[source]
        source: BuildError,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRequest {
    #[serde(default)]
    pub embedding_source: Option<String>,
    pub index_kind: IndexKind,
    #[serde(default)]
    pub expected_vector_count: Option<u64>,
}

/// Completion report posted by the build-job service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildOutcome {
    pub success: bool,
    #[serde(default)]
    pub vector_count: u64,
    #[serde(default)]
    pub expected_vector_count: Option<u64>,
    #[serde(default)]
    pub memory_bytes: u64,
    #[serde(default)]
    pub build_duration_ms: u64,
    #[serde(default)]
    pub error: Option<String>,
}

pub struct BuildCoordinator {
    registry: Arc<VersionRegistry>,
    executor: Arc<dyn BuildExecutor>,
    dimensions: u32,
    /// Serializes id allocation with registration.
    allocate: Mutex<()>,
}

impl BuildCoordinator {
    pub fn new(registry: Arc<VersionRegistry>, executor: Arc<dyn BuildExecutor>, dimensions: u32) -> Self {
        Self {
            registry,
            executor,
            dimensions,
            allocate: Mutex::new(()),
        }
    }

    /// Register the next version as `Building` and hand the job to the executor.
    ///
    /// If the job cannot be submitted the version is marked `Failed`.
    pub async fn request_build(&self, request: BuildRequest) -> Result<IndexVersion, CoordinatorError> {
        let version = {
            let _guard = self.allocate.lock().await;
            let id = self.registry.next_version_id()?;
            let version = IndexVersion {
                embedding_source: request.embedding_source.clone(),
                expected_vector_count: request.expected_vector_count,
                ..IndexVersion::building(&id, request.index_kind, self.dimensions, epoch_secs())
            };
            self.registry.register(version.clone())?;
            version
        };

        let job = BuildJob {
            version_id: version.id.clone(),
            index_kind: version.index_kind,
            dimensions: version.dimensions,
            embedding_source: version.embedding_source.clone(),
            expected_vector_count: version.expected_vector_count,
            callback_path: format!("/api/v1/index/versions/{}/build-result", version.id),
        };

        if let Err(source) = self.executor.submit(job).await {
            warn!(version = %version.id, error = %source, "build submission failed");
            self.registry.fail_build(&version.id, &source.to_string())?;
            return Err(CoordinatorError::Submit {
                version_id: version.id,
                source,
            });
        }

        info!(version = %version.id, kind = %version.index_kind, "build requested");
        Ok(version)
    }

    /// Apply a build result reported by the job service.
    pub fn complete(&self, version_id: &str, outcome: BuildOutcome) -> Result<IndexVersion, CoordinatorError> {
        let version = if outcome.success {
            let current = self.registry.get(version_id)?;
            let stats = BuildStats {
                vector_count: outcome.vector_count,
                expected_vector_count: outcome.expected_vector_count.or(current.expected_vector_count),
                memory_bytes: outcome.memory_bytes,
                build_duration_ms: outcome.build_duration_ms,
            };
            self.registry.complete_build(version_id, &stats)?
        } else {
            let reason = outcome.error.as_deref().unwrap_or("build failed");
            self.registry.fail_build(version_id, reason)?
        };
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::BoxFuture;
    use crate::error::BuildResult;
    use std::sync::Mutex as StdMutex;
    use vecswap_state::{MemoryRepository, VersionStatus};

    #[derive(Default)]
    struct RecordingExecutor {
        jobs: StdMutex<Vec<BuildJob>>,
        fail: bool,
    }

    impl BuildExecutor for RecordingExecutor {
        fn submit(&self, job: BuildJob) -> BoxFuture<'_, BuildResult<()>> {
            Box::pin(async move {
                if self.fail {
                    return Err(BuildError::CircuitOpen { retry_after_secs: 10 });
                }
                self.jobs.lock().unwrap().push(job);
                Ok(())
            })
        }
    }

    fn coordinator(executor: Arc<RecordingExecutor>) -> (BuildCoordinator, Arc<VersionRegistry>) {
        let registry = Arc::new(VersionRegistry::new(Arc::new(MemoryRepository::new())));
        registry
            .bootstrap(IndexVersion::building("v1", IndexKind::Flat, 384, 0))
            .unwrap();
        (BuildCoordinator::new(registry.clone(), executor, 384), registry)
    }

    fn request() -> BuildRequest {
        BuildRequest {
            embedding_source: Some("s3://corpus".into()),
            index_kind: IndexKind::InvertedFile,
            expected_vector_count: Some(600_000),
        }
    }

    #[tokio::test]
    async fn request_build_registers_next_version() {
        let executor = Arc::new(RecordingExecutor::default());
        let (coord, registry) = coordinator(executor.clone());

        let version = coord.request_build(request()).await.unwrap();
        assert_eq!(version.id, "v2");
        assert_eq!(version.status, VersionStatus::Building);
        assert_eq!(version.dimensions, 384);
        assert_eq!(registry.get("v2").unwrap().embedding_source.as_deref(), Some("s3://corpus"));

        let jobs = executor.jobs.lock().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].callback_path, "/api/v1/index/versions/v2/build-result");
    }

    #[tokio::test]
    async fn concurrent_requests_get_distinct_ids() {
        let executor = Arc::new(RecordingExecutor::default());
        let (coord, _) = coordinator(executor);
        let coord = Arc::new(coord);

        let a = tokio::spawn({
            let coord = coord.clone();
            async move { coord.request_build(request()).await.unwrap().id }
        });
        let b = tokio::spawn({
            let coord = coord.clone();
            async move { coord.request_build(request()).await.unwrap().id }
        });
        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn failed_submission_marks_version_failed() {
        let executor = Arc::new(RecordingExecutor {
            fail: true,
            ..Default::default()
        });
        let (coord, registry) = coordinator(executor);

        let err = coord.request_build(request()).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Submit { ref version_id, .. } if version_id == "v2"));
        assert_eq!(registry.get("v2").unwrap().status, VersionStatus::Failed);
    }

    #[tokio::test]
    async fn successful_outcome_makes_version_ready() {
        let executor = Arc::new(RecordingExecutor::default());
        let (coord, _) = coordinator(executor);
        coord.request_build(request()).await.unwrap();

        let version = coord
            .complete(
                "v2",
                BuildOutcome {
                    success: true,
                    vector_count: 600_000,
                    expected_vector_count: None,
                    memory_bytes: 1 << 30,
                    build_duration_ms: 42_000,
                    error: None,
                },
            )
            .unwrap();
        assert_eq!(version.status, VersionStatus::Ready);
        assert_eq!(version.expected_vector_count, Some(600_000));
        assert_eq!(version.build_duration_ms, 42_000);
    }

    #[tokio::test]
    async fn failed_outcome_records_error() {
        let executor = Arc::new(RecordingExecutor::default());
        let (coord, _) = coordinator(executor);
        coord.request_build(request()).await.unwrap();

        let outcome: BuildOutcome =
            serde_json::from_str(r#"{"success": false, "error": "out of memory"}"#).unwrap();
        let version = coord.complete("v2", outcome).unwrap();
        assert_eq!(version.status, VersionStatus::Failed);
        assert_eq!(version.failure_reason.as_deref(), Some("out of memory"));
    }

    #[test]
    fn outcome_for_unknown_version_is_not_found() {
        let executor = Arc::new(RecordingExecutor::default());
        let (coord, _) = coordinator(executor);
        let outcome = BuildOutcome {
            success: false,
            vector_count: 0,
            expected_vector_count: None,
            memory_bytes: 0,
            build_duration_ms: 0,
            error: None,
        };
        assert!(matches!(
            coord.complete("v9", outcome),
            Err(CoordinatorError::Registry(RegistryError::NotFound(_)))
        ));
    }
}
