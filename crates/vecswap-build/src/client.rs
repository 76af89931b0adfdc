//! HTTP clients for the build-job service and the index probe.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, info};

use vecswap_core::{BuildConfig, IndexKind};

use crate::error::{BuildError, BuildResult};
use crate::policy::{CircuitBreaker, RetryPolicy};

pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Work order sent to the build-job service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildJob {
    pub version_id: String,
    pub index_kind: IndexKind,
    pub dimensions: u32,
    pub embedding_source: Option<String>,
    pub expected_vector_count: Option<u64>,
    /// Path the job service POSTs the result to.
    pub callback_path: String,
}

/// Result of querying a version in isolation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub queries: u32,
    pub failures: u32,
    pub p95_latency_ms: f64,
}

/// Hands build jobs to whatever performs them.
pub trait BuildExecutor: Send + Sync {
    fn submit(&self, job: BuildJob) -> BoxFuture<'_, BuildResult<()>>;
}

/// Runs sample queries against one version without routing live traffic to it.
pub trait IndexProbe: Send + Sync {
    fn benchmark(&self, version_id: &str, queries: u32) -> BoxFuture<'_, BuildResult<BenchmarkReport>>;
}

/// POST a JSON body and decode the JSON response.
pub async fn post_json<B, R>(address: &str, path: &str, body: &B, timeout: Duration) -> BuildResult<R>
where
    B: Serialize,
    R: DeserializeOwned,
{
    let uri = format!("http://{address}{path}");
    let payload = serde_json::to_vec(body).map_err(|e| BuildError::Request {
        uri: uri.clone(),
        reason: e.to_string(),
    })?;

    let exchange = async {
        let stream = tokio::net::TcpStream::connect(address)
            .await
            .map_err(|e| BuildError::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| BuildError::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            })?;

        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("POST")
            .uri(&uri)
            .header("host", address)
            .header("content-type", "application/json")
            .header("user-agent", "vecswap/0.1")
            .body(Full::new(Bytes::from(payload)))
            .map_err(|e| BuildError::Request {
                uri: uri.clone(),
                reason: e.to_string(),
            })?;

        let resp = sender.send_request(req).await.map_err(|e| BuildError::Request {
            uri: uri.clone(),
            reason: e.to_string(),
        })?;
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| BuildError::Request {
                uri: uri.clone(),
                reason: e.to_string(),
            })?
            .to_bytes();

        if !status.is_success() {
            return Err(BuildError::Status {
                uri: uri.clone(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let raw: &[u8] = if body.is_empty() { b"null" } else { &body };
        serde_json::from_slice(raw).map_err(|e| BuildError::Decode {
            uri: uri.clone(),
            reason: e.to_string(),
        })
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => {
            debug!(%uri, "request timed out");
            Err(BuildError::Timeout { uri })
        }
    }
}

/// Submits jobs over HTTP behind a retry policy and a circuit breaker.
pub struct HttpBuildExecutor {
    address: String,
    timeout: Duration,
    retry: RetryPolicy,
    circuit: CircuitBreaker,
}

impl HttpBuildExecutor {
    pub fn new(address: &str, timeout: Duration, retry: RetryPolicy, circuit: CircuitBreaker) -> Self {
        Self {
            address: address.to_string(),
            timeout,
            retry,
            circuit,
        }
    }

    /// `None` when no job service is configured.
    pub fn from_config(config: &BuildConfig) -> Option<Self> {
        let address = config.job_address.as_deref()?;
        Some(Self::new(
            address,
            Duration::from_millis(config.request_timeout_ms),
            RetryPolicy::from_config(&config.retry),
            CircuitBreaker::from_config(&config.circuit),
        ))
    }

    pub fn circuit(&self) -> &CircuitBreaker {
        &self.circuit
    }
}

impl BuildExecutor for HttpBuildExecutor {
    fn submit(&self, job: BuildJob) -> BoxFuture<'_, BuildResult<()>> {
        Box::pin(async move {
            self.circuit
                .call(self.retry.execute("build submit", || {
                    post_json::<_, serde_json::Value>(&self.address, "/jobs/index-build", &job, self.timeout)
                }))
                .await?;
            info!(version = %job.version_id, address = %self.address, "build job submitted");
            Ok(())
        })
    }
}

/// Accepts jobs without forwarding them; an operator or external system
/// performs the build and posts the result back.
pub struct DetachedExecutor;

impl BuildExecutor for DetachedExecutor {
    fn submit(&self, job: BuildJob) -> BoxFuture<'_, BuildResult<()>> {
        Box::pin(async move {
            info!(
                version = %job.version_id,
                callback = %job.callback_path,
                "no build service configured, awaiting external build result"
            );
            Ok(())
        })
    }
}

#[derive(Serialize)]
struct BenchmarkRequest<'a> {
    version_id: &'a str,
    queries: u32,
}

pub struct HttpIndexProbe {
    address: String,
    timeout: Duration,
}

impl HttpIndexProbe {
    pub fn new(address: &str, timeout: Duration) -> Self {
        Self {
            address: address.to_string(),
            timeout,
        }
    }

    pub fn from_config(config: &BuildConfig) -> Option<Arc<dyn IndexProbe>> {
        let address = config.probe_address.as_deref()?;
        Some(Arc::new(Self::new(
            address,
            Duration::from_millis(config.request_timeout_ms),
        )))
    }
}

impl IndexProbe for HttpIndexProbe {
    fn benchmark(&self, version_id: &str, queries: u32) -> BoxFuture<'_, BuildResult<BenchmarkReport>> {
        let request = BenchmarkRequest {
            version_id,
            queries,
        };
        let body = serde_json::to_value(&request);
        Box::pin(async move {
            let body = body.map_err(|e| BuildError::Request {
                uri: format!("http://{}/benchmark", self.address),
                reason: e.to_string(),
            })?;
            post_json(&self.address, "/benchmark", &body, self.timeout).await
        })
    }
}
