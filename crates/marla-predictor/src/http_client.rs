//! HTTP client for the slowdown predictor service.
//!
//! Per cycle, for every node:
//! 1. `GET <metrics url>` → `{"metrics": [f64, ...]}` (the node's current
//!    hardware counters)
//! 2. for every candidate count, `POST <predictor>/predict` with
//!    `{"metrics": [...], "rps": int, "replicas": int}` →
//!    `{"slowdown": f64}`, the normalized performance score
//!
//! Failing to reach the predictor service fails the whole prediction.
//! A node whose metrics cannot be read, or a single rejected or
//! out-of-range answer, only drops the affected entries.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use bytes::Bytes;
use http::{Method, Request, Uri};
use http_body_util::{BodyExt, Full};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use marla_state::{NodeId, PerformanceTable};

use crate::error::{PredictorError, PredictorResult};
use crate::predictor::{PerformancePredictor, PredictFuture};

/// Predictor client configuration (the `[predictor]` config section).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictorSettings {
    /// Base URL of the predictor service.
    pub url: String,
    /// Per-node metrics endpoint overrides.
    pub metrics_urls: BTreeMap<NodeId, String>,
    /// Port used for `http://<node>:<port>/metrics` when a node has no override.
    pub metrics_port: u16,
    /// Bound on every individual HTTP exchange.
    pub timeout_ms: u64,
}

impl Default for PredictorSettings {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:5000".to_string(),
            metrics_urls: BTreeMap::new(),
            metrics_port: 8000,
            timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone)]
struct Endpoint {
    uri: Uri,
    /// `host:port` to connect to.
    address: String,
}

impl Endpoint {
    fn parse(url: &str) -> PredictorResult<Self> {
        let invalid = |reason: &str| PredictorError::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        };
        let uri: Uri = url.parse().map_err(|e: http::uri::InvalidUri| invalid(&e.to_string()))?;
        if uri.scheme_str() != Some("http") {
            return Err(invalid("only http:// endpoints are supported"));
        }
        let authority = uri.authority().ok_or_else(|| invalid("missing host"))?;
        let address = format!("{}:{}", authority.host(), authority.port_u16().unwrap_or(80));
        Ok(Self { uri, address })
    }
}

#[derive(Deserialize)]
struct MetricsResponse {
    metrics: Vec<f64>,
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    metrics: &'a [f64],
    replicas: u32,
    rps: i64,
}

#[derive(Deserialize)]
struct PredictResponse {
    slowdown: f64,
}

/// Client for the predictor and per-node metrics services.
#[derive(Debug, Clone)]
pub struct HttpPredictor {
    predict: Endpoint,
    metrics: Vec<(NodeId, Endpoint)>,
    timeout: Duration,
}

impl HttpPredictor {
    /// Build a client for `nodes`, in the given order.
    pub fn new(settings: &PredictorSettings, nodes: &[NodeId]) -> PredictorResult<Self> {
        let predict = Endpoint::parse(&format!("{}/predict", settings.url.trim_end_matches('/')))?;
        let metrics = nodes
            .iter()
            .map(|node| {
                let url = settings
                    .metrics_urls
                    .get(node)
                    .cloned()
                    .unwrap_or_else(|| format!("http://{node}:{}/metrics", settings.metrics_port));
                Endpoint::parse(&url).map(|endpoint| (node.clone(), endpoint))
            })
            .collect::<PredictorResult<Vec<_>>>()?;

        Ok(Self {
            predict,
            metrics,
            timeout: Duration::from_millis(settings.timeout_ms),
        })
    }

    async fn fetch_metrics(&self, endpoint: &Endpoint) -> PredictorResult<Vec<f64>> {
        let body = send(endpoint, Method::GET, Bytes::new(), self.timeout).await?;
        let parsed: MetricsResponse =
            serde_json::from_slice(&body).map_err(|e| PredictorError::Decode(e.to_string()))?;
        Ok(parsed.metrics)
    }

    async fn request_score(&self, metrics: &[f64], rate: f64, replicas: u32) -> PredictorResult<f64> {
        let request = PredictRequest {
            metrics,
            replicas,
            rps: rate.round() as i64,
        };
        let payload = serde_json::to_vec(&request).map_err(|e| PredictorError::Decode(e.to_string()))?;
        let body = send(&self.predict, Method::POST, Bytes::from(payload), self.timeout).await?;
        let parsed: PredictResponse =
            serde_json::from_slice(&body).map_err(|e| PredictorError::Decode(e.to_string()))?;
        Ok(parsed.slowdown)
    }

    async fn predict_table(&self, rate: f64, counts: &BTreeSet<u32>) -> PredictorResult<PerformanceTable> {
        let mut node_metrics = Vec::with_capacity(self.metrics.len());
        for (node, endpoint) in &self.metrics {
            match self.fetch_metrics(endpoint).await {
                Ok(metrics) => node_metrics.push((node, metrics)),
                Err(e) => warn!(node = %node, error = %e, "node metrics unavailable, node omitted from predictions"),
            }
        }

        let mut table = PerformanceTable::new();
        for &count in counts {
            for (node, metrics) in &node_metrics {
                match self.request_score(metrics, rate, count).await {
                    Ok(score) => {
                        if !table.insert(count, node.as_str(), score) {
                            warn!(node = %node, count, score, "prediction out of range, entry omitted");
                        }
                    }
                    Err(PredictorError::Unavailable(reason)) => {
                        return Err(PredictorError::Unavailable(reason));
                    }
                    Err(e) => warn!(node = %node, count, error = %e, "prediction rejected, entry omitted"),
                }
            }
        }

        debug!(rate, entries = table.len(), "performance table predicted");
        Ok(table)
    }
}

impl PerformancePredictor for HttpPredictor {
    fn predict<'a>(&'a self, rate: f64, counts: &'a BTreeSet<u32>) -> PredictFuture<'a> {
        Box::pin(self.predict_table(rate, counts))
    }
}

/// One HTTP/1 exchange on a fresh connection, bounded by `timeout`.
///
/// Connection, handshake, transport and timeout failures all map to
/// [`PredictorError::Unavailable`]; a non-2xx answer maps to
/// [`PredictorError::Status`].
async fn send(endpoint: &Endpoint, method: Method, body: Bytes, timeout: Duration) -> PredictorResult<Bytes> {
    let uri = endpoint.uri.to_string();
    let exchange = async {
        let stream = tokio::net::TcpStream::connect(&endpoint.address)
            .await
            .map_err(|e| PredictorError::Unavailable(format!("connect {}: {e}", endpoint.address)))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| PredictorError::Unavailable(format!("handshake {uri}: {e}")))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = Request::builder()
            .method(method)
            .uri(&endpoint.uri)
            .header("host", &endpoint.address)
            .header("user-agent", "marla-predictor/0.1")
            .header("content-type", "application/json")
            .body(Full::new(body))
            .map_err(|e| PredictorError::InvalidUrl {
                url: uri.clone(),
                reason: e.to_string(),
            })?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| PredictorError::Unavailable(format!("request {uri}: {e}")))?;

        let status = resp.status();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| PredictorError::Unavailable(format!("read body {uri}: {e}")))?
            .to_bytes();

        if !status.is_success() {
            debug!(status = %status, %uri, "endpoint returned non-2xx");
            return Err(PredictorError::Status {
                status: status.as_u16(),
            });
        }
        Ok(bytes)
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => Err(PredictorError::Unavailable(format!(
            "{uri} timed out after {timeout:?}"
        ))),
    }
}
