// ABOUTME: Post-deploy health probes: HTTP GET over hyper, or filesystem existence.
// ABOUTME: check() runs a fixed number of probes with fixed backoff.

use http_body_util::Empty;
use hyper::Uri;
use hyper_util::rt::TokioIo;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::TcpStream;

use crate::deploy::{HealthCheck, ProbeTarget};

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("invalid health check url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("connection to {address} failed: {source}")]
    Connect {
        address: String,
        source: std::io::Error,
    },

    #[error("http error: {0}")]
    Http(#[from] hyper::Error),

    #[error("unhealthy status {0}")]
    Status(u16),

    #[error("probe timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("{} does not exist", .0.display())]
    Missing(PathBuf),

    #[error("{} is empty", .0.display())]
    Empty(PathBuf),
}

/// Outcome of a failed [`check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheckFailure {
    pub attempts: u32,
    pub last_error: String,
}

impl std::fmt::Display for HealthCheckFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unhealthy after {} attempt(s): {}",
            self.attempts, self.last_error
        )
    }
}

/// Probe until healthy or out of retries. Returns the attempt that succeeded.
pub async fn check(health: &HealthCheck) -> Result<u32, HealthCheckFailure> {
    if !health.start_period.is_zero() {
        tokio::time::sleep(health.start_period).await;
    }

    let mut last_error = String::new();
    for attempt in 1..=health.retries {
        match probe(&health.probe, health.timeout).await {
            Ok(()) => {
                tracing::debug!(probe = %health.probe, attempt, "health probe passed");
                return Ok(attempt);
            }
            Err(e) => {
                tracing::warn!(
                    probe = %health.probe,
                    attempt,
                    retries = health.retries,
                    error = %e,
                    "health probe failed"
                );
                last_error = e.to_string();
            }
        }
        if attempt < health.retries {
            tokio::time::sleep(health.interval).await;
        }
    }

    Err(HealthCheckFailure {
        attempts: health.retries,
        last_error,
    })
}

/// Run a single probe.
pub async fn probe(target: &ProbeTarget, timeout: Duration) -> Result<(), ProbeError> {
    match target {
        ProbeTarget::Http(url) => {
            tokio::time::timeout(timeout, http_probe(url))
                .await
                .map_err(|_| ProbeError::Timeout(timeout))??;
            Ok(())
        }
        ProbeTarget::File(path) => file_probe(path),
    }
}

/// GET `url`; any 2xx is healthy. Plain HTTP only: probes target local upstreams.
pub async fn http_probe(url: &str) -> Result<u16, ProbeError> {
    let invalid = |reason: &str| ProbeError::InvalidUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let uri: Uri = url.parse().map_err(|_| invalid("not a valid URI"))?;
    if uri.scheme_str() != Some("http") {
        return Err(invalid("only http:// is supported"));
    }
    let host = uri.host().ok_or_else(|| invalid("missing host"))?;
    let port = uri.port_u16().unwrap_or(80);
    let address = format!("{host}:{port}");
    let path = uri
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/");

    let stream = TcpStream::connect(&address)
        .await
        .map_err(|source| ProbeError::Connect {
            address: address.clone(),
            source,
        })?;
    let io = TokioIo::new(stream);

    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!(error = %e, "health probe connection closed");
        }
    });

    let req = hyper::Request::builder()
        .method("GET")
        .uri(path)
        .header("Host", &address)
        .header("User-Agent", concat!("rollout/", env!("CARGO_PKG_VERSION")))
        .body(Empty::<bytes::Bytes>::new())
        .map_err(|e| invalid(&e.to_string()))?;

    let resp = sender.send_request(req).await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(ProbeError::Status(status.as_u16()));
    }
    Ok(status.as_u16())
}

/// The path exists; directories must also be non-empty.
pub fn file_probe(path: &Path) -> Result<(), ProbeError> {
    let meta = std::fs::metadata(path).map_err(|_| ProbeError::Missing(path.to_path_buf()))?;
    if meta.is_dir() && !crate::deploy::fs::is_non_empty_dir(path) {
        return Err(ProbeError::Empty(path.to_path_buf()));
    }
    Ok(())
}
