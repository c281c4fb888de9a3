//! Health probing - decides when a launched service is ready

use crate::core::ReadinessPolicy;
use crate::execution::process::ServiceHandle;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::debug;

/// Error types for health checks
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("GET {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("GET {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("service not ready after {}ms ({attempts} attempts), last error: {last_error}", waited.as_millis())]
    ReadinessTimeout {
        waited: Duration,
        attempts: usize,
        last_error: String,
    },

    #[error("service exited before becoming ready (exit code {code:?})")]
    ServiceExited { code: Option<i32> },
}

/// A single health check against a URL
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Returns the HTTP status on success (2xx)
    async fn check(&self, url: &str) -> Result<u16, ProbeError>;
}

/// Health probe over HTTP GET
#[derive(Debug, Clone)]
pub struct HttpProbe {
    http: Client,
}

impl HttpProbe {
    /// Create a probe whose individual requests give up after `request_timeout`
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("nia-pipeline/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { http })
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn check(&self, url: &str) -> Result<u16, ProbeError> {
        let response = self.http.get(url).send().await.map_err(|e| ProbeError::Request {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let status = response.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(ProbeError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            })
        }
    }
}

/// How the service became ready
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReport {
    pub status: u16,
    pub attempts: usize,
    pub waited: Duration,
}

/// Wait until `url` answers, following `policy`
///
/// The service handle is polled between attempts so a crashed service
/// fails fast instead of running out the clock.
pub async fn wait_until_ready<P>(
    probe: &P,
    url: &str,
    policy: ReadinessPolicy,
    service: &mut dyn ServiceHandle,
) -> Result<ProbeReport, ProbeError>
where
    P: HealthProbe + ?Sized,
{
    let started = Instant::now();

    match policy {
        ReadinessPolicy::FixedDelay { delay } => {
            sleep(delay).await;
            if let Some(exit) = service.exited() {
                return Err(ProbeError::ServiceExited { code: exit.code });
            }
            let status = probe.check(url).await?;
            Ok(ProbeReport {
                status,
                attempts: 1,
                waited: started.elapsed(),
            })
        }
        ReadinessPolicy::Poll { interval, timeout } => {
            let deadline = started + timeout;
            let mut attempts = 0;
            let mut last_error = String::from("no attempt made");

            loop {
                if let Some(exit) = service.exited() {
                    return Err(ProbeError::ServiceExited { code: exit.code });
                }

                attempts += 1;
                match timeout_at(deadline, probe.check(url)).await {
                    Ok(Ok(status)) => {
                        return Ok(ProbeReport {
                            status,
                            attempts,
                            waited: started.elapsed(),
                        });
                    }
                    Ok(Err(e)) => {
                        debug!("Probe attempt {} for {} failed: {}", attempts, url, e);
                        last_error = e.to_string();
                    }
                    Err(_) => {
                        last_error = format!("GET {} still pending at deadline", url);
                    }
                }

                let now = Instant::now();
                if now >= deadline {
                    return Err(ProbeError::ReadinessTimeout {
                        waited: now - started,
                        attempts,
                        last_error,
                    });
                }
                sleep(interval.min(deadline - now)).await;
            }
        }
    }
}
