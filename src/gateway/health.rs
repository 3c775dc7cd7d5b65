use std::collections::BTreeMap;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};

/// Result of probing one upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

/// Aggregate liveness of all upstreams, recomputed per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub services: BTreeMap<String, ServiceHealth>,
}

impl HealthReport {
    pub fn from_services(services: BTreeMap<String, ServiceHealth>) -> Self {
        let status = if services.values().all(|s| s.ok) {
            HealthStatus::Ok
        } else {
            HealthStatus::Degraded
        };
        Self { status, services }
    }
}

/// HEAD `url`, giving up after `timeout`. Only a 2xx answer counts as up.
pub async fn probe(client: &reqwest::Client, url: &str, timeout: Duration) -> ServiceHealth {
    match tokio::time::timeout(timeout, client.head(url).send()).await {
        Ok(Ok(resp)) => {
            let status = resp.status();
            ServiceHealth {
                ok: status.is_success(),
                status: Some(status.as_u16()),
                error: None,
            }
        }
        Ok(Err(error)) => ServiceHealth {
            ok: false,
            status: None,
            error: Some(error.to_string()),
        },
        Err(_) => ServiceHealth {
            ok: false,
            status: None,
            error: Some(format!("timed out after {}ms", timeout.as_millis())),
        },
    }
}

/// Probe every `(name, url)` target concurrently.
pub async fn check(
    client: &reqwest::Client,
    targets: &[(&str, &str)],
    timeout: Duration,
) -> HealthReport {
    let probes = targets
        .iter()
        .map(|(name, url)| async move { (name.to_string(), probe(client, url, timeout).await) });
    let services = join_all(probes).await.into_iter().collect();
    let report = HealthReport::from_services(services);
    if report.status == HealthStatus::Degraded {
        tracing::warn!(services = ?report.services, "gateway health degraded");
    }
    report
}
