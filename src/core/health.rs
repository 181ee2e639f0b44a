// src/core/health.rs
//! Backend and identity-provider status report, used by the status view and `health` command

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use super::config_manager::{ConfigManager, EnvStatus};
use super::connectivity::ConnectionStatus;
use super::error::ClientError;
use super::service_client::ServiceClient;

const HEALTH_ENDPOINT: &str = "/health";
const DEBUG_CONFIG_ENDPOINT: &str = "/debug/config";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallHealth {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Healthy,
    Error,
    Missing,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub status: ServiceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub timestamp: DateTime<Utc>,
    pub status: OverallHealth,
    pub backend: ServiceHealth,
    /// Presence flags the backend reports about its own configuration (dev only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_config: Option<BTreeMap<String, bool>>,
    pub identity_provider: ServiceHealth,
    pub connection: ConnectionStatus,
}

#[derive(Debug, Deserialize)]
struct HealthBody {
    status: Option<String>,
}

pub async fn check_health(client: &ServiceClient, config: &ConfigManager) -> HealthReport {
    let backend = match client.get::<HealthBody>(HEALTH_ENDPOINT, None).await {
        Ok(body) if body.status.as_deref() == Some("ok") => ServiceHealth {
            status: ServiceState::Healthy,
            message: None,
        },
        Ok(_) => ServiceHealth {
            status: ServiceState::Error,
            message: Some("Unexpected response".to_string()),
        },
        Err(ClientError::RequestFailed { status, .. }) => ServiceHealth {
            status: ServiceState::Error,
            message: Some(format!("HTTP {}", status)),
        },
        Err(e) => ServiceHealth {
            status: ServiceState::Error,
            message: Some(e.to_string()),
        },
    };

    // Missing in production; absence is not an error.
    let backend_config = if backend.status == ServiceState::Healthy {
        client
            .get::<BTreeMap<String, bool>>(DEBUG_CONFIG_ENDPOINT, None)
            .await
            .ok()
    } else {
        None
    };

    let identity_provider = match config.env_status() {
        EnvStatus::Ok => ServiceHealth {
            status: ServiceState::Healthy,
            message: None,
        },
        EnvStatus::MissingIdentityProvider => ServiceHealth {
            status: ServiceState::Missing,
            message: Some(config.setup_message()),
        },
    };

    let status = overall(&backend, &identity_provider);
    info!("Health check: {:?}", status);

    HealthReport {
        timestamp: Utc::now(),
        status,
        backend,
        backend_config,
        identity_provider,
        connection: client.connection_status(),
    }
}

fn overall(backend: &ServiceHealth, identity_provider: &ServiceHealth) -> OverallHealth {
    if backend.status == ServiceState::Healthy && identity_provider.status != ServiceState::Missing
    {
        OverallHealth::Healthy
    } else {
        OverallHealth::Degraded
    }
}
