// src/core/config_manager.rs
//! Unified configuration: optional config.yaml profile, overridden by environment variables

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use super::service_client::RetryPolicy;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_MS: u64 = 1000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 4000;

pub const API_URL_VAR: &str = "RECRUITER_API_URL";
pub const IDP_URL_VAR: &str = "IDENTITY_PROVIDER_URL";
pub const IDP_KEY_VAR: &str = "IDENTITY_PROVIDER_ANON_KEY";
pub const ACCESS_TOKEN_VAR: &str = "RECRUITER_ACCESS_TOKEN";
const MAX_ATTEMPTS_VAR: &str = "RECRUITER_MAX_ATTEMPTS";
const RETRY_BASE_VAR: &str = "RECRUITER_RETRY_BASE_MS";
const TIMEOUT_VAR: &str = "RECRUITER_TIMEOUT_SECS";
const POLL_INTERVAL_VAR: &str = "RECRUITER_POLL_INTERVAL_MS";

#[derive(Debug, Clone)]
pub struct ConfigManager {
    pub service: ServiceConfig,
    pub identity: IdentityProviderConfig,
    pub messaging: MessagingConfig,
    pub environment: String,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub api_url: String,
    /// False when the URL fell back to the local development default.
    pub api_url_explicit: bool,
    pub timeout_seconds: u64,
    pub max_attempts: u32,
    pub retry_base_ms: u64,
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct IdentityProviderConfig {
    pub url: Option<String>,
    pub anon_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MessagingConfig {
    pub poll_interval_ms: u64,
}

/// One profile of config.yaml. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
struct ProfileFile {
    api_url: Option<String>,
    identity_provider_url: Option<String>,
    identity_provider_anon_key: Option<String>,
    timeout_seconds: Option<u64>,
    max_attempts: Option<u32>,
    retry_base_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    local: ProfileFile,
    #[serde(default)]
    production: ProfileFile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvStatus {
    Ok,
    MissingIdentityProvider,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentReport {
    pub ok: bool,
    pub missing: Vec<&'static str>,
    pub invalid: Vec<&'static str>,
}

impl ConfigManager {
    /// Load from ./config.yaml (if present) and the process environment
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config.yaml"), |key| std::env::var(key).ok())
    }

    pub fn load_from<F>(config_path: &Path, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| "local".to_string());
        info!("Loading configuration for environment: {}", environment);

        let profile = if config_path.exists() {
            Self::read_profile(config_path, &environment)?
        } else {
            ProfileFile::default()
        };

        let explicit_url = lookup(API_URL_VAR).or(profile.api_url);
        let api_url_explicit = explicit_url.is_some();
        let api_url = explicit_url
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
            .trim()
            .trim_end_matches('/')
            .to_string();
        if !api_url_explicit {
            warn!(
                "{} not set; using default {}",
                API_URL_VAR, DEFAULT_API_URL
            );
        }

        let service = ServiceConfig {
            api_url,
            api_url_explicit,
            timeout_seconds: parse_var(&lookup, TIMEOUT_VAR)?
                .or(profile.timeout_seconds)
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
            max_attempts: parse_var(&lookup, MAX_ATTEMPTS_VAR)?
                .or(profile.max_attempts)
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
            retry_base_ms: parse_var(&lookup, RETRY_BASE_VAR)?
                .or(profile.retry_base_ms)
                .unwrap_or(DEFAULT_RETRY_BASE_MS),
            access_token: lookup(ACCESS_TOKEN_VAR),
        };

        let identity = IdentityProviderConfig {
            url: lookup(IDP_URL_VAR).or(profile.identity_provider_url),
            anon_key: lookup(IDP_KEY_VAR).or(profile.identity_provider_anon_key),
        };

        let messaging = MessagingConfig {
            poll_interval_ms: parse_var(&lookup, POLL_INTERVAL_VAR)?
                .or(profile.poll_interval_ms)
                .unwrap_or(DEFAULT_POLL_INTERVAL_MS),
        };

        Ok(Self {
            service,
            identity,
            messaging,
            environment,
        })
    }

    fn read_profile(config_path: &Path, environment: &str) -> Result<ProfileFile> {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        let file: ConfigFile = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        Ok(match environment {
            "production" => file.production,
            _ => file.local,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.service.max_attempts,
            base_delay: Duration::from_millis(self.service.retry_base_ms),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.service.timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.messaging.poll_interval_ms)
    }

    pub fn env_status(&self) -> EnvStatus {
        if self.identity.url.is_some() && self.identity.anon_key.is_some() {
            EnvStatus::Ok
        } else {
            EnvStatus::MissingIdentityProvider
        }
    }

    /// Banner text for a missing identity provider; empty when configured.
    pub fn setup_message(&self) -> String {
        match self.env_status() {
            EnvStatus::MissingIdentityProvider => format!(
                "Identity provider not configured. Set {} and {} (or add them to config.yaml).",
                IDP_URL_VAR, IDP_KEY_VAR
            ),
            EnvStatus::Ok => String::new(),
        }
    }

    /// Required settings that are missing, plus any setting still holding a template placeholder
    pub fn validate_environment(&self) -> EnvironmentReport {
        let required = [
            (IDP_URL_VAR, self.identity.url.as_deref()),
            (IDP_KEY_VAR, self.identity.anon_key.as_deref()),
        ];
        let optional = [(
            API_URL_VAR,
            Some(self.service.api_url.as_str()).filter(|_| self.service.api_url_explicit),
        )];

        let mut missing = Vec::new();
        let mut invalid = Vec::new();
        for (name, value) in required {
            match value {
                None => missing.push(name),
                Some(v) if is_placeholder(v) => invalid.push(name),
                Some(_) => {}
            }
        }
        for (name, value) in optional {
            if value.map(is_placeholder).unwrap_or(false) {
                invalid.push(name);
            }
        }

        EnvironmentReport {
            ok: missing.is_empty() && invalid.is_empty(),
            missing,
            invalid,
        }
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("{} must be a number, got '{}'", key, raw))
        })
        .transpose()
}

fn is_placeholder(value: &str) -> bool {
    value.contains("your_") || value.contains("paste_") || value == "xxx"
}
