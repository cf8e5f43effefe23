use crate::infrastructure::error::InfraError;
use chrono_tz::Tz;
use std::fs;
use std::path::Path;
use std::time::Duration;
use url::Url;

const APP_JSON: &str = "app.json";
const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_TIMEOUT_SECONDS: u64 = 15;
const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 300;
const DEFAULT_KEYRING_SERVICE: &str = "worktime.session";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialBackend {
    Keyring,
    Sqlite,
}

impl CredentialBackend {
    fn parse(value: &str) -> Result<Self, InfraError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "keyring" => Ok(Self::Keyring),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(InfraError::InvalidConfig(format!(
                "unsupported credentialBackend: {other} (expected keyring or sqlite)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppSettings {
    pub api_base_url: Url,
    pub timezone: Tz,
    pub request_timeout: Duration,
    pub access_token_ttl_seconds: i64,
    pub credential_backend: CredentialBackend,
    pub keyring_service: String,
}

fn default_app_config() -> serde_json::Value {
    serde_json::json!({
        "schema": 1,
        "apiBaseUrl": DEFAULT_API_BASE_URL,
        "timezone": "UTC",
        "requestTimeoutSeconds": DEFAULT_TIMEOUT_SECONDS,
        "accessTokenTtlSeconds": DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
        "credentialBackend": "keyring",
        "keyringService": DEFAULT_KEYRING_SERVICE
    })
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    let path = config_dir.join(APP_JSON);
    if !path.exists() {
        let formatted = serde_json::to_string_pretty(&default_app_config())?;
        fs::write(path, format!("{formatted}\n"))?;
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

pub fn load_settings(config_dir: &Path) -> Result<AppSettings, InfraError> {
    load_settings_with_lookup(config_dir, |key| std::env::var(key).ok())
}

pub fn load_settings_with_lookup<F>(config_dir: &Path, lookup: F) -> Result<AppSettings, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    let app = read_config(&config_dir.join(APP_JSON))?;

    let api_base_url = optional_lookup_value(&lookup, "WORKTIME_API_BASE_URL")
        .or_else(|| string_field(&app, "apiBaseUrl"))
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
    let api_base_url = parse_base_url(&api_base_url)?;

    let timezone = match string_field(&app, "timezone") {
        Some(raw) => raw
            .parse::<Tz>()
            .map_err(|error| InfraError::InvalidConfig(format!("invalid timezone '{raw}': {error}")))?,
        None => Tz::UTC,
    };

    let timeout_seconds = match optional_lookup_value(&lookup, "WORKTIME_TIMEOUT_SECONDS") {
        Some(raw) => raw.parse::<u64>().map_err(|error| {
            InfraError::InvalidConfig(format!("WORKTIME_TIMEOUT_SECONDS must be an integer: {error}"))
        })?,
        None => app
            .get("requestTimeoutSeconds")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_SECONDS),
    };
    if timeout_seconds == 0 {
        return Err(InfraError::InvalidConfig(
            "requestTimeoutSeconds must be greater than 0".to_string(),
        ));
    }

    let access_token_ttl_seconds = app
        .get("accessTokenTtlSeconds")
        .and_then(serde_json::Value::as_i64)
        .unwrap_or(DEFAULT_ACCESS_TOKEN_TTL_SECONDS)
        .max(1);

    let credential_backend = match optional_lookup_value(&lookup, "WORKTIME_CREDENTIAL_BACKEND")
        .or_else(|| string_field(&app, "credentialBackend"))
    {
        Some(raw) => CredentialBackend::parse(&raw)?,
        None => CredentialBackend::Keyring,
    };

    let keyring_service = string_field(&app, "keyringService")
        .unwrap_or_else(|| DEFAULT_KEYRING_SERVICE.to_string());

    Ok(AppSettings {
        api_base_url,
        timezone,
        request_timeout: Duration::from_secs(timeout_seconds),
        access_token_ttl_seconds,
        credential_backend,
        keyring_service,
    })
}

/// Parses the API root, forcing a trailing slash so relative paths join under it.
pub fn parse_base_url(raw: &str) -> Result<Url, InfraError> {
    let trimmed = raw.trim();
    let normalized = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    let url = Url::parse(&normalized)
        .map_err(|error| InfraError::InvalidConfig(format!("invalid apiBaseUrl '{trimmed}': {error}")))?;
    if url.cannot_be_a_base() {
        return Err(InfraError::InvalidConfig(format!(
            "apiBaseUrl cannot be a base: {trimmed}"
        )));
    }
    Ok(url)
}

fn string_field(value: &serde_json::Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn optional_lookup_value<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
