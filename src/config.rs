use std::env;

use anyhow::{anyhow, Context, Result};
use regex::Regex;

/// Pattern every webhook URL must match unless overridden.
pub const DEFAULT_WEBHOOK_PATTERN: &str = r"^https://hook\.eu\d+\.make\.com/.+";

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Technician actions (`/api/webhook-respuesta`).
    pub technician: Option<String>,
    /// Supervisor actions (`/api/webhook-supervisor`).
    pub supervisor: Option<String>,
    /// Supervisor PIN validation (`/api/validate-pin`).
    pub validate_pin: Option<String>,
    pub url_pattern: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub webhooks: WebhookConfig,
    pub allow_demo_incidents: bool,
    pub local_simulation: bool,
    pub simulation_pin: String,
    pub upstream_timeout_ms: u64,
    pub max_request_bytes: usize,
    pub dev_mode: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            webhooks: WebhookConfig {
                technician: None,
                supervisor: None,
                validate_pin: None,
                url_pattern: DEFAULT_WEBHOOK_PATTERN.to_string(),
            },
            allow_demo_incidents: false,
            local_simulation: false,
            simulation_pin: "1234".to_string(),
            upstream_timeout_ms: 8_000,
            max_request_bytes: 1024 * 1024,
            dev_mode: false,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let webhooks = WebhookConfig {
            technician: parse_optional_string("MAKE_WEBHOOK_RESPUESTA"),
            supervisor: parse_optional_string("MAKE_WEBHOOK_SUPERVISOR"),
            validate_pin: parse_optional_string("MAKE_WEBHOOK_VALIDATE_PIN"),
            url_pattern: parse_optional_string("RELAY_WEBHOOK_PATTERN")
                .unwrap_or(defaults.webhooks.url_pattern),
        };

        let config = Self {
            webhooks,
            allow_demo_incidents: parse_bool_env("ALLOW_DEMO_INCIDENTS")?.unwrap_or(false),
            local_simulation: parse_bool_env("RELAY_LOCAL_SIMULATION")?.unwrap_or(false),
            simulation_pin: parse_optional_string("RELAY_SIMULATION_PIN")
                .unwrap_or(defaults.simulation_pin),
            upstream_timeout_ms: parse_optional_u64("RELAY_UPSTREAM_TIMEOUT_MS")?
                .unwrap_or(defaults.upstream_timeout_ms),
            max_request_bytes: parse_optional_u64("RELAY_MAX_REQUEST_BYTES")?
                .map(|v| v as usize)
                .unwrap_or(defaults.max_request_bytes),
            dev_mode: parse_bool_env("RELAY_DEV_MODE")?.unwrap_or(false),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every configured webhook URL against the expected pattern.
    /// Unset webhooks are allowed here; the handlers report them per request.
    pub fn validate(&self) -> Result<()> {
        let pattern = Regex::new(&self.webhooks.url_pattern).with_context(|| {
            format!(
                "RELAY_WEBHOOK_PATTERN '{}' is not a valid regular expression",
                self.webhooks.url_pattern
            )
        })?;
        let entries = [
            ("MAKE_WEBHOOK_RESPUESTA", &self.webhooks.technician),
            ("MAKE_WEBHOOK_SUPERVISOR", &self.webhooks.supervisor),
            ("MAKE_WEBHOOK_VALIDATE_PIN", &self.webhooks.validate_pin),
        ];
        for (var, url) in entries {
            if let Some(url) = url {
                if !pattern.is_match(url) {
                    return Err(anyhow!(
                        "{} '{}' does not match the expected webhook format {}",
                        var,
                        url,
                        self.webhooks.url_pattern
                    ));
                }
            }
        }
        if self.upstream_timeout_ms == 0 {
            return Err(anyhow!("RELAY_UPSTREAM_TIMEOUT_MS must be greater than zero"));
        }
        Ok(())
    }
}

fn parse_optional_string(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool_env(var: &str) -> Result<Option<bool>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a boolean (true/false/1/0)", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
