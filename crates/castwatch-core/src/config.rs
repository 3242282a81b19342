use crate::app_config::{AppConfig, DEFAULT_USER_AGENTS};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files — useful for testing
/// or when the caller manages env setup.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// This is the core parsing/validation logic, decoupled from the actual environment
/// so it can be tested with a pure `HashMap` lookup — no `set_var`/`remove_var` needed.
pub(crate) fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::path::PathBuf;

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<u32>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<u64>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let parse_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<usize>()
            .map_err(|e| ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: e.to_string(),
            })
    };

    let parse_f64 = |var: &str, default: &str| -> Result<f64, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<f64>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let session_cookie = lookup("CASTWATCH_SESSION_COOKIE")
        .ok()
        .filter(|s| !s.trim().is_empty());

    let self_uid = match lookup("CASTWATCH_SELF_UID") {
        Ok(raw) => Some(raw.parse::<u64>().map_err(|e| ConfigError::InvalidEnvVar {
            var: "CASTWATCH_SELF_UID".to_string(),
            reason: e.to_string(),
        })?),
        Err(_) => None,
    };

    let user_agents: Vec<String> = match lookup("CASTWATCH_USER_AGENTS") {
        Ok(raw) => {
            let list: Vec<String> = raw
                .split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect();
            if list.is_empty() {
                return Err(ConfigError::InvalidEnvVar {
                    var: "CASTWATCH_USER_AGENTS".to_string(),
                    reason: "must contain at least one user agent".to_string(),
                });
            }
            list
        }
        Err(_) => DEFAULT_USER_AGENTS.iter().map(|s| (*s).to_owned()).collect(),
    };

    let ua_rotate_chance = parse_f64("CASTWATCH_UA_ROTATE_CHANCE", "0.2")?;
    if !(0.0..=1.0).contains(&ua_rotate_chance) {
        return Err(ConfigError::InvalidEnvVar {
            var: "CASTWATCH_UA_ROTATE_CHANCE".to_string(),
            reason: "must be within [0.0, 1.0]".to_string(),
        });
    }

    let spacing_min_ms = parse_u64("CASTWATCH_SPACING_MIN_MS", "3000")?;
    let spacing_max_ms = parse_u64("CASTWATCH_SPACING_MAX_MS", "5000")?;
    if spacing_min_ms > spacing_max_ms {
        return Err(ConfigError::InvalidEnvVar {
            var: "CASTWATCH_SPACING_MIN_MS".to_string(),
            reason: "must not exceed CASTWATCH_SPACING_MAX_MS".to_string(),
        });
    }

    let risk_base_block_secs = parse_u64("CASTWATCH_RISK_BASE_BLOCK_SECS", "300")?;
    let risk_max_block_secs = parse_u64("CASTWATCH_RISK_MAX_BLOCK_SECS", "3600")?;
    if risk_base_block_secs > risk_max_block_secs {
        return Err(ConfigError::InvalidEnvVar {
            var: "CASTWATCH_RISK_BASE_BLOCK_SECS".to_string(),
            reason: "must not exceed CASTWATCH_RISK_MAX_BLOCK_SECS".to_string(),
        });
    }

    let push_max_connections = parse_usize("CASTWATCH_PUSH_MAX_CONNECTIONS", "5")?;
    if push_max_connections == 0 {
        return Err(ConfigError::InvalidEnvVar {
            var: "CASTWATCH_PUSH_MAX_CONNECTIONS".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }

    Ok(AppConfig {
        api_base_url: or_default("CASTWATCH_API_BASE_URL", "https://api.example.live"),
        live_base_url: or_default("CASTWATCH_LIVE_BASE_URL", "https://live.example.live"),
        session_cookie,
        self_uid,
        subscriptions_path: PathBuf::from(or_default(
            "CASTWATCH_SUBSCRIPTIONS_PATH",
            "subscriptions.yaml",
        )),
        request_timeout_secs: parse_u64("CASTWATCH_REQUEST_TIMEOUT_SECS", "20")?,
        user_agents,
        ua_rotate_chance,
        spacing_min_ms,
        spacing_max_ms,
        post_poll_interval_secs: parse_u64("CASTWATCH_POST_POLL_INTERVAL_SECS", "180")?,
        live_poll_interval_secs: parse_u64("CASTWATCH_LIVE_POLL_INTERVAL_SECS", "60")?,
        max_retries: parse_u32("CASTWATCH_MAX_RETRIES", "3")?,
        backoff_base_ms: parse_u64("CASTWATCH_BACKOFF_BASE_MS", "1000")?,
        risk_base_block_secs,
        risk_max_block_secs,
        risk_failure_threshold: parse_u32("CASTWATCH_RISK_FAILURE_THRESHOLD", "3")?,
        risk_log_interval_secs: parse_u64("CASTWATCH_RISK_LOG_INTERVAL_SECS", "300")?,
        repeat_notify_interval_secs: parse_u64("CASTWATCH_REPEAT_NOTIFY_INTERVAL_SECS", "3600")?,
        push_max_connections,
        push_heartbeat_secs: parse_u64("CASTWATCH_PUSH_HEARTBEAT_SECS", "30")?,
        push_reconnect_secs: parse_u64("CASTWATCH_PUSH_RECONNECT_SECS", "30")?,
        push_max_reconnects: parse_u32("CASTWATCH_PUSH_MAX_RECONNECTS", "3")?,
        inter_subject_delay_ms: parse_u64("CASTWATCH_INTER_SUBJECT_DELAY_MS", "1000")?,
        sign_key_ttl_secs: parse_u64("CASTWATCH_SIGN_KEY_TTL_SECS", "300")?,
        notify_max_attempts: parse_u32("CASTWATCH_NOTIFY_MAX_ATTEMPTS", "2")?,
    })
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
