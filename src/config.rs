//! Configuration loader: merges .env, config.toml and environment variables.

use common::config::ServiceConfig;
use common::Error;
use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_CONFIG_FILE: &str = "config.toml";

fn parse_positive_u32(raw: &str, env_name: &str) -> Result<u32, Error> {
    match raw.trim().parse::<u32>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(Error::Config(format!("{env_name} must be an integer > 0"))),
    }
}

fn parse_non_negative_u64(raw: &str, env_name: &str) -> Result<u64, Error> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| Error::Config(format!("{env_name} must be an integer >= 0")))
}

fn validate_config(config: &ServiceConfig) -> Result<(), Error> {
    let mut issues: Vec<String> = Vec::new();

    if config.server.bind_addr.parse::<SocketAddr>().is_err() {
        issues.push(format!(
            "server.bind_addr '{}' is not a socket address",
            config.server.bind_addr
        ));
    }
    if config.database_path.trim().is_empty() {
        issues.push("database_path must not be empty".into());
    }

    if config.upstream.base_url.trim().is_empty() {
        issues.push("upstream.base_url must not be empty".into());
    }
    if config.upstream.timeout_secs == 0 {
        issues.push("upstream.timeout_secs must be > 0".into());
    }
    if config.upstream.requests_per_second == 0 {
        issues.push("upstream.requests_per_second must be > 0".into());
    }

    if config.ttl.geography_secs == 0 {
        issues.push("ttl.geography_secs must be > 0".into());
    }
    if config.ttl.search_secs == 0 {
        issues.push("ttl.search_secs must be > 0".into());
    }
    if config.ttl.cost_secs == 0 {
        issues.push("ttl.cost_secs must be > 0".into());
    }

    if config.cache.retention_days == 0 || config.cache.retention_days > 3650 {
        issues.push("cache.retention_days must be in [1,3650]".into());
    }

    if config.preload.throttle_ms > 5000 {
        issues.push("preload.throttle_ms must be in [0,5000]".into());
    }
    if !(1..=3).contains(&config.preload.depth) {
        issues.push("preload.depth must be 1, 2 or 3".into());
    }

    if config.warm.concurrency == 0 {
        issues.push("warm.concurrency must be > 0".into());
    }
    if config.warm.sample_weight_grams == 0 {
        issues.push("warm.sample_weight_grams must be > 0".into());
    }
    if config.warm.couriers.iter().any(|c| c.trim().is_empty()) {
        issues.push("warm.couriers must not contain blank entries".into());
    }

    if config.default_origin.city_id.trim().is_empty() {
        issues.push("default_origin.cityId must not be empty".into());
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "Invalid config:\n - {}",
            issues.join("\n - ")
        )))
    }
}

/// Apply environment overrides. `var` is `std::env::var` outside tests.
fn apply_env_overrides<F>(config: &mut ServiceConfig, var: F) -> Result<(), Error>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(addr) = var("BIND_ADDR") {
        config.server.bind_addr = addr.trim().to_string();
    }
    if let Some(path) = var("DATABASE_PATH") {
        config.database_path = path.trim().to_string();
    }
    if let Some(token) = var("ADMIN_TOKEN") {
        config.admin_token = token.trim().to_string();
    }
    if let Some(key) = var("RAJAONGKIR_API_KEY") {
        config.upstream.api_key = key.trim().to_string();
    }
    if let Some(url) = var("RAJAONGKIR_BASE_URL") {
        config.upstream.base_url = url.trim().to_string();
    }
    if let Some(raw) = var("RAJAONGKIR_RPS") {
        config.upstream.requests_per_second = parse_positive_u32(&raw, "RAJAONGKIR_RPS")?;
    }
    if let Some(raw) = var("WARM_INTERVAL_SECS") {
        config.warm.interval_secs = parse_non_negative_u64(&raw, "WARM_INTERVAL_SECS")?;
    }
    Ok(())
}

fn config_path() -> PathBuf {
    std::env::var("ONGKIR_CONFIG")
        .ok()
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Load service configuration from defaults, config file and environment.
pub fn load_config() -> Result<ServiceConfig, Error> {
    // 1. Load .env file from project root or parent directories.
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("No .env file loaded: {}", e);
    }

    // 2. Start with defaults, replaced by the config file when present.
    let mut config = ServiceConfig::default();
    let path = config_path();
    if path.exists() {
        let contents = std::fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        config = toml::from_str(&contents).map_err(|e| {
            Error::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
    }

    // 3. Environment variables win.
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;

    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&ServiceConfig::default()).is_ok());
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config: ServiceConfig = toml::from_str(
            r#"
            admin_token = "from-file"

            [upstream]
            requests_per_second = 2

            [warm]
            interval_secs = 60
            "#,
        )
        .expect("toml should parse");

        apply_env_overrides(
            &mut config,
            env(&[
                ("ADMIN_TOKEN", "from-env"),
                ("RAJAONGKIR_RPS", "9"),
                ("DATABASE_PATH", "/tmp/cache.db"),
            ]),
        )
        .expect("overrides");

        assert_eq!(config.admin_token, "from-env");
        assert_eq!(config.upstream.requests_per_second, 9);
        assert_eq!(config.database_path, "/tmp/cache.db");
        assert_eq!(config.warm.interval_secs, 60);
    }

    #[test]
    fn test_bad_env_number_rejected() {
        let mut config = ServiceConfig::default();
        let err = apply_env_overrides(&mut config, env(&[("RAJAONGKIR_RPS", "0")]))
            .expect_err("zero rps");
        assert!(err.to_string().contains("RAJAONGKIR_RPS"));

        let err = apply_env_overrides(&mut config, env(&[("WARM_INTERVAL_SECS", "soon")]))
            .expect_err("not a number");
        assert!(err.to_string().contains("WARM_INTERVAL_SECS"));
    }

    #[test]
    fn test_validation_reports_every_issue() {
        let mut config = ServiceConfig::default();
        config.server.bind_addr = "nowhere".into();
        config.preload.depth = 5;
        config.warm.concurrency = 0;

        let msg = validate_config(&config).expect_err("invalid").to_string();
        assert!(msg.contains("server.bind_addr"));
        assert!(msg.contains("preload.depth"));
        assert!(msg.contains("warm.concurrency"));
    }
}
