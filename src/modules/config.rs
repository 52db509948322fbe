use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};
use crate::proxy::ProxyConfig;

const DATA_DIR: &str = ".chat_relay";
const CONFIG_FILE: &str = "relay_config.json";

pub const ENV_CONFIG_PATH: &str = "CHAT_RELAY_CONFIG";
pub const ENV_PORT: &str = "CHAT_RELAY_PORT";
pub const ENV_BIND: &str = "CHAT_RELAY_BIND";
pub const ENV_ALLOW_LAN: &str = "CHAT_RELAY_ALLOW_LAN";

/// Get data directory path, creating it if needed
pub fn get_data_dir() -> AppResult<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| AppError::Config("Failed to get user home directory".into()))?;
    let data_dir = home.join(DATA_DIR);

    if !data_dir.exists() {
        fs::create_dir_all(&data_dir)?;
    }

    Ok(data_dir)
}

/// `$CHAT_RELAY_CONFIG` if set, otherwise `~/.chat_relay/relay_config.json`
pub fn config_path() -> AppResult<PathBuf> {
    match std::env::var(ENV_CONFIG_PATH) {
        Ok(path) if !path.trim().is_empty() => Ok(PathBuf::from(path)),
        _ => Ok(get_data_dir()?.join(CONFIG_FILE)),
    }
}

/// Load config from `path`; a missing file yields the defaults.
pub fn load_config_from(path: &Path) -> AppResult<ProxyConfig> {
    if !path.exists() {
        return Ok(ProxyConfig::default());
    }

    let content = fs::read_to_string(path)?;
    let config: ProxyConfig = serde_json::from_str(&content)?;
    Ok(config)
}

pub fn save_config_to(path: &Path, config: &ProxyConfig) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content)?;
    Ok(())
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Apply `CHAT_RELAY_*` overrides and return the address to bind.
///
/// `lookup` abstracts the environment so the rules can be exercised without
/// touching process state.
pub fn apply_env_overrides<F>(config: &mut ProxyConfig, lookup: F) -> AppResult<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(ENV_ALLOW_LAN) {
        if is_truthy(&value) {
            config.allow_lan_access = true;
        }
    }

    if let Some(value) = lookup(ENV_PORT) {
        config.port = value
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{} is not a valid port: {}", ENV_PORT, value)))?;
    }

    let bind_address = match lookup(ENV_BIND) {
        Some(addr) if !addr.trim().is_empty() => {
            let addr = addr.trim().to_string();
            if addr != "127.0.0.1" && addr != "localhost" {
                config.allow_lan_access = true;
            }
            addr
        }
        _ => config.get_bind_address().to_string(),
    };

    Ok(bind_address)
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
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.port, ProxyConfig::default().port);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let mut config = ProxyConfig::default();
        config.port = 9100;
        config.routes[0].allowed_paths = vec!["threads".into()];
        save_config_to(&path, &config).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.port, 9100);
        assert_eq!(loaded.routes[0].allowed_paths, vec!["threads"]);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_config_from(&path), Err(AppError::Json(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ProxyConfig::default();
        let bind = apply_env_overrides(&mut config, env(&[])).unwrap();
        assert_eq!(bind, "127.0.0.1");

        let bind =
            apply_env_overrides(&mut config, env(&[(ENV_PORT, "8088"), (ENV_ALLOW_LAN, "yes")]))
                .unwrap();
        assert_eq!(config.port, 8088);
        assert_eq!(bind, "0.0.0.0");

        let mut config = ProxyConfig::default();
        let bind = apply_env_overrides(&mut config, env(&[(ENV_BIND, "10.0.0.5")])).unwrap();
        assert_eq!(bind, "10.0.0.5");
        assert!(config.allow_lan_access);
    }

    #[test]
    fn test_bad_port_override() {
        let mut config = ProxyConfig::default();
        assert!(apply_env_overrides(&mut config, env(&[(ENV_PORT, "http")])).is_err());
    }
}
