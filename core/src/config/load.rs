use std::path::{Path, PathBuf};

use anyhow::Context;

use super::types::AppConfig;

/// Get the default harvest data directory: ~/.harvest
pub fn get_harvest_data_dir() -> anyhow::Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".harvest"))
        .ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))
}

pub fn load_from_path(path: &Path) -> anyhow::Result<AppConfig> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str::<AppConfig>(&s).with_context(|| format!("invalid config {}", path.display()))
}

pub fn load_default() -> anyhow::Result<AppConfig> {
    // Priority 1: ~/.harvest/config.toml
    let harvest_dir = get_harvest_data_dir()?;
    let user_config = harvest_dir.join("config.toml");

    // Priority 2: ./harvest.toml (current directory)
    let local_config = Path::new("harvest.toml");

    let mut cfg = if user_config.exists() {
        load_from_path(&user_config)?
    } else if local_config.exists() {
        load_from_path(local_config)?
    } else {
        AppConfig::default()
    };

    apply_env_overrides(&mut cfg)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Environment variable overrides (highest priority).
pub fn apply_env_overrides(cfg: &mut AppConfig) -> anyhow::Result<()> {
    if let Ok(v) = std::env::var("HARVEST_MAX_CONCURRENT") {
        if !v.trim().is_empty() {
            cfg.scheduler.max_concurrent = v
                .trim()
                .parse()
                .with_context(|| format!("HARVEST_MAX_CONCURRENT is not a number: {v}"))?;
        }
    }
    if let Ok(v) = std::env::var("HARVEST_STATE_FILE") {
        if !v.trim().is_empty() {
            cfg.scheduler.state_file = Some(PathBuf::from(v.trim()));
        }
    }
    if let Ok(v) = std::env::var("HARVEST_LOG_LEVEL") {
        if !v.trim().is_empty() {
            cfg.logging.level = v;
        }
    }
    Ok(())
}
