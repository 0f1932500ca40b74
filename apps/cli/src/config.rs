use std::{collections::HashMap, fs, path::Path};

use anyhow::Context;
use client_core::validation::DEFAULT_MIN_PASSWORD_LEN;

pub const SETTINGS_FILE: &str = "notes.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_url: Option<String>,
    pub database_url: String,
    pub min_password_len: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: None,
            database_url: "sqlite://./data/notes.db".into(),
            min_password_len: DEFAULT_MIN_PASSWORD_LEN,
        }
    }
}

/// Defaults, then `notes.toml` in the working directory, then environment variables.
pub fn load_settings() -> anyhow::Result<Settings> {
    let mut settings = Settings::default();
    apply_file(&mut settings, Path::new(SETTINGS_FILE))?;
    apply_env(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn apply_file(settings: &mut Settings, path: &Path) -> anyhow::Result<()> {
    let Ok(raw) = fs::read_to_string(path) else {
        return Ok(());
    };
    let file_cfg = toml::from_str::<HashMap<String, toml::Value>>(&raw)
        .with_context(|| format!("failed to parse '{}'", path.display()))?;

    if let Some(v) = file_cfg.get("server_url").and_then(toml::Value::as_str) {
        settings.server_url = Some(v.to_string());
    }
    if let Some(v) = file_cfg.get("database_url").and_then(toml::Value::as_str) {
        settings.database_url = v.to_string();
    }
    if let Some(v) = file_cfg
        .get("min_password_len")
        .and_then(toml::Value::as_integer)
    {
        settings.min_password_len = usize::try_from(v)
            .with_context(|| format!("min_password_len must be non-negative, got {v}"))?;
    }
    Ok(())
}

fn apply_env(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("NOTES_SERVER_URL") {
        settings.server_url = Some(v).filter(|url| !url.trim().is_empty());
    }
    if let Some(v) = var("NOTES_DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = var("APP__MIN_PASSWORD_LEN") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.min_password_len = parsed;
        }
    }
}

pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
