use std::{collections::HashMap, fs};

use anyhow::Result;

#[derive(Debug)]
pub struct Settings {
    pub api_base_url: String,
    /// Sqlite location for the persisted session; `None` keeps the session
    /// in memory only.
    pub database_url: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8000/api".into(),
            database_url: Some("./data/session.db".into()),
        }
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("client.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("api_base_url") {
                settings.api_base_url = v.clone();
            }
            if let Some(v) = file_cfg.get("database_url") {
                settings.database_url = Some(v.clone());
            }
        }
    }

    if let Ok(v) = std::env::var("API_BASE_URL") {
        settings.api_base_url = v;
    }
    if let Ok(v) = std::env::var("APP__API_BASE_URL") {
        settings.api_base_url = v;
    }

    if let Ok(v) = std::env::var("DATABASE_URL") {
        settings.database_url = Some(v);
    }
    if let Ok(v) = std::env::var("APP__DATABASE_URL") {
        settings.database_url = Some(v);
    }

    settings
}

pub fn prepare_database_url(raw_database_url: &str) -> Result<String> {
    Ok(normalize_database_url(raw_database_url))
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default()
            .database_url
            .map(|path| format!("sqlite://{path}"))
            .unwrap_or_default();
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
mod tests {
    use super::*;

    #[test]
    fn normalizes_plain_file_path_to_sqlite_url() {
        assert_eq!(
            normalize_database_url("./data/session.db"),
            "sqlite://./data/session.db"
        );
    }

    #[test]
    fn leaves_fully_qualified_urls_alone() {
        assert_eq!(
            normalize_database_url("sqlite:///tmp/session.db"),
            "sqlite:///tmp/session.db"
        );
        assert_eq!(
            normalize_database_url("sqlite::memory:"),
            "sqlite::memory:"
        );
    }
}
