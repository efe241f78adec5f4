use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub api_key: String,
    pub per_page: u32,
    pub page_cap: u32,
    pub preload_concurrency: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
    pub cache_path: PathBuf,
}

pub struct AppConfigOverrides {
    pub log_level: Option<String>,
    pub api_key: Option<String>,
    pub page_cap: Option<u32>,
    pub preload_concurrency: Option<usize>,
    pub request_timeout_secs: Option<u64>,
    pub cache_path: Option<PathBuf>,
}

fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pinpix")
        .join("config")
}

impl AppConfig {
    pub fn load_from(path: Option<PathBuf>) -> Self {
        let mut builder = config::Config::builder();
        let path = path.unwrap_or_else(default_config_path);
        builder = builder.add_source(config::File::from(path).required(false));
        let cfg = builder.build().unwrap_or_default();

        let log_level = cfg
            .get_string("log_level")
            .unwrap_or_else(|_| "info".to_string());
        let api_key = cfg
            .get_string("api_key")
            .ok()
            .or_else(|| std::env::var("FLICKR_API_KEY").ok())
            .unwrap_or_default();
        let per_page = cfg.get_int("per_page").unwrap_or(21) as u32;
        let page_cap = cfg.get_int("page_cap").unwrap_or(40) as u32;
        let preload_concurrency = cfg.get_int("preload_concurrency").unwrap_or(4) as usize;
        let request_timeout_secs = cfg.get_int("request_timeout_secs").ok().map(|v| v as u64);
        let cache_path = cfg
            .get_string("cache_path")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".pinpix")
            });

        Self {
            log_level,
            api_key,
            per_page,
            page_cap,
            preload_concurrency,
            request_timeout_secs,
            cache_path,
        }
    }

    pub fn apply_overrides(mut self, ov: &AppConfigOverrides) -> Self {
        if let Some(l) = &ov.log_level {
            self.log_level = l.clone();
        }
        if let Some(k) = &ov.api_key {
            self.api_key = k.clone();
        }
        if let Some(c) = ov.page_cap {
            self.page_cap = c;
        }
        if let Some(p) = ov.preload_concurrency {
            self.preload_concurrency = p;
        }
        if let Some(t) = ov.request_timeout_secs {
            self.request_timeout_secs = Some(t);
        }
        if let Some(p) = &ov.cache_path {
            self.cache_path = p.clone();
        }
        self
    }

    pub fn save_to(&self, path: Option<PathBuf>) -> std::io::Result<()> {
        let path = path.unwrap_or_else(default_config_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = toml::to_string(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, data)
    }
}
