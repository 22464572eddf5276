use std::env;

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl ImportConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env::var("IMPORT_API_URL")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or_else(|_| "http://localhost:3000".into()),
            api_key: env::var("IMPORT_API_KEY").ok().filter(|v| !v.trim().is_empty()),
        }
    }
}
