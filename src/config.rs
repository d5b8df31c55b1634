//! Configuration loading from the process environment.

use anyhow::Context as _;
use std::path::PathBuf;

/// Runtime configuration for the host binary.
#[derive(Debug, Clone)]
pub struct Config {
    /// Where persisted user-supplied secrets live.
    pub secrets_path: PathBuf,

    /// Optional catalog JSON path; the embedded sample is used when unset.
    pub catalog_path: Option<PathBuf>,

    /// Append raw classified-error detail to failure turns.
    pub diagnostics: bool,

    /// Override the DeepSeek endpoint (testing, proxies).
    pub deepseek_base_url: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> crate::Result<Self> {
        let data_dir = dirs::data_dir()
            .map(|d| d.join("tutorbot"))
            .unwrap_or_else(|| PathBuf::from("./data"));

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

        Ok(Self {
            secrets_path: data_dir.join("secrets.json"),
            catalog_path: std::env::var("TUTORBOT_CATALOG").ok().map(PathBuf::from),
            diagnostics: std::env::var("TUTORBOT_DIAGNOSTICS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            deepseek_base_url: std::env::var("TUTORBOT_DEEPSEEK_BASE_URL").ok(),
        })
    }
}
