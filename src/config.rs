use serde::Deserialize;

/// Public entry point of the INPS certificate service.
pub const DEFAULT_INPS_BASE_URL: &str = "https://serviziweb2.inps.it/AttestatiCittadinoWeb/";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub inps_base_url: String,
    pub inps_timeout_secs: u64,
    pub api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            inps_base_url: normalize_base_url(
                &std::env::var("INPS_BASE_URL")
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_INPS_BASE_URL.to_string()),
            )?,
            inps_timeout_secs: std::env::var("INPS_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("INPS_TIMEOUT_SECS must be a whole number of seconds"))
                .and_then(|secs: u64| {
                    if secs == 0 {
                        anyhow::bail!("INPS_TIMEOUT_SECS must be greater than zero");
                    }
                    Ok(secs)
                })?,
            api_key: std::env::var("API_KEY")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        };

        tracing::info!("Configuration loaded successfully");
        tracing::debug!("INPS Base URL: {}", config.inps_base_url);
        tracing::debug!("INPS timeout: {}s", config.inps_timeout_secs);
        tracing::debug!("Server Port: {}", config.port);
        if config.api_key.is_none() {
            tracing::warn!("API_KEY not set: the API is open to anyone who can reach it");
        }

        Ok(config)
    }
}

/// Validates the portal URL and makes sure it ends with `/`, so that
/// endpoint paths join below it rather than replacing its last segment.
pub fn normalize_base_url(url: &str) -> anyhow::Result<String> {
    let url = url.trim();
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("INPS_BASE_URL must start with http:// or https://");
    }
    url::Url::parse(url).map_err(|e| anyhow::anyhow!("INPS_BASE_URL is not a valid URL: {}", e))?;

    if url.ends_with('/') {
        Ok(url.to_string())
    } else {
        Ok(format!("{}/", url))
    }
}
