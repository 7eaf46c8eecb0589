//! Server Configuration

/// Listener and public URL settings
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Externally reachable origin, e.g. `https://shop.example.com`
    pub public_base_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".into(),
            public_base_url: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .ok()
                .map(|u| u.trim().trim_end_matches('/').to_string())
                .filter(|u| !u.is_empty()),
        }
    }

    /// Webhook URL handed to the provider
    pub fn callback_url(&self) -> Option<String> {
        self.public_base_url
            .as_ref()
            .map(|base| format!("{base}/webhooks/provider"))
    }
}
