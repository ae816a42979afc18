//! Environment-derived server configuration. A `.env` file is honored
//! when present. Without Supabase credentials the server runs stdio-only.

use crate::supabase::DEFAULT_TABLE;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub supabase_url: Option<String>,
    pub supabase_service_role_key: Option<String>,
    pub table: String,
    pub discord_api_base: Option<String>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self {
            supabase_url: env_var("SUPABASE_URL"),
            supabase_service_role_key: env_var("SUPABASE_SERVICE_ROLE_KEY"),
            table: env_var("SUPABASE_MCP_TABLE").unwrap_or_else(|| DEFAULT_TABLE.to_string()),
            discord_api_base: env_var("DISCORD_API_BASE"),
        }
    }

    /// Both realtime settings, when the feed is configured at all.
    pub fn realtime(&self) -> Option<(&str, &str)> {
        match (&self.supabase_url, &self.supabase_service_role_key) {
            (Some(url), Some(key)) => Some((url.as_str(), key.as_str())),
            _ => None,
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}
