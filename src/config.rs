use std::env;

use tracing::info;

pub struct AppConfig {
    pub bind_addr: String,
    pub mongo_url: String,
    pub database_name: String,
}

impl AppConfig {
    pub fn load() -> Self {
        Self {
            bind_addr: var_or("LINKWAVE_ADDR", "0.0.0.0:4000"),
            mongo_url: var_or("MONGO_URL", "mongodb://localhost:27017"),
            database_name: var_or("MONGO_DATABASE", "linkwave"),
        }
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    })
}
