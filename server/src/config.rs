use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Pulse realtime server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "pulse-server", version, about = "Pulse realtime presence and delivery server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "PULSE_PORT", default_value = "5000")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "PULSE_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./pulse.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "PULSE_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, JWT key)
    #[arg(long, env = "PULSE_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Seconds a callee has to answer before the caller gets a timeout
    #[arg(long, env = "PULSE_CALL_TIMEOUT_SECS", default_value = "30")]
    pub call_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5000,
            bind_address: "0.0.0.0".to_string(),
            config: "./pulse.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            call_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (PULSE_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("PULSE_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Pulse Realtime Server Configuration
# Place this file at ./pulse.toml or specify with --config <path>
# All settings can be overridden via environment variables (PULSE_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 5000)
# port = 5000

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and JWT signing key.
# The account service must sign access tokens with data_dir/jwt_secret.
# data_dir = "./data"

# Seconds a callee has to answer a call invitation (default: 30)
# call_timeout_secs = 30
"#
    .to_string()
}
