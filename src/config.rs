use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;

pub const PLACEHOLDER_URL: &str = "https://placeholder.supabase.co";

/// Upper bound for any hour-valued setting: ten years.
pub const MAX_HOURS: i64 = 24 * 365 * 10;

#[derive(Parser, Debug)]
#[command(name = "greenpoint", about = "A community sustainability tracker")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// Use an in-memory backend instead of the hosted platform
    #[arg(long, global = true)]
    pub memory: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the web server (default)
    Serve,
    /// Storage bucket maintenance
    Storage {
        #[command(subcommand)]
        action: StorageCommand,
    },
    /// Delete events past the retention window once and exit
    SweepEvents,
    /// Delete every row in every table
    Reset {
        /// Must be the literal word RESET
        #[arg(long)]
        confirm: String,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum StorageCommand {
    /// Create missing buckets and apply access policies
    Setup,
    /// Report bucket configuration
    Check,
    /// Print the storage access policy SQL
    Policies,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub auth: AuthConfig,
    pub events: EventsConfig,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct BackendConfig {
    pub url: String,
    pub anon_key: String,
    pub service_key: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub cookie_name: String,
    pub session_hours: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct EventsConfig {
    pub retention_hours: i64,
    pub sweep_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: PLACEHOLDER_URL.to_string(),
            anon_key: String::new(),
            service_key: None,
            timeout_secs: 30,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            cookie_name: "greenpoint_session".to_string(),
            session_hours: 168,
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            retention_hours: 24,
            sweep_interval_secs: 3600,
        }
    }
}

impl BackendConfig {
    /// False for the placeholder URL, template values or a missing key.
    pub fn is_configured(&self) -> bool {
        !self.url.trim().is_empty()
            && !self.anon_key.trim().is_empty()
            && self.url.trim_end_matches('/') != PLACEHOLDER_URL
            && !self.url.contains("your_supabase_url_here")
    }
}

impl Config {
    pub fn load(cli: &Cli) -> anyhow::Result<Self> {
        let config_path = cli.config.clone().unwrap_or_else(Self::default_path);

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok());

        // CLI overrides
        if let Some(ref host) = cli.host {
            config.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            config.server.port = port;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject durations that would panic in date arithmetic or turn the
    /// event sweep against upcoming events.
    pub fn validate(&self) -> anyhow::Result<()> {
        let retention = self.events.retention_hours;
        anyhow::ensure!(
            (0..=MAX_HOURS).contains(&retention),
            "events.retention_hours must be between 0 and {MAX_HOURS}, got {retention}"
        );
        let session = self.auth.session_hours;
        anyhow::ensure!(
            (1..=MAX_HOURS as u64).contains(&session),
            "auth.session_hours must be between 1 and {MAX_HOURS}, got {session}"
        );
        anyhow::ensure!(
            self.events.sweep_interval_secs > 0,
            "events.sweep_interval_secs must be at least 1"
        );
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".greenpoint")
            .join("config.toml")
    }

    /// Environment overrides for the backend connection.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("SUPABASE_URL").filter(|v| !v.is_empty()) {
            self.backend.url = url;
        }
        if let Some(key) = var("SUPABASE_ANON_KEY").filter(|v| !v.is_empty()) {
            self.backend.anon_key = key;
        }
        if let Some(key) = var("SUPABASE_SERVICE_KEY").filter(|v| !v.is_empty()) {
            self.backend.service_key = Some(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli_with(config: Option<PathBuf>, host: Option<&str>, port: Option<u16>) -> Cli {
        Cli {
            config,
            host: host.map(str::to_string),
            port,
            memory: false,
            command: None,
        }
    }

    #[test]
    fn default_config_has_expected_values() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.auth.cookie_name, "greenpoint_session");
        assert_eq!(config.events.retention_hours, 24);
        assert_eq!(config.events.sweep_interval_secs, 3600);
        assert_eq!(config.backend.url, PLACEHOLDER_URL);
        assert!(!config.backend.is_configured());
    }

    #[test]
    fn placeholder_urls_are_not_configured() {
        let mut backend = BackendConfig {
            anon_key: "key".into(),
            ..Default::default()
        };
        assert!(!backend.is_configured());

        backend.url = "https://your_supabase_url_here".into();
        assert!(!backend.is_configured());

        backend.url = "https://abc.supabase.co".into();
        assert!(backend.is_configured());

        backend.anon_key = String::new();
        assert!(!backend.is_configured());
    }

    #[test]
    fn env_overrides_backend_settings() {
        let mut config = Config::default();
        config.apply_env(|key| match key {
            "SUPABASE_URL" => Some("https://abc.supabase.co".into()),
            "SUPABASE_ANON_KEY" => Some("anon".into()),
            "SUPABASE_SERVICE_KEY" => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.backend.url, "https://abc.supabase.co");
        assert_eq!(config.backend.anon_key, "anon");
        assert_eq!(config.backend.service_key, None);
    }

    #[test]
    fn load_reads_toml_file() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config.toml");
        std::fs::write(
            &config_path,
            r#"
[server]
host = "192.168.1.1"
port = 9000

[events]
retention_hours = 48
"#,
        )
        .unwrap();

        let config = Config::load(&cli_with(Some(config_path), None, None)).unwrap();
        assert_eq!(config.server.host, "192.168.1.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.events.retention_hours, 48);
        assert_eq!(config.events.sweep_interval_secs, 3600);
    }

    #[test]
    fn cli_overrides_beat_toml_values() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config.toml");
        std::fs::write(
            &config_path,
            r#"
[server]
host = "192.168.1.1"
port = 9000
"#,
        )
        .unwrap();

        let config =
            Config::load(&cli_with(Some(config_path), Some("10.0.0.1"), Some(4000))).unwrap();
        assert_eq!(config.server.host, "10.0.0.1");
        assert_eq!(config.server.port, 4000);
    }

    #[test]
    fn out_of_range_durations_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config.toml");
        for (body, field) in [
            ("[events]\nretention_hours = -1\n", "retention_hours"),
            ("[events]\nretention_hours = 9223372036854775807\n", "retention_hours"),
            ("[auth]\nsession_hours = 0\n", "session_hours"),
            ("[auth]\nsession_hours = 9223372036854775807\n", "session_hours"),
            ("[events]\nsweep_interval_secs = 0\n", "sweep_interval_secs"),
        ] {
            std::fs::write(&config_path, body).unwrap();
            let err = Config::load(&cli_with(Some(config_path.clone()), None, None)).unwrap_err();
            assert!(err.to_string().contains(field), "{body}: {err}");
        }
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn missing_config_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let cli = cli_with(Some(tmp.path().join("absent.toml")), None, None);
        let config = Config::load(&cli).unwrap();
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn parses_storage_subcommand() {
        let cli = Cli::parse_from(["greenpoint", "storage", "check"]);
        assert_eq!(
            cli.command,
            Some(Command::Storage {
                action: StorageCommand::Check
            })
        );
        let cli = Cli::parse_from(["greenpoint", "--memory"]);
        assert!(cli.memory);
        assert_eq!(cli.command, None);
    }
}
