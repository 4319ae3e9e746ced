use anyhow::{bail, Context, Result};
use clap::Parser;
use lib_rsu::core::{AuditPolicy, Policy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "server_rsu.conf";

/// Raw settings as they arrive from the CLI, the environment or the config
/// file. Every field is optional so sources can be layered.
#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "RSU signal-priority relay", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "RSU_PORT", help = "Port to listen on for producers and dashboards.")]
    pub port: Option<u16>,

    #[clap(long, env = "RSU_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "RSU_LOG_DIR", help = "Directory for server log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "RSU_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "RSU_AUDIT_LOG_PATH", help = "JSON Lines file receiving audit records.")]
    pub audit_log_path: Option<PathBuf>,

    #[clap(long, env = "RSU_AUDIT_STRICT", help = "Fail a submit when its audit record cannot be written.")]
    pub audit_strict: Option<bool>,

    #[clap(long, env = "RSU_AUDIT_TAIL", help = "Number of audit records kept in memory for /api/logs.")]
    pub audit_tail: Option<usize>,

    #[clap(long, env = "RSU_NETWORK_PATH", help = "SUMO .net.xml file served by /api/network.")]
    pub network_path: Option<PathBuf>,

    #[clap(long, env = "RSU_TRAFFIC_LIGHTS", value_delimiter = ',', help = "Junction ids treated as traffic lights (comma separated).")]
    pub traffic_lights: Option<Vec<String>>,

    #[clap(long, env = "RSU_PUBLIC_DIR", help = "Directory of static dashboard files.")]
    pub public_dir: Option<PathBuf>,

    #[clap(long, env = "RSU_SUBSCRIBER_BUFFER", help = "Frames buffered per dashboard before it is dropped.")]
    pub subscriber_buffer: Option<usize>,

    #[clap(long, env = "RSU_STATUS_INTERVAL_SECONDS", help = "Seconds between relay status log lines.")]
    pub status_interval_seconds: Option<u64>,

    #[clap(long, env = "RSU_ARRIVING_SOON_ETA", help = "ETA (s) at or below which the long extension applies.")]
    pub arriving_soon_eta: Option<f64>,

    #[clap(long, env = "RSU_EXPECTED_ETA", help = "ETA (s) at or below which the short extension applies.")]
    pub expected_eta: Option<f64>,

    #[clap(long, env = "RSU_ARRIVING_SOON_EXTENSION", help = "Green extension (s) for arriving EVs.")]
    pub arriving_soon_extension: Option<u32>,

    #[clap(long, env = "RSU_EXPECTED_EXTENSION", help = "Green extension (s) for expected EVs.")]
    pub expected_extension: Option<u32>,

    #[clap(long, env = "RSU_PROXIMITY_DISTANCE", help = "Distance below which a position update extends green.")]
    pub proximity_distance: Option<f64>,

    #[clap(long, env = "RSU_PROXIMITY_EXTENSION", help = "Green extension (s) for proximity triggers.")]
    pub proximity_extension: Option<u32>,

    #[clap(long, env = "RSU_TLS_CERT_PATH", help = "Path to the TLS certificate file.")]
    pub tls_cert_path: Option<PathBuf>,

    #[clap(long, env = "RSU_TLS_KEY_PATH", help = "Path to the TLS private key file.")]
    pub tls_key_path: Option<PathBuf>,
}

impl Config {
    // 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            audit_log_path: other.audit_log_path.or(self.audit_log_path),
            audit_strict: other.audit_strict.or(self.audit_strict),
            audit_tail: other.audit_tail.or(self.audit_tail),
            network_path: other.network_path.or(self.network_path),
            traffic_lights: other.traffic_lights.or(self.traffic_lights),
            public_dir: other.public_dir.or(self.public_dir),
            subscriber_buffer: other.subscriber_buffer.or(self.subscriber_buffer),
            status_interval_seconds: other.status_interval_seconds.or(self.status_interval_seconds),
            arriving_soon_eta: other.arriving_soon_eta.or(self.arriving_soon_eta),
            expected_eta: other.expected_eta.or(self.expected_eta),
            arriving_soon_extension: other.arriving_soon_extension.or(self.arriving_soon_extension),
            expected_extension: other.expected_extension.or(self.expected_extension),
            proximity_distance: other.proximity_distance.or(self.proximity_distance),
            proximity_extension: other.proximity_extension.or(self.proximity_extension),
            tls_cert_path: other.tls_cert_path.or(self.tls_cert_path),
            tls_key_path: other.tls_key_path.or(self.tls_key_path),
        }
    }

    fn defaults() -> Config {
        let policy = Policy::default();
        Config {
            port: Some(3000),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            audit_log_path: Some(PathBuf::from("./logs/rsu_messages.log")),
            audit_strict: Some(false),
            audit_tail: Some(500),
            subscriber_buffer: Some(1024),
            status_interval_seconds: Some(30),
            arriving_soon_eta: Some(policy.arriving_soon_eta),
            expected_eta: Some(policy.expected_eta),
            arriving_soon_extension: Some(policy.arriving_soon_extension),
            expected_extension: Some(policy.expected_extension),
            proximity_distance: Some(policy.proximity_distance),
            proximity_extension: Some(policy.proximity_extension),
            ..Default::default()
        }
    }
}

/// Fully resolved server settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub audit_log_path: PathBuf,
    pub audit_policy: AuditPolicy,
    pub audit_tail: usize,
    pub network_path: Option<PathBuf>,
    pub traffic_lights: Option<Vec<String>>,
    pub public_dir: Option<PathBuf>,
    pub subscriber_buffer: usize,
    pub status_interval: Duration,
    pub policy: Policy,
    pub tls: Option<(PathBuf, PathBuf)>,
}

/// Defaults < config file < environment/CLI.
pub fn load_config() -> Result<Settings> {
    load_from(Config::parse())
}

/// Same as [`load_config`] with already parsed CLI/env values.
pub fn load_from(cli: Config) -> Result<Settings> {
    let mut current_config = Config::defaults();

    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    if config_file_path.exists() {
        let config_str = fs::read_to_string(&config_file_path)
            .with_context(|| format!("Failed to read config file {}", config_file_path.display()))?;
        let file_config = serde_json::from_str::<Config>(&config_str)
            .with_context(|| format!("Failed to parse config file {}", config_file_path.display()))?;
        current_config = current_config.merge(file_config);
    } else if cli.config_path.is_some() {
        bail!("Config file {} does not exist", config_file_path.display());
    }

    resolve(current_config.merge(cli))
}

fn resolve(config: Config) -> Result<Settings> {
    let base = Policy::default();
    let policy = Policy {
        arriving_soon_eta: config.arriving_soon_eta.unwrap_or(base.arriving_soon_eta),
        expected_eta: config.expected_eta.unwrap_or(base.expected_eta),
        arriving_soon_extension: config.arriving_soon_extension.unwrap_or(base.arriving_soon_extension),
        expected_extension: config.expected_extension.unwrap_or(base.expected_extension),
        proximity_distance: config.proximity_distance.unwrap_or(base.proximity_distance),
        proximity_extension: config.proximity_extension.unwrap_or(base.proximity_extension),
    };
    policy.validate().context("Invalid decision policy")?;

    let log_level = config.log_level.unwrap_or_else(|| "info".to_string()).to_lowercase();
    if !matches!(log_level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
        bail!("Unknown log level '{}'", log_level);
    }

    let subscriber_buffer = config.subscriber_buffer.unwrap_or(1024);
    if subscriber_buffer == 0 {
        bail!("subscriberBuffer must be greater than zero");
    }
    let status_interval_seconds = config.status_interval_seconds.unwrap_or(30);
    if status_interval_seconds == 0 {
        bail!("statusIntervalSeconds must be greater than zero");
    }

    let tls = match (config.tls_cert_path, config.tls_key_path) {
        (Some(cert), Some(key)) => Some((cert, key)),
        (None, None) => default_tls_paths(),
        _ => bail!("TLS needs both a certificate and a key path"),
    };

    Ok(Settings {
        port: config.port.unwrap_or(3000),
        log_dir: config.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
        log_level,
        audit_log_path: config
            .audit_log_path
            .unwrap_or_else(|| PathBuf::from("./logs/rsu_messages.log")),
        audit_policy: if config.audit_strict.unwrap_or(false) {
            AuditPolicy::Strict
        } else {
            AuditPolicy::BestEffort
        },
        audit_tail: config.audit_tail.unwrap_or(500).max(1),
        network_path: config.network_path,
        traffic_lights: config.traffic_lights.filter(|list| !list.is_empty()),
        public_dir: config.public_dir,
        subscriber_buffer,
        status_interval: Duration::from_secs(status_interval_seconds),
        policy,
        tls,
    })
}

// LetsEncrypt files under the home directory, used only when both exist.
fn default_tls_paths() -> Option<(PathBuf, PathBuf)> {
    let letsencrypt_dir = dirs::home_dir()?.join(".letsencrypt");
    let cert = letsencrypt_dir.join("fullchain.pem");
    let key = letsencrypt_dir.join("privkey.pem");
    (exists(&cert) && exists(&key)).then_some((cert, key))
}

fn exists(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Config {
        let mut argv = vec!["server_rsu"];
        argv.extend_from_slice(args);
        Config::parse_from(argv)
    }

    fn write_conf(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("server_rsu.conf");
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn defaults_apply_without_sources() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.conf");
        // An explicit path that does not exist is an error; the implicit
        // default file is optional.
        assert!(load_from(cli(&["--config-path", missing.to_str().unwrap()])).is_err());

        let settings = resolve(Config::defaults()).unwrap();
        assert_eq!(settings.port, 3000);
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.audit_policy, AuditPolicy::BestEffort);
        assert_eq!(settings.subscriber_buffer, 1024);
        assert_eq!(settings.policy, Policy::default());
    }

    #[test]
    fn file_overrides_defaults_and_cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_conf(
            dir.path(),
            r#"{"port": 4000, "auditStrict": true, "trafficLights": ["J1", "J4"], "expectedEta": 30}"#,
        );

        let settings = load_from(cli(&["--config-path", path.to_str().unwrap(), "--port", "5000"])).unwrap();
        assert_eq!(settings.port, 5000);
        assert_eq!(settings.audit_policy, AuditPolicy::Strict);
        assert_eq!(settings.traffic_lights, Some(vec!["J1".to_string(), "J4".to_string()]));
        assert_eq!(settings.policy.expected_eta, 30.0);
        assert_eq!(settings.policy.arriving_soon_eta, 15.0);
    }

    #[test]
    fn cli_list_is_comma_separated() {
        let config = cli(&["--traffic-lights", "J1,J5,J6"]);
        assert_eq!(config.traffic_lights.unwrap().len(), 3);
    }

    #[test]
    fn invalid_policy_aborts() {
        let config = Config::defaults().merge(cli(&["--arriving-soon-eta", "50"]));
        assert!(resolve(config).is_err());
    }

    #[test]
    fn tls_needs_both_paths() {
        let config = Config::defaults().merge(cli(&["--tls-cert-path", "cert.pem"]));
        assert!(resolve(config).is_err());

        let config = Config::defaults().merge(cli(&["--tls-cert-path", "cert.pem", "--tls-key-path", "key.pem"]));
        let settings = resolve(config).unwrap();
        assert_eq!(settings.tls, Some((PathBuf::from("cert.pem"), PathBuf::from("key.pem"))));
    }

    #[test]
    fn bad_log_level_aborts() {
        let config = Config::defaults().merge(cli(&["--log-level", "loud"]));
        assert!(resolve(config).is_err());
    }
}
