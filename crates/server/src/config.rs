use anyhow::{Context, Result};
use chrono::{FixedOffset, Local, Offset};
use serde::{Deserialize, Serialize};
use shared::Coordinate;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub naming: NamingConfig,
    #[serde(default = "default_presets")]
    pub presets: Vec<PresetConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_expiry_hours: u64,
    /// Admin account created at startup when none exists
    #[serde(default = "default_admin_employee_id")]
    pub admin_employee_id: String,
    #[serde(default = "default_admin_password")]
    pub admin_password: String,
    #[serde(default = "default_admin_name")]
    pub admin_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Hour of the day (local time) work starts
    #[serde(default = "default_work_start_hour")]
    pub work_start_hour: u32,
    /// Minutes past the start hour before a check-in counts as late
    #[serde(default = "default_late_grace_minutes")]
    pub late_grace_minutes: u32,
    /// Radius given to newly created territories
    #[serde(default = "default_territory_radius")]
    pub territory_radius_meters: f64,
    /// Window in which repeated out-of-territory alerts are suppressed
    #[serde(default = "default_alert_cooldown_secs")]
    pub alert_cooldown_secs: u64,
    #[serde(default = "default_periodic_interval_secs")]
    pub periodic_interval_secs: u64,
    /// Upper bound for a single one-shot position request
    #[serde(default = "default_fix_timeout_ms")]
    pub fix_timeout_ms: u64,
    /// Offset used for "local time"; the host offset when unset
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
    #[serde(default = "default_sample_queue_depth")]
    pub sample_queue_depth: usize,
    /// Delay before a lost location watch is subscribed again
    #[serde(default = "default_watch_retry_secs")]
    pub watch_retry_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamingConfig {
    #[serde(default = "default_search_ceiling")]
    pub search_ceiling_meters: f64,
    #[serde(default = "default_match_radius")]
    pub match_radius_meters: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetConfig {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
}

fn default_admin_employee_id() -> String { "admin@fieldtrack.local".to_string() }
fn default_admin_password() -> String { "admin".to_string() }
fn default_admin_name() -> String { "Operations Manager".to_string() }
fn default_work_start_hour() -> u32 { 10 }
fn default_late_grace_minutes() -> u32 { 15 }
fn default_territory_radius() -> f64 { 10_000.0 }
fn default_alert_cooldown_secs() -> u64 { 15 * 60 }
fn default_periodic_interval_secs() -> u64 { 10 * 60 }
fn default_fix_timeout_ms() -> u64 { 10_000 }
fn default_sample_queue_depth() -> usize { 64 }
fn default_watch_retry_secs() -> u64 { 30 }
fn default_search_ceiling() -> f64 { 15_000.0 }
fn default_match_radius() -> f64 { 10_000.0 }

const MAX_TOKEN_EXPIRY_HOURS: u64 = 24 * 365;
const MAX_ALERT_COOLDOWN_SECS: u64 = 24 * 60 * 60;

fn default_presets() -> Vec<PresetConfig> {
    [
        ("Mumbai - South", 18.9220, 72.8347),
        ("Mumbai - Bandra", 19.0596, 72.8295),
        ("Mumbai - Andheri", 19.1136, 72.8697),
        ("Mumbai - Borivali", 19.2307, 72.8567),
        ("Pune - Central", 18.5204, 73.8567),
        ("Delhi - Connaught Place", 28.6315, 77.2167),
        ("Bangalore - MG Road", 12.9716, 77.5946),
        ("Hyderabad - Gachibowli", 17.4401, 78.3489),
    ]
    .into_iter()
    .map(|(name, lat, lng)| PresetConfig {
        name: name.to_string(),
        lat,
        lng,
    })
    .collect()
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            work_start_hour: default_work_start_hour(),
            late_grace_minutes: default_late_grace_minutes(),
            territory_radius_meters: default_territory_radius(),
            alert_cooldown_secs: default_alert_cooldown_secs(),
            periodic_interval_secs: default_periodic_interval_secs(),
            fix_timeout_ms: default_fix_timeout_ms(),
            utc_offset_minutes: None,
            sample_queue_depth: default_sample_queue_depth(),
            watch_retry_secs: default_watch_retry_secs(),
        }
    }
}

impl TrackingConfig {
    pub fn alert_cooldown(&self) -> Result<chrono::Duration> {
        i64::try_from(self.alert_cooldown_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .with_context(|| format!("alert_cooldown_secs out of range: {}", self.alert_cooldown_secs))
    }

    pub fn periodic_interval(&self) -> Duration {
        Duration::from_secs(self.periodic_interval_secs)
    }

    pub fn watch_retry(&self) -> Duration {
        Duration::from_secs(self.watch_retry_secs.max(1))
    }

    pub fn fix_timeout(&self) -> Duration {
        Duration::from_millis(self.fix_timeout_ms)
    }

    /// Resolve the offset that defines calendar days and work hours
    pub fn local_offset(&self) -> Result<FixedOffset> {
        match self.utc_offset_minutes {
            Some(minutes) => FixedOffset::east_opt(minutes * 60)
                .ok_or_else(|| anyhow::anyhow!("Invalid utc_offset_minutes: {}", minutes)),
            None => Ok(Local::now().offset().fix()),
        }
    }
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            search_ceiling_meters: default_search_ceiling(),
            match_radius_meters: default_match_radius(),
        }
    }
}

impl PresetConfig {
    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lng)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                path: "./data/fieldtrack.db".to_string(),
            },
            auth: AuthConfig {
                jwt_secret: "change-me-in-production".to_string(),
                token_expiry_hours: 24,
                admin_employee_id: default_admin_employee_id(),
                admin_password: default_admin_password(),
                admin_name: default_admin_name(),
            },
            tracking: TrackingConfig::default(),
            naming: NamingConfig::default(),
            presets: default_presets(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        // Try to load from environment variable
        if let Ok(path) = std::env::var("FIELDTRACK_CONFIG") {
            return Self::load_from_path(&PathBuf::from(path));
        }

        let default_paths = vec![
            PathBuf::from("fieldtrack.toml"),
            PathBuf::from("config/fieldtrack.toml"),
            PathBuf::from("/etc/fieldtrack/server.toml"),
        ];

        for path in default_paths {
            if path.exists() {
                return Self::load_from_path(&path);
            }
        }

        tracing::warn!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that cannot be turned into durations or offsets
    pub fn validate(&self) -> Result<()> {
        if self.auth.token_expiry_hours == 0 || self.auth.token_expiry_hours > MAX_TOKEN_EXPIRY_HOURS {
            anyhow::bail!(
                "token_expiry_hours must be between 1 and {}, got {}",
                MAX_TOKEN_EXPIRY_HOURS,
                self.auth.token_expiry_hours
            );
        }
        if self.tracking.alert_cooldown_secs > MAX_ALERT_COOLDOWN_SECS {
            anyhow::bail!(
                "alert_cooldown_secs must be at most {}, got {}",
                MAX_ALERT_COOLDOWN_SECS,
                self.tracking.alert_cooldown_secs
            );
        }
        if self.tracking.periodic_interval_secs == 0 {
            anyhow::bail!("periodic_interval_secs must be positive");
        }
        if self.tracking.work_start_hour > 23 || self.tracking.late_grace_minutes > 59 {
            anyhow::bail!(
                "invalid work start {}:{:02}",
                self.tracking.work_start_hour,
                self.tracking.late_grace_minutes
            );
        }
        self.tracking.local_offset()?;
        Ok(())
    }

    /// Look up a preset territory center by name
    pub fn preset(&self, name: &str) -> Option<Coordinate> {
        self.presets
            .iter()
            .find(|p| p.name == name)
            .map(PresetConfig::coordinate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_file_falls_back_to_tracking_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[server]
host = "127.0.0.1"
port = 9000

[database]
path = "/tmp/ft.db"

[auth]
jwt_secret = "s3cret"
token_expiry_hours = 8

[tracking]
work_start_hour = 9
utc_offset_minutes = 330
"#
        )
        .unwrap();

        let config = Config::load_from_path(file.path()).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.tracking.work_start_hour, 9);
        assert_eq!(config.tracking.late_grace_minutes, 15);
        assert_eq!(config.tracking.alert_cooldown_secs, 900);
        assert_eq!(config.tracking.periodic_interval(), Duration::from_secs(600));
        assert_eq!(config.naming.search_ceiling_meters, 15_000.0);
        assert_eq!(config.presets.len(), 8);
        assert_eq!(
            config.tracking.local_offset().unwrap(),
            FixedOffset::east_opt(330 * 60).unwrap()
        );
    }

    #[test]
    fn explicit_presets_keep_file_order() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[server]
host = "0.0.0.0"
port = 8080

[database]
path = "x.db"

[auth]
jwt_secret = "k"
token_expiry_hours = 1

[[presets]]
name = "Zeta"
lat = 1.0
lng = 1.0

[[presets]]
name = "Alpha"
lat = 2.0
lng = 2.0
"#
        )
        .unwrap();

        let config = Config::load_from_path(file.path()).unwrap();
        let names: Vec<_> = config.presets.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Zeta", "Alpha"]);
        assert_eq!(config.preset("Alpha"), Some(Coordinate::new(2.0, 2.0)));
        assert_eq!(config.preset("Missing"), None);
    }

    #[test]
    fn out_of_range_durations_are_rejected() {
        let mut config = Config::default();
        config.tracking.alert_cooldown_secs = u64::MAX;
        assert!(config.tracking.alert_cooldown().is_err());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.auth.token_expiry_hours = u64::MAX;
        assert!(config.validate().is_err());

        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.tracking.alert_cooldown().unwrap(),
            chrono::Duration::minutes(15)
        );
    }

    #[test]
    fn load_rejects_absurd_cooldown() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[server]
host = "127.0.0.1"
port = 9000

[database]
path = "/tmp/ft.db"

[auth]
jwt_secret = "s3cret"
token_expiry_hours = 8

[tracking]
alert_cooldown_secs = 100000000
"#
        )
        .unwrap();

        assert!(Config::load_from_path(file.path()).is_err());
    }
}
