use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Placeholder some deployments leave in config files instead of a secret.
const ENV_PLACEHOLDER: &str = "USE_ENVIRONMENT_VARIABLE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub data: DataConfig,
    pub admin: AdminConfig,
    pub remote: RemoteConfig,
    pub refresh: RefreshConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Sheet names, one per sector, processed in this order.
    pub sectors: Vec<String>,
    /// Workbook (or directory of per-sector CSV files) used when no remote URL is set.
    pub local_workbook: String,
    pub snapshot_path: String,
    pub summary_path: String,
    pub schedule_path: String,
    /// Tested in order; only the first match is stripped.
    pub facility_prefixes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    #[serde(skip)]
    pub password: Option<String>,
    pub session_timeout_minutes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    #[serde(skip)]
    pub download_url: Option<String>,
    /// Tried once when the primary download fails.
    pub fallback_url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub cooldown_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            sectors: vec![
                "western_sector".to_string(),
                "eastern_sector".to_string(),
                "northern_sector".to_string(),
                "southern_sector".to_string(),
            ],
            local_workbook: "raw_query_data.xlsx".to_string(),
            snapshot_path: "dashboard_data.json".to_string(),
            summary_path: "summary_report.txt".to_string(),
            schedule_path: "auto_refresh_config.json".to_string(),
            facility_prefixes: crate::normalizer::DEFAULT_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            password: None,
            session_timeout_minutes: 30,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            download_url: None,
            fallback_url: None,
            timeout_secs: 30,
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: 10,
        }
    }
}

impl Config {
    pub fn load_from_file(file_path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(file_path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file(&self, file_path: &str) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(file_path, content)?;
        Ok(())
    }

    /// Pull secrets and deployment overrides from the process environment.
    pub fn apply_environment(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let secret = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty() && v != ENV_PLACEHOLDER)
        };

        self.admin.password = secret("ADMIN_PASSWORD");
        if self.admin.password.is_none() {
            warn!("⚠️  ADMIN_PASSWORD environment variable not set - admin login is disabled");
        }

        self.remote.download_url = secret("ONEDRIVE_DOWNLOAD_URL");
        if self.remote.download_url.is_none() {
            warn!("⚠️  ONEDRIVE_DOWNLOAD_URL environment variable not set - remote refresh is disabled");
        }

        if let Some(host) = secret("HOST") {
            self.server.host = host;
        }
        if let Some(port) = secret("PORT").and_then(|p| p.parse::<u16>().ok()) {
            self.server.port = port;
        }
    }
}

impl DataConfig {
    /// Snapshot key for a sheet: `western_sector` -> `western`.
    pub fn sector_key(sheet: &str) -> String {
        sheet.strip_suffix("_sector").unwrap_or(sheet).to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    Accepted,
    Refused,
    WrongNumber,
    NoResponse,
    Other(String),
}

impl ResponseStatus {
    /// Blank cells mean the person was never reached.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let status = match trimmed.to_lowercase().as_str() {
            "accepted" => ResponseStatus::Accepted,
            "refused" => ResponseStatus::Refused,
            "wrong number" => ResponseStatus::WrongNumber,
            "no response" => ResponseStatus::NoResponse,
            _ => ResponseStatus::Other(trimmed.to_string()),
        };
        Some(status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VisitType {
    InPerson,
    Virtual,
    Other(String),
}

impl VisitType {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let visit = match trimmed.to_lowercase().as_str() {
            "in-person" => VisitType::InPerson,
            "virtual" => VisitType::Virtual,
            _ => VisitType::Other(trimmed.to_string()),
        };
        Some(visit)
    }
}

/// One outreach attempt as read from a sector table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub facility_source_name: Option<String>,
    pub identity_key: Option<String>,
    pub response: Option<ResponseStatus>,
    pub visit_type: Option<VisitType>,
    pub arrived: bool,
    pub enrolled: bool,
}

impl Record {
    /// Identity key usable for deduplication, if any.
    pub fn usable_identity_key(&self) -> Option<String> {
        self.identity_key
            .as_deref()
            .map(normalize_identity_key)
            .filter(|key| !key.is_empty())
    }

    pub fn is_communicated(&self) -> bool {
        self.response.is_some()
    }

    pub fn has_response(&self, status: &ResponseStatus) -> bool {
        self.response.as_ref() == Some(status)
    }

    pub fn has_visit(&self, visit: &VisitType) -> bool {
        self.visit_type.as_ref() == Some(visit)
    }
}

/// Normalize a national ID by trimming surrounding whitespace
pub fn normalize_identity_key(key: &str) -> String {
    key.trim().to_string()
}

/// `Yes` flags in the Arrived / Enrollment columns.
pub fn parse_flag(raw: &str) -> bool {
    raw.trim().eq_ignore_ascii_case("yes")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilityMetrics {
    #[serde(rename = "phc_name")]
    pub facility: String,
    pub total_population: u64,
    pub communicated: u64,
    pub accepted: u64,
    pub refused: u64,
    pub wrong_number: u64,
    pub no_response: u64,
    pub in_person_visits: u64,
    pub virtual_visits: u64,
    pub arrived: u64,
    pub enrolled: u64,
    pub acceptance_rate: f64,
    pub enrollment_rate: f64,
    pub communication_rate: f64,
}

/// Facilities of one sector, largest population first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SectorReport {
    pub facilities: Vec<FacilityMetrics>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverviewReport {
    pub total_population: u64,
    pub total_communicated: u64,
    pub total_accepted: u64,
    pub total_refused: u64,
    pub total_wrong_number: u64,
    pub total_no_response: u64,
    pub total_enrolled: u64,
    pub total_phc_centers: u64,
    pub total_arrived: u64,
    pub total_in_person: u64,
    pub total_virtual: u64,
    pub communication_rate: f64,
    pub acceptance_rate: f64,
    pub enrollment_rate: f64,
}

/// The unit that is persisted and served. Replaced whole on every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub last_updated: DateTime<Utc>,
    pub sectors: BTreeMap<String, SectorReport>,
    pub overview: OverviewReport,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_parsing_is_case_insensitive_and_blank_is_absent() {
        assert_eq!(ResponseStatus::parse(" accepted "), Some(ResponseStatus::Accepted));
        assert_eq!(ResponseStatus::parse("Wrong number"), Some(ResponseStatus::WrongNumber));
        assert_eq!(ResponseStatus::parse("   "), None);
        assert_eq!(
            ResponseStatus::parse("Call back later"),
            Some(ResponseStatus::Other("Call back later".to_string()))
        );
    }

    #[test]
    fn blank_identity_key_is_not_usable() {
        let record = Record {
            identity_key: Some("   ".to_string()),
            ..Record::default()
        };
        assert_eq!(record.usable_identity_key(), None);

        let record = Record {
            identity_key: Some(" 1029384756 ".to_string()),
            ..Record::default()
        };
        assert_eq!(record.usable_identity_key().as_deref(), Some("1029384756"));
    }

    #[test]
    fn secrets_come_from_environment_and_placeholder_counts_as_absent() {
        let mut config = Config::default();
        config.apply_overrides(|name| match name {
            "ADMIN_PASSWORD" => Some("s3cret".to_string()),
            "ONEDRIVE_DOWNLOAD_URL" => Some(ENV_PLACEHOLDER.to_string()),
            "PORT" => Some("9090".to_string()),
            _ => None,
        });
        assert_eq!(config.admin.password.as_deref(), Some("s3cret"));
        assert_eq!(config.remote.download_url, None);
        assert_eq!(config.server.port, 9090);
    }

    #[test]
    fn config_round_trips_through_toml_without_secrets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let path = path.to_str().unwrap();

        let mut config = Config::default();
        config.admin.password = Some("hidden".to_string());
        config.refresh.cooldown_seconds = 42;
        config.save_to_file(path).unwrap();

        let written = std::fs::read_to_string(path).unwrap();
        assert!(!written.contains("hidden"));

        let loaded = Config::load_from_file(path).unwrap();
        assert_eq!(loaded.refresh.cooldown_seconds, 42);
        assert_eq!(loaded.admin.password, None);
        assert_eq!(loaded.data.sectors.len(), 4);
    }

    #[test]
    fn sector_key_drops_sheet_suffix() {
        assert_eq!(DataConfig::sector_key("western_sector"), "western");
        assert_eq!(DataConfig::sector_key("central"), "central");
    }
}
