use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use crate::{error::ConfigError, model::Coordinates};

pub const DEFAULT_WEATHER_NAME: &str = "customcomp";
pub const DEFAULT_EVENTS_NAME: &str = "googlecalenderevents";
pub const DEFAULT_CALENDAR_ID: &str = "primary";
pub const DEFAULT_MAX_RESULTS: u32 = 100;
const MAX_RESULTS_LIMIT: u32 = 2500;

/// Forecast granularity requested from the weather service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ForecastMode {
    #[default]
    Hourly,
    Daily,
    FreeDaily,
}

impl ForecastMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ForecastMode::Hourly => "hourly",
            ForecastMode::Daily => "daily",
            ForecastMode::FreeDaily => "freedaily",
        }
    }

    pub const fn all() -> &'static [ForecastMode] {
        &[ForecastMode::Hourly, ForecastMode::Daily, ForecastMode::FreeDaily]
    }
}

impl fmt::Display for ForecastMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ForecastMode {
    type Error = ConfigError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "hourly" => Ok(ForecastMode::Hourly),
            "daily" => Ok(ForecastMode::Daily),
            "freedaily" => Ok(ForecastMode::FreeDaily),
            _ => Err(ConfigError::NotInSet {
                option: "mode",
                value: value.to_string(),
                allowed: join(ForecastMode::all()),
            }),
        }
    }
}

/// Unit system the host displays values in. Providers always fetch metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UnitSystem {
    #[default]
    Metric,
    Imperial,
}

impl UnitSystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitSystem::Metric => "metric",
            UnitSystem::Imperial => "imperial",
        }
    }

    pub const fn all() -> &'static [UnitSystem] {
        &[UnitSystem::Metric, UnitSystem::Imperial]
    }
}

impl fmt::Display for UnitSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for UnitSystem {
    type Error = ConfigError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "metric" => Ok(UnitSystem::Metric),
            "imperial" => Ok(UnitSystem::Imperial),
            _ => Err(ConfigError::NotInSet {
                option: "units",
                value: value.to_string(),
                allowed: join(UnitSystem::all()),
            }),
        }
    }
}

fn join<T: fmt::Display>(items: &[T]) -> String {
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Host-level settings: where "home" is and how values are displayed.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct HomeSection {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub units: Option<String>,
}

impl HomeSection {
    /// Home location rounded to 5 decimals, if both halves are set.
    pub fn coordinates(&self) -> Option<Coordinates> {
        Some(Coordinates::new(self.latitude?, self.longitude?).rounded())
    }

    pub fn units(&self) -> Result<UnitSystem, ConfigError> {
        self.units.as_deref().map_or(Ok(UnitSystem::default()), UnitSystem::try_from)
    }
}

/// `[weather]` section as written on disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct WeatherSection {
    pub api_key: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub mode: Option<String>,
    pub name: Option<String>,
}

/// Validated weather platform settings.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherPlatformConfig {
    pub api_key: String,
    pub coordinates: Coordinates,
    pub mode: ForecastMode,
    pub name: String,
    pub units: UnitSystem,
}

impl WeatherSection {
    /// Apply defaults and range checks. Missing coordinates fall back to the
    /// home location rounded to 5 decimals.
    pub fn validate(&self, home: &HomeSection) -> Result<WeatherPlatformConfig, ConfigError> {
        let api_key = non_empty("api_key", self.api_key.as_deref())?
            .ok_or(ConfigError::Missing("api_key"))?;

        let home_coords = home.coordinates();
        let latitude = match self.latitude {
            Some(lat) => lat,
            None => home_coords.map(|c| c.latitude).ok_or(ConfigError::Missing("latitude"))?,
        };
        let longitude = match self.longitude {
            Some(lon) => lon,
            None => home_coords.map(|c| c.longitude).ok_or(ConfigError::Missing("longitude"))?,
        };
        let coordinates = checked_coordinates(latitude, longitude)?;

        let mode = self.mode.as_deref().map_or(Ok(ForecastMode::default()), ForecastMode::try_from)?;
        let name = non_empty("name", self.name.as_deref())?.unwrap_or(DEFAULT_WEATHER_NAME);

        Ok(WeatherPlatformConfig {
            api_key: api_key.to_string(),
            coordinates,
            mode,
            name: name.to_string(),
            units: home.units()?,
        })
    }
}

fn checked_coordinates(latitude: f64, longitude: f64) -> Result<Coordinates, ConfigError> {
    if !(-90.0..=90.0).contains(&latitude) {
        return Err(ConfigError::Latitude(latitude));
    }
    if !(-180.0..=180.0).contains(&longitude) {
        return Err(ConfigError::Longitude(longitude));
    }
    Ok(Coordinates::new(latitude, longitude))
}

fn non_empty<'a>(option: &'static str, value: Option<&'a str>) -> Result<Option<&'a str>, ConfigError> {
    match value.map(str::trim) {
        Some("") => Err(ConfigError::Empty { option }),
        other => Ok(other),
    }
}

/// `[events]` section as written on disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct EventsSection {
    pub name: Option<String>,
    pub calendar_id: Option<String>,
    pub max_results: Option<u32>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub token_file: Option<PathBuf>,
}

/// OAuth client registered in the Google Cloud console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
}

/// Validated events platform settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EventsPlatformConfig {
    pub name: String,
    pub calendar_id: String,
    pub max_results: u32,
    /// Without a client only an already stored, still valid token can be used.
    pub oauth: Option<OAuthClientConfig>,
    pub token_file: PathBuf,
}

impl EventsSection {
    pub fn validate(&self) -> Result<EventsPlatformConfig, ConfigError> {
        let name = non_empty("name", self.name.as_deref())?.unwrap_or(DEFAULT_EVENTS_NAME);
        let calendar_id =
            non_empty("calendar_id", self.calendar_id.as_deref())?.unwrap_or(DEFAULT_CALENDAR_ID);

        let max_results = self.max_results.unwrap_or(DEFAULT_MAX_RESULTS);
        if !(1..=MAX_RESULTS_LIMIT).contains(&max_results) {
            return Err(ConfigError::OutOfRange {
                option: "max_results",
                value: max_results,
                min: 1,
                max: MAX_RESULTS_LIMIT,
            });
        }

        let client_id = non_empty("client_id", self.client_id.as_deref())?;
        let client_secret = non_empty("client_secret", self.client_secret.as_deref())?;
        let oauth = match (client_id, client_secret) {
            (Some(id), Some(secret)) => Some(OAuthClientConfig {
                client_id: id.to_string(),
                client_secret: secret.to_string(),
            }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing("client_secret")),
            (None, Some(_)) => return Err(ConfigError::Missing("client_id")),
        };

        let token_file = self.token_file.clone().unwrap_or_else(default_token_file);

        Ok(EventsPlatformConfig {
            name: name.to_string(),
            calendar_id: calendar_id.to_string(),
            max_results,
            oauth,
            token_file,
        })
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "sensors", "sensors-cli")
}

/// Token file in the platform data directory, or `token.json` in the working
/// directory when no home directory can be determined.
pub fn default_token_file() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().join("token.json"))
        .unwrap_or_else(|| PathBuf::from("token.json"))
}

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// ```toml
/// [home]
/// latitude = 52.37
/// longitude = 4.89
///
/// [weather]
/// api_key = "..."
/// mode = "daily"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub home: HomeSection,
    pub weather: Option<WeatherSection>,
    pub events: Option<EventsSection>,
}

impl Config {
    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = project_dirs()
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn home() -> HomeSection {
        HomeSection {
            latitude: Some(52.370_216_7),
            longitude: Some(4.895_167_9),
            units: None,
        }
    }

    fn weather(api_key: &str) -> WeatherSection {
        WeatherSection {
            api_key: Some(api_key.to_string()),
            ..WeatherSection::default()
        }
    }

    #[test]
    fn weather_defaults_apply() {
        let cfg = weather("KEY").validate(&home()).expect("valid config");

        assert_eq!(cfg.api_key, "KEY");
        assert_eq!(cfg.mode, ForecastMode::Hourly);
        assert_eq!(cfg.name, DEFAULT_WEATHER_NAME);
        assert_eq!(cfg.units, UnitSystem::Metric);
        assert_eq!(cfg.coordinates, Coordinates::new(52.37022, 4.89517));
    }

    #[test]
    fn weather_requires_api_key() {
        let err = WeatherSection::default().validate(&home()).unwrap_err();
        assert_eq!(err, ConfigError::Missing("api_key"));

        let err = weather("   ").validate(&home()).unwrap_err();
        assert_eq!(err, ConfigError::Empty { option: "api_key" });
    }

    #[test]
    fn explicit_coordinates_win_over_home() {
        let mut section = weather("KEY");
        section.latitude = Some(-33.8688);
        section.longitude = Some(151.2093);

        let cfg = section.validate(&HomeSection::default()).expect("valid config");
        assert_eq!(cfg.coordinates, Coordinates::new(-33.8688, 151.2093));
    }

    #[test]
    fn coordinates_are_range_checked() {
        let mut section = weather("KEY");
        section.latitude = Some(91.0);
        assert_eq!(section.validate(&home()).unwrap_err(), ConfigError::Latitude(91.0));

        section.latitude = Some(10.0);
        section.longitude = Some(-180.5);
        assert_eq!(section.validate(&home()).unwrap_err(), ConfigError::Longitude(-180.5));
    }

    #[test]
    fn missing_coordinates_without_home_is_an_error() {
        let err = weather("KEY").validate(&HomeSection::default()).unwrap_err();
        assert_eq!(err, ConfigError::Missing("latitude"));
    }

    #[test]
    fn mode_must_be_known() {
        let mut section = weather("KEY");
        section.mode = Some("Daily".into());
        assert_eq!(section.validate(&home()).unwrap().mode, ForecastMode::Daily);

        section.mode = Some("weekly".into());
        let err = section.validate(&home()).unwrap_err();
        assert!(err.to_string().contains("hourly, daily, freedaily"));
    }

    #[test]
    fn units_come_from_home() {
        let mut h = home();
        h.units = Some("imperial".into());
        assert_eq!(weather("KEY").validate(&h).unwrap().units, UnitSystem::Imperial);

        h.units = Some("kelvin".into());
        assert!(weather("KEY").validate(&h).is_err());
    }

    #[test]
    fn events_defaults_apply() {
        let cfg = EventsSection::default().validate().expect("valid config");

        assert_eq!(cfg.name, DEFAULT_EVENTS_NAME);
        assert_eq!(cfg.calendar_id, DEFAULT_CALENDAR_ID);
        assert_eq!(cfg.max_results, DEFAULT_MAX_RESULTS);
        assert!(cfg.oauth.is_none());
        assert!(cfg.token_file.ends_with("token.json"));
    }

    #[test]
    fn events_oauth_client_needs_both_halves() {
        let section = EventsSection {
            client_id: Some("id".into()),
            ..EventsSection::default()
        };
        assert_eq!(section.validate().unwrap_err(), ConfigError::Missing("client_secret"));

        let section = EventsSection {
            client_id: Some("id".into()),
            client_secret: Some("secret".into()),
            ..EventsSection::default()
        };
        let oauth = section.validate().unwrap().oauth.expect("oauth client");
        assert_eq!(oauth.client_id, "id");
    }

    #[test]
    fn events_max_results_is_bounded() {
        let section = EventsSection {
            max_results: Some(0),
            ..EventsSection::default()
        };
        assert!(matches!(
            section.validate().unwrap_err(),
            ConfigError::OutOfRange { option: "max_results", .. }
        ));
    }

    #[test]
    fn config_roundtrips_through_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let cfg = Config {
            home: home(),
            weather: Some(weather("KEY")),
            events: Some(EventsSection {
                calendar_id: Some("work@example.com".into()),
                ..EventsSection::default()
            }),
        };
        cfg.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn missing_config_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded, Config::default());
    }
}
