//! Interactive prompts for `configure` and the browser hand-off for Google sign-in.

use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use inquire::{CustomType, Password, PasswordDisplayMode, Select, Text};
use sensors_core::{
    EventsSection, ForecastMode, HomeSection, UnitSystem, WeatherSection,
    auth::Authorizer,
    config::{DEFAULT_CALENDAR_ID, DEFAULT_EVENTS_NAME, DEFAULT_MAX_RESULTS, DEFAULT_WEATHER_NAME},
};
use tracing::warn;

/// Opens the consent page in the default browser, printing the address too
/// for machines where that does not work.
#[derive(Debug)]
pub struct BrowserAuthorizer;

#[async_trait]
impl Authorizer for BrowserAuthorizer {
    async fn present(&self, consent_url: &str) -> anyhow::Result<()> {
        eprintln!("Allow read access to your calendar in the browser window that opens.");
        eprintln!("If none opens, visit this address on this machine:\n\n  {consent_url}\n");

        if let Err(e) = open::that(consent_url) {
            warn!("failed to open browser: {e}");
        }
        Ok(())
    }
}

pub fn home_section(current: &HomeSection) -> anyhow::Result<HomeSection> {
    let latitude = optional_f64("Home latitude:", current.latitude)?;
    let longitude = optional_f64("Home longitude:", current.longitude)?;

    let start = current
        .units()
        .ok()
        .and_then(|u| UnitSystem::all().iter().position(|x| *x == u))
        .unwrap_or(0);
    let units = Select::new("Units:", UnitSystem::all().to_vec())
        .with_starting_cursor(start)
        .prompt()?;

    Ok(HomeSection {
        latitude,
        longitude,
        units: Some(units.as_str().to_string()),
    })
}

pub fn weather_section(current: &WeatherSection) -> anyhow::Result<WeatherSection> {
    let api_key = match &current.api_key {
        Some(existing) => {
            let entered = Password::new("OpenWeatherMap API key (empty keeps the current one):")
                .with_display_mode(PasswordDisplayMode::Masked)
                .without_confirmation()
                .prompt()?;
            if entered.trim().is_empty() { existing.clone() } else { entered }
        }
        None => Password::new("OpenWeatherMap API key:")
            .with_display_mode(PasswordDisplayMode::Masked)
            .without_confirmation()
            .prompt()?,
    };

    let latitude = optional_f64("Latitude (empty uses home):", current.latitude)?;
    let longitude = optional_f64("Longitude (empty uses home):", current.longitude)?;

    let start = current
        .mode
        .as_deref()
        .and_then(|m| ForecastMode::try_from(m).ok())
        .and_then(|m| ForecastMode::all().iter().position(|x| *x == m))
        .unwrap_or(0);
    let mode = Select::new("Forecast mode:", ForecastMode::all().to_vec())
        .with_starting_cursor(start)
        .prompt()?;

    let name = text_with_default("Entity name:", current.name.as_deref(), DEFAULT_WEATHER_NAME)?;

    Ok(WeatherSection {
        api_key: Some(api_key.trim().to_string()),
        latitude,
        longitude,
        mode: Some(mode.as_str().to_string()),
        name: Some(name),
    })
}

pub fn events_section(current: &EventsSection) -> anyhow::Result<EventsSection> {
    let name = text_with_default("Entity name:", current.name.as_deref(), DEFAULT_EVENTS_NAME)?;
    let calendar_id =
        text_with_default("Calendar id:", current.calendar_id.as_deref(), DEFAULT_CALENDAR_ID)?;
    let max_results = CustomType::<u32>::new("Max results:")
        .with_default(current.max_results.unwrap_or(DEFAULT_MAX_RESULTS))
        .with_error_message("Please type a whole number")
        .prompt()?;

    let client_id = optional_text("OAuth client id (empty to skip):", current.client_id.as_deref())?;
    let client_secret = match &client_id {
        Some(_) => Some(
            Password::new("OAuth client secret:")
                .with_display_mode(PasswordDisplayMode::Masked)
                .without_confirmation()
                .prompt()?,
        )
        .filter(|s| !s.trim().is_empty())
        .or_else(|| current.client_secret.clone()),
        None => None,
    };

    let token_file = optional_text(
        "Token file (empty uses the default location):",
        current.token_file.as_deref().and_then(|p| p.to_str()),
    )?
    .map(PathBuf::from);

    Ok(EventsSection {
        name: Some(name),
        calendar_id: Some(calendar_id),
        max_results: Some(max_results),
        client_id,
        client_secret,
        token_file,
    })
}

fn text_with_default(message: &str, current: Option<&str>, fallback: &str) -> anyhow::Result<String> {
    let answer = Text::new(message)
        .with_default(current.unwrap_or(fallback))
        .prompt()?;
    Ok(answer.trim().to_string())
}

fn optional_text(message: &str, current: Option<&str>) -> anyhow::Result<Option<String>> {
    let answer = Text::new(message)
        .with_initial_value(current.unwrap_or_default())
        .prompt()?;
    Ok(Some(answer.trim().to_string()).filter(|s| !s.is_empty()))
}

fn optional_f64(message: &str, current: Option<f64>) -> anyhow::Result<Option<f64>> {
    let initial = current.map(|v| v.to_string()).unwrap_or_default();
    let answer = Text::new(message)
        .with_initial_value(&initial)
        .with_validator(|input: &str| {
            let input = input.trim();
            if input.is_empty() || input.parse::<f64>().is_ok() {
                Ok(inquire::validator::Validation::Valid)
            } else {
                Ok(inquire::validator::Validation::Invalid(
                    "Please type a decimal number or leave empty".into(),
                ))
            }
        })
        .prompt()?;

    parse_optional_f64(&answer)
}

fn parse_optional_f64(input: &str) -> anyhow::Result<Option<f64>> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(None);
    }
    input
        .parse()
        .map(Some)
        .with_context(|| format!("'{input}' is not a number"))
}
