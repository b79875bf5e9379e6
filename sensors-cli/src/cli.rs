use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::bail;
use clap::{Parser, Subcommand, ValueEnum};
use sensors_core::{
    Config, EntitySnapshot, EventsSection, Host, SetupError, WeatherSection,
    auth::{Authorizer, TokenStore},
    events, weather,
};
use tracing::{debug, warn};

use crate::{output, prompt};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "sensors", version, about = "Throttled weather and calendar sensors")]
pub struct Cli {
    /// Use this config file instead of the platform default.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging including module targets.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Section {
    Home,
    Weather,
    Events,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Platform {
    Weather,
    Events,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactively write one section of the config file.
    Configure { section: Section },

    /// Sign in to Google Calendar and store the token.
    Auth {
        /// Delete the stored token instead.
        #[arg(long)]
        logout: bool,
    },

    /// Set up one platform, update it once and print its entity.
    Show {
        platform: Platform,

        #[arg(long)]
        json: bool,
    },

    /// Set up every configured platform and keep ticking the host.
    Watch {
        /// Seconds between host ticks.
        #[arg(long, default_value_t = 30)]
        interval: u64,

        /// Stop after this many ticks.
        #[arg(long)]
        ticks: Option<u64>,

        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let config = match &self.config {
            Some(path) => Config::load_from(path)?,
            None => Config::load()?,
        };

        match self.command {
            Command::Configure { section } => configure(config, section, self.config),
            Command::Auth { logout } => auth(&config, logout).await,
            Command::Show { platform, json } => show(config, platform, json).await,
            Command::Watch {
                interval,
                ticks,
                json,
            } => watch(config, interval, ticks, json).await,
        }
    }
}

fn configure(mut config: Config, section: Section, path: Option<PathBuf>) -> anyhow::Result<()> {
    match section {
        Section::Home => config.home = prompt::home_section(&config.home)?,
        Section::Weather => {
            let current = config.weather.clone().unwrap_or_default();
            let section = prompt::weather_section(&current)?;
            weather::check_section(&section, &config.home)?;
            config.weather = Some(section);
        }
        Section::Events => {
            let current = config.events.clone().unwrap_or_default();
            let section = prompt::events_section(&current)?;
            section.validate()?;
            config.events = Some(section);
        }
    }

    let path = match path {
        Some(path) => path,
        None => Config::config_file_path()?,
    };
    config.save_to(&path)?;
    println!("Saved configuration to {}", path.display());
    Ok(())
}

fn events_config(config: &Config) -> Result<&EventsSection, SetupError> {
    config
        .events
        .as_ref()
        .ok_or(SetupError::NotConfigured(events::PLATFORM))
}

fn weather_config(config: &Config) -> Result<&WeatherSection, SetupError> {
    config
        .weather
        .as_ref()
        .ok_or(SetupError::NotConfigured(weather::PLATFORM))
}

async fn auth(config: &Config, logout: bool) -> anyhow::Result<()> {
    let validated = events_config(config)?.validate()?;

    if logout {
        let store = TokenStore::new(&validated.token_file);
        if store.clear()? {
            println!("Removed {}", store.path().display());
        } else {
            println!("No stored token at {}", store.path().display());
        }
        return Ok(());
    }

    let authorizer: Arc<dyn Authorizer> = Arc::new(prompt::BrowserAuthorizer);
    let credentials = events::credentials_for(&validated, Some(authorizer))?;
    credentials.credential().await?;
    println!("Signed in. Token stored in {}", validated.token_file.display());
    Ok(())
}

async fn show(config: Config, platform: Platform, json: bool) -> anyhow::Result<()> {
    let mut host = Host::with_system_clock(config.home.clone());

    match platform {
        Platform::Weather => {
            weather::setup_platform(&mut host, weather_config(&config)?).await?;
        }
        Platform::Events => {
            let authorizer: Arc<dyn Authorizer> = Arc::new(prompt::BrowserAuthorizer);
            events::setup_platform(&mut host, events_config(&config)?, Some(authorizer)).await?;
        }
    }

    for snapshot in host.snapshots() {
        output::print_snapshot(&snapshot, json)?;
    }
    Ok(())
}

/// Set up what is configured; a platform that fails is skipped, the rest keep running.
async fn setup_all(config: &Config) -> Host {
    let mut host = Host::with_system_clock(config.home.clone());

    if let Some(section) = &config.weather {
        if let Err(e) = weather::setup_platform(&mut host, section).await {
            warn!("skipping weather platform: {e}");
        }
    }
    if let Some(section) = &config.events {
        // Watching is unattended, so only stored or refreshable tokens are used.
        if let Err(e) = events::setup_platform(&mut host, section, None).await {
            warn!("skipping events platform: {e}");
        }
    }
    host
}

async fn watch(config: Config, interval: u64, ticks: Option<u64>, json: bool) -> anyhow::Result<()> {
    if interval == 0 {
        bail!("--interval must be at least 1 second");
    }

    let mut host = setup_all(&config).await;
    if host.entities().is_empty() {
        bail!("No platform could be set up.\nHint: run `sensors configure weather` or `sensors configure events`.");
    }

    let mut last: Vec<Option<EntitySnapshot>> = Vec::new();
    let mut timer = tokio::time::interval(Duration::from_secs(interval));
    let mut done = 0u64;

    loop {
        tokio::select! {
            _ = timer.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                debug!("interrupted");
                return Ok(());
            }
        }

        // The first tick fires immediately; entities were already updated during setup.
        if done > 0 {
            host.tick().await;
        }

        for snapshot in changed(&mut last, host.snapshots()) {
            output::print_change(&snapshot, json)?;
        }

        done += 1;
        if ticks.is_some_and(|limit| done >= limit) {
            return Ok(());
        }
    }
}

/// Snapshots that differ from the previous tick. Entities are matched by
/// registration order, since names need not be unique.
fn changed(last: &mut Vec<Option<EntitySnapshot>>, snapshots: Vec<EntitySnapshot>) -> Vec<EntitySnapshot> {
    if last.len() < snapshots.len() {
        last.resize(snapshots.len(), None);
    }

    snapshots
        .into_iter()
        .zip(last.iter_mut())
        .filter_map(|(snapshot, previous)| {
            if previous.as_ref() == Some(&snapshot) {
                return None;
            }
            *previous = Some(snapshot.clone());
            Some(snapshot)
        })
        .collect()
}
