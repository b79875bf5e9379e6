//! Binary crate for the `sensors` command-line host.
//!
//! This crate focuses on:
//! - Parsing CLI arguments
//! - Interactive configuration and Google sign-in
//! - Ticking the host and printing entity state

use clap::Parser;
use sensors_core::logging::{LogFormat, LoggingConfig, init_tracing};

mod cli;
mod output;
mod prompt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cmd = cli::Cli::parse();

    let logging = if cmd.verbose {
        LoggingConfig::verbose()
    } else {
        LoggingConfig::default()
    };
    let format = if cmd.json_logs { LogFormat::Json } else { LogFormat::Compact };
    init_tracing(logging.with_format(format))?;

    cmd.run().await
}
