use clap::Parser;
use imgscrap::configuration::config::Config;
use imgscrap::controller::Controller;
use log::{error, info};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "imgscrap")]
#[command(version)]
#[command(about = "Scrapes the images of a web page into a live thumbnail gallery")]
struct Args {
    /// TOML configuration file; defaults and IMGSCRAP_* variables apply without one
    config_file: Option<PathBuf>,

    /// Overrides `bind_address`
    #[arg(long, env = "IMGSCRAP_BIND_ADDRESS")]
    bind_address: Option<String>,

    /// Overrides `port`
    #[arg(long, env = "IMGSCRAP_PORT")]
    port: Option<u16>,
}

fn load_config(args: &Args) -> Result<Config, imgscrap::error_handling::types::ConfigError> {
    let mut config = match &args.config_file {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    if let Some(addr) = &args.bind_address {
        config.bind_address = addr.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    // https://docs.rs/env_logger/latest/env_logger/
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .init();

    let args = Args::parse();

    info!("Importing configuration");
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Unable to import configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!("Configuration imported successfully");

    let controller = match Controller::new(config) {
        Ok(controller) => controller,
        Err(e) => {
            error!("Unable to create a controller instance: {}, exiting...", e);
            std::process::exit(1);
        }
    };

    tokio::select! {
        result = controller.run() => {
            if let Err(e) = result {
                error!("Error occured in the controller process: {}, exiting...", e);
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
        }
    }
}
