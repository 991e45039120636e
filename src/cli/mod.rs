pub mod commands;
pub mod utils;

use anyhow::{Context, Result};
use clap::ArgMatches;
use std::path::PathBuf;

use mysql_service::{DatabaseService, EnvironmentProvider, Service, YamlFileProvider};

/// Build the service with the provider selected on the command line and
/// apply the configuration it loads.
pub fn build_service(matches: &ArgMatches) -> Result<DatabaseService> {
    let service = match matches.get_one::<PathBuf>("config") {
        Some(path) => {
            let mut provider = YamlFileProvider::new(path);
            if let Some(section) = matches.get_one::<String>("section") {
                provider = provider.section(section);
            }
            DatabaseService::default().with_provider(provider)
        }
        None => DatabaseService::default().with_provider(EnvironmentProvider::default()),
    };

    let configuration = service
        .load_configuration()
        .context("Failed to load configuration")?;
    service.apply_configuration(&configuration)?;

    Ok(service)
}
