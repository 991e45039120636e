use anyhow::{Context, Result};
use clap::ArgMatches;
use serde_json::json;
use sqlx::Connection;
use std::time::Instant;

use mysql_service::{DatabaseService, Service};

use crate::cli::utils::format_duration;

pub async fn handle_status(matches: &ArgMatches, service: &DatabaseService) -> Result<()> {
    let format = matches
        .get_one::<String>("format")
        .map(String::as_str)
        .unwrap_or("plain");

    service
        .start()
        .await
        .context("Failed to start the database service")?;

    let started = Instant::now();
    let ping = service
        .run_with_connection(|conn| {
            Box::pin(async move {
                conn.ping().await?;
                Ok::<_, anyhow::Error>(())
            })
        })
        .await;
    let latency = started.elapsed();

    let status = service.status().await;
    service.stop().await?;
    ping.context("Ping failed")?;

    let configuration = service.configuration();
    match format {
        "json" => {
            let report = json!({
                "database": configuration.database,
                "host": configuration.host,
                "port": configuration.port,
                "latency_ms": latency.as_millis() as u64,
                "pool": status.pool,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        _ => {
            println!("MySQL Service Status");
            println!("====================\n");
            println!("Target:   {}:{}/{}", configuration.host, configuration.port, configuration.database);
            println!("Ping:     ok ({})", format_duration(latency));
            if let Some(pool) = status.pool {
                println!(
                    "Pool:     {} open, {} idle, {} in use, max {}",
                    pool.size, pool.idle_connections, pool.active_connections, pool.max_size
                );
            }
        }
    }

    Ok(())
}
