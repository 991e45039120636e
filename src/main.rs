use clap::{Arg, Command};
use dotenv::dotenv;
use mysql_service::{LoggingConfig, logging};
use std::path::PathBuf;
use std::process;

mod cli;

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenv().ok();

    let matches = build_cli().get_matches();

    let logging_config = LoggingConfig {
        level: matches.get_one::<String>("log-level").cloned().unwrap_or_else(|| "warn".to_string()),
        format: matches.get_one::<String>("log-format").cloned().unwrap_or_else(|| "compact".to_string()),
    };
    if let Err(e) = logging::init(&logging_config) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    if let Err(e) = run_command(matches).await {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn build_cli() -> Command {
    Command::new("mysql-service")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Managed MySQL connection pool service")
        .long_about("Starts the MySQL service from a YAML file or MYSQL_* environment variables and runs checks or statements through it")
        .arg_required_else_help(true)
        .subcommand(
            Command::new("status")
                .about("Start the service, ping the database and report pool statistics")
                .arg(
                    Arg::new("format")
                        .short('f')
                        .long("format")
                        .help("Output format")
                        .value_parser(["plain", "json"])
                        .default_value("plain")
                )
        )
        .subcommand(
            Command::new("config")
                .about("Print the resolved configuration with the password redacted")
        )
        .subcommand(
            Command::new("exec")
                .about("Run one SQL statement inside a transaction")
                .arg(
                    Arg::new("sql")
                        .help("Statement to execute")
                        .required(true)
                        .index(1)
                )
                .arg(
                    Arg::new("rollback")
                        .long("rollback")
                        .help("Roll the transaction back instead of committing (dry run)")
                        .action(clap::ArgAction::SetTrue)
                )
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("YAML configuration file; MYSQL_* environment variables are used when omitted")
                .global(true)
                .value_parser(clap::value_parser!(PathBuf))
        )
        .arg(
            Arg::new("section")
                .long("section")
                .help("Top-level YAML section holding the service configuration")
                .global(true)
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .help("Log filter, overridden by RUST_LOG")
                .global(true)
                .default_value("warn")
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .help("Log format")
                .global(true)
                .value_parser(["pretty", "json", "compact"])
                .default_value("compact")
        )
}

async fn run_command(matches: clap::ArgMatches) -> anyhow::Result<()> {
    let service = cli::build_service(&matches)?;

    match matches.subcommand() {
        Some(("status", sub_matches)) => {
            cli::commands::status::handle_status(sub_matches, &service).await?
        }
        Some(("config", _)) => {
            cli::commands::config::handle_config(&service)?
        }
        Some(("exec", sub_matches)) => {
            cli::commands::exec::handle_exec(sub_matches, &service).await?
        }
        _ => {
            unreachable!("Command parsing should ensure we never reach this");
        }
    }

    Ok(())
}
