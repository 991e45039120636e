use anyhow::{Context, Result};
use clap::ArgMatches;
use thiserror::Error;

use mysql_service::{DatabaseService, Service};

use crate::cli::utils::pluralize;

/// Returned from the handler to force a rollback on `--rollback`.
#[derive(Debug, Error)]
#[error("dry run: {rows_affected} row(s) affected, rolled back")]
struct DryRun {
    rows_affected: u64,
}

pub async fn handle_exec(matches: &ArgMatches, service: &DatabaseService) -> Result<()> {
    let sql = matches
        .get_one::<String>("sql")
        .context("No SQL statement given")?
        .clone();
    let rollback = matches.get_flag("rollback");

    service
        .start()
        .await
        .context("Failed to start the database service")?;

    let result = service
        .run_with_transaction(move |conn| {
            Box::pin(async move {
                let done = sqlx::query(&sql).execute(&mut *conn).await?;
                let rows_affected = done.rows_affected();
                if rollback {
                    return Err(anyhow::Error::new(DryRun { rows_affected }));
                }
                Ok::<_, anyhow::Error>(rows_affected)
            })
        })
        .await;

    service.stop().await?;

    match result {
        Ok(rows_affected) => {
            println!("{} affected, committed", pluralize("row", rows_affected));
            Ok(())
        }
        Err(err) => match err.downcast_ref::<DryRun>() {
            Some(dry_run) => {
                println!("{dry_run}");
                Ok(())
            }
            None => Err(err),
        },
    }
}
