use anyhow::Result;

use mysql_service::{ConnectionTarget, DatabaseService};

pub fn handle_config(service: &DatabaseService) -> Result<()> {
    let configuration = service.configuration();

    print!("{}", serde_yaml::to_string(&configuration.redacted())?);
    println!("# target: {}", ConnectionTarget::from(&configuration));

    Ok(())
}
