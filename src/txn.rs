use anyhow::Result;
use clap::ArgMatches;
use tracing::info;

use crate::display;
use crate::settings::Settings;
use crate::store::SqliteStore;
use crate::sync::SyncEngine;

#[tracing::instrument(skip(settings))]
async fn sync(user_id: &str, json: bool, settings: Settings) -> Result<()> {
    let store = SqliteStore::new(&settings.database_uri()?).await?;
    let client = plaid_client::Client::new(settings.client_config())?;
    let engine = SyncEngine::new(store, client, settings.sync_options());

    info!("Pulling transactions for user {}.", user_id);
    let result = engine.sync_user(user_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", display::sync_table(&result)?);
    }

    Ok(())
}

async fn print(user_id: &str, json: bool, settings: Settings) -> Result<()> {
    let store = SqliteStore::new(&settings.database_uri()?).await?;
    let txns = store.txns().by_user(user_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&txns)?);
    } else {
        print!("{}", display::transactions_table(&txns)?);
    }

    Ok(())
}

pub(crate) async fn run(matches: &ArgMatches, settings: Settings) -> Result<()> {
    match matches.subcommand() {
        Some((cmd, sub)) => {
            // SAFETY: `--user` is required on every transactions subcommand.
            let user_id = sub.value_of("user").unwrap();
            let json = sub.is_present("json");
            match cmd {
                "sync" => sync(user_id, json, settings).await,
                "print" => print(user_id, json, settings).await,
                _ => unreachable!("unknown transactions subcommand"),
            }
        }
        None => unreachable!("subcommand is required"),
    }
}
