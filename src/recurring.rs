use anyhow::Result;
use clap::ArgMatches;

use crate::detect::Detector;
use crate::display;
use crate::settings::Settings;
use crate::store::SqliteStore;

/// Detects streams for the user, or with `--saved` lists the provider
/// streams recorded by earlier runs.
pub(crate) async fn run(matches: &ArgMatches, settings: Settings) -> Result<()> {
    // SAFETY: `--user` is required.
    let user_id = matches.value_of("user").unwrap();
    let kind = matches.value_of("type").unwrap_or("outflow");
    let json = matches.is_present("json");

    let store = SqliteStore::new(&settings.database_uri()?).await?;

    if matches.is_present("saved") {
        let records = store.recurring().by_user(user_id).await?;
        if json {
            println!("{}", serde_json::to_string_pretty(&records)?);
        } else {
            print!("{}", display::records_table(&records)?);
        }
        return Ok(());
    }

    let client = plaid_client::Client::new(settings.client_config())?;
    let result = Detector::new(store, client).detect(user_id, kind).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", display::streams_table(&result.recurring_transactions)?);
        println!(
            "\n{} {} streams ({} from plaid, {} detected)",
            result.total_streams,
            result.direction,
            result.detection_methods.plaid_api,
            result.detection_methods.custom_detector
        );
    }

    Ok(())
}
