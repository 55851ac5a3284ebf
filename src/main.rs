mod balance;
mod core;
mod detect;
mod display;
mod link;
mod recurring;
mod server;
mod settings;
mod store;
mod sync;
mod txn;
mod upstream;

use anyhow::Result;
use clap::{arg, Arg, Command};
use tracing_subscriber::{
    filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use crate::settings::Settings;

static CLIENT_NAME: &str = "cash-snapshot";

fn user_arg() -> clap::Arg<'static> {
    arg!(user: -u --user <USER_ID> "The user whose data to operate on.")
}

fn json_arg() -> clap::Arg<'static> {
    arg!(json: --json "Prints the result as JSON.")
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run() -> Result<()> {
    let app = Command::new(CLIENT_NAME)
        .about("Mirrors Plaid transactions into a local store and finds \
         recurring payments in them.")
        .version("0.1.0")
        .subcommand_required(true)
        .allow_external_subcommands(false)
        .arg(arg!(CONFIG: -c --config [FILE] "Sets a custom config file"))
        .arg(arg!(verbose: -v --verbose "Logs progress to stderr"))
        .subcommand(Command::new("transactions")
            .subcommand_required(true)
            .about("Synchronizes and prints stored transactions.")
            .subcommand(Command::new("sync")
                .about("Pulls every change since the last sync for each of the user's items.")
                .arg(user_arg())
                .arg(json_arg()))
            .subcommand(Command::new("print")
                .about("Prints all stored transactions of the user.")
                .arg(user_arg())
                .arg(json_arg())))
        .subcommand(Command::new("recurring")
            .about("Detects recurring payments.")
            .arg(user_arg())
            .arg(Arg::new("type")
                .short('t')
                .long("type")
                .takes_value(true)
                .value_name("DIRECTION")
                .help("inflow or outflow, defaults to outflow."))
            .arg(arg!(saved: --saved "Lists the streams recorded by earlier runs instead."))
            .arg(json_arg()))
        .subcommand(Command::new("link")
            .subcommand_required(true)
            .about("Links new items through Plaid Link.")
            .subcommand(Command::new("token")
                .about("Issues a link token to open Plaid Link with.")
                .arg(arg!(user: -u --user [USER_ID] "The user to link for, a new id when omitted."))
                .arg(arg!(client_name: --"client-name" [NAME] "Overrides link.client_name."))
                .arg(json_arg()))
            .subcommand(Command::new("sandbox-token")
                .about("Creates a sandbox public token without going through Link.")
                .arg(arg!(institution: --institution [INSTITUTION_ID] "Defaults to First Platypus Bank."))
                .arg(Arg::new("products")
                    .long("products")
                    .takes_value(true)
                    .multiple_values(true)
                    .value_name("PRODUCT")
                    .help("Initial products, defaults to link.products."))
                .arg(json_arg()))
            .subcommand(Command::new("exchange")
                .about("Exchanges a public token and records the new item.")
                .arg(user_arg())
                .arg(Arg::new("public_token")
                    .short('p')
                    .long("public-token")
                    .takes_value(true)
                    .required(true)
                    .value_name("TOKEN")
                    .help("The public token returned by Plaid Link."))
                .arg(json_arg())))
        .subcommand(Command::new("balances")
            .about("Refreshes account balances and summarizes the user's cash.")
            .arg(user_arg())
            .arg(arg!(saved: --saved "Summarizes the stored balances without refreshing them."))
            .arg(json_arg()))
        .subcommand(Command::new("serve")
            .about("Serves the sync, recurring, link and summary endpoints over HTTP.")
            .arg(arg!(addr: --addr [ADDR] "Address to listen on, overrides server.addr.")));

    let matches = app.get_matches();
    let serving = matches.subcommand_name() == Some("serve");
    if matches.is_present("verbose") || serving {
        init_tracing();
    }

    let settings = Settings::new(matches.value_of("CONFIG"))?;
    match matches.subcommand() {
        Some(("transactions", sub)) => txn::run(sub, settings).await?,
        Some(("recurring", sub)) => recurring::run(sub, settings).await?,
        Some(("link", sub)) => link::run(sub, settings).await?,
        Some(("balances", sub)) => balance::run(sub, settings).await?,
        Some(("serve", sub)) => server::run(sub.value_of("addr"), settings).await?,
        None => unreachable!("subcommand is required"),
        _ => unreachable!(),
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}
