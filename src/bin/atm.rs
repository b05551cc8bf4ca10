use std::{error::Error, process::ExitCode};

use clap::Parser;
use switchboard::{
    cli::{AtmCommand, merge_routes, render},
    protocol::{Client, Route},
};

const DEFAULT_ROUTES: &[&str] = &["BANK=localhost:8081", "UTIL=localhost:8082"];

#[derive(Debug, Parser)]
#[command(version, about = "ATM front-end", long_about = None)]
struct Cli {
    /// Logical identity of this terminal
    #[arg(long, default_value = "ATM")]
    identity: String,
    /// Identity of the bank service
    #[arg(long, default_value = "BANK")]
    bank: String,
    /// Identity of the utility service
    #[arg(long, default_value = "UTIL")]
    utility: String,
    /// Addressing table entry, SERVICE=host:port (repeatable); replaces the default for SERVICE
    #[arg(long = "route")]
    routes: Vec<Route>,
    /// Correlation id attached to the request
    #[arg(long)]
    correlation_id: Option<String>,
    #[command(subcommand)]
    command: AtmCommand,
}

fn main() -> Result<ExitCode, Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let client = Client::new(merge_routes(DEFAULT_ROUTES, cli.routes)?);

    let mut request = cli.command.to_request(&cli.identity, &cli.bank, &cli.utility);
    if let Some(id) = cli.correlation_id {
        request = request.with_correlation_id(id);
    }

    match client.send(&request) {
        Ok(response) => {
            println!("{}", render(&response));
            Ok(if response.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }
        Err(e) => {
            eprintln!("error communicating with {}: {e}", request.receiver());
            Ok(ExitCode::from(2))
        }
    }
}
