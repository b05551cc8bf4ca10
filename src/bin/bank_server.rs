use std::{error::Error, net::SocketAddr, num::NonZeroUsize, sync::Arc};

use clap::Parser;
use switchboard::{
    cli::{merge_routes, serve_until_interrupted},
    protocol::{Client, Concurrency, Route, Server},
    service::bank::{BankService, Ledger},
};

const DEFAULT_ROUTES: &[&str] = &["UTIL=localhost:8082"];

#[derive(Debug, Parser)]
#[command(version, about = "Bank ledger service", long_about = None)]
struct Cli {
    /// Listen for new connections at address
    #[arg(long, default_value = "127.0.0.1:8081")]
    address: SocketAddr,
    /// Logical identity of this service
    #[arg(long, default_value = "BANK")]
    identity: String,
    /// Identity of the utility service bill payments are forwarded to
    #[arg(long, default_value = "UTIL")]
    utility: String,
    /// Addressing table entry, SERVICE=host:port (repeatable); replaces the default for SERVICE
    #[arg(long = "route")]
    routes: Vec<Route>,
    /// Serve connections from a fixed pool of this many workers
    #[arg(long)]
    workers: Option<NonZeroUsize>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let client = Client::new(merge_routes(DEFAULT_ROUTES, cli.routes)?);
    let service = BankService::new(&cli.identity, Arc::new(Ledger::new()), client, cli.utility);
    let server = Server::new(cli.identity, cli.address, service)
        .with_concurrency(cli.workers.map_or(Concurrency::Unbounded, Concurrency::Bounded));

    serve_until_interrupted(&server)
}
