use std::{error::Error, net::SocketAddr, num::NonZeroUsize, sync::Arc};

use clap::Parser;
use log::info;
use switchboard::{
    cli::{BillSeed, UserSeed, serve_until_interrupted},
    protocol::{Concurrency, Server},
    service::utility::{BillingStore, UtilityService},
};

#[derive(Debug, Parser)]
#[command(version, about = "Utility billing service", long_about = None)]
struct Cli {
    /// Listen for new connections at address
    #[arg(long, default_value = "127.0.0.1:8082")]
    address: SocketAddr,
    /// Logical identity of this service
    #[arg(long, default_value = "UTIL")]
    identity: String,
    /// Register a user at start-up, USERNAME:PASSWORD (repeatable)
    #[arg(long = "user")]
    users: Vec<UserSeed>,
    /// Issue a bill at start-up, ACCOUNT=AMOUNT@YYYY-MM-DD (repeatable)
    #[arg(long = "bill")]
    bills: Vec<BillSeed>,
    /// Serve connections from a fixed pool of this many workers
    #[arg(long)]
    workers: Option<NonZeroUsize>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let store = Arc::new(BillingStore::new());
    for user in cli.users {
        let number = store.signup(&user.username, &user.password)?;
        info!("registered {} as account {number}", user.username);
    }
    for bill in cli.bills {
        let id = store.issue_bill(&bill.account, bill.amount, bill.due)?;
        info!("issued bill {id} to {}", bill.account);
    }

    let service = UtilityService::new(&cli.identity, store);
    let server = Server::new(cli.identity, cli.address, service)
        .with_concurrency(cli.workers.map_or(Concurrency::Unbounded, Concurrency::Bounded));

    serve_until_interrupted(&server)
}
