//! CLI utilities for the switchboard binaries.
//!
//! The ATM front-end turns each [`AtmCommand`] into a single [`Request`] and prints the
//! [`Response`]; the server binaries share [`serve_until_interrupted`].
use std::{error::Error, str::FromStr, sync::mpsc};

use clap::Subcommand;
use log::info;
use thiserror::Error;

use crate::protocol::{
    Date, Directory, DirectoryError, Handler, Operation, Outcome, Request, Response, Route, Server,
};

/// Operations available from the ATM.
#[derive(Debug, Clone, PartialEq, Subcommand)]
pub enum AtmCommand {
    /// Open a checking and a saving account
    Signup { name: String, pin: String },
    /// Look up the accounts of an existing user
    Login { name: String, pin: String },
    /// Show an account balance
    Balance { account: String },
    /// Deposit into an account
    Deposit { account: String, amount: f64 },
    /// Withdraw from a checking account
    Withdraw { account: String, amount: f64 },
    /// Move money between two accounts
    Transfer {
        source: String,
        target: String,
        amount: f64,
    },
    /// Pay a utility bill from a checking account
    PayBill {
        bank_account: String,
        util_account: String,
        amount: f64,
    },
    /// Register with the utility company
    UtilSignup { username: String, password: String },
    /// Log in to the utility company by username or account number
    UtilLogin {
        name_or_number: String,
        password: String,
    },
    /// Show the next unpaid bill
    NextBill { account: String },
    /// Show recently paid bills
    BillHistory { account: String },
}

impl AtmCommand {
    /// Builds the request for this command, addressed to `bank` or `utility`.
    pub fn to_request(&self, sender: &str, bank: &str, utility: &str) -> Request {
        match self {
            AtmCommand::Signup { name, pin } => Request::new(sender, bank, Operation::Signup)
                .with_data("name", name.as_str())
                .with_data("pin", pin.as_str()),
            AtmCommand::Login { name, pin } => Request::new(sender, bank, Operation::Login)
                .with_data("name", name.as_str())
                .with_data("pin", pin.as_str()),
            AtmCommand::Balance { account } => {
                Request::new(sender, bank, Operation::ViewBalance)
                    .with_data("accountId", account.as_str())
            }
            AtmCommand::Deposit { account, amount } => {
                Request::new(sender, bank, Operation::Deposit)
                    .with_data("accountId", account.as_str())
                    .with_data("amount", *amount)
            }
            AtmCommand::Withdraw { account, amount } => {
                Request::new(sender, bank, Operation::Withdraw)
                    .with_data("accountId", account.as_str())
                    .with_data("amount", *amount)
            }
            AtmCommand::Transfer {
                source,
                target,
                amount,
            } => Request::new(sender, bank, Operation::Transfer)
                .with_data("sourceAccountId", source.as_str())
                .with_data("targetAccountId", target.as_str())
                .with_data("amount", *amount),
            AtmCommand::PayBill {
                bank_account,
                util_account,
                amount,
            } => Request::new(sender, bank, Operation::PayBill)
                .with_data("bankAccountId", bank_account.as_str())
                .with_data("utilAccountId", util_account.as_str())
                .with_data("amount", *amount),
            AtmCommand::UtilSignup { username, password } => {
                Request::new(sender, utility, Operation::Signup)
                    .with_data("username", username.as_str())
                    .with_data("password", password.as_str())
            }
            AtmCommand::UtilLogin {
                name_or_number,
                password,
            } => Request::new(sender, utility, Operation::Login)
                .with_data("nameOrNumber", name_or_number.as_str())
                .with_data("password", password.as_str()),
            AtmCommand::NextBill { account } => {
                Request::new(sender, utility, Operation::ViewNextBill)
                    .with_data("accountId", account.as_str())
            }
            AtmCommand::BillHistory { account } => {
                Request::new(sender, utility, Operation::ViewBillHistory)
                    .with_data("accountId", account.as_str())
            }
        }
    }
}

/// Outcome line followed by the payload, one `key: value` per line in key order.
pub fn render(response: &Response) -> String {
    let outcome = match response.kind() {
        Outcome::Success => "SUCCESS",
        Outcome::Declined => "DECLINED",
        Outcome::Error => "ERROR",
    };
    let mut entries = response.payload().iter().collect::<Vec<_>>();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut out = format!("{outcome} from {}", response.sender());
    for (key, value) in entries {
        out.push_str(&format!("\n  {key}: {value}"));
    }
    out
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid bill '{0}', expected ACCOUNT=AMOUNT@YYYY-MM-DD")]
pub struct BillSeedError(String);

/// Bill issued at utility server start-up, written `ACCOUNT=AMOUNT@YYYY-MM-DD`.
#[derive(Debug, Clone, PartialEq)]
pub struct BillSeed {
    pub account: String,
    pub amount: f64,
    pub due: Date,
}

impl FromStr for BillSeed {
    type Err = BillSeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BillSeedError(s.to_string());
        let (account, rest) = s.split_once('=').ok_or_else(invalid)?;
        let (amount, due) = rest.split_once('@').ok_or_else(invalid)?;
        if account.trim().is_empty() {
            return Err(invalid());
        }

        Ok(BillSeed {
            account: account.trim().to_string(),
            amount: amount.trim().parse().map_err(|_| invalid())?,
            due: due.parse().map_err(|_| invalid())?,
        })
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid user '{0}', expected USERNAME:PASSWORD")]
pub struct UserSeedError(String);

/// Utility user registered at server start-up, written `USERNAME:PASSWORD`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSeed {
    pub username: String,
    pub password: String,
}

impl FromStr for UserSeed {
    type Err = UserSeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((username, password)) if !username.trim().is_empty() && !password.is_empty() => {
                Ok(UserSeed {
                    username: username.trim().to_string(),
                    password: password.to_string(),
                })
            }
            _ => Err(UserSeedError(s.to_string())),
        }
    }
}

/// Addressing table made of `defaults` with `routes` layered on top; a route for a service
/// that already has a default replaces it.
pub fn merge_routes(defaults: &[&str], routes: Vec<Route>) -> Result<Directory, DirectoryError> {
    let defaults = defaults
        .iter()
        .map(|route| route.parse::<Route>())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(defaults.into_iter().chain(routes).collect())
}

/// Starts `server` and blocks until SIGINT, then stops it.
pub fn serve_until_interrupted<H: Handler>(server: &Server<H>) -> Result<(), Box<dyn Error>> {
    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;

    let addr = server.start()?.local_addr();
    info!("{} serving on {addr}; press Ctrl-C to stop", server.identity());

    rx.recv()?;
    server.stop()?;
    Ok(())
}
