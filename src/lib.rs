pub mod cli;
pub mod protocol;
pub mod service;

pub use protocol::{
    Client, Directory, Endpoint, Handler, Operation, Outcome, Request, Response, Server,
};
pub use service::{bank::BankService, utility::UtilityService};
