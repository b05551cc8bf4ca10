//! Bank ledger service.
//!
//! The [`Ledger`] holds checking and saving accounts plus the users owning them, all in memory
//! and behind one lock. [`BankService`] is the handler registered with the bank's
//! [`Server`](crate::protocol::Server); bill payments are forwarded to the utility service
//! through its [`Client`].
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::info;
use thiserror::Error;

use crate::protocol::{Client, Handler, Operation, Payload, Request, Response, Value};

use super::{ServiceError, amount, dispatch, text};

pub const DAILY_DEPOSIT_LIMIT: f64 = 5000.0;
pub const DAILY_WITHDRAWAL_LIMIT: f64 = 500.0;
pub const DAILY_TRANSFER_LIMIT: f64 = 100.0;

const CHECKING_PREFIX: &str = "Checking";
const SAVING_PREFIX: &str = "Saving";

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Invalid account ID: {0}")]
    InvalidAccountId(String),
    #[error("Account not found: {0}")]
    AccountNotFound(String),
    #[error("Amount must be positive.")]
    NonPositiveAmount,
    #[error("Insufficient funds. Cannot {action} {amount}")]
    InsufficientFunds { action: &'static str, amount: f64 },
    #[error("Daily {kind} limit exceeded. Cannot {action} {amount}")]
    DailyLimitExceeded {
        kind: &'static str,
        action: &'static str,
        amount: f64,
    },
    #[error("Withdrawals are only allowed from Checking accounts.")]
    NotChecking,
    #[error("Source and target accounts must differ.")]
    SameAccount,
    #[error("PIN is taken")]
    PinTaken,
    #[error("Invalid login credentials.")]
    InvalidCredentials,
}

impl From<LedgerError> for ServiceError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::NotChecking => ServiceError::Declined(e.to_string()),
            e => ServiceError::Rejected(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountKind {
    Checking,
    Saving,
}

impl AccountKind {
    /// Kind implied by an account id's prefix.
    pub fn of(account_id: &str) -> Option<Self> {
        if account_id.starts_with(CHECKING_PREFIX) {
            Some(AccountKind::Checking)
        } else if account_id.starts_with(SAVING_PREFIX) {
            Some(AccountKind::Saving)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Account {
    balance: f64,
    deposits_today: f64,
    withdrawals_today: f64,
    transfers_today: f64,
}

/// Ids of the account pair opened for a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Holder {
    pub name: String,
    pub checking: String,
    pub saving: String,
}

#[derive(Debug, Default)]
struct LedgerState {
    accounts: HashMap<String, Account>,
    // Keyed by PIN.
    users: HashMap<String, Holder>,
    opened: u64,
}

impl LedgerState {
    fn account(&mut self, id: &str) -> Result<&mut Account, LedgerError> {
        if AccountKind::of(id).is_none() {
            return Err(LedgerError::InvalidAccountId(id.to_string()));
        }
        self.accounts
            .get_mut(id)
            .ok_or_else(|| LedgerError::AccountNotFound(id.to_string()))
    }

    fn open(&mut self, prefix: &str, balance: f64) -> String {
        self.opened += 1;
        let id = format!("{prefix}{}", self.opened);
        self.accounts.insert(
            id.clone(),
            Account {
                balance,
                ..Account::default()
            },
        );
        id
    }
}

/// In-memory store of accounts and users.
#[derive(Debug, Default)]
pub struct Ledger {
    state: Mutex<LedgerState>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens a checking and a saving account for a new user.
    pub fn signup(&self, name: &str, pin: &str) -> Result<Holder, LedgerError> {
        let mut state = self.state();
        if state.users.contains_key(pin) {
            return Err(LedgerError::PinTaken);
        }

        let holder = Holder {
            name: name.to_string(),
            checking: state.open(CHECKING_PREFIX, 0.0),
            saving: state.open(SAVING_PREFIX, 0.0),
        };
        state.users.insert(pin.to_string(), holder.clone());
        info!("opened {} and {} for {name}", holder.checking, holder.saving);
        Ok(holder)
    }

    pub fn login(&self, name: &str, pin: &str) -> Result<Holder, LedgerError> {
        self.state()
            .users
            .get(pin)
            .filter(|holder| holder.name == name)
            .cloned()
            .ok_or(LedgerError::InvalidCredentials)
    }

    /// Opens a standalone account with an opening balance.
    pub fn open_account(&self, kind: AccountKind, balance: f64) -> String {
        let prefix = match kind {
            AccountKind::Checking => CHECKING_PREFIX,
            AccountKind::Saving => SAVING_PREFIX,
        };
        self.state().open(prefix, balance)
    }

    pub fn balance(&self, id: &str) -> Result<f64, LedgerError> {
        Ok(self.state().account(id)?.balance)
    }

    pub fn deposit(&self, id: &str, amount: f64) -> Result<f64, LedgerError> {
        ensure_positive(amount)?;
        let mut state = self.state();
        let account = state.account(id)?;
        check_deposit(account, amount)?;

        account.balance += amount;
        account.deposits_today += amount;
        Ok(account.balance)
    }

    pub fn withdraw(&self, id: &str, amount: f64) -> Result<f64, LedgerError> {
        if AccountKind::of(id) == Some(AccountKind::Saving) {
            return Err(LedgerError::NotChecking);
        }
        ensure_positive(amount)?;
        let mut state = self.state();
        let account = state.account(id)?;

        if amount > account.balance {
            return Err(LedgerError::InsufficientFunds {
                action: "withdraw",
                amount,
            });
        }
        if account.withdrawals_today + amount > DAILY_WITHDRAWAL_LIMIT {
            return Err(LedgerError::DailyLimitExceeded {
                kind: "withdrawal",
                action: "withdraw",
                amount,
            });
        }

        account.balance -= amount;
        account.withdrawals_today += amount;
        Ok(account.balance)
    }

    /// Moves `amount` between two accounts, returning both new balances. Either both sides
    /// change or neither does.
    pub fn transfer(&self, source: &str, target: &str, amount: f64) -> Result<(f64, f64), LedgerError> {
        ensure_positive(amount)?;
        if source == target {
            return Err(LedgerError::SameAccount);
        }
        let mut state = self.state();

        let from = state.account(source)?;
        if amount > from.balance {
            return Err(LedgerError::InsufficientFunds {
                action: "transfer",
                amount,
            });
        }
        let limited = AccountKind::of(source) == Some(AccountKind::Saving);
        if limited && from.transfers_today + amount > DAILY_TRANSFER_LIMIT {
            return Err(LedgerError::DailyLimitExceeded {
                kind: "transfer",
                action: "transfer",
                amount,
            });
        }
        check_deposit(state.account(target)?, amount)?;

        let from = state.account(source)?;
        from.balance -= amount;
        if limited {
            from.transfers_today += amount;
        }
        let source_balance = from.balance;

        let to = state.account(target)?;
        to.balance += amount;
        to.deposits_today += amount;
        Ok((source_balance, to.balance))
    }

    /// Fails unless `id` is a checking account holding at least `amount`. Only checking
    /// accounts pay bills, so any other id is reported as not found.
    pub fn ensure_funds(&self, id: &str, amount: f64) -> Result<(), LedgerError> {
        if AccountKind::of(id) != Some(AccountKind::Checking) {
            return Err(LedgerError::AccountNotFound(id.to_string()));
        }
        let mut state = self.state();
        let account = state.account(id)?;
        if account.balance < amount {
            return Err(LedgerError::InsufficientFunds {
                action: "pay",
                amount,
            });
        }
        Ok(())
    }

    /// Debits a settled bill payment. Not subject to the withdrawal limit.
    pub fn debit(&self, id: &str, amount: f64) -> Result<f64, LedgerError> {
        ensure_positive(amount)?;
        let mut state = self.state();
        let account = state.account(id)?;
        if account.balance < amount {
            return Err(LedgerError::InsufficientFunds {
                action: "pay",
                amount,
            });
        }
        account.balance -= amount;
        Ok(account.balance)
    }

    /// Starts a new day for every account.
    pub fn reset_daily_limits(&self) {
        for account in self.state().accounts.values_mut() {
            account.deposits_today = 0.0;
            account.withdrawals_today = 0.0;
            account.transfers_today = 0.0;
        }
    }
}

fn ensure_positive(amount: f64) -> Result<(), LedgerError> {
    if amount.is_finite() && amount > 0.0 {
        Ok(())
    } else {
        Err(LedgerError::NonPositiveAmount)
    }
}

fn check_deposit(account: &Account, amount: f64) -> Result<(), LedgerError> {
    if account.deposits_today + amount > DAILY_DEPOSIT_LIMIT {
        return Err(LedgerError::DailyLimitExceeded {
            kind: "deposit",
            action: "deposit",
            amount,
        });
    }
    Ok(())
}

/// Handler of the bank process.
pub struct BankService {
    identity: String,
    ledger: Arc<Ledger>,
    client: Client,
    utility: String,
}

impl BankService {
    /// `client` must be able to resolve `utility`, the identity bill payments are sent to.
    pub fn new(
        identity: impl Into<String>,
        ledger: Arc<Ledger>,
        client: Client,
        utility: impl Into<String>,
    ) -> Self {
        Self {
            identity: identity.into(),
            ledger,
            client,
            utility: utility.into(),
        }
    }

    fn signup(&self, req: &Request) -> Result<Payload, ServiceError> {
        let holder = self.ledger.signup(text(req, "name")?, text(req, "pin")?)?;
        Ok(holder_payload(holder))
    }

    fn login(&self, req: &Request) -> Result<Payload, ServiceError> {
        let holder = self.ledger.login(text(req, "name")?, text(req, "pin")?)?;
        Ok(holder_payload(holder))
    }

    fn view_balance(&self, req: &Request) -> Result<Payload, ServiceError> {
        let balance = self.ledger.balance(text(req, "accountId")?)?;
        Ok([("balance", balance)].into_iter().collect())
    }

    fn deposit(&self, req: &Request) -> Result<Payload, ServiceError> {
        let balance = self
            .ledger
            .deposit(text(req, "accountId")?, amount(req, "amount")?)?;
        Ok([("newBalance", balance)].into_iter().collect())
    }

    fn withdraw(&self, req: &Request) -> Result<Payload, ServiceError> {
        let balance = self
            .ledger
            .withdraw(text(req, "accountId")?, amount(req, "amount")?)?;
        Ok([("newBalance", balance)].into_iter().collect())
    }

    fn transfer(&self, req: &Request) -> Result<Payload, ServiceError> {
        let (source, target) = self.ledger.transfer(
            text(req, "sourceAccountId")?,
            text(req, "targetAccountId")?,
            amount(req, "amount")?,
        )?;
        Ok([("newSourceBalance", source), ("newTargetBalance", target)]
            .into_iter()
            .collect())
    }

    fn pay_bill(&self, req: &Request) -> Result<Payload, ServiceError> {
        let account = text(req, "bankAccountId")?;
        let util_account = text(req, "utilAccountId")?;
        let amount = amount(req, "amount")?;

        match self.ledger.ensure_funds(account, amount) {
            Err(LedgerError::InsufficientFunds { .. }) => {
                return Err(ServiceError::Declined(
                    "Insufficient funds to pay bill.".to_string(),
                ));
            }
            other => other?,
        }

        let mut forward = Request::new(&self.identity, &self.utility, Operation::PayBill)
            .with_data("accountId", util_account)
            .with_data("amount", amount);
        if let Some(id) = req.correlation_id() {
            forward = forward.with_correlation_id(id);
        }

        let reply = self
            .client
            .send(&forward)
            .map_err(|source| ServiceError::Unreachable {
                service: self.utility.clone(),
                source,
            })?;
        if !reply.is_success() {
            return Err(ServiceError::Rejected(format!(
                "Failed to pay bill: {}",
                reply.failure_reason().unwrap_or("no reason given")
            )));
        }

        let balance = self.ledger.debit(account, amount)?;
        let mut payload: Payload = [("newBalance", balance)].into_iter().collect();
        if let Some(details) = reply.get_data("paymentDetails") {
            payload.insert("paymentDetails", details.clone());
        }
        Ok(payload)
    }
}

fn holder_payload(holder: Holder) -> Payload {
    [
        ("checkingAccountId", Value::Text(holder.checking)),
        ("savingAccountId", Value::Text(holder.saving)),
    ]
    .into_iter()
    .collect()
}

impl Handler for BankService {
    fn handle(&self, request: Request) -> Response {
        dispatch(&self.identity, &request, |req| match req.kind() {
            Operation::Signup => self.signup(req),
            Operation::Login => self.login(req),
            Operation::ViewBalance => self.view_balance(req),
            Operation::Deposit => self.deposit(req),
            Operation::Withdraw => self.withdraw(req),
            Operation::Transfer => self.transfer(req),
            Operation::PayBill => self.pay_bill(req),
            other => Err(ServiceError::Unsupported(*other)),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use crate::{
        protocol::{Directory, ERROR_KEY, Endpoint, Outcome, REASON_KEY, Server},
        service::utility::{BillingStore, UtilityService},
    };

    use super::*;

    fn funded(ledger: &Ledger, kind: AccountKind, balance: f64) -> String {
        ledger.open_account(kind, balance)
    }

    fn service(ledger: Arc<Ledger>, directory: Directory) -> BankService {
        BankService::new("BANK", ledger, Client::new(directory), "UTIL")
    }

    #[test]
    fn signup_then_login() {
        let ledger = Ledger::new();
        let holder = ledger.signup("ada", "1234").unwrap();
        assert!(holder.checking.starts_with("Checking"));
        assert!(holder.saving.starts_with("Saving"));

        assert_eq!(ledger.login("ada", "1234").unwrap(), holder);
        assert_eq!(ledger.login("bob", "1234"), Err(LedgerError::InvalidCredentials));
        assert_eq!(ledger.signup("bob", "1234"), Err(LedgerError::PinTaken));
    }

    #[test]
    fn deposit_limits() {
        let ledger = Ledger::new();
        let id = funded(&ledger, AccountKind::Saving, 0.0);

        assert_eq!(ledger.deposit(&id, 4000.0).unwrap(), 4000.0);
        assert!(matches!(
            ledger.deposit(&id, 1500.0),
            Err(LedgerError::DailyLimitExceeded { kind: "deposit", .. })
        ));
        assert_eq!(ledger.deposit(&id, -1.0), Err(LedgerError::NonPositiveAmount));

        ledger.reset_daily_limits();
        assert_eq!(ledger.deposit(&id, 1500.0).unwrap(), 5500.0);
    }

    #[test]
    fn withdraw_rules() {
        let ledger = Ledger::new();
        let checking = funded(&ledger, AccountKind::Checking, 1000.0);
        let saving = funded(&ledger, AccountKind::Saving, 1000.0);

        assert_eq!(ledger.withdraw(&saving, 10.0), Err(LedgerError::NotChecking));
        assert_eq!(ledger.withdraw(&checking, 0.0), Err(LedgerError::NonPositiveAmount));
        assert_eq!(ledger.withdraw(&checking, 400.0).unwrap(), 600.0);
        assert!(matches!(
            ledger.withdraw(&checking, 200.0),
            Err(LedgerError::DailyLimitExceeded { kind: "withdrawal", .. })
        ));
        assert!(matches!(
            ledger.withdraw(&checking, 2000.0),
            Err(LedgerError::InsufficientFunds { .. })
        ));
        assert_eq!(
            ledger.withdraw("Bogus1", 1.0),
            Err(LedgerError::InvalidAccountId("Bogus1".into()))
        );
        assert_eq!(
            ledger.withdraw("Checking99", 1.0),
            Err(LedgerError::AccountNotFound("Checking99".into()))
        );
    }

    #[test]
    fn transfer_is_all_or_nothing() {
        let ledger = Ledger::new();
        let checking = funded(&ledger, AccountKind::Checking, 300.0);
        let saving = funded(&ledger, AccountKind::Saving, 300.0);

        assert_eq!(ledger.transfer(&checking, &saving, 200.0).unwrap(), (100.0, 500.0));
        assert_eq!(ledger.transfer(&saving, &checking, 80.0).unwrap(), (420.0, 180.0));
        assert!(matches!(
            ledger.transfer(&saving, &checking, 30.0),
            Err(LedgerError::DailyLimitExceeded { kind: "transfer", .. })
        ));
        assert!(ledger.transfer(&checking, "Saving404", 10.0).is_err());
        assert_eq!(ledger.transfer(&checking, &checking, 1.0), Err(LedgerError::SameAccount));

        assert_eq!(ledger.balance(&checking).unwrap(), 180.0);
        assert_eq!(ledger.balance(&saving).unwrap(), 420.0);
    }

    #[test]
    fn handler_reports_outcomes() {
        let ledger = Arc::new(Ledger::new());
        let checking = funded(&ledger, AccountKind::Checking, 50.0);
        let saving = funded(&ledger, AccountKind::Saving, 50.0);
        let bank = service(Arc::clone(&ledger), Directory::new());

        let resp = bank.handle(
            Request::new("ATM", "BANK", Operation::Deposit)
                .with_correlation_id("d1")
                .with_data("accountId", checking.as_str())
                .with_data("amount", 25.0),
        );
        assert!(resp.is_success());
        assert_eq!(resp.receiver(), "ATM");
        assert_eq!(resp.correlation_id(), Some("d1"));
        assert_eq!(resp.get_data("newBalance"), Some(&Value::Float(75.0)));

        let resp = bank.handle(
            Request::new("ATM", "BANK", Operation::Withdraw)
                .with_data("accountId", saving.as_str())
                .with_data("amount", 5.0),
        );
        assert_eq!(resp.kind(), &Outcome::Declined);
        assert!(resp.get_data(REASON_KEY).is_some());

        let resp = bank.handle(
            Request::new("ATM", "BANK", Operation::Deposit).with_data("accountId", "Checking1"),
        );
        assert_eq!(resp.kind(), &Outcome::Error);
        assert_eq!(resp.failure_reason(), Some("missing field 'amount'"));

        let resp = bank.handle(Request::new("ATM", "BANK", Operation::ViewNextBill));
        assert_eq!(resp.kind(), &Outcome::Error);
        assert_eq!(
            resp.get_data(ERROR_KEY),
            Some(&Value::from("Unsupported message type: ViewNextBill"))
        );
    }

    #[test]
    fn pay_bill_declines_without_contacting_utility() {
        let ledger = Arc::new(Ledger::new());
        let checking = funded(&ledger, AccountKind::Checking, 10.0);
        let bank = service(ledger, Directory::new());

        let resp = bank.handle(
            Request::new("ATM", "BANK", Operation::PayBill)
                .with_data("bankAccountId", checking.as_str())
                .with_data("utilAccountId", "000001")
                .with_data("amount", 20.0),
        );
        assert_eq!(resp.kind(), &Outcome::Declined);
        assert_eq!(resp.failure_reason(), Some("Insufficient funds to pay bill."));
    }

    #[test]
    fn pay_bill_only_from_checking_accounts() {
        let ledger = Arc::new(Ledger::new());
        let saving = funded(&ledger, AccountKind::Saving, 100.0);
        let bank = service(Arc::clone(&ledger), Directory::new());

        for account in [saving.as_str(), "Bogus7"] {
            let resp = bank.handle(
                Request::new("ATM", "BANK", Operation::PayBill)
                    .with_data("bankAccountId", account)
                    .with_data("utilAccountId", "000001")
                    .with_data("amount", 20.0),
            );
            assert_eq!(resp.kind(), &Outcome::Error);
            assert_eq!(
                resp.failure_reason(),
                Some(format!("Account not found: {account}").as_str())
            );
        }
        assert_eq!(ledger.balance(&saving).unwrap(), 100.0);
    }

    #[test]
    fn pay_bill_with_unreachable_utility_is_error() {
        let ledger = Arc::new(Ledger::new());
        let checking = funded(&ledger, AccountKind::Checking, 100.0);
        let bank = service(Arc::clone(&ledger), Directory::new());

        let resp = bank.handle(
            Request::new("ATM", "BANK", Operation::PayBill)
                .with_data("bankAccountId", checking.as_str())
                .with_data("utilAccountId", "000001")
                .with_data("amount", 20.0),
        );
        assert_eq!(resp.kind(), &Outcome::Error);
        assert!(resp.failure_reason().unwrap().starts_with("UTIL unreachable"));
        assert_eq!(ledger.balance(&checking).unwrap(), 100.0);
    }

    #[test]
    fn pay_bill_through_utility_server() {
        let store = Arc::new(BillingStore::new());
        let util_account = store.signup("grace", "pw").unwrap();
        store
            .issue_bill(&util_account, 60.0, "2030-01-15".parse().unwrap())
            .unwrap();

        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let util = Server::new("UTIL", addr, UtilityService::new("UTIL", Arc::clone(&store)));
        let port = util.start().unwrap().local_addr().port();

        let ledger = Arc::new(Ledger::new());
        let checking = funded(&ledger, AccountKind::Checking, 100.0);
        let directory = Directory::new().with_route("UTIL", Endpoint::new("127.0.0.1", port));
        let bank = service(Arc::clone(&ledger), directory);

        let pay = |amount: f64| {
            bank.handle(
                Request::new("ATM", "BANK", Operation::PayBill)
                    .with_data("bankAccountId", checking.as_str())
                    .with_data("utilAccountId", util_account.as_str())
                    .with_data("amount", amount),
            )
        };

        let resp = pay(60.0);
        assert!(resp.is_success(), "{resp:?}");
        assert_eq!(resp.get_data("newBalance"), Some(&Value::Float(40.0)));
        assert!(resp.get_data("paymentDetails").is_some());

        // Nothing left to pay: utility refuses and the bank keeps the money.
        let resp = pay(10.0);
        assert_eq!(resp.kind(), &Outcome::Error);
        assert!(resp.failure_reason().unwrap().starts_with("Failed to pay bill"));
        assert_eq!(ledger.balance(&checking).unwrap(), 40.0);

        util.stop().unwrap();
    }
}
