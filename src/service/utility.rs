//! Utility billing service.
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use log::info;
use thiserror::Error;

use crate::protocol::{Date, Handler, Operation, Payload, Request, Response, Value};

use super::{ServiceError, amount, dispatch, text};

/// Number of paid bills listed by a history request.
pub const HISTORY_LENGTH: usize = 3;

const SETTLED_BELOW: f64 = 0.005;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BillingError {
    #[error("Username is taken")]
    UsernameTaken,
    #[error("Invalid username or password")]
    InvalidCredentials,
    #[error("Account not found")]
    AccountNotFound,
    #[error("No bills available")]
    NoBills,
    #[error("No paid bills available")]
    NoPaidBills,
    #[error("Amount must be positive.")]
    NonPositiveAmount,
    #[error("Payment of {amount} exceeds the {owed} owed on bill {bill}")]
    Overpayment { bill: u32, amount: f64, owed: f64 },
}

impl From<BillingError> for ServiceError {
    fn from(e: BillingError) -> Self {
        ServiceError::Rejected(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bill {
    pub id: u32,
    /// Amount still owed.
    pub amount: f64,
    pub due: Date,
    pub paid: Option<Date>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Receipt {
    pub bill: u32,
    pub paid: f64,
    pub remaining: f64,
}

#[derive(Debug)]
struct UtilityAccount {
    username: String,
    password: String,
    bills: Vec<Bill>,
}

#[derive(Debug, Default)]
struct BillingState {
    accounts: BTreeMap<String, UtilityAccount>,
    issued: u32,
}

impl BillingState {
    fn account(&mut self, number: &str) -> Result<&mut UtilityAccount, BillingError> {
        self.accounts
            .get_mut(number)
            .ok_or(BillingError::AccountNotFound)
    }
}

/// In-memory store of utility accounts and their bills.
#[derive(Debug, Default)]
pub struct BillingStore {
    state: Mutex<BillingState>,
}

impl BillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BillingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a user and returns the new six-digit account number.
    pub fn signup(&self, username: &str, password: &str) -> Result<String, BillingError> {
        let mut state = self.state();
        if state.accounts.values().any(|a| a.username == username) {
            return Err(BillingError::UsernameTaken);
        }

        let number = format!("{:06}", state.accounts.len() + 1);
        state.accounts.insert(
            number.clone(),
            UtilityAccount {
                username: username.to_string(),
                password: password.to_string(),
                bills: Vec::new(),
            },
        );
        info!("opened utility account {number} for {username}");
        Ok(number)
    }

    /// Accepts either the username or the account number.
    pub fn login(&self, name_or_number: &str, password: &str) -> Result<String, BillingError> {
        self.state()
            .accounts
            .iter()
            .find(|(number, account)| {
                (number.as_str() == name_or_number || account.username == name_or_number)
                    && account.password == password
            })
            .map(|(number, _)| number.clone())
            .ok_or(BillingError::InvalidCredentials)
    }

    pub fn issue_bill(&self, number: &str, amount: f64, due: Date) -> Result<u32, BillingError> {
        if !(amount.is_finite() && amount > 0.0) {
            return Err(BillingError::NonPositiveAmount);
        }
        let mut state = self.state();
        state.account(number)?;
        state.issued += 1;
        let id = state.issued;

        state.account(number)?.bills.push(Bill {
            id,
            amount,
            due,
            paid: None,
        });
        Ok(id)
    }

    /// Earliest-due unpaid bill.
    pub fn next_bill(&self, number: &str) -> Result<Bill, BillingError> {
        let mut state = self.state();
        next_unpaid(&mut state.account(number)?.bills)
            .cloned()
            .ok_or(BillingError::NoBills)
    }

    /// Oldest paid bills, in payment order, at most [`HISTORY_LENGTH`].
    pub fn history(&self, number: &str) -> Result<Vec<Bill>, BillingError> {
        let mut state = self.state();
        let mut paid = state
            .account(number)?
            .bills
            .iter()
            .filter(|bill| bill.paid.is_some())
            .cloned()
            .collect::<Vec<Bill>>();
        if paid.is_empty() {
            return Err(BillingError::NoPaidBills);
        }

        paid.sort_by_key(|bill| (bill.paid, bill.id));
        paid.truncate(HISTORY_LENGTH);
        Ok(paid)
    }

    /// Applies `amount` to the earliest-due unpaid bill; the bill is marked paid `today` once
    /// nothing is owed.
    pub fn pay(&self, number: &str, amount: f64, today: Date) -> Result<Receipt, BillingError> {
        if !(amount.is_finite() && amount > 0.0) {
            return Err(BillingError::NonPositiveAmount);
        }
        let mut state = self.state();
        let bill = next_unpaid(&mut state.account(number)?.bills).ok_or(BillingError::NoBills)?;
        if amount > bill.amount {
            return Err(BillingError::Overpayment {
                bill: bill.id,
                amount,
                owed: bill.amount,
            });
        }

        bill.amount -= amount;
        // Sub-cent residue from float subtraction counts as settled.
        if bill.amount < SETTLED_BELOW {
            bill.amount = 0.0;
            bill.paid = Some(today);
        }
        Ok(Receipt {
            bill: bill.id,
            paid: amount,
            remaining: bill.amount,
        })
    }
}

fn next_unpaid(bills: &mut [Bill]) -> Option<&mut Bill> {
    bills
        .iter_mut()
        .filter(|bill| bill.paid.is_none())
        .min_by_key(|bill| (bill.due, bill.id))
}

/// Handler of the utility process.
pub struct UtilityService {
    identity: String,
    store: Arc<BillingStore>,
}

impl UtilityService {
    pub fn new(identity: impl Into<String>, store: Arc<BillingStore>) -> Self {
        Self {
            identity: identity.into(),
            store,
        }
    }

    fn signup(&self, req: &Request) -> Result<Payload, ServiceError> {
        let number = self
            .store
            .signup(text(req, "username")?, text(req, "password")?)?;
        Ok([("accountNumber", number)].into_iter().collect())
    }

    fn login(&self, req: &Request) -> Result<Payload, ServiceError> {
        let number = self
            .store
            .login(text(req, "nameOrNumber")?, text(req, "password")?)?;
        Ok([("accountNumber", number)].into_iter().collect())
    }

    fn pay_bill(&self, req: &Request) -> Result<Payload, ServiceError> {
        let receipt = self.store.pay(
            text(req, "accountId")?,
            amount(req, "amount")?,
            Date::today(),
        )?;
        Ok([
            ("billId", Value::from(receipt.bill)),
            ("remaining", Value::Float(receipt.remaining)),
            (
                "paymentDetails",
                Value::Text(format!(
                    "Paid {:.2} toward bill {}; {:.2} remaining",
                    receipt.paid, receipt.bill, receipt.remaining
                )),
            ),
        ]
        .into_iter()
        .collect())
    }

    fn view_next_bill(&self, req: &Request) -> Result<Payload, ServiceError> {
        let bill = self.store.next_bill(text(req, "accountId")?)?;
        Ok([
            ("billAmount", Value::Float(bill.amount)),
            ("billDueDate", Value::Date(bill.due)),
        ]
        .into_iter()
        .collect())
    }

    fn view_bill_history(&self, req: &Request) -> Result<Payload, ServiceError> {
        let bills = self.store.history(text(req, "accountId")?)?;
        let mut payload = Payload::new();
        for (i, bill) in bills.into_iter().enumerate() {
            let tag = format!("bills[{i}]");
            payload.insert(format!("{tag}.id"), bill.id);
            payload.insert(format!("{tag}.amount"), bill.amount);
            payload.insert(format!("{tag}.dueDate"), bill.due);
            if let Some(paid) = bill.paid {
                payload.insert(format!("{tag}.paidDate"), paid);
            }
        }
        Ok(payload)
    }
}

impl Handler for UtilityService {
    fn handle(&self, request: Request) -> Response {
        dispatch(&self.identity, &request, |req| match req.kind() {
            Operation::Signup => self.signup(req),
            Operation::Login => self.login(req),
            Operation::PayBill => self.pay_bill(req),
            Operation::ViewNextBill => self.view_next_bill(req),
            Operation::ViewBillHistory => self.view_bill_history(req),
            other => Err(ServiceError::Unsupported(*other)),
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::Outcome;

    use super::*;

    fn date(s: &str) -> Date {
        s.parse().unwrap()
    }

    #[test]
    fn signup_numbers_and_login() {
        let store = BillingStore::new();
        assert_eq!(store.signup("ann", "a").unwrap(), "000001");
        assert_eq!(store.signup("ben", "b").unwrap(), "000002");
        assert_eq!(store.signup("ann", "x"), Err(BillingError::UsernameTaken));

        assert_eq!(store.login("ann", "a").unwrap(), "000001");
        assert_eq!(store.login("000002", "b").unwrap(), "000002");
        assert_eq!(store.login("ann", "b"), Err(BillingError::InvalidCredentials));
    }

    #[test]
    fn payments_go_to_earliest_due_bill() {
        let store = BillingStore::new();
        let acct = store.signup("ann", "a").unwrap();
        let later = store.issue_bill(&acct, 80.0, date("2030-03-01")).unwrap();
        let sooner = store.issue_bill(&acct, 50.0, date("2030-02-01")).unwrap();

        assert_eq!(store.next_bill(&acct).unwrap().id, sooner);

        let receipt = store.pay(&acct, 20.0, date("2030-01-10")).unwrap();
        assert_eq!(receipt.bill, sooner);
        assert_eq!(receipt.remaining, 30.0);
        assert!(matches!(
            store.pay(&acct, 31.0, date("2030-01-10")),
            Err(BillingError::Overpayment { owed, .. }) if owed == 30.0
        ));

        store.pay(&acct, 30.0, date("2030-01-11")).unwrap();
        assert_eq!(store.next_bill(&acct).unwrap().id, later);

        let history = store.history(&acct).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].paid, Some(date("2030-01-11")));
    }

    #[test]
    fn empty_account_errors() {
        let store = BillingStore::new();
        let acct = store.signup("ann", "a").unwrap();

        assert_eq!(store.next_bill(&acct), Err(BillingError::NoBills));
        assert_eq!(store.history(&acct), Err(BillingError::NoPaidBills));
        assert_eq!(
            store.pay(&acct, 1.0, date("2030-01-01")),
            Err(BillingError::NoBills)
        );
        assert_eq!(store.next_bill("999999"), Err(BillingError::AccountNotFound));
    }

    #[test]
    fn history_lists_at_most_three() {
        let store = BillingStore::new();
        let acct = store.signup("ann", "a").unwrap();
        for day in 1..=5u8 {
            store
                .issue_bill(&acct, 10.0, Date::new(2030, 1, day).unwrap())
                .unwrap();
            store
                .pay(&acct, 10.0, Date::new(2030, 2, day).unwrap())
                .unwrap();
        }

        let service = UtilityService::new("UTIL", Arc::new(store));
        let resp = service.handle(
            Request::new("ATM", "UTIL", Operation::ViewBillHistory)
                .with_data("accountId", acct.as_str()),
        );

        assert!(resp.is_success());
        assert_eq!(resp.get_data("bills[0].id"), Some(&Value::Int(1)));
        assert_eq!(
            resp.get_data("bills[2].paidDate"),
            Some(&Value::Date(date("2030-02-03")))
        );
        assert_eq!(resp.get_data("bills[3].id"), None);
    }

    #[test]
    fn handler_outcomes() {
        let store = Arc::new(BillingStore::new());
        let service = UtilityService::new("UTIL", Arc::clone(&store));

        let resp = service.handle(
            Request::new("ATM", "UTIL", Operation::Signup)
                .with_correlation_id("s1")
                .with_data("username", "ann")
                .with_data("password", "pw"),
        );
        assert!(resp.is_success());
        assert_eq!(resp.correlation_id(), Some("s1"));
        assert_eq!(resp.get_data("accountNumber"), Some(&Value::from("000001")));

        store
            .issue_bill("000001", 42.5, date("2031-06-30"))
            .unwrap();
        let resp = service.handle(
            Request::new("ATM", "UTIL", Operation::ViewNextBill).with_data("accountId", "000001"),
        );
        assert_eq!(resp.get_data("billAmount"), Some(&Value::Float(42.5)));
        assert_eq!(
            resp.get_data("billDueDate"),
            Some(&Value::Date(date("2031-06-30")))
        );

        let resp = service.handle(
            Request::new("ATM", "UTIL", Operation::PayBill)
                .with_data("accountId", "000001")
                .with_data("amount", "lots"),
        );
        assert_eq!(resp.kind(), &Outcome::Error);

        let resp = service.handle(
            Request::new("BANK", "UTIL", Operation::Deposit).with_data("accountId", "000001"),
        );
        assert_eq!(resp.kind(), &Outcome::Error);
        assert_eq!(
            resp.failure_reason(),
            Some("Unsupported message type: Deposit")
        );
    }
}
