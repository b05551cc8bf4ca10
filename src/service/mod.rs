//! Services built on the messaging substrate.
//!
//! Each service owns an explicit store and exposes a single [`Handler`](crate::protocol::Handler)
//! that switches on the request [`Operation`] and answers with an [`Outcome`]. The helpers in
//! this module give every handler the same shape: operations return `Result<Payload,
//! ServiceError>` and [`dispatch`] turns that into a correlated response, so no code path can
//! end without one.
//!
//! - [`bank`]: Checking/saving ledger; forwards bill payments to the utility service.
//! - [`utility`]: Utility accounts and their bills.
pub mod bank;
pub mod utility;

use log::debug;
use thiserror::Error;

use crate::protocol::{
    ClientError, ERROR_KEY, Operation, Outcome, Payload, REASON_KEY, Request, Response,
};

/// Failure of a single operation inside a handler.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' must be {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },

    /// Reported with a `Declined` outcome.
    #[error("{0}")]
    Declined(String),

    #[error("{0}")]
    Rejected(String),

    #[error("Unsupported message type: {0:?}")]
    Unsupported(Operation),

    #[error("{service} unreachable: {source}")]
    Unreachable {
        service: String,
        #[source]
        source: ClientError,
    },
}

/// Runs `operation` for `request` and wraps its result in a response from `identity`.
///
/// Success carries the returned payload; [`ServiceError::Declined`] becomes a `Declined`
/// response with a `Reason`, every other error an `Error` response with an `Error` entry.
pub fn dispatch<F>(identity: &str, request: &Request, operation: F) -> Response
where
    F: FnOnce(&Request) -> Result<Payload, ServiceError>,
{
    match operation(request) {
        Ok(payload) => {
            let mut resp = request.reply(identity, Outcome::Success);
            for (key, value) in payload.iter() {
                resp.add_data(key.clone(), value.clone());
            }
            resp
        }
        Err(ServiceError::Declined(reason)) => {
            debug!("{identity} declined {:?}: {reason}", request.kind());
            request
                .reply(identity, Outcome::Declined)
                .with_data(REASON_KEY, reason)
        }
        Err(e) => {
            debug!("{identity} failed {:?}: {e}", request.kind());
            request
                .reply(identity, Outcome::Error)
                .with_data(ERROR_KEY, e.to_string())
        }
    }
}

pub(crate) fn text<'a>(request: &'a Request, field: &'static str) -> Result<&'a str, ServiceError> {
    let value = request
        .get_data(field)
        .ok_or(ServiceError::MissingField(field))?;
    match value.as_str() {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(ServiceError::InvalidField {
            field,
            expected: "a non-empty string",
        }),
    }
}

/// Monetary amount; must be finite and positive.
pub(crate) fn amount(request: &Request, field: &'static str) -> Result<f64, ServiceError> {
    let value = request
        .get_data(field)
        .ok_or(ServiceError::MissingField(field))?;
    match value.as_f64() {
        Some(n) if n.is_finite() && n > 0.0 => Ok(n),
        _ => Err(ServiceError::InvalidField {
            field,
            expected: "a positive amount",
        }),
    }
}

#[cfg(test)]
mod tests {
    use crate::protocol::Value;

    use super::*;

    #[test]
    fn success_keeps_payload_and_correlation() {
        let req = Request::new("ATM", "BANK", Operation::ViewBalance).with_correlation_id("z");
        let resp = dispatch("BANK", &req, |_| {
            Ok([("balance", Value::Float(3.5))].into_iter().collect())
        });

        assert!(resp.is_success());
        assert_eq!(resp.correlation_id(), Some("z"));
        assert_eq!(resp.get_data("balance"), Some(&Value::Float(3.5)));
    }

    #[test]
    fn declined_uses_reason_key() {
        let req = Request::new("ATM", "BANK", Operation::Withdraw);
        let resp = dispatch("BANK", &req, |_| {
            Err(ServiceError::Declined("not today".into()))
        });

        assert_eq!(resp.kind(), &Outcome::Declined);
        assert_eq!(resp.get_data(REASON_KEY), Some(&Value::from("not today")));
    }

    #[test]
    fn field_errors_become_error_responses() {
        let req = Request::new("ATM", "BANK", Operation::Deposit).with_data("amount", "ten");
        let resp = dispatch("BANK", &req, |req| {
            text(req, "accountId")?;
            Ok(Payload::new())
        });
        assert_eq!(resp.failure_reason(), Some("missing field 'accountId'"));

        let resp = dispatch("BANK", &req, |req| {
            amount(req, "amount")?;
            Ok(Payload::new())
        });
        assert_eq!(resp.kind(), &Outcome::Error);
        assert_eq!(
            resp.failure_reason(),
            Some("field 'amount' must be a positive amount")
        );
    }

    #[test]
    fn amounts_must_be_positive() {
        for bad in [Value::Float(0.0), Value::Float(-2.0), Value::Float(f64::NAN)] {
            let req = Request::new("ATM", "BANK", Operation::Deposit).with_data("amount", bad);
            assert!(amount(&req, "amount").is_err());
        }
        let req = Request::new("ATM", "BANK", Operation::Deposit).with_data("amount", 40i64);
        assert_eq!(amount(&req, "amount").unwrap(), 40.0);
    }
}
