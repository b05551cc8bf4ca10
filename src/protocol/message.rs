use std::{
    collections::{HashMap, hash_map},
    fmt,
    str::FromStr,
};

use bincode::{
    Decode, Encode,
    de::Decoder,
    enc::Encoder,
    error::{DecodeError, EncodeError},
    impl_borrow_decode,
};
use chrono::{Datelike, Local, NaiveDate, format::ParseErrorKind};
use thiserror::Error;

/// Payload key carrying the reason of an [`Outcome::Error`] response.
pub const ERROR_KEY: &str = "Error";
/// Payload key carrying the reason of an [`Outcome::Declined`] response.
pub const REASON_KEY: &str = "Reason";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Operation requested by a caller.
#[derive(Debug, Clone, Copy, Encode, Decode, PartialEq, Eq, Hash)]
pub enum Operation {
    Login,
    Signup,
    Deposit,
    Withdraw,
    Transfer,
    PayBill,
    ViewBalance,
    ViewNextBill,
    ViewBillHistory,
}

/// Outcome reported by a service.
#[derive(Debug, Clone, Copy, Encode, Decode, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    Declined,
    Error,
}

/// Calendar date carried in payloads, formatted as `YYYY-MM-DD`.
///
/// On the wire a date is its day number counted from 0001-01-01, so every decoded value is a
/// real calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Date(NaiveDate);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DateError {
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    Format(String),
    #[error("date out of range: {0}")]
    Range(String),
}

impl Date {
    pub fn new(year: i32, month: u8, day: u8) -> Result<Self, DateError> {
        NaiveDate::from_ymd_opt(year, month.into(), day.into())
            .map(Date)
            .ok_or_else(|| DateError::Range(format!("{year:04}-{month:02}-{day:02}")))
    }

    /// Current date in the local time zone.
    pub fn today() -> Self {
        Date(Local::now().date_naive())
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    pub fn month(&self) -> u8 {
        self.0.month() as u8
    }

    pub fn day(&self) -> u8 {
        self.0.day() as u8
    }
}

impl From<NaiveDate> for Date {
    fn from(date: NaiveDate) -> Self {
        Date(date)
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(DATE_FORMAT))
    }
}

impl FromStr for Date {
    type Err = DateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
            .map(Date)
            .map_err(|e| match e.kind() {
                ParseErrorKind::OutOfRange | ParseErrorKind::Impossible => {
                    DateError::Range(s.to_string())
                }
                _ => DateError::Format(s.to_string()),
            })
    }
}

impl Encode for Date {
    fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
        self.0.num_days_from_ce().encode(encoder)
    }
}

impl<Context> Decode<Context> for Date {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        let days = i32::decode(decoder)?;
        NaiveDate::from_num_days_from_ce_opt(days)
            .map(Date)
            .ok_or_else(|| DecodeError::OtherString(format!("day number {days} is not a date")))
    }
}

impl_borrow_decode!(Date);

/// Dynamically typed payload value.
#[derive(Debug, Clone, Encode, Decode, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
    Date(Date),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of the value; integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<Date> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x:.2}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Date(d) => write!(f, "{d}"),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<Date> for Value {
    fn from(value: Date) -> Self {
        Value::Date(value)
    }
}

/// Key/value body of a message. Never absent; an empty payload is the default.
#[derive(Debug, Clone, Default, Encode, Decode, PartialEq)]
pub struct Payload(HashMap<String, Value>);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites `key`, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, String, Value> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Payload {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Message exchanged between services; `K` is the kind tag.
///
/// Requests carry an [`Operation`], responses an [`Outcome`]; see [`Request`] and
/// [`Response`].
#[derive(Debug, Clone, Encode, Decode, PartialEq)]
pub struct Envelope<K> {
    sender: String,
    receiver: String,
    kind: K,
    correlation_id: Option<String>,
    payload: Payload,
}

pub type Request = Envelope<Operation>;
pub type Response = Envelope<Outcome>;

impl<K> Envelope<K> {
    pub fn new(sender: impl Into<String>, receiver: impl Into<String>, kind: K) -> Self {
        Self::with_payload(sender, receiver, kind, Payload::default())
    }

    pub fn with_payload(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        kind: K,
        payload: Payload,
    ) -> Self {
        Self {
            sender: sender.into(),
            receiver: receiver.into(),
            kind,
            correlation_id: None,
            payload,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Builder form of [`Envelope::add_data`].
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.add_data(key, value);
        self
    }

    /// Inserts or overwrites a payload entry.
    pub fn add_data(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.payload.insert(key, value)
    }

    /// Payload entry for `key`, `None` when absent.
    pub fn get_data(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn receiver(&self) -> &str {
        &self.receiver
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }
}

impl Request {
    /// Builds the response skeleton for this request: sender and receiver swapped,
    /// correlation id copied.
    pub fn reply(&self, sender: impl Into<String>, outcome: Outcome) -> Response {
        Response {
            sender: sender.into(),
            receiver: self.sender.clone(),
            kind: outcome,
            correlation_id: self.correlation_id.clone(),
            payload: Payload::default(),
        }
    }
}

impl Response {
    pub fn is_success(&self) -> bool {
        self.kind == Outcome::Success
    }

    /// Human readable reason of an `Error` or `Declined` response.
    pub fn failure_reason(&self) -> Option<&str> {
        let key = match self.kind {
            Outcome::Success => return None,
            Outcome::Declined => REASON_KEY,
            Outcome::Error => ERROR_KEY,
        };
        self.get_data(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_data_overwrites() {
        let mut req = Request::new("ATM", "BANK", Operation::Deposit);
        assert_eq!(req.add_data("amount", 10.0), None);
        assert_eq!(req.add_data("amount", 25.5), Some(Value::Float(10.0)));
        assert_eq!(req.get_data("amount"), Some(&Value::Float(25.5)));
    }

    #[test]
    fn missing_key_is_none() {
        let req = Request::new("ATM", "BANK", Operation::ViewBalance);
        assert!(req.payload().is_empty());
        assert_eq!(req.get_data("accountId"), None);
    }

    #[test]
    fn reply_swaps_parties_and_copies_correlation() {
        let req = Request::new("ATM", "BANK", Operation::Login).with_correlation_id("abc-1");
        let resp = req.reply("BANK", Outcome::Success);

        assert_eq!(resp.sender(), "BANK");
        assert_eq!(resp.receiver(), "ATM");
        assert_eq!(resp.correlation_id(), Some("abc-1"));
        assert!(resp.is_success());
    }

    #[test]
    fn failure_reason_follows_outcome() {
        let req = Request::new("ATM", "BANK", Operation::Withdraw);

        let declined = req
            .reply("BANK", Outcome::Declined)
            .with_data(REASON_KEY, "not allowed");
        assert_eq!(declined.failure_reason(), Some("not allowed"));

        let error = req
            .reply("BANK", Outcome::Error)
            .with_data(ERROR_KEY, "broken");
        assert_eq!(error.failure_reason(), Some("broken"));

        let ok = req.reply("BANK", Outcome::Success).with_data(ERROR_KEY, "x");
        assert_eq!(ok.failure_reason(), None);
    }

    #[test]
    fn integers_widen_to_floats() {
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Text("3".into()).as_f64(), None);
    }

    #[test]
    fn date_parse_and_display() {
        let date: Date = "2024-02-29".parse().unwrap();
        assert_eq!(date.to_string(), "2024-02-29");
        assert!("2023-02-29".parse::<Date>().is_err());
        assert!("2023-13-01".parse::<Date>().is_err());
        assert!("yesterday".parse::<Date>().is_err());
    }

    #[test]
    fn date_components() {
        let date = Date::new(2030, 1, 31).unwrap();
        assert_eq!((date.year(), date.month(), date.day()), (2030, 1, 31));
        assert!(Date::new(2030, 13, 1).is_err());
        assert!(matches!(Date::new(2030, 2, 30), Err(DateError::Range(_))));
        assert!(Date::new(2030, 1, 1).unwrap() < date);
    }

    #[test]
    fn date_decode_rejects_unknown_day_numbers() {
        let config = bincode::config::standard();

        let bytes = bincode::encode_to_vec(Date::new(2024, 2, 29).unwrap(), config).unwrap();
        let (date, _): (Date, usize) = bincode::decode_from_slice(&bytes, config).unwrap();
        assert_eq!(date.to_string(), "2024-02-29");

        let bytes = bincode::encode_to_vec(i32::MAX, config).unwrap();
        assert!(bincode::decode_from_slice::<Date, _>(&bytes, config).is_err());
    }
}
