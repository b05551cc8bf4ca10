//! Inter-process messaging substrate.
//!
//! This module defines how the ATM, bank and utility processes talk to each other: the message
//! envelope, the wire codec, the addressing table, and the blocking client and threaded server
//! that move one request and one response over each connection.
//!
//! # Overview
//!
//! A caller builds a [`Request`] and hands it to [`Client::send`]. The client looks the logical
//! receiver (e.g. `"BANK"`) up in its [`Directory`], connects to the resulting [`Endpoint`],
//! writes the request and blocks until the response arrives. Unknown receivers fail before any
//! network I/O happens.
//!
//! On the other side a [`Server`] accepts connections on a dedicated thread and hands each one
//! to a worker. The worker reads exactly one request, passes it to the service's [`Handler`],
//! writes the [`Response`] and closes the connection.
//!
//! # Key Components
//!
//! - [`Envelope`]: Message exchanged between services, with a typed kind tag. Requests carry an
//!   [`Operation`], responses an [`Outcome`].
//! - [`ProtocolTransport`]: Codec writing and reading single messages over a byte stream.
//! - [`Client`]: Resolves receivers and performs round trips.
//! - [`Server`]: Accept loop plus per-connection workers.
//!
//! # Binary Format
//!
//! Each direction of a connection carries one bincode-encoded message:
//!
//! - Integers are big-endian and fixed width; strings and maps are length-prefixed.
//! - Floating point payload values are written bit for bit.
//! - Decoding refuses messages larger than [`MAX_MESSAGE_SIZE`](transport::MAX_MESSAGE_SIZE).
//!
//! A connection that ends before a complete message has been read is a disconnect, reported
//! by [`TransportError::is_disconnect`]. The server drops such connections without calling the
//! handler.
//!
//! # Errors
//!
//! Transport failures ([`ClientError`], [`TransportError`]) are kept apart from application
//! failures, which travel as ordinary responses with an `Error` or `Declined` outcome and a
//! reason under [`ERROR_KEY`] or [`REASON_KEY`].
//!
//! # See Also
//!
//! - [`service`](crate::service): Bank and utility handlers built on this substrate.
mod client;
mod directory;
mod message;
mod server;
mod thread;
pub mod transport;

use thread::ThreadPool;

pub use client::{Client, ClientError, Connector, TcpConnector};
pub use directory::{Directory, DirectoryError, Endpoint, Route};
pub use message::{
    Date, DateError, ERROR_KEY, Envelope, Operation, Outcome, Payload, REASON_KEY, Request,
    Response, Value,
};
pub use server::{Concurrency, Handler, Server, ServerError, ServerState, StartOutcome};
pub use transport::{ProtocolTransport, TransportError};
