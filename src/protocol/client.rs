use std::{
    io::{self, Read, Write},
    net::TcpStream,
};

use log::{debug, trace};
use thiserror::Error;

use super::{Directory, Endpoint, ProtocolTransport, Request, Response, TransportError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("destination '{0}' is not registered")]
    DestinationUnknown(String),
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Opens the byte stream used for a single round trip.
pub trait Connector {
    type Stream: Read + Write;

    fn connect(&self, endpoint: &Endpoint) -> io::Result<Self::Stream>;
}

/// Plain TCP connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&self, endpoint: &Endpoint) -> io::Result<TcpStream> {
        let host = endpoint.host.trim_start_matches('[').trim_end_matches(']');
        TcpStream::connect((host, endpoint.port))
    }
}

/// Resolves logical receivers and performs blocking one-shot round trips.
///
/// Every call to [`Client::send`] opens a fresh connection, writes the request, waits for the
/// response and closes. There is no timeout: a peer that never answers blocks the caller.
#[derive(Debug, Clone)]
pub struct Client<C = TcpConnector> {
    directory: Directory,
    connector: C,
}

impl Client {
    pub fn new(directory: Directory) -> Self {
        Self::with_connector(directory, TcpConnector)
    }
}

impl<C: Connector> Client<C> {
    pub fn with_connector(directory: Directory, connector: C) -> Self {
        Self {
            directory,
            connector,
        }
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn send(&self, request: &Request) -> Result<Response, ClientError> {
        let endpoint = self
            .directory
            .resolve(request.receiver())
            .ok_or_else(|| ClientError::DestinationUnknown(request.receiver().to_string()))?;

        debug!(
            "sending {:?} from {} to {} at {endpoint}",
            request.kind(),
            request.sender(),
            request.receiver()
        );
        let stream = self
            .connector
            .connect(endpoint)
            .map_err(|source| ClientError::Connect {
                endpoint: endpoint.clone(),
                source,
            })?;

        let mut transport = ProtocolTransport::new(stream);
        transport.write_request(request)?;
        let response = transport.read_response()?;
        trace!("received response: {response:?}");

        Ok(response)
    }
}
