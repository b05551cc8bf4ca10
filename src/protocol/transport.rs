use std::io::{self, Read, Write};

use bincode::{
    config::{BigEndian, Configuration, Fixint, Limit},
    decode_from_std_read, encode_to_vec,
    error::DecodeError,
};
use log::trace;
use thiserror::Error;

use super::{Request, Response};

/// Largest message the transport will decode.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

type WireConfig = Configuration<BigEndian, Fixint, Limit<MAX_MESSAGE_SIZE>>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to encode message: {0}")]
    Serialize(#[from] bincode::error::EncodeError),
    #[error("failed to decode message: {0}")]
    Deserialize(#[from] DecodeError),
    #[error("Transport IO Error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// True when the peer closed the stream before a complete message arrived.
    pub fn is_disconnect(&self) -> bool {
        match self {
            TransportError::Deserialize(DecodeError::UnexpectedEnd { .. }) => true,
            TransportError::Deserialize(DecodeError::Io { inner, .. }) => peer_gone(inner),
            TransportError::Io(e) => peer_gone(e),
            _ => false,
        }
    }
}

fn peer_gone(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset
    )
}

/// One-message-per-direction codec over a byte stream.
pub struct ProtocolTransport<T: Read + Write> {
    stream: T,
    config: WireConfig,
}

impl<T: Read + Write> ProtocolTransport<T> {
    pub fn new(stream: T) -> Self {
        let config = bincode::config::standard()
            .with_big_endian()
            .with_fixed_int_encoding()
            .with_limit::<MAX_MESSAGE_SIZE>();
        Self { stream, config }
    }

    pub fn write_request(&mut self, req: &Request) -> Result<(), TransportError> {
        let bytes = encode_to_vec(req, self.config)?;
        self.write_frame(&bytes)
    }

    pub fn write_response(&mut self, resp: &Response) -> Result<(), TransportError> {
        let bytes = encode_to_vec(resp, self.config)?;
        self.write_frame(&bytes)
    }

    pub fn read_response(&mut self) -> Result<Response, TransportError> {
        let resp: Response = decode_from_std_read(&mut self.stream, self.config)?;
        Ok(resp)
    }

    pub fn read_request(&mut self) -> Result<Request, TransportError> {
        let req: Request = decode_from_std_read(&mut self.stream, self.config)?;
        Ok(req)
    }

    pub fn into_inner(self) -> T {
        self.stream
    }

    fn write_frame(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        trace!("writing {} byte message", bytes.len());
        self.stream.write_all(bytes)?;
        self.stream.flush()?;
        Ok(())
    }
}
