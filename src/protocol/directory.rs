use std::{collections::HashMap, fmt, str::FromStr};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("invalid route '{0}', expected SERVICE=host:port")]
    MissingSeparator(String),
    #[error("route '{0}' has an empty service name")]
    EmptyService(String),
    #[error("invalid endpoint '{0}', expected host:port")]
    InvalidEndpoint(String),
}

/// Network location of a service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DirectoryError::InvalidEndpoint(s.to_string());
        let (host, port) = s.trim().rsplit_once(':').ok_or_else(invalid)?;
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(Endpoint::new(host, port))
    }
}

/// A single `SERVICE=host:port` entry of the addressing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub service: String,
    pub endpoint: Endpoint,
}

impl FromStr for Route {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (service, endpoint) = s
            .split_once('=')
            .ok_or_else(|| DirectoryError::MissingSeparator(s.to_string()))?;
        let service = service.trim();
        if service.is_empty() {
            return Err(DirectoryError::EmptyService(s.to_string()));
        }

        Ok(Route {
            service: service.to_string(),
            endpoint: endpoint.parse()?,
        })
    }
}

/// Addressing table mapping logical service identifiers to endpoints.
#[derive(Debug, Clone, Default)]
pub struct Directory {
    routes: HashMap<String, Endpoint>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `service`, replacing any previous endpoint.
    pub fn insert(&mut self, service: impl Into<String>, endpoint: Endpoint) -> Option<Endpoint> {
        self.routes.insert(service.into(), endpoint)
    }

    pub fn with_route(mut self, service: impl Into<String>, endpoint: Endpoint) -> Self {
        self.insert(service, endpoint);
        self
    }

    pub fn resolve(&self, service: &str) -> Option<&Endpoint> {
        self.routes.get(service)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl FromIterator<Route> for Directory {
    fn from_iter<I: IntoIterator<Item = Route>>(iter: I) -> Self {
        Self {
            routes: iter
                .into_iter()
                .map(|route| (route.service, route.endpoint))
                .collect(),
        }
    }
}
