//! Metadata server client.
//!
//! This module contains the `MetadataFetch` capability, which is the
//! only way the agent reaches the metadata server, and `MetadataClient`,
//! its HTTP implementation. Fetching is blocking: callers decide which
//! thread or event loop pays for it.

use failure::{Fail, Fallible};
use reqwest::Url;
use std::time::Duration;

/// Environment variable overriding the metadata server host.
pub static METADATA_HOST_ENV: &str = "GCE_METADATA_HOST";
/// Default metadata server host.
pub static DEFAULT_METADATA_HOST: &str = "169.254.169.254";
/// Query for the whole metadata tree, as JSON.
pub static METADATA_QUERY: &str = "?recursive=true&alt=json";
/// Instance identity token path, relative to the metadata root.
pub static IDENTITY_TOKEN_PATH: &str =
    "instance/service-accounts/default/identity?audience=osconfig.googleapis.com&format=full";
/// Guest attributes path, relative to the metadata root.
pub static GUEST_ATTRIBUTES_PATH: &str = "instance/guest-attributes";

static METADATA_ROOT_PATH: &str = "computeMetadata/v1/";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Category of a failed metadata request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Metadata server name could not be resolved.
    Dns,
    /// Metadata server could not be reached.
    Network,
    Other,
}

/// Error from a single metadata request.
#[derive(Debug, Fail)]
#[fail(display = "{}", message)]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
}

impl TransportError {
    pub fn new<S: Into<String>>(kind: TransportErrorKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let message = err.to_string();
        let lowered = message.to_lowercase();
        let kind = if lowered.contains("dns error")
            || lowered.contains("failed to lookup address")
            || lowered.contains("name or service not known")
        {
            TransportErrorKind::Dns
        } else if err.is_timeout()
            || lowered.contains("error trying to connect")
            || lowered.contains("connection refused")
            || lowered.contains("network is unreachable")
        {
            TransportErrorKind::Network
        } else {
            TransportErrorKind::Other
        };
        Self { kind, message }
    }
}

/// Capability to fetch a document from the metadata server.
///
/// `path` is relative to the metadata root, e.g. `METADATA_QUERY`.
pub trait MetadataFetch: Send + Sync {
    fn fetch(&self, path: &str) -> Result<String, TransportError>;
}

impl<F> MetadataFetch for F
where
    F: Fn(&str) -> Result<String, TransportError> + Send + Sync,
{
    fn fetch(&self, path: &str) -> Result<String, TransportError> {
        self(path)
    }
}

/// HTTP client for the metadata server.
#[derive(Debug)]
pub struct MetadataClient {
    client: reqwest::Client,
    root: Url,
}

impl MetadataClient {
    /// Build a client for the metadata server at `host`.
    pub fn new(host: &str) -> Fallible<Self> {
        let root = Url::parse(&format!("http://{}/", host))?.join(METADATA_ROOT_PATH)?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, root })
    }

    /// Build a client from environment, falling back to the default host.
    pub fn from_env() -> Fallible<Self> {
        let host = std::env::var(METADATA_HOST_ENV)
            .ok()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| DEFAULT_METADATA_HOST.to_string());
        trace!("metadata server host: {}", host);
        Self::new(&host)
    }

    pub fn root(&self) -> &Url {
        &self.root
    }

    /// Guest attributes endpoint, where the agent reports its state.
    pub fn report_url(&self) -> Fallible<Url> {
        let url = self.root.join(GUEST_ATTRIBUTES_PATH)?;
        Ok(url)
    }
}

impl MetadataFetch for MetadataClient {
    fn fetch(&self, path: &str) -> Result<String, TransportError> {
        let endpoint = self.root.join(path).map_err(|e| {
            TransportError::new(
                TransportErrorKind::Other,
                format!("invalid metadata path '{}': {}", path, e),
            )
        })?;
        trace!("GET to metadata endpoint: {}", endpoint);

        let mut resp = self
            .client
            .get(endpoint)
            .header("Metadata-Flavor", "Google")
            .send()?
            .error_for_status()?;
        let body = resp.text()?;
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_root_url() {
        let client = MetadataClient::new("metadata.google.internal").unwrap();
        assert_eq!(
            client.root().as_str(),
            "http://metadata.google.internal/computeMetadata/v1/"
        );
        assert_eq!(
            client.root().join(METADATA_QUERY).unwrap().as_str(),
            "http://metadata.google.internal/computeMetadata/v1/?recursive=true&alt=json"
        );
    }

    #[test]
    fn report_url_follows_host() {
        let client = MetadataClient::new("10.0.0.2:8080").unwrap();
        assert_eq!(
            client.report_url().unwrap().as_str(),
            "http://10.0.0.2:8080/computeMetadata/v1/instance/guest-attributes"
        );
    }

    #[test]
    fn refused_connection_is_network_error() {
        // Nothing listens on port 1 of the loopback interface.
        let client = MetadataClient::new("127.0.0.1:1").unwrap();
        let err = client.fetch(METADATA_QUERY).unwrap_err();
        assert_eq!(err.kind(), TransportErrorKind::Network, "{}", err);
    }

    #[test]
    fn closures_are_fetchers() {
        let fetcher = |path: &str| -> Result<String, TransportError> {
            if path == METADATA_QUERY {
                Ok("{}".to_string())
            } else {
                Err(TransportError::new(TransportErrorKind::Other, "not found"))
            }
        };
        assert_eq!(fetcher.fetch(METADATA_QUERY).unwrap(), "{}");
        let err = fetcher.fetch(IDENTITY_TOKEN_PATH).unwrap_err();
        assert_eq!(err.kind(), TransportErrorKind::Other);
        assert_eq!(err.to_string(), "not found");
    }
}
