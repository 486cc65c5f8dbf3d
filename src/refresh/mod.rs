//! Configuration refresh.
//!
//! A refresh cycle fetches the metadata document, resolves it against
//! the current snapshot and publishes the result. Transport failures
//! are retried a bounded number of times; a failed cycle never touches
//! the published configuration.

mod agent;

pub use agent::ConfigAgent;

use crate::config::{self, ConfigStore, RawMetadataDocument};
use crate::metadata::{MetadataFetch, TransportError, TransportErrorKind, METADATA_QUERY};
use failure::Fail;
use futures::future::{self, Either, Loop};
use futures::prelude::*;
use futures::sync::oneshot;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::timer::Delay;

/// Metadata request attempts per refresh cycle.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Pause between two metadata request attempts.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Maximum number of retries when getting data from the metadata server.
pub fn max_metadata_retries() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

/// Maximum retry delay when getting data from the metadata server.
pub fn max_metadata_retry_delay() -> Duration {
    Duration::from_secs(30)
}

/// Error from a refresh cycle.
#[derive(Debug, Fail)]
pub enum RefreshError {
    #[fail(
        display = "DNS error when requesting metadata, check DNS settings and ensure metadata.google.internal is setup in your hosts file: {}",
        _0
    )]
    Dns(#[fail(cause)] TransportError),
    #[fail(
        display = "network error when requesting metadata, make sure your instance has an active network and can reach the metadata server: {}",
        _0
    )]
    Network(#[fail(cause)] TransportError),
    #[fail(display = "failed to request metadata: {}", _0)]
    Transport(#[fail(cause)] TransportError),
    #[fail(display = "failed to decode metadata document: {}", _0)]
    Decode(#[fail(cause)] serde_json::Error),
    #[fail(display = "retry timer failed: {}", _0)]
    Timer(#[fail(cause)] tokio::timer::Error),
}

impl From<TransportError> for RefreshError {
    fn from(err: TransportError) -> Self {
        match err.kind() {
            TransportErrorKind::Dns => RefreshError::Dns(err),
            TransportErrorKind::Network => RefreshError::Network(err),
            TransportErrorKind::Other => RefreshError::Transport(err),
        }
    }
}

/// Retry policy for metadata requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Handle to request cancellation of refresh cycles.
pub struct CancelHandle {
    tx: oneshot::Sender<()>,
}

impl CancelHandle {
    /// Cancel all cycles observing the paired `Cancellation`.
    pub fn cancel(self) {
        // Receivers may be gone already, that's fine.
        let _ = self.tx.send(());
    }
}

/// Cancellation signal, observed at retry waits.
///
/// Dropping the paired `CancelHandle` without calling `cancel` does
/// not cancel anything.
#[derive(Clone)]
pub struct Cancellation {
    signal: future::Shared<oneshot::Receiver<()>>,
}

/// Create a paired cancellation handle and signal.
pub fn cancellation() -> (CancelHandle, Cancellation) {
    let (tx, rx) = oneshot::channel();
    let signal = Cancellation {
        signal: rx.shared(),
    };
    (CancelHandle { tx }, signal)
}

impl Cancellation {
    /// A signal which is never triggered.
    pub fn never() -> Self {
        let (_handle, signal) = cancellation();
        signal
    }

    /// Resolve once cancellation has been requested.
    fn requested(&self) -> impl Future<Item = (), Error = RefreshError> {
        self.signal.clone().then(|res| match res {
            Ok(_) => Either::A(future::ok(())),
            Err(_) => Either::B(future::empty()),
        })
    }
}

/// Outcome of the fetch phase of a cycle.
enum Fetched {
    Body(String),
    Exhausted(TransportError),
    Cancelled,
}

/// Run a single refresh cycle.
///
/// On success the resolved configuration is published to `store`.
/// Cancellation during a retry wait ends the cycle successfully, without
/// changing the configuration. Nothing happens until the returned future
/// is polled; metadata requests block the polling thread.
pub fn refresh_config(
    fetcher: Arc<dyn MetadataFetch>,
    store: ConfigStore,
    policy: RetryPolicy,
    cancel: Cancellation,
) -> impl Future<Item = (), Error = RefreshError> {
    let max_attempts = policy.max_attempts.max(1);

    future::lazy(move || {
        let attempts = future::loop_fn(1u32, move |attempt| {
            let err = match fetcher.fetch(METADATA_QUERY) {
                Ok(body) => return Either::A(future::ok(Loop::Break(Fetched::Body(body)))),
                Err(e) => e,
            };
            warn!(
                "metadata request failed (attempt {}/{}): {}",
                attempt, max_attempts, err
            );
            if attempt >= max_attempts {
                return Either::A(future::ok(Loop::Break(Fetched::Exhausted(err))));
            }

            let wait = Delay::new(Instant::now() + policy.delay).map_err(RefreshError::Timer);
            let next = wait
                .select2(cancel.requested())
                .then(move |res| match res {
                    Ok(Either::A(_)) => Ok(Loop::Continue(attempt + 1)),
                    Ok(Either::B(_)) => Ok(Loop::Break(Fetched::Cancelled)),
                    Err(Either::A((e, _))) | Err(Either::B((e, _))) => Err(e),
                });
            Either::B(next)
        });

        attempts.and_then(move |fetched| match fetched {
            Fetched::Body(body) => publish(&store, &body),
            Fetched::Cancelled => {
                debug!("configuration refresh cancelled");
                Ok(())
            }
            Fetched::Exhausted(err) => Err(RefreshError::from(err)),
        })
    })
}

/// Decode a metadata document, resolve it and publish the result.
fn publish(store: &ConfigStore, body: &str) -> Result<(), RefreshError> {
    let doc = RawMetadataDocument::parse(body).map_err(RefreshError::Decode)?;

    let previous = store.get();
    let resolved = config::resolve(&previous, &doc, store.flags());
    if resolved != previous {
        info!("agent configuration updated");
    }
    if let Ok(json) = serde_json::to_string_pretty(&resolved) {
        debug!("Resolved configuration:\n{}", json);
    }

    store.replace(resolved);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlagOverrides;

    #[test]
    fn transport_errors_are_classified() {
        let dns = RefreshError::from(TransportError::new(TransportErrorKind::Dns, "lookup"));
        assert!(dns.to_string().starts_with("DNS error"));

        let net = RefreshError::from(TransportError::new(TransportErrorKind::Network, "refused"));
        assert!(net.to_string().starts_with("network error"));

        let other = RefreshError::from(TransportError::new(TransportErrorKind::Other, "503"));
        assert_eq!(other.to_string(), "failed to request metadata: 503");
    }

    #[test]
    fn publish_rejects_malformed_body() {
        let store = ConfigStore::new(FlagOverrides::default());
        let res = publish(&store, "<html>not json</html>");
        match res {
            Err(RefreshError::Decode(_)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(store.get(), config::ResolvedConfig::default());
    }

    #[test]
    fn publish_replaces_snapshot() {
        let store = ConfigStore::new(FlagOverrides::default());
        publish(
            &store,
            r#"{"instance": {"name": "vm-2", "attributes": {"enable-osconfig": "true"}}}"#,
        )
        .unwrap();
        assert_eq!(store.instance_name(), "vm-2");
        assert!(store.task_notification_enabled());
    }

    #[test]
    fn default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, max_metadata_retries());
        assert_eq!(policy.delay, Duration::from_secs(5));
    }
}
