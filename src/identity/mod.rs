//! Instance identity token.
//!
//! The identity token is a signed document issued by the metadata
//! server, used to authenticate the agent to the service. Tokens are
//! fetched lazily on access and renewed when close to expiry.

use crate::metadata::{MetadataFetch, TransportError, IDENTITY_TOKEN_PATH};
use failure::Fail;
use jsonwebtoken::{DecodingKey, Validation};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Tokens expiring within this margin are renewed.
const RENEWAL_MARGIN: Duration = Duration::from_secs(10 * 60);

/// Error from an identity token refresh.
#[derive(Debug, Fail)]
pub enum TokenError {
    #[fail(display = "error getting token from metadata: {}", _0)]
    Fetch(#[fail(cause)] TransportError),
    #[fail(display = "malformed identity token: {}", _0)]
    Malformed(String),
    #[fail(display = "identity token has no usable expiry claim")]
    MissingExpiry,
}

/// Cached identity token.
#[derive(Clone, Debug)]
struct IdentityToken {
    raw: String,
    expiry: SystemTime,
}

impl IdentityToken {
    /// Whether this token expires within `margin` from `now`.
    fn expires_within(&self, now: SystemTime, margin: Duration) -> bool {
        match self.expiry.duration_since(now) {
            Ok(remaining) => remaining < margin,
            Err(_) => true,
        }
    }
}

/// Subset of token claims the agent cares about.
#[derive(Debug, Deserialize)]
struct Claims {
    exp: Option<serde_json::Number>,
}

/// Lazily refreshed identity token.
///
/// The whole check-and-refresh sequence runs under a single lock, so
/// concurrent callers never trigger duplicate refreshes.
pub struct TokenCache {
    fetcher: Arc<dyn MetadataFetch>,
    cached: Mutex<Option<IdentityToken>>,
}

impl TokenCache {
    pub fn new(fetcher: Arc<dyn MetadataFetch>) -> Self {
        Self {
            fetcher,
            cached: Mutex::new(None),
        }
    }

    /// Return a token valid for at least the renewal margin.
    ///
    /// If a refresh fails, the error is returned and the previously
    /// cached token (if any) is kept for later calls.
    pub fn get(&self) -> Result<String, TokenError> {
        let mut cached = self.cached.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(token) = cached.as_ref() {
            if !token.expires_within(SystemTime::now(), RENEWAL_MARGIN) {
                return Ok(token.raw.clone());
            }
        }

        let token = self.fetch_token()?;
        let raw = token.raw.clone();
        *cached = Some(token);
        Ok(raw)
    }

    fn fetch_token(&self) -> Result<IdentityToken, TokenError> {
        let raw = self
            .fetcher
            .fetch(IDENTITY_TOKEN_PATH)
            .map_err(TokenError::Fetch)?;
        let expiry = decode_expiry(&raw).map_err(|e| {
            error!("rejected identity token: {}", e);
            e
        })?;
        debug!("identity token refreshed, expiring at {:?}", expiry);

        Ok(IdentityToken { raw, expiry })
    }

    #[cfg(test)]
    fn cached_raw(&self) -> Option<String> {
        let cached = self.cached.lock().unwrap();
        cached.as_ref().map(|t| t.raw.clone())
    }
}

/// Decode the expiry claim of a signed token (`header.payload.signature`).
///
/// The signature is not verified here, the service does that. Expiry is
/// checked by the cache against its renewal margin.
fn decode_expiry(token: &str) -> Result<SystemTime, TokenError> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = jsonwebtoken::decode::<Claims>(
        token.trim(),
        &DecodingKey::from_secret(&[]),
        &validation,
    )
    .map_err(|e| TokenError::Malformed(e.to_string()))?;

    let exp = data.claims.exp.ok_or(TokenError::MissingExpiry)?;
    let secs = exp
        .as_u64()
        .or_else(|| exp.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
        .ok_or(TokenError::MissingExpiry)?;
    Ok(UNIX_EPOCH + Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::TransportErrorKind;
    use jsonwebtoken::{EncodingKey, Header};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn forge_token(claims: &str) -> String {
        let claims: serde_json::Value = serde_json::from_str(claims).unwrap();
        jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"not-the-issuer-key"),
        )
        .unwrap()
    }

    fn token_expiring_in(secs: u64) -> String {
        let exp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap() + Duration::from_secs(secs);
        forge_token(&format!(
            r#"{{"aud":"osconfig.googleapis.com","exp":{}}}"#,
            exp.as_secs()
        ))
    }

    /// Fetcher serving queued responses, counting requests.
    fn queued_fetcher(
        responses: Vec<Result<String, TransportError>>,
    ) -> (Arc<dyn MetadataFetch>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let queue = Mutex::new(responses.into_iter());
        let fetcher = move |path: &str| -> Result<String, TransportError> {
            assert_eq!(path, IDENTITY_TOKEN_PATH);
            counter.fetch_add(1, Ordering::SeqCst);
            queue
                .lock()
                .unwrap()
                .next()
                .unwrap_or_else(|| Err(TransportError::new(TransportErrorKind::Other, "drained")))
        };
        let fetcher: Arc<dyn MetadataFetch> = Arc::new(fetcher);
        (fetcher, calls)
    }

    #[test]
    fn decode_expiry_claim() {
        let expiry = decode_expiry(&forge_token(r#"{"exp":1700000000}"#)).unwrap();
        assert_eq!(expiry, UNIX_EPOCH + Duration::from_secs(1_700_000_000));
    }

    #[test]
    fn decode_rejects_bad_tokens() {
        match decode_expiry("not-a-token") {
            Err(TokenError::Malformed(_)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        match decode_expiry("a.!!!.c") {
            Err(TokenError::Malformed(_)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        match decode_expiry(&format!("{}.e30", forge_token(r#"{"exp":1}"#))) {
            Err(TokenError::Malformed(_)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        match decode_expiry(&forge_token(r#"{"aud":"x"}"#)) {
            Err(TokenError::MissingExpiry) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        match decode_expiry(&forge_token(r#"{"exp":-5}"#)) {
            Err(TokenError::MissingExpiry) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn first_access_refreshes_once() {
        let token = token_expiring_in(3600);
        let (fetcher, calls) = queued_fetcher(vec![Ok(token.clone())]);
        let cache = TokenCache::new(fetcher);

        assert_eq!(cache.get().unwrap(), token);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fresh_token_is_reused() {
        let token = token_expiring_in(3600);
        let (fetcher, calls) = queued_fetcher(vec![Ok(token.clone())]);
        let cache = TokenCache::new(fetcher);

        cache.get().unwrap();
        assert_eq!(cache.get().unwrap(), token);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn expiring_token_is_renewed() {
        let stale = token_expiring_in(5 * 60);
        let fresh = token_expiring_in(3600);
        let (fetcher, calls) = queued_fetcher(vec![Ok(stale.clone()), Ok(fresh.clone())]);
        let cache = TokenCache::new(fetcher);

        assert_eq!(cache.get().unwrap(), stale);
        assert_eq!(cache.get().unwrap(), fresh);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_renewal_keeps_cached_token() {
        let stale = token_expiring_in(5 * 60);
        let fresh = token_expiring_in(3600);
        let (fetcher, calls) = queued_fetcher(vec![
            Ok(stale.clone()),
            Ok("garbage".to_string()),
            Ok(fresh.clone()),
        ]);
        let cache = TokenCache::new(fetcher);

        cache.get().unwrap();
        assert!(cache.get().is_err());
        assert_eq!(cache.cached_raw(), Some(stale));
        assert_eq!(cache.get().unwrap(), fresh);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn token_without_expiry_is_never_returned() {
        let (fetcher, _calls) = queued_fetcher(vec![Ok(forge_token(r#"{"aud":"x"}"#))]);
        let cache = TokenCache::new(fetcher);

        assert!(cache.get().is_err());
        assert_eq!(cache.cached_raw(), None);
    }

    #[test]
    fn transport_errors_propagate() {
        let (fetcher, _calls) = queued_fetcher(vec![Err(TransportError::new(
            TransportErrorKind::Network,
            "unreachable",
        ))]);
        let cache = TokenCache::new(fetcher);

        match cache.get() {
            Err(TokenError::Fetch(e)) => assert_eq!(e.kind(), TransportErrorKind::Network),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn concurrent_callers_share_one_refresh() {
        let token = token_expiring_in(3600);
        let (fetcher, calls) = queued_fetcher(vec![Ok(token.clone())]);
        let cache = Arc::new(TokenCache::new(fetcher));

        let callers: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                thread::spawn(move || cache.get().unwrap())
            })
            .collect();
        for c in callers {
            assert_eq!(c.join().unwrap(), token);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
