//! Resilient fetch client.
//!
//! Wraps reqwest with the behaviors flaky government hosts require:
//! per-domain circuit breaking, rotating client identities, deliberate
//! certificate leniency (broken chains are endemic on provincial portals;
//! failing closed would blank out whole jurisdictions), a per-domain
//! politeness delay, and charset recovery with a Latin-1 fallback.

mod circuit;
mod identity;

pub use circuit::{Admission, CircuitBreaker, COOLDOWN, FAILURE_THRESHOLD};
pub use identity::{resolve_user_agent, rotating_user_agent, USER_AGENT};

use std::time::Duration;

use chrono::{DateTime, Utc};
use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use reqwest::header;
use thiserror::Error;
use url::Url;

use crate::models::WeightClass;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("circuit open for {domain}, retry in {retry_in:?}")]
    CircuitOpen { domain: String, retry_in: Duration },
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("http {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl FetchError {
    /// Transient errors feed the circuit breaker; CircuitOpen itself and
    /// malformed URLs do not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Status { .. } | Self::Network(_))
    }
}

/// A fetched page with both raw bytes and recovered text.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
    pub text: String,
    /// Name of the encoding that actually produced `text`.
    pub encoding: &'static str,
    pub fetched_at: DateTime<Utc>,
}

/// Tunables for the fetch client.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub light_timeout: Duration,
    pub heavy_timeout: Duration,
    pub politeness_delay: Duration,
    pub user_agent: Option<String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            light_timeout: Duration::from_secs(30),
            heavy_timeout: Duration::from_secs(180),
            politeness_delay: Duration::from_millis(500),
            user_agent: None,
        }
    }
}

/// HTTP retrieval with circuit breaking and encoding recovery.
#[derive(Clone)]
pub struct FetchClient {
    client: reqwest::Client,
    breaker: CircuitBreaker,
    options: FetchOptions,
}

impl FetchClient {
    pub fn new(options: FetchOptions) -> Result<Self, FetchError> {
        Self::with_breaker(options, CircuitBreaker::default())
    }

    /// Build with a shared breaker so concurrent runs see the same
    /// per-domain state.
    pub fn with_breaker(options: FetchOptions, breaker: CircuitBreaker) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            // Many hosts present expired or self-signed chains. Verification
            // is disabled on purpose instead of losing those sources.
            .danger_accept_invalid_certs(true)
            .gzip(true)
            .brotli(true)
            .cookie_store(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        Ok(Self {
            client,
            breaker,
            options,
        })
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn timeout_for(&self, weight: WeightClass) -> Duration {
        match weight {
            WeightClass::Light => self.options.light_timeout,
            WeightClass::Heavy => self.options.heavy_timeout,
        }
    }

    /// Fetch a URL, honoring the domain's circuit and politeness delay.
    pub async fn fetch(&self, url: &str, weight: WeightClass) -> Result<FetchedPage, FetchError> {
        let domain = domain_of(url).ok_or_else(|| FetchError::InvalidUrl(url.to_string()))?;

        match self.breaker.admit(&domain).await {
            Admission::Rejected(retry_in) => {
                tracing::debug!(%domain, ?retry_in, "circuit open, failing fast");
                return Err(FetchError::CircuitOpen { domain, retry_in });
            }
            Admission::Trial => {
                tracing::info!(%domain, "circuit half-open, allowing trial request");
            }
            Admission::Allowed => {}
        }

        let wait = self
            .breaker
            .politeness_wait(&domain, self.options.politeness_delay)
            .await;
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        let user_agent = resolve_user_agent(self.options.user_agent.as_deref());
        let result = self
            .client
            .get(url)
            .timeout(self.timeout_for(weight))
            .header(header::USER_AGENT, user_agent)
            .header(header::ACCEPT_LANGUAGE, "es-AR,es;q=0.9,en;q=0.5")
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                self.breaker.report_failure(&domain).await;
                return Err(FetchError::Network(err));
            }
        };

        let status = response.status();
        if !status.is_success() {
            self.breaker.report_failure(&domain).await;
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let bytes = match response.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(err) => {
                self.breaker.report_failure(&domain).await;
                return Err(FetchError::Network(err));
            }
        };

        self.breaker.report_success(&domain).await;

        let (text, encoding) = decode_body(&bytes, content_type.as_deref());
        Ok(FetchedPage {
            url: url.to_string(),
            status: status.as_u16(),
            content_type,
            bytes,
            text,
            encoding,
            fetched_at: Utc::now(),
        })
    }

    /// Fetch and return only the recovered text.
    pub async fn fetch_text(&self, url: &str, weight: WeightClass) -> Result<String, FetchError> {
        Ok(self.fetch(url, weight).await?.text)
    }
}

/// Domain key for circuit-breaker bookkeeping.
pub fn domain_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

/// Decode a response body. The declared charset is tried first; when it is
/// absent, unknown, or produces malformed sequences, windows-1252 is used
/// instead. Text comes back in every case; strict conformance loses to
/// recovering accented Spanish.
pub fn decode_body(bytes: &[u8], content_type: Option<&str>) -> (String, &'static str) {
    let declared = content_type
        .and_then(charset_of)
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or(UTF_8);

    let (text, used, had_errors) = declared.decode(bytes);
    if !had_errors {
        return (text.into_owned(), used.name());
    }

    // Latin-1 family decoding cannot fail; every byte maps to a char.
    let (text, used, _) = WINDOWS_1252.decode(bytes);
    (text.into_owned(), used.name())
}

/// Pull the charset parameter out of a Content-Type header value.
fn charset_of(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .map(str::trim)
        .find_map(|part| part.strip_prefix("charset="))
        .map(|c| c.trim_matches('"').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_declared_utf8() {
        let (text, encoding) = decode_body("licitación".as_bytes(), Some("text/html; charset=utf-8"));
        assert_eq!(text, "licitación");
        assert_eq!(encoding, "UTF-8");
    }

    #[test]
    fn test_decode_latin1_fallback_on_bad_utf8() {
        // "licitación" encoded as ISO-8859-1 but served as UTF-8
        let bytes = b"licitaci\xf3n";
        let (text, encoding) = decode_body(bytes, Some("text/html; charset=utf-8"));
        assert_eq!(text, "licitación");
        assert_eq!(encoding, "windows-1252");
    }

    #[test]
    fn test_decode_declared_latin1() {
        let bytes = b"a\xf1o 2024";
        let (text, _) = decode_body(bytes, Some("text/html; charset=iso-8859-1"));
        assert_eq!(text, "año 2024");
    }

    #[test]
    fn test_decode_no_content_type() {
        let (text, _) = decode_body(b"plain ascii", None);
        assert_eq!(text, "plain ascii");
    }

    #[test]
    fn test_charset_of() {
        assert_eq!(
            charset_of("text/html; charset=ISO-8859-1"),
            Some("ISO-8859-1".to_string())
        );
        assert_eq!(
            charset_of(r#"text/html; charset="utf-8""#),
            Some("utf-8".to_string())
        );
        assert_eq!(charset_of("application/pdf"), None);
    }

    #[test]
    fn test_transient_classification() {
        assert!(FetchError::Status {
            url: "https://x.gob.ar".to_string(),
            status: 503,
        }
        .is_transient());
        assert!(!FetchError::CircuitOpen {
            domain: "x.gob.ar".to_string(),
            retry_in: Duration::from_secs(60),
        }
        .is_transient());
        assert!(!FetchError::InvalidUrl("not a url".to_string()).is_transient());
    }

    #[test]
    fn test_domain_of() {
        assert_eq!(
            domain_of("https://Compras.Mendoza.GOV.ar/lista?p=1"),
            Some("compras.mendoza.gov.ar".to_string())
        );
        assert_eq!(domain_of("not a url"), None);
    }
}
