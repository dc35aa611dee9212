//! Session bootstrap over HTTP.
//!
//! `GET {api_base}/api/ticket/qr/ticket/{ticket_id}.session`
//!
//! | Status | Result |
//! |--------|--------|
//! | 2xx | parsed into a [`SessionGrant`] |
//! | 409 | [`SessionError::OutsideDynamicWindow`] |
//! | other | [`SessionError::Http`] |

use crate::config::QrConfig;
use crate::error::{ConfigError, SessionError};
use crate::providers::SessionProvider;
use crate::state::{DEFAULT_SESSION_TTL_SECONDS, DEFAULT_STEP_SECONDS, SessionGrant, TicketId};
use crate::token::SigningKey;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url, header};
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;

/// Integer `now` values at or above this are read as milliseconds.
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Session provider backed by the issuing server.
#[derive(Debug, Clone)]
pub struct HttpSessionProvider {
    client: Client,
    api_base: Url,
}

impl HttpSessionProvider {
    /// Create a provider for `api_base` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidApiBase`] if the URL is not absolute
    /// http(s), or [`ConfigError::HttpClient`] if the client cannot be built.
    pub fn new(api_base: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let api_base = parse_api_base(api_base)?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self { client, api_base })
    }

    /// Create a provider from loaded configuration.
    ///
    /// # Errors
    ///
    /// See [`HttpSessionProvider::new`].
    pub fn from_config(config: &QrConfig) -> Result<Self, ConfigError> {
        Self::new(&config.api_base, config.request_timeout)
    }

    /// The session URL for a ticket, with the identifier percent-encoded.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::FetchFailed`] if the base URL cannot take path segments.
    pub fn session_url(&self, ticket_id: &TicketId) -> Result<Url, SessionError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|()| SessionError::FetchFailed("API base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["api", "ticket", "qr", "ticket"])
            .push(&format!("{ticket_id}.session"));
        Ok(url)
    }

    async fn fetch(&self, ticket_id: &TicketId) -> Result<SessionGrant, SessionError> {
        if ticket_id.is_blank() {
            return Err(SessionError::EmptyTicketId);
        }

        let url = self.session_url(ticket_id)?;
        tracing::debug!(%ticket_id, "Fetching QR session");

        let response = self
            .client
            .get(url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| SessionError::FetchFailed(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                let body = response
                    .json::<SessionResponse>()
                    .await
                    .map_err(|e| SessionError::FetchFailed(format!("unreadable session body: {e}")))?;
                body.into_grant(ticket_id.clone())
            },
            StatusCode::CONFLICT => Err(SessionError::OutsideDynamicWindow),
            status => Err(SessionError::Http {
                status: status.as_u16(),
            }),
        }
    }
}

impl SessionProvider for HttpSessionProvider {
    fn fetch_session(
        &self,
        ticket_id: &TicketId,
    ) -> impl Future<Output = Result<SessionGrant, SessionError>> + Send {
        let provider = self.clone();
        let ticket_id = ticket_id.clone();

        async move {
            let result = provider.fetch(&ticket_id).await;
            let outcome = match &result {
                Ok(grant) => {
                    tracing::info!(
                        %ticket_id,
                        step_seconds = grant.step_seconds,
                        ttl_seconds = grant.ttl_seconds,
                        "QR session fetched"
                    );
                    "ok"
                },
                Err(SessionError::OutsideDynamicWindow) => {
                    tracing::info!(%ticket_id, "Ticket outside dynamic window");
                    "unavailable"
                },
                Err(error) => {
                    tracing::warn!(%ticket_id, %error, "QR session fetch failed");
                    match error {
                        SessionError::EmptyTicketId => "rejected",
                        SessionError::Http { .. } => "http_error",
                        SessionError::InvalidSession(_) => "invalid",
                        _ => "network_error",
                    }
                },
            };
            metrics::counter!("qr.session.fetch", "outcome" => outcome).increment(1);
            result
        }
    }
}

fn parse_api_base(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidApiBase {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    if raw.trim().is_empty() {
        return Err(invalid("empty"));
    }
    let url = Url::parse(raw.trim()).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if url.cannot_be_a_base() {
        return Err(invalid("not a base URL"));
    }
    Ok(url)
}

/// Wire shape of a successful session response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    now: ServerTime,
    step_seconds: Option<u64>,
    session_ttl_seconds: Option<u64>,
    client_key: Option<String>,
    envelope: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ServerTime {
    Integer(i64),
    Fractional(f64),
    Timestamp(DateTime<Utc>),
}

impl ServerTime {
    #[allow(clippy::cast_possible_truncation)] // rounded, range-checked by chrono
    fn into_datetime(self) -> Option<DateTime<Utc>> {
        match self {
            Self::Integer(value) if value.unsigned_abs() >= MILLIS_THRESHOLD.unsigned_abs() => {
                DateTime::from_timestamp_millis(value)
            },
            Self::Integer(value) => DateTime::from_timestamp(value, 0),
            Self::Fractional(value) if value.is_finite() => {
                let millis = if value.abs() >= 1e11 { value } else { value * 1000.0 };
                DateTime::from_timestamp_millis(millis.round() as i64)
            },
            Self::Fractional(_) => None,
            Self::Timestamp(at) => Some(at),
        }
    }
}

impl SessionResponse {
    fn into_grant(self, ticket_id: TicketId) -> Result<SessionGrant, SessionError> {
        let envelope = self
            .envelope
            .filter(|envelope| !envelope.trim().is_empty())
            .ok_or_else(|| SessionError::InvalidSession("missing envelope".to_string()))?;
        let client_key = self
            .client_key
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| SessionError::InvalidSession("missing clientKey".to_string()))?;
        let key = SigningKey::from_base64url(&client_key)
            .map_err(|e| SessionError::InvalidSession(e.to_string()))?;
        if key.is_empty() {
            return Err(SessionError::InvalidSession("clientKey decodes to no bytes".to_string()));
        }

        let step_seconds = self.step_seconds.unwrap_or(DEFAULT_STEP_SECONDS);
        if step_seconds == 0 {
            return Err(SessionError::InvalidSession("stepSeconds must be positive".to_string()));
        }

        let server_now = self
            .now
            .into_datetime()
            .ok_or_else(|| SessionError::InvalidSession("server time out of range".to_string()))?;

        Ok(SessionGrant {
            ticket_id,
            envelope,
            key,
            step_seconds,
            server_now,
            ttl_seconds: self.session_ttl_seconds.unwrap_or(DEFAULT_SESSION_TTL_SECONDS),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(body: serde_json::Value) -> Result<SessionGrant, SessionError> {
        serde_json::from_value::<SessionResponse>(body)
            .unwrap()
            .into_grant(TicketId::new("T-1"))
    }

    #[test]
    fn test_defaults_for_missing_step_and_ttl() {
        let grant = parse(json!({
            "now": 1_747_203_300,
            "clientKey": "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=",
            "envelope": "abc123"
        }))
        .unwrap();

        assert_eq!(grant.step_seconds, 60);
        assert_eq!(grant.ttl_seconds, 600);
        assert_eq!(grant.server_now.timestamp(), 1_747_203_300);
        assert_eq!(grant.expires_at().timestamp(), 1_747_203_900);
        assert_eq!(grant.key, SigningKey::from_bytes([0_u8; 32]));
    }

    #[test]
    fn test_server_time_formats() {
        let key = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8";
        for now in [
            json!(1_700_000_000),
            json!(1_700_000_000_000_i64),
            json!(1_700_000_000.0),
            json!("2023-11-14T22:13:20Z"),
        ] {
            let grant = parse(json!({ "now": now, "clientKey": key, "envelope": "e" })).unwrap();
            assert_eq!(grant.server_now.timestamp(), 1_700_000_000, "now = {now}");
        }
    }

    #[test]
    fn test_out_of_range_server_time_is_invalid_session() {
        for now in [json!(i64::MIN), json!(i64::MAX), json!(-1e300), json!(1e300)] {
            let result = parse(json!({ "now": now, "clientKey": "AAAA", "envelope": "e" }));
            assert!(
                matches!(result, Err(SessionError::InvalidSession(_))),
                "now = {now} should be rejected, got {result:?}"
            );
        }
    }

    #[test]
    fn test_missing_key_material_is_invalid_session() {
        for body in [
            json!({ "now": 1, "envelope": "e" }),
            json!({ "now": 1, "clientKey": "", "envelope": "e" }),
            json!({ "now": 1, "clientKey": "AAAA" }),
            json!({ "now": 1, "clientKey": "AAAA", "envelope": "  " }),
            json!({ "now": 1, "clientKey": "%%%%", "envelope": "e" }),
            json!({ "now": 1, "clientKey": "AAAA", "envelope": "e", "stepSeconds": 0 }),
        ] {
            assert!(
                matches!(parse(body.clone()), Err(SessionError::InvalidSession(_))),
                "{body} should be rejected"
            );
        }
    }

    #[test]
    fn test_session_url_encodes_ticket() {
        let provider =
            HttpSessionProvider::new("https://tickets.example.com/", Duration::from_secs(1)).unwrap();
        let url = provider.session_url(&TicketId::new("abc/42 x")).unwrap();
        assert_eq!(
            url.as_str(),
            "https://tickets.example.com/api/ticket/qr/ticket/abc%2F42%20x.session"
        );
    }

    #[test]
    fn test_session_url_keeps_base_path() {
        let provider =
            HttpSessionProvider::new("http://localhost:8080/gateway", Duration::from_secs(1)).unwrap();
        let url = provider.session_url(&TicketId::new("T-1")).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/gateway/api/ticket/qr/ticket/T-1.session");
    }

    #[test]
    fn test_invalid_api_base() {
        for raw in ["", "   ", "not a url", "ftp://example.com", "mailto:qr@example.com"] {
            assert!(
                matches!(
                    HttpSessionProvider::new(raw, Duration::from_secs(1)),
                    Err(ConfigError::InvalidApiBase { .. })
                ),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_blank_ticket_fails_without_io() {
        // Port 9 (discard) is never contacted: the identifier is checked first.
        let provider = HttpSessionProvider::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let result = tokio_test::block_on(provider.fetch_session(&TicketId::new("  ")));
        assert_eq!(result, Err(SessionError::EmptyTicketId));
    }
}
