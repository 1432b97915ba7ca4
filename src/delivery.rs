//! Posting the push event to its destinations.
//!
//! Every destination gets the same document. Each POST is independent: a
//! failing destination is reported and the next one is still attempted.
//! There are no retries.

use reqwest::header::{CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::NotifyError;
use crate::signature::{SIGNATURE_256_HEADER, SIGNATURE_HEADER, sign_sha1, sign_sha256};

const EVENT_HEADER: &str = "X-GitHub-Event";
const DELIVERY_HEADER: &str = "X-GitHub-Delivery";

/// How the document is put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentType {
    Json,
    /// `payload=<document>`, form-urlencoded.
    #[default]
    Form,
}

impl ContentType {
    pub fn mime(self) -> &'static str {
        match self {
            ContentType::Json => "application/json",
            ContentType::Form => "application/x-www-form-urlencoded",
        }
    }
}

impl FromStr for ContentType {
    type Err = NotifyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "application/json" | "json" => Ok(ContentType::Json),
            "application/x-www-form-urlencoded" | "form" => Ok(ContentType::Form),
            other => Err(NotifyError::ConfigError(format!(
                "unsupported webhook content type '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

/// One destination and how to talk to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTarget {
    pub url: String,
    pub content_type: ContentType,
    pub credentials: Option<Credentials>,
    /// Set means digest authentication for this realm; unset means basic.
    pub realm: Option<String>,
    pub secret: Option<String>,
    pub timeout: Option<Duration>,
}

impl DeliveryTarget {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content_type: ContentType::default(),
            credentials: None,
            realm: None,
            secret: None,
            timeout: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("POST to {url} returned error code {status}.")]
    Status { url: String, status: u16 },

    #[error("POST to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("POST to {url} could not be authenticated: {reason}")]
    Authentication { url: String, reason: String },

    #[error("Could not prepare POST to {url}: {reason}")]
    Encoding { url: String, reason: String },
}

impl DeliveryError {
    pub fn url(&self) -> &str {
        match self {
            DeliveryError::Status { url, .. }
            | DeliveryError::Transport { url, .. }
            | DeliveryError::Authentication { url, .. }
            | DeliveryError::Encoding { url, .. } => url,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            DeliveryError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Outcome of one fan-out.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    pub delivered: Vec<String>,
    pub failures: Vec<DeliveryError>,
}

impl DeliveryReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Encodes the document for the wire. The result is exactly what gets
/// signed and sent.
pub fn encode_body(content_type: ContentType, document: &str) -> Result<Vec<u8>, String> {
    match content_type {
        ContentType::Json => Ok(document.as_bytes().to_vec()),
        ContentType::Form => serde_urlencoded::to_string([("payload", document)])
            .map(String::into_bytes)
            .map_err(|e| e.to_string()),
    }
}

enum Authorization<'a> {
    Basic(&'a Credentials),
    Digest(String),
}

pub struct Dispatcher {
    client: Client,
}

impl Dispatcher {
    pub fn new() -> Result<Self, NotifyError> {
        let client = Client::builder()
            .user_agent(concat!("notify-webhook/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// POSTs the document to every target, in order. Failures are logged
    /// and collected; they never stop the remaining deliveries.
    pub async fn dispatch(&self, targets: &[DeliveryTarget], document: &str) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        for target in targets {
            match self.deliver(target, document).await {
                Ok(status) => {
                    info!("POST to {} returned {}", target.url, status);
                    report.delivered.push(target.url.clone());
                }
                Err(e) => {
                    warn!("{}", e);
                    report.failures.push(e);
                }
            }
        }
        report
    }

    /// A single POST, answering one authentication challenge if needed.
    pub async fn deliver(
        &self,
        target: &DeliveryTarget,
        document: &str,
    ) -> Result<StatusCode, DeliveryError> {
        let body = encode_body(target.content_type, document).map_err(|reason| {
            DeliveryError::Encoding {
                url: target.url.clone(),
                reason,
            }
        })?;
        let delivery_id = Uuid::now_v7().to_string();

        let request = self.request(target, &body, &delivery_id, None)?;
        let mut response = self.send(request, target).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            if let Some(credentials) = &target.credentials {
                debug!("{} requested authentication", target.url);
                let authorization = answer_challenge(target, credentials, &response, &body)?;
                let request = self.request(target, &body, &delivery_id, Some(authorization))?;
                response = self.send(request, target).await?;
            }
        }

        let status = response.status();
        if status.is_success() {
            Ok(status)
        } else {
            Err(DeliveryError::Status {
                url: target.url.clone(),
                status: status.as_u16(),
            })
        }
    }

    fn request(
        &self,
        target: &DeliveryTarget,
        body: &[u8],
        delivery_id: &str,
        authorization: Option<Authorization<'_>>,
    ) -> Result<RequestBuilder, DeliveryError> {
        let mut request = self
            .client
            .post(&target.url)
            .header(CONTENT_TYPE, target.content_type.mime())
            .header(EVENT_HEADER, "push")
            .header(DELIVERY_HEADER, delivery_id)
            .body(body.to_vec());

        if let Some(secret) = &target.secret {
            let encoding_error = || DeliveryError::Encoding {
                url: target.url.clone(),
                reason: "cannot sign with the configured secret".to_string(),
            };
            let sha1 = sign_sha1(secret.as_bytes(), body).ok_or_else(encoding_error)?;
            let sha256 = sign_sha256(secret.as_bytes(), body).ok_or_else(encoding_error)?;
            request = request
                .header(SIGNATURE_HEADER, sha1)
                .header(SIGNATURE_256_HEADER, sha256);
        }
        if let Some(timeout) = target.timeout {
            request = request.timeout(timeout);
        }
        match authorization {
            Some(Authorization::Basic(credentials)) => {
                request = request.basic_auth(&credentials.user, Some(&credentials.password));
            }
            Some(Authorization::Digest(header)) => {
                request = request.header(reqwest::header::AUTHORIZATION, header);
            }
            None => {}
        }
        Ok(request)
    }

    async fn send(
        &self,
        request: RequestBuilder,
        target: &DeliveryTarget,
    ) -> Result<Response, DeliveryError> {
        request
            .send()
            .await
            .map_err(|source| DeliveryError::Transport {
                url: target.url.clone(),
                source,
            })
    }
}

/// Builds the `Authorization` answer to a 401: digest when a realm is
/// configured, basic otherwise.
fn answer_challenge<'a>(
    target: &DeliveryTarget,
    credentials: &'a Credentials,
    response: &Response,
    body: &[u8],
) -> Result<Authorization<'a>, DeliveryError> {
    let Some(realm) = &target.realm else {
        return Ok(Authorization::Basic(credentials));
    };
    let auth_error = |reason: String| DeliveryError::Authentication {
        url: target.url.clone(),
        reason,
    };

    let challenge = response
        .headers()
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.trim_start().to_ascii_lowercase().starts_with("digest"))
        .ok_or_else(|| auth_error("no digest challenge offered".to_string()))?;

    let mut prompt = digest_auth::parse(challenge).map_err(|e| auth_error(e.to_string()))?;
    if prompt.realm != *realm {
        return Err(auth_error(format!(
            "challenge realm '{}' does not match configured realm '{}'",
            prompt.realm, realm
        )));
    }

    let url = Url::parse(&target.url).map_err(|e| auth_error(e.to_string()))?;
    let uri = match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    };
    let context = digest_auth::AuthContext::new_post(
        credentials.user.as_str(),
        credentials.password.as_str(),
        uri.as_str(),
        Some(body),
    );
    let answer = prompt
        .respond(&context)
        .map_err(|e| auth_error(e.to_string()))?;
    Ok(Authorization::Digest(answer.to_header_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::verify_signature;
    use axum::body::Bytes;
    use axum::http::{HeaderMap, StatusCode as AxumStatus, header};
    use axum::routing::post;
    use axum::{Router, extract::State};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Received {
        hits: Vec<(String, HeaderMap, Bytes)>,
    }

    type Shared = Arc<Mutex<Received>>;

    const DIGEST_CHALLENGE: &str = "Digest realm=\"hooks\", qop=\"auth\", nonce=\"dcd98b7102dd2f0e8b11d0f600bfb0c093\", opaque=\"5ccc069c403ebaf9f0171e9517f40e41\"";

    fn record(state: &Shared, path: &str, headers: HeaderMap, body: Bytes) {
        state.lock().unwrap().hits.push((path.to_string(), headers, body));
    }

    async fn spawn_server(state: Shared) -> String {
        let app = Router::new()
            .route(
                "/fail",
                post(|State(s): State<Shared>, headers: HeaderMap, body: Bytes| async move {
                    record(&s, "/fail", headers, body);
                    AxumStatus::INTERNAL_SERVER_ERROR
                }),
            )
            .route(
                "/ok",
                post(|State(s): State<Shared>, headers: HeaderMap, body: Bytes| async move {
                    record(&s, "/ok", headers, body);
                    AxumStatus::OK
                }),
            )
            .route(
                "/slow",
                post(|State(s): State<Shared>, headers: HeaderMap, body: Bytes| async move {
                    record(&s, "/slow", headers, body);
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    AxumStatus::OK
                }),
            )
            .route(
                "/basic",
                post(|State(s): State<Shared>, headers: HeaderMap, body: Bytes| async move {
                    let authorized = headers.get(header::AUTHORIZATION).is_some();
                    record(&s, "/basic", headers, body);
                    if authorized {
                        (AxumStatus::OK, [(header::WWW_AUTHENTICATE, "Basic realm=\"hooks\"")])
                    } else {
                        (
                            AxumStatus::UNAUTHORIZED,
                            [(header::WWW_AUTHENTICATE, "Basic realm=\"hooks\"")],
                        )
                    }
                }),
            )
            .route(
                "/digest",
                post(|State(s): State<Shared>, headers: HeaderMap, body: Bytes| async move {
                    let authorized = headers
                        .get(header::AUTHORIZATION)
                        .and_then(|v| v.to_str().ok())
                        .is_some_and(|v| v.starts_with("Digest "));
                    record(&s, "/digest", headers, body);
                    if authorized {
                        (AxumStatus::OK, [(header::WWW_AUTHENTICATE, DIGEST_CHALLENGE)])
                    } else {
                        (AxumStatus::UNAUTHORIZED, [(header::WWW_AUTHENTICATE, DIGEST_CHALLENGE)])
                    }
                }),
            )
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn form_body_wraps_document_in_payload_field() {
        let body = encode_body(ContentType::Form, "{}").unwrap();
        assert_eq!(body, b"payload=%7B%7D");
        let body = encode_body(ContentType::Json, "{}").unwrap();
        assert_eq!(body, b"{}");
    }

    #[test]
    fn parses_content_types() {
        assert_eq!("application/json".parse::<ContentType>().unwrap(), ContentType::Json);
        assert_eq!(
            "application/x-www-form-urlencoded".parse::<ContentType>().unwrap(),
            ContentType::Form
        );
        assert!("text/plain".parse::<ContentType>().is_err());
    }

    #[tokio::test]
    async fn failing_destination_does_not_stop_the_next() {
        let state = Shared::default();
        let base = spawn_server(state.clone()).await;
        let targets = vec![
            DeliveryTarget::new(format!("{}/fail", base)),
            DeliveryTarget::new(format!("{}/ok", base)),
        ];

        let report = Dispatcher::new().unwrap().dispatch(&targets, "{}").await;

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].url(), targets[0].url);
        assert_eq!(report.failures[0].status(), Some(500));
        assert_eq!(report.delivered, vec![targets[1].url.clone()]);

        let received = state.lock().unwrap();
        let hits = &received.hits;
        let paths: Vec<_> = hits.iter().map(|(p, _, _)| p.as_str()).collect();
        assert_eq!(paths, vec!["/fail", "/ok"]);
    }

    #[tokio::test]
    async fn signs_the_transmitted_body() {
        let state = Shared::default();
        let base = spawn_server(state.clone()).await;
        let mut target = DeliveryTarget::new(format!("{}/ok", base));
        target.secret = Some("s3cr3t".to_string());
        target.content_type = ContentType::Form;

        Dispatcher::new().unwrap().deliver(&target, "{}").await.unwrap();

        let received = state.lock().unwrap();
        let hits = &received.hits;
        let (_, headers, body) = &hits[0];
        assert_eq!(body.as_ref(), b"payload=%7B%7D");
        assert_eq!(
            headers.get(header::CONTENT_TYPE).unwrap(),
            "application/x-www-form-urlencoded"
        );
        assert_eq!(headers.get("x-github-event").unwrap(), "push");
        let sha1 = headers.get("x-hub-signature").unwrap().to_str().unwrap();
        assert_eq!(sha1, sign_sha1(b"s3cr3t", b"payload=%7B%7D").unwrap());
        let sha256 = headers.get("x-hub-signature-256").unwrap().to_str().unwrap();
        assert!(verify_signature(b"s3cr3t", body, sha256));
    }

    #[tokio::test]
    async fn json_body_is_the_document() {
        let state = Shared::default();
        let base = spawn_server(state.clone()).await;
        let mut target = DeliveryTarget::new(format!("{}/ok", base));
        target.content_type = ContentType::Json;

        Dispatcher::new()
            .unwrap()
            .deliver(&target, r#"{"ref":"refs/heads/master"}"#)
            .await
            .unwrap();

        let received = state.lock().unwrap();
        let hits = &received.hits;
        let (_, headers, body) = &hits[0];
        assert_eq!(body.as_ref(), br#"{"ref":"refs/heads/master"}"#);
        assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "application/json");
        assert!(headers.get("x-hub-signature").is_none());
    }

    #[tokio::test]
    async fn basic_credentials_answer_the_challenge() {
        let state = Shared::default();
        let base = spawn_server(state.clone()).await;
        let mut target = DeliveryTarget::new(format!("{}/basic", base));
        target.credentials = Some(Credentials {
            user: "hook".to_string(),
            password: "pw".to_string(),
        });

        let status = Dispatcher::new().unwrap().deliver(&target, "{}").await.unwrap();
        assert_eq!(status, StatusCode::OK);

        let received = state.lock().unwrap();
        let hits = &received.hits;
        assert_eq!(hits.len(), 2);
        assert!(hits[0].1.get(header::AUTHORIZATION).is_none());
        assert_eq!(
            hits[1].1.get(header::AUTHORIZATION).unwrap(),
            "Basic aG9vazpwdw=="
        );
    }

    #[tokio::test]
    async fn missing_credentials_report_unauthorized() {
        let state = Shared::default();
        let base = spawn_server(state.clone()).await;
        let target = DeliveryTarget::new(format!("{}/basic", base));

        let err = Dispatcher::new().unwrap().deliver(&target, "{}").await.unwrap_err();
        assert_eq!(err.status(), Some(401));
    }

    #[tokio::test]
    async fn unreachable_destination_is_a_transport_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let targets = vec![DeliveryTarget::new(format!("http://{}/gone", addr))];
        let report = Dispatcher::new().unwrap().dispatch(&targets, "{}").await;
        assert!(!report.is_success());
        assert!(matches!(report.failures[0], DeliveryError::Transport { .. }));
    }

    #[tokio::test]
    async fn timeout_bounds_slow_destination() {
        let state = Shared::default();
        let base = spawn_server(state.clone()).await;
        let mut target = DeliveryTarget::new(format!("{}/slow", base));
        target.timeout = Some(Duration::from_millis(200));

        let started = std::time::Instant::now();
        let err = Dispatcher::new().unwrap().deliver(&target, "{}").await.unwrap_err();

        assert!(matches!(err, DeliveryError::Transport { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(state.lock().unwrap().hits.len(), 1);
    }

    fn digest_target(base: &str, realm: &str) -> DeliveryTarget {
        let mut target = DeliveryTarget::new(format!("{}/digest", base));
        target.credentials = Some(Credentials {
            user: "hook".to_string(),
            password: "pw".to_string(),
        });
        target.realm = Some(realm.to_string());
        target
    }

    #[tokio::test]
    async fn digest_realm_answers_digest_challenge() {
        let state = Shared::default();
        let base = spawn_server(state.clone()).await;

        let status = Dispatcher::new()
            .unwrap()
            .deliver(&digest_target(&base, "hooks"), "{}")
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);

        let received = state.lock().unwrap();
        let answer = received.hits[1]
            .1
            .get(header::AUTHORIZATION)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(answer.starts_with("Digest "));
        assert!(answer.contains("username=\"hook\""));
        assert!(answer.contains("realm=\"hooks\""));
        assert!(answer.contains("uri=\"/digest\""));
    }

    #[tokio::test]
    async fn digest_realm_mismatch_is_not_answered() {
        let state = Shared::default();
        let base = spawn_server(state.clone()).await;

        let err = Dispatcher::new()
            .unwrap()
            .deliver(&digest_target(&base, "elsewhere"), "{}")
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Authentication { .. }));
        assert_eq!(state.lock().unwrap().hits.len(), 1);
    }
}
