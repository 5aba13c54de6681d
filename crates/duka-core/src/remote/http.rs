//! REST client for the remote authority.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use super::{RemoteApi, RemoteError, RemoteRecord, RemoteResult};
use crate::models::{Entity, EntityKind, ServerId};
use crate::util::{compact_text, is_http_url, normalize_text_option};

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Clone)]
pub struct HttpRemote {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemote {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemote")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpRemote {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> RemoteResult<Self> {
        let base_url = normalize_text_option(Some(base_url.into()))
            .filter(|url| is_http_url(url))
            .ok_or_else(|| {
                RemoteError::InvalidConfiguration(
                    "API base URL must include http:// or https://".to_string(),
                )
            })?
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            base_url,
            token: normalize_text_option(token),
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}/{}", self.base_url, path))
            .header("Accept", "application/json");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn read_record(kind: EntityKind, response: Response) -> RemoteResult<RemoteRecord> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(kind, status, &body));
        }
        let body = response.json::<Value>().await?;
        RemoteRecord::from_wire(kind, body)
    }
}

impl RemoteApi for HttpRemote {
    async fn create(&self, entity: &Entity, idempotency_key: &str) -> RemoteResult<RemoteRecord> {
        let kind = entity.kind();
        let body = entity
            .to_wire()
            .map_err(|error| RemoteError::InvalidPayload(error.to_string()))?;

        let response = self
            .request(Method::POST, kind.collection())
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .json(&body)
            .send()
            .await?;
        Self::read_record(kind, response).await
    }

    async fn update(
        &self,
        id: ServerId,
        entity: &Entity,
        base_updated_at: Option<i64>,
    ) -> RemoteResult<RemoteRecord> {
        let kind = entity.kind();
        let mut body = entity
            .to_wire()
            .map_err(|error| RemoteError::InvalidPayload(error.to_string()))?;
        if let (Some(base), Value::Object(map)) = (base_updated_at, &mut body) {
            map.insert("updatedAt".to_string(), Value::from(base));
        }

        let response = self
            .request(Method::PUT, &format!("{}/{id}", kind.collection()))
            .json(&body)
            .send()
            .await?;
        Self::read_record(kind, response).await
    }

    async fn delete(&self, kind: EntityKind, id: ServerId) -> RemoteResult<()> {
        let response = self
            .request(Method::DELETE, &format!("{}/{id}", kind.collection()))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(kind, status, &body))
    }

    async fn fetch(&self, kind: EntityKind, id: ServerId) -> RemoteResult<Option<RemoteRecord>> {
        let response = self
            .request(Method::GET, &format!("{}/{id}", kind.collection()))
            .send()
            .await?;

        match Self::read_record(kind, response).await {
            Ok(record) => Ok(Some(record)),
            Err(RemoteError::NotFound) => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn ping(&self) -> RemoteResult<()> {
        let response = self.request(Method::GET, "health").send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(classify_status(EntityKind::Product, status, &body))
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

/// Map a non-success response onto the remote error taxonomy.
fn classify_status(kind: EntityKind, status: StatusCode, body: &str) -> RemoteError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            RemoteError::Unauthorized(parse_api_error(status, body))
        }
        StatusCode::NOT_FOUND | StatusCode::GONE => RemoteError::NotFound,
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
            let current = serde_json::from_str::<Value>(body)
                .ok()
                .map(|value| match value {
                    Value::Object(mut map) if map.contains_key("current") => {
                        map.remove("current").unwrap_or_default()
                    }
                    other => other,
                })
                .and_then(|value| RemoteRecord::from_wire(kind, value).ok())
                .map(Box::new);
            RemoteError::Conflict { current }
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => RemoteError::Server {
            status: status.as_u16(),
            message: parse_api_error(status, body),
        },
        status if status.is_server_error() => RemoteError::Server {
            status: status.as_u16(),
            message: parse_api_error(status, body),
        },
        status => RemoteError::Rejected {
            status: status.as_u16(),
            message: parse_api_error(status, body),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_invalid_base_url() {
        assert!(HttpRemote::new("", None, Duration::from_secs(1)).is_err());
        assert!(HttpRemote::new("pos.example.com", None, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn new_trims_trailing_slash() {
        let remote =
            HttpRemote::new(" https://pos.example.com/api/ ", None, Duration::from_secs(1))
                .unwrap();
        assert_eq!(remote.base_url(), "https://pos.example.com/api");
    }

    #[test]
    fn debug_redacts_token() {
        let remote = HttpRemote::new(
            "https://pos.example.com",
            Some("secret".to_string()),
            Duration::from_secs(1),
        )
        .unwrap();
        let debug = format!("{remote:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn parse_api_error_prefers_message_field() {
        assert_eq!(
            parse_api_error(StatusCode::BAD_REQUEST, r#"{"message":" price required "}"#),
            "price required (400)"
        );
        assert_eq!(parse_api_error(StatusCode::BAD_GATEWAY, "  "), "HTTP 502");
    }

    #[test]
    fn classify_status_maps_taxonomy() {
        let kind = EntityKind::Product;
        assert!(matches!(
            classify_status(kind, StatusCode::FORBIDDEN, ""),
            RemoteError::Unauthorized(_)
        ));
        assert!(matches!(
            classify_status(kind, StatusCode::NOT_FOUND, ""),
            RemoteError::NotFound
        ));
        assert!(matches!(
            classify_status(kind, StatusCode::SERVICE_UNAVAILABLE, ""),
            RemoteError::Server { status: 503, .. }
        ));
        assert!(matches!(
            classify_status(kind, StatusCode::UNPROCESSABLE_ENTITY, "{}"),
            RemoteError::Rejected { status: 422, .. }
        ));
    }

    #[test]
    fn classify_conflict_parses_current_record() {
        let body = r#"{"current":{"id":7,"updatedAt":900,"name":"Milk","price":65}}"#;
        let RemoteError::Conflict { current } =
            classify_status(EntityKind::Product, StatusCode::CONFLICT, body)
        else {
            panic!("expected conflict");
        };
        let current = current.unwrap();
        assert_eq!(current.id, ServerId::new(7));
        assert_eq!(current.updated_at, 900);

        assert!(matches!(
            classify_status(EntityKind::Product, StatusCode::CONFLICT, "stale"),
            RemoteError::Conflict { current: None }
        ));
    }
}
