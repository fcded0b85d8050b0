use super::{ApiError, BatchApi};
use crate::model::{BatchRequest, BatchResponse, BatchStatus};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

const BULK_PATH: &str = "api/v1/runs/bulk";

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Option<Duration>,
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct HttpBatchApi {
    http: Client,
    base_url: Url,
    auth: Option<HeaderValue>,
}

// Some deployments wrap payloads in `{"data": ...}`; accept both shapes.
#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> Envelope<T> {
    fn into_inner(self) -> T {
        match self {
            Envelope::Wrapped { data } => data,
            Envelope::Bare(v) => v,
        }
    }
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl HttpBatchApi {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        let base_url = normalize_base_url(&config.base_url)?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let auth = match config.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => {
                let mut value = HeaderValue::from_str(&format!("Bearer {key}")).map_err(|_| {
                    ApiError::InvalidBaseUrl("API key contains invalid characters".into())
                })?;
                value.set_sensitive(true);
                Some(value)
            }
            None => None,
        };

        let mut builder = Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;
        Ok(Self {
            http,
            base_url,
            auth,
        })
    }

    /// Every call carries the bearer token on the request itself.
    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.auth {
            Some(value) => builder.header(AUTHORIZATION, value.clone()),
            None => builder,
        }
    }

    pub fn bulk_url(&self) -> Result<Url, ApiError> {
        self.base_url
            .join(BULK_PATH)
            .map_err(|e| ApiError::InvalidBaseUrl(e.to_string()))
    }

    pub fn batch_url(&self, batch_id: &str) -> Result<Url, ApiError> {
        let mut url = self.bulk_url()?;
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidBaseUrl(self.base_url.to_string()))?
            .push(batch_id);
        Ok(url)
    }

    pub fn build_submit(&self, request: &BatchRequest) -> Result<RequestBuilder, ApiError> {
        Ok(self.request(Method::POST, self.bulk_url()?).json(request))
    }

    pub fn build_status(&self, batch_id: &str) -> Result<RequestBuilder, ApiError> {
        Ok(self.request(Method::GET, self.batch_url(batch_id)?))
    }

    pub fn build_cancel(&self, batch_id: &str) -> Result<RequestBuilder, ApiError> {
        Ok(self.request(Method::DELETE, self.batch_url(batch_id)?))
    }
}

fn normalize_base_url(raw: &str) -> Result<Url, ApiError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ApiError::InvalidBaseUrl("base URL is empty".into()));
    }
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    let url = Url::parse(&with_slash).map_err(|e| ApiError::InvalidBaseUrl(format!("{raw}: {e}")))?;
    if url.cannot_be_a_base() {
        return Err(ApiError::InvalidBaseUrl(raw.to_string()));
    }
    Ok(url)
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiError::Status {
        status,
        message: parse_error_message(status, &body),
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let bytes = response.bytes().await?;
    let envelope: Envelope<T> = serde_json::from_slice(&bytes)?;
    Ok(envelope.into_inner())
}

/// Extract a human-readable message from an error response body.
pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    let fallback = || {
        if body.trim().is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        } else {
            body.trim().to_string()
        }
    };

    let Ok(payload) = serde_json::from_str::<ErrorPayload>(body) else {
        return fallback();
    };
    if let Some(msg) = payload.message.filter(|m| !m.trim().is_empty()) {
        return msg;
    }
    match payload.error {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s,
        Some(serde_json::Value::Object(obj)) => obj
            .get("message")
            .and_then(|v| v.as_str())
            .filter(|m| !m.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(fallback),
        _ => fallback(),
    }
}

impl BatchApi for HttpBatchApi {
    async fn submit_batch(&self, request: BatchRequest) -> Result<BatchResponse, ApiError> {
        let response = self.build_submit(&request)?.send().await?;
        let response = check_status(response).await?;
        decode(response).await
    }

    async fn batch_status(&self, batch_id: &str) -> Result<BatchStatus, ApiError> {
        let response = self.build_status(batch_id)?.send().await?;
        let response = check_status(response).await?;
        decode(response).await
    }

    async fn cancel_batch(&self, batch_id: &str) -> Result<(), ApiError> {
        let response = self.build_cancel(batch_id)?.send().await?;
        check_status(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BatchOptions, RunType};

    fn api(base: &str) -> HttpBatchApi {
        HttpBatchApi::new(&ApiConfig {
            base_url: base.into(),
            api_key: Some("secret".into()),
            timeout: Some(Duration::from_secs(5)),
            user_agent: "bulkrun-test".into(),
        })
        .expect("client")
    }

    #[test]
    fn urls_join_under_base_path() {
        let a = api("https://api.example.com/prefix");
        assert_eq!(
            a.bulk_url().unwrap().as_str(),
            "https://api.example.com/prefix/api/v1/runs/bulk"
        );
        assert_eq!(
            a.batch_url("b/1").unwrap().as_str(),
            "https://api.example.com/prefix/api/v1/runs/bulk/b%2F1"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let err = HttpBatchApi::new(&ApiConfig {
            base_url: "  ".into(),
            api_key: None,
            timeout: None,
            user_agent: "x".into(),
        })
        .unwrap_err();
        assert!(matches!(err, ApiError::InvalidBaseUrl(_)));
    }

    #[test]
    fn submit_request_is_a_json_post_with_auth() {
        let a = api("https://api.example.com");
        let req = BatchRequest {
            repository_name: "acme/app".into(),
            repo_id: None,
            run_type: RunType::Run,
            source_branch: None,
            batch_title: None,
            force: false,
            runs: vec![],
            options: BatchOptions { parallel: 5 },
        };
        let built = a.build_submit(&req).unwrap().build().unwrap();
        assert_eq!(built.method(), "POST");
        assert_eq!(built.url().path(), "/api/v1/runs/bulk");
        assert_eq!(built.headers()[AUTHORIZATION], "Bearer secret");
    }

    #[test]
    fn status_and_cancel_requests_carry_auth() {
        let a = api("https://api.example.com");
        let status = a.build_status("b1").unwrap().build().unwrap();
        assert_eq!(status.method(), "GET");
        assert_eq!(status.url().path(), "/api/v1/runs/bulk/b1");
        assert_eq!(status.headers()[AUTHORIZATION], "Bearer secret");

        let cancel = a.build_cancel("b1").unwrap().build().unwrap();
        assert_eq!(cancel.method(), "DELETE");
        assert_eq!(cancel.headers()[AUTHORIZATION], "Bearer secret");
    }

    #[test]
    fn missing_key_sends_no_auth_header() {
        let a = HttpBatchApi::new(&ApiConfig {
            base_url: "https://api.example.com".into(),
            api_key: Some("   ".into()),
            timeout: None,
            user_agent: "x".into(),
        })
        .unwrap();
        let built = a.build_status("b1").unwrap().build().unwrap();
        assert!(built.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn error_messages_prefer_payload_text() {
        let s = StatusCode::CONFLICT;
        assert_eq!(parse_error_message(s, r#"{"message":"dup"}"#), "dup");
        assert_eq!(parse_error_message(s, r#"{"error":"nope"}"#), "nope");
        assert_eq!(
            parse_error_message(s, r#"{"error":{"message":"deep"}}"#),
            "deep"
        );
        assert_eq!(parse_error_message(s, ""), "Conflict");
        assert_eq!(parse_error_message(s, "plain text"), "plain text");
    }

    #[test]
    fn envelope_unwraps_data_field() {
        let wrapped: Envelope<BatchStatus> = serde_json::from_str(
            r#"{"data":{"status":"processing","statistics":{"total":2,"processing":2},"runs":[]}}"#,
        )
        .unwrap();
        let bare: Envelope<BatchStatus> =
            serde_json::from_str(r#"{"status":"completed","runs":[]}"#).unwrap();
        assert_eq!(wrapped.into_inner().statistics.processing, 2);
        assert!(bare.into_inner().status.is_terminal());
    }
}
