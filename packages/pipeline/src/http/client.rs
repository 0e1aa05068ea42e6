use std::time::Duration;

use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::domain::{ApiRequest, QueuedMethod};
use crate::error::HttpError;
use crate::retry::retry_exponential;

/// Mirrors `Requests.TYPE_GET` / `Requests.TYPE_POST`; re-exported so
/// callers don't need to reach into `crate::domain` just to build a
/// request.
pub type RequestMethod = QueuedMethod;

#[derive(Debug, Clone)]
pub enum HttpResponse {
    Json(Value),
    Text(String),
}

impl HttpResponse {
    pub fn into_json(self) -> Result<Value, HttpError> {
        match self {
            HttpResponse::Json(value) => Ok(value),
            HttpResponse::Text(text) => Err(HttpError::UnexpectedShape(format!(
                "expected JSON body, got raw text of length {}",
                text.len()
            ))),
        }
    }
}

struct TokenState {
    requests_on_token: u32,
    current_token: Option<String>,
}

/// Proxies requests through `reqwest`, attaching a bearer token that's
/// refreshed every `requests_per_token` authorized requests (spec
/// §4.1.3). One instance is shared across a component's lifetime.
pub struct TokenRotatingClient {
    client: Client,
    token: Mutex<TokenState>,
    user_agent: String,
    homepage_url: String,
    requests_per_token: u32,
    token_regex: Regex,
}

impl TokenRotatingClient {
    pub fn new(user_agent: String, homepage_url: String, requests_per_token: u32) -> Self {
        Self {
            client: Client::new(),
            token: Mutex::new(TokenState {
                requests_on_token: 0,
                current_token: None,
            }),
            user_agent,
            homepage_url,
            requests_per_token,
            token_regex: Regex::new(r#""accessToken":"(.*?)""#).expect("static regex is valid"),
        }
    }

    /// Sends a request, optionally attaching auth headers and parsing
    /// the body as JSON. Unknown methods are a fatal, non-retryable
    /// error — there's no way a retry fixes a caller bug.
    pub async fn send(
        &self,
        url: &str,
        method: RequestMethod,
        body: Option<Value>,
        parse_json: bool,
        with_auth: bool,
    ) -> Result<HttpResponse, HttpError> {
        let headers = if with_auth {
            Some(self.generate_headers().await?)
        } else {
            None
        };

        tracing::debug!(url, ?method, parse_json, with_auth, "preparing request");

        let mut builder = match method {
            RequestMethod::Get => self.client.get(url),
            RequestMethod::Post => self.client.post(url).json(&body.unwrap_or(Value::Null)),
        };

        if let Some(headers) = &headers {
            for (name, value) in headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }

        let response = builder.send().await.map_err(classify_transport_error)?;

        if with_auth {
            let mut state = self.token.lock().await;
            state.requests_on_token += 1;
        }

        if parse_json {
            let value = response
                .json::<Value>()
                .await
                .map_err(|e| HttpError::Decode(e.to_string()))?;
            Ok(HttpResponse::Json(value))
        } else {
            let text = response
                .text()
                .await
                .map_err(|e| HttpError::Decode(e.to_string()))?;
            Ok(HttpResponse::Text(text))
        }
    }

    /// The interface used by the post-rescanner to execute a queued
    /// API request carried on a `post.rescan` message.
    pub async fn send_from_message(&self, request: &ApiRequest) -> Result<Value, HttpError> {
        let response = self
            .send(
                &request.url,
                request.method,
                request.body.clone(),
                true,
                true,
            )
            .await?;
        response.into_json()
    }

    async fn generate_headers(&self) -> Result<Vec<(String, String)>, HttpError> {
        let token = self.get_token().await?;
        Ok(vec![
            ("Authorization".to_string(), format!("Bearer {token}")),
            ("User-Agent".to_string(), self.user_agent.clone()),
        ])
    }

    async fn get_token(&self) -> Result<String, HttpError> {
        let mut state = self.token.lock().await;
        if state.requests_on_token % self.requests_per_token == 0 {
            let fetched = self.generate_token().await?;
            state.current_token = Some(fetched);
        }
        state
            .current_token
            .clone()
            .ok_or(HttpError::TokenNotFound)
    }

    async fn generate_token(&self) -> Result<String, HttpError> {
        retry_exponential(
            Duration::from_secs(1),
            Duration::from_secs(30),
            Duration::from_secs(3 * 60),
            HttpError::is_retryable,
            || self.fetch_and_extract_token(),
        )
        .await
    }

    async fn fetch_and_extract_token(&self) -> Result<String, HttpError> {
        tracing::info!("attempting to fetch a new access token");

        let response = self
            .send(&self.homepage_url, RequestMethod::Get, None, false, false)
            .await?;

        let HttpResponse::Text(body) = response else {
            return Err(HttpError::UnexpectedShape(
                "homepage response was parsed as JSON".to_string(),
            ));
        };

        match self.token_regex.captures(&body) {
            Some(captures) => {
                let token = captures[1].to_string();
                tracing::info!("found access token");
                Ok(token)
            }
            None => {
                tracing::info!("failed to find access token in homepage response");
                Err(HttpError::TokenNotFound)
            }
        }
    }
}

fn classify_transport_error(err: reqwest::Error) -> HttpError {
    if err.is_timeout() {
        HttpError::Timeout
    } else if err.is_redirect() {
        HttpError::RedirectLoop
    } else if err.is_builder() || err.is_request() {
        HttpError::MalformedUrl(err.to_string())
    } else if err.is_decode() {
        HttpError::Decode(err.to_string())
    } else {
        HttpError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn send_get_without_auth_returns_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let client = TokenRotatingClient::new("ua/1.0".into(), format!("{}/home", server.uri()), 100);
        let response = client
            .send(&format!("{}/ping", server.uri()), RequestMethod::Get, None, true, false)
            .await
            .unwrap();

        assert_eq!(response.into_json().unwrap(), serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn send_with_auth_scrapes_token_from_homepage() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/home"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<html>window.__data = {"accessToken":"tok-123","other":1}</html>"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/secure"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"secure": true})))
            .mount(&server)
            .await;

        let client = TokenRotatingClient::new("ua/1.0".into(), format!("{}/home", server.uri()), 100);
        let response = client
            .send(&format!("{}/secure", server.uri()), RequestMethod::Get, None, true, true)
            .await
            .unwrap();

        assert_eq!(response.into_json().unwrap(), serde_json::json!({"secure": true}));
    }

    #[tokio::test]
    async fn missing_token_in_homepage_is_retryable_token_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/home"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>no token here</html>"))
            .mount(&server)
            .await;

        let client = TokenRotatingClient::new("ua/1.0".into(), format!("{}/home", server.uri()), 1);
        let err = client.get_token().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, HttpError::TokenNotFound));
    }

    #[tokio::test]
    async fn token_refreshes_every_n_authorized_requests() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/home"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"accessToken":"tok-A"}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/secure"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let client = TokenRotatingClient::new("ua/1.0".into(), format!("{}/home", server.uri()), 2);

        for _ in 0..4 {
            client
                .send(&format!("{}/secure", server.uri()), RequestMethod::Get, None, true, true)
                .await
                .unwrap();
        }

        let state = client.token.lock().await;
        assert_eq!(state.requests_on_token, 4);
    }
}
