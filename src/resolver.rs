use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::download::cancellable;
use crate::error::ResolveError;

#[derive(Debug, Serialize)]
struct FetchRequest<'a> {
    service: &'static str,
    action: &'static str,
    content: FetchContent<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct FetchContent<'a> {
    kwik: &'a str,
}

#[derive(Debug, Deserialize)]
struct FetchResponse {
    #[serde(default)]
    status: bool,
    #[serde(default)]
    content: Option<FetchResponseContent>,
}

#[derive(Debug, Deserialize)]
struct FetchResponseContent {
    #[serde(default)]
    url: Option<String>,
}

/// Client of the resolution service that turns kwik links into direct media urls.
#[derive(Debug, Clone)]
pub struct DirectLinkResolver {
    client: reqwest::Client,
    endpoint: Url,
    auth: Option<String>,
}

impl DirectLinkResolver {
    pub fn new(endpoint: Url, auth: Option<String>) -> Self {
        Self::with_client(crate::download::default_client().clone(), endpoint, auth)
    }

    pub fn with_client(client: reqwest::Client, endpoint: Url, auth: Option<String>) -> Self {
        DirectLinkResolver { client, endpoint, auth }
    }

    pub async fn resolve(&self, redirect_url: &str, token: &CancellationToken) -> Result<String, anyhow::Error> {
        let body = FetchRequest {
            service: "kwik",
            action: "fetch",
            content: FetchContent { kwik: redirect_url },
            auth: self.auth.as_deref(),
        };

        let request = self.client.post(self.endpoint.clone()).json(&body);
        let response = cancellable(token, async {
            request.send().await.context("failed to request resolution service")
        })
        .await?;

        let status = response.status();

        if !status.is_success() {
            return Err(ResolveError::Status(status).into());
        }

        let response: FetchResponse = cancellable(token, async {
            response
                .json()
                .await
                .context("failed to parse resolution service response")
        })
        .await?;

        if !response.status {
            return Err(ResolveError::Rejected.into());
        }

        response
            .content
            .and_then(|content| content.url)
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| ResolveError::MissingUrl.into())
    }
}

#[cfg(test)]
mod tests {
    use reqwest::StatusCode;
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{body_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::DirectLinkResolver;
    use crate::error::{is_cancelled, ResolveError};

    async fn resolver(server: &MockServer) -> DirectLinkResolver {
        DirectLinkResolver::new(format!("{}/", server.uri()).parse().unwrap(), Some("secret".to_string()))
    }

    #[tokio::test]
    async fn test_resolve() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(serde_json::json!({
                "service": "kwik",
                "action": "fetch",
                "content": {"kwik": "https://kwik.cx/f/abc"},
                "auth": "secret"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": true,
                "content": {"url": "https://cdn.example/ep1.mp4?token=x"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = CancellationToken::new();
        let direct = resolver(&server)
            .await
            .resolve("https://kwik.cx/f/abc", &token)
            .await
            .unwrap();
        assert_eq!(direct, "https://cdn.example/ep1.mp4?token=x");
    }

    #[tokio::test]
    async fn test_resolve_failures() {
        let cases = [
            (
                ResponseTemplate::new(502),
                ResolveError::Status(StatusCode::BAD_GATEWAY),
            ),
            (
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": false})),
                ResolveError::Rejected,
            ),
            (
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": true, "content": {}})),
                ResolveError::MissingUrl,
            ),
            (
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": true})),
                ResolveError::MissingUrl,
            ),
        ];

        for (response, expected) in cases {
            let server = MockServer::start().await;
            Mock::given(method("POST")).respond_with(response).mount(&server).await;

            let token = CancellationToken::new();
            let err = resolver(&server)
                .await
                .resolve("https://kwik.cx/f/abc", &token)
                .await
                .unwrap_err();

            assert_eq!(err.downcast_ref::<ResolveError>(), Some(&expected));
        }
    }

    #[tokio::test]
    async fn test_cancelled_resolve_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let token = CancellationToken::new();
        token.cancel();

        let err = resolver(&server)
            .await
            .resolve("https://kwik.cx/f/abc", &token)
            .await
            .unwrap_err();
        assert!(is_cancelled(&err));
    }
}
