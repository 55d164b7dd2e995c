use anyhow::Context;
use reqwest::header::RANGE;
use tokio_util::sync::CancellationToken;

use crate::download::{cancellable, get_response};
use crate::error::is_cancelled;

/// Checks that `url` serves content without downloading it.
///
/// Requests only the first byte, reads a single chunk and drops the response,
/// which aborts the rest of the transfer. Only a non-2xx status fails the probe.
pub async fn probe(client: Option<&reqwest::Client>, url: &str, token: &CancellationToken) -> Result<(), anyhow::Error> {
    let mut response = get_response(client, url, None, Some(&[(RANGE, "bytes=0-0")]), token)
        .await
        .context("failed to request stream")?;

    let status = response.status();

    if !status.is_success() {
        anyhow::bail!("stream responded with HTTP {}", status);
    }

    let chunk = cancellable(token, async {
        response.chunk().await.context("failed to read first chunk")
    })
    .await;

    match chunk {
        Ok(chunk) => log::trace!(
            "Probe of {} read {} bytes",
            url,
            chunk.map(|chunk| chunk.len()).unwrap_or_default()
        ),
        Err(err) if is_cancelled(&err) => return Err(err),
        Err(err) => log::debug!("Ignoring probe read error for {}: {:#}", url, err),
    }

    drop(response);

    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::probe;
    use crate::error::is_cancelled;

    #[tokio::test]
    async fn test_probe_requests_first_byte() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/stream/ok"))
            .and(header("Range", "bytes=0-0"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![0u8]))
            .expect(1)
            .mount(&server)
            .await;

        let token = CancellationToken::new();
        probe(None, &format!("{}/stream/ok", server.uri()), &token).await.unwrap();
    }

    #[tokio::test]
    async fn test_probe_ignores_full_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4 * 1024 * 1024]))
            .mount(&server)
            .await;

        let token = CancellationToken::new();
        probe(None, &server.uri(), &token).await.unwrap();
    }

    #[tokio::test]
    async fn test_probe_fails_on_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let token = CancellationToken::new();
        let err = probe(None, &server.uri(), &token).await.unwrap_err();
        assert!(err.to_string().contains("404"));
        assert!(!is_cancelled(&err));
    }
}
