//! HTTP client wrapper for the remote directory.
//!
//! Applies the defaults every outbound call wants: a request timeout capped
//! by the run context's remaining time, a crate user-agent, an HTTPS
//! assertion outside tests, and exponential retries for transient failures
//! (429, 5xx, timeouts, connection errors). Permanent failures and
//! exhausted retries surface as [`CollaboratorError::Network`] carrying the
//! final response's status and body.

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use reqwest::{Method, RequestBuilder, Response};

use crate::context::RunContext;
use crate::error::CollaboratorError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A wrapper on an HTTP client with retry handling for transient failures.
#[derive(Debug)]
pub(crate) struct Request {
    client: reqwest::Client,
    timeout: Duration,
    max_retries: u32,
}

impl Request {
    /// Initializes a new `Request` instance.
    pub(crate) fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: 3, // total attempts = 4
        }
    }

    /// Creates a request builder with defaults applied.
    ///
    /// The per-request timeout is the configured default, clamped to the
    /// context's remaining time so a nearly-expired run fails fast.
    pub(crate) fn req(&self, method: Method, url: &str, ctx: &RunContext) -> RequestBuilder {
        #[cfg(not(test))]
        assert!(url.starts_with("https"));

        let timeout = ctx
            .remaining()
            .map_or(self.timeout, |remaining| remaining.min(self.timeout));

        self.client.request(method, url).timeout(timeout).header(
            "User-Agent",
            format!("enrollkit-core/{}", env!("CARGO_PKG_VERSION")),
        )
    }

    /// Creates a GET request builder with defaults applied.
    pub(crate) fn get(&self, url: &str, ctx: &RunContext) -> RequestBuilder {
        self.req(Method::GET, url, ctx)
    }

    /// Creates a POST request builder with defaults applied.
    pub(crate) fn post(&self, url: &str, ctx: &RunContext) -> RequestBuilder {
        self.req(Method::POST, url, ctx)
    }

    /// Sends a request built by `req`/`get`/`post`, retrying transient failures.
    pub(crate) async fn handle(
        &self,
        request_builder: RequestBuilder,
    ) -> Result<Response, CollaboratorError> {
        let Some(template) = request_builder.try_clone() else {
            // Streaming bodies cannot be replayed; send once without retries.
            return send(request_builder).await.map_err(Into::into);
        };

        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_secs(2))
            .with_max_times(self.max_retries as usize);

        (|| async {
            let request_builder = template.try_clone().ok_or_else(|| {
                SendError::fatal(
                    "<unknown>".to_string(),
                    None,
                    "request cannot be retried because it is not cloneable".to_string(),
                )
            })?;
            send(request_builder).await
        })
        .retry(backoff)
        .when(SendError::is_transient)
        .await
        .map_err(Into::into)
    }
}

#[derive(Debug)]
struct SendError {
    url: String,
    status: Option<u16>,
    message: String,
    transient: bool,
}

impl SendError {
    fn transient(url: String, status: Option<u16>, message: String) -> Self {
        Self {
            url,
            status,
            message,
            transient: true,
        }
    }

    fn fatal(url: String, status: Option<u16>, message: String) -> Self {
        Self {
            url,
            status,
            message,
            transient: false,
        }
    }

    fn is_transient(&self) -> bool {
        self.transient
    }
}

impl From<SendError> for CollaboratorError {
    fn from(value: SendError) -> Self {
        Self::Network {
            url: value.url,
            status: value.status,
            message: value.message,
        }
    }
}

async fn send(request_builder: RequestBuilder) -> Result<Response, SendError> {
    let (client, request) = request_builder.build_split();
    let request = request.map_err(|err| {
        SendError::fatal(
            err.url()
                .map_or_else(|| "<unknown>".to_string(), ToString::to_string),
            None,
            format!("request build failed: {err}"),
        )
    })?;
    let url = request.url().to_string();

    match client.execute(request).await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            if status == 429 || (500..600).contains(&status) {
                // Only the final attempt's error reaches the caller, so
                // carry the response body with it.
                let body = resp.text().await.unwrap_or_default();
                let message = if body.is_empty() {
                    format!("request error with bad status code {status}")
                } else {
                    format!("request error with bad status code {status}: {body}")
                };
                return Err(SendError::transient(url, Some(status), message));
            }
            Ok(resp)
        }
        Err(err) => {
            if err.is_timeout() || err.is_connect() {
                return Err(SendError::transient(
                    url,
                    None,
                    format!("request timeout/connect error: {err}"),
                ));
            }

            Err(SendError::fatal(url, None, format!("request failed: {err}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_retries_transient_status_then_succeeds() {
        let mut server = mockito::Server::new_async().await;
        let flaky = server
            .mock("GET", "/record")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;
        let healthy = server
            .mock("GET", "/record")
            .with_status(200)
            .with_body("ok")
            .expect(1)
            .create_async()
            .await;

        let request = Request::new();
        let ctx = RunContext::background();
        let response = request
            .handle(request.get(&format!("{}/record", server.url()), &ctx))
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 200);
        flaky.assert_async().await;
        healthy.assert_async().await;
    }

    #[tokio::test]
    async fn test_exhausted_retries_carry_the_final_body() {
        let mut server = mockito::Server::new_async().await;
        let broken = server
            .mock("GET", "/record")
            .with_status(503)
            .with_body("directory overloaded")
            .expect(2)
            .create_async()
            .await;

        let request = Request {
            client: reqwest::Client::new(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: 1,
        };
        let ctx = RunContext::background();
        let err = request
            .handle(request.get(&format!("{}/record", server.url()), &ctx))
            .await
            .unwrap_err();

        match err {
            CollaboratorError::Network {
                status, message, ..
            } => {
                assert_eq!(status, Some(503));
                assert!(message.contains("directory overloaded"), "message: {message}");
            }
            other => panic!("expected network error, got {other:?}"),
        }
        broken.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_transient_status_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let rejected = server
            .mock("POST", "/join")
            .with_status(400)
            .with_body("bad request")
            .expect(1)
            .create_async()
            .await;

        let request = Request::new();
        let ctx = RunContext::background();
        let response = request
            .handle(request.post(&format!("{}/join", server.url()), &ctx))
            .await
            .unwrap();

        // 4xx responses come back to the caller for interpretation.
        assert_eq!(response.status().as_u16(), 400);
        rejected.assert_async().await;
    }

    #[tokio::test]
    async fn test_expired_context_caps_timeout() {
        let request = Request::new();
        let ctx = RunContext::with_timeout(Duration::ZERO);

        // Nothing is listening on this port; with a zero timeout the send
        // fails immediately instead of hanging.
        let result = request
            .handle(request.get("http://127.0.0.1:9/none", &ctx))
            .await;
        assert!(result.is_err());
    }
}
