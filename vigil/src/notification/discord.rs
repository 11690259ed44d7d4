//! Discord webhook notification channel.
//!
//! Retries on 429 responses respecting the Retry-After header.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::HeaderMap;
use serde_json::json;
use tracing::{debug, warn};

use super::NotificationSink;
use crate::utils::http_client::build_client;
use crate::{Error, Result};

/// Maximum number of attempts for rate-limited requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on a single rate-limit wait, whatever the server asks for.
const MAX_RETRY_WAIT: Duration = Duration::from_secs(5);

/// Discord channel configuration.
#[derive(Debug, Clone)]
pub struct DiscordConfig {
    /// Discord webhook URL.
    pub webhook_url: String,
    /// Optional username for the webhook.
    pub username: Option<String>,
}

impl DiscordConfig {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            username: None,
        }
    }
}

/// Discord notification channel.
pub struct DiscordChannel {
    config: DiscordConfig,
    client: Client,
}

impl DiscordChannel {
    pub fn new(config: DiscordConfig) -> Result<Self> {
        Ok(Self {
            config,
            client: build_client(REQUEST_TIMEOUT)?,
        })
    }

    fn build_payload(&self, content: &str) -> serde_json::Value {
        let mut payload = json!({ "content": content });
        if let Some(username) = &self.config.username {
            payload["username"] = json!(username);
        }
        payload
    }

    async fn send_with_retry(&self, payload: &serde_json::Value) -> Result<()> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            let response = self
                .client
                .post(&self.config.webhook_url)
                .json(payload)
                .send()
                .await
                .map_err(|e| Error::Notification(format!("Discord request failed: {e}")))?;

            let status = response.status();
            if status.is_success() {
                return Ok(());
            }

            if status.as_u16() == 429 {
                let retry_after = parse_retry_after(response.headers());

                if attempts >= MAX_RATE_LIMIT_RETRIES {
                    return Err(Error::Notification(format!(
                        "Discord rate limit exceeded after {MAX_RATE_LIMIT_RETRIES} attempts"
                    )));
                }

                let wait_duration = retry_after.unwrap_or(Duration::from_secs(1));
                debug!(
                    ?wait_duration,
                    attempts, "Discord rate limited (429), waiting before retry"
                );
                tokio::time::sleep(wait_duration).await;
                continue;
            }

            // Other error - don't retry
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Notification(format!(
                "Discord webhook failed: {status} - {body}"
            )));
        }
    }
}

/// Parse the Retry-After duration from a 429 response, capped at [`MAX_RETRY_WAIT`].
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    ["Retry-After", "X-RateLimit-Reset-After"]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok()?.trim().parse::<f64>().ok())
        .find(|secs| secs.is_finite() && *secs >= 0.0)
        .map(|secs| {
            Duration::try_from_secs_f64(secs)
                .unwrap_or(MAX_RETRY_WAIT)
                .min(MAX_RETRY_WAIT)
        })
}

#[async_trait]
impl NotificationSink for DiscordChannel {
    fn name(&self) -> &'static str {
        "discord"
    }

    async fn send(&self, content: &str) -> Result<()> {
        let payload = self.build_payload(content);
        self.send_with_retry(&payload).await.inspect_err(|e| {
            warn!(error = %e, "Discord notification was not delivered");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve canned HTTP responses in order, one per connection.
    async fn serve(responses: Vec<&'static str>) -> (String, Arc<AtomicUsize>, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/webhook", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        let handle = tokio::spawn(async move {
            let mut bodies = Vec::new();
            for response in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
                bodies.push(read_request_body(&mut socket).await);
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
            bodies
        });
        (url, hits, handle)
    }

    async fn read_request_body(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= header_end + 4 + content_length {
                    return text[header_end + 4..].to_string();
                }
            }
        }
        String::new()
    }

    const NO_CONTENT: &str = "HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n";
    const RATE_LIMITED: &str = "HTTP/1.1 429 Too Many Requests\r\nRetry-After: 0.01\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    const HUGE_RETRY_AFTER: &str = "HTTP/1.1 429 Too Many Requests\r\nRetry-After: 1e30\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
    const BAD_REQUEST: &str = "HTTP/1.1 400 Bad Request\r\nContent-Length: 3\r\nConnection: close\r\n\r\nbad";

    #[tokio::test]
    async fn test_posts_content_and_username() {
        let (url, hits, server) = serve(vec![NO_CONTENT]).await;
        let mut config = DiscordConfig::new(url);
        config.username = Some("vigil".to_string());
        let channel = DiscordChannel::new(config).unwrap();

        channel.send("[ON][twitch][A][C] T (1)").await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        let bodies = server.await.unwrap();
        let body: serde_json::Value = serde_json::from_str(&bodies[0]).unwrap();
        assert_eq!(body["content"], "[ON][twitch][A][C] T (1)");
        assert_eq!(body["username"], "vigil");
    }

    #[tokio::test]
    async fn test_retries_after_rate_limit() {
        let (url, hits, server) = serve(vec![RATE_LIMITED, NO_CONTENT]).await;
        let channel = DiscordChannel::new(DiscordConfig::new(url)).unwrap();

        channel.send("hello").await.unwrap();
        server.await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_rate_limit_attempts() {
        let (url, hits, server) = serve(vec![RATE_LIMITED, RATE_LIMITED, RATE_LIMITED]).await;
        let channel = DiscordChannel::new(DiscordConfig::new(url)).unwrap();

        let result = channel.send("hello").await;
        assert!(matches!(result, Err(Error::Notification(_))));
        server.await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let (url, hits, _server) = serve(vec![BAD_REQUEST]).await;
        let channel = DiscordChannel::new(DiscordConfig::new(url)).unwrap();

        let err = channel.send("hello").await.unwrap_err();
        assert!(err.to_string().contains("400"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, value.parse().unwrap());
        }
        map
    }

    #[test]
    fn test_retry_after_is_capped() {
        assert_eq!(
            parse_retry_after(&headers(&[("Retry-After", "0.5")])),
            Some(Duration::from_millis(500))
        );
        assert_eq!(
            parse_retry_after(&headers(&[("Retry-After", "600")])),
            Some(MAX_RETRY_WAIT)
        );
        assert_eq!(
            parse_retry_after(&headers(&[("Retry-After", "1e30")])),
            Some(MAX_RETRY_WAIT)
        );
        assert_eq!(
            parse_retry_after(&headers(&[("X-RateLimit-Reset-After", "2")])),
            Some(Duration::from_secs(2))
        );
    }

    #[test]
    fn test_retry_after_ignores_garbage() {
        assert_eq!(parse_retry_after(&headers(&[("Retry-After", "NaN")])), None);
        assert_eq!(parse_retry_after(&headers(&[("Retry-After", "-1")])), None);
        assert_eq!(parse_retry_after(&headers(&[("Retry-After", "soon")])), None);
        assert_eq!(parse_retry_after(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn test_oversized_retry_after_waits_at_most_the_cap() {
        let (url, hits, server) = serve(vec![HUGE_RETRY_AFTER, NO_CONTENT]).await;
        let channel = DiscordChannel::new(DiscordConfig::new(url)).unwrap();

        let started = tokio::time::Instant::now();
        channel.send("hello").await.unwrap();
        assert!(started.elapsed() < MAX_RETRY_WAIT + Duration::from_secs(3));

        server.await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
