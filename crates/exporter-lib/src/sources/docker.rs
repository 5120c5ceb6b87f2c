//! Docker Engine API client over the daemon's Unix socket
//!
//! Speaks plain HTTP/1.0 so the daemon answers with an unchunked body and
//! closes the connection, which keeps the client small. Every request is
//! bounded by a timeout so a hung daemon call only stalls its caller.

use super::ContainerRuntime;
use crate::error::CollectError;
use crate::models::{ContainerHandle, RawCounterSnapshot};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::debug;

pub const DEFAULT_DOCKER_SOCKET: &str = "/var/run/docker.sock";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Entry of `GET /containers/json`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerSummary {
    id: String,
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
}

/// Subset of `GET /containers/{id}/json`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerInspect {
    #[serde(default)]
    state: InspectState,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    #[serde(default)]
    running: bool,
}

impl From<ContainerSummary> for ContainerHandle {
    fn from(summary: ContainerSummary) -> Self {
        let name = summary
            .names
            .first()
            .map(|n| n.trim_start_matches('/').to_string())
            .unwrap_or_else(|| summary.id.chars().take(12).collect());

        ContainerHandle {
            id: summary.id,
            name,
            labels: summary.labels.unwrap_or_default(),
        }
    }
}

/// Minimal Docker Engine API client
#[derive(Debug, Clone)]
pub struct DockerClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl DockerClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// GET `path` and return the body of a 2xx response
    async fn get(&self, path: &str) -> Result<String, CollectError> {
        match tokio::time::timeout(self.timeout, self.send(path)).await {
            Ok(result) => result,
            Err(_) => Err(CollectError::Timeout {
                path: path.to_string(),
                timeout: self.timeout,
            }),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, CollectError> {
        let body = self.get(path).await?;
        serde_json::from_str(&body).map_err(|e| CollectError::parse(path, e))
    }

    async fn send(&self, path: &str) -> Result<String, CollectError> {
        let mut stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| CollectError::unavailable("docker daemon", e))?;

        let request = format!("GET {path} HTTP/1.0\r\nHost: docker\r\n\r\n");
        stream
            .write_all(request.as_bytes())
            .await
            .map_err(|e| CollectError::from_io(path, e))?;

        let mut response = Vec::new();
        stream
            .read_to_end(&mut response)
            .await
            .map_err(|e| CollectError::from_io(path, e))?;

        let (status, body) = parse_http_response(&response)?;
        debug!(path = %path, status = status, "Docker API response");

        if !(200..300).contains(&status) {
            return Err(CollectError::Runtime {
                path: path.to_string(),
                status,
                body: body.trim().to_string(),
            });
        }

        Ok(body)
    }
}

/// Split a raw HTTP response into status code and body
pub fn parse_http_response(raw: &[u8]) -> Result<(u16, String), CollectError> {
    let text = String::from_utf8_lossy(raw);

    let (head, body) = text
        .split_once("\r\n\r\n")
        .ok_or_else(|| CollectError::parse("HTTP response", "missing header terminator"))?;

    let status = head
        .lines()
        .next()
        .and_then(|status_line| status_line.split_whitespace().nth(1))
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| CollectError::parse("HTTP response", "malformed status line"))?;

    Ok((status, body.to_string()))
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    async fn ping(&self) -> Result<(), CollectError> {
        self.get("/_ping").await.map(|_| ())
    }

    async fn list_containers(
        &self,
        include_stopped: bool,
    ) -> Result<Vec<ContainerHandle>, CollectError> {
        let path = if include_stopped {
            "/containers/json?all=1"
        } else {
            "/containers/json"
        };
        let summaries: Vec<ContainerSummary> = self.get_json(path).await?;
        Ok(summaries.into_iter().map(ContainerHandle::from).collect())
    }

    async fn stats(&self, handle: &ContainerHandle) -> Result<RawCounterSnapshot, CollectError> {
        self.get_json(&format!("/containers/{}/stats?stream=false", handle.id))
            .await
    }

    async fn labels(
        &self,
        handle: &ContainerHandle,
    ) -> Result<HashMap<String, String>, CollectError> {
        // The listing returns labels and is refreshed every tick
        Ok(handle.labels.clone())
    }

    async fn running_state(&self, handle: &ContainerHandle) -> Result<bool, CollectError> {
        let inspect: ContainerInspect = self
            .get_json(&format!("/containers/{}/json", handle.id))
            .await?;
        Ok(inspect.state.running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::net::UnixListener;

    #[test]
    fn test_parse_http_response() {
        let raw = b"HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\n\r\nOK";
        let (status, body) = parse_http_response(raw).unwrap();
        assert_eq!(status, 200);
        assert_eq!(body, "OK");
    }

    #[test]
    fn test_parse_http_response_malformed() {
        assert!(parse_http_response(b"garbage").is_err());
        assert!(parse_http_response(b"HTTP/1.0 abc\r\n\r\n").is_err());
    }

    #[test]
    fn test_container_summary_to_handle() {
        let json = r#"[{"Id": "0123456789abcdef", "Names": ["/shop-web-1"],
            "Labels": {"com.docker.compose.project": "shop"}, "State": "running"},
            {"Id": "fedcba9876543210", "Names": [], "Labels": null}]"#;
        let summaries: Vec<ContainerSummary> = serde_json::from_str(json).unwrap();
        let handles: Vec<ContainerHandle> = summaries.into_iter().map(Into::into).collect();

        assert_eq!(handles[0].name, "shop-web-1");
        assert_eq!(
            handles[0].labels.get("com.docker.compose.project").map(String::as_str),
            Some("shop")
        );
        assert_eq!(handles[1].name, "fedcba987654");
        assert!(handles[1].labels.is_empty());
    }

    /// Serve a single canned response on a temporary socket
    async fn serve_once(dir: &TempDir, response: &'static str) -> PathBuf {
        let socket = dir.path().join("docker.sock");
        let listener = UnixListener::bind(&socket).unwrap();

        tokio::spawn(async move {
            if let Ok((mut conn, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = conn.read(&mut buf).await;
                let _ = conn.write_all(response.as_bytes()).await;
                let _ = conn.shutdown().await;
            }
        });

        socket
    }

    #[tokio::test]
    async fn test_running_state_from_inspect() {
        let dir = TempDir::new().unwrap();
        let socket = serve_once(
            &dir,
            "HTTP/1.0 200 OK\r\n\r\n{\"State\": {\"Running\": true, \"Status\": \"running\"}}",
        )
        .await;

        let client = DockerClient::new(socket);
        let running = client
            .running_state(&ContainerHandle::new("abc", "web"))
            .await
            .unwrap();
        assert!(running);
    }

    #[tokio::test]
    async fn test_error_status_is_runtime_error() {
        let dir = TempDir::new().unwrap();
        let socket = serve_once(
            &dir,
            "HTTP/1.0 404 Not Found\r\n\r\n{\"message\": \"No such container\"}",
        )
        .await;

        let client = DockerClient::new(socket);
        let err = client
            .stats(&ContainerHandle::new("gone", "gone"))
            .await
            .unwrap_err();
        assert!(matches!(err, CollectError::Runtime { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_missing_socket_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let client = DockerClient::new(dir.path().join("missing.sock"));

        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, CollectError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_hung_daemon_times_out() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("hung.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let _server = tokio::spawn(async move {
            let (_conn, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        let client = DockerClient::new(socket).with_timeout(Duration::from_millis(50));
        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, CollectError::Timeout { .. }));
    }
}
