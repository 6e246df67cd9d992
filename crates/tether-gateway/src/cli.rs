//! Fallback transport: spawn the agent CLI and parse JSON from stdout.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use tether_proto::{AbortResult, HistoryResult, SessionsResult};

use crate::errors::GatewayError;
use crate::ops::{AgentOps, ChatEventHandler, ChatSubscription, SendAck};

/// Executable name scanned for on install paths.
#[cfg(not(windows))]
pub const PROGRAM_NAME: &str = "tether-agent";
/// Executable name scanned for on install paths.
#[cfg(windows)]
pub const PROGRAM_NAME: &str = "tether-agent.exe";

/// Degraded-mode transport invoking an external executable per operation.
///
/// Success requires exit code 0 and a JSON document on stdout. There is no
/// event stream: a chat send blocks until the subprocess prints the full
/// reply.
pub struct CliTransport {
    program: PathBuf,
}

impl CliTransport {
    /// Use a specific executable.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Locate the agent CLI: explicit override first, then `PATH`, then
    /// platform-specific install directories.
    pub fn locate(override_path: Option<&Path>) -> Option<Self> {
        if let Some(path) = override_path {
            return path.is_file().then(|| Self::new(path));
        }
        for dir in search_dirs() {
            let candidate = dir.join(PROGRAM_NAME);
            if candidate.is_file() {
                return Some(Self::new(candidate));
            }
        }
        None
    }

    /// The executable this transport spawns.
    pub fn program(&self) -> &Path {
        &self.program
    }

    async fn invoke(&self, args: &[&str]) -> Result<Value, GatewayError> {
        let output = Command::new(&self.program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| GatewayError::Fallback(format!("spawn {}: {e}", self.program.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GatewayError::Fallback(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| GatewayError::Fallback(format!("bad JSON on stdout: {e}")))
    }
}

fn search_dirs() -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = std::env::var_os("PATH")
        .map(|path| std::env::split_paths(&path).collect())
        .unwrap_or_default();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            dirs.push(PathBuf::from(home).join(".local/bin"));
        }
        dirs.push(PathBuf::from("/usr/local/bin"));
        dirs.push(PathBuf::from("/opt/homebrew/bin"));
    }
    #[cfg(windows)]
    {
        if let Some(appdata) = std::env::var_os("LOCALAPPDATA") {
            dirs.push(PathBuf::from(appdata).join("Programs").join("tether"));
        }
    }

    dirs
}

#[async_trait]
impl AgentOps for CliTransport {
    async fn send_chat(
        &self,
        session_key: &str,
        message: &str,
        idempotency_key: &str,
    ) -> Result<SendAck, GatewayError> {
        let payload = self
            .invoke(&[
                "chat",
                "send",
                "--session",
                session_key,
                "--message",
                message,
                "--idempotency-key",
                idempotency_key,
                "--json",
            ])
            .await?;
        let text = payload
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_owned();
        Ok(SendAck::Completed { text })
    }

    async fn history(&self, session_key: &str, limit: u32) -> Result<HistoryResult, GatewayError> {
        let payload = self
            .invoke(&[
                "chat",
                "history",
                "--session",
                session_key,
                "--limit",
                &limit.to_string(),
                "--json",
            ])
            .await?;
        Ok(serde_json::from_value(payload).unwrap_or_default())
    }

    async fn sessions(&self) -> Result<SessionsResult, GatewayError> {
        let payload = self.invoke(&["sessions", "list", "--json"]).await?;
        Ok(serde_json::from_value(payload).unwrap_or_default())
    }

    async fn delete_session(&self, key: &str) -> Result<(), GatewayError> {
        let _ = self.invoke(&["sessions", "delete", key, "--json"]).await?;
        Ok(())
    }

    async fn set_model(&self, session_key: &str, model: &str) -> Result<(), GatewayError> {
        // Same in-band rule as the socket path: the command travels through
        // the conversational channel.
        let _ = self
            .send_chat(
                session_key,
                &format!("/model {model}"),
                &uuid::Uuid::new_v4().to_string(),
            )
            .await?;
        Ok(())
    }

    async fn set_thinking(&self, session_key: &str, _level: &str) -> Result<(), GatewayError> {
        // No CLI equivalent; degrade to a no-op to keep the surface responsive.
        debug!(session_key, "set_thinking has no fallback equivalent; ignored");
        Ok(())
    }

    async fn abort(
        &self,
        session_key: &str,
        _run_id: Option<&str>,
    ) -> Result<AbortResult, GatewayError> {
        // No CLI equivalent; the subprocess run is synchronous anyway.
        debug!(session_key, "abort has no fallback equivalent; ignored");
        Ok(AbortResult::default())
    }

    fn subscribe_chat(&self, _handler: ChatEventHandler) -> ChatSubscription {
        ChatSubscription::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locate_with_missing_override_fails() {
        let result = CliTransport::locate(Some(Path::new("/nonexistent/tether-agent")));
        assert!(result.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn invoke_parses_json_stdout() {
        let cli = CliTransport::new("/bin/echo");
        let payload = cli.invoke(&[r#"{"ok":true}"#]).await.unwrap();
        assert_eq!(payload["ok"], true);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn invoke_rejects_nonzero_exit() {
        let cli = CliTransport::new("/bin/false");
        let err = cli.invoke(&[]).await.unwrap_err();
        assert!(matches!(err, GatewayError::Fallback(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn invoke_rejects_non_json_stdout() {
        let cli = CliTransport::new("/bin/echo");
        let err = cli.invoke(&["not json"]).await.unwrap_err();
        assert!(matches!(err, GatewayError::Fallback(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn invoke_extracts_reply_text_shape() {
        let cli = CliTransport::new("/bin/sh");
        let payload = cli
            .invoke(&["-c", r#"echo '{"text":"Hello world"}'"#])
            .await
            .unwrap();
        assert_eq!(payload["text"], "Hello world");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn abort_degrades_to_empty_result() {
        let cli = CliTransport::new("/bin/true");
        let result = cli.abort("main", Some("run_1")).await.unwrap();
        assert!(!result.aborted);
        assert!(result.run_ids.is_empty());
    }

    #[test]
    fn subscribe_chat_is_empty_guard() {
        let cli = CliTransport::new("/bin/true");
        let guard = cli.subscribe_chat(std::sync::Arc::new(|_| {}));
        drop(guard);
    }
}
