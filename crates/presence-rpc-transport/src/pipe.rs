//! Platform IPC endpoints.
//!
//! - Unix: a domain socket named `discord-ipc-{n}` inside the first of
//!   `$XDG_RUNTIME_DIR`, `$TMPDIR`, `$TMP`, `$TEMP` that is set, else `/tmp`
//! - Windows: the named pipe `\\.\pipe\discord-ipc-{n}`

use std::path::PathBuf;

use crate::{Connector, PipeConnection, TransportError};

/// Number of numbered endpoints the desktop application may listen on.
pub const PIPE_COUNT: u8 = 10;

/// The endpoint name for index `pipe`, without any directory prefix.
pub fn endpoint_name(pipe: u8) -> String {
    format!("discord-ipc-{pipe}")
}

/// [`Connector`] for the real OS endpoints.
#[derive(Debug, Clone, Default)]
pub struct PipeConnector {
    #[cfg_attr(windows, allow(dead_code))]
    base_dir: Option<PathBuf>,
}

impl PipeConnector {
    /// Creates a connector that resolves endpoints the standard way.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a connector that looks for Unix sockets in `dir` instead of
    /// the runtime directory. Ignored on Windows.
    pub fn with_base_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(dir.into()),
        }
    }

    /// Full filesystem path (Unix) or pipe name (Windows) of endpoint `pipe`.
    pub fn endpoint_path(&self, pipe: u8) -> PathBuf {
        #[cfg(windows)]
        {
            PathBuf::from(format!(r"\\.\pipe\{}", endpoint_name(pipe)))
        }

        #[cfg(not(windows))]
        {
            let dir = self.base_dir.clone().unwrap_or_else(runtime_dir);
            dir.join(endpoint_name(pipe))
        }
    }
}

/// Directory the desktop application places its sockets in.
#[cfg(not(windows))]
fn runtime_dir() -> PathBuf {
    ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"]
        .iter()
        .find_map(|key| std::env::var_os(key).filter(|v| !v.is_empty()))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

impl Connector for PipeConnector {
    #[cfg(unix)]
    async fn connect(&self, pipe: u8) -> Result<PipeConnection, TransportError> {
        let path = self.endpoint_path(pipe);
        let stream = tokio::net::UnixStream::connect(&path)
            .await
            .map_err(|source| TransportError::ConnectFailed { pipe, source })?;
        tracing::debug!(pipe, path = %path.display(), "connected to unix socket");
        Ok(PipeConnection::from_stream(pipe, stream))
    }

    #[cfg(windows)]
    async fn connect(&self, pipe: u8) -> Result<PipeConnection, TransportError> {
        use tokio::net::windows::named_pipe::ClientOptions;

        let path = self.endpoint_path(pipe);
        let client = ClientOptions::new()
            .open(&path)
            .map_err(|source| TransportError::ConnectFailed { pipe, source })?;
        tracing::debug!(pipe, path = %path.display(), "connected to named pipe");
        Ok(PipeConnection::from_stream(pipe, client))
    }

    #[cfg(not(any(unix, windows)))]
    async fn connect(&self, pipe: u8) -> Result<PipeConnection, TransportError> {
        Err(TransportError::ConnectFailed {
            pipe,
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "no IPC endpoints on this platform",
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_name_format() {
        assert_eq!(endpoint_name(0), "discord-ipc-0");
        assert_eq!(endpoint_name(9), "discord-ipc-9");
    }

    #[cfg(unix)]
    #[test]
    fn test_endpoint_path_uses_base_dir_override() {
        let connector = PipeConnector::with_base_dir("/run/user/1000");
        assert_eq!(
            connector.endpoint_path(3),
            PathBuf::from("/run/user/1000/discord-ipc-3")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_endpoint_path_default_ends_with_endpoint_name() {
        let path = PipeConnector::new().endpoint_path(2);
        assert!(path.ends_with("discord-ipc-2"));
    }

    #[cfg(windows)]
    #[test]
    fn test_endpoint_path_is_named_pipe() {
        let path = PipeConnector::new().endpoint_path(1);
        assert_eq!(path, PathBuf::from(r"\\.\pipe\discord-ipc-1"));
    }
}
