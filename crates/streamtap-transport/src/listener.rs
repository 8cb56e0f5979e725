#[cfg(unix)]
use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
#[cfg(unix)]
use std::path::{Path, PathBuf};

use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tracing::{debug, info};

use crate::address::Endpoint;
use crate::error::{Result, TransportError};
use crate::stream::TapStream;

/// Accepts upstream-side connections.
///
/// TCP listeners report the resolved local address (useful when binding
/// port 0). Unix listeners remove a stale socket file before binding and
/// clean up the file they created on drop.
pub struct TapListener {
    inner: TapListenerInner,
    local: Endpoint,
}

enum TapListenerInner {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixSocketGuard),
}

#[cfg(unix)]
struct UnixSocketGuard {
    listener: UnixListener,
    path: PathBuf,
    created_inode: (u64, u64),
}

impl TapListener {
    /// Default permission mode for created socket paths.
    #[cfg(unix)]
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// Maximum socket path length.
    /// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(all(unix, not(target_os = "linux")))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind and listen on an endpoint.
    pub async fn bind(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            Endpoint::Tcp(authority) => {
                let listener = TcpListener::bind(authority.as_str()).await.map_err(|e| {
                    TransportError::Bind {
                        endpoint: endpoint.to_string(),
                        source: e,
                    }
                })?;
                let local_addr = listener.local_addr()?;
                let local = Endpoint::Tcp(local_addr.to_string());
                info!(endpoint = %local, "listening on tcp");
                Ok(Self {
                    inner: TapListenerInner::Tcp(listener),
                    local,
                })
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => Self::bind_unix(path, Self::DEFAULT_SOCKET_MODE),
        }
    }

    #[cfg(unix)]
    fn bind_unix(path: &Path, mode: u32) -> Result<Self> {
        let path = path.to_path_buf();
        let endpoint = Endpoint::Unix(path.clone());
        let bind_err = |source: std::io::Error| TransportError::Bind {
            endpoint: endpoint.to_string(),
            source,
        };

        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

        // Remove stale socket if it exists, but never remove non-socket files.
        if path.exists() {
            let metadata = std::fs::symlink_metadata(&path).map_err(bind_err)?;
            if !metadata.file_type().is_socket() {
                return Err(bind_err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "existing path is not a unix socket",
                )));
            }
            debug!(?path, "removing stale socket");
            std::fs::remove_file(&path).map_err(bind_err)?;
        }

        let listener = UnixListener::bind(&path).map_err(bind_err)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(mode))
            .map_err(bind_err)?;
        let created = std::fs::symlink_metadata(&path).map_err(bind_err)?;

        info!(?path, "listening on unix domain socket");

        Ok(Self {
            inner: TapListenerInner::Unix(UnixSocketGuard {
                listener,
                path,
                created_inode: (created.dev(), created.ino()),
            }),
            local: endpoint,
        })
    }

    /// Accept an incoming connection.
    pub async fn accept(&self) -> Result<TapStream> {
        match &self.inner {
            TapListenerInner::Tcp(listener) => {
                let (stream, peer) = listener.accept().await.map_err(TransportError::Accept)?;
                stream.set_nodelay(true)?;
                debug!(%peer, "accepted tcp connection");
                Ok(TapStream::from_tcp(stream))
            }
            #[cfg(unix)]
            TapListenerInner::Unix(guard) => {
                let (stream, _addr) = guard
                    .listener
                    .accept()
                    .await
                    .map_err(TransportError::Accept)?;
                debug!("accepted unix connection");
                Ok(TapStream::from_unix(stream))
            }
        }
    }

    /// The endpoint this listener is bound to, with the port resolved.
    pub fn local_endpoint(&self) -> &Endpoint {
        &self.local
    }
}

#[cfg(unix)]
impl Drop for UnixSocketGuard {
    fn drop(&mut self) {
        let (expected_dev, expected_ino) = self.created_inode;
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket()
                && metadata.dev() == expected_dev
                && metadata.ino() == expected_ino
            {
                debug!(path = ?self.path, "cleaning up socket file");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(
                    path = ?self.path,
                    "socket path identity changed; skipping cleanup"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::stream::connect;

    #[tokio::test]
    async fn tcp_bind_reports_resolved_port() {
        let listener = TapListener::bind(&Endpoint::parse("127.0.0.1:0").unwrap())
            .await
            .unwrap();
        match listener.local_endpoint() {
            Endpoint::Tcp(authority) => assert!(!authority.ends_with(":0")),
            #[cfg(unix)]
            other => panic!("unexpected endpoint {other:?}"),
        }
    }

    #[tokio::test]
    async fn tcp_bind_accept_connect() {
        let listener = TapListener::bind(&Endpoint::parse("127.0.0.1:0").unwrap())
            .await
            .unwrap();
        let endpoint = listener.local_endpoint().clone();

        let client = tokio::spawn(async move {
            let mut client = connect(&endpoint).await.unwrap();
            client.write_all(b"hello").await.unwrap();
        });

        let mut server = listener.accept().await.unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
        client.await.unwrap();
    }

    #[cfg(unix)]
    fn temp_sock_path(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "streamtap-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("tap.sock")
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_bind_accept_connect_and_cleanup() {
        let sock_path = temp_sock_path("uds");
        let endpoint = Endpoint::Unix(sock_path.clone());
        let listener = TapListener::bind(&endpoint).await.unwrap();
        assert!(sock_path.exists());

        let mode = std::fs::metadata(&sock_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        let client = tokio::spawn(async move {
            let mut client = connect(&endpoint).await.unwrap();
            client.write_all(b"hello").await.unwrap();
        });

        let mut server = listener.accept().await.unwrap();
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
        client.await.unwrap();

        drop(listener);
        assert!(
            !sock_path.exists(),
            "socket file should be cleaned up on drop"
        );
        let _ = std::fs::remove_dir_all(sock_path.parent().unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_bind_rejects_existing_non_socket_file() {
        let sock_path = temp_sock_path("regular");
        std::fs::write(&sock_path, b"regular-file").unwrap();

        let result = TapListener::bind(&Endpoint::Unix(sock_path.clone())).await;
        assert!(matches!(result, Err(TransportError::Bind { .. })));

        let _ = std::fs::remove_dir_all(sock_path.parent().unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unix_path_too_long() {
        let long_path = PathBuf::from("/tmp/".to_string() + &"a".repeat(200) + ".sock");
        let result = TapListener::bind(&Endpoint::Unix(long_path)).await;
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }
}
