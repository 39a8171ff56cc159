//! Administrative command socket
//!
//! Line oriented: each line is one command handled by
//! [`CallMap::handle_command`], whose reply is written back verbatim.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::services::registry::CallMap;
use crate::Result;

pub struct AdminServer {
    path: PathBuf,
    listener: UnixListener,
    calls: Arc<CallMap>,
}

impl AdminServer {
    /// Bind the socket, replacing a stale one left by a previous run
    pub fn bind<P: AsRef<Path>>(path: P, calls: Arc<CallMap>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        let listener = UnixListener::bind(&path)?;
        info!("Admin interface listening on {}", path.display());
        Ok(Self { path, listener, calls })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn run(self, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let calls = Arc::clone(&self.calls);
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(stream, calls).await {
                                warn!("Admin connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => error!("Admin accept failed: {}", e),
                },
            }
        }

        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!("Could not remove {}: {}", self.path.display(), e);
        }
        info!("Admin interface stopped");
    }
}

async fn serve_connection(stream: UnixStream, calls: Arc<CallMap>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        debug!("Admin command: {}", line.trim());
        match calls.handle_command(&line) {
            Some(reply) => {
                writer.write_all(reply.as_bytes()).await?;
                writer.flush().await?;
            }
            None => break,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::auth::AuthAttribute;
    use crate::testing::{invite, settle, AuthReply, MockAuth, TestBed};
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    async fn roundtrip(stream: &mut UnixStream, command: &str) -> String {
        stream.write_all(format!("{}\n", command).as_bytes()).await.unwrap();
        let mut buf = vec![0u8; 4096];
        let n = stream.read(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf[..n]).to_string()
    }

    #[tokio::test]
    async fn test_admin_socket_session() {
        let bed = TestBed::with_auth(MockAuth::new(AuthReply::Accept(vec![AuthAttribute::Routing(
            "gw1.example.net".to_string(),
        )])));
        bed.map.recv_request(invite("2000")).await;
        settle().await;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("b2bua.sock");
        let server = AdminServer::bind(&path, Arc::clone(&bed.map)).unwrap();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(server.run(shutdown.clone()));

        let mut stream = UnixStream::connect(&path).await.unwrap();
        let listing = roundtrip(&mut stream, "l").await;
        assert!(listing.starts_with("In-memory calls:\n"));
        assert!(listing.contains("Total: 1"));

        assert_eq!(roundtrip(&mut stream, "nope").await, "ERROR: unknown command\n");

        stream.write_all(b"q\n").await.unwrap();
        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        shutdown.cancel();
        task.await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_stale_socket_is_replaced() {
        let bed = TestBed::with_auth(MockAuth::new(AuthReply::Reject));
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("b2bua.sock");
        std::fs::write(&path, b"stale").unwrap();

        let server = AdminServer::bind(&path, Arc::clone(&bed.map)).unwrap();
        assert_eq!(server.path(), path.as_path());
    }
}
