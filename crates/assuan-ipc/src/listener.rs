//! Connection acceptor

use assuan_proto::ProtoError;
use assuan_util::ConnectionId;
use async_trait::async_trait;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::{serve, IpcError, IpcResult, Profile};

/// Socket file permissions unless configured otherwise
pub const DEFAULT_SOCKET_MODE: u32 = 0o660;

/// Anything that yields connected byte streams
#[async_trait]
pub trait Listener: Send {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    async fn accept(&mut self) -> io::Result<Self::Stream>;
}

#[async_trait]
impl Listener for UnixListener {
    type Stream = UnixStream;

    async fn accept(&mut self) -> io::Result<UnixStream> {
        let (stream, _) = UnixListener::accept(self).await?;
        debug!(uid = ?peer_uid(&stream), "Accepted unix connection");
        Ok(stream)
    }
}

#[async_trait]
impl Listener for TcpListener {
    type Stream = TcpStream;

    async fn accept(&mut self) -> io::Result<TcpStream> {
        let (stream, addr) = TcpListener::accept(self).await?;
        debug!(peer = %addr, "Accepted tcp connection");
        Ok(stream)
    }
}

/// Accept connections forever, serving each on its own task.
///
/// Sessions share nothing but the profile. Returns only when accepting
/// fails.
pub async fn serve_listener<L, S>(listener: &mut L, profile: Arc<Profile<S>>) -> IpcResult<()>
where
    L: Listener,
    S: Send + 'static,
{
    loop {
        let stream = listener.accept().await?;
        let conn = ConnectionId::new();
        let profile = profile.clone();

        tokio::spawn(
            async move {
                let (reader, writer) = tokio::io::split(stream);
                match serve(reader, writer, &profile).await {
                    ProtoError::Closed => debug!("Client disconnected"),
                    e => warn!(error = %e, "Session dropped"),
                }
            }
            .instrument(info_span!("session", conn = %conn.short())),
        );
    }
}

/// Unix socket server owning its socket file
pub struct SocketServer {
    socket_path: PathBuf,
    mode: u32,
    listener: Option<UnixListener>,
}

impl SocketServer {
    pub fn new(socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            mode: DEFAULT_SOCKET_MODE,
            listener: None,
        }
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind the socket
    pub async fn start(&mut self) -> IpcResult<()> {
        // Remove stale socket if present
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(self.mode))?;

        info!(path = %self.socket_path.display(), mode = %format!("{:o}", self.mode), "Listening");

        self.listener = Some(listener);
        Ok(())
    }

    /// Serve `profile` to every connection until accepting fails.
    pub async fn run<S: Send + 'static>(&mut self, profile: Arc<Profile<S>>) -> IpcResult<()> {
        let listener = self
            .listener
            .as_mut()
            .ok_or_else(|| IpcError::ServerError("Server not started".into()))?;
        serve_listener(listener, profile).await
    }

    /// Remove the socket file
    pub fn shutdown(&self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

impl Drop for SocketServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Get peer UID from Unix socket
fn peer_uid(stream: &UnixStream) -> Option<u32> {
    use std::os::unix::io::AsFd;

    let fd = stream.as_fd();
    match nix::sys::socket::getsockopt(&fd, nix::sys::socket::sockopt::PeerCredentials) {
        Ok(cred) => Some(cred.uid()),
        Err(_) => None,
    }
}
