//! Client side of an Assuan session

use assuan_proto::{decode_error, Channel, Line};
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

use crate::{IpcError, IpcResult};

/// Payload used to answer one inquiry keyword
pub enum InquiryData {
    Bytes(Vec<u8>),
    /// Streamed until end of input; only the first inquiry gets the content.
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

/// Answers for the inquiries a server may send during [`Session::transact`]
#[derive(Default)]
pub struct Inquiries {
    entries: HashMap<String, InquiryData>,
}

impl Inquiries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bytes(mut self, keyword: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.insert(keyword, InquiryData::Bytes(data.into()));
        self
    }

    pub fn with_reader<R>(mut self, keyword: impl Into<String>, reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        self.insert(keyword, InquiryData::Reader(Box::new(reader)));
        self
    }

    pub fn insert(&mut self, keyword: impl Into<String>, data: InquiryData) {
        self.entries.insert(keyword.into(), data);
    }
}

/// Keyword of an `INQUIRE` line: its first word
fn inquiry_keyword(line: &Line) -> String {
    let params = line.params_lossy();
    params.split(' ').next().unwrap_or_default().to_string()
}

/// Client end of one channel
///
/// Every command is a synchronous exchange: one request line, then reads
/// until the terminal `OK` or `ERR`.
pub struct Session<R, W> {
    channel: Channel<R, W>,
    greeting: String,
}

impl Session<OwnedReadHalf, OwnedWriteHalf> {
    /// Connect to a server listening on a unix socket
    pub async fn connect(socket_path: impl AsRef<Path>) -> IpcResult<Self> {
        let socket_path = socket_path.as_ref();
        debug!(path = %socket_path.display(), "Connecting");
        let stream = UnixStream::connect(socket_path).await?;
        let (read_half, write_half) = stream.into_split();
        Self::init(read_half, write_half).await
    }
}

impl Session<ChildStdout, ChildStdin> {
    /// Start `command` and talk to it over its stdin/stdout.
    ///
    /// The caller keeps the [`Child`] and decides when to wait on it.
    pub async fn spawn(mut command: Command) -> IpcResult<(Self, Child)> {
        command.stdin(Stdio::piped()).stdout(Stdio::piped());
        let mut child = command.spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| IpcError::ServerError("child has no stdout".into()))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| IpcError::ServerError("child has no stdin".into()))?;

        let session = Self::init(stdout, stdin).await?;
        Ok((session, child))
    }
}

impl<R, W> Session<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Take over an already connected channel and consume the server greeting.
    pub async fn init(reader: R, writer: W) -> IpcResult<Self> {
        let mut channel = Channel::new(reader, writer);

        let line = channel.read_line().await?;
        if !line.is("OK") {
            debug!(command = %line.command, "Server refused session");
            return Err(IpcError::Greeting(format!(
                "{} {}",
                line.command,
                line.params_lossy()
            )));
        }

        let greeting = line.params_lossy().into_owned();
        debug!(greeting = %greeting, "Session established");
        Ok(Self { channel, greeting })
    }

    /// Text the server sent with its first `OK`
    pub fn greeting(&self) -> &str {
        &self.greeting
    }

    /// Send a command and collect any data the server returns.
    pub async fn simple_command(&mut self, command: &str, params: &str) -> IpcResult<Vec<u8>> {
        debug!(command, params_len = params.len(), "Sending command");
        self.channel.write_line(command, params).await?;
        self.read_response(None).await
    }

    /// Send a command, answering the server's inquiries from `inquiries`.
    ///
    /// An inquiry with no answer is refused with `CAN` and fails the
    /// transaction with [`IpcError::MissingInquiryData`].
    pub async fn transact(
        &mut self,
        command: &str,
        params: &str,
        inquiries: &mut Inquiries,
    ) -> IpcResult<Vec<u8>> {
        debug!(command, params_len = params.len(), "Initiating transaction");
        self.channel.write_line(command, params).await?;
        self.read_response(Some(inquiries)).await
    }

    async fn read_response(&mut self, mut inquiries: Option<&mut Inquiries>) -> IpcResult<Vec<u8>> {
        let mut data = Vec::new();
        loop {
            let line = self.channel.read_line().await?;
            match line.command.as_str() {
                "OK" => return Ok(data),
                "ERR" => {
                    let err = decode_error(&line.params_lossy())?;
                    debug!(error = %err, "Received ERR");
                    return Err(err.into());
                }
                "D" => data.extend_from_slice(&line.params),
                "INQUIRE" => {
                    if let Some(inquiries) = inquiries.as_deref_mut() {
                        self.answer_inquiry(&line, inquiries).await?;
                    } else {
                        debug!("Ignoring INQUIRE outside of a transaction");
                    }
                }
                other => debug!(command = other, "Ignoring line"),
            }
        }
    }

    async fn answer_inquiry(&mut self, line: &Line, inquiries: &mut Inquiries) -> IpcResult<()> {
        let keyword = inquiry_keyword(line);
        match inquiries.entries.get_mut(&keyword) {
            Some(InquiryData::Bytes(bytes)) => {
                debug!(keyword = %keyword, len = bytes.len(), "Answering inquiry");
                self.channel.write_data(bytes).await?;
            }
            Some(InquiryData::Reader(reader)) => {
                debug!(keyword = %keyword, "Answering inquiry from stream");
                self.channel.write_data_stream(reader.as_mut()).await?;
            }
            None => {
                debug!(keyword = %keyword, "No data for inquiry, cancelling");
                self.channel.write_cancel().await?;
                self.drain_terminal().await?;
                return Err(IpcError::MissingInquiryData(keyword));
            }
        }
        self.channel.write_end().await?;
        Ok(())
    }

    /// Consume the server's terminal status after a refused inquiry so the
    /// next command does not read it as its own response.
    async fn drain_terminal(&mut self) -> IpcResult<()> {
        loop {
            let line = self.channel.read_line().await?;
            if line.is("OK") || line.is("ERR") {
                return Ok(());
            }
        }
    }

    /// Set a session option with `OPTION name = value`.
    ///
    /// Exactly one response line is read; anything but `ERR` is success.
    pub async fn option(&mut self, name: &str, value: &str) -> IpcResult<()> {
        debug!(name, "Setting option");
        let params = if value.is_empty() {
            name.to_string()
        } else {
            format!("{} = {}", name, value)
        };
        self.channel.write_line("OPTION", params).await?;

        let line = self.channel.read_line().await?;
        if line.is("ERR") {
            let err = decode_error(&line.params_lossy())?;
            debug!(error = %err, "Option rejected");
            return Err(err.into());
        }
        Ok(())
    }

    /// Reset the server side of the session.
    pub async fn reset(&mut self) -> IpcResult<()> {
        debug!("Resetting session");
        self.channel.write_line("RESET", "").await?;

        let line = self.channel.read_line().await?;
        match line.command.as_str() {
            "OK" => Ok(()),
            "ERR" => Err(decode_error(&line.params_lossy())?.into()),
            other => Err(IpcError::InvalidResponse(format!(
                "expected OK after RESET, got {}",
                other
            ))),
        }
    }

    /// Send `BYE` and close the channel without waiting for the reply.
    pub async fn close(mut self) -> IpcResult<()> {
        debug!("Closing session (sending BYE)");
        self.channel.write_line("BYE", "").await?;
        self.channel.shutdown().await?;
        Ok(())
    }
}
