//! Line framing
//!
//! A line is `COMMAND[ params]\n`, at most [`MAX_LINE_LEN`] bytes including
//! the line feed. Comment (`#`), status (`S `) and blank lines are skipped
//! by the reader. Payloads larger than a line travel as a run of `D` lines.

use std::borrow::Cow;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::trace;

use crate::{escape, escaped_len, unescape, ProtoError, ProtoResult, DATA_CHUNK_LEN, MAX_LINE_LEN};

/// One delivered protocol line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Upper-cased command word
    pub command: String,
    /// Percent-decoded parameters
    pub params: Vec<u8>,
}

impl Line {
    pub fn new(command: impl Into<String>, params: impl Into<Vec<u8>>) -> Self {
        Self {
            command: command.into(),
            params: params.into(),
        }
    }

    pub fn is(&self, command: &str) -> bool {
        self.command == command
    }

    /// Parameters as UTF-8, if they are.
    pub fn params_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.params).ok()
    }

    pub fn params_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.params)
    }
}

fn is_skipped(raw: &[u8]) -> bool {
    raw.starts_with(b"#") || raw.starts_with(b"S ") || raw.trim_ascii().is_empty()
}

/// Split a raw line on its first space and decode the parameters.
pub fn parse_line(raw: &[u8]) -> ProtoResult<Line> {
    let (command, params) = match raw.iter().position(|&b| b == b' ') {
        Some(i) => (&raw[..i], unescape(&raw[i + 1..])?),
        None => (raw, Vec::new()),
    };
    Ok(Line {
        command: String::from_utf8_lossy(command).to_ascii_uppercase(),
        params,
    })
}

/// Buffered, length-bounded line reader over one side of a channel
pub struct LineReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: BufReader::new(inner),
        }
    }

    /// Read one raw line without its terminator.
    ///
    /// Never buffers more than [`MAX_LINE_LEN`] bytes for a single line. A
    /// trailing `\r` is dropped. End of stream, even in the middle of a
    /// line, is [`ProtoError::Closed`].
    pub async fn read_raw_line(&mut self) -> ProtoResult<Vec<u8>> {
        let mut line = Vec::new();
        loop {
            let buf = self.inner.fill_buf().await?;
            if buf.is_empty() {
                return Err(ProtoError::Closed);
            }

            match buf.iter().position(|&b| b == b'\n') {
                Some(i) => {
                    if line.len() + i + 1 > MAX_LINE_LEN {
                        return Err(ProtoError::LineTooLong {
                            len: line.len() + i + 1,
                        });
                    }
                    line.extend_from_slice(&buf[..i]);
                    self.inner.consume(i + 1);
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    return Ok(line);
                }
                None => {
                    let len = buf.len();
                    // Room is still needed for the line feed
                    if line.len() + len + 1 > MAX_LINE_LEN {
                        return Err(ProtoError::LineTooLong {
                            len: line.len() + len,
                        });
                    }
                    line.extend_from_slice(buf);
                    self.inner.consume(len);
                }
            }
        }
    }

    /// Read the next deliverable line, skipping comments, status and blank lines.
    pub async fn read_line(&mut self) -> ProtoResult<Line> {
        loop {
            let raw = self.read_raw_line().await?;
            if is_skipped(&raw) {
                trace!(len = raw.len(), "Skipping comment/status line");
                continue;
            }
            let line = parse_line(&raw)?;
            trace!(command = %line.command, params_len = line.params.len(), "<");
            return Ok(line);
        }
    }

    /// Collect a `D` run up to `END`.
    ///
    /// `CAN` fails with [`ProtoError::Canceled`]; any other command is a
    /// protocol violation.
    pub async fn read_data(&mut self) -> ProtoResult<Vec<u8>> {
        let mut data = Vec::new();
        loop {
            let line = self.read_line().await?;
            match line.command.as_str() {
                "D" => data.extend_from_slice(&line.params),
                "END" => return Ok(data),
                "CAN" => return Err(ProtoError::Canceled),
                other => return Err(ProtoError::UnexpectedCommand(other.to_string())),
            }
        }
    }

    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

fn is_command_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'#'
}

/// Encode one line, checking the command name and length before anything
/// is written.
pub fn encode_line(command: &str, params: &[u8]) -> ProtoResult<Vec<u8>> {
    if command.is_empty() || !command.bytes().all(is_command_byte) {
        return Err(ProtoError::InvalidCommand(command.to_string()));
    }
    // command, space, escaped params, line feed
    let len = command.len() + 1 + escaped_len(params) + 1;
    if len > MAX_LINE_LEN {
        return Err(ProtoError::LineTooLong { len });
    }

    let mut line = Vec::with_capacity(len);
    line.extend_from_slice(command.to_ascii_uppercase().as_bytes());
    if !params.is_empty() {
        line.push(b' ');
        line.extend_from_slice(&escape(params));
    }
    line.push(b'\n');
    Ok(line)
}

/// Write one line in a single `write_all`.
pub async fn write_line<W>(writer: &mut W, command: &str, params: impl AsRef<[u8]>) -> ProtoResult<()>
where
    W: AsyncWrite + Unpin,
{
    let params = params.as_ref();
    let line = match encode_line(command, params) {
        Ok(line) => line,
        Err(e) => {
            trace!(command, params_len = params.len(), error = %e, "Refusing to send line");
            return Err(e);
        }
    };
    trace!(command, params_len = params.len(), ">");
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Where to cut escaped payload so no `%XX` is split across two lines.
fn chunk_boundary(escaped: &[u8]) -> usize {
    if escaped.len() <= DATA_CHUNK_LEN {
        return escaped.len();
    }
    if escaped[DATA_CHUNK_LEN - 1] == b'%' {
        DATA_CHUNK_LEN - 1
    } else if escaped[DATA_CHUNK_LEN - 2] == b'%' {
        DATA_CHUNK_LEN - 2
    } else {
        DATA_CHUNK_LEN
    }
}

/// Split a payload into encoded `D` lines. An empty payload yields none.
pub fn encode_data(data: &[u8]) -> Vec<Vec<u8>> {
    let escaped = escape(data);
    let mut rest = escaped.as_slice();
    let mut lines = Vec::new();
    while !rest.is_empty() {
        let (chunk, tail) = rest.split_at(chunk_boundary(rest));
        lines.push(data_line(chunk));
        rest = tail;
    }
    lines
}

fn data_line(escaped_chunk: &[u8]) -> Vec<u8> {
    let mut line = Vec::with_capacity(escaped_chunk.len() + 3);
    line.extend_from_slice(b"D ");
    line.extend_from_slice(escaped_chunk);
    line.push(b'\n');
    line
}

/// Send a payload as `D` lines.
///
/// Writes nothing for an empty payload. An error may leave part of the
/// payload sent; the caller should abandon the transaction.
pub async fn write_data<W>(writer: &mut W, data: &[u8]) -> ProtoResult<()>
where
    W: AsyncWrite + Unpin,
{
    let lines = encode_data(data);
    trace!(len = data.len(), chunks = lines.len(), "> D");
    for line in &lines {
        writer.write_all(line).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Send everything `reader` yields as `D` lines, in constant memory.
pub async fn write_data_stream<W, R>(writer: &mut W, reader: &mut R) -> ProtoResult<()>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; DATA_CHUNK_LEN];
    let mut pending: Vec<u8> = Vec::with_capacity(DATA_CHUNK_LEN * 3);
    let mut total = 0usize;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        total += n;
        pending.extend_from_slice(&escape(&buf[..n]));

        while pending.len() >= DATA_CHUNK_LEN {
            let cut = chunk_boundary(&pending);
            writer.write_all(&data_line(&pending[..cut])).await?;
            pending.drain(..cut);
        }
    }

    if !pending.is_empty() {
        writer.write_all(&data_line(&pending)).await?;
    }
    writer.flush().await?;
    trace!(len = total, "> D (stream)");
    Ok(())
}
