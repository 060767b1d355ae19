//! One Assuan channel: a line reader paired with a writer

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::{
    encode_error, write_data, write_data_stream, write_line, AssuanError, Line, LineReader,
    ProtoResult,
};

/// Both halves of a channel, with the line-level operations of the protocol
pub struct Channel<R, W> {
    reader: LineReader<R>,
    writer: W,
}

impl<R, W> Channel<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: LineReader::new(reader),
            writer,
        }
    }

    pub async fn read_line(&mut self) -> ProtoResult<Line> {
        self.reader.read_line().await
    }

    pub async fn read_data(&mut self) -> ProtoResult<Vec<u8>> {
        self.reader.read_data().await
    }

    pub async fn write_line(&mut self, command: &str, params: impl AsRef<[u8]>) -> ProtoResult<()> {
        write_line(&mut self.writer, command, params).await
    }

    pub async fn write_data(&mut self, data: &[u8]) -> ProtoResult<()> {
        write_data(&mut self.writer, data).await
    }

    pub async fn write_data_stream<S>(&mut self, source: &mut S) -> ProtoResult<()>
    where
        S: AsyncRead + Unpin + ?Sized,
    {
        write_data_stream(&mut self.writer, source).await
    }

    pub async fn write_ok(&mut self, text: &str) -> ProtoResult<()> {
        self.write_line("OK", text).await
    }

    pub async fn write_error(&mut self, err: &AssuanError) -> ProtoResult<()> {
        self.write_line("ERR", encode_error(err)).await
    }

    /// `# text`; ignored by the peer's reader.
    pub async fn write_comment(&mut self, text: &str) -> ProtoResult<()> {
        self.write_line("#", text).await
    }

    /// `S KEYWORD text`; ignored by the peer's reader.
    pub async fn write_status(&mut self, keyword: &str, text: &str) -> ProtoResult<()> {
        let mut params = keyword.to_ascii_uppercase();
        if !text.is_empty() {
            params.push(' ');
            params.push_str(text);
        }
        self.write_line("S", params).await
    }

    pub async fn write_cancel(&mut self) -> ProtoResult<()> {
        self.write_line("CAN", "").await
    }

    pub async fn write_end(&mut self) -> ProtoResult<()> {
        self.write_line("END", "").await
    }

    /// Close the write side; the peer sees end of stream.
    pub async fn shutdown(&mut self) -> ProtoResult<()> {
        self.writer.shutdown().await?;
        Ok(())
    }

    pub fn into_parts(self) -> (R, W) {
        (self.reader.into_inner(), self.writer)
    }
}
