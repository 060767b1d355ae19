//! Server-initiated inquiries

use assuan_proto::{Channel, ProtoResult};
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Ask the client for one payload per keyword, in order.
///
/// Never writes a terminal status: a `CAN` from the client comes back as
/// [`assuan_proto::ProtoError::Canceled`] and the caller decides what to
/// report.
pub async fn inquire<R, W>(
    channel: &mut Channel<R, W>,
    keywords: &[&str],
) -> ProtoResult<HashMap<String, Vec<u8>>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut answers = HashMap::with_capacity(keywords.len());
    for &keyword in keywords {
        let data = inquire_one(channel, keyword).await?;
        answers.insert(keyword.to_string(), data);
    }
    Ok(answers)
}

pub async fn inquire_one<R, W>(channel: &mut Channel<R, W>, keyword: &str) -> ProtoResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    channel.write_line("INQUIRE", keyword).await?;
    let data = channel.read_data().await?;
    debug!(keyword, len = data.len(), "Inquiry answered");
    Ok(data)
}
