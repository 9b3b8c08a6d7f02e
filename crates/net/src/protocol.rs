//! Wire messages and framing.
//!
//! Every message travels as a 4-byte big-endian length followed by the
//! bincode encoding of a [`Message`]. Frames larger than
//! [`MAX_FRAME_LEN`] or payloads that do not decode are
//! [`NetError::MalformedMessage`] and cost the peer its connection.

use crate::error::{NetError, Result};
use qbit_core::{Block, Hash, Transaction};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted frame payload.
pub const MAX_FRAME_LEN: usize = 32 * 1024 * 1024;

/// Default budget for the blocks in one `Blocks` reply, leaving room for
/// the message envelope.
pub const MAX_BATCH_BYTES: u64 = (MAX_FRAME_LEN - 1024 * 1024) as u64;

/// Everything a peer can say.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// First message on every connection, in both directions.
    Hello {
        height: u64,
        genesis: Hash,
        /// Port the sender accepts connections on, 0 if none.
        listen_port: u16,
        /// Random per-process id used to spot self and duplicate connections.
        node_id: u64,
    },
    /// Ask for canonical blocks starting at `from_height`.
    GetBlocks { from_height: u64 },
    /// Consecutive canonical blocks, ascending.
    Blocks { blocks: Vec<Block> },
    NewTransaction { tx: Transaction },
    NewBlock { block: Block },
    GetPeers,
    /// Listening addresses, as `host:port`.
    Peers { peers: Vec<String> },
    Ping,
    Pong,
}

impl Message {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Hello { .. } => "hello",
            Message::GetBlocks { .. } => "get_blocks",
            Message::Blocks { .. } => "blocks",
            Message::NewTransaction { .. } => "new_transaction",
            Message::NewBlock { .. } => "new_block",
            Message::GetPeers => "get_peers",
            Message::Peers { .. } => "peers",
            Message::Ping => "ping",
            Message::Pong => "pong",
        }
    }
}

/// Longest prefix of `blocks` whose encoded size stays within `max_bytes`.
///
/// The first block is always kept; consensus bounds a block well below the
/// frame limit.
pub fn fit_batch(blocks: Vec<Block>, max_bytes: u64) -> Vec<Block> {
    let mut total = 0u64;
    let mut keep = 0;
    for block in &blocks {
        total = total.saturating_add(block.encoded_size());
        if keep > 0 && total > max_bytes {
            break;
        }
        keep += 1;
    }

    let mut blocks = blocks;
    blocks.truncate(keep);
    blocks
}

/// Length-prefixed frame for `message`.
pub fn encode(message: &Message) -> Result<Vec<u8>> {
    let payload =
        bincode::serialize(message).map_err(|e| NetError::MalformedMessage(e.to_string()))?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(NetError::MalformedMessage(format!(
            "{} message of {} bytes exceeds frame limit",
            message.kind(),
            payload.len()
        )));
    }

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Decode a frame payload (without its length prefix).
pub fn decode(payload: &[u8]) -> Result<Message> {
    bincode::deserialize(payload).map_err(|e| NetError::MalformedMessage(e.to_string()))
}

/// Read one frame.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message> {
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(NetError::MalformedMessage(format!(
            "frame of {} bytes exceeds limit",
            len
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    decode(&payload)
}

/// Write one frame and flush it.
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> Result<()> {
    let frame = encode(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
