//! Codec for replication messages over libp2p request-response.

use crate::protocol::ReplicationMessage;
use async_trait::async_trait;
use futures::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use libp2p::request_response;
use std::io;

/// Maximum frame size (16 MB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Length-prefixed JSON framing for [`ReplicationMessage`]s.
#[derive(Debug, Clone, Default)]
pub struct ReplicationCodec;

#[async_trait]
impl request_response::Codec for ReplicationCodec {
    type Protocol = &'static str;
    type Request = ReplicationMessage;
    type Response = ReplicationMessage;

    async fn read_request<T>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
    ) -> io::Result<Self::Request>
    where
        T: AsyncRead + Unpin + Send,
    {
        read_message(io).await
    }

    async fn read_response<T>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
    ) -> io::Result<Self::Response>
    where
        T: AsyncRead + Unpin + Send,
    {
        read_message(io).await
    }

    async fn write_request<T>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
        req: Self::Request,
    ) -> io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        write_message(io, &req).await
    }

    async fn write_response<T>(
        &mut self,
        _protocol: &Self::Protocol,
        io: &mut T,
        res: Self::Response,
    ) -> io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        write_message(io, &res).await
    }
}

fn invalid_data(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Reads one big-endian length-prefixed JSON message.
pub async fn read_message<T: AsyncRead + Unpin>(io: &mut T) -> io::Result<ReplicationMessage> {
    let mut len_bytes = [0u8; 4];
    io.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;

    if len > MAX_MESSAGE_SIZE {
        return Err(invalid_data(format!("message too large: {len} bytes")));
    }

    let mut buf = vec![0u8; len];
    io.read_exact(&mut buf).await?;

    serde_json::from_slice(&buf).map_err(|e| invalid_data(format!("JSON decode error: {e}")))
}

/// Writes one big-endian length-prefixed JSON message.
pub async fn write_message<T: AsyncWrite + Unpin>(
    io: &mut T,
    message: &ReplicationMessage,
) -> io::Result<()> {
    let data =
        serde_json::to_vec(message).map_err(|e| invalid_data(format!("JSON encode error: {e}")))?;

    if data.len() > MAX_MESSAGE_SIZE {
        return Err(invalid_data(format!("message too large: {} bytes", data.len())));
    }

    io.write_all(&(data.len() as u32).to_be_bytes()).await?;
    io.write_all(&data).await?;
    io.flush().await?;
    Ok(())
}
