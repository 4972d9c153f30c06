//! Key query wire protocol.
//!
//! Every message is a 4-byte big-endian length followed by a JSON body of
//! at most [`MAX_FRAME_LEN`] bytes. A connection carries any number of
//! request/response pairs.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{KeyManagerError, KeyManagerResult};
use crate::key::Role;

/// Largest accepted frame body.
pub const MAX_FRAME_LEN: usize = 1024 * 1024; // 1MB

/// Request from a proxy or worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum KeyRequest {
    GetProxyPrivateKeys,
    GetWorkerPrivateKeys,
    /// Any operation this service does not know
    #[serde(other)]
    Unknown,
}

impl KeyRequest {
    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Proxy => KeyRequest::GetProxyPrivateKeys,
            Role::Worker => KeyRequest::GetWorkerPrivateKeys,
        }
    }

    pub fn role(&self) -> Option<Role> {
        match self {
            KeyRequest::GetProxyPrivateKeys => Some(Role::Proxy),
            KeyRequest::GetWorkerPrivateKeys => Some(Role::Worker),
            KeyRequest::Unknown => None,
        }
    }
}

/// One private key with its expiry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivateKeyEntry {
    pub valid_until: i64,
    #[serde(with = "hex::serde")]
    pub private_key: [u8; 32],
}

impl fmt::Debug for PrivateKeyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKeyEntry")
            .field("valid_until", &self.valid_until)
            .finish_non_exhaustive()
    }
}

/// Error codes returned to peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    Unauthorized,
    UnknownRequest,
    Failure,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Unauthorized => f.write_str("unauthorized"),
            ErrorCode::UnknownRequest => f.write_str("unknownRequest"),
            ErrorCode::Failure => f.write_str("failure"),
        }
    }
}

/// Response to a [`KeyRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum KeyResponse {
    Keys { keys: Vec<PrivateKeyEntry> },
    Error { code: ErrorCode, message: String },
}

impl KeyResponse {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        KeyResponse::Error {
            code,
            message: message.into(),
        }
    }
}

/// Write one length-prefixed JSON frame.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> KeyManagerResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(KeyManagerError::Protocol(format!(
            "frame of {} bytes exceeds limit of {} bytes",
            body.len(),
            MAX_FRAME_LEN
        )));
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. Returns `None` on a clean EOF before the length prefix.
pub async fn read_frame<R, T>(reader: &mut R) -> KeyManagerResult<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    match read_frame_body(reader).await? {
        Some(body) => Ok(Some(serde_json::from_slice(&body)?)),
        None => Ok(None),
    }
}

/// Read one frame body without decoding it.
///
/// Fails only on I/O errors and oversized frames; both leave the stream
/// unusable.
pub async fn read_frame_body<R>(reader: &mut R) -> KeyManagerResult<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(KeyManagerError::Protocol(format!(
            "frame of {len} bytes exceeds limit of {MAX_FRAME_LEN} bytes"
        )));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Decode a request body, mapping undecodable bodies to the response sent
/// back to the peer.
pub fn decode_request(body: &[u8]) -> Result<KeyRequest, KeyResponse> {
    serde_json::from_slice(body).map_err(|e| {
        KeyResponse::error(ErrorCode::UnknownRequest, format!("malformed request: {e}"))
    })
}
