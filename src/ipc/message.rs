//! Trust authority message types and framing.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_rustls::rustls::pki_types::CertificateDer;

use super::error::{IpcError, IpcResult};
use crate::verification::{CorrelationId, VerdictOutcome, VerificationRequest, VerificationVerdict};

/// Milliseconds since the Unix epoch.
fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A peer chain sent to the trust authority.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerifyRequestMessage {
    /// Token the verdict must echo.
    pub correlation_id: u64,

    /// Session the chain was captured on.
    pub session_id: u64,

    /// DER certificates, leaf first.
    pub certificate_chain: Vec<Vec<u8>>,

    /// Creation time (Unix epoch milliseconds).
    pub timestamp: u64,
}

impl VerifyRequestMessage {
    /// Get the certificate chain as rustls types.
    #[must_use]
    pub fn chain(&self) -> Vec<CertificateDer<'static>> {
        self.certificate_chain
            .iter()
            .map(|der| CertificateDer::from(der.clone()))
            .collect()
    }

    /// Serializes the message to MessagePack bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    #[inline]
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    /// Deserializes a message from MessagePack bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

impl From<&VerificationRequest> for VerifyRequestMessage {
    fn from(request: &VerificationRequest) -> Self {
        Self {
            correlation_id: request.correlation_id.0,
            session_id: request.session_id.0,
            certificate_chain: request
                .certificate_chain
                .iter()
                .map(|cert| cert.as_ref().to_vec())
                .collect(),
            timestamp: now_millis(),
        }
    }
}

/// Verdict codes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VerdictCode {
    /// Chain trusted.
    Accept = 0,

    /// Chain not trusted.
    Reject = 1,
}

/// The trust authority's answer to a [`VerifyRequestMessage`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerdictMessage {
    /// Token of the request being answered.
    pub correlation_id: u64,

    /// Decision.
    pub outcome: VerdictCode,

    /// Why the chain was rejected.
    pub reason: Option<String>,

    /// Creation time (Unix epoch milliseconds).
    pub timestamp: u64,
}

impl VerdictMessage {
    /// Creates an accepting verdict.
    #[must_use]
    pub fn accept(correlation_id: u64) -> Self {
        Self {
            correlation_id,
            outcome: VerdictCode::Accept,
            reason: None,
            timestamp: now_millis(),
        }
    }

    /// Creates a rejecting verdict.
    #[must_use]
    pub fn reject(correlation_id: u64, reason: impl Into<String>) -> Self {
        Self {
            correlation_id,
            outcome: VerdictCode::Reject,
            reason: Some(reason.into()),
            timestamp: now_millis(),
        }
    }

    /// Serializes the verdict to MessagePack bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    #[inline]
    pub fn to_bytes(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    /// Deserializes a verdict from MessagePack bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

impl From<VerdictMessage> for VerificationVerdict {
    fn from(message: VerdictMessage) -> Self {
        let outcome = match message.outcome {
            VerdictCode::Accept => VerdictOutcome::Accept,
            VerdictCode::Reject => {
                VerdictOutcome::Reject(message.reason.unwrap_or_else(|| "rejected".to_string()))
            },
        };

        Self {
            correlation_id: CorrelationId(message.correlation_id),
            outcome,
        }
    }
}

/// Frame header for length-prefixed messages.
///
/// Each message is prefixed with a 4-byte length header (big-endian u32).
pub const FRAME_HEADER_SIZE: usize = 4;

/// Maximum message size (16 MB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Encodes a message with length prefix.
#[must_use]
pub fn encode_frame(data: &[u8]) -> Vec<u8> {
    let len = data.len() as u32;
    let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + data.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(data);
    frame
}

/// Decodes the length from a frame header.
///
/// Returns `None` if the message is too large.
#[must_use]
pub fn decode_frame_length(header: &[u8; FRAME_HEADER_SIZE]) -> Option<usize> {
    let len = u32::from_be_bytes(*header) as usize;
    if len <= MAX_MESSAGE_SIZE {
        Some(len)
    } else {
        None
    }
}

/// Read one frame body. `Ok(None)` on a clean end of stream.
///
/// # Errors
///
/// Returns `ProtocolError` for oversized frames and `ReceiveError` if the
/// stream fails mid-frame.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> IpcResult<Option<Vec<u8>>> {
    let mut header = [0u8; FRAME_HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {},
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(IpcError::ReceiveError(e.to_string())),
    }

    let len = decode_frame_length(&header).ok_or_else(|| {
        IpcError::ProtocolError(format!(
            "frame of {} bytes exceeds limit",
            u32::from_be_bytes(header)
        ))
    })?;

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| IpcError::ReceiveError(e.to_string()))?;
    Ok(Some(body))
}

/// Write one frame and flush.
///
/// # Errors
///
/// Returns `SendError` if the stream fails.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, data: &[u8]) -> IpcResult<()> {
    let frame = encode_frame(data);
    writer
        .write_all(&frame)
        .await
        .map_err(|e| IpcError::SendError(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| IpcError::SendError(e.to_string()))
}
