//! Parent/child wire protocol.
//!
//! One request frame goes down the child's stdin and one response frame
//! comes back on its stdout. A frame is a big-endian `u32` length followed
//! by that many bytes of JSON. The declared length is checked against the
//! reader's limit before any buffer is allocated.

use std::io::{Read, Write};
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cordon_capabilities::CapabilitySet;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{SandboxError, SandboxResult};

/// Largest request frame a worker accepts (64 MiB).
pub const MAX_REQUEST_FRAME_BYTES: usize = 67_108_864;

/// Headroom for the JSON envelope around a response's output.
const RESPONSE_ENVELOPE_BYTES: usize = 65_536;

/// Largest response frame accepted for a given output cap.
///
/// Output is base64 encoded, so the cap is doubled before the envelope is
/// added.
#[must_use]
pub fn response_frame_limit(max_output_bytes: usize) -> usize {
    max_output_bytes
        .saturating_mul(2)
        .saturating_add(RESPONSE_ENVELOPE_BYTES)
}

/// An immutable compiled program.
///
/// Cloning shares the payload, so concurrent runs of one unit never copy
/// it in the parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledUnit {
    /// Display name for logs and audit.
    pub name: String,
    /// Executor-specific program bytes.
    #[serde(with = "base64_bytes")]
    pub payload: Arc<[u8]>,
}

impl CompiledUnit {
    /// Wrap compiled bytes.
    #[must_use]
    pub fn new(name: impl Into<String>, payload: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            payload: payload.into(),
        }
    }
}

/// Parent to child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRequest {
    /// Program to run.
    pub unit: CompiledUnit,
    /// Root capabilities of the child, already narrowed by policy.
    pub capabilities: CapabilitySet,
    /// Output cap; the worker truncates beyond it.
    pub max_output_bytes: usize,
}

/// Limit the worker itself detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// An allocation was refused.
    Memory,
    /// Processor time ran out.
    CpuTime,
}

/// How the program ended, as reported by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum WorkerOutcome {
    /// The program finished.
    Completed {
        /// Captured output, at most `max_output_bytes`.
        #[serde(with = "base64_bytes_vec")]
        output: Vec<u8>,
        /// Whether output was cut off.
        truncated: bool,
    },
    /// The program raised an error.
    Failed {
        /// Error text.
        message: String,
    },
    /// The program hit a limit the worker could observe.
    ResourceExceeded {
        /// Which limit.
        limit: ResourceKind,
    },
}

/// Resource use measured by the worker on exit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// User plus system processor time.
    pub cpu_time_ms: u64,
    /// Peak resident set size.
    pub max_rss_bytes: u64,
    /// Capability checks performed.
    pub checks: u64,
    /// Checks that were denied.
    pub denied: u64,
}

/// Child to parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerResponse {
    /// How the program ended.
    pub outcome: WorkerOutcome,
    /// Measured resource use.
    pub usage: ResourceUsage,
}

fn encode<T: Serialize>(value: &T, limit: usize) -> SandboxResult<Vec<u8>> {
    let body = serde_json::to_vec(value)
        .map_err(|e| SandboxError::crashed(format!("failed to encode frame: {e}")))?;
    if body.len() > limit {
        return Err(SandboxError::ChannelOverflow {
            limit,
            declared: body.len(),
        });
    }
    let len = u32::try_from(body.len()).map_err(|_| SandboxError::ChannelOverflow {
        limit,
        declared: body.len(),
    })?;
    let mut frame = Vec::with_capacity(body.len().saturating_add(4));
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

fn checked_len(header: [u8; 4], limit: usize) -> SandboxResult<usize> {
    let declared = usize::try_from(u32::from_be_bytes(header)).unwrap_or(usize::MAX);
    if declared > limit {
        return Err(SandboxError::ChannelOverflow { limit, declared });
    }
    Ok(declared)
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> SandboxResult<T> {
    serde_json::from_slice(body).map_err(|e| SandboxError::crashed(format!("malformed frame: {e}")))
}

fn eof_as_crash(e: std::io::Error) -> SandboxError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        SandboxError::crashed("channel closed before a complete frame")
    } else {
        SandboxError::Io(e)
    }
}

/// Write one frame.
///
/// # Errors
///
/// Returns [`SandboxError::ChannelOverflow`] if the encoded value exceeds
/// `limit`, or [`SandboxError::Io`] on write failure.
pub async fn write_frame<W, T>(writer: &mut W, value: &T, limit: usize) -> SandboxResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode(value, limit)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame.
///
/// # Errors
///
/// Returns [`SandboxError::ChannelOverflow`] if the declared length exceeds
/// `limit`, and [`SandboxError::Crashed`] on early EOF or malformed JSON.
pub async fn read_frame<R, T>(reader: &mut R, limit: usize) -> SandboxResult<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await.map_err(eof_as_crash)?;
    let len = checked_len(header, limit)?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(eof_as_crash)?;
    decode(&body)
}

/// Blocking [`write_frame`] for the worker side.
///
/// # Errors
///
/// See [`write_frame`].
pub fn write_frame_sync<W, T>(writer: &mut W, value: &T, limit: usize) -> SandboxResult<()>
where
    W: Write,
    T: Serialize,
{
    let frame = encode(value, limit)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Blocking [`read_frame`] for the worker side.
///
/// # Errors
///
/// See [`read_frame`].
pub fn read_frame_sync<R, T>(reader: &mut R, limit: usize) -> SandboxResult<T>
where
    R: Read,
    T: DeserializeOwned,
{
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).map_err(eof_as_crash)?;
    let len = checked_len(header, limit)?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).map_err(eof_as_crash)?;
    decode(&body)
}

mod base64_bytes {
    use super::{Arc, Deserialize, Deserializer, Engine, STANDARD, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &Arc<[u8]>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Arc<[u8]>, D::Error> {
        let text = String::deserialize(d)?;
        STANDARD
            .decode(text)
            .map(Arc::from)
            .map_err(serde::de::Error::custom)
    }
}

mod base64_bytes_vec {
    use super::{Deserialize, Deserializer, Engine, STANDARD, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response() -> WorkerResponse {
        WorkerResponse {
            outcome: WorkerOutcome::Completed {
                output: b"hello\n".to_vec(),
                truncated: false,
            },
            usage: ResourceUsage {
                checks: 2,
                ..ResourceUsage::default()
            },
        }
    }

    #[test]
    fn test_frame_layout() {
        let mut buf = Vec::new();
        write_frame_sync(&mut buf, &response(), 1024).unwrap();
        let declared = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        assert_eq!(usize::try_from(declared).unwrap(), buf.len().saturating_sub(4));
        let body: serde_json::Value = serde_json::from_slice(&buf[4..]).unwrap();
        assert_eq!(body["outcome"]["status"], "completed");
        assert_eq!(body["outcome"]["output"], "aGVsbG8K");
    }

    #[tokio::test]
    async fn test_async_and_sync_interoperate() {
        let mut buf = Vec::new();
        write_frame_sync(&mut buf, &response(), 1024).unwrap();
        let mut reader = buf.as_slice();
        let decoded: WorkerResponse = read_frame(&mut reader, 1024).await.unwrap();
        assert_eq!(decoded, response());

        let mut out = Vec::new();
        write_frame(&mut out, &response(), 1024).await.unwrap();
        assert_eq!(out, buf);
    }

    #[test]
    fn test_oversize_declared_length_rejected_before_read() {
        let mut frame = u32::MAX.to_be_bytes().to_vec();
        frame.extend_from_slice(b"{}");
        let err = read_frame_sync::<_, WorkerResponse>(&mut frame.as_slice(), 1024).unwrap_err();
        assert!(matches!(
            err,
            SandboxError::ChannelOverflow { limit: 1024, .. }
        ));
    }

    #[test]
    fn test_writer_refuses_oversize_value() {
        let err = write_frame_sync(&mut Vec::new(), &response(), 8).unwrap_err();
        assert!(matches!(err, SandboxError::ChannelOverflow { limit: 8, .. }));
    }

    #[test]
    fn test_truncated_and_malformed_frames_are_crashes() {
        let mut short = 10u32.to_be_bytes().to_vec();
        short.extend_from_slice(b"{}");
        assert!(matches!(
            read_frame_sync::<_, WorkerResponse>(&mut short.as_slice(), 1024),
            Err(SandboxError::Crashed { .. })
        ));

        let mut garbage = 3u32.to_be_bytes().to_vec();
        garbage.extend_from_slice(b"???");
        assert!(matches!(
            read_frame_sync::<_, WorkerResponse>(&mut garbage.as_slice(), 1024),
            Err(SandboxError::Crashed { .. })
        ));

        assert!(matches!(
            read_frame_sync::<_, WorkerResponse>(&mut &b""[..], 1024),
            Err(SandboxError::Crashed { .. })
        ));
    }

    #[test]
    fn test_request_carries_capabilities_as_strings() {
        let request = WorkerRequest {
            unit: CompiledUnit::new("probe", b"[]".to_vec()),
            capabilities: CapabilitySet::parse(["file:read:/data/**", "!net:*:**"]).unwrap(),
            max_output_bytes: 16,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["capabilities"][1], "!net:*:**");
        assert_eq!(json["unit"]["payload"], "W10=");
        let back: WorkerRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn test_response_limit_covers_encoded_output() {
        assert!(response_frame_limit(1_000) > 1_400);
        assert_eq!(response_frame_limit(usize::MAX), usize::MAX);
    }
}
