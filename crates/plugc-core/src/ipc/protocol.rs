//! Wire protocol between the host and the compiler worker.
//!
//! Uses length-prefixed JSON messages over stdin/stdout.
//! Format: 4-byte length (u32 LE) + JSON-encoded message.
//! A zero length is the null sentinel and ends the stream.
//!
//! ```text
//! {"id":3,"type":"Compile","data":{"outputFile":"Foo","sourceFiles":[...],"referenceFiles":[...]}}
//! {"id":3,"type":"Assembly","data":{"assembly":"<base64>","stdOutput":"..."}}
//! {"id":0,"type":"Ready"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Upper bound on a single frame body (100MB).
pub const MAX_FRAME_LEN: usize = 100 * 1024 * 1024;

/// Kind of a [`CompilerMessage`], as it appears in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    Compile,
    Assembly,
    Error,
    Ready,
    Exit,
}

/// A message exchanged with the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct CompilerMessage {
    /// Correlation id of the compilation, or 0 for control messages.
    pub id: u64,
    pub body: MessageBody,
}

/// Typed payload of a [`CompilerMessage`].
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    /// Host → worker: compile a batch of sources.
    Compile(CompileRequest),
    /// Worker → host: compilation finished, possibly without output.
    Assembly(AssemblyOutput),
    /// Worker → host: the compilation could not run at all.
    Error(String),
    /// Worker → host when it starts listening; echoed back as acknowledgement.
    Ready,
    /// Host → worker: terminate gracefully.
    Exit,
}

/// Payload of a Compile message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileRequest {
    pub output_file: String,
    pub source_files: Vec<CompilerFile>,
    pub reference_files: Vec<ReferenceFile>,
}

/// A source file. Files without inline text are read by the worker from disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilerFile {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl CompilerFile {
    pub fn path(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: None,
        }
    }

    pub fn inline(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: Some(text.into()),
        }
    }
}

/// A binary reference the compilation links against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceFile {
    pub name: String,
    #[serde(with = "super::blob")]
    pub data: Vec<u8>,
}

/// Payload of an Assembly message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssemblyOutput {
    /// Compiled module, absent when compilation produced errors.
    #[serde(default, with = "super::blob::optional")]
    pub assembly: Option<Vec<u8>>,
    /// Raw compiler stdout, used to attribute diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std_output: Option<String>,
}

impl CompilerMessage {
    pub fn ready() -> Self {
        Self {
            id: 0,
            body: MessageBody::Ready,
        }
    }

    pub fn exit() -> Self {
        Self {
            id: 0,
            body: MessageBody::Exit,
        }
    }

    pub fn compile(id: u64, request: CompileRequest) -> Self {
        Self {
            id,
            body: MessageBody::Compile(request),
        }
    }

    pub fn kind(&self) -> MessageType {
        match self.body {
            MessageBody::Compile(_) => MessageType::Compile,
            MessageBody::Assembly(_) => MessageType::Assembly,
            MessageBody::Error(_) => MessageType::Error,
            MessageBody::Ready => MessageType::Ready,
            MessageBody::Exit => MessageType::Exit,
        }
    }

    /// Encode to the JSON frame body.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let data = match &self.body {
            MessageBody::Compile(request) => serde_json::to_value(request),
            MessageBody::Assembly(output) => serde_json::to_value(output),
            MessageBody::Error(text) => Ok(Value::String(text.clone())),
            MessageBody::Ready | MessageBody::Exit => Ok(Value::Null),
        }
        .map_err(|e| Error::Serialization(format!("Failed to encode message data: {}", e)))?;

        let wire = WireMessage {
            id: self.id,
            kind: self.kind(),
            data,
        };
        serde_json::to_vec(&wire)
            .map_err(|e| Error::Serialization(format!("Failed to encode message: {}", e)))
    }

    /// Decode from a JSON frame body.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let wire: WireMessage = serde_json::from_slice(bytes)
            .map_err(|e| Error::Serialization(format!("Failed to decode message: {}", e)))?;

        let body = match wire.kind {
            MessageType::Compile => MessageBody::Compile(decode_data(wire.data)?),
            MessageType::Assembly => MessageBody::Assembly(decode_data(wire.data)?),
            MessageType::Error => MessageBody::Error(match wire.data {
                Value::String(text) => text,
                Value::Null => String::new(),
                other => other.to_string(),
            }),
            MessageType::Ready => MessageBody::Ready,
            MessageType::Exit => MessageBody::Exit,
        };

        Ok(Self { id: wire.id, body })
    }
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    id: u64,
    #[serde(rename = "type")]
    kind: MessageType,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    data: Value,
}

fn decode_data<T: serde::de::DeserializeOwned>(data: Value) -> Result<T> {
    serde_json::from_value(data)
        .map_err(|e| Error::Serialization(format!("Failed to decode message data: {}", e)))
}

/// Write a message using length-prefixed JSON encoding.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &CompilerMessage,
) -> Result<()> {
    let bytes = message.to_json()?;
    write_frame(writer, &bytes).await
}

/// Write the null sentinel, telling the peer no further frames follow.
pub async fn write_null<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<()> {
    write_frame(writer, &[]).await
}

/// Length prefix for a frame body, rejecting bodies the reader would refuse.
fn frame_len(len: usize) -> Result<u32> {
    if len > MAX_FRAME_LEN {
        return Err(Error::Ipc(format!("IPC message too large: {} bytes", len)));
    }
    u32::try_from(len).map_err(|_| Error::Ipc(format!("IPC message too large: {} bytes", len)))
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    let len = frame_len(bytes.len())?;
    writer
        .write_all(&len.to_le_bytes())
        .await
        .map_err(|e| Error::Ipc(format!("Failed to write IPC message length: {}", e)))?;
    writer
        .write_all(bytes)
        .await
        .map_err(|e| Error::Ipc(format!("Failed to write IPC message body: {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| Error::Ipc(format!("Failed to flush IPC stream: {}", e)))?;

    Ok(())
}

/// Read a message using length-prefixed JSON encoding.
///
/// Returns `Ok(None)` when the stream ends cleanly on a frame boundary or the
/// peer sent the null sentinel. A stream that ends inside a frame is an error.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<CompilerMessage>> {
    let mut len_bytes = [0u8; 4];
    let mut filled = 0;
    while filled < len_bytes.len() {
        let n = reader
            .read(&mut len_bytes[filled..])
            .await
            .map_err(|e| Error::Ipc(format!("Failed to read IPC message length: {}", e)))?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(Error::Ipc(format!(
                "IPC stream closed inside a frame header ({} of 4 bytes)",
                filled
            )));
        }
        filled += n;
    }

    let len = u32::from_le_bytes(len_bytes) as usize;
    if len == 0 {
        return Ok(None);
    }

    // Sanity check: reject absurdly large messages
    if len > MAX_FRAME_LEN {
        return Err(Error::Ipc(format!("IPC message too large: {} bytes", len)));
    }

    let mut bytes = vec![0u8; len];
    reader
        .read_exact(&mut bytes)
        .await
        .map_err(|e| Error::Ipc(format!("Failed to read IPC message body: {}", e)))?;

    CompilerMessage::from_json(&bytes).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_request() -> CompileRequest {
        CompileRequest {
            output_file: "Foo".to_string(),
            source_files: vec![
                CompilerFile::path("plugins/include/Ext.cs"),
                CompilerFile::inline("Foo.cs", "class Foo {}"),
            ],
            reference_files: vec![ReferenceFile {
                name: "Newtonsoft.Json".to_string(),
                data: vec![0x4d, 0x5a, 0x00, 0xff],
            }],
        }
    }

    #[tokio::test]
    async fn test_compile_roundtrip() {
        let msg = CompilerMessage::compile(7, sample_request());

        let mut buf = Vec::new();
        write_message(&mut buf, &msg).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded = read_message(&mut cursor).await.unwrap().unwrap();
        assert_eq!(decoded, msg);
        assert!(read_message(&mut cursor).await.unwrap().is_none());
    }

    #[test]
    fn test_json_shape() {
        let ready = CompilerMessage::ready().to_json().unwrap();
        assert_eq!(String::from_utf8(ready).unwrap(), r#"{"id":0,"type":"Ready"}"#);

        let assembly = CompilerMessage {
            id: 2,
            body: MessageBody::Assembly(AssemblyOutput {
                assembly: Some(b"MZ".to_vec()),
                std_output: None,
            }),
        };
        let json: Value = serde_json::from_slice(&assembly.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "Assembly");
        assert_eq!(json["data"]["assembly"], "TVo=");
    }

    #[test]
    fn test_error_and_empty_assembly_decode() {
        let err = CompilerMessage::from_json(br#"{"id":4,"type":"Error","data":"no csc"}"#).unwrap();
        assert_eq!(err.body, MessageBody::Error("no csc".to_string()));

        let asm = CompilerMessage::from_json(
            br#"{"id":5,"type":"Assembly","data":{"stdOutput":"Foo.cs(1,1): error CS1: x"}}"#,
        )
        .unwrap();
        match asm.body {
            MessageBody::Assembly(out) => {
                assert!(out.assembly.is_none());
                assert!(out.std_output.unwrap().contains("CS1"));
            }
            other => panic!("Wrong message body: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_null_sentinel_ends_stream() {
        let mut buf = Vec::new();
        write_message(&mut buf, &CompilerMessage::ready()).await.unwrap();
        write_null(&mut buf).await.unwrap();
        write_message(&mut buf, &CompilerMessage::exit()).await.unwrap();

        let mut cursor = Cursor::new(buf);
        assert!(read_message(&mut cursor).await.unwrap().is_some());
        assert!(read_message(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_frames_are_errors() {
        let mut buf = Vec::new();
        write_message(&mut buf, &CompilerMessage::ready()).await.unwrap();

        // Cut inside the body
        let mut cursor = Cursor::new(buf[..buf.len() - 2].to_vec());
        assert!(read_message(&mut cursor).await.is_err());

        // Cut inside the header
        let mut cursor = Cursor::new(buf[..2].to_vec());
        assert!(read_message(&mut cursor).await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_oversized_and_garbage_frames() {
        let mut buf = ((MAX_FRAME_LEN + 1) as u32).to_le_bytes().to_vec();
        buf.extend_from_slice(b"xx");
        assert!(read_message(&mut Cursor::new(buf)).await.is_err());

        let mut buf = 5u32.to_le_bytes().to_vec();
        buf.extend_from_slice(b"{nope");
        assert!(read_message(&mut Cursor::new(buf)).await.is_err());
    }

    #[test]
    fn test_frame_len_limits() {
        assert_eq!(frame_len(0).unwrap(), 0);
        assert_eq!(frame_len(MAX_FRAME_LEN).unwrap(), MAX_FRAME_LEN as u32);
        assert!(frame_len(MAX_FRAME_LEN + 1).is_err());
        assert!(frame_len(usize::MAX).is_err());
    }
}
