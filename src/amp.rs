//! AMP wire codec: length-prefixed typed fields over an async byte stream.
//!
//! Frame layout (all integers big-endian):
//!
//! ```text
//! message  := field_count:u32 field*
//! field    := tag:u8 payload
//! tag 0x01 := BLOB,   payload = len:u32 bytes[len]
//! tag 0x02 := STRING, payload = len:u32 utf8[len]
//! tag 0x03 := BIGINT, payload = value:i64
//! tag 0x04 := JSON,   payload = len:u32 utf8[len]
//! ```
//!
//! There is no magic number or checksum: this framing is only ever spoken
//! between axon nodes on a trusted LAN segment (see Non-goals).

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, ErrorKind, Result};
use crate::field::{Field, Message};

const TAG_BLOB: u8 = 0x01;
const TAG_STRING: u8 = 0x02;
const TAG_BIGINT: u8 = 0x03;
const TAG_JSON: u8 = 0x04;

/// Maximum accepted field/message byte length, guarding against a peer
/// sending a corrupt or hostile length prefix that would otherwise drive an
/// unbounded allocation.
const MAX_FIELD_LEN: u32 = 64 * 1024 * 1024;
const MAX_FIELD_COUNT: u32 = 4096;

/// Encodes `msg` onto `out`, appending to whatever is already there.
pub fn encode(msg: &Message, out: &mut Vec<u8>) {
    out.extend_from_slice(&(msg.len() as u32).to_be_bytes());
    for field in &msg.0 {
        encode_field(field, out);
    }
}

fn encode_field(field: &Field, out: &mut Vec<u8>) {
    match field {
        Field::Blob(bytes) => {
            out.push(TAG_BLOB);
            out.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
            out.extend_from_slice(bytes);
        }
        Field::Str(s) => {
            out.push(TAG_STRING);
            out.extend_from_slice(&(s.len() as u32).to_be_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        Field::Int(i) => {
            out.push(TAG_BIGINT);
            out.extend_from_slice(&i.to_be_bytes());
        }
        Field::Json(v) => {
            let s = v.to_string();
            out.push(TAG_JSON);
            out.extend_from_slice(&(s.len() as u32).to_be_bytes());
            out.extend_from_slice(s.as_bytes());
        }
    }
}

/// Reads a single framed message from `stream`.
///
/// Returns `Ok(None)` on a clean EOF with no bytes read (peer closed the
/// connection between messages); any other error, including an EOF in the
/// middle of a frame, is propagated.
pub async fn read_message<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Option<Message>> {
    let count = match read_u32_or_eof(stream).await? {
        Some(c) => c,
        None => return Ok(None),
    };
    if count > MAX_FIELD_COUNT {
        return Err(Error::new(ErrorKind::MalformedMessage(format!("field count {count} exceeds limit"))));
    }

    let mut fields = Vec::with_capacity(count as usize);
    for _ in 0..count {
        fields.push(read_field(stream).await?);
    }
    Ok(Some(Message(fields)))
}

async fn read_field<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Field> {
    let tag = stream.read_u8().await?;
    match tag {
        TAG_BLOB => Ok(Field::Blob(read_len_prefixed(stream).await?)),
        TAG_STRING => {
            let bytes = read_len_prefixed(stream).await?;
            String::from_utf8(bytes)
                .map(Field::Str)
                .map_err(|e| Error::new(ErrorKind::MalformedMessage(format!("invalid utf-8 string: {e}"))))
        }
        TAG_BIGINT => {
            let mut buf = [0u8; 8];
            stream.read_exact(&mut buf).await?;
            Ok(Field::Int(i64::from_be_bytes(buf)))
        }
        TAG_JSON => {
            let bytes = read_len_prefixed(stream).await?;
            let text = String::from_utf8(bytes)
                .map_err(|e| Error::new(ErrorKind::MalformedMessage(format!("invalid utf-8 json: {e}"))))?;
            let value: serde_json::Value = serde_json::from_str(&text)?;
            Ok(Field::Json(value))
        }
        other => Err(Error::new(ErrorKind::MalformedMessage(format!("unknown field tag {other:#x}")))),
    }
}

async fn read_len_prefixed<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Vec<u8>> {
    let len = {
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await?;
        u32::from_be_bytes(buf)
    };
    if len > MAX_FIELD_LEN {
        return Err(Error::new(ErrorKind::MalformedMessage(format!("field length {len} exceeds limit"))));
    }
    let mut bytes = vec![0u8; len as usize];
    stream.read_exact(&mut bytes).await?;
    Ok(bytes)
}

/// Reads a big-endian `u32`, returning `None` if the stream is at EOF before
/// any byte of it is read, and an error for a partial read.
async fn read_u32_or_eof<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Option<u32>> {
    let mut buf = [0u8; 4];
    let mut read = 0;
    while read < 4 {
        let n = stream.read(&mut buf[read..]).await?;
        if n == 0 {
            return if read == 0 {
                Ok(None)
            } else {
                Err(Error::new(ErrorKind::MalformedMessage("connection closed mid-frame".into())))
            };
        }
        read += n;
    }
    Ok(Some(u32::from_be_bytes(buf)))
}

/// Writes `msg` to `stream` and flushes it.
pub async fn write_message<W: AsyncWrite + Unpin>(stream: &mut W, msg: &Message) -> Result<()> {
    let mut buf = Vec::new();
    encode(msg, &mut buf);
    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}
