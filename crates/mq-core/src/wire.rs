//! Wire framing: 26-byte header (id || body length || type || status)
//! followed by `body_length` bytes, all little-endian.
//!
//! The original implementation this substrate is modeled on decoded the
//! body-length field with a raw pointer cast over an unaligned buffer. That
//! is not a sound pattern in Rust and this module instead does an explicit
//! little-endian decode of the eight length bytes — the only
//! representation-dependent step left is `to_le_bytes`/`from_le_bytes`,
//! which is portable by construction.

use static_assertions::const_assert_eq;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::message::{Message, MsgType, Status};
use crate::pool::Pool;

pub const HEADER_LEN: usize = 26;
const_assert_eq!(HEADER_LEN, 16 + 8 + 1 + 1);

/// 32-byte client handshake: 16-byte key followed by 16-byte token.
pub const HANDSHAKE_LEN: usize = 32;

/// Sane upper bound on a single message body so a corrupt or hostile peer
/// can't make us allocate an unbounded buffer from a forged length field.
pub const MAX_BODY_LEN: i64 = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("invalid message header")]
    InvalidHeader,
    #[error("invalid message body length: {0}")]
    InvalidLength(i64),
    #[error("unrecognized message type byte {0}")]
    InvalidMsgType(u8),
    #[error("unrecognized status byte {0}")]
    InvalidStatus(u8),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Encode `msg` into a header+body buffer. Returns the buffer and the number
/// of valid bytes in it (callers that pull `dst` from a pool may have more
/// capacity than they need).
pub fn encode(msg: &Message, mut dst: Vec<u8>) -> (Vec<u8>, usize) {
    let body_len = msg.body.len();
    let total = HEADER_LEN + body_len;
    if dst.len() < total {
        dst.resize(total, 0);
    }

    dst[0..16].copy_from_slice(msg.id.as_bytes());
    dst[16..24].copy_from_slice(&(body_len as i64).to_le_bytes());
    dst[24] = msg.t as u8;
    dst[25] = msg.s as u8;
    dst[26..26 + body_len].copy_from_slice(&msg.body);

    (dst, total)
}

/// Decode a header already read into a 26-byte buffer.
pub fn decode_header(buf: &[u8; HEADER_LEN]) -> Result<(Uuid, i64, MsgType, Status), WireError> {
    let id = Uuid::from_bytes(buf[0..16].try_into().unwrap());
    let body_len = i64::from_le_bytes(buf[16..24].try_into().unwrap());
    if body_len < 0 || body_len > MAX_BODY_LEN {
        return Err(WireError::InvalidLength(body_len));
    }
    let t = MsgType::from_u8(buf[24]).ok_or(WireError::InvalidMsgType(buf[24]))?;
    let s = Status::from_u8(buf[25]).ok_or(WireError::InvalidStatus(buf[25]))?;
    Ok((id, body_len, t, s))
}

/// Read one framed message from an async stream, pulling the body buffer
/// from `pool`. Used by the connection's reader pump.
pub async fn read_message<R: AsyncRead + Unpin>(
    r: &mut R,
    pool: &Pool,
) -> Result<Message, WireError> {
    let mut header = [0u8; HEADER_LEN];
    r.read_exact(&mut header).await?;
    let (id, body_len, t, s) = decode_header(&header)?;

    let body = if body_len > 0 {
        let mut buf = pool.get(body_len as usize);
        buf.truncate(body_len as usize);
        r.read_exact(&mut buf).await?;
        buf
    } else {
        Vec::new()
    };

    Ok(Message { id, t, s, body })
}

/// Write one framed message to an async stream. Used by the connection's
/// writer pump; `scratch` is a pool-provided encode buffer, returned to the
/// caller (and thence the pool) after the write completes.
pub async fn write_message<W: AsyncWrite + Unpin>(
    w: &mut W,
    msg: &Message,
    scratch: Vec<u8>,
) -> Result<Vec<u8>, WireError> {
    let (buf, n) = encode(msg, scratch);
    w.write_all(&buf[..n]).await?;
    Ok(buf)
}

/// Read exactly one framed message without a pool, for handshake-time use
/// before the reader pump (and its pool-backed buffers) exists.
pub async fn read_message_plain<R: AsyncRead + Unpin>(r: &mut R) -> Result<Message, WireError> {
    let mut header = [0u8; HEADER_LEN];
    r.read_exact(&mut header).await?;
    let (id, body_len, t, s) = decode_header(&header)?;
    let body = if body_len > 0 {
        let mut buf = vec![0u8; body_len as usize];
        r.read_exact(&mut buf).await?;
        buf
    } else {
        Vec::new()
    };
    Ok(Message { id, t, s, body })
}

/// Write exactly one framed message without a pool, for handshake-time use.
pub async fn send_message_plain<W: AsyncWrite + Unpin>(
    w: &mut W,
    t: MsgType,
    s: Status,
    body: Vec<u8>,
) -> Result<(), WireError> {
    let msg = Message {
        id: Uuid::new_v4(),
        t,
        s,
        body,
    };
    let (buf, n) = encode(&msg, Vec::with_capacity(HEADER_LEN + msg.body.len()));
    w.write_all(&buf[..n]).await?;
    Ok(())
}
