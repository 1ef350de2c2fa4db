//! Протокол обмена между узлами кластера.
//!
//! Каждый кадр предваряется длиной (u32 BE), затем идёт байт типа:
//!
//! - `HELLO`: magic(4) + version(u16) + node_id(str16) + advertised(str16)
//! - `MESSAGE`: origin(str16) + id(u64) + timestamp(i64) + path(str16) +
//!   user_id(u8 флаг + str16) + body(u32 + байты)
//!
//! `str16`: длина u16 BE и байты UTF-8.

use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use volna_error::CodecError;

use crate::pubsub::{Message, NodeId, Path};

pub const MAGIC: &[u8; 4] = b"VLN\x00";
pub const PROTOCOL_VERSION: u16 = 1;
/// Лимит размера кадра по умолчанию.
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

const TAG_HELLO: u8 = 1;
const TAG_MESSAGE: u8 = 2;

/// Кадр протокола узлов.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Рукопожатие: идентификатор узла и адрес, на котором он слушает
    Hello {
        node_id: NodeId,
        advertised: String,
    },
    /// Реплицируемое сообщение; `origin` и `id` всегда заданы
    Message(Message),
}

/// Кодек кадров для `Framed`.
#[derive(Debug, Clone)]
pub struct PeerCodec {
    max_frame: usize,
}

impl PeerCodec {
    pub fn new(max_frame: usize) -> Self {
        Self { max_frame }
    }
}

impl Default for PeerCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_SIZE)
    }
}

impl Decoder for PeerCodec {
    type Item = Frame;
    type Error = CodecError;

    fn decode(
        &mut self,
        src: &mut BytesMut,
    ) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > self.max_frame {
            return Err(CodecError::FrameTooLarge {
                size: len,
                max: self.max_frame,
            });
        }
        if src.len() < 4 + len {
            src.reserve(4 + len - src.len());
            return Ok(None);
        }
        src.advance(4);
        let mut body = src.split_to(len).freeze();
        decode_frame(&mut body).map(Some)
    }
}

impl Encoder<Frame> for PeerCodec {
    type Error = CodecError;

    fn encode(
        &mut self,
        frame: Frame,
        dst: &mut BytesMut,
    ) -> Result<(), Self::Error> {
        let mut body = BytesMut::new();
        match &frame {
            Frame::Hello {
                node_id,
                advertised,
            } => {
                body.put_u8(TAG_HELLO);
                body.put_slice(MAGIC);
                body.put_u16(PROTOCOL_VERSION);
                put_str(&mut body, node_id.as_str())?;
                put_str(&mut body, advertised)?;
            }
            Frame::Message(msg) => {
                let (Some(origin), Some(id)) = (msg.origin(), msg.id()) else {
                    return Err(CodecError::Malformed {
                        reason: "message without origin or id".to_string(),
                    });
                };
                body.put_u8(TAG_MESSAGE);
                put_str(&mut body, origin.as_str())?;
                body.put_u64(id);
                body.put_i64(msg.timestamp());
                put_str(&mut body, msg.path().as_str())?;
                match msg.user_id() {
                    Some(user) => {
                        body.put_u8(1);
                        put_str(&mut body, user)?;
                    }
                    None => body.put_u8(0),
                }
                body.put_u32(frame_len(msg.body().len(), self.max_frame)?);
                body.put_slice(msg.body());
            }
        }

        if body.len() > self.max_frame {
            return Err(CodecError::FrameTooLarge {
                size: body.len(),
                max: self.max_frame,
            });
        }
        let len = frame_len(body.len(), self.max_frame)?;
        dst.reserve(4 + body.len());
        dst.put_u32(len);
        dst.put_slice(&body);
        Ok(())
    }
}

fn decode_frame(buf: &mut Bytes) -> Result<Frame, CodecError> {
    let tag = get_u8(buf)?;
    match tag {
        TAG_HELLO => {
            if buf.remaining() < MAGIC.len() || &buf[..MAGIC.len()] != MAGIC {
                return Err(CodecError::BadMagic);
            }
            buf.advance(MAGIC.len());
            let version = get_u16(buf)?;
            if version != PROTOCOL_VERSION {
                return Err(CodecError::UnsupportedVersion { version });
            }
            let node_id = get_str(buf, "node_id")?;
            let advertised = get_str(buf, "advertised")?;
            Ok(Frame::Hello {
                node_id: NodeId::from(node_id),
                advertised,
            })
        }
        TAG_MESSAGE => {
            let origin = get_str(buf, "origin")?;
            let id = get_u64(buf)?;
            let timestamp = get_u64(buf)? as i64;
            let raw_path = get_str(buf, "path")?;
            let path = Path::parse(&raw_path).map_err(|e| CodecError::Malformed {
                reason: e.to_string(),
            })?;
            let user_id = match get_u8(buf)? {
                0 => None,
                _ => Some(Arc::from(get_str(buf, "user_id")?.as_str())),
            };
            let len = get_u32(buf)? as usize;
            if buf.remaining() < len {
                return Err(truncated());
            }
            let body = buf.split_to(len);
            Ok(Frame::Message(Message::remote(
                NodeId::from(origin),
                id,
                timestamp,
                path,
                user_id,
                body,
            )))
        }
        other => Err(CodecError::UnknownFrame { tag: other }),
    }
}

/// Длина для 32-битного префикса; больше `u32::MAX` не кодируется.
fn frame_len(
    size: usize,
    max: usize,
) -> Result<u32, CodecError> {
    u32::try_from(size).map_err(|_| CodecError::FrameTooLarge {
        size,
        max,
    })
}

fn truncated() -> CodecError {
    CodecError::Malformed {
        reason: "truncated frame".to_string(),
    }
}

fn put_str(
    buf: &mut BytesMut,
    s: &str,
) -> Result<(), CodecError> {
    let len = u16::try_from(s.len()).map_err(|_| CodecError::Malformed {
        reason: format!("string field too long ({} bytes)", s.len()),
    })?;
    buf.put_u16(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn get_str(
    buf: &mut Bytes,
    field: &'static str,
) -> Result<String, CodecError> {
    let len = get_u16(buf)? as usize;
    if buf.remaining() < len {
        return Err(truncated());
    }
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8 { field })
}

fn get_u8(buf: &mut Bytes) -> Result<u8, CodecError> {
    if buf.remaining() < 1 {
        return Err(truncated());
    }
    Ok(buf.get_u8())
}

fn get_u16(buf: &mut Bytes) -> Result<u16, CodecError> {
    if buf.remaining() < 2 {
        return Err(truncated());
    }
    Ok(buf.get_u16())
}

fn get_u32(buf: &mut Bytes) -> Result<u32, CodecError> {
    if buf.remaining() < 4 {
        return Err(truncated());
    }
    Ok(buf.get_u32())
}

fn get_u64(buf: &mut Bytes) -> Result<u64, CodecError> {
    if buf.remaining() < 8 {
        return Err(truncated());
    }
    Ok(buf.get_u64())
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
