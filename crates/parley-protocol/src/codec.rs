//! Codec for encoding and decoding Parley packets.
//!
//! This module provides MessagePack-based serialization with length-prefixed framing.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::packet::Packet;

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Invalid packet data.
    #[error("Invalid packet: {0}")]
    Invalid(String),
}

/// Encode a packet to bytes.
///
/// The encoded format is:
/// - 4 bytes: Big-endian length prefix
/// - N bytes: MessagePack map with keys `type`, `id`, `command`, `payload`
///
/// # Errors
///
/// Returns an error if the packet is too large or encoding fails.
pub fn encode(packet: &Packet) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(packet, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a packet into an existing buffer.
///
/// # Errors
///
/// Returns an error if the packet is too large or encoding fails.
pub fn encode_into(packet: &Packet, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let body = rmp_serde::to_vec_named(packet)?;

    if body.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(body.len()));
    }

    buf.reserve(LENGTH_PREFIX_SIZE + body.len());
    buf.put_u32(body.len() as u32);
    buf.extend_from_slice(&body);

    Ok(())
}

/// Decode exactly one packet from bytes.
///
/// The decoded packet is validated; bytes past the end of the frame are
/// rejected.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, malformed or
/// does not describe a valid packet.
pub fn decode(data: &[u8]) -> Result<Packet, ProtocolError> {
    let length = frame_length(data)?;

    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }
    if data.len() > total_size {
        return Err(ProtocolError::Invalid(format!(
            "{} trailing bytes after frame",
            data.len() - total_size
        )));
    }

    parse(&data[LENGTH_PREFIX_SIZE..total_size])
}

/// Try to decode a packet from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(packet))` if a complete frame was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
/// A frame that fails validation is consumed before the error is returned
/// so the stream stays aligned.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Packet>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = frame_length(buf)?;

    let total_size = LENGTH_PREFIX_SIZE + length;
    if buf.len() < total_size {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let body = buf.split_to(length);

    parse(&body).map(Some)
}

fn frame_length(data: &[u8]) -> Result<usize, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }

    Ok(length)
}

fn parse(body: &[u8]) -> Result<Packet, ProtocolError> {
    let packet: Packet = rmp_serde::from_slice(body)?;
    packet
        .validate()
        .map_err(|reason| ProtocolError::Invalid(reason.to_string()))?;
    Ok(packet)
}
