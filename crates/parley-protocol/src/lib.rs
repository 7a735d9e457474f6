//! # parley-protocol
//!
//! Wire protocol definitions for the Parley request/reply routing layer.
//!
//! This crate defines the packet model exchanged between clients, servers
//! and relays, the three-dimensional packet type bitmask, and the
//! length-prefixed MessagePack codec.
//!
//! ## Packet Kinds
//!
//! - `Request` - Expects a reply with the same correlation id
//! - `Reply` - Answers a request
//! - `Notification` - Fire-and-forget
//!
//! ## Example
//!
//! ```rust
//! use parley_protocol::{codec, Kind, Packet, PacketType, Peer};
//!
//! let ty = PacketType::new(Kind::Request, Peer::Client, Peer::Server);
//! let packet = Packet::request(ty, 1, "ping", "{}");
//!
//! // Encode and decode
//! let encoded = codec::encode(&packet).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(packet, decoded);
//! ```

pub mod codec;
pub mod packet;

pub use codec::{decode, encode, ProtocolError};
pub use packet::{Kind, Packet, PacketType, Peer};
