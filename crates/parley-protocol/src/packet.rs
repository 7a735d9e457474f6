//! Packet types for the Parley protocol.
//!
//! A packet is classified along three independent dimensions - kind,
//! origin and destination - packed into a single bitmask. The bit layout
//! is part of the wire format and must not change.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a packet asks of its receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Expects exactly one reply carrying the same correlation id.
    Request,
    /// Answers a request.
    Reply,
    /// Fire-and-forget; never answered.
    Notification,
}

impl Kind {
    const fn flag(self) -> PacketType {
        match self {
            Kind::Request => PacketType::REQUEST,
            Kind::Reply => PacketType::REPLY,
            Kind::Notification => PacketType::NOTIFICATION,
        }
    }

    fn from_flag(flag: PacketType) -> Option<Self> {
        match flag {
            PacketType::REQUEST => Some(Kind::Request),
            PacketType::REPLY => Some(Kind::Reply),
            PacketType::NOTIFICATION => Some(Kind::Notification),
            _ => None,
        }
    }

    /// Whether packets of this kind carry a correlation id.
    #[must_use]
    pub const fn is_correlated(self) -> bool {
        matches!(self, Kind::Request | Kind::Reply)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Request => "request",
            Kind::Reply => "reply",
            Kind::Notification => "notification",
        };
        f.write_str(name)
    }
}

/// A participant in the conversation, used for both origin and destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Peer {
    /// The player's client.
    Client,
    /// The game server.
    Server,
    /// A relay (lobby) forwarding between peers.
    Relay,
}

impl Peer {
    const fn origin_flag(self) -> PacketType {
        match self {
            Peer::Client => PacketType::SRC_CLIENT,
            Peer::Server => PacketType::SRC_SERVER,
            Peer::Relay => PacketType::SRC_RELAY,
        }
    }

    const fn destination_flag(self) -> PacketType {
        match self {
            Peer::Client => PacketType::DEST_CLIENT,
            Peer::Server => PacketType::DEST_SERVER,
            Peer::Relay => PacketType::DEST_RELAY,
        }
    }

    fn from_origin(flag: PacketType) -> Option<Self> {
        match flag {
            PacketType::SRC_CLIENT => Some(Peer::Client),
            PacketType::SRC_SERVER => Some(Peer::Server),
            PacketType::SRC_RELAY => Some(Peer::Relay),
            _ => None,
        }
    }

    fn from_destination(flag: PacketType) -> Option<Self> {
        match flag {
            PacketType::DEST_CLIENT => Some(Peer::Client),
            PacketType::DEST_SERVER => Some(Peer::Server),
            PacketType::DEST_RELAY => Some(Peer::Relay),
            _ => None,
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Peer::Client => "client",
            Peer::Server => "server",
            Peer::Relay => "relay",
        };
        f.write_str(name)
    }
}

/// Three-dimensional packet classification bitmask.
///
/// A well-formed mask has exactly one bit set in each of the kind, origin
/// and destination dimensions. Masks are composed with `|`:
///
/// ```rust
/// use parley_protocol::{Kind, Peer, PacketType};
///
/// let ty = PacketType::REQUEST | PacketType::SRC_CLIENT | PacketType::DEST_SERVER;
/// assert_eq!(ty.kind(), Some(Kind::Request));
/// assert_eq!(ty.origin(), Some(Peer::Client));
/// assert!(ty.is_well_formed());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PacketType(u16);

bitflags! {
    impl PacketType: u16 {
        const REQUEST = 0x100;
        const REPLY = 0x200;
        const NOTIFICATION = 0x400;

        const SRC_CLIENT = 0x010;
        const SRC_SERVER = 0x020;
        const SRC_RELAY = 0x040;

        const DEST_CLIENT = 0x001;
        const DEST_SERVER = 0x002;
        const DEST_RELAY = 0x004;
    }
}

impl PacketType {
    const KIND_MASK: Self = Self::REQUEST.union(Self::REPLY).union(Self::NOTIFICATION);
    const ORIGIN_MASK: Self = Self::SRC_CLIENT.union(Self::SRC_SERVER).union(Self::SRC_RELAY);
    const DESTINATION_MASK: Self = Self::DEST_CLIENT
        .union(Self::DEST_SERVER)
        .union(Self::DEST_RELAY);

    /// Build a mask from one value of each dimension.
    #[must_use]
    pub const fn new(kind: Kind, origin: Peer, destination: Peer) -> Self {
        kind.flag()
            .union(origin.origin_flag())
            .union(destination.destination_flag())
    }

    /// The kind dimension, if exactly one kind bit is set.
    #[must_use]
    pub fn kind(self) -> Option<Kind> {
        Kind::from_flag(self & Self::KIND_MASK)
    }

    /// The origin dimension, if exactly one origin bit is set.
    #[must_use]
    pub fn origin(self) -> Option<Peer> {
        Peer::from_origin(self & Self::ORIGIN_MASK)
    }

    /// The destination dimension, if exactly one destination bit is set.
    #[must_use]
    pub fn destination(self) -> Option<Peer> {
        Peer::from_destination(self & Self::DESTINATION_MASK)
    }

    /// Whether every dimension holds exactly one value and no unknown bits are set.
    #[must_use]
    pub fn is_well_formed(self) -> bool {
        Self::all().contains(self)
            && self.kind().is_some()
            && self.origin().is_some()
            && self.destination().is_some()
    }

    /// Replace the kind dimension, keeping origin and destination.
    #[must_use]
    pub const fn with_kind(self, kind: Kind) -> Self {
        self.difference(Self::KIND_MASK).union(kind.flag())
    }

    /// Fill origin and destination where the caller left them empty.
    #[must_use]
    pub const fn with_default_route(self, origin: Peer, destination: Peer) -> Self {
        let mut ty = self;
        if !ty.intersects(Self::ORIGIN_MASK) {
            ty = ty.union(origin.origin_flag());
        }
        if !ty.intersects(Self::DESTINATION_MASK) {
            ty = ty.union(destination.destination_flag());
        }
        ty
    }
}

impl From<PacketType> for u16 {
    fn from(ty: PacketType) -> u16 {
        ty.bits()
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind(), self.origin(), self.destination()) {
            (Some(kind), Some(origin), Some(destination)) => {
                write!(f, "{kind} {origin}->{destination}")
            }
            _ => write!(f, "{:#05x}", self.bits()),
        }
    }
}

/// A protocol packet.
///
/// `payload` is structured-data text (JSON in practice) that the routing
/// layer carries without interpreting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Kind, origin and destination.
    #[serde(rename = "type")]
    pub type_mask: PacketType,
    /// Links a request to its reply. Absent on notifications.
    #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<u64>,
    /// Application command name.
    pub command: String,
    /// Serialized structured data.
    pub payload: String,
}

impl Packet {
    /// Create a request packet. The kind bits of `ty` are forced to `Request`.
    #[must_use]
    pub fn request(
        ty: PacketType,
        correlation_id: u64,
        command: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            type_mask: ty.with_kind(Kind::Request),
            correlation_id: Some(correlation_id),
            command: command.into(),
            payload: payload.into(),
        }
    }

    /// Create a reply packet. The kind bits of `ty` are forced to `Reply`.
    #[must_use]
    pub fn reply(
        ty: PacketType,
        correlation_id: u64,
        command: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            type_mask: ty.with_kind(Kind::Reply),
            correlation_id: Some(correlation_id),
            command: command.into(),
            payload: payload.into(),
        }
    }

    /// Create a notification packet. The kind bits of `ty` are forced to `Notification`.
    #[must_use]
    pub fn notification(
        ty: PacketType,
        command: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            type_mask: ty.with_kind(Kind::Notification),
            correlation_id: None,
            command: command.into(),
            payload: payload.into(),
        }
    }

    /// The packet kind, if the mask is well formed in that dimension.
    #[must_use]
    pub fn kind(&self) -> Option<Kind> {
        self.type_mask.kind()
    }

    /// Parse the payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not valid JSON.
    pub fn payload_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }

    /// Check that the packet has a recognizable shape.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated rule.
    pub fn validate(&self) -> Result<(), &'static str> {
        if !self.type_mask.is_well_formed() {
            return Err("Packet type must hold one kind, one origin and one destination");
        }
        match (self.type_mask.kind(), self.correlation_id) {
            (Some(kind), None) if kind.is_correlated() => {
                return Err("Requests and replies require a correlation id");
            }
            (Some(Kind::Notification), Some(_)) => {
                return Err("Notifications cannot carry a correlation id");
            }
            _ => {}
        }
        if self.command.is_empty() {
            return Err("Command cannot be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_type_dimensions() {
        let ty = PacketType::REPLY | PacketType::SRC_RELAY | PacketType::DEST_CLIENT;
        assert_eq!(ty.bits(), 0x241);
        assert_eq!(ty.kind(), Some(Kind::Reply));
        assert_eq!(ty.origin(), Some(Peer::Relay));
        assert_eq!(ty.destination(), Some(Peer::Client));
        assert_eq!(ty, PacketType::new(Kind::Reply, Peer::Relay, Peer::Client));
    }

    #[test]
    fn test_packet_type_ambiguous_dimension() {
        let ty = PacketType::REQUEST | PacketType::REPLY | PacketType::SRC_CLIENT;
        assert_eq!(ty.kind(), None);
        assert_eq!(ty.destination(), None);
        assert!(!ty.is_well_formed());

        let stray = PacketType::from_bits_retain(0x1112);
        assert_eq!(stray.kind(), Some(Kind::Request));
        assert!(!stray.is_well_formed());
    }

    #[test]
    fn test_with_kind_and_default_route() {
        let ty = PacketType::REQUEST
            .with_kind(Kind::Notification)
            .with_default_route(Peer::Client, Peer::Server);
        assert_eq!(
            ty,
            PacketType::NOTIFICATION | PacketType::SRC_CLIENT | PacketType::DEST_SERVER
        );

        // An explicit route is kept.
        let routed = (PacketType::REPLY | PacketType::DEST_RELAY)
            .with_default_route(Peer::Server, Peer::Client);
        assert_eq!(routed.origin(), Some(Peer::Server));
        assert_eq!(routed.destination(), Some(Peer::Relay));
    }

    #[test]
    fn test_packet_type_display() {
        let ty = PacketType::new(Kind::Request, Peer::Client, Peer::Server);
        assert_eq!(ty.to_string(), "request client->server");
        assert_eq!(PacketType::from_bits_retain(0x300).to_string(), "0x300");
    }

    #[test]
    fn test_packet_validate() {
        let ty = PacketType::new(Kind::Request, Peer::Client, Peer::Server);
        assert!(Packet::request(ty, 1, "ping", "{}").validate().is_ok());
        assert!(Packet::notification(ty, "chat", "{}").validate().is_ok());

        let mut missing_id = Packet::reply(ty, 1, "pong", "{}");
        missing_id.correlation_id = None;
        assert!(missing_id.validate().is_err());

        let mut notify_with_id = Packet::notification(ty, "chat", "{}");
        notify_with_id.correlation_id = Some(3);
        assert!(notify_with_id.validate().is_err());

        assert!(Packet::request(ty, 1, "", "{}").validate().is_err());
        assert!(Packet::request(PacketType::REQUEST, 1, "ping", "{}")
            .validate()
            .is_err());
    }

    #[test]
    fn test_payload_json() {
        let ty = PacketType::new(Kind::Reply, Peer::Server, Peer::Client);
        let packet = Packet::reply(ty, 9, "pong", r#"{"ok":true}"#);
        assert_eq!(packet.payload_json().unwrap()["ok"], true);
    }
}
