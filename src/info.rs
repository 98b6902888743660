//! Per-packet bookkeeping carried beside the payload through the pipeline.

use crate::packet::Packet;
use crate::parsing::Ipv4Header;

/// Opaque per-frame value handed over by the link layer and carried
/// through to delivery unchanged.
pub type LinkFlag = u32;

/// How a destination address relates to the receiving station.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastType {
    /// The destination is the interface's own address
    Unicast,
    /// The limited broadcast 255.255.255.255
    LocalBroadcast,
    /// The directed broadcast of the interface's subnet
    SubnetBroadcast,
    /// A class D group address
    Multicast,
    /// Unrelated to the station, kept only because the interface listens
    /// promiscuously
    Promiscuous,
}

impl CastType {
    /// Whether the cast is either form of broadcast.
    pub fn is_broadcast(self) -> bool {
        matches!(self, CastType::LocalBroadcast | CastType::SubnetBroadcast)
    }
}

/// The result a delivery reports to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxStatus {
    /// An ordinary datagram
    Success,
    /// An ICMP error message the client asked to see
    IcmpError,
}

/// Bookkeeping attached to every packet the receive path handles.
///
/// For a fragment, `start` and `end` locate it inside its parent
/// datagram; a whole datagram spans from zero. `life` counts aging ticks
/// and a value of zero never expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketInfo {
    /// Byte offset of this packet within its parent datagram
    pub start: u32,
    /// The number of payload bytes
    pub length: u32,
    /// One past the last payload byte, `start + length`
    pub end: u32,
    /// The destination class relative to the receiver
    pub cast: CastType,
    /// Pass-through from the link layer
    pub link_flag: LinkFlag,
    /// Aging ticks remaining, zero to never expire
    pub life: u32,
    /// The status delivery will report for this packet
    pub status: RxStatus,
}

impl PacketInfo {
    pub fn new(start: u32, length: u32, cast: CastType, link_flag: LinkFlag) -> Self {
        Self {
            start,
            length,
            end: start + length,
            cast,
            link_flag,
            life: 0,
            status: RxStatus::Success,
        }
    }
}

/// A whole datagram moving between the pipeline stages: the parsed
/// header, the headless payload, and the bookkeeping block.
#[derive(Debug, Clone)]
pub struct Datagram {
    pub header: Ipv4Header,
    pub body: Packet,
    pub info: PacketInfo,
}
