//! Per-instance configuration.

use crate::address::Ipv4Address;
use crate::subnetting::Ipv4Mask;
use std::time::Duration;

/// How long a datagram may wait on an instance's receive queue for the
/// client to ask for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiveTimeout {
    /// Queued datagrams wait indefinitely
    #[default]
    Never,
    /// Queued datagrams are discarded after roughly this long
    After(Duration),
    /// The instance is send-only and never receives at all
    Disabled,
}

impl ReceiveTimeout {
    pub fn is_disabled(&self) -> bool {
        matches!(self, ReceiveTimeout::Disabled)
    }

    /// The life in whole aging ticks to stamp on a queued datagram. The
    /// timer runs at a nominal 1 Hz, so a tick is a second; durations
    /// round up and a zero life means the datagram never expires.
    pub(crate) fn life_ticks(&self) -> u32 {
        match self {
            ReceiveTimeout::Never => 0,
            ReceiveTimeout::After(duration) => {
                let micros = duration.as_micros();
                (((micros + 999_999) / 1_000_000).max(1)) as u32
            }
            ReceiveTimeout::Disabled => 0,
        }
    }
}

/// Everything a client decides about its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceConfig {
    /// Deliver datagrams of any protocol, not just the default one
    pub accept_any_protocol: bool,
    /// The protocol this instance is interested in
    pub default_protocol: u8,
    /// Deliver ICMP errors aimed at the default protocol
    pub accept_icmp_errors: bool,
    /// Deliver broadcast datagrams
    pub accept_broadcast: bool,
    /// Deliver everything that shows up on the interface
    pub accept_promiscuous: bool,
    /// Take the station address from the interface instead of
    /// `station_address`
    pub use_default_address: bool,
    /// The unicast address of this instance
    pub station_address: Ipv4Address,
    /// The subnet mask that goes with `station_address`
    pub subnet_mask: Ipv4Mask,
    /// Receive queue aging
    pub receive_timeout: ReceiveTimeout,
    /// Type of service for transmitted datagrams
    pub type_of_service: u8,
    /// Time to live for transmitted datagrams
    pub time_to_live: u8,
    /// Multicast groups this instance has joined
    pub groups: Vec<Ipv4Address>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            accept_any_protocol: false,
            default_protocol: 0,
            accept_icmp_errors: false,
            accept_broadcast: false,
            accept_promiscuous: false,
            use_default_address: true,
            station_address: Ipv4Address::ZERO,
            subnet_mask: Ipv4Mask::from_bitcount(0),
            receive_timeout: ReceiveTimeout::Never,
            type_of_service: 0,
            time_to_live: 64,
            groups: Vec::new(),
        }
    }
}
