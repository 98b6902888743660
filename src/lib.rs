//! The receive side of an IPv4 protocol layer, built to sit inside a
//! firmware network stack between a frame source and any number of
//! upper-layer clients.
//!
//! Frames handed in by the link layer are validated as IPv4 datagrams,
//! fragmented ones are reassembled, and whole datagrams fan out to every
//! client session that registered interest. Each interested client gets
//! its own view of the payload with as little copying as the sharing
//! allows, and queued datagrams age out against per-client receive
//! timeouts.
//!
//! # Organization
//!
//! - [`Packet`] is the shared byte container everything moves around in
//! - [`Ip4Service`] owns the pipeline: ingress validation, reassembly,
//!   protocol dispatch, and the two-pass fan-out
//! - [`Instance`] is one client session with its acceptance filter and
//!   receive queue
//! - [`RxToken`] and [`RxPacket`] carry completed datagrams to the client
//!   and back
//!
//! The whole pipeline runs in one cooperative context driven by
//! [`Ip4Service::accept_frame`] and [`Ip4Service::timer_tick`]; only the
//! recycle signal may arrive from elsewhere. The transmit path, ICMP and
//! IGMP processing, and interface configuration live outside this crate
//! behind the seams in [`service`].

pub mod packet;
pub use packet::Packet;

pub mod address;
pub use address::Ipv4Address;

pub mod subnetting;
pub use subnetting::{Ipv4Mask, Ipv4Net};

pub mod utility;

pub mod parsing;
pub use parsing::Ipv4Header;

pub mod info;
pub use info::{CastType, Datagram, LinkFlag, PacketInfo, RxStatus};

pub mod icmp;

pub mod config;
pub use config::{InstanceConfig, ReceiveTimeout};

pub mod reassembly;
pub use reassembly::Reassembly;

pub mod interface;
pub use interface::{Interface, InterfaceId};

pub mod instance;
pub use instance::Instance;

pub mod delivery;
pub use delivery::{Delivered, RxPacket, RxToken};

pub mod service;
pub use service::{DatagramHandler, DemuxError, Ip4Service, LinkError, LinkService};
