//! Hand-off of whole datagrams to the upper layer: receive tokens, the
//! wrapper the client reads, and the recycle path that takes it back.

use crate::info::{Datagram, RxStatus};
use crate::packet::Packet;
use crate::parsing::BASE_OCTETS;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// The list of wrappers an instance currently has out with its client.
pub(crate) type DeliveredList = Arc<Mutex<Vec<Arc<RxPacket>>>>;

/// A client's standing request for the next datagram.
///
/// The core completes the token with a [`Delivered`] once a matching
/// datagram is queued. Dropping the receiver cancels the token; the core
/// skips over dead tokens when delivering.
pub struct RxToken {
    completion: oneshot::Sender<Delivered>,
}

impl std::fmt::Debug for RxToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RxToken")
    }
}

impl RxToken {
    /// Creates a token and the handle the client awaits on.
    pub fn new() -> (Self, oneshot::Receiver<Delivered>) {
        let (completion, receiver) = oneshot::channel();
        (Self { completion }, receiver)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.completion.is_closed()
    }

    pub(crate) fn complete(self, delivered: Delivered) -> Result<(), Delivered> {
        self.completion.send(delivered)
    }
}

/// What a completed receive token carries.
#[derive(Debug, Clone)]
pub struct Delivered {
    /// `Success`, or `IcmpError` for an error message the client asked for
    pub status: RxStatus,
    /// The datagram itself
    pub packet: Arc<RxPacket>,
}

/// A whole datagram as presented to the upper layer.
///
/// The header is re-serialized to network byte order; the payload keeps
/// its physical layout and is enumerated by [`RxPacket::blocks`]. The
/// wrapper stays on its instance's delivered list, keeping the storage
/// alive, until the client signals [`RxPacket::recycle`].
#[derive(Debug)]
pub struct RxPacket {
    /// The full header in wire order, options included
    header: Vec<u8>,
    body: Packet,
    /// The delivered list to leave on recycle. Taken exactly once.
    home: Mutex<Option<DeliveredList>>,
}

impl RxPacket {
    /// Wraps a queued datagram for the client. An unshared payload is
    /// presented as is; a shared one is first copied into a fresh
    /// contiguous backing so later trims by other holders cannot touch it.
    pub(crate) fn wrap(datagram: Datagram, home: DeliveredList) -> Arc<Self> {
        let Datagram { header, body, .. } = datagram;
        let body = if body.is_shared() {
            body.compact()
        } else {
            body
        };
        Arc::new(Self {
            header: header.serialize(),
            body,
            home: Mutex::new(Some(home)),
        })
    }

    /// The header length in bytes, options included.
    pub fn header_len(&self) -> usize {
        self.header.len()
    }

    /// The full header in network byte order.
    pub fn header_bytes(&self) -> &[u8] {
        &self.header
    }

    /// The raw option bytes, empty for a plain header.
    pub fn options(&self) -> &[u8] {
        &self.header[BASE_OCTETS..]
    }

    /// The number of payload bytes.
    pub fn data_len(&self) -> usize {
        self.body.len()
    }

    /// The payload.
    pub fn body(&self) -> &Packet {
        &self.body
    }

    /// The physical runs of payload bytes, in order.
    pub fn blocks(&self) -> impl Iterator<Item = &[u8]> {
        self.body.blocks()
    }

    /// Returns the datagram to the core. The wrapper leaves its
    /// instance's delivered list and the payload storage is released once
    /// the client drops its own handle. Signaling more than once is
    /// inert.
    pub fn recycle(self: &Arc<Self>) {
        let home = self.home.lock().unwrap().take();
        if let Some(list) = home {
            list.lock()
                .unwrap()
                .retain(|wrapper| !Arc::ptr_eq(wrapper, self));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::{CastType, PacketInfo};
    use crate::parsing::{ControlFlags, Ipv4Header};

    fn datagram(payload: &[u8]) -> Datagram {
        let header = Ipv4Header {
            ihl: 5,
            type_of_service: 0,
            total_length: 20 + payload.len() as u16,
            identification: 7,
            flags: ControlFlags::default(),
            fragment_offset: 0,
            time_to_live: 64,
            protocol: 17,
            checksum: 0,
            source: [10, 0, 0, 3].into(),
            destination: [10, 0, 0, 2].into(),
            options: vec![],
        };
        let info = PacketInfo::new(0, payload.len() as u32, CastType::Unicast, 0);
        Datagram {
            header,
            body: Packet::new(payload.to_vec()),
            info,
        }
    }

    #[test]
    fn wraps_unshared_payload_without_copying() {
        let datagram = datagram(b"payload");
        let home: DeliveredList = Default::default();
        let wrapped = RxPacket::wrap(datagram, home);
        assert_eq!(wrapped.data_len(), 7);
        assert_eq!(wrapped.header_len(), 20);
        assert!(wrapped.options().is_empty());
        assert_eq!(wrapped.body().to_vec(), b"payload");
    }

    #[test]
    fn duplicates_shared_payload() {
        let datagram = datagram(b"payload");
        let hold = datagram.body.clone();
        let home: DeliveredList = Default::default();
        let wrapped = RxPacket::wrap(datagram, home);
        assert!(!wrapped.body().is_shared());
        assert_eq!(wrapped.body().to_vec(), hold.to_vec());
    }

    #[test]
    fn header_is_wire_order() {
        let datagram = datagram(b"payload");
        let expected = datagram.header.serialize();
        let wrapped = RxPacket::wrap(datagram, Default::default());
        assert_eq!(wrapped.header_bytes(), expected.as_slice());
    }

    #[test]
    fn recycle_leaves_the_delivered_list_once() {
        let home: DeliveredList = Default::default();
        let wrapped = RxPacket::wrap(datagram(b"payload"), home.clone());
        home.lock().unwrap().push(wrapped.clone());

        wrapped.recycle();
        assert!(home.lock().unwrap().is_empty());

        // A second signal must not disturb a later occupant
        home.lock()
            .unwrap()
            .push(RxPacket::wrap(datagram(b"other"), home.clone()));
        wrapped.recycle();
        assert_eq!(home.lock().unwrap().len(), 1);
    }

    #[test]
    fn token_completion() {
        let (token, mut receiver) = RxToken::new();
        assert!(!token.is_closed());
        let delivered = Delivered {
            status: RxStatus::Success,
            packet: RxPacket::wrap(datagram(b"payload"), Default::default()),
        };
        token.complete(delivered).unwrap();
        let delivered = receiver.try_recv().unwrap();
        assert_eq!(delivered.status, RxStatus::Success);
    }

    #[test]
    fn dropped_receiver_closes_token() {
        let (token, receiver) = RxToken::new();
        drop(receiver);
        assert!(token.is_closed());
    }
}
