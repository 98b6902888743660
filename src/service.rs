//! The receive service: ingress validation, protocol dispatch, two-pass
//! fan-out, and the aging timer.

use crate::address::Ipv4Address;
use crate::icmp;
use crate::info::{Datagram, LinkFlag, PacketInfo};
use crate::instance::Instance;
use crate::interface::{Interface, InterfaceId};
use crate::packet::Packet;
use crate::parsing::{self, Ipv4Header};
use crate::reassembly::Reassembly;
use crate::subnetting::Ipv4Mask;
use std::sync::Arc;
use thiserror::Error as ThisError;

/// The IP protocol number of IGMP.
const IGMP_PROTOCOL: u8 = 2;

/// The highest offset a payload byte of a datagram may have.
const MAX_DATAGRAM_END: u32 = 65535;

/// The frame source underneath this service.
pub trait LinkService: Send + Sync {
    /// Re-arms reception on the given interface. The service calls this
    /// exactly once per frame it was handed, on every outcome, unless it
    /// is being destroyed.
    fn restart_receive(&self, interface: InterfaceId);
}

/// A protocol subsystem that takes whole datagrams off the service's
/// hands. ICMP and IGMP live behind this seam.
pub trait DatagramHandler: Send + Sync {
    /// Takes ownership of a whole datagram of the handler's protocol.
    fn handle(&self, datagram: Datagram);
}

/// The status the link layer reports alongside a received frame.
#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    #[error("The link reported a receive failure")]
    Receive,
}

#[derive(Debug, ThisError, Clone, Copy, PartialEq, Eq)]
pub enum DemuxError {
    #[error("No instance accepted the datagram")]
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceState {
    Running,
    Destroying,
}

/// One receive-side IPv4 service per driver binding.
///
/// The service runs in a single cooperative context: the link layer calls
/// [`accept_frame`](Ip4Service::accept_frame) as frames arrive and
/// something external calls [`timer_tick`](Ip4Service::timer_tick) at a
/// nominal 1 Hz. Everything in between is synchronous.
pub struct Ip4Service {
    state: ServiceState,
    reassembly: Reassembly,
    interfaces: Vec<Interface>,
    instances: Vec<Arc<Instance>>,
    link: Arc<dyn LinkService>,
    icmp: Option<Arc<dyn DatagramHandler>>,
    igmp: Option<Arc<dyn DatagramHandler>>,
}

impl Ip4Service {
    pub fn new(link: Arc<dyn LinkService>) -> Self {
        Self {
            state: ServiceState::Running,
            reassembly: Reassembly::new(),
            interfaces: Vec::new(),
            instances: Vec::new(),
            link,
            icmp: None,
            igmp: None,
        }
    }

    /// Installs the ICMP subsystem. Without one, ICMP datagrams are
    /// dropped at dispatch.
    pub fn set_icmp_handler(&mut self, handler: Arc<dyn DatagramHandler>) {
        self.icmp = Some(handler);
    }

    /// Installs the IGMP subsystem. Without one, IGMP datagrams are
    /// dropped at dispatch.
    pub fn set_igmp_handler(&mut self, handler: Arc<dyn DatagramHandler>) {
        self.igmp = Some(handler);
    }

    /// Binds an address to the link and returns its handle.
    pub fn add_interface(
        &mut self,
        address: Ipv4Address,
        mask: Ipv4Mask,
        promiscuous: bool,
    ) -> InterfaceId {
        self.interfaces.push(Interface::new(address, mask, promiscuous));
        self.interfaces.len() - 1
    }

    /// Creates a fresh, unconfigured instance on the given interface.
    ///
    /// # Panics
    ///
    /// Panics if the interface handle is stale.
    pub fn add_instance(&mut self, interface: InterfaceId) -> Arc<Instance> {
        let instance = Arc::new(Instance::new());
        self.interfaces[interface]
            .instances
            .push(instance.clone());
        self.instances.push(instance.clone());
        instance
    }

    /// Begins teardown. Children stop accepting work and later frames
    /// are dropped without re-arming the link.
    pub fn destroy(&mut self) {
        self.state = ServiceState::Destroying;
        for instance in &self.instances {
            instance.stop();
        }
    }

    /// The number of datagrams currently under reassembly.
    pub fn pending_reassemblies(&self) -> usize {
        self.reassembly.pending()
    }

    /// Entry point for the link layer: one received frame, raw from the
    /// wire. The receive is re-armed exactly once before returning,
    /// whatever becomes of the frame, unless the service is being
    /// destroyed.
    pub fn accept_frame(
        &mut self,
        interface: InterfaceId,
        status: Result<(), LinkError>,
        frame: Packet,
        link_flag: LinkFlag,
    ) {
        if self.state == ServiceState::Destroying {
            return;
        }
        self.ingress(interface, status, frame, link_flag);
        self.link.restart_receive(interface);
    }

    /// Validates one frame and walks it through reassembly and dispatch.
    /// Malformed frames are dropped silently apart from a debug trace.
    fn ingress(
        &mut self,
        interface: InterfaceId,
        status: Result<(), LinkError>,
        mut frame: Packet,
        link_flag: LinkFlag,
    ) {
        if let Err(error) = status {
            tracing::debug!(%error, "dropping frame");
            return;
        }
        if frame.len() < parsing::BASE_OCTETS {
            tracing::debug!(len = frame.len(), "frame below the IPv4 minimum");
            return;
        }
        let header = match Ipv4Header::parse(frame.iter()) {
            Ok(header) => header,
            Err(error) => {
                tracing::debug!(%error, "dropping malformed frame");
                return;
            }
        };

        // The link layer may pad short frames; anything past the
        // header's idea of the length is trailer.
        if frame.len() > header.total_length as usize {
            frame.truncate(header.total_length as usize);
        }
        if frame.len() != header.total_length as usize {
            tracing::debug!(
                frame_len = frame.len(),
                total_length = header.total_length,
                "frame is shorter than its header claims"
            );
            return;
        }

        let cast = {
            let Some(iface) = self.interfaces.get(interface) else {
                tracing::debug!(interface, "frame arrived on an unknown interface");
                return;
            };
            match iface.host_cast(header.destination, header.source) {
                Some(cast) => cast,
                None => {
                    tracing::trace!(dst = %header.destination, "frame is not for this station");
                    return;
                }
            }
        };

        let start = header.fragment_offset as u32 * 8;
        let length = (header.total_length as usize - header.header_octets()) as u32;
        if start + length > MAX_DATAGRAM_END {
            tracing::debug!(end = start + length, "fragment reaches past the datagram limit");
            return;
        }

        if !header.options.is_empty() && !parsing::options_valid(&header.options) {
            tracing::debug!("dropping frame with malformed options");
            return;
        }

        frame.trim_head(header.header_octets());
        let info = PacketInfo::new(start, length, cast, link_flag);

        let datagram = if header.is_fragment() {
            if header.flags.dont_fragment() {
                tracing::debug!("fragment carries the dont-fragment flag");
                return;
            }
            if header.flags.more_fragments() && length % 8 != 0 {
                tracing::debug!(length, "non-final fragment length is not a multiple of eight");
                return;
            }
            match self.reassembly.add_fragment(&header, frame, info) {
                Some(datagram) => datagram,
                None => return,
            }
        } else {
            Datagram {
                header,
                body: frame,
                info,
            }
        };

        self.dispatch(datagram);
    }

    /// Branches a whole datagram on its protocol. ICMP and IGMP transfer
    /// to their subsystems; everything else fans out to the instances.
    fn dispatch(&self, datagram: Datagram) {
        match datagram.header.protocol {
            icmp::PROTOCOL => match &self.icmp {
                Some(handler) => handler.handle(datagram),
                None => tracing::debug!("no ICMP handler installed, dropping"),
            },
            IGMP_PROTOCOL => match &self.igmp {
                Some(handler) => handler.handle(datagram),
                None => tracing::debug!("no IGMP handler installed, dropping"),
            },
            _ => {
                if let Err(error) = self.demux(datagram) {
                    tracing::debug!(%error, "datagram had no takers");
                }
            }
        }
    }

    /// Fans a whole datagram out to every interested instance.
    ///
    /// The first pass queues one cheap clone per accepting instance,
    /// judging each interface by its own local cast type; the second pass
    /// drives delivery everywhere. Returns the number of queued clones.
    pub fn demux(&self, datagram: Datagram) -> Result<usize, DemuxError> {
        let Datagram { header, body, info } = datagram;

        let mut accepted = 0;
        for iface in &self.interfaces {
            let Some(local_cast) =
                iface.local_cast(header.destination, header.source, info.cast)
            else {
                continue;
            };
            for instance in &iface.instances {
                match instance.wants(&header, &body, local_cast) {
                    Ok(status) => {
                        let mut clone_info = info;
                        clone_info.cast = local_cast;
                        clone_info.status = status;
                        clone_info.life = instance.receive_life();
                        instance.enqueue(Datagram {
                            header: header.clone(),
                            body: body.clone(),
                            info: clone_info,
                        });
                        accepted += 1;
                    }
                    Err(error) => {
                        tracing::trace!(%error, "instance declined the datagram");
                    }
                }
            }
        }

        // The caller's reference ends here; the queued clones are the
        // only remaining holders of the payload.
        drop(body);

        for iface in &self.interfaces {
            for instance in &iface.instances {
                instance.deliver();
            }
        }

        if accepted == 0 {
            return Err(DemuxError::NotFound);
        }
        Ok(accepted)
    }

    /// The aging tick, nominally 1 Hz: partial reassemblies and queued
    /// datagrams count down and expire here.
    pub fn timer_tick(&mut self) {
        self.reassembly.tick();
        for instance in &self.instances {
            instance.tick();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InstanceConfig;
    use crate::delivery::RxToken;
    use crate::info::CastType;
    use crate::parsing::ControlFlags;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingLink {
        restarts: AtomicUsize,
    }

    impl LinkService for CountingLink {
        fn restart_receive(&self, _interface: InterfaceId) {
            self.restarts.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl CountingLink {
        fn restarts(&self) -> usize {
            self.restarts.load(Ordering::SeqCst)
        }
    }

    fn frame(dst: [u8; 4], protocol: u8, payload: &[u8]) -> Packet {
        let header = Ipv4Header {
            ihl: 5,
            type_of_service: 0,
            total_length: 20 + payload.len() as u16,
            identification: 0x1000,
            flags: ControlFlags::default(),
            fragment_offset: 0,
            time_to_live: 64,
            protocol,
            checksum: 0,
            source: [10, 0, 0, 3].into(),
            destination: dst.into(),
            options: vec![],
        };
        let mut frame = Packet::new(payload.to_vec());
        frame.prepend(header.serialize());
        frame
    }

    fn service_with_listener() -> (Ip4Service, Arc<CountingLink>, Arc<Instance>) {
        let link = Arc::new(CountingLink::default());
        let mut service = Ip4Service::new(link.clone());
        let iface = service.add_interface(
            [10, 0, 0, 2].into(),
            Ipv4Mask::from_bitcount(24),
            false,
        );
        let instance = service.add_instance(iface);
        instance
            .configure(InstanceConfig {
                default_protocol: 17,
                ..Default::default()
            })
            .unwrap();
        (service, link, instance)
    }

    #[test]
    fn restarts_once_per_frame() {
        let (mut service, link, _instance) = service_with_listener();

        service.accept_frame(0, Ok(()), frame([10, 0, 0, 2], 17, b"data"), 0);
        assert_eq!(link.restarts(), 1);

        // Runts, link errors, and alien destinations all still re-arm
        service.accept_frame(0, Ok(()), Packet::new([0u8; 4].as_slice()), 0);
        service.accept_frame(0, Err(LinkError::Receive), frame([10, 0, 0, 2], 17, b"x"), 0);
        service.accept_frame(0, Ok(()), frame([192, 168, 7, 7], 17, b"x"), 0);
        assert_eq!(link.restarts(), 4);
    }

    #[test]
    fn destroyed_service_goes_quiet() {
        let (mut service, link, instance) = service_with_listener();
        service.destroy();
        service.accept_frame(0, Ok(()), frame([10, 0, 0, 2], 17, b"data"), 0);
        assert_eq!(link.restarts(), 0);
        assert_eq!(instance.received_count(), 0);
    }

    #[test]
    fn trailer_is_trimmed() {
        let (mut service, _link, instance) = service_with_listener();
        let (token, mut receiver) = RxToken::new();
        instance.receive(token).unwrap();

        let mut padded = frame([10, 0, 0, 2], 17, b"data");
        padded.concatenate(Packet::new(b"junkjunk"));
        service.accept_frame(0, Ok(()), padded, 0);

        let delivered = receiver.try_recv().unwrap();
        assert_eq!(delivered.packet.body().to_vec(), b"data");
    }

    #[test]
    fn unknown_interface_is_dropped() {
        let (mut service, link, instance) = service_with_listener();
        service.accept_frame(9, Ok(()), frame([10, 0, 0, 2], 17, b"data"), 0);
        assert_eq!(link.restarts(), 1);
        assert_eq!(instance.received_count(), 0);
    }

    #[test]
    fn demux_counts_accepting_instances() {
        let (mut service, _link, first) = service_with_listener();
        let second = service.add_instance(0);
        second
            .configure(InstanceConfig {
                default_protocol: 17,
                ..Default::default()
            })
            .unwrap();

        let payload = b"datagram".to_vec();
        let header = Ipv4Header {
            ihl: 5,
            type_of_service: 0,
            total_length: 20 + payload.len() as u16,
            identification: 5,
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
        let datagram = Datagram {
            header,
            body: Packet::new(payload),
            info,
        };

        assert_eq!(service.demux(datagram.clone()), Ok(2));
        assert_eq!(first.received_count(), 1);
        assert_eq!(second.received_count(), 1);

        first.reset();
        second.reset();
        assert_eq!(service.demux(datagram), Err(DemuxError::NotFound));
    }

    #[test]
    fn icmp_dispatches_to_the_handler() {
        use std::sync::Mutex;

        #[derive(Default)]
        struct Capture {
            seen: Mutex<Vec<Datagram>>,
        }
        impl DatagramHandler for Capture {
            fn handle(&self, datagram: Datagram) {
                self.seen.lock().unwrap().push(datagram);
            }
        }

        let (mut service, _link, instance) = service_with_listener();
        let capture = Arc::new(Capture::default());
        service.set_icmp_handler(capture.clone());

        service.accept_frame(0, Ok(()), frame([10, 0, 0, 2], 1, &[8, 0, 0, 0]), 0);
        assert_eq!(capture.seen.lock().unwrap().len(), 1);
        // The headless echo request went to ICMP, not the instances
        assert_eq!(instance.received_count(), 0);
    }
}
