//! Interfaces and the cast-type computation.

use crate::address::Ipv4Address;
use crate::info::CastType;
use crate::instance::Instance;
use crate::subnetting::{Ipv4Mask, Ipv4Net};
use std::sync::Arc;

/// Index of an interface within its service.
pub type InterfaceId = usize;

/// A logical binding of an IPv4 address and netmask to the link service,
/// grouping the instances that share it. Address assignment itself happens
/// outside this crate.
#[derive(Debug)]
pub struct Interface {
    pub(crate) address: Ipv4Address,
    pub(crate) mask: Ipv4Mask,
    pub(crate) promiscuous: bool,
    pub(crate) instances: Vec<Arc<Instance>>,
}

impl Interface {
    pub(crate) fn new(address: Ipv4Address, mask: Ipv4Mask, promiscuous: bool) -> Self {
        Self {
            address,
            mask,
            promiscuous,
            instances: Vec::new(),
        }
    }

    pub fn address(&self) -> Ipv4Address {
        self.address
    }

    pub fn mask(&self) -> Ipv4Mask {
        self.mask
    }

    fn net(&self) -> Ipv4Net {
        Ipv4Net::new(self.address, self.mask)
    }

    /// Classifies a destination relative to this interface, or `None` for
    /// a packet the station has no business seeing.
    ///
    /// A source address that is itself a broadcast or multicast in the
    /// station's scope poisons the packet regardless of destination.
    pub(crate) fn host_cast(&self, dst: Ipv4Address, src: Ipv4Address) -> Option<CastType> {
        if src.is_multicast()
            || src.is_local_broadcast()
            || (!self.address.is_zero() && src == self.net().broadcast())
        {
            return None;
        }

        if !self.address.is_zero() && dst == self.address {
            Some(CastType::Unicast)
        } else if dst.is_local_broadcast() {
            Some(CastType::LocalBroadcast)
        } else if !self.address.is_zero() && dst == self.net().broadcast() {
            Some(CastType::SubnetBroadcast)
        } else if dst.is_multicast() {
            Some(CastType::Multicast)
        } else if self.promiscuous {
            Some(CastType::Promiscuous)
        } else {
            None
        }
    }

    /// The cast type seen from this interface during fan-out. Broadcast
    /// and multicast classifications carry over from ingress; anything
    /// else is judged against this interface's own addressing, with a
    /// zero address matching everything.
    pub(crate) fn local_cast(
        &self,
        dst: Ipv4Address,
        src: Ipv4Address,
        global: CastType,
    ) -> Option<CastType> {
        if global.is_broadcast() || global == CastType::Multicast {
            return Some(global);
        }
        if self.address.is_zero() {
            return Some(CastType::Unicast);
        }
        self.host_cast(dst, src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(promiscuous: bool) -> Interface {
        Interface::new(
            [10, 0, 0, 2].into(),
            Ipv4Mask::from_bitcount(24),
            promiscuous,
        )
    }

    const SRC: [u8; 4] = [10, 0, 0, 3];

    #[test]
    fn classifies_destinations() {
        let iface = iface(false);
        let cast = |dst: [u8; 4]| iface.host_cast(dst.into(), SRC.into());

        assert_eq!(cast([10, 0, 0, 2]), Some(CastType::Unicast));
        assert_eq!(cast([255, 255, 255, 255]), Some(CastType::LocalBroadcast));
        assert_eq!(cast([10, 0, 0, 255]), Some(CastType::SubnetBroadcast));
        assert_eq!(cast([224, 0, 0, 1]), Some(CastType::Multicast));
        assert_eq!(cast([192, 168, 0, 1]), None);
    }

    #[test]
    fn promiscuous_catches_the_rest() {
        let iface = iface(true);
        assert_eq!(
            iface.host_cast([192, 168, 0, 1].into(), SRC.into()),
            Some(CastType::Promiscuous)
        );
        // Promiscuity never outranks a real classification
        assert_eq!(
            iface.host_cast([10, 0, 0, 2].into(), SRC.into()),
            Some(CastType::Unicast)
        );
    }

    #[test]
    fn poisoned_sources_rejected() {
        let iface = iface(true);
        let dst: Ipv4Address = [10, 0, 0, 2].into();
        assert_eq!(iface.host_cast(dst, [255, 255, 255, 255].into()), None);
        assert_eq!(iface.host_cast(dst, [10, 0, 0, 255].into()), None);
        assert_eq!(iface.host_cast(dst, [224, 0, 0, 5].into()), None);
    }

    #[test]
    fn local_cast_for_fan_out() {
        let iface = iface(false);
        let dst: Ipv4Address = [10, 0, 0, 2].into();
        let src: Ipv4Address = SRC.into();

        // Broadcast and multicast classifications carry over untouched
        assert_eq!(
            iface.local_cast([99, 99, 99, 99].into(), src, CastType::SubnetBroadcast),
            Some(CastType::SubnetBroadcast)
        );
        assert_eq!(
            iface.local_cast(dst, src, CastType::Unicast),
            Some(CastType::Unicast)
        );
        assert_eq!(
            iface.local_cast([192, 168, 0, 1].into(), src, CastType::Unicast),
            None
        );

        let any = Interface::new(Ipv4Address::ZERO, Ipv4Mask::from_bitcount(0), false);
        assert_eq!(
            any.local_cast([192, 168, 0, 1].into(), src, CastType::Promiscuous),
            Some(CastType::Unicast)
        );
    }
}
