//! IPv4 subnet arithmetic for the cast-type computation.
//!
//! Classless (CIDR) masks only; classful networks are not supported.

use crate::address::Ipv4Address;

/// An IPv4 subnet mask, a thin wrapper around a `u32`.
#[derive(Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Ipv4Mask(u32);

// const version of clamp
const fn clamp(num: u32, min: u32, max: u32) -> u32 {
    assert!(min <= max);
    if num < min {
        min
    } else if num > max {
        max
    } else {
        num
    }
}

impl Ipv4Mask {
    /// Returns a mask of `size` leading ones. Sizes above 32 are clamped
    /// to 32.
    ///
    /// # Examples
    ///
    /// ```
    /// # use ip4rx::subnetting::*;
    /// // 255.255.0.0
    /// let mask = Ipv4Mask::from_bitcount(16);
    /// assert_eq!(mask.to_u32(), 0xFF_FF_00_00);
    /// ```
    pub const fn from_bitcount(size: u32) -> Ipv4Mask {
        let size = clamp(size, 0, 32);
        if size == 0 {
            Ipv4Mask(0)
        } else if size == 32 {
            Ipv4Mask(0xFF_FF_FF_FF)
        } else {
            Ipv4Mask(((1 << size) - 1) << (32 - size))
        }
    }

    /// Returns the number of ones in this mask.
    pub const fn count_ones(&self) -> u32 {
        self.0.count_ones()
    }

    /// Turns the mask into a u32.
    pub const fn to_u32(self) -> u32 {
        self.0
    }
}

impl std::fmt::Debug for Ipv4Mask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Ipv4Mask")
            .field(&Ipv4Address::from(self.0))
            .finish()
    }
}

impl std::fmt::Display for Ipv4Mask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

impl From<Ipv4Mask> for u32 {
    fn from(mask: Ipv4Mask) -> u32 {
        mask.0
    }
}

impl TryFrom<u32> for Ipv4Mask {
    type Error = u32;

    /// Returns an `Ipv4Mask` based on the u32. If the u32 is not a valid
    /// subnet mask (that is, it has zeros between the ones), the number is
    /// returned back as the error.
    fn try_from(mask: u32) -> Result<Ipv4Mask, u32> {
        let count = mask.count_ones();
        let result = Ipv4Mask::from_bitcount(count);
        if u32::from(result) == mask {
            Ok(result)
        } else {
            Err(mask)
        }
    }
}

/// An IPv4 network: an address masked down to its network ID.
#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ipv4Net {
    /// This MUST be a network ID or it will screw up Eq
    network_id: Ipv4Address,
    mask: Ipv4Mask,
}

impl Ipv4Net {
    /// Creates an `Ipv4Net` from an IP address and mask.
    pub fn new(ip: Ipv4Address, mask: Ipv4Mask) -> Self {
        Self {
            network_id: Ipv4Address::from(ip.to_u32() & mask.to_u32()),
            mask,
        }
    }

    /// Returns the first IP address in this network.
    pub fn id(&self) -> Ipv4Address {
        self.network_id
    }

    /// Returns the directed broadcast address for this network, its last
    /// IP address.
    ///
    /// # Example
    ///
    /// ```
    /// # use ip4rx::subnetting::*;
    /// # use ip4rx::address::Ipv4Address;
    /// let net = Ipv4Net::new([10, 0, 0, 119].into(), Ipv4Mask::from_bitcount(24));
    /// assert_eq!(net.broadcast(), Ipv4Address::from([10, 0, 0, 255]));
    /// ```
    pub fn broadcast(&self) -> Ipv4Address {
        let new_ip_u32 = self.id().to_u32() + !self.mask.to_u32();
        Ipv4Address::new(new_ip_u32.to_be_bytes())
    }

    /// Returns the `Ipv4Mask` of this network.
    pub fn mask(&self) -> Ipv4Mask {
        self.mask
    }

    /// Returns `true` if the `address` is contained in this network.
    pub fn contains(&self, address: Ipv4Address) -> bool {
        self.id().to_u32() == address.to_u32() & self.mask().to_u32()
    }
}

impl std::fmt::Debug for Ipv4Net {
    /// The results will be of form `Ipv4Net {10.0.0.0/8}`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "Ipv4Net {{{}/{}}}",
            self.network_id,
            self.mask().count_ones()
        ))
    }
}
