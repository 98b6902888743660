//! The slice of [ICMP](https://datatracker.ietf.org/doc/html/rfc792) the
//! acceptance filter needs: telling queries from errors and digging the
//! embedded protocol out of an error message. Full ICMP processing lives
//! outside this crate.

use crate::packet::Packet;
use crate::parsing;

/// The IP protocol number of ICMP.
pub const PROTOCOL: u8 = 1;

/// Bytes of an ICMP header in front of the embedded datagram of an error
/// message.
const ERROR_HEADER_OCTETS: usize = 8;

/// The two classes of ICMP message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpClass {
    /// Request/reply traffic such as echo
    Query,
    /// A failure report carrying the offending datagram's header
    Error,
}

/// Classifies an ICMP type field. Unknown types yield `None`.
pub fn classify(icmp_type: u8) -> Option<IcmpClass> {
    match icmp_type {
        // echo reply/request, timestamp, information, address mask
        0 | 8 | 13 | 14 | 15 | 16 | 17 | 18 => Some(IcmpClass::Query),
        // unreachable, source quench, redirect, time exceeded, parameter
        // problem
        3 | 4 | 5 | 11 | 12 => Some(IcmpClass::Error),
        _ => None,
    }
}

/// Whether the headless datagram is an ICMP error message.
pub fn is_error(protocol: u8, body: &Packet) -> bool {
    protocol == PROTOCOL
        && matches!(
            body.iter().next().and_then(classify),
            Some(IcmpClass::Error)
        )
}

/// The protocol field of the datagram embedded in an ICMP error message,
/// if the message is long enough to carry one.
pub fn embedded_protocol(body: &Packet) -> Option<u8> {
    if body.len() < ERROR_HEADER_OCTETS + parsing::BASE_OCTETS {
        return None;
    }
    // The protocol field sits nine bytes into the embedded IP header.
    body.iter().nth(ERROR_HEADER_OCTETS + 9)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_types() {
        assert_eq!(classify(0), Some(IcmpClass::Query));
        assert_eq!(classify(8), Some(IcmpClass::Query));
        assert_eq!(classify(3), Some(IcmpClass::Error));
        assert_eq!(classify(11), Some(IcmpClass::Error));
        assert_eq!(classify(12), Some(IcmpClass::Error));
        assert_eq!(classify(42), None);
    }

    fn unreachable_with_embedded(protocol: u8) -> Packet {
        // type 3, code 3, zero checksum, unused word
        let mut message = vec![3, 3, 0, 0, 0, 0, 0, 0];
        let mut embedded = [0u8; parsing::BASE_OCTETS];
        embedded[0] = 0x45;
        embedded[9] = protocol;
        message.extend_from_slice(&embedded);
        Packet::new(message)
    }

    #[test]
    fn digs_out_embedded_protocol() {
        let message = unreachable_with_embedded(17);
        assert!(is_error(PROTOCOL, &message));
        assert_eq!(embedded_protocol(&message), Some(17));
    }

    #[test]
    fn short_error_has_no_embedded_protocol() {
        let message = Packet::new([3u8, 3, 0, 0].as_slice());
        assert!(is_error(PROTOCOL, &message));
        assert_eq!(embedded_protocol(&message), None);
    }

    #[test]
    fn echo_is_not_an_error() {
        let message = Packet::new([8u8, 0, 0, 0].as_slice());
        assert!(!is_error(PROTOCOL, &message));
        assert!(!is_error(17, &message));
    }
}
