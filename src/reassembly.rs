//! Reassembly of fragmented datagrams, after the procedure sketched in
//! [RFC 791](https://www.rfc-editor.org/rfc/rfc791) section 3.2 with the
//! fragment buffers kept on ordered per-datagram lists.

use crate::address::Ipv4Address;
use crate::info::{Datagram, PacketInfo};
use crate::packet::Packet;
use crate::parsing::Ipv4Header;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

/// The number of buckets in the assembly table. A power of two so the
/// hash can be masked down.
pub const ASSEMBLY_BUCKETS: usize = 128;

/// Aging ticks granted to a datagram under reassembly. At the nominal
/// 1 Hz tick this is 120 seconds.
pub const FRAGMENT_LIFE: u32 = 120;

/// Identifies which datagram a fragment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct AssemblyKey {
    dst: Ipv4Address,
    src: Ipv4Address,
    id: u16,
    protocol: u8,
}

impl AssemblyKey {
    fn from_header(header: &Ipv4Header) -> Self {
        Self {
            dst: header.destination,
            src: header.source,
            id: header.identification,
            protocol: header.protocol,
        }
    }

    fn bucket(&self) -> usize {
        let mut hasher = FxHasher::default();
        self.hash(&mut hasher);
        hasher.finish() as usize & (ASSEMBLY_BUCKETS - 1)
    }
}

/// One buffered fragment, its payload and its place in the datagram.
#[derive(Debug)]
struct Fragment {
    body: Packet,
    info: PacketInfo,
}

/// A datagram that is still missing fragments.
///
/// The fragment list is kept strictly ordered by start offset with no
/// overlaps, so `cur_len` is the sum of the listed lengths and reaching
/// `total_len` means the datagram is whole.
#[derive(Debug)]
struct AssemblyEntry {
    key: AssemblyKey,
    fragments: Vec<Fragment>,
    /// The end offset claimed by the last fragment, zero until one shows up
    total_len: u32,
    /// Bytes buffered so far
    cur_len: u32,
    /// The header of the offset-zero fragment
    head: Option<Ipv4Header>,
    /// The bookkeeping of the offset-zero fragment, reused for the whole
    /// datagram
    saved_info: Option<PacketInfo>,
    /// Aging ticks until the partial datagram is given up on
    life: u32,
}

impl AssemblyEntry {
    fn new(key: AssemblyKey) -> Self {
        Self {
            key,
            fragments: Vec::new(),
            total_len: 0,
            cur_len: 0,
            head: None,
            saved_info: None,
            life: FRAGMENT_LIFE,
        }
    }

    /// Works a new fragment into the ordered list, resolving overlaps.
    ///
    /// A fragment overlapping its predecessor keeps its own bytes and the
    /// predecessor loses its tail; a fragment overlapping a successor
    /// loses its own tail instead. Fragments that bring no new bytes are
    /// dropped.
    fn insert(&mut self, header: &Ipv4Header, body: Packet, mut info: PacketInfo) {
        let mut index = self
            .fragments
            .iter()
            .position(|fragment| fragment.info.start > info.start)
            .unwrap_or(self.fragments.len());

        if index > 0 {
            let prev = &mut self.fragments[index - 1];
            if info.start < prev.info.end {
                if info.end <= prev.info.end {
                    tracing::debug!(
                        start = info.start,
                        end = info.end,
                        "fragment covered by an earlier one, dropping"
                    );
                    return;
                }
                let cut = prev.info.end - info.start;
                prev.info.end = info.start;
                prev.info.length -= cut;
                let kept = prev.info.length as usize;
                prev.body.truncate(kept);
                self.cur_len -= cut;
                if kept == 0 {
                    self.fragments.remove(index - 1);
                    index -= 1;
                }
            }
        }

        self.fragments.insert(index, Fragment { body, info });

        let next = index + 1;
        while next < self.fragments.len() {
            let succ = self.fragments[next].info;
            let this = self.fragments[index].info;
            if succ.end <= this.end {
                let removed = self.fragments.remove(next);
                self.cur_len -= removed.info.length;
                continue;
            }
            if succ.start < this.end {
                if succ.start == this.start {
                    // The new fragment is strictly shorter than its twin
                    self.fragments.remove(index);
                    tracing::debug!(
                        start = this.start,
                        "fragment shadowed by a longer twin, dropping"
                    );
                    return;
                }
                let fragment = &mut self.fragments[index];
                fragment.info.end = succ.start;
                fragment.info.length = succ.start - this.start;
                let kept = fragment.info.length as usize;
                fragment.body.truncate(kept);
            }
            break;
        }

        info = self.fragments[index].info;
        self.cur_len += info.length;

        // Captured at most once; a retransmitted first fragment keeps the
        // header already on file.
        if info.start == 0 && self.head.is_none() {
            self.head = Some(header.clone());
            self.saved_info = Some(info);
        }

        if !header.flags.more_fragments() && self.total_len == 0 {
            self.total_len = info.end;
        }
    }

    fn is_complete(&self) -> bool {
        self.total_len > 0 && self.cur_len >= self.total_len
    }

    /// Turns a complete entry into the whole datagram, chaining the
    /// fragment buffers together without copying.
    fn materialize(self) -> Option<Datagram> {
        let AssemblyEntry {
            fragments,
            total_len,
            head,
            saved_info,
            ..
        } = self;

        match fragments.last() {
            Some(last) if last.info.end == total_len => {}
            _ => {
                tracing::debug!("reassembled datagram is malformed, discarding");
                return None;
            }
        }

        let mut header = head?;
        let saved = saved_info?;
        let total_octets = total_len as usize + header.header_octets();
        if total_octets > u16::MAX as usize {
            tracing::debug!(total_octets, "reassembled datagram is too long, discarding");
            return None;
        }

        let mut fragments = fragments.into_iter();
        let mut body = fragments.next()?.body;
        for fragment in fragments {
            body.concatenate(fragment.body);
        }

        header.total_length = total_octets as u16;
        header.flags.set_more_fragments(false);
        header.fragment_offset = 0;

        let mut info = saved;
        info.start = 0;
        info.length = total_len;
        info.end = total_len;
        info.life = 0;

        Some(Datagram { header, body, info })
    }
}

/// The assembly table: every datagram currently under reassembly, bucketed
/// by a hash of its identity.
#[derive(Debug)]
pub struct Reassembly {
    buckets: Vec<Vec<AssemblyEntry>>,
}

impl Default for Reassembly {
    fn default() -> Self {
        Self {
            buckets: (0..ASSEMBLY_BUCKETS).map(|_| Vec::new()).collect(),
        }
    }
}

impl Reassembly {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submits one fragment. Returns the whole datagram when this
    /// fragment completes it, along with the header and bookkeeping taken
    /// from the offset-zero fragment.
    ///
    /// The fragment's `info` must already carry its start, length and end
    /// offsets within the parent datagram.
    pub fn add_fragment(
        &mut self,
        header: &Ipv4Header,
        body: Packet,
        info: PacketInfo,
    ) -> Option<Datagram> {
        let key = AssemblyKey::from_header(header);
        let bucket = &mut self.buckets[key.bucket()];

        let position = match bucket.iter().position(|entry| entry.key == key) {
            Some(position) => position,
            None => {
                bucket.push(AssemblyEntry::new(key));
                bucket.len() - 1
            }
        };

        bucket[position].insert(header, body, info);

        if bucket[position].is_complete() {
            let entry = bucket.swap_remove(position);
            return entry.materialize();
        }
        None
    }

    /// Ages every entry by one tick, discarding the ones whose life runs
    /// out together with all their fragments.
    pub fn tick(&mut self) {
        for bucket in &mut self.buckets {
            bucket.retain_mut(|entry| {
                if entry.life > 0 {
                    entry.life -= 1;
                    if entry.life == 0 {
                        tracing::debug!(
                            src = %entry.key.src,
                            dst = %entry.key.dst,
                            id = entry.key.id,
                            "reassembly timed out, discarding fragments"
                        );
                        return false;
                    }
                }
                true
            });
        }
    }

    /// The number of datagrams currently under reassembly.
    pub fn pending(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }
}
