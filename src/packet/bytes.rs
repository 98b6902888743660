use super::Block;
use std::{
    collections::{vec_deque, VecDeque},
    slice,
};

/// An iterator over the bytes of a packet
pub struct PacketBytes<'a> {
    blocks: vec_deque::Iter<'a, Block>,
    current: slice::Iter<'a, u8>,
}

impl<'a> PacketBytes<'a> {
    pub(super) fn new(blocks: &'a VecDeque<Block>) -> Self {
        let mut blocks = blocks.iter();
        Self {
            current: blocks
                .next()
                .map(|block| block.as_slice().iter())
                .unwrap_or([].iter()),
            blocks,
        }
    }
}

impl<'a> Iterator for PacketBytes<'a> {
    type Item = u8;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.current.next() {
                Some(byte) => return Some(*byte),
                None => {
                    self.current = self.blocks.next()?.as_slice().iter();
                }
            }
        }
    }
}
