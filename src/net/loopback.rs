//! Loopback link
//!
//! A [`LinkLayer`] that keeps every transmitted packet in a bounded queue
//! instead of putting it on a wire. Useful for driving a [`NetStack`] without
//! hardware: drain the queue with [`LoopbackLink::pop`] and feed frames back
//! through [`NetStack::on_frame`].
//!
//! [`NetStack`]: crate::net::stack::NetStack
//! [`NetStack::on_frame`]: crate::net::stack::NetStack::on_frame

use alloc::vec::Vec;
use crossbeam_queue::ArrayQueue;

use crate::net::buffer::PacketBuf;
use crate::net::ethernet::{LinkLayer, MacAddress, TransmitError, MAX_PAYLOAD_SIZE};

/// A packet handed to the link layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub dest: MacAddress,
    pub ethertype: u16,
    pub payload: PacketBuf,
}

/// Loopback network device
pub struct LoopbackLink {
    /// Packets that were transmitted and not yet drained
    queue: ArrayQueue<Frame>,
    mtu: usize,
}

impl LoopbackLink {
    /// Create a new loopback link
    ///
    /// # Arguments
    /// * `max_queue_size` - Maximum number of frames kept before transmit fails,
    ///   at least one
    pub fn new(max_queue_size: usize) -> Self {
        Self {
            queue: ArrayQueue::new(max_queue_size.max(1)),
            mtu: MAX_PAYLOAD_SIZE,
        }
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    /// Take the oldest transmitted frame
    pub fn pop(&self) -> Option<Frame> {
        self.queue.pop()
    }

    /// Take every queued frame, oldest first
    pub fn drain(&self) -> Vec<Frame> {
        let mut frames = Vec::with_capacity(self.queue.len());
        while let Some(frame) = self.queue.pop() {
            frames.push(frame);
        }
        frames
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Default for LoopbackLink {
    fn default() -> Self {
        Self::new(64)
    }
}

impl LinkLayer for LoopbackLink {
    fn transmit(&self, packet: PacketBuf, dest: MacAddress, ethertype: u16) -> Result<(), TransmitError> {
        if packet.len() > self.mtu {
            return Err(TransmitError::PacketTooLarge);
        }

        self.queue
            .push(Frame { dest, ethertype, payload: packet })
            .map_err(|_| TransmitError::BufferFull)
    }
}
