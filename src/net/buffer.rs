//! Packet buffer with reserved headroom
//!
//! Each layer prepends its header by moving the data cursor back into the
//! headroom and strips it again on the way up. Removed headers stay in the
//! headroom untouched, so a layer can re-attach the header it just removed
//! (needed for ICMP error messages that quote the original datagram).
//!
//! ```text
//! |<- headroom ->|<------- data ------->|
//! 0            head                   tail
//! ```

use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

/// Bytes reserved in front of the data for headers added on the way down
pub const HEADROOM: usize = 64;

/// Largest payload a buffer may carry (the IPv4 total-length ceiling)
pub const MAX_PACKET_LEN: usize = 65535;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    /// Requested length exceeds [`MAX_PACKET_LEN`]
    TooLarge,
    /// Not enough headroom left to prepend a header
    NoHeadroom,
    /// Buffer holds fewer bytes than the operation needs
    TooShort,
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferError::TooLarge => write!(f, "Packet too large"),
            BufferError::NoHeadroom => write!(f, "No headroom for header"),
            BufferError::TooShort => write!(f, "Buffer too short"),
        }
    }
}

/// Owned, bounds-checked packet buffer
#[derive(Clone)]
pub struct PacketBuf {
    storage: Vec<u8>,
    head: usize,
    tail: usize,
}

impl PacketBuf {
    /// Allocate a zero-filled buffer holding `len` bytes of data
    pub fn new(len: usize) -> Result<Self, BufferError> {
        if len > MAX_PACKET_LEN {
            return Err(BufferError::TooLarge);
        }

        Ok(Self {
            storage: vec![0; HEADROOM + len],
            head: HEADROOM,
            tail: HEADROOM + len,
        })
    }

    /// Allocate a buffer and copy `data` into it
    pub fn from_slice(data: &[u8]) -> Result<Self, BufferError> {
        let mut buf = Self::new(data.len())?;
        buf.as_mut_slice().copy_from_slice(data);
        Ok(buf)
    }

    /// Prepend `len` bytes in front of the data
    ///
    /// The bytes are not cleared: whatever a previous [`remove_header`](Self::remove_header)
    /// left behind becomes visible again.
    pub fn add_header(&mut self, len: usize) -> Result<(), BufferError> {
        if len > self.head {
            return Err(BufferError::NoHeadroom);
        }
        self.head -= len;
        Ok(())
    }

    /// Strip `len` bytes from the front of the data
    pub fn remove_header(&mut self, len: usize) -> Result<(), BufferError> {
        if len > self.len() {
            return Err(BufferError::TooShort);
        }
        self.head += len;
        Ok(())
    }

    /// Strip `len` bytes of trailing padding
    pub fn remove_padding(&mut self, len: usize) -> Result<(), BufferError> {
        if len > self.len() {
            return Err(BufferError::TooShort);
        }
        self.tail -= len;
        Ok(())
    }

    /// Shrink the data to exactly `len` bytes by trimming the tail
    pub fn truncate(&mut self, len: usize) -> Result<(), BufferError> {
        if len > self.len() {
            return Err(BufferError::TooShort);
        }
        self.remove_padding(self.len() - len)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.storage[self.head..self.tail]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.storage[self.head..self.tail]
    }

    pub fn len(&self) -> usize {
        self.tail - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Bytes still available in front of the data
    pub fn headroom(&self) -> usize {
        self.head
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }
}

impl PartialEq for PacketBuf {
    fn eq(&self, other: &Self) -> bool {
        self.as_slice() == other.as_slice()
    }
}

impl Eq for PacketBuf {}

impl fmt::Debug for PacketBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PacketBuf(len={}, headroom={})", self.len(), self.head)
    }
}
