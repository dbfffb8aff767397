//! Bounds-checked views over raw IPv4/ICMP/UDP/TCP headers.
//!
//! The engine rewrites caller-owned byte buffers in place. Every view
//! validates buffer length against the header it interprets before any
//! field access, so a short buffer surfaces as an [`AliasError`] instead
//! of an out-of-range index.

use std::net::Ipv4Addr;

use crate::error::{AliasError, Result};

/// Minimum IPv4 header length in bytes.
pub const IPV4_MIN_HEADER_LEN: usize = 20;

/// UDP header length in bytes.
pub const UDP_HEADER_LEN: usize = 8;

/// Minimum TCP header length in bytes.
pub const TCP_MIN_HEADER_LEN: usize = 20;

/// ICMP header length in bytes (type/code/checksum plus the rest-of-header
/// word, which echo messages use for identifier and sequence number).
pub const ICMP_HEADER_LEN: usize = 8;

/// L4 protocol identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Protocol {
    /// Unknown or unsupported protocol.
    #[default]
    Unknown = 0,
    /// Internet Control Message Protocol.
    Icmp = 1,
    /// Transmission Control Protocol.
    Tcp = 6,
    /// User Datagram Protocol.
    Udp = 17,
}

impl From<u8> for Protocol {
    fn from(value: u8) -> Self {
        match value {
            1 => Self::Icmp,
            6 => Self::Tcp,
            17 => Self::Udp,
            _ => Self::Unknown,
        }
    }
}

/// Mutable view of one IPv4 datagram at the head of a caller buffer.
///
/// The buffer may be longer than the datagram; the distance between the
/// datagram's total length and the buffer length is spare capacity that
/// payload rewrites are allowed to grow into.
pub struct Ipv4Packet<'a> {
    buf: &'a mut [u8],
    header_len: usize,
    total_len: usize,
}

impl<'a> Ipv4Packet<'a> {
    /// Parses the datagram at the head of `buf`.
    ///
    /// # Errors
    ///
    /// Returns an error when the buffer is shorter than the headers it
    /// claims to contain, is not IPv4, or carries inconsistent length
    /// fields.
    pub fn new(buf: &'a mut [u8]) -> Result<Self> {
        let header_len = Self::check_header(buf)?;

        let total_len = usize::from(u16::from_be_bytes([buf[2], buf[3]]));
        if total_len < header_len {
            return Err(AliasError::InvalidTotalLength(total_len));
        }
        if total_len > buf.len() {
            return Err(AliasError::Truncated {
                need: total_len,
                have: buf.len(),
            });
        }

        Ok(Self {
            buf,
            header_len,
            total_len,
        })
    }

    /// Parses the truncated datagram quoted inside an ICMP error message.
    ///
    /// Error messages carry the full IP header of the offending datagram
    /// plus at least its first 8 payload bytes; the quoted total-length
    /// field refers to the original datagram and is ignored here.
    pub fn new_quoted(buf: &'a mut [u8]) -> Result<Self> {
        let header_len = Self::check_header(buf)?;

        if buf.len() < header_len + 8 {
            return Err(AliasError::Truncated {
                need: header_len + 8,
                have: buf.len(),
            });
        }

        let total_len = buf.len();
        Ok(Self {
            buf,
            header_len,
            total_len,
        })
    }

    fn check_header(buf: &[u8]) -> Result<usize> {
        if buf.len() < IPV4_MIN_HEADER_LEN {
            return Err(AliasError::Truncated {
                need: IPV4_MIN_HEADER_LEN,
                have: buf.len(),
            });
        }

        let version = buf[0] >> 4;
        if version != 4 {
            return Err(AliasError::NotIpv4(version));
        }

        let header_len = usize::from(buf[0] & 0x0F) * 4;
        if header_len < IPV4_MIN_HEADER_LEN {
            return Err(AliasError::InvalidHeaderLength(header_len));
        }
        if header_len > buf.len() {
            return Err(AliasError::Truncated {
                need: header_len,
                have: buf.len(),
            });
        }

        Ok(header_len)
    }

    /// Header length in bytes.
    #[inline]
    #[must_use]
    pub const fn header_len(&self) -> usize {
        self.header_len
    }

    /// Datagram total length in bytes.
    #[inline]
    #[must_use]
    pub const fn total_len(&self) -> usize {
        self.total_len
    }

    /// Capacity of the underlying buffer.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Rewrites the total-length field, growing or shrinking the payload
    /// region.
    ///
    /// # Errors
    ///
    /// Returns an error when `len` does not cover the header or exceeds
    /// the buffer capacity.
    pub fn set_total_len(&mut self, len: usize) -> Result<()> {
        if len < self.header_len {
            return Err(AliasError::InvalidTotalLength(len));
        }
        if len > self.buf.len() {
            return Err(AliasError::CapacityExceeded {
                need: len,
                have: self.buf.len(),
            });
        }
        self.buf[2..4].copy_from_slice(&(len as u16).to_be_bytes());
        self.total_len = len;
        Ok(())
    }

    /// L4 protocol.
    #[inline]
    #[must_use]
    pub fn protocol(&self) -> Protocol {
        Protocol::from(self.buf[9])
    }

    /// IP identification field.
    #[inline]
    #[must_use]
    pub fn ident(&self) -> u16 {
        u16::from_be_bytes([self.buf[4], self.buf[5]])
    }

    /// True when the more-fragments flag is set.
    #[inline]
    #[must_use]
    pub fn more_fragments(&self) -> bool {
        self.buf[6] & 0x20 != 0
    }

    /// Fragment offset in 8-byte units.
    #[inline]
    #[must_use]
    pub fn fragment_offset(&self) -> u16 {
        u16::from_be_bytes([self.buf[6], self.buf[7]]) & 0x1FFF
    }

    /// Source address.
    #[inline]
    #[must_use]
    pub fn src(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.buf[12], self.buf[13], self.buf[14], self.buf[15])
    }

    /// Destination address.
    #[inline]
    #[must_use]
    pub fn dst(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.buf[16], self.buf[17], self.buf[18], self.buf[19])
    }

    /// Rewrites the source address.
    #[inline]
    pub fn set_src(&mut self, addr: Ipv4Addr) {
        self.buf[12..16].copy_from_slice(&addr.octets());
    }

    /// Rewrites the destination address.
    #[inline]
    pub fn set_dst(&mut self, addr: Ipv4Addr) {
        self.buf[16..20].copy_from_slice(&addr.octets());
    }

    /// Stored header checksum.
    #[inline]
    #[must_use]
    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.buf[10], self.buf[11]])
    }

    /// Rewrites the header checksum.
    #[inline]
    pub fn set_checksum(&mut self, sum: u16) {
        self.buf[10..12].copy_from_slice(&sum.to_be_bytes());
    }

    /// The IP header bytes.
    #[inline]
    #[must_use]
    pub fn header(&self) -> &[u8] {
        &self.buf[..self.header_len]
    }

    /// The L4 region (header + payload) of the datagram.
    #[inline]
    #[must_use]
    pub fn l4(&self) -> &[u8] {
        &self.buf[self.header_len..self.total_len]
    }

    /// Mutable L4 region of the datagram.
    #[inline]
    pub fn l4_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.header_len..self.total_len]
    }
}

/// Mutable view of a UDP header.
pub struct UdpHeader<'a> {
    buf: &'a mut [u8],
}

impl<'a> UdpHeader<'a> {
    /// Interprets the start of `buf` as a UDP header.
    ///
    /// # Errors
    ///
    /// Returns [`AliasError::Truncated`] when fewer than 8 bytes are
    /// present.
    pub fn new(buf: &'a mut [u8]) -> Result<Self> {
        if buf.len() < UDP_HEADER_LEN {
            return Err(AliasError::Truncated {
                need: UDP_HEADER_LEN,
                have: buf.len(),
            });
        }
        Ok(Self { buf })
    }

    /// Source port.
    #[inline]
    #[must_use]
    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes([self.buf[0], self.buf[1]])
    }

    /// Destination port.
    #[inline]
    #[must_use]
    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes([self.buf[2], self.buf[3]])
    }

    /// Stored checksum; 0 means the sender disabled checksumming.
    #[inline]
    #[must_use]
    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.buf[6], self.buf[7]])
    }

    /// Rewrites the source port.
    #[inline]
    pub fn set_src_port(&mut self, port: u16) {
        self.buf[0..2].copy_from_slice(&port.to_be_bytes());
    }

    /// Rewrites the destination port.
    #[inline]
    pub fn set_dst_port(&mut self, port: u16) {
        self.buf[2..4].copy_from_slice(&port.to_be_bytes());
    }

    /// Rewrites the checksum.
    #[inline]
    pub fn set_checksum(&mut self, sum: u16) {
        self.buf[6..8].copy_from_slice(&sum.to_be_bytes());
    }
}

/// Mutable view of a TCP header.
pub struct TcpHeader<'a> {
    buf: &'a mut [u8],
}

impl<'a> TcpHeader<'a> {
    /// FIN flag bit.
    pub const FLAG_FIN: u8 = 0x01;
    /// SYN flag bit.
    pub const FLAG_SYN: u8 = 0x02;
    /// RST flag bit.
    pub const FLAG_RST: u8 = 0x04;
    /// PSH flag bit.
    pub const FLAG_PSH: u8 = 0x08;
    /// ACK flag bit.
    pub const FLAG_ACK: u8 = 0x10;

    /// Interprets the start of `buf` as a TCP header.
    ///
    /// # Errors
    ///
    /// Returns [`AliasError::Truncated`] when fewer than 20 bytes are
    /// present.
    pub fn new(buf: &'a mut [u8]) -> Result<Self> {
        if buf.len() < TCP_MIN_HEADER_LEN {
            return Err(AliasError::Truncated {
                need: TCP_MIN_HEADER_LEN,
                have: buf.len(),
            });
        }
        Ok(Self { buf })
    }

    /// Source port.
    #[inline]
    #[must_use]
    pub fn src_port(&self) -> u16 {
        u16::from_be_bytes([self.buf[0], self.buf[1]])
    }

    /// Destination port.
    #[inline]
    #[must_use]
    pub fn dst_port(&self) -> u16 {
        u16::from_be_bytes([self.buf[2], self.buf[3]])
    }

    /// Sequence number.
    #[inline]
    #[must_use]
    pub fn seq(&self) -> u32 {
        u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]])
    }

    /// Acknowledgment number.
    #[inline]
    #[must_use]
    pub fn ack(&self) -> u32 {
        u32::from_be_bytes([self.buf[8], self.buf[9], self.buf[10], self.buf[11]])
    }

    /// Header length in bytes, from the data-offset field.
    #[inline]
    #[must_use]
    pub fn data_offset(&self) -> usize {
        usize::from(self.buf[12] >> 4) * 4
    }

    /// Flag bits.
    #[inline]
    #[must_use]
    pub fn flags(&self) -> u8 {
        self.buf[13]
    }

    /// Stored checksum.
    #[inline]
    #[must_use]
    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.buf[16], self.buf[17]])
    }

    /// Rewrites the source port.
    #[inline]
    pub fn set_src_port(&mut self, port: u16) {
        self.buf[0..2].copy_from_slice(&port.to_be_bytes());
    }

    /// Rewrites the destination port.
    #[inline]
    pub fn set_dst_port(&mut self, port: u16) {
        self.buf[2..4].copy_from_slice(&port.to_be_bytes());
    }

    /// Rewrites the sequence number.
    #[inline]
    pub fn set_seq(&mut self, seq: u32) {
        self.buf[4..8].copy_from_slice(&seq.to_be_bytes());
    }

    /// Rewrites the acknowledgment number.
    #[inline]
    pub fn set_ack(&mut self, ack: u32) {
        self.buf[8..12].copy_from_slice(&ack.to_be_bytes());
    }

    /// Rewrites the checksum.
    #[inline]
    pub fn set_checksum(&mut self, sum: u16) {
        self.buf[16..18].copy_from_slice(&sum.to_be_bytes());
    }
}

/// Mutable view of an ICMP header.
///
/// The identifier and sequence accessors read the rest-of-header word and
/// are only meaningful for echo and timestamp messages.
pub struct IcmpHeader<'a> {
    buf: &'a mut [u8],
}

impl<'a> IcmpHeader<'a> {
    /// Echo reply.
    pub const ECHO_REPLY: u8 = 0;
    /// Destination unreachable.
    pub const DEST_UNREACH: u8 = 3;
    /// Source quench.
    pub const SOURCE_QUENCH: u8 = 4;
    /// Echo request.
    pub const ECHO: u8 = 8;
    /// Time exceeded.
    pub const TIME_EXCEEDED: u8 = 11;
    /// Parameter problem.
    pub const PARAM_PROBLEM: u8 = 12;
    /// Timestamp request.
    pub const TIMESTAMP: u8 = 13;
    /// Timestamp reply.
    pub const TIMESTAMP_REPLY: u8 = 14;

    /// Interprets the start of `buf` as an ICMP header.
    ///
    /// # Errors
    ///
    /// Returns [`AliasError::Truncated`] when fewer than 8 bytes are
    /// present.
    pub fn new(buf: &'a mut [u8]) -> Result<Self> {
        if buf.len() < ICMP_HEADER_LEN {
            return Err(AliasError::Truncated {
                need: ICMP_HEADER_LEN,
                have: buf.len(),
            });
        }
        Ok(Self { buf })
    }

    /// Message type.
    #[inline]
    #[must_use]
    pub fn icmp_type(&self) -> u8 {
        self.buf[0]
    }

    /// Message code.
    #[inline]
    #[must_use]
    pub fn code(&self) -> u8 {
        self.buf[1]
    }

    /// Stored checksum.
    #[inline]
    #[must_use]
    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.buf[2], self.buf[3]])
    }

    /// Echo identifier.
    #[inline]
    #[must_use]
    pub fn ident(&self) -> u16 {
        u16::from_be_bytes([self.buf[4], self.buf[5]])
    }

    /// Echo sequence number.
    #[inline]
    #[must_use]
    pub fn seq(&self) -> u16 {
        u16::from_be_bytes([self.buf[6], self.buf[7]])
    }

    /// Rewrites the checksum.
    #[inline]
    pub fn set_checksum(&mut self, sum: u16) {
        self.buf[2..4].copy_from_slice(&sum.to_be_bytes());
    }

    /// Rewrites the echo sequence number.
    #[inline]
    pub fn set_seq(&mut self, seq: u16) {
        self.buf[6..8].copy_from_slice(&seq.to_be_bytes());
    }

    /// Message body after the 8-byte header; for error messages this is
    /// the quoted datagram.
    #[inline]
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buf[ICMP_HEADER_LEN..]
    }
}
