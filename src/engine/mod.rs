//! Packet aliasing engine.
//!
//! [`AliasEngine`] rewrites IPv4 datagrams in place so that flows from
//! many internal hosts appear to originate from a single alias address,
//! and replies find their way back to the host that opened the flow. The
//! engine owns a [`SessionTable`] and dispatches each datagram to the
//! translator for its protocol; fragments past the first are routed to
//! the fragment glue, which replays the decision recorded by the
//! header-carrying fragment.
//!
//! Processing is synchronous and bounded: one call, a handful of table
//! lookups, in-place rewrites, return. Session expiry runs out-of-band
//! via [`AliasEngine::expire`], never on the packet path.

mod fragment;
mod icmp;
mod tcp;
mod udp;

use std::net::Ipv4Addr;

use crate::checksum;
use crate::error::Result;
use crate::packet::{Ipv4Packet, Protocol};
use crate::table::{SessionTable, SessionTimeouts};

/// Outcome of one aliasing pass over a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasOutcome {
    /// Address, port or sequence fields were rewritten.
    Translated,
    /// No mapping applied; the packet is unchanged apart from the IP
    /// checksum refresh.
    PassThrough,
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct AliasConfig {
    /// Externally visible alias address.
    pub alias_addr: Ipv4Addr,
    /// First alias port handed out.
    pub port_start: u16,
    /// Last alias port handed out.
    pub port_end: u16,
    /// Session expiry timeouts.
    pub timeouts: SessionTimeouts,
    /// Whether FTP PORT commands on the control channel are rewritten.
    pub ftp_rewrite: bool,
}

impl AliasConfig {
    /// Creates a configuration with default port range and timeouts.
    #[must_use]
    pub fn new(alias_addr: Ipv4Addr) -> Self {
        Self {
            alias_addr,
            port_start: 49152,
            port_end: 65535,
            timeouts: SessionTimeouts::default(),
            ftp_rewrite: true,
        }
    }

    /// Sets the alias port range.
    #[must_use]
    pub const fn with_port_range(mut self, start: u16, end: u16) -> Self {
        self.port_start = start;
        self.port_end = end;
        self
    }

    /// Sets the session expiry timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: SessionTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Enables or disables FTP PORT-command rewriting.
    #[must_use]
    pub const fn with_ftp_rewrite(mut self, enabled: bool) -> Self {
        self.ftp_rewrite = enabled;
        self
    }
}

/// Packet aliasing engine.
pub struct AliasEngine {
    table: SessionTable,
    ftp_rewrite: bool,
}

impl AliasEngine {
    /// Creates a new engine.
    #[must_use]
    pub fn new(config: &AliasConfig) -> Self {
        Self {
            table: SessionTable::new(
                config.alias_addr,
                config.port_start,
                config.port_end,
                config.timeouts.clone(),
            ),
            ftp_rewrite: config.ftp_rewrite,
        }
    }

    /// Creates an engine with a specific alias address and defaults for
    /// everything else.
    #[must_use]
    pub fn with_alias_address(alias_addr: Ipv4Addr) -> Self {
        Self::new(&AliasConfig::new(alias_addr))
    }

    /// Borrows the session table.
    #[must_use]
    pub const fn table(&self) -> &SessionTable {
        &self.table
    }

    /// Mutably borrows the session table.
    pub fn table_mut(&mut self) -> &mut SessionTable {
        &mut self.table
    }

    /// Removes idle sessions; intended to be driven periodically by the
    /// host, outside the packet path.
    pub fn expire(&mut self) -> usize {
        self.table.expire()
    }

    /// Translates an outbound datagram in place.
    ///
    /// The datagram occupies the head of `buf`; its length is taken from
    /// the IP total-length field, and any remaining buffer space is spare
    /// capacity for payload rewrites.
    ///
    /// # Errors
    ///
    /// Returns an error for packets too malformed to interpret. Unknown
    /// protocols and unmapped flows are not errors; they pass through.
    pub fn alias_out(&mut self, buf: &mut [u8]) -> Result<AliasOutcome> {
        let mut pkt = Ipv4Packet::new(buf)?;
        let checksum_was_valid = checksum::checksum(pkt.header()) == 0;

        let outcome = if pkt.fragment_offset() == 0 {
            match pkt.protocol() {
                Protocol::Icmp => icmp::alias_out(&mut self.table, &mut pkt)?,
                Protocol::Udp => udp::alias_out(&mut self.table, &mut pkt)?,
                Protocol::Tcp => tcp::alias_out(&mut self.table, &mut pkt, self.ftp_rewrite)?,
                Protocol::Unknown => AliasOutcome::PassThrough,
            }
        } else {
            fragment::alias_out(&self.table, &mut pkt)
        };

        if checksum_was_valid {
            refresh_ip_checksum(&mut pkt);
        }
        Ok(outcome)
    }

    /// Translates an inbound datagram in place.
    ///
    /// # Errors
    ///
    /// Returns an error for packets too malformed to interpret. Unknown
    /// protocols and unmapped flows are not errors; they pass through.
    pub fn alias_in(&mut self, buf: &mut [u8]) -> Result<AliasOutcome> {
        let mut pkt = Ipv4Packet::new(buf)?;
        let checksum_was_valid = checksum::checksum(pkt.header()) == 0;

        let outcome = if pkt.fragment_offset() == 0 {
            let outcome = match pkt.protocol() {
                Protocol::Icmp => icmp::alias_in(&mut self.table, &mut pkt)?,
                Protocol::Udp => udp::alias_in(&mut self.table, &mut pkt)?,
                Protocol::Tcp => tcp::alias_in(&mut self.table, &mut pkt)?,
                Protocol::Unknown => AliasOutcome::PassThrough,
            };

            // Later fragments of this datagram carry no transport header;
            // record the decision so they are rewritten identically.
            if outcome == AliasOutcome::Translated && pkt.more_fragments() {
                self.table
                    .add_fragment(pkt.src(), pkt.ident(), pkt.protocol(), pkt.dst());
            }
            outcome
        } else {
            fragment::alias_in(&mut self.table, &mut pkt)
        };

        if checksum_was_valid {
            refresh_ip_checksum(&mut pkt);
        }
        Ok(outcome)
    }
}

impl std::fmt::Debug for AliasEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AliasEngine")
            .field("alias_addr", &self.table.alias_address())
            .field("links", &self.table.len())
            .finish()
    }
}

fn refresh_ip_checksum(pkt: &mut Ipv4Packet<'_>) {
    pkt.set_checksum(0);
    let sum = checksum::ipv4_header_checksum(pkt.header());
    pkt.set_checksum(sum);
}
