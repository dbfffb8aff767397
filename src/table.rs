//! NAT session table.
//!
//! Owns every piece of state the translators consult: translation links
//! with their alias ports, per-direction TCP states and sequence-shift
//! records, the alias port pool, and fragment records for datagrams whose
//! later fragments carry no transport header.
//!
//! Links are addressed through opaque [`LinkId`] handles. Two hash maps
//! index the link store: a flow map keyed by the connection as seen on the
//! internal side, and a reply map keyed by the connection as seen from the
//! external side. Lookups that hit refresh the link's idle timer; reaping
//! happens only in the [`expire`](SessionTable::expire) sweep, never on
//! the packet path.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use hashbrown::HashMap;

use crate::packet::Protocol;

/// Opaque handle to one translation link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId(u64);

/// Per-direction TCP session state.
///
/// Strictly monotonic: a direction moves forward through
/// `Unseen -> SynSeen -> Closing` and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum TcpState {
    /// No segment observed yet.
    #[default]
    Unseen = 0,
    /// A SYN has been observed.
    SynSeen = 1,
    /// A FIN or RST has been observed.
    Closing = 2,
}

/// Timeouts applied by the expiry sweep.
#[derive(Debug, Clone)]
pub struct SessionTimeouts {
    /// Idle timeout for UDP links.
    pub udp: Duration,
    /// Idle timeout for ICMP echo/timestamp links.
    pub icmp: Duration,
    /// Lifetime of fragment records.
    pub fragment: Duration,
    /// Idle timeout for TCP links with traffic seen in both directions.
    pub tcp_established: Duration,
    /// Idle timeout for half-open or half-closed TCP links.
    pub tcp_transitory: Duration,
    /// Grace period after both directions of a TCP link reached
    /// [`TcpState::Closing`].
    pub tcp_grace: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            udp: Duration::from_secs(300),
            icmp: Duration::from_secs(60),
            fragment: Duration::from_secs(30),
            tcp_established: Duration::from_secs(7200),
            tcp_transitory: Duration::from_secs(240),
            tcp_grace: Duration::from_secs(10),
        }
    }
}

/// Flow key: the connection as seen on the internal side.
///
/// For ICMP echo links `src_port` carries the echo identifier and
/// `dst_port` the original sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FlowKey {
    protocol: Protocol,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
}

/// Reply key: the connection as seen from the external side.
///
/// For ICMP echo links `remote_port` carries the echo identifier and
/// `alias_port` the aliased sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ReplyKey {
    protocol: Protocol,
    remote: Ipv4Addr,
    remote_port: u16,
    alias_port: u16,
}

/// One sequence-shift record.
///
/// From `position` (original sequence space) onward, the stream as seen
/// by the external peer is displaced by `shift` bytes.
#[derive(Debug, Clone, Copy)]
struct SeqShift {
    position: u32,
    shift: i32,
}

/// Shift records kept per TCP link; the oldest is dropped beyond this.
const MAX_SEQ_SHIFTS: usize = 4;

/// Wraparound-safe sequence comparison: true when `a` is at or after `b`.
#[inline]
const fn seq_at_or_after(a: u32, b: u32) -> bool {
    a.wrapping_sub(b) as i32 >= 0
}

/// One translation link (NAT session record).
///
/// ICMP echo/timestamp links overload the transport port slots:
/// `orig_port` holds the echo identifier, `remote_port` the original
/// sequence number, and `alias_port` the aliased sequence number.
#[derive(Debug)]
pub struct Link {
    protocol: Protocol,
    orig_addr: Ipv4Addr,
    remote_addr: Ipv4Addr,
    orig_port: u16,
    remote_port: u16,
    alias_port: u16,
    state_in: TcpState,
    state_out: TcpState,
    ack_modified: bool,
    seq_shifts: Vec<SeqShift>,
    last_seen: Instant,
    closed_at: Option<Instant>,
}

impl Link {
    fn new(
        protocol: Protocol,
        orig_addr: Ipv4Addr,
        remote_addr: Ipv4Addr,
        orig_port: u16,
        remote_port: u16,
        alias_port: u16,
    ) -> Self {
        Self {
            protocol,
            orig_addr,
            remote_addr,
            orig_port,
            remote_port,
            alias_port,
            state_in: TcpState::Unseen,
            state_out: TcpState::Unseen,
            ack_modified: false,
            seq_shifts: Vec::new(),
            last_seen: Instant::now(),
            closed_at: None,
        }
    }

    /// Link protocol.
    #[inline]
    #[must_use]
    pub const fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Internal host address restored on inbound traffic.
    #[inline]
    #[must_use]
    pub const fn original_addr(&self) -> Ipv4Addr {
        self.orig_addr
    }

    /// External peer address.
    #[inline]
    #[must_use]
    pub const fn remote_addr(&self) -> Ipv4Addr {
        self.remote_addr
    }

    /// Internal host port (ICMP: echo identifier).
    #[inline]
    #[must_use]
    pub const fn original_port(&self) -> u16 {
        self.orig_port
    }

    /// External peer port (ICMP: original sequence number).
    #[inline]
    #[must_use]
    pub const fn remote_port(&self) -> u16 {
        self.remote_port
    }

    /// Externally visible alias port (ICMP: aliased sequence number).
    #[inline]
    #[must_use]
    pub const fn alias_port(&self) -> u16 {
        self.alias_port
    }

    /// Inbound-direction TCP state.
    #[inline]
    #[must_use]
    pub const fn state_in(&self) -> TcpState {
        self.state_in
    }

    /// Outbound-direction TCP state.
    #[inline]
    #[must_use]
    pub const fn state_out(&self) -> TcpState {
        self.state_out
    }

    /// Advances the inbound-direction TCP state; regressions are ignored.
    pub fn set_state_in(&mut self, state: TcpState) {
        if state > self.state_in {
            self.state_in = state;
            self.note_closed();
        }
    }

    /// Advances the outbound-direction TCP state; regressions are ignored.
    pub fn set_state_out(&mut self, state: TcpState) {
        if state > self.state_out {
            self.state_out = state;
            self.note_closed();
        }
    }

    fn note_closed(&mut self) {
        if self.state_in == TcpState::Closing
            && self.state_out == TcpState::Closing
            && self.closed_at.is_none()
        {
            self.closed_at = Some(Instant::now());
        }
    }

    /// True once a payload rewrite has displaced this link's stream.
    #[inline]
    #[must_use]
    pub const fn ack_modified(&self) -> bool {
        self.ack_modified
    }

    /// Records that stream bytes from `position` (original sequence
    /// space) onward are displaced by `shift` bytes in the peer's view.
    ///
    /// `shift` is the total displacement at that point, not the change
    /// relative to the previous record.
    pub fn push_seq_shift(&mut self, position: u32, shift: i32) {
        self.ack_modified = true;
        if self.seq_shifts.len() == MAX_SEQ_SHIFTS {
            self.seq_shifts.remove(0);
        }
        self.seq_shifts.push(SeqShift { position, shift });
    }

    /// Displacement to add to an outbound sequence number.
    #[must_use]
    pub fn delta_seq_out(&self, seq: u32) -> i32 {
        let mut best: Option<SeqShift> = None;
        for rec in &self.seq_shifts {
            if seq_at_or_after(seq, rec.position)
                && best.is_none_or(|b| seq_at_or_after(rec.position, b.position))
            {
                best = Some(*rec);
            }
        }
        best.map_or(0, |rec| rec.shift)
    }

    /// Displacement to subtract from an inbound acknowledgment number.
    ///
    /// `ack` is in the peer's (displaced) numbering, so a record applies
    /// once the acknowledgment covers its displaced position.
    #[must_use]
    pub fn delta_ack_in(&self, ack: u32) -> i32 {
        let mut best: Option<SeqShift> = None;
        for rec in &self.seq_shifts {
            let displaced = rec.position.wrapping_add(rec.shift as u32);
            if seq_at_or_after(ack, displaced)
                && best.is_none_or(|b| seq_at_or_after(rec.position, b.position))
            {
                best = Some(*rec);
            }
        }
        best.map_or(0, |rec| rec.shift)
    }
}

/// Fragment record: the translation decision for a fragment train.
#[derive(Debug, Clone, Copy)]
struct FragmentRecord {
    dst: Ipv4Addr,
    protocol: Protocol,
    created: Instant,
}

/// Plain counters over table activity.
#[derive(Debug, Default, Clone, Copy)]
pub struct TableStats {
    /// Links created.
    pub links_created: u64,
    /// Links removed by the expiry sweep.
    pub links_expired: u64,
    /// Lookup operations.
    pub lookups: u64,
    /// Lookups that found no link.
    pub misses: u64,
}

/// NAT session table.
pub struct SessionTable {
    alias_addr: Ipv4Addr,
    links: HashMap<LinkId, Link>,
    by_flow: HashMap<FlowKey, LinkId>,
    by_reply: HashMap<ReplyKey, LinkId>,
    fragments: HashMap<(Ipv4Addr, u16), FragmentRecord>,
    next_id: u64,
    port_start: u16,
    port_end: u16,
    next_port: u16,
    next_icmp_seq: u16,
    timeouts: SessionTimeouts,
    stats: TableStats,
}

impl SessionTable {
    /// Creates a table translating to `alias_addr`, allocating alias
    /// ports from `port_start..=port_end`.
    #[must_use]
    pub fn new(
        alias_addr: Ipv4Addr,
        port_start: u16,
        port_end: u16,
        timeouts: SessionTimeouts,
    ) -> Self {
        let (port_start, port_end) = if port_start <= port_end {
            (port_start, port_end)
        } else {
            (port_end, port_start)
        };

        Self {
            alias_addr,
            links: HashMap::new(),
            by_flow: HashMap::new(),
            by_reply: HashMap::new(),
            fragments: HashMap::new(),
            next_id: 0,
            port_start,
            port_end,
            next_port: port_start,
            next_icmp_seq: 0,
            timeouts,
            stats: TableStats::default(),
        }
    }

    /// The externally visible alias address.
    #[inline]
    #[must_use]
    pub const fn alias_address(&self) -> Ipv4Addr {
        self.alias_addr
    }

    /// Finds or creates the link for an outbound UDP flow.
    pub fn find_udp_out(
        &mut self,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
    ) -> LinkId {
        self.find_out(FlowKey {
            protocol: Protocol::Udp,
            src,
            dst,
            src_port,
            dst_port,
        })
    }

    /// Finds or creates the link for an outbound TCP flow.
    pub fn find_tcp_out(
        &mut self,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
    ) -> LinkId {
        self.find_out(FlowKey {
            protocol: Protocol::Tcp,
            src,
            dst,
            src_port,
            dst_port,
        })
    }

    /// Finds or creates the link for an outbound ICMP echo/timestamp
    /// exchange, keyed by identifier and original sequence number.
    pub fn find_icmp_out(&mut self, src: Ipv4Addr, dst: Ipv4Addr, ident: u16, seq: u16) -> LinkId {
        self.find_out(FlowKey {
            protocol: Protocol::Icmp,
            src,
            dst,
            src_port: ident,
            dst_port: seq,
        })
    }

    /// Finds the link for an inbound UDP datagram; never creates one.
    pub fn find_udp_in(
        &mut self,
        remote: Ipv4Addr,
        remote_port: u16,
        alias_port: u16,
    ) -> Option<LinkId> {
        self.find_in(ReplyKey {
            protocol: Protocol::Udp,
            remote,
            remote_port,
            alias_port,
        })
    }

    /// Finds the link for an inbound TCP segment; never creates one.
    pub fn find_tcp_in(
        &mut self,
        remote: Ipv4Addr,
        remote_port: u16,
        alias_port: u16,
    ) -> Option<LinkId> {
        self.find_in(ReplyKey {
            protocol: Protocol::Tcp,
            remote,
            remote_port,
            alias_port,
        })
    }

    /// Finds the link for an inbound ICMP reply, keyed by the peer
    /// address, echo identifier and aliased sequence number.
    pub fn find_icmp_in(
        &mut self,
        remote: Ipv4Addr,
        ident: u16,
        alias_seq: u16,
    ) -> Option<LinkId> {
        self.find_in(ReplyKey {
            protocol: Protocol::Icmp,
            remote,
            remote_port: ident,
            alias_port: alias_seq,
        })
    }

    fn find_out(&mut self, key: FlowKey) -> LinkId {
        self.stats.lookups += 1;

        if let Some(&id) = self.by_flow.get(&key) {
            if let Some(link) = self.links.get_mut(&id) {
                link.last_seen = Instant::now();
            }
            return id;
        }

        self.stats.misses += 1;
        self.create_link(key)
    }

    fn find_in(&mut self, key: ReplyKey) -> Option<LinkId> {
        self.stats.lookups += 1;

        match self.by_reply.get(&key) {
            Some(&id) => {
                if let Some(link) = self.links.get_mut(&id) {
                    link.last_seen = Instant::now();
                }
                Some(id)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    fn create_link(&mut self, key: FlowKey) -> LinkId {
        let alias_port = match key.protocol {
            Protocol::Icmp => self.allocate_icmp_seq(key.dst, key.src_port),
            _ => self.allocate_port(key.protocol, key.dst, key.dst_port),
        };

        let link = Link::new(
            key.protocol,
            key.src,
            key.dst,
            key.src_port,
            key.dst_port,
            alias_port,
        );

        let id = LinkId(self.next_id);
        self.next_id += 1;

        self.by_flow.insert(key, id);
        self.by_reply.insert(Self::reply_key_of(&link), id);
        self.links.insert(id, link);
        self.stats.links_created += 1;

        tracing::debug!(
            ?id,
            protocol = ?key.protocol,
            src = %key.src,
            dst = %key.dst,
            alias_port,
            "created translation link"
        );

        id
    }

    fn flow_key_of(link: &Link) -> FlowKey {
        FlowKey {
            protocol: link.protocol,
            src: link.orig_addr,
            dst: link.remote_addr,
            src_port: link.orig_port,
            dst_port: link.remote_port,
        }
    }

    fn reply_key_of(link: &Link) -> ReplyKey {
        // ICMP reply keys carry the echo identifier, which lives in the
        // original-port slot of the link.
        let remote_port = match link.protocol {
            Protocol::Icmp => link.orig_port,
            _ => link.remote_port,
        };
        ReplyKey {
            protocol: link.protocol,
            remote: link.remote_addr,
            remote_port,
            alias_port: link.alias_port,
        }
    }

    /// Allocates an alias port whose reply key is not already taken for
    /// this peer.
    fn allocate_port(&mut self, protocol: Protocol, remote: Ipv4Addr, remote_port: u16) -> u16 {
        let range = usize::from(self.port_end - self.port_start) + 1;
        for _ in 0..range {
            let candidate = self.next_port;
            self.next_port = if self.next_port == self.port_end {
                self.port_start
            } else {
                self.next_port + 1
            };

            let probe = ReplyKey {
                protocol,
                remote,
                remote_port,
                alias_port: candidate,
            };
            if !self.by_reply.contains_key(&probe) {
                return candidate;
            }
        }

        tracing::warn!(%remote, remote_port, "alias port range exhausted for peer");
        self.next_port
    }

    /// Allocates an alias sequence number for an echo exchange with this
    /// peer and identifier.
    fn allocate_icmp_seq(&mut self, remote: Ipv4Addr, ident: u16) -> u16 {
        for _ in 0..=usize::from(u16::MAX) {
            let candidate = self.next_icmp_seq;
            self.next_icmp_seq = self.next_icmp_seq.wrapping_add(1);

            let probe = ReplyKey {
                protocol: Protocol::Icmp,
                remote,
                remote_port: ident,
                alias_port: candidate,
            };
            if !self.by_reply.contains_key(&probe) {
                return candidate;
            }
        }

        tracing::warn!(%remote, ident, "alias sequence space exhausted for peer");
        self.next_icmp_seq
    }

    /// Borrows a link.
    #[inline]
    #[must_use]
    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.links.get(&id)
    }

    /// Mutably borrows a link.
    #[inline]
    pub fn link_mut(&mut self, id: LinkId) -> Option<&mut Link> {
        self.links.get_mut(&id)
    }

    /// Removes a link and its index entries.
    pub fn delete_link(&mut self, id: LinkId) {
        if let Some(link) = self.links.remove(&id) {
            self.by_flow.remove(&Self::flow_key_of(&link));
            self.by_reply.remove(&Self::reply_key_of(&link));
            tracing::trace!(?id, "deleted translation link");
        }
    }

    /// Records the translation decision for a fragment train.
    pub fn add_fragment(&mut self, src: Ipv4Addr, ident: u16, protocol: Protocol, dst: Ipv4Addr) {
        self.fragments.insert(
            (src, ident),
            FragmentRecord {
                dst,
                protocol,
                created: Instant::now(),
            },
        );
    }

    /// Destination recorded for a fragment train, if any.
    #[must_use]
    pub fn fragment_dst(&self, src: Ipv4Addr, ident: u16, protocol: Protocol) -> Option<Ipv4Addr> {
        self.fragments
            .get(&(src, ident))
            .filter(|rec| rec.protocol == protocol)
            .map(|rec| rec.dst)
    }

    /// Number of live links.
    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// True when no links are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Counters snapshot.
    #[must_use]
    pub const fn stats(&self) -> TableStats {
        self.stats
    }

    /// Removes idle links and stale fragment records. Returns the number
    /// of links removed.
    pub fn expire(&mut self) -> usize {
        let now = Instant::now();
        let timeouts = self.timeouts.clone();

        let expired: Vec<LinkId> = self
            .links
            .iter()
            .filter(|(_, link)| Self::link_expired(&timeouts, link, now))
            .map(|(&id, _)| id)
            .collect();

        for &id in &expired {
            self.delete_link(id);
        }
        self.stats.links_expired += expired.len() as u64;

        self.fragments
            .retain(|_, rec| now.duration_since(rec.created) < timeouts.fragment);

        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "expired idle links");
        }
        expired.len()
    }

    fn link_expired(timeouts: &SessionTimeouts, link: &Link, now: Instant) -> bool {
        let idle = now.duration_since(link.last_seen);
        match link.protocol {
            Protocol::Icmp => idle >= timeouts.icmp,
            Protocol::Udp => idle >= timeouts.udp,
            Protocol::Tcp => {
                if link.state_in == TcpState::Closing && link.state_out == TcpState::Closing {
                    link.closed_at
                        .is_none_or(|at| now.duration_since(at) >= timeouts.tcp_grace)
                } else if link.state_in == TcpState::SynSeen && link.state_out == TcpState::SynSeen
                {
                    idle >= timeouts.tcp_established
                } else {
                    idle >= timeouts.tcp_transitory
                }
            }
            Protocol::Unknown => true,
        }
    }
}

impl std::fmt::Debug for SessionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTable")
            .field("alias_addr", &self.alias_addr)
            .field("links", &self.links.len())
            .field("fragments", &self.fragments.len())
            .finish()
    }
}
