//! ICMP translation.
//!
//! Echo and timestamp exchanges are aliased on the sequence number: the
//! outbound request gets a fresh alias sequence, and the matching reply
//! restores the original before the link is deleted again. Exchanges are
//! one-shot; a reply consumes its mapping.
//!
//! Error messages (unreachable, source quench, time exceeded, parameter
//! problem) quote the offending datagram. The quotation is the packet our
//! internal host sent, as it looked *after* aliasing, so the embedded
//! destination and ports identify the existing outbound link; both the
//! quoted header and the outer message are rewritten so the internal host
//! recognizes its own datagram.

use std::net::Ipv4Addr;

use crate::checksum::ChecksumDelta;
use crate::engine::AliasOutcome;
use crate::error::Result;
use crate::packet::{IcmpHeader, Ipv4Packet, Protocol, UdpHeader};
use crate::table::SessionTable;

pub(super) fn alias_out(table: &mut SessionTable, pkt: &mut Ipv4Packet<'_>) -> Result<AliasOutcome> {
    let src = pkt.src();
    let dst = pkt.dst();
    let alias_addr = table.alias_address();

    let (icmp_type, code, ident, seq, icmp_sum) = {
        let icmp = IcmpHeader::new(pkt.l4_mut())?;
        (
            icmp.icmp_type(),
            icmp.code(),
            icmp.ident(),
            icmp.seq(),
            icmp.checksum(),
        )
    };

    if (icmp_type != IcmpHeader::ECHO && icmp_type != IcmpHeader::TIMESTAMP) || code != 0 {
        return Ok(AliasOutcome::PassThrough);
    }

    let id = table.find_icmp_out(src, dst, ident, seq);
    let Some(link) = table.link(id) else {
        return Ok(AliasOutcome::PassThrough);
    };
    let alias_seq = link.alias_port();

    let sum = ChecksumDelta::new()
        .old_u16(seq)
        .new_u16(alias_seq)
        .apply(icmp_sum);
    {
        let mut icmp = IcmpHeader::new(pkt.l4_mut())?;
        icmp.set_checksum(sum);
        icmp.set_seq(alias_seq);
    }
    pkt.set_src(alias_addr);

    tracing::trace!(%src, ident, seq, alias_seq, "aliased outbound ICMP request");
    Ok(AliasOutcome::Translated)
}

pub(super) fn alias_in(table: &mut SessionTable, pkt: &mut Ipv4Packet<'_>) -> Result<AliasOutcome> {
    let (icmp_type, code) = {
        let icmp = IcmpHeader::new(pkt.l4_mut())?;
        (icmp.icmp_type(), icmp.code())
    };

    let is_reply = icmp_type == IcmpHeader::ECHO_REPLY || icmp_type == IcmpHeader::TIMESTAMP_REPLY;
    let is_error = icmp_type == IcmpHeader::DEST_UNREACH
        || icmp_type == IcmpHeader::SOURCE_QUENCH
        || icmp_type == IcmpHeader::TIME_EXCEEDED
        || icmp_type == IcmpHeader::PARAM_PROBLEM;

    if is_reply && code == 0 {
        alias_in_reply(table, pkt)
    } else if is_error {
        alias_in_error(table, pkt)
    } else {
        Ok(AliasOutcome::PassThrough)
    }
}

fn alias_in_reply(table: &mut SessionTable, pkt: &mut Ipv4Packet<'_>) -> Result<AliasOutcome> {
    let src = pkt.src();

    let (ident, alias_seq, icmp_sum) = {
        let icmp = IcmpHeader::new(pkt.l4_mut())?;
        (icmp.ident(), icmp.seq(), icmp.checksum())
    };

    let Some(id) = table.find_icmp_in(src, ident, alias_seq) else {
        return Ok(AliasOutcome::PassThrough);
    };
    let Some(link) = table.link(id) else {
        return Ok(AliasOutcome::PassThrough);
    };
    let orig_addr = link.original_addr();
    // Echo links keep the original sequence number in the remote-port slot.
    let orig_seq = link.remote_port();

    let sum = ChecksumDelta::new()
        .old_u16(alias_seq)
        .new_u16(orig_seq)
        .apply(icmp_sum);
    {
        let mut icmp = IcmpHeader::new(pkt.l4_mut())?;
        icmp.set_checksum(sum);
        icmp.set_seq(orig_seq);
    }
    pkt.set_dst(orig_addr);

    // Request/reply exchanges are one-shot; the mapping is spent.
    table.delete_link(id);

    tracing::trace!(%orig_addr, ident, orig_seq, "restored inbound ICMP reply");
    Ok(AliasOutcome::Translated)
}

/// Fields of the quoted datagram needed to locate and rewrite the link.
struct Quoted {
    protocol: Protocol,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    /// Source port (ICMP: echo identifier).
    src_field: u16,
    /// Destination port (ICMP: aliased sequence number).
    dst_field: u16,
}

fn alias_in_error(table: &mut SessionTable, pkt: &mut Ipv4Packet<'_>) -> Result<AliasOutcome> {
    let quoted = {
        let mut icmp = IcmpHeader::new(pkt.l4_mut())?;
        match read_quoted(icmp.payload_mut()) {
            Some(q) => q,
            // A quotation too short to interpret leaves the message as-is.
            None => return Ok(AliasOutcome::PassThrough),
        }
    };

    // The quoted datagram was outbound and already aliased: its source is
    // the alias address and its source port the alias port, so the reply
    // map keyed by (quoted destination, quoted destination port, alias
    // port) identifies the link.
    let found = match quoted.protocol {
        Protocol::Udp => table.find_udp_in(quoted.dst, quoted.dst_field, quoted.src_field),
        Protocol::Tcp => table.find_tcp_in(quoted.dst, quoted.dst_field, quoted.src_field),
        Protocol::Icmp => table.find_icmp_in(quoted.dst, quoted.src_field, quoted.dst_field),
        Protocol::Unknown => None,
    };
    let Some(id) = found else {
        return Ok(AliasOutcome::PassThrough);
    };
    let Some(link) = table.link(id) else {
        return Ok(AliasOutcome::PassThrough);
    };
    let orig_addr = link.original_addr();
    let orig_port = match quoted.protocol {
        // Echo links keep the original sequence number in the remote-port
        // slot; transport links keep the original source port.
        Protocol::Icmp => link.remote_port(),
        _ => link.original_port(),
    };

    // The outer ICMP checksum covers the quoted bytes, so every quoted
    // half-word rewritten below goes through the same accumulator.
    let (old_field, new_field) = match quoted.protocol {
        Protocol::Icmp => (quoted.dst_field, orig_port),
        _ => (quoted.src_field, orig_port),
    };
    let delta = ChecksumDelta::new()
        .old_u16(old_field)
        .new_u16(new_field)
        .old_addr(quoted.src)
        .new_addr(orig_addr);

    {
        let mut icmp = IcmpHeader::new(pkt.l4_mut())?;
        let sum = delta.apply(icmp.checksum());
        rewrite_quoted(icmp.payload_mut(), quoted.protocol, orig_addr, orig_port)?;
        icmp.set_checksum(sum);
    }
    pkt.set_dst(orig_addr);

    tracing::debug!(
        %orig_addr,
        protocol = ?quoted.protocol,
        "restored inbound ICMP error message"
    );
    Ok(AliasOutcome::Translated)
}

/// Reads the fields of the quoted datagram; `None` when the quotation is
/// too short to interpret.
fn read_quoted(payload: &mut [u8]) -> Option<Quoted> {
    let mut quoted = Ipv4Packet::new_quoted(payload).ok()?;
    let protocol = quoted.protocol();
    let src = quoted.src();
    let dst = quoted.dst();

    let (src_field, dst_field) = match protocol {
        Protocol::Udp => {
            let udp = UdpHeader::new(quoted.l4_mut()).ok()?;
            (udp.src_port(), udp.dst_port())
        }
        Protocol::Tcp => {
            // Only the port pair is needed; the quotation may be shorter
            // than a full TCP header, so read the first 8 bytes the same
            // way UDP does.
            let l4 = quoted.l4_mut();
            let view = UdpHeader::new(l4).ok()?;
            (view.src_port(), view.dst_port())
        }
        Protocol::Icmp => {
            let icmp = IcmpHeader::new(quoted.l4_mut()).ok()?;
            if icmp.icmp_type() != IcmpHeader::ECHO && icmp.icmp_type() != IcmpHeader::TIMESTAMP {
                return None;
            }
            (icmp.ident(), icmp.seq())
        }
        Protocol::Unknown => return None,
    };

    Some(Quoted {
        protocol,
        src,
        dst,
        src_field,
        dst_field,
    })
}

/// Rewrites the quoted datagram's source address and port (ICMP: sequence
/// number) to the original values.
fn rewrite_quoted(
    payload: &mut [u8],
    protocol: Protocol,
    orig_addr: Ipv4Addr,
    orig_port: u16,
) -> Result<()> {
    let mut quoted = Ipv4Packet::new_quoted(payload)?;
    quoted.set_src(orig_addr);
    match protocol {
        Protocol::Udp | Protocol::Tcp => {
            let mut view = UdpHeader::new(quoted.l4_mut())?;
            view.set_src_port(orig_port);
        }
        Protocol::Icmp => {
            let mut icmp = IcmpHeader::new(quoted.l4_mut())?;
            icmp.set_seq(orig_port);
        }
        Protocol::Unknown => {}
    }
    Ok(())
}
