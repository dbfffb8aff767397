//! TCP translation and connection-state tracking.
//!
//! Beyond the address/port rewrite, two concerns are TCP-specific: the
//! per-direction state machine that drives session expiry, and the
//! sequence/acknowledgment compensation required once an FTP payload
//! rewrite has changed the length of the byte stream.

use crate::checksum::ChecksumDelta;
use crate::engine::AliasOutcome;
use crate::error::Result;
use crate::ftp;
use crate::packet::{Ipv4Packet, TcpHeader};
use crate::table::{SessionTable, TcpState};

/// Advances one direction of the per-link state machine for an observed
/// segment: `Unseen -> SynSeen` on SYN, `SynSeen -> Closing` on FIN or
/// RST. `Closing` is terminal; reaping is the expiry sweep's job.
fn next_state(current: TcpState, flags: u8) -> TcpState {
    match current {
        TcpState::Unseen if flags & TcpHeader::FLAG_SYN != 0 => TcpState::SynSeen,
        TcpState::SynSeen if flags & (TcpHeader::FLAG_FIN | TcpHeader::FLAG_RST) != 0 => {
            TcpState::Closing
        }
        other => other,
    }
}

pub(super) fn alias_out(
    table: &mut SessionTable,
    pkt: &mut Ipv4Packet<'_>,
    ftp_rewrite: bool,
) -> Result<AliasOutcome> {
    let src = pkt.src();
    let dst = pkt.dst();
    let alias_addr = table.alias_address();

    let (src_port, dst_port, seq, flags) = {
        let tcp = TcpHeader::new(pkt.l4_mut())?;
        (tcp.src_port(), tcp.dst_port(), tcp.seq(), tcp.flags())
    };

    let id = table.find_tcp_out(src, dst, src_port, dst_port);
    {
        let Some(link) = table.link_mut(id) else {
            return Ok(AliasOutcome::PassThrough);
        };
        let state = next_state(link.state_out(), flags);
        link.set_state_out(state);
    }

    // The control-channel rewrite must run before the final checksum
    // pass: it may resize the payload and record a stream displacement
    // that the sequence-number compensation below has to honor.
    if ftp_rewrite
        && (src_port == ftp::FTP_CONTROL_PORT || dst_port == ftp::FTP_CONTROL_PORT)
    {
        ftp::rewrite_port_command(table, id, pkt)?;
    }

    let (alias_port, seq_shift) = {
        let Some(link) = table.link(id) else {
            return Ok(AliasOutcome::PassThrough);
        };
        let shift = if link.ack_modified() {
            link.delta_seq_out(seq)
        } else {
            0
        };
        (link.alias_port(), shift)
    };

    let mut delta = ChecksumDelta::new()
        .old_u16(src_port)
        .new_u16(alias_port)
        .old_addr(src)
        .new_addr(alias_addr);

    let new_seq = (seq_shift != 0).then(|| seq.wrapping_add(seq_shift as u32));
    if let Some(ns) = new_seq {
        delta = delta.old_u32(seq).new_u32(ns);
    }

    {
        let mut tcp = TcpHeader::new(pkt.l4_mut())?;
        let sum = delta.apply(tcp.checksum());
        tcp.set_checksum(sum);
        if let Some(ns) = new_seq {
            tcp.set_seq(ns);
        }
        tcp.set_src_port(alias_port);
    }
    pkt.set_src(alias_addr);

    tracing::trace!(%src, src_port, alias_port, "aliased outbound TCP segment");
    Ok(AliasOutcome::Translated)
}

pub(super) fn alias_in(table: &mut SessionTable, pkt: &mut Ipv4Packet<'_>) -> Result<AliasOutcome> {
    let src = pkt.src();
    let dst = pkt.dst();

    let (src_port, dst_port, ack, flags) = {
        let tcp = TcpHeader::new(pkt.l4_mut())?;
        (tcp.src_port(), tcp.dst_port(), tcp.ack(), tcp.flags())
    };

    let Some(id) = table.find_tcp_in(src, src_port, dst_port) else {
        return Ok(AliasOutcome::PassThrough);
    };
    let (orig_addr, orig_port, ack_shift) = {
        let Some(link) = table.link(id) else {
            return Ok(AliasOutcome::PassThrough);
        };
        let shift = if link.ack_modified() {
            link.delta_ack_in(ack)
        } else {
            0
        };
        (link.original_addr(), link.original_port(), shift)
    };

    let mut delta = ChecksumDelta::new()
        .old_u16(dst_port)
        .new_u16(orig_port)
        .old_addr(dst)
        .new_addr(orig_addr);

    // The peer acknowledges displaced sequence numbers; map them back
    // into the internal host's numbering.
    let new_ack = (ack_shift != 0).then(|| ack.wrapping_sub(ack_shift as u32));
    if let Some(na) = new_ack {
        delta = delta.old_u32(ack).new_u32(na);
    }

    {
        let mut tcp = TcpHeader::new(pkt.l4_mut())?;
        let sum = delta.apply(tcp.checksum());
        tcp.set_checksum(sum);
        if let Some(na) = new_ack {
            tcp.set_ack(na);
        }
        tcp.set_dst_port(orig_port);
    }
    pkt.set_dst(orig_addr);

    if let Some(link) = table.link_mut(id) {
        let state = next_state(link.state_in(), flags);
        link.set_state_in(state);
    }

    tracing::trace!(%orig_addr, orig_port, "restored inbound TCP segment");
    Ok(AliasOutcome::Translated)
}
