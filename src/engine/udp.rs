//! UDP translation.

use crate::checksum::ChecksumDelta;
use crate::engine::AliasOutcome;
use crate::error::Result;
use crate::packet::{Ipv4Packet, UdpHeader};
use crate::table::SessionTable;

pub(super) fn alias_out(table: &mut SessionTable, pkt: &mut Ipv4Packet<'_>) -> Result<AliasOutcome> {
    let src = pkt.src();
    let dst = pkt.dst();
    let alias_addr = table.alias_address();

    let (src_port, dst_port, udp_sum) = {
        let udp = UdpHeader::new(pkt.l4_mut())?;
        (udp.src_port(), udp.dst_port(), udp.checksum())
    };

    let id = table.find_udp_out(src, dst, src_port, dst_port);
    let Some(link) = table.link(id) else {
        return Ok(AliasOutcome::PassThrough);
    };
    let alias_port = link.alias_port();

    // A zero checksum means the sender disabled checksumming; patching it
    // would enable a checksum the receiver is not expecting.
    let new_sum = (udp_sum != 0).then(|| {
        ChecksumDelta::new()
            .old_u16(src_port)
            .new_u16(alias_port)
            .old_addr(src)
            .new_addr(alias_addr)
            .apply(udp_sum)
    });

    {
        let mut udp = UdpHeader::new(pkt.l4_mut())?;
        if let Some(sum) = new_sum {
            udp.set_checksum(sum);
        }
        udp.set_src_port(alias_port);
    }
    pkt.set_src(alias_addr);

    tracing::trace!(%src, src_port, alias_port, "aliased outbound UDP datagram");
    Ok(AliasOutcome::Translated)
}

pub(super) fn alias_in(table: &mut SessionTable, pkt: &mut Ipv4Packet<'_>) -> Result<AliasOutcome> {
    let src = pkt.src();
    let dst = pkt.dst();

    let (src_port, dst_port, udp_sum) = {
        let udp = UdpHeader::new(pkt.l4_mut())?;
        (udp.src_port(), udp.dst_port(), udp.checksum())
    };

    let Some(id) = table.find_udp_in(src, src_port, dst_port) else {
        return Ok(AliasOutcome::PassThrough);
    };
    let Some(link) = table.link(id) else {
        return Ok(AliasOutcome::PassThrough);
    };
    let orig_addr = link.original_addr();
    let orig_port = link.original_port();

    let new_sum = (udp_sum != 0).then(|| {
        ChecksumDelta::new()
            .old_u16(dst_port)
            .new_u16(orig_port)
            .old_addr(dst)
            .new_addr(orig_addr)
            .apply(udp_sum)
    });

    {
        let mut udp = UdpHeader::new(pkt.l4_mut())?;
        if let Some(sum) = new_sum {
            udp.set_checksum(sum);
        }
        udp.set_dst_port(orig_port);
    }
    pkt.set_dst(orig_addr);

    tracing::trace!(%orig_addr, orig_port, "restored inbound UDP datagram");
    Ok(AliasOutcome::Translated)
}
