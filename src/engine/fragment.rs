//! Non-first-fragment glue.
//!
//! Fragments past the first carry no transport header, so there is
//! nothing to translate at L4. Outbound, the source address is aliased
//! unconditionally; the port decision was already made when the
//! header-carrying fragment passed through. Inbound, the fragment record
//! registered by the header fragment replays the same destination.

use crate::engine::AliasOutcome;
use crate::packet::Ipv4Packet;
use crate::table::SessionTable;

pub(super) fn alias_out(table: &SessionTable, pkt: &mut Ipv4Packet<'_>) -> AliasOutcome {
    pkt.set_src(table.alias_address());
    AliasOutcome::Translated
}

pub(super) fn alias_in(table: &mut SessionTable, pkt: &mut Ipv4Packet<'_>) -> AliasOutcome {
    match table.fragment_dst(pkt.src(), pkt.ident(), pkt.protocol()) {
        Some(dst) => {
            pkt.set_dst(dst);
            tracing::trace!(src = %pkt.src(), ident = pkt.ident(), "restored fragment destination");
            AliasOutcome::Translated
        }
        None => AliasOutcome::PassThrough,
    }
}
