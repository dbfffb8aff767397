//! FTP control-channel rewriting.
//!
//! An FTP PORT command advertises the client's own address and an
//! ephemeral data port in ASCII. Once the source address is aliased, the
//! advertised endpoint is unreachable, so the payload is rewritten to the
//! alias address and a freshly created data-channel link's alias port.
//!
//! A rewrite that changes the payload length displaces every later byte
//! of the stream; the displacement is recorded on the control link so the
//! TCP translator can compensate sequence numbers outbound and
//! acknowledgment numbers inbound until the connection closes.

use std::net::Ipv4Addr;

use crate::checksum;
use crate::error::Result;
use crate::packet::{Ipv4Packet, TcpHeader};
use crate::table::{LinkId, SessionTable};

/// Well-known FTP control port.
pub(crate) const FTP_CONTROL_PORT: u16 = 21;

/// Well-known FTP data port, which the server's active-mode data
/// connection originates from.
pub(crate) const FTP_DATA_PORT: u16 = 20;

/// Inspects an outbound control-channel segment and rewrites a PORT
/// command in place.
///
/// Only a payload that is exactly one CRLF-terminated PORT command
/// advertising the sender's own address is touched; anything else is left
/// alone. Runs before the TCP translator's header rewrite, while the
/// packet still carries its original addresses.
pub(crate) fn rewrite_port_command(
    table: &mut SessionTable,
    control: LinkId,
    pkt: &mut Ipv4Packet<'_>,
) -> Result<()> {
    let src = pkt.src();
    let dst = pkt.dst();

    let (data_off, seq) = {
        let tcp = TcpHeader::new(pkt.l4_mut())?;
        (tcp.data_offset(), tcp.seq())
    };

    let l4_len = pkt.l4().len();
    if data_off < 20 || data_off >= l4_len {
        return Ok(());
    }

    let Some((addr, port)) = parse_port_command(&pkt.l4()[data_off..]) else {
        return Ok(());
    };
    // Commands advertising some third party are none of our business.
    if addr != src {
        return Ok(());
    }

    // The server will open the data connection from its data port toward
    // the advertised endpoint; register that flow now so the inbound SYN
    // finds an existing link.
    let data_link = table.find_tcp_out(src, dst, port, FTP_DATA_PORT);
    let Some(link) = table.link(data_link) else {
        return Ok(());
    };
    let alias_port = link.alias_port();
    let alias_addr = table.alias_address();

    let replacement = format_port_command(alias_addr, alias_port);
    let old_len = l4_len - data_off;
    let new_len = replacement.len();
    let new_total = pkt.header_len() + data_off + new_len;

    if new_total > pkt.total_len() {
        pkt.set_total_len(new_total)?;
    }
    {
        let l4 = pkt.l4_mut();
        l4[data_off..data_off + new_len].copy_from_slice(replacement.as_bytes());
    }
    if new_total < pkt.total_len() {
        pkt.set_total_len(new_total)?;
    }

    // The payload changed wholesale; patch the checksum by recomputing
    // over the resized segment. Addresses are still the original ones at
    // this point, and the TCP translator's differential pass fixes them
    // afterward.
    {
        let mut tcp = TcpHeader::new(pkt.l4_mut())?;
        tcp.set_checksum(0);
    }
    let sum = checksum::tcp_checksum(src, dst, pkt.l4());
    {
        let mut tcp = TcpHeader::new(pkt.l4_mut())?;
        tcp.set_checksum(sum);
    }

    let shift = new_len as i32 - old_len as i32;
    if shift != 0 {
        if let Some(link) = table.link_mut(control) {
            let prior = link.delta_seq_out(seq);
            link.push_seq_shift(seq.wrapping_add(old_len as u32), prior + shift);
        }
    }

    tracing::debug!(
        %addr,
        port,
        %alias_addr,
        alias_port,
        shift,
        "rewrote FTP PORT command"
    );
    Ok(())
}

/// Parses a payload that is exactly one `PORT h1,h2,h3,h4,p1,p2\r\n`
/// command.
fn parse_port_command(payload: &[u8]) -> Option<(Ipv4Addr, u16)> {
    let text = std::str::from_utf8(payload).ok()?;
    let args = text.strip_prefix("PORT ")?.strip_suffix("\r\n")?;

    let mut fields = args.split(',');
    let mut octets = [0u8; 6];
    for slot in &mut octets {
        *slot = fields.next()?.parse().ok()?;
    }
    if fields.next().is_some() {
        return None;
    }

    let addr = Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]);
    let port = u16::from(octets[4]) << 8 | u16::from(octets[5]);
    Some((addr, port))
}

fn format_port_command(addr: Ipv4Addr, port: u16) -> String {
    let o = addr.octets();
    format!(
        "PORT {},{},{},{},{},{}\r\n",
        o[0],
        o[1],
        o[2],
        o[3],
        port >> 8,
        port & 0xFF
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid_command() {
        let (addr, port) = parse_port_command(b"PORT 10,0,0,5,19,136\r\n").unwrap();
        assert_eq!(addr, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(port, 5000);
    }

    #[test]
    fn parse_rejects_malformed_commands() {
        assert!(parse_port_command(b"PORT 10,0,0,5,19\r\n").is_none());
        assert!(parse_port_command(b"PORT 10,0,0,5,19,136,1\r\n").is_none());
        assert!(parse_port_command(b"PORT 10,0,0,5,19,136").is_none());
        assert!(parse_port_command(b"PORT 300,0,0,5,19,136\r\n").is_none());
        assert!(parse_port_command(b"port 10,0,0,5,19,136\r\n").is_none());
        assert!(parse_port_command(b"RETR file\r\n").is_none());
        assert!(parse_port_command(b"").is_none());
    }

    #[test]
    fn format_round_trips_through_parse() {
        let rendered = format_port_command(Ipv4Addr::new(203, 0, 113, 1), 61234);
        let (addr, port) = parse_port_command(rendered.as_bytes()).unwrap();
        assert_eq!(addr, Ipv4Addr::new(203, 0, 113, 1));
        assert_eq!(port, 61234);
    }
}
