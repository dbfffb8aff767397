//! End-to-end aliasing scenarios.
//!
//! Every packet is built with valid checksums and every translation is
//! verified against a full checksum recomputation, so the incremental
//! updates are cross-checked rather than trusted.

use std::net::Ipv4Addr;

use pktalias::{checksum, AliasConfig, AliasEngine, AliasOutcome, TcpState};

const ALIAS: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 1);
const HOST: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 5);
const DNS: Ipv4Addr = Ipv4Addr::new(8, 8, 8, 8);

const FLAG_FIN: u8 = 0x01;
const FLAG_SYN: u8 = 0x02;
const FLAG_ACK: u8 = 0x10;

fn engine() -> AliasEngine {
    AliasEngine::new(&AliasConfig::new(ALIAS))
}

fn build_ipv4(protocol: u8, src: Ipv4Addr, dst: Ipv4Addr, ident: u16, frag: u16, l4: &[u8]) -> Vec<u8> {
    let total = 20 + l4.len();
    let mut buf = vec![0u8; total];
    buf[0] = 0x45;
    buf[2..4].copy_from_slice(&(total as u16).to_be_bytes());
    buf[4..6].copy_from_slice(&ident.to_be_bytes());
    buf[6..8].copy_from_slice(&frag.to_be_bytes());
    buf[8] = 64;
    buf[9] = protocol;
    buf[12..16].copy_from_slice(&src.octets());
    buf[16..20].copy_from_slice(&dst.octets());
    buf[20..].copy_from_slice(l4);

    let sum = checksum::ipv4_header_checksum(&buf[..20]);
    buf[10..12].copy_from_slice(&sum.to_be_bytes());
    buf
}

fn build_udp(src: Ipv4Addr, dst: Ipv4Addr, sport: u16, dport: u16, payload: &[u8]) -> Vec<u8> {
    let mut seg = vec![0u8; 8 + payload.len()];
    seg[0..2].copy_from_slice(&sport.to_be_bytes());
    seg[2..4].copy_from_slice(&dport.to_be_bytes());
    let seg_len = seg.len() as u16;
    seg[4..6].copy_from_slice(&seg_len.to_be_bytes());
    seg[8..].copy_from_slice(payload);

    let sum = checksum::udp_checksum(src, dst, &seg);
    seg[6..8].copy_from_slice(&sum.to_be_bytes());
    build_ipv4(17, src, dst, 0, 0, &seg)
}

#[allow(clippy::too_many_arguments)]
fn build_tcp(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    sport: u16,
    dport: u16,
    seq: u32,
    ack: u32,
    flags: u8,
    payload: &[u8],
) -> Vec<u8> {
    let mut seg = vec![0u8; 20 + payload.len()];
    seg[0..2].copy_from_slice(&sport.to_be_bytes());
    seg[2..4].copy_from_slice(&dport.to_be_bytes());
    seg[4..8].copy_from_slice(&seq.to_be_bytes());
    seg[8..12].copy_from_slice(&ack.to_be_bytes());
    seg[12] = 5 << 4;
    seg[13] = flags;
    seg[14..16].copy_from_slice(&0x2000u16.to_be_bytes());
    seg[20..].copy_from_slice(payload);

    let sum = checksum::tcp_checksum(src, dst, &seg);
    seg[16..18].copy_from_slice(&sum.to_be_bytes());
    build_ipv4(6, src, dst, 0, 0, &seg)
}

fn build_icmp(src: Ipv4Addr, dst: Ipv4Addr, icmp_type: u8, ident: u16, seq: u16, payload: &[u8]) -> Vec<u8> {
    let mut msg = vec![0u8; 8 + payload.len()];
    msg[0] = icmp_type;
    msg[4..6].copy_from_slice(&ident.to_be_bytes());
    msg[6..8].copy_from_slice(&seq.to_be_bytes());
    msg[8..].copy_from_slice(payload);

    let sum = checksum::checksum(&msg);
    msg[2..4].copy_from_slice(&sum.to_be_bytes());
    build_ipv4(1, src, dst, 0, 0, &msg)
}

fn ihl(buf: &[u8]) -> usize {
    usize::from(buf[0] & 0x0F) * 4
}

fn ip_src(buf: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(buf[12], buf[13], buf[14], buf[15])
}

fn ip_dst(buf: &[u8]) -> Ipv4Addr {
    Ipv4Addr::new(buf[16], buf[17], buf[18], buf[19])
}

fn l4_u16(buf: &[u8], offset: usize) -> u16 {
    let h = ihl(buf);
    u16::from_be_bytes([buf[h + offset], buf[h + offset + 1]])
}

fn l4_u32(buf: &[u8], offset: usize) -> u32 {
    let h = ihl(buf);
    u32::from_be_bytes([
        buf[h + offset],
        buf[h + offset + 1],
        buf[h + offset + 2],
        buf[h + offset + 3],
    ])
}

/// The stored IP header checksum must validate.
fn assert_ip_checksum_ok(buf: &[u8]) {
    assert_eq!(checksum::checksum(&buf[..ihl(buf)]), 0, "IP header checksum");
}

/// The stored UDP checksum must match a full recomputation.
fn assert_udp_checksum_ok(buf: &[u8]) {
    let h = ihl(buf);
    let mut seg = buf[h..].to_vec();
    let stored = u16::from_be_bytes([seg[6], seg[7]]);
    seg[6] = 0;
    seg[7] = 0;
    assert_eq!(
        stored,
        checksum::udp_checksum(ip_src(buf), ip_dst(buf), &seg),
        "UDP checksum"
    );
}

/// The stored TCP checksum must match a full recomputation.
fn assert_tcp_checksum_ok(buf: &[u8]) {
    let h = ihl(buf);
    let mut seg = buf[h..].to_vec();
    let stored = u16::from_be_bytes([seg[16], seg[17]]);
    seg[16] = 0;
    seg[17] = 0;
    assert_eq!(
        stored,
        checksum::tcp_checksum(ip_src(buf), ip_dst(buf), &seg),
        "TCP checksum"
    );
}

/// The stored ICMP checksum must match a full recomputation.
fn assert_icmp_checksum_ok(buf: &[u8]) {
    let h = ihl(buf);
    let mut msg = buf[h..].to_vec();
    let stored = u16::from_be_bytes([msg[2], msg[3]]);
    msg[2] = 0;
    msg[3] = 0;
    assert_eq!(stored, checksum::checksum(&msg), "ICMP checksum");
}

// ============================================================================
// UDP
// ============================================================================

mod udp {
    use super::*;

    #[test]
    fn round_trip_restores_original_flow() {
        let mut engine = engine();

        let mut out = build_udp(HOST, DNS, 5000, 53, b"example-query");
        assert_eq!(engine.alias_out(&mut out).unwrap(), AliasOutcome::Translated);

        assert_eq!(ip_src(&out), ALIAS);
        let alias_port = l4_u16(&out, 0);
        assert_eq!(l4_u16(&out, 2), 53);
        assert_ip_checksum_ok(&out);
        assert_udp_checksum_ok(&out);

        let mut reply = build_udp(DNS, ALIAS, 53, alias_port, b"example-answer-x");
        assert_eq!(engine.alias_in(&mut reply).unwrap(), AliasOutcome::Translated);

        assert_eq!(ip_dst(&reply), HOST);
        assert_eq!(l4_u16(&reply, 2), 5000);
        assert_eq!(ip_src(&reply), DNS);
        assert_eq!(l4_u16(&reply, 0), 53);
        assert_ip_checksum_ok(&reply);
        assert_udp_checksum_ok(&reply);
    }

    #[test]
    fn disabled_checksum_stays_disabled() {
        let mut engine = engine();

        let mut out = build_udp(HOST, DNS, 5000, 53, b"data");
        let h = ihl(&out);
        // Zero the UDP checksum: the sender opted out of checksumming.
        out[h + 6] = 0;
        out[h + 7] = 0;

        assert_eq!(engine.alias_out(&mut out).unwrap(), AliasOutcome::Translated);
        assert_eq!(ip_src(&out), ALIAS);
        assert_eq!(l4_u16(&out, 6), 0, "disabled checksum must not be enabled");
    }

    #[test]
    fn unmatched_inbound_passes_through_unchanged() {
        let mut engine = engine();

        let mut buf = build_udp(DNS, ALIAS, 53, 60000, b"stray");
        let before = buf.clone();
        assert_eq!(engine.alias_in(&mut buf).unwrap(), AliasOutcome::PassThrough);
        assert_eq!(buf, before);
    }
}

// ============================================================================
// ICMP echo
// ============================================================================

mod icmp_echo {
    use super::*;

    const PINGED: Ipv4Addr = Ipv4Addr::new(1, 1, 1, 1);

    #[test]
    fn echo_round_trip_and_one_shot_mapping() {
        let mut engine = engine();

        let mut out = build_icmp(HOST, PINGED, 8, 1234, 1, b"ping-payload");
        assert_eq!(engine.alias_out(&mut out).unwrap(), AliasOutcome::Translated);

        assert_eq!(ip_src(&out), ALIAS);
        let alias_seq = l4_u16(&out, 6);
        assert_eq!(l4_u16(&out, 4), 1234, "identifier is not aliased");
        assert_ip_checksum_ok(&out);
        assert_icmp_checksum_ok(&out);

        let mut reply = build_icmp(PINGED, ALIAS, 0, 1234, alias_seq, b"ping-payload");
        assert_eq!(engine.alias_in(&mut reply).unwrap(), AliasOutcome::Translated);

        assert_eq!(ip_dst(&reply), HOST);
        // The stored original must be restored, not assumed equal to the
        // alias value.
        assert_eq!(l4_u16(&reply, 6), 1);
        assert_ip_checksum_ok(&reply);
        assert_icmp_checksum_ok(&reply);

        // The exchange is one-shot: an identical second reply finds no
        // mapping and passes through.
        let mut dup = build_icmp(PINGED, ALIAS, 0, 1234, alias_seq, b"ping-payload");
        let before = dup.clone();
        assert_eq!(engine.alias_in(&mut dup).unwrap(), AliasOutcome::PassThrough);
        assert_eq!(dup, before);
    }

    #[test]
    fn non_echo_types_pass_through_outbound() {
        let mut engine = engine();

        // An outbound destination-unreachable is not an echo exchange.
        let mut buf = build_icmp(HOST, PINGED, 3, 0, 0, &[0u8; 28]);
        let before = buf.clone();
        assert_eq!(engine.alias_out(&mut buf).unwrap(), AliasOutcome::PassThrough);
        assert_eq!(buf, before);
    }
}

// ============================================================================
// TCP
// ============================================================================

mod tcp {
    use super::*;

    const WEB: Ipv4Addr = Ipv4Addr::new(93, 184, 216, 34);

    #[test]
    fn round_trip_with_state_progression() {
        let mut engine = engine();

        // SYN out.
        let mut syn = build_tcp(HOST, WEB, 4000, 80, 100, 0, FLAG_SYN, b"");
        assert_eq!(engine.alias_out(&mut syn).unwrap(), AliasOutcome::Translated);
        assert_eq!(ip_src(&syn), ALIAS);
        let alias_port = l4_u16(&syn, 0);
        assert_ip_checksum_ok(&syn);
        assert_tcp_checksum_ok(&syn);

        let id = engine.table_mut().find_tcp_out(HOST, WEB, 4000, 80);
        assert_eq!(engine.table().link(id).unwrap().state_out(), TcpState::SynSeen);
        assert_eq!(engine.table().link(id).unwrap().state_in(), TcpState::Unseen);

        // SYN|ACK in.
        let mut synack = build_tcp(WEB, ALIAS, 80, alias_port, 700, 101, FLAG_SYN | FLAG_ACK, b"");
        assert_eq!(engine.alias_in(&mut synack).unwrap(), AliasOutcome::Translated);
        assert_eq!(ip_dst(&synack), HOST);
        assert_eq!(l4_u16(&synack, 2), 4000);
        assert_tcp_checksum_ok(&synack);
        assert_eq!(engine.table().link(id).unwrap().state_in(), TcpState::SynSeen);

        // Data segments do not advance the state machine.
        let mut data = build_tcp(HOST, WEB, 4000, 80, 101, 701, FLAG_ACK, b"GET / HTTP/1.0\r\n\r\n");
        assert_eq!(engine.alias_out(&mut data).unwrap(), AliasOutcome::Translated);
        assert_tcp_checksum_ok(&data);
        assert_eq!(engine.table().link(id).unwrap().state_out(), TcpState::SynSeen);

        // FIN in each direction.
        let mut fin = build_tcp(HOST, WEB, 4000, 80, 119, 701, FLAG_FIN | FLAG_ACK, b"");
        engine.alias_out(&mut fin).unwrap();
        assert_eq!(engine.table().link(id).unwrap().state_out(), TcpState::Closing);

        let mut fin_in = build_tcp(WEB, ALIAS, 80, alias_port, 701, 120, FLAG_FIN | FLAG_ACK, b"");
        engine.alias_in(&mut fin_in).unwrap();
        assert_eq!(engine.table().link(id).unwrap().state_in(), TcpState::Closing);
    }

    #[test]
    fn unmatched_inbound_syn_passes_through_unchanged() {
        let mut engine = engine();

        let mut buf = build_tcp(WEB, ALIAS, 12345, 50000, 1, 0, FLAG_SYN, b"");
        let before = buf.clone();
        assert_eq!(engine.alias_in(&mut buf).unwrap(), AliasOutcome::PassThrough);
        assert_eq!(buf, before);
        assert!(engine.table().is_empty());
    }

    #[test]
    fn corrupt_ip_checksum_is_preserved() {
        let mut engine = engine();

        let mut buf = build_tcp(HOST, WEB, 4000, 80, 100, 0, FLAG_SYN, b"");
        buf[10] ^= 0x5A;
        let corrupted = [buf[10], buf[11]];

        // Translation still happens; the corruption signal does not.
        assert_eq!(engine.alias_out(&mut buf).unwrap(), AliasOutcome::Translated);
        assert_eq!([buf[10], buf[11]], corrupted);
        assert_eq!(ip_src(&buf), ALIAS);
    }
}

// ============================================================================
// Fragments
// ============================================================================

mod fragments {
    use super::*;

    #[test]
    fn outbound_fragments_are_aliased_at_network_layer() {
        let mut engine = engine();

        // Header-carrying fragment: UDP header + first payload bytes.
        let mut seg = vec![0u8; 8 + 16];
        seg[0..2].copy_from_slice(&6000u16.to_be_bytes());
        seg[2..4].copy_from_slice(&53u16.to_be_bytes());
        seg[4..6].copy_from_slice(&48u16.to_be_bytes());
        let mut first = build_ipv4(17, HOST, DNS, 0x77, 0x2000, &seg);
        assert_eq!(engine.alias_out(&mut first).unwrap(), AliasOutcome::Translated);
        assert_eq!(ip_src(&first), ALIAS);

        // Later fragments carry raw payload only.
        let mut middle = build_ipv4(17, HOST, DNS, 0x77, 0x2003, &[0xAA; 24]);
        assert_eq!(engine.alias_out(&mut middle).unwrap(), AliasOutcome::Translated);
        assert_eq!(ip_src(&middle), ALIAS);
        assert_ip_checksum_ok(&middle);

        let mut last = build_ipv4(17, HOST, DNS, 0x77, 0x0006, &[0xBB; 8]);
        assert_eq!(engine.alias_out(&mut last).unwrap(), AliasOutcome::Translated);
        assert_eq!(ip_src(&last), ALIAS);
    }

    #[test]
    fn inbound_fragment_train_is_restored_consistently() {
        let mut engine = engine();

        // Establish the mapping with an ordinary outbound datagram.
        let mut out = build_udp(HOST, DNS, 6000, 53, b"query");
        engine.alias_out(&mut out).unwrap();
        let alias_port = l4_u16(&out, 0);

        // Inbound reply split across three fragments. The UDP checksum of
        // a fragmented datagram covers the reassembled whole, so the
        // header fragment carries it disabled here.
        let mut seg = vec![0u8; 8 + 16];
        seg[0..2].copy_from_slice(&53u16.to_be_bytes());
        seg[2..4].copy_from_slice(&alias_port.to_be_bytes());
        seg[4..6].copy_from_slice(&48u16.to_be_bytes());

        let mut first = build_ipv4(17, DNS, ALIAS, 0x88, 0x2000, &seg);
        assert_eq!(engine.alias_in(&mut first).unwrap(), AliasOutcome::Translated);
        assert_eq!(ip_dst(&first), HOST);
        assert_eq!(l4_u16(&first, 2), 6000);
        assert_ip_checksum_ok(&first);

        let mut middle = build_ipv4(17, DNS, ALIAS, 0x88, 0x2003, &[0xCC; 24]);
        assert_eq!(engine.alias_in(&mut middle).unwrap(), AliasOutcome::Translated);
        assert_eq!(ip_dst(&middle), HOST);
        assert_ip_checksum_ok(&middle);

        let mut last = build_ipv4(17, DNS, ALIAS, 0x88, 0x0006, &[0xDD; 8]);
        assert_eq!(engine.alias_in(&mut last).unwrap(), AliasOutcome::Translated);
        assert_eq!(ip_dst(&last), HOST);
        assert_ip_checksum_ok(&last);
    }

    #[test]
    fn inbound_fragment_without_record_passes_through() {
        let mut engine = engine();

        let mut frag = build_ipv4(17, DNS, ALIAS, 0x99, 0x0003, &[0xEE; 16]);
        let before = frag.clone();
        assert_eq!(engine.alias_in(&mut frag).unwrap(), AliasOutcome::PassThrough);
        assert_eq!(frag, before);
    }
}

// ============================================================================
// ICMP error messages
// ============================================================================

mod icmp_errors {
    use super::*;

    const ROUTER: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 254);

    /// Builds an ICMP error whose body quotes the given datagram's first
    /// 28 bytes (IP header + 8).
    fn build_icmp_error(src: Ipv4Addr, dst: Ipv4Addr, icmp_type: u8, quoted: &[u8]) -> Vec<u8> {
        let mut msg = vec![0u8; 8 + 28];
        msg[0] = icmp_type;
        msg[8..36].copy_from_slice(&quoted[..28]);

        let sum = checksum::checksum(&msg);
        msg[2..4].copy_from_slice(&sum.to_be_bytes());
        build_ipv4(1, src, dst, 0, 0, &msg)
    }

    #[test]
    fn time_exceeded_for_udp_flow_is_restored() {
        let mut engine = engine();

        // The aliased outbound datagram is what the router quotes back.
        let mut out = build_udp(HOST, DNS, 5000, 53, b"traceroute-probe");
        engine.alias_out(&mut out).unwrap();

        let mut err = build_icmp_error(ROUTER, ALIAS, 11, &out);
        assert_eq!(engine.alias_in(&mut err).unwrap(), AliasOutcome::Translated);

        // Outer header steers the error to the internal host.
        assert_eq!(ip_dst(&err), HOST);
        assert_eq!(ip_src(&err), ROUTER);
        assert_ip_checksum_ok(&err);
        assert_icmp_checksum_ok(&err);

        // The quoted datagram must look like what the host sent: its own
        // source address and port.
        let quoted = &err[28..];
        assert_eq!(ip_src(quoted), HOST);
        assert_eq!(u16::from_be_bytes([quoted[20], quoted[21]]), 5000);
        assert_eq!(u16::from_be_bytes([quoted[22], quoted[23]]), 53);
    }

    #[test]
    fn unreachable_for_tcp_flow_is_restored() {
        let mut engine = engine();

        let mut out = build_tcp(HOST, DNS, 4000, 443, 100, 0, FLAG_SYN, b"");
        engine.alias_out(&mut out).unwrap();

        let mut err = build_icmp_error(ROUTER, ALIAS, 3, &out);
        assert_eq!(engine.alias_in(&mut err).unwrap(), AliasOutcome::Translated);

        assert_eq!(ip_dst(&err), HOST);
        assert_icmp_checksum_ok(&err);

        let quoted = &err[28..];
        assert_eq!(ip_src(quoted), HOST);
        assert_eq!(u16::from_be_bytes([quoted[20], quoted[21]]), 4000);
    }

    #[test]
    fn time_exceeded_for_echo_flow_is_restored() {
        let mut engine = engine();

        let mut out = build_icmp(HOST, DNS, 8, 7, 9, b"probe");
        engine.alias_out(&mut out).unwrap();

        let mut err = build_icmp_error(ROUTER, ALIAS, 11, &out);
        assert_eq!(engine.alias_in(&mut err).unwrap(), AliasOutcome::Translated);

        assert_eq!(ip_dst(&err), HOST);
        assert_icmp_checksum_ok(&err);

        let quoted = &err[28..];
        assert_eq!(ip_src(quoted), HOST);
        // Quoted identifier stays, quoted sequence number is restored.
        assert_eq!(u16::from_be_bytes([quoted[24], quoted[25]]), 7);
        assert_eq!(u16::from_be_bytes([quoted[26], quoted[27]]), 9);

        // Error introspection does not consume the echo mapping: the real
        // reply must still translate.
        let alias_seq = l4_u16(&out, 6);
        let mut reply = build_icmp(DNS, ALIAS, 0, 7, alias_seq, b"probe");
        assert_eq!(engine.alias_in(&mut reply).unwrap(), AliasOutcome::Translated);
        assert_eq!(ip_dst(&reply), HOST);
    }

    #[test]
    fn error_for_unknown_flow_passes_through() {
        let mut engine = engine();

        let quoted = build_udp(ALIAS, DNS, 60001, 53, b"not-our-flow");
        let mut err = build_icmp_error(ROUTER, ALIAS, 3, &quoted);
        let before = err.clone();
        assert_eq!(engine.alias_in(&mut err).unwrap(), AliasOutcome::PassThrough);
        assert_eq!(err, before);
    }
}

// ============================================================================
// FTP PORT rewriting
// ============================================================================

mod ftp {
    use super::*;

    const SERVER: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 10);

    fn parse_port_payload(payload: &[u8]) -> (Ipv4Addr, u16) {
        let text = std::str::from_utf8(payload).expect("payload is ASCII");
        let args = text
            .strip_prefix("PORT ")
            .and_then(|t| t.strip_suffix("\r\n"))
            .expect("payload is a PORT command");
        let nums: Vec<u16> = args.split(',').map(|f| f.parse().unwrap()).collect();
        (
            Ipv4Addr::new(nums[0] as u8, nums[1] as u8, nums[2] as u8, nums[3] as u8),
            (nums[4] << 8) | nums[5],
        )
    }

    #[test]
    fn port_command_rewrite_and_delta_compensation() {
        let mut engine = engine();

        // Control-channel segment carrying exactly one PORT command,
        // advertising the client itself at port 5000. The buffer leaves
        // room for the command to grow.
        let command = b"PORT 10,0,0,5,19,136\r\n";
        let mut ctrl = build_tcp(HOST, SERVER, 4001, 21, 1000, 500, FLAG_ACK, command);
        let datagram_len = ctrl.len();
        ctrl.resize(datagram_len + 64, 0);

        assert_eq!(engine.alias_out(&mut ctrl).unwrap(), AliasOutcome::Translated);
        assert_eq!(ip_src(&ctrl), ALIAS);
        let alias_ctrl_port = l4_u16(&ctrl, 0);

        let new_total = usize::from(u16::from_be_bytes([ctrl[2], ctrl[3]]));
        let rewritten = &ctrl[40..new_total];
        let (adv_addr, adv_port) = parse_port_payload(rewritten);
        assert_eq!(adv_addr, ALIAS, "command must advertise the alias address");

        let shift = new_total as i32 - datagram_len as i32;
        assert_ne!(shift, 0, "alias rendering changes the command length");

        assert_ip_checksum_ok(&ctrl[..new_total]);
        assert_tcp_checksum_ok(&ctrl[..new_total]);

        // The server's active-mode data connection reaches the advertised
        // endpoint and is steered to the client's announced data port.
        let mut data_syn = build_tcp(SERVER, ALIAS, 20, adv_port, 9000, 0, FLAG_SYN, b"");
        assert_eq!(engine.alias_in(&mut data_syn).unwrap(), AliasOutcome::Translated);
        assert_eq!(ip_dst(&data_syn), HOST);
        assert_eq!(l4_u16(&data_syn, 2), 5000);
        assert_tcp_checksum_ok(&data_syn);

        // The next control segment starts where the original command
        // ended; its sequence number must be displaced by the rewrite.
        let next_seq = 1000 + command.len() as u32;
        let mut next = build_tcp(HOST, SERVER, 4001, 21, next_seq, 500, FLAG_ACK, b"QUIT\r\n");
        assert_eq!(engine.alias_out(&mut next).unwrap(), AliasOutcome::Translated);
        assert_eq!(l4_u32(&next, 4), next_seq.wrapping_add(shift as u32));
        assert_tcp_checksum_ok(&next);

        // The server acknowledges displaced numbers; inbound they are
        // mapped back into the client's numbering.
        let server_ack = next_seq.wrapping_add(shift as u32);
        let mut resp = build_tcp(SERVER, ALIAS, 21, alias_ctrl_port, 500, server_ack, FLAG_ACK, b"200 PORT command successful\r\n");
        assert_eq!(engine.alias_in(&mut resp).unwrap(), AliasOutcome::Translated);
        assert_eq!(l4_u32(&resp, 8), next_seq);
        assert_eq!(ip_dst(&resp), HOST);
        assert_tcp_checksum_ok(&resp);
    }

    #[test]
    fn non_port_traffic_on_control_channel_is_untouched() {
        let mut engine = engine();

        let mut ctrl = build_tcp(HOST, SERVER, 4001, 21, 1000, 500, FLAG_ACK, b"USER anonymous\r\n");
        let total = ctrl.len();
        assert_eq!(engine.alias_out(&mut ctrl).unwrap(), AliasOutcome::Translated);

        // Addresses are aliased, but the payload and length are unchanged.
        assert_eq!(ip_src(&ctrl), ALIAS);
        assert_eq!(usize::from(u16::from_be_bytes([ctrl[2], ctrl[3]])), total);
        assert_eq!(&ctrl[40..], b"USER anonymous\r\n");
        assert_tcp_checksum_ok(&ctrl);
    }

    #[test]
    fn rewrite_can_be_disabled() {
        let config = AliasConfig::new(ALIAS).with_ftp_rewrite(false);
        let mut engine = AliasEngine::new(&config);

        let command = b"PORT 10,0,0,5,19,136\r\n";
        let mut ctrl = build_tcp(HOST, SERVER, 4001, 21, 1000, 500, FLAG_ACK, command);
        assert_eq!(engine.alias_out(&mut ctrl).unwrap(), AliasOutcome::Translated);

        // Addresses are aliased but the payload is left alone.
        assert_eq!(ip_src(&ctrl), ALIAS);
        assert_eq!(&ctrl[40..], command);
    }
}
