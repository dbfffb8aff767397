//! # pktalias
//!
//! User-space IPv4 packet aliasing (NAT) engine.
//!
//! The engine rewrites address, port and checksum fields of IPv4
//! datagrams in place so that traffic from many internal hosts appears to
//! originate from a single alias address, and replies are steered back to
//! the host that opened each flow. Packets are plain `&mut [u8]` buffers;
//! the crate performs no I/O and holds no reference to a buffer after a
//! call returns, which keeps it host-agnostic.
//!
//! Supported translations:
//!
//! - **UDP / TCP**: source (outbound) or destination (inbound) address
//!   and port, with incremental checksum updates
//! - **ICMP**: echo and timestamp exchanges, plus error messages whose
//!   quoted datagram belongs to an aliased flow
//! - **Fragments**: network-layer re-aliasing of fragments that carry no
//!   transport header
//! - **FTP**: PORT commands on the control channel, including the
//!   sequence-number compensation the resized payload requires
//!
//! ## Example
//!
//! ```
//! use std::net::Ipv4Addr;
//!
//! use pktalias::{AliasConfig, AliasEngine};
//!
//! let config = AliasConfig::new(Ipv4Addr::new(203, 0, 113, 1));
//! let engine = AliasEngine::new(&config);
//! assert!(engine.table().is_empty());
//! // engine.alias_out(&mut packet)? rewrites a datagram in place;
//! // engine.alias_in(&mut reply)? restores the matching reply.
//! ```
//!
//! Processing is synchronous and single-caller; see [`AliasEngine`] for
//! the translation entry points and [`SessionTable`] for session state.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod checksum;
pub mod engine;
pub mod error;
mod ftp;
pub mod packet;
pub mod table;

pub use engine::{AliasConfig, AliasEngine, AliasOutcome};
pub use error::{AliasError, Result};
pub use table::{LinkId, SessionTable, SessionTimeouts, TableStats, TcpState};
