//! Transport and wire-protocol core for an OpenWire JMS-style broker
//! client: the binary codec, the command model it marshals, and the
//! layered transport chain (byte endpoint, I/O pump, response
//! correlator, inactivity monitor, failover/backup pool) that carries
//! it over TCP.
//!
//! This crate is the wire/transport layer only; it does not define a
//! JMS-facing API, destination naming, or message body types — see
//! DESIGN.md for the full list of things deliberately left out.

#![deny(missing_debug_implementations)]
#![cfg_attr(not(test), allow(dead_code))]

#[macro_use]
extern crate log;

pub mod codec;
pub mod command;
pub mod duplicate_audit;
pub mod error;
pub mod transport;
pub mod uri;

pub use crate::command::Command;
pub use crate::duplicate_audit::DuplicateAudit;
pub use crate::error::{CoreError, CoreResult};
pub use crate::transport::correlator::Correlator;
pub use crate::transport::failover::FailoverTransport;
pub use crate::transport::inactivity_monitor::InactivityMonitor;
pub use crate::transport::{Transport, TransportListener};
pub use crate::uri::{parse_failover_uri, FailoverParams, FailoverParamsBuilder, TcpEndpointParams};
