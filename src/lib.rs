#![deny(missing_docs)]

//! This crate exposes serial ports on the host machine to network clients.
//!
//! One open port is owned by a [`session::Session`], which serializes all
//! reads and writes against the port, accumulates incoming bytes in a bounded
//! [`buffer::ReceiveBuffer`] for polling clients, and broadcasts every
//! send/receive to subscribed transports.
//!
//! Transports come in several flavors:
//! - HTTP polling (open/close/write/read/available), see [`rest`]
//! - websocket push, see [`websocket`]
//! - raw TCP relay, see [`tcp`]
//! - raw UDP relay, see [`udp`]
//! - same-port echo for wire testing, see [`echo`]
//!
//! All of them go through the process-wide [`registry::Registry`], and every
//! operation is gated by a static [`policy::AccessPolicy`].

/// The command line interface.
pub mod cli;

/// Line settings (baud, frame spec) and the optional config file.
pub mod config;

/// Possible errors in this library.
pub mod error;

/// Canonical serial line names.
pub mod line;

/// Static capability flags and the port allow-list.
pub mod policy;

/// The bounded receive buffer sitting between a port and its pollers.
pub mod buffer;

/// The device seam: real serial ports and the in-memory mock.
pub mod device;

/// Per-port session: locking discipline and the event bus.
pub mod session;

/// Process-wide mapping from line name to open session.
pub mod registry;

/// The HTTP polling API.
pub(crate) mod rest;

/// Handles incoming websockets.
pub(crate) mod websocket;

/// Raw TCP relay mode.
pub mod tcp;

/// Raw UDP relay mode.
pub mod udp;

/// Same-port echo mode.
pub mod echo;

/// Code relating to setting up the HTTP server.
pub mod server;

/// Logging/tracing setup.
pub mod logging;
