use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::line::LineName;

/// Something a client may ask to do with a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capability {
    /// List the host's serial ports.
    List,

    /// Drain or inspect a session's receive buffer.
    Read,

    /// Put bytes on the wire.
    Write,

    /// Bridge a line to raw TCP/UDP peers.
    Relay,

    /// Subscribe to pushed session events (websockets).
    Subscribe,
}

impl Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Capability::List => "list",
            Capability::Read => "read",
            Capability::Write => "write",
            Capability::Relay => "relay",
            Capability::Subscribe => "subscribe",
        };
        write!(f, "{s}")
    }
}

/// Static access policy, fixed at process startup.
///
/// Five independent capability flags plus an optional allow-list of line
/// names. An absent (or empty) allow-list permits all lines; a non-empty one
/// permits exact matches only, ignoring case.
///
/// The policy is consulted at the transport boundary, never inside
/// [`crate::session::Session`]: the concurrency core has no notion of
/// permissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessPolicy {
    /// Allow listing the host's serial ports.
    pub list: bool,

    /// Allow read operations.
    pub read: bool,

    /// Allow write operations.
    pub write: bool,

    /// Allow the raw TCP/UDP relay modes.
    pub relay: bool,

    /// Allow websocket subscriptions.
    pub subscribe: bool,

    /// If set and non-empty, only these lines may be touched.
    pub allowed_lines: Option<Vec<String>>,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            list: true,
            read: true,
            write: true,
            relay: true,
            subscribe: true,
            allowed_lines: None,
        }
    }
}

impl AccessPolicy {
    /// Check whether the capability is granted for the given line.
    ///
    /// Pure: no side effects, no mutation.
    pub fn check(&self, capability: Capability, line: &LineName) -> bool {
        self.capability_enabled(capability) && self.allows_line(line)
    }

    /// Like [`Self::check`], but produces the error the transports report.
    pub fn ensure(&self, capability: Capability, line: &LineName) -> Result<(), crate::error::Error> {
        if self.check(capability, line) {
            Ok(())
        } else {
            Err(crate::error::Error::AccessDenied(format!(
                "`{capability}` on `{line}` is not permitted"
            )))
        }
    }

    /// Whether the capability flag itself is enabled, irrespective of line.
    pub fn capability_enabled(&self, capability: Capability) -> bool {
        match capability {
            Capability::List => self.list,
            Capability::Read => self.read,
            Capability::Write => self.write,
            Capability::Relay => self.relay,
            Capability::Subscribe => self.subscribe,
        }
    }

    /// Whether the allow-list permits the line.
    pub fn allows_line(&self, line: &LineName) -> bool {
        match &self.allowed_lines {
            None => true,
            Some(allowed) if allowed.is_empty() => true,
            Some(allowed) => allowed.iter().any(|a| line.matches_ignore_case(a)),
        }
    }
}
