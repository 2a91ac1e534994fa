use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A canonical serial line name.
///
/// Represents a `COMx` string on Windows, or a full `/dev/...` path on unix.
/// Construction goes through [`LineName::canonicalize`], which applies the
/// platform naming rules, so a `LineName` in hand is always well-formed.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone, PartialOrd, Ord)]
pub struct LineName(String);

impl LineName {
    /// Validate a caller-supplied name and turn it into its canonical form.
    ///
    /// On Windows only `COM<digits>` is accepted, as-is.
    /// On unix a bare name like `ttyUSB0` is accepted and prefixed with
    /// `/dev/`; slashes are rejected so callers cannot point the server at
    /// arbitrary paths.
    pub fn canonicalize(name: &str) -> Result<Self, Error> {
        if name.is_empty() {
            return Err(Error::BadLineName("name is empty".into()));
        }

        #[cfg(windows)]
        {
            let digits = name
                .strip_prefix("COM")
                .or_else(|| name.strip_prefix("com"));

            match digits {
                Some(d) if !d.is_empty() && d.chars().all(|c| c.is_ascii_digit()) => {
                    Ok(Self(name.to_uppercase()))
                }
                _ => Err(Error::BadLineName(format!(
                    "expected `COMx` on Windows, got `{name}`"
                ))),
            }
        }

        #[cfg(not(windows))]
        {
            let ok = name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'));

            if ok {
                Ok(Self(format!("/dev/{name}")))
            } else {
                Err(Error::BadLineName(format!(
                    "expected a bare name without `/dev/`, got `{name}`"
                )))
            }
        }
    }

    /// The canonical name, e.g. `/dev/ttyUSB0` or `COM3`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare against some other name, ignoring case.
    ///
    /// The allow-list is matched this way since port names on Windows
    /// are case-insensitive and lists are typed by hand.
    pub fn matches_ignore_case(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
            || self
                .0
                .strip_prefix("/dev/")
                .map(|bare| bare.eq_ignore_ascii_case(other))
                .unwrap_or(false)
    }

    /// A line name taken from the host's own port listing.
    ///
    /// These bypass caller validation: the platform produced them.
    pub(crate) fn from_host(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl Display for LineName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
