use std::path::Path;
use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{error::Error, policy::AccessPolicy};

/// Parity bit setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Parity {
    /// No parity bit.
    #[default]
    None,

    /// Even parity.
    Even,

    /// Odd parity.
    Odd,

    /// Parity bit always set.
    Mark,

    /// Parity bit always clear.
    Space,
}

impl Parity {
    fn from_letter(letter: char) -> Option<Self> {
        match letter.to_ascii_uppercase() {
            'N' => Some(Self::None),
            'E' => Some(Self::Even),
            'O' => Some(Self::Odd),
            'M' => Some(Self::Mark),
            'S' => Some(Self::Space),
            _ => None,
        }
    }

    fn letter(&self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
            Parity::Mark => 'M',
            Parity::Space => 'S',
        }
    }
}

/// Settings for opening a serial line.
///
/// Absent fields deserialize to their defaults, so a client may send just
/// `{"baud_rate": 115200}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineSettings {
    /// Baud rate, must be positive.
    pub baud_rate: u32,

    /// Data bits, 5 through 8.
    pub data_bits: u8,

    /// Stop bits, 1 or 2.
    pub stop_bits: u8,

    /// Parity setting.
    pub parity: Parity,
}

impl Default for LineSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
        }
    }
}

impl LineSettings {
    /// Validate ranges: positive baud, 5..=8 data bits, 1 or 2 stop bits.
    pub fn validate(&self) -> Result<(), Error> {
        if self.baud_rate == 0 {
            return Err(Error::BadConfig("baud rate must be greater than 0".into()));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(Error::BadConfig(format!(
                "data bits should be 5, 6, 7 or 8, got {}",
                self.data_bits
            )));
        }
        if self.stop_bits != 1 && self.stop_bits != 2 {
            return Err(Error::BadConfig(format!(
                "stop bits should be 1 or 2, got {}",
                self.stop_bits
            )));
        }
        Ok(())
    }

    /// Apply a frame spec like `8N1`: data bits, parity letter, stop bits.
    pub fn with_frame_spec(mut self, spec: &str) -> Result<Self, Error> {
        let frame = FrameSpec::from_str(spec)?;
        self.data_bits = frame.data_bits;
        self.parity = frame.parity;
        self.stop_bits = frame.stop_bits;
        self.validate()?;
        Ok(self)
    }

    /// The frame part as the conventional three character spec.
    pub fn frame_spec(&self) -> String {
        format!("{}{}{}", self.data_bits, self.parity.letter(), self.stop_bits)
    }
}

impl Display for LineSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},{}", self.baud_rate, self.frame_spec())
    }
}

/// A three character frame spec: data bits, parity, stop bits.
///
/// For example `8N1` = 8 data bits, no parity, 1 stop bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSpec {
    /// Data bits, 5 through 8.
    pub data_bits: u8,

    /// Parity setting.
    pub parity: Parity,

    /// Stop bits, 1 or 2.
    pub stop_bits: u8,
}

impl FromStr for FrameSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();

        let (data, parity, stop) = match (chars.next(), chars.next(), chars.next(), chars.next()) {
            (Some(d), Some(p), Some(s), None) => (d, p, s),
            _ => {
                return Err(Error::BadConfig(format!(
                    "expected a three character frame spec like `8N1`, got `{s}`"
                )))
            }
        };

        let data_bits = data
            .to_digit(10)
            .filter(|d| (5..=8).contains(d))
            .ok_or_else(|| {
                Error::BadConfig(format!("data bits should be 5, 6, 7 or 8, got `{data}`"))
            })? as u8;

        let parity = Parity::from_letter(parity).ok_or_else(|| {
            Error::BadConfig(format!(
                "parity should be N - none, E - even, O - odd, M - mark or S - space, got `{parity}`"
            ))
        })?;

        let stop_bits = stop
            .to_digit(10)
            .filter(|s| *s == 1 || *s == 2)
            .ok_or_else(|| Error::BadConfig(format!("stop bits should be 1 or 2, got `{stop}`")))?
            as u8;

        Ok(Self {
            data_bits,
            parity,
            stop_bits,
        })
    }
}

/// A line pinned in the configuration file.
///
/// Used by the tcp, udp and echo modes, which bridge exactly one line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigLine {
    /// The bare line name, validated at startup.
    pub name: String,

    /// Settings to open the line with.
    pub settings: LineSettings,
}

impl ConfigLine {
    /// Parse a command line spec: `NAME[,BAUD[,FRAME]]`.
    ///
    /// For example `ttyUSB0,115200,8N1`. Omitted parts fall back to the
    /// defaults.
    pub fn from_spec(spec: &str) -> Result<Self, Error> {
        let mut parts = spec.split(',');

        let name = parts
            .next()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::BadConfig("line spec needs a name".into()))?;

        let mut settings = LineSettings::default();

        if let Some(baud) = parts.next() {
            settings.baud_rate = baud
                .trim()
                .parse()
                .map_err(|_| Error::BadConfig(format!("bad baud rate `{baud}`")))?;
        }

        if let Some(frame) = parts.next() {
            settings = settings.with_frame_spec(frame.trim())?;
        }

        if parts.next().is_some() {
            return Err(Error::BadConfig(format!(
                "line spec `{spec}` has too many parts, expected NAME,BAUD,FRAME"
            )));
        }

        settings.validate()?;

        Ok(Self {
            name: name.to_string(),
            settings,
        })
    }
}

/// The configuration used for running the server.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// The access policy to run with.
    pub policy: AccessPolicy,

    /// The line to bridge in tcp/udp/echo modes.
    /// Ignored in http mode, where clients pick their own lines.
    pub line: Option<ConfigLine>,

    /// Receive buffer capacity in bytes per open line.
    /// Defaults to [`crate::buffer::DEFAULT_CAPACITY`] when absent.
    pub rx_capacity: Option<usize>,
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    pub fn deserialize(input: &str) -> Result<Self, Error> {
        Self::ron()
            .from_str::<Config>(input)
            .map_err(|e| Error::BadConfig(e.to_string()))
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        Self {
            policy: AccessPolicy {
                allowed_lines: Some(vec!["ttyACM0".into(), "COM1".into()]),
                ..Default::default()
            },
            line: Some(ConfigLine {
                name: "ttyACM0".into(),
                settings: LineSettings {
                    baud_rate: 115_200,
                    ..Default::default()
                },
            }),
            rx_capacity: Some(65_535),
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> String {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .expect("Config serializes")
    }

    /// Read a configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let s = std::fs::read_to_string(&p).map_err(|e| {
            Error::BadConfig(format!("could not read {:?}: {e}", p.as_ref()))
        })?;

        let config = Self::deserialize(&s)?;
        config.validate()?;

        Ok(config)
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if let Some(line) = &self.line {
            line.settings.validate()?;
        }
        if let Some(capacity) = self.rx_capacity {
            if capacity == 0 {
                return Err(Error::BadConfig("rx capacity must be positive".into()));
            }
        }
        Ok(())
    }
}
