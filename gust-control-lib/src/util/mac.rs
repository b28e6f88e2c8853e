use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::util::error::{FanError, Result};

/// Number of hex digits in a normalized MAC address.
pub const MAC_LENGTH: usize = 12;

/// A device MAC address in normalized form: 12 uppercase hex digits, no separators.
///
/// Fans identify themselves with this value in beacons, and the lowercase form
/// is used as `device_id` in state broadcasts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddress(String);

impl MacAddress {
    /// Parses user or wire input, accepting `:` and `-` separators in any case.
    pub fn parse(input: &str) -> Result<Self> {
        let normalized: String = input
            .trim()
            .chars()
            .filter(|c| *c != ':' && *c != '-')
            .map(|c| c.to_ascii_uppercase())
            .collect();

        if normalized.len() != MAC_LENGTH || !normalized.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(FanError::invalid_argument(format!(
                "MAC must be {} hex chars (e.g. 10B41D181E58), got {:?}",
                MAC_LENGTH, input
            )));
        }

        Ok(MacAddress(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The identifier a fan uses for itself in state broadcasts.
    pub fn device_id(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl FromStr for MacAddress {
    type Err = FanError;

    fn from_str(s: &str) -> Result<Self> {
        MacAddress::parse(s)
    }
}

impl Display for MacAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}
