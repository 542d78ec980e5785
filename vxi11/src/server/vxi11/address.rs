//! Device addresses given to `create_link`.
//!
//! The default grammar accepts `gpib<bus>,<primary>[,<secondary>]` with primary and secondary
//! addresses in 0..=30, and `inst<n>`. Matching is case-insensitive and surrounding whitespace
//! is ignored.

use std::{fmt, str::FromStr};

/// Largest GPIB primary/secondary address
pub const GPIB_MAX_ADDRESS: u8 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceAddress {
    Gpib {
        bus: u32,
        primary: u8,
        secondary: Option<u8>,
    },
    Instrument(u32),
    /// Address understood only by a custom [AddressParser]
    Other(String),
}

impl DeviceAddress {
    /// GPIB primary address of a device, if it sits on a GPIB bus
    pub fn primary_address(&self) -> Option<u8> {
        match self {
            DeviceAddress::Gpib { primary, .. } => Some(*primary),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceAddress::Gpib {
                bus,
                primary,
                secondary: None,
            } => write!(f, "gpib{},{}", bus, primary),
            DeviceAddress::Gpib {
                bus,
                primary,
                secondary: Some(secondary),
            } => write!(f, "gpib{},{},{}", bus, primary, secondary),
            DeviceAddress::Instrument(n) => write!(f, "inst{}", n),
            DeviceAddress::Other(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressError(pub String);

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid device address {:?}", self.0)
    }
}

impl std::error::Error for AddressError {}

/// Parses the device name of a `create_link` call
pub type AddressParser = fn(&str) -> Result<DeviceAddress, AddressError>;

fn parse_number<T: FromStr>(s: &str) -> Option<T> {
    if s.is_empty() || !s.bytes().all(|c| c.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_gpib_address(s: &str) -> Option<u8> {
    parse_number(s.trim()).filter(|a| *a <= GPIB_MAX_ADDRESS)
}

/// Default [AddressParser]
pub fn parse_address(s: &str) -> Result<DeviceAddress, AddressError> {
    let err = || AddressError(s.to_string());
    let lower = s.trim().to_ascii_lowercase();

    if let Some(rest) = lower.strip_prefix("gpib") {
        let mut parts = rest.split(',');
        let bus = parts.next().and_then(|b| parse_number(b.trim())).ok_or_else(err)?;
        let primary = parts.next().and_then(parse_gpib_address).ok_or_else(err)?;
        let secondary = match parts.next() {
            Some(sa) => Some(parse_gpib_address(sa).ok_or_else(err)?),
            None => None,
        };
        if parts.next().is_some() {
            return Err(err());
        }
        Ok(DeviceAddress::Gpib {
            bus,
            primary,
            secondary,
        })
    } else if let Some(rest) = lower.strip_prefix("inst") {
        parse_number(rest)
            .map(DeviceAddress::Instrument)
            .ok_or_else(err)
    } else {
        Err(err())
    }
}

impl FromStr for DeviceAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_address(s)
    }
}
