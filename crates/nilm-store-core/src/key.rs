//! Location keys and hierarchical path joining.
//!
//! A [`Key`] names a dataset inside the store as a building, an optional
//! utility and an optional meter (`building1/elec/meter1`). Keys render to
//! the canonical absolute form used as table paths. [`join_key`] builds such
//! paths from arbitrary segments.

use std::fmt;
use std::str::FromStr;

use snafu::prelude::*;

const BUILDING_PREFIX: &str = "building";
const METER_PREFIX: &str = "meter";

/// Whether a key error is a grammar problem or an out-of-range identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyErrorKind {
    /// The string does not follow `building<B>[/<utility>[/meter<M>]]`.
    Format,
    /// The identifiers parse but are below 1 (or beyond `u32`).
    Validation,
}

/// Errors produced when parsing or building a [`Key`].
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum ParseKeyError {
    /// The first segment does not start with `building`.
    #[snafu(display(
        "The first element must be 'building<I>', e.g. 'building1'; not '{segment}'"
    ))]
    MissingBuildingPrefix {
        /// The offending first segment.
        segment: String,
    },

    /// The third segment does not start with `meter`.
    #[snafu(display("The third element must be 'meter<I>', e.g. 'meter1'; not '{segment}'"))]
    MissingMeterPrefix {
        /// The offending third segment.
        segment: String,
    },

    /// More than three segments were supplied.
    #[snafu(display("key '{input}' has more than three segments"))]
    TooManySegments {
        /// The original input.
        input: String,
    },

    /// The text after `building` or `meter` is not an integer.
    #[snafu(display("'{prefix}' must be followed by an integer, got '{segment}': {source}"))]
    InvalidNumber {
        /// Either `building` or `meter`.
        prefix: &'static str,
        /// The offending segment.
        segment: String,
        /// The parse error returned by `i64::from_str`.
        source: std::num::ParseIntError,
    },

    /// Building identifier is below 1.
    #[snafu(display("building must be >= 1 (got {building})"))]
    BuildingOutOfRange {
        /// The parsed building identifier.
        building: i64,
    },

    /// Meter identifier is below 1.
    #[snafu(display("meter must be >= 1 (got {meter})"))]
    MeterOutOfRange {
        /// The parsed meter identifier.
        meter: i64,
    },
}

impl ParseKeyError {
    /// Classify the error as a format or validation failure.
    pub fn kind(&self) -> KeyErrorKind {
        match self {
            ParseKeyError::BuildingOutOfRange { .. } | ParseKeyError::MeterOutOfRange { .. } => {
                KeyErrorKind::Validation
            }
            _ => KeyErrorKind::Format,
        }
    }
}

/// A location of data or metadata within the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key {
    building: u32,
    utility: Option<String>,
    meter: Option<u32>,
}

impl Key {
    /// Build a key from identifiers, without parsing. No utility is stored.
    ///
    /// # Errors
    /// Returns a validation error if `building` or `meter` is below 1.
    pub fn new(building: u32, meter: Option<u32>) -> Result<Self, ParseKeyError> {
        Ok(Key {
            building: check_building(i64::from(building))?,
            utility: None,
            meter: meter.map(|m| check_meter(i64::from(m))).transpose()?,
        })
    }

    /// Parse `building<B>[/<utility>[/meter<M>]]`; surrounding slashes are ignored.
    pub fn parse(input: &str) -> Result<Self, ParseKeyError> {
        input.parse()
    }

    /// Building identifier (always >= 1).
    pub fn building(&self) -> u32 {
        self.building
    }

    /// Utility segment, if the key was parsed from a string that had one.
    pub fn utility(&self) -> Option<&str> {
        self.utility.as_deref()
    }

    /// Meter identifier, if present (always >= 1).
    pub fn meter(&self) -> Option<u32> {
        self.meter
    }
}

fn parse_id(prefix: &'static str, segment: &str) -> Result<i64, ParseKeyError> {
    segment[prefix.len()..]
        .parse::<i64>()
        .context(InvalidNumberSnafu {
            prefix,
            segment: segment.to_string(),
        })
}

fn check_building(value: i64) -> Result<u32, ParseKeyError> {
    u32::try_from(value)
        .ok()
        .filter(|b| *b >= 1)
        .context(BuildingOutOfRangeSnafu { building: value })
}

fn check_meter(value: i64) -> Result<u32, ParseKeyError> {
    u32::try_from(value)
        .ok()
        .filter(|m| *m >= 1)
        .context(MeterOutOfRangeSnafu { meter: value })
}

impl FromStr for Key {
    type Err = ParseKeyError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let split: Vec<&str> = input.trim_matches('/').split('/').collect();

        let first = split[0];
        ensure!(
            first.starts_with(BUILDING_PREFIX),
            MissingBuildingPrefixSnafu { segment: first }
        );
        ensure!(split.len() <= 3, TooManySegmentsSnafu { input });

        let building = check_building(parse_id(BUILDING_PREFIX, first)?)?;
        let utility = split.get(1).map(|u| u.to_string());

        let meter = match split.get(2) {
            Some(segment) => {
                ensure!(
                    segment.starts_with(METER_PREFIX),
                    MissingMeterPrefixSnafu { segment: *segment }
                );
                Some(check_meter(parse_id(METER_PREFIX, segment)?)?)
            }
            None => None,
        };

        Ok(Key {
            building,
            utility,
            meter,
        })
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{BUILDING_PREFIX}{}", self.building)?;
        if let Some(meter) = self.meter {
            write!(f, "/elec/{METER_PREFIX}{meter}")?;
        }
        Ok(())
    }
}

/// Join path segments into a canonical absolute key.
///
/// Each segment is stringified and stripped of leading/trailing `/`; empty
/// segments are skipped. Zero segments (or only empty ones) yield `/`.
pub fn join_key<I>(segments: I) -> String
where
    I: IntoIterator,
    I::Item: fmt::Display,
{
    let parts: Vec<String> = segments
        .into_iter()
        .map(|s| s.to_string().trim_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect();
    format!("/{}", parts.join("/"))
}

/// Ensure a key has a leading slash and no trailing slash.
pub fn normalize_key(key: &str) -> String {
    let mut key = if key.starts_with('/') {
        key.to_string()
    } else {
        format!("/{key}")
    };
    if key.len() > 1 && key.ends_with('/') {
        key.pop();
    }
    key
}

/// Join heterogeneous segments (strings, integers, keys) into a canonical key.
///
/// ```
/// use nilm_store_core::key_path;
/// assert_eq!(key_path!("building1", "elec", "meter1"), "/building1/elec/meter1");
/// assert_eq!(key_path!(format!("building{}", 2), "elec"), "/building2/elec");
/// assert_eq!(key_path!(), "/");
/// ```
#[macro_export]
macro_rules! key_path {
    () => {
        ::std::string::String::from("/")
    };
    ($($seg:expr),+ $(,)?) => {
        $crate::key::join_key([$(&$seg as &dyn ::std::fmt::Display),+])
    };
}
