//! Tunables, read from the boot command line.
//!
//! The command line is a whitespace separated list of `key=value` pairs,
//! values in decimal or `0x` hex:
//!
//! ```text
//! frames=10 swap_slots=0x800 io_retries=5
//! ```

use crate::mem::MAX_INDEX;
use alloc::{string::String, string::ToString, vec::Vec};
use core::error::Error;
use core::fmt::{self, Display, Formatter};
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::{char, digit1, hex_digit1, multispace0, multispace1};
use nom::combinator::{all_consuming, map_res};
use nom::multi::separated_list0;
use nom::sequence::{delimited, preceded, separated_pair};
use nom::IResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PagerConfig {
    /// Use at most this many of the frames handed to the server. `None`
    /// uses all of them.
    pub frames: Option<usize>,
    pub swap_slots: usize,
    /// First sector of the swap area on the backing device.
    pub swap_start: u32,
    /// How many times a failed or stalled transfer is retried before the
    /// faulting process is given up on.
    pub io_retries: u32,
    pub io_timeout_us: u64,
    /// Delay before the first retry. Doubles with every further attempt.
    pub retry_backoff_us: u64,
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self {
            frames: None,
            swap_slots: 2048,
            swap_start: 0,
            io_retries: 3,
            io_timeout_us: 500_000,
            retry_backoff_us: 10_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    Syntax,
    UnknownKey(String),
    OutOfRange(&'static str),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax => write!(f, "malformed command line"),
            Self::UnknownKey(key) => write!(f, "unknown option `{key}`"),
            Self::OutOfRange(key) => write!(f, "value of `{key}` out of range"),
        }
    }
}

impl Error for ConfigError {}

fn key(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_lowercase() || c == '_')(input)
}

fn number(input: &str) -> IResult<&str, u64> {
    alt((
        map_res(preceded(tag("0x"), hex_digit1), |digits: &str| {
            u64::from_str_radix(digits, 16)
        }),
        map_res(digit1, |digits: &str| digits.parse::<u64>()),
    ))(input)
}

fn entries(input: &str) -> IResult<&str, Vec<(&str, u64)>> {
    all_consuming(delimited(
        multispace0,
        separated_list0(multispace1, separated_pair(key, char('='), number)),
        multispace0,
    ))(input)
}

fn bounded<T: TryFrom<u64>>(name: &'static str, value: u64, max: u64) -> Result<T, ConfigError> {
    if value > max {
        return Err(ConfigError::OutOfRange(name));
    }
    T::try_from(value).map_err(|_| ConfigError::OutOfRange(name))
}

impl PagerConfig {
    /// Parses a command line on top of the defaults.
    pub fn parse(cmdline: &str) -> Result<Self, ConfigError> {
        let (_, entries) = entries(cmdline).map_err(|_| ConfigError::Syntax)?;

        let mut config = Self::default();
        for (name, value) in entries {
            match name {
                "frames" => {
                    if value == 0 {
                        return Err(ConfigError::OutOfRange("frames"));
                    }
                    config.frames = Some(bounded("frames", value, MAX_INDEX as u64)?);
                }
                "swap_slots" => config.swap_slots = bounded("swap_slots", value, MAX_INDEX as u64)?,
                "swap_start" => config.swap_start = bounded("swap_start", value, u32::MAX as u64)?,
                "io_retries" => config.io_retries = bounded("io_retries", value, u32::MAX as u64)?,
                "io_timeout_us" => {
                    if value == 0 {
                        return Err(ConfigError::OutOfRange("io_timeout_us"));
                    }
                    config.io_timeout_us = value;
                }
                "retry_backoff_us" => config.retry_backoff_us = value,
                other => return Err(ConfigError::UnknownKey(other.to_string())),
            }
        }
        Ok(config)
    }
}
