// Copyright (c) The flakehunt Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::MaxFailuresParseError;
use serde::Deserialize;
use std::{fmt, str::FromStr};

/// The number of times a single test may fail in seeded rounds before flakehunt stops retrying
/// it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MaxFailures {
    /// A test may fail at most this many times.
    Count(u32),

    /// Tests may fail any number of times.
    Unlimited,
}

impl MaxFailures {
    /// Returns true if `failures` is more than the allowed number of failures.
    pub fn is_exceeded(&self, failures: u32) -> bool {
        match self {
            Self::Count(max) => failures > *max,
            Self::Unlimited => false,
        }
    }
}

impl FromStr for MaxFailures {
    type Err = MaxFailuresParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("unlimited") {
            return Ok(Self::Unlimited);
        }

        let count = s
            .parse::<i64>()
            .map_err(|e| MaxFailuresParseError::new(format!("{e} parsing '{s}'")))?;
        if count <= 0 {
            return Err(MaxFailuresParseError::new(
                "max-failures-per-test may not be <= 0",
            ));
        }
        let count = u32::try_from(count)
            .map_err(|e| MaxFailuresParseError::new(format!("{e} parsing '{s}'")))?;

        Ok(Self::Count(count))
    }
}

impl fmt::Display for MaxFailures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(max) => write!(f, "{max}"),
            Self::Unlimited => write!(f, "unlimited"),
        }
    }
}

impl<'de> Deserialize<'de> for MaxFailures {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = MaxFailures;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                write!(formatter, "a positive integer or the string \"unlimited\"")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v == "unlimited" {
                    return Ok(MaxFailures::Unlimited);
                }

                // If v is a string that represents a number, suggest using the integer form.
                if v.parse::<i64>().is_ok() {
                    return Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Str(v),
                        &"the string \"unlimited\" (numbers must be specified without quotes)",
                    ));
                }

                Err(serde::de::Error::invalid_value(
                    serde::de::Unexpected::Str(v),
                    &self,
                ))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match u32::try_from(v) {
                    Ok(count) if count > 0 => Ok(MaxFailures::Count(count)),
                    _ => Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Signed(v),
                        &self,
                    )),
                }
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                match u32::try_from(v) {
                    Ok(count) if count > 0 => Ok(MaxFailures::Count(count)),
                    _ => Err(serde::de::Error::invalid_value(
                        serde::de::Unexpected::Unsigned(v),
                        &self,
                    )),
                }
            }
        }

        deserializer.deserialize_any(V)
    }
}
