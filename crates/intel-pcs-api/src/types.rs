// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Matter Labs

use std::fmt;

/// Platform filter of the FMSPC catalog endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformFilter {
    /// All platforms.
    All,
    /// Client platforms.
    Client,
    /// Intel E3 server platforms.
    E3,
    /// Intel E5 server platforms.
    E5,
}

impl fmt::Display for PlatformFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformFilter::All => write!(f, "all"),
            PlatformFilter::Client => write!(f, "client"),
            PlatformFilter::E3 => write!(f, "E3"),
            PlatformFilter::E5 => write!(f, "E5"),
        }
    }
}
