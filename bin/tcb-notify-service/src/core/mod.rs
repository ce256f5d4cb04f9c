// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Matter Labs

//! Configuration and shared constants

mod config;
mod constants;

pub use config::{Config, WorkerSelection};
pub use constants::*;
