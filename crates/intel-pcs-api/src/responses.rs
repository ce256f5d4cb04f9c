// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Matter Labs

/// JSON array of `{fmspc, platform}` objects, verbatim.
pub type FmspcJsonResponse = String;

/// JSON object `{tcbInfo, signature}`, verbatim.
///
/// The body is kept as the raw string so the caller can persist it for audit
/// and decode the fields it needs.
pub type TcbInfoJsonResponse = String;
