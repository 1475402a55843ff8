// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Structured logging for the fleet.
//!
//! Everything logs through `tracing`. The binary installs a subscriber once
//! at startup:
//!
//! ```rust,ignore
//! use agent_fleet::telemetry::{init_telemetry, TelemetryConfig};
//!
//! init_telemetry(&TelemetryConfig::for_verbosity(1))?;
//! ```
//!
//! `RUST_LOG` overrides the preset level unless a filter directive is set.

mod init;

pub use init::{init_telemetry, TelemetryConfig};
