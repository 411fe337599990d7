// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk — Core types, errors, and collaborator traits shared across all
// crates.

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod selection;
pub mod types;

pub use config::ClientConfig;
pub use error::{ErrorKind, ScanError};
pub use types::*;
