// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanwerk eSCL — mDNS scanner discovery, capability negotiation, scan job
// sessions, and streamed page retrieval.  This crate bridges between the core
// domain types defined in `scanwerk-core` and the devices on the network.

pub mod capabilities;
pub mod discovery;
pub mod registry;
pub mod retriever;
pub mod session;
pub mod settings;
pub mod status;
pub mod transport;
pub mod workflow;
pub mod xml;

#[cfg(test)]
mod mock;

pub use capabilities::CapabilityNegotiator;
pub use discovery::DeviceDiscovery;
pub use registry::DeviceRegistry;
pub use retriever::{ImageRetriever, ImageStream, NextImage};
pub use session::{DeviceSession, JobSessionManager};
pub use transport::{EsclTransport, HttpTransport};
pub use workflow::{ScanReport, Termination, run_scan};
