// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Process exit codes.

use std::process::ExitCode;

use scanwerk_core::error::{ErrorKind, ScanError};

pub const SUCCESS: u8 = 0;
/// The user canceled the device search or the scan.
pub const CANCELED: u8 = 1;
pub const NO_DEVICES: u8 = 2;
/// No device, or no document format, was selected.
pub const NOT_SELECTED: u8 = 3;
pub const ACQUISITION_FAILED: u8 = 4;
pub const UNHANDLED: u8 = 10;

pub fn code_for(err: &ScanError) -> u8 {
    match err.kind() {
        ErrorKind::SearchCanceled | ErrorKind::Canceled => CANCELED,
        ErrorKind::NoDevicesFound => NO_DEVICES,
        ErrorKind::NotSelected => NOT_SELECTED,
        ErrorKind::Acquisition => ACQUISITION_FAILED,
        ErrorKind::Discovery
        | ErrorKind::Protocol
        | ErrorKind::UnsupportedDevice
        | ErrorKind::InvalidParameter
        | ErrorKind::DeviceBusy
        | ErrorKind::Other => UNHANDLED,
    }
}

pub fn exit_code(err: &ScanError) -> ExitCode {
    ExitCode::from(code_for(err))
}
