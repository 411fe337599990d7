// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Error reporting: full cause chains for logs, plain-English hints for the
// console.

use std::error::Error;
use std::fmt::Write as _;

use crate::error::ScanError;

/// Render an error and every nested cause, one per line.
///
/// ```text
/// image acquisition failed
/// Inner error: eSCL protocol error: GET NextDocument
/// Inner error: connection reset by peer
/// ```
pub fn full_message(err: &(dyn Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut cause = err.source();
    while let Some(inner) = cause {
        let _ = write!(out, "\nInner error: {inner}");
        cause = inner.source();
    }
    out
}

/// Severity of an error from the user's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Network blip or busy device; trying again later may work.
    Transient,
    /// The user must change something (pick a device, pick other settings).
    ActionRequired,
    /// Retrying will not help.
    Permanent,
}

/// A human-readable error with an actionable suggestion.
#[derive(Debug, Clone)]
pub struct HumanError {
    pub message: String,
    pub suggestion: String,
    pub severity: Severity,
}

impl HumanError {
    fn new(message: &str, suggestion: impl Into<String>, severity: Severity) -> Self {
        Self {
            message: message.into(),
            suggestion: suggestion.into(),
            severity,
        }
    }
}

/// Map a `ScanError` onto something a person at the scanner can act on.
pub fn humanize_error(err: &ScanError) -> HumanError {
    match err {
        ScanError::Discovery { .. } => HumanError::new(
            "We can't search for scanners right now.",
            "Make sure this computer is on the same network as the scanner and that multicast DNS is not blocked.",
            Severity::Transient,
        ),
        ScanError::SearchCanceled => HumanError::new(
            "Searching was canceled.",
            "Run the scan again and let the search finish.",
            Severity::ActionRequired,
        ),
        ScanError::NoDevicesFound => HumanError::new(
            "No scanners were found.",
            "Check that the scanner is switched on and connected to the same network, or pass its address with --device-url.",
            Severity::Transient,
        ),
        ScanError::NotSelected(what) => HumanError::new(
            "Nothing was selected.",
            format!("Choose a {what} to continue."),
            Severity::ActionRequired,
        ),
        ScanError::Protocol { message, .. } => humanize_protocol(message, &full_message(err)),
        ScanError::UnsupportedDevice(_) => HumanError::new(
            "This scanner did not describe what it can do.",
            "The device may not fully support eSCL (AirScan). Try updating its firmware.",
            Severity::Permanent,
        ),
        ScanError::InvalidParameter { field, value } => HumanError::new(
            "The scanner does not support those settings.",
            format!("Pick a different {field}; '{value}' is not offered by this device."),
            Severity::ActionRequired,
        ),
        ScanError::DeviceBusy(_) => HumanError::new(
            "The scanner is busy with another job.",
            "Wait for the other scan to finish, or cancel it on the scanner's panel.",
            Severity::Transient,
        ),
        ScanError::Acquisition { source } => {
            let mut human = humanize_error(source);
            human.message = format!("Scanning stopped. {}", human.message);
            human
        }
        ScanError::JobNotActive { .. } => HumanError::new(
            "That scan job has already finished.",
            "Start a new scan.",
            Severity::Permanent,
        ),
        ScanError::Canceled => HumanError::new(
            "The scan was canceled.",
            "Start a new scan when you are ready.",
            Severity::ActionRequired,
        ),
        ScanError::Config(detail) => HumanError::new(
            "The configuration is not valid.",
            format!("Fix the configuration file and try again. ({detail})"),
            Severity::ActionRequired,
        ),
        ScanError::Io(io_err) if io_err.kind() == std::io::ErrorKind::PermissionDenied => {
            HumanError::new(
                "We don't have permission to write there.",
                "Choose another output directory.",
                Severity::ActionRequired,
            )
        }
        ScanError::Io(_) | ScanError::Serialization(_) => HumanError::new(
            "There was a problem reading or writing a file.",
            "Check the disk has space and try again.",
            Severity::Transient,
        ),
    }
}

/// `detail` is shown to the user; `chain` (the full cause chain) is what gets
/// classified, since transport timeouts sit below the protocol message.
fn humanize_protocol(detail: &str, chain: &str) -> HumanError {
    let lower = chain.to_ascii_lowercase();
    if lower.contains("timed out") {
        HumanError::new(
            "The scanner didn't respond in time.",
            "It might be warming up or switched off. Check it's on, then try again.",
            Severity::Transient,
        )
    } else if lower.contains("malformed") || lower.contains("xml") {
        HumanError::new(
            "The scanner sent a reply we couldn't read.",
            format!("Try again. If this keeps happening, the device may not follow eSCL closely. ({detail})"),
            Severity::Permanent,
        )
    } else {
        HumanError::new(
            "The connection to the scanner failed.",
            format!("Check the scanner is reachable and try again. ({detail})"),
            Severity::Transient,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_message_walks_every_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset by peer");
        let err = ScanError::acquisition(ScanError::protocol_with("GET NextDocument", io));
        let text = full_message(&err);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "image acquisition failed",
                "Inner error: eSCL protocol error: GET NextDocument",
                "Inner error: connection reset by peer",
            ]
        );
    }

    #[test]
    fn busy_is_transient() {
        let human = humanize_error(&ScanError::DeviceBusy("HTTP 503".into()));
        assert_eq!(human.severity, Severity::Transient);
    }

    #[test]
    fn invalid_parameter_names_the_field() {
        let human = humanize_error(&ScanError::InvalidParameter {
            field: "color mode",
            value: "CMYK".into(),
        });
        assert_eq!(human.severity, Severity::ActionRequired);
        assert!(human.suggestion.contains("color mode"));
    }

    #[test]
    fn acquisition_uses_inner_hint() {
        let err = ScanError::acquisition(ScanError::protocol("request timed out"));
        let human = humanize_error(&err);
        assert!(human.message.starts_with("Scanning stopped."));
        assert!(human.message.contains("didn't respond"));
    }

    #[test]
    fn timeout_below_protocol_message_is_recognised() {
        let timeout = std::io::Error::new(std::io::ErrorKind::TimedOut, "request timed out after 30s");
        let human = humanize_error(&ScanError::protocol_with("GET http://10.0.0.5/eSCL/ScannerStatus", timeout));
        assert_eq!(human.severity, Severity::Transient);
        assert!(human.message.contains("didn't respond"));
    }
}
