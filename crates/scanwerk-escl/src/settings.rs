// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// `ScanSettings` request document.

use std::fmt::Write as _;

use scanwerk_core::types::{CapabilitySet, InputSource, ScanJobRequest};

use crate::xml::{self, ESCL_NS, PWG_NS};

/// eSCL version written into requests when the device did not report one.
const DEFAULT_VERSION: &str = "2.0";

/// Render the `ScanSettings` body POSTed to `ScanJobs`.
///
/// Fields left unset in `request` are omitted so the device applies its own
/// defaults.  A full-page scan region is added when the device advertised its
/// maximum size.
pub fn scan_settings_xml(request: &ScanJobRequest, caps: &CapabilitySet) -> String {
    let mut out = String::with_capacity(1024);
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = writeln!(
        out,
        "<scan:ScanSettings xmlns:scan=\"{ESCL_NS}\" xmlns:pwg=\"{PWG_NS}\">"
    );
    let version = caps.version.as_deref().unwrap_or(DEFAULT_VERSION);
    element(&mut out, "pwg:Version", version);

    if let Some(intent) = &request.intent {
        element(&mut out, "scan:Intent", intent);
    }

    if let (Some(width), Some(height)) = (caps.max_width, caps.max_height) {
        out.push_str("  <pwg:ScanRegions>\n    <pwg:ScanRegion>\n");
        let _ = writeln!(out, "      <pwg:Height>{height}</pwg:Height>");
        let _ = writeln!(
            out,
            "      <pwg:ContentRegionUnits>escl:ThreeHundredthsOfInches</pwg:ContentRegionUnits>"
        );
        let _ = writeln!(out, "      <pwg:Width>{width}</pwg:Width>");
        out.push_str("      <pwg:XOffset>0</pwg:XOffset>\n      <pwg:YOffset>0</pwg:YOffset>\n");
        out.push_str("    </pwg:ScanRegion>\n  </pwg:ScanRegions>\n");
    }

    let source = request.input_source.or_else(|| {
        // Duplex implies the feeder even when no source was chosen.
        request.duplex.then_some(InputSource::Feeder)
    });
    if let Some(source) = source {
        element(&mut out, "pwg:InputSource", source.escl_keyword());
    }
    if let Some(mode) = &request.color_mode {
        element(&mut out, "scan:ColorMode", mode.escl_keyword());
    }
    if let Some(dpi) = request.resolution {
        element(&mut out, "scan:XResolution", &dpi.to_string());
        element(&mut out, "scan:YResolution", &dpi.to_string());
    }

    let mime = request.document_format.mime_type();
    element(&mut out, "pwg:DocumentFormat", mime);
    element(&mut out, "scan:DocumentFormatExt", mime);

    if source == Some(InputSource::Feeder) {
        element(&mut out, "scan:Duplex", if request.duplex { "true" } else { "false" });
    }

    out.push_str("</scan:ScanSettings>\n");
    out
}

fn element(out: &mut String, name: &str, value: &str) {
    let _ = writeln!(out, "  <{name}>{}</{name}>", xml::text(value));
}
