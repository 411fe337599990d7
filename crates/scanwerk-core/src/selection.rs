// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Collaborator interfaces: how a front end picks devices and scan options,
// and where finished pages go.
//
// The console front end implements these interactively; `ScriptedSelector`
// answers from a fixed script for tests and unattended runs.

use crate::error::Result;
use crate::types::{AcquiredImage, CapabilitySet, ColorMode, Device, DocumentFormat, InputSource};

/// Pure selection callbacks over discovered devices and negotiated
/// capabilities.  `None` means "nothing selected".
pub trait ScanOptionSelector {
    /// Pick a device; returns an index into `devices`.
    fn select_device(&mut self, devices: &[Device]) -> Option<usize>;

    /// Told which input sources the device has before any source is picked.
    fn describe_input_sources(&mut self, _device: &Device, _capabilities: &CapabilitySet) {}

    /// Pick between flatbed and feeder.  Only asked when the device offers
    /// more than one source.
    fn select_input_source(&mut self, device: &Device, sources: &[InputSource])
    -> Option<InputSource>;

    fn select_intent(&mut self, intents: &[String]) -> Option<String>;

    fn select_color_mode(&mut self, modes: &[ColorMode]) -> Option<ColorMode>;

    fn select_resolution(&mut self, resolutions: &[u32]) -> Option<u32>;

    /// Pick the delivery format.  Unlike the other options this one has no
    /// device default, so `None` aborts the scan.
    fn select_document_format(&mut self, formats: &[DocumentFormat]) -> Option<DocumentFormat>;

    /// Scan both sides?  Only asked when the feeder is in use and the device
    /// can duplex.
    fn select_duplex(&mut self) -> bool {
        false
    }
}

/// Destination for acquired pages.
pub trait ImageSink {
    /// Every option is chosen and the job is about to be submitted.
    fn acquisition_started(&mut self) {}

    fn save_image(&mut self, image: AcquiredImage) -> Result<()>;
}

/// In-memory sink, mostly for tests.
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub images: Vec<AcquiredImage>,
}

impl ImageSink for CollectingSink {
    fn save_image(&mut self, image: AcquiredImage) -> Result<()> {
        self.images.push(image);
        Ok(())
    }
}

/// Selector that answers from preset choices.
///
/// Presets are returned as given, without checking them against what the
/// device offers; job creation rejects unsupported values.  Only the
/// document format falls back to the first offered one when unset.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSelector {
    pub device_index: Option<usize>,
    pub input_source: Option<InputSource>,
    pub intent: Option<String>,
    pub color_mode: Option<ColorMode>,
    pub resolution: Option<u32>,
    pub document_format: Option<DocumentFormat>,
    pub duplex: bool,
}

impl ScriptedSelector {
    /// Selects the first device and a fixed document format, leaving every
    /// other option at the device default.
    pub fn first_device(format: DocumentFormat) -> Self {
        Self {
            device_index: Some(0),
            document_format: Some(format),
            ..Default::default()
        }
    }
}

impl ScanOptionSelector for ScriptedSelector {
    fn select_device(&mut self, devices: &[Device]) -> Option<usize> {
        self.device_index.filter(|i| *i < devices.len())
    }

    fn select_input_source(
        &mut self,
        _device: &Device,
        _sources: &[InputSource],
    ) -> Option<InputSource> {
        self.input_source
    }

    fn select_intent(&mut self, _intents: &[String]) -> Option<String> {
        self.intent.clone()
    }

    fn select_color_mode(&mut self, _modes: &[ColorMode]) -> Option<ColorMode> {
        self.color_mode.clone()
    }

    fn select_resolution(&mut self, _resolutions: &[u32]) -> Option<u32> {
        self.resolution
    }

    fn select_document_format(&mut self, formats: &[DocumentFormat]) -> Option<DocumentFormat> {
        self.document_format
            .clone()
            .or_else(|| formats.first().cloned())
    }

    fn select_duplex(&mut self) -> bool {
        self.duplex
    }
}
