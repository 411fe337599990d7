// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scanner capability negotiation.
//
// Fetches `ScannerCapabilities` from the device, parses it into a
// `CapabilitySet`, and caches the result in the device registry.  Only GET
// requests are issued, so every call here is free of side effects on the
// device.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use scanwerk_core::error::{Result, ScanError};
use scanwerk_core::types::{CapabilitySet, ColorMode, Device, DocumentFormat, InputSource};

use crate::registry::DeviceRegistry;
use crate::status::ScannerStatus;
use crate::transport::EsclTransport;
use crate::xml::Element;

/// Resource name of the capability document.
pub const CAPABILITIES_RESOURCE: &str = "ScannerCapabilities";

/// Resource name of the status document.
pub const STATUS_RESOURCE: &str = "ScannerStatus";

/// Common DPI steps offered when a device only advertises a range.
const STANDARD_RESOLUTIONS: [u32; 8] = [75, 100, 150, 200, 300, 600, 1200, 2400];

/// Fetches and caches device capabilities.
pub struct CapabilityNegotiator<T> {
    transport: Arc<T>,
    registry: Arc<DeviceRegistry>,
}

impl<T> Clone for CapabilityNegotiator<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T: EsclTransport> CapabilityNegotiator<T> {
    pub fn new(transport: Arc<T>, registry: Arc<DeviceRegistry>) -> Self {
        Self {
            transport,
            registry,
        }
    }

    /// Capabilities of `device`, fetched on first use and cached afterwards.
    pub async fn capabilities(&self, device: &Device) -> Result<Arc<CapabilitySet>> {
        if let Some(cached) = self.registry.capabilities(&device.id) {
            debug!(device = %device.id, "using cached capabilities");
            return Ok(cached);
        }
        self.refresh_capabilities(device).await
    }

    /// Re-fetch capabilities, replacing any cached copy.
    #[instrument(skip(self, device), fields(device = %device.id))]
    pub async fn refresh_capabilities(&self, device: &Device) -> Result<Arc<CapabilitySet>> {
        let url = device.endpoint(CAPABILITIES_RESOURCE)?;
        let reply = self
            .transport
            .get(&url)
            .await
            .map_err(|e| ScanError::protocol_with(format!("GET {url}"), e))?;

        if !reply.is_success() {
            warn!(status = reply.status, "ScannerCapabilities request failed");
            return Err(ScanError::protocol(format!(
                "GET {url} returned HTTP {}",
                reply.status
            )));
        }

        let caps = Arc::new(parse_capabilities(&reply.body)?);
        info!(
            make_and_model = caps.make_and_model.as_deref().unwrap_or("unknown"),
            color_modes = caps.color_modes.len(),
            resolutions = caps.resolutions.len(),
            formats = caps.document_formats.len(),
            "scanner capabilities negotiated"
        );
        self.registry.store_capabilities(&device.id, Arc::clone(&caps));
        Ok(caps)
    }

    pub async fn supported_intents(&self, device: &Device) -> Result<Vec<String>> {
        Ok(self.capabilities(device).await?.intents.clone())
    }

    pub async fn supported_color_modes(&self, device: &Device) -> Result<Vec<ColorMode>> {
        Ok(self.capabilities(device).await?.color_modes.clone())
    }

    pub async fn supported_resolutions(&self, device: &Device) -> Result<Vec<u32>> {
        Ok(self
            .capabilities(device)
            .await?
            .resolutions
            .iter()
            .copied()
            .collect())
    }

    pub async fn supported_document_formats(&self, device: &Device) -> Result<Vec<DocumentFormat>> {
        Ok(self.capabilities(device).await?.document_formats.clone())
    }

    pub async fn input_sources(&self, device: &Device) -> Result<Vec<InputSource>> {
        Ok(self.capabilities(device).await?.input_sources())
    }

    /// Current scanner state.  Never cached.
    #[instrument(skip(self, device), fields(device = %device.id))]
    pub async fn scanner_status(&self, device: &Device) -> Result<ScannerStatus> {
        let url = device.endpoint(STATUS_RESOURCE)?;
        let reply = self
            .transport
            .get(&url)
            .await
            .map_err(|e| ScanError::protocol_with(format!("GET {url}"), e))?;
        if !reply.is_success() {
            return Err(ScanError::protocol(format!(
                "GET {url} returned HTTP {}",
                reply.status
            )));
        }
        ScannerStatus::parse(&reply.body)
    }
}

/// Parse a `ScannerCapabilities` document.
///
/// Values are merged across the platen and both ADF modes.  Fails with
/// `UnsupportedDevice` when the document lacks an input source, color modes,
/// document formats, or resolutions.
pub fn parse_capabilities(xml: &[u8]) -> Result<CapabilitySet> {
    let root = Element::parse(xml)?;
    if root.name != "ScannerCapabilities" {
        return Err(ScanError::protocol(format!(
            "malformed capabilities: unexpected root element '{}'",
            root.name
        )));
    }

    let platen = root.path(&["Platen", "PlatenInputCaps"]);
    let adf = root.child("Adf");
    let adf_simplex = adf.and_then(|a| a.child("AdfSimplexInputCaps"));
    let adf_duplex = adf.and_then(|a| a.child("AdfDuplexInputCaps"));
    let adf_duplex_option = adf
        .map(|a| a.descendants("AdfOption").iter().any(|o| o.text == "Duplex"))
        .unwrap_or(false);

    let mut caps = CapabilitySet {
        make_and_model: non_empty(root.child_text("MakeAndModel")),
        version: non_empty(root.child_text("Version")),
        has_flatbed: platen.is_some(),
        has_feeder: adf_simplex.is_some() || adf_duplex.is_some(),
        has_duplex: adf_duplex.is_some() || adf_duplex_option,
        ..Default::default()
    };

    for input in [platen, adf_simplex, adf_duplex].into_iter().flatten() {
        merge_input_caps(&mut caps, input);
    }

    if !caps.has_flatbed && !caps.has_feeder {
        return Err(ScanError::UnsupportedDevice(
            "capabilities advertise neither a platen nor a feeder".into(),
        ));
    }
    if caps.color_modes.is_empty() {
        return Err(ScanError::UnsupportedDevice("no color modes advertised".into()));
    }
    if caps.document_formats.is_empty() {
        return Err(ScanError::UnsupportedDevice("no document formats advertised".into()));
    }
    if caps.resolutions.is_empty() {
        return Err(ScanError::UnsupportedDevice("no resolutions advertised".into()));
    }
    Ok(caps)
}

fn merge_input_caps(caps: &mut CapabilitySet, input: &Element) {
    for intent in input.descendants("Intent") {
        push_unique(&mut caps.intents, intent.text.clone());
    }
    for mode in input.descendants("ColorMode") {
        push_unique(&mut caps.color_modes, ColorMode::from_keyword(&mode.text));
    }
    // `DocumentFormatExt` is the eSCL 2.1+ spelling; older devices only send
    // `pwg:DocumentFormat`.
    for name in ["DocumentFormatExt", "DocumentFormat"] {
        for format in input.descendants(name) {
            push_unique(&mut caps.document_formats, DocumentFormat::from_mime(&format.text));
        }
    }
    for discrete in input.descendants("DiscreteResolution") {
        let x = number(discrete.child_text("XResolution"));
        let y = number(discrete.child_text("YResolution"));
        if let (Some(x), Some(y)) = (x, y)
            && x == y
        {
            caps.resolutions.insert(x);
        }
    }
    for range in input.descendants("ResolutionRange") {
        let (Some(xr), Some(yr)) = (range.child("XResolutionRange"), range.child("YResolutionRange")) else {
            continue;
        };
        let (Some((x_min, x_max, x_step)), Some((y_min, y_max, _))) = (bounds(xr), bounds(yr)) else {
            continue;
        };
        let (min, max) = (x_min.max(y_min), x_max.min(y_max));
        for dpi in STANDARD_RESOLUTIONS {
            let on_step = x_step == 0 || dpi.saturating_sub(x_min) % x_step == 0;
            if dpi >= min && dpi <= max && on_step {
                caps.resolutions.insert(dpi);
            }
        }
    }
    if caps.max_width.is_none() {
        caps.max_width = number(input.child_text("MaxWidth"));
    }
    if caps.max_height.is_none() {
        caps.max_height = number(input.child_text("MaxHeight"));
    }
}

fn bounds(range: &Element) -> Option<(u32, u32, u32)> {
    let min = number(range.child_text("Min"))?;
    let max = number(range.child_text("Max"))?;
    let step = number(range.child_text("Step")).unwrap_or(0);
    Some((min, max, step))
}

fn number(text: Option<&str>) -> Option<u32> {
    text.and_then(|t| t.trim().parse().ok())
}

fn non_empty(text: Option<&str>) -> Option<String> {
    text.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
}

fn push_unique<V: PartialEq>(values: &mut Vec<V>, value: V) {
    if !values.contains(&value) {
        values.push(value);
    }
}
