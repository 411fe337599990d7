// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Scanwerk eSCL client.

use std::collections::BTreeSet;
use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;
use uuid::Uuid;

use crate::error::{Result, ScanError};

/// Identity of a scanner on the network: the full mDNS service instance name
/// (or the base URL for manually added devices).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Physical scan input mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputSource {
    Flatbed,
    Feeder,
}

impl InputSource {
    /// `pwg:InputSource` keyword used in ScanSettings.
    pub fn escl_keyword(&self) -> &'static str {
        match self {
            Self::Flatbed => "Platen",
            Self::Feeder => "Feeder",
        }
    }
}

impl fmt::Display for InputSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flatbed => f.write_str("flatbed"),
            Self::Feeder => f.write_str("feeder"),
        }
    }
}

/// A scanner discovered on the local network via mDNS, or added by URL.
///
/// Immutable once created.  Negotiated capabilities live in the device
/// registry, keyed by [`DeviceId`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    /// Human-readable instance name.
    pub name: String,
    /// eSCL root, always ending in `/` (e.g. `http://10.0.0.5:80/eSCL/`).
    pub base_url: Url,
    pub make_and_model: Option<String>,
    pub uuid: Option<Uuid>,
    pub location: Option<String>,
    /// Input-source hints from the TXT `is` / `duplex` keys.  The capability
    /// document is authoritative once fetched.
    pub has_flatbed: bool,
    pub has_feeder: bool,
    pub has_duplex: bool,
    /// Advertised color spaces (TXT `cs`, e.g. `color`, `grayscale`).
    pub color_spaces: Vec<String>,
    /// Advertised document MIME types (TXT `pdl`).
    pub formats: Vec<String>,
    pub tls: bool,
    /// When this device was last advertised.
    pub last_seen: DateTime<Utc>,
    /// Whether this device was added by URL rather than via mDNS.
    pub manually_added: bool,
}

impl Device {
    /// Build a device record for a scanner the user typed in by URL.
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed = Url::parse(url)
            .map_err(|e| ScanError::Config(format!("invalid device URL '{url}': {e}")))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| ScanError::Config(format!("device URL '{url}' has no host")))?
            .to_owned();
        let base_url = with_trailing_slash(parsed);
        Ok(Self {
            id: DeviceId::new(base_url.as_str()),
            name: host,
            tls: base_url.scheme() == "https",
            base_url,
            make_and_model: None,
            uuid: None,
            location: None,
            has_flatbed: false,
            has_feeder: false,
            has_duplex: false,
            color_spaces: Vec::new(),
            formats: Vec::new(),
            last_seen: Utc::now(),
            manually_added: true,
        })
    }

    /// Resolve an eSCL resource (e.g. `ScannerCapabilities`) against the root.
    pub fn endpoint(&self, resource: &str) -> Result<Url> {
        self.base_url.join(resource).map_err(|e| {
            ScanError::protocol_with(format!("cannot resolve '{resource}' on {}", self.base_url), e)
        })
    }
}

/// Ensure a URL ends with `/` so relative joins stay below it.
pub fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// eSCL color mode keyword.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorMode {
    BlackAndWhite1,
    Grayscale8,
    Grayscale16,
    Rgb24,
    Rgb48,
    /// A keyword this client does not know about, kept verbatim.
    Other(String),
}

impl ColorMode {
    pub fn escl_keyword(&self) -> &str {
        match self {
            Self::BlackAndWhite1 => "BlackAndWhite1",
            Self::Grayscale8 => "Grayscale8",
            Self::Grayscale16 => "Grayscale16",
            Self::Rgb24 => "RGB24",
            Self::Rgb48 => "RGB48",
            Self::Other(keyword) => keyword,
        }
    }

    pub fn from_keyword(keyword: &str) -> Self {
        match keyword.trim() {
            "BlackAndWhite1" => Self::BlackAndWhite1,
            "Grayscale8" => Self::Grayscale8,
            "Grayscale16" => Self::Grayscale16,
            "RGB24" => Self::Rgb24,
            "RGB48" => Self::Rgb48,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for ColorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.escl_keyword())
    }
}

/// Document format the device is asked to deliver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentFormat {
    Jpeg,
    Pdf,
    Png,
    Tiff,
    /// Raw device output, passed through untouched.
    OctetStream,
    Other(String),
}

impl DocumentFormat {
    /// MIME type used for `pwg:DocumentFormat`.
    pub fn mime_type(&self) -> &str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Pdf => "application/pdf",
            Self::Png => "image/png",
            Self::Tiff => "image/tiff",
            Self::OctetStream => "application/octet-stream",
            Self::Other(mime) => mime,
        }
    }

    pub fn from_mime(mime: &str) -> Self {
        // Strip parameters such as `; charset=binary`.
        let essence = mime.split(';').next().unwrap_or_default().trim();
        match essence.to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" => Self::Jpeg,
            "application/pdf" => Self::Pdf,
            "image/png" => Self::Png,
            "image/tiff" => Self::Tiff,
            "application/octet-stream" => Self::OctetStream,
            _ => Self::Other(essence.to_owned()),
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Self::OctetStream)
    }

    /// File extension for saved pages.
    pub fn file_extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Pdf => "pdf",
            Self::Png => "png",
            Self::Tiff => "tif",
            Self::OctetStream | Self::Other(_) => "bin",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jpeg => f.write_str("JPEG"),
            Self::Pdf => f.write_str("PDF"),
            Self::Png => f.write_str("PNG"),
            Self::Tiff => f.write_str("TIFF"),
            Self::OctetStream => f.write_str("OctetStream"),
            Self::Other(mime) => f.write_str(mime),
        }
    }
}

/// Parsed scanner capabilities from `ScannerCapabilities`.
///
/// Values are the union over all input sources, first-seen order kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySet {
    pub make_and_model: Option<String>,
    /// eSCL protocol version (`pwg:Version`).
    pub version: Option<String>,
    pub intents: Vec<String>,
    pub color_modes: Vec<ColorMode>,
    /// Symmetric resolutions (X == Y) in DPI.
    pub resolutions: BTreeSet<u32>,
    pub document_formats: Vec<DocumentFormat>,
    pub has_flatbed: bool,
    pub has_feeder: bool,
    pub has_duplex: bool,
    /// Maximum scan width in 1/300 inch, when advertised.
    pub max_width: Option<u32>,
    /// Maximum scan height in 1/300 inch, when advertised.
    pub max_height: Option<u32>,
}

impl CapabilitySet {
    pub fn supports_intent(&self, intent: &str) -> bool {
        self.intents.iter().any(|i| i == intent)
    }

    pub fn supports_color_mode(&self, mode: &ColorMode) -> bool {
        self.color_modes.contains(mode)
    }

    pub fn supports_resolution(&self, dpi: u32) -> bool {
        self.resolutions.contains(&dpi)
    }

    pub fn supports_format(&self, format: &DocumentFormat) -> bool {
        self.document_formats.contains(format)
    }

    pub fn supports_input(&self, source: InputSource) -> bool {
        match source {
            InputSource::Flatbed => self.has_flatbed,
            InputSource::Feeder => self.has_feeder,
        }
    }

    /// Input sources in the order a user would be offered them.
    pub fn input_sources(&self) -> Vec<InputSource> {
        let mut sources = Vec::with_capacity(2);
        if self.has_flatbed {
            sources.push(InputSource::Flatbed);
        }
        if self.has_feeder {
            sources.push(InputSource::Feeder);
        }
        sources
    }
}

/// Parameters for a new scan job.
///
/// `None` means "leave it to the device default"; those fields are omitted
/// from the ScanSettings document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanJobRequest {
    pub intent: Option<String>,
    pub color_mode: Option<ColorMode>,
    pub resolution: Option<u32>,
    pub document_format: DocumentFormat,
    pub input_source: Option<InputSource>,
    pub duplex: bool,
}

impl ScanJobRequest {
    pub fn new(document_format: DocumentFormat) -> Self {
        Self {
            intent: None,
            color_mode: None,
            resolution: None,
            document_format,
            input_source: None,
            duplex: false,
        }
    }

    pub fn intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    pub fn color_mode(mut self, mode: ColorMode) -> Self {
        self.color_mode = Some(mode);
        self
    }

    pub fn resolution(mut self, dpi: u32) -> Self {
        self.resolution = Some(dpi);
        self
    }

    pub fn input_source(mut self, source: InputSource) -> Self {
        self.input_source = Some(source);
        self
    }

    pub fn duplex(mut self, duplex: bool) -> Self {
        self.duplex = duplex;
        self
    }

    /// Check every selected value against the device capabilities.
    ///
    /// Purely local; the first unsupported value is reported.
    pub fn validate(&self, caps: &CapabilitySet) -> Result<()> {
        if let Some(intent) = &self.intent
            && !caps.supports_intent(intent)
        {
            return Err(invalid("intent", intent));
        }
        if let Some(mode) = &self.color_mode
            && !caps.supports_color_mode(mode)
        {
            return Err(invalid("color mode", mode));
        }
        if let Some(dpi) = self.resolution
            && !caps.supports_resolution(dpi)
        {
            return Err(invalid("resolution", dpi));
        }
        if !caps.supports_format(&self.document_format) {
            return Err(invalid("document format", &self.document_format));
        }
        if let Some(source) = self.input_source
            && !caps.supports_input(source)
        {
            return Err(invalid("input source", source));
        }
        if self.duplex {
            let feeder_selected = match self.input_source {
                Some(InputSource::Feeder) => true,
                Some(InputSource::Flatbed) => false,
                None => caps.has_feeder,
            };
            if !feeder_selected || !caps.has_duplex {
                return Err(invalid("duplex", true));
            }
        }
        Ok(())
    }
}

fn invalid(field: &'static str, value: impl fmt::Display) -> ScanError {
    ScanError::InvalidParameter {
        field,
        value: value.to_string(),
    }
}

/// Opaque job token handed out by the device (the job URL).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle states of a scan job.  A device with no job is idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Submitted, waiting for the device to acknowledge.
    Created,
    /// Acknowledged; pages can be requested.
    Active,
    /// The device reported no further documents.
    Completed,
    Canceled,
    /// Rejected by the device or broken mid-retrieval.
    Failed,
}

/// Inputs to the job state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    Acknowledged,
    Rejected,
    DocumentReceived,
    Exhausted,
    Fault,
    Cancel,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Canceled | Self::Failed)
    }

    /// The job lifecycle transition function.  `None` marks an illegal move.
    ///
    /// Cancelling a terminal job leaves it unchanged.
    pub fn next(self, event: JobEvent) -> Option<JobState> {
        use JobEvent::*;
        use JobState::*;
        match (self, event) {
            (Created, Acknowledged) => Some(Active),
            (Created, Rejected) | (Created, Fault) => Some(Failed),
            (Active, DocumentReceived) => Some(Active),
            (Active, Exhausted) => Some(Completed),
            (Active, Fault) => Some(Failed),
            (Created | Active, Cancel) => Some(Canceled),
            (state, Cancel) if state.is_terminal() => Some(state),
            _ => None,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Handle to a job created on a device.  State is tracked by the session
/// manager, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanJob {
    pub id: JobId,
    pub device: DeviceId,
    /// Absolute job URL (from the `Location` header).
    pub url: Url,
    pub document_format: DocumentFormat,
}

/// How the bytes of an acquired page should be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    /// Raw device output; `content_type` is whatever the device declared.
    Raw { content_type: Option<String> },
    /// A complete encoded file (JPEG, PDF, ...).
    Encoded(DocumentFormat),
}

/// One page handed to the caller.  The client keeps no copy.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquiredImage {
    /// Zero-based position within the job.
    pub index: u32,
    pub format: ImageFormat,
    pub data: Bytes,
    pub acquired_at: DateTime<Utc>,
}

impl AcquiredImage {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn file_extension(&self) -> &'static str {
        match &self.format {
            ImageFormat::Encoded(format) => format.file_extension(),
            ImageFormat::Raw {
                content_type: Some(ct),
            } => DocumentFormat::from_mime(ct).file_extension(),
            ImageFormat::Raw { content_type: None } => "bin",
        }
    }

    /// Hex-encoded SHA-256 of the payload.
    pub fn sha256_hex(&self) -> String {
        hex::encode(Sha256::digest(&self.data))
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}
