// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// End-to-end scan: pick a device, negotiate options, run one job, and hand
// every page to the sink.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use scanwerk_core::error::{Result, ScanError};
use scanwerk_core::selection::{ImageSink, ScanOptionSelector};
use scanwerk_core::types::{CapabilitySet, Device, InputSource, ScanJob, ScanJobRequest};

use crate::session::{DeviceSession, JobSessionManager};
use crate::transport::EsclTransport;

/// How the page loop ended.
#[derive(Debug)]
pub enum Termination {
    /// The device reported no further pages.
    Completed,
    Canceled,
    /// Retrieval broke off; pages saved before the failure are kept.
    Failed(ScanError),
}

#[derive(Debug)]
pub struct ScanReport {
    pub device: Device,
    pub job: ScanJob,
    pub images_saved: u32,
    pub termination: Termination,
}

/// Run one scan against a device chosen from `devices`.
///
/// Errors before the job exists (nothing found, nothing selected, invalid
/// options, busy device) are returned as `Err`.  Once pages flow, the outcome
/// is reported in [`ScanReport::termination`] instead.
pub async fn run_scan<T: EsclTransport>(
    manager: &JobSessionManager<T>,
    devices: &[Device],
    selector: &mut dyn ScanOptionSelector,
    sink: &mut dyn ImageSink,
    cancel: &CancellationToken,
) -> Result<ScanReport> {
    if devices.is_empty() {
        return Err(ScanError::NoDevicesFound);
    }
    let index = selector
        .select_device(devices)
        .filter(|i| *i < devices.len())
        .ok_or(ScanError::NotSelected("device"))?;
    let device = &devices[index];
    info!(name = %device.name, url = %device.base_url, "device selected");

    manager
        .with_device(device, |session| async move {
            let request = build_request(selector, &session)?;
            if cancel.is_cancelled() {
                return Err(ScanError::Canceled);
            }
            sink.acquisition_started();
            scan_pages(manager, &session, &request, sink, cancel).await
        })
        .await
}

/// Ask the selector for each option the device offers.
fn build_request(
    selector: &mut dyn ScanOptionSelector,
    session: &DeviceSession,
) -> Result<ScanJobRequest> {
    let caps: &CapabilitySet = &session.capabilities;

    selector.describe_input_sources(&session.device, caps);
    let sources = caps.input_sources();
    let input_source = match sources.as_slice() {
        [only] => Some(*only),
        _ => selector.select_input_source(&session.device, &sources),
    };
    let intent = selector.select_intent(&caps.intents);
    let color_mode = selector.select_color_mode(&caps.color_modes);
    let resolutions: Vec<u32> = caps.resolutions.iter().copied().collect();
    let resolution = selector.select_resolution(&resolutions);
    let document_format = selector
        .select_document_format(&caps.document_formats)
        .ok_or(ScanError::NotSelected("document format"))?;

    let feeder = match input_source {
        Some(source) => source == InputSource::Feeder,
        None => caps.has_feeder && !caps.has_flatbed,
    };
    let duplex = feeder && caps.has_duplex && selector.select_duplex();

    Ok(ScanJobRequest {
        intent,
        color_mode,
        resolution,
        document_format,
        input_source,
        duplex,
    })
}

async fn scan_pages<T: EsclTransport>(
    manager: &JobSessionManager<T>,
    session: &DeviceSession,
    request: &ScanJobRequest,
    sink: &mut dyn ImageSink,
    cancel: &CancellationToken,
) -> Result<ScanReport> {
    let job = manager.create_job(session, request, cancel).await?;
    let mut stream = manager.images(&job, cancel);
    let mut images_saved = 0;

    let termination = loop {
        match stream.next().await {
            None => break Termination::Completed,
            Some(Ok(image)) => {
                if let Err(e) = sink.save_image(image) {
                    warn!(error = %e, "saving page failed, canceling job");
                    if let Err(cancel_err) = manager.cancel_job(&job).await {
                        warn!(error = %cancel_err, "job cancel failed");
                    }
                    return Err(e);
                }
                images_saved += 1;
            }
            Some(Err(ScanError::Canceled)) => break Termination::Canceled,
            Some(Err(e)) => break Termination::Failed(e),
        }
    };

    info!(images_saved, termination = ?termination, "scan finished");
    Ok(ScanReport {
        device: session.device.clone(),
        job,
        images_saved,
        termination,
    })
}
