// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device sessions and the scan job lifecycle.
//
// Job handles (`ScanJob`) are immutable; their state lives only in the
// `JobTable` below, and every state change goes through `JobState::next`.
// The table also holds the per-device busy slot, which is how "at most one
// live job per device" is enforced.  The table lock is a plain std mutex and
// is never held across an await.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use scanwerk_core::config::ClientConfig;
use scanwerk_core::error::{Result, ScanError};
use scanwerk_core::types::{
    CapabilitySet, Device, DeviceId, JobEvent, JobId, JobState, ScanJob, ScanJobRequest,
};

use crate::capabilities::CapabilityNegotiator;
use crate::registry::DeviceRegistry;
use crate::retriever::{ImageRetriever, ImageStream, NextImage, RetrievalOptions};
use crate::settings::scan_settings_xml;
use crate::transport::EsclTransport;

/// Resource jobs are POSTed to.
pub const SCAN_JOBS_RESOURCE: &str = "ScanJobs";

#[derive(Debug)]
struct JobRecord {
    device: DeviceId,
    state: JobState,
    /// Index the next delivered page will get.
    next_index: u32,
    /// A NextDocument request is outstanding.
    in_flight: bool,
}

/// What occupies a device's busy slot.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    /// A job is being submitted.
    Reserved,
    Job(JobId),
}

#[derive(Debug, Default)]
struct TableState {
    jobs: HashMap<JobId, JobRecord>,
    busy: HashMap<DeviceId, Slot>,
    open: HashSet<DeviceId>,
}

/// Authoritative job state, shared by the session manager and the retriever.
#[derive(Debug, Default)]
pub(crate) struct JobTable {
    state: Mutex<TableState>,
}

impl JobTable {
    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self, device: &DeviceId) -> Result<()> {
        if !self.lock().open.insert(device.clone()) {
            return Err(ScanError::DeviceBusy(format!(
                "a session for {device} is already open"
            )));
        }
        Ok(())
    }

    fn close(&self, device: &DeviceId) -> bool {
        self.lock().open.remove(device)
    }

    /// Claim the device's busy slot for a job about to be submitted.
    fn reserve(&self, device: &DeviceId) -> Result<Reservation<'_>> {
        let mut table = self.lock();
        if !table.open.contains(device) {
            return Err(ScanError::protocol(format!(
                "no open session for {device}"
            )));
        }
        if let Some(slot) = table.busy.get(device) {
            let detail = match slot {
                Slot::Reserved => "a job is being created".to_owned(),
                Slot::Job(job) => format!("job {job} is still running"),
            };
            return Err(ScanError::DeviceBusy(format!("{device}: {detail}")));
        }
        table.busy.insert(device.clone(), Slot::Reserved);
        Ok(Reservation {
            table: self,
            device: device.clone(),
            admitted: false,
        })
    }

    fn release(&self, device: &DeviceId) {
        let mut table = self.lock();
        if table.busy.get(device) == Some(&Slot::Reserved) {
            table.busy.remove(device);
        }
    }

    /// Record a job the device acknowledged and hand it the device slot.
    fn admit(&self, job: &ScanJob) -> JobState {
        let mut table = self.lock();
        let state = JobState::Created
            .next(JobEvent::Acknowledged)
            .unwrap_or(JobState::Failed);
        table.jobs.insert(
            job.id.clone(),
            JobRecord {
                device: job.device.clone(),
                state,
                next_index: 0,
                in_flight: false,
            },
        );
        table
            .busy
            .insert(job.device.clone(), Slot::Job(job.id.clone()));
        state
    }

    pub(crate) fn state(&self, job: &JobId) -> Option<JobState> {
        self.lock().jobs.get(job).map(|r| r.state)
    }

    /// Claim the next page of an Active job.
    pub(crate) fn begin_fetch(&self, job: &JobId) -> Result<PageClaim<'_>> {
        let mut table = self.lock();
        let record = table
            .jobs
            .get_mut(job)
            .ok_or_else(|| ScanError::protocol(format!("unknown job {job}")))?;
        if record.state != JobState::Active {
            return Err(ScanError::JobNotActive {
                job: job.clone(),
                state: record.state,
            });
        }
        if record.in_flight {
            return Err(ScanError::DeviceBusy(format!(
                "a page request for job {job} is already outstanding"
            )));
        }
        record.in_flight = true;
        Ok(PageClaim {
            table: self,
            job: job.clone(),
            index: record.next_index,
            settled: false,
        })
    }

    /// Settle an outstanding page request with `event`.
    fn end_fetch(&self, job: &JobId, event: JobEvent) -> JobState {
        let mut table = self.lock();
        let Some(record) = table.jobs.get_mut(job) else {
            return JobState::Failed;
        };
        record.in_flight = false;
        if event == JobEvent::DocumentReceived && record.state == JobState::Active {
            record.next_index += 1;
        }
        Self::apply(&mut table, job, event)
    }

    /// Forget an outstanding page request whose outcome never arrived.
    fn abandon_fetch(&self, job: &JobId) {
        if let Some(record) = self.lock().jobs.get_mut(job) {
            record.in_flight = false;
        }
    }

    /// Drive a job through the state machine; a terminal job frees its device.
    pub(crate) fn transition(&self, job: &JobId, event: JobEvent) -> Option<JobState> {
        let mut table = self.lock();
        table.jobs.contains_key(job).then(|| Self::apply(&mut table, job, event))
    }

    fn apply(table: &mut TableState, job: &JobId, event: JobEvent) -> JobState {
        let Some(record) = table.jobs.get_mut(job) else {
            return JobState::Failed;
        };
        match record.state.next(event) {
            Some(next) => {
                debug!(%job, from = %record.state, to = %next, ?event, "job transition");
                record.state = next;
            }
            None => warn!(%job, state = %record.state, ?event, "ignoring illegal job event"),
        }
        let state = record.state;
        if state.is_terminal() {
            let device = record.device.clone();
            if table.busy.get(&device) == Some(&Slot::Job(job.clone())) {
                table.busy.remove(&device);
            }
        }
        state
    }
}

/// Busy slot held while a job is submitted.  Dropped without `admit`, for
/// example when the submitting future is abandoned, it frees the slot.
pub(crate) struct Reservation<'a> {
    table: &'a JobTable,
    device: DeviceId,
    admitted: bool,
}

impl Reservation<'_> {
    fn admit(mut self, job: &ScanJob) -> JobState {
        self.admitted = true;
        self.table.admit(job)
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.admitted {
            self.table.release(&self.device);
        }
    }
}

/// An outstanding NextDocument request for one job.
///
/// `settle` records its outcome.  A claim dropped unsettled only clears the
/// outstanding flag, so the next call may ask for the same page again.
pub(crate) struct PageClaim<'a> {
    table: &'a JobTable,
    job: JobId,
    /// Index the page will get.
    pub(crate) index: u32,
    settled: bool,
}

impl PageClaim<'_> {
    pub(crate) fn settle(mut self, event: JobEvent) -> JobState {
        self.settled = true;
        self.table.end_fetch(&self.job, event)
    }
}

impl Drop for PageClaim<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!(job = %self.job, "page request abandoned");
            self.table.abandon_fetch(&self.job);
        }
    }
}

/// An open device with its negotiated capabilities.
#[derive(Debug, Clone)]
pub struct DeviceSession {
    pub device: Device,
    pub capabilities: Arc<CapabilitySet>,
}

/// Creates, tracks and cancels scan jobs.
pub struct JobSessionManager<T> {
    transport: Arc<T>,
    negotiator: CapabilityNegotiator<T>,
    table: Arc<JobTable>,
    options: RetrievalOptions,
}

impl<T: EsclTransport> JobSessionManager<T> {
    pub fn new(transport: Arc<T>, registry: Arc<DeviceRegistry>, config: &ClientConfig) -> Self {
        Self {
            negotiator: CapabilityNegotiator::new(Arc::clone(&transport), registry),
            transport,
            table: Arc::new(JobTable::default()),
            options: RetrievalOptions::from_config(config),
        }
    }

    pub fn negotiator(&self) -> &CapabilityNegotiator<T> {
        &self.negotiator
    }

    /// Negotiate capabilities and open a session.  One session per device.
    #[instrument(skip(self, device), fields(device = %device.id))]
    pub async fn open_device(&self, device: &Device) -> Result<DeviceSession> {
        let capabilities = self.negotiator.capabilities(device).await?;
        self.table.open(&device.id)?;
        info!(name = %device.name, "device session opened");
        Ok(DeviceSession {
            device: device.clone(),
            capabilities,
        })
    }

    /// Close a session.  A job still running on the device is left alone.
    pub fn close_device(&self, session: &DeviceSession) {
        if self.table.close(&session.device.id) {
            info!(device = %session.device.id, "device session closed");
        }
    }

    /// Run `f` against an open session, closing it whatever `f` returns.
    pub async fn with_device<F, Fut, R>(&self, device: &Device, f: F) -> Result<R>
    where
        F: FnOnce(DeviceSession) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let session = self.open_device(device).await?;
        let result = f(session.clone()).await;
        self.close_device(&session);
        result
    }

    /// Validate `request` and submit it as a new job.
    ///
    /// Validation is local, so an unsupported value costs no network traffic.
    /// The device slot is freed on every failure, on cancellation, and when
    /// the returned future is dropped before it completes.
    #[instrument(skip(self, session, request, cancel), fields(device = %session.device.id))]
    pub async fn create_job(
        &self,
        session: &DeviceSession,
        request: &ScanJobRequest,
        cancel: &CancellationToken,
    ) -> Result<ScanJob> {
        request.validate(&session.capabilities)?;

        let reservation = self.table.reserve(&session.device.id)?;
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("job creation canceled");
                return Err(ScanError::Canceled);
            }
            job = self.submit(session, request) => job?,
        };
        let state = reservation.admit(&job);
        info!(job = %job.id, %state, "scan job created");
        Ok(job)
    }

    async fn submit(&self, session: &DeviceSession, request: &ScanJobRequest) -> Result<ScanJob> {
        let device = &session.device;
        let url = device.endpoint(SCAN_JOBS_RESOURCE)?;
        let body = scan_settings_xml(request, &session.capabilities);
        let reply = self
            .transport
            .post_xml(&url, body)
            .await
            .map_err(|e| ScanError::protocol_with(format!("POST {url}"), e))?;

        match reply.status {
            503 | 409 => {
                return Err(ScanError::DeviceBusy(format!(
                    "{} refused the job (HTTP {})",
                    device.name, reply.status
                )));
            }
            status if !reply.is_success() => {
                // Some devices answer a busy scanner with a generic error.
                if let Ok(status_doc) = self.negotiator.scanner_status(device).await
                    && status_doc.state.is_busy()
                {
                    return Err(ScanError::DeviceBusy(format!(
                        "{} is {}",
                        device.name, status_doc.state
                    )));
                }
                return Err(ScanError::protocol(format!("POST {url} returned HTTP {status}")));
            }
            _ => {}
        }

        let location = reply
            .location
            .ok_or_else(|| ScanError::protocol(format!("POST {url} returned no Location")))?;
        let job_url = device.base_url.join(&location).map_err(|e| {
            ScanError::protocol_with(format!("invalid job Location '{location}'"), e)
        })?;
        Ok(ScanJob {
            id: JobId::new(job_url.as_str()),
            device: device.id.clone(),
            url: job_url,
            document_format: request.document_format.clone(),
        })
    }

    /// Cancel a job.  Cancelling a finished job is a no-op.
    ///
    /// The job is Canceled locally even if the DELETE fails; the failure is
    /// still returned so the caller can report it.
    #[instrument(skip(self, job), fields(job = %job.id))]
    pub async fn cancel_job(&self, job: &ScanJob) -> Result<()> {
        let state = self
            .table
            .state(&job.id)
            .ok_or_else(|| ScanError::protocol(format!("unknown job {}", job.id)))?;
        if state.is_terminal() {
            debug!(%state, "job already finished");
            return Ok(());
        }
        self.table.transition(&job.id, JobEvent::Cancel);
        delete_job(self.transport.as_ref(), job).await
    }

    pub fn job_state(&self, job: &ScanJob) -> Option<JobState> {
        self.table.state(&job.id)
    }

    /// Retriever sharing this manager's job table.
    pub fn retriever(&self) -> ImageRetriever<T> {
        ImageRetriever::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.table),
            self.options.clone(),
        )
    }

    pub async fn next_image(
        &self,
        job: &ScanJob,
        cancel: &CancellationToken,
    ) -> Result<NextImage> {
        self.retriever().next_image(job, cancel).await
    }

    /// Lazy page sequence for `job`.
    pub fn images(
        &self,
        job: &ScanJob,
        cancel: &CancellationToken,
    ) -> ImageStream<T> {
        self.retriever().stream(job.clone(), cancel.clone())
    }
}

/// DELETE the job resource.  A job the device already forgot counts as done.
pub(crate) async fn delete_job<T: EsclTransport + ?Sized>(transport: &T, job: &ScanJob) -> Result<()> {
    let reply = transport
        .delete(&job.url)
        .await
        .map_err(|e| ScanError::protocol_with(format!("DELETE {}", job.url), e))?;
    if reply.is_success() || reply.status == 404 {
        info!(job = %job.id, "scan job canceled on device");
        Ok(())
    } else {
        Err(ScanError::protocol(format!(
            "DELETE {} returned HTTP {}",
            job.url, reply.status
        )))
    }
}
