// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Streamed page retrieval for an active scan job.
//
// Pages are pulled one at a time from `{job}/NextDocument`.  Page N+1 is
// never requested before page N's outcome is known, and the first failure
// ends the job: there is no silent retry of transport errors.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use scanwerk_core::config::ClientConfig;
use scanwerk_core::error::{Result, ScanError};
use scanwerk_core::types::{
    AcquiredImage, ImageFormat, JobEvent, ScanJob, with_trailing_slash,
};

use crate::session::{JobTable, delete_job};
use crate::transport::{EsclTransport, HttpReply};

/// Resource under the job URL that yields the next page.
pub const NEXT_DOCUMENT_RESOURCE: &str = "NextDocument";

/// Outcome of one successful `next_image` call.
#[derive(Debug, Clone, PartialEq)]
pub enum NextImage {
    Image(AcquiredImage),
    /// The device has no further pages; the job is Completed.
    EndOfJob,
}

/// How "page not ready" (HTTP 503) replies are polled.
#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub not_ready_retries: u32,
    pub not_ready_delay: Duration,
}

impl RetrievalOptions {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            not_ready_retries: config.not_ready_retries,
            not_ready_delay: config.not_ready_delay(),
        }
    }
}

enum Fetch {
    Page(HttpReply),
    End,
    Canceled,
    Failed(ScanError),
}

/// Pulls pages for jobs tracked in a shared job table.
pub struct ImageRetriever<T> {
    transport: Arc<T>,
    table: Arc<JobTable>,
    options: RetrievalOptions,
}

impl<T> Clone for ImageRetriever<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            table: Arc::clone(&self.table),
            options: self.options.clone(),
        }
    }
}

impl<T: EsclTransport> ImageRetriever<T> {
    pub(crate) fn new(transport: Arc<T>, table: Arc<JobTable>, options: RetrievalOptions) -> Self {
        Self {
            transport,
            table,
            options,
        }
    }

    /// Fetch the next page of `job`.
    ///
    /// Fails with `JobNotActive` (and sends nothing) unless the job is
    /// Active.  Any transport or protocol failure fails the job and is
    /// returned as `Acquisition`.  Cancellation aborts the wait, cancels the
    /// job on the device on a best-effort basis, and returns `Canceled`.
    #[instrument(skip(self, job, cancel), fields(job = %job.id))]
    pub async fn next_image(&self, job: &ScanJob, cancel: &CancellationToken) -> Result<NextImage> {
        let claim = self.table.begin_fetch(&job.id)?;
        let index = claim.index;
        let url = with_trailing_slash(job.url.clone())
            .join(NEXT_DOCUMENT_RESOURCE)
            .map_err(|e| ScanError::protocol_with("cannot resolve NextDocument", e));
        let url = match url {
            Ok(url) => url,
            Err(e) => {
                claim.settle(JobEvent::Fault);
                return Err(ScanError::acquisition(e));
            }
        };

        match self.fetch(&url, cancel).await {
            Fetch::Page(reply) => {
                claim.settle(JobEvent::DocumentReceived);
                let format = if job.document_format.is_raw() {
                    ImageFormat::Raw {
                        content_type: reply.content_type,
                    }
                } else {
                    ImageFormat::Encoded(job.document_format.clone())
                };
                info!(index, bytes = reply.body.len(), "page received");
                Ok(NextImage::Image(AcquiredImage {
                    index,
                    format,
                    data: reply.body,
                    acquired_at: Utc::now(),
                }))
            }
            Fetch::End => {
                let state = claim.settle(JobEvent::Exhausted);
                info!(pages = index, %state, "no further pages");
                Ok(NextImage::EndOfJob)
            }
            Fetch::Canceled => {
                claim.settle(JobEvent::Cancel);
                if let Err(e) = delete_job(self.transport.as_ref(), job).await {
                    warn!(error = %e, "could not cancel job on device");
                }
                Err(ScanError::Canceled)
            }
            Fetch::Failed(cause) => {
                claim.settle(JobEvent::Fault);
                warn!(error = %cause, "page retrieval failed, job aborted");
                Err(ScanError::acquisition(cause))
            }
        }
    }

    async fn fetch(&self, url: &url::Url, cancel: &CancellationToken) -> Fetch {
        let mut not_ready = 0;
        loop {
            let reply = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Fetch::Canceled,
                reply = self.transport.get(url) => reply,
            };
            let reply = match reply {
                Ok(reply) => reply,
                Err(e) => return Fetch::Failed(ScanError::protocol_with(format!("GET {url}"), e)),
            };

            match reply.status {
                404 | 410 => return Fetch::End,
                // Some devices answer the last page with an empty 200.
                _ if reply.is_success() && reply.body.is_empty() => return Fetch::End,
                _ if reply.is_success() => return Fetch::Page(reply),
                503 if not_ready < self.options.not_ready_retries => {
                    not_ready += 1;
                    debug!(attempt = not_ready, "page not ready yet");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Fetch::Canceled,
                        _ = tokio::time::sleep(self.options.not_ready_delay) => {}
                    }
                }
                503 => {
                    return Fetch::Failed(ScanError::protocol(format!(
                        "page still not ready after {not_ready} retries"
                    )));
                }
                status => {
                    return Fetch::Failed(ScanError::protocol(format!(
                        "GET {url} returned HTTP {status}"
                    )));
                }
            }
        }
    }

    /// Lazy page sequence for `job`.
    pub fn stream(&self, job: ScanJob, cancel: CancellationToken) -> ImageStream<T> {
        ImageStream {
            retriever: self.clone(),
            job,
            cancel,
            finished: false,
        }
    }
}

/// Finite, non-restartable sequence of pages.
///
/// Yields `None` forever once the device reports no further pages or a call
/// fails.
pub struct ImageStream<T> {
    retriever: ImageRetriever<T>,
    job: ScanJob,
    cancel: CancellationToken,
    finished: bool,
}

impl<T: EsclTransport> ImageStream<T> {
    pub async fn next(&mut self) -> Option<Result<AcquiredImage>> {
        if self.finished {
            return None;
        }
        match self.retriever.next_image(&self.job, &self.cancel).await {
            Ok(NextImage::Image(image)) => Some(Ok(image)),
            Ok(NextImage::EndOfJob) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }

    pub fn job(&self) -> &ScanJob {
        &self.job
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;
    use crate::mock::{Method, MockTransport, Scripted};
    use crate::session::tests::{BASE, JOB_URL, created, device, manager, request};
    use scanwerk_core::types::{DocumentFormat, JobState};

    const NEXT: &str = "http://10.0.0.5/eSCL/ScanJobs/42/NextDocument";

    async fn active_job(
        transport: &Arc<MockTransport>,
        format: DocumentFormat,
    ) -> (crate::session::JobSessionManager<MockTransport>, ScanJob) {
        let manager = manager(transport);
        transport.script(Method::Post, &format!("{BASE}ScanJobs"), created("/eSCL/ScanJobs/42"));
        let session = manager.open_device(&device()).await.unwrap();
        let mut req = request();
        req.document_format = format;
        let job = manager
            .create_job(&session, &req, &CancellationToken::new())
            .await
            .unwrap();
        (manager, job)
    }

    #[tokio::test]
    async fn three_pages_then_end_of_job() {
        let transport = Arc::new(MockTransport::new());
        let (manager, job) = active_job(&transport, DocumentFormat::Jpeg).await;
        transport
            .reply(Method::Get, NEXT, 200, b"\xff\xd8page0")
            .reply(Method::Get, NEXT, 200, b"\xff\xd8page1")
            .reply(Method::Get, NEXT, 200, b"\xff\xd8page2")
            .reply(Method::Get, NEXT, 404, b"");
        let cancel = CancellationToken::new();

        let mut stream = manager.images(&job, &cancel);
        let mut pages = Vec::new();
        while let Some(page) = stream.next().await {
            pages.push(page.unwrap());
        }

        assert_eq!(pages.iter().map(|p| p.index).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(&pages[1].data[..], b"\xff\xd8page1");
        assert_eq!(pages[0].format, ImageFormat::Encoded(DocumentFormat::Jpeg));
        assert_eq!(manager.job_state(&job), Some(JobState::Completed));
        assert!(stream.next().await.is_none());

        // A finished job is never asked for more pages.
        let requests = transport.count(Method::Get, NEXT);
        assert!(matches!(
            manager.next_image(&job, &cancel).await,
            Err(ScanError::JobNotActive { state: JobState::Completed, .. })
        ));
        assert_eq!(transport.count(Method::Get, NEXT), requests);
    }

    #[tokio::test]
    async fn connection_reset_fails_the_job() {
        let transport = Arc::new(MockTransport::new());
        let (manager, job) = active_job(&transport, DocumentFormat::Jpeg).await;
        transport
            .reply(Method::Get, NEXT, 200, b"page0")
            .script(Method::Get, NEXT, Scripted::ConnectionReset);
        let cancel = CancellationToken::new();

        assert!(matches!(
            manager.next_image(&job, &cancel).await,
            Ok(NextImage::Image(AcquiredImage { index: 0, .. }))
        ));
        let err = manager.next_image(&job, &cancel).await.unwrap_err();
        assert!(matches!(err, ScanError::Acquisition { .. }));
        let cause = err.source().and_then(|p| p.source()).unwrap();
        assert!(cause.to_string().contains("connection reset"));
        assert_eq!(manager.job_state(&job), Some(JobState::Failed));

        // No third request: the job is dead.
        assert!(manager.next_image(&job, &cancel).await.is_err());
        assert_eq!(transport.count(Method::Get, NEXT), 2);
    }

    #[tokio::test]
    async fn octet_stream_is_passed_through_raw() {
        let transport = Arc::new(MockTransport::new());
        let (manager, job) = active_job(&transport, DocumentFormat::Jpeg).await;
        let raw_job = ScanJob {
            document_format: DocumentFormat::OctetStream,
            ..job
        };
        transport.reply(Method::Get, NEXT, 200, &[0, 1, 2, 3]);

        match manager.next_image(&raw_job, &CancellationToken::new()).await.unwrap() {
            NextImage::Image(image) => {
                assert!(matches!(image.format, ImageFormat::Raw { .. }));
                assert_eq!(&image.data[..], &[0, 1, 2, 3]);
            }
            other => panic!("expected a page, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn not_ready_is_polled_then_delivered() {
        let transport = Arc::new(MockTransport::new());
        let (manager, job) = active_job(&transport, DocumentFormat::Pdf).await;
        transport
            .reply(Method::Get, NEXT, 503, b"")
            .reply(Method::Get, NEXT, 200, b"%PDF-1.4");

        let next = manager.next_image(&job, &CancellationToken::new()).await.unwrap();
        assert!(matches!(next, NextImage::Image(_)));
        assert_eq!(transport.count(Method::Get, NEXT), 2);
    }

    #[tokio::test]
    async fn not_ready_forever_is_an_acquisition_failure() {
        let transport = Arc::new(MockTransport::new());
        let (manager, job) = active_job(&transport, DocumentFormat::Pdf).await;
        transport.reply(Method::Get, NEXT, 503, b"");

        let err = manager
            .next_image(&job, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Acquisition { .. }));
        // One try plus two retries.
        assert_eq!(transport.count(Method::Get, NEXT), 3);
        assert_eq!(manager.job_state(&job), Some(JobState::Failed));
    }

    #[tokio::test]
    async fn abandoned_request_does_not_block_the_next_page() {
        let transport = Arc::new(MockTransport::new());
        let (manager, job) = active_job(&transport, DocumentFormat::Jpeg).await;
        transport
            .script(Method::Get, NEXT, Scripted::Hang)
            .reply(Method::Get, NEXT, 200, b"page0");
        let cancel = CancellationToken::new();

        let timed_out =
            tokio::time::timeout(Duration::from_millis(20), manager.next_image(&job, &cancel)).await;
        assert!(timed_out.is_err());
        assert_eq!(manager.job_state(&job), Some(JobState::Active));

        assert!(matches!(
            manager.next_image(&job, &cancel).await,
            Ok(NextImage::Image(AcquiredImage { index: 0, .. }))
        ));
    }

    #[tokio::test]
    async fn cancel_during_wait_cancels_the_job() {
        let transport = Arc::new(MockTransport::new());
        let (manager, job) = active_job(&transport, DocumentFormat::Jpeg).await;
        transport.script(Method::Get, NEXT, Scripted::Hang);
        transport.reply(Method::Delete, JOB_URL, 200, b"");

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = manager.next_image(&job, &cancel).await.unwrap_err();
        assert!(matches!(err, ScanError::Canceled));
        assert_eq!(manager.job_state(&job), Some(JobState::Canceled));
        assert_eq!(transport.count(Method::Delete, JOB_URL), 1);
    }
}
