// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scripted in-memory transport for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::transport::{EsclTransport, HttpReply, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Method {
    Get,
    Post,
    Delete,
}

/// One scripted outcome for a request.
pub(crate) enum Scripted {
    Reply(HttpReply),
    ConnectionReset,
    /// Never completes; used to exercise cancellation.
    Hang,
    /// Answers after sleeping, letting other tasks run meanwhile.
    Delayed(Duration, HttpReply),
}

#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub method: Method,
    pub url: String,
    pub body: Option<String>,
}

/// Replies are queued per (method, URL).  The last reply for a route repeats
/// once the queue is down to one entry; an unscripted route answers 404.
#[derive(Default)]
pub(crate) struct MockTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<Scripted>>>,
    calls: Mutex<Vec<Call>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, method: Method, url: &str, outcome: Scripted) -> &Self {
        self.routes
            .lock()
            .unwrap()
            .entry((method, url.to_owned()))
            .or_default()
            .push_back(outcome);
        self
    }

    pub fn reply(&self, method: Method, url: &str, status: u16, body: &[u8]) -> &Self {
        self.script(method, url, Scripted::Reply(status_reply(status, body)))
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn count(&self, method: Method, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.method == method && c.url == url)
            .count()
    }

    async fn respond(
        &self,
        method: Method,
        url: &Url,
        body: Option<String>,
    ) -> Result<HttpReply, TransportError> {
        self.calls.lock().unwrap().push(Call {
            method,
            url: url.to_string(),
            body,
        });
        let outcome = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(&(method, url.to_string())) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().map(clone_scripted),
                None => None,
            }
        };
        match outcome {
            Some(Scripted::Reply(reply)) => Ok(reply),
            Some(Scripted::ConnectionReset) => Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            ))),
            Some(Scripted::Hang) => std::future::pending().await,
            Some(Scripted::Delayed(delay, reply)) => {
                tokio::time::sleep(delay).await;
                Ok(reply)
            }
            None => Ok(status_reply(404, b"")),
        }
    }
}

pub(crate) fn status_reply(status: u16, body: &[u8]) -> HttpReply {
    HttpReply {
        status,
        location: None,
        content_type: None,
        body: Bytes::copy_from_slice(body),
    }
}

fn clone_scripted(s: &Scripted) -> Scripted {
    match s {
        Scripted::Reply(r) => Scripted::Reply(r.clone()),
        Scripted::ConnectionReset => Scripted::ConnectionReset,
        Scripted::Hang => Scripted::Hang,
        Scripted::Delayed(delay, r) => Scripted::Delayed(*delay, r.clone()),
    }
}

#[async_trait]
impl EsclTransport for MockTransport {
    async fn get(&self, url: &Url) -> Result<HttpReply, TransportError> {
        self.respond(Method::Get, url, None).await
    }

    async fn post_xml(&self, url: &Url, body: String) -> Result<HttpReply, TransportError> {
        self.respond(Method::Post, url, Some(body)).await
    }

    async fn delete(&self, url: &Url) -> Result<HttpReply, TransportError> {
        self.respond(Method::Delete, url, None).await
    }
}
