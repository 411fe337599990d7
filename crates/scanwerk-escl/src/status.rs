// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// `ScannerStatus` document parsing.

use std::fmt;

use serde::Serialize;

use scanwerk_core::error::{Result, ScanError};

use crate::xml::Element;

/// Device-level state (`pwg:State`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScannerState {
    Idle,
    Processing,
    Testing,
    Stopped,
    Down,
    Unknown,
}

impl ScannerState {
    fn from_keyword(keyword: &str) -> Self {
        match keyword {
            "Idle" => Self::Idle,
            "Processing" => Self::Processing,
            "Testing" => Self::Testing,
            "Stopped" => Self::Stopped,
            "Down" => Self::Down,
            _ => Self::Unknown,
        }
    }

    /// Whether the device would refuse a new job right now.
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Processing | Self::Testing)
    }
}

impl fmt::Display for ScannerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One entry of the device's job list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobInfo {
    pub uri: String,
    pub state: String,
    pub images_completed: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScannerStatus {
    pub state: ScannerState,
    /// Feeder state keyword, e.g. `ScannerAdfLoaded` or `ScannerAdfEmpty`.
    pub adf_state: Option<String>,
    pub jobs: Vec<JobInfo>,
}

impl ScannerStatus {
    pub fn parse(xml: &[u8]) -> Result<Self> {
        let root = Element::parse(xml)?;
        if root.name != "ScannerStatus" {
            return Err(ScanError::protocol(format!(
                "malformed status: unexpected root element '{}'",
                root.name
            )));
        }
        let state = root
            .child_text("State")
            .map(ScannerState::from_keyword)
            .unwrap_or(ScannerState::Unknown);
        let adf_state = root
            .child_text("AdfState")
            .filter(|s| !s.is_empty())
            .map(str::to_owned);
        let jobs = root
            .descendants("JobInfo")
            .into_iter()
            .filter_map(|info| {
                Some(JobInfo {
                    uri: info.child_text("JobUri")?.to_owned(),
                    state: info.child_text("JobState").unwrap_or_default().to_owned(),
                    images_completed: info
                        .child_text("ImagesCompleted")
                        .and_then(|n| n.parse().ok()),
                })
            })
            .collect();
        Ok(Self {
            state,
            adf_state,
            jobs,
        })
    }

    /// Look up a job by URI.  Devices report either the path or the full URL,
    /// so a suffix match is accepted.
    pub fn job(&self, uri: &str) -> Option<&JobInfo> {
        self.jobs
            .iter()
            .find(|j| j.uri == uri || uri.ends_with(&j.uri) || j.uri.ends_with(uri))
    }
}
