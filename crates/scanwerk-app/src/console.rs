// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Interactive console prompts for device and option selection.

use std::fmt::Display;
use std::future::Future;
use std::io::{self, BufRead, StdinLock, Stdout, Write};
use std::time::Duration;

use scanwerk_core::selection::ScanOptionSelector;
use scanwerk_core::types::{CapabilitySet, ColorMode, Device, DocumentFormat, InputSource};

const PROGRESS_STEPS: [char; 4] = ['\\', '|', '/', '-'];

/// Drive `work` to completion while turning a spinner on `out`.
pub async fn with_progress<F, W>(work: F, out: &mut W, period: Duration) -> F::Output
where
    F: Future,
    W: Write,
{
    let mut ticks = tokio::time::interval(period);
    let mut step = 0;
    tokio::pin!(work);
    loop {
        tokio::select! {
            output = &mut work => {
                let _ = writeln!(out, "\u{8} ");
                return output;
            }
            _ = ticks.tick() => {
                let _ = write!(out, "\u{8}{}", PROGRESS_STEPS[step % PROGRESS_STEPS.len()]);
                let _ = out.flush();
                step += 1;
            }
        }
    }
}

/// Numbered-menu selector over any line-oriented input and output.
///
/// Answering `0` cancels where cancelling is allowed; end of input always
/// counts as "nothing selected".
pub struct ConsoleSelector<R, W> {
    input: R,
    output: W,
}

impl ConsoleSelector<StdinLock<'static>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> ConsoleSelector<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn read_line(&mut self) -> Option<String> {
        let _ = self.output.flush();
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_owned()),
        }
    }

    /// Show a numbered list and return the chosen zero-based index.
    fn choose<T: Display>(
        &mut self,
        title: &str,
        what: &str,
        items: &[T],
        cancelable: bool,
    ) -> Option<usize> {
        if items.is_empty() {
            return None;
        }
        let _ = writeln!(self.output, "{title}:");
        for (i, item) in items.iter().enumerate() {
            let _ = writeln!(self.output, "{}. {item}", i + 1);
        }
        let choice = loop {
            let cancel_hint = if cancelable { " or press '0' to cancel" } else { "" };
            let _ = write!(
                self.output,
                "Please select {what} by entering the number from '1' to '{}'{cancel_hint}: ",
                items.len()
            );
            let answer = self.read_line()?;
            match answer.parse::<usize>() {
                Ok(0) if cancelable => break None,
                Ok(n) if (1..=items.len()).contains(&n) => break Some(n - 1),
                _ => {
                    let _ = writeln!(self.output, "'{answer}' is not a valid choice.");
                }
            }
        };
        let _ = writeln!(self.output);
        choice
    }
}

impl<R: BufRead, W: Write> ScanOptionSelector for ConsoleSelector<R, W> {
    fn select_device(&mut self, devices: &[Device]) -> Option<usize> {
        let labels: Vec<String> = devices
            .iter()
            .map(|d| format!("{} ({})", d.name, d.base_url))
            .collect();
        self.choose("Device list", "device", &labels, true)
    }

    fn describe_input_sources(&mut self, _device: &Device, capabilities: &CapabilitySet) {
        let duplex = if capabilities.has_duplex { "with" } else { "without" };
        let description = match (capabilities.has_flatbed, capabilities.has_feeder) {
            (true, true) => format!("Device has flatbed and feeder {duplex} duplex."),
            (false, true) => format!("Device has feeder {duplex} duplex."),
            (true, false) => "Device has flatbed only.".to_owned(),
            (false, false) => return,
        };
        let _ = writeln!(self.output, "{description}");
        let _ = writeln!(self.output);
    }

    fn select_input_source(
        &mut self,
        _device: &Device,
        sources: &[InputSource],
    ) -> Option<InputSource> {
        loop {
            let menu: Vec<String> = sources
                .iter()
                .enumerate()
                .map(|(i, s)| format!("{s} (press '{}')", i + 1))
                .collect();
            let _ = write!(self.output, "What do you want to use: {}: ", menu.join(" or "));
            let answer = self.read_line()?;
            if let Ok(n) = answer.parse::<usize>()
                && (1..=sources.len()).contains(&n)
            {
                let _ = writeln!(self.output);
                return Some(sources[n - 1]);
            }
        }
    }

    fn select_intent(&mut self, intents: &[String]) -> Option<String> {
        self.choose("Scan intents", "scan intent", intents, true)
            .map(|i| intents[i].clone())
    }

    fn select_color_mode(&mut self, modes: &[ColorMode]) -> Option<ColorMode> {
        self.choose("Scan color modes", "scan color mode", modes, true)
            .map(|i| modes[i].clone())
    }

    fn select_resolution(&mut self, resolutions: &[u32]) -> Option<u32> {
        self.choose("Scan resolutions", "scan resolution", resolutions, true)
            .map(|i| resolutions[i])
    }

    fn select_document_format(&mut self, formats: &[DocumentFormat]) -> Option<DocumentFormat> {
        self.choose("Scan document formats", "scan document format", formats, false)
            .map(|i| formats[i].clone())
    }

    fn select_duplex(&mut self) -> bool {
        let _ = write!(self.output, "Scan both sides of each page? [y/N]: ");
        let answer = self.read_line().unwrap_or_default();
        let _ = writeln!(self.output);
        matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes")
    }
}
