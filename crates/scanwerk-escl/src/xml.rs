// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Minimal XML element tree for eSCL documents.
//
// eSCL devices disagree on namespace prefixes (`scan:`, `escl:`, none), so
// elements are matched by local name only.  Documents are small (a few KiB),
// so building a tree is cheaper to reason about than a streaming matcher.

use quick_xml::Reader;
use quick_xml::escape::escape;
use quick_xml::events::Event;

use scanwerk_core::error::{BoxError, Result, ScanError};

/// XML namespace of the eSCL schema.
pub const ESCL_NS: &str = "http://schemas.hp.com/imaging/escl/2011/05/03";

/// XML namespace of the PWG semantic model.
pub const PWG_NS: &str = "http://www.pwg.org/schemas/2010/12/sm";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    /// Local name, prefix stripped.
    pub name: String,
    /// Concatenated, trimmed text content.
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    fn named(name: String) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    /// Parse a complete document and return its root element.
    pub fn parse(xml: &[u8]) -> Result<Element> {
        let mut reader = Reader::from_reader(xml);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<Element> = Vec::new();
        let mut root = None;
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf).map_err(malformed)? {
                Event::Start(start) => {
                    stack.push(Element::named(local_name(start.local_name().as_ref())));
                }
                Event::Empty(empty) => {
                    let element = Element::named(local_name(empty.local_name().as_ref()));
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Text(text) => {
                    let value = text.unescape().map_err(malformed)?;
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(value.trim());
                    }
                }
                Event::CData(data) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(String::from_utf8_lossy(&data).trim());
                    }
                }
                Event::End(_) => {
                    let element = stack
                        .pop()
                        .ok_or_else(|| ScanError::protocol("malformed XML: unbalanced end tag"))?;
                    attach(&mut stack, &mut root, element)?;
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if !stack.is_empty() {
            return Err(ScanError::protocol("malformed XML: document ends inside an element"));
        }
        root.ok_or_else(|| ScanError::protocol("malformed XML: empty document"))
    }

    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }

    /// Follow a path of direct children.
    pub fn path(&self, names: &[&str]) -> Option<&Element> {
        names.iter().try_fold(self, |el, name| el.child(name))
    }

    /// All descendants (depth-first, document order) with the given name.
    pub fn descendants<'a>(&'a self, name: &str) -> Vec<&'a Element> {
        let mut found = Vec::new();
        self.collect(name, &mut found);
        found
    }

    fn collect<'a>(&'a self, name: &str, found: &mut Vec<&'a Element>) {
        for child in &self.children {
            if child.name == name {
                found.push(child);
            }
            child.collect(name, found);
        }
    }
}

fn local_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None if root.is_none() => *root = Some(element),
        None => return Err(ScanError::protocol("malformed XML: multiple root elements")),
    }
    Ok(())
}

fn malformed(err: impl Into<BoxError>) -> ScanError {
    ScanError::protocol_with("malformed XML", err)
}

/// Escape a value for use as element text.
pub fn text(value: &str) -> std::borrow::Cow<'_, str> {
    escape(value)
}
