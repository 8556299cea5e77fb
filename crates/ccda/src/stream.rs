//! Pass-through event stream with element-path tracking.

use crate::{CcdaError, CcdaResult};
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

pub(crate) fn local_name(element: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(element.local_name().as_ref()).into_owned()
}

pub(crate) fn qualified_name(element: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(element.name().as_ref()).into_owned()
}

pub(crate) fn attribute(element: &BytesStart<'_>, name: &str) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == name.as_bytes())
        .and_then(|attr| attr.unescape_value().ok().map(|v| v.into_owned()))
}

/// Copy of `element` with attribute `name` set to `value` (appended if absent).
pub(crate) fn with_attribute(element: &BytesStart<'_>, name: &str, value: &str) -> BytesStart<'static> {
    let mut updated = BytesStart::new(qualified_name(element));
    let mut replaced = false;
    for attr in element.attributes().flatten() {
        if attr.key.as_ref() == name.as_bytes() {
            updated.push_attribute((name, value));
            replaced = true;
        } else {
            updated.push_attribute(attr);
        }
    }
    if !replaced {
        updated.push_attribute((name, value));
    }
    updated
}

pub(crate) fn owned(element: &BytesStart<'_>) -> BytesStart<'static> {
    let mut copy = BytesStart::new(qualified_name(element));
    for attr in element.attributes().flatten() {
        copy.push_attribute(attr);
    }
    copy
}

pub(crate) fn element<'e>(name: &'e str, attributes: &[(&str, &str)]) -> BytesStart<'e> {
    let mut start = BytesStart::new(name);
    for attribute in attributes {
        start.push_attribute(*attribute);
    }
    start
}

/// Reads events from a document and writes whatever the caller hands back.
///
/// While an event is being handled, [`EventStream::path`] holds the local names of the event's
/// ancestors (root first).
pub(crate) struct EventStream<'a> {
    reader: Reader<&'a [u8]>,
    writer: Writer<Vec<u8>>,
    path: Vec<String>,
    pending: Option<String>,
}

impl<'a> EventStream<'a> {
    pub(crate) fn new(xml: &'a str) -> Self {
        Self {
            reader: Reader::from_str(xml),
            writer: Writer::new(Vec::new()),
            path: Vec::new(),
            pending: None,
        }
    }

    /// Next event, or `None` at end of document.
    pub(crate) fn next_event(&mut self) -> CcdaResult<Option<Event<'a>>> {
        if let Some(name) = self.pending.take() {
            self.path.push(name);
        }
        let position = self.reader.buffer_position();
        let event = self
            .reader
            .read_event()
            .map_err(|e| CcdaError::Xml(format!("failed to read XML near byte {position}: {e}")))?;
        match &event {
            Event::Eof => return Ok(None),
            Event::Start(start) => self.pending = Some(local_name(start)),
            Event::End(_) => {
                self.path.pop();
            }
            _ => {}
        }
        Ok(Some(event))
    }

    pub(crate) fn path(&self) -> &[String] {
        &self.path
    }

    pub(crate) fn depth(&self) -> usize {
        self.path.len()
    }

    pub(crate) fn parent(&self) -> Option<&str> {
        self.path.last().map(String::as_str)
    }

    pub(crate) fn within(&self, ancestor: &str) -> bool {
        self.path.iter().any(|name| name == ancestor)
    }

    pub(crate) fn write(&mut self, event: Event<'_>) -> CcdaResult<()> {
        self.writer
            .write_event(event)
            .map_err(|e| CcdaError::Xml(format!("failed to write XML: {e}")))
    }

    /// Writes `start`, `content` and the matching end tag.
    pub(crate) fn write_wrapped(
        &mut self,
        start: BytesStart<'_>,
        content: Vec<Event<'_>>,
    ) -> CcdaResult<()> {
        let name = qualified_name(&start);
        self.write(Event::Start(start))?;
        for event in content {
            self.write(event)?;
        }
        self.write(Event::End(BytesEnd::new(name)))
    }

    /// Discards everything up to and including the end tag of the element just started.
    pub(crate) fn skip_children(&mut self) -> CcdaResult<()> {
        self.pending = None;
        let mut depth = 1usize;
        while depth > 0 {
            let event = self
                .reader
                .read_event()
                .map_err(|e| CcdaError::Xml(format!("failed to read XML: {e}")))?;
            match event {
                Event::Start(_) => depth += 1,
                Event::End(_) => depth -= 1,
                Event::Eof => {
                    return Err(CcdaError::Xml("unexpected end of document".into()));
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub(crate) fn finish(self) -> CcdaResult<String> {
        String::from_utf8(self.writer.into_inner())
            .map_err(|e| CcdaError::Xml(format!("output is not UTF-8: {e}")))
    }
}
