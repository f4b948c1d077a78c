// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Output devices (proxy agents) and their reported printer attributes.

use std::sync::RwLock;

use tracing::{debug, instrument};

use infraprint_core::types::{
    EventMask, Keyword, NotifyEvent, PrinterReasons, PrinterState, PrinterStateReason,
};

use crate::codec::{
    IppAttribute, IppAttributeGroup, IppValue, TAG_PRINTER_ATTRIBUTES, VALUE_TAG_DELETE_ATTRIBUTE,
};
use crate::lock::{read, write};

/// Attribute name prefixes a device may report.  Everything else in an
/// update is ignored.
pub const TRACKED_PREFIXES: &[&str] = &[
    "copies",
    "document-format",
    "finishings",
    "media",
    "print-",
    "sides",
    "printer-alert",
    "printer-input",
    "printer-output",
    "printer-resolution",
    "printer-state",
    "pwg-raster",
    "urf-",
];

pub fn is_tracked(name: &str) -> bool {
    TRACKED_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

/// `name.N` or `name.N-M`.
pub fn is_sparse_name(name: &str) -> bool {
    name.rfind('.')
        .and_then(|dot| name[dot + 1..].chars().next())
        .is_some_and(|c| c.is_ascii_digit())
}

/// Events fired by a change to `name`.
pub fn classify(name: &str) -> EventMask {
    let mut events = EventMask::new();
    if name.starts_with("printer-alert") || name.starts_with("printer-state") {
        events.insert(NotifyEvent::PrinterStateChanged);
    } else {
        events.insert(NotifyEvent::PrinterConfigChanged);
    }
    match name {
        "media-ready" | "media-col-ready" => {
            events.insert(NotifyEvent::PrinterMediaChanged);
        }
        "finishings-ready" | "finishings-col-ready" => {
            events.insert(NotifyEvent::PrinterFinishingsChanged);
        }
        _ => {}
    }
    events
}

fn is_delete_marker(attr: &IppAttribute) -> bool {
    !attr.values.is_empty()
        && attr
            .values
            .iter()
            .all(|v| matches!(v, IppValue::OutOfBand(VALUE_TAG_DELETE_ATTRIBUTE)))
}

/// What an attribute update changed.
#[derive(Debug, Default)]
pub struct DeviceUpdate {
    pub events: EventMask,
    /// Attributes refused with the unsupported-attribute response.
    pub unsupported: Vec<IppAttribute>,
}

/// One registered output device.
#[derive(Debug)]
pub struct Device {
    /// `urn:uuid:` form; the registry key.
    pub uuid: String,
    attrs: RwLock<IppAttributeGroup>,
}

impl Device {
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            attrs: RwLock::new(IppAttributeGroup::new(TAG_PRINTER_ATTRIBUTES)),
        }
    }

    /// Merge reported printer attributes.  A `delete-attribute` value
    /// removes the attribute; sparse names are refused while the rest of the
    /// update still applies.
    #[instrument(skip(self, update), fields(device = %self.uuid))]
    pub fn apply_update<'a>(&self, update: impl IntoIterator<Item = &'a IppAttribute>) -> DeviceUpdate {
        let mut result = DeviceUpdate::default();
        let mut attrs = write(&self.attrs);

        for attr in update {
            if !is_tracked(&attr.name) {
                continue;
            }
            result.events.extend(classify(&attr.name).iter());

            if is_sparse_name(&attr.name) {
                debug!(name = %attr.name, "sparse attribute update refused");
                result.unsupported.push(attr.clone());
                continue;
            }

            attrs.remove(&attr.name);
            if !is_delete_marker(attr) {
                attrs.add(attr.clone());
            }
        }
        result
    }

    /// Snapshot of every reported attribute.
    pub fn attributes(&self) -> IppAttributeGroup {
        read(&self.attrs).clone()
    }

    /// Reported `printer-state`, STOPPED when the device never said.
    pub fn printer_state(&self) -> PrinterState {
        read(&self.attrs)
            .get_integer("printer-state")
            .and_then(PrinterState::from_i32)
            .unwrap_or(PrinterState::Stopped)
    }

    /// Reported `printer-state-reasons`, `paused` when the device never said.
    pub fn printer_reasons(&self) -> PrinterReasons {
        let attrs = read(&self.attrs);
        match attrs.get("printer-state-reasons") {
            Some(attr) => attr
                .strings()
                .filter_map(PrinterStateReason::from_keyword)
                .collect(),
            None => std::iter::once(PrinterStateReason::Paused).collect(),
        }
    }
}
