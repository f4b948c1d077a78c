// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// `requested-attributes` filtering.

use std::collections::BTreeSet;

use crate::codec::{IppAttributeGroup, IppMessage, TAG_OPERATION_ATTRIBUTES};

/// Group keywords that expand to every attribute in this server.
const GROUP_KEYWORDS: &[&str] = &[
    "all",
    "document-description",
    "document-template",
    "job-description",
    "job-template",
    "printer-description",
    "subscription-description",
    "subscription-template",
];

/// The set of attribute names a client asked for; `None` means everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestedAttributes(Option<BTreeSet<String>>);

impl RequestedAttributes {
    pub fn all() -> Self {
        Self(None)
    }

    pub fn only<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        Self(Some(names.into_iter().map(str::to_string).collect()))
    }

    /// Read `requested-attributes` from the operation group.
    pub fn from_request(request: &IppMessage) -> Self {
        let Some(attr) = request.find_in(TAG_OPERATION_ATTRIBUTES, "requested-attributes") else {
            return Self::all();
        };
        if attr.strings().any(|name| GROUP_KEYWORDS.contains(&name)) {
            return Self::all();
        }
        Self::only(attr.strings())
    }

    pub fn includes(&self, name: &str) -> bool {
        self.0.as_ref().is_none_or(|names| names.contains(name))
    }

    /// Copy the requested attributes of `from` into `to`.
    pub fn copy_into(&self, from: &IppAttributeGroup, to: &mut IppAttributeGroup) {
        for attr in from.attributes.iter().filter(|a| self.includes(&a.name)) {
            to.add(attr.clone());
        }
    }
}
