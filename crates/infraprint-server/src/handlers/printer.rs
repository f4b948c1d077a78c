// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer object operations.

use chrono::Utc;
use tracing::info;

use crate::codec::{IppAttribute, VALUE_TAG_KEYWORD};
use crate::dispatch::Client;
use crate::printer::{IdentifyRequest, IDENTIFY_ACTIONS};
use crate::requested::RequestedAttributes;

pub fn get_printer_attributes(client: &mut Client<'_>) {
    let ra = RequestedAttributes::from_request(client.request);
    client.ok();
    let group = client.printer.printer_attributes(&ra, Utc::now());
    client.add_group(group);
}

pub fn get_printer_supported_values(client: &mut Client<'_>) {
    let ra = RequestedAttributes::from_request(client.request);
    client.ok();
    let group = client.printer.supported_values(&ra);
    client.add_group(group);
}

/// Queue an identify request for the next Acknowledge-Identify-Printer.
pub fn identify_printer(client: &mut Client<'_>) {
    let actions = match client.operation_attr("identify-actions") {
        Some(attr) => {
            let known = attr.all_tagged(VALUE_TAG_KEYWORD)
                && attr.strings().all(|a| IDENTIFY_ACTIONS.contains(&a));
            if !known {
                client.respond_unsupported(attr);
                return;
            }
            attr.strings().map(str::to_string).collect()
        }
        None => vec!["display".to_string()],
    };
    let message = client
        .operation_attr("message")
        .and_then(IppAttribute::as_str)
        .map(str::to_string);

    info!(actions = ?actions, "identify requested");
    client.printer.set_identify(IdentifyRequest { actions, message });
    client.ok();
}
