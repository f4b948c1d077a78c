// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Subscription operations and the ippget pull channel (Get-Notifications).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use infraprint_core::types::{EventMask, Keyword, NotifyEvent};

use crate::codec::{
    IppAttribute, IppAttributeGroup, IppValue, OP_CREATE_JOB_SUBSCRIPTIONS,
    STATUS_CLIENT_ERROR_ATTRIBUTES_OR_VALUES, STATUS_CLIENT_ERROR_BAD_REQUEST,
    STATUS_CLIENT_ERROR_IGNORED_ALL_SUBSCRIPTIONS, STATUS_CLIENT_ERROR_NOT_FOUND,
    STATUS_CLIENT_ERROR_NOT_POSSIBLE, STATUS_OK, STATUS_OK_IGNORED_SUBSCRIPTIONS,
    TAG_SUBSCRIPTION_ATTRIBUTES, VALUE_TAG_CHARSET, VALUE_TAG_INTEGER, VALUE_TAG_KEYWORD,
    VALUE_TAG_NATURAL_LANGUAGE,
};
use crate::dispatch::Client;
use crate::events::{Subscription, DEFAULT_LEASE_SECS, MAX_LEASE_SECS, NOTIFY_GET_INTERVAL};
use crate::job::Job;
use crate::requested::RequestedAttributes;

/// Longest a `notify-wait` Get-Notifications blocks.
const NOTIFY_WAIT: Duration = Duration::from_secs(30);

/// Largest `notify-user-data` value.
const MAX_USER_DATA: usize = 63;

/// Owner recorded on subscriptions without an authenticated user.
const DEFAULT_SUBSCRIBER: &str = "guest";

// ---------------------------------------------------------------------------
// Creation
// ---------------------------------------------------------------------------

/// A validated subscription template.
struct Template {
    mask: EventMask,
    job_id: Option<i32>,
    lease: i32,
    attrs: Vec<IppAttribute>,
}

/// Check one subscription template group.  Rejected attributes are copied to
/// the unsupported group; the error is the group's `notify-status-code`.
fn subscription_template(
    client: &mut Client<'_>,
    group: &IppAttributeGroup,
    job: Option<&Arc<Job>>,
) -> Result<Template, u16> {
    let job_subscriptions = client.operation() == OP_CREATE_JOB_SUBSCRIPTIONS;
    let mut status = STATUS_OK;
    let mut template = Template {
        mask: EventMask::only(NotifyEvent::DEFAULT),
        job_id: job.map(|j| j.id),
        lease: DEFAULT_LEASE_SECS,
        attrs: Vec::new(),
    };
    let mut pull_method = false;

    for attr in &group.attributes {
        let accepted = match attr.name.as_str() {
            "notify-recipient-uri" => false,
            "notify-pull-method" => {
                pull_method = attr.is_single(VALUE_TAG_KEYWORD) && attr.as_str() == Some("ippget");
                pull_method
            }
            "notify-attributes" => attr.all_tagged(VALUE_TAG_KEYWORD),
            "notify-charset" => {
                attr.is_single(VALUE_TAG_CHARSET)
                    && attr
                        .as_str()
                        .is_some_and(|c| c.eq_ignore_ascii_case("us-ascii") || c.eq_ignore_ascii_case("utf-8"))
            }
            "notify-natural-language" => {
                attr.is_single(VALUE_TAG_NATURAL_LANGUAGE) && attr.as_str() == Some("en")
            }
            "notify-user-data" => matches!(
                attr.values.as_slice(),
                [IppValue::OctetString(data)] if data.len() <= MAX_USER_DATA
            ),
            "notify-events" => {
                let events: Option<EventMask> = attr
                    .strings()
                    .map(NotifyEvent::from_keyword)
                    .collect();
                match events {
                    Some(mask) if attr.all_tagged(VALUE_TAG_KEYWORD) && !mask.is_empty() => {
                        template.mask = mask;
                        true
                    }
                    _ => false,
                }
            }
            "notify-lease-duration" => match attr.as_integer() {
                Some(lease) if attr.is_single(VALUE_TAG_INTEGER) && lease >= 0 => {
                    template.lease = lease.min(MAX_LEASE_SECS);
                    true
                }
                _ => false,
            },
            "notify-time-interval" => {
                attr.is_single(VALUE_TAG_INTEGER) && attr.as_integer().is_some_and(|v| v >= 0)
            }
            "notify-job-id" => match attr.as_integer() {
                Some(id) if job_subscriptions && attr.is_single(VALUE_TAG_INTEGER) && id >= 1 => {
                    if client.printer.job(id).is_some() {
                        template.job_id = Some(id);
                    } else {
                        status = STATUS_CLIENT_ERROR_NOT_FOUND;
                    }
                    true
                }
                _ => false,
            },
            _ => true,
        };

        if !accepted {
            client.unsupported(attr.clone());
            status = STATUS_CLIENT_ERROR_ATTRIBUTES_OR_VALUES;
        } else if matches!(
            attr.name.as_str(),
            "notify-attributes"
                | "notify-charset"
                | "notify-natural-language"
                | "notify-user-data"
                | "notify-time-interval"
        ) {
            template.attrs.push(attr.clone());
        }
    }

    if status == STATUS_OK && !pull_method {
        status = STATUS_CLIENT_ERROR_BAD_REQUEST;
    }
    if status == STATUS_OK && job_subscriptions && template.job_id.is_none() {
        status = STATUS_CLIENT_ERROR_BAD_REQUEST;
    }
    if status == STATUS_OK {
        Ok(template)
    } else {
        Err(status)
    }
}

/// Process every subscription template group of the request.  `job` is the
/// job just created by a job creation request.
pub(crate) fn create_subscriptions(client: &mut Client<'_>, job: Option<&Arc<Job>>) {
    let request = client.request;
    let groups: Vec<&IppAttributeGroup> = request.groups_with(TAG_SUBSCRIPTION_ATTRIBUTES).collect();
    if groups.is_empty() {
        if job.is_none() {
            client.respond(
                STATUS_CLIENT_ERROR_BAD_REQUEST,
                "No subscription attributes in request.",
            );
        }
        return;
    }

    let username = client.user_or(DEFAULT_SUBSCRIBER);
    let mut accepted = 0;
    for group in &groups {
        let mut answer = IppAttributeGroup::new(TAG_SUBSCRIPTION_ATTRIBUTES);
        match subscription_template(client, group, job) {
            Ok(template) => {
                let sub = client.printer.add_subscription(
                    template.mask,
                    template.job_id,
                    &username,
                    template.attrs,
                    template.lease,
                );
                answer.integer("notify-subscription-id", sub.id);
                accepted += 1;
            }
            Err(status) => {
                answer.enum_attr("notify-status-code", i32::from(status));
            }
        }
        client.add_group(answer);
    }

    if accepted == groups.len() {
        return;
    }
    if accepted == 0 && job.is_none() {
        client.respond(
            STATUS_CLIENT_ERROR_IGNORED_ALL_SUBSCRIPTIONS,
            "No subscriptions were created.",
        );
    } else {
        client.respond(
            STATUS_OK_IGNORED_SUBSCRIPTIONS,
            "Some subscriptions were not created.",
        );
    }
}

pub fn create_printer_subscriptions(client: &mut Client<'_>) {
    client.ok();
    create_subscriptions(client, None);
}

pub fn create_job_subscriptions(client: &mut Client<'_>) {
    client.ok();
    create_subscriptions(client, None);
}

// ---------------------------------------------------------------------------
// Queries and lifetime
// ---------------------------------------------------------------------------

/// The subscription named by `notify-subscription-id`; answers the request
/// when it is missing.
fn find_subscription(client: &mut Client<'_>) -> Option<Arc<Subscription>> {
    let Some(id) = client
        .operation_attr("notify-subscription-id")
        .filter(|a| a.is_single(VALUE_TAG_INTEGER))
        .and_then(IppAttribute::as_integer)
    else {
        client.respond(
            STATUS_CLIENT_ERROR_BAD_REQUEST,
            "Missing notify-subscription-id attribute.",
        );
        return None;
    };
    let sub = client.printer.subscription(id);
    if sub.is_none() {
        client.respond(STATUS_CLIENT_ERROR_NOT_FOUND, "Subscription was not found.");
    }
    sub
}

fn describe_subscription(client: &Client<'_>, sub: &Subscription, ra: &RequestedAttributes) -> IppAttributeGroup {
    let printer = client.printer;
    let all = sub.describe(&printer.uri, printer.start_time, Utc::now());
    let mut group = IppAttributeGroup::new(TAG_SUBSCRIPTION_ATTRIBUTES);
    ra.copy_into(&all, &mut group);
    group
}

pub fn get_subscription_attributes(client: &mut Client<'_>) {
    let Some(sub) = find_subscription(client) else {
        return;
    };
    let ra = RequestedAttributes::from_request(client.request);
    client.ok();
    let group = describe_subscription(client, &sub, &ra);
    client.add_group(group);
}

pub fn get_subscriptions(client: &mut Client<'_>) {
    let job_id = client
        .operation_attr("notify-job-id")
        .and_then(IppAttribute::as_integer);
    if let Some(id) = job_id {
        if client.printer.job(id).is_none() {
            client.respond(STATUS_CLIENT_ERROR_NOT_FOUND, format!("Job #{id} not found."));
            return;
        }
    }
    let limit = client
        .operation_attr("limit")
        .and_then(IppAttribute::as_integer)
        .and_then(|n| usize::try_from(n).ok())
        .filter(|n| *n > 0)
        .unwrap_or(usize::MAX);
    let mine = client
        .operation_attr("my-subscriptions")
        .and_then(IppAttribute::as_bool)
        .unwrap_or(false);
    let username = client.user_or(DEFAULT_SUBSCRIBER);
    let ra = RequestedAttributes::from_request(client.request);

    client.ok();
    let matching: Vec<Arc<Subscription>> = client
        .printer
        .subscriptions()
        .into_iter()
        .filter(|sub| sub.job_id == job_id)
        .filter(|sub| !mine || sub.username.eq_ignore_ascii_case(&username))
        .take(limit)
        .collect();
    for sub in &matching {
        let group = describe_subscription(client, sub, &ra);
        client.add_group(group);
    }
}

pub fn renew_subscription(client: &mut Client<'_>) {
    let Some(sub) = find_subscription(client) else {
        return;
    };
    if sub.job_id.is_some() {
        client.respond(
            STATUS_CLIENT_ERROR_NOT_POSSIBLE,
            "Per-job subscriptions cannot be renewed.",
        );
        return;
    }

    let lease = match client.request.find("notify-lease-duration") {
        None => DEFAULT_LEASE_SECS,
        Some((tag, attr)) => match attr.as_integer() {
            Some(lease)
                if tag == TAG_SUBSCRIPTION_ATTRIBUTES
                    && attr.is_single(VALUE_TAG_INTEGER)
                    && lease >= 0 =>
            {
                lease.min(MAX_LEASE_SECS)
            }
            _ => {
                client.respond(
                    STATUS_CLIENT_ERROR_ATTRIBUTES_OR_VALUES,
                    "Bad notify-lease-duration.",
                );
                client.unsupported(attr.clone());
                return;
            }
        },
    };

    sub.renew(lease, Utc::now());
    debug!(subscription_id = sub.id, lease, "subscription renewed");
    client.ok();
}

pub fn cancel_subscription(client: &mut Client<'_>) {
    let Some(sub) = find_subscription(client) else {
        return;
    };
    client.printer.cancel_subscription(sub.id);
    client.ok();
}

// ---------------------------------------------------------------------------
// ippget
// ---------------------------------------------------------------------------

fn pending_events(subs: &[(Arc<Subscription>, i32)]) -> Vec<IppAttributeGroup> {
    subs.iter()
        .flat_map(|(sub, sequence)| sub.events_from(*sequence))
        .collect()
}

pub fn get_notifications(client: &mut Client<'_>) {
    let Some(ids) = client
        .operation_attr("notify-subscription-ids")
        .filter(|a| a.all_tagged(VALUE_TAG_INTEGER))
    else {
        client.respond(
            STATUS_CLIENT_ERROR_BAD_REQUEST,
            "Missing notify-subscription-ids attribute.",
        );
        return;
    };
    let sequences: Vec<i32> = match client.operation_attr("notify-sequence-numbers") {
        Some(attr) if attr.count() != ids.count() => {
            client.respond(
                STATUS_CLIENT_ERROR_BAD_REQUEST,
                "The notify-subscription-ids and notify-sequence-numbers attributes are different lengths.",
            );
            return;
        }
        Some(attr) => attr.integers().collect(),
        None => vec![1; ids.count()],
    };
    let wait = client
        .operation_attr("notify-wait")
        .and_then(IppAttribute::as_bool)
        .unwrap_or(false);

    let mut subs = Vec::with_capacity(ids.count());
    for (id, sequence) in ids.integers().zip(sequences) {
        let Some(sub) = client.printer.subscription(id) else {
            client.respond(
                STATUS_CLIENT_ERROR_NOT_FOUND,
                format!("Subscription #{id} was not found."),
            );
            return;
        };
        subs.push((sub, sequence));
    }

    let seen = client.printer.event_generation();
    let mut events = pending_events(&subs);
    if events.is_empty() && wait && client.printer.wait_for_events(seen, NOTIFY_WAIT) {
        events = pending_events(&subs);
    }

    client.ok();
    let up_time = client.printer.up_time(Utc::now());
    client
        .operation_group()
        .integer("notify-get-interval", NOTIFY_GET_INTERVAL)
        .integer("printer-up-time", up_time);
    for group in events {
        client.add_group(group);
    }
}
