// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Event Engine: subscriptions, their bounded notification queues, leases,
// and the wait/signal primitive behind `notify-wait`.
//
// Each subscription keeps at most `MAX_EVENTS` notifications.  On overflow the
// oldest is evicted and `first_sequence` advances, so that
// `first_sequence == last_sequence - retained + 1` always holds.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use infraprint_core::types::{EventMask, JobState, Keyword, PrinterState};

use crate::codec::{
    IppAttribute, IppAttributeGroup, TAG_EVENT_NOTIFICATION_ATTRIBUTES,
    TAG_SUBSCRIPTION_ATTRIBUTES, VALUE_TAG_NO_VALUE,
};
use crate::lock::{read, write};

/// Notifications retained per subscription.
pub const MAX_EVENTS: usize = 100;

/// `notify-lease-duration-default`.
pub const DEFAULT_LEASE_SECS: i32 = 86_400;

/// Upper bound of `notify-lease-duration-supported`.
pub const MAX_LEASE_SECS: i32 = 67_108_863;

/// `notify-get-interval`, also the longest `notify-wait` block.
pub const NOTIFY_GET_INTERVAL: i32 = 30;

/// `ippget-event-life`.
pub const IPPGET_EVENT_LIFE: i32 = 300;

// ---------------------------------------------------------------------------
// Event content
// ---------------------------------------------------------------------------

/// Job fields captured at publication time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    pub id: i32,
    pub state: JobState,
    pub reasons: Vec<&'static str>,
    pub name: String,
    pub username: String,
}

/// Everything a notification needs, captured before any subscription lock
/// is taken.
#[derive(Debug, Clone)]
pub struct EventNotice<'a> {
    pub events: EventMask,
    pub text: &'a str,
    pub printer_uri: &'a str,
    pub printer_up_time: i32,
    pub printer_state: PrinterState,
    pub printer_reasons: Vec<&'static str>,
    pub job: Option<JobSnapshot>,
}

impl EventNotice<'_> {
    fn to_group(&self, sub: &Subscription, sequence: i32) -> IppAttributeGroup {
        let mut group = IppAttributeGroup::new(TAG_EVENT_NOTIFICATION_ATTRIBUTES);
        group
            .charset("notify-charset", "utf-8")
            .natural_language("notify-natural-language", "en")
            .integer("notify-printer-up-time", self.printer_up_time)
            .uri("notify-printer-uri", self.printer_uri);
        if let Some(job) = &self.job {
            group.integer("notify-job-id", job.id);
        }
        group
            .integer("notify-subscription-id", sub.id)
            .uri("notify-subscription-uuid", &sub.uuid)
            .integer("notify-sequence-number", sequence);

        let subscribed = self
            .events
            .intersection(&sub.mask)
            .iter()
            .next()
            .or_else(|| self.events.iter().next());
        if let Some(event) = subscribed {
            group.keyword("notify-subscribed-event", event.keyword());
        }
        group.text("notify-text", self.text);

        if self.events.has_printer_events() {
            group
                .enum_attr("printer-state", self.printer_state.as_i32())
                .keywords("printer-state-reasons", &self.printer_reasons);
        }
        if let Some(job) = &self.job {
            group
                .enum_attr("job-state", job.state.as_i32())
                .keywords("job-state-reasons", &job.reasons);
            if self
                .events
                .contains(infraprint_core::types::NotifyEvent::JobCreated)
            {
                group
                    .name_attr("job-name", &job.name)
                    .name_attr("job-originating-user-name", &job.username);
            }
        }
        group
    }
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct SubscriptionState {
    lease: i32,
    expire: Option<DateTime<Utc>>,
    first_sequence: i32,
    last_sequence: i32,
    events: VecDeque<IppAttributeGroup>,
}

/// A pull (`ippget`) subscription.
#[derive(Debug)]
pub struct Subscription {
    pub id: i32,
    /// `urn:uuid:` form.
    pub uuid: String,
    pub mask: EventMask,
    /// `Some` for job-scoped subscriptions.
    pub job_id: Option<i32>,
    pub username: String,
    /// Requested `notify-*` attributes echoed by Get-Subscription-Attributes.
    pub attrs: Vec<IppAttribute>,
    deleted: AtomicBool,
    state: RwLock<SubscriptionState>,
}

impl Subscription {
    pub fn new(
        id: i32,
        mask: EventMask,
        job_id: Option<i32>,
        username: impl Into<String>,
        attrs: Vec<IppAttribute>,
        lease: i32,
        now: DateTime<Utc>,
    ) -> Self {
        // Job-scoped subscriptions live as long as their job.
        let lease = if job_id.is_some() { 0 } else { lease };
        Self {
            id,
            uuid: format!("urn:uuid:{}", uuid::Uuid::new_v4()),
            mask,
            job_id,
            username: username.into(),
            attrs,
            deleted: AtomicBool::new(false),
            state: RwLock::new(SubscriptionState {
                lease,
                expire: lease_expiry(lease, now),
                first_sequence: 1,
                last_sequence: 0,
                events: VecDeque::new(),
            }),
        }
    }

    /// Whether a publication for `events` about `job_id` reaches this
    /// subscription.
    pub fn matches(&self, events: &EventMask, job_id: Option<i32>) -> bool {
        self.mask.intersects(events) && (self.job_id.is_none() || self.job_id == job_id)
    }

    /// Append one notification, stamping it with the next sequence number.
    pub fn push(&self, build: impl FnOnce(i32) -> IppAttributeGroup) -> i32 {
        let mut state = write(&self.state);
        state.last_sequence += 1;
        let sequence = state.last_sequence;
        state.events.push_back(build(sequence));
        if state.events.len() > MAX_EVENTS {
            state.events.pop_front();
            state.first_sequence += 1;
        }
        sequence
    }

    /// Notifications from `sequence` on.  A sequence below the retained
    /// window is clamped to `first_sequence`; one past `last_sequence`
    /// yields nothing.
    pub fn events_from(&self, sequence: i32) -> Vec<IppAttributeGroup> {
        let state = read(&self.state);
        let sequence = sequence.max(state.first_sequence);
        if sequence > state.last_sequence {
            return Vec::new();
        }
        let skip = (sequence - state.first_sequence) as usize;
        state.events.iter().skip(skip).cloned().collect()
    }

    /// `(first_sequence, last_sequence, retained)`.
    pub fn sequence_window(&self) -> (i32, i32, usize) {
        let state = read(&self.state);
        (state.first_sequence, state.last_sequence, state.events.len())
    }

    pub fn lease(&self) -> i32 {
        read(&self.state).lease
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        read(&self.state).expire
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        read(&self.state).expire.is_some_and(|t| t <= now)
    }

    /// Reset the lease; zero means the subscription never expires.
    pub fn renew(&self, lease: i32, now: DateTime<Utc>) {
        let mut state = write(&self.state);
        state.lease = lease;
        state.expire = lease_expiry(lease, now);
    }

    pub fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::SeqCst);
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::SeqCst)
    }

    /// Subscription description attributes for Get-Subscription(s)-Attributes
    /// and the Create-*-Subscriptions echo.
    pub fn describe(&self, printer_uri: &str, start_time: DateTime<Utc>, now: DateTime<Utc>) -> IppAttributeGroup {
        let (lease, expire, last_sequence) = {
            let state = read(&self.state);
            (state.lease, state.expire, state.last_sequence)
        };

        let mut group = IppAttributeGroup::new(TAG_SUBSCRIPTION_ATTRIBUTES);
        group
            .integer("notify-subscription-id", self.id)
            .uri("notify-subscription-uuid", &self.uuid)
            .uri("notify-printer-uri", printer_uri);
        match self.job_id {
            Some(job_id) => group.integer("notify-job-id", job_id),
            None => group.integer("notify-lease-duration", lease),
        };
        group.name_attr("notify-subscriber-user-name", &self.username);
        let events: Vec<&str> = self.mask.keywords();
        group.keywords("notify-events", &events);
        group.keyword("notify-pull-method", "ippget");
        for attr in &self.attrs {
            group.set(attr.clone());
        }

        match expire {
            Some(at) => group.integer("notify-lease-expiration-time", up_time(start_time, at)),
            None if self.job_id.is_none() => group.integer("notify-lease-expiration-time", 0),
            None => group.out_of_band("notify-lease-expiration-time", VALUE_TAG_NO_VALUE),
        };
        group
            .integer("notify-printer-up-time", up_time(start_time, now))
            .integer("notify-sequence-number", last_sequence);
        group
    }
}

/// Seconds since `start`, saturated to the `integer` range.
pub fn up_time(start: DateTime<Utc>, at: DateTime<Utc>) -> i32 {
    i32::try_from((at - start).num_seconds().max(0)).unwrap_or(i32::MAX)
}

fn lease_expiry(lease: i32, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    (lease > 0).then(|| now + chrono::Duration::seconds(i64::from(lease)))
}

/// Deliver `notice` to every matching subscription.  Returns how many
/// subscriptions received it.
pub fn publish<'s, I>(subscriptions: I, notice: &EventNotice<'_>) -> usize
where
    I: IntoIterator<Item = &'s Arc<Subscription>>,
{
    let job_id = notice.job.as_ref().map(|j| j.id);
    let mut delivered = 0;
    for sub in subscriptions {
        if sub.is_deleted() || !sub.matches(&notice.events, job_id) {
            continue;
        }
        let sequence = sub.push(|seq| notice.to_group(sub, seq));
        debug!(
            subscription_id = sub.id,
            sequence,
            events = ?notice.events.keywords(),
            "event queued"
        );
        delivered += 1;
    }
    delivered
}

// ---------------------------------------------------------------------------
// Wait / signal
// ---------------------------------------------------------------------------

/// Generation counter bumped on every publication; Get-Notifications with
/// `notify-wait` blocks on it.
#[derive(Debug, Default)]
pub struct EventSignal {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl EventSignal {
    pub fn current(&self) -> u64 {
        *self.generation.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn notify(&self) {
        let mut generation = self.generation.lock().unwrap_or_else(|e| e.into_inner());
        *generation = generation.wrapping_add(1);
        self.cond.notify_all();
    }

    /// Block until the generation moves past `seen` or `timeout` elapses.
    /// Returns `true` when something was published.
    pub fn wait_past(&self, seen: u64, timeout: Duration) -> bool {
        let guard = self.generation.lock().unwrap_or_else(|e| e.into_inner());
        let (guard, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |generation| *generation == seen)
            .unwrap_or_else(|e| e.into_inner());
        *guard != seen
    }
}
