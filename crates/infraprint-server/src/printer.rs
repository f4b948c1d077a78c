// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// The printer registry: the single value owning every job, output device and
// subscription, constructed at start-up and handed to each request handler.
//
// Locking rule: the printer lock guards collection membership and the
// printer's own fields.  It may be held while taking one member lock (job,
// device, subscription); two member locks are never held together, and events
// are published with no printer lock held.
//
// Admission: at most one job is in PROCESSING at any time.  Extra devices do
// not add processing slots.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use infraprint_core::config::ServerConfig;
use infraprint_core::types::{
    EventMask, JobState, JobStateReason, Keyword, NotifyEvent, PrinterReasons, PrinterState,
};

use crate::codec::{
    IppAttribute, IppAttributeGroup, IppValue, OP_ACKNOWLEDGE_DOCUMENT,
    OP_ACKNOWLEDGE_IDENTIFY_PRINTER, OP_ACKNOWLEDGE_JOB, OP_CANCEL_JOB, OP_CANCEL_MY_JOBS,
    OP_CANCEL_SUBSCRIPTION, OP_CLOSE_JOB, OP_CREATE_JOB, OP_CREATE_JOB_SUBSCRIPTIONS,
    OP_CREATE_PRINTER_SUBSCRIPTIONS, OP_DEREGISTER_OUTPUT_DEVICE, OP_FETCH_DOCUMENT, OP_FETCH_JOB,
    OP_GET_DOCUMENTS, OP_GET_DOCUMENT_ATTRIBUTES, OP_GET_JOBS, OP_GET_JOB_ATTRIBUTES,
    OP_GET_NOTIFICATIONS, OP_GET_OUTPUT_DEVICE_ATTRIBUTES, OP_GET_PRINTER_ATTRIBUTES,
    OP_GET_PRINTER_SUPPORTED_VALUES, OP_GET_SUBSCRIPTIONS, OP_GET_SUBSCRIPTION_ATTRIBUTES,
    OP_IDENTIFY_PRINTER, OP_PRINT_JOB, OP_PRINT_URI, OP_RENEW_SUBSCRIPTION, OP_SEND_DOCUMENT,
    OP_SEND_URI, OP_UPDATE_ACTIVE_JOBS, OP_UPDATE_DOCUMENT_STATUS, OP_UPDATE_JOB_STATUS,
    OP_UPDATE_OUTPUT_DEVICE_ATTRIBUTES, OP_VALIDATE_DOCUMENT, OP_VALIDATE_JOB,
    TAG_PRINTER_ATTRIBUTES,
};
use crate::device::{Device, DeviceUpdate};
use crate::events::{
    self, EventNotice, EventSignal, Subscription, DEFAULT_LEASE_SECS, IPPGET_EVENT_LIFE,
    MAX_LEASE_SECS, NOTIFY_GET_INTERVAL,
};
use crate::job::{CancelOutcome, Job, JobError, DEFAULT_PRIORITY};
use crate::lock::{read, write};
use crate::requested::RequestedAttributes;

/// Operations advertised in `operations-supported`, in wire order.
pub const OPERATIONS_SUPPORTED: &[u16] = &[
    OP_PRINT_JOB,
    OP_PRINT_URI,
    OP_VALIDATE_JOB,
    OP_CREATE_JOB,
    OP_SEND_DOCUMENT,
    OP_SEND_URI,
    OP_CANCEL_JOB,
    OP_GET_JOB_ATTRIBUTES,
    OP_GET_JOBS,
    OP_GET_PRINTER_ATTRIBUTES,
    OP_GET_PRINTER_SUPPORTED_VALUES,
    OP_CREATE_PRINTER_SUBSCRIPTIONS,
    OP_CREATE_JOB_SUBSCRIPTIONS,
    OP_GET_SUBSCRIPTION_ATTRIBUTES,
    OP_GET_SUBSCRIPTIONS,
    OP_RENEW_SUBSCRIPTION,
    OP_CANCEL_SUBSCRIPTION,
    OP_GET_NOTIFICATIONS,
    OP_GET_DOCUMENT_ATTRIBUTES,
    OP_GET_DOCUMENTS,
    OP_CANCEL_MY_JOBS,
    OP_CLOSE_JOB,
    OP_IDENTIFY_PRINTER,
    OP_VALIDATE_DOCUMENT,
    OP_ACKNOWLEDGE_DOCUMENT,
    OP_ACKNOWLEDGE_IDENTIFY_PRINTER,
    OP_ACKNOWLEDGE_JOB,
    OP_FETCH_DOCUMENT,
    OP_FETCH_JOB,
    OP_GET_OUTPUT_DEVICE_ATTRIBUTES,
    OP_UPDATE_ACTIVE_JOBS,
    OP_UPDATE_DOCUMENT_STATUS,
    OP_UPDATE_JOB_STATUS,
    OP_UPDATE_OUTPUT_DEVICE_ATTRIBUTES,
    OP_DEREGISTER_OUTPUT_DEVICE,
];

/// Formats accepted when no device has reported `document-format-supported`.
pub const DEFAULT_DOCUMENT_FORMATS: &[&str] = &[
    "application/octet-stream",
    "application/pdf",
    "application/postscript",
    "image/jpeg",
    "image/png",
    "image/pwg-raster",
    "image/urf",
];

/// `identify-actions-supported`.
pub const IDENTIFY_ACTIONS: &[&str] = &["display", "flash", "sound", "speak"];

/// `which-jobs-supported`.
pub const WHICH_JOBS: &[&str] = &[
    "completed",
    "not-completed",
    "aborted",
    "all",
    "canceled",
    "pending",
    "pending-held",
    "processing",
    "processing-stopped",
];

/// Device attributes that feed the composite state rather than being copied.
const DEVICE_STATE_ATTRS: &[&str] = &["printer-state", "printer-state-reasons", "printer-state-message"];

/// A pending Identify-Printer request waiting for a device to pick it up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifyRequest {
    pub actions: Vec<String>,
    pub message: Option<String>,
}

/// What one sweep reclaimed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub jobs: usize,
    pub subscriptions: usize,
}

#[derive(Debug)]
struct PrinterInner {
    state: PrinterState,
    reasons: PrinterReasons,
    state_time: DateTime<Utc>,
    config_time: DateTime<Utc>,
    /// Composite device view, from the first device by UUID.
    dev_state: Option<PrinterState>,
    dev_reasons: PrinterReasons,
    dev_attrs: IppAttributeGroup,
    /// UUID of the device the composite view was last built from.
    dev_source: Option<String>,
    jobs: BTreeMap<i32, Arc<Job>>,
    devices: BTreeMap<String, Arc<Device>>,
    subscriptions: BTreeMap<i32, Arc<Subscription>>,
    next_job_id: i32,
    next_subscription_id: i32,
    /// The single admission slot.
    processing_job: Option<i32>,
    identify: Option<IdentifyRequest>,
}

impl PrinterInner {
    fn composite_state(&self) -> PrinterState {
        match self.dev_state {
            Some(dev) if dev > self.state => dev,
            _ => self.state,
        }
    }

    fn composite_reasons(&self) -> PrinterReasons {
        self.reasons.union(&self.dev_reasons)
    }

    /// Rebuild the composite device view from the first device.
    ///
    /// Only the parts named by `events` are rebuilt, unless the first device
    /// itself changed; then both attributes and state come from the new one.
    fn refresh_devices(&mut self, events: &EventMask, now: DateTime<Utc>) {
        let first = self.devices.values().next().cloned();
        let source = first.as_ref().map(|d| d.uuid.clone());
        let switched = source != self.dev_source;
        self.dev_source = source;

        let config = switched
            || events.contains(NotifyEvent::PrinterConfigChanged)
            || events.contains(NotifyEvent::PrinterMediaChanged)
            || events.contains(NotifyEvent::PrinterFinishingsChanged);
        let state = switched || events.contains(NotifyEvent::PrinterStateChanged);

        if config {
            let mut attrs = IppAttributeGroup::new(TAG_PRINTER_ATTRIBUTES);
            if let Some(device) = &first {
                attrs.attributes = device
                    .attributes()
                    .attributes
                    .into_iter()
                    .filter(|a| !DEVICE_STATE_ATTRS.contains(&a.name.as_str()))
                    .collect();
            }
            self.dev_attrs = attrs;
            self.config_time = now;
        }
        if state {
            match &first {
                Some(device) => {
                    self.dev_state = Some(device.printer_state());
                    self.dev_reasons = device.printer_reasons();
                }
                None => {
                    self.dev_state = None;
                    self.dev_reasons = PrinterReasons::new();
                }
            }
            self.state_time = now;
        }
    }
}

/// The infrastructure printer.
#[derive(Debug)]
pub struct Printer {
    pub name: String,
    pub hostname: String,
    pub port: u16,
    /// `ipp://host:port/ipp/print`.
    pub uri: String,
    /// `urn:uuid:` form.
    pub uuid: String,
    pub spool_dir: PathBuf,
    pub keep_files: bool,
    pub proxy_user: String,
    pub proxy_password: String,
    pub start_time: DateTime<Utc>,
    completed_grace: chrono::Duration,
    max_active_jobs: usize,
    static_attrs: IppAttributeGroup,
    inner: RwLock<PrinterInner>,
    signal: EventSignal,
}

impl Printer {
    pub fn new(config: &ServerConfig) -> Self {
        let now = Utc::now();
        let uri = config.printer_uri();
        let uuid = format!("urn:uuid:{}", uuid::Uuid::new_v4());
        let static_attrs = static_attributes(config, &uri, &uuid);

        Self {
            name: config.printer_name.clone(),
            hostname: config.hostname.clone(),
            port: config.port,
            uri,
            uuid,
            spool_dir: config.spool_dir.clone(),
            keep_files: config.keep_files,
            proxy_user: config.proxy_user.clone(),
            proxy_password: config.proxy_password.clone(),
            start_time: now,
            completed_grace: chrono::Duration::seconds(
                i64::try_from(config.completed_job_grace_secs).unwrap_or(i64::MAX / 1000),
            ),
            max_active_jobs: config.max_active_jobs,
            static_attrs,
            inner: RwLock::new(PrinterInner {
                state: PrinterState::Idle,
                reasons: PrinterReasons::new(),
                state_time: now,
                config_time: now,
                dev_state: None,
                dev_reasons: PrinterReasons::new(),
                dev_attrs: IppAttributeGroup::new(TAG_PRINTER_ATTRIBUTES),
                dev_source: None,
                jobs: BTreeMap::new(),
                devices: BTreeMap::new(),
                subscriptions: BTreeMap::new(),
                next_job_id: 1,
                next_subscription_id: 1,
                processing_job: None,
                identify: None,
            }),
            signal: EventSignal::default(),
        }
    }

    pub fn up_time(&self, now: DateTime<Utc>) -> i32 {
        events::up_time(self.start_time, now)
    }

    // -- Printer state -----------------------------------------------------

    /// Composite `printer-state`: the worse of the local and device state.
    pub fn state(&self) -> PrinterState {
        read(&self.inner).composite_state()
    }

    /// Local reasons merged with the composite device reasons.
    pub fn state_reasons(&self) -> PrinterReasons {
        read(&self.inner).composite_reasons()
    }

    /// Whether the sweep timer has anything to look at.
    pub fn has_work(&self) -> bool {
        let inner = read(&self.inner);
        !inner.jobs.is_empty() || !inner.subscriptions.is_empty()
    }

    /// Look up an attribute in the composite view: device first, then the
    /// built-in table.
    pub fn supported(&self, name: &str) -> Option<IppAttribute> {
        let inner = read(&self.inner);
        inner
            .dev_attrs
            .get(name)
            .or_else(|| self.static_attrs.get(name))
            .cloned()
    }

    fn merged_attributes(&self, inner: &PrinterInner) -> IppAttributeGroup {
        let mut merged = self.static_attrs.clone();
        for attr in &inner.dev_attrs.attributes {
            merged.set(attr.clone());
        }
        merged
    }

    /// Get-Printer-Attributes payload.
    pub fn printer_attributes(&self, ra: &RequestedAttributes, now: DateTime<Utc>) -> IppAttributeGroup {
        let inner = read(&self.inner);
        let mut group = IppAttributeGroup::new(TAG_PRINTER_ATTRIBUTES);
        ra.copy_into(&self.merged_attributes(&inner), &mut group);

        let state = inner.composite_state();
        if ra.includes("printer-config-change-date-time") {
            group.date_time("printer-config-change-date-time", inner.config_time);
        }
        if ra.includes("printer-config-change-time") {
            group.integer("printer-config-change-time", self.up_time(inner.config_time));
        }
        if ra.includes("printer-current-time") {
            group.date_time("printer-current-time", now);
        }
        if ra.includes("printer-state") {
            group.enum_attr("printer-state", state.as_i32());
        }
        if ra.includes("printer-state-change-date-time") {
            group.date_time("printer-state-change-date-time", inner.state_time);
        }
        if ra.includes("printer-state-change-time") {
            group.integer("printer-state-change-time", self.up_time(inner.state_time));
        }
        if ra.includes("printer-state-message") {
            group.text("printer-state-message", state.message());
        }
        if ra.includes("printer-state-reasons") {
            group.keywords("printer-state-reasons", &inner.composite_reasons().keywords_or_none());
        }
        if ra.includes("printer-up-time") {
            group.integer("printer-up-time", self.up_time(now));
        }
        if ra.includes("queued-job-count") {
            let queued = inner.jobs.values().filter(|j| !j.state().is_terminal()).count();
            group.integer("queued-job-count", i32::try_from(queued).unwrap_or(i32::MAX));
        }
        group
    }

    /// Get-Printer-Supported-Values payload.
    pub fn supported_values(&self, ra: &RequestedAttributes) -> IppAttributeGroup {
        let inner = read(&self.inner);
        let mut supported = IppAttributeGroup::new(TAG_PRINTER_ATTRIBUTES);
        supported.attributes = self
            .merged_attributes(&inner)
            .attributes
            .into_iter()
            .filter(|a| a.name.ends_with("-supported"))
            .collect();
        let mut group = IppAttributeGroup::new(TAG_PRINTER_ATTRIBUTES);
        ra.copy_into(&supported, &mut group);
        group
    }

    // -- Jobs --------------------------------------------------------------

    pub fn job(&self, id: i32) -> Option<Arc<Job>> {
        read(&self.inner).jobs.get(&id).cloned()
    }

    /// Every job, newest first.
    pub fn jobs(&self) -> Vec<Arc<Job>> {
        read(&self.inner).jobs.values().rev().cloned().collect()
    }

    pub fn processing_job(&self) -> Option<i32> {
        read(&self.inner).processing_job
    }

    /// Create a HELD job.  Fails when `max_active_jobs` non-terminal jobs
    /// already exist.
    pub fn create_job(
        &self,
        name: &str,
        username: &str,
        priority: Option<i32>,
        attrs: IppAttributeGroup,
    ) -> Result<Arc<Job>, JobError> {
        let now = Utc::now();
        let job = {
            let mut inner = write(&self.inner);
            let active = inner.jobs.values().filter(|j| !j.state().is_terminal()).count();
            if active >= self.max_active_jobs {
                warn!(active, "job refused: too many active jobs");
                return Err(JobError::TooManyJobs);
            }
            let id = inner.next_job_id;
            inner.next_job_id += 1;
            let job = Arc::new(Job::new(
                id,
                &self.uri,
                name,
                username,
                priority.unwrap_or(DEFAULT_PRIORITY),
                attrs,
                self.start_time,
                now,
            ));
            inner.jobs.insert(id, Arc::clone(&job));
            job
        };
        info!(job_id = job.id, user = %job.username, name = %job.name, "job created");
        Ok(job)
    }

    /// The document is fully spooled: HELD becomes PENDING, or CANCELED if a
    /// cancel arrived during the upload.
    pub fn document_received(self: &Arc<Self>, job: &Arc<Job>) {
        let now = Utc::now();
        let canceled = {
            let mut data = job.data_mut();
            data.reasons.remove(JobStateReason::JobIncoming);
            if data.cancel {
                data.set_state(JobState::Canceled, now);
                data.reasons.insert(JobStateReason::JobCanceledByUser);
                true
            } else {
                data.set_state(JobState::Pending, now);
                false
            }
        };
        if canceled {
            info!(job_id = job.id, "job canceled during upload");
            self.add_event(Some(job), job_completed(), "Job canceled.");
        } else {
            debug!(job_id = job.id, "job pending");
            self.add_event(Some(job), EventMask::only(NotifyEvent::JobStateChanged), "Job pending.");
            self.check_jobs();
        }
    }

    /// Move a job to ABORTED after an internal or document failure.
    pub fn abort_job(&self, job: &Job, reason: JobStateReason, text: &str) {
        let changed = {
            let mut data = job.data_mut();
            data.reasons.remove(JobStateReason::JobIncoming);
            data.reasons.insert(reason);
            data.set_state(JobState::Aborted, Utc::now())
        };
        if changed {
            warn!(job_id = job.id, "{text}");
            self.add_event(Some(job), job_completed(), text);
        }
    }

    /// Cancel-Job semantics, including the event.
    pub fn cancel_job(&self, job: &Job) -> Result<CancelOutcome, JobError> {
        let outcome = job.request_cancel(Utc::now())?;
        match outcome {
            CancelOutcome::Canceled => {
                info!(job_id = job.id, "job canceled");
                self.add_event(Some(job), job_completed(), "Job canceled.");
            }
            CancelOutcome::Deferred => {
                info!(job_id = job.id, "job cancel requested");
                self.add_event(
                    Some(job),
                    EventMask::only(NotifyEvent::JobStateChanged),
                    "Cancel in progress.",
                );
            }
        }
        Ok(outcome)
    }

    /// The bound device reports the job done.  Only a STOPPED job moves, to
    /// the reported terminal state, and `job-completed` fires.
    pub fn finish_job(&self, job: &Job, state: JobState) -> bool {
        if !state.is_terminal() {
            return false;
        }
        let text = {
            let mut data = job.data_mut();
            if data.state != JobState::Stopped || !data.set_state(state, Utc::now()) {
                return false;
            }
            data.state_message().to_string()
        };
        info!(job_id = job.id, state = %state, "job finished by output device");
        self.add_event(Some(job), job_completed(), &text);
        true
    }

    /// Admit the next PENDING job (highest priority, then lowest id) if the
    /// processing slot is free.
    pub fn check_jobs(self: &Arc<Self>) {
        let now = Utc::now();
        let job = {
            let mut inner = write(&self.inner);
            if inner.processing_job.is_some() {
                return;
            }
            let next = inner
                .jobs
                .values()
                .filter(|j| j.state() == JobState::Pending)
                .max_by(|a, b| a.priority.cmp(&b.priority).then(b.id.cmp(&a.id)))
                .cloned();
            let Some(job) = next else {
                return;
            };
            if !job.data_mut().set_state(JobState::Processing, now) {
                return;
            }
            inner.processing_job = Some(job.id);
            inner.state = PrinterState::Processing;
            inner.state_time = now;
            job
        };

        info!(job_id = job.id, "job processing");
        self.add_event(Some(&job), EventMask::only(NotifyEvent::JobStateChanged), "Job processing.");
        self.add_event(None, EventMask::only(NotifyEvent::PrinterStateChanged), PrinterState::Processing.message());

        let printer = Arc::clone(self);
        let worker_job = Arc::clone(&job);
        let spawned = std::thread::Builder::new()
            .name(format!("job-{}", job.id))
            .spawn(move || printer.process_job(&worker_job));

        if let Err(e) = spawned {
            error!(job_id = job.id, error = %e, "failed to start processing worker");
            self.release_slot(job.id, Utc::now());
            self.abort_job(
                &job,
                JobStateReason::AbortedBySystem,
                "Job aborted because creation of processing thread failed.",
            );
        }
    }

    /// The processing work unit.  Honors the cancel flag, otherwise leaves the
    /// job STOPPED and fetchable for an output device.
    fn process_job(self: &Arc<Self>, job: &Arc<Job>) {
        let now = Utc::now();
        let (events, text) = {
            let mut data = job.data_mut();
            if data.cancel {
                data.set_state(JobState::Canceled, now);
                data.reasons.insert(JobStateReason::JobCanceledByUser);
                (job_completed(), "Job canceled.")
            } else {
                data.set_state(JobState::Stopped, now);
                data.reasons.insert(JobStateReason::JobFetchable);
                let mut events = EventMask::only(NotifyEvent::JobStateChanged);
                events.insert(NotifyEvent::JobFetchable);
                (events, "Job fetchable.")
            }
        };
        info!(job_id = job.id, "{text}");
        self.add_event(Some(job), events, text);

        self.release_slot(job.id, Utc::now());
        self.add_event(None, EventMask::only(NotifyEvent::PrinterStateChanged), PrinterState::Idle.message());
        self.check_jobs();
    }

    fn release_slot(&self, job_id: i32, now: DateTime<Utc>) {
        let mut inner = write(&self.inner);
        if inner.processing_job == Some(job_id) {
            inner.processing_job = None;
            inner.state = PrinterState::Idle;
            inner.state_time = now;
        }
    }

    // -- Events and subscriptions -----------------------------------------

    /// Publish to every matching subscription and wake `notify-wait` callers.
    pub fn add_event(&self, job: Option<&Job>, events: EventMask, text: &str) {
        let (subscriptions, printer_state, printer_reasons) = {
            let inner = read(&self.inner);
            (
                inner.subscriptions.values().cloned().collect::<Vec<_>>(),
                inner.composite_state(),
                inner.composite_reasons().keywords_or_none(),
            )
        };
        if subscriptions.is_empty() {
            return;
        }
        let notice = EventNotice {
            events,
            text,
            printer_uri: &self.uri,
            printer_up_time: self.up_time(Utc::now()),
            printer_state,
            printer_reasons,
            job: job.map(Job::snapshot),
        };
        if events::publish(&subscriptions, &notice) > 0 {
            self.signal.notify();
        }
    }

    pub fn add_subscription(
        &self,
        mask: EventMask,
        job_id: Option<i32>,
        username: &str,
        attrs: Vec<IppAttribute>,
        lease: i32,
    ) -> Arc<Subscription> {
        let sub = {
            let mut inner = write(&self.inner);
            let id = inner.next_subscription_id;
            inner.next_subscription_id += 1;
            let sub = Arc::new(Subscription::new(id, mask, job_id, username, attrs, lease, Utc::now()));
            inner.subscriptions.insert(id, Arc::clone(&sub));
            sub
        };
        info!(subscription_id = sub.id, job_id = ?sub.job_id, user = %sub.username, "subscription created");
        sub
    }

    pub fn subscription(&self, id: i32) -> Option<Arc<Subscription>> {
        read(&self.inner).subscriptions.get(&id).cloned()
    }

    /// Every subscription, by id.
    pub fn subscriptions(&self) -> Vec<Arc<Subscription>> {
        read(&self.inner).subscriptions.values().cloned().collect()
    }

    pub fn cancel_subscription(&self, id: i32) -> bool {
        let removed = write(&self.inner).subscriptions.remove(&id);
        match removed {
            Some(sub) => {
                sub.mark_deleted();
                self.signal.notify();
                info!(subscription_id = id, "subscription canceled");
                true
            }
            None => false,
        }
    }

    pub fn event_generation(&self) -> u64 {
        self.signal.current()
    }

    /// Block until something is published or `timeout` passes.
    pub fn wait_for_events(&self, seen: u64, timeout: Duration) -> bool {
        self.signal.wait_past(seen, timeout)
    }

    // -- Output devices ----------------------------------------------------

    pub fn device(&self, uuid: &str) -> Option<Arc<Device>> {
        read(&self.inner).devices.get(uuid).cloned()
    }

    /// Create the device if unknown, merge its attributes, refresh the
    /// composite view and fire the resulting printer events.
    #[instrument(skip(self, attrs))]
    pub fn update_device(&self, uuid: &str, attrs: &[IppAttribute]) -> DeviceUpdate {
        let device = {
            let mut inner = write(&self.inner);
            let device = inner.devices.entry(uuid.to_string()).or_insert_with(|| {
                info!(device = %uuid, "output device registered");
                Arc::new(Device::new(uuid))
            });
            Arc::clone(device)
        };

        let update = device.apply_update(attrs);
        if update.events.is_empty() {
            return update;
        }

        write(&self.inner).refresh_devices(&update.events, Utc::now());
        let text = if update.events.contains(NotifyEvent::PrinterStateChanged) {
            "Printer state changed."
        } else {
            "Printer configuration changed."
        };
        self.add_event(None, update.events.clone(), text);
        update
    }

    /// Remove a device and recompute the composite view.
    pub fn deregister_device(&self, uuid: &str) -> bool {
        let mut events = EventMask::only(NotifyEvent::PrinterConfigChanged);
        events.insert(NotifyEvent::PrinterStateChanged);
        {
            let mut inner = write(&self.inner);
            if inner.devices.remove(uuid).is_none() {
                return false;
            }
            inner.refresh_devices(&events, Utc::now());
        }
        info!(device = %uuid, "output device deregistered");
        self.add_event(None, events, "Output device deregistered.");
        true
    }

    pub fn set_identify(&self, request: IdentifyRequest) {
        write(&self.inner).identify = Some(request);
    }

    pub fn take_identify(&self) -> Option<IdentifyRequest> {
        write(&self.inner).identify.take()
    }

    // -- Sweeps ------------------------------------------------------------

    /// Reclaim jobs completed longer than the grace period ago, their
    /// job-scoped subscriptions, and subscriptions whose lease has run out.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepStats {
        let cutoff = now - self.completed_grace;
        let (jobs, subscriptions) = {
            let mut inner = write(&self.inner);
            let stale: Vec<i32> = inner
                .jobs
                .values()
                .filter(|j| j.completed_at().is_some_and(|t| t < cutoff))
                .map(|j| j.id)
                .collect();
            let jobs: Vec<Arc<Job>> = stale.iter().filter_map(|id| inner.jobs.remove(id)).collect();
            let reclaimed: BTreeSet<i32> = stale.into_iter().collect();

            let dead: Vec<i32> = inner
                .subscriptions
                .values()
                .filter(|s| s.is_expired(now) || s.job_id.is_some_and(|id| reclaimed.contains(&id)))
                .map(|s| s.id)
                .collect();
            let subscriptions: Vec<Arc<Subscription>> =
                dead.iter().filter_map(|id| inner.subscriptions.remove(id)).collect();
            (jobs, subscriptions)
        };

        for sub in &subscriptions {
            sub.mark_deleted();
            info!(subscription_id = sub.id, "subscription expired");
        }
        if !subscriptions.is_empty() {
            self.signal.notify();
        }

        for job in &jobs {
            let filename = job.data_mut().filename.take();
            if let Some(path) = filename {
                if self.keep_files {
                    debug!(job_id = job.id, path = %path.display(), "keeping spool file");
                } else if let Err(e) = std::fs::remove_file(&path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(job_id = job.id, path = %path.display(), error = %e, "failed to remove spool file");
                    }
                }
            }
            info!(job_id = job.id, "job reclaimed");
        }

        SweepStats { jobs: jobs.len(), subscriptions: subscriptions.len() }
    }
}

fn job_completed() -> EventMask {
    let mut events = EventMask::only(NotifyEvent::JobCompleted);
    events.insert(NotifyEvent::JobStateChanged);
    events
}

/// The fixed printer description attributes.
fn static_attributes(config: &ServerConfig, uri: &str, uuid: &str) -> IppAttributeGroup {
    let ops: Vec<i32> = OPERATIONS_SUPPORTED.iter().map(|op| i32::from(*op)).collect();
    let events = EventMask::all().keywords();
    let more_info = config.http_uri();
    let supply_info = format!("{more_info}supplies");

    let mut attrs = IppAttributeGroup::new(TAG_PRINTER_ATTRIBUTES);
    attrs
        .charset("charset-configured", "utf-8")
        .add(IppAttribute::with_values(
            "charset-supported",
            vec![IppValue::charset("us-ascii"), IppValue::charset("utf-8")],
        ))
        .keywords("compression-supported", &["none"])
        .mime_type("document-format-default", "application/octet-stream")
        .add(IppAttribute::with_values(
            "document-format-supported",
            DEFAULT_DOCUMENT_FORMATS.iter().map(|f| IppValue::mime_type(*f)).collect(),
        ))
        .natural_language("generated-natural-language-supported", "en")
        .keyword("identify-actions-default", "display")
        .keywords("identify-actions-supported", IDENTIFY_ACTIONS)
        .keywords(
            "ipp-features-supported",
            &["document-object", "ipp-everywhere", "infrastructure-printer", "page-overrides"],
        )
        .keywords("ipp-versions-supported", &["1.0", "1.1", "2.0"])
        .integer("ippget-event-life", IPPGET_EVENT_LIFE)
        .boolean("job-ids-supported", true)
        .range("job-k-octets-supported", 0, i32::MAX)
        .integer("job-priority-default", DEFAULT_PRIORITY)
        .integer("job-priority-supported", 100)
        .boolean("multiple-document-jobs-supported", false)
        .integer("multiple-operation-time-out", 60)
        .keyword("multiple-operation-time-out-action", "abort-job")
        .natural_language("natural-language-configured", "en")
        .keywords(
            "notify-attributes-supported",
            &["printer-state-change-time", "notify-lease-expiration-time", "notify-subscriber-user-name"],
        )
        .keyword("notify-events-default", NotifyEvent::DEFAULT.keyword())
        .keywords("notify-events-supported", &events)
        .integer("notify-get-interval", NOTIFY_GET_INTERVAL)
        .integer("notify-lease-duration-default", DEFAULT_LEASE_SECS)
        .range("notify-lease-duration-supported", 0, MAX_LEASE_SECS)
        .integer("notify-max-events-supported", i32::try_from(events.len()).unwrap_or(i32::MAX))
        .keyword("notify-pull-method-supported", "ippget")
        .enums("operations-supported", &ops)
        .keyword("printer-get-attributes-supported", "document-format")
        .boolean("printer-is-accepting-jobs", true)
        .text("printer-info", &config.printer_name)
        .uri("printer-more-info", &more_info)
        .name_attr("printer-name", &config.printer_name)
        .uri("printer-supply-info-uri", &supply_info)
        .uri("printer-uri-supported", uri)
        .uri("printer-uuid", uuid)
        .add(IppAttribute::with_values(
            "reference-uri-schemes-supported",
            ["file", "http", "https"].iter().map(|s| IppValue::uri_scheme(*s)).collect(),
        ))
        .keyword("uri-authentication-supported", "basic")
        .keyword("uri-security-supported", "none")
        .keywords("which-jobs-supported", WHICH_JOBS);
    attrs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::TAG_JOB_ATTRIBUTES;
    use std::time::Instant;

    fn printer() -> Arc<Printer> {
        let config = ServerConfig {
            hostname: "printhost".into(),
            port: 8631,
            spool_dir: std::env::temp_dir().join("infraprint-printer-tests"),
            ..ServerConfig::default()
        };
        Arc::new(Printer::new(&config))
    }

    fn new_job(printer: &Printer, priority: i32) -> Arc<Job> {
        printer
            .create_job("doc", "alice", Some(priority), IppAttributeGroup::new(TAG_JOB_ATTRIBUTES))
            .expect("create job")
    }

    fn wait_for_state(job: &Job, state: JobState) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while job.state() != state {
            assert!(Instant::now() < deadline, "job {} stuck in {}", job.id, job.state());
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    // -- Static attributes -------------------------------------------------

    #[test]
    fn static_attributes_advertise_every_operation() {
        let printer = printer();
        let ops = printer.supported("operations-supported").expect("operations-supported");
        assert_eq!(ops.count(), OPERATIONS_SUPPORTED.len());
        assert_eq!(printer.supported("printer-uri-supported").and_then(|a| a.as_str().map(String::from)),
            Some("ipp://printhost:8631/ipp/print".to_string()));
    }

    #[test]
    fn printer_attributes_start_idle() {
        let printer = printer();
        let now = Utc::now();
        let group = printer.printer_attributes(&RequestedAttributes::all(), now);
        assert_eq!(group.get_integer("printer-state"), Some(PrinterState::Idle.as_i32()));
        assert_eq!(group.get_string("printer-state-message"), Some("Idle."));
        assert_eq!(group.get_string("printer-state-reasons"), Some("none"));
        assert_eq!(group.get_integer("queued-job-count"), Some(0));
        assert_eq!(group.get_string("printer-name"), Some("Infrastructure Printer"));
    }

    // -- Jobs --------------------------------------------------------------

    #[test]
    fn job_ids_are_monotonic_and_listed_newest_first() {
        let printer = printer();
        let a = new_job(&printer, 50);
        let b = new_job(&printer, 50);
        assert_eq!((a.id, b.id), (1, 2));
        let ids: Vec<i32> = printer.jobs().iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn too_many_active_jobs_is_refused() {
        let config = ServerConfig { max_active_jobs: 2, ..ServerConfig::default() };
        let printer = Printer::new(&config);
        new_job(&printer, 50);
        new_job(&printer, 50);
        let err = printer
            .create_job("x", "bob", None, IppAttributeGroup::new(TAG_JOB_ATTRIBUTES))
            .expect_err("third job");
        assert_eq!(err, JobError::TooManyJobs);
    }

    #[test]
    fn received_document_runs_through_to_fetchable() {
        let printer = printer();
        let job = new_job(&printer, 50);
        job.data_mut().reasons.insert(JobStateReason::JobIncoming);
        printer.document_received(&job);

        wait_for_state(&job, JobState::Stopped);
        let data = job.data();
        assert!(data.is_fetchable());
        assert!(!data.is_incoming());
        assert!(data.processing.is_some());
        drop(data);

        let deadline = Instant::now() + Duration::from_secs(5);
        while printer.processing_job().is_some() {
            assert!(Instant::now() < deadline, "slot never released");
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(printer.state(), PrinterState::Idle);
    }

    #[test]
    fn single_processing_slot() {
        let printer = printer();
        let jobs: Vec<Arc<Job>> = (0..8).map(|i| new_job(&printer, 10 + i)).collect();
        for job in &jobs {
            job.data_mut().set_state(JobState::Pending, Utc::now());
        }
        printer.check_jobs();

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let processing = jobs.iter().filter(|j| j.state() == JobState::Processing).count();
            assert!(processing <= 1, "{processing} jobs processing at once");
            if jobs.iter().all(|j| j.state() == JobState::Stopped) {
                break;
            }
            assert!(Instant::now() < deadline, "jobs never finished");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn cancel_during_upload_finishes_canceled() {
        let printer = printer();
        let job = new_job(&printer, 50);
        job.data_mut().reasons.insert(JobStateReason::JobIncoming);
        assert_eq!(printer.cancel_job(&job), Ok(CancelOutcome::Deferred));
        printer.document_received(&job);
        assert_eq!(job.state(), JobState::Canceled);
        assert!(printer.processing_job().is_none());
    }

    #[test]
    fn abort_is_terminal() {
        let printer = printer();
        let job = new_job(&printer, 50);
        printer.abort_job(&job, JobStateReason::DocumentAccessError, "Unable to read document.");
        assert_eq!(job.state(), JobState::Aborted);
        printer.abort_job(&job, JobStateReason::AbortedBySystem, "again");
        assert!(job.data().reasons.contains(JobStateReason::DocumentAccessError));
        assert!(!job.data().reasons.contains(JobStateReason::AbortedBySystem));
    }

    // -- Events ------------------------------------------------------------

    #[test]
    fn job_transitions_reach_scoped_subscription() {
        let printer = printer();
        let job = new_job(&printer, 50);
        let sub = printer.add_subscription(
            EventMask::all(),
            Some(job.id),
            "alice",
            Vec::new(),
            0,
        );
        printer.cancel_job(&job).expect("cancel");

        let events = sub.events_from(1);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].get_string("notify-text"), Some("Job canceled."));
        assert_eq!(events[0].get_integer("job-state"), Some(JobState::Canceled.as_i32()));
    }

    #[test]
    fn cancel_subscription_removes_it() {
        let printer = printer();
        let sub = printer.add_subscription(EventMask::all(), None, "bob", Vec::new(), 60);
        assert!(printer.subscription(sub.id).is_some());
        assert!(printer.cancel_subscription(sub.id));
        assert!(sub.is_deleted());
        assert!(!printer.cancel_subscription(sub.id));
    }

    // -- Devices -----------------------------------------------------------

    #[test]
    fn device_state_drives_composite_state() {
        let printer = printer();
        let mut attrs = IppAttributeGroup::new(TAG_PRINTER_ATTRIBUTES);
        attrs
            .enum_attr("printer-state", PrinterState::Stopped.as_i32())
            .keywords("printer-state-reasons", &["media-empty"])
            .keywords("sides-supported", &["one-sided", "two-sided-long-edge"]);
        printer.update_device("urn:uuid:x", &attrs.attributes);

        assert!(printer.device("urn:uuid:x").is_some());
        assert_eq!(printer.state(), PrinterState::Stopped);
        assert_eq!(printer.state_reasons().keywords(), vec!["media-empty"]);
        assert_eq!(printer.supported("sides-supported").map(|a| a.count()), Some(2));

        let group = printer.printer_attributes(&RequestedAttributes::all(), Utc::now());
        assert_eq!(
            group.attributes.iter().filter(|a| a.name == "printer-state").count(),
            1
        );
        assert_eq!(group.get_string("printer-state-message"), Some("Stopped."));

        assert!(printer.deregister_device("urn:uuid:x"));
        assert_eq!(printer.state(), PrinterState::Idle);
        assert!(printer.supported("sides-supported").is_none());
        assert!(!printer.deregister_device("urn:uuid:x"));
    }

    #[test]
    fn composite_uses_first_device_by_uuid() {
        let printer = printer();
        let mut idle = IppAttributeGroup::new(TAG_PRINTER_ATTRIBUTES);
        idle.enum_attr("printer-state", PrinterState::Idle.as_i32());
        let mut stopped = IppAttributeGroup::new(TAG_PRINTER_ATTRIBUTES);
        stopped.enum_attr("printer-state", PrinterState::Stopped.as_i32());

        printer.update_device("urn:uuid:b", &stopped.attributes);
        assert_eq!(printer.state(), PrinterState::Stopped);
        printer.update_device("urn:uuid:a", &idle.attributes);
        assert_eq!(printer.state(), PrinterState::Idle);
    }

    #[test]
    fn new_first_device_replaces_whole_composite() {
        let printer = printer();
        let mut b = IppAttributeGroup::new(TAG_PRINTER_ATTRIBUTES);
        b.enum_attr("printer-state", PrinterState::Stopped.as_i32())
            .keywords("sides-supported", &["one-sided", "two-sided-long-edge"]);
        printer.update_device("urn:uuid:b", &b.attributes);
        assert_eq!(printer.supported("sides-supported").map(|a| a.count()), Some(2));

        // "a" sorts first and reports state only.
        let mut a = IppAttributeGroup::new(TAG_PRINTER_ATTRIBUTES);
        a.enum_attr("printer-state", PrinterState::Idle.as_i32());
        printer.update_device("urn:uuid:a", &a.attributes);
        assert_eq!(printer.state(), PrinterState::Idle);
        assert_eq!(
            printer.supported("sides-supported"),
            printer.static_attrs.get("sides-supported").cloned()
        );

        // Back to "b" once "a" leaves.
        assert!(printer.deregister_device("urn:uuid:a"));
        assert_eq!(printer.state(), PrinterState::Stopped);
        assert_eq!(printer.supported("sides-supported").map(|a| a.count()), Some(2));
    }

    #[test]
    fn identify_request_is_taken_once() {
        let printer = printer();
        printer.set_identify(IdentifyRequest { actions: vec!["display".into()], message: None });
        assert!(printer.take_identify().is_some());
        assert!(printer.take_identify().is_none());
    }

    // -- Sweep -------------------------------------------------------------

    #[test]
    fn sweep_reclaims_old_jobs_and_expired_subscriptions() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let config = ServerConfig { spool_dir: tmp.path().to_path_buf(), ..ServerConfig::default() };
        let printer = Printer::new(&config);

        let job = new_job(&printer, 50);
        let spool = tmp.path().join("1-doc.prn");
        std::fs::write(&spool, b"data").expect("write spool");
        job.data_mut().filename = Some(spool.clone());
        printer.cancel_job(&job).expect("cancel");

        let scoped = printer.add_subscription(EventMask::all(), Some(job.id), "alice", Vec::new(), 0);
        let leased = printer.add_subscription(EventMask::all(), None, "alice", Vec::new(), 30);
        let forever = printer.add_subscription(EventMask::all(), None, "alice", Vec::new(), 0);

        let stats = printer.sweep(Utc::now());
        assert_eq!(stats, SweepStats::default());

        let later = Utc::now() + chrono::Duration::seconds(61);
        let stats = printer.sweep(later);
        assert_eq!(stats, SweepStats { jobs: 1, subscriptions: 2 });
        assert!(printer.job(job.id).is_none());
        assert!(!spool.exists());
        assert!(scoped.is_deleted() && leased.is_deleted());
        assert!(printer.subscription(forever.id).is_some());
        assert!(printer.has_work());
    }

    #[test]
    fn keep_mode_leaves_spool_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let config = ServerConfig {
            spool_dir: tmp.path().to_path_buf(),
            keep_files: true,
            ..ServerConfig::default()
        };
        let printer = Printer::new(&config);
        let job = new_job(&printer, 50);
        let spool = tmp.path().join("1-doc.prn");
        std::fs::write(&spool, b"data").expect("write spool");
        job.data_mut().filename = Some(spool.clone());
        printer.cancel_job(&job).expect("cancel");

        let stats = printer.sweep(Utc::now() + chrono::Duration::seconds(61));
        assert_eq!(stats.jobs, 1);
        assert!(spool.exists());
        assert!(!printer.has_work());
    }
}
