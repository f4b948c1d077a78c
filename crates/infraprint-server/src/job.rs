// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job Lifecycle Manager: the job record, its state machine, spool file naming
// and the job description attributes served to clients and devices.
//
// State machine:
//
//   (create) -> Held --document received--> Pending --admitted--> Processing
//   Processing --work unit done--> Stopped + job-fetchable
//   any non-terminal --Cancel-Job--> Canceled (or cancel flag when busy)
//   any --internal failure--> Aborted
//
// Canceled, aborted and completed are terminal: `JobData::set_state` refuses
// every transition out of them.

use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use thiserror::Error;

use infraprint_core::types::{JobReasons, JobState, JobStateReason};

use crate::codec::{IppAttributeGroup, TAG_JOB_ATTRIBUTES, VALUE_TAG_NO_VALUE};
use crate::events::{up_time, JobSnapshot};
use crate::lock::{read, write};
use crate::requested::RequestedAttributes;

/// Default `job-priority`.
pub const DEFAULT_PRIORITY: i32 = 50;

/// Job lifecycle failures reported to clients as `client-error-not-possible`
/// or `server-error-too-many-jobs`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("Too many jobs are queued.")]
    TooManyJobs,

    #[error("Job #{id} is already {state} - can't cancel.")]
    AlreadyTerminal { id: i32, state: JobState },

    #[error("Job #{id} is {state} - can't close.")]
    ClosedTerminal { id: i32, state: JobState },

    #[error("Job #{id} is already closed.")]
    AlreadyClosed { id: i32 },
}

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job went straight to CANCELED.
    Canceled,
    /// The job is processing or mid-upload; the flag is set and the
    /// worker finishes the cancel.
    Deferred,
}

/// Who may touch a job from the device side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Bound to the asking device.
    Owned,
    /// Not bound to any device yet.
    Unbound,
    /// Bound to another device.
    Foreign,
}

/// Mutable job state, guarded by the job's own lock.
#[derive(Debug, Clone)]
pub struct JobData {
    pub state: JobState,
    pub reasons: JobReasons,
    /// State last reported by the output device.
    pub dev_state: Option<JobState>,
    pub dev_reasons: JobReasons,
    pub dev_state_message: Option<String>,
    /// Output device the job is bound to; set at most once.
    pub dev_uuid: Option<String>,
    /// Effective document format, once known.
    pub format: Option<String>,
    /// Spool file, owned by the job until it is reclaimed.
    pub filename: Option<PathBuf>,
    pub document_sha256: Option<String>,
    /// Cooperative cancel flag observed by the processing worker.
    pub cancel: bool,
    pub impressions: i32,
    pub impressions_completed: i32,
    pub processing: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
    /// Job template and description attributes stored at creation.
    pub attrs: IppAttributeGroup,
}

impl JobData {
    /// Move to `state`.  Returns `false` (and changes nothing) once the job
    /// is terminal.
    pub fn set_state(&mut self, state: JobState, now: DateTime<Utc>) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = state;
        if state == JobState::Processing && self.processing.is_none() {
            self.processing = Some(now);
        }
        if state.is_terminal() {
            self.completed = Some(now);
            self.reasons.remove(JobStateReason::JobFetchable);
            self.reasons.remove(JobStateReason::JobIncoming);
            self.reasons.remove(JobStateReason::ProcessingToStopPoint);
        }
        true
    }

    pub fn is_incoming(&self) -> bool {
        self.reasons.contains(JobStateReason::JobIncoming)
    }

    pub fn is_fetchable(&self) -> bool {
        self.reasons.contains(JobStateReason::JobFetchable)
    }

    /// Local reasons merged with the device-reported ones.
    pub fn combined_reasons(&self) -> JobReasons {
        self.reasons.union(&self.dev_reasons)
    }

    pub fn ownership(&self, device_uuid: &str) -> Ownership {
        match self.dev_uuid.as_deref() {
            None => Ownership::Unbound,
            Some(uuid) if uuid == device_uuid => Ownership::Owned,
            Some(_) => Ownership::Foreign,
        }
    }

    /// Bind to `device_uuid` unless already bound.  Returns whether the job
    /// is now bound to that device.
    pub fn bind_device(&mut self, device_uuid: &str) -> bool {
        match &self.dev_uuid {
            Some(uuid) => uuid == device_uuid,
            None => {
                self.dev_uuid = Some(device_uuid.to_string());
                true
            }
        }
    }

    /// Value of `job-state-message`.
    pub fn state_message(&self) -> &str {
        if let Some(message) = &self.dev_state_message {
            return message;
        }
        match self.state {
            JobState::Pending => "Job pending.",
            JobState::Held if self.is_incoming() => "Job incoming.",
            JobState::Held if self.attrs.get("job-hold-until").is_some() => "Job held.",
            JobState::Held => "Job created.",
            JobState::Processing if self.reasons.contains(JobStateReason::ProcessingToStopPoint) => {
                if self.cancel {
                    "Cancel in progress."
                } else {
                    "Abort in progress."
                }
            }
            JobState::Processing => "Job printing.",
            JobState::Stopped => "Job stopped.",
            JobState::Canceled => "Job canceled.",
            JobState::Aborted => "Job aborted.",
            JobState::Completed => "Job completed.",
        }
    }
}

/// A print job.  Identity fields are immutable; everything else sits behind
/// the job lock.
#[derive(Debug)]
pub struct Job {
    pub id: i32,
    pub uri: String,
    /// `urn:uuid:` form.
    pub uuid: String,
    pub name: String,
    pub username: String,
    pub priority: i32,
    pub created: DateTime<Utc>,
    data: RwLock<JobData>,
}

impl Job {
    /// A freshly created job in HELD.  `attrs` are the job-template
    /// attributes copied from the request.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: i32,
        printer_uri: &str,
        name: impl Into<String>,
        username: impl Into<String>,
        priority: i32,
        mut attrs: IppAttributeGroup,
        start_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let name = name.into();
        let username = username.into();
        let uri = format!("{printer_uri}/{id}");
        let uuid = format!("urn:uuid:{}", uuid::Uuid::new_v4());

        attrs.tag = TAG_JOB_ATTRIBUTES;
        attrs.remove("job-name");
        attrs
            .name_attr("job-name", &name)
            .name_attr("job-originating-user-name", &username)
            .date_time("date-time-at-creation", now)
            .integer("job-id", id)
            .uri("job-uri", &uri)
            .uri("job-uuid", &uuid)
            .uri("job-printer-uri", printer_uri)
            .integer("time-at-creation", up_time(start_time, now));

        let impressions = attrs.get_integer("job-impressions").unwrap_or(0);

        Self {
            id,
            uri,
            uuid,
            name,
            username,
            priority,
            created: now,
            data: RwLock::new(JobData {
                state: JobState::Held,
                reasons: JobReasons::new(),
                dev_state: None,
                dev_reasons: JobReasons::new(),
                dev_state_message: None,
                dev_uuid: None,
                format: None,
                filename: None,
                document_sha256: None,
                cancel: false,
                impressions,
                impressions_completed: 0,
                processing: None,
                completed: None,
                attrs,
            }),
        }
    }

    pub fn data(&self) -> RwLockReadGuard<'_, JobData> {
        read(&self.data)
    }

    pub fn data_mut(&self) -> RwLockWriteGuard<'_, JobData> {
        write(&self.data)
    }

    pub fn state(&self) -> JobState {
        self.data().state
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.data().completed
    }

    /// Cancel now, or flag the job when it is processing or still receiving
    /// its document.
    pub fn request_cancel(&self, now: DateTime<Utc>) -> Result<CancelOutcome, JobError> {
        let mut data = self.data_mut();
        if data.state.is_terminal() {
            return Err(JobError::AlreadyTerminal { id: self.id, state: data.state });
        }
        if data.state == JobState::Processing || (data.state == JobState::Held && data.is_incoming()) {
            data.cancel = true;
            if data.state == JobState::Processing {
                data.reasons.insert(JobStateReason::ProcessingToStopPoint);
            }
            return Ok(CancelOutcome::Deferred);
        }
        data.set_state(JobState::Canceled, now);
        data.reasons.insert(JobStateReason::JobCanceledByUser);
        Ok(CancelOutcome::Canceled)
    }

    /// Close-Job is only meaningful before processing starts.
    pub fn check_closable(&self) -> Result<(), JobError> {
        let state = self.state();
        match state {
            JobState::Canceled | JobState::Aborted | JobState::Completed => {
                Err(JobError::ClosedTerminal { id: self.id, state })
            }
            JobState::Processing | JobState::Stopped => Err(JobError::AlreadyClosed { id: self.id }),
            JobState::Pending | JobState::Held => Ok(()),
        }
    }

    /// Fields carried in event notifications.
    pub fn snapshot(&self) -> JobSnapshot {
        let data = self.data();
        JobSnapshot {
            id: self.id,
            state: data.state,
            reasons: data.combined_reasons().keywords_or_none(),
            name: self.name.clone(),
            username: self.username.clone(),
        }
    }

    /// Job attributes for Get-Job-Attributes, Get-Jobs and job creation
    /// responses.
    pub fn describe(
        &self,
        ra: &RequestedAttributes,
        start_time: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> IppAttributeGroup {
        let data = self.data();
        let mut group = IppAttributeGroup::new(TAG_JOB_ATTRIBUTES);
        ra.copy_into(&data.attrs, &mut group);

        let add_time = |group: &mut IppAttributeGroup, name: &str, at: Option<DateTime<Utc>>, as_date: bool| {
            if !ra.includes(name) {
                return;
            }
            match (at, as_date) {
                (Some(at), true) => group.date_time(name, at),
                (Some(at), false) => group.integer(name, up_time(start_time, at)),
                (None, _) => group.out_of_band(name, VALUE_TAG_NO_VALUE),
            };
        };
        add_time(&mut group, "date-time-at-completed", data.completed, true);
        add_time(&mut group, "date-time-at-processing", data.processing, true);

        if ra.includes("job-impressions") {
            group.integer("job-impressions", data.impressions);
        }
        if ra.includes("job-impressions-completed") {
            group.integer("job-impressions-completed", data.impressions_completed);
        }
        if ra.includes("job-printer-up-time") {
            group.integer("job-printer-up-time", up_time(start_time, now));
        }
        if ra.includes("job-state") {
            group.enum_attr("job-state", data.state.as_i32());
        }
        if ra.includes("job-state-message") {
            group.text("job-state-message", data.state_message());
        }
        if ra.includes("job-state-reasons") {
            group.keywords("job-state-reasons", &data.combined_reasons().keywords_or_none());
        }
        if ra.includes("output-device-assigned") {
            if let Some(uuid) = &data.dev_uuid {
                group.uri("output-device-assigned", uuid);
            }
        }

        add_time(&mut group, "time-at-completed", data.completed, false);
        add_time(&mut group, "time-at-processing", data.processing, false);
        group
    }
}

/// Extension for a spool file holding `format`.
pub fn spool_extension(format: &str) -> &'static str {
    match format.to_ascii_lowercase().as_str() {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/pwg-raster" => "ras",
        "image/urf" => "urf",
        "application/pdf" => "pdf",
        "application/postscript" => "ps",
        _ => "prn",
    }
}

/// `<dir>/<id>-<name>.<ext>`; the name keeps alphanumerics and `-`
/// (lowercased), anything else becomes `_`.
pub fn spool_filename(dir: &Path, id: i32, job_name: &str, format: &str) -> PathBuf {
    let name: String = job_name
        .chars()
        .take(255)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    dir.join(format!("{id}-{name}.{}", spool_extension(format)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        let now = Utc::now();
        let mut attrs = IppAttributeGroup::new(TAG_JOB_ATTRIBUTES);
        attrs.integer("copies", 2);
        Job::new(1, "ipp://host:8631/ipp/print", "Quarterly Report", "alice", DEFAULT_PRIORITY, attrs, now, now)
    }

    // -- Creation -----------------------------------------------------------

    #[test]
    fn new_job_is_held_with_description_attributes() {
        let job = job();
        assert_eq!(job.state(), JobState::Held);
        assert_eq!(job.uri, "ipp://host:8631/ipp/print/1");
        assert!(job.uuid.starts_with("urn:uuid:"));

        let data = job.data();
        assert_eq!(data.attrs.get_integer("job-id"), Some(1));
        assert_eq!(data.attrs.get_string("job-name"), Some("Quarterly Report"));
        assert_eq!(data.attrs.get_string("job-originating-user-name"), Some("alice"));
        assert_eq!(data.attrs.get_integer("copies"), Some(2));
        assert_eq!(data.state_message(), "Job created.");
    }

    // -- State machine ------------------------------------------------------

    #[test]
    fn terminal_states_are_final() {
        let job = job();
        let now = Utc::now();
        let mut data = job.data_mut();
        assert!(data.set_state(JobState::Pending, now));
        assert!(data.set_state(JobState::Processing, now));
        assert!(data.processing.is_some());
        assert!(data.set_state(JobState::Completed, now));
        assert!(data.completed.is_some());

        for next in [JobState::Pending, JobState::Processing, JobState::Canceled, JobState::Aborted] {
            assert!(!data.set_state(next, now));
            assert_eq!(data.state, JobState::Completed);
        }
    }

    #[test]
    fn cancel_held_job_is_immediate() {
        let job = job();
        assert_eq!(job.request_cancel(Utc::now()), Ok(CancelOutcome::Canceled));
        assert_eq!(job.state(), JobState::Canceled);
        assert!(job.completed_at().is_some());
        assert_eq!(job.data().state_message(), "Job canceled.");
    }

    #[test]
    fn cancel_is_deferred_while_processing_or_incoming() {
        let job = job();
        job.data_mut().reasons.insert(JobStateReason::JobIncoming);
        assert_eq!(job.request_cancel(Utc::now()), Ok(CancelOutcome::Deferred));
        assert!(job.data().cancel);
        assert_eq!(job.state(), JobState::Held);

        let job = self::job();
        job.data_mut().state = JobState::Processing;
        assert_eq!(job.request_cancel(Utc::now()), Ok(CancelOutcome::Deferred));
        assert_eq!(job.data().state_message(), "Cancel in progress.");
    }

    #[test]
    fn cancel_terminal_job_fails() {
        let job = job();
        job.data_mut().set_state(JobState::Aborted, Utc::now());
        let err = job.request_cancel(Utc::now()).expect_err("already aborted");
        assert_eq!(err.to_string(), "Job #1 is already aborted - can't cancel.");
    }

    #[test]
    fn close_rules() {
        let job = job();
        assert!(job.check_closable().is_ok());

        job.data_mut().state = JobState::Stopped;
        assert_eq!(job.check_closable(), Err(JobError::AlreadyClosed { id: 1 }));

        job.data_mut().state = JobState::Completed;
        let err = job.check_closable().expect_err("completed");
        assert_eq!(err.to_string(), "Job #1 is completed - can't close.");
    }

    // -- Device binding -----------------------------------------------------

    #[test]
    fn device_binding_happens_once() {
        let job = job();
        let mut data = job.data_mut();
        assert_eq!(data.ownership("urn:uuid:a"), Ownership::Unbound);
        assert!(data.bind_device("urn:uuid:a"));
        assert!(!data.bind_device("urn:uuid:b"));
        assert_eq!(data.dev_uuid.as_deref(), Some("urn:uuid:a"));
        assert_eq!(data.ownership("urn:uuid:a"), Ownership::Owned);
        assert_eq!(data.ownership("urn:uuid:b"), Ownership::Foreign);
    }

    // -- Description --------------------------------------------------------

    #[test]
    fn describe_merges_reasons_and_synthesizes_times() {
        let job = job();
        {
            let mut data = job.data_mut();
            data.reasons.insert(JobStateReason::JobFetchable);
            data.dev_reasons.insert(JobStateReason::JobPrinting);
        }
        let now = Utc::now();
        let group = job.describe(&RequestedAttributes::all(), now, now);
        let reasons: Vec<&str> = group.get("job-state-reasons").expect("reasons").strings().collect();
        assert_eq!(reasons, vec!["job-fetchable", "job-printing"]);
        assert_eq!(
            group.get("time-at-completed").and_then(|a| a.first()),
            Some(&crate::codec::IppValue::OutOfBand(VALUE_TAG_NO_VALUE))
        );
        assert_eq!(group.get_integer("job-state"), Some(JobState::Held.as_i32()));
        assert!(group.get("output-device-assigned").is_none());
    }

    #[test]
    fn describe_honors_requested_attributes() {
        let job = job();
        let now = Utc::now();
        let group = job.describe(&RequestedAttributes::only(["job-id", "job-state"]), now, now);
        let names: Vec<&str> = group.attributes.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["job-id", "job-state"]);
    }

    #[test]
    fn device_message_overrides_state_message() {
        let job = job();
        job.data_mut().dev_state_message = Some("Out of paper.".into());
        assert_eq!(job.data().state_message(), "Out of paper.");
    }

    // -- Spool naming -------------------------------------------------------

    #[test]
    fn spool_filename_sanitizes_name() {
        let path = spool_filename(Path::new("/spool"), 7, "Quarterly Report (v2)", "application/pdf");
        assert_eq!(path, PathBuf::from("/spool/7-quarterly_report__v2_.pdf"));
        assert_eq!(spool_extension("IMAGE/JPEG"), "jpg");
        assert_eq!(spool_extension("application/octet-stream"), "prn");
    }
}
