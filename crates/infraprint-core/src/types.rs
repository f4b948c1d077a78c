// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the infrastructure printer: job and printer states,
// state reasons and notification events, each with its keyword table.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Keyword tables
// ---------------------------------------------------------------------------

/// An enumerated value with a fixed IPP keyword spelling.
///
/// `TABLE` is the single bidirectional mapping: it lists every variant in
/// declaration order, which is also the order used on the wire.
pub trait Keyword: fmt::Debug + Copy + Ord + 'static {
    const TABLE: &'static [(Self, &'static str)];

    /// The IPP keyword for this value.
    fn keyword(self) -> &'static str {
        Self::TABLE
            .iter()
            .find(|(value, _)| *value == self)
            .map(|(_, name)| *name)
            .unwrap_or("none")
    }

    /// Look up a keyword; unknown spellings yield `None`.
    fn from_keyword(name: &str) -> Option<Self> {
        Self::TABLE
            .iter()
            .find(|(_, k)| *k == name)
            .map(|(value, _)| *value)
    }
}

/// A set of keyword-valued flags (state reasons, event masks).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeywordSet<T: Keyword>(BTreeSet<T>);

impl<T: Keyword> Default for KeywordSet<T> {
    fn default() -> Self {
        Self(BTreeSet::new())
    }
}

impl<T: Keyword> KeywordSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every value in the table.
    pub fn all() -> Self {
        T::TABLE.iter().map(|(value, _)| *value).collect()
    }

    /// Build a set from keyword strings, ignoring `none` and unknown names.
    pub fn from_keywords<'a, I>(names: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        names.into_iter().filter_map(T::from_keyword).collect()
    }

    pub fn insert(&mut self, value: T) -> bool {
        self.0.insert(value)
    }

    pub fn remove(&mut self, value: T) -> bool {
        self.0.remove(&value)
    }

    pub fn contains(&self, value: T) -> bool {
        self.0.contains(&value)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.0.iter().copied()
    }

    pub fn union(&self, other: &Self) -> Self {
        self.0.union(&other.0).copied().collect()
    }

    pub fn intersection(&self, other: &Self) -> Self {
        self.0.intersection(&other.0).copied().collect()
    }

    pub fn intersects(&self, other: &Self) -> bool {
        self.0.iter().any(|v| other.0.contains(v))
    }

    /// Keywords in table order.
    pub fn keywords(&self) -> Vec<&'static str> {
        self.0.iter().map(|v| v.keyword()).collect()
    }

    /// Keywords in table order, or `["none"]` for the empty set.
    pub fn keywords_or_none(&self) -> Vec<&'static str> {
        if self.0.is_empty() {
            vec!["none"]
        } else {
            self.keywords()
        }
    }
}

impl<T: Keyword> FromIterator<T> for KeywordSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<T: Keyword> Extend<T> for KeywordSet<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

// ---------------------------------------------------------------------------
// Job state
// ---------------------------------------------------------------------------

/// IPP `job-state` (RFC 8011 SS5.3.7).  Ordering follows the enum values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum JobState {
    Pending = 3,
    Held = 4,
    Processing = 5,
    Stopped = 6,
    Canceled = 7,
    Aborted = 8,
    Completed = 9,
}

impl JobState {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            3 => Some(Self::Pending),
            4 => Some(Self::Held),
            5 => Some(Self::Processing),
            6 => Some(Self::Stopped),
            7 => Some(Self::Canceled),
            8 => Some(Self::Aborted),
            9 => Some(Self::Completed),
            _ => None,
        }
    }

    /// Canceled, aborted and completed admit no further transition.
    pub fn is_terminal(self) -> bool {
        self >= Self::Canceled
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Held => "pending-held",
            Self::Processing => "processing",
            Self::Stopped => "processing-stopped",
            Self::Canceled => "canceled",
            Self::Aborted => "aborted",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

// ---------------------------------------------------------------------------
// Printer state
// ---------------------------------------------------------------------------

/// IPP `printer-state` (RFC 8011 SS5.4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum PrinterState {
    Idle = 3,
    Processing = 4,
    Stopped = 5,
}

impl PrinterState {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            3 => Some(Self::Idle),
            4 => Some(Self::Processing),
            5 => Some(Self::Stopped),
            _ => None,
        }
    }

    /// Value of `printer-state-message`.
    pub fn message(self) -> &'static str {
        match self {
            Self::Idle => "Idle.",
            Self::Processing => "Printing.",
            Self::Stopped => "Stopped.",
        }
    }
}

impl fmt::Display for PrinterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Processing => "processing",
            Self::Stopped => "stopped",
        })
    }
}

// ---------------------------------------------------------------------------
// State reasons
// ---------------------------------------------------------------------------

/// `job-state-reasons` values tracked by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobStateReason {
    AbortedBySystem,
    CompressionError,
    DocumentAccessError,
    DocumentFormatError,
    DocumentPasswordError,
    DocumentPermissionError,
    DocumentSecurityError,
    DocumentUnprintableError,
    ErrorsDetected,
    JobCanceledAtDevice,
    JobCanceledByUser,
    JobCompletedSuccessfully,
    JobCompletedWithErrors,
    JobCompletedWithWarnings,
    JobDataInsufficient,
    JobFetchable,
    JobIncoming,
    JobPasswordWait,
    JobPrinting,
    JobQueued,
    JobSpooling,
    JobStopped,
    JobTransforming,
    PrinterStopped,
    PrinterStoppedPartly,
    ProcessingToStopPoint,
    QueuedInDevice,
    WarningsDetected,
}

impl Keyword for JobStateReason {
    const TABLE: &'static [(Self, &'static str)] = &[
        (Self::AbortedBySystem, "aborted-by-system"),
        (Self::CompressionError, "compression-error"),
        (Self::DocumentAccessError, "document-access-error"),
        (Self::DocumentFormatError, "document-format-error"),
        (Self::DocumentPasswordError, "document-password-error"),
        (Self::DocumentPermissionError, "document-permission-error"),
        (Self::DocumentSecurityError, "document-security-error"),
        (Self::DocumentUnprintableError, "document-unprintable-error"),
        (Self::ErrorsDetected, "errors-detected"),
        (Self::JobCanceledAtDevice, "job-canceled-at-device"),
        (Self::JobCanceledByUser, "job-canceled-by-user"),
        (Self::JobCompletedSuccessfully, "job-completed-successfully"),
        (Self::JobCompletedWithErrors, "job-completed-with-errors"),
        (Self::JobCompletedWithWarnings, "job-completed-with-warnings"),
        (Self::JobDataInsufficient, "job-data-insufficient"),
        (Self::JobFetchable, "job-fetchable"),
        (Self::JobIncoming, "job-incoming"),
        (Self::JobPasswordWait, "job-password-wait"),
        (Self::JobPrinting, "job-printing"),
        (Self::JobQueued, "job-queued"),
        (Self::JobSpooling, "job-spooling"),
        (Self::JobStopped, "job-stopped"),
        (Self::JobTransforming, "job-transforming"),
        (Self::PrinterStopped, "printer-stopped"),
        (Self::PrinterStoppedPartly, "printer-stopped-partly"),
        (Self::ProcessingToStopPoint, "processing-to-stop-point"),
        (Self::QueuedInDevice, "queued-in-device"),
        (Self::WarningsDetected, "warnings-detected"),
    ];
}

/// `printer-state-reasons` values tracked by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PrinterStateReason {
    Other,
    CoverOpen,
    InputTrayMissing,
    MarkerSupplyEmpty,
    MarkerSupplyLow,
    MarkerWasteAlmostFull,
    MarkerWasteFull,
    MediaEmpty,
    MediaJam,
    MediaLow,
    MediaNeeded,
    MovingToPaused,
    Paused,
    SpoolAreaFull,
    TonerEmpty,
    TonerLow,
}

impl Keyword for PrinterStateReason {
    const TABLE: &'static [(Self, &'static str)] = &[
        (Self::Other, "other"),
        (Self::CoverOpen, "cover-open"),
        (Self::InputTrayMissing, "input-tray-missing"),
        (Self::MarkerSupplyEmpty, "marker-supply-empty"),
        (Self::MarkerSupplyLow, "marker-supply-low"),
        (Self::MarkerWasteAlmostFull, "marker-waste-almost-full"),
        (Self::MarkerWasteFull, "marker-waste-full"),
        (Self::MediaEmpty, "media-empty"),
        (Self::MediaJam, "media-jam"),
        (Self::MediaLow, "media-low"),
        (Self::MediaNeeded, "media-needed"),
        (Self::MovingToPaused, "moving-to-paused"),
        (Self::Paused, "paused"),
        (Self::SpoolAreaFull, "spool-area-full"),
        (Self::TonerEmpty, "toner-empty"),
        (Self::TonerLow, "toner-low"),
    ];
}

// ---------------------------------------------------------------------------
// Notification events
// ---------------------------------------------------------------------------

/// `notify-events` keywords (RFC 3995 SS5.3.3 plus the PWG 5100.18 additions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NotifyEvent {
    DocumentCompleted,
    DocumentConfigChanged,
    DocumentCreated,
    DocumentFetchable,
    DocumentStateChanged,
    DocumentStopped,
    JobCompleted,
    JobConfigChanged,
    JobCreated,
    JobFetchable,
    JobProgress,
    JobStateChanged,
    JobStopped,
    PrinterConfigChanged,
    PrinterFinishingsChanged,
    PrinterMediaChanged,
    PrinterQueueOrderChanged,
    PrinterRestarted,
    PrinterShutdown,
    PrinterStateChanged,
    PrinterStopped,
}

impl Keyword for NotifyEvent {
    const TABLE: &'static [(Self, &'static str)] = &[
        (Self::DocumentCompleted, "document-completed"),
        (Self::DocumentConfigChanged, "document-config-changed"),
        (Self::DocumentCreated, "document-created"),
        (Self::DocumentFetchable, "document-fetchable"),
        (Self::DocumentStateChanged, "document-state-changed"),
        (Self::DocumentStopped, "document-stopped"),
        (Self::JobCompleted, "job-completed"),
        (Self::JobConfigChanged, "job-config-changed"),
        (Self::JobCreated, "job-created"),
        (Self::JobFetchable, "job-fetchable"),
        (Self::JobProgress, "job-progress"),
        (Self::JobStateChanged, "job-state-changed"),
        (Self::JobStopped, "job-stopped"),
        (Self::PrinterConfigChanged, "printer-config-changed"),
        (Self::PrinterFinishingsChanged, "printer-finishings-changed"),
        (Self::PrinterMediaChanged, "printer-media-changed"),
        (Self::PrinterQueueOrderChanged, "printer-queue-order-changed"),
        (Self::PrinterRestarted, "printer-restarted"),
        (Self::PrinterShutdown, "printer-shutdown"),
        (Self::PrinterStateChanged, "printer-state-changed"),
        (Self::PrinterStopped, "printer-stopped"),
    ];
}

impl NotifyEvent {
    /// Subscribed when a subscription names no events.
    pub const DEFAULT: Self = Self::JobCompleted;

    pub fn is_printer_event(self) -> bool {
        self >= Self::PrinterConfigChanged
    }

    pub fn is_job_event(self) -> bool {
        (Self::JobCompleted..=Self::JobStopped).contains(&self)
    }
}

pub type JobReasons = KeywordSet<JobStateReason>;
pub type PrinterReasons = KeywordSet<PrinterStateReason>;
pub type EventMask = KeywordSet<NotifyEvent>;

impl EventMask {
    /// Shorthand for a mask holding a single event.
    pub fn only(event: NotifyEvent) -> Self {
        std::iter::once(event).collect()
    }

    pub fn has_printer_events(&self) -> bool {
        self.iter().any(NotifyEvent::is_printer_event)
    }
}

// ---------------------------------------------------------------------------
// Server lifecycle
// ---------------------------------------------------------------------------

/// Status of the IPP server task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    Stopped,
    Starting,
    Running,
    Error,
}
