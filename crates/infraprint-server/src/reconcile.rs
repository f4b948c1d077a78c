// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Update-Active-Jobs reconciliation between the server and one output device.
//
// The device lists the jobs it believes are active together with their
// device-side state.  The server answers with:
//
//   - corrections: jobs whose server state wins, either because the job is
//     already STOPPED or later and the device disagrees, or because the
//     device did not mention a job bound to it;
//   - unsupported ids: listed ids that are unknown or bound elsewhere.
//
// Both lists are capped at `MAX_RECONCILE_ENTRIES`; anything beyond is
// dropped.

use tracing::{debug, instrument};

use infraprint_core::types::JobState;

use crate::job::Ownership;
use crate::printer::Printer;

/// Entries kept per output list.
pub const MAX_RECONCILE_ENTRIES: usize = 1000;

/// Server answer to one Update-Active-Jobs request.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// `(job-id, server job-state)` pairs the device must adopt.
    pub corrections: Vec<(i32, JobState)>,
    pub unsupported: Vec<i32>,
}

impl Reconciliation {
    fn correct(&mut self, id: i32, state: JobState) {
        if self.corrections.len() < MAX_RECONCILE_ENTRIES {
            self.corrections.push((id, state));
        }
    }

    fn refuse(&mut self, id: i32) {
        if self.unsupported.len() < MAX_RECONCILE_ENTRIES {
            self.unsupported.push(id);
        }
    }
}

/// Reconcile `reports` (`(job-id, output-device-job-state)` pairs) from the
/// device `device_uuid`.  Running it twice with the same input yields the
/// same answer.
#[instrument(skip(printer, reports), fields(device = %device_uuid, reported = reports.len()))]
pub fn reconcile(printer: &Printer, device_uuid: &str, reports: &[(i32, i32)]) -> Reconciliation {
    let mut result = Reconciliation::default();

    for &(id, reported) in reports {
        let Some(job) = printer.job(id) else {
            result.refuse(id);
            continue;
        };
        let mut data = job.data_mut();
        if data.ownership(device_uuid) != Ownership::Owned {
            drop(data);
            result.refuse(id);
            continue;
        }
        let Some(reported) = JobState::from_i32(reported) else {
            drop(data);
            result.refuse(id);
            continue;
        };
        if data.state >= JobState::Stopped && reported != data.state {
            result.correct(id, data.state);
        } else {
            data.dev_state = Some(reported);
        }
    }

    let mut bound: Vec<_> = printer
        .jobs()
        .into_iter()
        .filter(|job| job.data().ownership(device_uuid) == Ownership::Owned)
        .filter(|job| !reports.iter().any(|&(id, _)| id == job.id))
        .collect();
    bound.sort_by_key(|job| job.id);
    for job in bound {
        result.correct(job.id, job.state());
    }

    debug!(
        corrections = result.corrections.len(),
        unsupported = result.unsupported.len(),
        "active jobs reconciled"
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{IppAttributeGroup, TAG_JOB_ATTRIBUTES};
    use infraprint_core::config::ServerConfig;
    use std::sync::Arc;

    use crate::job::Job;

    fn bound_job(printer: &Printer, device: &str, state: JobState) -> Arc<Job> {
        let job = printer
            .create_job("doc", "alice", None, IppAttributeGroup::new(TAG_JOB_ATTRIBUTES))
            .expect("create job");
        {
            let mut data = job.data_mut();
            data.state = state;
            data.bind_device(device);
        }
        job
    }

    fn printer() -> Printer {
        Printer::new(&ServerConfig::default())
    }

    // -- Unsupported ids ----------------------------------------------------

    #[test]
    fn unknown_and_foreign_jobs_are_unsupported() {
        let printer = printer();
        let theirs = bound_job(&printer, "urn:uuid:y", JobState::Stopped);
        let unbound = printer
            .create_job("doc", "bob", None, IppAttributeGroup::new(TAG_JOB_ATTRIBUTES))
            .expect("create job");

        let result = reconcile(
            &printer,
            "urn:uuid:x",
            &[(99, 5), (theirs.id, 5), (unbound.id, 5)],
        );
        assert_eq!(result.unsupported, vec![99, theirs.id, unbound.id]);
        assert!(result.corrections.is_empty());
    }

    #[test]
    fn invalid_state_value_is_unsupported() {
        let printer = printer();
        let job = bound_job(&printer, "urn:uuid:x", JobState::Stopped);
        let result = reconcile(&printer, "urn:uuid:x", &[(job.id, 42)]);
        assert_eq!(result.unsupported, vec![job.id]);
    }

    // -- Corrections --------------------------------------------------------

    #[test]
    fn server_wins_once_stopped() {
        let printer = printer();
        let job = bound_job(&printer, "urn:uuid:x", JobState::Canceled);
        let result = reconcile(&printer, "urn:uuid:x", &[(job.id, JobState::Processing.as_i32())]);
        assert_eq!(result.corrections, vec![(job.id, JobState::Canceled)]);
        assert_eq!(job.data().dev_state, None);
    }

    #[test]
    fn agreeing_or_early_jobs_adopt_device_state() {
        let printer = printer();
        let job = bound_job(&printer, "urn:uuid:x", JobState::Stopped);
        let result = reconcile(&printer, "urn:uuid:x", &[(job.id, JobState::Stopped.as_i32())]);
        assert_eq!(result, Reconciliation::default());
        assert_eq!(job.data().dev_state, Some(JobState::Stopped));
    }

    #[test]
    fn silence_is_a_discrepancy() {
        let printer = printer();
        let listed = bound_job(&printer, "urn:uuid:x", JobState::Stopped);
        let forgotten = bound_job(&printer, "urn:uuid:x", JobState::Stopped);
        let other = bound_job(&printer, "urn:uuid:y", JobState::Stopped);

        let result = reconcile(&printer, "urn:uuid:x", &[(listed.id, JobState::Stopped.as_i32())]);
        assert_eq!(result.corrections, vec![(forgotten.id, JobState::Stopped)]);
        assert!(!result.corrections.iter().any(|(id, _)| *id == other.id));
    }

    #[test]
    fn reconciliation_is_idempotent() {
        let printer = printer();
        let a = bound_job(&printer, "urn:uuid:x", JobState::Aborted);
        let b = bound_job(&printer, "urn:uuid:x", JobState::Stopped);
        bound_job(&printer, "urn:uuid:x", JobState::Completed);
        let reports = [(a.id, JobState::Processing.as_i32()), (b.id, JobState::Processing.as_i32()), (500, 5)];

        let first = reconcile(&printer, "urn:uuid:x", &reports);
        let states: Vec<_> = printer.jobs().iter().map(|j| (j.state(), j.data().dev_state)).collect();
        let second = reconcile(&printer, "urn:uuid:x", &reports);
        let states_again: Vec<_> = printer.jobs().iter().map(|j| (j.state(), j.data().dev_state)).collect();

        assert_eq!(first, second);
        assert_eq!(states, states_again);
        assert_eq!(first.corrections.len(), 3);
        assert_eq!(first.unsupported, vec![500]);
    }

    #[test]
    fn output_lists_are_capped() {
        let printer = printer();
        let reports: Vec<(i32, i32)> = (1..=1500).map(|id| (10_000 + id, 5)).collect();
        let result = reconcile(&printer, "urn:uuid:x", &reports);
        assert_eq!(result.unsupported.len(), MAX_RECONCILE_ENTRIES);
        assert_eq!(result.unsupported[0], 10_001);
    }
}
