// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job operations: creation (Print-Job, Print-URI, Create-Job), document
// submission (Send-Document, Send-URI), cancellation and the job queries.

use std::ops::RangeInclusive;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use infraprint_core::error::{InfraError, Result};
use infraprint_core::types::{JobState, JobStateReason};

use crate::codec::{
    IppAttribute, IppValue, STATUS_CLIENT_ERROR_ATTRIBUTES_OR_VALUES,
    STATUS_CLIENT_ERROR_BAD_REQUEST, STATUS_CLIENT_ERROR_DOCUMENT_ACCESS,
    STATUS_CLIENT_ERROR_NOT_FOUND, STATUS_CLIENT_ERROR_NOT_POSSIBLE,
    STATUS_CLIENT_ERROR_URI_SCHEME, STATUS_SERVER_ERROR_INTERNAL,
    STATUS_SERVER_ERROR_MULTIPLE_DOCUMENT_JOBS, STATUS_SERVER_ERROR_TOO_MANY_JOBS,
    TAG_OPERATION_ATTRIBUTES, VALUE_TAG_BOOLEAN, VALUE_TAG_URI,
};
use crate::dispatch::Client;
use crate::job::{Job, JobData};
use crate::requested::RequestedAttributes;
use crate::spool::spool_document;
use crate::validate::{self, detect_format, JobTemplate, OCTET_STREAM, SNIFF_LEN};

use super::subscriptions::create_subscriptions;

/// Attributes returned by the job creation operations.
const JOB_SUMMARY: &[&str] = &[
    "job-id",
    "job-state",
    "job-state-message",
    "job-state-reasons",
    "job-uri",
];

/// Default for Get-Jobs without `requested-attributes`.
const GET_JOBS_DEFAULT: &[&str] = &["job-id", "job-uri"];

// ---------------------------------------------------------------------------
// Shared steps
// ---------------------------------------------------------------------------

fn add_job_summary(client: &mut Client<'_>, job: &Job) {
    let ra = RequestedAttributes::only(JOB_SUMMARY.iter().copied());
    let group = job.describe(&ra, client.printer.start_time, Utc::now());
    client.add_group(group);
}

fn new_job(client: &mut Client<'_>, template: JobTemplate) -> Option<Arc<Job>> {
    let username = client.username();
    match client
        .printer
        .create_job(&template.name, &username, template.priority, template.attrs)
    {
        Ok(job) => Some(job),
        Err(e) => {
            client.respond(STATUS_SERVER_ERROR_TOO_MANY_JOBS, e.to_string());
            None
        }
    }
}

/// Spool `data` and release the job to the scheduler.  A spool failure
/// aborts the job and answers with an internal error.
fn accept_document(client: &mut Client<'_>, job: &Arc<Job>, format: &str, data: &[u8]) -> bool {
    job.data_mut().reasons.insert(JobStateReason::JobIncoming);
    match spool_document(&client.printer.spool_dir, job, format, data) {
        Ok(_) => {
            client.printer.document_received(job);
            true
        }
        Err(e) => {
            client.printer.abort_job(
                job,
                JobStateReason::AbortedBySystem,
                "Job aborted because the print file could not be written.",
            );
            client.respond(
                STATUS_SERVER_ERROR_INTERNAL,
                format!("Unable to write print file: {e}"),
            );
            false
        }
    }
}

/// Why a job cannot take a document right now.
fn upload_refusal(data: &JobData) -> Option<(u16, &'static str)> {
    if data.state > JobState::Held {
        Some((STATUS_CLIENT_ERROR_NOT_POSSIBLE, "Job is not in a pending state."))
    } else if data.filename.is_some() || data.is_incoming() {
        Some((
            STATUS_SERVER_ERROR_MULTIPLE_DOCUMENT_JOBS,
            "Multiple document jobs are not supported.",
        ))
    } else {
        None
    }
}

/// Mark the job incoming unless another upload got there first.
fn claim_upload(client: &mut Client<'_>, job: &Job) -> bool {
    let refusal = {
        let mut data = job.data_mut();
        let refusal = upload_refusal(&data);
        if refusal.is_none() {
            data.reasons.insert(JobStateReason::JobIncoming);
        }
        refusal
    };
    match refusal {
        Some((status, message)) => {
            client.respond(status, message);
            false
        }
        None => true,
    }
}

fn no_document_data(client: &mut Client<'_>) -> bool {
    if client.request.data.is_empty() {
        return true;
    }
    client.respond(
        STATUS_CLIENT_ERROR_BAD_REQUEST,
        "Unexpected document data following request.",
    );
    false
}

/// `last-document` must be a single `true`.
fn check_last_document(client: &mut Client<'_>) -> bool {
    let Some(attr) = client.operation_attr("last-document") else {
        client.respond(
            STATUS_CLIENT_ERROR_BAD_REQUEST,
            "Missing required last-document attribute.",
        );
        return false;
    };
    if !attr.is_single(VALUE_TAG_BOOLEAN) || attr.as_bool() != Some(true) {
        client.respond_unsupported(attr);
        return false;
    }
    true
}

// ---------------------------------------------------------------------------
// Document URIs
// ---------------------------------------------------------------------------

/// Validate `document-uri`; answers the request and returns `None` when it
/// cannot be used.
fn document_uri<'a>(client: &mut Client<'a>) -> Option<&'a str> {
    let Some(attr) = client.operation_attr("document-uri") else {
        client.respond(STATUS_CLIENT_ERROR_BAD_REQUEST, "Missing document-uri.");
        return None;
    };
    if attr.count() != 1 {
        client.respond(STATUS_CLIENT_ERROR_BAD_REQUEST, "Too many document-uri values.");
        return None;
    }
    let Some(uri) = attr.as_str().filter(|_| attr.value_tag() == VALUE_TAG_URI) else {
        client.respond_unsupported(attr);
        return None;
    };

    let scheme = uri
        .split_once(':')
        .map(|(scheme, _)| scheme.to_ascii_lowercase())
        .unwrap_or_default();
    match scheme.as_str() {
        "file" => {
            let readable = file_path(uri).is_some_and(|path| std::path::Path::new(path).is_file());
            if !readable {
                client.respond(
                    STATUS_CLIENT_ERROR_DOCUMENT_ACCESS,
                    format!("Unable to access URI: {uri}"),
                );
                return None;
            }
        }
        "http" | "https" => {}
        _ => {
            client.respond(
                STATUS_CLIENT_ERROR_URI_SCHEME,
                format!("URI scheme \"{scheme}\" not supported."),
            );
            return None;
        }
    }
    Some(uri)
}

/// Local path of a `file:` URI.
fn file_path(uri: &str) -> Option<&str> {
    uri.strip_prefix("file://")
        .or_else(|| uri.strip_prefix("file:"))
        .filter(|path| path.starts_with('/'))
}

/// Read a `file:` document or fetch an `http(s):` one.  Called from the
/// blocking dispatch pool, never from an async task.
fn load_document(uri: &str) -> Result<Vec<u8>> {
    if let Some(path) = file_path(uri) {
        return Ok(std::fs::read(path)?);
    }
    let handle = tokio::runtime::Handle::try_current()
        .map_err(|e| InfraError::DocumentFetch(format!("{uri}: {e}")))?;
    handle.block_on(fetch_http(uri))
}

async fn fetch_http(uri: &str) -> Result<Vec<u8>> {
    let fetch_error = |e: reqwest::Error| InfraError::DocumentFetch(format!("{uri}: {e}"));
    let response = reqwest::get(uri)
        .await
        .map_err(fetch_error)?
        .error_for_status()
        .map_err(fetch_error)?;
    let body = response.bytes().await.map_err(fetch_error)?;
    debug!(uri, bytes = body.len(), "document fetched");
    Ok(body.to_vec())
}

/// Fetch and spool a by-reference document.
fn accept_uri(client: &mut Client<'_>, job: &Arc<Job>, uri: &str, format: &str) -> bool {
    match load_document(uri) {
        Ok(data) => {
            let format = if format == OCTET_STREAM {
                detect_format(&data[..data.len().min(SNIFF_LEN)]).unwrap_or(format)
            } else {
                format
            };
            accept_document(client, job, format, &data)
        }
        Err(e) => {
            warn!(job_id = job.id, uri, error = %e, "document fetch failed");
            client.printer.abort_job(
                job,
                JobStateReason::DocumentAccessError,
                "Job aborted because the document could not be fetched.",
            );
            client.respond(
                STATUS_CLIENT_ERROR_DOCUMENT_ACCESS,
                format!("Unable to access URI: {e}"),
            );
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Job creation
// ---------------------------------------------------------------------------

pub fn print_job(client: &mut Client<'_>) {
    let Some(template) = validate::valid_job_attributes(client) else {
        return;
    };
    let request = client.request;
    if request.data.is_empty() {
        client.respond(STATUS_CLIENT_ERROR_BAD_REQUEST, "No file in request.");
        return;
    }
    let format = template.document.format.clone();
    let Some(job) = new_job(client, template) else {
        return;
    };
    if !accept_document(client, &job, &format, &request.data) {
        return;
    }
    client.ok();
    add_job_summary(client, &job);
    create_subscriptions(client, Some(&job));
}

pub fn print_uri(client: &mut Client<'_>) {
    let Some(template) = validate::valid_job_attributes(client) else {
        return;
    };
    if !no_document_data(client) {
        return;
    }
    let Some(uri) = document_uri(client) else {
        return;
    };
    let format = template.document.format.clone();
    let Some(job) = new_job(client, template) else {
        return;
    };
    if !accept_uri(client, &job, uri, &format) {
        return;
    }
    client.ok();
    add_job_summary(client, &job);
    create_subscriptions(client, Some(&job));
}

pub fn validate_job(client: &mut Client<'_>) {
    if validate::valid_job_attributes(client).is_some() {
        client.ok();
    }
}

pub fn create_job(client: &mut Client<'_>) {
    let Some(template) = validate::valid_job_attributes(client) else {
        return;
    };
    if !no_document_data(client) {
        return;
    }
    let Some(job) = new_job(client, template) else {
        return;
    };
    client.ok();
    add_job_summary(client, &job);
    create_subscriptions(client, Some(&job));
}

// ---------------------------------------------------------------------------
// Document submission
// ---------------------------------------------------------------------------

/// The checks shared by Send-Document and Send-URI, in response order.
fn document_target(client: &mut Client<'_>) -> Option<Arc<Job>> {
    let Some(job) = client.find_job() else {
        client.respond(STATUS_CLIENT_ERROR_NOT_FOUND, "Job does not exist.");
        return None;
    };
    if let Some((status, message)) = upload_refusal(&job.data()) {
        client.respond(status, message);
        return None;
    }
    if !check_last_document(client) {
        return None;
    }
    Some(job)
}

fn merge_document_extras(job: &Job, extras: Vec<IppAttribute>) {
    let mut data = job.data_mut();
    for attr in extras {
        data.attrs.set(attr);
    }
}

pub fn send_document(client: &mut Client<'_>) {
    let Some(job) = document_target(client) else {
        return;
    };
    let Some(document) = validate::valid_doc_attributes(client) else {
        return;
    };
    if !claim_upload(client, &job) {
        return;
    }
    merge_document_extras(&job, document.extras);
    let request = client.request;
    if !accept_document(client, &job, &document.format, &request.data) {
        return;
    }
    client.ok();
    add_job_summary(client, &job);
}

pub fn send_uri(client: &mut Client<'_>) {
    let Some(job) = document_target(client) else {
        return;
    };
    if !no_document_data(client) {
        return;
    }
    let Some(document) = validate::valid_doc_attributes(client) else {
        return;
    };
    let Some(uri) = document_uri(client) else {
        return;
    };
    if !claim_upload(client, &job) {
        return;
    }
    merge_document_extras(&job, document.extras);
    if !accept_uri(client, &job, uri, &document.format) {
        return;
    }
    client.ok();
    add_job_summary(client, &job);
}

// ---------------------------------------------------------------------------
// Cancel and close
// ---------------------------------------------------------------------------

pub fn cancel_job(client: &mut Client<'_>) {
    let Some(job) = client.find_job() else {
        client.respond(STATUS_CLIENT_ERROR_NOT_FOUND, "Job does not exist.");
        return;
    };
    match client.printer.cancel_job(&job) {
        Ok(_) => client.ok(),
        Err(e) => client.respond(STATUS_CLIENT_ERROR_NOT_POSSIBLE, e.to_string()),
    }
}

pub fn cancel_my_jobs(client: &mut Client<'_>) {
    let user = match &client.auth_user {
        Some(user) => user.clone(),
        None => match client.requesting_user_name() {
            Some(user) => user.to_string(),
            None => {
                client.respond(
                    STATUS_CLIENT_ERROR_BAD_REQUEST,
                    "Missing requesting-user-name attribute.",
                );
                return;
            }
        },
    };
    let owned = |job: &Arc<Job>| job.username.eq_ignore_ascii_case(&user);

    let jobs: Vec<Arc<Job>> = match client.operation_attr("job-ids") {
        Some(attr) => {
            let (listed, refused): (Vec<_>, Vec<_>) = attr
                .integers()
                .map(|id| (id, client.printer.job(id).filter(|job| owned(job))))
                .partition(|(_, job)| job.is_some());
            if !refused.is_empty() {
                let ids: Vec<IppValue> = refused.iter().map(|(id, _)| IppValue::Integer(*id)).collect();
                client.respond(
                    STATUS_CLIENT_ERROR_NOT_POSSIBLE,
                    "Job not found or not owned by the requesting user.",
                );
                client.unsupported(IppAttribute::with_values("job-ids", ids));
                return;
            }
            listed.into_iter().filter_map(|(_, job)| job).collect()
        }
        None => client.printer.jobs().into_iter().filter(|job| owned(job)).collect(),
    };

    let mut canceled = 0;
    for job in jobs.iter().filter(|job| !job.state().is_terminal()) {
        match client.printer.cancel_job(job) {
            Ok(_) => canceled += 1,
            Err(e) => debug!(job_id = job.id, error = %e, "job not canceled"),
        }
    }
    info!(user = %user, canceled, "Cancel-My-Jobs");
    client.ok();
}

pub fn close_job(client: &mut Client<'_>) {
    let Some(job) = client.find_job() else {
        client.respond(STATUS_CLIENT_ERROR_NOT_FOUND, "Job does not exist.");
        return;
    };
    match job.check_closable() {
        Ok(()) => client.ok(),
        Err(e) => client.respond(STATUS_CLIENT_ERROR_NOT_POSSIBLE, e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

pub fn get_job_attributes(client: &mut Client<'_>) {
    let Some(job) = client.find_job() else {
        client.respond(STATUS_CLIENT_ERROR_NOT_FOUND, "Job not found.");
        return;
    };
    let ra = RequestedAttributes::from_request(client.request);
    client.ok();
    let group = job.describe(&ra, client.printer.start_time, Utc::now());
    client.add_group(group);
}

/// Job states selected by a `which-jobs` keyword.
fn which_jobs_states(which: &str) -> Option<RangeInclusive<JobState>> {
    use JobState::*;
    Some(match which {
        "all" => Pending..=Completed,
        "not-completed" => Pending..=Stopped,
        "completed" => Canceled..=Completed,
        "aborted" => Aborted..=Aborted,
        "canceled" => Canceled..=Canceled,
        "pending" => Pending..=Pending,
        "pending-held" => Held..=Held,
        "processing" => Processing..=Processing,
        "processing-stopped" => Stopped..=Stopped,
        _ => return None,
    })
}

pub fn get_jobs(client: &mut Client<'_>) {
    let which = client
        .operation_attr("which-jobs")
        .and_then(IppAttribute::as_str)
        .unwrap_or("not-completed");
    let Some(states) = which_jobs_states(which) else {
        client.respond(
            STATUS_CLIENT_ERROR_ATTRIBUTES_OR_VALUES,
            format!("The which-jobs value \"{which}\" is not supported."),
        );
        client.unsupported(IppAttribute::new("which-jobs", IppValue::keyword(which)));
        return;
    };

    let limit = client
        .operation_attr("limit")
        .and_then(IppAttribute::as_integer)
        .and_then(|n| usize::try_from(n).ok())
        .filter(|n| *n > 0);
    let first_job_id = client
        .operation_attr("first-job-id")
        .and_then(IppAttribute::as_integer)
        .unwrap_or(1);
    let my_jobs = client
        .operation_attr("my-jobs")
        .and_then(IppAttribute::as_bool)
        .unwrap_or(false);
    let user = if my_jobs {
        match client.auth_user.clone().or_else(|| client.requesting_user_name().map(str::to_string)) {
            Some(user) => Some(user),
            None => {
                client.respond(
                    STATUS_CLIENT_ERROR_BAD_REQUEST,
                    "Need requesting-user-name with my-jobs.",
                );
                return;
            }
        }
    } else {
        None
    };

    let request = client.request;
    let ra = if request.find_in(TAG_OPERATION_ATTRIBUTES, "requested-attributes").is_some() {
        RequestedAttributes::from_request(request)
    } else {
        RequestedAttributes::only(GET_JOBS_DEFAULT.iter().copied())
    };

    client.ok();
    let now = Utc::now();
    let matching = client
        .printer
        .jobs()
        .into_iter()
        .filter(|job| job.id >= first_job_id)
        .filter(|job| states.contains(&job.state()))
        .filter(|job| user.as_ref().is_none_or(|u| job.username.eq_ignore_ascii_case(u)))
        .take(limit.unwrap_or(usize::MAX));
    for job in matching {
        let group = job.describe(&ra, client.printer.start_time, now);
        client.add_group(group);
    }
}
