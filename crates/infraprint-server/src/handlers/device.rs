// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Output device operations (PWG 5100.18).  A proxy fetches and acknowledges
// jobs, streams document data, reports job and device status and reconciles
// its active job list.  Authentication is checked by the dispatcher.

use std::sync::Arc;

use tracing::{info, warn};

use infraprint_core::types::{EventMask, JobReasons, JobState, JobStateReason, NotifyEvent};

use crate::codec::{
    IppAttribute, IppAttributeGroup, IppValue, STATUS_CLIENT_ERROR_BAD_REQUEST,
    STATUS_CLIENT_ERROR_NOT_AUTHORIZED, STATUS_CLIENT_ERROR_NOT_FETCHABLE,
    STATUS_CLIENT_ERROR_NOT_FOUND, STATUS_CLIENT_ERROR_NOT_POSSIBLE,
    STATUS_SERVER_ERROR_INTERNAL, TAG_JOB_ATTRIBUTES, TAG_OPERATION_ATTRIBUTES,
    TAG_PRINTER_ATTRIBUTES, VALUE_TAG_ENUM, VALUE_TAG_INTEGER, VALUE_TAG_KEYWORD,
    VALUE_TAG_MIME_TYPE,
};
use crate::device::Device;
use crate::dispatch::Client;
use crate::job::{Job, Ownership};
use crate::reconcile::reconcile;
use crate::requested::RequestedAttributes;
use crate::spool::read_document;

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

fn find_device(client: &mut Client<'_>) -> Option<Arc<Device>> {
    let device = client.find_device();
    if device.is_none() {
        client.respond(STATUS_CLIENT_ERROR_NOT_FOUND, "Device was not found.");
    }
    device
}

fn device_and_job(client: &mut Client<'_>) -> Option<(Arc<Device>, Arc<Job>)> {
    let device = find_device(client)?;
    let Some(job) = client.find_job() else {
        client.respond(STATUS_CLIENT_ERROR_NOT_FOUND, "Job was not found.");
        return None;
    };
    Some((device, job))
}

/// The device and a job bound to it.
fn owned_job(client: &mut Client<'_>) -> Option<(Arc<Device>, Arc<Job>)> {
    let (device, job) = device_and_job(client)?;
    if job.data().ownership(&device.uuid) != Ownership::Owned {
        client.respond(STATUS_CLIENT_ERROR_NOT_POSSIBLE, "Job not assigned to device.");
        return None;
    }
    Some((device, job))
}

/// Jobs carry one document, so `document-number` must be 1.
fn check_document_number(client: &mut Client<'_>) -> bool {
    let Some(attr) = client.operation_attr("document-number") else {
        client.respond(STATUS_CLIENT_ERROR_BAD_REQUEST, "Missing document-number attribute.");
        return false;
    };
    if !attr.is_single(VALUE_TAG_INTEGER) || attr.as_integer() != Some(1) {
        client.respond(STATUS_CLIENT_ERROR_BAD_REQUEST, "Bad document-number attribute.");
        return false;
    }
    true
}

/// A status attribute from anywhere in the request, if it has the right syntax.
fn status_attr<'a>(client: &Client<'a>, name: &str, tag: u8) -> Option<&'a IppAttribute> {
    let request = client.request;
    request
        .find(name)
        .map(|(_, attr)| attr)
        .filter(|attr| attr.all_tagged(tag))
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

pub fn fetch_job(client: &mut Client<'_>) {
    let Some((device, job)) = device_and_job(client) else {
        return;
    };
    let refusal = {
        let data = job.data();
        if data.ownership(&device.uuid) == Ownership::Foreign {
            Some((STATUS_CLIENT_ERROR_NOT_POSSIBLE, "Job not assigned to device."))
        } else if !data.is_fetchable() {
            Some((STATUS_CLIENT_ERROR_NOT_FETCHABLE, "Job not fetchable."))
        } else {
            None
        }
    };
    if let Some((status, message)) = refusal {
        client.respond(status, message);
        return;
    }

    client.ok();
    let mut group = IppAttributeGroup::new(TAG_JOB_ATTRIBUTES);
    group.attributes = job.data().attrs.attributes.clone();
    client.add_group(group);
}

pub fn acknowledge_job(client: &mut Client<'_>) {
    let Some((device, job)) = device_and_job(client) else {
        return;
    };
    let refusal = {
        let mut data = job.data_mut();
        match data.ownership(&device.uuid) {
            Ownership::Foreign => Some((STATUS_CLIENT_ERROR_NOT_AUTHORIZED, "Job not assigned to device.")),
            _ if !data.is_fetchable() => Some((STATUS_CLIENT_ERROR_NOT_FETCHABLE, "Job not fetchable.")),
            _ => {
                data.bind_device(&device.uuid);
                data.reasons.remove(JobStateReason::JobFetchable);
                None
            }
        }
    };
    if let Some((status, message)) = refusal {
        client.respond(status, message);
        return;
    }

    info!(job_id = job.id, device = %device.uuid, "job acknowledged");
    client
        .printer
        .add_event(Some(&job), EventMask::only(NotifyEvent::JobStateChanged), "Job acknowledged.");
    client.ok();
}

pub fn update_job_status(client: &mut Client<'_>) {
    let Some((device, job)) = owned_job(client) else {
        return;
    };
    let impressions = status_attr(client, "job-impressions-completed", VALUE_TAG_INTEGER)
        .and_then(IppAttribute::as_integer);
    let reported_state = status_attr(client, "output-device-job-state", VALUE_TAG_ENUM)
        .and_then(IppAttribute::as_integer)
        .and_then(JobState::from_i32);
    let reported_reasons = status_attr(client, "output-device-job-state-reasons", VALUE_TAG_KEYWORD)
        .map(|attr| JobReasons::from_keywords(attr.strings()));
    let message = client
        .request
        .find("output-device-job-state-message")
        .and_then(|(_, attr)| attr.as_str())
        .map(str::to_string);

    let mut events = EventMask::new();
    {
        let mut data = job.data_mut();
        if let Some(count) = impressions {
            data.impressions_completed = count;
            events.insert(NotifyEvent::JobProgress);
        }
        if let Some(state) = reported_state {
            data.dev_state = Some(state);
            events.insert(NotifyEvent::JobStateChanged);
        }
        if let Some(reasons) = reported_reasons {
            data.dev_reasons = reasons;
            events.insert(NotifyEvent::JobStateChanged);
        }
        if let Some(message) = message {
            data.dev_state_message = Some(message);
            events.insert(NotifyEvent::JobStateChanged);
        }
    }

    if !events.is_empty() {
        client.printer.add_event(Some(&job), events, "Job updated by output device.");
    }
    if let Some(state) = reported_state {
        if client.printer.finish_job(&job, state) {
            info!(job_id = job.id, device = %device.uuid, state = %state, "job finished at device");
        }
    }
    client.ok();
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

pub fn fetch_document(client: &mut Client<'_>) {
    let Some((_, job)) = owned_job(client) else {
        return;
    };
    if !check_document_number(client) {
        return;
    }
    let Some(format) = job.data().format.clone() else {
        client.respond(STATUS_CLIENT_ERROR_NOT_FETCHABLE, "Document format unknown.");
        return;
    };
    if let Some(accepted) = status_attr(client, "document-format-accepted", VALUE_TAG_MIME_TYPE) {
        if !accepted.strings().any(|f| f.eq_ignore_ascii_case(&format)) {
            client.respond(
                STATUS_CLIENT_ERROR_NOT_FETCHABLE,
                "Document not available in requested format.",
            );
            return;
        }
    }

    let data = match read_document(&job) {
        Ok(data) => data,
        Err(e) => {
            warn!(job_id = job.id, error = %e, "spool file unreadable");
            client.respond(
                STATUS_SERVER_ERROR_INTERNAL,
                format!("Unable to read print file: {e}"),
            );
            return;
        }
    };

    client.ok();
    client
        .operation_group()
        .keyword("compression", "none")
        .mime_type("document-format", &format);
    client.response.data = data;
}

pub fn acknowledge_document(client: &mut Client<'_>) {
    if owned_job(client).is_none() || !check_document_number(client) {
        return;
    }
    client.ok();
}

pub fn update_document_status(client: &mut Client<'_>) {
    let Some((_, job)) = owned_job(client) else {
        return;
    };
    let impressions = status_attr(client, "impressions-completed", VALUE_TAG_INTEGER)
        .and_then(IppAttribute::as_integer);
    if let Some(count) = impressions {
        job.data_mut().impressions_completed = count;
        client
            .printer
            .add_event(Some(&job), EventMask::only(NotifyEvent::JobProgress), "Job printing.");
    }
    client.ok();
}

// ---------------------------------------------------------------------------
// Active jobs
// ---------------------------------------------------------------------------

pub fn update_active_jobs(client: &mut Client<'_>) {
    let Some(device) = find_device(client) else {
        return;
    };
    let Some(ids) = client.operation_attr("job-ids") else {
        client.respond(STATUS_CLIENT_ERROR_BAD_REQUEST, "Missing required job-ids attribute.");
        return;
    };
    if !ids.all_tagged(VALUE_TAG_INTEGER) {
        client.respond(STATUS_CLIENT_ERROR_BAD_REQUEST, "Bad job-ids attribute.");
        return;
    }
    let Some(states) = client.operation_attr("output-device-job-states") else {
        client.respond(
            STATUS_CLIENT_ERROR_BAD_REQUEST,
            "Missing required output-device-job-states attribute.",
        );
        return;
    };
    if !states.all_tagged(VALUE_TAG_ENUM) {
        client.respond(
            STATUS_CLIENT_ERROR_BAD_REQUEST,
            "Bad output-device-job-states attribute.",
        );
        return;
    }
    if ids.count() != states.count() {
        client.respond(
            STATUS_CLIENT_ERROR_BAD_REQUEST,
            "The job-ids and output-device-job-states attributes do not have the same number of values.",
        );
        return;
    }

    let reports: Vec<(i32, i32)> = ids.integers().zip(states.integers()).collect();
    let result = reconcile(client.printer, &device.uuid, &reports);

    client.ok();
    if !result.corrections.is_empty() {
        let ids: Vec<i32> = result.corrections.iter().map(|(id, _)| *id).collect();
        let states: Vec<i32> = result.corrections.iter().map(|(_, s)| s.as_i32()).collect();
        client
            .operation_group()
            .integers("job-ids", &ids)
            .enums("output-device-job-states", &states);
    }
    if !result.unsupported.is_empty() {
        let ids: Vec<IppValue> = result.unsupported.iter().map(|id| IppValue::Integer(*id)).collect();
        client.unsupported(IppAttribute::with_values("job-ids", ids));
    }
}

// ---------------------------------------------------------------------------
// Device attributes
// ---------------------------------------------------------------------------

pub fn update_output_device_attributes(client: &mut Client<'_>) {
    let Some(uuid) = client.device_uuid() else {
        client.respond(
            STATUS_CLIENT_ERROR_BAD_REQUEST,
            "Missing output-device-uuid attribute.",
        );
        return;
    };
    let request = client.request;
    let attrs: Vec<IppAttribute> = request
        .groups_with(TAG_PRINTER_ATTRIBUTES)
        .flat_map(|group| group.attributes.iter().cloned())
        .collect();

    let update = client.printer.update_device(uuid, &attrs);
    client.ok();
    for attr in &update.unsupported {
        client.respond_unsupported(attr);
    }
}

pub fn get_output_device_attributes(client: &mut Client<'_>) {
    let Some(device) = find_device(client) else {
        return;
    };
    let ra = RequestedAttributes::from_request(client.request);
    let mut group = IppAttributeGroup::new(TAG_PRINTER_ATTRIBUTES);
    ra.copy_into(&device.attributes(), &mut group);
    client.ok();
    client.add_group(group);
}

pub fn deregister_output_device(client: &mut Client<'_>) {
    let removed = client
        .device_uuid()
        .is_some_and(|uuid| client.printer.deregister_device(uuid));
    if removed {
        client.ok();
    } else {
        client.respond(STATUS_CLIENT_ERROR_NOT_FOUND, "Output device not found.");
    }
}

pub fn acknowledge_identify_printer(client: &mut Client<'_>) {
    if find_device(client).is_none() {
        return;
    }
    client.ok();
    if let Some(request) = client.printer.take_identify() {
        let group = client.operation_group();
        group.keywords("identify-actions", &request.actions);
        if let Some(message) = &request.message {
            group.text("message", message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{
        IppMessage, OP_ACKNOWLEDGE_DOCUMENT, OP_ACKNOWLEDGE_IDENTIFY_PRINTER, OP_ACKNOWLEDGE_JOB,
        OP_DEREGISTER_OUTPUT_DEVICE, OP_FETCH_DOCUMENT, OP_FETCH_JOB,
        OP_GET_OUTPUT_DEVICE_ATTRIBUTES, OP_GET_PRINTER_ATTRIBUTES, OP_IDENTIFY_PRINTER,
        OP_UPDATE_ACTIVE_JOBS, OP_UPDATE_DOCUMENT_STATUS, OP_UPDATE_JOB_STATUS,
        OP_UPDATE_OUTPUT_DEVICE_ATTRIBUTES, STATUS_CLIENT_ERROR_ATTRIBUTES_OR_VALUES, STATUS_OK,
        TAG_UNSUPPORTED_ATTRIBUTES,
    };
    use crate::dispatch::testing::*;
    use crate::printer::Printer;
    use infraprint_core::types::PrinterState;

    const DEVICE_X: &str = "urn:uuid:0d4b7f6e-1111-4a1e-9d0a-00000000000a";
    const DEVICE_Y: &str = "urn:uuid:0d4b7f6e-2222-4a1e-9d0a-00000000000b";

    fn register(printer: &Arc<Printer>, uuid: &str) {
        let mut req = device_request(OP_UPDATE_OUTPUT_DEVICE_ATTRIBUTES, uuid);
        req.begin_group(TAG_PRINTER_ATTRIBUTES);
        req.group_mut(TAG_PRINTER_ATTRIBUTES)
            .enum_attr("printer-state", PrinterState::Idle.as_i32());
        let response = send_as_proxy(printer, &req);
        assert_eq!(response.status_code(), STATUS_OK);
    }

    fn job_op(op: u16, uuid: &str, job_id: i32) -> IppMessage {
        let mut req = device_request(op, uuid);
        req.group_mut(TAG_OPERATION_ATTRIBUTES).integer("job-id", job_id);
        req
    }

    fn document_op(op: u16, uuid: &str, job_id: i32) -> IppMessage {
        let mut req = job_op(op, uuid, job_id);
        req.group_mut(TAG_OPERATION_ATTRIBUTES).integer("document-number", 1);
        req
    }

    /// A fetchable job acknowledged by `uuid`.
    fn bound_job(printer: &Arc<Printer>, uuid: &str) -> Arc<Job> {
        let job = fetchable_job(printer, "alice");
        let response = send_as_proxy(printer, &job_op(OP_ACKNOWLEDGE_JOB, uuid, job.id));
        assert_eq!(response.status_code(), STATUS_OK, "{:?}", status_message(&response));
        job
    }

    fn printer_state(printer: &Arc<Printer>) -> i32 {
        let response = send(printer, &request(OP_GET_PRINTER_ATTRIBUTES));
        response
            .find_in(TAG_PRINTER_ATTRIBUTES, "printer-state")
            .and_then(IppAttribute::as_integer)
            .expect("printer-state")
    }

    // -- Device registration ----------------------------------------------------

    #[test]
    fn device_attributes_drive_the_printer_state() {
        let fixture = fixture();
        register(&fixture.printer, DEVICE_X);
        assert_eq!(printer_state(&fixture.printer), PrinterState::Idle.as_i32());

        let mut req = device_request(OP_UPDATE_OUTPUT_DEVICE_ATTRIBUTES, DEVICE_X);
        req.begin_group(TAG_PRINTER_ATTRIBUTES);
        req.group_mut(TAG_PRINTER_ATTRIBUTES)
            .enum_attr("printer-state", PrinterState::Stopped.as_i32())
            .keywords("printer-state-reasons", &["media-empty"]);
        assert_eq!(send_as_proxy(&fixture.printer, &req).status_code(), STATUS_OK);
        assert_eq!(printer_state(&fixture.printer), PrinterState::Stopped.as_i32());

        let response = send_as_proxy(
            &fixture.printer,
            &device_request(OP_DEREGISTER_OUTPUT_DEVICE, DEVICE_X),
        );
        assert_eq!(response.status_code(), STATUS_OK);
        assert_eq!(printer_state(&fixture.printer), PrinterState::Idle.as_i32());
    }

    #[test]
    fn sparse_updates_are_refused_but_the_rest_applies() {
        let fixture = fixture();
        let mut req = device_request(OP_UPDATE_OUTPUT_DEVICE_ATTRIBUTES, DEVICE_X);
        req.begin_group(TAG_PRINTER_ATTRIBUTES);
        req.group_mut(TAG_PRINTER_ATTRIBUTES)
            .keywords("media-ready.1", &["iso_a4_210x297mm"])
            .keywords("sides-supported", &["one-sided", "two-sided-long-edge"]);
        let response = send_as_proxy(&fixture.printer, &req);

        assert_eq!(response.status_code(), STATUS_CLIENT_ERROR_ATTRIBUTES_OR_VALUES);
        let unsupported = response.group(TAG_UNSUPPORTED_ATTRIBUTES).expect("unsupported");
        assert!(unsupported.get("media-ready.1").is_some());
        assert_eq!(
            fixture.printer.supported("sides-supported").map(|a| a.count()),
            Some(2)
        );
    }

    #[test]
    fn output_device_attributes_are_returned() {
        let fixture = fixture();
        register(&fixture.printer, DEVICE_X);
        let response = send_as_proxy(
            &fixture.printer,
            &device_request(OP_GET_OUTPUT_DEVICE_ATTRIBUTES, DEVICE_X),
        );
        assert_eq!(response.status_code(), STATUS_OK);
        let group = response.group(TAG_PRINTER_ATTRIBUTES).expect("printer group");
        assert!(group.get("printer-state").is_some());

        let response = send_as_proxy(
            &fixture.printer,
            &device_request(OP_GET_OUTPUT_DEVICE_ATTRIBUTES, DEVICE_Y),
        );
        assert_eq!(response.status_code(), STATUS_CLIENT_ERROR_NOT_FOUND);
        assert_eq!(status_message(&response), Some("Device was not found."));
    }

    #[test]
    fn deregistering_an_unknown_device() {
        let fixture = fixture();
        let response = send_as_proxy(
            &fixture.printer,
            &device_request(OP_DEREGISTER_OUTPUT_DEVICE, DEVICE_Y),
        );
        assert_eq!(response.status_code(), STATUS_CLIENT_ERROR_NOT_FOUND);
        assert_eq!(status_message(&response), Some("Output device not found."));
    }

    // -- Fetch and acknowledge ----------------------------------------------------

    #[test]
    fn fetch_acknowledge_and_download() {
        let fixture = fixture();
        register(&fixture.printer, DEVICE_X);
        let job = fetchable_job(&fixture.printer, "alice");

        let response = send_as_proxy(&fixture.printer, &job_op(OP_FETCH_JOB, DEVICE_X, job.id));
        assert_eq!(response.status_code(), STATUS_OK);
        let attrs = response.group(TAG_JOB_ATTRIBUTES).expect("job group");
        assert_eq!(attrs.get_integer("job-id"), Some(job.id));

        let response = send_as_proxy(&fixture.printer, &job_op(OP_ACKNOWLEDGE_JOB, DEVICE_X, job.id));
        assert_eq!(response.status_code(), STATUS_OK);
        assert_eq!(job.data().dev_uuid.as_deref(), Some(DEVICE_X));
        assert!(!job.data().is_fetchable());

        let response = send_as_proxy(
            &fixture.printer,
            &document_op(OP_FETCH_DOCUMENT, DEVICE_X, job.id),
        );
        assert_eq!(response.status_code(), STATUS_OK, "{:?}", status_message(&response));
        assert_eq!(response.data, PDF);
        assert_eq!(
            response
                .find_in(TAG_OPERATION_ATTRIBUTES, "document-format")
                .and_then(IppAttribute::as_str),
            Some("application/pdf")
        );

        let response = send_as_proxy(
            &fixture.printer,
            &document_op(OP_ACKNOWLEDGE_DOCUMENT, DEVICE_X, job.id),
        );
        assert_eq!(response.status_code(), STATUS_OK);
    }

    #[test]
    fn foreign_device_cannot_fetch_a_bound_job() {
        let fixture = fixture();
        register(&fixture.printer, DEVICE_X);
        register(&fixture.printer, DEVICE_Y);
        let job = bound_job(&fixture.printer, DEVICE_X);
        let before = job.state();

        let response = send_as_proxy(&fixture.printer, &job_op(OP_FETCH_JOB, DEVICE_Y, job.id));
        assert_eq!(response.status_code(), STATUS_CLIENT_ERROR_NOT_POSSIBLE);
        assert_eq!(job.state(), before);

        let response = send_as_proxy(&fixture.printer, &job_op(OP_ACKNOWLEDGE_JOB, DEVICE_Y, job.id));
        assert_eq!(response.status_code(), STATUS_CLIENT_ERROR_NOT_AUTHORIZED);

        let response = send_as_proxy(
            &fixture.printer,
            &document_op(OP_FETCH_DOCUMENT, DEVICE_Y, job.id),
        );
        assert_eq!(response.status_code(), STATUS_CLIENT_ERROR_NOT_POSSIBLE);
        assert!(response.data.is_empty());
        assert_eq!(job.data().dev_uuid.as_deref(), Some(DEVICE_X));
    }

    #[test]
    fn acknowledged_job_is_no_longer_fetchable() {
        let fixture = fixture();
        register(&fixture.printer, DEVICE_X);
        let job = bound_job(&fixture.printer, DEVICE_X);
        let response = send_as_proxy(&fixture.printer, &job_op(OP_ACKNOWLEDGE_JOB, DEVICE_X, job.id));
        assert_eq!(response.status_code(), STATUS_CLIENT_ERROR_NOT_FETCHABLE);
        assert_eq!(status_message(&response), Some("Job not fetchable."));
    }

    #[test]
    fn fetch_document_honors_accepted_formats() {
        let fixture = fixture();
        register(&fixture.printer, DEVICE_X);
        let job = bound_job(&fixture.printer, DEVICE_X);

        let mut req = document_op(OP_FETCH_DOCUMENT, DEVICE_X, job.id);
        req.group_mut(TAG_OPERATION_ATTRIBUTES)
            .mime_type("document-format-accepted", "image/pwg-raster");
        let response = send_as_proxy(&fixture.printer, &req);
        assert_eq!(response.status_code(), STATUS_CLIENT_ERROR_NOT_FETCHABLE);

        let mut req = job_op(OP_FETCH_DOCUMENT, DEVICE_X, job.id);
        req.group_mut(TAG_OPERATION_ATTRIBUTES).integer("document-number", 2);
        let response = send_as_proxy(&fixture.printer, &req);
        assert_eq!(response.status_code(), STATUS_CLIENT_ERROR_BAD_REQUEST);
    }

    #[test]
    fn unknown_job_or_device() {
        let fixture = fixture();
        let response = send_as_proxy(&fixture.printer, &job_op(OP_FETCH_JOB, DEVICE_X, 1));
        assert_eq!(status_message(&response), Some("Device was not found."));

        register(&fixture.printer, DEVICE_X);
        let response = send_as_proxy(&fixture.printer, &job_op(OP_FETCH_JOB, DEVICE_X, 9));
        assert_eq!(response.status_code(), STATUS_CLIENT_ERROR_NOT_FOUND);
        assert_eq!(status_message(&response), Some("Job was not found."));
    }

    // -- Status -------------------------------------------------------------------

    #[test]
    fn job_status_from_the_device() {
        let fixture = fixture();
        register(&fixture.printer, DEVICE_X);
        let job = bound_job(&fixture.printer, DEVICE_X);

        let mut req = job_op(OP_UPDATE_JOB_STATUS, DEVICE_X, job.id);
        req.begin_group(TAG_JOB_ATTRIBUTES);
        req.group_mut(TAG_JOB_ATTRIBUTES)
            .integer("job-impressions-completed", 3)
            .enum_attr("output-device-job-state", JobState::Processing.as_i32())
            .keywords("output-device-job-state-reasons", &["job-printing"]);
        let response = send_as_proxy(&fixture.printer, &req);
        assert_eq!(response.status_code(), STATUS_OK);
        {
            let data = job.data();
            assert_eq!(data.impressions_completed, 3);
            assert_eq!(data.dev_state, Some(JobState::Processing));
            assert!(data.combined_reasons().contains(JobStateReason::JobPrinting));
            assert_eq!(data.state, JobState::Stopped);
        }

        let mut req = job_op(OP_UPDATE_JOB_STATUS, DEVICE_X, job.id);
        req.begin_group(TAG_JOB_ATTRIBUTES);
        req.group_mut(TAG_JOB_ATTRIBUTES)
            .enum_attr("output-device-job-state", JobState::Completed.as_i32());
        send_as_proxy(&fixture.printer, &req);
        assert_eq!(job.state(), JobState::Completed);
        assert!(job.completed_at().is_some());
    }

    #[test]
    fn status_updates_need_the_bound_device() {
        let fixture = fixture();
        register(&fixture.printer, DEVICE_X);
        register(&fixture.printer, DEVICE_Y);
        let job = bound_job(&fixture.printer, DEVICE_X);

        let mut req = document_op(OP_UPDATE_DOCUMENT_STATUS, DEVICE_Y, job.id);
        req.group_mut(TAG_OPERATION_ATTRIBUTES).integer("impressions-completed", 1);
        let response = send_as_proxy(&fixture.printer, &req);
        assert_eq!(response.status_code(), STATUS_CLIENT_ERROR_NOT_POSSIBLE);
        assert_eq!(job.data().impressions_completed, 0);

        let mut req = document_op(OP_UPDATE_DOCUMENT_STATUS, DEVICE_X, job.id);
        req.group_mut(TAG_OPERATION_ATTRIBUTES).integer("impressions-completed", 1);
        assert_eq!(send_as_proxy(&fixture.printer, &req).status_code(), STATUS_OK);
        assert_eq!(job.data().impressions_completed, 1);
    }

    // -- Update-Active-Jobs -------------------------------------------------------

    #[test]
    fn silent_jobs_are_corrected() {
        let fixture = fixture();
        register(&fixture.printer, DEVICE_X);
        let reported = bound_job(&fixture.printer, DEVICE_X);
        let silent = bound_job(&fixture.printer, DEVICE_X);

        let mut req = device_request(OP_UPDATE_ACTIVE_JOBS, DEVICE_X);
        req.group_mut(TAG_OPERATION_ATTRIBUTES)
            .integers("job-ids", &[reported.id, 99])
            .enums(
                "output-device-job-states",
                &[JobState::Stopped.as_i32(), JobState::Processing.as_i32()],
            );
        let response = send_as_proxy(&fixture.printer, &req);
        assert_eq!(response.status_code(), STATUS_OK);

        let ids: Vec<i32> = response
            .find_in(TAG_OPERATION_ATTRIBUTES, "job-ids")
            .map(|a| a.integers().collect())
            .unwrap_or_default();
        let states: Vec<i32> = response
            .find_in(TAG_OPERATION_ATTRIBUTES, "output-device-job-states")
            .map(|a| a.integers().collect())
            .unwrap_or_default();
        assert_eq!(ids, vec![silent.id]);
        assert_eq!(states, vec![JobState::Stopped.as_i32()]);

        let unsupported = response.group(TAG_UNSUPPORTED_ATTRIBUTES).expect("unsupported");
        assert_eq!(
            unsupported.get("job-ids").map(|a| a.integers().collect::<Vec<_>>()),
            Some(vec![99])
        );
    }

    #[test]
    fn active_job_lists_must_line_up() {
        let fixture = fixture();
        register(&fixture.printer, DEVICE_X);
        let mut req = device_request(OP_UPDATE_ACTIVE_JOBS, DEVICE_X);
        req.group_mut(TAG_OPERATION_ATTRIBUTES)
            .integers("job-ids", &[1, 2])
            .enums("output-device-job-states", &[JobState::Stopped.as_i32()]);
        let response = send_as_proxy(&fixture.printer, &req);
        assert_eq!(response.status_code(), STATUS_CLIENT_ERROR_BAD_REQUEST);

        let response = send_as_proxy(
            &fixture.printer,
            &device_request(OP_UPDATE_ACTIVE_JOBS, DEVICE_X),
        );
        assert_eq!(
            status_message(&response),
            Some("Missing required job-ids attribute.")
        );
    }

    // -- Identify -----------------------------------------------------------------

    #[test]
    fn identify_request_reaches_the_device_once() {
        let fixture = fixture();
        register(&fixture.printer, DEVICE_X);
        let mut req = request(OP_IDENTIFY_PRINTER);
        req.group_mut(TAG_OPERATION_ATTRIBUTES)
            .keywords("identify-actions", &["sound"]);
        send(&fixture.printer, &req);

        let ack = device_request(OP_ACKNOWLEDGE_IDENTIFY_PRINTER, DEVICE_X);
        let response = send_as_proxy(&fixture.printer, &ack);
        assert_eq!(response.status_code(), STATUS_OK);
        assert_eq!(
            response
                .find_in(TAG_OPERATION_ATTRIBUTES, "identify-actions")
                .and_then(IppAttribute::as_str),
            Some("sound")
        );

        let response = send_as_proxy(&fixture.printer, &ack);
        assert!(response.find_in(TAG_OPERATION_ATTRIBUTES, "identify-actions").is_none());
    }
}
