// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Document operations.  Jobs hold exactly one document, so the document
// object is synthesized from the job it belongs to.

use chrono::Utc;

use crate::codec::{
    IppAttributeGroup, STATUS_CLIENT_ERROR_BAD_REQUEST, STATUS_CLIENT_ERROR_NOT_FOUND,
    TAG_DOCUMENT_ATTRIBUTES, VALUE_TAG_INTEGER,
};
use crate::dispatch::Client;
use crate::events::up_time;
use crate::job::Job;
use crate::printer::Printer;
use crate::requested::RequestedAttributes;
use crate::validate::{self, OCTET_STREAM};

/// Document description attributes for document 1 of `job`.
fn describe_document(printer: &Printer, job: &Job, ra: &RequestedAttributes) -> IppAttributeGroup {
    let data = job.data();
    let mut all = IppAttributeGroup::new(TAG_DOCUMENT_ATTRIBUTES);
    all.integer("document-number", 1)
        .integer("document-job-id", job.id)
        .uri("document-job-uri", &job.uri)
        .uri("document-printer-uri", &printer.uri)
        .mime_type(
            "document-format",
            data.format.as_deref().unwrap_or(OCTET_STREAM),
        )
        .name_attr(
            "document-name",
            data.attrs.get_string("document-name-supplied").unwrap_or(&job.name),
        )
        .enum_attr("document-state", data.state.as_i32())
        .keywords(
            "document-state-reasons",
            &data.combined_reasons().keywords_or_none(),
        )
        .integer("impressions", data.impressions)
        .integer("impressions-completed", data.impressions_completed)
        .boolean("last-document", true)
        .integer(
            "printer-up-time",
            up_time(printer.start_time, Utc::now()),
        );
    if let Some(sha) = &data.document_sha256 {
        all.text("document-digest", sha);
    }

    let mut group = IppAttributeGroup::new(TAG_DOCUMENT_ATTRIBUTES);
    ra.copy_into(&all, &mut group);
    group
}

pub fn get_document_attributes(client: &mut Client<'_>) {
    let Some(job) = client.find_job() else {
        client.respond(STATUS_CLIENT_ERROR_NOT_FOUND, "Job not found.");
        return;
    };
    let Some(number) = client.operation_attr("document-number") else {
        client.respond(STATUS_CLIENT_ERROR_BAD_REQUEST, "Missing document-number attribute.");
        return;
    };
    if !number.is_single(VALUE_TAG_INTEGER) {
        client.respond_unsupported(number);
        return;
    }
    if number.as_integer() != Some(1) {
        client.respond(STATUS_CLIENT_ERROR_NOT_FOUND, "Document not found.");
        return;
    }
    let ra = RequestedAttributes::from_request(client.request);
    client.ok();
    let group = describe_document(client.printer, &job, &ra);
    client.add_group(group);
}

pub fn get_documents(client: &mut Client<'_>) {
    let Some(job) = client.find_job() else {
        client.respond(STATUS_CLIENT_ERROR_NOT_FOUND, "Job not found.");
        return;
    };
    let ra = RequestedAttributes::from_request(client.request);
    client.ok();
    let group = describe_document(client.printer, &job, &ra);
    client.add_group(group);
}

pub fn validate_document(client: &mut Client<'_>) {
    if validate::valid_doc_attributes(client).is_some() {
        client.ok();
    }
}

#[cfg(test)]
mod tests {
    use crate::codec::{
        OP_GET_DOCUMENTS, OP_GET_DOCUMENT_ATTRIBUTES, OP_VALIDATE_DOCUMENT,
        STATUS_CLIENT_ERROR_DOCUMENT_FORMAT_NOT_SUPPORTED, STATUS_CLIENT_ERROR_NOT_FOUND,
        STATUS_OK, TAG_DOCUMENT_ATTRIBUTES, TAG_OPERATION_ATTRIBUTES,
    };
    use crate::dispatch::testing::*;

    #[test]
    fn document_one_mirrors_the_job() {
        let fixture = fixture();
        let id = job_id(&send(&fixture.printer, &print_request("alice")));

        let mut req = job_request(OP_GET_DOCUMENT_ATTRIBUTES, id);
        req.group_mut(TAG_OPERATION_ATTRIBUTES).integer("document-number", 1);
        let response = send(&fixture.printer, &req);
        assert_eq!(response.status_code(), STATUS_OK);

        let doc = response.group(TAG_DOCUMENT_ATTRIBUTES).expect("document group");
        assert_eq!(doc.get_integer("document-job-id"), Some(id));
        assert_eq!(doc.get_string("document-format"), Some("application/pdf"));
        assert_eq!(doc.get_string("document-name"), Some("report"));
        assert!(doc.get("last-document").is_some());
    }

    #[test]
    fn only_document_one_exists() {
        let fixture = fixture();
        let id = job_id(&send(&fixture.printer, &print_request("alice")));

        let mut req = job_request(OP_GET_DOCUMENT_ATTRIBUTES, id);
        req.group_mut(TAG_OPERATION_ATTRIBUTES).integer("document-number", 2);
        let response = send(&fixture.printer, &req);
        assert_eq!(response.status_code(), STATUS_CLIENT_ERROR_NOT_FOUND);

        let response = send(&fixture.printer, &job_request(OP_GET_DOCUMENT_ATTRIBUTES, id));
        assert_eq!(
            status_message(&response),
            Some("Missing document-number attribute.")
        );
    }

    #[test]
    fn get_documents_filters_by_requested_attributes() {
        let fixture = fixture();
        let id = job_id(&send(&fixture.printer, &print_request("alice")));

        let mut req = job_request(OP_GET_DOCUMENTS, id);
        req.group_mut(TAG_OPERATION_ATTRIBUTES)
            .keywords("requested-attributes", &["document-number", "document-state"]);
        let response = send(&fixture.printer, &req);
        let doc = response.group(TAG_DOCUMENT_ATTRIBUTES).expect("document group");
        assert_eq!(doc.attributes.len(), 2);

        let response = send(&fixture.printer, &job_request(OP_GET_DOCUMENTS, id + 1));
        assert_eq!(response.status_code(), STATUS_CLIENT_ERROR_NOT_FOUND);
    }

    #[test]
    fn validate_document_checks_the_format() {
        let fixture = fixture();
        let response = send(&fixture.printer, &request(OP_VALIDATE_DOCUMENT));
        assert_eq!(response.status_code(), STATUS_OK);

        let mut req = request(OP_VALIDATE_DOCUMENT);
        req.group_mut(TAG_OPERATION_ATTRIBUTES)
            .mime_type("document-format", "text/x-unknown");
        let response = send(&fixture.printer, &req);
        assert_eq!(
            response.status_code(),
            STATUS_CLIENT_ERROR_DOCUMENT_FORMAT_NOT_SUPPORTED
        );
    }
}
