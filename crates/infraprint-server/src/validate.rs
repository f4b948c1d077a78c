// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Document and job-template attribute validation.
//
// Every offending attribute is reported through `respond_unsupported`, so a
// single response lists all of them; validation then returns `None`.

use tracing::debug;

use crate::codec::{
    IppAttribute, IppAttributeGroup, IppValue, OP_CREATE_JOB, OP_PRINT_JOB, OP_SEND_DOCUMENT,
    OP_VALIDATE_JOB, STATUS_CLIENT_ERROR_DOCUMENT_FORMAT_NOT_SUPPORTED, TAG_JOB_ATTRIBUTES,
    TAG_OPERATION_ATTRIBUTES, VALUE_TAG_BEG_COLLECTION, VALUE_TAG_BOOLEAN, VALUE_TAG_ENUM,
    VALUE_TAG_INTEGER, VALUE_TAG_KEYWORD, VALUE_TAG_MIME_TYPE, VALUE_TAG_NAME,
    VALUE_TAG_NAME_WITH_LANGUAGE, VALUE_TAG_RANGE_OF_INTEGER, VALUE_TAG_RESOLUTION,
};
use crate::dispatch::Client;
use crate::printer::Printer;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// `job-name` when the request has none.
pub const DEFAULT_JOB_NAME: &str = "Untitled";

/// Bytes of the body examined by `detect_format`.
pub const SNIFF_LEN: usize = 8;

/// Guess a document format from its first bytes.
pub fn detect_format(header: &[u8]) -> Option<&'static str> {
    if header.starts_with(b"%PDF") {
        Some("application/pdf")
    } else if header.starts_with(b"%!") {
        Some("application/postscript")
    } else if header.len() >= 4 && header[..3] == [0xFF, 0xD8, 0xFF] && (0xE0..=0xEF).contains(&header[3]) {
        Some("image/jpeg")
    } else if header.starts_with(b"\x89PNG") {
        Some("image/png")
    } else if header.starts_with(b"RaS2") || header.starts_with(b"RAS2") {
        Some("image/pwg-raster")
    } else if header.starts_with(b"UNIRAST") {
        Some("image/urf")
    } else {
        None
    }
}

/// Outcome of document attribute validation.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentInfo {
    /// Detected format, else the supplied one, else octet-stream.
    pub format: String,
    /// `*-supplied` and `document-format-detected` attributes for the job.
    pub extras: Vec<IppAttribute>,
}

/// Validated job-creation request.
#[derive(Debug, Clone, PartialEq)]
pub struct JobTemplate {
    pub name: String,
    pub priority: Option<i32>,
    pub document: DocumentInfo,
    /// The request's job-group attributes plus the document extras.
    pub attrs: IppAttributeGroup,
}

fn is_name(attr: &IppAttribute) -> bool {
    matches!(attr.value_tag(), VALUE_TAG_NAME | VALUE_TAG_NAME_WITH_LANGUAGE)
}

fn single_integer_in(attr: &IppAttribute, tag: u8, range: std::ops::RangeInclusive<i32>) -> bool {
    attr.is_single(tag) && attr.as_integer().is_some_and(|v| range.contains(&v))
}

/// Check `compression`, `document-format` and `document-name`.
pub fn valid_doc_attributes(client: &mut Client<'_>) -> Option<DocumentInfo> {
    let request = client.request;
    let op = request.operation_id();
    let mut valid = true;
    let mut extras = Vec::new();

    if let Some((group, attr)) = request.find("compression") {
        let value = attr.as_str().unwrap_or_default();
        let for_op = matches!(op, OP_PRINT_JOB | OP_SEND_DOCUMENT | OP_VALIDATE_JOB);
        let supported = client
            .printer
            .supported("compression-supported")
            .is_some_and(|s| s.strings().any(|v| v == value));
        if attr.is_single(VALUE_TAG_KEYWORD) && group == TAG_OPERATION_ATTRIBUTES && for_op && supported {
            extras.push(IppAttribute::new("compression-supplied", IppValue::keyword(value)));
        } else {
            client.respond_unsupported(attr);
            valid = false;
        }
    }

    let mut supplied = OCTET_STREAM;
    if let Some((group, attr)) = request.find("document-format") {
        match attr.as_str() {
            Some(value) if attr.is_single(VALUE_TAG_MIME_TYPE) && group == TAG_OPERATION_ATTRIBUTES => {
                supplied = value;
                extras.push(IppAttribute::new("document-format-supplied", IppValue::mime_type(value)));
            }
            _ => {
                client.respond_unsupported(attr);
                valid = false;
            }
        }
    }

    let mut format = supplied.to_string();
    if supplied.eq_ignore_ascii_case(OCTET_STREAM) && matches!(op, OP_PRINT_JOB | OP_SEND_DOCUMENT) {
        let header = &request.data[..request.data.len().min(SNIFF_LEN)];
        if let Some(detected) = detect_format(header) {
            debug!(detected, "document format detected");
            extras.push(IppAttribute::new("document-format-detected", IppValue::mime_type(detected)));
            format = detected.to_string();
        }
    }

    if op != OP_CREATE_JOB {
        let supported = client
            .printer
            .supported("document-format-supported")
            .is_some_and(|s| s.strings().any(|v| v.eq_ignore_ascii_case(&format)));
        if !supported {
            client.respond_unsupported(&IppAttribute::new("document-format", IppValue::mime_type(&format)));
            client.respond(
                STATUS_CLIENT_ERROR_DOCUMENT_FORMAT_NOT_SUPPORTED,
                format!("Unsupported document-format \"{format}\"."),
            );
            valid = false;
        }
    }

    if let Some((_, attr)) = request.find("document-name") {
        if let (true, Some(value)) = (is_name(attr), attr.as_str()) {
            extras.push(IppAttribute::new("document-name-supplied", IppValue::name(value)));
        }
    }

    valid.then_some(DocumentInfo { format, extras })
}

// ---------------------------------------------------------------------------
// Job template checks
// ---------------------------------------------------------------------------

type Check = fn(&Printer, &IppAttribute) -> bool;

const JOB_TEMPLATE_CHECKS: &[(&str, Check)] = &[
    ("copies", check_copies),
    ("ipp-attribute-fidelity", check_fidelity),
    ("job-hold-until", check_hold_until),
    ("job-impressions", check_impressions),
    ("job-name", check_job_name),
    ("job-priority", check_priority),
    ("job-sheets", check_job_sheets),
    ("media", check_media),
    ("media-col", check_media_col),
    ("multiple-document-handling", check_document_handling),
    ("orientation-requested", check_orientation),
    ("page-ranges", check_page_ranges),
    ("print-quality", check_quality),
    ("printer-resolution", check_resolution),
    ("sides", check_sides),
];

fn check_copies(_: &Printer, attr: &IppAttribute) -> bool {
    single_integer_in(attr, VALUE_TAG_INTEGER, 1..=999)
}

fn check_fidelity(_: &Printer, attr: &IppAttribute) -> bool {
    attr.is_single(VALUE_TAG_BOOLEAN)
}

fn check_hold_until(_: &Printer, attr: &IppAttribute) -> bool {
    attr.count() == 1
        && (is_name(attr) || attr.value_tag() == VALUE_TAG_KEYWORD)
        && attr.as_str() == Some("no-hold")
}

fn check_impressions(_: &Printer, attr: &IppAttribute) -> bool {
    single_integer_in(attr, VALUE_TAG_INTEGER, 0..=i32::MAX)
}

fn check_job_name(_: &Printer, attr: &IppAttribute) -> bool {
    attr.count() == 1 && is_name(attr)
}

fn check_priority(_: &Printer, attr: &IppAttribute) -> bool {
    single_integer_in(attr, VALUE_TAG_INTEGER, 1..=100)
}

fn check_job_sheets(_: &Printer, attr: &IppAttribute) -> bool {
    attr.count() == 1
        && (is_name(attr) || attr.value_tag() == VALUE_TAG_KEYWORD)
        && attr.as_str() == Some("none")
}

fn check_media(_: &Printer, attr: &IppAttribute) -> bool {
    attr.count() == 1 && (is_name(attr) || attr.value_tag() == VALUE_TAG_KEYWORD)
}

fn check_media_col(_: &Printer, attr: &IppAttribute) -> bool {
    attr.is_single(VALUE_TAG_BEG_COLLECTION)
}

fn check_document_handling(_: &Printer, attr: &IppAttribute) -> bool {
    attr.is_single(VALUE_TAG_KEYWORD)
        && matches!(
            attr.as_str(),
            Some("separate-documents-uncollated-copies" | "separate-documents-collated-copies")
        )
}

fn check_orientation(_: &Printer, attr: &IppAttribute) -> bool {
    single_integer_in(attr, VALUE_TAG_ENUM, 3..=6)
}

fn check_page_ranges(_: &Printer, attr: &IppAttribute) -> bool {
    attr.all_tagged(VALUE_TAG_RANGE_OF_INTEGER)
}

fn check_quality(_: &Printer, attr: &IppAttribute) -> bool {
    single_integer_in(attr, VALUE_TAG_ENUM, 3..=5)
}

/// Only resolutions an output device has reported are accepted.
fn check_resolution(printer: &Printer, attr: &IppAttribute) -> bool {
    let (true, Some(value)) = (attr.is_single(VALUE_TAG_RESOLUTION), attr.first()) else {
        return false;
    };
    printer
        .supported("printer-resolution-supported")
        .is_some_and(|supported| supported.values.contains(value))
}

fn check_sides(printer: &Printer, attr: &IppAttribute) -> bool {
    let (true, Some(value)) = (attr.is_single(VALUE_TAG_KEYWORD), attr.as_str()) else {
        return false;
    };
    match printer.supported("sides-supported") {
        Some(supported) => supported.strings().any(|s| s == value),
        None => value == "one-sided",
    }
}

/// Check the document attributes, then every job template attribute.
pub fn valid_job_attributes(client: &mut Client<'_>) -> Option<JobTemplate> {
    let document = valid_doc_attributes(client);
    let request = client.request;
    let mut valid = document.is_some();

    for (name, check) in JOB_TEMPLATE_CHECKS {
        if let Some((_, attr)) = request.find(name) {
            if !check(client.printer, attr) {
                client.respond_unsupported(attr);
                valid = false;
            }
        }
    }

    let (Some(document), true) = (document, valid) else {
        return None;
    };

    let mut attrs = IppAttributeGroup::new(TAG_JOB_ATTRIBUTES);
    for group in request.groups_with(TAG_JOB_ATTRIBUTES) {
        for attr in &group.attributes {
            attrs.set(attr.clone());
        }
    }
    for attr in &document.extras {
        attrs.set(attr.clone());
    }

    let name = request
        .find("job-name")
        .and_then(|(_, a)| a.as_str())
        .unwrap_or(DEFAULT_JOB_NAME)
        .to_string();
    let priority = request.find("job-priority").and_then(|(_, a)| a.as_integer());

    Some(JobTemplate { name, priority, document, attrs })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{
        IppMessage, OP_VALIDATE_DOCUMENT, STATUS_CLIENT_ERROR_ATTRIBUTES_OR_VALUES, STATUS_OK,
        TAG_PRINTER_ATTRIBUTES, TAG_UNSUPPORTED_ATTRIBUTES,
    };
    use crate::dispatch::testing::{fixture, request};

    fn with_job_attr(op: u16, attr: IppAttribute) -> IppMessage {
        let mut req = request(op);
        req.begin_group(TAG_JOB_ATTRIBUTES).add(attr);
        req
    }

    fn unsupported_names(client: &Client<'_>) -> Vec<String> {
        client
            .response
            .groups_with(TAG_UNSUPPORTED_ATTRIBUTES)
            .flat_map(|g| g.attributes.iter().map(|a| a.name.clone()))
            .collect()
    }

    // -- Format detection ---------------------------------------------------

    #[test]
    fn magic_bytes() {
        assert_eq!(detect_format(b"%PDF-1.7"), Some("application/pdf"));
        assert_eq!(detect_format(b"%!PS-Adobe-3.0"), Some("application/postscript"));
        assert_eq!(detect_format(&[0xFF, 0xD8, 0xFF, 0xE1, 0, 0]), Some("image/jpeg"));
        assert_eq!(detect_format(&[0xFF, 0xD8, 0xFF, 0xDB]), None);
        assert_eq!(detect_format(b"\x89PNG\r\n\x1a\n"), Some("image/png"));
        assert_eq!(detect_format(b"RaS2PwgR"), Some("image/pwg-raster"));
        assert_eq!(detect_format(b"UNIRAST\0"), Some("image/urf"));
        assert_eq!(detect_format(b"hello"), None);
        assert_eq!(detect_format(b""), None);
    }

    // -- Document attributes ------------------------------------------------

    #[test]
    fn octet_stream_body_is_sniffed_on_print_job() {
        let fixture = fixture();
        let mut req = request(OP_PRINT_JOB);
        req.group_mut(TAG_OPERATION_ATTRIBUTES)
            .mime_type("document-format", OCTET_STREAM);
        req.data = b"%PDF-1.4 rest of file".to_vec();

        let mut client = Client::new(&fixture.printer, &req, None, "test");
        let info = valid_doc_attributes(&mut client).expect("valid");
        assert_eq!(info.format, "application/pdf");
        assert!(info.extras.iter().any(|a| a.name == "document-format-detected"
            && a.as_str() == Some("application/pdf")));
        assert!(info.extras.iter().any(|a| a.name == "document-format-supplied"));
    }

    #[test]
    fn missing_format_defaults_to_octet_stream() {
        let fixture = fixture();
        let req = request(OP_VALIDATE_DOCUMENT);
        let mut client = Client::new(&fixture.printer, &req, None, "test");
        let info = valid_doc_attributes(&mut client).expect("valid");
        assert_eq!(info.format, OCTET_STREAM);
        assert!(info.extras.is_empty());
    }

    #[test]
    fn unsupported_format_is_refused() {
        let fixture = fixture();
        let mut req = request(OP_VALIDATE_JOB);
        req.group_mut(TAG_OPERATION_ATTRIBUTES)
            .mime_type("document-format", "application/x-unknown");
        let mut client = Client::new(&fixture.printer, &req, None, "test");
        assert!(valid_doc_attributes(&mut client).is_none());
        assert_eq!(client.status(), STATUS_CLIENT_ERROR_DOCUMENT_FORMAT_NOT_SUPPORTED);
        assert_eq!(unsupported_names(&client), vec!["document-format"]);
    }

    #[test]
    fn create_job_skips_format_support_check() {
        let fixture = fixture();
        let mut req = request(OP_CREATE_JOB);
        req.group_mut(TAG_OPERATION_ATTRIBUTES)
            .mime_type("document-format", "application/x-unknown");
        let mut client = Client::new(&fixture.printer, &req, None, "test");
        assert!(valid_doc_attributes(&mut client).is_some());
    }

    #[test]
    fn compression_must_be_supported_and_in_operation_group() {
        let fixture = fixture();
        let mut req = request(OP_PRINT_JOB);
        req.group_mut(TAG_OPERATION_ATTRIBUTES).keyword("compression", "gzip");
        let mut client = Client::new(&fixture.printer, &req, None, "test");
        assert!(valid_doc_attributes(&mut client).is_none());
        assert_eq!(unsupported_names(&client), vec!["compression"]);

        let mut req = request(OP_PRINT_JOB);
        req.group_mut(TAG_OPERATION_ATTRIBUTES).keyword("compression", "none");
        let mut client = Client::new(&fixture.printer, &req, None, "test");
        let info = valid_doc_attributes(&mut client).expect("valid");
        assert!(info.extras.iter().any(|a| a.name == "compression-supplied"));
    }

    // -- Job template attributes --------------------------------------------

    #[test]
    fn zero_copies_is_unsupported() {
        let fixture = fixture();
        let req = with_job_attr(OP_VALIDATE_JOB, IppAttribute::new("copies", IppValue::Integer(0)));
        let mut client = Client::new(&fixture.printer, &req, None, "test");
        assert!(valid_job_attributes(&mut client).is_none());
        assert_eq!(client.status(), STATUS_CLIENT_ERROR_ATTRIBUTES_OR_VALUES);
        assert_eq!(unsupported_names(&client), vec!["copies"]);
    }

    #[test]
    fn every_bad_attribute_is_listed() {
        let fixture = fixture();
        let mut req = request(OP_VALIDATE_JOB);
        req.begin_group(TAG_JOB_ATTRIBUTES)
            .integer("copies", 1000)
            .integer("job-priority", 0)
            .enum_attr("orientation-requested", 7)
            .enum_attr("print-quality", 4)
            .keyword("job-sheets", "standard")
            .keyword("sides", "two-sided-long-edge");
        let mut client = Client::new(&fixture.printer, &req, None, "test");
        assert!(valid_job_attributes(&mut client).is_none());
        assert_eq!(
            unsupported_names(&client),
            vec!["copies", "job-priority", "job-sheets", "orientation-requested", "sides"]
        );
    }

    #[test]
    fn valid_template_collects_job_attributes() {
        let fixture = fixture();
        let mut req = request(OP_VALIDATE_JOB);
        req.group_mut(TAG_OPERATION_ATTRIBUTES)
            .name_attr("job-name", "Invoice")
            .name_attr("document-name", "invoice.pdf");
        req.begin_group(TAG_JOB_ATTRIBUTES)
            .integer("copies", 2)
            .integer("job-priority", 80)
            .keyword("sides", "one-sided")
            .keyword("media", "iso_a4_210x297mm");
        let mut client = Client::new(&fixture.printer, &req, None, "test");
        let template = valid_job_attributes(&mut client).expect("valid");

        assert_eq!(client.status(), STATUS_OK);
        assert_eq!(template.name, "Invoice");
        assert_eq!(template.priority, Some(80));
        assert_eq!(template.attrs.get_integer("copies"), Some(2));
        assert_eq!(template.attrs.get_string("document-name-supplied"), Some("invoice.pdf"));
    }

    #[test]
    fn job_name_defaults_to_untitled() {
        let fixture = fixture();
        let req = request(OP_VALIDATE_JOB);
        let mut client = Client::new(&fixture.printer, &req, None, "test");
        let template = valid_job_attributes(&mut client).expect("valid");
        assert_eq!(template.name, DEFAULT_JOB_NAME);
        assert_eq!(template.priority, None);
    }

    #[test]
    fn sides_and_resolution_follow_device_capabilities() {
        let fixture = fixture();
        let mut caps = IppAttributeGroup::new(TAG_PRINTER_ATTRIBUTES);
        caps.keywords("sides-supported", &["one-sided", "two-sided-long-edge"]).add(
            IppAttribute::new(
                "printer-resolution-supported",
                IppValue::Resolution { xres: 600, yres: 600, units: 3 },
            ),
        );
        fixture.printer.update_device("urn:uuid:dev", &caps.attributes);

        let mut req = request(OP_VALIDATE_JOB);
        req.begin_group(TAG_JOB_ATTRIBUTES)
            .keyword("sides", "two-sided-long-edge")
            .value("printer-resolution", IppValue::Resolution { xres: 600, yres: 600, units: 3 });
        let mut client = Client::new(&fixture.printer, &req, None, "test");
        assert!(valid_job_attributes(&mut client).is_some());

        let mut req = request(OP_VALIDATE_JOB);
        req.begin_group(TAG_JOB_ATTRIBUTES)
            .value("printer-resolution", IppValue::Resolution { xres: 300, yres: 300, units: 3 });
        let mut client = Client::new(&fixture.printer, &req, None, "test");
        assert!(valid_job_attributes(&mut client).is_none());
        assert_eq!(unsupported_names(&client), vec!["printer-resolution"]);
    }
}
