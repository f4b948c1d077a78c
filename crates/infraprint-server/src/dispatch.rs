// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Request dispatcher: checks the structural preamble every request carries,
// enforces proxy authentication on the device operations and routes the
// request to its handler through a table keyed by operation id.

use std::sync::Arc;

use tracing::{debug, info, warn};

use infraprint_core::config::PRINTER_RESOURCE;
use infraprint_core::error::{InfraError, Result};

use crate::codec::{
    operation_name, status_name, tag_name, IppAttribute, IppAttributeGroup, IppMessage,
    OP_ACKNOWLEDGE_DOCUMENT, OP_ACKNOWLEDGE_IDENTIFY_PRINTER, OP_ACKNOWLEDGE_JOB, OP_CANCEL_JOB,
    OP_CANCEL_MY_JOBS, OP_CANCEL_SUBSCRIPTION, OP_CLOSE_JOB, OP_CREATE_JOB,
    OP_CREATE_JOB_SUBSCRIPTIONS, OP_CREATE_PRINTER_SUBSCRIPTIONS, OP_DEREGISTER_OUTPUT_DEVICE,
    OP_FETCH_DOCUMENT, OP_FETCH_JOB, OP_GET_DOCUMENTS, OP_GET_DOCUMENT_ATTRIBUTES, OP_GET_JOBS,
    OP_GET_JOB_ATTRIBUTES, OP_GET_NOTIFICATIONS, OP_GET_OUTPUT_DEVICE_ATTRIBUTES,
    OP_GET_PRINTER_ATTRIBUTES, OP_GET_PRINTER_SUPPORTED_VALUES, OP_GET_SUBSCRIPTIONS,
    OP_GET_SUBSCRIPTION_ATTRIBUTES, OP_IDENTIFY_PRINTER, OP_PRINT_JOB, OP_PRINT_URI,
    OP_RENEW_SUBSCRIPTION, OP_SEND_DOCUMENT, OP_SEND_URI, OP_UPDATE_ACTIVE_JOBS,
    OP_UPDATE_DOCUMENT_STATUS, OP_UPDATE_JOB_STATUS, OP_UPDATE_OUTPUT_DEVICE_ATTRIBUTES,
    OP_VALIDATE_DOCUMENT, OP_VALIDATE_JOB, STATUS_CLIENT_ERROR_ATTRIBUTES_OR_VALUES,
    STATUS_CLIENT_ERROR_BAD_REQUEST, STATUS_CLIENT_ERROR_NOT_AUTHENTICATED,
    STATUS_CLIENT_ERROR_NOT_FOUND, STATUS_OK, STATUS_SERVER_ERROR_OPERATION_NOT_SUPPORTED,
    STATUS_SERVER_ERROR_VERSION_NOT_SUPPORTED, TAG_OPERATION_ATTRIBUTES,
    TAG_UNSUPPORTED_ATTRIBUTES, VALUE_TAG_CHARSET, VALUE_TAG_NAME, VALUE_TAG_NAME_WITH_LANGUAGE,
    VALUE_TAG_NATURAL_LANGUAGE, VALUE_TAG_URI,
};
use crate::device::Device;
use crate::handlers::{device, documents, jobs, printer as printer_ops, subscriptions};
use crate::job::Job;
use crate::printer::{Printer, OPERATIONS_SUPPORTED};

/// An operation handler.  It always leaves a status in `client.response`.
pub type Handler = fn(&mut Client<'_>);

/// Operation id to handler.
pub const HANDLERS: &[(u16, Handler)] = &[
    (OP_PRINT_JOB, jobs::print_job),
    (OP_PRINT_URI, jobs::print_uri),
    (OP_VALIDATE_JOB, jobs::validate_job),
    (OP_CREATE_JOB, jobs::create_job),
    (OP_SEND_DOCUMENT, jobs::send_document),
    (OP_SEND_URI, jobs::send_uri),
    (OP_CANCEL_JOB, jobs::cancel_job),
    (OP_CANCEL_MY_JOBS, jobs::cancel_my_jobs),
    (OP_CLOSE_JOB, jobs::close_job),
    (OP_GET_JOB_ATTRIBUTES, jobs::get_job_attributes),
    (OP_GET_JOBS, jobs::get_jobs),
    (OP_GET_DOCUMENT_ATTRIBUTES, documents::get_document_attributes),
    (OP_GET_DOCUMENTS, documents::get_documents),
    (OP_VALIDATE_DOCUMENT, documents::validate_document),
    (OP_GET_PRINTER_ATTRIBUTES, printer_ops::get_printer_attributes),
    (OP_GET_PRINTER_SUPPORTED_VALUES, printer_ops::get_printer_supported_values),
    (OP_IDENTIFY_PRINTER, printer_ops::identify_printer),
    (OP_CREATE_PRINTER_SUBSCRIPTIONS, subscriptions::create_printer_subscriptions),
    (OP_CREATE_JOB_SUBSCRIPTIONS, subscriptions::create_job_subscriptions),
    (OP_GET_SUBSCRIPTION_ATTRIBUTES, subscriptions::get_subscription_attributes),
    (OP_GET_SUBSCRIPTIONS, subscriptions::get_subscriptions),
    (OP_RENEW_SUBSCRIPTION, subscriptions::renew_subscription),
    (OP_CANCEL_SUBSCRIPTION, subscriptions::cancel_subscription),
    (OP_GET_NOTIFICATIONS, subscriptions::get_notifications),
    (OP_ACKNOWLEDGE_DOCUMENT, device::acknowledge_document),
    (OP_ACKNOWLEDGE_IDENTIFY_PRINTER, device::acknowledge_identify_printer),
    (OP_ACKNOWLEDGE_JOB, device::acknowledge_job),
    (OP_FETCH_DOCUMENT, device::fetch_document),
    (OP_FETCH_JOB, device::fetch_job),
    (OP_GET_OUTPUT_DEVICE_ATTRIBUTES, device::get_output_device_attributes),
    (OP_UPDATE_ACTIVE_JOBS, device::update_active_jobs),
    (OP_UPDATE_DOCUMENT_STATUS, device::update_document_status),
    (OP_UPDATE_JOB_STATUS, device::update_job_status),
    (OP_UPDATE_OUTPUT_DEVICE_ATTRIBUTES, device::update_output_device_attributes),
    (OP_DEREGISTER_OUTPUT_DEVICE, device::deregister_output_device),
];

/// Operations only an authenticated output device may call.
pub const DEVICE_OPERATIONS: &[u16] = &[
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

pub fn handler_for(op: u16) -> Option<Handler> {
    HANDLERS.iter().find(|(id, _)| *id == op).map(|(_, handler)| *handler)
}

/// Fail unless every operation in `operations-supported` has a handler.
/// Called once before the listeners open.
pub fn check_handlers() -> Result<()> {
    let missing: Vec<&str> = OPERATIONS_SUPPORTED
        .iter()
        .filter(|op| handler_for(**op).is_none())
        .map(|op| operation_name(*op))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(InfraError::PrintServer(format!(
            "no handler for {}",
            missing.join(", ")
        )))
    }
}

// ---------------------------------------------------------------------------
// URIs
// ---------------------------------------------------------------------------

/// The parts of an absolute `scheme://host[:port]/path` URI this server
/// looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UriParts<'a> {
    pub scheme: &'a str,
    pub host: &'a str,
    pub path: &'a str,
}

pub fn split_uri(uri: &str) -> Option<UriParts<'_>> {
    let (scheme, rest) = uri.split_once("://")?;
    if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c)) {
        return None;
    }
    let (authority, path) = match rest.find('/') {
        Some(slash) => (&rest[..slash], &rest[slash..]),
        None => (rest, "/"),
    };
    let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    if host.is_empty() {
        return None;
    }
    let path = path.split(['?', '#']).next().unwrap_or(path);
    Some(UriParts { scheme, host, path })
}

/// Job id from a `.../ipp/print/<id>` job URI.
pub fn job_id_from_uri(uri: &str) -> Option<i32> {
    let parts = split_uri(uri)?;
    parts
        .path
        .strip_prefix(PRINTER_RESOURCE)?
        .strip_prefix('/')?
        .parse()
        .ok()
        .filter(|id| *id > 0)
}

// ---------------------------------------------------------------------------
// Client context
// ---------------------------------------------------------------------------

/// One request being answered.
pub struct Client<'a> {
    pub printer: &'a Arc<Printer>,
    pub request: &'a IppMessage,
    pub response: IppMessage,
    /// User name from HTTP Basic authentication, if any.
    pub auth_user: Option<String>,
    auth_password: Option<String>,
    pub peer: &'a str,
}

impl<'a> Client<'a> {
    pub fn new(
        printer: &'a Arc<Printer>,
        request: &'a IppMessage,
        credentials: Option<(String, String)>,
        peer: &'a str,
    ) -> Self {
        let (auth_user, auth_password) = match credentials {
            Some((user, password)) => (Some(user), Some(password)),
            None => (None, None),
        };
        Self {
            printer,
            request,
            response: IppMessage::new_response(request.version, STATUS_OK, request.request_id),
            auth_user,
            auth_password,
            peer,
        }
    }

    pub fn operation(&self) -> u16 {
        self.request.operation_id()
    }

    /// Set the response status and `status-message`.
    pub fn respond(&mut self, status: u16, message: impl Into<String>) {
        let message = message.into();
        self.response.code = status;
        let group = self.operation_group();
        group.remove("status-message");
        group.text("status-message", &message);
    }

    /// Set `successful-ok` with no `status-message`.
    pub fn ok(&mut self) {
        self.response.code = STATUS_OK;
        self.operation_group().remove("status-message");
    }

    pub fn status(&self) -> u16 {
        self.response.code
    }

    /// Refuse one attribute: `client-error-attributes-or-values-not-supported`
    /// plus a copy in the unsupported-attributes group.
    pub fn respond_unsupported(&mut self, attr: &IppAttribute) {
        let set_of = if attr.count() > 1 { "1setOf " } else { "" };
        let message = format!(
            "Unsupported {} {}{} value.",
            attr.name,
            set_of,
            tag_name(attr.value_tag())
        );
        self.respond(STATUS_CLIENT_ERROR_ATTRIBUTES_OR_VALUES, message);
        self.unsupported(attr.clone());
    }

    /// Copy `attr` into the unsupported-attributes group, which directly
    /// follows the operation group, without touching the status.
    pub fn unsupported(&mut self, attr: IppAttribute) {
        let index = match self
            .response
            .groups
            .iter()
            .position(|g| g.tag == TAG_UNSUPPORTED_ATTRIBUTES)
        {
            Some(index) => index,
            None => {
                let at = usize::from(
                    self.response
                        .groups
                        .first()
                        .is_some_and(|g| g.tag == TAG_OPERATION_ATTRIBUTES),
                );
                self.response
                    .groups
                    .insert(at, IppAttributeGroup::new(TAG_UNSUPPORTED_ATTRIBUTES));
                at
            }
        };
        self.response.groups[index].add(attr);
    }

    /// The response's operation group; `new_response` always puts it first.
    pub fn operation_group(&mut self) -> &mut IppAttributeGroup {
        if self
            .response
            .groups
            .first()
            .is_none_or(|g| g.tag != TAG_OPERATION_ATTRIBUTES)
        {
            self.response
                .groups
                .insert(0, IppAttributeGroup::new(TAG_OPERATION_ATTRIBUTES));
        }
        &mut self.response.groups[0]
    }

    /// Append a group to the response.
    pub fn add_group(&mut self, group: IppAttributeGroup) {
        self.response.groups.push(group);
    }

    /// An attribute of the request's operation group.
    pub fn operation_attr(&self, name: &str) -> Option<&'a IppAttribute> {
        let request: &'a IppMessage = self.request;
        request.find_in(TAG_OPERATION_ATTRIBUTES, name)
    }

    /// Single-valued `requesting-user-name` from the operation group.
    pub fn requesting_user_name(&self) -> Option<&'a str> {
        self.operation_attr("requesting-user-name")
            .filter(|a| a.count() == 1)
            .filter(|a| matches!(a.value_tag(), VALUE_TAG_NAME | VALUE_TAG_NAME_WITH_LANGUAGE))
            .and_then(IppAttribute::as_str)
    }

    /// The authenticated user, else `requesting-user-name`, else `fallback`.
    pub fn user_or(&self, fallback: &str) -> String {
        self.auth_user
            .clone()
            .or_else(|| self.requesting_user_name().map(str::to_string))
            .unwrap_or_else(|| fallback.to_string())
    }

    /// Owner recorded on new jobs.
    pub fn username(&self) -> String {
        self.user_or("anonymous")
    }

    /// Whether the Basic credentials match the configured proxy account.
    pub fn is_proxy(&self) -> bool {
        matches!(
            (&self.auth_user, &self.auth_password),
            (Some(user), Some(password))
                if *user == self.printer.proxy_user && *password == self.printer.proxy_password
        )
    }

    /// The job named by `job-uri` or `job-id`.
    pub fn find_job(&self) -> Option<Arc<Job>> {
        if let Some(attr) = self.operation_attr("job-uri") {
            return attr
                .as_str()
                .and_then(job_id_from_uri)
                .and_then(|id| self.printer.job(id));
        }
        let id = self.operation_attr("job-id")?.as_integer()?;
        self.printer.job(id)
    }

    /// `output-device-uuid` from the operation group.
    pub fn device_uuid(&self) -> Option<&'a str> {
        self.operation_attr("output-device-uuid")
            .filter(|a| a.is_single(VALUE_TAG_URI))
            .and_then(IppAttribute::as_str)
    }

    pub fn find_device(&self) -> Option<Arc<Device>> {
        self.device_uuid().and_then(|uuid| self.printer.device(uuid))
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Answer one parsed request.  Protocol failures are carried in the status
/// of the returned message; this never fails.
pub fn process_request(
    printer: &Arc<Printer>,
    request: &IppMessage,
    credentials: Option<(String, String)>,
    peer: &str,
) -> IppMessage {
    let op = request.operation_id();
    let operation = operation_name(op);
    debug!(peer, operation, request_id = request.request_id, "request");

    let mut client = Client::new(printer, request, credentials, peer);
    if check_preamble(&mut client) {
        if DEVICE_OPERATIONS.contains(&op) && !client.is_proxy() {
            warn!(peer, operation, "device operation without proxy credentials");
            client.respond(
                STATUS_CLIENT_ERROR_NOT_AUTHENTICATED,
                "Output device credentials required.",
            );
        } else {
            match handler_for(op) {
                Some(handler) => handler(&mut client),
                None => client.respond(
                    STATUS_SERVER_ERROR_OPERATION_NOT_SUPPORTED,
                    "Operation not supported.",
                ),
            }
        }
    }

    info!(
        peer,
        operation,
        request_id = request.request_id,
        status = status_name(client.status()),
        "response"
    );
    client.response
}

/// Version, request-id, group order, charset, natural language and target
/// URI.  Answers the request itself and returns `false` on any failure.
fn check_preamble(client: &mut Client<'_>) -> bool {
    let request = client.request;
    let (major, minor) = request.version;

    if !(1..=2).contains(&major) {
        client.respond(
            STATUS_SERVER_ERROR_VERSION_NOT_SUPPORTED,
            format!("Bad request version number {major}.{minor}."),
        );
        return false;
    }
    if request.request_id == 0 {
        client.respond(STATUS_CLIENT_ERROR_BAD_REQUEST, "Bad request-id 0.");
        return false;
    }
    if request.attributes().next().is_none() {
        client.respond(STATUS_CLIENT_ERROR_BAD_REQUEST, "No attributes in request.");
        return false;
    }
    if let Some(pair) = request.groups.windows(2).find(|w| w[1].tag < w[0].tag) {
        client.respond(
            STATUS_CLIENT_ERROR_BAD_REQUEST,
            format!(
                "Attribute groups are out of order ({:x} < {:x}).",
                pair[1].tag, pair[0].tag
            ),
        );
        return false;
    }

    let mut leading = request.attributes();
    let charset = leading
        .next()
        .filter(|(tag, a)| {
            *tag == TAG_OPERATION_ATTRIBUTES
                && a.name == "attributes-charset"
                && a.value_tag() == VALUE_TAG_CHARSET
        })
        .map(|(_, a)| a);
    let language = if charset.is_some() {
        leading
            .next()
            .filter(|(tag, a)| {
                *tag == TAG_OPERATION_ATTRIBUTES
                    && a.name == "attributes-natural-language"
                    && a.value_tag() == VALUE_TAG_NATURAL_LANGUAGE
            })
            .map(|(_, a)| a)
    } else {
        None
    };
    let target = ["printer-uri", "job-uri"].iter().find_map(|name| {
        request
            .find_in(TAG_OPERATION_ATTRIBUTES, name)
            .filter(|a| a.value_tag() == VALUE_TAG_URI)
    });

    if let Some(value) = charset.and_then(IppAttribute::as_str) {
        if !value.eq_ignore_ascii_case("us-ascii") && !value.eq_ignore_ascii_case("utf-8") {
            client.respond(
                STATUS_CLIENT_ERROR_BAD_REQUEST,
                format!("Unsupported character set \"{value}\"."),
            );
            return false;
        }
    }
    let (Some(_), Some(_), Some(target)) = (charset, language, target) else {
        client.respond(STATUS_CLIENT_ERROR_BAD_REQUEST, "Missing required attributes.");
        return false;
    };

    let value = target.as_str().unwrap_or_default();
    let Some(parts) = split_uri(value) else {
        client.respond(
            STATUS_CLIENT_ERROR_ATTRIBUTES_OR_VALUES,
            format!("Bad {} value '{value}'.", target.name),
        );
        return false;
    };
    let found = if target.name == "job-uri" {
        parts
            .path
            .strip_prefix(PRINTER_RESOURCE)
            .is_some_and(|rest| rest.starts_with('/'))
    } else {
        parts.path == PRINTER_RESOURCE
    };
    if !found {
        client.respond(
            STATUS_CLIENT_ERROR_NOT_FOUND,
            format!("{} {} not found.", target.name, value),
        );
        return false;
    }
    true
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for handler tests.

    use super::*;
    use infraprint_core::config::ServerConfig;

    pub const PRINTER_URI: &str = "ipp://printhost:8631/ipp/print";
    pub const PROXY_USER: &str = "test";
    pub const PROXY_PASSWORD: &str = "test123";

    pub struct Fixture {
        pub printer: Arc<Printer>,
        pub spool: tempfile::TempDir,
    }

    pub fn fixture() -> Fixture {
        let spool = tempfile::tempdir().expect("spool dir");
        let config = ServerConfig {
            hostname: "printhost".into(),
            port: 8631,
            spool_dir: spool.path().to_path_buf(),
            ..ServerConfig::default()
        };
        Fixture { printer: Arc::new(Printer::new(&config)), spool }
    }

    /// Request with the preamble and `printer-uri`.
    pub fn request(op: u16) -> IppMessage {
        let mut request = IppMessage::new_request(op, 1);
        request
            .group_mut(TAG_OPERATION_ATTRIBUTES)
            .uri("printer-uri", PRINTER_URI);
        request
    }

    /// Request addressed to one job by `job-id`.
    pub fn job_request(op: u16, job_id: i32) -> IppMessage {
        let mut request = request(op);
        request
            .group_mut(TAG_OPERATION_ATTRIBUTES)
            .integer("job-id", job_id);
        request
    }

    /// Device request carrying `output-device-uuid`.
    pub fn device_request(op: u16, uuid: &str) -> IppMessage {
        let mut request = request(op);
        request
            .group_mut(TAG_OPERATION_ATTRIBUTES)
            .uri("output-device-uuid", uuid);
        request
    }

    pub fn send(printer: &Arc<Printer>, request: &IppMessage) -> IppMessage {
        process_request(printer, request, None, "test")
    }

    pub fn send_as_proxy(printer: &Arc<Printer>, request: &IppMessage) -> IppMessage {
        let credentials = Some((PROXY_USER.to_string(), PROXY_PASSWORD.to_string()));
        process_request(printer, request, credentials, "test")
    }

    pub fn status_message(response: &IppMessage) -> Option<&str> {
        response
            .find_in(TAG_OPERATION_ATTRIBUTES, "status-message")
            .and_then(IppAttribute::as_str)
    }

    pub const PDF: &[u8] = b"%PDF-1.7\n%test document\n";

    /// Print-Job of a small PDF owned by `user`.
    pub fn print_request(user: &str) -> IppMessage {
        let mut request = request(OP_PRINT_JOB);
        request
            .group_mut(TAG_OPERATION_ATTRIBUTES)
            .name_attr("requesting-user-name", user)
            .name_attr("job-name", "report");
        request.data = PDF.to_vec();
        request
    }

    /// `job-id` from a job creation response.
    pub fn job_id(response: &IppMessage) -> i32 {
        response
            .find_in(crate::codec::TAG_JOB_ATTRIBUTES, "job-id")
            .and_then(IppAttribute::as_integer)
            .expect("job-id in response")
    }

    pub fn wait_for_state(job: &Job, state: infraprint_core::types::JobState) {
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while job.state() != state {
            assert!(std::time::Instant::now() < deadline, "job {} stuck in {}", job.id, job.state());
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
    }

    /// Print a job and wait until it is STOPPED and fetchable.
    pub fn fetchable_job(printer: &Arc<Printer>, user: &str) -> Arc<Job> {
        let response = send(printer, &print_request(user));
        assert_eq!(response.status_code(), STATUS_OK, "{:?}", status_message(&response));
        let job = printer.job(job_id(&response)).expect("job exists");
        wait_for_state(&job, infraprint_core::types::JobState::Stopped);
        job
    }
}
