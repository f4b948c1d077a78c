// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// IPP binary message codec (RFC 8010 SS3).
//
// A message is a fixed 8-byte header followed by delimited attribute groups,
// the end-of-attributes tag, and optional document data:
//
// ```text
// version-number:  2 bytes (major, minor)
// operation-id:    2 bytes (status-code in responses)
// request-id:      4 bytes
// attribute-groups: variable
//   delimiter-tag: 1 byte
//   attributes:    value-tag, name-length, name, value-length, value
// end-of-attributes-tag: 1 byte (0x03)
// document-data: remainder
// ```
//
// Additional values of a 1setOf attribute carry a zero-length name.  Collection
// members are written as memberAttrName values between begCollection and
// endCollection and may nest.

use chrono::{DateTime, Datelike, Timelike, Utc};

use infraprint_core::error::{InfraError, Result};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Version written into messages this server originates.
pub const IPP_VERSION_MAJOR: u8 = 0x02;

/// Minor version written into messages this server originates.
pub const IPP_VERSION_MINOR: u8 = 0x00;

/// Deepest collection nesting accepted by the parser.
const MAX_COLLECTION_DEPTH: usize = 16;

// ---------------------------------------------------------------------------
// Delimiter tags (RFC 8010 SS3.5.1)
// ---------------------------------------------------------------------------

pub const TAG_OPERATION_ATTRIBUTES: u8 = 0x01;
pub const TAG_JOB_ATTRIBUTES: u8 = 0x02;
pub const TAG_END_OF_ATTRIBUTES: u8 = 0x03;
pub const TAG_PRINTER_ATTRIBUTES: u8 = 0x04;
pub const TAG_UNSUPPORTED_ATTRIBUTES: u8 = 0x05;
pub const TAG_SUBSCRIPTION_ATTRIBUTES: u8 = 0x06;
pub const TAG_EVENT_NOTIFICATION_ATTRIBUTES: u8 = 0x07;
pub const TAG_DOCUMENT_ATTRIBUTES: u8 = 0x09;

/// Highest delimiter tag value; everything above is a value tag.
const MAX_DELIMITER_TAG: u8 = 0x0F;

// ---------------------------------------------------------------------------
// Value tags (RFC 8010 SS3.5.2)
// ---------------------------------------------------------------------------

/// Out-of-band: attribute not supported by the sender.
pub const VALUE_TAG_UNSUPPORTED: u8 = 0x10;
/// Out-of-band: value unknown.
pub const VALUE_TAG_UNKNOWN: u8 = 0x12;
/// Out-of-band: attribute has no value.
pub const VALUE_TAG_NO_VALUE: u8 = 0x13;
/// Out-of-band: attribute cannot be set.
pub const VALUE_TAG_NOT_SETTABLE: u8 = 0x15;
/// Out-of-band: remove the attribute (RFC 3380).
pub const VALUE_TAG_DELETE_ATTRIBUTE: u8 = 0x16;
/// Out-of-band: administrator-defined value.
pub const VALUE_TAG_ADMIN_DEFINE: u8 = 0x17;

/// Integer value (4 bytes, signed big-endian).
pub const VALUE_TAG_INTEGER: u8 = 0x21;
/// Boolean value (1 byte).
pub const VALUE_TAG_BOOLEAN: u8 = 0x22;
/// Enum value (same encoding as integer).
pub const VALUE_TAG_ENUM: u8 = 0x23;

pub const VALUE_TAG_OCTET_STRING: u8 = 0x30;
/// RFC 2579 DateAndTime, 11 octets.
pub const VALUE_TAG_DATE_TIME: u8 = 0x31;
/// Two integers and a units byte.
pub const VALUE_TAG_RESOLUTION: u8 = 0x32;
/// Lower and upper bound, two integers.
pub const VALUE_TAG_RANGE_OF_INTEGER: u8 = 0x33;
pub const VALUE_TAG_BEG_COLLECTION: u8 = 0x34;
pub const VALUE_TAG_TEXT_WITH_LANGUAGE: u8 = 0x35;
pub const VALUE_TAG_NAME_WITH_LANGUAGE: u8 = 0x36;
pub const VALUE_TAG_END_COLLECTION: u8 = 0x37;

pub const VALUE_TAG_TEXT: u8 = 0x41;
pub const VALUE_TAG_NAME: u8 = 0x42;
pub const VALUE_TAG_KEYWORD: u8 = 0x44;
pub const VALUE_TAG_URI: u8 = 0x45;
pub const VALUE_TAG_URI_SCHEME: u8 = 0x46;
pub const VALUE_TAG_CHARSET: u8 = 0x47;
pub const VALUE_TAG_NATURAL_LANGUAGE: u8 = 0x48;
pub const VALUE_TAG_MIME_TYPE: u8 = 0x49;
pub const VALUE_TAG_MEMBER_NAME: u8 = 0x4A;

// ---------------------------------------------------------------------------
// Operation identifiers (RFC 8011, RFC 3995, RFC 3996, PWG 5100.5/5100.13/5100.18)
// ---------------------------------------------------------------------------

pub const OP_PRINT_JOB: u16 = 0x0002;
pub const OP_PRINT_URI: u16 = 0x0003;
pub const OP_VALIDATE_JOB: u16 = 0x0004;
pub const OP_CREATE_JOB: u16 = 0x0005;
pub const OP_SEND_DOCUMENT: u16 = 0x0006;
pub const OP_SEND_URI: u16 = 0x0007;
pub const OP_CANCEL_JOB: u16 = 0x0008;
pub const OP_GET_JOB_ATTRIBUTES: u16 = 0x0009;
pub const OP_GET_JOBS: u16 = 0x000A;
pub const OP_GET_PRINTER_ATTRIBUTES: u16 = 0x000B;
pub const OP_CREATE_PRINTER_SUBSCRIPTIONS: u16 = 0x0016;
pub const OP_CREATE_JOB_SUBSCRIPTIONS: u16 = 0x0017;
pub const OP_GET_SUBSCRIPTION_ATTRIBUTES: u16 = 0x0018;
pub const OP_GET_SUBSCRIPTIONS: u16 = 0x0019;
pub const OP_RENEW_SUBSCRIPTION: u16 = 0x001A;
pub const OP_CANCEL_SUBSCRIPTION: u16 = 0x001B;
pub const OP_GET_NOTIFICATIONS: u16 = 0x001C;
pub const OP_GET_PRINTER_SUPPORTED_VALUES: u16 = 0x0027;
pub const OP_GET_DOCUMENT_ATTRIBUTES: u16 = 0x0034;
pub const OP_GET_DOCUMENTS: u16 = 0x0035;
pub const OP_CANCEL_MY_JOBS: u16 = 0x0039;
pub const OP_CLOSE_JOB: u16 = 0x003B;
pub const OP_IDENTIFY_PRINTER: u16 = 0x003C;
pub const OP_VALIDATE_DOCUMENT: u16 = 0x003D;
pub const OP_ACKNOWLEDGE_DOCUMENT: u16 = 0x003F;
pub const OP_ACKNOWLEDGE_IDENTIFY_PRINTER: u16 = 0x0040;
pub const OP_ACKNOWLEDGE_JOB: u16 = 0x0041;
pub const OP_FETCH_DOCUMENT: u16 = 0x0042;
pub const OP_FETCH_JOB: u16 = 0x0043;
pub const OP_GET_OUTPUT_DEVICE_ATTRIBUTES: u16 = 0x0044;
pub const OP_UPDATE_ACTIVE_JOBS: u16 = 0x0045;
pub const OP_UPDATE_DOCUMENT_STATUS: u16 = 0x0047;
pub const OP_UPDATE_JOB_STATUS: u16 = 0x0048;
pub const OP_UPDATE_OUTPUT_DEVICE_ATTRIBUTES: u16 = 0x0049;
pub const OP_DEREGISTER_OUTPUT_DEVICE: u16 = 0x204B;

// ---------------------------------------------------------------------------
// Status codes (RFC 8011 SS4.1.8 and extensions)
// ---------------------------------------------------------------------------

pub const STATUS_OK: u16 = 0x0000;
pub const STATUS_OK_IGNORED_SUBSCRIPTIONS: u16 = 0x0003;

pub const STATUS_CLIENT_ERROR_BAD_REQUEST: u16 = 0x0400;
pub const STATUS_CLIENT_ERROR_NOT_AUTHENTICATED: u16 = 0x0402;
pub const STATUS_CLIENT_ERROR_NOT_AUTHORIZED: u16 = 0x0403;
pub const STATUS_CLIENT_ERROR_NOT_POSSIBLE: u16 = 0x0404;
pub const STATUS_CLIENT_ERROR_NOT_FOUND: u16 = 0x0406;
pub const STATUS_CLIENT_ERROR_DOCUMENT_FORMAT_NOT_SUPPORTED: u16 = 0x040A;
pub const STATUS_CLIENT_ERROR_ATTRIBUTES_OR_VALUES: u16 = 0x040B;
pub const STATUS_CLIENT_ERROR_URI_SCHEME: u16 = 0x040C;
pub const STATUS_CLIENT_ERROR_CHARSET: u16 = 0x040D;
pub const STATUS_CLIENT_ERROR_COMPRESSION_NOT_SUPPORTED: u16 = 0x040F;
pub const STATUS_CLIENT_ERROR_DOCUMENT_ACCESS: u16 = 0x0412;
pub const STATUS_CLIENT_ERROR_IGNORED_ALL_SUBSCRIPTIONS: u16 = 0x0414;
/// Private extension: the job or document is not (yet) fetchable.
pub const STATUS_CLIENT_ERROR_NOT_FETCHABLE: u16 = 0x0420;

pub const STATUS_SERVER_ERROR_INTERNAL: u16 = 0x0500;
pub const STATUS_SERVER_ERROR_OPERATION_NOT_SUPPORTED: u16 = 0x0501;
pub const STATUS_SERVER_ERROR_VERSION_NOT_SUPPORTED: u16 = 0x0503;
pub const STATUS_SERVER_ERROR_BUSY: u16 = 0x0507;
pub const STATUS_SERVER_ERROR_MULTIPLE_DOCUMENT_JOBS: u16 = 0x0509;
pub const STATUS_SERVER_ERROR_TOO_MANY_JOBS: u16 = 0x050B;

/// Human-readable name of a status code, for logs.
pub fn status_name(status: u16) -> &'static str {
    match status {
        STATUS_OK => "successful-ok",
        STATUS_OK_IGNORED_SUBSCRIPTIONS => "successful-ok-ignored-subscriptions",
        STATUS_CLIENT_ERROR_BAD_REQUEST => "client-error-bad-request",
        STATUS_CLIENT_ERROR_NOT_AUTHENTICATED => "client-error-not-authenticated",
        STATUS_CLIENT_ERROR_NOT_AUTHORIZED => "client-error-not-authorized",
        STATUS_CLIENT_ERROR_NOT_POSSIBLE => "client-error-not-possible",
        STATUS_CLIENT_ERROR_NOT_FOUND => "client-error-not-found",
        STATUS_CLIENT_ERROR_DOCUMENT_FORMAT_NOT_SUPPORTED => {
            "client-error-document-format-not-supported"
        }
        STATUS_CLIENT_ERROR_ATTRIBUTES_OR_VALUES => {
            "client-error-attributes-or-values-not-supported"
        }
        STATUS_CLIENT_ERROR_URI_SCHEME => "client-error-uri-scheme-not-supported",
        STATUS_CLIENT_ERROR_CHARSET => "client-error-charset-not-supported",
        STATUS_CLIENT_ERROR_COMPRESSION_NOT_SUPPORTED => "client-error-compression-not-supported",
        STATUS_CLIENT_ERROR_DOCUMENT_ACCESS => "client-error-document-access-error",
        STATUS_CLIENT_ERROR_IGNORED_ALL_SUBSCRIPTIONS => "client-error-ignored-all-subscriptions",
        STATUS_CLIENT_ERROR_NOT_FETCHABLE => "client-error-not-fetchable",
        STATUS_SERVER_ERROR_INTERNAL => "server-error-internal-error",
        STATUS_SERVER_ERROR_OPERATION_NOT_SUPPORTED => "server-error-operation-not-supported",
        STATUS_SERVER_ERROR_VERSION_NOT_SUPPORTED => "server-error-version-not-supported",
        STATUS_SERVER_ERROR_BUSY => "server-error-busy",
        STATUS_SERVER_ERROR_MULTIPLE_DOCUMENT_JOBS => {
            "server-error-multiple-document-jobs-not-supported"
        }
        STATUS_SERVER_ERROR_TOO_MANY_JOBS => "server-error-too-many-jobs",
        _ => "unknown-status",
    }
}

/// Operation name as spelled in `operations-supported` documentation.
pub fn operation_name(op: u16) -> &'static str {
    match op {
        OP_PRINT_JOB => "Print-Job",
        OP_PRINT_URI => "Print-URI",
        OP_VALIDATE_JOB => "Validate-Job",
        OP_CREATE_JOB => "Create-Job",
        OP_SEND_DOCUMENT => "Send-Document",
        OP_SEND_URI => "Send-URI",
        OP_CANCEL_JOB => "Cancel-Job",
        OP_GET_JOB_ATTRIBUTES => "Get-Job-Attributes",
        OP_GET_JOBS => "Get-Jobs",
        OP_GET_PRINTER_ATTRIBUTES => "Get-Printer-Attributes",
        OP_CREATE_PRINTER_SUBSCRIPTIONS => "Create-Printer-Subscriptions",
        OP_CREATE_JOB_SUBSCRIPTIONS => "Create-Job-Subscriptions",
        OP_GET_SUBSCRIPTION_ATTRIBUTES => "Get-Subscription-Attributes",
        OP_GET_SUBSCRIPTIONS => "Get-Subscriptions",
        OP_RENEW_SUBSCRIPTION => "Renew-Subscription",
        OP_CANCEL_SUBSCRIPTION => "Cancel-Subscription",
        OP_GET_NOTIFICATIONS => "Get-Notifications",
        OP_GET_PRINTER_SUPPORTED_VALUES => "Get-Printer-Supported-Values",
        OP_GET_DOCUMENT_ATTRIBUTES => "Get-Document-Attributes",
        OP_GET_DOCUMENTS => "Get-Documents",
        OP_CANCEL_MY_JOBS => "Cancel-My-Jobs",
        OP_CLOSE_JOB => "Close-Job",
        OP_IDENTIFY_PRINTER => "Identify-Printer",
        OP_VALIDATE_DOCUMENT => "Validate-Document",
        OP_ACKNOWLEDGE_DOCUMENT => "Acknowledge-Document",
        OP_ACKNOWLEDGE_IDENTIFY_PRINTER => "Acknowledge-Identify-Printer",
        OP_ACKNOWLEDGE_JOB => "Acknowledge-Job",
        OP_FETCH_DOCUMENT => "Fetch-Document",
        OP_FETCH_JOB => "Fetch-Job",
        OP_GET_OUTPUT_DEVICE_ATTRIBUTES => "Get-Output-Device-Attributes",
        OP_UPDATE_ACTIVE_JOBS => "Update-Active-Jobs",
        OP_UPDATE_DOCUMENT_STATUS => "Update-Document-Status",
        OP_UPDATE_JOB_STATUS => "Update-Job-Status",
        OP_UPDATE_OUTPUT_DEVICE_ATTRIBUTES => "Update-Output-Device-Attributes",
        OP_DEREGISTER_OUTPUT_DEVICE => "Deregister-Output-Device",
        _ => "unknown-operation",
    }
}

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// A single typed attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum IppValue {
    Integer(i32),
    Boolean(bool),
    Enum(i32),
    OctetString(Vec<u8>),
    /// Raw RFC 2579 DateAndTime octets.
    DateTime([u8; 11]),
    Resolution { xres: i32, yres: i32, units: u8 },
    Range { lower: i32, upper: i32 },
    Collection(Vec<IppAttribute>),
    /// The string family: text, name, keyword, uri, uriScheme, charset,
    /// naturalLanguage, mimeMediaType and memberAttrName.
    Str { tag: u8, value: String },
    /// textWithLanguage / nameWithLanguage.
    WithLanguage { tag: u8, language: String, value: String },
    /// Value-less out-of-band marker (no-value, unknown, delete-attribute, ...).
    OutOfBand(u8),
    /// A tag this codec does not interpret, preserved verbatim.
    Unknown { tag: u8, data: Vec<u8> },
}

impl IppValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Str { tag: VALUE_TAG_TEXT, value: value.into() }
    }

    pub fn name(value: impl Into<String>) -> Self {
        Self::Str { tag: VALUE_TAG_NAME, value: value.into() }
    }

    pub fn keyword(value: impl Into<String>) -> Self {
        Self::Str { tag: VALUE_TAG_KEYWORD, value: value.into() }
    }

    pub fn uri(value: impl Into<String>) -> Self {
        Self::Str { tag: VALUE_TAG_URI, value: value.into() }
    }

    pub fn uri_scheme(value: impl Into<String>) -> Self {
        Self::Str { tag: VALUE_TAG_URI_SCHEME, value: value.into() }
    }

    pub fn charset(value: impl Into<String>) -> Self {
        Self::Str { tag: VALUE_TAG_CHARSET, value: value.into() }
    }

    pub fn language(value: impl Into<String>) -> Self {
        Self::Str { tag: VALUE_TAG_NATURAL_LANGUAGE, value: value.into() }
    }

    pub fn mime_type(value: impl Into<String>) -> Self {
        Self::Str { tag: VALUE_TAG_MIME_TYPE, value: value.into() }
    }

    /// Encode a UTC timestamp as a DateAndTime value.
    pub fn date_time(time: DateTime<Utc>) -> Self {
        let year = u16::try_from(time.year()).unwrap_or(0).to_be_bytes();
        let deci = u8::try_from(time.nanosecond() / 100_000_000).unwrap_or(0).min(9);
        Self::DateTime([
            year[0],
            year[1],
            time.month() as u8,
            time.day() as u8,
            time.hour() as u8,
            time.minute() as u8,
            time.second().min(60) as u8,
            deci,
            b'+',
            0,
            0,
        ])
    }

    /// The wire value tag.
    pub fn tag(&self) -> u8 {
        match self {
            Self::Integer(_) => VALUE_TAG_INTEGER,
            Self::Boolean(_) => VALUE_TAG_BOOLEAN,
            Self::Enum(_) => VALUE_TAG_ENUM,
            Self::OctetString(_) => VALUE_TAG_OCTET_STRING,
            Self::DateTime(_) => VALUE_TAG_DATE_TIME,
            Self::Resolution { .. } => VALUE_TAG_RESOLUTION,
            Self::Range { .. } => VALUE_TAG_RANGE_OF_INTEGER,
            Self::Collection(_) => VALUE_TAG_BEG_COLLECTION,
            Self::Str { tag, .. } | Self::WithLanguage { tag, .. } => *tag,
            Self::OutOfBand(tag) => *tag,
            Self::Unknown { tag, .. } => *tag,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str { value, .. } | Self::WithLanguage { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Integer or enum payload.
    pub fn as_integer(&self) -> Option<i32> {
        match self {
            Self::Integer(v) | Self::Enum(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_out_of_band(&self) -> bool {
        matches!(self, Self::OutOfBand(_))
    }
}

/// Syntax name of a value tag, as used in status messages.
pub fn tag_name(tag: u8) -> &'static str {
    match tag {
        VALUE_TAG_UNSUPPORTED => "unsupported",
        VALUE_TAG_UNKNOWN => "unknown",
        VALUE_TAG_NO_VALUE => "no-value",
        VALUE_TAG_NOT_SETTABLE => "not-settable",
        VALUE_TAG_DELETE_ATTRIBUTE => "deleteAttribute",
        VALUE_TAG_ADMIN_DEFINE => "admin-define",
        VALUE_TAG_INTEGER => "integer",
        VALUE_TAG_BOOLEAN => "boolean",
        VALUE_TAG_ENUM => "enum",
        VALUE_TAG_OCTET_STRING => "octetString",
        VALUE_TAG_DATE_TIME => "dateTime",
        VALUE_TAG_RESOLUTION => "resolution",
        VALUE_TAG_RANGE_OF_INTEGER => "rangeOfInteger",
        VALUE_TAG_BEG_COLLECTION => "collection",
        VALUE_TAG_TEXT_WITH_LANGUAGE => "textWithLanguage",
        VALUE_TAG_NAME_WITH_LANGUAGE => "nameWithLanguage",
        VALUE_TAG_TEXT => "textWithoutLanguage",
        VALUE_TAG_NAME => "nameWithoutLanguage",
        VALUE_TAG_KEYWORD => "keyword",
        VALUE_TAG_URI => "uri",
        VALUE_TAG_URI_SCHEME => "uriScheme",
        VALUE_TAG_CHARSET => "charset",
        VALUE_TAG_NATURAL_LANGUAGE => "naturalLanguage",
        VALUE_TAG_MIME_TYPE => "mimeMediaType",
        VALUE_TAG_MEMBER_NAME => "memberAttrName",
        _ => "unknown",
    }
}

// ---------------------------------------------------------------------------
// Attributes and groups
// ---------------------------------------------------------------------------

/// A named attribute with one or more values.
#[derive(Debug, Clone, PartialEq)]
pub struct IppAttribute {
    pub name: String,
    pub values: Vec<IppValue>,
}

impl IppAttribute {
    pub fn new(name: impl Into<String>, value: IppValue) -> Self {
        Self { name: name.into(), values: vec![value] }
    }

    pub fn with_values(name: impl Into<String>, values: Vec<IppValue>) -> Self {
        Self { name: name.into(), values }
    }

    /// Tag of the first value (`no-value` for an empty attribute).
    pub fn value_tag(&self) -> u8 {
        self.values.first().map(IppValue::tag).unwrap_or(VALUE_TAG_NO_VALUE)
    }

    pub fn count(&self) -> usize {
        self.values.len()
    }

    pub fn first(&self) -> Option<&IppValue> {
        self.values.first()
    }

    pub fn as_str(&self) -> Option<&str> {
        self.first().and_then(IppValue::as_str)
    }

    pub fn as_integer(&self) -> Option<i32> {
        self.first().and_then(IppValue::as_integer)
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.first().and_then(IppValue::as_bool)
    }

    pub fn strings(&self) -> impl Iterator<Item = &str> {
        self.values.iter().filter_map(IppValue::as_str)
    }

    pub fn integers(&self) -> impl Iterator<Item = i32> + '_ {
        self.values.iter().filter_map(IppValue::as_integer)
    }

    /// Every value carries `tag`.
    pub fn all_tagged(&self, tag: u8) -> bool {
        !self.values.is_empty() && self.values.iter().all(|v| v.tag() == tag)
    }

    /// Single value with the given tag.
    pub fn is_single(&self, tag: u8) -> bool {
        self.values.len() == 1 && self.value_tag() == tag
    }
}

/// A group of attributes delimited by a group tag.
#[derive(Debug, Clone, PartialEq)]
pub struct IppAttributeGroup {
    /// The delimiter tag for this group (0x01, 0x02, 0x04, etc.).
    pub tag: u8,
    /// Ordered list of attributes within the group.
    pub attributes: Vec<IppAttribute>,
}

impl IppAttributeGroup {
    pub fn new(tag: u8) -> Self {
        Self { tag, attributes: Vec::new() }
    }

    /// Find the first attribute with the given name.
    pub fn get(&self, name: &str) -> Option<&IppAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Read the first attribute with the given name as a string.
    pub fn get_string(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(IppAttribute::as_str)
    }

    /// Read the first attribute with the given name as an integer or enum.
    pub fn get_integer(&self, name: &str) -> Option<i32> {
        self.get(name).and_then(IppAttribute::as_integer)
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Append an attribute.
    pub fn add(&mut self, attr: IppAttribute) -> &mut Self {
        self.attributes.push(attr);
        self
    }

    /// Replace an attribute of the same name, or append it.
    pub fn set(&mut self, attr: IppAttribute) -> &mut Self {
        match self.attributes.iter_mut().find(|a| a.name == attr.name) {
            Some(existing) => *existing = attr,
            None => self.attributes.push(attr),
        }
        self
    }

    /// Remove every attribute with the given name.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.attributes.len();
        self.attributes.retain(|a| a.name != name);
        before != self.attributes.len()
    }

    pub fn value(&mut self, name: &str, value: IppValue) -> &mut Self {
        self.add(IppAttribute::new(name, value))
    }

    pub fn text(&mut self, name: &str, value: &str) -> &mut Self {
        self.value(name, IppValue::text(value))
    }

    pub fn name_attr(&mut self, name: &str, value: &str) -> &mut Self {
        self.value(name, IppValue::name(value))
    }

    pub fn keyword(&mut self, name: &str, value: &str) -> &mut Self {
        self.value(name, IppValue::keyword(value))
    }

    /// 1setOf keyword.
    pub fn keywords<S: AsRef<str>>(&mut self, name: &str, values: &[S]) -> &mut Self {
        let values = values.iter().map(|v| IppValue::keyword(v.as_ref())).collect();
        self.add(IppAttribute::with_values(name, values))
    }

    pub fn uri(&mut self, name: &str, value: &str) -> &mut Self {
        self.value(name, IppValue::uri(value))
    }

    pub fn charset(&mut self, name: &str, value: &str) -> &mut Self {
        self.value(name, IppValue::charset(value))
    }

    pub fn natural_language(&mut self, name: &str, value: &str) -> &mut Self {
        self.value(name, IppValue::language(value))
    }

    pub fn mime_type(&mut self, name: &str, value: &str) -> &mut Self {
        self.value(name, IppValue::mime_type(value))
    }

    pub fn integer(&mut self, name: &str, value: i32) -> &mut Self {
        self.value(name, IppValue::Integer(value))
    }

    /// 1setOf integer.
    pub fn integers(&mut self, name: &str, values: &[i32]) -> &mut Self {
        let values = values.iter().map(|v| IppValue::Integer(*v)).collect();
        self.add(IppAttribute::with_values(name, values))
    }

    pub fn enum_attr(&mut self, name: &str, value: i32) -> &mut Self {
        self.value(name, IppValue::Enum(value))
    }

    /// 1setOf enum.
    pub fn enums(&mut self, name: &str, values: &[i32]) -> &mut Self {
        let values = values.iter().map(|v| IppValue::Enum(*v)).collect();
        self.add(IppAttribute::with_values(name, values))
    }

    pub fn boolean(&mut self, name: &str, value: bool) -> &mut Self {
        self.value(name, IppValue::Boolean(value))
    }

    pub fn range(&mut self, name: &str, lower: i32, upper: i32) -> &mut Self {
        self.value(name, IppValue::Range { lower, upper })
    }

    pub fn date_time(&mut self, name: &str, time: DateTime<Utc>) -> &mut Self {
        self.value(name, IppValue::date_time(time))
    }

    pub fn out_of_band(&mut self, name: &str, tag: u8) -> &mut Self {
        self.value(name, IppValue::OutOfBand(tag))
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A parsed or to-be-serialized IPP request or response.
#[derive(Debug, Clone, PartialEq)]
pub struct IppMessage {
    /// (major, minor).
    pub version: (u8, u8),
    /// Operation id in requests, status code in responses.
    pub code: u16,
    pub request_id: u32,
    pub groups: Vec<IppAttributeGroup>,
    /// Document data following the end-of-attributes tag.
    pub data: Vec<u8>,
}

impl IppMessage {
    /// A new request with the standard charset/language preamble.
    pub fn new_request(operation: u16, request_id: u32) -> Self {
        let mut message = Self::empty((IPP_VERSION_MAJOR, IPP_VERSION_MINOR), operation, request_id);
        message
            .begin_group(TAG_OPERATION_ATTRIBUTES)
            .charset("attributes-charset", "utf-8")
            .natural_language("attributes-natural-language", "en");
        message
    }

    /// A new response with the standard charset/language preamble.
    pub fn new_response(version: (u8, u8), status: u16, request_id: u32) -> Self {
        let mut message = Self::empty(version, status, request_id);
        message
            .begin_group(TAG_OPERATION_ATTRIBUTES)
            .charset("attributes-charset", "utf-8")
            .natural_language("attributes-natural-language", "en");
        message
    }

    fn empty(version: (u8, u8), code: u16, request_id: u32) -> Self {
        Self { version, code, request_id, groups: Vec::new(), data: Vec::new() }
    }

    pub fn operation_id(&self) -> u16 {
        self.code
    }

    pub fn status_code(&self) -> u16 {
        self.code
    }

    /// First group with the given tag.
    pub fn group(&self, tag: u8) -> Option<&IppAttributeGroup> {
        self.groups.iter().find(|g| g.tag == tag)
    }

    /// All groups with the given tag, in message order.
    pub fn groups_with(&self, tag: u8) -> impl Iterator<Item = &IppAttributeGroup> {
        self.groups.iter().filter(move |g| g.tag == tag)
    }

    pub fn operation_attributes(&self) -> Option<&IppAttributeGroup> {
        self.group(TAG_OPERATION_ATTRIBUTES)
    }

    /// Find an attribute anywhere in the message, with its group tag.
    pub fn find(&self, name: &str) -> Option<(u8, &IppAttribute)> {
        self.groups
            .iter()
            .find_map(|g| g.get(name).map(|attr| (g.tag, attr)))
    }

    /// Find an attribute in groups with the given tag.
    pub fn find_in(&self, tag: u8, name: &str) -> Option<&IppAttribute> {
        self.groups_with(tag).find_map(|g| g.get(name))
    }

    /// Iterate every attribute with its group tag.
    pub fn attributes(&self) -> impl Iterator<Item = (u8, &IppAttribute)> {
        self.groups
            .iter()
            .flat_map(|g| g.attributes.iter().map(move |a| (g.tag, a)))
    }

    /// Append a new group, even if the last group has the same tag.
    pub fn begin_group(&mut self, tag: u8) -> &mut IppAttributeGroup {
        self.groups.push(IppAttributeGroup::new(tag));
        let last = self.groups.len() - 1;
        &mut self.groups[last]
    }

    /// The last group if it has `tag`, else a freshly appended one.
    pub fn group_mut(&mut self, tag: u8) -> &mut IppAttributeGroup {
        if self.groups.last().is_none_or(|g| g.tag != tag) {
            self.groups.push(IppAttributeGroup::new(tag));
        }
        let last = self.groups.len() - 1;
        &mut self.groups[last]
    }

    /// Group tags never decrease across the message.
    pub fn groups_in_order(&self) -> bool {
        self.groups.windows(2).all(|w| w[0].tag <= w[1].tag)
    }

    /// Encode to the binary wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256 + self.data.len());
        buf.push(self.version.0);
        buf.push(self.version.1);
        buf.extend_from_slice(&self.code.to_be_bytes());
        buf.extend_from_slice(&self.request_id.to_be_bytes());
        for group in &self.groups {
            buf.push(group.tag);
            for attr in &group.attributes {
                write_attribute(&mut buf, attr);
            }
        }
        buf.push(TAG_END_OF_ATTRIBUTES);
        buf.extend_from_slice(&self.data);
        buf
    }
}

// ---------------------------------------------------------------------------
// Binary parser
// ---------------------------------------------------------------------------

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn u8(&mut self, what: &str) -> Result<u8> {
        let byte = *self
            .data
            .get(self.pos)
            .ok_or_else(|| truncated(what))?;
        self.pos += 1;
        Ok(byte)
    }

    fn u16(&mut self, what: &str) -> Result<u16> {
        let bytes = self.bytes(2, what)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn bytes(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        let end = self.pos + len;
        if end > self.data.len() {
            return Err(truncated(what));
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// One attribute header plus value: (value-tag, name, value).
    fn attribute(&mut self) -> Result<(u8, &'a [u8], &'a [u8])> {
        let tag = self.u8("value tag")?;
        let name_len = self.u16("name-length field")? as usize;
        let name = self.bytes(name_len, "attribute name")?;
        let value_len = self.u16("value-length field")? as usize;
        let value = self.bytes(value_len, "attribute value")?;
        Ok((tag, name, value))
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn rest(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }
}

fn truncated(what: &str) -> InfraError {
    InfraError::Protocol(format!("truncated {what}"))
}

/// Parse a complete IPP message.
///
/// Fails on truncated input, an attribute before any group tag, or a
/// missing end-of-attributes tag.  Version and group-order checks are left
/// to the caller so that it can answer with the proper status code.
pub fn parse(data: &[u8]) -> Result<IppMessage> {
    if data.len() < 9 {
        return Err(InfraError::Protocol(format!(
            "IPP message too short: {} bytes (minimum 9)",
            data.len()
        )));
    }

    let version = (data[0], data[1]);
    let code = u16::from_be_bytes([data[2], data[3]]);
    let request_id = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);

    let mut reader = Reader { data, pos: 8 };
    let mut groups: Vec<IppAttributeGroup> = Vec::new();

    loop {
        let tag = reader
            .peek()
            .ok_or_else(|| InfraError::Protocol("missing end-of-attributes tag".into()))?;

        if tag <= MAX_DELIMITER_TAG {
            reader.pos += 1;
            if tag == TAG_END_OF_ATTRIBUTES {
                break;
            }
            groups.push(IppAttributeGroup::new(tag));
            continue;
        }

        let (value_tag, name, raw) = reader.attribute()?;
        let value = if value_tag == VALUE_TAG_BEG_COLLECTION {
            IppValue::Collection(parse_collection(&mut reader, 1)?)
        } else {
            decode_value(value_tag, raw)?
        };

        let group = groups
            .last_mut()
            .ok_or_else(|| InfraError::Protocol("attribute outside of any group".into()))?;

        if name.is_empty() {
            let attr = group.attributes.last_mut().ok_or_else(|| {
                InfraError::Protocol("additional value without a preceding attribute".into())
            })?;
            attr.values.push(value);
        } else {
            let name = String::from_utf8_lossy(name).into_owned();
            group.attributes.push(IppAttribute::new(name, value));
        }
    }

    Ok(IppMessage {
        version,
        code,
        request_id,
        groups,
        data: reader.rest().to_vec(),
    })
}

fn parse_collection(reader: &mut Reader<'_>, depth: usize) -> Result<Vec<IppAttribute>> {
    if depth > MAX_COLLECTION_DEPTH {
        return Err(InfraError::Protocol("collection nested too deeply".into()));
    }

    let mut members: Vec<IppAttribute> = Vec::new();
    loop {
        if reader.peek().is_some_and(|t| t <= MAX_DELIMITER_TAG) {
            return Err(InfraError::Protocol("unterminated collection".into()));
        }

        let (tag, _, raw) = reader.attribute()?;
        match tag {
            VALUE_TAG_END_COLLECTION => return Ok(members),
            VALUE_TAG_MEMBER_NAME => {
                let name = String::from_utf8_lossy(raw).into_owned();
                members.push(IppAttribute::with_values(name, Vec::new()));
            }
            _ => {
                let value = if tag == VALUE_TAG_BEG_COLLECTION {
                    IppValue::Collection(parse_collection(reader, depth + 1)?)
                } else {
                    decode_value(tag, raw)?
                };
                let member = members.last_mut().ok_or_else(|| {
                    InfraError::Protocol("collection value without member name".into())
                })?;
                member.values.push(value);
            }
        }
    }
}

fn be_i32(raw: &[u8]) -> i32 {
    i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])
}

fn expect_len(tag: u8, raw: &[u8], len: usize) -> Result<()> {
    if raw.len() == len {
        Ok(())
    } else {
        Err(InfraError::Protocol(format!(
            "{} value has {} bytes, expected {len}",
            tag_name(tag),
            raw.len()
        )))
    }
}

fn decode_value(tag: u8, raw: &[u8]) -> Result<IppValue> {
    let value = match tag {
        VALUE_TAG_INTEGER => {
            expect_len(tag, raw, 4)?;
            IppValue::Integer(be_i32(raw))
        }
        VALUE_TAG_ENUM => {
            expect_len(tag, raw, 4)?;
            IppValue::Enum(be_i32(raw))
        }
        VALUE_TAG_BOOLEAN => {
            expect_len(tag, raw, 1)?;
            IppValue::Boolean(raw[0] != 0)
        }
        VALUE_TAG_DATE_TIME => {
            expect_len(tag, raw, 11)?;
            let mut octets = [0u8; 11];
            octets.copy_from_slice(raw);
            IppValue::DateTime(octets)
        }
        VALUE_TAG_RESOLUTION => {
            expect_len(tag, raw, 9)?;
            IppValue::Resolution {
                xres: be_i32(&raw[0..4]),
                yres: be_i32(&raw[4..8]),
                units: raw[8],
            }
        }
        VALUE_TAG_RANGE_OF_INTEGER => {
            expect_len(tag, raw, 8)?;
            IppValue::Range {
                lower: be_i32(&raw[0..4]),
                upper: be_i32(&raw[4..8]),
            }
        }
        VALUE_TAG_OCTET_STRING => IppValue::OctetString(raw.to_vec()),
        VALUE_TAG_TEXT_WITH_LANGUAGE | VALUE_TAG_NAME_WITH_LANGUAGE => {
            let mut inner = Reader { data: raw, pos: 0 };
            let lang_len = inner.u16("language length")? as usize;
            let language = inner.bytes(lang_len, "language")?;
            let text_len = inner.u16("text length")? as usize;
            let text = inner.bytes(text_len, "text")?;
            IppValue::WithLanguage {
                tag,
                language: String::from_utf8_lossy(language).into_owned(),
                value: String::from_utf8_lossy(text).into_owned(),
            }
        }
        VALUE_TAG_TEXT..=VALUE_TAG_MEMBER_NAME => IppValue::Str {
            tag,
            value: String::from_utf8_lossy(raw).into_owned(),
        },
        0x10..=0x1F => IppValue::OutOfBand(tag),
        _ => IppValue::Unknown { tag, data: raw.to_vec() },
    };
    Ok(value)
}

// ---------------------------------------------------------------------------
// Binary writer
// ---------------------------------------------------------------------------

fn write_attribute(buf: &mut Vec<u8>, attr: &IppAttribute) {
    if attr.values.is_empty() {
        write_raw(buf, VALUE_TAG_NO_VALUE, &attr.name, &[]);
        return;
    }
    for (i, value) in attr.values.iter().enumerate() {
        let name = if i == 0 { attr.name.as_str() } else { "" };
        write_value(buf, name, value);
    }
}

fn write_value(buf: &mut Vec<u8>, name: &str, value: &IppValue) {
    match value {
        IppValue::Collection(members) => {
            write_raw(buf, VALUE_TAG_BEG_COLLECTION, name, &[]);
            for member in members {
                write_raw(buf, VALUE_TAG_MEMBER_NAME, "", member.name.as_bytes());
                for member_value in &member.values {
                    write_value(buf, "", member_value);
                }
            }
            write_raw(buf, VALUE_TAG_END_COLLECTION, "", &[]);
        }
        IppValue::Integer(v) | IppValue::Enum(v) => {
            write_raw(buf, value.tag(), name, &v.to_be_bytes());
        }
        IppValue::Boolean(v) => write_raw(buf, VALUE_TAG_BOOLEAN, name, &[u8::from(*v)]),
        IppValue::OctetString(bytes) => write_raw(buf, VALUE_TAG_OCTET_STRING, name, bytes),
        IppValue::DateTime(octets) => write_raw(buf, VALUE_TAG_DATE_TIME, name, octets),
        IppValue::Resolution { xres, yres, units } => {
            let mut raw = Vec::with_capacity(9);
            raw.extend_from_slice(&xres.to_be_bytes());
            raw.extend_from_slice(&yres.to_be_bytes());
            raw.push(*units);
            write_raw(buf, VALUE_TAG_RESOLUTION, name, &raw);
        }
        IppValue::Range { lower, upper } => {
            let mut raw = Vec::with_capacity(8);
            raw.extend_from_slice(&lower.to_be_bytes());
            raw.extend_from_slice(&upper.to_be_bytes());
            write_raw(buf, VALUE_TAG_RANGE_OF_INTEGER, name, &raw);
        }
        IppValue::Str { tag, value } => write_raw(buf, *tag, name, value.as_bytes()),
        IppValue::WithLanguage { tag, language, value } => {
            let mut raw = Vec::with_capacity(4 + language.len() + value.len());
            push_len_prefixed(&mut raw, language.as_bytes());
            push_len_prefixed(&mut raw, value.as_bytes());
            write_raw(buf, *tag, name, &raw);
        }
        IppValue::OutOfBand(tag) => write_raw(buf, *tag, name, &[]),
        IppValue::Unknown { tag, data } => write_raw(buf, *tag, name, data),
    }
}

fn push_len_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) {
    let bytes = &bytes[..bytes.len().min(u16::MAX as usize)];
    buf.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    buf.extend_from_slice(bytes);
}

/// Write a raw attribute (value-tag, name, value bytes).  Oversized names and
/// values are truncated to the 16-bit length limit.
fn write_raw(buf: &mut Vec<u8>, value_tag: u8, name: &str, value: &[u8]) {
    buf.push(value_tag);
    push_len_prefixed(buf, name.as_bytes());
    push_len_prefixed(buf, value);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
