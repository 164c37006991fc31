// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error handling facilities for the control plane
//!
//! For HTTP-level error handling, see Dropshot.

use dropshot::HttpError;
use serde::Deserialize;
use serde::Serialize;
use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FormatResult;

use crate::model::ServerId;
use crate::model::SpotRequestId;

/// An error that can be generated within a control plane component
///
/// These may be generated while handling a client request or as part of a
/// background operation.  When generated as part of an HTTP request, an
/// `Error` will be converted into an HTTP error as one of the last steps in
/// processing the request.  This allows most of the system to remain agnostic
/// to the transport with which the system communicates with clients.
///
/// Where possible, we reuse existing variants rather than inventing new ones
/// to distinguish cases that no programmatic consumer needs to distinguish.
#[derive(Clone, Debug, Deserialize, thiserror::Error, PartialEq, Serialize)]
pub enum Error {
    /// An object needed as part of this operation was not found.
    #[error("Object (of type {type_name:?}) not found: {lookup_type:?}")]
    ObjectNotFound { type_name: ResourceType, lookup_type: LookupType },
    /// An object already exists with the specified identifier.
    #[error("Object (of type {type_name:?}) already exists: {object_name}")]
    ObjectAlreadyExists { type_name: ResourceType, object_name: String },
    /// The request was well-formed, but the operation cannot be completed
    /// given the current state of the system.
    #[error("Invalid Request: {message}")]
    InvalidRequest { message: String },
    /// The specified input field is not valid.
    #[error("Invalid Value: {label}, {message}")]
    InvalidValue { label: String, message: String },
    /// The system encountered an unhandled operational error.
    #[error("Internal Error: {internal_message}")]
    InternalError { internal_message: String },
    /// The system (or part of it) is unavailable.
    #[error("Service Unavailable: {internal_message}")]
    ServiceUnavailable { internal_message: String },
}

/// Identifies a type of resource managed by the control plane
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub enum ResourceType {
    Server,
    SpotRequest,
    Instance,
}

impl Display for ResourceType {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        write!(f, "{}", match self {
            ResourceType::Server => "server",
            ResourceType::SpotRequest => "spot request",
            ResourceType::Instance => "instance",
        })
    }
}

/// Indicates how an object was looked up (for an `ObjectNotFound` error)
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum LookupType {
    /// a specific server id was requested
    ById(ServerId),
    /// a specific capacity request id was requested
    ByRequestId(SpotRequestId),
    /// some other identifier was requested (caller summarizes it)
    ByCompositeId(String),
}

impl Error {
    /// Returns whether the error is likely transient and could reasonably be
    /// retried
    pub fn retryable(&self) -> bool {
        match self {
            Error::ServiceUnavailable { .. } => true,

            Error::ObjectNotFound { .. }
            | Error::ObjectAlreadyExists { .. }
            | Error::InvalidRequest { .. }
            | Error::InvalidValue { .. }
            | Error::InternalError { .. } => false,
        }
    }

    /// Generates an [`Error::ObjectNotFound`] error for a lookup by id.
    pub fn not_found_by_id(type_name: ResourceType, id: ServerId) -> Error {
        Error::ObjectNotFound { type_name, lookup_type: LookupType::ById(id) }
    }

    /// Generates an [`Error::InternalError`] error with the specific message
    ///
    /// InternalError should be used for operational conditions that should not
    /// happen but that we cannot reasonably handle at runtime (e.g., finding
    /// two acknowledgments for a request that is supposed to produce one).
    pub fn internal_error(internal_message: &str) -> Error {
        Error::InternalError { internal_message: internal_message.to_owned() }
    }

    /// Generates an [`Error::InvalidRequest`] error with the specific message
    ///
    /// This should be used for failures due possibly to invalid client input
    /// or an operation that is not valid in the system's current state.
    pub fn invalid_request(message: &str) -> Error {
        Error::InvalidRequest { message: message.to_owned() }
    }

    /// Generates an [`Error::ServiceUnavailable`] error with the specific
    /// message
    ///
    /// This should be used for transient failures where the caller might be
    /// expected to retry.  Logic errors or other problems indicating that a
    /// retry would not work should probably be an InternalError (if it's a
    /// server problem) or InvalidRequest (if it's a client problem) instead.
    pub fn unavail(message: &str) -> Error {
        Error::ServiceUnavailable { internal_message: message.to_owned() }
    }
}

impl From<Error> for HttpError {
    /// Converts an `Error` into an `HttpError`.  This defines how errors that
    /// are represented internally using `Error` are ultimately exposed to
    /// clients over HTTP.
    fn from(error: Error) -> HttpError {
        match error {
            Error::ObjectNotFound { type_name: t, lookup_type: lt } => {
                let (lookup_field, lookup_value) = match lt {
                    LookupType::ById(id) => ("id", id.to_string()),
                    LookupType::ByRequestId(id) => ("request id", id.to_string()),
                    LookupType::ByCompositeId(label) => ("id", label),
                };
                let message = format!(
                    "not found: {} with {} \"{}\"",
                    t, lookup_field, lookup_value
                );
                HttpError::for_client_error(
                    Some(String::from("ObjectNotFound")),
                    http::StatusCode::NOT_FOUND,
                    message,
                )
            }

            Error::ObjectAlreadyExists { type_name: t, object_name: n } => {
                let message = format!("already exists: {} \"{}\"", t, n);
                HttpError::for_bad_request(
                    Some(String::from("ObjectAlreadyExists")),
                    message,
                )
            }

            Error::InvalidRequest { message } => HttpError::for_bad_request(
                Some(String::from("InvalidRequest")),
                message,
            ),

            Error::InvalidValue { label, message } => {
                let message =
                    format!("unsupported value for \"{}\": {}", label, message);
                HttpError::for_bad_request(
                    Some(String::from("InvalidValue")),
                    message,
                )
            }

            Error::InternalError { internal_message } => {
                HttpError::for_internal_error(internal_message)
            }

            Error::ServiceUnavailable { internal_message } => {
                HttpError::for_unavail(
                    Some(String::from("ServiceNotAvailable")),
                    internal_message,
                )
            }
        }
    }
}
