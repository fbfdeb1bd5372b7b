//! Outbound responses.
//!
//! The server answers every envelope with exactly one [`Response`]. Codes
//! below 400 are alerts and carry their text in `alert`; the rest are errors
//! and carry it in `error`.

use serde::{Deserialize, Serialize};

use crate::errors::{ProtocolError, Result};

/// Response codes emitted by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ResponseCode {
    /// Informational notice
    GeneralNotice = 100,
    /// Notice the client should act on
    ImportantNotice = 101,
    /// Request succeeded
    Ok = 200,
    /// Envelope or destination is malformed
    BadRequestOrObject = 400,
    /// Action requires authentication
    NotAuthorized = 401,
    /// Login name or password did not match
    IncorrectCredentials = 402,
    /// Sender lacks permission for the destination
    Forbidden = 403,
    /// Destination does not exist
    NotFound = 404,
    /// Membership to remove is not present
    Gone = 410,
    /// Server-side fault; the action was not applied
    ServerError = 500,
}

impl ResponseCode {
    /// Numeric wire value.
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Whether this code is an alert rather than an error.
    pub const fn is_alert(self) -> bool {
        self.as_u16() < 400
    }

    /// Look up a code by wire value.
    pub fn from_u16(code: u16) -> Option<Self> {
        Some(match code {
            100 => Self::GeneralNotice,
            101 => Self::ImportantNotice,
            200 => Self::Ok,
            400 => Self::BadRequestOrObject,
            401 => Self::NotAuthorized,
            402 => Self::IncorrectCredentials,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            410 => Self::Gone,
            500 => Self::ServerError,
            _ => return None,
        })
    }
}

/// One server response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Numeric response code
    pub response: u16,
    /// Server timestamp in unix seconds
    pub time: i64,
    /// Message for alert codes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<String>,
    /// Message for error codes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    /// Build a response, routing the message to `alert` or `error`.
    pub fn new(code: ResponseCode, time: i64, message: Option<String>) -> Self {
        let (alert, error) = if code.is_alert() { (message, None) } else { (None, message) };
        Self { response: code.as_u16(), time, alert, error }
    }

    /// Response with no message.
    pub fn bare(code: ResponseCode, time: i64) -> Self {
        Self::new(code, time, None)
    }

    /// Response with a message.
    pub fn with_message(code: ResponseCode, time: i64, message: impl Into<String>) -> Self {
        Self::new(code, time, Some(message.into()))
    }

    /// Typed response code, if the wire value is known.
    pub fn code(&self) -> Option<ResponseCode> {
        ResponseCode::from_u16(self.response)
    }

    /// Message text, whichever field carries it.
    pub fn message(&self) -> Option<&str> {
        self.alert.as_deref().or(self.error.as_deref())
    }

    /// Encode as a JSON frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Malformed` if serialization fails
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a JSON frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::Malformed` if the frame is not a response object
    pub fn decode(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw).map_err(ProtocolError::from)
    }
}
