//! Control-surface errors and the JSON reply shape.
//!
//! Every outcome, success or failure, becomes a [`Reply`]. OTP outcomes are
//! reported as a `status`; everything else as an `error` string.

use serde::Serialize;
use thiserror::Error;

use crate::client::ClientError;
use crate::runtime::RuntimeError;

/// Status strings returned in the `status` field.
pub mod status {
    pub const HOME: &str = "running ✅";
    pub const OTP_SENT: &str = "otp_sent";
    pub const ALREADY_LOGGED: &str = "already_logged";
    pub const SESSION_EXISTS: &str = "Session exists ✅";
    pub const LOGIN_SUCCESS: &str = "login_success ✅";
    pub const TWO_FACTOR_REQUIRED: &str = "2fa_required";
    pub const OTP_INVALID: &str = "otp_invalid ❌";
    pub const OTP_EXPIRED: &str = "otp_expired ❌";
    pub const REACTION_STARTED: &str = "reaction_started 🔥";
    pub const STOPPED: &str = "stopped ✅";
    pub const RUNNING: &str = "running 🔥";
    pub const OFFLINE: &str = "offline ❌";
    pub const REACTIONS_ENDED: &str = "Reactions ended, update stream closed";
}

#[derive(Error, Debug)]
pub enum ControlError {
    #[error("Session exists")]
    AlreadyLoggedIn,

    #[error("Start login first")]
    LoginNotStarted,

    #[error("Login required")]
    LoginRequired,

    #[error("The confirmation code is invalid")]
    OtpInvalid,

    #[error("The confirmation code has expired")]
    OtpExpired,

    #[error("Two-step verification password required")]
    TwoFactorRequired,

    #[error("Invalid numeric parameter {name}: {value:?}")]
    InvalidNumericParameter { name: &'static str, value: String },

    #[error("Invalid phone number: {0:?}")]
    InvalidPhone(String),

    #[error("Not running")]
    NotRunning,

    #[error("Reaction already running")]
    ReactionAlreadyRunning,

    #[error("Operation timed out")]
    Timeout,

    #[error("Execution context is closed")]
    ContextClosed,

    #[error("{0}")]
    Runtime(String),

    /// Client library failure, text passed through verbatim.
    #[error("{0}")]
    Client(String),
}

impl From<RuntimeError> for ControlError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Timeout => ControlError::Timeout,
            RuntimeError::Closed => ControlError::ContextClosed,
            other => ControlError::Runtime(other.to_string()),
        }
    }
}

impl From<ClientError> for ControlError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::OtpInvalid => ControlError::OtpInvalid,
            ClientError::OtpExpired => ControlError::OtpExpired,
            ClientError::TwoFactorRequired => ControlError::TwoFactorRequired,
            other => ControlError::Client(other.to_string()),
        }
    }
}

impl ControlError {
    /// Render this error the way the control API reports it.
    pub fn into_reply(self) -> Reply {
        match self {
            ControlError::AlreadyLoggedIn => {
                Reply::status(status::ALREADY_LOGGED).with_message(status::SESSION_EXISTS)
            }
            ControlError::OtpInvalid => Reply::status(status::OTP_INVALID),
            ControlError::OtpExpired => Reply::status(status::OTP_EXPIRED),
            ControlError::TwoFactorRequired => Reply::status(status::TWO_FACTOR_REQUIRED),
            other => Reply::error(other.to_string()),
        }
    }
}

/// Route templates listed by the index endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Routes {
    pub login_start: &'static str,
    pub login_otp: &'static str,
    pub login_password: &'static str,
    pub reaction_start: &'static str,
    pub reaction_stop: &'static str,
    pub reaction_status: &'static str,
}

impl Default for Routes {
    fn default() -> Self {
        Self {
            login_start: "/login/start/API_ID/API_HASH/PHONE",
            login_otp: "/login/otp/PHONE/OTP",
            login_password: "/login/password/PHONE/PASSWORD",
            reaction_start: "/react/start/PHONE/GROUP_ID/EMOJI",
            reaction_stop: "/react/stop/PHONE",
            reaction_status: "/react/status/PHONE",
        }
    }
}

/// JSON body returned by every control endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routes: Option<Routes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: Some(status.into()),
            message: None,
            phone: None,
            routes: None,
            error: None,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            status: None,
            message: None,
            phone: None,
            routes: None,
            error: Some(error.into()),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_routes(mut self, routes: Routes) -> Self {
        self.routes = Some(routes);
        self
    }
}

impl From<ControlError> for Reply {
    fn from(err: ControlError) -> Self {
        err.into_reply()
    }
}
