//! Topic shapes for the Hono MQTT adapter
//!
//! Every topic the device uses comes in two forms. An authenticated
//! connection carries the device identity, so tenant and device are left out
//! of the topic; an unauthenticated connection must spell them out.
//!
//! | Purpose          | Authenticated                   | Unauthenticated                          |
//! |------------------|---------------------------------|------------------------------------------|
//! | Telemetry        | `telemetry`                     | `telemetry/<tenant>/<device>`            |
//! | Event            | `event`                         | `event/<tenant>/<device>`                |
//! | Command filter   | `command/+/+/req/#`             | `command/<tenant>/<device>/req/#`        |
//! | Command response | `command///res/<req-id>/<code>` | `command/<tenant>/<device>/res/<req-id>/<code>` |
//!
//! The form is resolved once into a [`TopicTable`] when a session is built.

use std::fmt;

pub const TELEMETRY_ENDPOINT: &str = "telemetry";
pub const EVENT_ENDPOINT: &str = "event";
pub const COMMAND_ENDPOINT: &str = "command";

/// Whether the transport session proves the device identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Authenticated,
    Unauthenticated,
}

impl AuthMode {
    /// Credentials supplied means authenticated
    pub fn from_credentials(password: Option<&str>) -> Self {
        match password {
            Some(_) => AuthMode::Authenticated,
            None => AuthMode::Unauthenticated,
        }
    }

    pub fn is_authenticated(self) -> bool {
        matches!(self, AuthMode::Authenticated)
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::Authenticated => f.write_str("authenticated"),
            AuthMode::Unauthenticated => f.write_str("unauthenticated"),
        }
    }
}

/// Topic strings resolved for one tenant/device/auth-mode combination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicTable {
    auth_mode: AuthMode,
    telemetry: String,
    event: String,
    command_filter: String,
    response_prefix: String,
}

impl TopicTable {
    pub fn new(tenant_id: &str, device_id: &str, auth_mode: AuthMode) -> Self {
        match auth_mode {
            AuthMode::Authenticated => Self {
                auth_mode,
                telemetry: TELEMETRY_ENDPOINT.to_string(),
                event: EVENT_ENDPOINT.to_string(),
                command_filter: format!("{COMMAND_ENDPOINT}/+/+/req/#"),
                response_prefix: format!("{COMMAND_ENDPOINT}///res"),
            },
            AuthMode::Unauthenticated => Self {
                auth_mode,
                telemetry: format!("{TELEMETRY_ENDPOINT}/{tenant_id}/{device_id}"),
                event: format!("{EVENT_ENDPOINT}/{tenant_id}/{device_id}"),
                command_filter: format!("{COMMAND_ENDPOINT}/{tenant_id}/{device_id}/req/#"),
                response_prefix: format!("{COMMAND_ENDPOINT}/{tenant_id}/{device_id}/res"),
            },
        }
    }

    pub fn auth_mode(&self) -> AuthMode {
        self.auth_mode
    }

    pub fn telemetry(&self) -> &str {
        &self.telemetry
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    /// Subscription filter covering one-way and request/response commands
    pub fn command_filter(&self) -> &str {
        &self.command_filter
    }

    /// `<prefix>/<request-id>/<status>`
    pub fn command_response(&self, request_id: &str, status: u16) -> String {
        format!("{}/{request_id}/{status}", self.response_prefix)
    }
}

/// Build the topic a command response is published on
pub fn encode_response_topic(
    tenant_id: &str,
    device_id: &str,
    request_id: &str,
    status: u16,
    authenticated: bool,
) -> String {
    let auth_mode = if authenticated {
        AuthMode::Authenticated
    } else {
        AuthMode::Unauthenticated
    };
    TopicTable::new(tenant_id, device_id, auth_mode).command_response(request_id, status)
}
