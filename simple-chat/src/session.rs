//! Server-side protocol for one accepted connection.
//!
//! The first `#login <id>` frame binds the connection's identity. After that,
//! every frame is tagged with the identity and relayed to all connections,
//! the sender included. Any deviation (a second login, an id shorter than
//! three characters, chatting before logging in) earns the peer a one-line
//! notice and a closed connection.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    broadcast::Broadcaster,
    display::SharedDisplay,
    error::{MIN_IDENTITY_LEN, ProtocolViolation},
    frame::{LOGIN_PREFIX, relay_frame},
    transport::{Connection, ConnectionEvent, LostCause},
};

pub struct ServerSession {
    connection: Arc<Connection>,
    broadcaster: Broadcaster,
    display: SharedDisplay,
}

impl ServerSession {
    pub fn new(connection: Arc<Connection>, broadcaster: Broadcaster, display: SharedDisplay) -> Self {
        Self {
            connection,
            broadcaster,
            display,
        }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Handles one event from the reader. Returns `false` once the connection
    /// is finished and the worker should stop.
    pub async fn on_event(&self, event: ConnectionEvent) -> bool {
        match event {
            ConnectionEvent::Message(raw) => self.on_client_message(&raw).await.is_ok(),
            ConnectionEvent::Closed => {
                debug!(connection = self.connection.id(), "connection closed by server");
                false
            }
            ConnectionEvent::Lost(LostCause::PeerClosed) => {
                let notice = match self.connection.identity() {
                    Some(identity) => format!("{identity} has disconnected."),
                    None => "Unknown client disconnected from the server".to_string(),
                };
                self.display.display(&notice);
                false
            }
            ConnectionEvent::Lost(LostCause::Error(cause)) => {
                self.display.display(&format!(
                    "{} disconnected unexpectedly from the server: {cause}",
                    self.describe_peer()
                ));
                false
            }
        }
    }

    /// Applies one inbound frame. On `Err` the connection has already been
    /// sent the violation notice and closed.
    pub async fn on_client_message(&self, raw: &str) -> Result<(), ProtocolViolation> {
        if let Some(candidate) = raw.strip_prefix(LOGIN_PREFIX) {
            return match self.bind_identity(candidate.trim()) {
                Ok(identity) => {
                    info!(connection = self.connection.id(), identity, "client logged on");
                    self.display.display(&format!("{identity} has logged on."));
                    Ok(())
                }
                Err(violation) => {
                    self.reject(&violation);
                    Err(violation)
                }
            };
        }

        let Some(identity) = self.connection.identity() else {
            let violation = ProtocolViolation::NotLoggedIn;
            self.reject(&violation);
            return Err(violation);
        };

        if let Err(error) = self.broadcaster.send_to_all(&relay_frame(identity, raw)).await {
            warn!(identity, %error, "relay incomplete");
            self.display
                .display(&format!("Could not relay message from {identity}: {error}"));
        }
        Ok(())
    }

    fn bind_identity(&self, candidate: &str) -> Result<&str, ProtocolViolation> {
        if self.connection.identity().is_some() {
            return Err(ProtocolViolation::AlreadyLoggedIn);
        }

        let len = candidate.chars().count();
        if len < MIN_IDENTITY_LEN {
            return Err(ProtocolViolation::IdentityTooShort { len });
        }

        // A concurrent login on the same connection can still win the slot.
        self.connection
            .bind_identity(candidate.to_string())
            .map_err(|_| ProtocolViolation::AlreadyLoggedIn)?;
        self.connection
            .identity()
            .ok_or(ProtocolViolation::AlreadyLoggedIn)
    }

    fn reject(&self, violation: &ProtocolViolation) {
        info!(
            connection = self.connection.id(),
            peer = self.connection.peer(),
            %violation,
            "closing connection"
        );
        if let Err(error) = self.connection.send(violation.notice()) {
            debug!(%error, "failed to send violation notice");
        }
        // The writer still delivers the notice before shutting down.
        self.connection.close();
    }

    fn describe_peer(&self) -> String {
        match self.connection.identity() {
            Some(identity) => identity.to_string(),
            None => "Unknown client".to_string(),
        }
    }
}
