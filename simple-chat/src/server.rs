use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

use anyhow::Result;
use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream},
    select,
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    broadcast::Broadcaster,
    cli::ServerArgs,
    command::{ServerCommand, is_command, parse_port},
    console::spawn_console_reader,
    display::{ConsoleDisplay, SharedDisplay},
    error::{RelayError, TransportError},
    frame::server_frame,
    registry::ConnectionRegistry,
    session::ServerSession,
    transport::{Connection, spawn_reader},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Listening,
    Stopped,
}

pub async fn run(args: ServerArgs) -> Result<()> {
    let display: SharedDisplay = Arc::new(ConsoleDisplay);
    let mut server = Server::new(args.port, Arc::clone(&display));

    if let Err(error) = server.listen().await {
        warn!(%error, port = args.port, "failed to listen");
        display.display("ERROR - Could not listen for clients!");
    }

    let shutdown = server.shutdown_token();
    let mut console = spawn_console_reader();
    let mut console_open = true;

    loop {
        select! {
            _ = shutdown.cancelled() => break,
            line = console.recv(), if console_open => match line {
                Some(line) => server.handle_console_input(&line).await,
                None => {
                    debug!("console closed; serving until ctrl-c");
                    console_open = false;
                }
            },
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                server.quit().await;
            }
        }
    }

    info!("server shut down");
    Ok(())
}

struct ListenerHandle {
    stop: CancellationToken,
    task: JoinHandle<()>,
    local_addr: SocketAddr,
}

/// The chat server: one listener, any number of client connections, and the
/// operator console that controls both.
pub struct Server {
    port: u16,
    listener: Option<ListenerHandle>,
    registry: Arc<ConnectionRegistry>,
    broadcaster: Broadcaster,
    display: SharedDisplay,
    shutdown: CancellationToken,
}

impl Server {
    pub fn new(port: u16, display: SharedDisplay) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            port,
            listener: None,
            broadcaster: Broadcaster::new(Arc::clone(&registry)),
            registry,
            display,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> ListenerState {
        match self.listener {
            Some(_) => ListenerState::Listening,
            None => ListenerState::Stopped,
        }
    }

    /// Address the listener is bound to while listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().map(|listener| listener.local_addr)
    }

    /// Cancelled once the server has quit.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn client_count(&self) -> usize {
        self.registry.len().await
    }

    /// Starts accepting connections on the configured port.
    pub async fn listen(&mut self) -> Result<SocketAddr, TransportError> {
        if let Some(listener) = &self.listener {
            return Ok(listener.local_addr);
        }

        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, self.port)).await?;
        let local_addr = listener.local_addr()?;
        let stop = self.shutdown.child_token();
        let task = tokio::spawn(accept_loop(
            listener,
            stop.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.display),
            self.shutdown.clone(),
        ));

        self.listener = Some(ListenerHandle {
            stop,
            task,
            local_addr,
        });
        info!(%local_addr, "listening");
        self.display.display(&format!(
            "Server listening for connections on port {}",
            local_addr.port()
        ));
        Ok(local_addr)
    }

    /// Stops accepting new connections; existing ones stay open. Returns
    /// whether the server was listening.
    pub async fn stop_listening(&mut self) -> bool {
        let Some(listener) = self.listener.take() else {
            return false;
        };

        listener.stop.cancel();
        // Joining releases the socket before the caller can rebind the port.
        if let Err(error) = listener.task.await {
            warn!(?error, "listener task ended abnormally");
        }
        self.display
            .display("Server has stopped listening for connections.");
        true
    }

    /// Stops listening, then closes every client connection. Returns how many
    /// connections were closed.
    pub async fn close(&mut self) -> usize {
        self.stop_listening().await;
        self.close_all_connections().await
    }

    /// Closes everything and signals shutdown.
    pub async fn quit(&mut self) {
        let closed = self.close().await;
        debug!(closed, "server quitting");
        self.shutdown.cancel();
    }

    pub async fn send_to_all(&self, message: &str) -> Result<usize, RelayError> {
        self.broadcaster.send_to_all(message).await
    }

    /// Handles one line typed at the server console.
    pub async fn handle_console_input(&mut self, line: &str) {
        if is_command(line) {
            self.handle_command(ServerCommand::parse(line)).await;
            return;
        }

        self.display.display(line);
        self.announce(line).await;
    }

    pub async fn handle_command(&mut self, command: ServerCommand) {
        match command {
            ServerCommand::Quit => self.quit().await,
            ServerCommand::Stop => {
                if !self.stop_listening().await {
                    self.display
                        .display("Server has already stopped listening for new clients.");
                }
            }
            ServerCommand::Close => {
                let closed = self.close().await;
                info!(closed, "closed all client connections");
            }
            ServerCommand::Start => {
                if self.state() == ListenerState::Listening {
                    self.display
                        .display("Server is already listening for new clients.");
                    return;
                }
                if let Err(error) = self.listen().await {
                    warn!(%error, port = self.port, "failed to listen");
                    self.display.display(
                        "An error occured while trying to listen for new clients. Please try again.",
                    );
                }
            }
            ServerCommand::SetPort(arg) => {
                if self.state() != ListenerState::Stopped || self.client_count().await != 0 {
                    self.display.display(
                        "Server is not closed. To set a new port, use the #close command to close the server.",
                    );
                    return;
                }
                match parse_port(&arg) {
                    Ok(port) => {
                        self.port = port;
                        self.display
                            .display(&format!("You set the new port to be: {port}"));
                    }
                    Err(error) => self.display.display(&error.to_string()),
                }
            }
            ServerCommand::GetPort => {
                self.display
                    .display(&format!("Current port number is: {}", self.port));
            }
            ServerCommand::Unknown(raw) => {
                self.display.display("Not a command.");
                self.display.display(&raw);
                self.announce(&raw).await;
            }
        }
    }

    async fn announce(&self, body: &str) {
        if let Err(error) = self.send_to_all(&server_frame(body)).await {
            debug!(%error, "server message not delivered everywhere");
            self.display
                .display("Could not send message to connected clients.");
        }
    }

    /// Each connection's writer delivers what it already queued and shuts down
    /// on its own, so this never waits on a slow peer.
    async fn close_all_connections(&self) -> usize {
        let connections = self.registry.drain().await;
        for connection in &connections {
            connection.close();
        }
        connections.len()
    }
}

async fn accept_loop(
    listener: TcpListener,
    stop: CancellationToken,
    registry: Arc<ConnectionRegistry>,
    display: SharedDisplay,
    shutdown: CancellationToken,
) {
    loop {
        select! {
            _ = stop.cancelled() => break,
            accept_result = listener.accept() => match accept_result {
                Ok((stream, peer)) => {
                    register_connection(stream, peer, &registry, &display, &shutdown).await;
                }
                Err(err) => warn!(error = ?err, "failed to accept connection"),
            }
        }
    }
}

/// Registers the connection before returning, so once the listener has been
/// joined every accepted connection is visible to `#close`.
async fn register_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: &Arc<ConnectionRegistry>,
    display: &SharedDisplay,
    shutdown: &CancellationToken,
) {
    let (reader, writer) = stream.into_split();
    let connection = Arc::new(Connection::new(
        registry.next_id(),
        peer.to_string(),
        writer,
        shutdown.child_token(),
    ));
    registry.insert(Arc::clone(&connection)).await;
    info!(%peer, connection = connection.id(), "New client connected to the server");

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let reader = spawn_reader(BufReader::new(reader), connection.closed_token(), events_tx);
    let session = ServerSession::new(
        Arc::clone(&connection),
        Broadcaster::new(Arc::clone(registry)),
        Arc::clone(display),
    );
    let registry = Arc::clone(registry);
    let display = Arc::clone(display);

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if !session.on_event(event).await {
                break;
            }
        }

        // Closed by `#close`, `#quit` or a rejected login rather than by the peer.
        let closed_here = connection.is_closed();
        connection.close();
        let _ = reader.await;
        registry.remove(connection.id()).await;

        match connection.flushed().await {
            Ok(()) => {}
            Err(error) if closed_here => {
                warn!(%peer, connection = connection.id(), %error, "unclean disconnect");
                let who = connection.identity().unwrap_or(connection.peer());
                display.display(&format!("Could not disconnect {who}: {error}"));
            }
            Err(error) => debug!(%peer, %error, "connection ended with undelivered frames"),
        }
        debug!(%peer, connection = connection.id(), "connection worker finished");
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::MemoryDisplay;

    fn server() -> (Server, MemoryDisplay) {
        let display = MemoryDisplay::new();
        (Server::new(0, Arc::new(display.clone())), display)
    }

    #[tokio::test]
    async fn starts_stopped_and_getport_reports_configured_port() {
        let (mut server, display) = server();
        assert_eq!(server.state(), ListenerState::Stopped);
        assert_eq!(server.local_addr(), None);

        server.handle_console_input("#getport").await;
        assert_eq!(display.lines(), vec!["Current port number is: 0"]);
    }

    #[tokio::test]
    async fn setport_while_stopped_and_empty() {
        let (mut server, display) = server();

        server.handle_console_input("#setport 6000").await;
        assert_eq!(server.port(), 6000);
        assert!(display.contains("You set the new port to be: 6000"));

        server.handle_console_input("#setport six").await;
        assert_eq!(server.port(), 6000);
        assert!(display.contains("six is not an integer. To set a new port, please try again."));

        server.handle_console_input("#setport 99999").await;
        assert_eq!(server.port(), 6000);
    }

    #[tokio::test]
    async fn setport_rejected_while_listening() {
        let (mut server, display) = server();
        server.listen().await.expect("listen on ephemeral port");

        server.handle_console_input("#setport 6000").await;
        assert_eq!(server.port(), 0);
        assert!(display.contains(
            "Server is not closed. To set a new port, use the #close command to close the server."
        ));

        server.quit().await;
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let (mut server, display) = server();

        server.handle_console_input("#stop").await;
        assert!(display.contains("Server has already stopped listening for new clients."));

        server.handle_console_input("#start").await;
        assert_eq!(server.state(), ListenerState::Listening);
        let first_addr = server.local_addr();

        server.handle_console_input("#start").await;
        assert!(display.contains("Server is already listening for new clients."));
        assert_eq!(server.local_addr(), first_addr);

        server.handle_console_input("#stop").await;
        assert_eq!(server.state(), ListenerState::Stopped);
        assert!(display.contains("Server has stopped listening for connections."));
    }

    #[tokio::test]
    async fn unknown_command_is_displayed_and_broadcast() {
        let (mut server, display) = server();

        server.handle_console_input("#shout hello").await;
        assert_eq!(display.lines(), vec!["Not a command.", "#shout hello"]);
    }

    #[tokio::test]
    async fn plain_console_text_is_displayed() {
        let (mut server, display) = server();

        server.handle_console_input("maintenance at noon").await;
        assert_eq!(display.lines(), vec!["maintenance at noon"]);
    }

    #[tokio::test]
    async fn start_failure_is_reported_and_stays_stopped() {
        let taken = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .expect("bind ephemeral port");
        let port = taken.local_addr().expect("addr").port();

        let display = MemoryDisplay::new();
        let mut server = Server::new(port, Arc::new(display.clone()));
        server.handle_console_input("#start").await;

        assert_eq!(server.state(), ListenerState::Stopped);
        assert_eq!(
            display.lines(),
            vec!["An error occured while trying to listen for new clients. Please try again."]
        );
        assert!(!server.shutdown_token().is_cancelled());
    }

    #[tokio::test]
    async fn quit_cancels_shutdown_token() {
        let (mut server, _display) = server();
        let shutdown = server.shutdown_token();
        server.listen().await.expect("listen");

        server.handle_console_input("#quit").await;
        assert!(shutdown.is_cancelled());
        assert_eq!(server.state(), ListenerState::Stopped);
    }
}
