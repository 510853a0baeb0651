use std::sync::Arc;

use anyhow::Result;
use tokio::{
    io::BufReader,
    net::TcpStream,
    select,
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    cli::ClientArgs,
    command::{ClientCommand, is_command, parse_port},
    console::spawn_console_reader,
    display::{ConsoleDisplay, SharedDisplay},
    error::TransportError,
    frame::{LOGIN_PREFIX, login_frame},
    transport::{Connection, ConnectionEvent, LostCause, spawn_reader},
};

pub async fn run(args: ClientArgs) -> Result<()> {
    let display: SharedDisplay = Arc::new(ConsoleDisplay);
    let (mut session, mut events) = ClientSession::new(
        ClientConfig {
            host: args.host.clone(),
            port: args.port,
            login_id: args.login_id,
        },
        Arc::clone(&display),
    );

    if let Err(error) = session.connect().await {
        display.display("ERROR - Can't setup connection! Terminating client.");
        return Err(anyhow::Error::new(error).context(format!(
            "failed to connect to {}:{}",
            args.host, args.port
        )));
    }
    info!(host = %args.host, port = args.port, "connected");

    run_client_loop(&mut session, &mut events).await;
    Ok(())
}

async fn run_client_loop(
    session: &mut ClientSession,
    events: &mut mpsc::UnboundedReceiver<ConnectionEvent>,
) {
    let shutdown = session.shutdown_token();
    let mut console = spawn_console_reader();

    loop {
        select! {
            // Events first, so a closed notice is shown before the loop exits.
            biased;
            Some(event) = events.recv() => session.handle_event(event).await,
            _ = shutdown.cancelled() => break,
            line = console.recv() => match line {
                Some(line) => session.on_console_input(&line).await,
                None => session.quit().await,
            },
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                session.quit().await;
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub login_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Only held while [`ClientSession::connect`] awaits the socket; callers
    /// see `Disconnected` or `Connected` once it returns.
    Connecting,
    Connected,
}

struct ServerLink {
    connection: Connection,
    reader: JoinHandle<()>,
}

impl ServerLink {
    /// Closes the connection and waits for both halves to wind down. The
    /// reader queues `Closed` before it finishes.
    async fn close(self) -> Result<(), TransportError> {
        self.connection.close();
        let reader = self.reader.await.map_err(std::io::Error::other);
        self.connection.flushed().await?;
        reader?;
        Ok(())
    }
}

/// One client's view of the chat: a single connection to the server, the
/// console that drives it, and the login handshake sent on connect.
pub struct ClientSession {
    host: String,
    port: u16,
    login_id: String,
    state: ConnectionState,
    link: Option<ServerLink>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    display: SharedDisplay,
    shutdown: CancellationToken,
}

impl ClientSession {
    /// Events from the server connection arrive on the returned receiver and
    /// should be fed back through [`ClientSession::handle_event`].
    pub fn new(
        config: ClientConfig,
        display: SharedDisplay,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let session = Self {
            host: config.host,
            port: config.port,
            login_id: config.login_id,
            state: ConnectionState::Disconnected,
            link: None,
            events,
            display,
            shutdown: CancellationToken::new(),
        };
        (session, events_rx)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Cancelled once the client has quit.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_terminated(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Opens the connection and immediately logs in. On failure the session
    /// stays disconnected.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        if self.link.is_some() {
            return Ok(());
        }

        self.state = ConnectionState::Connecting;
        let stream = match TcpStream::connect((self.host.as_str(), self.port)).await {
            Ok(stream) => stream,
            Err(error) => {
                self.state = ConnectionState::Disconnected;
                return Err(error.into());
            }
        };

        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| format!("{}:{}", self.host, self.port));
        let (reader, writer) = stream.into_split();
        let connection = Connection::new(0, peer, writer, CancellationToken::new());
        let reader = spawn_reader(
            BufReader::new(reader),
            connection.closed_token(),
            self.events.clone(),
        );
        self.link = Some(ServerLink { connection, reader });
        self.state = ConnectionState::Connected;

        self.on_connection_established();
        Ok(())
    }

    fn on_connection_established(&self) {
        let login = login_frame(&self.login_id);
        if let Err(error) = self.send_to_server(&login) {
            warn!(%error, "failed to send login");
            self.display
                .display("An error occured while trying to send message to server");
        }
    }

    pub async fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Message(text) => self.on_server_message(&text),
            ConnectionEvent::Closed => self.on_connection_closed(),
            ConnectionEvent::Lost(cause) => self.on_connection_lost(cause).await,
        }
    }

    pub fn on_server_message(&self, text: &str) {
        self.display.display(text);
    }

    /// Routes one console line: logins go straight to the server, other `#`
    /// lines are commands, everything else is chat.
    pub async fn on_console_input(&mut self, line: &str) {
        if line.starts_with(LOGIN_PREFIX) || !is_command(line) {
            self.send_or_quit(line).await;
            return;
        }
        self.handle_command(ClientCommand::parse(line)).await;
    }

    pub async fn handle_command(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::Quit => self.quit().await,
            ClientCommand::Logoff => self.logoff().await,
            ClientCommand::SetHost(host) => {
                if self.state != ConnectionState::Disconnected {
                    self.display.display(
                        "You are already logged in. To set a new host, use the #logoff command to disconnect from the server.",
                    );
                    return;
                }
                self.display
                    .display(&format!("You set the new host to be: {host}"));
                self.host = host;
            }
            ClientCommand::SetPort(arg) => {
                if self.state != ConnectionState::Disconnected {
                    self.display.display(
                        "You are already logged in. To set a new port, use the #logoff command to disconnect from the server.",
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
            ClientCommand::GetHost => {
                self.display
                    .display(&format!("Current host name is: {}", self.host));
            }
            ClientCommand::GetPort => {
                self.display
                    .display(&format!("Current port number is: {}", self.port));
            }
            ClientCommand::Unknown(raw) => {
                self.display.display("Not a command.");
                self.send_or_quit(&raw).await;
            }
        }
    }

    pub fn on_connection_closed(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.display.display("Connection closed");
    }

    pub async fn on_connection_lost(&mut self, cause: LostCause) {
        info!(%cause, "connection to server lost");
        self.display.display("Server has shut down");
        self.quit().await;
    }

    /// Closes the connection, ignoring errors, and signals shutdown.
    pub async fn quit(&mut self) {
        if let Some(link) = self.link.take() {
            if let Err(error) = link.close().await {
                debug!(%error, "ignoring close failure on quit");
            }
        }
        self.state = ConnectionState::Disconnected;
        self.shutdown.cancel();
    }

    async fn logoff(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        self.state = ConnectionState::Disconnected;
        if let Err(error) = link.close().await {
            warn!(%error, "log off incomplete");
            self.display
                .display("An error occured during log off, please try again.");
        }
    }

    fn send_to_server(&self, text: &str) -> Result<(), TransportError> {
        match &self.link {
            Some(link) => link.connection.send(text),
            None => Err(TransportError::NotConnected),
        }
    }

    async fn send_or_quit(&mut self, text: &str) {
        if let Err(error) = self.send_to_server(text) {
            debug!(%error, "send to server failed");
            self.display
                .display("Could not send message to server. Terminating client.");
            self.quit().await;
        }
    }
}
