use clap::{Args, Parser, Subcommand};

pub const DEFAULT_PORT: u16 = 5555;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat server and its operator console.
    Server(ServerArgs),
    /// Connect to a chat server and log in.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Port to listen on. Use 0 for an ephemeral port.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Login id sent to the server on connect (at least 3 characters).
    pub login_id: String,

    /// Host name of the server.
    #[arg(long, default_value = "localhost")]
    pub host: String,

    /// Port of the server.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,
}
