//! A small text chat: one server relays lines between logged-in clients.
//!
//! Every client must open with `#login <id>` (the client does this for you on
//! connect). The server binds that id to the connection once and for all, then
//! relays each line the client sends to every connection as `<id>> <line>`.
//! Both consoles also understand a handful of `#` commands to inspect and
//! change connection settings.
//!
//! - [`cli`] parses the command line for server and client modes.
//! - [`command`] parses `#` console commands for either side.
//! - [`frame`] is the line-delimited wire format and the frame shapes.
//! - [`transport`] wraps a socket as a [`transport::Connection`] and turns its
//!   read side into lifecycle events.
//! - [`registry`] and [`broadcast`] track open connections and fan out to them.
//! - [`session`] is the per-connection login/relay protocol on the server.
//! - [`server`] owns the listener state machine and the operator console.
//! - [`client`] owns the client's connection state machine and console.
//! - [`console`] and [`display`] are where operator input comes from and
//!   operator-facing text goes.

pub mod broadcast;
pub mod cli;
pub mod client;
pub mod command;
pub mod console;
pub mod display;
pub mod error;
pub mod frame;
pub mod registry;
pub mod server;
pub mod session;
pub mod transport;
