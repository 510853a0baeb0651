//! Console command parsing for the client and server consoles.
//!
//! A line is only treated as a command when it starts with `#`. Matching is
//! case-sensitive. Commands without an argument must match exactly; `#sethost`
//! and `#setport` take whatever follows their fixed-length prefix, trimmed.
//!
//! Parsing never fails: an unrecognised `#` line becomes `Unknown` and the
//! caller decides how to fall back. Argument validation (is the port an
//! integer?) is done by [`parse_port`] at dispatch time, after the caller has
//! checked that the command is allowed in its current state.

use crate::error::PortError;

pub const COMMAND_PREFIX: char = '#';

/// Commands understood by the client console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Quit,
    Logoff,
    SetHost(String),
    SetPort(String),
    GetHost,
    GetPort,
    Unknown(String),
}

impl ClientCommand {
    pub fn parse(line: &str) -> Self {
        match line {
            "#quit" => ClientCommand::Quit,
            "#logoff" => ClientCommand::Logoff,
            "#gethost" => ClientCommand::GetHost,
            "#getport" => ClientCommand::GetPort,
            _ => {
                if let Some(host) = argument(line, "#sethost") {
                    ClientCommand::SetHost(host)
                } else if let Some(port) = argument(line, "#setport") {
                    ClientCommand::SetPort(port)
                } else {
                    ClientCommand::Unknown(line.to_string())
                }
            }
        }
    }
}

/// Commands understood by the server console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerCommand {
    Quit,
    Stop,
    Close,
    Start,
    SetPort(String),
    GetPort,
    Unknown(String),
}

impl ServerCommand {
    pub fn parse(line: &str) -> Self {
        match line {
            "#quit" => ServerCommand::Quit,
            "#stop" => ServerCommand::Stop,
            "#close" => ServerCommand::Close,
            "#start" => ServerCommand::Start,
            "#getport" => ServerCommand::GetPort,
            _ => match argument(line, "#setport") {
                Some(port) => ServerCommand::SetPort(port),
                None => ServerCommand::Unknown(line.to_string()),
            },
        }
    }
}

pub fn is_command(line: &str) -> bool {
    line.starts_with(COMMAND_PREFIX)
}

/// Validates a `#setport` argument.
pub fn parse_port(arg: &str) -> Result<u16, PortError> {
    match arg.parse::<i64>() {
        Ok(value) => u16::try_from(value).map_err(|_| PortError::OutOfRange(arg.to_string())),
        Err(_) => Err(PortError::NotAnInteger(arg.to_string())),
    }
}

fn argument(line: &str, prefix: &str) -> Option<String> {
    line.strip_prefix(prefix).map(|rest| rest.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_exact_commands() {
        assert_eq!(ClientCommand::parse("#quit"), ClientCommand::Quit);
        assert_eq!(ClientCommand::parse("#logoff"), ClientCommand::Logoff);
        assert_eq!(ClientCommand::parse("#gethost"), ClientCommand::GetHost);
        assert_eq!(ClientCommand::parse("#getport"), ClientCommand::GetPort);
    }

    #[test]
    fn client_arguments_are_trimmed() {
        assert_eq!(
            ClientCommand::parse("#sethost   example.org  "),
            ClientCommand::SetHost("example.org".into())
        );
        assert_eq!(
            ClientCommand::parse("#setport 6000"),
            ClientCommand::SetPort("6000".into())
        );
        assert_eq!(
            ClientCommand::parse("#setport"),
            ClientCommand::SetPort(String::new())
        );
    }

    #[test]
    fn commands_are_case_sensitive() {
        assert_eq!(
            ClientCommand::parse("#QUIT"),
            ClientCommand::Unknown("#QUIT".into())
        );
        assert_eq!(
            ServerCommand::parse("#Stop"),
            ServerCommand::Unknown("#Stop".into())
        );
    }

    #[test]
    fn exact_commands_reject_trailing_text() {
        assert_eq!(
            ClientCommand::parse("#quit now"),
            ClientCommand::Unknown("#quit now".into())
        );
        assert_eq!(
            ServerCommand::parse("#start later"),
            ServerCommand::Unknown("#start later".into())
        );
    }

    #[test]
    fn server_commands_parse() {
        assert_eq!(ServerCommand::parse("#quit"), ServerCommand::Quit);
        assert_eq!(ServerCommand::parse("#stop"), ServerCommand::Stop);
        assert_eq!(ServerCommand::parse("#close"), ServerCommand::Close);
        assert_eq!(ServerCommand::parse("#start"), ServerCommand::Start);
        assert_eq!(ServerCommand::parse("#getport"), ServerCommand::GetPort);
        assert_eq!(
            ServerCommand::parse("#setport 7000"),
            ServerCommand::SetPort("7000".into())
        );
    }

    #[test]
    fn client_only_commands_are_unknown_on_server() {
        assert_eq!(
            ServerCommand::parse("#logoff"),
            ServerCommand::Unknown("#logoff".into())
        );
        assert_eq!(
            ServerCommand::parse("#sethost x"),
            ServerCommand::Unknown("#sethost x".into())
        );
    }

    #[test]
    fn port_arguments_are_validated() {
        assert_eq!(parse_port("6000"), Ok(6000));
        assert_eq!(parse_port("0"), Ok(0));
        assert_eq!(
            parse_port("abc"),
            Err(PortError::NotAnInteger("abc".into()))
        );
        assert_eq!(parse_port(""), Err(PortError::NotAnInteger(String::new())));
        assert_eq!(
            parse_port("70000"),
            Err(PortError::OutOfRange("70000".into()))
        );
        assert_eq!(parse_port("-1"), Err(PortError::OutOfRange("-1".into())));
    }

    #[test]
    fn only_hash_lines_are_commands() {
        assert!(is_command("#anything"));
        assert!(!is_command("hello #world"));
        assert!(!is_command(""));
    }
}
