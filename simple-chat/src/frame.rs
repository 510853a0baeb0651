use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransportError;

const LINE_ENDINGS: &[char] = &['\n', '\r'];

pub const LOGIN_PREFIX: &str = "#login";
pub const SERVER_PREFIX: &str = "SERVER MSG> ";

/// First frame a client sends after the connection opens.
pub fn login_frame(identity: &str) -> String {
    format!("{LOGIN_PREFIX} {identity}")
}

/// Frame relayed to every connection when an identified client chats.
pub fn relay_frame(identity: &str, body: &str) -> String {
    format!("{identity}> {body}")
}

/// Frame broadcast for text typed at the server console.
pub fn server_frame(body: &str) -> String {
    format!("{SERVER_PREFIX}{body}")
}

/// Reads the next text frame, or `None` once the peer closes its side.
///
/// Frames are JSON string literals, one per line. Empty lines between frames
/// are tolerated; a line that is not a JSON string is `InvalidData`.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if trimmed.is_empty() {
            continue;
        }

        let text = serde_json::from_str(trimmed)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        return Ok(Some(text));
    }
}

pub async fn write_frame<W>(writer: &mut W, text: &str) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = serde_json::to_vec(text)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_builders_match_wire_shapes() {
        assert_eq!(login_frame("bob"), "#login bob");
        assert_eq!(relay_frame("bob", "hello"), "bob> hello");
        assert_eq!(server_frame("maintenance"), "SERVER MSG> maintenance");
    }

    #[tokio::test]
    async fn multiline_body_survives_as_one_frame() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = tokio::io::BufReader::new(reader);

        write_frame(&mut writer, "first\nsecond")
            .await
            .expect("write frame");
        write_frame(&mut writer, "third").await.expect("write frame");
        drop(writer);

        let first = read_frame(&mut reader).await.expect("read frame");
        let second = read_frame(&mut reader).await.expect("read frame");
        let end = read_frame(&mut reader).await.expect("read eof");

        assert_eq!(first.as_deref(), Some("first\nsecond"));
        assert_eq!(second.as_deref(), Some("third"));
        assert_eq!(end, None);
    }

    #[tokio::test]
    async fn garbage_line_is_invalid_data() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = tokio::io::BufReader::new(reader);

        writer.write_all(b"\n\nnot json\n").await.expect("write raw");
        let err = read_frame(&mut reader).await.expect_err("should reject");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
