use std::sync::Arc;

use tracing::debug;

use crate::{error::RelayError, registry::ConnectionRegistry, transport::Connection};

/// Queues `message` on every open connection in `connections`.
///
/// Each target only gets the frame added to its outbox, so a slow or dead
/// peer never holds up the others. Returns how many connections accepted the
/// message, or an aggregate error if any of them could not take it.
pub fn relay(message: &str, connections: &[Arc<Connection>]) -> Result<usize, RelayError> {
    let mut attempted = 0;
    let mut failed = 0;
    for connection in connections.iter().filter(|connection| !connection.is_closed()) {
        attempted += 1;
        if let Err(error) = connection.send(message) {
            debug!(connection = connection.id(), %error, "failed to deliver message");
            failed += 1;
        }
    }

    if failed == 0 {
        Ok(attempted)
    } else {
        Err(RelayError { failed, attempted })
    }
}

/// Relays to whatever the registry holds at the moment of the call.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub async fn send_to_all(&self, message: &str) -> Result<usize, RelayError> {
        let connections = self.registry.snapshot().await;
        relay(message, &connections)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{
        io::{BufReader, DuplexStream},
        time::timeout,
    };
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::frame::read_frame;

    fn open_connection(id: u64) -> (Arc<Connection>, BufReader<DuplexStream>) {
        let (local, remote) = tokio::io::duplex(1024);
        let connection = Arc::new(Connection::new(id, "test", local, CancellationToken::new()));
        (connection, BufReader::new(remote))
    }

    #[tokio::test]
    async fn relay_reaches_every_open_connection() {
        let (first, mut first_peer) = open_connection(1);
        let (second, mut second_peer) = open_connection(2);

        let delivered = relay("bob> hello", &[first, second]).expect("relay should succeed");
        assert_eq!(delivered, 2);

        let one = read_frame(&mut first_peer).await.expect("read first");
        let two = read_frame(&mut second_peer).await.expect("read second");
        assert_eq!(one.as_deref(), Some("bob> hello"));
        assert_eq!(two.as_deref(), Some("bob> hello"));
    }

    #[tokio::test]
    async fn failed_target_does_not_block_the_rest() {
        let (healthy, mut healthy_peer) = open_connection(1);
        let (broken, broken_peer) = open_connection(2);
        drop(broken_peer);

        // The writer notices the dead peer on its first write and stops.
        broken.send("ping").expect("queued before the writer notices");
        let flushed = timeout(Duration::from_secs(2), broken.flushed())
            .await
            .expect("writer stops after a failed write");
        assert!(flushed.is_err());

        let err = relay("bob> hello", &[broken, healthy]).expect_err("one target is gone");
        assert_eq!(
            err,
            RelayError {
                failed: 1,
                attempted: 2
            }
        );

        let delivered = read_frame(&mut healthy_peer).await.expect("read healthy");
        assert_eq!(delivered.as_deref(), Some("bob> hello"));
    }

    #[tokio::test]
    async fn stalled_target_does_not_hold_up_the_rest() {
        let (local, _stalled) = tokio::io::duplex(64);
        let stalled = Arc::new(Connection::new(1, "stalled", local, CancellationToken::new()));
        let (healthy, mut healthy_peer) = open_connection(2);
        let big = "y".repeat(1 << 20);

        let delivered = relay(&big, &[Arc::clone(&stalled), Arc::clone(&healthy)])
            .expect("both frames queued");
        assert_eq!(delivered, 2);
        relay("after", &[Arc::clone(&stalled), Arc::clone(&healthy)]).expect("still queued");

        let first = read_frame(&mut healthy_peer).await.expect("read big");
        assert_eq!(first.map(|frame| frame.len()), Some(big.len()));
        let second = read_frame(&mut healthy_peer).await.expect("read after");
        assert_eq!(second.as_deref(), Some("after"));
        stalled.close();
    }

    #[tokio::test]
    async fn closed_connections_are_skipped() {
        let (open, mut open_peer) = open_connection(1);
        let (closed, _closed_peer) = open_connection(2);
        closed.close();

        let delivered =
            relay("SERVER MSG> hi", &[open, closed]).expect("closed connection is not a failure");
        assert_eq!(delivered, 1);

        let frame = read_frame(&mut open_peer).await.expect("read open");
        assert_eq!(frame.as_deref(), Some("SERVER MSG> hi"));
    }

    #[tokio::test]
    async fn broadcaster_uses_registry_contents() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Broadcaster::new(Arc::clone(&registry));
        assert_eq!(broadcaster.send_to_all("nobody").await, Ok(0));

        let (connection, mut peer) = open_connection(registry.next_id());
        registry.insert(connection).await;
        assert_eq!(broadcaster.send_to_all("somebody").await, Ok(1));

        let frame = read_frame(&mut peer).await.expect("read");
        assert_eq!(frame.as_deref(), Some("somebody"));
    }
}
