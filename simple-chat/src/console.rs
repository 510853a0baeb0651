use std::{io::BufRead, thread};

use tokio::sync::mpsc;
use tracing::warn;

/// Reads stdin lines on a plain thread and forwards them. The receiver yields
/// `None` once stdin reaches end of file.
///
/// A blocking read on a detached thread never holds up process exit, which a
/// pending read on the runtime's stdin would.
pub fn spawn_console_reader() -> mpsc::UnboundedReceiver<String> {
    let (lines_tx, lines_rx) = mpsc::unbounded_channel();
    thread::spawn(move || forward_lines(std::io::stdin().lock(), lines_tx));
    lines_rx
}

fn forward_lines<R: BufRead>(input: R, lines: mpsc::UnboundedSender<String>) {
    for line in input.lines() {
        match line {
            Ok(line) => {
                if lines.send(line).is_err() {
                    return;
                }
            }
            Err(error) => {
                warn!(?error, "failed to read console");
                return;
            }
        }
    }
}
