//! Where operator-facing text ends up.
//!
//! Sessions never print directly. They hand strings to a [`Display`], which is
//! stdout for the real consoles and an in-memory log for tests.

use std::{
    io::Write,
    sync::{Arc, Mutex},
};

pub trait Display: Send + Sync {
    fn display(&self, message: &str);
}

pub type SharedDisplay = Arc<dyn Display>;

/// Writes each message as one line on stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleDisplay;

impl Display for ConsoleDisplay {
    fn display(&self, message: &str) {
        let mut stdout = std::io::stdout().lock();
        // A closed stdout leaves nobody to tell.
        let _ = writeln!(stdout, "{message}");
        let _ = stdout.flush();
    }
}

/// Keeps every displayed message, in order.
#[derive(Debug, Default, Clone)]
pub struct MemoryDisplay {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, message: &str) -> bool {
        self.lines().iter().any(|line| line == message)
    }
}

impl Display for MemoryDisplay {
    fn display(&self, message: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(message.to_string());
        }
    }
}
