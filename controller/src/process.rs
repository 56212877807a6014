use std::{
    io::{BufRead, BufReader, Read},
    thread,
};

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

/// Forwards a child's output into the log line by line: stderr at WARN,
/// stdout at DEBUG. The thread ends when the pipe closes.
pub fn forward_lines<R>(reader: R, source: &str, stream: Stream)
where
    R: Read + Send + 'static,
{
    let source = source.to_string();
    let thread_name = match stream {
        Stream::Stdout => format!("{source}-out"),
        Stream::Stderr => format!("{source}-err"),
    };

    let spawned = thread::Builder::new().name(thread_name).spawn(move || {
        for line in BufReader::new(reader).lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match stream {
                Stream::Stdout => debug!(source = %source, "{line}"),
                Stream::Stderr => warn!(source = %source, "{line}"),
            }
        }
    });

    if let Err(err) = spawned {
        warn!("failed to start output forwarder: {err}");
    }
}
