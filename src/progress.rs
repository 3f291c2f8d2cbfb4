//! Live progress multiplexing over terminal rows.
//!
//! Each worker slot owns one terminal row below the cursor for the whole
//! run. Phase transitions arrive as ordered messages over a per-slot
//! channel; a long-lived renderer task per slot redraws
//! "label + elapsed time" at a throttled cadence, shows the closing label
//! for a short hold, then clears its row and waits for the next task.
//!
//! Every redraw is emitted as one atomic escape-sequence string (move down
//! N rows, clear the line, print, move back up) so a write is confined to
//! its own row no matter how many sibling renderers are drawing at the same
//! instant. Row ownership is structural: a slot's renderer is the only task
//! ever holding that row's sender side, so no two writers can target the
//! same row.

use crate::config::ProgressConfig;
use crossterm::{Command, cursor, terminal};
use std::io::Write;
use std::time::Instant;
use tokio::sync::mpsc;

/// Ordered phase-change message for one worker slot's renderer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressMessage {
    /// Start (or restart) the live counter under a new phase label
    Begin(String),
    /// Show the closing label, hold briefly, then clear the row
    End(String),
}

/// Sending side of one slot's progress channel.
///
/// All sends are fire-and-forget: once the renderer has exited (shutdown,
/// panic, broken pipe) messages are silently dropped rather than failing
/// the worker.
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    tx: Option<mpsc::UnboundedSender<ProgressMessage>>,
}

impl ProgressHandle {
    /// A handle that drops everything (progress rendering disabled)
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Begin tracking a phase; starts the row's elapsed-time counter
    pub fn begin(&self, line: impl Into<String>) {
        if let Some(tx) = &self.tx {
            tx.send(ProgressMessage::Begin(line.into())).ok();
        }
    }

    /// End tracking with a closing label; the row clears after a grace period
    pub fn end(&self, line: impl Into<String>) {
        if let Some(tx) = &self.tx {
            tx.send(ProgressMessage::End(line.into())).ok();
        }
    }
}

/// One renderer task per worker slot, each bound to a fixed terminal row
pub struct ProgressMultiplexer {
    handles: Vec<ProgressHandle>,
    renderers: Vec<tokio::task::JoinHandle<()>>,
}

impl ProgressMultiplexer {
    /// Spawn `slots` renderer tasks. Slot `i` (1-based) renders on the row
    /// `i` lines below the cursor position at call time.
    ///
    /// With rendering disabled every handle is a no-op and no tasks are
    /// spawned; phase transitions still reach the logs via `tracing`.
    pub fn new(slots: usize, config: &ProgressConfig) -> Self {
        if !config.enabled {
            return Self {
                handles: vec![ProgressHandle::disabled(); slots],
                renderers: Vec::new(),
            };
        }

        reserve_rows(slots);

        let mut handles = Vec::with_capacity(slots);
        let mut renderers = Vec::with_capacity(slots);
        for slot in 1..=slots {
            let (tx, rx) = mpsc::unbounded_channel();
            handles.push(ProgressHandle { tx: Some(tx) });
            renderers.push(tokio::spawn(render_slot(slot as u16, config.clone(), rx)));
        }
        Self { handles, renderers }
    }

    /// Handle for a 1-based worker slot
    pub fn handle(&self, slot: usize) -> ProgressHandle {
        self.handles
            .get(slot - 1)
            .cloned()
            .unwrap_or_else(ProgressHandle::disabled)
    }

    /// Close all channels and wait for the renderers to clear their rows
    pub async fn shutdown(mut self) {
        self.handles.clear();
        for renderer in self.renderers.drain(..) {
            renderer.await.ok();
        }
    }
}

/// Renderer loop for one slot: idle until a `Begin`, then redraw the
/// elapsed-time line at the configured cadence until the matching `End`.
async fn render_slot(
    row: u16,
    config: ProgressConfig,
    mut rx: mpsc::UnboundedReceiver<ProgressMessage>,
) {
    while let Some(msg) = rx.recv().await {
        // an End with no active counter has nothing to close out
        let ProgressMessage::Begin(mut line) = msg else {
            continue;
        };
        let mut started = Instant::now();

        loop {
            draw(row, &timed_line(&line, started));
            tokio::select! {
                next = rx.recv() => match next {
                    Some(ProgressMessage::Begin(next_line)) => {
                        line = next_line;
                        started = Instant::now();
                    }
                    Some(ProgressMessage::End(closing)) => {
                        draw(row, &timed_line(&closing, started));
                        tokio::time::sleep(config.hold).await;
                        draw(row, "");
                        break;
                    }
                    None => {
                        draw(row, "");
                        return;
                    }
                },
                _ = tokio::time::sleep(config.refresh_interval) => {}
            }
        }
    }
    draw(row, "");
}

fn timed_line(line: &str, started: Instant) -> String {
    format!("{:>20} {:7.2}", line, started.elapsed().as_secs_f64())
}

/// Compose the escape sequence that writes `text` onto the row `row` lines
/// below the cursor and restores the cursor, without touching any other row
fn compose_row(row: u16, text: &str) -> String {
    let mut seq = String::new();
    // write_ansi on a String cannot fail
    cursor::MoveDown(row).write_ansi(&mut seq).ok();
    terminal::Clear(terminal::ClearType::CurrentLine)
        .write_ansi(&mut seq)
        .ok();
    cursor::MoveToColumn(0).write_ansi(&mut seq).ok();
    seq.push_str(text);
    seq.push('\r');
    cursor::MoveUp(row).write_ansi(&mut seq).ok();
    seq
}

/// Emit one row update as a single write.
///
/// Errors (closed stdout, broken pipe) are ignored: losing a progress frame
/// must never fail a download.
fn draw(row: u16, text: &str) {
    let seq = compose_row(row, text);
    let mut out = std::io::stdout().lock();
    out.write_all(seq.as_bytes()).ok();
    out.flush().ok();
}

/// Scroll enough blank lines into view that every slot's row exists below
/// the cursor before the first renderer draws
fn reserve_rows(slots: usize) {
    let mut out = std::io::stdout().lock();
    out.write_all("\n".repeat(slots).as_bytes()).ok();
    let mut seq = String::new();
    cursor::MoveUp(slots as u16).write_ansi(&mut seq).ok();
    out.write_all(seq.as_bytes()).ok();
    out.flush().ok();
}
