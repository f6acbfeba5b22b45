//! Operations on a repository, composed from the tool adapters.
//!
//! Long-running operations hand back an [`EventStream`] that a worker thread
//! feeds and closes when it is done. A hard failure arrives as a final event
//! whose error is set and whose file name is empty.

pub mod content;
pub mod history;
pub mod repo;
pub mod status;
pub mod transfer;

pub use repo::{RepoContext, Tools};

use crossbeam_channel::{unbounded, Receiver, Sender};
use gin_core::{Result, StatusEvent};
use std::thread;
use tracing::debug;

pub type EventStream = Receiver<StatusEvent>;

/// Runs `work` on its own thread and returns the events it sends. A returned
/// error becomes the last event of the stream.
pub fn spawn_stream<F>(name: &str, work: F) -> EventStream
where
    F: FnOnce(&Sender<StatusEvent>) -> Result<()> + Send + 'static,
{
    let (tx, rx) = unbounded();
    let name = name.to_string();
    thread::spawn(move || {
        if let Err(err) = work(&tx) {
            debug!("{} failed: {}", name, err);
            let _ = tx.send(StatusEvent::failure(err));
        }
    });
    rx
}
