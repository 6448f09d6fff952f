//! Background block reader.
//!
//! The reader thread owns the connection and fetches the next block while the
//! session drains the current one. Blocks are handed over a rendezvous
//! channel, so the reader holds at most one block ahead and waits until the
//! session asks for it.

use common::{BridgeError, Result};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};
use wire_client::{AbortHandle, Block, Connection, Progress, QueryHandle};

/// Messages from the reader thread.
#[derive(Debug)]
enum PrefetchMessage {
    Block(Block),
    EndOfStream(Progress),
    Failed(BridgeError),
}

#[derive(Debug)]
pub struct Prefetcher {
    receiver: Option<Receiver<PrefetchMessage>>,
    abort: AbortHandle,
    worker: Option<JoinHandle<()>>,
    progress: Progress,
}

impl Prefetcher {
    /// Moves `conn` onto a reader thread streaming the results of `handle`.
    pub fn spawn(mut conn: Connection, handle: QueryHandle) -> Result<Prefetcher> {
        let abort = conn.abort_handle()?;
        let (sender, receiver) = mpsc::sync_channel(0);

        let worker = thread::Builder::new()
            .name("clickhouse-prefetch".to_string())
            .spawn(move || {
                loop {
                    let message = match conn.fetch_next_block(&handle) {
                        Ok(Some(block)) => PrefetchMessage::Block(block),
                        Ok(None) => PrefetchMessage::EndOfStream(conn.progress()),
                        Err(e) => PrefetchMessage::Failed(e),
                    };
                    let last = !matches!(message, PrefetchMessage::Block(_));
                    // The session hung up; stop reading.
                    if sender.send(message).is_err() || last {
                        break;
                    }
                }
                conn.close();
                debug!("prefetch reader stopped");
            })
            .map_err(|e| BridgeError::Stream(format!("cannot start prefetch thread: {}", e)))?;

        Ok(Prefetcher {
            receiver: Some(receiver),
            abort,
            worker: Some(worker),
            progress: Progress::default(),
        })
    }

    /// Waits for the next block; `None` once the stream has ended.
    pub fn next_block(&mut self) -> Result<Option<Block>> {
        let receiver = self
            .receiver
            .as_ref()
            .ok_or_else(|| BridgeError::InvalidState("prefetcher is closed".to_string()))?;
        match receiver.recv() {
            Ok(PrefetchMessage::Block(block)) => Ok(Some(block)),
            Ok(PrefetchMessage::EndOfStream(progress)) => {
                self.progress = progress;
                Ok(None)
            }
            Ok(PrefetchMessage::Failed(e)) => Err(e),
            Err(_) => Err(BridgeError::Stream(
                "prefetch reader exited unexpectedly".to_string(),
            )),
        }
    }

    pub fn abort_handle(&self) -> Result<AbortHandle> {
        self.abort.try_clone()
    }

    /// Progress reported by the remote, known once the stream has ended.
    pub fn progress(&self) -> Progress {
        self.progress
    }

    /// Aborts the remote stream and joins the reader. Idempotent.
    pub fn close(&mut self) {
        self.abort.abort();
        // Dropping the receiver unblocks a reader waiting to hand over a block.
        self.receiver.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("prefetch reader panicked");
            }
        }
    }
}

impl Drop for Prefetcher {
    fn drop(&mut self) {
        self.close();
    }
}
