//! The per-process thread that moves staged items onto the channel.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use spool_wire::FrameWriter;

use crate::codec::Codec;
use crate::shared::Shared;
use crate::staging::StagingBuffer;

const THREAD_NAME: &str = "spool-feeder";

/// Start the feeder. The caller keeps the handle only to notice when the
/// feeder has stopped; it is never joined.
pub(crate) fn spawn<T, C>(
    buffer: Arc<StagingBuffer<T>>,
    shared: Arc<Shared>,
    codec: Arc<C>,
) -> io::Result<JoinHandle<()>>
where
    T: Send + 'static,
    C: Codec<T>,
{
    let handle = thread::Builder::new()
        .name(THREAD_NAME.into())
        .spawn(move || {
            run(&buffer, &shared, codec.as_ref());
            let stranded = buffer.close();
            if stranded > 0 {
                tracing::warn!(stranded, "dropping items staged for a stopped feeder");
            }
            for _ in 0..stranded {
                shared.release_gate();
            }
        })?;
    tracing::debug!(pid = std::process::id(), "started queue feeder");
    Ok(handle)
}

/// Runs until a write fails. Process exit is the normal way out.
fn run<T, C: Codec<T>>(buffer: &StagingBuffer<T>, shared: &Shared, codec: &C) {
    loop {
        let item = buffer.pop_blocking();

        let payload = match codec.encode(&item) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode queue item; dropping it");
                drop(item);
                // Nobody will ever `get` this item, so its unit would leak.
                shared.release_gate();
                continue;
            }
        };
        drop(item);

        let _guard = match shared.write_lock.lock() {
            Ok(guard) => guard,
            Err(e) => {
                tracing::error!(error = %e, "failed to take queue write lock; feeder stopping");
                return;
            }
        };
        // Built under the lock so anything left buffered after a failed
        // write is dropped before the lock is released.
        let mut frames = FrameWriter::new(&shared.writer, shared.chunk_size);
        match frames.write_message(&payload) {
            Ok(stats) => {
                tracing::trace!(frames = stats.frames, bytes = stats.bytes, "fed message");
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    len = payload.len(),
                    "failed to write queue message; the channel may hold a partial message, feeder stopping"
                );
                return;
            }
        }
    }
}
