//! The two entry points: stream a source once (`read`) or materialize it into
//! a session-owned buffer (`copy`).

use std::io::{ErrorKind, Read};
use std::sync::Arc;
use std::time::Instant;

use tieredio_core::error::{Error, Result};
use tieredio_core::policy;
use tieredio_io::{CancelReader, Source};
use tieredio_mem::{Buffer, BufferState};

use crate::context::Context;
use crate::metrics;
use crate::output::{self, Output, OutputSpec};
use crate::session::Session;

/// Open `source` and hand the stream to `f`. The stream is closed when this
/// returns, whatever the outcome; `f`'s error is returned as is.
///
/// No session is needed and nothing is materialized. Reads observe the
/// context's cancellation between chunks: a cancelled read fails with an
/// `io::Error` wrapping [`Error::Cancelled`] (see [`Error::from_io_boxed`]).
pub fn read<T, E, F>(ctx: &Context, source: &Source, f: F) -> std::result::Result<T, E>
where
    F: FnOnce(&mut dyn Read) -> std::result::Result<T, E>,
    E: From<Error>,
{
    let started = Instant::now();
    let opened = source.open(ctx.scope(), &ctx.http())?;
    let mut reader = CancelReader::new(opened.reader, ctx.scope().clone());

    let out = f(&mut reader);

    let consumed = reader.consumed();
    if let Ok(session) = ctx.session() {
        session.counters().record_read(consumed);
    }
    metrics::read_completed(source.kind(), consumed, started.elapsed());
    out
}

/// Materialize `source` into a buffer owned by the context's session and
/// return it in the requested representation.
///
/// On error nothing is left registered with the session and no temp file
/// created by this call survives.
pub fn copy(ctx: &Context, source: &Source, spec: impl Into<OutputSpec>) -> Result<Output> {
    let spec = spec.into();
    let session = ctx.session()?;
    session.ensure_active()?;
    ctx.check()?;

    let started = Instant::now();
    let buffer = match fast_path(session, source) {
        Some(buffer) => buffer,
        None => materialize(ctx, session, source)?,
    };
    let buffer = Arc::new(buffer);

    // A conversion failure drops the buffer before it is ever registered.
    let output = output::convert(session, Arc::clone(&buffer), spec)?;
    if let Err(e) = session.register(buffer.clone()) {
        buffer.release()?;
        return Err(e);
    }

    let state = buffer.state();
    let len = buffer.len();
    session.counters().record_copy(len, state);
    metrics::copy_completed(session.id(), source.kind(), state, len, started.elapsed());
    Ok(output)
}

/// Bytes already in memory that the policy would keep in memory are wrapped
/// without copying. Everything else takes the streaming path.
fn fast_path(session: &Session, source: &Source) -> Option<Buffer> {
    let Source::Bytes(data) = source else {
        return None;
    };
    if !policy::decide(Some(data.len() as u64), session.config()).keep_in_memory() {
        return None;
    }
    Buffer::from_bytes(data.clone(), session.buffer_context())
}

fn materialize(ctx: &Context, session: &Session, source: &Source) -> Result<Buffer> {
    let opened = source.open(ctx.scope(), &ctx.http())?;
    let cfg = session.config();
    let placement = policy::decide(opened.len, cfg);
    tracing::trace!(session = %session.id(), source = %source, ?placement, "copy placement");

    // Dropping the buffer on any early return removes its partial file.
    let buffer = Buffer::new(placement, opened.len, session.buffer_context())?;
    let mut reader = CancelReader::new(opened.reader, ctx.scope().clone());
    let mut chunk = vec![0u8; cfg.chunk_size];

    loop {
        ctx.check()?;
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                // A deadline that fired mid-read surfaces as a timeout from below.
                ctx.check()?;
                return Err(Error::from_io_boxed(e));
            }
        };
        buffer.append(&chunk[..n])?;
        tracing::trace!(buffer = %buffer.id(), bytes = n, total = buffer.len(), "chunk appended");
    }

    if let Some(expected) = opened.len {
        if buffer.len() != expected {
            return Err(Error::Io(std::io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("{source}: expected {expected} bytes, got {}", buffer.len()),
            )));
        }
    }

    buffer.finalize()?;
    ctx.check()?;
    if buffer.state() != BufferState::InMemory {
        tracing::debug!(session = %session.id(), buffer = %buffer.id(), bytes = buffer.len(), "copy spilled");
    }
    Ok(buffer)
}
