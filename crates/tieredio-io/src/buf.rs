//! Cancellation-aware reader adaptor.
//!
//! Every `read` call is a chunk boundary: the scope is checked first and a
//! cancelled scope surfaces as an `io::Error` wrapping [`Error::Cancelled`]
//! (recover it with [`Error::from_io_boxed`]).

use std::io::{self, Read};

use tieredio_core::cancel::CancelScope;
use tieredio_core::error::Error;

pub struct CancelReader<R: Read> {
    inner: R,
    scope: CancelScope,
    consumed: u64,
}

impl<R: Read> CancelReader<R> {
    pub fn new(inner: R, scope: CancelScope) -> Self {
        Self {
            inner,
            scope,
            consumed: 0,
        }
    }

    /// Bytes handed out so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for CancelReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.scope.check().map_err(Error::into_io)?;
        let n = self.inner.read(buf)?;
        self.consumed += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_after_cancel() {
        let scope = CancelScope::default();
        let mut r = CancelReader::new(&b"abcdef"[..], scope.clone());
        let mut buf = [0u8; 3];
        assert_eq!(r.read(&mut buf).unwrap(), 3);
        assert_eq!(r.consumed(), 3);

        scope.token().cancel();
        let err = r.read(&mut buf).unwrap_err();
        assert!(matches!(Error::from_io_boxed(err), Error::Cancelled));
    }
}
