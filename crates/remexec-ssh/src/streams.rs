//! Stream attachment for a session

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};

/// Buffered bytes between the channel and an unread [`OutputPipe`]
pub(crate) const PIPE_CAPACITY: usize = 64 * 1024;

pub(crate) type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub(crate) type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Readable end of a stdout or stderr pipe
///
/// Reaches end of file once the remote command has finished and all of its
/// output has been delivered. The pipe has a bounded buffer; a command whose
/// output is never read stalls once the buffer is full.
#[derive(Debug)]
pub struct OutputPipe {
    inner: DuplexStream,
}

impl AsyncRead for OutputPipe {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

/// Destination of one output stream
#[derive(Default)]
pub(crate) enum OutputSlot {
    #[default]
    Discard,
    Writer(BoxedWriter),
    Pipe(DuplexStream),
}

impl OutputSlot {
    pub(crate) fn is_attached(&self) -> bool {
        !matches!(self, OutputSlot::Discard)
    }

    pub(crate) fn is_pipe(&self) -> bool {
        matches!(self, OutputSlot::Pipe(_))
    }

    /// Replace the slot with a pipe and return its readable end
    pub(crate) fn open_pipe(&mut self) -> OutputPipe {
        let (ours, theirs) = tokio::io::duplex(PIPE_CAPACITY);
        *self = OutputSlot::Pipe(ours);
        OutputPipe { inner: theirs }
    }

    pub(crate) fn into_sink(self) -> Option<BoxedWriter> {
        match self {
            OutputSlot::Discard => None,
            OutputSlot::Writer(writer) => Some(writer),
            OutputSlot::Pipe(pipe) => Some(Box::new(pipe)),
        }
    }
}

/// Streams attached before the command starts
#[derive(Default)]
pub(crate) struct Streams {
    pub(crate) stdin: Option<BoxedReader>,
    pub(crate) stdout: OutputSlot,
    pub(crate) stderr: OutputSlot,
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;

    #[tokio::test]
    async fn test_pipe_delivers_then_eof() {
        let mut slot = OutputSlot::default();
        let mut pipe = slot.open_pipe();
        assert!(slot.is_pipe());

        let mut sink = slot.into_sink().unwrap();
        sink.write_all(b"line\n").await.unwrap();
        drop(sink);

        let mut out = String::new();
        pipe.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "line\n");
    }

    #[test]
    fn test_discard_has_no_sink() {
        let slot = OutputSlot::default();

        assert!(!slot.is_attached());
        assert!(slot.into_sink().is_none());
    }
}
