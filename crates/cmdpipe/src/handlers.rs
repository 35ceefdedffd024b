//! Stream handler types and ready-made handlers
//!
//! A read handler receives the child's stdout or stderr and turns it into a
//! value; a write handler receives the child's stdin. The stream is closed
//! when the handler's future completes or is dropped.

use std::io;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

use crate::config::Charset;
use crate::recorder::ErrorRecorder;

/// Readable end of the child's stdout or stderr
pub type ReadStream = Box<dyn AsyncRead + Send + Unpin>;

/// Writable end of the child's stdin
pub type WriteStream = Box<dyn AsyncWrite + Send + Unpin>;

pub(crate) type ReadHandler<T> =
    Arc<dyn Fn(ReadStream) -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>;

pub(crate) type WriteHandler =
    Arc<dyn Fn(WriteStream) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Read everything and decode it as text
pub fn text(
    charset: Charset,
) -> impl Fn(ReadStream) -> BoxFuture<'static, anyhow::Result<String>> + Send + Sync + Clone {
    move |stream| read_text(stream, charset).boxed()
}

/// Read everything as raw bytes
pub fn bytes() -> impl Fn(ReadStream) -> BoxFuture<'static, anyhow::Result<Vec<u8>>> + Send + Sync + Clone
{
    |stream| read_bytes(stream).boxed()
}

/// Read everything as lines, without line terminators
pub fn lines(
    charset: Charset,
) -> impl Fn(ReadStream) -> BoxFuture<'static, anyhow::Result<Vec<String>>> + Send + Sync + Clone {
    move |stream| read_lines(stream, charset).boxed()
}

/// Write `data` to stdin, then close it
///
/// A child that exits without reading all of its input is not an error.
pub fn write(
    data: impl Into<Vec<u8>>,
) -> impl Fn(WriteStream) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + Clone {
    let data: Arc<[u8]> = data.into().into();
    move |stream| write_all(stream, Arc::clone(&data)).boxed()
}

async fn read_bytes(mut stream: ReadStream) -> anyhow::Result<Vec<u8>> {
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    Ok(buf)
}

async fn read_text(stream: ReadStream, charset: Charset) -> anyhow::Result<String> {
    let buf = read_bytes(stream).await?;
    Ok(charset.decode(&buf).into_owned())
}

async fn read_lines(stream: ReadStream, charset: Charset) -> anyhow::Result<Vec<String>> {
    let mut reader = BufReader::new(stream);
    let mut lines = Vec::new();
    let mut buf = Vec::new();
    while reader.read_until(b'\n', &mut buf).await? > 0 {
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        lines.push(charset.decode(&buf).into_owned());
        buf.clear();
    }
    Ok(lines)
}

async fn write_all(mut stream: WriteStream, data: Arc<[u8]>) -> anyhow::Result<()> {
    match write_and_close(&mut stream, &data).await {
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
            debug!(len = data.len(), "Child closed stdin before reading all input");
            Ok(())
        }
        other => other.map_err(Into::into),
    }
}

async fn write_and_close(stream: &mut WriteStream, data: &[u8]) -> io::Result<()> {
    stream.write_all(data).await?;
    stream.shutdown().await
}

/// Feed a stream through an [`ErrorRecorder`] and render the transcript
pub(crate) async fn record_errors(mut stream: ReadStream, charset: Charset) -> anyhow::Result<String> {
    let mut recorder = ErrorRecorder::default().with_charset(charset);
    let mut buf = [0u8; 4096];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        recorder.push_bytes(&buf[..n]);
    }
    Ok(recorder.finish())
}
