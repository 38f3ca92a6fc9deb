//! Reader Transports
//!
//! The send path hands chunk bodies straight from the segment file to a
//! socket. Two transports exist:
//!
//! - **tcp**: header bytes are written normally; the body goes through
//!   `sendfile(2)` on Linux so the payload never enters userspace. Partial
//!   sends resume at the kernel-reported offset.
//! - **ssl**: everything must pass through the TLS record layer, so the
//!   body is pread into a bounded buffer and written like any other bytes.
//!
//! On platforms without `sendfile(2)` the tcp body path degrades to the
//! same buffered copy the ssl path uses.

use std::fs::File;
use std::io;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;

use crate::segment::read_at_most;

/// Buffered-copy block size for the ssl path and the non-Linux fallback.
const COPY_BUF_SIZE: usize = 64 * 1024;

/// Largest single sendfile(2) request.
#[cfg(target_os = "linux")]
const SENDFILE_MAX: u64 = 0x7fff_f000;

/// A connected downstream a reader streams chunks into.
pub enum Transport {
    Tcp(TcpStream),
    Ssl(Box<TlsStream<TcpStream>>),
}

impl Transport {
    /// Write raw bytes (chunk headers) through the transport.
    pub async fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            Transport::Tcp(stream) => stream.write_all(bytes).await,
            Transport::Ssl(stream) => stream.write_all(bytes).await,
        }
    }

    /// Transfer `len` bytes of `file` starting at `offset` to the socket.
    /// Returns the byte count actually sent (always `len` on success).
    pub async fn sendfile(&mut self, file: &File, offset: u64, len: u64) -> io::Result<u64> {
        match self {
            Transport::Tcp(stream) => sendfile_tcp(stream, file, offset, len).await,
            Transport::Ssl(stream) => copy_file_buffered(stream, file, offset, len).await,
        }
    }

    /// Flush transport buffers (a no-op for plain tcp).
    pub async fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Tcp(stream) => stream.flush().await,
            Transport::Ssl(stream) => stream.flush().await,
        }
    }
}

#[cfg(target_os = "linux")]
async fn sendfile_tcp(stream: &TcpStream, file: &File, offset: u64, len: u64) -> io::Result<u64> {
    use std::os::unix::io::AsRawFd;
    use tokio::io::Interest;

    let mut sent: u64 = 0;
    while sent < len {
        stream.writable().await?;
        let result = stream.try_io(Interest::WRITABLE, || {
            let mut file_offset = (offset + sent) as libc::off_t;
            let count = (len - sent).min(SENDFILE_MAX) as usize;
            let n = unsafe {
                libc::sendfile(
                    stream.as_raw_fd(),
                    file.as_raw_fd(),
                    &mut file_offset,
                    count,
                )
            };
            if n < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(n as u64)
            }
        });
        match result {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "sendfile hit end of segment before the chunk end",
                ));
            }
            Ok(n) => sent += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(sent)
}

#[cfg(not(target_os = "linux"))]
async fn sendfile_tcp(
    stream: &mut TcpStream,
    file: &File,
    offset: u64,
    len: u64,
) -> io::Result<u64> {
    copy_file_buffered(stream, file, offset, len).await
}

async fn copy_file_buffered<W>(writer: &mut W, file: &File, offset: u64, len: u64) -> io::Result<u64>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut sent: u64 = 0;
    while sent < len {
        let want = ((len - sent) as usize).min(COPY_BUF_SIZE);
        let buf = read_at_most(file, offset + sent, want)?;
        if buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "segment ended before the chunk end",
            ));
        }
        writer.write_all(&buf).await?;
        sent += buf.len() as u64;
    }
    Ok(sent)
}
