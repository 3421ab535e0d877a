//! Byte-stream transports carrying QMP traffic.
//!
//! The session needs three things from a transport: an independent reader
//! half for the line reader thread, a way to write whole messages, and a
//! close operation that unblocks that reader.

use std::io::{self, Read};

#[cfg(unix)]
use std::io::Write;
#[cfg(unix)]
use std::net::Shutdown;
#[cfg(unix)]
use std::os::unix::net::UnixStream;
#[cfg(unix)]
use std::path::Path;
#[cfg(unix)]
use std::time::Duration;

#[cfg(unix)]
use socket2::{Domain, SockAddr, Socket, Type};

#[cfg(unix)]
use crate::errors::QmpError;

/// Duplex byte stream used by a session.
pub trait Transport: Send + 'static {
    /// Returns an independent handle for reading from the stream.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the handle cannot be created.
    fn reader(&self) -> io::Result<Box<dyn Read + Send>>;

    /// Writes all of `bytes` and flushes.
    ///
    /// # Errors
    ///
    /// Returns the underlying write error.
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Closes the stream so a blocked reader observes end-of-file.
    ///
    /// # Errors
    ///
    /// Returns the underlying error; closing an already closed stream is
    /// not an error.
    fn close(&mut self) -> io::Result<()>;
}

#[cfg(unix)]
impl Transport for UnixStream {
    fn reader(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(self.try_clone()?))
    }

    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes)?;
        self.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        match self.shutdown(Shutdown::Both) {
            Err(error) if error.kind() == io::ErrorKind::NotConnected => Ok(()),
            result => result,
        }
    }
}

/// Connects to the QMP Unix socket at `path`, giving up after `timeout`.
///
/// # Errors
///
/// Returns [`QmpError::Dial`] naming the socket when the connection fails.
#[cfg(unix)]
pub fn dial(path: &Path, timeout: Duration) -> Result<UnixStream, QmpError> {
    connect_unix(path, timeout).map_err(|source| QmpError::Dial {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(unix)]
fn connect_unix(path: &Path, timeout: Duration) -> io::Result<UnixStream> {
    let socket = Socket::new(Domain::UNIX, Type::STREAM, None)?;
    let address = SockAddr::unix(path)?;
    socket.connect_timeout(&address, timeout)?;
    Ok(socket.into())
}
