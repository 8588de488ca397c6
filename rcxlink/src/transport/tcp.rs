//! TCP tunnel pipe.
//!
//! Connects to a remote tower daemon that forwards raw link bytes. The
//! device name is `host:port`; an empty name selects the local default.

use crate::error::{Error, Result};
use crate::transport::pipe::Pipe;
use log::trace;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

const DEFAULT_ADDR: &str = "127.0.0.1:2000";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// TCP tunnel pipe.
pub struct TcpPipe {
    stream: Option<TcpStream>,
    peer: String,
}

impl TcpPipe {
    /// Create an unconnected tunnel pipe.
    #[must_use]
    pub fn new() -> Self {
        Self {
            stream: None,
            peer: String::new(),
        }
    }

    fn stream_mut(&mut self) -> Result<&mut TcpStream> {
        self.stream.as_mut().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "tunnel pipe is closed",
            ))
        })
    }
}

impl Default for TcpPipe {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipe for TcpPipe {
    fn open(&mut self, device: &str) -> Result<()> {
        let addr = device.to_socket_addrs()?.next().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("no address for {device}"),
            ))
        })?;
        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
        stream.set_nodelay(true)?;

        trace!("tunnel connected to {addr}");
        self.stream = Some(stream);
        self.peer = device.to_string();
        Ok(())
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            trace!("tunnel to {} closed", self.peer);
        }
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream_mut()?;
        stream.write_all(data)?;
        stream.flush()?;
        Ok(())
    }

    fn read_bytes(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let stream = self.stream_mut()?;
        stream.set_read_timeout(Some(timeout))?;
        match stream.read(buf) {
            Ok(n) => Ok(n),
            Err(e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                Ok(0)
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn drain(&mut self) {
        let Ok(stream) = self.stream_mut() else {
            return;
        };
        if stream
            .set_read_timeout(Some(Duration::from_millis(1)))
            .is_err()
        {
            return;
        }
        let mut sink = [0u8; 64];
        while matches!(stream.read(&mut sink), Ok(n) if n > 0) {}
    }

    fn default_device(&self) -> &str {
        DEFAULT_ADDR
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_roundtrip_through_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4];
            conn.read_exact(&mut buf).unwrap();
            // Echo the complement of the first byte back.
            conn.write_all(&[!buf[0]]).unwrap();
        });

        let mut pipe = TcpPipe::new();
        pipe.open(&addr.to_string()).unwrap();
        pipe.write_bytes(&[0x10, 0x20, 0x30, 0x40]).unwrap();

        let mut reply = [0u8; 1];
        let n = pipe
            .read_bytes(&mut reply, Duration::from_secs(2))
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(reply[0], !0x10u8);

        pipe.close();
        server.join().unwrap();
    }

    #[test]
    fn test_open_rejects_bad_address() {
        let mut pipe = TcpPipe::new();
        assert!(pipe.open("not an address").is_err());
    }

    #[test]
    fn test_closed_pipe_rejects_io() {
        let mut pipe = TcpPipe::new();
        assert!(pipe.write_bytes(&[0]).is_err());
    }
}
