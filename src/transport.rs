//! Byte transport (C3): serial or TCP, with independently usable line and
//! binary readers.
//!
//! Mirrors the teacher's `Connection` (owns the stream, exposes `send`/
//! `recv_timeout`) but speaks the device's plain line/binary protocol
//! instead of a stuffed frame format — the device itself only frames the
//! *outbound* capture/config requests (see [`crate::frame`]); everything it
//! sends back is newline-terminated text or a raw binary payload.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use serialport::SerialPort;

use crate::addr::{DeviceTarget, SERIAL_BAUD};
use crate::error::{DeviceError, DeviceResult};

/// How long a single underlying `read()` call may block before we re-check
/// the overall deadline. Keeps `read_line`/`read_exact` responsive to their
/// caller-supplied timeout regardless of OS-level read granularity.
const POLL_QUANTUM: Duration = Duration::from_millis(100);

enum Stream {
    Serial(Box<dyn SerialPort>),
    Tcp(TcpStream),
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Stream::Serial(s) => s.read(buf),
            Stream::Tcp(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Stream::Serial(s) => s.write(buf),
            Stream::Tcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Stream::Serial(s) => s.flush(),
            Stream::Tcp(s) => s.flush(),
        }
    }
}

impl Stream {
    fn set_read_timeout(&mut self, timeout: Duration) -> DeviceResult<()> {
        match self {
            Stream::Serial(s) => s.set_timeout(timeout).map_err(DeviceError::from),
            Stream::Tcp(s) => s.set_read_timeout(Some(timeout)).map_err(DeviceError::from),
        }
    }
}

fn dial(target: &DeviceTarget) -> DeviceResult<Stream> {
    match target {
        DeviceTarget::Serial { path } => {
            let port = serialport::new(path.clone(), SERIAL_BAUD)
                .timeout(POLL_QUANTUM)
                .open()?;
            Ok(Stream::Serial(port))
        }
        DeviceTarget::Tcp { addr, port } => {
            let stream = TcpStream::connect((*addr, *port))?;
            stream.set_nodelay(true)?;
            Ok(Stream::Tcp(stream))
        }
    }
}

/// A connected byte transport with buffered line/binary readers.
///
/// `read_line` and `read_binary` are independently callable in any order —
/// each consumes only what it needs from the shared carry-over buffer, so a
/// caller can read a status line, then switch to reading a raw payload,
/// without losing bytes that arrived early (spec §4.3).
pub struct Transport {
    stream: Stream,
    target: DeviceTarget,
    /// Bytes read from the stream but not yet consumed by a reader call.
    carry: Vec<u8>,
}

impl Transport {
    /// Open a connection to `target`. Does not perform the handshake —
    /// that's [`crate::device`]'s job.
    pub fn open(target: DeviceTarget) -> DeviceResult<Self> {
        let stream = dial(&target)?;
        Ok(Self { stream, target, carry: Vec::new() })
    }

    pub fn target(&self) -> &DeviceTarget {
        &self.target
    }

    /// Drop and reopen the underlying stream without re-running the
    /// handshake (spec §4.4 `stop()` recovery path). Any buffered but
    /// unconsumed bytes are discarded.
    pub fn reconnect(&mut self) -> DeviceResult<()> {
        self.stream = dial(&self.target)?;
        self.carry.clear();
        Ok(())
    }

    pub fn write_all(&mut self, data: &[u8]) -> DeviceResult<()> {
        self.stream.write_all(data).map_err(DeviceError::from)
    }

    /// Read one newline-terminated line, stripping a trailing `\r\n` or
    /// `\n`. Blocks up to `timeout` total across however many underlying
    /// reads it takes to see the delimiter.
    pub fn read_line(&mut self, timeout: Duration) -> DeviceResult<String> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(pos) = self.carry.iter().position(|&b| b == b'\n') {
                let mut line = self.carry.drain(..=pos).collect::<Vec<u8>>();
                line.pop(); // trailing \n
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return String::from_utf8(line).map_err(|e| DeviceError::Wire(e.into()));
            }
            self.fill_once(deadline)?;
        }
    }

    /// Read exactly `n` bytes.
    pub fn read_binary(&mut self, n: usize, timeout: Duration) -> DeviceResult<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        while self.carry.len() < n {
            self.fill_once(deadline)?;
        }
        Ok(self.carry.drain(..n).collect())
    }

    fn fill_once(&mut self, deadline: Instant) -> DeviceResult<()> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(DeviceError::CommandTimeout(Duration::ZERO));
        }
        self.stream.set_read_timeout(remaining.min(POLL_QUANTUM))?;
        let mut buf = [0u8; 4096];
        match self.stream.read(&mut buf) {
            Ok(0) => Err(DeviceError::Disconnected),
            Ok(n) => {
                self.carry.extend_from_slice(&buf[..n]);
                Ok(())
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(())
            }
            Err(e) => Err(DeviceError::from(e)),
        }
    }
}
