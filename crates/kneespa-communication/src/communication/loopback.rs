//! In-memory device link
//!
//! A [`LoopbackLink`] stands where a serial port would; the paired
//! [`LoopbackDevice`] plays the controller. Dropping the device side looks
//! to the transport like the cable being pulled.

use super::DeviceLink;
use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

const READ_TIMEOUT: Duration = Duration::from_millis(20);

/// Host side of an in-memory link
pub struct LoopbackLink {
    name: String,
    from_device: Receiver<Vec<u8>>,
    to_device: Sender<Vec<u8>>,
}

/// Device side of an in-memory link
pub struct LoopbackDevice {
    to_host: Sender<Vec<u8>>,
    from_host: Receiver<Vec<u8>>,
    pending: String,
}

/// Create a connected host/device pair
pub fn loopback(name: impl Into<String>) -> (LoopbackLink, LoopbackDevice) {
    let (to_host, from_device) = mpsc::channel();
    let (to_device, from_host) = mpsc::channel();
    (
        LoopbackLink {
            name: name.into(),
            from_device,
            to_device,
        },
        LoopbackDevice {
            to_host,
            from_host,
            pending: String::new(),
        },
    )
}

impl DeviceLink for LoopbackLink {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn split(self: Box<Self>) -> io::Result<(Box<dyn Read + Send>, Box<dyn Write + Send>)> {
        let this = *self;
        Ok((
            Box::new(LoopbackReader {
                rx: this.from_device,
                pending: Vec::new(),
            }),
            Box::new(LoopbackWriter { tx: this.to_device }),
        ))
    }
}

struct LoopbackReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl Read for LoopbackReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.rx.recv_timeout(READ_TIMEOUT) {
                Ok(bytes) => self.pending = bytes,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
                }
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

struct LoopbackWriter {
    tx: Sender<Vec<u8>>,
}

impl Write for LoopbackWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "device side closed"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LoopbackDevice {
    /// Write one line to the host; `\n` is appended
    pub fn send_line(&self, line: &str) -> io::Result<()> {
        self.send_raw(format!("{}\n", line).as_bytes())
    }

    /// Write raw bytes to the host
    pub fn send_raw(&self, bytes: &[u8]) -> io::Result<()> {
        self.to_host
            .send(bytes.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "host side closed"))
    }

    /// Next complete line written by the host, without its terminator
    ///
    /// Returns `None` on timeout or once the host side is gone.
    pub fn recv_line(&mut self, timeout: Duration) -> Option<String> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if let Some(pos) = self.pending.find('\n') {
                let line: String = self.pending.drain(..=pos).collect();
                return Some(line.trim_end().to_string());
            }
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            match self.from_host.recv_timeout(remaining) {
                Ok(bytes) => self.pending.push_str(&String::from_utf8_lossy(&bytes)),
                Err(_) => return None,
            }
        }
    }

    /// Answer every host line on a background thread
    ///
    /// The thread ends when the host side closes. Replies go out in order.
    pub fn serve<F>(mut self, mut responder: F) -> JoinHandle<()>
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        std::thread::spawn(move || loop {
            match self.from_host.recv() {
                Ok(bytes) => {
                    self.pending.push_str(&String::from_utf8_lossy(&bytes));
                    while let Some(pos) = self.pending.find('\n') {
                        let line: String = self.pending.drain(..=pos).collect();
                        for reply in responder(line.trim_end()) {
                            if self.send_line(&reply).is_err() {
                                return;
                            }
                        }
                    }
                }
                Err(_) => return,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_cross_the_link() {
        let (link, mut device) = loopback("loop0");
        let (mut reader, mut writer) = Box::new(link).split().expect("split");

        writer.write_all(b"L6\n").expect("write");
        assert_eq!(device.recv_line(Duration::from_secs(1)).as_deref(), Some("L6"));

        device.send_line("G").expect("send");
        let mut buf = [0u8; 8];
        let n = reader.read(&mut buf).expect("read");
        assert_eq!(&buf[..n], b"G\n");
    }

    #[test]
    fn test_reader_times_out_then_sees_eof() {
        let (link, device) = loopback("loop0");
        let (mut reader, _writer) = Box::new(link).split().expect("split");

        let mut buf = [0u8; 8];
        let err = reader.read(&mut buf).expect_err("no data yet");
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        drop(device);
        assert_eq!(reader.read(&mut buf).expect("eof"), 0);
    }
}
