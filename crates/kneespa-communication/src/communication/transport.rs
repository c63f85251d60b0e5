//! Serial transport
//!
//! Owns the link to the device. Writes go out under a mutex, one whole line
//! at a time; async callers write from the blocking pool. A dedicated read thread splits the
//! incoming byte stream into lines, decodes them, and forwards the events
//! on a channel to a single dispatcher.

use super::serial::SerialLink;
use super::{CommandSink, ConnectionParams, DeviceLink, TransportEvent};
use crate::device::{Command, ResponseParser};
use async_trait::async_trait;
use kneespa_core::ConnectionError;
use parking_lot::Mutex;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;

type SharedWriter = Arc<Mutex<Option<Box<dyn Write + Send>>>>;

/// State shared between the transport and its read thread
struct LinkState {
    shutdown: AtomicBool,
    lost: AtomicBool,
    events: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
}

impl LinkState {
    /// Forward an event; false once the dispatcher is gone
    fn emit(&self, event: TransportEvent) -> bool {
        match self.events.lock().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Report the link as lost, once
    fn report_lost(&self, reason: String) {
        if self.shutdown.load(Ordering::SeqCst) || self.lost.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::error!("Connection lost: {}", reason);
        self.emit(TransportEvent::ConnectionLost { reason });
    }
}

/// Connection to the rig's controller
pub struct Transport {
    name: String,
    writer: SharedWriter,
    state: Arc<LinkState>,
    reader: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Transport {
    /// Open a serial port and start reading from it
    pub fn connect(
        params: &ConnectionParams,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>), ConnectionError> {
        let link = SerialLink::open(params)?;
        Self::open(Box::new(link))
    }

    /// Start a transport over any device link
    pub fn open(
        link: Box<dyn DeviceLink>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TransportEvent>), ConnectionError> {
        let name = link.name();
        let (reader, writer) = link.split().map_err(|e| ConnectionError::FailedToOpen {
            port: name.clone(),
            reason: e.to_string(),
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(LinkState {
            shutdown: AtomicBool::new(false),
            lost: AtomicBool::new(false),
            events: Mutex::new(Some(tx)),
        });

        let thread_state = state.clone();
        let handle = std::thread::Builder::new()
            .name(format!("kneespa-read-{}", name))
            .spawn(move || read_loop(reader, thread_state))
            .map_err(|e| ConnectionError::FailedToOpen {
                port: name.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!("Connected to {}", name);
        Ok((
            Self {
                name,
                writer: Arc::new(Mutex::new(Some(writer))),
                state,
                reader: Arc::new(Mutex::new(Some(handle))),
            },
            rx,
        ))
    }

    /// Port name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether commands can still be written
    pub fn is_connected(&self) -> bool {
        self.writer.lock().is_some() && !self.state.lost.load(Ordering::SeqCst)
    }

    /// Write one command line
    ///
    /// The line and its terminator go out under one lock, so concurrent
    /// callers never interleave. A write failure marks the link lost.
    pub fn send(&self, command: &Command) -> Result<(), ConnectionError> {
        write_line(&self.writer, &self.state, command)
    }

    /// Close the link; safe to call more than once
    ///
    /// Joins the read thread and closes the event channel.
    pub fn disconnect(&self) {
        close(&self.name, &self.writer, &self.state, &self.reader);
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[async_trait]
impl CommandSink for Transport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, command: &Command) -> Result<(), ConnectionError> {
        let writer = self.writer.clone();
        let state = self.state.clone();
        let owned = command.clone();
        tokio::task::spawn_blocking(move || write_line(&writer, &state, &owned))
            .await
            .map_err(|e| ConnectionError::SendFailed {
                command: command.encode(),
                reason: e.to_string(),
            })?
    }

    async fn disconnect(&self) {
        let name = self.name.clone();
        let writer = self.writer.clone();
        let state = self.state.clone();
        let reader = self.reader.clone();
        let closed =
            tokio::task::spawn_blocking(move || close(&name, &writer, &state, &reader)).await;
        if let Err(e) = closed {
            tracing::warn!("Closing {} failed: {}", self.name, e);
        }
    }
}

fn write_line(
    writer: &SharedWriter,
    state: &LinkState,
    command: &Command,
) -> Result<(), ConnectionError> {
    let line = command.to_line();
    let mut guard = writer.lock();

    let out = match guard.as_mut() {
        Some(out) if !state.lost.load(Ordering::SeqCst) => out,
        _ => {
            return Err(ConnectionError::SendFailed {
                command: command.encode(),
                reason: "not connected".to_string(),
            })
        }
    };

    match out.write_all(line.as_bytes()).and_then(|_| out.flush()) {
        Ok(()) => {
            tracing::debug!(">> {}", command);
            Ok(())
        }
        Err(e) => {
            guard.take();
            drop(guard);
            state.report_lost(format!("write failed: {}", e));
            Err(ConnectionError::SendFailed {
                command: command.encode(),
                reason: e.to_string(),
            })
        }
    }
}

/// Joins the read thread and closes the event channel
fn close(
    name: &str,
    writer: &SharedWriter,
    state: &LinkState,
    reader: &Mutex<Option<JoinHandle<()>>>,
) {
    state.shutdown.store(true, Ordering::SeqCst);
    let had_writer = writer.lock().take().is_some();

    if let Some(handle) = reader.lock().take() {
        if handle.join().is_err() {
            tracing::warn!("Read thread for {} panicked", name);
        }
    }
    state.events.lock().take();

    if had_writer {
        tracing::info!("Disconnected from {}", name);
    }
}

fn read_loop(mut reader: Box<dyn Read + Send>, state: Arc<LinkState>) {
    let mut parser = ResponseParser::new();
    let mut buffer: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 256];

    while !state.shutdown.load(Ordering::SeqCst) {
        match reader.read(&mut chunk) {
            Ok(0) => {
                state.report_lost("device closed the link".to_string());
                break;
            }
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let raw: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&raw);
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    tracing::debug!("<< {}", line);

                    match parser.parse(line) {
                        Ok(Some(event)) => {
                            if !state.emit(TransportEvent::Device(event)) {
                                tracing::debug!("Dispatcher gone, stopping read thread");
                                return;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => tracing::warn!("Dropping device line: {}", e),
                    }
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                state.report_lost(format!("read failed: {}", e));
                break;
            }
        }
    }
}
