use crossbeam::channel::{self, Receiver, Sender};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::color::Rgb;
use crate::error::{Error, Result};

pub const UNIVERSE_SIZE: usize = 512;

/// Output side of a DMX universe. Channels are 1-based.
pub trait DmxTransport: Send {
    /// Buffers a channel value; nothing is sent until [`submit`](Self::submit).
    fn set_channel(&mut self, channel: u16, value: u8);

    /// Sends the whole buffered frame.
    fn submit(&mut self) -> io::Result<()>;

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn slot(channel: u16) -> Option<usize> {
    let index = (channel as usize).checked_sub(1)?;
    (index < UNIVERSE_SIZE).then_some(index)
}

/// Keeps the frame in memory only. Used when no interface is attached.
#[derive(Debug, Clone)]
pub struct NullTransport {
    frame: [u8; UNIVERSE_SIZE],
}

impl NullTransport {
    pub fn new() -> Self {
        Self {
            frame: [0; UNIVERSE_SIZE],
        }
    }

    pub fn frame(&self) -> &[u8; UNIVERSE_SIZE] {
        &self.frame
    }
}

impl Default for NullTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl DmxTransport for NullTransport {
    fn set_channel(&mut self, channel: u16, value: u8) {
        if let Some(i) = slot(channel) {
            self.frame[i] = value;
        }
    }

    fn submit(&mut self) -> io::Result<()> {
        Ok(())
    }
}

const ENTTEC_START: u8 = 0x7E;
const ENTTEC_END: u8 = 0xE7;
const ENTTEC_SEND_DMX: u8 = 6;
const DMX_START_CODE: u8 = 0;

/// Enttec DMX USB Pro, driven through its serial device node.
pub struct EnttecProTransport {
    port: PathBuf,
    device: File,
    frame: [u8; UNIVERSE_SIZE],
}

impl EnttecProTransport {
    pub fn open(port: &Path) -> Result<Self> {
        let device = OpenOptions::new()
            .write(true)
            .open(port)
            .map_err(|source| Error::HardwareUnavailable {
                port: port.to_path_buf(),
                source,
            })?;
        tracing::info!(port = %port.display(), "DMX interface opened");
        Ok(Self {
            port: port.to_path_buf(),
            device,
            frame: [0; UNIVERSE_SIZE],
        })
    }

    pub fn port(&self) -> &Path {
        &self.port
    }

    /// "Output only send DMX" packet carrying the start code and all slots.
    pub fn packet(frame: &[u8; UNIVERSE_SIZE]) -> Vec<u8> {
        let len = (UNIVERSE_SIZE + 1) as u16;
        let mut packet = Vec::with_capacity(UNIVERSE_SIZE + 6);
        packet.extend_from_slice(&[ENTTEC_START, ENTTEC_SEND_DMX]);
        packet.extend_from_slice(&len.to_le_bytes());
        packet.push(DMX_START_CODE);
        packet.extend_from_slice(frame);
        packet.push(ENTTEC_END);
        packet
    }
}

impl DmxTransport for EnttecProTransport {
    fn set_channel(&mut self, channel: u16, value: u8) {
        if let Some(i) = slot(channel) {
            self.frame[i] = value;
        }
    }

    fn submit(&mut self) -> io::Result<()> {
        self.device.write_all(&Self::packet(&self.frame))?;
        self.device.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        tracing::info!(port = %self.port.display(), "DMX interface closed");
        self.device.flush()
    }
}

#[derive(Debug)]
pub enum WriterCommand {
    Write { start_channel: u16, rgb: Rgb },
    /// Acknowledged once every earlier write has been submitted.
    Flush(Sender<()>),
    Close,
}

/// Cloneable handle for queueing fixture colors on the writer.
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: Sender<WriterCommand>,
}

impl FrameSink {
    /// Queues an RGB write to `start_channel..start_channel + 2`. Returns
    /// `false` once the writer has stopped.
    pub fn write(&self, start_channel: u16, rgb: Rgb) -> bool {
        self.tx
            .send(WriterCommand::Write { start_channel, rgb })
            .is_ok()
    }
}

/// Single owner of the transport. Every fixture write goes through its
/// queue, so frames are never interleaved.
pub struct FrameWriter {
    tx: Sender<WriterCommand>,
    handle: Option<JoinHandle<()>>,
}

impl FrameWriter {
    pub fn spawn(transport: Box<dyn DmxTransport>) -> Result<Self> {
        let (tx, rx) = channel::unbounded();
        let handle = thread::Builder::new()
            .name("dmx-writer".into())
            .spawn(move || writer_loop(transport, rx))?;
        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    pub fn sink(&self) -> FrameSink {
        FrameSink {
            tx: self.tx.clone(),
        }
    }

    /// Waits until queued writes are on the wire, at most `timeout`.
    pub fn flush(&self, timeout: Duration) -> bool {
        let (ack_tx, ack_rx) = channel::bounded(1);
        if self.tx.send(WriterCommand::Flush(ack_tx)).is_err() {
            return false;
        }
        ack_rx.recv_timeout(timeout).is_ok()
    }

    /// Drains the queue, closes the transport and joins the writer thread.
    pub fn close(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.tx.send(WriterCommand::Close);
        if handle.join().is_err() {
            tracing::warn!("DMX writer panicked");
        }
    }
}

impl Drop for FrameWriter {
    fn drop(&mut self) {
        self.close();
    }
}

fn writer_loop(mut transport: Box<dyn DmxTransport>, rx: Receiver<WriterCommand>) {
    let mut closing = false;
    while !closing {
        let Ok(first) = rx.recv() else {
            break;
        };

        let mut dirty = false;
        let mut acks = Vec::new();
        for command in std::iter::once(first).chain(rx.try_iter()) {
            match command {
                WriterCommand::Write { start_channel, rgb } => {
                    transport.set_channel(start_channel, rgb.r);
                    transport.set_channel(start_channel.saturating_add(1), rgb.g);
                    transport.set_channel(start_channel.saturating_add(2), rgb.b);
                    dirty = true;
                }
                WriterCommand::Flush(ack) => acks.push(ack),
                WriterCommand::Close => {
                    closing = true;
                    break;
                }
            }
        }

        if dirty {
            if let Err(err) = transport.submit() {
                tracing::warn!(%err, "DMX frame submit failed");
            }
        }
        for ack in acks {
            let _ = ack.send(());
        }
    }

    if let Err(err) = transport.close() {
        tracing::warn!(error = %Error::Transport(err), "closing DMX transport");
    }
}
