//! TCP transport to the emulator's gdb stub.
//!
//! The transport owns the socket exclusively. Writes go through one
//! mutex-guarded handle and happen exactly once; there are no
//! socket-level retries. Reading happens on a clone of the stream that
//! the client hands to its reader thread.

use std::io::Write;
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use log::trace;

use super::error::GdbError;
use super::packet;

pub struct Transport {
    writer: Mutex<TcpStream>,
    /// While set, every framed packet we receive is acknowledged with a
    /// `+`. Cleared once `QStartNoAckMode` is accepted.
    ack_mode: AtomicBool,
}

impl Transport {
    /// Open the TCP stream to the stub.
    ///
    /// A refused connection comes straight back to the caller so an
    /// outer retry loop can poll for the emulator without spurious
    /// error events.
    pub fn connect(host: &str, port: u16) -> Result<Transport, GdbError> {
        let stream = TcpStream::connect((host, port))?;
        // Request/reply traffic is small and latency-bound.
        let _ = stream.set_nodelay(true);
        Ok(Transport {
            writer: Mutex::new(stream),
            ack_mode: AtomicBool::new(true),
        })
    }

    /// A second handle on the stream for the reader thread.
    pub fn reader_stream(&self) -> Result<TcpStream, GdbError> {
        Ok(self.writer.lock().unwrap().try_clone()?)
    }

    /// Frame and write one packet.
    pub fn send_packet(&self, payload: &str) -> Result<(), GdbError> {
        let framed = packet::frame(payload);
        trace!("--> {}", framed);
        let mut writer = self.writer.lock().unwrap();
        writer.write_all(framed.as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    /// Write the raw `0x03` interrupt byte, outside any framing.
    pub fn send_break(&self) -> Result<(), GdbError> {
        trace!("--> <break 0x03>");
        let mut writer = self.writer.lock().unwrap();
        writer.write_all(&[0x03])?;
        writer.flush()?;
        Ok(())
    }

    /// Acknowledge a received packet when the ack layer is still on.
    pub fn ack_received(&self) {
        if self.ack_mode.load(Ordering::Acquire) {
            let mut writer = self.writer.lock().unwrap();
            let _ = writer.write_all(b"+");
            let _ = writer.flush();
        }
    }

    pub fn set_ack_mode(&self, enabled: bool) {
        self.ack_mode.store(enabled, Ordering::Release);
    }

    /// Tear the connection down; the reader thread unblocks with EOF and
    /// any pending request fails with `Disconnected`.
    pub fn close(&self) {
        let writer = self.writer.lock().unwrap();
        let _ = writer.shutdown(Shutdown::Both);
    }
}
