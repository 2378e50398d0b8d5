//! Asynchronous events delivered to the consumer.
//!
//! Events travel over an mpsc channel, so a listener always observes
//! them strictly after the packet that caused them was fully processed,
//! never re-entrantly from inside the reader.

use crate::srcmap::Segment;

use super::breakpoint::Breakpoint;
use super::error::GdbError;
use super::status::HaltStatus;

#[derive(Debug, Clone)]
pub enum DebugEvent {
    /// Capability negotiation finished.
    Connected,
    /// The target stopped (breakpoint, step, pause, exception).
    Stop(HaltStatus),
    /// The stub announced the program's segment table.
    Segments(Vec<Segment>),
    /// A segment query refreshed the table.
    SegmentsUpdated(Vec<Segment>),
    /// A thread appeared in the stub's thread list.
    ThreadStarted(u32),
    /// A breakpoint was accepted by the stub.
    BreakpointValidated(Breakpoint),
    /// Debugger-directed console output from the target.
    Output(String),
    /// The process exited.
    End { exit_code: u32 },
    /// A failure surfaced outside any one request.
    Error(GdbError),
}
