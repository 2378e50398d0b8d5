//! GDB Remote Serial Protocol client for the emulator's stub.
//!
//! One TCP connection, one request in flight at a time. Packet framing
//! and classification live in [`packet`], the socket in [`transport`],
//! capability negotiation and resume encodings in [`dialect`], and the
//! typed debugger operations in [`client`].

pub mod breakpoint;
pub mod client;
pub mod dialect;
pub mod errcodes;
pub mod error;
pub mod event;
pub mod packet;
pub mod registers;
pub mod status;
pub mod thread;
pub mod transport;

pub use breakpoint::{Breakpoint, DataAccess};
pub use client::{ClientConfig, GdbClient};
pub use dialect::{Capabilities, ResumeAction};
pub use error::GdbError;
pub use event::DebugEvent;
pub use packet::{Packet, PacketKind};
pub use registers::{decode_sr, RegisterSet, SrFields};
pub use status::{HaltSignal, HaltStatus};
pub use thread::{AmigaThread, DebugThread, StackPosition, ThreadId, ThreadState};
