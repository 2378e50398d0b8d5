//! Target thread identities and the Amiga system thread roles.
//!
//! The emulator models the custom chips' DMA channels as extra threads
//! next to the CPU; the copper even gets its own stack frame handling.

use super::error::GdbError;

/// Well-known thread ids the stub assigns to the Amiga system "threads".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AmigaThread {
    Cpu = 1,
    Copper = 2,
    Audio0 = 3,
    Audio1 = 4,
    Audio2 = 5,
    Audio3 = 6,
    Disk = 7,
    Sprite = 8,
    Blitter = 9,
    BitPlane = 10,
}

impl AmigaThread {
    pub fn from_id(id: u32) -> Option<AmigaThread> {
        match id {
            1 => Some(AmigaThread::Cpu),
            2 => Some(AmigaThread::Copper),
            3 => Some(AmigaThread::Audio0),
            4 => Some(AmigaThread::Audio1),
            5 => Some(AmigaThread::Audio2),
            6 => Some(AmigaThread::Audio3),
            7 => Some(AmigaThread::Disk),
            8 => Some(AmigaThread::Sprite),
            9 => Some(AmigaThread::Blitter),
            10 => Some(AmigaThread::BitPlane),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AmigaThread::Cpu => "cpu",
            AmigaThread::Copper => "copper",
            AmigaThread::Audio0 => "audio 0",
            AmigaThread::Audio1 => "audio 1",
            AmigaThread::Audio2 => "audio 2",
            AmigaThread::Audio3 => "audio 3",
            AmigaThread::Disk => "disk",
            AmigaThread::Sprite => "sprite",
            AmigaThread::Blitter => "blitter",
            AmigaThread::BitPlane => "bit-plane",
        }
    }
}

/// A target thread id, optionally qualified by a process id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadId {
    pub process: Option<u32>,
    pub thread: u32,
}

impl ThreadId {
    pub fn new(thread: u32) -> ThreadId {
        ThreadId {
            process: None,
            thread,
        }
    }

    pub fn with_process(process: u32, thread: u32) -> ThreadId {
        ThreadId {
            process: Some(process),
            thread,
        }
    }

    /// Wire form of the id: `p<pid>.<tid>` when the stub negotiated
    /// `multiprocess+`, a bare hex tid otherwise.
    pub fn marshal(&self, multiprocess: bool) -> String {
        if multiprocess {
            format!("p{:02x}.{:02x}", self.process.unwrap_or(1), self.thread)
        } else {
            format!("{:02x}", self.thread)
        }
    }

    /// Parse a wire-form thread id (`p01.0f` or `0f`).
    pub fn parse(s: &str) -> Result<ThreadId, GdbError> {
        let bad = || GdbError::Protocol(format!("bad thread id: {:?}", s));
        if let Some(rest) = s.strip_prefix('p') {
            let (pid, tid) = rest.split_once('.').ok_or_else(bad)?;
            Ok(ThreadId {
                process: Some(u32::from_str_radix(pid, 16).map_err(|_| bad())?),
                thread: u32::from_str_radix(tid, 16).map_err(|_| bad())?,
            })
        } else {
            Ok(ThreadId {
                process: None,
                thread: u32::from_str_radix(s, 16).map_err(|_| bad())?,
            })
        }
    }

    pub fn system_role(&self) -> Option<AmigaThread> {
        AmigaThread::from_id(self.thread)
    }

    pub fn is_cpu(&self) -> bool {
        self.thread == AmigaThread::Cpu as u32
    }

    pub fn is_copper(&self) -> bool {
        self.thread == AmigaThread::Copper as u32
    }
}

/// Execution state the client last requested for a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    Running,
    Stepping,
}

/// A thread enumerated from the stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugThread {
    pub id: ThreadId,
    pub state: ThreadState,
}

impl DebugThread {
    pub fn new(id: ThreadId) -> DebugThread {
        DebugThread {
            id,
            state: ThreadState::Running,
        }
    }

    /// Human label for the thread: the system role when known, the raw
    /// id otherwise.
    pub fn display_name(&self) -> String {
        match self.id.system_role() {
            Some(role) => role.label().to_string(),
            None => format!("thread {}", self.id.thread),
        }
    }
}

/// One entry of a thread's unwound stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackPosition {
    /// Stub frame index; `-1` for the live frame, `-10` for the copper's
    /// synthetic frame.
    pub index: i32,
    pub pc: u32,
    /// Segment holding `pc`, or `-1` when the pc is outside every
    /// segment and only a disassembly view can represent it.
    pub segment_id: i32,
    /// Offset within the segment, or the raw pc when `segment_id` is -1.
    pub offset: u32,
}

/// Parse a `qfThreadInfo` reply: `m<id>[,<id>]*l`.
pub fn parse_thread_info(payload: &str) -> Result<Vec<ThreadId>, GdbError> {
    let body = payload
        .strip_prefix('m')
        .ok_or_else(|| GdbError::Protocol(format!("bad thread info reply: {:?}", payload)))?;
    let body = body.strip_suffix('l').unwrap_or(body);
    body.split(',')
        .filter(|part| !part.is_empty())
        .map(ThreadId::parse)
        .collect()
}
