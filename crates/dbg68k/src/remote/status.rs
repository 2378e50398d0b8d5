//! Halt status (`S`/`T` stop reply) parsing.

use std::collections::BTreeMap;

use super::error::GdbError;
use super::thread::ThreadId;

/// Signal number reported in a stop reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltSignal {
    /// SIGINT (2): pause / break.
    Interrupt,
    /// SIGILL (4): illegal instruction.
    IllegalInstruction,
    /// SIGTRAP (5): breakpoint or single step.
    Trap,
    /// SIGEMT (7): emulator trap.
    Emt,
    /// SIGFPE (8): arithmetic exception.
    ArithmeticError,
    /// SIGBUS (10): bus error (odd address or bad access).
    BusError,
    /// SIGSEGV (11): address violation.
    SegmentationFault,
    Other(u8),
}

impl HaltSignal {
    pub fn from_code(code: u8) -> HaltSignal {
        match code {
            2 => HaltSignal::Interrupt,
            4 => HaltSignal::IllegalInstruction,
            5 => HaltSignal::Trap,
            7 => HaltSignal::Emt,
            8 => HaltSignal::ArithmeticError,
            10 => HaltSignal::BusError,
            11 => HaltSignal::SegmentationFault,
            other => HaltSignal::Other(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            HaltSignal::Interrupt => 2,
            HaltSignal::IllegalInstruction => 4,
            HaltSignal::Trap => 5,
            HaltSignal::Emt => 7,
            HaltSignal::ArithmeticError => 8,
            HaltSignal::BusError => 10,
            HaltSignal::SegmentationFault => 11,
            HaltSignal::Other(code) => *code,
        }
    }

    pub fn label(&self) -> String {
        match self {
            HaltSignal::Interrupt => "interrupt".to_string(),
            HaltSignal::IllegalInstruction => "illegal instruction".to_string(),
            HaltSignal::Trap => "trace/breakpoint trap".to_string(),
            HaltSignal::Emt => "emulator trap".to_string(),
            HaltSignal::ArithmeticError => "arithmetic exception".to_string(),
            HaltSignal::BusError => "bus error".to_string(),
            HaltSignal::SegmentationFault => "address violation".to_string(),
            HaltSignal::Other(code) => format!("signal {}", code),
        }
    }
}

/// Why and where the target stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HaltStatus {
    pub signal: HaltSignal,
    /// Register values the stub attached to a `T` reply, by register
    /// index.
    pub registers: BTreeMap<u32, u32>,
    /// The stopping thread, when the reply names one.
    pub thread: Option<ThreadId>,
}

impl HaltStatus {
    /// PC attached to the reply, when register 17 was included.
    pub fn pc(&self) -> Option<u32> {
        self.registers
            .get(&crate::remote::registers::PC_INDEX)
            .copied()
    }
}

/// Parse an `S` or `T` stop reply.
///
/// The two digits after the letter are the signal. A `T` reply continues
/// with `;`-separated entries: `thread:<id>` names the stopping thread,
/// `<hex>:<hex>` pairs carry register values, and anything else
/// (`swbreak:` and friends) is ignored.
pub fn parse_halt_status(payload: &str) -> Result<HaltStatus, GdbError> {
    let bad = || GdbError::Protocol(format!("bad stop reply: {:?}", payload));

    let kind = payload.get(..1).ok_or_else(bad)?;
    if kind != "S" && kind != "T" {
        return Err(bad());
    }
    let rest = &payload[1..];
    let signal_digits = rest.get(..2).ok_or_else(bad)?;
    let signal = u8::from_str_radix(signal_digits, 16).map_err(|_| bad())?;

    let mut status = HaltStatus {
        signal: HaltSignal::from_code(signal),
        registers: BTreeMap::new(),
        thread: None,
    };
    if kind == "S" {
        return Ok(status);
    }

    for entry in rest[2..].split(';').filter(|e| !e.is_empty()) {
        let Some((key, value)) = entry.split_once(':') else {
            continue;
        };
        if key == "thread" {
            status.thread = Some(ThreadId::parse(value)?);
        } else if let Ok(index) = u32::from_str_radix(key, 16) {
            if let Ok(reg) = u32::from_str_radix(value, 16) {
                status.registers.insert(index, reg);
            }
        }
        // Other keys (swbreak:, hwbreak:, …) carry no data we keep.
    }
    Ok(status)
}
