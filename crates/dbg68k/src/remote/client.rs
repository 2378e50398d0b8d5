//! The debugger client: one serialised request channel to the stub,
//! asynchronous event routing, and the typed operations the adapter
//! layer drives.

use std::io::Read;
use std::net::TcpStream;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::hunk::types::MemoryType;
use crate::srcmap::Segment;

use super::breakpoint::{Breakpoint, DataAccess};
use super::dialect::{self, Capabilities, ResumeAction};
use super::error::GdbError;
use super::event::DebugEvent;
use super::packet::{self, Packet, PacketKind, PacketParser};
use super::registers::{register_index, RegisterSet, NUM_REGISTERS, PC_INDEX};
use super::status::{parse_halt_status, HaltStatus};
use super::thread::{parse_thread_info, DebugThread, StackPosition, ThreadId, ThreadState};
use super::transport::Transport;

/// Tunables the consumer passes at connect time.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Deadline for each awaited reply.
    pub reply_timeout: Duration,
    /// Use the stub-specific legacy `n` opcode for range stepping when
    /// verbose resume is unavailable. Off by default; the fallback is a
    /// plain step.
    pub legacy_range_step: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            reply_timeout: Duration::from_secs(60),
            legacy_range_step: false,
        }
    }
}

/// The one-shot waiter for the single in-flight request.
struct Waiter {
    expected: Vec<PacketKind>,
    tx: SyncSender<Packet>,
}

/// Routes inbound packets: the registered waiter gets its reply, every
/// other packet is an asynchronous notification.
struct Router {
    waiter: Mutex<Option<Waiter>>,
    events: Sender<DebugEvent>,
    segments: Mutex<Vec<Segment>>,
}

impl Router {
    fn new(events: Sender<DebugEvent>) -> Router {
        Router {
            waiter: Mutex::new(None),
            events,
            segments: Mutex::new(Vec::new()),
        }
    }

    fn register(&self, expected: Vec<PacketKind>) -> Receiver<Packet> {
        let (tx, rx) = mpsc::sync_channel(1);
        *self.waiter.lock().unwrap() = Some(Waiter { expected, tx });
        rx
    }

    fn cancel_waiter(&self) {
        self.waiter.lock().unwrap().take();
    }

    fn emit(&self, event: DebugEvent) {
        let _ = self.events.send(event);
    }

    fn dispatch(&self, packet: Packet) {
        if packet.kind == PacketKind::Plus {
            return;
        }
        {
            let mut slot = self.waiter.lock().unwrap();
            let resolves = slot.as_ref().is_some_and(|w| {
                w.expected.contains(&packet.kind) || packet.kind == PacketKind::Error
            });
            if resolves {
                let waiter = slot.take().unwrap();
                let _ = waiter.tx.send(packet);
                return;
            }
        }
        self.route_async(packet);
    }

    fn route_async(&self, packet: Packet) {
        match packet.kind {
            PacketKind::Stop => match parse_halt_status(&packet.payload) {
                Ok(status) => self.emit(DebugEvent::Stop(status)),
                Err(e) => self.emit(DebugEvent::Error(e)),
            },
            PacketKind::End => {
                let exit_code = packet
                    .payload
                    .get(1..)
                    .and_then(|c| u32::from_str_radix(c, 16).ok())
                    .unwrap_or(0);
                self.emit(DebugEvent::End { exit_code });
            }
            PacketKind::Output => self.route_output(&packet.payload),
            PacketKind::Segment => match parse_segment_list(&packet.payload) {
                Ok(segments) => {
                    *self.segments.lock().unwrap() = segments.clone();
                    self.emit(DebugEvent::Segments(segments));
                }
                Err(e) => self.emit(DebugEvent::Error(e)),
            },
            PacketKind::Minus => {
                self.emit(DebugEvent::Error(GdbError::Protocol(
                    "stub rejected a packet (NAK)".to_string(),
                )));
            }
            _ => debug!(
                "ignoring unexpected packet {:?} {:?}",
                packet.kind, packet.payload
            ),
        }
    }

    /// Console output: the payload after the `O` tag is hex-encoded
    /// text. `DBG: ` marks debugger output, `PRF: ` is profiler traffic
    /// we drop.
    fn route_output(&self, payload: &str) {
        let hex = &payload[1..];
        match packet::decode_hex(hex) {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes).to_string();
                if let Some(message) = text.strip_prefix("DBG: ") {
                    self.emit(DebugEvent::Output(message.to_string()));
                } else if text.starts_with("PRF: ") {
                    trace!("dropping profiler output: {}", text.trim_end());
                } else {
                    self.emit(DebugEvent::Output(text));
                }
            }
            Err(e) => warn!("undecodable output packet: {}", e),
        }
    }

    fn disconnected(&self, error: Option<GdbError>) {
        // Dropping the waiter's sender fails the pending request with
        // `Disconnected`.
        self.cancel_waiter();
        if let Some(e) = error {
            self.emit(DebugEvent::Error(e));
        }
    }

    fn segments_snapshot(&self) -> Vec<Segment> {
        self.segments.lock().unwrap().clone()
    }
}

/// Parse an `AS…` segment packet: `addr;size` pairs.
fn parse_segment_list(payload: &str) -> Result<Vec<Segment>, GdbError> {
    let bad = || GdbError::Protocol(format!("bad segment packet: {:?}", payload));
    let body = payload.strip_prefix("AS").ok_or_else(bad)?;
    let values: Vec<u32> = body
        .split(';')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| u32::from_str_radix(part, 16).map_err(|_| bad()))
        .collect::<Result<_, _>>()?;
    if values.len() % 2 != 0 {
        return Err(bad());
    }
    Ok(values
        .chunks(2)
        .enumerate()
        .map(|(id, pair)| Segment {
            id: id as u32,
            name: format!("Seg{}", id),
            base_address: pair[0],
            size: pair[1],
            memory_type: MemoryType::Any,
        })
        .collect())
}

struct ClientInner {
    transport: Arc<Transport>,
    router: Arc<Router>,
    /// Single-in-flight invariant: held across send and reply.
    request_lock: Mutex<()>,
    /// Serialises frame-selection side effects on the stub.
    frame_lock: Mutex<()>,
    caps: RwLock<Capabilities>,
    config: ClientConfig,
    threads: Mutex<Vec<DebugThread>>,
    breakpoints: Mutex<Vec<Breakpoint>>,
    next_breakpoint_id: AtomicU32,
    events: Sender<DebugEvent>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.transport.close();
    }
}

/// Client for one debug session against the emulator's gdb stub.
///
/// All operations block the calling thread; the request lock guarantees
/// at most one outstanding request on the wire, so responses correlate
/// positionally. Stop/exit/output/segment notifications arrive on the
/// event channel returned by [`GdbClient::connect`].
pub struct GdbClient {
    inner: Arc<ClientInner>,
}

impl Clone for GdbClient {
    fn clone(&self) -> Self {
        GdbClient {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl GdbClient {
    /// Connect to the stub and run the capability handshake.
    pub fn connect(
        host: &str,
        port: u16,
    ) -> Result<(GdbClient, Receiver<DebugEvent>), GdbError> {
        Self::connect_with(host, port, ClientConfig::default())
    }

    pub fn connect_with(
        host: &str,
        port: u16,
        config: ClientConfig,
    ) -> Result<(GdbClient, Receiver<DebugEvent>), GdbError> {
        let transport = Arc::new(Transport::connect(host, port)?);
        let (events_tx, events_rx) = mpsc::channel();
        let router = Arc::new(Router::new(events_tx.clone()));

        let reader = transport.reader_stream()?;
        spawn_reader(reader, Arc::clone(&transport), Arc::clone(&router))?;

        let client = GdbClient {
            inner: Arc::new(ClientInner {
                transport,
                router,
                request_lock: Mutex::new(()),
                frame_lock: Mutex::new(()),
                caps: RwLock::new(Capabilities::default()),
                config,
                threads: Mutex::new(Vec::new()),
                breakpoints: Mutex::new(Vec::new()),
                next_breakpoint_id: AtomicU32::new(1),
                events: events_tx,
            }),
        };
        client.negotiate()?;
        client.emit(DebugEvent::Connected);
        Ok((client, events_rx))
    }

    /// The capabilities negotiated for this connection.
    pub fn capabilities(&self) -> Capabilities {
        *self.inner.caps.read().unwrap()
    }

    /// Close the connection. Pending requests fail with `Disconnected`.
    pub fn close(&self) {
        self.inner.transport.close();
    }

    // --- Handshake -----------------------------------------------------

    fn negotiate(&self) -> Result<(), GdbError> {
        let reply = self.request(dialect::QSUPPORTED, &[PacketKind::Unknown])?;
        let mut caps = Capabilities::from_qsupported(&reply.payload);

        if !caps.no_ack {
            return Err(GdbError::Protocol(
                "stub does not support QStartNoAckMode".to_string(),
            ));
        }
        self.request("QStartNoAckMode", &[PacketKind::Ok])?;
        self.inner.transport.set_ack_mode(false);

        if caps.vcont {
            // Only trust verbose resume if the stub enumerates actions.
            match self.request("vCont?", &[PacketKind::Unknown]) {
                Ok(reply) => caps.vcont = reply.payload.starts_with("vCont"),
                Err(GdbError::Remote { .. }) => caps.vcont = false,
                Err(e) => return Err(e),
            }
        }

        if caps.target_description {
            match self.request("qXfer:features:read:target.xml:0,1000", &[PacketKind::Unknown])
            {
                Ok(reply) => {
                    debug!("target description: {} bytes", reply.payload.len())
                }
                Err(GdbError::Remote { .. }) => {
                    debug!("target description advertised but unavailable")
                }
                Err(e) => return Err(e),
            }
        }

        *self.inner.caps.write().unwrap() = caps;
        Ok(())
    }

    // --- Request serialiser --------------------------------------------

    fn request(&self, payload: &str, expected: &[PacketKind]) -> Result<Packet, GdbError> {
        let _guard = self.inner.request_lock.lock().unwrap();
        self.send_and_wait(payload, expected, self.inner.config.reply_timeout)
    }

    /// Send one packet and wait for its reply. The caller must hold the
    /// request lock; the waiter slot is cleared on every exit path.
    fn send_and_wait(
        &self,
        payload: &str,
        expected: &[PacketKind],
        timeout: Duration,
    ) -> Result<Packet, GdbError> {
        let rx = self.inner.router.register(expected.to_vec());
        if let Err(e) = self.inner.transport.send_packet(payload) {
            self.inner.router.cancel_waiter();
            return Err(e);
        }
        match rx.recv_timeout(timeout) {
            Ok(packet) if packet.kind == PacketKind::Error => {
                let code = packet.payload.get(1..3).unwrap_or("").to_string();
                let err = GdbError::remote(&code);
                // Remote errors go to the event channel too, so idle
                // consumers see what the stub complained about.
                self.emit(DebugEvent::Error(err.clone()));
                Err(err)
            }
            Ok(packet) => Ok(packet),
            Err(RecvTimeoutError::Timeout) => {
                self.inner.router.cancel_waiter();
                Err(GdbError::Timeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(GdbError::Disconnected),
        }
    }

    // --- Execution control ---------------------------------------------

    /// Resume a thread. Does not wait: the next stop arrives as an
    /// asynchronous event.
    pub fn continue_execution(&self, thread: ThreadId) -> Result<(), GdbError> {
        let sequence = self.encode(ResumeAction::Continue, thread);
        {
            let _guard = self.inner.request_lock.lock().unwrap();
            let (last, prefix) = split_sequence(&sequence)?;
            for payload in prefix {
                self.send_and_wait(payload, &[PacketKind::Ok], self.inner.config.reply_timeout)?;
            }
            self.inner.transport.send_packet(last)?;
        }
        self.set_thread_state(thread, ThreadState::Running);
        Ok(())
    }

    /// Single-step a thread and wait for the resulting stop.
    pub fn step_in(&self, thread: ThreadId) -> Result<HaltStatus, GdbError> {
        self.set_thread_state(thread, ThreadState::Stepping);
        self.resume_and_wait(ResumeAction::StepIn, thread)
    }

    /// Step until the pc leaves `[start, end)`, then wait for the stop.
    pub fn step_range(
        &self,
        thread: ThreadId,
        start: u32,
        end: u32,
    ) -> Result<HaltStatus, GdbError> {
        self.set_thread_state(thread, ThreadState::Stepping);
        self.resume_and_wait(ResumeAction::StepRange { start, end }, thread)
    }

    /// Interrupt a running thread and wait for it to report the stop.
    pub fn pause(&self, thread: ThreadId) -> Result<HaltStatus, GdbError> {
        self.resume_and_wait(ResumeAction::Pause, thread)
    }

    /// The raw `0x03` break byte, outside framing. Last resort when the
    /// stub honours neither `vCont;t` nor `vCtrlC`.
    pub fn send_break(&self) -> Result<(), GdbError> {
        self.inner.transport.send_break()
    }

    /// Ask the stub why the target is (already) halted.
    pub fn halt_status(&self) -> Result<HaltStatus, GdbError> {
        let reply = self.request("?", &[PacketKind::Stop])?;
        parse_halt_status(&reply.payload)
    }

    fn encode(&self, action: ResumeAction, thread: ThreadId) -> Vec<String> {
        dialect::encode_resume(
            action,
            &self.capabilities(),
            thread,
            self.inner.config.legacy_range_step,
        )
    }

    fn resume_and_wait(
        &self,
        action: ResumeAction,
        thread: ThreadId,
    ) -> Result<HaltStatus, GdbError> {
        let sequence = self.encode(action, thread);
        let status = {
            let _guard = self.inner.request_lock.lock().unwrap();
            let (last, prefix) = split_sequence(&sequence)?;
            for payload in prefix {
                self.send_and_wait(payload, &[PacketKind::Ok], self.inner.config.reply_timeout)?;
            }
            let reply =
                self.send_and_wait(last, &[PacketKind::Stop], self.inner.config.reply_timeout)?;
            parse_halt_status(&reply.payload)?
        };
        self.emit(DebugEvent::Stop(status.clone()));
        Ok(status)
    }

    // --- Breakpoints ---------------------------------------------------

    pub fn set_source_breakpoint(
        &self,
        segment: Option<u32>,
        offset: u32,
        condition: Option<String>,
        log_message: Option<String>,
    ) -> Result<Breakpoint, GdbError> {
        let bp = Breakpoint::Source {
            id: self.next_breakpoint_id(),
            segment,
            offset,
            condition,
            hit_count: 0,
            log_message,
        };
        self.insert_breakpoint(bp)
    }

    pub fn set_instruction_breakpoint(&self, address: u32) -> Result<Breakpoint, GdbError> {
        let bp = Breakpoint::Instruction {
            id: self.next_breakpoint_id(),
            address,
        };
        self.insert_breakpoint(bp)
    }

    pub fn set_data_breakpoint(
        &self,
        address: u32,
        size: u32,
        access: DataAccess,
    ) -> Result<Breakpoint, GdbError> {
        let bp = Breakpoint::Data {
            id: self.next_breakpoint_id(),
            address,
            size,
            access,
        };
        self.insert_breakpoint(bp)
    }

    pub fn set_exception_breakpoint(&self, mask: u32) -> Result<Breakpoint, GdbError> {
        let bp = Breakpoint::Exception {
            id: self.next_breakpoint_id(),
            mask,
        };
        self.insert_breakpoint(bp)
    }

    /// A breakpoint the consumer removes on first hit (see
    /// [`GdbClient::clear_temporary_at`]).
    pub fn set_temporary_breakpoint(&self, address: u32) -> Result<Breakpoint, GdbError> {
        let bp = Breakpoint::Temporary {
            id: self.next_breakpoint_id(),
            address,
        };
        self.insert_breakpoint(bp)
    }

    pub fn remove_breakpoint(&self, bp: &Breakpoint) -> Result<(), GdbError> {
        let address = self.breakpoint_address(bp)?;
        self.request(&bp.remove_payload(address), &[PacketKind::Ok])?;
        self.inner
            .breakpoints
            .lock()
            .unwrap()
            .retain(|b| b.id() != bp.id());
        Ok(())
    }

    /// Remove the temporary breakpoint sitting at `pc`, if any. Called
    /// by the consumer when a stop lands on one.
    pub fn clear_temporary_at(&self, pc: u32) -> Result<Option<Breakpoint>, GdbError> {
        let hit = self.verified_breakpoints().into_iter().find(
            |bp| matches!(bp, Breakpoint::Temporary { address, .. } if *address == pc),
        );
        match hit {
            Some(bp) => {
                self.remove_breakpoint(&bp)?;
                Ok(Some(bp))
            }
            None => Ok(None),
        }
    }

    /// Breakpoints the stub has accepted.
    pub fn verified_breakpoints(&self) -> Vec<Breakpoint> {
        self.inner.breakpoints.lock().unwrap().clone()
    }

    fn insert_breakpoint(&self, bp: Breakpoint) -> Result<Breakpoint, GdbError> {
        let address = self.breakpoint_address(&bp)?;
        self.request(&bp.insert_payload(address), &[PacketKind::Ok])?;
        self.inner.breakpoints.lock().unwrap().push(bp.clone());
        self.emit(DebugEvent::BreakpointValidated(bp.clone()));
        Ok(bp)
    }

    /// Resolve a breakpoint's trap address against the live segment
    /// table. A source breakpoint without a segment is already absolute.
    fn breakpoint_address(&self, bp: &Breakpoint) -> Result<u32, GdbError> {
        match bp {
            Breakpoint::Source {
                segment: Some(index),
                offset,
                ..
            } => {
                let segments = self.segments();
                let segment = segments.get(*index as usize).ok_or_else(|| {
                    GdbError::Argument(format!("unknown segment {}", index))
                })?;
                Ok(segment.base_address + offset)
            }
            Breakpoint::Source { offset, .. } => Ok(*offset),
            Breakpoint::Instruction { address, .. }
            | Breakpoint::Temporary { address, .. }
            | Breakpoint::Data { address, .. } => Ok(*address),
            Breakpoint::Exception { .. } => Ok(0),
        }
    }

    fn next_breakpoint_id(&self) -> u32 {
        self.inner.next_breakpoint_id.fetch_add(1, Ordering::Relaxed)
    }

    // --- Memory --------------------------------------------------------

    /// Read memory; the stub's reply stays in hex form.
    pub fn read_memory(&self, address: u32, length: u32) -> Result<String, GdbError> {
        let reply = self.request(
            &format!("m{:x},{:x}", address, length),
            &[PacketKind::Unknown],
        )?;
        Ok(reply.payload)
    }

    pub fn read_memory_bytes(&self, address: u32, length: u32) -> Result<Vec<u8>, GdbError> {
        packet::decode_hex(&self.read_memory(address, length)?)
    }

    /// Write a hex payload to memory.
    pub fn write_memory(&self, address: u32, hex: &str) -> Result<(), GdbError> {
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(GdbError::Argument(format!(
                "memory payload is not hex: {:?}",
                hex
            )));
        }
        let size = (hex.len() + 1) / 2;
        self.request(
            &format!("M{:x},{:x}:{}", address, size, hex),
            &[PacketKind::Ok],
        )?;
        Ok(())
    }

    // --- Registers -----------------------------------------------------

    /// Read the full register file, optionally for a specific thread.
    pub fn read_registers(
        &self,
        thread: Option<ThreadId>,
    ) -> Result<RegisterSet, GdbError> {
        let caps = self.capabilities();
        let _guard = self.inner.request_lock.lock().unwrap();
        if let Some(tid) = thread {
            self.send_and_wait(
                &format!("Hg{}", tid.marshal(caps.multiprocess)),
                &[PacketKind::Ok],
                self.inner.config.reply_timeout,
            )?;
        }
        let reply =
            self.send_and_wait("g", &[PacketKind::Unknown], self.inner.config.reply_timeout)?;
        RegisterSet::parse(&reply.payload)
    }

    pub fn read_register(&self, index: u32) -> Result<u32, GdbError> {
        if index as usize >= NUM_REGISTERS {
            return Err(GdbError::Argument(format!("unknown register {}", index)));
        }
        let reply = self.request(&format!("p{:x}", index), &[PacketKind::Unknown])?;
        u32::from_str_radix(reply.payload.trim(), 16).map_err(|_| {
            GdbError::Protocol(format!("bad register reply: {:?}", reply.payload))
        })
    }

    pub fn read_register_by_name(&self, name: &str) -> Result<u32, GdbError> {
        let index = register_index(name)
            .ok_or_else(|| GdbError::Argument(format!("unknown register '{}'", name)))?;
        self.read_register(index)
    }

    /// Write one register. The value must be 1-8 hex digits.
    pub fn write_register(&self, index: u32, value: &str) -> Result<(), GdbError> {
        if index as usize >= NUM_REGISTERS {
            return Err(GdbError::Argument(format!("unknown register {}", index)));
        }
        if value.is_empty()
            || value.len() > 8
            || !value.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(GdbError::Argument(format!(
                "register value must be 1-8 hex digits, got {:?}",
                value
            )));
        }
        self.request(&format!("P{:x}={}", index, value), &[PacketKind::Ok])?;
        Ok(())
    }

    /// Write the full register file back.
    pub fn write_registers(&self, registers: &RegisterSet) -> Result<(), GdbError> {
        self.request(&format!("G{}", registers.marshal()), &[PacketKind::Ok])?;
        Ok(())
    }

    // --- Frames and stack ----------------------------------------------

    /// Select a stub trace frame by index. `None` means the stub has no
    /// such frame.
    pub fn select_frame(&self, index: u32) -> Result<Option<u32>, GdbError> {
        self.qt_frame(&format!("QTFrame:{:x}", index))
    }

    /// Select the frame whose pc matches.
    pub fn select_frame_by_pc(&self, pc: u32) -> Result<Option<u32>, GdbError> {
        self.qt_frame(&format!("QTFrame:pc:{:x}", pc))
    }

    fn qt_frame(&self, payload: &str) -> Result<Option<u32>, GdbError> {
        let reply = self.request(payload, &[PacketKind::Frame])?;
        let body = reply.payload.strip_prefix('F').ok_or_else(|| {
            GdbError::Protocol(format!("bad frame reply: {:?}", reply.payload))
        })?;
        if body.starts_with("-1") {
            return Ok(None);
        }
        let digits = &body[..body.find('T').unwrap_or(body.len())];
        u32::from_str_radix(digits, 16)
            .map(Some)
            .map_err(|_| GdbError::Protocol(format!("bad frame reply: {:?}", reply.payload)))
    }

    /// How many trace frames the stub currently holds. An absent
    /// `tframes` field means one.
    pub fn frames_count(&self) -> Result<u32, GdbError> {
        let reply = self.request("qTStatus", &[PacketKind::QtStatus, PacketKind::Stop])?;
        let count = reply
            .payload
            .split(';')
            .find_map(|field| field.strip_prefix("tframes:"))
            .and_then(|hex| u32::from_str_radix(hex, 16).ok())
            .unwrap_or(1);
        Ok(count)
    }

    /// Unwind a thread's stack.
    ///
    /// The default frame's pc always yields one entry at index `-1`. For
    /// the CPU thread the stub's trace frames are walked oldest-first;
    /// per-frame failures are logged and skipped. The copper gets a
    /// single synthetic frame at index `-10`.
    pub fn stack(&self, thread: ThreadId) -> Result<Vec<StackPosition>, GdbError> {
        let _frames = self.inner.frame_lock.lock().unwrap();

        let pc = self.read_register(PC_INDEX)?;
        if thread.is_copper() {
            return Ok(vec![self.position(-10, pc)]);
        }

        let mut positions = vec![self.position(-1, pc)];
        if thread.is_cpu() {
            let count = self.frames_count()?;
            for index in (0..count).rev() {
                match self.frame_position(index) {
                    Ok(Some(position)) => positions.push(position),
                    Ok(None) => {}
                    Err(e) => warn!("skipping stack frame {}: {}", index, e),
                }
            }
        }
        Ok(positions)
    }

    fn frame_position(&self, index: u32) -> Result<Option<StackPosition>, GdbError> {
        match self.select_frame(index)? {
            Some(selected) => {
                let pc = self.read_register(PC_INDEX)?;
                Ok(Some(self.position(selected as i32, pc)))
            }
            None => Ok(None),
        }
    }

    fn position(&self, index: i32, pc: u32) -> StackPosition {
        let (segment_id, offset) = self.absolute_to_relative(pc);
        StackPosition {
            index,
            pc,
            segment_id,
            offset,
        }
    }

    /// Translate an absolute address against the live segment table.
    pub fn absolute_to_relative(&self, address: u32) -> (i32, u32) {
        for segment in self.segments() {
            if segment.contains(address) {
                return (segment.id as i32, address - segment.base_address);
            }
        }
        (-1, address)
    }

    // --- Threads -------------------------------------------------------

    /// Enumerate target threads, announcing newly seen ones.
    pub fn threads(&self) -> Result<Vec<DebugThread>, GdbError> {
        let reply = self.request("qfThreadInfo", &[PacketKind::Unknown])?;
        let ids = parse_thread_info(&reply.payload)?;
        let mut threads = self.inner.threads.lock().unwrap();
        for id in ids {
            if !threads.iter().any(|t| t.id == id) {
                threads.push(DebugThread::new(id));
                self.emit(DebugEvent::ThreadStarted(id.thread));
            }
        }
        Ok(threads.clone())
    }

    fn set_thread_state(&self, id: ThreadId, state: ThreadState) {
        let mut threads = self.inner.threads.lock().unwrap();
        if let Some(thread) = threads.iter_mut().find(|t| t.id == id) {
            thread.state = state;
        }
    }

    // --- Segments ------------------------------------------------------

    /// Re-query the stub's segment table.
    pub fn query_offsets(&self) -> Result<Vec<Segment>, GdbError> {
        let reply = self.request("qOffsets", &[PacketKind::Segment])?;
        let segments = parse_segment_list(&reply.payload)?;
        *self.inner.router.segments.lock().unwrap() = segments.clone();
        self.emit(DebugEvent::SegmentsUpdated(segments.clone()));
        Ok(segments)
    }

    /// The segment table as last reported by the stub.
    pub fn segments(&self) -> Vec<Segment> {
        self.inner.router.segments_snapshot()
    }

    // --- Monitor -------------------------------------------------------

    /// Send a monitor command (`qRcmd`); the reply is opaque.
    pub fn monitor(&self, command: &str) -> Result<String, GdbError> {
        let payload = format!("qRcmd,{}", packet::encode_hex(command.as_bytes()));
        let reply = self.request(
            &payload,
            &[PacketKind::Unknown, PacketKind::Ok, PacketKind::Output],
        )?;
        Ok(reply.payload)
    }

    fn emit(&self, event: DebugEvent) {
        let _ = self.inner.events.send(event);
    }
}

fn split_sequence(sequence: &[String]) -> Result<(&String, &[String]), GdbError> {
    sequence
        .split_last()
        .ok_or_else(|| GdbError::Protocol("empty resume sequence".to_string()))
}

fn spawn_reader(
    mut stream: TcpStream,
    transport: Arc<Transport>,
    router: Arc<Router>,
) -> Result<(), GdbError> {
    thread::Builder::new()
        .name("gdb-reader".to_string())
        .spawn(move || {
            let mut parser = PacketParser::new();
            let mut buf = [0u8; 4096];
            loop {
                match stream.read(&mut buf) {
                    Ok(0) => {
                        router.disconnected(None);
                        break;
                    }
                    Ok(n) => {
                        for packet in parser.feed(&buf[..n]) {
                            trace!("<-- {:?} {:?}", packet.kind, packet.payload);
                            if !matches!(packet.kind, PacketKind::Plus | PacketKind::Minus) {
                                transport.ack_received();
                            }
                            router.dispatch(packet);
                        }
                    }
                    Err(e) => {
                        router.disconnected(Some(e.into()));
                        break;
                    }
                }
            }
        })
        .map_err(GdbError::from)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn test_router() -> (Arc<Router>, Receiver<DebugEvent>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(Router::new(tx)), rx)
    }

    fn packet_of(payload: &str) -> Packet {
        Packet {
            kind: packet::classify(payload),
            payload: payload.to_string(),
            notification: false,
        }
    }

    #[test]
    fn parse_segment_packet() {
        let segments = parse_segment_list("AS1000;20;2000;10").unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].base_address, 0x1000);
        assert_eq!(segments[0].size, 0x20);
        assert_eq!(segments[0].name, "Seg0");
        assert_eq!(segments[1].base_address, 0x2000);
        assert!(parse_segment_list("AS1000;20;2000").is_err());
        assert!(parse_segment_list("1000;20").is_err());
    }

    #[test]
    fn waiter_gets_matching_reply() {
        let (router, events) = test_router();
        let rx = router.register(vec![PacketKind::Ok]);
        router.dispatch(packet_of("OK"));
        assert_eq!(rx.recv().unwrap().kind, PacketKind::Ok);
        // Nothing leaked to the event channel.
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn error_reply_resolves_any_waiter() {
        let (router, _events) = test_router();
        let rx = router.register(vec![PacketKind::Stop]);
        router.dispatch(packet_of("E05"));
        assert_eq!(rx.recv().unwrap().kind, PacketKind::Error);
    }

    #[test]
    fn non_matching_packet_routes_async() {
        let (router, events) = test_router();
        let _rx = router.register(vec![PacketKind::Ok]);
        router.dispatch(packet_of("T05;thread:01;"));
        match events.recv().unwrap() {
            DebugEvent::Stop(status) => {
                assert_eq!(status.thread.unwrap(), ThreadId::new(1))
            }
            other => panic!("expected stop event, got {:?}", other),
        }
    }

    #[test]
    fn stop_without_waiter_becomes_event() {
        let (router, events) = test_router();
        router.dispatch(packet_of("S05"));
        assert!(matches!(events.recv().unwrap(), DebugEvent::Stop(_)));
    }

    #[test]
    fn end_packet_carries_exit_code() {
        let (router, events) = test_router();
        router.dispatch(packet_of("W2a"));
        match events.recv().unwrap() {
            DebugEvent::End { exit_code } => assert_eq!(exit_code, 0x2A),
            other => panic!("expected end event, got {:?}", other),
        }
    }

    #[test]
    fn output_decoding() {
        let (router, events) = test_router();

        // "DBG: hi" → debugger output with the prefix stripped
        let hex = packet::encode_hex(b"DBG: hi");
        router.dispatch(packet_of(&format!("O{}", hex)));
        match events.recv().unwrap() {
            DebugEvent::Output(text) => assert_eq!(text, "hi"),
            other => panic!("expected output event, got {:?}", other),
        }

        // Profiler traffic is dropped
        let hex = packet::encode_hex(b"PRF: 123");
        router.dispatch(packet_of(&format!("O{}", hex)));
        assert!(events.try_recv().is_err());

        // Plain program output passes through
        let hex = packet::encode_hex(b"hello");
        router.dispatch(packet_of(&format!("O{}", hex)));
        match events.recv().unwrap() {
            DebugEvent::Output(text) => assert_eq!(text, "hello"),
            other => panic!("expected output event, got {:?}", other),
        }
    }

    #[test]
    fn segment_packet_updates_table_and_emits() {
        let (router, events) = test_router();
        router.dispatch(packet_of("ASaef;c"));
        match events.recv().unwrap() {
            DebugEvent::Segments(segments) => {
                assert_eq!(segments[0].base_address, 0xAEF);
                assert_eq!(segments[0].size, 0xC);
            }
            other => panic!("expected segments event, got {:?}", other),
        }
        assert_eq!(router.segments_snapshot().len(), 1);
    }

    #[test]
    fn nak_is_a_protocol_error_event() {
        let (router, events) = test_router();
        router.dispatch(Packet {
            kind: PacketKind::Minus,
            payload: String::new(),
            notification: false,
        });
        assert!(matches!(
            events.recv().unwrap(),
            DebugEvent::Error(GdbError::Protocol(_))
        ));
    }

    #[test]
    fn plus_is_swallowed() {
        let (router, events) = test_router();
        let rx = router.register(vec![PacketKind::Ok]);
        router.dispatch(Packet {
            kind: PacketKind::Plus,
            payload: String::new(),
            notification: false,
        });
        router.dispatch(packet_of("OK"));
        assert_eq!(rx.recv().unwrap().kind, PacketKind::Ok);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn disconnect_cancels_waiter() {
        let (router, _events) = test_router();
        let rx = router.register(vec![PacketKind::Ok]);
        router.disconnected(None);
        assert!(rx.recv().is_err());
    }
}
