//! A scripted RSP stub for exercising the client over a real socket.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use dbg68k::remote::packet;

/// Maps one received payload to the reply payloads to frame back.
pub type Handler = Box<dyn FnMut(&str) -> Vec<String> + Send>;

pub struct MockStub {
    pub port: u16,
    received: Arc<Mutex<Vec<String>>>,
    writer: Arc<Mutex<Option<TcpStream>>>,
}

impl MockStub {
    /// Bind an ephemeral port and serve a single connection with the
    /// given handler.
    pub fn start(mut handler: Handler) -> MockStub {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let received = Arc::new(Mutex::new(Vec::new()));
        let writer = Arc::new(Mutex::new(None));

        let received_in = Arc::clone(&received);
        let writer_in = Arc::clone(&writer);
        thread::spawn(move || {
            let (stream, _) = match listener.accept() {
                Ok(conn) => conn,
                Err(_) => return,
            };
            *writer_in.lock().unwrap() = Some(stream.try_clone().unwrap());
            serve(stream, &mut handler, &received_in);
        });

        MockStub {
            port,
            received,
            writer,
        }
    }

    pub fn with_default_handler() -> MockStub {
        MockStub::start(Box::new(default_handler))
    }

    /// Every payload the stub has read off the wire, in order. The raw
    /// break byte is recorded as `"\u{3}"`.
    pub fn received(&self) -> Vec<String> {
        self.received.lock().unwrap().clone()
    }

    /// Push an unsolicited packet to the client.
    pub fn inject(&self, payload: &str) {
        for _ in 0..100 {
            if let Some(stream) = self.writer.lock().unwrap().as_mut() {
                stream
                    .write_all(packet::frame(payload).as_bytes())
                    .unwrap();
                return;
            }
            thread::sleep(Duration::from_millis(10));
        }
        panic!("no client connected to inject into");
    }
}

fn serve(mut stream: TcpStream, handler: &mut Handler, received: &Mutex<Vec<String>>) {
    let mut ack_mode = true;
    let mut buf: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 1024];

    loop {
        let n = match stream.read(&mut chunk) {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);

        while let Some(payload) = take_packet(&mut buf) {
            let Some(payload) = payload else {
                continue; // ack byte
            };
            received.lock().unwrap().push(payload.clone());
            if payload == "\u{3}" {
                continue;
            }
            if ack_mode {
                let _ = stream.write_all(b"+");
            }
            if payload == "QStartNoAckMode" {
                let _ = stream.write_all(packet::frame("OK").as_bytes());
                ack_mode = false;
                continue;
            }
            for reply in handler(&payload) {
                let _ = stream.write_all(packet::frame(&reply).as_bytes());
            }
        }
    }
}

/// Take one item off the front of the buffer: `None` when incomplete,
/// `Some(None)` for an ack byte, `Some(Some(payload))` for a packet or
/// the raw break byte.
fn take_packet(buf: &mut Vec<u8>) -> Option<Option<String>> {
    match buf.first()? {
        b'+' | b'-' => {
            buf.remove(0);
            Some(None)
        }
        0x03 => {
            buf.remove(0);
            Some(Some("\u{3}".to_string()))
        }
        b'$' => {
            let hash = buf.iter().position(|&b| b == b'#')?;
            if buf.len() < hash + 3 {
                return None;
            }
            let frame: Vec<u8> = buf.drain(..hash + 3).collect();
            Some(Some(
                String::from_utf8_lossy(&frame[1..hash]).to_string(),
            ))
        }
        _ => {
            buf.remove(0);
            Some(None)
        }
    }
}

/// Canned replies for a well-behaved stub: full capabilities, one CODE
/// segment at 0xAEF, two threads, two trace frames.
pub fn default_handler(payload: &str) -> Vec<String> {
    if payload.starts_with("qSupported") {
        return vec!["multiprocess+;vContSupported+;QStartNoAckMode+;QNonStop+".to_string()];
    }
    if payload == "vCont?" {
        return vec!["vCont;c;C;s;S;t;r".to_string()];
    }
    if payload == "qOffsets" {
        return vec!["ASaef;c".to_string()];
    }
    if payload == "qfThreadInfo" {
        return vec!["m01,02l".to_string()];
    }
    if payload == "qTStatus" {
        return vec!["T0;tframes:2;tcreated:0".to_string()];
    }
    if let Some(rest) = payload.strip_prefix("QTFrame:") {
        let index = rest.strip_prefix("pc:").unwrap_or(rest);
        return vec![format!("F{}", index)];
    }
    if payload == "?" {
        return vec!["T05;thread:p01.01;11:00000aef".to_string()];
    }
    if payload == "g" {
        let file: String = (0u32..18).map(|i| format!("{:08x}", i)).collect();
        return vec![file];
    }
    if payload.starts_with('p') {
        return vec!["00000aef".to_string()];
    }
    if let Some(rest) = payload.strip_prefix('m') {
        let length = rest
            .split_once(',')
            .and_then(|(_, len)| u32::from_str_radix(len, 16).ok())
            .unwrap_or(0);
        return vec!["00".repeat(length as usize)];
    }
    if payload.starts_with("vCont;s") || payload.starts_with("vCont;t") || payload == "s" {
        return vec!["T05;thread:p01.01;11:00000af3".to_string()];
    }
    if payload.starts_with("vCont;c") || payload == "c" {
        return vec![];
    }
    if let Some(hex) = payload.strip_prefix("qRcmd,") {
        let cmd = packet::decode_hex(hex).unwrap();
        let echo = format!("echo:{}", String::from_utf8_lossy(&cmd));
        return vec![packet::encode_hex(echo.as_bytes())];
    }
    if payload.starts_with('Z')
        || payload.starts_with('z')
        || payload.starts_with('M')
        || payload.starts_with('P')
        || payload.starts_with('G')
        || payload.starts_with("Hg")
        || payload.starts_with("Hc")
    {
        return vec!["OK".to_string()];
    }
    // Unknown query: empty reply, like a real stub.
    vec![String::new()]
}
