//! # Motor Link Module
//!
//! Client side of the tensioner's serial protocol.
//!
//! ## Wire format
//! - `+<steps>\n` tightens the string by `steps` motor steps
//! - `-<steps>\n` loosens it
//! - `S\n` aborts whatever the motor is doing
//!
//! The device answers with newline-terminated lines. A line containing `DONE`
//! marks the command in flight as finished; every other line is only logged.
//!
//! ## Threads
//! A background reader owns the read half of the transport for the lifetime of
//! the link and publishes every received line into a shared [`Slot`]. Senders
//! clear that slot, write their command and wait on it with a deadline, so a
//! missing acknowledgement can never hang the caller.

use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::SerialSettings;
use crate::error::TunerResult;
use crate::slot::Slot;

/// Substring of a reply that completes a command.
pub const DONE_MARKER: &str = "DONE";

/// Abort command, sent without waiting for a reply.
pub const STOP_COMMAND: &str = "S\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Raise the pitch
    Tighten,
    /// Lower the pitch
    Loosen,
}

impl Direction {
    pub fn sign(self) -> char {
        match self {
            Direction::Tighten => '+',
            Direction::Loosen => '-',
        }
    }

    pub fn reverse(self) -> Self {
        match self {
            Direction::Tighten => Direction::Loosen,
            Direction::Loosen => Direction::Tighten,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorCommand {
    pub direction: Direction,
    pub steps: u32,
}

impl MotorCommand {
    pub fn new(direction: Direction, steps: u32) -> Self {
        Self { direction, steps }
    }

    /// Wire representation, newline included.
    pub fn encode(&self) -> String {
        format!("{}{}\n", self.direction.sign(), self.steps)
    }
}

/// What the tuning controller needs from a motor.
///
/// Failures are plain `false` so a run can wind down quietly when the motor
/// is missing or unresponsive.
pub trait MotorDriver: Send + Sync {
    /// Issues a move and blocks until it is acknowledged or `timeout` passes.
    fn send_move(&self, direction: Direction, steps: u32, timeout: Duration) -> bool;

    /// Fire-and-forget abort.
    fn stop(&self);

    fn is_open(&self) -> bool;
}

type SharedWriter = Mutex<Option<Box<dyn Write + Send>>>;

/// Serial (or any byte stream) connection to the tensioner.
pub struct MotorLink {
    writer: SharedWriter,
    responses: Arc<Slot<String>>,
    open: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    _reader: Option<JoinHandle<()>>,
}

impl MotorLink {
    /// Opens the serial port at `path` and starts the reader on a clone of it.
    pub fn open_serial(path: &str, settings: &SerialSettings) -> TunerResult<Self> {
        let port = serialport::new(path, settings.baud_rate)
            .timeout(settings.read_timeout())
            .open()?;
        let reader = port.try_clone()?;
        info!("Motor link open on {} at {} baud", path, settings.baud_rate);
        Ok(Self::from_io(reader, port))
    }

    /// Builds a link over arbitrary read/write halves.
    ///
    /// Read timeouts (`TimedOut`, `WouldBlock`) are tolerated; end of stream or
    /// any other read error closes the link.
    pub fn from_io<R, W>(reader: R, writer: W) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let responses = Arc::new(Slot::new());
        let open = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = {
            let responses = Arc::clone(&responses);
            let open = Arc::clone(&open);
            let shutdown = Arc::clone(&shutdown);
            thread::Builder::new()
                .name("motor-reader".into())
                .spawn(move || read_loop(reader, &responses, &open, &shutdown))
        };

        let reader = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Could not start motor reader thread: {}", e);
                open.store(false, Ordering::SeqCst);
                None
            }
        };

        Self {
            writer: Mutex::new(Some(Box::new(writer))),
            responses,
            open,
            shutdown,
            _reader: reader,
        }
    }

    /// A link with no transport; every operation fails.
    pub fn disconnected() -> Self {
        Self {
            writer: Mutex::new(None),
            responses: Arc::new(Slot::new()),
            open: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(AtomicBool::new(true)),
            _reader: None,
        }
    }

    /// Most recent line received from the device, if any since the last command.
    pub fn last_response(&self) -> Option<String> {
        self.responses.get()
    }

    fn write_raw(&self, bytes: &[u8]) -> bool {
        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(writer) = guard.as_mut() else {
            return false;
        };
        match writer.write_all(bytes).and_then(|_| writer.flush()) {
            Ok(()) => true,
            Err(e) => {
                warn!("Motor write failed: {}", e);
                false
            }
        }
    }
}

impl MotorDriver for MotorLink {
    fn send_move(&self, direction: Direction, steps: u32, timeout: Duration) -> bool {
        if steps == 0 || !self.is_open() {
            return false;
        }

        let command = MotorCommand::new(direction, steps);
        self.responses.clear();
        if !self.write_raw(command.encode().as_bytes()) {
            return false;
        }
        debug!("Sent {:?}", command);

        match self
            .responses
            .wait_for(timeout, |line, _| line.contains(DONE_MARKER))
        {
            Some(reply) => {
                debug!("Motor acknowledged: {}", reply.value);
                true
            }
            None => {
                warn!("No {} for {:?} within {:?}", DONE_MARKER, command, timeout);
                false
            }
        }
    }

    fn stop(&self) {
        if self.is_open() && self.write_raw(STOP_COMMAND.as_bytes()) {
            debug!("Sent stop");
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl Drop for MotorLink {
    fn drop(&mut self) {
        // the reader notices on its next read timeout; it is not joined
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

fn read_loop<R: Read>(
    reader: R,
    responses: &Slot<String>,
    open: &AtomicBool,
    shutdown: &AtomicBool,
) {
    let mut reader = BufReader::new(reader);
    let mut line: Vec<u8> = Vec::new();

    while !shutdown.load(Ordering::SeqCst) {
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => {
                warn!("Motor link closed by device");
                break;
            }
            Ok(_) => {
                // partial lines survive read timeouts and are completed here;
                // line noise is decoded lossily rather than closing the link
                let reply = String::from_utf8_lossy(&line).trim_end().to_string();
                line.clear();
                if !reply.is_empty() {
                    debug!("Motor says: {}", reply);
                    responses.publish(reply);
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) => {}
            Err(e) => {
                warn!("Motor read failed: {}", e);
                break;
            }
        }
    }

    open.store(false, Ordering::SeqCst);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
    use std::time::Instant;

    /// Read half backed by a channel; behaves like a serial port with a
    /// short read timeout and reports end of stream once the sender is gone.
    pub(crate) struct ChannelReader {
        rx: Receiver<Vec<u8>>,
        pending: Vec<u8>,
    }

    impl Read for ChannelReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pending.is_empty() {
                match self.rx.recv_timeout(Duration::from_millis(20)) {
                    Ok(bytes) => self.pending = bytes,
                    Err(RecvTimeoutError::Timeout) => {
                        return Err(std::io::Error::new(ErrorKind::TimedOut, "read timeout"));
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

    pub(crate) struct ChannelWriter(Sender<Vec<u8>>);

    impl Write for ChannelWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0
                .send(buf.to_vec())
                .map_err(|_| std::io::Error::new(ErrorKind::BrokenPipe, "device gone"))?;
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Device end of an in-memory link.
    pub(crate) struct FakeDevice {
        pub to_host: Sender<Vec<u8>>,
        pub from_host: Receiver<Vec<u8>>,
    }

    impl FakeDevice {
        pub fn say(&self, line: &str) {
            self.to_host.send(line.as_bytes().to_vec()).unwrap();
        }

        pub fn next_command(&self) -> Option<String> {
            self.from_host
                .recv_timeout(Duration::from_secs(2))
                .ok()
                .map(|bytes| String::from_utf8(bytes).unwrap())
        }
    }

    pub(crate) fn pair() -> (MotorLink, FakeDevice) {
        let (to_host, host_rx) = crossbeam_channel::unbounded();
        let (host_tx, from_host) = crossbeam_channel::unbounded();
        let link = MotorLink::from_io(
            ChannelReader {
                rx: host_rx,
                pending: Vec::new(),
            },
            ChannelWriter(host_tx),
        );
        (link, FakeDevice { to_host, from_host })
    }

    #[test]
    fn commands_are_encoded() {
        assert_eq!(MotorCommand::new(Direction::Tighten, 30).encode(), "+30\n");
        assert_eq!(MotorCommand::new(Direction::Loosen, 7).encode(), "-7\n");
        assert_eq!(Direction::Tighten.reverse(), Direction::Loosen);
    }

    #[test]
    fn move_completes_on_done() {
        let (link, device) = pair();
        let responder = thread::spawn(move || {
            let command = device.next_command();
            device.say("MOVING\n");
            device.say("DONE\n");
            (command, device)
        });

        assert!(link.send_move(Direction::Loosen, 30, Duration::from_secs(2)));
        let (command, _device) = responder.join().unwrap();
        assert_eq!(command.as_deref(), Some("-30\n"));
        assert_eq!(link.last_response().as_deref(), Some("DONE"));
    }

    #[test]
    fn split_reply_is_reassembled() {
        let (link, device) = pair();
        let responder = thread::spawn(move || {
            device.next_command();
            device.say("DO");
            thread::sleep(Duration::from_millis(60));
            device.say("NE 12\r\n");
            device
        });

        assert!(link.send_move(Direction::Tighten, 12, Duration::from_secs(2)));
        let _device = responder.join().unwrap();
        assert_eq!(link.last_response().as_deref(), Some("DONE 12"));
    }

    #[test]
    fn move_times_out_without_done() {
        let (link, device) = pair();
        let start = Instant::now();
        assert!(!link.send_move(Direction::Tighten, 5, Duration::from_millis(150)));
        assert!(start.elapsed() >= Duration::from_millis(150));
        assert_eq!(device.next_command().as_deref(), Some("+5\n"));
        // nothing arrived, so the cleared slot stays empty
        assert_eq!(link.last_response(), None);
    }

    #[test]
    fn non_done_reply_is_not_completion() {
        let (link, device) = pair();
        device.say("ERR busy\n");
        let responder = thread::spawn(move || {
            device.next_command();
            device.say("ERR limit\n");
            device
        });
        assert!(!link.send_move(Direction::Tighten, 5, Duration::from_millis(200)));
        let _device = responder.join().unwrap();
        assert_eq!(link.last_response().as_deref(), Some("ERR limit"));
    }

    #[test]
    fn garbage_bytes_do_not_close_link() {
        let (link, device) = pair();
        device.to_host.send(vec![0xFF, 0xFE, b'\n']).unwrap();
        thread::sleep(Duration::from_millis(80));
        assert!(link.is_open());

        let responder = thread::spawn(move || {
            let command = device.next_command();
            device.say("DONE\n");
            (command, device)
        });
        assert!(link.send_move(Direction::Tighten, 3, Duration::from_secs(2)));
        let (command, _device) = responder.join().unwrap();
        assert_eq!(command.as_deref(), Some("+3\n"));
        assert!(link.is_open());
    }

    #[test]
    fn stop_is_fire_and_forget() {
        let (link, device) = pair();
        link.stop();
        assert_eq!(device.next_command().as_deref(), Some("S\n"));
    }

    #[test]
    fn closed_stream_closes_link() {
        let (link, device) = pair();
        drop(device);
        let deadline = Instant::now() + Duration::from_secs(2);
        while link.is_open() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(!link.is_open());
        assert!(!link.send_move(Direction::Tighten, 1, Duration::from_millis(50)));
    }

    #[test]
    fn disconnected_link_fails_everything() {
        let link = MotorLink::disconnected();
        assert!(!link.is_open());
        assert!(!link.send_move(Direction::Loosen, 10, Duration::from_secs(1)));
        link.stop();
        assert_eq!(link.last_response(), None);
    }

    #[test]
    fn zero_steps_is_rejected() {
        let (link, _device) = pair();
        assert!(!link.send_move(Direction::Loosen, 0, Duration::from_millis(50)));
    }
}
