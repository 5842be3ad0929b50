//! Event-listener framing over the control channel.
//!
//! One cycle is: listener writes `READY\n`; the control plane sends a header
//! line of `key:value` tokens whose `len` gives the number of payload bytes
//! that follow; the listener answers `RESULT 2\nOK` once it is done.
//!
//! Reads happen on a dedicated framing thread so the control thread can keep
//! observing the shutdown token while nothing arrives.

use std::collections::BTreeMap;
use std::io::{self, BufRead, Read, Write};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};

use crate::core::errors::{CheckError, Result};
use crate::daemon::signals::Shutdown;

/// Handshake line announcing the listener can take an event.
pub const READY: &[u8] = b"READY\n";
/// Acknowledgement for a processed event.
pub const RESULT_OK: &[u8] = b"RESULT 2\nOK";

const EVENT_NAME_KEY: &str = "eventname";
const LEN_KEY: &str = "len";
const DEFAULT_POLL: Duration = Duration::from_millis(200);
/// Largest payload accepted from one event; supervisord payloads are a few
/// hundred bytes.
pub const MAX_PAYLOAD_LEN: u64 = 1 << 20;

/// Periodic tick events emitted by supervisord.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickKind {
    Tick5,
    Tick60,
    Tick3600,
}

impl TickKind {
    #[must_use]
    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            "TICK_5" => Some(Self::Tick5),
            "TICK_60" => Some(Self::Tick60),
            "TICK_3600" => Some(Self::Tick3600),
            _ => None,
        }
    }

}

/// What an event means to the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Tick(TickKind),
    Other(String),
}

/// One decoded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    pub headers: BTreeMap<String, String>,
    pub payload: String,
}

impl Event {
    /// Value of the mandatory `eventname` header.
    #[must_use]
    pub fn name(&self) -> &str {
        self.headers
            .get(EVENT_NAME_KEY)
            .map_or("", String::as_str)
    }

    #[must_use]
    pub const fn is_tick(&self) -> bool {
        matches!(self.kind, EventKind::Tick(_))
    }

    fn from_frame(frame: Frame) -> Result<Self> {
        let name = frame
            .headers
            .get(EVENT_NAME_KEY)
            .cloned()
            .ok_or_else(|| CheckError::Protocol {
                details: format!("header without {EVENT_NAME_KEY}: {:?}", frame.headers),
            })?;
        let kind = TickKind::from_event_name(&name).map_or(EventKind::Other(name), EventKind::Tick);
        Ok(Self {
            kind,
            headers: frame.headers,
            payload: frame.payload,
        })
    }
}

/// Parse a header line of space separated `key:value` tokens.
pub fn parse_header_line(line: &str) -> Result<BTreeMap<String, String>> {
    let mut headers = BTreeMap::new();
    for token in line.split_whitespace() {
        let (key, value) = token.split_once(':').ok_or_else(|| CheckError::Protocol {
            details: format!("header token without ':' separator: {token:?}"),
        })?;
        if key.is_empty() {
            return Err(CheckError::Protocol {
                details: format!("header token with empty key: {token:?}"),
            });
        }
        headers.insert(key.to_string(), value.to_string());
    }
    if headers.is_empty() {
        return Err(CheckError::Protocol {
            details: "empty header line".to_string(),
        });
    }
    Ok(headers)
}

#[derive(Debug)]
struct Frame {
    headers: BTreeMap<String, String>,
    payload: String,
}

/// Read one header line and its payload. `Ok(None)` means end of input.
fn read_frame(input: &mut impl BufRead) -> Result<Option<Frame>> {
    let mut line = String::new();
    let read = input
        .read_line(&mut line)
        .map_err(|e| CheckError::io("<stdin>", e))?;
    if read == 0 {
        return Ok(None);
    }
    let headers = parse_header_line(line.trim_end_matches(['\r', '\n']))?;
    let len = match headers.get(LEN_KEY) {
        Some(raw) => raw.parse::<u64>().map_err(|e| CheckError::Protocol {
            details: format!("bad {LEN_KEY} header {raw:?}: {e}"),
        })?,
        None => 0,
    };
    if len > MAX_PAYLOAD_LEN {
        // Skip the announced bytes so the next header line is read in sync.
        io::copy(&mut input.by_ref().take(len), &mut io::sink())
            .map_err(|e| CheckError::io("<stdin>", e))?;
        return Err(CheckError::Protocol {
            details: format!("payload of {len} bytes exceeds the {MAX_PAYLOAD_LEN} byte limit"),
        });
    }
    let mut payload = Vec::new();
    let read = input
        .by_ref()
        .take(len)
        .read_to_end(&mut payload)
        .map_err(|e| CheckError::io("<stdin>", e))?;
    if u64::try_from(read).unwrap_or(u64::MAX) < len {
        return Err(CheckError::io(
            "<stdin>",
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("payload ended after {read} of {len} bytes"),
            ),
        ));
    }
    Ok(Some(Frame {
        headers,
        payload: String::from_utf8_lossy(&payload).into_owned(),
    }))
}

fn framing_loop(mut input: impl BufRead, frames: &Sender<Result<Frame>>) {
    loop {
        let frame = match read_frame(&mut input) {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => return,
            // An IO failure leaves the stream position unknown; stop framing.
            Err(err @ CheckError::Io { .. }) => {
                let _ = frames.send(Err(err));
                return;
            }
            Err(err) => Err(err),
        };
        if frames.send(frame).is_err() {
            return;
        }
    }
}

/// Control-channel endpoint fed by a background framing thread.
#[derive(Debug)]
pub struct EventListener {
    frames: Receiver<Result<Frame>>,
    poll: Duration,
}

impl EventListener {
    /// Start framing `input` on a background thread.
    pub fn spawn<R: BufRead + Send + 'static>(input: R) -> Result<Self> {
        let (tx, rx) = bounded(1);
        thread::Builder::new()
            .name("event-framing".to_string())
            .spawn(move || framing_loop(input, &tx))
            .map_err(|e| CheckError::Runtime {
                details: format!("failed to spawn framing thread: {e}"),
            })?;
        Ok(Self {
            frames: rx,
            poll: DEFAULT_POLL,
        })
    }

    /// How often a blocked wait re-checks the shutdown token.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    /// Announce readiness and block until the next event arrives.
    ///
    /// Fails with [`CheckError::Interrupted`] once `shutdown` is requested while
    /// no event is pending, and with [`CheckError::ChannelClosed`] when the
    /// control plane closes the channel.
    pub fn wait_for_event(&self, output: &mut impl Write, shutdown: &Shutdown) -> Result<Event> {
        if shutdown.is_requested() {
            return Err(CheckError::Interrupted);
        }
        output
            .write_all(READY)
            .and_then(|()| output.flush())
            .map_err(|e| CheckError::io("<stdout>", e))?;
        loop {
            match self.frames.recv_timeout(self.poll) {
                Ok(frame) => return Event::from_frame(frame?),
                Err(RecvTimeoutError::Timeout) => {
                    if shutdown.is_requested() {
                        return Err(CheckError::Interrupted);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return Err(CheckError::ChannelClosed),
            }
        }
    }
}

/// Write the success marker for the current event.
pub fn acknowledge(output: &mut impl Write) -> Result<()> {
    write_result(output, RESULT_OK)
}

fn write_result(output: &mut impl Write, marker: &[u8]) -> Result<()> {
    output
        .write_all(marker)
        .and_then(|()| output.flush())
        .map_err(|e| CheckError::io("<stdout>", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const TICK: &str = "ver:3.0 server:supervisor serial:21 pool:web_check poolserial:10 \
                        eventname:TICK_60 len:15\nwhen:1201063880";

    fn listener(input: &str) -> EventListener {
        EventListener::spawn(Cursor::new(input.as_bytes().to_vec()))
            .expect("spawn")
            .with_poll_interval(Duration::from_millis(10))
    }

    #[test]
    fn reads_tick_event_after_ready() {
        let listener = listener(TICK);
        let mut out = Vec::new();
        let event = listener
            .wait_for_event(&mut out, &Shutdown::new())
            .expect("event");
        assert_eq!(out, READY);
        assert_eq!(event.kind, EventKind::Tick(TickKind::Tick60));
        assert_eq!(event.name(), "TICK_60");
        assert_eq!(event.headers.get("serial").map(String::as_str), Some("21"));
        assert_eq!(event.payload, "when:1201063880");
    }

    #[test]
    fn non_tick_events_are_classified_as_other() {
        let input = "ver:3.0 eventname:PROCESS_STATE_RUNNING len:0\n";
        let event = listener(input)
            .wait_for_event(&mut Vec::new(), &Shutdown::new())
            .expect("event");
        assert_eq!(event.kind, EventKind::Other("PROCESS_STATE_RUNNING".to_string()));
        assert!(!event.is_tick());
    }

    #[test]
    fn consecutive_frames_respect_payload_length() {
        let input = format!("{TICK}eventname:TICK_5 len:4\nabcd");
        let listener = listener(&input);
        let shutdown = Shutdown::new();
        let mut out = Vec::new();
        let first = listener.wait_for_event(&mut out, &shutdown).expect("first");
        acknowledge(&mut out).expect("ack");
        let second = listener.wait_for_event(&mut out, &shutdown).expect("second");
        assert_eq!(first.kind, EventKind::Tick(TickKind::Tick60));
        assert_eq!(second.kind, EventKind::Tick(TickKind::Tick5));
        assert_eq!(second.payload, "abcd");
        assert_eq!(out, b"READY\nRESULT 2\nOKREADY\n");
    }

    #[test]
    fn end_of_input_reports_channel_closed() {
        let err = listener("")
            .wait_for_event(&mut Vec::new(), &Shutdown::new())
            .expect_err("closed");
        assert!(matches!(err, CheckError::ChannelClosed));
    }

    #[test]
    fn stop_requested_before_wait_skips_handshake() {
        let shutdown = Shutdown::new();
        shutdown.request_stop();
        let mut out = Vec::new();
        let err = listener(TICK)
            .wait_for_event(&mut out, &shutdown)
            .expect_err("interrupted");
        assert!(matches!(err, CheckError::Interrupted));
        assert!(out.is_empty());
    }

    #[test]
    fn stop_requested_while_blocked_interrupts_wait() {
        // A reader that never yields data keeps the framing thread blocked.
        let (_keep_open, pipe_rx) = crossbeam_channel::unbounded::<Vec<u8>>();
        struct Blocking(crossbeam_channel::Receiver<Vec<u8>>);
        impl std::io::Read for Blocking {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                let _ = self.0.recv();
                Ok(0)
            }
        }
        let listener = EventListener::spawn(std::io::BufReader::new(Blocking(pipe_rx)))
            .expect("spawn")
            .with_poll_interval(Duration::from_millis(10));

        let shutdown = Shutdown::new();
        let trigger = shutdown.clone();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            trigger.request_stop();
        });
        let err = listener
            .wait_for_event(&mut Vec::new(), &shutdown)
            .expect_err("interrupted");
        stopper.join().expect("stopper");
        assert!(matches!(err, CheckError::Interrupted));
    }

    #[test]
    fn malformed_header_surfaces_protocol_error_then_recovers() {
        let input = format!("garbage\n{TICK}");
        let listener = listener(&input);
        let shutdown = Shutdown::new();
        let err = listener
            .wait_for_event(&mut Vec::new(), &shutdown)
            .expect_err("protocol");
        assert_eq!(err.code(), "SCK-3003");
        let event = listener
            .wait_for_event(&mut Vec::new(), &shutdown)
            .expect("next frame");
        assert!(event.is_tick());
    }

    #[test]
    fn result_markers_match_wire_format() {
        let mut out = Vec::new();
        acknowledge(&mut out).expect("ack");
        assert_eq!(out, b"RESULT 2\nOK");
    }

    #[test]
    fn oversized_payload_is_skipped_and_framing_resyncs() {
        let len = MAX_PAYLOAD_LEN + 1;
        let filler = "x".repeat(usize::try_from(len).expect("fits"));
        let input = format!("ver:3.0 eventname:TICK_5 len:{len}\n{filler}{TICK}");
        let listener = listener(&input);
        let shutdown = Shutdown::new();
        let err = listener
            .wait_for_event(&mut Vec::new(), &shutdown)
            .expect_err("oversized");
        assert_eq!(err.code(), "SCK-3003");
        assert!(err.to_string().contains("exceeds"));
        let event = listener
            .wait_for_event(&mut Vec::new(), &shutdown)
            .expect("next frame");
        assert_eq!(event.kind, EventKind::Tick(TickKind::Tick60));
    }

    #[test]
    fn absurd_payload_length_is_a_protocol_error_not_an_abort() {
        let input = "ver:3.0 eventname:TICK_5 len:9000000000000000000\nwhen:1";
        let oversized = listener(input);
        let shutdown = Shutdown::new();
        let err = oversized
            .wait_for_event(&mut Vec::new(), &shutdown)
            .expect_err("oversized");
        assert_eq!(err.code(), "SCK-3003");
        let err = oversized
            .wait_for_event(&mut Vec::new(), &shutdown)
            .expect_err("closed");
        assert!(matches!(err, CheckError::ChannelClosed));

        let overflow = listener("ver:3.0 eventname:TICK_5 len:18446744073709551616\n")
            .wait_for_event(&mut Vec::new(), &shutdown)
            .expect_err("unparseable");
        assert_eq!(overflow.code(), "SCK-3003");
    }

    #[test]
    fn truncated_payload_stops_framing() {
        let input = "ver:3.0 eventname:TICK_5 len:50\nwhen:1";
        let err = listener(input)
            .wait_for_event(&mut Vec::new(), &Shutdown::new())
            .expect_err("short payload");
        assert_eq!(err.code(), "SCK-9001");
    }

    mod prop {
        use super::super::parse_header_line;
        use proptest::prelude::*;
        use std::collections::BTreeMap;

        proptest! {
            #[test]
            fn header_tokens_parse_back_to_their_map(
                map in proptest::collection::btree_map("[a-z]{1,8}", "[A-Za-z0-9_.:]{0,12}", 1..8)
            ) {
                let line = map
                    .iter()
                    .map(|(k, v)| format!("{k}:{v}"))
                    .collect::<Vec<_>>()
                    .join(" ");
                let parsed = parse_header_line(&line).expect("well-formed line");
                let expected: BTreeMap<String, String> = map;
                prop_assert_eq!(parsed, expected);
            }

            #[test]
            fn parser_never_panics(line in "\\PC{0,64}") {
                let _ = parse_header_line(&line);
            }
        }
    }
}
