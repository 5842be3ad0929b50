//! Shared helpers for black-box tests of the `svcheck` binary.

#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[cfg(feature = "cli")]
/// Captured outcome of one binary invocation. The full transcript is also
/// written to `log_path` so failures can be inspected after the fact.
pub struct CliResult {
    pub status: std::process::ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

#[cfg(feature = "cli")]
pub fn run_cli_case(case: &str, args: &[&str]) -> CliResult {
    run_cli_case_with(case, args, &[], "")
}

#[cfg(feature = "cli")]
/// Run `svcheck` with extra environment and `stdin` piped in, then closed.
pub fn run_cli_case_with(case: &str, args: &[&str], env: &[(&str, String)], stdin: &str) -> CliResult {
    use std::process::{Command, Stdio};

    let mut command = Command::new(env!("CARGO_BIN_EXE_svcheck"));
    command
        .args(args)
        .env_remove("SUPERVISOR_SERVER_URL")
        .env_remove("SUPERVISOR_USERNAME")
        .env_remove("SUPERVISOR_PASSWORD")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in env {
        command.env(key, value);
    }

    let mut child = command.spawn().expect("spawn svcheck");
    {
        let mut pipe = child.stdin.take().expect("stdin pipe");
        pipe.write_all(stdin.as_bytes()).expect("write stdin");
    }
    let output = child.wait_with_output().expect("wait for svcheck");

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    let log_dir = std::env::temp_dir().join("svcheck-test-logs");
    std::fs::create_dir_all(&log_dir).expect("create log dir");
    let log_path = log_dir.join(format!("{case}.log"));
    std::fs::write(
        &log_path,
        format!(
            "args: {args:?}\nstatus: {}\n--- stdout ---\n{stdout}\n--- stderr ---\n{stderr}\n",
            output.status
        ),
    )
    .expect("write case log");

    CliResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

/// A tick event frame exactly as supervisord writes it.
pub fn tick_frame(name: &str) -> String {
    let payload = "when:1700000000";
    format!(
        "ver:3.0 server:supervisor serial:7 pool:svcheck poolserial:7 eventname:{name} len:{}\n{payload}",
        payload.len()
    )
}

/// Minimal supervisord XML-RPC endpoint serving a fixed `web` group.
/// Records the method name of every request it answers.
pub struct FakeSupervisord {
    pub url: String,
    methods: Arc<Mutex<Vec<String>>>,
    handle: Option<JoinHandle<()>>,
}

impl FakeSupervisord {
    /// Serve until `startProcess` has been answered or `deadline` passes.
    pub fn start(processes: &[(&str, i64)], deadline: Duration) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake supervisord");
        listener.set_nonblocking(true).expect("nonblocking");
        let url = format!("http://{}", listener.local_addr().expect("addr"));
        let methods = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&methods);
        let processes: Vec<(String, i64)> = processes.iter().map(|(n, s)| ((*n).to_string(), *s)).collect();

        let handle = thread::spawn(move || {
            let until = Instant::now() + deadline;
            while Instant::now() < until {
                match listener.accept() {
                    Ok((stream, _)) => {
                        stream.set_nonblocking(false).expect("blocking stream");
                        let method = serve_one(stream, &processes);
                        let done = method == "supervisor.startProcess";
                        recorded.lock().expect("methods lock").push(method);
                        if done {
                            return;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(10));
                    }
                    Err(e) => panic!("accept failed: {e}"),
                }
            }
        });

        Self {
            url,
            methods,
            handle: Some(handle),
        }
    }

    /// Wait for the server thread and return the methods it served.
    pub fn finish(mut self) -> Vec<String> {
        if let Some(handle) = self.handle.take() {
            handle.join().expect("fake supervisord thread");
        }
        self.methods.lock().expect("methods lock").clone()
    }
}

fn serve_one(stream: TcpStream, processes: &[(String, i64)]) -> String {
    let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).expect("request header");
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some(value) = line.strip_prefix("Content-Length: ") {
            content_length = value.parse().expect("content length");
        }
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).expect("request body");
    let body = String::from_utf8(body).expect("utf8 body");

    let method = body
        .split("<methodName>")
        .nth(1)
        .and_then(|rest| rest.split("</methodName>").next())
        .unwrap_or_default()
        .to_string();

    let value = match method.as_str() {
        "supervisor.getAllProcessInfo" => {
            let items: String = processes
                .iter()
                .map(|(name, state)| format!("<value>{}</value>", process_struct(name, *state)))
                .collect();
            format!("<array><data>{items}</data></array>")
        }
        "supervisor.getProcessInfo" => {
            let (name, state) = processes
                .iter()
                .find(|(name, _)| body.contains(&format!("web:{name}")))
                .map_or(("unknown", 0), |(name, state)| (name.as_str(), *state));
            process_struct(name, state)
        }
        _ => "<boolean>1</boolean>".to_string(),
    };
    let reply = format!(
        "<?xml version='1.0'?>\n<methodResponse>\n<params>\n<param>\n<value>{value}</value>\n</param>\n</params>\n</methodResponse>\n"
    );
    let mut stream = stream;
    write!(
        stream,
        "HTTP/1.0 200 OK\r\nContent-Type: text/xml\r\nContent-Length: {}\r\n\r\n{reply}",
        reply.len()
    )
    .expect("write reply");
    method
}

fn process_struct(name: &str, state: i64) -> String {
    format!(
        "<struct>\
         <member><name>name</name><value><string>{name}</string></value></member>\
         <member><name>group</name><value><string>web</string></value></member>\
         <member><name>state</name><value><int>{state}</int></value></member>\
         <member><name>pid</name><value><int>4242</int></value></member>\
         <member><name>description</name><value><string>pid 4242, uptime 0:01:00</string></value></member>\
         </struct>"
    )
}

/// A local port with nothing listening on it.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind unused port");
    listener.local_addr().expect("addr").port()
}
