use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(10);

fn combined_output(output: &std::process::Output) -> String {
    let mut combined = String::new();
    combined.push_str(&String::from_utf8_lossy(&output.stdout));
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    combined
}

fn bridge_bin() -> &'static str {
    env!("CARGO_BIN_EXE_pty-bridge")
}

fn base_command() -> Command {
    let mut command = Command::new(bridge_bin());
    for var in [
        "PTY_SHELL",
        "PTY_SHELL_ARGS",
        "PTY_COLS",
        "PTY_ROWS",
        "PTY_ENV",
        "PTY_BRIDGE_LOGS",
        "PTY_BRIDGE_LOG_CONTENT",
    ] {
        command.env_remove(var);
    }
    command.env("PTY_BRIDGE_NO_LOGS", "true");
    command
}

struct Bridge {
    child: Child,
    stdin: Option<ChildStdin>,
    events: Receiver<Value>,
    seen: Vec<Value>,
}

impl Bridge {
    fn spawn(mut command: Command) -> Self {
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn pty-bridge");
        let stdout = child.stdout.take().expect("piped stdout");
        let stdin = child.stdin.take();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                let value: Value = serde_json::from_str(&line)
                    .unwrap_or_else(|err| panic!("non-JSON line {line:?}: {err}"));
                if tx.send(value).is_err() {
                    break;
                }
            }
        });
        Self {
            child,
            stdin,
            events: rx,
            seen: Vec::new(),
        }
    }

    fn send(&mut self, line: &str) {
        let stdin = self.stdin.as_mut().expect("stdin still open");
        stdin.write_all(line.as_bytes()).expect("write control line");
        stdin.flush().expect("flush control line");
    }

    fn send_input(&mut self, text: &str) {
        let line = format!(
            "{{\"type\":\"write\",\"data\":\"{}\"}}\n",
            STANDARD.encode(text.as_bytes())
        );
        self.send(&line);
    }

    fn output_text(&self) -> String {
        let mut bytes = Vec::new();
        for event in self.seen.iter().filter(|event| event["type"] == "data") {
            let chunk = STANDARD
                .decode(event["data"].as_str().expect("data is a string"))
                .expect("data is base64");
            bytes.extend_from_slice(&chunk);
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Collect events until the terminal output contains `needle`.
    fn wait_for_output(&mut self, needle: &str) {
        let deadline = Instant::now() + TIMEOUT;
        while !self.output_text().contains(needle) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(remaining) {
                Ok(event) => self.seen.push(event),
                Err(RecvTimeoutError::Timeout) => panic!(
                    "timed out waiting for {needle:?}; output so far: {:?}",
                    self.output_text()
                ),
                Err(RecvTimeoutError::Disconnected) => panic!(
                    "bridge closed stdout before {needle:?}; output: {:?}",
                    self.output_text()
                ),
            }
        }
    }

    /// Collect everything until stdout closes, then reap the bridge.
    fn finish(mut self) -> Vec<Value> {
        let deadline = Instant::now() + TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(remaining) {
                Ok(event) => self.seen.push(event),
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    let _ = self.child.kill();
                    panic!("bridge did not finish; events: {:?}", self.seen);
                }
            }
        }
        drop(self.stdin.take());
        let status = self.child.wait().expect("wait for pty-bridge");
        assert!(status.success(), "bridge exited with {status}");
        self.seen
    }
}

fn assert_single_final_exit(events: &[Value]) -> &Value {
    let exits = events.iter().filter(|event| event["type"] == "exit").count();
    assert_eq!(exits, 1, "events: {events:?}");
    let last = events.last().expect("at least one event");
    assert_eq!(last["type"], "exit");
    last
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("pty-bridge-cli-{name}-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

fn interactive_sh(dir: &Path) -> Bridge {
    let mut command = base_command();
    command
        .env("PTY_SHELL", "/bin/sh")
        .env("PTY_ENV", r#"{"PS1":"$ "}"#)
        .current_dir(dir);
    Bridge::spawn(command)
}

#[test]
fn help_mentions_name() {
    let output = base_command()
        .arg("--help")
        .output()
        .expect("run pty-bridge --help");
    assert!(output.status.success());
    assert!(combined_output(&output).contains("pty-bridge"));
}

#[test]
fn echo_command_reports_output_then_exit_code() {
    let mut command = base_command();
    command
        .env("PTY_SHELL", "/bin/sh")
        .env("PTY_SHELL_ARGS", r#"["-c","echo hi"]"#);
    let mut bridge = Bridge::spawn(command);
    bridge.wait_for_output("hi");
    let events = bridge.finish();

    let exit = assert_single_final_exit(&events);
    assert_eq!(exit["exitCode"], 0);
    assert!(exit["signal"].is_null());
}

#[test]
fn missing_shell_reports_launch_failure() {
    let mut command = base_command();
    command.env("PTY_SHELL", "/nonexistent/pty-bridge-shell");
    let events = Bridge::spawn(command).finish();

    assert_eq!(events.len(), 1, "events: {events:?}");
    assert_eq!(events[0]["type"], "exit");
    assert_eq!(events[0]["exitCode"], 126);
    let error = events[0]["error"].as_str().expect("error string");
    assert!(
        error.starts_with("failed to launch /nonexistent/pty-bridge-shell"),
        "error was {error:?}"
    );
}

#[test]
fn invalid_configuration_is_reported_on_the_protocol() {
    let mut command = base_command();
    command
        .env("PTY_SHELL", "/bin/sh")
        .env("PTY_SHELL_ARGS", "not json");
    let events = Bridge::spawn(command).finish();

    assert_eq!(events.len(), 1, "events: {events:?}");
    assert_eq!(events[0]["exitCode"], 126);
    assert!(events[0]["error"]
        .as_str()
        .expect("error string")
        .starts_with("invalid configuration:"));
}

#[test]
fn interactive_shell_runs_commands_in_working_directory() {
    let dir = scratch_dir("ls");
    fs::write(dir.join("bridge-marker.txt"), "x").expect("write marker");

    let mut bridge = interactive_sh(&dir);
    bridge.send_input("ls\n");
    bridge.wait_for_output("bridge-marker.txt");
    bridge.send("{\"type\":\"close\"}\n");
    let events = bridge.finish();
    assert_single_final_exit(&events);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn malformed_lines_do_not_stop_the_bridge() {
    let dir = scratch_dir("malformed");
    let mut bridge = interactive_sh(&dir);
    bridge.send("this is not json\n");
    bridge.send("{\"type\":\"launch-missiles\"}\n");
    bridge.send("\n");
    bridge.send("{\"type\":\"write\",\"data\":42}\n");
    bridge.send_input("printf 'al%s\\n' ive\n");
    bridge.wait_for_output("alive");
    bridge.send("{\"type\":\"close\"}\n");

    let events = bridge.finish();
    assert!(events.iter().all(|event| event["type"] != "error"));
    assert_single_final_exit(&events);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn resize_is_visible_to_the_shell() {
    let dir = scratch_dir("resize");
    let mut bridge = interactive_sh(&dir);
    bridge.send("{\"type\":\"resize\",\"rows\":30,\"cols\":100}\n");
    bridge.send_input("stty size\n");
    bridge.wait_for_output("30 100");
    bridge.send("{\"type\":\"close\"}\n");
    assert_single_final_exit(&bridge.finish());
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn closing_stdin_ends_the_session() {
    let dir = scratch_dir("eof");
    let mut bridge = interactive_sh(&dir);
    bridge.send_input("echo ready\n");
    bridge.wait_for_output("ready");
    drop(bridge.stdin.take());
    assert_single_final_exit(&bridge.finish());
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn large_write_to_echoing_cat_finishes() {
    let mut command = base_command();
    command.env("PTY_SHELL", "/bin/cat");
    let mut bridge = Bridge::spawn(command);
    for batch in 0..20 {
        let mut text = String::new();
        for line in 0..100 {
            text.push_str(&format!("row-{:05}-{}\n", batch * 100 + line, "y".repeat(90)));
        }
        bridge.send_input(&text);
    }
    bridge.send_input("\x04");
    bridge.wait_for_output("row-01999-");

    let events = bridge.finish();
    assert_eq!(assert_single_final_exit(&events)["exitCode"], 0);
}

#[test]
fn out_of_range_resize_is_reported_and_ignored() {
    let dir = scratch_dir("bad-resize");
    let mut bridge = interactive_sh(&dir);
    bridge.send("{\"type\":\"resize\",\"rows\":70000,\"cols\":100}\n");
    bridge.send("{\"type\":\"resize\",\"rows\":-1}\n");
    bridge.send_input("stty size\n");
    bridge.wait_for_output("24 80");
    bridge.send("{\"type\":\"close\"}\n");

    let events = bridge.finish();
    let errors: Vec<&str> = events
        .iter()
        .filter(|event| event["type"] == "error")
        .map(|event| event["error"].as_str().expect("error string"))
        .collect();
    assert_eq!(errors.len(), 2, "events: {events:?}");
    assert!(errors
        .iter()
        .all(|error| error.starts_with("failed to set window size")));
    assert_single_final_exit(&events);
    let _ = fs::remove_dir_all(&dir);
}
