//! A scripted AT modem for deterministic engine tests.
//!
//! [`ScriptedModem`] consumes the bytes an engine writes, splits them
//! into command lines and answers each from a table. Out of the box it
//! behaves like a registered SIM800 with a ready SIM, so a session brought
//! up against it reaches the ready state without any setup. Tests
//! override single commands with [`on`](ScriptedModem::on) or
//! [`once`](ScriptedModem::once), and push unsolicited lines with
//! [`inject`](ScriptedModem::inject).
//!
//! `AT+CMGS` answers with the `> ` prompt and switches to body entry:
//! bytes are collected up to Ctrl-Z, which submits the body, or ESC,
//! which abandons it.
//!
//! # Example
//!
//! ```
//! use gsmlink_test_harness::ScriptedModem;
//!
//! let mut modem = ScriptedModem::new();
//! modem.on("AT+CSQ", "\r\n+CSQ: 31,0\r\n\r\nOK\r\n");
//! modem.write(b"AT+CSQ\r");
//! assert_eq!(modem.read(), b"\r\n+CSQ: 31,0\r\n\r\nOK\r\n");
//! assert_eq!(modem.count("AT+CSQ"), 1);
//! ```

use std::collections::{HashMap, VecDeque};

const CTRL_Z: u8 = 0x1A;
const ESC: u8 = 0x1B;

const OK: &str = "\r\nOK\r\n";
const PROMPT: &str = "\r\n> ";
const DEFAULT_BODY_REPLY: &str = "\r\n+CMGS: 1\r\n\r\nOK\r\n";

/// Reply of a registered SIM800 to `command`.
fn default_reply(command: &str) -> String {
    let reply = match command {
        "AT+CGMM" => "\r\nSIMCOM_SIM800\r\n\r\nOK\r\n",
        "AT+CGMI" => "\r\nSIMCOM_Ltd\r\n\r\nOK\r\n",
        "AT+CGMR" => "\r\nRevision:1418B04SIM800C24\r\n\r\nOK\r\n",
        "AT+CGSN" => "\r\n867273020000001\r\n\r\nOK\r\n",
        "AT+CPIN?" => "\r\n+CPIN: READY\r\n\r\nOK\r\n",
        "AT+CIMI" => "\r\n234150000000001\r\n\r\nOK\r\n",
        "AT+CREG?" => "\r\n+CREG: 0,1\r\n\r\nOK\r\n",
        "AT+CSCA?" => "\r\n+CSCA: \"+447785016005\",145\r\n\r\nOK\r\n",
        "AT+COPS?" => "\r\n+COPS: 0,0,\"vodafone UK\"\r\n\r\nOK\r\n",
        "AT+COPS=?" => {
            "\r\n+COPS: (2,\"vodafone UK\",\"voda UK\",\"23415\"),,(0-4),(0-2)\r\n\r\nOK\r\n"
        }
        "AT+CSQ" => "\r\n+CSQ: 20,0\r\n\r\nOK\r\n",
        _ => OK,
    };
    reply.to_string()
}

/// A table-driven modem.
#[derive(Debug, Clone)]
pub struct ScriptedModem {
    replies: HashMap<String, String>,
    one_shot: HashMap<String, VecDeque<String>>,
    body_reply: String,
    body_one_shot: VecDeque<String>,
    line: Vec<u8>,
    in_body: bool,
    body: Vec<u8>,
    output: VecDeque<u8>,
    received: Vec<String>,
    bodies: Vec<String>,
    escapes: usize,
}

impl Default for ScriptedModem {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedModem {
    /// A modem answering with the built-in SIM800 replies.
    pub fn new() -> Self {
        ScriptedModem {
            replies: HashMap::new(),
            one_shot: HashMap::new(),
            body_reply: DEFAULT_BODY_REPLY.to_string(),
            body_one_shot: VecDeque::new(),
            line: Vec::new(),
            in_body: false,
            body: Vec::new(),
            output: VecDeque::new(),
            received: Vec::new(),
            bodies: Vec::new(),
            escapes: 0,
        }
    }

    /// Answer `command` with `reply` from now on. An empty reply means
    /// the command goes unanswered.
    pub fn on(&mut self, command: &str, reply: &str) {
        self.replies.insert(command.to_string(), reply.to_string());
    }

    /// Answer the next `command` only with `reply`. One-shot replies for
    /// the same command are used in the order they were added.
    pub fn once(&mut self, command: &str, reply: &str) {
        self.one_shot
            .entry(command.to_string())
            .or_default()
            .push_back(reply.to_string());
    }

    /// Never answer `command`.
    pub fn silence(&mut self, command: &str) {
        self.on(command, "");
    }

    /// Reply sent after an SMS body is submitted with Ctrl-Z.
    pub fn on_body(&mut self, reply: &str) {
        self.body_reply = reply.to_string();
    }

    /// Reply to the next submitted body only, in the order added.
    pub fn once_body(&mut self, reply: &str) {
        self.body_one_shot.push_back(reply.to_string());
    }

    /// Queue unsolicited output.
    pub fn inject(&mut self, bytes: &[u8]) {
        self.output.extend(bytes);
    }

    /// Process bytes written by the engine.
    pub fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if self.in_body {
                self.body_byte(b);
                continue;
            }
            match b {
                b'\r' => {
                    let line = String::from_utf8_lossy(&self.line).trim().to_string();
                    self.line.clear();
                    if !line.is_empty() {
                        self.command(line);
                    }
                }
                ESC => {
                    self.line.clear();
                    self.escapes += 1;
                }
                b'\n' | CTRL_Z => {}
                _ => self.line.push(b),
            }
        }
    }

    fn body_byte(&mut self, b: u8) {
        match b {
            CTRL_Z => {
                self.in_body = false;
                let body = String::from_utf8_lossy(&self.body).into_owned();
                self.body.clear();
                self.bodies.push(body);
                let reply = self
                    .body_one_shot
                    .pop_front()
                    .unwrap_or_else(|| self.body_reply.clone());
                self.output.extend(reply.as_bytes());
            }
            ESC => {
                self.in_body = false;
                self.body.clear();
                self.escapes += 1;
            }
            _ => self.body.push(b),
        }
    }

    fn command(&mut self, line: String) {
        let reply = match self.one_shot.get_mut(&line).and_then(VecDeque::pop_front) {
            Some(reply) => reply,
            None => match self.replies.get(&line) {
                Some(reply) => reply.clone(),
                None if line.starts_with("AT+CMGS") => PROMPT.to_string(),
                None => default_reply(&line),
            },
        };
        if reply.ends_with("> ") {
            self.in_body = true;
        }
        self.output.extend(reply.as_bytes());
        self.received.push(line);
    }

    /// Take everything the modem has output so far.
    pub fn read(&mut self) -> Vec<u8> {
        self.output.drain(..).collect()
    }

    /// Move up to `buf.len()` output bytes into `buf`.
    pub fn read_into(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.output.len());
        for (slot, b) in buf.iter_mut().zip(self.output.drain(..n)) {
            *slot = b;
        }
        n
    }

    /// Whether output is waiting to be read.
    pub fn has_output(&self) -> bool {
        !self.output.is_empty()
    }

    /// Command lines received, in order.
    pub fn received(&self) -> &[String] {
        &self.received
    }

    /// How many times `command` was received.
    pub fn count(&self, command: &str) -> usize {
        self.received.iter().filter(|c| *c == command).count()
    }

    /// Submitted SMS bodies, without the Ctrl-Z.
    pub fn bodies(&self) -> Vec<String> {
        self.bodies.clone()
    }

    /// ESC bytes received, in body entry or not.
    pub fn escapes(&self) -> usize {
        self.escapes
    }

    /// Whether the modem is collecting an SMS body.
    pub fn in_body(&self) -> bool {
        self.in_body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_replies() {
        let mut modem = ScriptedModem::new();
        modem.write(b"AT+CPIN?\r");
        assert_eq!(modem.read(), b"\r\n+CPIN: READY\r\n\r\nOK\r\n");
        modem.write(b"ATE0\r");
        assert_eq!(modem.read(), b"\r\nOK\r\n");
        assert_eq!(modem.received(), ["AT+CPIN?", "ATE0"]);
    }

    #[test]
    fn commands_split_across_writes() {
        let mut modem = ScriptedModem::new();
        modem.write(b"AT+C");
        assert!(!modem.has_output());
        modem.write(b"SQ\r\n");
        assert_eq!(modem.read(), b"\r\n+CSQ: 20,0\r\n\r\nOK\r\n");
    }

    #[test]
    fn one_shot_then_standing_reply() {
        let mut modem = ScriptedModem::new();
        modem.on("AT+CREG?", "\r\n+CREG: 0,2\r\n\r\nOK\r\n");
        modem.once("AT+CREG?", "\r\nERROR\r\n");
        modem.write(b"AT+CREG?\rAT+CREG?\r");
        assert_eq!(
            modem.read(),
            b"\r\nERROR\r\n\r\n+CREG: 0,2\r\n\r\nOK\r\n".to_vec()
        );
    }

    #[test]
    fn silenced_command_is_still_recorded() {
        let mut modem = ScriptedModem::new();
        modem.silence("ATH");
        modem.write(b"ATH\r");
        assert!(modem.read().is_empty());
        assert_eq!(modem.count("ATH"), 1);
    }

    #[test]
    fn sms_body_entry() {
        let mut modem = ScriptedModem::new();
        modem.write(b"AT+CMGS=17\r");
        assert_eq!(modem.read(), b"\r\n> ");
        assert!(modem.in_body());
        modem.write(b"0011000391");
        modem.write(b"00F1\x1a");
        assert_eq!(modem.read(), b"\r\n+CMGS: 1\r\n\r\nOK\r\n");
        assert_eq!(modem.bodies(), vec!["001100039100F1".to_string()]);
    }

    #[test]
    fn one_shot_body_reply_comes_first() {
        let mut modem = ScriptedModem::new();
        modem.once_body("\r\n+CMS ERROR: 500\r\n");
        modem.write(b"AT+CMGS=17\r");
        modem.read();
        modem.write(b"00\x1a");
        assert_eq!(modem.read(), b"\r\n+CMS ERROR: 500\r\n");
        modem.write(b"AT+CMGS=17\r");
        modem.read();
        modem.write(b"00\x1a");
        assert_eq!(modem.read(), b"\r\n+CMGS: 1\r\n\r\nOK\r\n");
    }

    #[test]
    fn escape_abandons_body() {
        let mut modem = ScriptedModem::new();
        modem.write(b"AT+CMGS=17\r");
        modem.read();
        modem.write(b"0011\x1b");
        assert!(!modem.in_body());
        assert!(modem.read().is_empty());
        assert!(modem.bodies().is_empty());
        assert_eq!(modem.escapes(), 1);
    }

    #[test]
    fn read_into_partial() {
        let mut modem = ScriptedModem::new();
        modem.inject(b"\r\nRING\r\n");
        let mut buf = [0u8; 4];
        assert_eq!(modem.read_into(&mut buf), 4);
        assert_eq!(&buf, b"\r\nRI");
        assert_eq!(modem.read(), b"NG\r\n");
    }
}
