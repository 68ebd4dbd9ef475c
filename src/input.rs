//! Raw-mode interactive line reader.
//!
//! Reads one line from a terminal byte by byte, decoding UTF-8 itself so it
//! does not depend on any line-editing library. The terminal is reached
//! through the [`Terminal`] trait so the editing logic can be driven by a
//! scripted byte stream in tests.

use std::io::{self, BufRead, IsTerminal, Write};

use thiserror::Error;

/// Returned by [`LineReader::read_line`] when Ctrl-D arrives on an empty line.
pub const EXIT_SENTINEL: &str = "exit";

const CTRL_C: u8 = 3;
const CTRL_D: u8 = 4;
const CTRL_H: u8 = 8;
const TAB: u8 = 9;
const LF: u8 = 10;
const CR: u8 = 13;
const ESC: u8 = 27;
const DEL: u8 = 127;

/// Carriage return followed by ANSI "erase to end of line".
const CLEAR_LINE: &str = "\r\x1b[K";

/// Default width when the terminal cannot report one.
const DEFAULT_WIDTH: u16 = 80;

/// Errors from reading a line
#[derive(Debug, Error)]
pub enum ReadError {
    /// The user pressed Ctrl-C
    #[error("interrupted")]
    Interrupted,

    /// The input stream failed or was closed
    #[error("failed to read input: {0}")]
    Io(#[from] io::Error),
}

impl ReadError {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, ReadError::Interrupted)
    }
}

/// Terminal capabilities the line reader needs.
pub trait Terminal {
    /// Switch to unbuffered, no-echo input. Errors mean raw mode is unavailable.
    fn enable_raw_mode(&mut self) -> io::Result<()>;

    /// Restore the mode saved by `enable_raw_mode`.
    fn disable_raw_mode(&mut self) -> io::Result<()>;

    /// Read a single byte. `Ok(None)` means end of stream.
    fn read_byte(&mut self) -> io::Result<Option<u8>>;

    /// Return the next byte if one is already available, without blocking.
    /// A peeked byte is returned again by the following `read_byte`.
    fn peek_byte(&mut self) -> io::Result<Option<u8>>;

    /// Write output and flush it.
    fn write_str(&mut self, s: &str) -> io::Result<()>;

    /// Read one cooked (line-buffered) line. `Ok(None)` means end of stream.
    fn read_cooked_line(&mut self) -> io::Result<Option<String>>;

    /// Terminal width in columns.
    fn width(&self) -> u16;
}

/// Puts a terminal into raw mode for as long as it is alive.
struct RawModeGuard<'a, T: Terminal + ?Sized> {
    terminal: &'a mut T,
}

impl<'a, T: Terminal + ?Sized> RawModeGuard<'a, T> {
    /// Wrap a terminal that has just entered raw mode.
    fn engaged(terminal: &'a mut T) -> Self {
        Self { terminal }
    }
}

impl<T: Terminal + ?Sized> std::ops::Deref for RawModeGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.terminal
    }
}

impl<T: Terminal + ?Sized> std::ops::DerefMut for RawModeGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.terminal
    }
}

impl<T: Terminal + ?Sized> Drop for RawModeGuard<'_, T> {
    fn drop(&mut self) {
        if let Err(e) = self.terminal.disable_raw_mode() {
            tracing::warn!(error = %e, "failed to restore terminal mode");
        }
    }
}

/// Interactive line reader with UTF-8, backspace, Ctrl-C and Ctrl-D handling.
pub struct LineReader<T: Terminal> {
    terminal: T,
    prompt: String,
    buffer: Vec<char>,
    width: u16,
}

impl LineReader<StdTerminal> {
    /// Reader attached to the process's stdin/stdout.
    pub fn stdio(prompt: impl Into<String>) -> Self {
        Self::new(StdTerminal::new(), prompt)
    }
}

impl<T: Terminal> LineReader<T> {
    pub fn new(terminal: T, prompt: impl Into<String>) -> Self {
        let width = terminal.width();
        Self {
            terminal,
            prompt: prompt.into(),
            buffer: Vec::new(),
            width,
        }
    }

    pub fn set_prompt(&mut self, prompt: impl Into<String>) {
        self.prompt = prompt.into();
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn terminal(&self) -> &T {
        &self.terminal
    }

    /// Read one line. Returns the trimmed text, [`EXIT_SENTINEL`] on Ctrl-D
    /// with an empty line, or an error on Ctrl-C / I/O failure.
    pub fn read_line(&mut self) -> Result<String, ReadError> {
        self.buffer.clear();

        if let Err(e) = self.terminal.enable_raw_mode() {
            tracing::debug!(error = %e, "raw mode unavailable, using line-buffered input");
            return self.read_line_cooked();
        }
        let mut raw = RawModeGuard::engaged(&mut self.terminal);

        raw.write_str(&self.prompt)?;
        Self::edit_loop(&mut *raw, &self.prompt, &mut self.buffer)
    }

    fn read_line_cooked(&mut self) -> Result<String, ReadError> {
        self.terminal.write_str(&self.prompt)?;
        match self.terminal.read_cooked_line()? {
            Some(line) => Ok(line.trim().to_string()),
            None => Ok(EXIT_SENTINEL.to_string()),
        }
    }

    fn edit_loop(terminal: &mut T, prompt: &str, buffer: &mut Vec<char>) -> Result<String, ReadError> {
        loop {
            let Some(byte) = terminal.read_byte()? else {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "input closed").into());
            };

            match byte {
                CTRL_C => {
                    terminal.write_str("^C\r\n")?;
                    buffer.clear();
                    return Err(ReadError::Interrupted);
                }
                CTRL_D => {
                    // Mid-line Ctrl-D is intentionally a no-op.
                    if buffer.is_empty() {
                        terminal.write_str("\r\n")?;
                        return Ok(EXIT_SENTINEL.to_string());
                    }
                }
                CR | LF => {
                    if byte == CR && terminal.peek_byte()? == Some(LF) {
                        terminal.read_byte()?;
                    }
                    terminal.write_str("\r\n")?;
                    let line: String = buffer.iter().collect();
                    return Ok(line.trim().to_string());
                }
                DEL | CTRL_H => {
                    if buffer.pop().is_some() {
                        let line: String = buffer.iter().collect();
                        terminal.write_str(&format!("{CLEAR_LINE}{prompt}{line}"))?;
                    }
                }
                ESC => {
                    // Arrow keys and friends: ESC [ X
                    for _ in 0..2 {
                        if terminal.read_byte()?.is_none() {
                            break;
                        }
                    }
                }
                TAB => {}
                0x20..=0x7e => {
                    buffer.push(byte as char);
                    let mut utf8 = [0u8; 4];
                    terminal.write_str((byte as char).encode_utf8(&mut utf8))?;
                }
                0x80..=0xff => {
                    if let Some(c) = Self::read_multibyte(terminal, byte)? {
                        buffer.push(c);
                        let mut utf8 = [0u8; 4];
                        terminal.write_str(c.encode_utf8(&mut utf8))?;
                    }
                }
                _ => {}
            }
        }
    }

    /// Finish a UTF-8 sequence started by `lead`. `None` if it is malformed.
    fn read_multibyte(terminal: &mut T, lead: u8) -> io::Result<Option<char>> {
        let len = utf8_sequence_len(lead);
        let mut seq = Vec::with_capacity(4);
        seq.push(lead);

        for _ in 1..len {
            match terminal.read_byte()? {
                Some(b) => seq.push(b),
                None => break,
            }
        }

        Ok(decode_single_char(&seq))
    }
}

/// Sequence length implied by a UTF-8 lead byte; 1 for bytes that cannot lead.
fn utf8_sequence_len(lead: u8) -> usize {
    match lead {
        b if b & 0xe0 == 0xc0 => 2,
        b if b & 0xf0 == 0xe0 => 3,
        b if b & 0xf8 == 0xf0 => 4,
        _ => 1,
    }
}

/// Decode `bytes` as exactly one code point, rejecting U+FFFD.
fn decode_single_char(bytes: &[u8]) -> Option<char> {
    let s = std::str::from_utf8(bytes).ok()?;
    let mut chars = s.chars();
    let c = chars.next()?;
    if chars.next().is_some() || c == char::REPLACEMENT_CHARACTER {
        return None;
    }
    Some(c)
}

/// The process's controlling terminal.
///
/// Raw mode goes through crossterm. On unix, input bytes are read straight
/// from file descriptor 0 so nothing is buffered ahead of the reader and a
/// zero-timeout `poll` can answer "is another byte already waiting".
pub struct StdTerminal {
    pending: Option<u8>,
    raw: bool,
}

impl StdTerminal {
    pub fn new() -> Self {
        Self {
            pending: None,
            raw: false,
        }
    }

    #[cfg(unix)]
    fn read_fd_byte() -> io::Result<Option<u8>> {
        let mut byte = 0u8;
        loop {
            // SAFETY: `byte` is a live one-byte buffer for the whole call
            let n = unsafe { libc::read(libc::STDIN_FILENO, (&mut byte as *mut u8).cast(), 1) };
            match n {
                1 => return Ok(Some(byte)),
                0 => return Ok(None),
                _ => {
                    let err = io::Error::last_os_error();
                    if err.kind() != io::ErrorKind::Interrupted {
                        return Err(err);
                    }
                }
            }
        }
    }

    #[cfg(not(unix))]
    fn read_fd_byte() -> io::Result<Option<u8>> {
        use std::io::Read;

        let mut byte = [0u8; 1];
        match io::stdin().lock().read(&mut byte)? {
            0 => Ok(None),
            _ => Ok(Some(byte[0])),
        }
    }

    #[cfg(unix)]
    fn input_ready() -> io::Result<bool> {
        let mut fds = libc::pollfd {
            fd: libc::STDIN_FILENO,
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: `fds` points to exactly one initialised pollfd; a zero
        // timeout never blocks
        let n = unsafe { libc::poll(&mut fds, 1, 0) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n > 0 && fds.revents & libc::POLLIN != 0)
    }

    #[cfg(not(unix))]
    fn input_ready() -> io::Result<bool> {
        Ok(false)
    }
}

impl Default for StdTerminal {
    fn default() -> Self {
        Self::new()
    }
}

impl Terminal for StdTerminal {
    fn enable_raw_mode(&mut self) -> io::Result<()> {
        if !io::stdin().is_terminal() {
            return Err(io::Error::other("stdin is not a terminal"));
        }
        crossterm::terminal::enable_raw_mode()?;
        self.raw = true;
        Ok(())
    }

    fn disable_raw_mode(&mut self) -> io::Result<()> {
        if self.raw {
            self.raw = false;
            crossterm::terminal::disable_raw_mode()?;
        }
        Ok(())
    }

    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        if let Some(b) = self.pending.take() {
            return Ok(Some(b));
        }
        Self::read_fd_byte()
    }

    fn peek_byte(&mut self) -> io::Result<Option<u8>> {
        if self.pending.is_none() && Self::input_ready()? {
            self.pending = Self::read_fd_byte()?;
        }
        Ok(self.pending)
    }

    fn write_str(&mut self, s: &str) -> io::Result<()> {
        let mut out = io::stdout().lock();
        out.write_all(s.as_bytes())?;
        out.flush()
    }

    fn read_cooked_line(&mut self) -> io::Result<Option<String>> {
        let mut line = String::new();
        if let Some(b) = self.pending.take() {
            line.push(b as char);
        }
        let n = io::stdin().lock().read_line(&mut line)?;
        if n == 0 && line.is_empty() {
            return Ok(None);
        }
        Ok(Some(line))
    }

    fn width(&self) -> u16 {
        crossterm::terminal::size()
            .map(|(cols, _)| cols)
            .unwrap_or(DEFAULT_WIDTH)
    }
}
