// HalWire - Peripheral Model Bridge for Firmware Emulation
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::io::{self, Write};

/// UART output sink: everything goes to the terminal, and the first `cap` bytes are
/// also kept in a log. Log bytes past the cap are dropped without error.
pub struct Transcript<T: Write, L: Write> {
    terminal: T,
    log: Option<L>,
    logged: u64,
    cap: u64,
}

impl<T: Write, L: Write> Transcript<T, L> {
    pub fn new(terminal: T, log: Option<L>, cap: u64) -> Self {
        Self {
            terminal,
            log,
            logged: 0,
            cap,
        }
    }

    pub fn logged(&self) -> u64 {
        self.logged
    }

    pub fn log_full(&self) -> bool {
        self.logged >= self.cap
    }
}

impl<T: Write, L: Write> Write for Transcript<T, L> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.terminal.write_all(buf)?;
        if let Some(log) = self.log.as_mut() {
            let room = self.cap.saturating_sub(self.logged);
            let keep = buf.len().min(usize::try_from(room).unwrap_or(usize::MAX));
            if keep > 0 {
                log.write_all(&buf[..keep])?;
                self.logged += keep as u64;
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.terminal.flush()?;
        if let Some(log) = self.log.as_mut() {
            log.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_is_capped_terminal_is_not() {
        let mut term = Vec::new();
        let mut log = Vec::new();
        {
            let mut t = Transcript::new(&mut term, Some(&mut log), 6);
            t.write_all(b"boot ").unwrap();
            t.write_all(b"ok\r\n").unwrap();
            assert_eq!(t.logged(), 6);
            assert!(t.log_full());
            t.write_all(b"more").unwrap();
        }
        assert_eq!(term, b"boot ok\r\nmore");
        assert_eq!(log, b"boot o");
    }

    #[test]
    fn test_without_log() {
        let mut term = Vec::new();
        let mut t: Transcript<_, Vec<u8>> = Transcript::new(&mut term, None, 0);
        t.write_all(b"x").unwrap();
        assert_eq!(t.logged(), 0);
        assert_eq!(term, b"x");
    }
}
