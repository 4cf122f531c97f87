/*
 * Copyright (C) 2018 Nils Asmussen <nils@os.inf.tu-dresden.de>
 * Economic rights: Technische Universitaet Dresden (Germany)
 *
 * Copyright (C) 2019-2024 Nils Asmussen, Barkhausen Institut
 *
 * This file is part of M3 (Microkernel-based SysteM for Heterogeneous Manycores).
 *
 * M3 is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License version 2 as
 * published by the Free Software Foundation.
 *
 * M3 is distributed in the hope that it will be useful, but
 * WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU
 * General Public License version 2 for more details.
 */

//! Contains the logger

use std::cmp;
use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::Instant;

use crate::env;
use crate::io::LogFlags;

const MAX_LINE_LEN: usize = 180;
const SUFFIX: &[u8] = b"\x1B[0m";

static LOG: OnceLock<Mutex<Log>> = OnceLock::new();

/// A line-buffered logger that writes to stderr
///
/// Every line is prefixed with the program name and the microseconds since the logger was
/// created. Which lines are printed is controlled by the flags, which are read from the
/// environment variable `SPE_LOG` (e.g., `SPE_LOG="Info | Error | SpeDma"`).
pub struct Log {
    flags: LogFlags,
    start: Instant,
    buf: [u8; MAX_LINE_LEN],
    pos: usize,
    time_pos: usize,
    start_pos: usize,
}

impl Log {
    /// Returns the logger, creating it on first use
    pub fn get() -> Option<MutexGuard<'static, Log>> {
        let log = LOG.get_or_init(|| {
            let mut log = Log::new();
            log.init("spe");
            Mutex::new(log)
        });
        // the line buffer stays consistent if a writer panicked
        Some(match log.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        })
    }

    fn new() -> Self {
        Log {
            flags: Self::flags_from_env(),
            start: Instant::now(),
            buf: [0; MAX_LINE_LEN],
            pos: 0,
            time_pos: 0,
            start_pos: 0,
        }
    }

    #[cfg(feature = "bench")]
    fn flags_from_env() -> LogFlags {
        LogFlags::Info | LogFlags::Error
    }

    #[cfg(not(feature = "bench"))]
    fn flags_from_env() -> LogFlags {
        match env::var("SPE_LOG") {
            Some(s) => s.parse().unwrap_or(LogFlags::Info | LogFlags::Error),
            None => LogFlags::Info | LogFlags::Error,
        }
    }

    /// Returns the enabled log flags
    pub fn flags(&self) -> LogFlags {
        self.flags
    }

    fn put_char(&mut self, c: u8) -> io::Result<()> {
        self.buf[self.pos] = c;
        self.pos += 1;

        if c == b'\n' || self.pos + SUFFIX.len() + 1 >= MAX_LINE_LEN {
            for c in SUFFIX {
                self.buf[self.pos] = *c;
                self.pos += 1;
            }
            if c != b'\n' {
                self.buf[self.pos] = b'\n';
                self.pos += 1;
            }

            self.flush()?;
        }
        Ok(())
    }

    pub(crate) fn init(&mut self, name: &str) {
        let begin = match name.rfind('/') {
            Some(b) => b + 1,
            None => 0,
        };
        let len = cmp::min(name.len() - begin, 8);

        self.pos = 0;
        let prefix = format!("\x1B[0;36m[{:<8}@", &name[begin..begin + len]);
        let plen = cmp::min(prefix.len(), MAX_LINE_LEN / 2);
        self.buf[..plen].copy_from_slice(&prefix.as_bytes()[..plen]);
        self.pos = plen;
        self.time_pos = self.pos;
        self.start_pos = self.pos + 11 + 2;
        self.pos = self.start_pos;
    }
}

impl Write for Log {
    fn flush(&mut self) -> io::Result<()> {
        let length = self.pos;
        if length == self.start_pos {
            return Ok(());
        }

        let time = format!(
            "{:11}] ",
            self.start.elapsed().as_micros() % 10_000_000_000
        );
        self.buf[self.time_pos..self.start_pos].copy_from_slice(time.as_bytes());
        self.pos = self.start_pos;
        io::stderr().write_all(&self.buf[0..length])
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for b in buf {
            self.put_char(*b)?;
        }
        Ok(buf.len())
    }
}

/// Initializes the logger, using `name` as the line prefix
pub fn init(name: &str) {
    if let Some(mut l) = Log::get() {
        l.init(name);
    }
}
