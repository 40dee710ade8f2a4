// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Input and output for `READ` and `WRITE`.

use std::io::{self, BufRead, BufReader, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::RuntimeErrorKind;
use crate::runtime::value::Value;

/// Line input and text output shared by every execution of a VM.
pub(crate) struct Io {
    input: Mutex<Box<dyn BufRead + Send>>,
    output: Mutex<Box<dyn Write + Send>>,
}

impl Io {
    pub(crate) fn new(
        input: impl BufRead + Send + 'static,
        output: impl Write + Send + 'static,
    ) -> Self {
        Self {
            input: Mutex::new(Box::new(input)),
            output: Mutex::new(Box::new(output)),
        }
    }

    /// Standard input and output.
    pub(crate) fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stdout())
    }

    pub(crate) fn write(&self, value: &Value) -> Result<(), RuntimeErrorKind> {
        write!(self.output.lock(), "{}", value).map_err(io_error)
    }

    /// Reads one line without its terminator. `None` at end of input.
    pub(crate) fn read_line(&self) -> Result<Option<String>, RuntimeErrorKind> {
        // Prompts written before a read must be visible
        self.flush()?;

        let mut line = String::new();
        if self.input.lock().read_line(&mut line).map_err(io_error)? == 0 {
            return Ok(None);
        }
        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(Some(line))
    }

    pub(crate) fn flush(&self) -> Result<(), RuntimeErrorKind> {
        self.output.lock().flush().map_err(io_error)
    }
}

fn io_error(err: io::Error) -> RuntimeErrorKind {
    RuntimeErrorKind::Io(err.to_string())
}

/// An in-memory output sink that can be cloned and inspected.
///
/// ```rust,ignore
/// let out = SharedOutput::new();
/// let vm = Vm::with_io(VmConfig::default(), std::io::empty(), out.clone());
/// vm.run()?;
/// assert_eq!(out.contents(), "5");
/// ```
#[derive(Debug, Clone, Default)]
pub struct SharedOutput(Arc<Mutex<Vec<u8>>>);

impl SharedOutput {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded as UTF-8.
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }

    /// Discards everything written so far.
    pub fn clear(&self) {
        self.0.lock().clear();
    }
}

impl Write for SharedOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
