//! Loopback interface implemented for testing instruments that communicate by sending strings.
//!
//! End-of-command is in these cases always determined by a terminator string, usually `"\n"` or
//! similar.

use std::{collections::VecDeque, time::Duration};

use crate::{DEFAULT_TIMEOUT, InstrumentError, InstrumentInterface, loopback::IncrIndex};

/// An interface that allows you to simply write tests for your instrument driver.
///
/// You provide the commands that are expected from the host, and the responses the instrument
/// sends back. Both lists are consumed in order. Sending anything unexpected panics, and so does
/// dropping the interface while script entries are left over.
///
/// On top of plain commands, the loopback records every timeout that is set on it and can
/// pretend that its input buffer is still streaming, which is how a ghost connection looks from
/// the host. A response of [`LoopbackInterfaceString::NO_RESPONSE`] makes the read that would
/// consume it time out instead.
///
/// # Example
///
/// ```
/// use ivkit::{InstrumentInterface, LoopbackInterfaceString};
///
/// let host2inst = vec!["*IDN?".to_string()];
/// let inst2host = vec!["KEITHLEY INSTRUMENTS INC.,MODEL 2400,1234,C30".to_string()];
/// let mut lbk = LoopbackInterfaceString::new(host2inst, inst2host, "\n");
///
/// assert_eq!(
///     lbk.query("*IDN?").unwrap(),
///     "KEITHLEY INSTRUMENTS INC.,MODEL 2400,1234,C30"
/// );
/// ```
#[derive(Debug)]
pub struct LoopbackInterfaceString {
    from_host: Vec<String>,
    from_inst: Vec<String>,
    terminator_exp: String,
    from_host_index: IncrIndex,
    from_inst_index: IncrIndex,
    curr_bytes: VecDeque<u8>,
    terminator: String,
    read_terminator: String,
    timeout: Duration,
    timeout_history: Vec<Duration>,
    ghost_resets: usize,
    closed: bool,
}

impl LoopbackInterfaceString {
    /// Scripted response for an instrument that stays silent: reading it fails with
    /// [`InstrumentError::Timeout`].
    pub const NO_RESPONSE: &'static str = "\u{0}no response";

    /// Create a new loopback instrument with given commands to and from instrument.
    ///
    /// The commands are read in order. When the [`LoopbackInterfaceString`] is dropped, `finalize`
    /// checks that every command you provided has been used and panics otherwise. Whenever
    /// something is sent to the instrument that is not expected, the interface panics as well.
    ///
    /// # Arguments:
    /// * `from_host` - Commands from host to instrument.
    /// * `from_inst` - Commands from instrument to host.
    /// * `terminator_exp` - The expected terminator. It is appended to every entry of both lists.
    pub fn new(from_host: Vec<String>, from_inst: Vec<String>, terminator_exp: &str) -> Self {
        LoopbackInterfaceString {
            from_host,
            from_inst,
            terminator_exp: terminator_exp.to_string(),
            from_host_index: IncrIndex::default(),
            from_inst_index: IncrIndex::default(),
            curr_bytes: VecDeque::new(),
            terminator: "\n".to_string(),
            read_terminator: "\n".to_string(),
            timeout: DEFAULT_TIMEOUT,
            timeout_history: Vec::new(),
            ghost_resets: 0,
            closed: false,
        }
    }

    /// Let the first `count` input drains report a ghost connection.
    pub fn with_ghost_resets(mut self, count: usize) -> Self {
        self.ghost_resets = count;
        self
    }

    /// Every timeout that was set on this interface, oldest first.
    pub fn timeout_history(&self) -> &[Duration] {
        &self.timeout_history
    }

    /// Whether `close` was called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// This command panics if not all commands in the [`LoopbackInterfaceString`] have been used.
    ///
    /// It is automatically called when the [`LoopbackInterfaceString`] is dropped, but you can
    /// also call it manually to ensure that all commands have been used.
    pub fn finalize(&mut self) {
        let from_host_leftover = self.from_host.get(self.from_host_index.next());
        let from_inst_leftover = self.from_inst.get(self.from_inst_index.next());
        if let Some(fil) = from_host_leftover {
            panic!("Leftover expected commands found from host to instrument: {fil}");
        }
        if let Some(fil) = from_inst_leftover {
            panic!("Leftover expected commands found from instrument to host: {fil}");
        }
    }

    /// Get the next command from host to instrument as a string including the terminator.
    fn get_next_from_host_with_terminator(&mut self) -> String {
        let cmd = self
            .from_host
            .get(self.from_host_index.next())
            .expect("No more commands were expected from host to instrument.");
        format!("{cmd}{}", self.terminator_exp)
    }

    /// Get the next command from instrument to host as a string including the terminator.
    fn get_next_from_inst_with_terminator(&mut self) -> String {
        let cmd = self
            .from_inst
            .get(self.from_inst_index.next())
            .expect("No more commands were expected from instrument to host.");
        format!("{cmd}{}", self.terminator_exp)
    }

    /// Read exactly one byte from the current response, pulling the next one if required.
    ///
    /// This just panics if there are no more responses. If there are none but one is required,
    /// the panic is justified as this is a test interface.
    fn read_one_byte(&mut self) -> Result<u8, InstrumentError> {
        loop {
            if let Some(byte) = self.curr_bytes.pop_front() {
                return Ok(byte);
            }
            let next = self.get_next_from_inst_with_terminator();
            if next.strip_suffix(self.terminator_exp.as_str()) == Some(Self::NO_RESPONSE) {
                return Err(InstrumentError::Timeout(self.timeout));
            }
            self.curr_bytes = next.into_bytes().into();
        }
    }
}

impl InstrumentInterface for LoopbackInterfaceString {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), InstrumentError> {
        for byte in buf.iter_mut() {
            *byte = self.read_one_byte()?;
        }
        Ok(())
    }

    fn write_raw(&mut self, cmd: &[u8]) -> Result<usize, InstrumentError> {
        let exp = self.get_next_from_host_with_terminator();
        assert_eq!(
            exp.as_bytes(),
            cmd,
            "Expected sendcmd {exp:?}, got {:?}",
            String::from_utf8_lossy(cmd)
        );
        Ok(cmd.len())
    }

    fn get_terminator(&self) -> &str {
        self.terminator.as_str()
    }

    fn set_terminator(&mut self, terminator: &str) {
        self.terminator = terminator.to_string();
    }

    fn get_read_terminator(&self) -> &str {
        self.read_terminator.as_str()
    }

    fn set_read_terminator(&mut self, terminator: &str) {
        self.read_terminator = terminator.to_string();
    }

    fn get_timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), InstrumentError> {
        self.timeout = timeout;
        self.timeout_history.push(timeout);
        Ok(())
    }

    fn clear_input(&mut self) -> Result<(), InstrumentError> {
        self.curr_bytes.clear();
        Ok(())
    }

    fn interrupt(&mut self) -> Result<(), InstrumentError> {
        Ok(())
    }

    fn hard_reset_input(&mut self) -> Result<bool, InstrumentError> {
        self.curr_bytes.clear();
        if self.ghost_resets > 0 {
            self.ghost_resets -= 1;
            return Ok(false);
        }
        Ok(true)
    }

    fn close(&mut self) -> Result<(), InstrumentError> {
        self.closed = true;
        Ok(())
    }
}

impl Drop for LoopbackInterfaceString {
    fn drop(&mut self) {
        self.finalize();
    }
}
