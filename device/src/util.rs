//! In-memory devices for testing and demos.

use alloc::{collections::VecDeque, sync::Arc, vec::Vec};
use futures::lock::Mutex;

use crate::{Device, DeviceError, ReadData, STB_MAV};

pub const DEFAULT_IDN: &[u8] = b"Cyberdyne systems,T800 Model 101,A9012.C,V2.4\n";

/// Simulated message based instrument.
///
/// Queries (messages ending with `?`) produce a response terminated by END. `*IDN?` returns an
/// identification string, other queries use registered responses or echo the query.
pub struct SimulatedDevice {
    idn: Vec<u8>,
    responses: Vec<(Vec<u8>, Vec<u8>)>,

    input: Vec<u8>,
    output: VecDeque<(Vec<u8>, bool)>,

    write_limit: Option<usize>,
    read_chunk: Option<usize>,

    remote: bool,
    local_lockout: bool,
    triggered: u32,
    cleared: u32,
    status: u8,
    messages: Vec<Vec<u8>>,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDevice {
    pub fn new() -> Self {
        Self {
            idn: DEFAULT_IDN.to_vec(),
            responses: Vec::new(),
            input: Vec::new(),
            output: VecDeque::new(),
            write_limit: None,
            read_chunk: None,
            remote: false,
            local_lockout: false,
            triggered: 0,
            cleared: 0,
            status: 0,
            messages: Vec::new(),
        }
    }

    pub fn new_arc() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn into_arc(self) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(self))
    }

    pub fn with_idn(mut self, idn: &[u8]) -> Self {
        self.idn = idn.to_vec();
        self
    }

    /// Respond to `query` with `response`
    pub fn with_response(mut self, query: &[u8], response: &[u8]) -> Self {
        self.responses.push((query.to_vec(), response.to_vec()));
        self
    }

    /// Accept at most `limit` bytes per write, `Some(0)` stalls all writes
    pub fn with_write_limit(mut self, limit: Option<usize>) -> Self {
        self.write_limit = limit;
        self
    }

    /// Return at most `chunk` bytes per read
    pub fn with_read_chunk(mut self, chunk: Option<usize>) -> Self {
        self.read_chunk = chunk;
        self
    }

    /// Queue response data, `end` marks the end of a message
    pub fn push_output(&mut self, data: &[u8], end: bool) {
        self.output.push_back((data.to_vec(), end));
    }

    pub fn set_status(&mut self, status: u8) {
        self.status = status;
    }

    pub fn is_remote(&self) -> bool {
        self.remote
    }

    pub fn local_lockout(&self) -> bool {
        self.local_lockout
    }

    pub fn trigger_count(&self) -> u32 {
        self.triggered
    }

    pub fn clear_count(&self) -> u32 {
        self.cleared
    }

    /// Complete messages received so far
    pub fn messages(&self) -> &[Vec<u8>] {
        &self.messages
    }

    fn execute(&mut self, msg: Vec<u8>) {
        log::debug!(">>> {:?}", msg);
        let query = trim_end(&msg);
        let response = if query.eq_ignore_ascii_case(b"*IDN?") {
            Some(self.idn.clone())
        } else if let Some((_, r)) = self
            .responses
            .iter()
            .find(|(q, _)| trim_end(q).eq_ignore_ascii_case(query))
        {
            Some(r.clone())
        } else if query.ends_with(b"?") {
            Some(msg.clone())
        } else {
            None
        };
        if let Some(r) = response {
            log::debug!("<<< {:?}", r);
            self.output.push_back((r, true));
        }
        self.messages.push(msg);
    }
}

fn trim_end(msg: &[u8]) -> &[u8] {
    let len = msg
        .iter()
        .rposition(|c| !c.is_ascii_whitespace())
        .map_or(0, |p| p + 1);
    &msg[..len]
}

impl Device for SimulatedDevice {
    fn write(&mut self, data: &[u8], end: bool) -> Result<usize, DeviceError> {
        let n = self.write_limit.map_or(data.len(), |l| l.min(data.len()));
        if n == 0 && !data.is_empty() {
            return Ok(0);
        }
        self.input.extend_from_slice(&data[..n]);
        if end && n == data.len() {
            let msg = core::mem::take(&mut self.input);
            self.execute(msg);
        }
        Ok(n)
    }

    fn read(&mut self, max_len: usize) -> Result<ReadData, DeviceError> {
        let max_len = self.read_chunk.map_or(max_len, |c| c.min(max_len));
        let Some((front, end)) = self.output.front_mut() else {
            return Ok(ReadData::pending());
        };
        let n = max_len.min(front.len());
        let data: Vec<u8> = front.drain(..n).collect();
        let end = *end && front.is_empty();
        if front.is_empty() {
            self.output.pop_front();
        }
        Ok(ReadData::new(data, end))
    }

    fn get_status(&mut self) -> Result<u8, DeviceError> {
        let mut stb = self.status & !STB_MAV;
        if !self.output.is_empty() {
            stb |= STB_MAV;
        }
        Ok(stb)
    }

    fn trigger(&mut self) -> Result<(), DeviceError> {
        log::debug!("TRIGGERED");
        self.triggered += 1;
        Ok(())
    }

    fn clear(&mut self) -> Result<(), DeviceError> {
        log::debug!("CLEAR");
        self.cleared += 1;
        self.input.clear();
        self.output.clear();
        Ok(())
    }

    fn set_remote(&mut self, remote: bool) -> Result<(), DeviceError> {
        log::debug!("REMOTE = {}", remote);
        self.remote = remote;
        Ok(())
    }

    fn set_local_lockout(&mut self, enable: bool) {
        self.local_lockout = enable;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idn_query() {
        let mut dev = SimulatedDevice::new();
        assert_eq!(dev.write(b"*IDN?\n", true), Ok(6));
        let r = dev.read(1024).unwrap();
        assert_eq!(r.data, DEFAULT_IDN);
        assert!(r.end);
        assert!(dev.read(1024).unwrap().is_pending());
    }

    #[test]
    fn partial_writes_and_reads() {
        let mut dev = SimulatedDevice::new()
            .with_write_limit(Some(2))
            .with_read_chunk(Some(3))
            .with_response(b"MEAS?", b"1.2345\n");
        assert_eq!(dev.write(b"MEAS?\n", true), Ok(2));
        assert_eq!(dev.write(b"AS?\n", true), Ok(2));
        assert!(dev.read(10).unwrap().is_pending());
        assert_eq!(dev.write(b"?\n", true), Ok(2));

        assert_eq!(dev.read(10).unwrap(), ReadData::new(b"1.2".to_vec(), false));
        assert_eq!(dev.read(10).unwrap(), ReadData::new(b"345".to_vec(), false));
        assert_eq!(dev.read(10).unwrap(), ReadData::new(b"\n".to_vec(), true));
        assert_eq!(dev.messages(), &[b"MEAS?\n".to_vec()]);
    }

    #[test]
    fn status_reports_mav() {
        let mut dev = SimulatedDevice::new();
        dev.set_status(0x50);
        assert_eq!(dev.get_status(), Ok(0x40));
        dev.push_output(b"x", true);
        assert_eq!(dev.get_status(), Ok(0x50));
    }
}
