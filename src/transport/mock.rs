use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::{Transport, TransportError};

#[derive(Default)]
struct Script {
    replies: VecDeque<Vec<u8>>,
    writes: Vec<Vec<u8>>,
}

/// In-memory transport: each write consumes the next scripted reply.
#[derive(Clone, Default)]
pub struct MockTransport {
    script: Arc<Mutex<Script>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_reply(&self, reply: &[u8]) {
        self.script.lock().unwrap().replies.push_back(reply.to_vec());
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.script.lock().unwrap().writes.clone()
    }

    pub fn boxed(&self) -> Box<dyn Transport> {
        Box::new(self.clone())
    }
}

impl Transport for MockTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.script.lock().unwrap().writes.push(bytes.to_vec());
        Ok(())
    }

    fn read_burst(&mut self) -> Result<Vec<u8>, TransportError> {
        Ok(self
            .script
            .lock()
            .unwrap()
            .replies
            .pop_front()
            .unwrap_or_default())
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}
