use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use serialport::{ClearBuffer, SerialPort};

use super::{SerialSettings, Transport, TransportError};

const READ_CHUNK: usize = 64;
/// A CI-V reply is a few dozen bytes; anything past this is bus chatter.
const MAX_BURST_BYTES: usize = 512;
/// Upper bound on one burst, in multiples of the read timeout.
const BURST_DEADLINE_FACTOR: u32 = 3;

pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    read_timeout: Duration,
    write_timeout: Duration,
    inter_byte_timeout: Duration,
}

impl SerialTransport {
    pub fn open(settings: &SerialSettings) -> Result<Self, TransportError> {
        let mut port = serialport::new(&settings.port, settings.baud)
            .timeout(settings.read_timeout)
            .open()
            .map_err(|e| TransportError::Open {
                port: settings.port.clone(),
                message: e.to_string(),
            })?;

        // Many CAT interfaces key the transmitter or reset the radio on DTR/RTS.
        port.write_data_terminal_ready(false)?;
        port.write_request_to_send(false)?;

        log::info!("Opened {} at {} baud", settings.port, settings.baud);

        Ok(Self {
            port,
            read_timeout: settings.read_timeout,
            write_timeout: settings.write_timeout,
            inter_byte_timeout: settings.inter_byte_timeout,
        })
    }

    fn read_chunk(&mut self, timeout: Duration, out: &mut Vec<u8>) -> Result<usize, TransportError> {
        self.port.set_timeout(timeout)?;
        let mut buf = [0u8; READ_CHUNK];
        match self.port.read(&mut buf) {
            Ok(n) => {
                out.extend_from_slice(&buf[..n]);
                Ok(n)
            }
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.port.set_timeout(self.write_timeout)?;
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    fn read_burst(&mut self) -> Result<Vec<u8>, TransportError> {
        let (first, gap) = (self.read_timeout, self.inter_byte_timeout);
        collect_burst(first, gap, |timeout, out| self.read_chunk(timeout, out))
    }

    fn clear_input(&mut self) -> Result<(), TransportError> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }
}

/// Reads until the line goes quiet for `gap`, the byte cap is reached, or
/// `BURST_DEADLINE_FACTOR * first` has passed. Whatever arrived is returned.
fn collect_burst<F>(first: Duration, gap: Duration, mut read: F) -> Result<Vec<u8>, TransportError>
where
    F: FnMut(Duration, &mut Vec<u8>) -> Result<usize, TransportError>,
{
    let deadline = Instant::now() + first * BURST_DEADLINE_FACTOR;
    let mut out = Vec::new();
    if read(first, &mut out)? == 0 {
        return Ok(out);
    }
    while out.len() < MAX_BURST_BYTES {
        let now = Instant::now();
        if now >= deadline {
            log::debug!("serial burst cut off after {} bytes", out.len());
            break;
        }
        if read(gap.min(deadline - now), &mut out)? == 0 {
            break;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_burst_ends_on_quiet_line() {
        let mut replies = vec![vec![0xFE, 0xFE, 0x00, 0xA2, 0xFB, 0xFD], vec![]].into_iter();
        let out = collect_burst(Duration::from_millis(50), Duration::from_millis(5), |_, out| {
            let chunk = replies.next().unwrap_or_default();
            out.extend_from_slice(&chunk);
            Ok(chunk.len())
        })
        .unwrap();
        assert_eq!(out, vec![0xFE, 0xFE, 0x00, 0xA2, 0xFB, 0xFD]);
    }

    #[test]
    fn test_chatty_bus_hits_byte_cap() {
        let out = collect_burst(Duration::from_secs(10), Duration::from_millis(5), |_, out| {
            out.extend_from_slice(&[0xFE; 8]);
            Ok(8)
        })
        .unwrap();
        assert_eq!(out.len(), MAX_BURST_BYTES);
    }

    #[test]
    fn test_slow_trickle_hits_deadline() {
        let started = Instant::now();
        let out = collect_burst(Duration::from_millis(20), Duration::from_millis(50), |_, out| {
            thread::sleep(Duration::from_millis(2));
            out.push(0xFE);
            Ok(1)
        })
        .unwrap();
        assert!(out.len() < MAX_BURST_BYTES);
        assert!(started.elapsed() < Duration::from_millis(500));
    }
}
