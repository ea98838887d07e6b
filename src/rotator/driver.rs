use std::sync::Arc;

use log::{debug, info};

use super::{Position, PositionCache, RotatorError, RotatorLimits, RotatorSettings};
use crate::transport::{SerialTransport, Transport};

/// Azimuth/elevation controller speaking the GS-232 ASCII protocol.
pub struct Gs232Rotator {
    transport: Box<dyn Transport>,
    limits: RotatorLimits,
    cache: Arc<PositionCache>,
}

impl Gs232Rotator {
    pub fn open(settings: &RotatorSettings) -> Result<Self, RotatorError> {
        settings.limits.validate()?;
        let transport = SerialTransport::open(&settings.serial)?;
        info!(
            "rotator connected on {} at {} baud",
            settings.serial.port, settings.serial.baud
        );
        Ok(Self::with_transport(
            Box::new(transport),
            settings.limits,
            Arc::new(PositionCache::new(settings.cache_window)),
        ))
    }

    pub fn with_transport(
        transport: Box<dyn Transport>,
        limits: RotatorLimits,
        cache: Arc<PositionCache>,
    ) -> Self {
        Self {
            transport,
            limits,
            cache,
        }
    }

    pub fn cache(&self) -> Arc<PositionCache> {
        self.cache.clone()
    }

    /// `W<az> <el>` with both values clamped to the mechanical range.
    pub fn position_command(&self, azimuth_deg: f64, elevation_deg: f64) -> String {
        let (az, el) = self.limits.clamp(azimuth_deg, elevation_deg);
        format!("W{:03} {:03}\r", az, el)
    }

    pub fn set_position(&mut self, azimuth_deg: f64, elevation_deg: f64) -> Result<(), RotatorError> {
        let command = self.position_command(azimuth_deg, elevation_deg);
        debug!("rotator -> {}", command.trim_end());
        self.transport.write_all(command.as_bytes())?;
        Ok(())
    }

    pub fn park(&mut self, azimuth_deg: f64, elevation_deg: f64) -> Result<(), RotatorError> {
        info!("parking rotator at {:.0}/{:.0}", azimuth_deg, elevation_deg);
        self.set_position(azimuth_deg, elevation_deg)
    }

    pub fn stop(&mut self) -> Result<(), RotatorError> {
        self.transport.write_all(b"S\r")?;
        Ok(())
    }

    /// Current position, served from the cache unless `force` is set.
    pub fn position(&mut self, force: bool) -> Result<Option<Position>, RotatorError> {
        if !force {
            if let Some(cached) = self.cache.fresh() {
                return Ok(Some(cached));
            }
        }

        let reply = self.query(b"C2\r")?;
        let (mut az, mut el) = parse_position(&reply);
        if az.is_none() {
            az = parse_position(&self.query(b"C\r")?).0;
        }
        if el.is_none() {
            el = parse_position(&self.query(b"B\r")?).1;
        }

        match (az, el) {
            (Some(azimuth_deg), Some(elevation_deg)) => {
                let position = Position {
                    azimuth_deg,
                    elevation_deg,
                };
                self.cache.store(position);
                Ok(Some(position))
            }
            _ => {
                debug!("unparsable rotator position reply {:?}", reply);
                Ok(None)
            }
        }
    }

    fn query(&mut self, command: &[u8]) -> Result<String, RotatorError> {
        self.transport.clear_input()?;
        self.transport.write_all(command)?;
        let raw = self.transport.read_burst()?;
        Ok(String::from_utf8_lossy(&raw).trim().to_string())
    }
}

/// Picks `AZ=` and `EL=` fields out of a controller reply.
fn parse_position(reply: &str) -> (Option<f64>, Option<f64>) {
    let mut az = None;
    let mut el = None;
    for part in reply.split_whitespace() {
        if let Some(value) = part.strip_prefix("AZ=") {
            az = value.parse().ok();
        } else if let Some(value) = part.strip_prefix("EL=") {
            el = value.parse().ok();
        }
    }
    (az, el)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;
    use std::time::Duration;

    fn rotator(mock: &MockTransport, window: Duration) -> Gs232Rotator {
        Gs232Rotator::with_transport(
            mock.boxed(),
            RotatorLimits::default(),
            Arc::new(PositionCache::new(window)),
        )
    }

    #[test]
    fn test_position_command_is_clamped() {
        let mock = MockTransport::new();
        let mut rot = rotator(&mock, Duration::ZERO);
        rot.set_position(7.4, 30.6).unwrap();
        rot.set_position(512.0, -4.0).unwrap();
        assert_eq!(mock.writes(), vec![b"W007 031\r".to_vec(), b"W450 000\r".to_vec()]);
    }

    #[test]
    fn test_position_query_is_cached() {
        let mock = MockTransport::new();
        mock.push_reply(b"AZ=123 EL=045\r\n");
        let mut rot = rotator(&mock, Duration::from_secs(60));
        let expected = Position {
            azimuth_deg: 123.0,
            elevation_deg: 45.0,
        };
        assert_eq!(rot.position(false).unwrap(), Some(expected));
        assert_eq!(rot.position(false).unwrap(), Some(expected));
        assert_eq!(mock.writes(), vec![b"C2\r".to_vec()]);

        mock.push_reply(b"AZ=124 EL=046");
        assert_eq!(rot.position(true).unwrap().unwrap().azimuth_deg, 124.0);
        assert_eq!(mock.writes().len(), 2);
    }

    #[test]
    fn test_position_falls_back_to_single_queries() {
        let mock = MockTransport::new();
        mock.push_reply(b"?>");
        mock.push_reply(b"AZ=200");
        mock.push_reply(b"EL=010");
        let mut rot = rotator(&mock, Duration::ZERO);
        let pos = rot.position(false).unwrap().unwrap();
        assert_eq!(pos.azimuth_deg, 200.0);
        assert_eq!(pos.elevation_deg, 10.0);
        assert_eq!(
            mock.writes(),
            vec![b"C2\r".to_vec(), b"C\r".to_vec(), b"B\r".to_vec()]
        );
    }

    #[test]
    fn test_silent_rotator_has_no_position() {
        let mock = MockTransport::new();
        let mut rot = rotator(&mock, Duration::ZERO);
        assert_eq!(rot.position(true).unwrap(), None);
        rot.stop().unwrap();
        assert_eq!(mock.writes().last().unwrap(), &b"S\r".to_vec());
    }
}
