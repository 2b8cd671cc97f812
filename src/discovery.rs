//! Locates a responsive Firmata device by probing candidate serial ports
//! across candidate baud rates.

use std::time::Duration;

use log::{debug, warn};

use crate::errors::Error;
use crate::io::{Serial, Transport};
use crate::session::Session;

/// Baud rates tried first; most boards ship at one of these.
pub const PRIMARY_BAUD_RATES: [u32; 3] = [57_600, 115_200, 9_600];

/// Baud rates tried after the primary list is exhausted.
pub const SECONDARY_BAUD_RATES: [u32; 6] = [28_800, 14_400, 38_400, 31_250, 4_800, 2_400];

/// Reply-wait timeout applied to each probe attempt.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Builds the transport for one (device, baud rate) attempt.
pub type TransportFactory = Box<dyn Fn(&str, u32) -> Box<dyn Transport>>;

/// Decides whether an opened session talks to a usable device.
pub type AvailabilityProbe = Box<dyn Fn(&mut Session) -> Result<bool, Error>>;

/// Enumerates the serial devices worth probing.
///
/// On POSIX systems the list prefers `/dev/ttyS*`, `/dev/ttyUSB*` and
/// `/dev/ttyACM*` when any such port exists, and otherwise falls back to any
/// `tty` device except the console devices.
pub fn available_devices() -> Vec<String> {
    let ports = serialport::available_ports().unwrap_or_else(|_| vec![]);
    let names = ports.into_iter().map(|port| port.port_name).collect();
    match cfg!(unix) {
        true => filter_tty_names(names),
        false => names,
    }
}

fn filter_tty_names(names: Vec<String>) -> Vec<String> {
    const PREFERRED_PREFIXES: [&str; 3] = ["/dev/ttyS", "/dev/ttyUSB", "/dev/ttyACM"];
    let preferred: Vec<String> = names
        .iter()
        .filter(|name| {
            PREFERRED_PREFIXES
                .iter()
                .any(|prefix| name.starts_with(prefix))
        })
        .cloned()
        .collect();
    if !preferred.is_empty() {
        return preferred;
    }
    names
        .into_iter()
        .filter(|name| {
            name.starts_with("/dev/tty") && name != "/dev/tty" && !name.starts_with("/dev/ttyC")
        })
        .collect()
}

/// Probes (device, baud rate) pairs until one answers like a Firmata device.
///
/// For every device, each baud rate is tried in order: a session is stood up
/// with the per-attempt timeout and the availability probe runs against it.
/// A timeout moves on to the next baud rate, an access-denied error abandons
/// the device entirely (another process most likely holds it), anything else
/// is logged and skipped. The first accepted session is returned with its
/// transport, ownership passing to the caller.
pub struct Finder {
    devices: Vec<String>,
    baud_rates: Vec<u32>,
    timeout: Duration,
    startup_delay: Duration,
    factory: TransportFactory,
    probe: AvailabilityProbe,
}

impl Default for Finder {
    fn default() -> Self {
        Self::new()
    }
}

impl Finder {
    /// A finder over the enumerated serial devices with the default baud
    /// preference lists and probe.
    pub fn new() -> Self {
        // Iterate the enumeration in reverse: boards tend to sit on the
        // most recently registered port.
        let mut devices = available_devices();
        devices.reverse();
        Self {
            devices,
            baud_rates: PRIMARY_BAUD_RATES
                .iter()
                .chain(SECONDARY_BAUD_RATES.iter())
                .copied()
                .collect(),
            timeout: DEFAULT_PROBE_TIMEOUT,
            startup_delay: Duration::ZERO,
            factory: Box::new(|device, baud_rate| {
                Box::new(Serial::with_baud_rate(device, baud_rate))
            }),
            probe: Box::new(default_probe),
        }
    }

    /// Replaces the candidate device list.
    pub fn with_devices<I, S>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.devices = devices.into_iter().map(Into::into).collect();
        self
    }

    /// Replaces the candidate baud rate list.
    pub fn with_baud_rates<I: IntoIterator<Item = u32>>(mut self, baud_rates: I) -> Self {
        self.baud_rates = baud_rates.into_iter().collect();
        self
    }

    /// Sets the per-attempt reply timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sleeps this long after opening a transport, giving boards that
    /// auto-reset on open time to come back up.
    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    /// Replaces the transport factory (serial by default).
    pub fn with_transport_factory(mut self, factory: TransportFactory) -> Self {
        self.factory = factory;
        self
    }

    /// Replaces the availability probe (firmware query by default).
    pub fn with_probe(mut self, probe: AvailabilityProbe) -> Self {
        self.probe = probe;
        self
    }

    /// Runs the probe loop; returns the first responsive session, or `None`
    /// once every candidate has been tried.
    pub fn find(&self) -> Option<Session> {
        for device in &self.devices {
            'bauds: for &baud_rate in &self.baud_rates {
                debug!("probing {} at {} baud", device, baud_rate);
                let transport = (self.factory)(device, baud_rate);
                let mut session = Session::from_transport(transport, Some(self.timeout));
                match session.open() {
                    Ok(()) => {}
                    Err(Error::Unauthorized { info }) => {
                        warn!("skipping {}: {}", device, info);
                        break 'bauds;
                    }
                    Err(e) => {
                        debug!("cannot open {} at {} baud: {}", device, baud_rate, e);
                        continue;
                    }
                }
                if !self.startup_delay.is_zero() {
                    std::thread::sleep(self.startup_delay);
                }
                match (self.probe)(&mut session) {
                    Ok(true) => {
                        debug!("found a device on {} at {} baud", device, baud_rate);
                        return Some(session);
                    }
                    Ok(false) => {
                        debug!("{} at {} baud answered but is not usable", device, baud_rate)
                    }
                    Err(Error::Timeout) => {
                        debug!("{} at {} baud did not answer", device, baud_rate)
                    }
                    Err(Error::Unauthorized { info }) => {
                        warn!("skipping {}: {}", device, info);
                        break 'bauds;
                    }
                    Err(e) => warn!("probing {} at {} baud failed: {}", device, baud_rate, e),
                }
                // The session drops here, disposing the transport it opened.
            }
        }
        None
    }
}

/// The default availability probe: the device must answer a firmware query
/// with major version 2 or later.
fn default_probe(session: &mut Session) -> Result<bool, Error> {
    Ok(session.get_firmware()?.major >= 2)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::mocks::{MockOpenFailure, MockTransport};

    const FIRMWARE_REPLY: [u8; 11] = [
        0xF0, 0x79, 0x02, 0x05, 0x53, 0x00, 0x74, 0x00, 0x64, 0x00, 0xF7,
    ];

    /// Factory recording every transport it builds, so tests can inspect
    /// attempts after the finder ran.
    fn recording_factory(
        configure: impl Fn(&str, u32, &MockTransport) + 'static,
    ) -> (TransportFactory, Arc<Mutex<Vec<(String, u32, MockTransport)>>>) {
        let created: Arc<Mutex<Vec<(String, u32, MockTransport)>>> = Arc::default();
        let log = created.clone();
        let factory: TransportFactory = Box::new(move |device, baud_rate| {
            let transport = MockTransport::named(device, baud_rate);
            configure(device, baud_rate, &transport);
            log.lock()
                .push((device.to_string(), baud_rate, transport.clone()));
            Box::new(transport)
        });
        (factory, created)
    }

    #[test]
    fn test_find_probes_bauds_and_returns_responsive_device() {
        // A never answers; B answers the firmware query at 9600 only.
        let (factory, created) = recording_factory(|device, baud_rate, transport| {
            if device == "B" && baud_rate == 9_600 {
                transport.enqueue_reply(&FIRMWARE_REPLY);
            }
        });
        let finder = Finder::new()
            .with_devices(["A", "B"])
            .with_baud_rates([57_600, 9_600])
            .with_timeout(Duration::from_millis(50))
            .with_transport_factory(factory);

        let session = finder.find();
        assert!(session.is_some(), "B@9600 should have been found");
        let session = session.unwrap();
        assert_eq!(session.transport().port_name(), "B");
        assert_eq!(session.transport().baud_rate(), 9_600);

        // A was probed at both bauds, B at both; every failed attempt left
        // its transport disposed.
        let created = created.lock();
        assert_eq!(created.len(), 4);
        for (device, baud_rate, transport) in created.iter() {
            let winner = device == "B" && *baud_rate == 9_600;
            assert_eq!(
                transport.is_open(),
                winner,
                "{}@{} open state",
                device,
                baud_rate
            );
        }
    }

    #[test]
    fn test_find_aborts_unauthorized_device() {
        let (factory, created) = recording_factory(|device, baud_rate, transport| {
            match device {
                // A is held by another process.
                "A" => transport.refuse_open(MockOpenFailure::Unauthorized),
                _ => {
                    if baud_rate == 57_600 {
                        transport.enqueue_reply(&FIRMWARE_REPLY);
                    }
                }
            }
        });
        let finder = Finder::new()
            .with_devices(["A", "B"])
            .with_baud_rates([57_600, 9_600])
            .with_timeout(Duration::from_millis(50))
            .with_transport_factory(factory);

        let session = finder.find();
        assert!(session.is_some());
        assert_eq!(session.unwrap().transport().port_name(), "B");

        // A was abandoned after a single attempt instead of burning through
        // every baud rate.
        let attempts_on_a = created
            .lock()
            .iter()
            .filter(|(device, _, _)| device == "A")
            .count();
        assert_eq!(attempts_on_a, 1);
    }

    #[test]
    fn test_find_rejects_old_firmware() {
        let (factory, _created) = recording_factory(|_, _, transport| {
            // Major version 1 fails the default predicate.
            transport.enqueue_reply(&[0xF0, 0x79, 0x01, 0x00, 0xF7]);
        });
        let finder = Finder::new()
            .with_devices(["A"])
            .with_baud_rates([57_600])
            .with_timeout(Duration::from_millis(50))
            .with_transport_factory(factory);

        assert!(finder.find().is_none());
    }

    #[test]
    fn test_find_with_custom_probe() {
        let (factory, _created) = recording_factory(|_, _, _| {});
        let finder = Finder::new()
            .with_devices(["X"])
            .with_baud_rates([9_600])
            .with_timeout(Duration::from_millis(50))
            .with_transport_factory(factory)
            .with_probe(Box::new(|_| Ok(true)));

        let session = finder.find();
        assert!(session.is_some());
        assert_eq!(session.unwrap().transport().port_name(), "X");
    }

    #[test]
    fn test_find_returns_none_when_nothing_answers() {
        let (factory, created) = recording_factory(|_, _, _| {});
        let finder = Finder::new()
            .with_devices(["A", "B"])
            .with_baud_rates([57_600, 9_600])
            .with_timeout(Duration::from_millis(20))
            .with_transport_factory(factory);

        assert!(finder.find().is_none());
        assert_eq!(created.lock().len(), 4);
    }

    #[test]
    fn test_filter_prefers_usb_style_ports() {
        let names = vec![
            String::from("/dev/ttyS0"),
            String::from("/dev/ttyUSB0"),
            String::from("/dev/ttyACM1"),
            String::from("/dev/ttyXR2"),
            String::from("/dev/tty"),
        ];
        assert_eq!(
            filter_tty_names(names),
            vec![
                String::from("/dev/ttyS0"),
                String::from("/dev/ttyUSB0"),
                String::from("/dev/ttyACM1"),
            ]
        );
    }

    #[test]
    fn test_filter_falls_back_to_any_tty() {
        let names = vec![
            String::from("/dev/ttyXR0"),
            String::from("/dev/ttyC0"),
            String::from("/dev/tty"),
            String::from("/dev/null"),
        ];
        assert_eq!(filter_tty_names(names), vec![String::from("/dev/ttyXR0")]);
    }

    #[test]
    fn test_baud_rate_preference_order() {
        let finder = Finder::new();
        assert_eq!(
            &finder.baud_rates[..3],
            &[57_600, 115_200, 9_600],
            "primary rates come first"
        );
        assert_eq!(
            &finder.baud_rates[3..],
            &[28_800, 14_400, 38_400, 31_250, 4_800, 2_400]
        );
    }
}
