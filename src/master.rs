/*!
    Supervisor owning the shield: two driver chips, four ports, one cyclic loop.

    [Shield] serializes access per chip: ports 0 and 1 live under the first chip's mutex,
    ports 2 and 3 under the second, so two ports of the same chip never touch its SPI frame
    buffer concurrently while ports of different chips may. The PD-out buffers live inside
    the port state and therefore inside the chip mutex, a writer and the cyclic loop can
    never tear them.

    The cyclic loop reads, settles and writes every port, decodes the sample against the
    schema bound at startup and hands the timestamped JSON payload to a [PdPublisher].
    The publisher seam is where the MQTT glue plugs in; the HTTP control surface calls the
    public operations ([Shield::write_pd_out], [Shield::isdu_read], [Shield::isdu_write],
    [Shield::set_cycle_time], [Shield::check_devices], ...) from its own tasks.
*/

use crate::{
    driver::{PortChannel, PortDriver},
    error::{IoLinkError, IoLinkResult},
    iodd::SchemaStore,
    port::Port,
    };
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, warn};

/// number of ports on the extended shield
pub const PORT_COUNT: usize = 4;

/// cycle time applied until the control surface sets one, in milliseconds
const DEFAULT_CYCLE_TIME: u64 = 100;

/// sink for decoded process data samples, implemented by the MQTT glue
pub trait PdPublisher: Send + Sync {
    fn publish(&self, topic: &str, payload: &str);
}

/// one driver chip and the two ports it terminates, serialized by one mutex
struct Chip<D> {
    ports: Mutex<[Port<D>; 2]>,
}

/// the IO-Link master shield: two MAX14819-class chips driving four ports
pub struct Shield<D> {
    chips: [Chip<D>; 2],
    cycle_time: AtomicU64,
    schemas: SchemaStore,
    broker: Mutex<String>,
}

impl<D: PortDriver> Shield<D> {
    /// shield with the embedded device schemas
    pub fn new(driver01: Arc<D>, driver23: Arc<D>) -> Self {
        Self::with_schemas(driver01, driver23, SchemaStore::builtin())
    }

    pub fn with_schemas(driver01: Arc<D>, driver23: Arc<D>, schemas: SchemaStore) -> Self {
        Self {
            chips: [
                Chip { ports: Mutex::new([
                    Port::new(driver01.clone(), PortChannel::A, 0),
                    Port::new(driver01, PortChannel::B, 1),
                    ]) },
                Chip { ports: Mutex::new([
                    Port::new(driver23.clone(), PortChannel::A, 2),
                    Port::new(driver23, PortChannel::B, 3),
                    ]) },
                ],
            cycle_time: AtomicU64::new(DEFAULT_CYCLE_TIME),
            schemas,
            broker: Mutex::new(String::from("localhost")),
        }
    }

    /// chip and local slot of a global port number; {0,1} share the first chip, {2,3} the second
    fn locate(&self, port: usize) -> IoLinkResult<(&Chip<D>, usize)> {
        if port >= PORT_COUNT {
            return Err(IoLinkError::Master("port number out of range"));
        }
        Ok((&self.chips[port / 2], port % 2))
    }

    /// start IO-Link communication on every port, detecting the attached devices
    pub async fn begin_all(&self) {
        for port in 0 .. PORT_COUNT {
            if let Ok((chip, slot)) = self.locate(port) {
                let mut ports = chip.ports.lock().await;
                if ports[slot].begin().await.is_err() {
                    debug!(port, "no device detected");
                }
            }
        }
    }

    /// stop IO-Link communication and release the chip-side ports
    pub async fn shutdown(&self) {
        for port in 0 .. PORT_COUNT {
            if let Ok((chip, slot)) = self.locate(port) {
                let mut ports = chip.ports.lock().await;
                let _ = ports[slot].end().await;
            }
        }
    }

    /// replace the outgoing process data of a port, consumed by the next cyclic write
    pub async fn write_pd_out(&self, port: usize, data: Vec<u8>) -> IoLinkResult {
        let (chip, slot) = self.locate(port)?;
        let mut ports = chip.ports.lock().await;
        ports[slot].set_pd_out(data);
        Ok(())
    }

    /// read a device parameter, see [Port::read_isdu]
    pub async fn isdu_read(&self, port: usize, index: u16, subindex: u8) -> IoLinkResult<Vec<u8>> {
        let (chip, slot) = self.locate(port)?;
        let mut ports = chip.ports.lock().await;
        if !ports[slot].device_present() {
            warn!(port, "no device connected");
            return Err(IoLinkError::Master("no device connected"));
        }
        ports[slot].read_isdu(index, subindex).await
    }

    /// write a device parameter, see [Port::write_isdu]
    pub async fn isdu_write(&self, port: usize, index: u16, subindex: u8, data: &[u8]) -> IoLinkResult {
        let (chip, slot) = self.locate(port)?;
        let mut ports = chip.ports.lock().await;
        if !ports[slot].device_present() {
            warn!(port, "no device connected");
            return Err(IoLinkError::Master("no device connected"));
        }
        ports[slot].write_isdu(index, subindex, data).await
    }

    /// set the period of the cyclic loop, in milliseconds
    pub fn set_cycle_time(&self, milliseconds: u64) {
        self.cycle_time.store(milliseconds, Ordering::Relaxed);
    }

    pub fn cycle_time(&self) -> u64 {
        self.cycle_time.load(Ordering::Relaxed)
    }

    /// reconfigure the address the publishing glue connects to
    pub async fn set_broker_ip(&self, address: String) {
        *self.broker.lock().await = address;
    }

    pub async fn broker_ip(&self) -> String {
        self.broker.lock().await.clone()
    }

    /// per-port connectivity, re-running detection on ports without a device; `true` means connected
    pub async fn check_devices(&self) -> [bool; PORT_COUNT] {
        let mut connection = [false; PORT_COUNT];
        for (port, state) in connection.iter_mut().enumerate() {
            if let Ok((chip, slot)) = self.locate(port) {
                let mut ports = chip.ports.lock().await;
                *state = ports[slot].ensure_connected().await;
            }
        }
        connection
    }

    /// one cyclic read on a port, keeping the sample in the port state
    pub async fn read_port(&self, port: usize) -> IoLinkResult {
        let (chip, slot) = self.locate(port)?;
        let mut ports = chip.ports.lock().await;
        if !ports[slot].connected() {
            return Err(IoLinkError::Master("no device connected"));
        }
        let status = ports[slot].read_pd().await;
        if let Ok(flags) = ports[slot].read_error_register() {
            if flags != 0 {
                debug!(port, flags, "CQ error flags latched");
            }
        }
        status
    }

    /// one cyclic write on a port; ports without PD-out return without bus traffic
    pub async fn write_port(&self, port: usize) -> IoLinkResult {
        let (chip, slot) = self.locate(port)?;
        let mut ports = chip.ports.lock().await;
        if !ports[slot].connected() {
            return Err(IoLinkError::Master("no device connected"));
        }
        ports[slot].write_pd().await
    }

    /// one pass over all ports: read, settle, write, then publish the decoded samples
    pub async fn cycle_once(&self, publisher: &impl PdPublisher) {
        let stamp = local_timestamp();
        for port in 0 .. PORT_COUNT {
            let _ = self.read_port(port).await;
            sleep(Duration::from_millis(1)).await;
            let _ = self.write_port(port).await;
            self.publish_port(port, &stamp, publisher).await;
        }
    }

    async fn publish_port(&self, port: usize, stamp: &str, publisher: &impl PdPublisher) {
        let Ok((chip, slot)) = self.locate(port) else { return };
        let (identity, raw) = {
            let ports = chip.ports.lock().await;
            if !ports[slot].device_present() {
                return;
            }
            (ports[slot].parameters().identity, ports[slot].pd_in().to_vec())
        };
        if raw.is_empty() {
            return;
        }
        // the first octet of the driver answer is the sample length, the decoder sees the record only
        let (mut values, _units) = self.schemas.interpret(&identity, &raw[1 ..]);
        values.insert("ts".into(), serde_json::json!(stamp));
        let topic = format!("Shield/Port{}/pd", port);
        let payload = serde_json::Value::Object(values).to_string();
        debug!(%topic, %payload, "publishing process data");
        publisher.publish(&topic, &payload);
    }

    /**
        cyclic process data loop

        Exchanges and publishes on every port, then sleeps out the remainder of the cycle
        time. The chip mutexes are taken per port operation and never held across the sleep.
    */
    pub async fn run_pd_loop(&self, publisher: &impl PdPublisher) {
        loop {
            let begin = Instant::now();
            self.cycle_once(publisher).await;
            let elapsed = begin.elapsed().as_millis() as u64;
            let cycle = self.cycle_time();
            if cycle > elapsed {
                sleep(Duration::from_millis(cycle - elapsed)).await;
            }
        }
    }
}

/// local wall-clock timestamp in the `YYYY-MM-DDTHH:MM:SS:mmm` form attached to published samples
pub fn local_timestamp() -> String {
    let now = chrono::Local::now();
    format!("{}:{:03}", now.format("%Y-%m-%dT%H:%M:%S"), now.timestamp_subsec_millis())
}

/// parse the hex payload of the control surface; odd-length strings get a leading zero
pub fn parse_hex_payload(text: &str) -> IoLinkResult<Vec<u8>> {
    let padded = if text.len() % 2 != 0 { format!("0{}", text) } else { text.to_owned() };
    padded.as_bytes()
        .chunks(2)
        .map(|pair| {
            core::str::from_utf8(pair).ok()
                .and_then(|digits| u8::from_str_radix(digits, 16).ok())
                .ok_or(IoLinkError::Master("invalid hex digit in payload"))
        })
        .collect()
}

/// format an ISDU payload the way the control surface reports it, space-separated hex octets
pub fn format_hex_payload(data: &[u8]) -> String {
    data.iter()
        .map(|byte| format!("{:x}", byte))
        .collect::<Vec<_>>()
        .join(" ")
}
