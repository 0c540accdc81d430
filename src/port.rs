/*!
    Per-port state machine, from device detection to cyclic operation.

    A [Port] drives one physical IO-Link port through its line driver chip. [Port::begin]
    walks the startup sequence: wake-up pulse, direct parameter page readout, derivation of
    the process data lengths and the M-sequence framing, then the switch to OPERATE. Once
    operating, [Port::read_pd]/[Port::write_pd] run the cyclic exchange and
    [Port::read_isdu]/[Port::write_isdu] run the segmented on-request parameter protocol.

    A port is not protocol-safe against concurrent use: two ports of the same chip share its
    SPI frame buffer, so callers must serialize per chip. [crate::master::Shield] owns that
    serialization, a bare [Port] is only safe from a single task.
*/

use crate::{
    driver::{PortChannel, PortDriver},
    error::{IoLinkError, IoLinkResult},
    isdu,
    registers::{self, mc, page, MSequenceCapability, MSequenceType, PdDirection},
    };
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// byte capacity of the driver chip frame buffer, bounding `pd_in_len + od_len`
pub const DRIVER_BUFFER_CAPACITY: usize = 32;

/// answer size armed for the opening OD_READ of a response transfer
const OD_READ_ANSWER: usize = 32;

/// MAX14819 CQ error register, read back after each cyclic exchange
const ERROR_REGISTER: u8 = 0x08;

// BES inductive sensors understate their OD length, they answer with 2 OD bytes
const BES_SHORT_OD: u32 = 132099;
// BCM condition monitors lose the OPERATE command without a settle delay
const BCM_SLOW_STARTUP: u32 = 263955;
// BOS photoelectric sensors corrupt their first answers after PDOUT_VALID (parity errors)
const BOS_PARITY_FLUSH: u32 = 264968;

/// identification read from the direct parameter page during startup, selects the PD schema
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub device_id: u32,
    pub revision_id: u8,
}

/// lifecycle state of a port
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum PortState {
    #[default]
    Idle,
    WakingUp,
    ReadingParams,
    Operating,
    Faulted,
}

/// parameters discovered during startup, fixed until the next detection
#[derive(Clone, Debug, Default)]
pub struct PortParameters {
    pub identity: DeviceIdentity,
    /// framing of the cyclic traffic, canonicalized per table A.10
    pub m_sequence_type: MSequenceType,
    /// bytes of process data received per cycle
    pub pd_in_len: usize,
    /// bytes of process data sent per cycle
    pub pd_out_len: usize,
    /// bytes of the on-request data segment per M-sequence
    pub od_len: usize,
    /// baud rate negotiated during wake-up
    pub com_speed: u32,
    /// a device answered the last exchange
    pub connected: bool,
}

/// keep the first error observed; the exchange continues to completion to stay frame-aligned
fn accumulate(status: &mut IoLinkResult, outcome: IoLinkResult) {
    if status.is_ok() {
        *status = outcome;
    }
}

/// one physical IO-Link port behind a [PortDriver] chip
pub struct Port<D> {
    driver: Arc<D>,
    channel: PortChannel,
    number: u8,
    state: PortState,
    parameters: PortParameters,
    /// last cyclic answer as delivered by the driver, leading length octet included
    pd_in: Vec<u8>,
    /// outgoing process data, consumed by every cyclic write
    pd_out: Vec<u8>,
}

impl<D: PortDriver> Port<D> {
    pub fn new(driver: Arc<D>, channel: PortChannel, number: u8) -> Self {
        Self {
            driver,
            channel,
            number,
            state: PortState::default(),
            parameters: PortParameters::default(),
            pd_in: Vec::new(),
            pd_out: Vec::new(),
        }
    }

    /**
        initialize the port and connect to the attached device, if any

        Walks detection, wake-up, parameter readout and the switch to OPERATE. On success
        the port is [PortState::Operating] and ready for cyclic exchange. A missing device
        leaves the port [PortState::Idle] and disconnected; a protocol fault during
        parameter readout leaves it [PortState::Faulted].
    */
    pub async fn begin(&mut self) -> IoLinkResult {
        self.state = PortState::Idle;
        self.parameters = PortParameters::default();
        self.pd_in.clear();
        self.pd_out.clear();

        if let Err(error) = self.driver.begin(self.channel) {
            warn!(port = self.number, "driver initialization failed");
            return Err(error);
        }

        self.state = PortState::WakingUp;
        match self.driver.wake_up_request(self.channel) {
            Ok(com_speed) => {
                self.parameters.com_speed = com_speed;
                self.parameters.connected = true;
                info!(port = self.number, com_speed, "communication established");
            },
            Err(error) => {
                debug!(port = self.number, "no device answered the wake-up pulse");
                self.parameters.connected = false;
                self.state = PortState::Idle;
                return Err(error);
            },
        }

        self.state = PortState::ReadingParams;
        match self.startup().await {
            Ok(()) => {
                self.state = PortState::Operating;
                Ok(())
            },
            Err(error) => {
                warn!(port = self.number, error = %error, "startup aborted");
                self.parameters.connected = false;
                self.state = PortState::Faulted;
                Err(error)
            },
        }
    }

    /// parameter readout and transition to OPERATE, port already awake
    async fn startup(&mut self) -> IoLinkResult {
        // M-sequence capability (IO-Link spec B.1.4)
        let capability = MSequenceCapability::from(self.read_direct_parameter_page(page::M_SEQ_CAP).await?);
        let revision_id = self.read_direct_parameter_page(page::REVISION_ID).await?;
        let pd_in_raw = self.read_direct_parameter_page(page::PD_IN).await?;
        let pd_out_raw = self.read_direct_parameter_page(page::PD_OUT).await?;
        let pd_in_len = registers::pd_length(pd_in_raw, PdDirection::In)?;
        let pd_out_len = registers::pd_length(pd_out_raw, PdDirection::Out)?;
        let (od_len, m_sequence_type) = registers::od_length(
            pd_in_len, pd_out_len,
            capability.operate_code().value(),
            )?;

        let vendor_id = u16::from_be_bytes([
            self.read_direct_parameter_page(page::VENDOR_ID1).await?,
            self.read_direct_parameter_page(page::VENDOR_ID2).await?,
            ]);
        let device_id
            = u32::from(self.read_direct_parameter_page(page::DEVICE_ID1).await?) << 16
            | u32::from(self.read_direct_parameter_page(page::DEVICE_ID2).await?) << 8
            | u32::from(self.read_direct_parameter_page(page::DEVICE_ID3).await?);

        let od_len = if device_id == BES_SHORT_OD { 2 } else { od_len };

        if pd_in_len + od_len > DRIVER_BUFFER_CAPACITY {
            return Err(IoLinkError::Protocol("answer exceeds the driver frame buffer"));
        }

        self.parameters.identity = DeviceIdentity { vendor_id, device_id, revision_id };
        self.parameters.m_sequence_type = m_sequence_type;
        self.parameters.pd_in_len = pd_in_len;
        self.parameters.pd_out_len = pd_out_len;
        self.parameters.od_len = od_len;
        info!(
            port = self.number,
            vendor_id, device_id, revision_id,
            m_sequence_type = ?m_sequence_type,
            pd_in_len, pd_out_len, od_len,
            "device parameters",
            );

        if device_id == BCM_SLOW_STARTUP {
            sleep(Duration::from_millis(1000)).await;
        }

        // STARTUP straight to OPERATE, PREOPERATE is skipped
        if self.driver.write_data(mc::PAGE_WRITE, &[mc::DEV_OPERATE], 1, MSequenceType::Type0, self.channel).is_err() {
            warn!(port = self.number, "operate request failed");
        }

        if pd_out_len > 0 {
            self.pd_out = vec![0; pd_out_len];
            sleep(Duration::from_millis(200)).await;
            // flag the zero-initialized PD-out lanes valid, the MC rides on the first OD byte
            let mut frame = vec![0; pd_out_len + od_len];
            frame[pd_out_len] = mc::PDOUT_VALID;
            if self.driver.write_data(mc::PAGE_WRITE, &frame, 1, m_sequence_type, self.channel).is_err() {
                warn!(port = self.number, "PD-out valid notification failed");
            }
            if device_id == BOS_PARITY_FLUSH {
                // throwaway reads to flush the parity-corrupted first answers
                for _ in 0 .. 2 {
                    sleep(Duration::from_millis(10)).await;
                    let _ = self.read_isdu(0x0010, 0x00).await;
                }
            }
        }
        Ok(())
    }

    /// disconnect from the device and reset the chip-side port
    pub async fn end(&mut self) -> IoLinkResult {
        let mut status = Ok(());
        accumulate(&mut status, self.driver.write_data(mc::DEV_FALLBACK, &[], 1, MSequenceType::Type0, self.channel));
        accumulate(&mut status, self.driver.reset(self.channel));
        self.state = PortState::Idle;
        self.parameters = PortParameters::default();
        self.pd_in.clear();
        self.pd_out.clear();
        status
    }

    /**
        one cyclic process data exchange: request, settle, pull the answer

        The current PD-out buffer rides along with the request so the output lanes stay
        framed. The answer is kept in the port and readable through [Self::pd_in];
        connectivity tracks the outcome, a failed exchange schedules re-detection.
    */
    pub async fn read_pd(&mut self) -> IoLinkResult {
        if !self.parameters.connected {
            return Err(IoLinkError::Master("no device connected"));
        }
        let size_answer = self.parameters.pd_in_len + self.parameters.od_len;
        let mut status = Ok(());
        if self.parameters.pd_out_len > 0 {
            sleep(Duration::from_millis(10)).await;
            let mut outbound = self.pd_out.clone();
            outbound.resize(self.parameters.pd_out_len + self.parameters.od_len, 0);
            if outbound.len() < size_answer {
                outbound.resize(size_answer, 0);
            }
            accumulate(&mut status, self.driver.write_data(
                mc::PD_READ, &outbound, size_answer, self.parameters.m_sequence_type, self.channel));
        }
        else {
            accumulate(&mut status, self.driver.write_data(
                mc::PD_READ, &[], size_answer, self.parameters.m_sequence_type, self.channel));
        }
        sleep(Duration::from_millis(5)).await;
        match self.driver.read_pd(self.channel, size_answer, self.parameters.od_len) {
            Ok(answer) => self.pd_in = answer,
            Err(error) => accumulate(&mut status, Err(error)),
        }
        self.parameters.connected = status.is_ok();
        status
    }

    /**
        one cyclic process data write: the PD-out buffer plus an OD segment opening with PDOUT_VALID

        A port without PD-out returns without touching the bus.
    */
    pub async fn write_pd(&mut self) -> IoLinkResult {
        if !self.parameters.connected {
            return Err(IoLinkError::Master("no device connected"));
        }
        if self.parameters.pd_out_len == 0 {
            return Ok(());
        }
        let mut frame = self.pd_out.clone();
        frame.resize(self.parameters.pd_out_len, 0);
        frame.push(mc::PDOUT_VALID);
        frame.resize(self.parameters.pd_out_len + self.parameters.od_len, 0);
        sleep(Duration::from_millis(10)).await;
        // the device acknowledges with MC + CHKPDU
        self.driver.write_data(mc::PAGE_WRITE, &frame, 2, self.parameters.m_sequence_type, self.channel)
    }

    /**
        read a device parameter over the ISDU channel

        The request is segmented into OD-sized chunks under flow control, then the response
        is polled until the device leaves its busy state and reassembled from its segments.
        Returns the parameter payload with the service octet and checksum stripped.
    */
    pub async fn read_isdu(&mut self, index: u16, subindex: u8) -> IoLinkResult<Vec<u8>> {
        if !self.parameters.connected {
            return Err(IoLinkError::Master("no device connected"));
        }
        let od_len = self.parameters.od_len;
        if od_len == 0 {
            return Err(IoLinkError::Master("port has no on-request data channel"));
        }
        let m_sequence = self.parameters.m_sequence_type;
        debug!(port = self.number, index, subindex, "ISDU read");

        let frame = isdu::read_request(index, subindex, od_len);
        let mut status = Ok(());
        self.send_request(&frame, &mut status).await?;

        // poll until the device leaves the busy state
        let outbound = if self.parameters.pd_out_len > 0 { self.pd_out.clone() } else { Vec::new() };
        let mut answer = Vec::new();
        let mut polls = 0;
        loop {
            accumulate(&mut status, self.driver.write_data(
                mc::OD_READ, &outbound, OD_READ_ANSWER, m_sequence, self.channel));
            sleep(Duration::from_millis(5)).await;
            match self.driver.read_isdu(self.channel, od_len) {
                Ok(chunk) => answer = chunk,
                Err(error) => {
                    accumulate(&mut status, Err(error));
                    answer.clear();
                },
            }
            polls += 1;
            if polls >= 254 {
                return Err(IoLinkError::Timeout("ISDU busy poll exhausted"));
            }
            match answer.first() {
                Some(0) | Some(1) | None => continue,
                Some(_) => break,
            }
        }

        // low nibble of the service octet carries the total response length
        let total = (answer[0] & 0x0F) as usize;
        for segment in 0 .. (total / od_len) as u8 {
            accumulate(&mut status, self.driver.write_data(
                isdu::response_command(segment), &outbound, total, m_sequence, self.channel));
            sleep(Duration::from_millis(15)).await;
            match self.driver.read_isdu(self.channel, od_len) {
                Ok(chunk) => answer.extend_from_slice(&chunk),
                Err(error) => accumulate(&mut status, Err(error)),
            }
        }
        status?;

        if total < 2 || total > answer.len() {
            return Err(IoLinkError::Protocol("inconsistent ISDU response length"));
        }
        // strip the service octet and the trailing checksum
        Ok(answer[1 .. total - 1].to_vec())
    }

    /// write a device parameter over the ISDU channel
    pub async fn write_isdu(&mut self, index: u16, subindex: u8, data: &[u8]) -> IoLinkResult {
        if !self.parameters.connected {
            return Err(IoLinkError::Master("no device connected"));
        }
        let od_len = self.parameters.od_len;
        if od_len == 0 {
            return Err(IoLinkError::Master("port has no on-request data channel"));
        }
        debug!(port = self.number, index, subindex, length = data.len(), "ISDU write");

        let frame = isdu::write_request(index, subindex, data, od_len);
        let mut status = Ok(());
        self.send_request(&frame, &mut status).await?;
        status
    }

    /**
        push a padded request frame chunk by chunk under flow control

        Chunk `seq` goes out under [isdu::chunk_command]; the 4-bit sequence counter wraps
        at 15 and the transfer aborts after 3 full wraps. The PD-out lanes are held at zero
        for the duration of the exchange. Driver failures land in `status`, only the wrap
        timeout aborts the transfer.
    */
    async fn send_request(&mut self, frame: &[u8], status: &mut IoLinkResult) -> IoLinkResult {
        let od_len = self.parameters.od_len;
        let lane = vec![0; self.parameters.pd_out_len];
        let mut seq: u8 = 0;
        let mut wraps = 0;
        while (seq as usize) * od_len < frame.len() {
            let chunk = &frame[seq as usize * od_len ..][.. od_len];
            accumulate(status, self.driver.write_isdu(
                isdu::chunk_command(seq), self.parameters.m_sequence_type, self.channel, &lane, chunk));
            sleep(Duration::from_millis(5)).await;
            if seq == 15 {
                if wraps >= 3 {
                    return Err(IoLinkError::Timeout("ISDU flow control wrapped out"));
                }
                wraps += 1;
                seq = 0;
            }
            else {
                seq += 1;
            }
        }
        Ok(())
    }

    /// read one entry of the direct parameter page, addresses above 31 are rejected without bus traffic
    pub async fn read_direct_parameter_page(&mut self, address: u8) -> IoLinkResult<u8> {
        if address > page::MAX_ADDRESS {
            return Err(IoLinkError::Master("direct parameter page address out of range"));
        }
        let mut status = Ok(());
        accumulate(&mut status, self.driver.write_data(
            mc::PAGE_READ + address, &[], 1, MSequenceType::Type0, self.channel));
        sleep(Duration::from_millis(10)).await;
        let mut answer = [0];
        accumulate(&mut status, self.driver.read_data(self.channel, &mut answer));
        status.map(|_| answer[0])
    }

    /// re-run device detection when the port has no device; reports the resulting connectivity
    pub async fn ensure_connected(&mut self) -> bool {
        if !self.parameters.connected {
            let _ = self.begin().await;
        }
        self.parameters.connected
    }

    /// CQ error flags latched by the chip since the last readout
    pub fn read_error_register(&self) -> IoLinkResult<u8> {
        self.driver.read_register(ERROR_REGISTER)
    }

    /// baud rate negotiated during wake-up
    pub fn read_com_speed(&self) -> u32 {
        self.parameters.com_speed
    }

    pub fn state(&self) -> PortState {
        self.state
    }

    pub fn parameters(&self) -> &PortParameters {
        &self.parameters
    }

    /// true while the last exchange was answered
    pub fn connected(&self) -> bool {
        self.parameters.connected
    }

    /// true once startup discovered any exchange length, the presence gate for cyclic work
    pub fn device_present(&self) -> bool {
        self.parameters.od_len != 0
        || self.parameters.pd_in_len != 0
        || self.parameters.pd_out_len != 0
    }

    /// last cyclic answer, leading length octet included
    pub fn pd_in(&self) -> &[u8] {
        &self.pd_in
    }

    pub fn pd_out(&self) -> &[u8] {
        &self.pd_out
    }

    /// replace the outgoing process data, consumed by the next cyclic write
    pub fn set_pd_out(&mut self, data: Vec<u8>) {
        self.pd_out = data;
    }

    pub fn number(&self) -> u8 {
        self.number
    }
}
