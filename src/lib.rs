/*!
    Iolage is a crate implementing an IO-Link master, with an API as close as possible to the concepts of the IO-Link protocol (IEC 61131-9).

    An IO-Link master drives point-to-point links to sensors and actuators over a line driver chip. The chip owns the data-link layer (UART framing, parity, timing windows, the wake-up current pulse); this library owns everything above it: device detection, the startup parameter readout, the derivation of process data lengths and M-sequence framing, the switch to OPERATE, the cyclic process data exchange and the segmented ISDU parameter channel. Decoded process data is republished as timestamped JSON through a pluggable sink.

    Two ports share one chip and its SPI frame buffer, so the supervisor serializes per chip while ports on different chips exchange concurrently. The library is `async` on top of tokio for this reason: every protocol delay and every chip lock is a suspension point, the driver transactions themselves stay blocking.

    ## It mainly features

    - [Shield] for protocol-safe access to all four ports, the cyclic loop and the external control operations
    - [Port] for the per-port state machine and the raw protocol sequences
    - [PortDriver] as the seam to the line driver chip, so any MAX14819-class transceiver can be plugged in

    ## Complete feature list

    - [x] device handling
        + [x] detection and wake-up with baud rate sensing
        + [x] direct parameter page readout
        + [x] process data length derivation (table B.6)
        + [x] M-sequence type and OD length canonicalization (table A.10)
        + [x] direct STARTUP → OPERATE transition
    - [x] cyclic exchange
        + [x] process data in with OD segment
        + [x] process data out with PDOUT_VALID notification
    - [x] ISDU parameter channel
        + [x] 8 bit, 8 bit + subindex and 16 bit request forms
        + [x] CHKPDU checksumming
        + [x] flow-controlled request segmentation
        + [x] busy polling and segmented response reassembly
    - [x] process data decoding
        + [x] bit-level schemas with scaling
        + [x] embedded schemas for the supported device families
        + [x] raw passthrough for unknown devices
    - [ ] event channel (only PD valid/invalid is tracked)
    - [ ] device parameterization beyond reaching OPERATE
*/

pub mod error;
pub mod registers;
pub mod iodd;
pub mod isdu;
pub mod driver;
pub mod port;
pub mod master;

pub use crate::error::{IoLinkError, IoLinkResult};
pub use crate::registers::MSequenceType;
pub use crate::iodd::{PdElement, PdKind, PdValue, SchemaStore};
pub use crate::driver::{PortChannel, PortDriver};
pub use crate::port::{DeviceIdentity, Port, PortParameters, PortState};
pub use crate::master::{PdPublisher, Shield};
