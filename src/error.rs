//! definition of the general IO-Link error type

use core::fmt;
use std::sync::Arc;

/**
    general object reporting an unexpected result regarding IO-Link communication

    Its variants are meant to help finding the cause responsible for the problem and how to deal with it.

    [Self::Device] variant should not be used without an appropriate type for `T`, `T` depends on the operation the device reports for, and is usually an error code or an enum.
*/
#[derive(Clone, Debug)]
pub enum IoLinkError<T = ()> {
    /// error caused by communication support (SPI/GPIO access to the line driver)
    ///
    /// these errors are exterior to this library
    Io(Arc<std::io::Error>),

    /// error reported by a device, its type depends on the operation returning this error
    ///
    /// these errors can generally be handled and fixed by retrying the operation or reconfiguring the device
    Device(T),

    /// error reported by the master
    ///
    /// these errors can generally be handled and fixed by retrying the operation or using the master differently when the issue is in the user code
    Master(&'static str),

    /// error detected by the master in the IO-Link communication
    ///
    /// these errors can generally not be fixed and the port has to be restarted from device detection
    Protocol(&'static str),

    /// error is due to too much time elapsed, but does not compromise the communication
    ///
    /// these errors are generally contextual and the operation can be retried
    Timeout(&'static str),
}

/// convenient alias to simplify return annotations
pub type IoLinkResult<T = (), E = ()> = core::result::Result<T, IoLinkError<E>>;

impl<T: fmt::Debug> fmt::Display for IoLinkError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (src, msg): (&'static str, String) = match self {
            Self::Io(value) => ("Io", value.to_string()),
            Self::Device(value) => ("Device", format!("{:?}", value)),
            Self::Master(value) => ("Master", value.to_string()),
            Self::Protocol(value) => ("Protocol", value.to_string()),
            Self::Timeout(value) => ("Timeout", value.to_string()),
        };
        write!(f, "IoLinkError {{source: {}, message: {}}}", src, msg)
    }
}

impl<T: fmt::Debug> std::error::Error for IoLinkError<T> {}

impl<T> From<std::io::Error> for IoLinkError<T> {
    fn from(src: std::io::Error) -> Self {
        IoLinkError::Io(Arc::new(src))
    }
}

// because rust doesn't allow specialization and already implements `From<T> for T`, we cannot write smart conversions for generic IoLinkError<T>, so these are manual conversion methods
impl<E> IoLinkError<E> {
    /// convert the error if the device specific error type allows it
    pub fn into<F>(self) -> IoLinkError<F>
    where F: From<E> {
        self.map(|e| F::from(e))
    }
    /// convert the error with a callback handling the case of device-specific error
    pub fn map<F, T>(self, callback: F) -> IoLinkError<T>
    where F: Fn(E) -> T
    {
        match self {
            IoLinkError::Device(value) => IoLinkError::Device(callback(value)),
            IoLinkError::Io(e) => IoLinkError::Io(e),
            IoLinkError::Master(message) => IoLinkError::Master(message),
            IoLinkError::Protocol(message) => IoLinkError::Protocol(message),
            IoLinkError::Timeout(message) => IoLinkError::Timeout(message),
        }
    }
}
impl IoLinkError<()> {
    /// convert an error with no device-specific type into an error with one
    pub fn upgrade<F>(self) -> IoLinkError<F> {
        self.map(|_| unimplemented!("an IO-Link error with no device-specific error type cannot report a device error"))
    }
}
