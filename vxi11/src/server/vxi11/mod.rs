//! VXI-11 core and abort channel servers.
//!
//! ```no_run
//! use async_std::net::Ipv4Addr;
//! use futures::try_join;
//! use lxi_device::{status::Sender, util::SimulatedDevice};
//! use lxi_vxi11::server::vxi11::prelude::*;
//!
//! # async_std::task::block_on(async {
//! let (core, abort) = VxiServerBuilder::new()
//!     .device("inst0".parse().unwrap(), SimulatedDevice::new_arc(), Sender::new())
//!     .build();
//! let addr = Ipv4Addr::UNSPECIFIED.into();
//! try_join!(core.bind(addr), abort.bind(addr)).unwrap();
//! # })
//! ```

use std::{collections::HashMap, sync::Arc, time::Duration};

use futures::lock::Mutex;
use lxi_device::{
    lock::{DeviceLock, LockError},
    status::Sender as StatusSender,
    DeviceError,
};

use crate::common::vxi11::xdr::DeviceErrorCode;

pub mod abort_service;
pub mod address;
pub mod core_service;
pub mod gpib;
pub(crate) mod intr_client;
pub(crate) mod link;

pub mod prelude {
    pub use super::{
        abort_service::VxiAsyncServer,
        address::{parse_address, AddressError, AddressParser, DeviceAddress},
        core_service::{VxiCoreServer, VxiCoreSession},
        VxiConfig, VxiServerBuilder,
    };
    pub use crate::common::vxi11::{
        DEVICE_ASYNC, DEVICE_ASYNC_VERSION, DEVICE_CORE, DEVICE_CORE_VERSION, DEVICE_INTR,
        DEVICE_INTR_VERSION,
    };
}

use self::{
    address::{parse_address, AddressParser, DeviceAddress},
    intr_client::IntrChannel,
    link::{DeviceEntry, LinkTable},
    prelude::*,
};

impl From<DeviceError> for DeviceErrorCode {
    fn from(de: DeviceError) -> Self {
        match de {
            DeviceError::NotSupported => DeviceErrorCode::OperationNotSupported,
            DeviceError::IoTimeout => DeviceErrorCode::IoTimeout,
            DeviceError::IoError => DeviceErrorCode::IoError,
            _ => DeviceErrorCode::DeviceNotAccessible,
        }
    }
}

impl From<LockError> for DeviceErrorCode {
    fn from(le: LockError) -> Self {
        match le {
            LockError::NotLocked => DeviceErrorCode::NoLockHeldByThisLink,
            LockError::LockedByOther | LockError::Timeout => {
                DeviceErrorCode::DeviceLockedByAnotherLink
            }
            LockError::Busy => DeviceErrorCode::DeviceNotAccessible,
        }
    }
}

impl<T> From<Result<(), T>> for DeviceErrorCode
where
    T: Into<DeviceErrorCode>,
{
    fn from(res: Result<(), T>) -> Self {
        match res {
            Ok(_) => DeviceErrorCode::NoError,
            Err(err) => err.into(),
        }
    }
}

/// Longest allowed device poll interval
pub const MAX_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Settings shared by all sessions of a server
#[derive(Debug, Clone)]
pub struct VxiConfig {
    /// Port returned as `abort_port` by `create_link`
    pub async_port: u16,
    /// Largest data chunk accepted by `device_write`
    pub max_recv_size: u32,
    /// Interval between polls of a device which is not ready
    pub poll_interval: Duration,
}

impl Default for VxiConfig {
    fn default() -> Self {
        Self {
            async_port: 4323,
            max_recv_size: 128 * 1024,
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// Builder used to create a VXI11 server
pub struct VxiServerBuilder<DEV> {
    core_port: u16,
    config: VxiConfig,
    max_links: usize,
    parser: AddressParser,
    devices: HashMap<DeviceAddress, DeviceEntry<DEV>>,
}

impl<DEV> Default for VxiServerBuilder<DEV> {
    fn default() -> Self {
        Self {
            core_port: 4322,
            config: VxiConfig::default(),
            max_links: 64,
            parser: parse_address,
            devices: HashMap::new(),
        }
    }
}

impl<DEV> VxiServerBuilder<DEV> {
    pub fn new() -> Self {
        Default::default()
    }

    /// Set the vxi server core port.
    pub fn core_port(mut self, core_port: u16) -> Self {
        self.core_port = core_port;
        self
    }

    /// Set the vxi server async/abort port.
    pub fn async_port(mut self, async_port: u16) -> Self {
        self.config.async_port = async_port;
        self
    }

    /// Set the maximum size of data accepted in one `device_write`
    pub fn max_recv_size(mut self, max_recv_size: u32) -> Self {
        self.config.max_recv_size = max_recv_size.max(1);
        self
    }

    /// Set the maximum number of simultaneously open links
    pub fn max_links(mut self, max_links: usize) -> Self {
        self.max_links = max_links;
        self
    }

    /// Set how often a busy device is polled, at most [MAX_POLL_INTERVAL]
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.config.poll_interval = poll_interval.min(MAX_POLL_INTERVAL);
        self
    }

    /// Use a custom parser for device names given to `create_link`
    pub fn address_parser(mut self, parser: AddressParser) -> Self {
        self.parser = parser;
        self
    }

    /// Register a device.
    ///
    /// `status` is used by the device to signal service requests.
    pub fn device(
        mut self,
        address: DeviceAddress,
        device: Arc<Mutex<DEV>>,
        status: StatusSender,
    ) -> Self {
        self.devices.insert(
            address,
            DeviceEntry {
                device,
                lock: DeviceLock::new(),
                status,
            },
        );
        self
    }

    pub fn build(self) -> (Arc<VxiCoreServer<DEV>>, Arc<VxiAsyncServer<DEV>>) {
        log::debug!(
            "Server with {} device(s), max {} links",
            self.devices.len(),
            self.max_links
        );
        let inner = Arc::new(Mutex::new(LinkTable::new(
            self.devices,
            self.max_links,
            self.parser,
        )));
        let config = Arc::new(self.config);
        (
            Arc::new(VxiCoreServer {
                inner: inner.clone(),
                core_port: self.core_port,
                config: config.clone(),
                intr: Arc::new(IntrChannel::default()),
            }),
            Arc::new(VxiAsyncServer {
                inner,
                async_port: config.async_port,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use lxi_device::{lock::LockError, util::SimulatedDevice, DeviceError};

    use super::{VxiServerBuilder, MAX_POLL_INTERVAL};
    use crate::common::vxi11::xdr::DeviceErrorCode;

    #[test]
    fn error_mapping() {
        assert_eq!(
            DeviceErrorCode::from(LockError::Timeout),
            DeviceErrorCode::DeviceLockedByAnotherLink
        );
        assert_eq!(
            DeviceErrorCode::from(LockError::NotLocked),
            DeviceErrorCode::NoLockHeldByThisLink
        );
        assert_eq!(
            DeviceErrorCode::from(LockError::Busy),
            DeviceErrorCode::DeviceNotAccessible
        );
        assert_eq!(
            DeviceErrorCode::from(DeviceError::NotSupported),
            DeviceErrorCode::OperationNotSupported
        );
        assert_eq!(
            DeviceErrorCode::from(Ok::<(), DeviceError>(())),
            DeviceErrorCode::NoError
        );
    }

    #[test]
    fn poll_interval_is_clamped() {
        let builder = VxiServerBuilder::<SimulatedDevice>::new().poll_interval(Duration::from_secs(1));
        assert_eq!(builder.config.poll_interval, MAX_POLL_INTERVAL);
    }
}
