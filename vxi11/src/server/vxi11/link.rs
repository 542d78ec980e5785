use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_std::task;
use futures::{
    channel::mpsc::{channel, Receiver, Sender},
    future::{abortable, AbortHandle},
    lock::Mutex,
    StreamExt,
};
use lxi_device::{
    lock::{DeviceLock, LockHandle, SpinMutex},
    status::Sender as StatusSender,
    STB_RQS,
};

use crate::common::vxi11::xdr::{DeviceErrorCode, DeviceLink, RX_CHR, RX_END, RX_REQCNT};

use super::{
    address::{AddressParser, DeviceAddress},
    gpib::GpibState,
    intr_client::IntrChannel,
};

/// A device which links can be created to
pub(crate) struct DeviceEntry<DEV> {
    pub(crate) device: Arc<Mutex<DEV>>,
    pub(crate) lock: Arc<SpinMutex<DeviceLock>>,
    pub(crate) status: StatusSender,
}

/// Shared between a link and the abort channel
#[derive(Clone)]
pub(crate) struct LinkControl {
    abort: Sender<()>,
    busy: Arc<AtomicBool>,
}

impl LinkControl {
    pub(crate) fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Abort the pending operation, if any
    pub(crate) fn abort(&self) {
        if self.is_busy() {
            let _ = self.abort.clone().try_send(());
        }
    }
}

/// Clears the busy flag of a link when the operation ends
pub(crate) struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub(crate) struct Link<DEV> {
    pub(crate) id: DeviceLink,
    pub(crate) address: DeviceAddress,
    pub(crate) client_id: i32,
    pub(crate) handle: LockHandle<DEV>,
    pub(crate) abort: AbortSignal,
    busy: Arc<AtomicBool>,
    status: StatusSender,

    srq_task: Option<AbortHandle>,

    pub(crate) rx: ReadBuffer,
    pub(crate) gpib: GpibState,
}

/// Abort requests of one link
pub(crate) struct AbortSignal(Receiver<()>);

impl AbortSignal {
    /// Forget requests made before the current operation
    fn clear(&mut self) {
        while let Ok(Some(())) = self.0.try_next() {}
    }

    /// Check for an abort request without waiting
    pub(crate) fn requested(&mut self) -> bool {
        // A closed channel means the link is being destroyed
        !matches!(self.0.try_next(), Err(_))
    }

    /// Wait for an abort request
    pub(crate) async fn wait(&mut self) {
        let _ = self.0.next().await;
    }
}

/// Data read from the device but not yet returned to the client
#[derive(Debug, Default)]
pub(crate) struct ReadBuffer {
    data: Vec<u8>,
    /// Last byte of `data` ends a message
    end: bool,
}

impl ReadBuffer {
    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub(crate) fn push(&mut self, data: &[u8], end: bool) {
        self.data.extend_from_slice(data);
        self.end = end;
    }

    pub(crate) fn clear(&mut self) {
        self.data.clear();
        self.end = false;
    }

    /// Take as much of the buffered data as a read may return.
    ///
    /// Returns `None` if more data is needed from the device.
    pub(crate) fn take(
        &mut self,
        request_size: usize,
        term_char: Option<u8>,
    ) -> Option<(Vec<u8>, i32)> {
        let term_pos = term_char
            .and_then(|t| self.data.iter().position(|c| *c == t))
            .filter(|p| *p < request_size);

        let (len, mut reason) = if let Some(p) = term_pos {
            (p + 1, RX_CHR)
        } else if self.data.len() >= request_size {
            (request_size, 0)
        } else if self.end {
            (self.data.len(), 0)
        } else {
            return None;
        };

        if len == request_size {
            reason |= RX_REQCNT;
        }
        if len == self.data.len() && self.end {
            reason |= RX_END;
            self.end = false;
        }
        Some((self.data.drain(..len).collect(), reason))
    }
}

impl<DEV> Link<DEV> {
    /// Start an operation, clearing any stale abort request
    pub(crate) fn begin(&mut self) -> BusyGuard {
        self.abort.clear();
        self.busy.store(true, Ordering::SeqCst);
        BusyGuard(self.busy.clone())
    }

    /// Forward service requests of the device to `intr`
    pub(crate) fn enable_srq(&mut self, handle: Vec<u8>, intr: Arc<IntrChannel>)
    where
        DEV: Send + 'static,
    {
        self.disable_srq();
        let mut status = self.status.subscribe();
        let (task, abort) = abortable(async move {
            while let Some(stb) = status.next().await {
                if stb & STB_RQS != 0 {
                    intr.device_intr_srq(&handle).await;
                }
            }
        });
        task::spawn(task);
        self.srq_task = Some(abort);
    }

    pub(crate) fn disable_srq(&mut self) {
        if let Some(task) = self.srq_task.take() {
            task.abort();
        }
    }
}

impl<DEV> Drop for Link<DEV> {
    fn drop(&mut self) {
        log::trace!(link=self.id; "Link closed");
        self.disable_srq();
        self.handle.force_release();
    }
}

/// All links of a server and the devices they connect to
pub(crate) struct LinkTable<DEV> {
    next_id: DeviceLink,
    links: HashMap<DeviceLink, LinkControl>,
    devices: HashMap<DeviceAddress, DeviceEntry<DEV>>,
    max_links: usize,
    parser: AddressParser,
}

impl<DEV> LinkTable<DEV> {
    pub(crate) fn new(
        devices: HashMap<DeviceAddress, DeviceEntry<DEV>>,
        max_links: usize,
        parser: AddressParser,
    ) -> Self {
        Self {
            next_id: 0,
            links: HashMap::new(),
            devices,
            max_links,
            parser,
        }
    }

    fn next_link_id(&mut self) -> DeviceLink {
        loop {
            let id = self.next_id;
            self.next_id = if id == DeviceLink::MAX { 0 } else { id + 1 };
            if !self.links.contains_key(&id) {
                break id;
            }
        }
    }

    /// Create a new link to the device named `device`
    pub(crate) fn allocate(
        &mut self,
        device: &str,
        client_id: i32,
    ) -> Result<Link<DEV>, DeviceErrorCode> {
        let address = (self.parser)(device).map_err(|err| {
            log::debug!("{}", err);
            DeviceErrorCode::InvalidAddress
        })?;
        let entry = self.devices.get(&address).ok_or_else(|| {
            log::debug!("No device at {}", address);
            DeviceErrorCode::InvalidAddress
        })?;
        if self.links.len() >= self.max_links {
            return Err(DeviceErrorCode::OutOfResources);
        }

        let handle = LockHandle::new(entry.lock.clone(), entry.device.clone());
        let status = entry.status.clone();
        let id = self.next_link_id();

        let (sender, receiver) = channel(1);
        let busy = Arc::new(AtomicBool::new(false));
        self.links.insert(
            id,
            LinkControl {
                abort: sender,
                busy: busy.clone(),
            },
        );
        Ok(Link {
            id,
            gpib: GpibState::new(address.primary_address()),
            address,
            client_id,
            handle,
            abort: AbortSignal(receiver),
            busy,
            status,
            srq_task: None,
            rx: ReadBuffer::default(),
        })
    }

    pub(crate) fn lookup(&self, lid: DeviceLink) -> Option<&LinkControl> {
        self.links.get(&lid)
    }

    pub(crate) fn release(&mut self, lid: DeviceLink) -> bool {
        self.links.remove(&lid).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.links.len()
    }

    /// Is the device at `address` locked by any link?
    pub(crate) fn is_locked(&self, address: &DeviceAddress) -> bool {
        self.devices
            .get(address)
            .map_or(false, |entry| entry.lock.lock().is_locked())
    }
}
