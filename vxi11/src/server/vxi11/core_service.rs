use std::{
    collections::HashMap,
    io::{self, Cursor},
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::{Duration, Instant},
};

use async_listen::ListenExt;
use async_std::{future::timeout, net::TcpListener, task};
use futures::{
    lock::{Mutex, MutexGuard},
    select, FutureExt, StreamExt,
};
use lxi_device::{
    lock::{LockError, LockHandle},
    Device, STB_MAV,
};

use crate::common::{
    onc_rpc::{decode_args, MissmatchInfo, RpcError, RpcService},
    vxi11::{
        self,
        xdr::{
            CreateLinkParms, CreateLinkResp, DeviceDocmdParms, DeviceDocmdResp,
            DeviceEnableSrqParms, DeviceError, DeviceErrorCode, DeviceFlags, DeviceGenericParms,
            DeviceLink, DeviceLockParms, DeviceReadParms, DeviceReadResp, DeviceReadStbResp,
            DeviceRemoteFunc, DeviceWriteParms, DeviceWriteResp, MAX_SRQ_HANDLE, RX_REQCNT,
        },
    },
    xdr::basic::{Opaque, XdrEncode},
};

use super::{
    address::DeviceAddress,
    gpib,
    intr_client::IntrChannel,
    link::{AbortSignal, Link, LinkTable},
    prelude::*,
};

fn millis(ms: u32) -> Duration {
    Duration::from_millis(ms as u64)
}

/// Wait for access to the device.
///
/// With `OP_FLAG_WAIT_BLOCK` a lock held by another link is waited for up to `lock_timeout`,
/// otherwise it fails immediately. Waiting for another link using an unlocked device is bounded
/// by `io_timeout`.
async fn lock_device<'a, DEV>(
    handle: &'a LockHandle<DEV>,
    abort: &mut AbortSignal,
    flags: DeviceFlags,
    lock_timeout: u32,
    io_timeout: u32,
) -> Result<MutexGuard<'a, DEV>, DeviceErrorCode> {
    if flags.is_waitlock() {
        select! {
            res = timeout(millis(lock_timeout), handle.async_lock()).fuse() => {
                res.unwrap_or(Err(LockError::Timeout)).map_err(Into::into)
            },
            _ = abort.wait().fuse() => Err(DeviceErrorCode::Abort),
        }
    } else {
        handle.can_lock()?;
        select! {
            res = timeout(millis(io_timeout), handle.async_lock()).fuse() => match res {
                Ok(res) => res.map_err(Into::into),
                Err(_) => Err(DeviceErrorCode::IoTimeout),
            },
            _ = abort.wait().fuse() => Err(DeviceErrorCode::Abort),
        }
    }
}

/// Core RPC service
pub struct VxiCoreServer<DEV> {
    pub(super) inner: Arc<Mutex<LinkTable<DEV>>>,
    pub(super) core_port: u16,
    pub(super) config: Arc<VxiConfig>,
    pub(super) intr: Arc<IntrChannel>,
}

impl<DEV> VxiCoreServer<DEV>
where
    DEV: Device + Send + 'static,
{
    pub async fn bind(self: Arc<Self>, addrs: IpAddr) -> io::Result<()> {
        let listener = TcpListener::bind((addrs, self.core_port)).await?;
        self.serve(listener).await
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        log::info!("Core listening on {}", listener.local_addr()?);
        let mut incoming = listener
            .incoming()
            .log_warnings(|warn| log::warn!("Listening error: {}", warn))
            .handle_errors(Duration::from_millis(100))
            .backpressure(10);
        while let Some((token, stream)) = incoming.next().await {
            let peer = match stream.peer_addr() {
                Ok(peer) => peer,
                Err(err) => {
                    log::warn!("Failed to get peer address: {}", err);
                    continue;
                }
            };
            log::debug!("Accepted from: {}", peer);
            let session = self.new_session(peer);

            task::spawn(async move {
                if let Err(err) = session.clone().serve_tcp_stream(stream).await {
                    log::debug!(peer=format!("{}", peer); "Error processing client: {}", err)
                }
                session.close().await;
                log::debug!(peer=format!("{}", peer); "Disconnected");
                drop(token);
            });
        }
        log::info!("Stopped");
        Ok(())
    }

    /// Create a session for a client connection.
    ///
    /// Links created through the session stay open until destroyed or [VxiCoreSession::close]
    /// is called.
    pub fn new_session(&self, peer: SocketAddr) -> Arc<VxiCoreSession<DEV>> {
        Arc::new(VxiCoreSession {
            peer,
            inner: self.inner.clone(),
            config: self.config.clone(),
            links: Mutex::new(HashMap::new()),
            intr: self.intr.clone(),
        })
    }

    /// Number of links open to the server
    pub async fn active_links(&self) -> usize {
        self.inner.lock().await.len()
    }

    /// Is the device at `address` locked by any link?
    pub async fn is_locked(&self, address: &DeviceAddress) -> bool {
        self.inner.lock().await.is_locked(address)
    }
}

/// Calls of one client connection
pub struct VxiCoreSession<DEV> {
    peer: SocketAddr,
    inner: Arc<Mutex<LinkTable<DEV>>>,
    config: Arc<VxiConfig>,

    // Links created by this session
    links: Mutex<HashMap<DeviceLink, Arc<Mutex<Link<DEV>>>>>,

    intr: Arc<IntrChannel>,
}

impl<DEV> VxiCoreSession<DEV>
where
    DEV: Device + Send + 'static,
{
    /// Destroy all links of this session and the interrupt channel if it created it
    pub async fn close(&self) {
        let links: Vec<_> = self.links.lock().await.drain().collect();
        {
            let mut inner = self.inner.lock().await;
            for (lid, _) in &links {
                inner.release(*lid);
            }
        }
        for (_, link) in links {
            drop(link.lock().await);
        }
        self.intr.release(self.peer).await;
    }

    fn peer(&self) -> String {
        format!("{}", self.peer)
    }

    async fn get_link(&self, lid: DeviceLink) -> Result<Arc<Mutex<Link<DEV>>>, DeviceErrorCode> {
        self.links
            .lock()
            .await
            .get(&lid)
            .cloned()
            .ok_or(DeviceErrorCode::InvalidLinkIdentifier)
    }

    async fn create_link(&self, parms: CreateLinkParms) -> Result<DeviceLink, DeviceErrorCode> {
        let mut link = self
            .inner
            .lock()
            .await
            .allocate(&parms.device, parms.client_id)?;
        let lid = link.id;

        if parms.lock_device {
            let res = timeout(millis(parms.lock_timeout), link.handle.async_acquire())
                .await
                .unwrap_or(Err(LockError::Timeout));
            if let Err(err) = res {
                log::debug!(peer=self.peer(), link=lid; "Failed to lock {}: {:?}", link.address, err);
                self.inner.lock().await.release(lid);
                return Err(err.into());
            }
        }

        log::debug!(peer=self.peer(), link=lid;
            "New link to {}, client_id={}, locked={}",
            link.address, link.client_id, link.handle.has_lock());
        self.links.lock().await.insert(lid, Arc::new(Mutex::new(link)));
        Ok(lid)
    }

    async fn device_write(&self, parms: DeviceWriteParms) -> Result<u32, (DeviceErrorCode, u32)> {
        let link = self.get_link(parms.lid).await.map_err(|e| (e, 0))?;
        let mut guard = link
            .try_lock()
            .ok_or((DeviceErrorCode::DeviceNotAccessible, 0))?;
        let link = &mut *guard;
        let _busy = link.begin();

        let mut dev = lock_device(
            &link.handle,
            &mut link.abort,
            parms.flags,
            parms.lock_timeout,
            parms.io_timeout,
        )
        .await
        .map_err(|e| (e, 0))?;

        let deadline = Instant::now() + millis(parms.io_timeout);
        let chunk_size = self.config.max_recv_size as usize;
        let data = &parms.data[..];
        let mut written = 0;
        loop {
            let chunk_end = data.len().min(written + chunk_size);
            let end = parms.flags.is_end() && chunk_end == data.len();
            let n = dev
                .write(&data[written..chunk_end], end)
                .map_err(|e| (e.into(), written as u32))?
                .min(chunk_end - written);
            written += n;
            if written == data.len() {
                break Ok(written as u32);
            }
            if n == 0 {
                if link.abort.requested() {
                    break Err((DeviceErrorCode::Abort, written as u32));
                }
                if Instant::now() >= deadline {
                    break Err((DeviceErrorCode::IoTimeout, written as u32));
                }
                task::sleep(self.config.poll_interval).await;
            }
        }
    }

    async fn device_read(&self, parms: DeviceReadParms) -> Result<(i32, Vec<u8>), DeviceErrorCode> {
        let link = self.get_link(parms.lid).await?;
        let mut guard = link
            .try_lock()
            .ok_or(DeviceErrorCode::DeviceNotAccessible)?;
        let link = &mut *guard;
        let _busy = link.begin();

        let mut dev = lock_device(
            &link.handle,
            &mut link.abort,
            parms.flags,
            parms.lock_timeout,
            parms.io_timeout,
        )
        .await?;

        let request_size = parms.request_size as usize;
        if request_size == 0 {
            return Ok((RX_REQCNT, Vec::new()));
        }
        let term_char = parms.flags.is_termcharset().then_some(parms.term_char);

        let deadline = Instant::now() + millis(parms.io_timeout);
        loop {
            if let Some((data, reason)) = link.rx.take(request_size, term_char) {
                break Ok((reason, data));
            }

            let rd = dev.read(request_size - link.rx.len())?;
            if !rd.is_pending() {
                link.rx.push(&rd.data, rd.end);
                continue;
            }

            if link.abort.requested() {
                break Err(DeviceErrorCode::Abort);
            }
            if Instant::now() >= deadline {
                break Err(DeviceErrorCode::IoTimeout);
            }
            task::sleep(self.config.poll_interval).await;
        }
    }

    async fn device_readstb(&self, parms: DeviceGenericParms) -> Result<u8, DeviceErrorCode> {
        let link = self.get_link(parms.lid).await?;
        let mut guard = link
            .try_lock()
            .ok_or(DeviceErrorCode::DeviceNotAccessible)?;
        let link = &mut *guard;
        let _busy = link.begin();

        let mut dev = lock_device(
            &link.handle,
            &mut link.abort,
            parms.flags,
            parms.lock_timeout,
            parms.io_timeout,
        )
        .await?;
        let mut stb = dev.get_status()?;
        if !link.rx.is_empty() {
            stb |= STB_MAV;
        }
        Ok(stb)
    }

    /// Trigger, clear, remote and local
    async fn device_generic(
        &self,
        proc: u32,
        parms: DeviceGenericParms,
    ) -> Result<(), DeviceErrorCode> {
        let link = self.get_link(parms.lid).await?;
        let mut guard = link
            .try_lock()
            .ok_or(DeviceErrorCode::DeviceNotAccessible)?;
        let link = &mut *guard;
        let _busy = link.begin();

        let mut dev = lock_device(
            &link.handle,
            &mut link.abort,
            parms.flags,
            parms.lock_timeout,
            parms.io_timeout,
        )
        .await?;
        match proc {
            vxi11::device_trigger => dev.trigger()?,
            vxi11::device_clear => {
                link.rx.clear();
                dev.clear()?
            }
            vxi11::device_remote => {
                dev.set_remote(true)?;
                link.gpib.remote = true;
            }
            _ => {
                dev.set_remote(false)?;
                link.gpib.remote = false;
            }
        }
        Ok(())
    }

    async fn device_lock(&self, parms: DeviceLockParms) -> Result<(), DeviceErrorCode> {
        let link = self.get_link(parms.lid).await?;
        let mut guard = link
            .try_lock()
            .ok_or(DeviceErrorCode::DeviceNotAccessible)?;
        let link = &mut *guard;
        let _busy = link.begin();

        if parms.flags.is_waitlock() {
            select! {
                res = timeout(millis(parms.lock_timeout), link.handle.async_acquire()).fuse() => {
                    res.unwrap_or(Err(LockError::Timeout))?
                },
                _ = link.abort.wait().fuse() => return Err(DeviceErrorCode::Abort),
            }
        } else {
            link.handle.try_acquire()?;
        }
        Ok(())
    }

    async fn device_unlock(&self, lid: DeviceLink) -> Result<(), DeviceErrorCode> {
        let link = self.get_link(lid).await?;
        let mut guard = link
            .try_lock()
            .ok_or(DeviceErrorCode::DeviceNotAccessible)?;
        guard.handle.try_release()?;
        Ok(())
    }

    async fn device_enable_srq(&self, parms: DeviceEnableSrqParms) -> Result<(), DeviceErrorCode> {
        let link = self.get_link(parms.lid).await?;
        if parms.handle.len() > MAX_SRQ_HANDLE {
            return Err(DeviceErrorCode::ParameterError);
        }
        let mut guard = link
            .try_lock()
            .ok_or(DeviceErrorCode::DeviceNotAccessible)?;
        if parms.enable {
            guard.enable_srq(parms.handle.0, self.intr.clone());
        } else {
            guard.disable_srq();
        }
        Ok(())
    }

    async fn device_docmd(&self, parms: DeviceDocmdParms) -> Result<Vec<u8>, DeviceErrorCode> {
        let link = self.get_link(parms.lid).await?;

        // datasize is the size of each element in data_in
        let valid = match parms.datasize {
            0 => parms.data_in.is_empty(),
            n if n > 0 => parms.data_in.len() % n as usize == 0,
            _ => false,
        };
        if !valid {
            return Err(DeviceErrorCode::ParameterError);
        }

        let mut guard = link
            .try_lock()
            .ok_or(DeviceErrorCode::DeviceNotAccessible)?;
        let link = &mut *guard;
        let _busy = link.begin();

        let mut dev = lock_device(
            &link.handle,
            &mut link.abort,
            parms.flags,
            parms.lock_timeout,
            parms.io_timeout,
        )
        .await?;
        gpib::docmd(
            &mut link.gpib,
            &mut link.rx,
            &mut *dev,
            parms.cmd,
            parms.network_order,
            &parms.data_in,
        )
    }

    async fn destroy_link(&self, lid: DeviceLink) -> Result<(), DeviceErrorCode> {
        let link = self
            .links
            .lock()
            .await
            .remove(&lid)
            .ok_or(DeviceErrorCode::InvalidLinkIdentifier)?;
        {
            let mut inner = self.inner.lock().await;
            if let Some(control) = inner.lookup(lid) {
                control.abort();
            }
            inner.release(lid);
        }
        // Wait for a pending operation to finish
        drop(link.lock().await);
        Ok(())
    }
}

#[async_trait::async_trait]
impl<DEV> RpcService for VxiCoreSession<DEV>
where
    DEV: Device + Send + 'static,
{
    async fn call(
        self: Arc<Self>,
        prog: u32,
        vers: u32,
        proc: u32,
        args: &mut Cursor<Vec<u8>>,
        ret: &mut Cursor<Vec<u8>>,
    ) -> Result<(), RpcError> {
        if prog != DEVICE_CORE {
            return Err(RpcError::ProgUnavail);
        }

        if vers != DEVICE_CORE_VERSION {
            return Err(RpcError::ProgMissmatch(MissmatchInfo {
                low: DEVICE_CORE_VERSION,
                high: DEVICE_CORE_VERSION,
            }));
        }

        match proc {
            0 => Ok(()),
            vxi11::create_link => {
                let parms: CreateLinkParms = decode_args(args)?;
                log::debug!(peer=self.peer(); "Create link {:?}, client_id={}, lock={}", parms.device, parms.client_id, parms.lock_device);

                let mut resp = CreateLinkResp {
                    abort_port: self.config.async_port as u32,
                    max_recv_size: self.config.max_recv_size,
                    ..Default::default()
                };
                match self.create_link(parms).await {
                    Ok(lid) => resp.lid = lid,
                    Err(error) => resp.error = error,
                }
                resp.write_xdr(ret)?;
                Ok(())
            }
            vxi11::device_write => {
                let parms: DeviceWriteParms = decode_args(args)?;
                log::debug!(peer=self.peer(), link=parms.lid,
                    lock_timeout=parms.lock_timeout,
                    io_timeout=parms.io_timeout,
                    flags=format!("{}", parms.flags);
                    "Write {:?}", parms.data.0);

                let resp = match self.device_write(parms).await {
                    Ok(size) => DeviceWriteResp {
                        error: DeviceErrorCode::NoError,
                        size,
                    },
                    Err((error, size)) => DeviceWriteResp { error, size },
                };
                log::trace!(peer=self.peer(); "Write {}, size={}", resp.error, resp.size);
                resp.write_xdr(ret)?;
                Ok(())
            }
            vxi11::device_read => {
                let parms: DeviceReadParms = decode_args(args)?;
                log::debug!(peer=self.peer(), link=parms.lid,
                    lock_timeout=parms.lock_timeout,
                    io_timeout=parms.io_timeout,
                    flags=format!("{}", parms.flags);
                    "Read request={}, termchar={}", parms.request_size, parms.term_char);

                let resp = match self.device_read(parms).await {
                    Ok((reason, data)) => DeviceReadResp {
                        error: DeviceErrorCode::NoError,
                        reason,
                        data: Opaque(data),
                    },
                    Err(error) => DeviceReadResp {
                        error,
                        ..Default::default()
                    },
                };
                log::trace!(peer=self.peer(); "Read {}, reason={}, data={:?}", resp.error, resp.reason, resp.data.0);
                resp.write_xdr(ret)?;
                Ok(())
            }
            vxi11::device_readstb => {
                let parms: DeviceGenericParms = decode_args(args)?;
                log::debug!(peer=self.peer(), link=parms.lid,
                    lock_timeout=parms.lock_timeout,
                    io_timeout=parms.io_timeout,
                    flags=format!("{}", parms.flags);
                    "Read stb");

                let resp = match self.device_readstb(parms).await {
                    Ok(stb) => DeviceReadStbResp {
                        error: DeviceErrorCode::NoError,
                        stb,
                    },
                    Err(error) => DeviceReadStbResp { error, stb: 0 },
                };
                resp.write_xdr(ret)?;
                Ok(())
            }
            vxi11::device_trigger
            | vxi11::device_clear
            | vxi11::device_remote
            | vxi11::device_local => {
                let parms: DeviceGenericParms = decode_args(args)?;
                log::debug!(peer=self.peer(), link=parms.lid,
                    lock_timeout=parms.lock_timeout,
                    io_timeout=parms.io_timeout,
                    flags=format!("{}", parms.flags);
                    "Generic procedure {}", proc);

                let resp = DeviceError::from(DeviceErrorCode::from(
                    self.device_generic(proc, parms).await,
                ));
                resp.write_xdr(ret)?;
                Ok(())
            }
            vxi11::device_lock => {
                let parms: DeviceLockParms = decode_args(args)?;
                log::debug!(peer=self.peer(), link=parms.lid,
                    lock_timeout=parms.lock_timeout,
                    flags=format!("{}", parms.flags);
                    "Lock");

                let resp = DeviceError::from(DeviceErrorCode::from(self.device_lock(parms).await));
                log::trace!(peer=self.peer(); "Lock {}", resp.error);
                resp.write_xdr(ret)?;
                Ok(())
            }
            vxi11::device_unlock => {
                let lid: DeviceLink = decode_args(args)?;
                log::debug!(peer=self.peer(), link=lid; "Unlock");

                let resp = DeviceError::from(DeviceErrorCode::from(self.device_unlock(lid).await));
                resp.write_xdr(ret)?;
                Ok(())
            }
            vxi11::device_enable_srq => {
                let parms: DeviceEnableSrqParms = decode_args(args)?;
                if parms.enable {
                    log::debug!(peer=self.peer(), link=parms.lid; "Enable srq, handle={:?}", parms.handle.0);
                } else {
                    log::debug!(peer=self.peer(), link=parms.lid; "Disable srq");
                }

                let resp =
                    DeviceError::from(DeviceErrorCode::from(self.device_enable_srq(parms).await));
                resp.write_xdr(ret)?;
                Ok(())
            }
            vxi11::device_docmd => {
                let parms: DeviceDocmdParms = decode_args(args)?;
                log::debug!(peer=self.peer(), link=parms.lid,
                    lock_timeout=parms.lock_timeout,
                    io_timeout=parms.io_timeout,
                    flags=format!("{}", parms.flags);
                    "Docmd {:#x}, network_order={}, datasize={}, data={:?}",
                    parms.cmd, parms.network_order, parms.datasize, parms.data_in.0);

                let resp = match self.device_docmd(parms).await {
                    Ok(data_out) => DeviceDocmdResp {
                        error: DeviceErrorCode::NoError,
                        data_out: Opaque(data_out),
                    },
                    Err(error) => DeviceDocmdResp {
                        error,
                        ..Default::default()
                    },
                };
                resp.write_xdr(ret)?;
                Ok(())
            }
            vxi11::destroy_link => {
                let lid: DeviceLink = decode_args(args)?;
                log::debug!(peer=self.peer(), link=lid; "Destroy link");

                let resp = DeviceError::from(DeviceErrorCode::from(self.destroy_link(lid).await));
                resp.write_xdr(ret)?;
                Ok(())
            }
            vxi11::create_intr_chan => {
                let parms: DeviceRemoteFunc = decode_args(args)?;
                log::debug!(peer=self.peer();
                    "Create interrupt channel, {}:{}, prog={:#x}, vers={}, family={:?}",
                    Ipv4Addr::from(parms.host_addr),
                    parms.host_port,
                    parms.prog_num,
                    parms.prog_vers,
                    parms.prog_family);

                let resp = DeviceError::from(self.intr.create(self.peer, &parms).await);
                resp.write_xdr(ret)?;
                Ok(())
            }
            vxi11::destroy_intr_chan => {
                log::debug!(peer=self.peer(); "Destroy interrupt channel");

                let resp = DeviceError::from(self.intr.destroy().await);
                resp.write_xdr(ret)?;
                Ok(())
            }
            _ => Err(RpcError::ProcUnavail),
        }
    }
}
