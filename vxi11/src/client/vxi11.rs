use std::{io::Cursor, net::SocketAddr, sync::Arc, time::Duration};

use async_listen::ListenExt;
use async_std::{
    io,
    net::{TcpListener, TcpStream, ToSocketAddrs, UdpSocket},
    task,
};
use futures::{
    channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender},
    StreamExt,
};

use crate::common::{
    onc_rpc::{decode_args, MissmatchInfo, RpcError, RpcService, StreamRpcClient},
    vxi11::{
        create_intr_chan, create_link, destroy_intr_chan, destroy_link, device_abort,
        device_clear, device_docmd, device_enable_srq, device_local, device_lock,
        device_read, device_readstb, device_remote, device_trigger, device_unlock, device_write,
        xdr::{
            CreateLinkParms, CreateLinkResp, DeviceDocmdParms, DeviceDocmdResp,
            DeviceEnableSrqParms, DeviceError, DeviceGenericParms, DeviceLink, DeviceLockParms,
            DeviceReadParms, DeviceReadResp, DeviceReadStbResp, DeviceRemoteFunc, DeviceSrqParms,
            DeviceWriteParms, DeviceWriteResp,
        },
        DEVICE_ASYNC, DEVICE_ASYNC_VERSION, DEVICE_CORE, DEVICE_CORE_VERSION, DEVICE_INTR,
        DEVICE_INTR_VERSION,
    },
};

/// Client of the core channel
pub struct Vxi11CoreClient(StreamRpcClient<TcpStream>);

impl Vxi11CoreClient {
    pub async fn connect(addrs: impl ToSocketAddrs) -> io::Result<Self> {
        let io = TcpStream::connect(addrs).await?;
        Ok(Self(StreamRpcClient::new(
            io,
            DEVICE_CORE,
            DEVICE_CORE_VERSION,
        )))
    }

    /// Local address of the connection, i.e. the address a server can reach the client at
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.0.get_ref().local_addr()
    }

    pub async fn create_link(
        &mut self,
        parms: CreateLinkParms,
    ) -> Result<CreateLinkResp, RpcError> {
        self.0.call(create_link, parms).await
    }

    pub async fn device_write(
        &mut self,
        parms: DeviceWriteParms,
    ) -> Result<DeviceWriteResp, RpcError> {
        self.0.call(device_write, parms).await
    }

    pub async fn device_read(&mut self, parms: DeviceReadParms) -> Result<DeviceReadResp, RpcError> {
        self.0.call(device_read, parms).await
    }

    pub async fn device_readstb(
        &mut self,
        parms: DeviceGenericParms,
    ) -> Result<DeviceReadStbResp, RpcError> {
        self.0.call(device_readstb, parms).await
    }

    pub async fn device_trigger(
        &mut self,
        parms: DeviceGenericParms,
    ) -> Result<DeviceError, RpcError> {
        self.0.call(device_trigger, parms).await
    }

    pub async fn device_clear(&mut self, parms: DeviceGenericParms) -> Result<DeviceError, RpcError> {
        self.0.call(device_clear, parms).await
    }

    pub async fn device_remote(
        &mut self,
        parms: DeviceGenericParms,
    ) -> Result<DeviceError, RpcError> {
        self.0.call(device_remote, parms).await
    }

    pub async fn device_local(&mut self, parms: DeviceGenericParms) -> Result<DeviceError, RpcError> {
        self.0.call(device_local, parms).await
    }

    pub async fn device_lock(&mut self, parms: DeviceLockParms) -> Result<DeviceError, RpcError> {
        self.0.call(device_lock, parms).await
    }

    pub async fn device_unlock(&mut self, lid: DeviceLink) -> Result<DeviceError, RpcError> {
        self.0.call(device_unlock, lid).await
    }

    pub async fn device_enable_srq(
        &mut self,
        parms: DeviceEnableSrqParms,
    ) -> Result<DeviceError, RpcError> {
        self.0.call(device_enable_srq, parms).await
    }

    pub async fn device_docmd(
        &mut self,
        parms: DeviceDocmdParms,
    ) -> Result<DeviceDocmdResp, RpcError> {
        self.0.call(device_docmd, parms).await
    }

    pub async fn destroy_link(&mut self, lid: DeviceLink) -> Result<DeviceError, RpcError> {
        self.0.call(destroy_link, lid).await
    }

    pub async fn create_intr_chan(
        &mut self,
        parms: DeviceRemoteFunc,
    ) -> Result<DeviceError, RpcError> {
        self.0.call(create_intr_chan, parms).await
    }

    pub async fn destroy_intr_chan(&mut self) -> Result<DeviceError, RpcError> {
        self.0.call(destroy_intr_chan, ()).await
    }
}

/// Client of the async/abort channel
pub struct Vxi11AsyncClient(StreamRpcClient<TcpStream>);

impl Vxi11AsyncClient {
    pub async fn connect(addrs: impl ToSocketAddrs) -> io::Result<Self> {
        let io = TcpStream::connect(addrs).await?;
        Ok(Self(StreamRpcClient::new(
            io,
            DEVICE_ASYNC,
            DEVICE_ASYNC_VERSION,
        )))
    }

    pub async fn device_abort(&mut self, lid: DeviceLink) -> Result<DeviceError, RpcError> {
        self.0.call(device_abort, lid).await
    }
}

/// Interrupt channel service receiving service requests from a server.
///
/// Handles of received `device_intr_srq` calls are forwarded to the receiver returned by
/// [VxiIntrServer::new].
pub struct VxiIntrServer {
    sender: UnboundedSender<Vec<u8>>,
}

impl VxiIntrServer {
    pub fn new() -> (Arc<Self>, UnboundedReceiver<Vec<u8>>) {
        let (sender, receiver) = unbounded();
        (Arc::new(Self { sender }), receiver)
    }

    pub async fn bind(self: Arc<Self>, addrs: impl ToSocketAddrs) -> io::Result<()> {
        let listener = TcpListener::bind(addrs).await?;
        self.serve_tcp(listener).await
    }

    pub async fn serve_udp(self: Arc<Self>, socket: UdpSocket) -> io::Result<()> {
        log::info!("Interrupt listening on UDP {}", socket.local_addr()?);
        self.serve_udp_socket_noreply(socket).await
    }

    pub async fn serve_tcp(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        log::info!("Interrupt listening on {}", listener.local_addr()?);
        let mut incoming = listener
            .incoming()
            .log_warnings(|warn| log::warn!("Listening error: {}", warn))
            .handle_errors(Duration::from_millis(100))
            .backpressure(10);

        while let Some((token, stream)) = incoming.next().await {
            log::debug!("Accepted from: {:?}", stream.peer_addr());

            let s = self.clone();
            task::spawn(async move {
                if let Err(err) = s.serve_tcp_stream_noreply(stream).await {
                    log::debug!("Error processing server: {}", err)
                }
                drop(token);
            });
        }
        log::info!("Stopped");
        Ok(())
    }
}

#[async_trait::async_trait]
impl RpcService for VxiIntrServer {
    async fn call(
        self: Arc<Self>,
        prog: u32,
        vers: u32,
        proc: u32,
        args: &mut Cursor<Vec<u8>>,
        _ret: &mut Cursor<Vec<u8>>,
    ) -> Result<(), RpcError> {
        if prog != DEVICE_INTR {
            return Err(RpcError::ProgUnavail);
        }

        if vers != DEVICE_INTR_VERSION {
            return Err(RpcError::ProgMissmatch(MissmatchInfo {
                low: DEVICE_INTR_VERSION,
                high: DEVICE_INTR_VERSION,
            }));
        }

        match proc {
            0 => Ok(()),
            crate::common::vxi11::device_intr_srq => {
                let parms: DeviceSrqParms = decode_args(args)?;
                log::debug!("Service request, handle={:?}", parms.handle.0);
                if self.sender.unbounded_send(parms.handle.0).is_err() {
                    log::debug!("Service request ignored, receiver closed");
                }
                Ok(())
            }
            _ => Err(RpcError::ProcUnavail),
        }
    }
}
