use std::{
    io::{self, Cursor},
    net::IpAddr,
    sync::Arc,
    time::Duration,
};

use async_listen::ListenExt;
use async_std::{net::TcpListener, task};
use futures::{lock::Mutex, StreamExt};

use crate::common::{
    onc_rpc::{decode_args, MissmatchInfo, RpcError, RpcService},
    vxi11::{
        self,
        xdr::{DeviceError, DeviceErrorCode, DeviceLink},
    },
    xdr::basic::XdrEncode,
};

use super::{link::LinkTable, prelude::*};

/// Async/abort RPC service
pub struct VxiAsyncServer<DEV> {
    pub(super) inner: Arc<Mutex<LinkTable<DEV>>>,
    pub(super) async_port: u16,
}

impl<DEV> VxiAsyncServer<DEV>
where
    DEV: Send + 'static,
{
    pub async fn bind(self: Arc<Self>, addrs: IpAddr) -> io::Result<()> {
        let listener = TcpListener::bind((addrs, self.async_port)).await?;
        self.serve(listener).await
    }

    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        log::info!("Async listening on {}", listener.local_addr()?);
        let mut incoming = listener
            .incoming()
            .log_warnings(|warn| log::warn!("Listening error: {}", warn))
            .handle_errors(Duration::from_millis(100))
            .backpressure(10);

        while let Some((token, stream)) = incoming.next().await {
            log::debug!("Accepted from: {:?}", stream.peer_addr());

            let s = self.clone();
            task::spawn(async move {
                if let Err(err) = s.serve_tcp_stream(stream).await {
                    log::debug!("Error processing client: {}", err)
                }
                drop(token);
            });
        }
        log::info!("Stopped");
        Ok(())
    }

    /// Abort the pending operation of link `lid`
    pub async fn device_abort(&self, lid: DeviceLink) -> DeviceErrorCode {
        match self.inner.lock().await.lookup(lid) {
            Some(control) => {
                if control.is_busy() {
                    log::debug!(link=lid; "Aborting pending operation");
                }
                control.abort();
                DeviceErrorCode::NoError
            }
            None => DeviceErrorCode::InvalidLinkIdentifier,
        }
    }
}

#[async_trait::async_trait]
impl<DEV> RpcService for VxiAsyncServer<DEV>
where
    DEV: Send + 'static,
{
    async fn call(
        self: Arc<Self>,
        prog: u32,
        vers: u32,
        proc: u32,
        args: &mut Cursor<Vec<u8>>,
        ret: &mut Cursor<Vec<u8>>,
    ) -> Result<(), RpcError> {
        if prog != DEVICE_ASYNC {
            return Err(RpcError::ProgUnavail);
        }

        if vers != DEVICE_ASYNC_VERSION {
            return Err(RpcError::ProgMissmatch(MissmatchInfo {
                low: DEVICE_ASYNC_VERSION,
                high: DEVICE_ASYNC_VERSION,
            }));
        }

        match proc {
            0 => Ok(()),
            vxi11::device_abort => {
                let lid: DeviceLink = decode_args(args)?;
                log::debug!(link=lid; "Abort");

                let resp = DeviceError::from(self.device_abort(lid).await);
                resp.write_xdr(ret)?;
                Ok(())
            }
            _ => Err(RpcError::ProcUnavail),
        }
    }
}
