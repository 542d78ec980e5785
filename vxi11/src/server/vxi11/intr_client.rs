use std::{
    io,
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use async_std::{
    future::timeout,
    net::{TcpStream, UdpSocket},
};
use futures::lock::Mutex;

use crate::common::{
    onc_rpc::{RpcClient, RpcError, StreamRpcClient, UdpRpcClient},
    vxi11::{
        device_intr_srq,
        xdr::{DeviceAddrFamily, DeviceErrorCode, DeviceRemoteFunc, DeviceSrqParms},
    },
    xdr::basic::Opaque,
};

/// Longest wait for the interrupt channel connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Client of the interrupt channel hosted by a VXI-11 client
pub(crate) struct VxiSrqClient {
    addr: SocketAddr,
    client: RpcClient,
}

impl VxiSrqClient {
    pub(crate) async fn connect(func: &DeviceRemoteFunc) -> io::Result<Self> {
        let port = u16::try_from(func.host_port)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid port"))?;
        let addr = SocketAddr::new(Ipv4Addr::from(func.host_addr).into(), port);
        let client = match func.prog_family {
            DeviceAddrFamily::Tcp => {
                let stream = TcpStream::connect(addr).await?;
                RpcClient::Tcp(StreamRpcClient::new(stream, func.prog_num, func.prog_vers))
            }
            DeviceAddrFamily::Udp => {
                let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
                socket.connect(addr).await?;
                RpcClient::Udp(UdpRpcClient::new(func.prog_num, func.prog_vers, socket))
            }
            DeviceAddrFamily::Other(family) => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    format!("unsupported address family {}", family),
                ))
            }
        };
        Ok(Self { addr, client })
    }

    pub(crate) async fn device_intr_srq(&mut self, handle: &[u8]) -> Result<(), RpcError> {
        let args = DeviceSrqParms {
            handle: Opaque(handle.to_vec()),
        };
        self.client.call_no_reply(device_intr_srq, args).await
    }
}

/// Interrupt channel of a server, at most one is established at a time
#[derive(Default)]
pub(crate) struct IntrChannel {
    client: Mutex<Option<(SocketAddr, VxiSrqClient)>>,
}

impl IntrChannel {
    /// Establish the channel on behalf of the session connected from `owner`
    pub(crate) async fn create(&self, owner: SocketAddr, func: &DeviceRemoteFunc) -> DeviceErrorCode {
        let mut client = self.client.lock().await;
        if client.is_some() {
            return DeviceErrorCode::ChannelAlreadyEstablished;
        }
        match timeout(CONNECT_TIMEOUT, VxiSrqClient::connect(func)).await {
            Ok(Ok(c)) => {
                log::debug!(peer=format!("{}", owner), addr=format!("{}", c.addr); "Interrupt channel established");
                client.replace((owner, c));
                DeviceErrorCode::NoError
            }
            Ok(Err(err)) => {
                log::warn!(peer=format!("{}", owner); "Failed to establish interrupt channel: {}", err);
                DeviceErrorCode::ChannelNotEstablished
            }
            Err(_) => {
                log::warn!(peer=format!("{}", owner); "Timed out establishing interrupt channel");
                DeviceErrorCode::ChannelNotEstablished
            }
        }
    }

    pub(crate) async fn destroy(&self) -> DeviceErrorCode {
        match self.client.lock().await.take() {
            Some((_, c)) => {
                log::debug!(addr=format!("{}", c.addr); "Interrupt channel closed");
                DeviceErrorCode::NoError
            }
            None => DeviceErrorCode::ChannelNotEstablished,
        }
    }

    /// Close the channel if it was established by the session connected from `owner`
    pub(crate) async fn release(&self, owner: SocketAddr) {
        let mut client = self.client.lock().await;
        if matches!(&*client, Some((o, _)) if *o == owner) {
            client.take();
            log::debug!(peer=format!("{}", owner); "Interrupt channel released");
        }
    }

    /// Send a service request. Failures are only logged.
    pub(crate) async fn device_intr_srq(&self, handle: &[u8]) {
        let mut client = self.client.lock().await;
        match client.as_mut() {
            Some((_, c)) => {
                log::debug!(addr=format!("{}", c.addr); "Service request, handle={:?}", handle);
                if let Err(err) = c.device_intr_srq(handle).await {
                    log::warn!(addr=format!("{}", c.addr); "Failed to deliver service request: {}", err);
                }
            }
            None => log::debug!("Service request dropped, no interrupt channel"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddr};

    use async_std::net::TcpListener;

    use super::IntrChannel;
    use crate::common::vxi11::{
        xdr::{DeviceAddrFamily, DeviceErrorCode, DeviceRemoteFunc},
        DEVICE_INTR, DEVICE_INTR_VERSION,
    };

    fn remote(port: u16, prog_family: DeviceAddrFamily) -> DeviceRemoteFunc {
        DeviceRemoteFunc {
            host_addr: u32::from(Ipv4Addr::LOCALHOST),
            host_port: port as u32,
            prog_num: DEVICE_INTR,
            prog_vers: DEVICE_INTR_VERSION,
            prog_family,
        }
    }

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, port))
    }

    #[async_std::test]
    async fn single_channel() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let intr = IntrChannel::default();

        assert_eq!(intr.destroy().await, DeviceErrorCode::ChannelNotEstablished);
        let func = remote(port, DeviceAddrFamily::Tcp);
        assert_eq!(intr.create(peer(1), &func).await, DeviceErrorCode::NoError);
        assert_eq!(
            intr.create(peer(2), &func).await,
            DeviceErrorCode::ChannelAlreadyEstablished
        );

        // Only the owner releases the channel
        intr.release(peer(2)).await;
        assert_eq!(intr.destroy().await, DeviceErrorCode::NoError);
        assert_eq!(intr.create(peer(2), &func).await, DeviceErrorCode::NoError);
        intr.release(peer(2)).await;
        assert_eq!(intr.destroy().await, DeviceErrorCode::ChannelNotEstablished);
    }

    #[async_std::test]
    async fn unsupported_family() {
        let intr = IntrChannel::default();
        assert_eq!(
            intr.create(peer(1), &remote(1234, DeviceAddrFamily::Other(7))).await,
            DeviceErrorCode::ChannelNotEstablished
        );
        assert_eq!(intr.destroy().await, DeviceErrorCode::ChannelNotEstablished);
    }
}
