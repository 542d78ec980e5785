//! ONC-RPC transport, see [RFC5531](https://datatracker.ietf.org/doc/html/rfc5531)

use std::{
    fmt,
    io::{self, Cursor, Error, ErrorKind},
    sync::Arc,
};

use async_std::net::{TcpStream, UdpSocket};
use async_trait::async_trait;
use futures::{AsyncRead, AsyncWrite};

use crate::common::xdr::{
    basic::{XdrDecode, XdrEncode},
    onc_rpc::{
        AcceptStat, AuthFlavour, MsgType, ReplyStat, RpcMessage, RPC_VERSION,
    },
};

pub use crate::common::xdr::onc_rpc::{AuthStat, MissmatchInfo};
pub(crate) use record::DEFAULT_MAX_RECORD;
use record::{read_record, write_record};

mod record;

/// An error which occured during an RPC call
#[derive(Debug)]
pub enum RpcError {
    /// Program not available
    ProgUnavail,
    /// Program version not available (see accepted version low-high in [MissmatchInfo])
    ProgMissmatch(MissmatchInfo),
    /// Procedure not available
    ProcUnavail,
    /// Arguments have too many or too few bytes to deserialize
    GarbageArgs,
    /// Internal error
    SystemErr,
    /// RPC version not supported
    RpcMissmatch(MissmatchInfo),
    /// Error during RPC authentication
    AuthError(AuthStat),
    /// (De-)serialiation error on RPC channel
    Io(Error),
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::ProgUnavail => write!(f, "program unavailable"),
            RpcError::ProgMissmatch(m) => {
                write!(f, "program version mismatch, supported {}-{}", m.low, m.high)
            }
            RpcError::ProcUnavail => write!(f, "procedure unavailable"),
            RpcError::GarbageArgs => write!(f, "garbage arguments"),
            RpcError::SystemErr => write!(f, "system error"),
            RpcError::RpcMissmatch(m) => {
                write!(f, "rpc version mismatch, supported {}-{}", m.low, m.high)
            }
            RpcError::AuthError(stat) => write!(f, "authentication error {:?}", stat),
            RpcError::Io(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for RpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RpcError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<Error> for RpcError {
    fn from(err: Error) -> Self {
        Self::Io(err)
    }
}

/// Decode procedure arguments, undecodable arguments are [RpcError::GarbageArgs]
pub(crate) fn decode_args<T>(args: &mut Cursor<Vec<u8>>) -> Result<T, RpcError>
where
    T: XdrDecode + Default,
{
    let mut t = T::default();
    t.read_xdr(args).map_err(|err| {
        log::debug!("Failed to decode arguments: {}", err);
        RpcError::GarbageArgs
    })?;
    Ok(t)
}

/// A program served over ONC-RPC.
#[async_trait]
pub trait RpcService {
    /// Serve calls from a stream until it is closed
    async fn serve_tcp_stream(self: Arc<Self>, mut stream: TcpStream) -> io::Result<()>
    where
        Self: Send + Sync,
    {
        loop {
            let fragment = match read_record(&mut stream, DEFAULT_MAX_RECORD).await {
                Ok(fragment) => fragment,
                Err(err) if err.kind() == ErrorKind::UnexpectedEof => break Ok(()),
                Err(err) => break Err(err),
            };

            let reply = self.clone().handle_message(fragment).await?;

            write_record(&mut stream, &reply).await?;
        }
    }

    /// Serve one-way calls from a stream until it is closed, replies are discarded
    async fn serve_tcp_stream_noreply(self: Arc<Self>, mut stream: TcpStream) -> io::Result<()>
    where
        Self: Send + Sync,
    {
        loop {
            let fragment = match read_record(&mut stream, DEFAULT_MAX_RECORD).await {
                Ok(fragment) => fragment,
                Err(err) if err.kind() == ErrorKind::UnexpectedEof => break Ok(()),
                Err(err) => break Err(err),
            };

            let _reply = self.clone().handle_message(fragment).await?;
        }
    }

    /// Serve one-way calls from a datagram socket, replies are discarded
    async fn serve_udp_socket_noreply(self: Arc<Self>, socket: UdpSocket) -> io::Result<()>
    where
        Self: Send + Sync,
    {
        let mut buf = vec![0; 65536];
        loop {
            let (n, peer) = socket.recv_from(&mut buf).await?;
            if let Err(err) = self.clone().handle_message(buf[..n].to_vec()).await {
                log::debug!("Invalid message from {}: {}", peer, err);
            }
        }
    }

    /// Validate a call message, dispatch it to [RpcService::call] and build the reply
    async fn handle_message(self: Arc<Self>, data_in: Vec<u8>) -> Result<Vec<u8>, Error>
    where
        Self: Send + Sync,
    {
        let mut args = Cursor::new(data_in);
        let mut msg = RpcMessage::default();
        msg.read_xdr(&mut args)?;
        log::trace!("-> {:?}", msg);

        let call = match msg.mtype {
            MsgType::Call(call) => call,
            MsgType::Reply(_) => {
                return Err(Error::new(ErrorKind::InvalidData, "expected a call"));
            }
        };

        let mut ret = Cursor::new(Vec::new());
        let stat = if call.rpc_vers != RPC_VERSION {
            ReplyStat::RpcMissmatch(MissmatchInfo {
                low: RPC_VERSION,
                high: RPC_VERSION,
            })
        } else if call.cred.flavour != AuthFlavour::None {
            ReplyStat::AuthError(AuthStat::RejectedCred)
        } else if call.verf.flavour != AuthFlavour::None {
            ReplyStat::AuthError(AuthStat::RejectedVerf)
        } else {
            let res = self
                .call(call.prog, call.vers, call.proc, &mut args, &mut ret)
                .await;
            ReplyStat::accepted(match res {
                Ok(()) => AcceptStat::Success,
                Err(RpcError::ProgUnavail) => AcceptStat::ProgUnavail,
                Err(RpcError::ProgMissmatch(m)) => AcceptStat::ProgMissmatch(m),
                Err(RpcError::ProcUnavail) => AcceptStat::ProcUnavail,
                Err(RpcError::GarbageArgs) => AcceptStat::GarbageArgs,
                Err(RpcError::Io(err)) => return Err(err),
                Err(err) => {
                    log::error!("Call failed: {}", err);
                    AcceptStat::SystemErr
                }
            })
        };

        let success = matches!(
            stat,
            ReplyStat::Accepted {
                stat: AcceptStat::Success,
                ..
            }
        );
        let reply = RpcMessage::reply(msg.xid, stat);
        log::trace!("<- {:?}", reply);

        let mut data_out = Cursor::new(Vec::new());
        reply.write_xdr(&mut data_out)?;
        let mut data_out = data_out.into_inner();
        if success {
            data_out.extend_from_slice(ret.get_ref());
        }
        Ok(data_out)
    }

    /// Execute procedure `proc` of program `prog`, version `vers`.
    ///
    /// Arguments are decoded from `args` and results encoded into `ret`.
    async fn call(
        self: Arc<Self>,
        prog: u32,
        vers: u32,
        proc: u32,
        args: &mut Cursor<Vec<u8>>,
        ret: &mut Cursor<Vec<u8>>,
    ) -> Result<(), RpcError>;
}

fn build_call<ARGS>(xid: u32, prog: u32, vers: u32, proc: u32, args: &ARGS) -> io::Result<Vec<u8>>
where
    ARGS: XdrEncode,
{
    let mut cursor = Cursor::new(Vec::new());
    RpcMessage::call(xid, prog, vers, proc).write_xdr(&mut cursor)?;
    args.write_xdr(&mut cursor)?;
    Ok(cursor.into_inner())
}

fn parse_reply<RET>(xid: u32, data: Vec<u8>) -> Result<RET, RpcError>
where
    RET: XdrDecode + Default,
{
    let mut cursor = Cursor::new(data);
    let mut reply = RpcMessage::default();
    reply.read_xdr(&mut cursor)?;
    if reply.xid != xid {
        return Err(Error::new(ErrorKind::InvalidData, "unexpected xid").into());
    }
    match reply.mtype {
        MsgType::Reply(ReplyStat::Accepted { stat, .. }) => match stat {
            AcceptStat::Success => {
                let mut ret = RET::default();
                ret.read_xdr(&mut cursor)?;
                Ok(ret)
            }
            AcceptStat::ProgUnavail => Err(RpcError::ProgUnavail),
            AcceptStat::ProgMissmatch(m) => Err(RpcError::ProgMissmatch(m)),
            AcceptStat::ProcUnavail => Err(RpcError::ProcUnavail),
            AcceptStat::GarbageArgs => Err(RpcError::GarbageArgs),
            AcceptStat::SystemErr => Err(RpcError::SystemErr),
        },
        MsgType::Reply(ReplyStat::RpcMissmatch(m)) => Err(RpcError::RpcMissmatch(m)),
        MsgType::Reply(ReplyStat::AuthError(stat)) => Err(RpcError::AuthError(stat)),
        MsgType::Call(_) => Err(Error::new(ErrorKind::InvalidData, "expected a reply").into()),
    }
}

pub(crate) struct UdpRpcClient {
    xid: u32,
    prog: u32,
    vers: u32,
    socket: UdpSocket,
}

impl UdpRpcClient {
    /// `socket` must be connected to the server
    pub(crate) fn new(prog: u32, vers: u32, socket: UdpSocket) -> Self {
        Self {
            xid: 0,
            prog,
            vers,
            socket,
        }
    }

    /// Call procedure `proc` without waiting for a reply
    pub(crate) async fn call_no_reply<ARGS>(
        &mut self,
        proc: u32,
        args: ARGS,
    ) -> Result<(), RpcError>
    where
        ARGS: XdrEncode,
    {
        self.xid = self.xid.wrapping_add(1);
        let msg = build_call(self.xid, self.prog, self.vers, proc, &args)?;
        self.socket.send(&msg).await?;
        Ok(())
    }
}

pub(crate) struct StreamRpcClient<IO> {
    xid: u32,
    prog: u32,
    vers: u32,
    io: IO,
}

impl<IO> StreamRpcClient<IO> {
    pub(crate) fn new(io: IO, prog: u32, vers: u32) -> Self {
        Self {
            xid: 0,
            io,
            prog,
            vers,
        }
    }

    pub(crate) fn get_ref(&self) -> &IO {
        &self.io
    }
}

impl<IO> StreamRpcClient<IO>
where
    IO: AsyncRead + AsyncWrite + Unpin,
{
    /// Call procedure `proc` with arguments of type `ARGS`. Returns `Ok(RET)` if successfull.
    pub(crate) async fn call<ARGS, RET>(&mut self, proc: u32, args: ARGS) -> Result<RET, RpcError>
    where
        ARGS: XdrEncode,
        RET: XdrDecode + Default,
    {
        self.xid = self.xid.wrapping_add(1);
        let msg = build_call(self.xid, self.prog, self.vers, proc, &args)?;
        write_record(&mut self.io, &msg).await?;

        let fragment = read_record(&mut self.io, DEFAULT_MAX_RECORD).await?;
        parse_reply(self.xid, fragment)
    }

    /// Call procedure `proc` without waiting for a reply
    pub(crate) async fn call_no_reply<ARGS>(
        &mut self,
        proc: u32,
        args: ARGS,
    ) -> Result<(), RpcError>
    where
        ARGS: XdrEncode,
    {
        self.xid = self.xid.wrapping_add(1);
        let msg = build_call(self.xid, self.prog, self.vers, proc, &args)?;
        write_record(&mut self.io, &msg).await?;
        Ok(())
    }
}

pub(crate) enum RpcClient {
    Udp(UdpRpcClient),
    Tcp(StreamRpcClient<TcpStream>),
}

impl RpcClient {
    /// Call procedure `proc` without waiting for a reply
    pub(crate) async fn call_no_reply<ARGS>(
        &mut self,
        proc: u32,
        args: ARGS,
    ) -> Result<(), RpcError>
    where
        ARGS: XdrEncode,
    {
        match self {
            RpcClient::Udp(client) => client.call_no_reply(proc, args).await,
            RpcClient::Tcp(client) => client.call_no_reply(proc, args).await,
        }
    }
}
