//! Message envelope of [RFC5531](https://datatracker.ietf.org/doc/html/rfc5531)

use std::io::{Error, ErrorKind, Read, Result, Write};

use super::basic::{Opaque, XdrDecode, XdrEncode};

pub(crate) const RPC_VERSION: u32 = 2;

fn bad_discriminant(what: &str, value: u32) -> Error {
    Error::new(
        ErrorKind::InvalidData,
        format!("invalid {what} discriminant {value}"),
    )
}

fn read_u32<RD: Read>(reader: &mut RD) -> Result<u32> {
    let mut v = 0u32;
    v.read_xdr(reader)?;
    Ok(v)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MissmatchInfo {
    pub low: u32,
    pub high: u32,
}

impl XdrEncode for MissmatchInfo {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        self.low.write_xdr(writer)?;
        self.high.write_xdr(writer)
    }
}

impl XdrDecode for MissmatchInfo {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        self.low.read_xdr(reader)?;
        self.high.read_xdr(reader)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum AuthFlavour {
    #[default]
    None,
    Sys,
    Short,
    Other(u32),
}

impl From<u32> for AuthFlavour {
    fn from(v: u32) -> Self {
        match v {
            0 => Self::None,
            1 => Self::Sys,
            2 => Self::Short,
            x => Self::Other(x),
        }
    }
}

impl From<AuthFlavour> for u32 {
    fn from(f: AuthFlavour) -> Self {
        match f {
            AuthFlavour::None => 0,
            AuthFlavour::Sys => 1,
            AuthFlavour::Short => 2,
            AuthFlavour::Other(x) => x,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct OpaqueAuth {
    pub flavour: AuthFlavour,
    pub body: Opaque,
}

impl XdrEncode for OpaqueAuth {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        u32::from(self.flavour).write_xdr(writer)?;
        self.body.write_xdr(writer)
    }
}

impl XdrDecode for OpaqueAuth {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        self.flavour = read_u32(reader)?.into();
        self.body.read_xdr(reader)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStat {
    Ok,
    BadCred,
    RejectedCred,
    BadVerf,
    RejectedVerf,
    TooWeak,
    InvalidResp,
    Failed,
}

impl AuthStat {
    const ALL: [AuthStat; 8] = [
        Self::Ok,
        Self::BadCred,
        Self::RejectedCred,
        Self::BadVerf,
        Self::RejectedVerf,
        Self::TooWeak,
        Self::InvalidResp,
        Self::Failed,
    ];
}

/// Body of a call, procedure arguments follow
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct Callbody {
    pub rpc_vers: u32,
    pub prog: u32,
    pub vers: u32,
    pub proc: u32,
    pub cred: OpaqueAuth,
    pub verf: OpaqueAuth,
}

impl XdrEncode for Callbody {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        self.rpc_vers.write_xdr(writer)?;
        self.prog.write_xdr(writer)?;
        self.vers.write_xdr(writer)?;
        self.proc.write_xdr(writer)?;
        self.cred.write_xdr(writer)?;
        self.verf.write_xdr(writer)
    }
}

impl XdrDecode for Callbody {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        self.rpc_vers.read_xdr(reader)?;
        self.prog.read_xdr(reader)?;
        self.vers.read_xdr(reader)?;
        self.proc.read_xdr(reader)?;
        self.cred.read_xdr(reader)?;
        self.verf.read_xdr(reader)
    }
}

/// Status of an accepted call, results follow on `Success`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AcceptStat {
    #[default]
    Success,
    ProgUnavail,
    ProgMissmatch(MissmatchInfo),
    ProcUnavail,
    GarbageArgs,
    SystemErr,
}

/// Reply to a call
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReplyStat {
    Accepted { verf: OpaqueAuth, stat: AcceptStat },
    RpcMissmatch(MissmatchInfo),
    AuthError(AuthStat),
}

impl Default for ReplyStat {
    fn default() -> Self {
        Self::accepted(AcceptStat::Success)
    }
}

impl ReplyStat {
    pub(crate) fn accepted(stat: AcceptStat) -> Self {
        Self::Accepted {
            verf: OpaqueAuth::default(),
            stat,
        }
    }
}

impl XdrEncode for ReplyStat {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        match self {
            ReplyStat::Accepted { verf, stat } => {
                0u32.write_xdr(writer)?;
                verf.write_xdr(writer)?;
                match stat {
                    AcceptStat::Success => 0u32.write_xdr(writer),
                    AcceptStat::ProgUnavail => 1u32.write_xdr(writer),
                    AcceptStat::ProgMissmatch(info) => {
                        2u32.write_xdr(writer)?;
                        info.write_xdr(writer)
                    }
                    AcceptStat::ProcUnavail => 3u32.write_xdr(writer),
                    AcceptStat::GarbageArgs => 4u32.write_xdr(writer),
                    AcceptStat::SystemErr => 5u32.write_xdr(writer),
                }
            }
            ReplyStat::RpcMissmatch(info) => {
                1u32.write_xdr(writer)?;
                0u32.write_xdr(writer)?;
                info.write_xdr(writer)
            }
            ReplyStat::AuthError(stat) => {
                1u32.write_xdr(writer)?;
                1u32.write_xdr(writer)?;
                (*stat as u32).write_xdr(writer)
            }
        }
    }
}

impl XdrDecode for ReplyStat {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        *self = match read_u32(reader)? {
            0 => {
                let mut verf = OpaqueAuth::default();
                verf.read_xdr(reader)?;
                let stat = match read_u32(reader)? {
                    0 => AcceptStat::Success,
                    1 => AcceptStat::ProgUnavail,
                    2 => {
                        let mut info = MissmatchInfo::default();
                        info.read_xdr(reader)?;
                        AcceptStat::ProgMissmatch(info)
                    }
                    3 => AcceptStat::ProcUnavail,
                    4 => AcceptStat::GarbageArgs,
                    5 => AcceptStat::SystemErr,
                    x => return Err(bad_discriminant("accept_stat", x)),
                };
                Self::Accepted { verf, stat }
            }
            1 => match read_u32(reader)? {
                0 => {
                    let mut info = MissmatchInfo::default();
                    info.read_xdr(reader)?;
                    Self::RpcMissmatch(info)
                }
                1 => {
                    let x = read_u32(reader)?;
                    let stat = AuthStat::ALL
                        .get(x as usize)
                        .copied()
                        .ok_or_else(|| bad_discriminant("auth_stat", x))?;
                    Self::AuthError(stat)
                }
                x => return Err(bad_discriminant("reject_stat", x)),
            },
            x => return Err(bad_discriminant("reply_stat", x)),
        };
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MsgType {
    Call(Callbody),
    Reply(ReplyStat),
}

impl Default for MsgType {
    fn default() -> Self {
        Self::Call(Callbody::default())
    }
}

/// A Rpc call or reply
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct RpcMessage {
    pub xid: u32,
    pub mtype: MsgType,
}

impl RpcMessage {
    pub(crate) fn call(xid: u32, prog: u32, vers: u32, proc: u32) -> Self {
        Self {
            xid,
            mtype: MsgType::Call(Callbody {
                rpc_vers: RPC_VERSION,
                prog,
                vers,
                proc,
                cred: OpaqueAuth::default(),
                verf: OpaqueAuth::default(),
            }),
        }
    }

    pub(crate) fn reply(xid: u32, stat: ReplyStat) -> Self {
        Self {
            xid,
            mtype: MsgType::Reply(stat),
        }
    }
}

impl XdrEncode for RpcMessage {
    fn write_xdr<WR>(&self, writer: &mut WR) -> Result<()>
    where
        WR: Write,
    {
        self.xid.write_xdr(writer)?;
        match &self.mtype {
            MsgType::Call(body) => {
                0u32.write_xdr(writer)?;
                body.write_xdr(writer)
            }
            MsgType::Reply(stat) => {
                1u32.write_xdr(writer)?;
                stat.write_xdr(writer)
            }
        }
    }
}

impl XdrDecode for RpcMessage {
    fn read_xdr<RD>(&mut self, reader: &mut RD) -> Result<()>
    where
        RD: Read,
    {
        self.xid.read_xdr(reader)?;
        self.mtype = match read_u32(reader)? {
            0 => {
                let mut body = Callbody::default();
                body.read_xdr(reader)?;
                MsgType::Call(body)
            }
            1 => {
                let mut stat = ReplyStat::default();
                stat.read_xdr(reader)?;
                MsgType::Reply(stat)
            }
            x => return Err(bad_discriminant("msg_type", x)),
        };
        Ok(())
    }
}
