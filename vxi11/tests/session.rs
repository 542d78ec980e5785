use std::{
    io::Cursor,
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

use async_std::{net::TcpListener, task};
use futures::lock::Mutex;
use lxi_device::{
    status::Sender,
    util::{SimulatedDevice, DEFAULT_IDN},
    STB_MAV,
};
use lxi_vxi11::{
    common::{
        onc_rpc::RpcService,
        vxi11::{self, xdr::*},
        xdr::basic::{Opaque, XdrDecode, XdrEncode},
    },
    server::vxi11::{
        gpib::{BUS_STATUS_REMOTE, CMD_BUS_STATUS, CMD_SEND_COMMAND},
        prelude::*,
    },
};

type Session = Arc<VxiCoreSession<SimulatedDevice>>;

struct Fixture {
    core: Arc<VxiCoreServer<SimulatedDevice>>,
    abort: Arc<VxiAsyncServer<SimulatedDevice>>,
    device: Arc<Mutex<SimulatedDevice>>,
}

impl Fixture {
    fn new(device: SimulatedDevice) -> Self {
        let device = device.into_arc();
        let (core, abort) = VxiServerBuilder::new()
            .device("inst0".parse().unwrap(), device.clone(), Sender::new())
            .device(
                "gpib0,3".parse().unwrap(),
                SimulatedDevice::new_arc(),
                Sender::new(),
            )
            .build();
        Self {
            core,
            abort,
            device,
        }
    }

    fn session(&self, port: u16) -> Session {
        self.core
            .new_session(SocketAddr::from((Ipv4Addr::LOCALHOST, port)))
    }
}

async fn call<ARGS, RET>(session: &Session, proc: u32, args: ARGS) -> RET
where
    ARGS: XdrEncode,
    RET: XdrDecode + Default,
{
    let mut buf = Vec::new();
    args.write_xdr(&mut buf).unwrap();
    let mut args = Cursor::new(buf);
    let mut ret = Cursor::new(Vec::new());
    session
        .clone()
        .call(DEVICE_CORE, DEVICE_CORE_VERSION, proc, &mut args, &mut ret)
        .await
        .unwrap();
    ret.set_position(0);
    let mut resp = RET::default();
    resp.read_xdr(&mut ret).unwrap();
    resp
}

async fn create_link(session: &Session, device: &str, lock_device: bool) -> CreateLinkResp {
    call(
        session,
        vxi11::create_link,
        CreateLinkParms {
            client_id: 1,
            lock_device,
            lock_timeout: 0,
            device: device.to_string(),
        },
    )
    .await
}

async fn write(session: &Session, lid: DeviceLink, data: &[u8], flags: i32) -> DeviceWriteResp {
    call(
        session,
        vxi11::device_write,
        DeviceWriteParms {
            lid,
            io_timeout: 50,
            lock_timeout: 0,
            flags: DeviceFlags(flags),
            data: Opaque::from(data),
        },
    )
    .await
}

async fn read(
    session: &Session,
    lid: DeviceLink,
    request_size: u32,
    term_char: Option<u8>,
) -> DeviceReadResp {
    let flags = term_char.map_or(0, |_| OP_FLAG_TERMCHAR_SET);
    call(
        session,
        vxi11::device_read,
        DeviceReadParms {
            lid,
            request_size,
            io_timeout: 50,
            lock_timeout: 0,
            flags: DeviceFlags(flags),
            term_char: term_char.unwrap_or_default(),
        },
    )
    .await
}

#[async_std::test]
async fn identification_query() {
    femme::with_level(log::LevelFilter::Debug);
    let fixture = Fixture::new(SimulatedDevice::new());
    let session = fixture.session(1000);

    let link = create_link(&session, "gpib0,3", false).await;
    assert_eq!(link.error, DeviceErrorCode::NoError);
    assert_eq!(link.lid, 0);
    assert_eq!(link.abort_port, 4323);
    assert!(link.max_recv_size > 0);

    let resp = write(&session, link.lid, b"*IDN?\n", OP_FLAG_END).await;
    assert_eq!(resp.error, DeviceErrorCode::NoError);
    assert_eq!(resp.size, 6);

    let resp = read(&session, link.lid, 1024, None).await;
    assert_eq!(resp.error, DeviceErrorCode::NoError);
    assert_eq!(resp.reason, RX_END);
    assert_eq!(&resp.data[..], DEFAULT_IDN);

    let destroyed: DeviceError = call(&session, vxi11::destroy_link, link.lid).await;
    assert_eq!(destroyed.error, DeviceErrorCode::NoError);
    assert_eq!(fixture.core.active_links().await, 0);
}

#[async_std::test]
async fn read_stops_at_termchar() {
    let fixture = Fixture::new(SimulatedDevice::new().with_response(b"DATA?", b"AB\nCD"));
    let session = fixture.session(1000);
    let lid = create_link(&session, "inst0", false).await.lid;

    write(&session, lid, b"DATA?", OP_FLAG_END).await;

    let first = read(&session, lid, 100, Some(b'\n')).await;
    assert_eq!(first.error, DeviceErrorCode::NoError);
    assert_eq!(first.reason, RX_CHR);
    assert_eq!(&first.data[..], b"AB\n");

    let second = read(&session, lid, 100, Some(b'\n')).await;
    assert_eq!(second.reason, RX_END);
    assert_eq!(&second.data[..], b"CD");
}

#[async_std::test]
async fn read_request_count() {
    let fixture = Fixture::new(SimulatedDevice::new().with_response(b"DATA?", b"0123456789"));
    let session = fixture.session(1000);
    let lid = create_link(&session, "inst0", false).await.lid;

    let empty = read(&session, lid, 0, None).await;
    assert_eq!(empty.error, DeviceErrorCode::NoError);
    assert_eq!(empty.reason, RX_REQCNT);
    assert!(empty.data.is_empty());

    write(&session, lid, b"DATA?", OP_FLAG_END).await;
    let part = read(&session, lid, 4, None).await;
    assert_eq!(part.reason, RX_REQCNT);
    assert_eq!(&part.data[..], b"0123");

    // Buffered data is reported as message available
    let stb: DeviceReadStbResp = call(
        &session,
        vxi11::device_readstb,
        DeviceGenericParms {
            lid,
            ..Default::default()
        },
    )
    .await;
    assert_eq!(stb.error, DeviceErrorCode::NoError);
    assert_eq!(stb.stb & STB_MAV, STB_MAV);

    let rest = read(&session, lid, 100, None).await;
    assert_eq!(rest.reason, RX_END);
    assert_eq!(&rest.data[..], b"456789");
}

#[async_std::test]
async fn read_timeout_without_data() {
    let fixture = Fixture::new(SimulatedDevice::new());
    let session = fixture.session(1000);
    let lid = create_link(&session, "inst0", false).await.lid;

    let resp = read(&session, lid, 100, None).await;
    assert_eq!(resp.error, DeviceErrorCode::IoTimeout);
    assert!(resp.data.is_empty());
}

#[async_std::test]
async fn write_timeout_reports_partial_size() {
    let fixture = Fixture::new(SimulatedDevice::new().with_write_limit(Some(0)));
    let session = fixture.session(1000);
    let lid = create_link(&session, "inst0", false).await.lid;

    let resp = write(&session, lid, b"*RST\n", OP_FLAG_END).await;
    assert_eq!(resp.error, DeviceErrorCode::IoTimeout);
    assert_eq!(resp.size, 0);
}

#[async_std::test]
async fn invalid_links() {
    let fixture = Fixture::new(SimulatedDevice::new());
    let session = fixture.session(1000);

    let resp = create_link(&session, "inst7", false).await;
    assert_eq!(resp.error, DeviceErrorCode::InvalidAddress);
    let resp = create_link(&session, "bogus", false).await;
    assert_eq!(resp.error, DeviceErrorCode::InvalidAddress);

    let resp: DeviceError = call(&session, vxi11::destroy_link, 1234).await;
    assert_eq!(resp.error, DeviceErrorCode::InvalidLinkIdentifier);

    let resp = write(&session, 1234, b"*RST\n", OP_FLAG_END).await;
    assert_eq!(resp.error, DeviceErrorCode::InvalidLinkIdentifier);

    // A link of another session is not usable
    let lid = create_link(&session, "inst0", false).await.lid;
    let other = fixture.session(1001);
    let resp = read(&other, lid, 10, None).await;
    assert_eq!(resp.error, DeviceErrorCode::InvalidLinkIdentifier);
}

#[async_std::test]
async fn lock_is_exclusive() {
    let fixture = Fixture::new(SimulatedDevice::new());
    let first = fixture.session(1000);
    let second = fixture.session(1001);

    let locked = create_link(&first, "inst0", true).await;
    assert_eq!(locked.error, DeviceErrorCode::NoError);
    assert!(fixture.core.is_locked(&"inst0".parse().unwrap()).await);

    // Creating a locking link fails without leaving a link behind
    let failed = create_link(&second, "inst0", true).await;
    assert_eq!(failed.error, DeviceErrorCode::DeviceLockedByAnotherLink);
    assert_eq!(fixture.core.active_links().await, 1);

    let lid = create_link(&second, "inst0", false).await.lid;
    let resp = write(&second, lid, b"*RST\n", OP_FLAG_END).await;
    assert_eq!(resp.error, DeviceErrorCode::DeviceLockedByAnotherLink);

    let resp: DeviceError = call(&second, vxi11::device_unlock, lid).await;
    assert_eq!(resp.error, DeviceErrorCode::NoLockHeldByThisLink);

    let lock_parms = DeviceLockParms {
        lid,
        flags: DeviceFlags(0),
        lock_timeout: 0,
    };
    let resp: DeviceError = call(&second, vxi11::device_lock, lock_parms.clone()).await;
    assert_eq!(resp.error, DeviceErrorCode::DeviceLockedByAnotherLink);

    // Destroying the link releases the lock
    let resp: DeviceError = call(&first, vxi11::destroy_link, locked.lid).await;
    assert_eq!(resp.error, DeviceErrorCode::NoError);
    let resp: DeviceError = call(&second, vxi11::device_lock, lock_parms).await;
    assert_eq!(resp.error, DeviceErrorCode::NoError);
    let resp: DeviceError = call(&second, vxi11::device_unlock, lid).await;
    assert_eq!(resp.error, DeviceErrorCode::NoError);
    assert!(!fixture.core.is_locked(&"inst0".parse().unwrap()).await);
}

#[async_std::test]
async fn closing_session_releases_links() {
    let fixture = Fixture::new(SimulatedDevice::new());
    let session = fixture.session(1000);

    create_link(&session, "inst0", true).await;
    create_link(&session, "gpib0,3", false).await;
    assert_eq!(fixture.core.active_links().await, 2);

    session.close().await;
    assert_eq!(fixture.core.active_links().await, 0);
    assert!(!fixture.core.is_locked(&"inst0".parse().unwrap()).await);
}

#[async_std::test]
async fn abort_idle_link() {
    let fixture = Fixture::new(SimulatedDevice::new());
    let session = fixture.session(1000);
    let lid = create_link(&session, "inst0", false).await.lid;

    assert_eq!(fixture.abort.device_abort(lid).await, DeviceErrorCode::NoError);
    assert_eq!(fixture.abort.device_abort(lid).await, DeviceErrorCode::NoError);
    assert_eq!(
        fixture.abort.device_abort(lid + 100).await,
        DeviceErrorCode::InvalidLinkIdentifier
    );

    // Aborting an idle link does not affect the next operation
    let resp = write(&session, lid, b"*RST\n", OP_FLAG_END).await;
    assert_eq!(resp.error, DeviceErrorCode::NoError);
}

#[async_std::test]
async fn generic_operations() {
    let fixture = Fixture::new(SimulatedDevice::new());
    let session = fixture.session(1000);
    let lid = create_link(&session, "inst0", false).await.lid;
    let parms = DeviceGenericParms {
        lid,
        ..Default::default()
    };

    let resp: DeviceError = call(&session, vxi11::device_trigger, parms.clone()).await;
    assert_eq!(resp.error, DeviceErrorCode::NoError);
    let resp: DeviceError = call(&session, vxi11::device_remote, parms.clone()).await;
    assert_eq!(resp.error, DeviceErrorCode::NoError);
    assert!(fixture.device.lock().await.is_remote());
    let resp: DeviceError = call(&session, vxi11::device_local, parms.clone()).await;
    assert_eq!(resp.error, DeviceErrorCode::NoError);
    assert!(!fixture.device.lock().await.is_remote());

    write(&session, lid, b"*IDN?\n", OP_FLAG_END).await;
    let resp: DeviceError = call(&session, vxi11::device_clear, parms).await;
    assert_eq!(resp.error, DeviceErrorCode::NoError);

    let dev = fixture.device.lock().await;
    assert_eq!(dev.trigger_count(), 1);
    assert_eq!(dev.clear_count(), 1);
}

#[async_std::test]
async fn parameter_errors() {
    let fixture = Fixture::new(SimulatedDevice::new());
    let session = fixture.session(1000);
    let lid = create_link(&session, "gpib0,3", false).await.lid;

    let resp: DeviceError = call(
        &session,
        vxi11::device_enable_srq,
        DeviceEnableSrqParms {
            lid,
            enable: true,
            handle: Opaque(vec![0; MAX_SRQ_HANDLE + 1]),
        },
    )
    .await;
    assert_eq!(resp.error, DeviceErrorCode::ParameterError);

    let resp: DeviceDocmdResp = call(
        &session,
        vxi11::device_docmd,
        DeviceDocmdParms {
            lid,
            cmd: CMD_SEND_COMMAND,
            network_order: true,
            datasize: 2,
            data_in: Opaque(vec![0; 3]),
            ..Default::default()
        },
    )
    .await;
    assert_eq!(resp.error, DeviceErrorCode::ParameterError);
}

#[async_std::test]
async fn gpib_bus_status() {
    let fixture = Fixture::new(SimulatedDevice::new());
    let session = fixture.session(1000);
    let lid = create_link(&session, "gpib0,3", false).await.lid;

    let resp: DeviceDocmdResp = call(
        &session,
        vxi11::device_docmd,
        DeviceDocmdParms {
            lid,
            cmd: CMD_BUS_STATUS,
            network_order: true,
            datasize: 2,
            data_in: Opaque(BUS_STATUS_REMOTE.to_be_bytes().to_vec()),
            ..Default::default()
        },
    )
    .await;
    assert_eq!(resp.error, DeviceErrorCode::NoError);
    assert_eq!(&resp.data_out[..], &[0, 0]);

    // Unknown command
    let resp: DeviceDocmdResp = call(
        &session,
        vxi11::device_docmd,
        DeviceDocmdParms {
            lid,
            cmd: 0x7777,
            ..Default::default()
        },
    )
    .await;
    assert_eq!(resp.error, DeviceErrorCode::OperationNotSupported);
}

#[async_std::test]
async fn intr_channel_is_shared_by_server() {
    let fixture = Fixture::new(SimulatedDevice::new());
    let first = fixture.session(1000);
    let second = fixture.session(1001);

    let resp: DeviceError = call(&first, vxi11::destroy_intr_chan, ()).await;
    assert_eq!(resp.error, DeviceErrorCode::ChannelNotEstablished);

    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let func = DeviceRemoteFunc {
        host_addr: u32::from(Ipv4Addr::LOCALHOST),
        host_port: listener.local_addr().unwrap().port() as u32,
        prog_num: DEVICE_INTR,
        prog_vers: DEVICE_INTR_VERSION,
        prog_family: DeviceAddrFamily::Tcp,
    };

    let resp: DeviceError = call(&first, vxi11::create_intr_chan, func.clone()).await;
    assert_eq!(resp.error, DeviceErrorCode::NoError);
    let resp: DeviceError = call(&second, vxi11::create_intr_chan, func.clone()).await;
    assert_eq!(resp.error, DeviceErrorCode::ChannelAlreadyEstablished);

    // Closing the session which created the channel frees it
    first.close().await;
    let resp: DeviceError = call(&second, vxi11::create_intr_chan, func).await;
    assert_eq!(resp.error, DeviceErrorCode::NoError);
    let resp: DeviceError = call(&second, vxi11::destroy_intr_chan, ()).await;
    assert_eq!(resp.error, DeviceErrorCode::NoError);
}

#[async_std::test]
async fn busy_link_is_not_accessible() {
    let fixture = Fixture::new(SimulatedDevice::new());
    let session = fixture.session(1000);
    let lid = create_link(&session, "inst0", false).await.lid;

    let reader = session.clone();
    let pending = task::spawn(async move {
        call::<_, DeviceReadResp>(
            &reader,
            vxi11::device_read,
            DeviceReadParms {
                lid,
                request_size: 10,
                io_timeout: 300,
                ..Default::default()
            },
        )
        .await
    });
    task::sleep(std::time::Duration::from_millis(50)).await;

    let resp = write(&session, lid, b"*RST\n", OP_FLAG_END).await;
    assert_eq!(resp.error, DeviceErrorCode::DeviceNotAccessible);

    // Aborting the pending read returns the link to idle
    assert_eq!(fixture.abort.device_abort(lid).await, DeviceErrorCode::NoError);
    let resp = pending.await;
    assert_eq!(resp.error, DeviceErrorCode::Abort);
    let resp = write(&session, lid, b"*RST\n", OP_FLAG_END).await;
    assert_eq!(resp.error, DeviceErrorCode::NoError);
}

#[async_std::test]
async fn device_clear_command_discards_buffered_data() {
    let fixture = Fixture::new(SimulatedDevice::new().with_response(b"DATA?", b"AB\nCD"));
    let session = fixture.session(1000);
    let lid = create_link(&session, "inst0", false).await.lid;

    write(&session, lid, b"DATA?", OP_FLAG_END).await;
    let first = read(&session, lid, 100, Some(b'\n')).await;
    assert_eq!(&first.data[..], b"AB\n");

    let resp: DeviceDocmdResp = call(
        &session,
        vxi11::device_docmd,
        DeviceDocmdParms {
            lid,
            cmd: CMD_SEND_COMMAND,
            network_order: true,
            datasize: 1,
            data_in: Opaque(vec![0x14]),
            ..Default::default()
        },
    )
    .await;
    assert_eq!(resp.error, DeviceErrorCode::NoError);

    let resp = read(&session, lid, 100, Some(b'\n')).await;
    assert_eq!(resp.error, DeviceErrorCode::IoTimeout);
    assert!(resp.data.is_empty());
}
