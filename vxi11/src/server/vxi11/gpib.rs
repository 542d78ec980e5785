//! GPIB sub-commands of `device_docmd`, see VXI-11 section B.5.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use lxi_device::{Device, STB_RQS};

use crate::common::vxi11::xdr::DeviceErrorCode;

use super::{address::GPIB_MAX_ADDRESS, link::ReadBuffer};

pub const CMD_SEND_COMMAND: i32 = 0x020000;
pub const CMD_BUS_STATUS: i32 = 0x020001;
pub const CMD_ATN_CTRL: i32 = 0x020002;
pub const CMD_REN_CTRL: i32 = 0x020003;
pub const CMD_PASS_CTRL: i32 = 0x020004;
pub const CMD_BUS_ADDRESS: i32 = 0x02000A;
pub const CMD_IFC_CTRL: i32 = 0x020010;

// Bus status selectors
pub const BUS_STATUS_REMOTE: u16 = 1;
pub const BUS_STATUS_SRQ: u16 = 2;
pub const BUS_STATUS_NDAC: u16 = 3;
pub const BUS_STATUS_SYSTEM_CONTROLLER: u16 = 4;
pub const BUS_STATUS_CONTROLLER_IN_CHARGE: u16 = 5;
pub const BUS_STATUS_TALKER: u16 = 6;
pub const BUS_STATUS_LISTENER: u16 = 7;
pub const BUS_STATUS_BUS_ADDRESS: u16 = 8;

// IEEE 488.1 interface messages
const GTL: u8 = 0x01;
const SDC: u8 = 0x04;
const PPC: u8 = 0x05;
const GET: u8 = 0x08;
const TCT: u8 = 0x09;
const LLO: u8 = 0x11;
const DCL: u8 = 0x14;
const PPU: u8 = 0x15;
const LAD: u8 = 0x20;
const UNL: u8 = 0x3F;
const TAD: u8 = 0x40;
const UNT: u8 = 0x5F;

/// Bus state seen through one link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GpibState {
    /// Address of the device behind the link, if it is on a GPIB bus
    pub device_address: Option<u8>,
    /// Address of this controller
    pub bus_address: u8,
    pub listeners: u32,
    pub talker: Option<u8>,
    pub remote: bool,
    pub ren: bool,
    pub atn: bool,
    pub controller_in_charge: bool,
}

impl GpibState {
    pub fn new(device_address: Option<u8>) -> Self {
        Self {
            device_address,
            bus_address: 0,
            listeners: 0,
            talker: None,
            remote: false,
            ren: true,
            atn: false,
            controller_in_charge: true,
        }
    }

    pub fn is_listener(&self, addr: u8) -> bool {
        addr <= GPIB_MAX_ADDRESS && self.listeners & (1 << addr) != 0
    }

    /// Is the device behind this link addressed to listen?
    fn device_listens(&self) -> bool {
        self.device_address.map_or(false, |a| self.is_listener(a))
    }

    fn unaddress(&mut self) {
        self.listeners = 0;
        self.talker = None;
    }
}

fn read_u16(data: &[u8], network_order: bool) -> Result<u16, DeviceErrorCode> {
    let bytes = match data.len() {
        2 => data,
        // Accept a full XDR word
        4 if network_order => &data[2..],
        4 => &data[..2],
        _ => return Err(DeviceErrorCode::ParameterError),
    };
    Ok(if network_order {
        BigEndian::read_u16(bytes)
    } else {
        LittleEndian::read_u16(bytes)
    })
}

fn read_u32(data: &[u8], network_order: bool) -> Result<u32, DeviceErrorCode> {
    if data.len() != 4 {
        return Err(DeviceErrorCode::ParameterError);
    }
    Ok(if network_order {
        BigEndian::read_u32(data)
    } else {
        LittleEndian::read_u32(data)
    })
}

fn write_u16(value: u16, network_order: bool) -> Vec<u8> {
    let mut buf = [0; 2];
    if network_order {
        BigEndian::write_u16(&mut buf, value);
    } else {
        LittleEndian::write_u16(&mut buf, value);
    }
    buf.to_vec()
}

/// Execute GPIB command `cmd` with the link's device.
///
/// Returns the `data_out` of the call. Clearing the device also discards `rx`.
pub(crate) fn docmd<DEV>(
    state: &mut GpibState,
    rx: &mut ReadBuffer,
    dev: &mut DEV,
    cmd: i32,
    network_order: bool,
    data_in: &[u8],
) -> Result<Vec<u8>, DeviceErrorCode>
where
    DEV: Device,
{
    match cmd {
        CMD_SEND_COMMAND => {
            for &byte in data_in {
                send_command(state, rx, dev, byte & 0x7f)?;
            }
            Ok(data_in.to_vec())
        }
        CMD_BUS_STATUS => {
            let value = match read_u16(data_in, network_order)? {
                BUS_STATUS_REMOTE => state.remote as u16,
                BUS_STATUS_SRQ => (dev.get_status()? & STB_RQS != 0) as u16,
                BUS_STATUS_NDAC => dev.ndac()? as u16,
                BUS_STATUS_SYSTEM_CONTROLLER => 1,
                BUS_STATUS_CONTROLLER_IN_CHARGE => state.controller_in_charge as u16,
                BUS_STATUS_TALKER => (state.talker == Some(state.bus_address)) as u16,
                BUS_STATUS_LISTENER => state.is_listener(state.bus_address) as u16,
                BUS_STATUS_BUS_ADDRESS => state.bus_address as u16,
                _ => return Err(DeviceErrorCode::ParameterError),
            };
            Ok(write_u16(value, network_order))
        }
        CMD_ATN_CTRL => {
            state.atn = read_u16(data_in, network_order)? != 0;
            Ok(data_in.to_vec())
        }
        CMD_REN_CTRL => {
            state.ren = read_u16(data_in, network_order)? != 0;
            if !state.ren {
                // Deasserting REN returns every device to local
                state.remote = false;
                dev.set_local_lockout(false);
                ignore_unsupported(dev.set_remote(false))?;
            }
            Ok(data_in.to_vec())
        }
        CMD_PASS_CTRL => {
            let addr = read_u32(data_in, network_order)?;
            if addr > GPIB_MAX_ADDRESS as u32 {
                return Err(DeviceErrorCode::ParameterError);
            }
            dev.pass_control(addr as u8)?;
            state.controller_in_charge = false;
            Ok(data_in.to_vec())
        }
        CMD_BUS_ADDRESS => {
            let addr = read_u32(data_in, network_order)?;
            if addr > GPIB_MAX_ADDRESS as u32 {
                return Err(DeviceErrorCode::ParameterError);
            }
            state.bus_address = addr as u8;
            Ok(data_in.to_vec())
        }
        CMD_IFC_CTRL => {
            state.unaddress();
            state.controller_in_charge = true;
            Ok(Vec::new())
        }
        _ => Err(DeviceErrorCode::OperationNotSupported),
    }
}

fn ignore_unsupported(res: Result<(), lxi_device::DeviceError>) -> Result<(), DeviceErrorCode> {
    match res {
        Err(lxi_device::DeviceError::NotSupported) | Ok(()) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn send_command<DEV>(
    state: &mut GpibState,
    rx: &mut ReadBuffer,
    dev: &mut DEV,
    byte: u8,
) -> Result<(), DeviceErrorCode>
where
    DEV: Device,
{
    log::trace!("GPIB command {:#04x}", byte);
    match byte {
        GTL => {
            if state.device_listens() {
                state.remote = false;
                ignore_unsupported(dev.set_remote(false))?;
            }
        }
        SDC => {
            if state.device_listens() {
                rx.clear();
                dev.clear()?;
            }
        }
        GET => {
            if state.device_listens() {
                dev.trigger()?;
            }
        }
        TCT => return Err(DeviceErrorCode::OperationNotSupported),
        LLO => dev.set_local_lockout(true),
        DCL => {
            rx.clear();
            dev.clear()?
        }
        // Parallel and serial poll configuration
        PPC | PPU => {}
        UNL => state.listeners = 0,
        UNT => state.talker = None,
        b if (LAD..UNL).contains(&b) => {
            let addr = b - LAD;
            state.listeners |= 1 << addr;
            if state.ren && state.device_address == Some(addr) {
                state.remote = true;
                ignore_unsupported(dev.set_remote(true))?;
            }
        }
        b if (TAD..UNT).contains(&b) => state.talker = Some(b - TAD),
        // Secondary addresses, parallel poll enable/disable
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use lxi_device::util::SimulatedDevice;

    use super::*;

    #[test]
    fn addressed_commands() {
        let mut state = GpibState::new(Some(3));
        let mut dev = SimulatedDevice::new();
        let mut rx = ReadBuffer::default();

        // GET without being addressed does nothing
        docmd(&mut state, &mut rx, &mut dev, CMD_SEND_COMMAND, true, &[GET]).unwrap();
        assert_eq!(dev.trigger_count(), 0);

        // UNL, MLA 3, GET
        let out = docmd(
            &mut state,
            &mut rx,
            &mut dev,
            CMD_SEND_COMMAND,
            true,
            &[UNL, LAD + 3, GET],
        )
        .unwrap();
        assert_eq!(out, [UNL, LAD + 3, GET]);
        assert_eq!(dev.trigger_count(), 1);
        assert!(state.remote);
        assert!(dev.is_remote());

        // SDC with parity bit set
        docmd(&mut state, &mut rx, &mut dev, CMD_SEND_COMMAND, true, &[SDC | 0x80]).unwrap();
        assert_eq!(dev.clear_count(), 1);

        // GTL
        docmd(&mut state, &mut rx, &mut dev, CMD_SEND_COMMAND, true, &[GTL]).unwrap();
        assert!(!state.remote);
        assert!(!dev.is_remote());

        // Addressing another device
        docmd(&mut state, &mut rx, &mut dev, CMD_SEND_COMMAND, true, &[UNL, LAD + 4, GET]).unwrap();
        assert_eq!(dev.trigger_count(), 1);
    }

    #[test]
    fn universal_commands() {
        let mut state = GpibState::new(None);
        let mut dev = SimulatedDevice::new();
        let mut rx = ReadBuffer::default();
        docmd(&mut state, &mut rx, &mut dev, CMD_SEND_COMMAND, false, &[DCL, LLO]).unwrap();
        assert_eq!(dev.clear_count(), 1);
        assert!(dev.local_lockout());

        assert_eq!(
            docmd(&mut state, &mut rx, &mut dev, CMD_SEND_COMMAND, false, &[TCT]),
            Err(DeviceErrorCode::OperationNotSupported)
        );
    }

    #[test]
    fn clear_discards_buffered_data() {
        let mut state = GpibState::new(Some(3));
        let mut dev = SimulatedDevice::new();
        let mut rx = ReadBuffer::default();

        rx.push(b"CD", true);
        docmd(&mut state, &mut rx, &mut dev, CMD_SEND_COMMAND, true, &[SDC]).unwrap();
        assert_eq!(rx.len(), 2);

        docmd(&mut state, &mut rx, &mut dev, CMD_SEND_COMMAND, true, &[LAD + 3, SDC]).unwrap();
        assert!(rx.is_empty());

        rx.push(b"CD", true);
        docmd(&mut state, &mut rx, &mut dev, CMD_SEND_COMMAND, true, &[DCL]).unwrap();
        assert!(rx.is_empty());
        assert_eq!(dev.clear_count(), 2);
    }

    #[test]
    fn bus_status() {
        let mut state = GpibState::new(Some(5));
        let mut dev = SimulatedDevice::new();
        let mut rx = ReadBuffer::default();

        let query = |state: &mut GpibState, dev: &mut SimulatedDevice, sel: u16| {
            docmd(state, &mut ReadBuffer::default(), dev, CMD_BUS_STATUS, true, &sel.to_be_bytes())
        };

        assert_eq!(query(&mut state, &mut dev, BUS_STATUS_SYSTEM_CONTROLLER), Ok(vec![0, 1]));
        assert_eq!(query(&mut state, &mut dev, BUS_STATUS_CONTROLLER_IN_CHARGE), Ok(vec![0, 1]));
        assert_eq!(query(&mut state, &mut dev, BUS_STATUS_SRQ), Ok(vec![0, 0]));
        dev.set_status(STB_RQS);
        assert_eq!(query(&mut state, &mut dev, BUS_STATUS_SRQ), Ok(vec![0, 1]));

        // Controller addressed to talk
        docmd(&mut state, &mut rx, &mut dev, CMD_SEND_COMMAND, true, &[TAD]).unwrap();
        assert_eq!(query(&mut state, &mut dev, BUS_STATUS_TALKER), Ok(vec![0, 1]));
        assert_eq!(query(&mut state, &mut dev, BUS_STATUS_LISTENER), Ok(vec![0, 0]));

        assert_eq!(query(&mut state, &mut dev, 9), Err(DeviceErrorCode::ParameterError));

        // Little endian
        assert_eq!(
            docmd(&mut state, &mut rx, &mut dev, CMD_BUS_STATUS, false, &[8, 0]),
            Ok(vec![0, 0])
        );
    }

    #[test]
    fn bus_address() {
        let mut state = GpibState::new(None);
        let mut dev = SimulatedDevice::new();
        let mut rx = ReadBuffer::default();

        docmd(&mut state, &mut rx, &mut dev, CMD_BUS_ADDRESS, true, &[0, 0, 0, 21]).unwrap();
        assert_eq!(state.bus_address, 21);
        assert_eq!(
            docmd(&mut state, &mut rx, &mut dev, CMD_BUS_STATUS, true, &[0, 8]),
            Ok(vec![0, 21])
        );

        assert_eq!(
            docmd(&mut state, &mut rx, &mut dev, CMD_BUS_ADDRESS, true, &[0, 0, 0, 31]),
            Err(DeviceErrorCode::ParameterError)
        );
        assert_eq!(
            docmd(&mut state, &mut rx, &mut dev, CMD_BUS_ADDRESS, true, &[0, 0, 21]),
            Err(DeviceErrorCode::ParameterError)
        );
    }

    #[test]
    fn ren_and_ifc() {
        let mut state = GpibState::new(Some(3));
        let mut dev = SimulatedDevice::new();
        let mut rx = ReadBuffer::default();
        docmd(&mut state, &mut rx, &mut dev, CMD_SEND_COMMAND, true, &[LAD + 3, TAD + 7]).unwrap();
        assert!(state.remote);

        docmd(&mut state, &mut rx, &mut dev, CMD_REN_CTRL, true, &[0, 0]).unwrap();
        assert!(!state.remote);
        assert!(!dev.is_remote());

        docmd(&mut state, &mut rx, &mut dev, CMD_IFC_CTRL, true, &[]).unwrap();
        assert_eq!(state.listeners, 0);
        assert_eq!(state.talker, None);

        // Pass control is not supported by the simulator
        assert_eq!(
            docmd(&mut state, &mut rx, &mut dev, CMD_PASS_CTRL, true, &[0, 0, 0, 7]),
            Err(DeviceErrorCode::OperationNotSupported)
        );
        assert!(state.controller_in_charge);

        assert_eq!(
            docmd(&mut state, &mut rx, &mut dev, 0x030000, true, &[]),
            Err(DeviceErrorCode::OperationNotSupported)
        );
    }
}
