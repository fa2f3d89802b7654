//! Minimal blocking Modbus/TCP client for SunSpec inverters.
//!
//! Only function 0x03 (read holding registers) is needed: one request for the
//! SunSpec common block and one for the inverter model block.

use crate::config::{InverterConfig, ModbusConfig};
use crate::error::ConnectivityError;
use crate::models::inverter::InverterReading;
use crate::sources::{with_retries, InverterReader};
use chrono::{DateTime, Utc};
use log::debug;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

const SOURCE: &str = "modbus";

const COMMON_BASE: u16 = 40000;
const COMMON_LEN: u16 = 69;
const INVERTER_BASE: u16 = 40069;
const INVERTER_LEN: u16 = 40;

/// "SunS" as two big-endian registers.
const SUNSPEC_MARKER: [u16; 2] = [0x5375, 0x6e53];

// Absolute register addresses within the two blocks.
const C_MANUFACTURER: u16 = 40004;
const C_MODEL: u16 = 40020;
const C_SERIAL: u16 = 40052;
const I_AC_POWER: u16 = 40083;
const I_AC_POWER_SF: u16 = 40084;
const I_ENERGY: u16 = 40093;
const I_ENERGY_SF: u16 = 40095;
const I_DC_CURRENT: u16 = 40096;
const I_DC_CURRENT_SF: u16 = 40097;
const I_DC_VOLTAGE: u16 = 40098;
const I_DC_VOLTAGE_SF: u16 = 40099;
const I_STATUS: u16 = 40107;
const I_VENDOR_STATUS: u16 = 40108;

const NOT_IMPLEMENTED_I16: u16 = 0x8000;
const NOT_IMPLEMENTED_U16: u16 = 0xffff;
const NOT_IMPLEMENTED_ACC32: [u32; 2] = [0x8000_0000, 0xffff_ffff];

pub struct SunSpecReader {
    timeout: Duration,
    retries: u32,
    retry_delay: Duration,
    transaction: AtomicU16,
}

impl SunSpecReader {
    pub fn new(cfg: &ModbusConfig) -> Self {
        SunSpecReader {
            timeout: cfg.timeout(),
            retries: cfg.retries,
            retry_delay: cfg.retry_delay(),
            transaction: AtomicU16::new(1),
        }
    }

    fn connect(&self, inverter: &InverterConfig) -> Result<TcpStream, ConnectivityError> {
        let addrs = (inverter.host.as_str(), inverter.port)
            .to_socket_addrs()
            .map_err(|e| transport(format!("resolving {}: {}", inverter.host, e)))?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeout)).map_err(io_error)?;
                    stream.set_write_timeout(Some(self.timeout)).map_err(io_error)?;
                    stream.set_nodelay(true).map_err(io_error)?;
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(match last_err {
            Some(e) => io_error(e),
            None => transport(format!("{} resolved to no address", inverter.host)),
        })
    }

    fn read_registers(&self, stream: &mut TcpStream, unit: u8, address: u16, count: u16) -> Result<Vec<u16>, ConnectivityError> {
        let tid = self.transaction.fetch_add(1, Ordering::Relaxed);
        stream.write_all(&encode_request(tid, unit, address, count)).map_err(io_error)?;

        let mut header = [0u8; 7];
        stream.read_exact(&mut header).map_err(io_error)?;
        let length = u16::from_be_bytes([header[4], header[5]]) as usize;
        if length < 2 {
            return Err(protocol(format!("response length {} too short", length)));
        }
        let mut pdu = vec![0u8; length - 1];
        stream.read_exact(&mut pdu).map_err(io_error)?;

        let mut frame = header.to_vec();
        frame.extend_from_slice(&pdu);
        decode_response(&frame, tid, count)
    }

    fn read_once(&self, inverter: &InverterConfig) -> Result<InverterReading, ConnectivityError> {
        let mut stream = self.connect(inverter)?;
        let common = self.read_registers(&mut stream, inverter.unit, COMMON_BASE, COMMON_LEN)?;
        let model = self.read_registers(&mut stream, inverter.unit, INVERTER_BASE, INVERTER_LEN)?;
        decode_reading(&inverter.name, &common, &model, Utc::now())
    }
}

impl InverterReader for SunSpecReader {
    fn read(&self, inverter: &InverterConfig) -> Result<InverterReading, ConnectivityError> {
        debug!("[{}] reading {}:{} unit {}", inverter.name, inverter.host, inverter.port, inverter.unit);
        let label = format!("[{}] modbus", inverter.name);
        with_retries(&label, self.retries, self.retry_delay, || self.read_once(inverter))
    }
}

fn transport(message: String) -> ConnectivityError {
    ConnectivityError::Transport {
        source_name: SOURCE,
        message,
    }
}

fn protocol(message: String) -> ConnectivityError {
    ConnectivityError::Protocol {
        source_name: SOURCE,
        message,
    }
}

fn io_error(e: std::io::Error) -> ConnectivityError {
    match e.kind() {
        ErrorKind::TimedOut | ErrorKind::WouldBlock => ConnectivityError::Timeout { source_name: SOURCE },
        _ => transport(e.to_string()),
    }
}

fn encode_request(tid: u16, unit: u8, address: u16, count: u16) -> [u8; 12] {
    let mut out = [0u8; 12];
    out[0..2].copy_from_slice(&tid.to_be_bytes());
    // protocol id 0, then 6 bytes follow
    out[4..6].copy_from_slice(&6u16.to_be_bytes());
    out[6] = unit;
    out[7] = 0x03;
    out[8..10].copy_from_slice(&address.to_be_bytes());
    out[10..12].copy_from_slice(&count.to_be_bytes());
    out
}

fn decode_response(frame: &[u8], tid: u16, count: u16) -> Result<Vec<u16>, ConnectivityError> {
    if frame.len() < 9 {
        return Err(protocol(format!("frame of {} bytes is too short", frame.len())));
    }
    let got_tid = u16::from_be_bytes([frame[0], frame[1]]);
    if got_tid != tid {
        return Err(protocol(format!("transaction id {} does not match request {}", got_tid, tid)));
    }
    let function = frame[7];
    if function & 0x80 != 0 {
        return Err(protocol(format!("device exception code {}", frame[8])));
    }
    if function != 0x03 {
        return Err(protocol(format!("unexpected function code {:#04x}", function)));
    }
    let byte_count = frame[8] as usize;
    let data = &frame[9..];
    if byte_count != count as usize * 2 || data.len() < byte_count {
        return Err(protocol(format!(
            "expected {} registers, got {} bytes",
            count,
            data.len().min(byte_count)
        )));
    }
    Ok(data[..byte_count]
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect())
}

/// Register at absolute `address` inside a block starting at `base`.
fn reg(block: &[u16], base: u16, address: u16) -> Option<u16> {
    block.get(address.checked_sub(base)? as usize).copied()
}

fn string_at(block: &[u16], base: u16, address: u16, len: u16) -> String {
    let bytes: Vec<u8> = (address..address + len)
        .filter_map(|a| reg(block, base, a))
        .flat_map(u16::to_be_bytes)
        .collect();
    String::from_utf8_lossy(&bytes).trim_matches(|c: char| c == '\0' || c.is_whitespace()).to_string()
}

fn scale_factor(raw: Option<u16>) -> Option<i32> {
    match raw? {
        NOT_IMPLEMENTED_I16 => None,
        r => Some(i32::from(r as i16)),
    }
}

fn scaled(value: Option<f64>, sf: Option<i32>) -> Option<f64> {
    Some(value? * 10f64.powi(sf?))
}

fn int16(raw: Option<u16>) -> Option<f64> {
    match raw? {
        NOT_IMPLEMENTED_I16 => None,
        r => Some(f64::from(r as i16)),
    }
}

fn uint16(raw: Option<u16>) -> Option<f64> {
    match raw? {
        NOT_IMPLEMENTED_U16 => None,
        r => Some(f64::from(r)),
    }
}

fn acc32(hi: Option<u16>, lo: Option<u16>) -> Option<f64> {
    let v = (u32::from(hi?) << 16) | u32::from(lo?);
    if NOT_IMPLEMENTED_ACC32.contains(&v) {
        None
    } else {
        Some(f64::from(v))
    }
}

pub(crate) fn decode_reading(
    name: &str,
    common: &[u16],
    model: &[u16],
    now: DateTime<Utc>,
) -> Result<InverterReading, ConnectivityError> {
    if common.get(0..2) != Some(&SUNSPEC_MARKER[..]) {
        return Err(protocol("SunSpec marker not found at 40000".to_string()));
    }
    let m = |a| reg(model, INVERTER_BASE, a);

    let manufacturer = string_at(common, COMMON_BASE, C_MANUFACTURER, 16);
    let model_name = string_at(common, COMMON_BASE, C_MODEL, 16);
    let serial = string_at(common, COMMON_BASE, C_SERIAL, 16);

    let model_label = match (manufacturer.is_empty(), model_name.is_empty()) {
        (_, true) => None,
        (true, false) => Some(model_name),
        (false, false) => Some(format!("{} {}", manufacturer, model_name)),
    };

    Ok(InverterReading {
        name: name.to_string(),
        serial,
        model: model_label,
        timestamp: now,
        pac_w: scaled(int16(m(I_AC_POWER)), scale_factor(m(I_AC_POWER_SF))),
        vdc_v: scaled(uint16(m(I_DC_VOLTAGE)), scale_factor(m(I_DC_VOLTAGE_SF))),
        idc_a: scaled(uint16(m(I_DC_CURRENT)), scale_factor(m(I_DC_CURRENT_SF))),
        total_wh: scaled(acc32(m(I_ENERGY), m(I_ENERGY + 1)), scale_factor(m(I_ENERGY_SF))),
        status: m(I_STATUS).filter(|s| *s != NOT_IMPLEMENTED_U16),
        vendor_status: m(I_VENDOR_STATUS).filter(|s| *s != NOT_IMPLEMENTED_U16),
    })
}
