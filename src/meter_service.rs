use crate::register_catalog::SUNSPEC_BASE_ADDRESS;
use crate::register_table::{RegisterImage, SharedRegisterTable};
use std::future;
use tokio_modbus::prelude::*;
use tracing::{debug, warn};

/// Largest register count a single Modbus read may ask for
const MAX_READ_COUNT: u16 = 125;

/// Registers outside the SunSpec map that inverters probe while looking for
/// other register layouts. Answering them keeps the inverter on SunSpec.
const PROBE_REGISTERS: &[(u16, u16)] = &[
    (0, 1), // SunSpec common model
    (1, 0),
    (11, 0),
    (12, 0),
    (768, 0),
    (1706, 0),
    (50000, 0),
    (50001, 0),
];

/// Modbus/TCP service emulating a Fronius smart meter. Holding and input
/// registers are both answered from the shared SunSpec register table.
#[derive(Clone)]
pub struct SunSpecMeterService {
    table: SharedRegisterTable,
}

impl tokio_modbus::server::Service for SunSpecMeterService {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        let res = match req {
            Request::ReadInputRegisters(addr, cnt) => {
                debug!("Input register read for {addr}/{cnt}");
                self.read(addr, cnt).map(Response::ReadInputRegisters)
            }
            Request::ReadHoldingRegisters(addr, cnt) => {
                debug!("Holding register read for {addr}/{cnt}");
                self.read(addr, cnt).map(Response::ReadHoldingRegisters)
            }
            _ => {
                warn!("Unimplemented function code in request: {req:?}");
                Err(ExceptionCode::IllegalFunction)
            }
        };
        future::ready(res)
    }
}

impl SunSpecMeterService {
    pub fn new(table: SharedRegisterTable) -> Self {
        Self { table }
    }

    /// Reads `cnt` registers starting at the 0-based protocol address `addr`.
    /// All words come from the same published snapshot.
    fn read(&self, addr: u16, cnt: u16) -> Result<Vec<u16>, ExceptionCode> {
        if cnt == 0 || cnt > MAX_READ_COUNT {
            return Err(ExceptionCode::IllegalDataValue);
        }
        let image = self.table.snapshot();
        (0..cnt)
            .map(|i| {
                addr.checked_add(i)
                    .and_then(|reg_addr| resolve(&image, reg_addr))
                    .ok_or_else(|| {
                        warn!("Can't handle read of register {addr}+{i}");
                        ExceptionCode::IllegalDataAddress
                    })
            })
            .collect()
    }
}

/// Protocol address `p` is SunSpec register `p + 1`. The map starts at the
/// `SunS` marker in register 40001, so image offset 0 is never served.
fn resolve(image: &RegisterImage, protocol_address: u16) -> Option<u16> {
    let register = protocol_address as usize + 1;
    let sunspec_word = register
        .checked_sub(SUNSPEC_BASE_ADDRESS as usize)
        .filter(|offset| *offset > 0)
        .and_then(|offset| image.word(offset));
    sunspec_word.or_else(|| {
        PROBE_REGISTERS
            .iter()
            .find(|(address, _)| *address == protocol_address)
            .map(|(_, value)| *value)
    })
}
