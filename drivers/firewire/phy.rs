//! Indirect PHY register protocol
//!
//! PHY registers are not memory mapped; they are reached through the
//! PhyControl register with completion polling. A PHY that stops
//! answering cannot be trusted to be locked down, so every timeout
//! here is a fatal integrity fault.

use super::regs::{
    self, phy_read_data, phy_read_request, phy_write_request, RegisterIo, Register, PHY_READ_DONE,
    PHY_TIMEOUT, PHY_WRITE_PENDING,
};
use super::Fault;

/// PHY register 1: initiate bus reset.
pub const PHY_IBR: u8 = 1 << 6;
/// PHY register 4: contender bit.
pub const PHY_CONTENDER: u8 = 1 << 6;
/// PHY register 2: low five bits are the port count.
pub const PHY_PORT_COUNT_MASK: u8 = 0x1F;
/// PHY register 2: top three bits all set means enhanced register map.
pub const PHY_EXTENDED: u8 = 7;
/// Page-select register in the enhanced map.
pub const PHY_PAGE_SELECT: u8 = 7;
/// First paged register.
pub const PHY_PAGED_BASE: u8 = 8;
/// Port status page.
pub const PAGE_PORT_STATUS: u8 = 0;
/// Port status register 0: port disabled.
pub const PHY_PORT_DISABLED: u8 = 1 << 0;

/// Read a PHY register.
pub fn phy_read<R: RegisterIo>(io: &mut R, addr: u8) -> Result<u8, Fault> {
    io.write(Register::PhyControl, phy_read_request(addr));
    regs::wait_loop(
        io,
        Register::PhyControl,
        PHY_READ_DONE,
        PHY_READ_DONE,
        PHY_TIMEOUT,
    )?;

    Ok(phy_read_data(io.read(Register::PhyControl)))
}

/// Write a PHY register and wait for the request to drain.
pub fn phy_write<R: RegisterIo>(io: &mut R, addr: u8, data: u8) -> Result<(), Fault> {
    io.write(Register::PhyControl, phy_write_request(addr, data));
    regs::wait_loop(io, Register::PhyControl, PHY_WRITE_PENDING, 0, PHY_TIMEOUT)
}

/// Select the register page visible behind registers 8..15.
///
/// Only meaningful on PHYs with the enhanced register map; calling it
/// on anything else is a precondition violation, as are out-of-range
/// page or port indices.
pub fn phy_page_select<R: RegisterIo>(
    io: &mut R,
    enhanced_phy_map: bool,
    page: u8,
    port: u8,
) -> Result<(), Fault> {
    if !enhanced_phy_map {
        return Err(Fault::PageSelectUnsupported);
    }
    if page >= 7 {
        return Err(Fault::BadPhyPage);
    }
    if port >= 16 {
        return Err(Fault::BadPhyPort);
    }

    phy_write(io, PHY_PAGE_SELECT, (page << 5) | port)
}
