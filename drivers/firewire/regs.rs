//! OHCI register file access
//!
//! Byte offsets and bit assignments follow the 1394 OHCI 1.1
//! specification. Every access is a single ordered 32-bit operation;
//! ordering relative to hardware state changes is load-bearing (e.g.
//! clearing `run` before checking `active`), so there is no batching
//! or write coalescing anywhere in this layer.

use bitflags::bitflags;
use core::ptr::{read_volatile, write_volatile};
use x86_64::instructions::port::Port;

use super::Fault;

/// Register byte offsets into the memory-mapped register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum Register {
    Version = 0x000,
    GuidRom = 0x004,
    ATRetries = 0x008,
    ConfigRomHeader = 0x018,
    BusId = 0x01C,
    BusOptions = 0x020,
    GuidHi = 0x024,
    GuidLo = 0x028,
    ConfigRomMap = 0x034,
    VendorId = 0x040,
    HcControlSet = 0x050,
    HcControlClear = 0x054,
    SelfIdBuffer = 0x064,
    SelfIdCount = 0x068,
    IntEventSet = 0x080,
    IntEventClear = 0x084,
    IntMaskSet = 0x088,
    IntMaskClear = 0x08C,
    LinkControlSet = 0x0E0,
    LinkControlClear = 0x0E4,
    NodeId = 0x0E8,
    PhyControl = 0x0EC,
    AsReqFilterHiSet = 0x100,
    AsReqFilterLoSet = 0x108,
    PhyReqFilterHiSet = 0x110,
    PhyReqFilterLoSet = 0x118,
    PhyUpperBound = 0x120,
    AsReqContextControlSet = 0x180,
    AsReqContextControlClear = 0x184,
    AsRspContextControlSet = 0x1A0,
    AsRspContextControlClear = 0x1A4,
}

bitflags! {
    /// HCControl register bits (set/clear register pair).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HcControl: u32 {
        const SOFT_RESET            = 1 << 16;
        const LINK_ENABLE           = 1 << 17;
        const POSTED_WRITE_ENABLE   = 1 << 18;
        const LPS                   = 1 << 19;
        const A_PHY_ENHANCE_ENABLE  = 1 << 22;
        const PROGRAM_PHY_ENABLE    = 1 << 23;
        const ACK_TARDY_ENABLE      = 1 << 29;
        const NO_BYTE_SWAP_DATA     = 1 << 30;
        const BIB_IMAGE_VALID       = 1 << 31;
    }
}

bitflags! {
    /// IntEvent register bits (set/clear register pair).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IntEvent: u32 {
        const POSTED_WRITE_ERR    = 1 << 8;
        const SELF_ID_COMPLETE_2  = 1 << 15;
        const SELF_ID_COMPLETE    = 1 << 16;
        const BUS_RESET           = 1 << 17;
        const REG_ACCESS_FAIL     = 1 << 18;
        const UNRECOVERABLE_ERROR = 1 << 25;
    }
}

bitflags! {
    /// LinkControl register bits (set/clear register pair).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LinkControl: u32 {
        const RCV_SELF_ID        = 1 << 9;
        const RCV_PHY_PKT        = 1 << 10;
        const CYCLE_TIMER_ENABLE = 1 << 20;
        const CYCLE_MASTER       = 1 << 21;
    }
}

bitflags! {
    /// Asynchronous DMA ContextControl bits (set/clear register pair).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ContextControl: u32 {
        const ACTIVE = 1 << 10;
        const DEAD   = 1 << 11;
        const WAKE   = 1 << 12;
        const RUN    = 1 << 15;
    }
}

/// NodeID.iDValid
pub const NODE_ID_VALID: u32 = 1 << 31;
/// NodeID.nodeNumber mask
pub const NODE_ID_NUMBER: u32 = 0x3F;

/// PhyControl.rdDone
pub const PHY_READ_DONE: u32 = 1 << 31;
/// PhyControl.wrReg; stays set while a write request is in flight.
pub const PHY_WRITE_PENDING: u32 = 1 << 14;

/// Encode a PHY register read request for PhyControl.
pub fn phy_read_request(addr: u8) -> u32 {
    (1 << 15) | ((addr as u32 & 0xF) << 8)
}

/// Encode a PHY register write request for PhyControl.
pub fn phy_write_request(addr: u8, data: u8) -> u32 {
    (1 << 14) | ((addr as u32 & 0xF) << 8) | data as u32
}

/// Extract the read result from a completed PhyControl read.
pub fn phy_read_data(phy_control: u32) -> u8 {
    (phy_control >> 16) as u8
}

pub const RESET_TIMEOUT: u32 = 10000;
pub const PHY_TIMEOUT: u32 = 10000;
pub const MISC_TIMEOUT: u32 = 10000;

/// Typed access to the register file plus the tick delay.
///
/// The one seam between driver logic and hardware: production code
/// goes through [`MmioRegisters`], tests inject a simulated register
/// file. One tick is roughly a millisecond.
pub trait RegisterIo {
    fn read(&self, reg: Register) -> u32;
    fn write(&mut self, reg: Register, value: u32);
    fn delay(&mut self, ticks: u32);
}

/// The real register file behind a PCI BAR0 mapping.
pub struct MmioRegisters {
    base: *mut u32,
}

impl MmioRegisters {
    /// Wrap a BAR0 register mapping.
    ///
    /// # Safety
    /// `base` must point at a live OHCI register file and nothing else
    /// may access it for the lifetime of this value.
    pub unsafe fn new(base: u32) -> Self {
        Self { base: base as *mut u32 }
    }
}

impl RegisterIo for MmioRegisters {
    #[inline]
    fn read(&self, reg: Register) -> u32 {
        unsafe { read_volatile(self.base.add(reg as usize / 4)) }
    }

    #[inline]
    fn write(&mut self, reg: Register, value: u32) {
        unsafe { write_volatile(self.base.add(reg as usize / 4), value) }
    }

    fn delay(&mut self, ticks: u32) {
        // A write to port 0x80 takes about a microsecond on everything
        // that boots this code.
        let mut port = Port::<u8>::new(0x80);
        for _ in 0..ticks {
            for _ in 0..1000 {
                unsafe { port.write(0) };
            }
        }
    }
}

/// Bounded active poll, the sole suspension point in the driver.
///
/// Spins until `reg & mask == value`, checking once per tick. With
/// `max_ticks = N` the condition is checked exactly N+1 times; a
/// condition that already holds returns without sleeping. Exceeding
/// the bound is a fault the caller classifies.
pub fn wait_loop<R: RegisterIo>(
    io: &mut R,
    reg: Register,
    mask: u32,
    value: u32,
    max_ticks: u32,
) -> Result<(), Fault> {
    let mut ticks = 0;
    loop {
        if io.read(reg) & mask == value {
            return Ok(());
        }
        if ticks == max_ticks {
            return Err(Fault::WaitTimeout { reg, mask, value });
        }
        io.delay(1);
        ticks += 1;
    }
}
