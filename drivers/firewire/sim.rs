//! Simulated OHCI register file for host-side tests
//!
//! A small behavioral model of the controller: set/clear register
//! pairs, delayed soft-reset and PHY completion, the paged PHY
//! register bank, and the bus-reset side effects (generation bump,
//! cleared request filters, SelfID events). Timing knobs are plain
//! public fields so tests can shape controller behavior per scenario.

use std::alloc::{alloc_zeroed, Layout};

use super::phy::PHY_IBR;
use super::regs::{
    ContextControl, HcControl, IntEvent, RegisterIo, Register, NODE_ID_VALID, PHY_READ_DONE,
    PHY_WRITE_PENDING,
};
use super::{BootMemory, DmaBuffer};

pub struct FakeOhci {
    pub version: u32,
    pub bus_options: u32,
    pub hc_control: u32,
    pub int_event: u32,
    pub int_mask: u32,
    pub link_control: u32,
    pub node_id: u32,
    pub phy_control: u32,
    pub config_rom_hdr: u32,
    pub config_rom_map: u32,
    pub at_retries: u32,
    pub phy_upper_bound: u32,
    pub selfid_buffer_reg: u32,
    pub selfid_count: u32,
    pub as_req_filter_hi: u32,
    pub as_req_filter_lo: u32,
    pub phy_req_filter_hi: u32,
    pub phy_req_filter_lo: u32,
    pub as_req_ctx: u32,
    pub as_rsp_ctx: u32,

    phy_regs: [u8; 8],
    port_regs: [[u8; 8]; 16],
    page: u8,
    port: u8,

    /// Ticks until a soft reset self-clears. Zero clears instantly.
    pub soft_reset_ticks: u32,
    /// Ticks until a PHY read completes. Zero completes instantly.
    pub phy_read_ticks: u32,
    /// Ticks until a PHY write drains. Zero drains instantly.
    pub phy_write_ticks: u32,
    /// LPS attempts during which the PHY stays silent (no read
    /// completion, no regAccessFail), as if SCLK never started.
    /// Zero leaves the PHY responsive from the start.
    pub lps_dead_attempts: u32,
    /// Number of times LPS has been raised so far.
    pub lps_attempts: u32,
    /// Whether writing IBR into PHY register 1 triggers a bus reset.
    pub bus_reset_on_ibr: bool,
    /// SelfID word count reported after the next bus reset.
    pub selfid_words: u32,

    soft_reset_pending: Option<u32>,
    phy_read_pending: Option<(u32, u8)>,
    phy_write_pending: Option<(u32, u8, u8)>,
}

impl FakeOhci {
    pub const BUS_ID: u32 = 0x3133_3934;
    pub const BUS_OPTIONS: u32 = 0xF064_A002;
    pub const GUID_HI: u32 = 0x0050_4500;
    pub const GUID_LO: u32 = 0x0000_2A01;

    /// A supported controller: OHCI 1.10, four ports, enhanced PHY
    /// register map, PHY programming left to the driver.
    pub fn new() -> Self {
        let mut phy_regs = [0u8; 8];
        phy_regs[2] = (7 << 5) | 4;
        Self {
            version: 0x0101_0010,
            bus_options: Self::BUS_OPTIONS,
            hc_control: HcControl::PROGRAM_PHY_ENABLE.bits(),
            int_event: 0,
            int_mask: 0,
            link_control: 0,
            node_id: 0,
            phy_control: 0,
            config_rom_hdr: 0,
            config_rom_map: 0,
            at_retries: 0,
            phy_upper_bound: 0,
            selfid_buffer_reg: 0,
            selfid_count: 0,
            as_req_filter_hi: 0,
            as_req_filter_lo: 0,
            phy_req_filter_hi: 0,
            phy_req_filter_lo: 0,
            as_req_ctx: 0,
            as_rsp_ctx: 0,
            phy_regs,
            port_regs: [[0; 8]; 16],
            page: 0,
            port: 0,
            soft_reset_ticks: 0,
            phy_read_ticks: 1,
            phy_write_ticks: 0,
            lps_dead_attempts: 0,
            lps_attempts: 0,
            bus_reset_on_ibr: true,
            selfid_words: 0,
            soft_reset_pending: None,
            phy_read_pending: None,
            phy_write_pending: None,
        }
    }

    pub fn phy_reg(&self, addr: u8) -> u8 {
        self.phy_regs[addr as usize]
    }

    pub fn set_phy_reg(&mut self, addr: u8, value: u8) {
        self.phy_regs[addr as usize] = value;
    }

    pub fn port_reg(&self, port: u8, reg: u8) -> u8 {
        self.port_regs[port as usize][reg as usize]
    }

    pub fn set_port_reg(&mut self, port: u8, reg: u8, value: u8) {
        self.port_regs[port as usize][reg as usize] = value;
    }

    /// Current bus generation as reported by SelfIDCount.
    pub fn generation(&self) -> u32 {
        (self.selfid_count >> 16) & 0xFF
    }

    /// The hardware side of a bus reset: new generation, SelfID phase
    /// complete, request filters dropped, node ID valid again.
    pub fn trigger_bus_reset(&mut self) {
        let generation = (self.generation() + 1) & 0xFF;
        self.selfid_count = (generation << 16) | ((self.selfid_words & 0xFF) << 2);
        self.int_event |= (IntEvent::BUS_RESET | IntEvent::SELF_ID_COMPLETE_2).bits();
        self.as_req_filter_hi = 0;
        self.as_req_filter_lo = 0;
        self.phy_req_filter_hi = 0;
        self.phy_req_filter_lo = 0;
        self.node_id = NODE_ID_VALID | 1;
    }

    fn phy_read_result(&self, addr: u8) -> u8 {
        if addr < 8 {
            self.phy_regs[addr as usize]
        } else if self.page == 0 {
            self.port_regs[self.port as usize][(addr - 8) as usize]
        } else {
            0
        }
    }

    fn complete_phy_read(&mut self, addr: u8) {
        let data = self.phy_read_result(addr);
        self.phy_control = PHY_READ_DONE | ((addr as u32) << 24) | ((data as u32) << 16);
    }

    fn commit_phy_write(&mut self, addr: u8, data: u8) {
        if addr == 7 {
            self.page = data >> 5;
            self.port = data & 0xF;
        } else if addr >= 8 {
            if self.page == 0 {
                self.port_regs[self.port as usize][(addr - 8) as usize] = data;
            }
        } else if addr == 1 && data & PHY_IBR != 0 {
            // IBR self-clears once the reset is on the wire.
            self.phy_regs[1] = data & !PHY_IBR;
            if self.bus_reset_on_ibr {
                self.trigger_bus_reset();
            }
        } else {
            self.phy_regs[addr as usize] = data;
        }
        self.phy_control &= !PHY_WRITE_PENDING;
    }

    fn step(&mut self) {
        if let Some(ticks) = self.soft_reset_pending {
            if ticks <= 1 {
                self.hc_control &= !HcControl::SOFT_RESET.bits();
                self.soft_reset_pending = None;
            } else {
                self.soft_reset_pending = Some(ticks - 1);
            }
        }
        if let Some((ticks, addr)) = self.phy_read_pending {
            if ticks <= 1 {
                self.phy_read_pending = None;
                self.complete_phy_read(addr);
            } else {
                self.phy_read_pending = Some((ticks - 1, addr));
            }
        }
        if let Some((ticks, addr, data)) = self.phy_write_pending {
            if ticks <= 1 {
                self.phy_write_pending = None;
                self.commit_phy_write(addr, data);
            } else {
                self.phy_write_pending = Some((ticks - 1, addr, data));
            }
        }
    }
}

impl RegisterIo for FakeOhci {
    fn read(&self, reg: Register) -> u32 {
        match reg {
            Register::Version => self.version,
            Register::GuidRom => 0,
            Register::ATRetries => self.at_retries,
            Register::ConfigRomHeader => self.config_rom_hdr,
            Register::BusId => Self::BUS_ID,
            Register::BusOptions => self.bus_options,
            Register::GuidHi => Self::GUID_HI,
            Register::GuidLo => Self::GUID_LO,
            Register::ConfigRomMap => self.config_rom_map,
            Register::VendorId => 0,
            Register::HcControlSet | Register::HcControlClear => self.hc_control,
            Register::SelfIdBuffer => self.selfid_buffer_reg,
            Register::SelfIdCount => self.selfid_count,
            Register::IntEventSet | Register::IntEventClear => self.int_event,
            Register::IntMaskSet | Register::IntMaskClear => self.int_mask,
            Register::LinkControlSet | Register::LinkControlClear => self.link_control,
            Register::NodeId => self.node_id,
            Register::PhyControl => self.phy_control,
            Register::AsReqFilterHiSet => self.as_req_filter_hi,
            Register::AsReqFilterLoSet => self.as_req_filter_lo,
            Register::PhyReqFilterHiSet => self.phy_req_filter_hi,
            Register::PhyReqFilterLoSet => self.phy_req_filter_lo,
            Register::PhyUpperBound => self.phy_upper_bound,
            Register::AsReqContextControlSet | Register::AsReqContextControlClear => {
                self.as_req_ctx
            }
            Register::AsRspContextControlSet | Register::AsRspContextControlClear => {
                self.as_rsp_ctx
            }
        }
    }

    fn write(&mut self, reg: Register, value: u32) {
        match reg {
            Register::HcControlSet => {
                if value & HcControl::LPS.bits() != 0 {
                    self.lps_attempts += 1;
                }
                self.hc_control |= value;
                if value & HcControl::SOFT_RESET.bits() != 0 {
                    if self.soft_reset_ticks == 0 {
                        self.hc_control &= !HcControl::SOFT_RESET.bits();
                    } else {
                        self.soft_reset_pending = Some(self.soft_reset_ticks);
                    }
                }
            }
            Register::HcControlClear => self.hc_control &= !value,
            Register::IntEventSet => self.int_event |= value,
            Register::IntEventClear => self.int_event &= !value,
            Register::IntMaskSet => self.int_mask |= value,
            Register::IntMaskClear => self.int_mask &= !value,
            Register::LinkControlSet => self.link_control |= value,
            Register::LinkControlClear => self.link_control &= !value,
            Register::AsReqFilterHiSet => self.as_req_filter_hi |= value,
            Register::AsReqFilterLoSet => self.as_req_filter_lo |= value,
            Register::PhyReqFilterHiSet => self.phy_req_filter_hi |= value,
            Register::PhyReqFilterLoSet => self.phy_req_filter_lo |= value,
            Register::AsReqContextControlSet => self.as_req_ctx |= value,
            Register::AsReqContextControlClear => {
                self.as_req_ctx &= !value;
                if value & ContextControl::RUN.bits() != 0 {
                    self.as_req_ctx &= !ContextControl::ACTIVE.bits();
                }
            }
            Register::AsRspContextControlSet => self.as_rsp_ctx |= value,
            Register::AsRspContextControlClear => {
                self.as_rsp_ctx &= !value;
                if value & ContextControl::RUN.bits() != 0 {
                    self.as_rsp_ctx &= !ContextControl::ACTIVE.bits();
                }
            }
            Register::PhyControl => {
                self.phy_control = value;
                if value & (1 << 15) != 0 {
                    let addr = ((value >> 8) & 0xF) as u8;
                    if self.lps_dead_attempts != 0 && self.lps_attempts <= self.lps_dead_attempts {
                        // SCLK is not running; the request just hangs.
                        self.phy_read_pending = None;
                    } else if self.phy_read_ticks == 0 {
                        self.complete_phy_read(addr);
                    } else {
                        self.phy_read_pending = Some((self.phy_read_ticks, addr));
                    }
                } else if value & (1 << 14) != 0 {
                    let addr = ((value >> 8) & 0xF) as u8;
                    let data = (value & 0xFF) as u8;
                    if self.phy_write_ticks == 0 {
                        self.commit_phy_write(addr, data);
                    } else {
                        self.phy_write_pending = Some((self.phy_write_ticks, addr, data));
                    }
                }
            }
            Register::ConfigRomHeader => self.config_rom_hdr = value,
            Register::BusOptions => self.bus_options = value,
            Register::ConfigRomMap => self.config_rom_map = value,
            Register::ATRetries => self.at_retries = value,
            Register::PhyUpperBound => self.phy_upper_bound = value,
            Register::SelfIdBuffer => self.selfid_buffer_reg = value,
            Register::SelfIdCount => self.selfid_count = value,
            Register::NodeId => self.node_id = value,
            Register::Version
            | Register::GuidRom
            | Register::BusId
            | Register::GuidHi
            | Register::GuidLo
            | Register::VendorId => {}
        }
    }

    fn delay(&mut self, ticks: u32) {
        for _ in 0..ticks {
            self.step();
        }
    }
}

/// Leak-based stand-in for the boot-protected memory pool.
///
/// Buffers stay allocated for the rest of the test process; bus
/// addresses are handed out from a private counter, aligned as
/// requested, independent of the host pointers.
pub struct TestMemory {
    next_bus_addr: u32,
}

impl TestMemory {
    pub fn new() -> Self {
        Self { next_bus_addr: 0x0080_0000 }
    }

    /// Allocate zeroed host storage and pair it with an arbitrary bus
    /// address, aligned or not, for alignment-check tests.
    pub fn buffer_with_bus_addr(&mut self, words: usize, bus_addr: u32) -> DmaBuffer {
        let layout = Layout::from_size_align(words * 4, 4096).expect("bad layout");
        let ptr = unsafe { alloc_zeroed(layout) } as *mut u32;
        assert!(!ptr.is_null());
        unsafe { DmaBuffer::new(ptr, words, bus_addr) }
    }
}

impl BootMemory for TestMemory {
    fn allocate_protected(&mut self, words: usize, align: usize) -> Option<DmaBuffer> {
        let align = align as u32;
        let bus_addr = (self.next_bus_addr + align - 1) & !(align - 1);
        self.next_bus_addr = bus_addr + (words * 4) as u32;
        Some(self.buffer_with_bus_addr(words, bus_addr))
    }
}
