//! OHCI controller bring-up and runtime event handling
//!
//! The ordered sequence that takes a freshly discovered controller to
//! a locked-down, link-enabled state, and the cooperative polling loop
//! that keeps it there across bus resets. All waiting is bounded
//! active polling; there are no interrupts in the pre-boot phase.

use bit_field::BitField;

use super::crom::{self, LinkSpeed, CONFIG_ROM_ALIGN, CONFIG_ROM_WORDS};
use super::phy::{
    self, PAGE_PORT_STATUS, PHY_CONTENDER, PHY_EXTENDED, PHY_IBR, PHY_PAGED_BASE,
    PHY_PORT_COUNT_MASK, PHY_PORT_DISABLED,
};
use super::regs::{
    self, phy_read_request, ContextControl, HcControl, IntEvent, LinkControl, MmioRegisters,
    RegisterIo, Register, MISC_TIMEOUT, NODE_ID_NUMBER, NODE_ID_VALID, PHY_READ_DONE,
    RESET_TIMEOUT,
};
use super::{BootMemory, DmaBuffer, Failure, Fault};
use crate::drivers::pci::{PciDevice, CFG_VENDOR_ID};

/// SelfID DMA buffer capacity in quadlets.
pub const SELFID_WORDS: usize = 504;
/// SelfID buffer alignment required by the SelfIDBuffer register.
pub const SELFID_ALIGN: usize = 2048;

/// Written into SelfID word 0 so buffer corruption is noticeable.
const SELFID_SENTINEL: u32 = 0xDEAD_BEEF;

const LPS_RETRIES: u32 = 10;
const LPS_REPOLLS: u32 = 10;
const RESET_DRAIN_POLLS: u32 = 1000;

/// A locked-down OHCI controller.
///
/// Created once per discovered controller; lives for the rest of the
/// boot stage. There is no teardown: the configured state is the
/// hand-off contract to the next boot stage.
pub struct OhciController<R: RegisterIo> {
    regs: R,
    posted_writes: bool,
    total_ports: u8,
    enhanced_phy_map: bool,
    selfid_buffer: DmaBuffer,
    config_rom: DmaBuffer,
}

impl OhciController<MmioRegisters> {
    /// Bring up the controller behind a PCI device's BAR0 mapping.
    pub fn from_pci(
        pci: &PciDevice,
        mem: &mut dyn BootMemory,
        posted_writes: bool,
        speed: LinkSpeed,
        info_ptr: u32,
    ) -> Result<Self, Failure> {
        let bar0 = pci.bar0 & !0xF;
        if bar0 == 0 || pci.bar0 == 0xFFFF_FFFF {
            return Err(Failure::Fatal(Fault::InvalidRegisterMapping));
        }

        // Read the identification fresh from config space instead of
        // trusting the scan-time snapshot.
        let id = pci.config_read_u32(CFG_VENDOR_ID);
        log::info!(
            "controller {:04x}:{:04x} at {:02x}:{:02x}.{}",
            id & 0xFFFF,
            id >> 16,
            pci.bus,
            pci.device,
            pci.function
        );

        let regs = unsafe { MmioRegisters::new(bar0) };
        Self::bring_up(regs, mem, posted_writes, speed, info_ptr)
    }
}

impl<R: RegisterIo> OhciController<R> {
    /// Run the full bring-up state machine.
    ///
    /// Returns the Ready controller, or a [`Failure`] the boot
    /// orchestrator classifies: an unsupported version or an LPS that
    /// never came up leave the controller unprogrammed (and therefore
    /// inert), while `Failure::Fatal` means the boot must halt.
    pub fn bring_up(
        mut regs: R,
        mem: &mut dyn BootMemory,
        posted_writes: bool,
        speed: LinkSpeed,
        info_ptr: u32,
    ) -> Result<Self, Failure> {
        check_version(&regs)?;
        soft_reset(&mut regs)?;
        disable_link(&mut regs)?;

        // Posted writes let the controller ack physical writes before
        // the data lands; see OHCI 3.3.3 for the coherency fine print.
        let reg = if posted_writes {
            Register::HcControlSet
        } else {
            Register::HcControlClear
        };
        regs.write(reg, HcControl::POSTED_WRITE_ENABLE.bits());

        link_power_up(&mut regs)?;

        // This node never contends for bus manager.
        let phy4 = phy::phy_read(&mut regs, 4)?;
        phy::phy_write(&mut regs, 4, phy4 & !PHY_CONTENDER)?;

        // LPS is up, the PHY answers. Discover ports and register map.
        let phy2 = phy::phy_read(&mut regs, 2)?;
        let total_ports = phy2 & PHY_PORT_COUNT_MASK;
        let enhanced_phy_map = (phy2 >> 5) == PHY_EXTENDED;
        log::info!(
            "controller has {} ports and {} enhanced PHY map",
            total_ports,
            if enhanced_phy_map { "an" } else { "no" }
        );

        if enhanced_phy_map {
            enable_ports(&mut regs, total_ports)?;
        }

        if regs.read(Register::HcControlSet) & HcControl::PROGRAM_PHY_ENABLE.bits() != 0 {
            log::info!("enabling IEEE1394a enhancements");
            regs.write(Register::HcControlSet, HcControl::A_PHY_ENHANCE_ENABLE.bits());
        } else {
            log::info!("IEEE1394a enhancements are already configured");
        }

        lock_down_filters(&mut regs);

        let selfid_buffer = install_selfid_buffer(&mut regs, mem)?;

        if regs.read(Register::HcControlSet) & HcControl::LINK_ENABLE.bits() != 0 {
            log::warn!("link is already enabled, why?");
        }

        let config_rom = install_config_rom(&mut regs, mem, speed, info_ptr)?;

        // Enable the link and wait for it to come up.
        regs.write(Register::HcControlSet, HcControl::LINK_ENABLE.bits());
        regs::wait_loop(
            &mut regs,
            Register::HcControlSet,
            HcControl::LINK_ENABLE.bits(),
            HcControl::LINK_ENABLE.bits(),
            MISC_TIMEOUT,
        )?;
        log::info!("link is up, forcing bus reset");

        let mut controller = OhciController {
            regs,
            posted_writes,
            total_ports,
            enhanced_phy_map,
            selfid_buffer,
            config_rom,
        };
        controller.reset_and_settle()?;

        let guid = (u64::from(controller.regs.read(Register::GuidHi)) << 32)
            | u64::from(controller.regs.read(Register::GuidLo));
        log::info!("GUID: {:#018x}", guid);

        Ok(controller)
    }

    /// Force a bus reset via the PHY's initiate-bus-reset bit.
    pub fn force_bus_reset(&mut self) -> Result<(), Fault> {
        let phy1 = phy::phy_read(&mut self.regs, 1)?;
        phy::phy_write(&mut self.regs, 1, phy1 | PHY_IBR)
    }

    /// Handle at most one pending interrupt condition.
    ///
    /// Reads the unmasked event register once. A bus reset runs the
    /// full recovery before returning; a posted-write or unrecoverable
    /// error is logged and acknowledged. Callers poll this repeatedly
    /// for the rest of the pre-boot phase.
    pub fn poll_events(&mut self) -> Result<(), Fault> {
        let events = self.regs.read(Register::IntEventSet);

        if events & IntEvent::BUS_RESET.bits() != 0 {
            log::info!("bus reset");
            self.handle_bus_reset()?;
        } else if events & IntEvent::POSTED_WRITE_ERR.bits() != 0 {
            log::warn!("posted write error");
            self.regs
                .write(Register::IntEventClear, IntEvent::POSTED_WRITE_ERR.bits());
        } else if events & IntEvent::UNRECOVERABLE_ERROR.bits() != 0 {
            log::warn!("unrecoverable error");
            self.regs
                .write(Register::IntEventClear, IntEvent::UNRECOVERABLE_ERROR.bits());
        }

        Ok(())
    }

    /// Block until the controller reports a valid node ID.
    pub fn wait_for_node_id(&mut self) -> Result<u8, Fault> {
        regs::wait_loop(
            &mut self.regs,
            Register::NodeId,
            NODE_ID_VALID,
            NODE_ID_VALID,
            MISC_TIMEOUT,
        )?;

        Ok((self.regs.read(Register::NodeId) & NODE_ID_NUMBER) as u8)
    }

    /// Ports discovered on the PHY.
    pub fn total_ports(&self) -> u8 {
        self.total_ports
    }

    /// Whether the PHY exposes the enhanced per-port register bank.
    pub fn enhanced_phy_map(&self) -> bool {
        self.enhanced_phy_map
    }

    /// Whether posted writes were enabled at bring-up.
    pub fn posted_writes(&self) -> bool {
        self.posted_writes
    }

    /// Bus-reset recovery. Does not return until the reset is handled.
    fn handle_bus_reset(&mut self) -> Result<(), Fault> {
        // Quiesce both async transmit contexts before trusting
        // anything about the post-reset state.
        self.regs.write(
            Register::AsReqContextControlClear,
            ContextControl::RUN.bits(),
        );
        self.regs.write(
            Register::AsRspContextControlClear,
            ContextControl::RUN.bits(),
        );
        regs::wait_loop(
            &mut self.regs,
            Register::AsReqContextControlSet,
            ContextControl::ACTIVE.bits(),
            0,
            10,
        )?;
        regs::wait_loop(
            &mut self.regs,
            Register::AsRspContextControlSet,
            ContextControl::ACTIVE.bits(),
            0,
            10,
        )?;

        // Configuration invariant from bring-up; losing it means the
        // SelfID phase below can never complete.
        if self.regs.read(Register::LinkControlSet) & LinkControl::RCV_SELF_ID.bits() == 0 {
            return Err(Fault::SelfIdReceiveDisabled);
        }
        regs::wait_loop(
            &mut self.regs,
            Register::IntEventSet,
            IntEvent::SELF_ID_COMPLETE_2.bits(),
            IntEvent::SELF_ID_COMPLETE_2.bits(),
            1000,
        )?;

        self.regs.write(
            Register::IntEventClear,
            (IntEvent::BUS_RESET | IntEvent::SELF_ID_COMPLETE_2).bits(),
        );

        // The hardware clears the request filters on bus reset;
        // reinstate accept-all.
        self.regs.write(Register::AsReqFilterHiSet, !0);
        self.regs.write(Register::AsReqFilterLoSet, !0);
        self.regs.write(Register::PhyReqFilterHiSet, !0);
        self.regs.write(Register::PhyReqFilterLoSet, !0);

        let readback = self.regs.read(Register::PhyReqFilterLoSet)
            & self.regs.read(Register::PhyReqFilterHiSet)
            & self.regs.read(Register::AsReqFilterLoSet)
            & self.regs.read(Register::AsReqFilterHiSet);
        if readback != !0 {
            log::warn!(
                "controller seems confused, request filters read back {:#x}",
                readback
            );
        }

        self.validate_selfids()
    }

    /// Walk the received SelfID packets and check their complement
    /// redundancy.
    fn validate_selfids(&mut self) -> Result<(), Fault> {
        let selfid_count = self.regs.read(Register::SelfIdCount);
        let generation = selfid_count.get_bits(16..24);
        let words = selfid_count.get_bits(2..10) as usize;

        let capacity = self.selfid_buffer.words();
        let buffer = self.selfid_buffer.as_slice();
        let mut i = 1;
        while i < words {
            if i + 1 >= capacity {
                return Err(Fault::SelfIdOverflow);
            }
            let cur = buffer[i];
            let next = buffer[i + 1];
            log::info!(
                "SelfID#{:x} buf[{:#x}] = {:#010x} ({})",
                generation,
                i,
                cur,
                if selfid_pair_ok(cur, next) { "OK" } else { "CORRUPT" }
            );
            i += 2;
        }

        Ok(())
    }

    /// Force a bus reset and drain the resulting events, then report
    /// whether the generation counter actually moved.
    fn reset_and_settle(&mut self) -> Result<(), Fault> {
        let generation = self.regs.read(Register::SelfIdCount).get_bits(16..24);

        self.force_bus_reset()?;
        for _ in 0..RESET_DRAIN_POLLS {
            self.poll_events()?;
            self.regs.delay(1);
        }

        if generation == self.regs.read(Register::SelfIdCount).get_bits(16..24) {
            log::warn!("no bus reset observed (or a lot of them), things may be broken");
        }

        Ok(())
    }
}

/// A SelfID packet word and its mandatory bitwise complement.
fn selfid_pair_ok(word: u32, complement: u32) -> bool {
    word == !complement
}

/// The Version register must report at least OHCI 1.10.
fn check_version<R: RegisterIo>(regs: &R) -> Result<(), Failure> {
    let version_reg = regs.read(Register::Version);
    if version_reg == 0xFFFF_FFFF {
        return Err(Failure::Fatal(Fault::InvalidRegisterMapping));
    }

    let version = version_reg.get_bits(16..24) as u8;
    let revision = version_reg.get_bits(0..8) as u8;
    if version <= 1 && revision < 10 {
        log::warn!(
            "controller implements OHCI {}.{}, but we require at least 1.10",
            version,
            revision
        );
        return Err(Failure::UnsupportedVersion { version, revision });
    }

    Ok(())
}

/// Soft-reset the controller and wait for it to reinitialize.
fn soft_reset<R: RegisterIo>(regs: &mut R) -> Result<(), Fault> {
    log::info!("soft-resetting controller");
    regs.write(Register::HcControlSet, HcControl::SOFT_RESET.bits());
    regs::wait_loop(
        regs,
        Register::HcControlSet,
        HcControl::SOFT_RESET.bits(),
        0,
        RESET_TIMEOUT,
    )
}

/// Drop the link so the low-level configuration can be changed, and
/// clear byte swapping and tardy acks while at it.
fn disable_link<R: RegisterIo>(regs: &mut R) -> Result<(), Fault> {
    regs.write(Register::HcControlClear, HcControl::LINK_ENABLE.bits());
    regs::wait_loop(
        regs,
        Register::HcControlSet,
        HcControl::LINK_ENABLE.bits(),
        0,
        MISC_TIMEOUT,
    )?;

    regs.write(
        Register::HcControlClear,
        (HcControl::NO_BYTE_SWAP_DATA | HcControl::ACK_TARDY_ENABLE).bits(),
    );
    Ok(())
}

/// Bring up Link Power Status.
///
/// Messier than it should be: on some controllers the PHY's SCLK does
/// not start on the first attempt and the only way to find out is to
/// try a PHY read and watch what happens. Three outcomes per probe:
/// the read completes (done), regAccessFail fires (SCLK still
/// starting, probe again), or nothing at all happens (SCLK never
/// started, tear LPS down and start the attempt over).
fn link_power_up<R: RegisterIo>(regs: &mut R) -> Result<(), Failure> {
    for attempt in (0..LPS_RETRIES).rev() {
        regs.write(Register::HcControlSet, HcControl::LPS.bits());
        regs::wait_loop(
            regs,
            Register::HcControlSet,
            HcControl::LPS.bits(),
            HcControl::LPS.bits(),
            MISC_TIMEOUT,
        )?;

        // SCLK should be up by now.
        regs.delay(50);

        regs.write(Register::IntEventClear, !0);
        regs.write(Register::PhyControl, phy_read_request(1));

        let mut repolls = LPS_REPOLLS;
        loop {
            regs.delay(50);

            let phy_control = regs.read(Register::PhyControl);
            let events = regs.read(Register::IntEventSet);

            if phy_control & PHY_READ_DONE == 0 && events & IntEvent::REG_ACCESS_FAIL.bits() == 0 {
                // Nothing happened. Either the read is still pending,
                // unlikely after this long, or SCLK never started and
                // the regAccessFail that should tell us so does not
                // work either.
                log::info!("SCLK seems not to be running");
                break;
            }

            if events & IntEvent::REG_ACCESS_FAIL.bits() != 0 {
                log::info!("regAccessFail while waiting for SCLK to start");
                if repolls == 0 {
                    break;
                }
                repolls -= 1;
                continue;
            }

            return Ok(());
        }

        log::info!("{} LPS retries left", attempt);
        regs.write(Register::HcControlClear, HcControl::LPS.bits());
        regs::wait_loop(
            regs,
            Register::HcControlSet,
            HcControl::LPS.bits(),
            0,
            MISC_TIMEOUT,
        )?;
    }

    log::warn!("LPS did not come up");
    Err(Failure::LinkPowerTimeout)
}

/// Clear the port-disabled bit on every port of an enhanced-map PHY.
fn enable_ports<R: RegisterIo>(regs: &mut R, total_ports: u8) -> Result<(), Fault> {
    for port in 0..total_ports {
        phy::phy_page_select(regs, true, PAGE_PORT_STATUS, port)?;
        let status = phy::phy_read(regs, PHY_PAGED_BASE)?;
        if status & PHY_PORT_DISABLED != 0 {
            log::info!("enabling port {}", port);
            phy::phy_write(regs, PHY_PAGED_BASE, status & !PHY_PORT_DISABLED)?;
        }
    }
    Ok(())
}

/// Reset link control and open the request filters.
///
/// Accept-all filters are intentional: the lockdown property comes
/// from the DMA contexts never being armed, not from filtering.
fn lock_down_filters<R: RegisterIo>(regs: &mut R) {
    regs.write(Register::LinkControlClear, !0);

    regs.write(Register::AsReqFilterHiSet, !0);
    regs.write(Register::AsReqFilterLoSet, !0);
    regs.write(Register::PhyReqFilterHiSet, !0);
    regs.write(Register::PhyReqFilterLoSet, !0);

    // Physical requests may reach up to 0xFFFF_0000_0000.
    regs.write(Register::PhyUpperBound, 0xFFFF_0000);

    // Retry async transmits against busy partners.
    regs.write(Register::ATRetries, 0xFFF);
}

/// Allocate and install the SelfID DMA buffer.
fn install_selfid_buffer<R: RegisterIo>(
    regs: &mut R,
    mem: &mut dyn BootMemory,
) -> Result<DmaBuffer, Fault> {
    let mut buffer = mem
        .allocate_protected(SELFID_WORDS, SELFID_ALIGN)
        .ok_or(Fault::OutOfProtectedMemory)?;
    if buffer.bus_addr() as usize & (SELFID_ALIGN - 1) != 0 {
        return Err(Fault::MisalignedBuffer);
    }
    log::info!("SelfID buffer at {:#x}", buffer.bus_addr());

    buffer.as_mut_slice()[0] = SELFID_SENTINEL;
    regs.write(Register::SelfIdBuffer, buffer.bus_addr());
    regs.write(Register::LinkControlSet, LinkControl::RCV_SELF_ID.bits());

    Ok(buffer)
}

/// Allocate, build and load the Config ROM.
fn install_config_rom<R: RegisterIo>(
    regs: &mut R,
    mem: &mut dyn BootMemory,
    speed: LinkSpeed,
    info_ptr: u32,
) -> Result<DmaBuffer, Fault> {
    let mut rom = mem
        .allocate_protected(CONFIG_ROM_WORDS, CONFIG_ROM_ALIGN)
        .ok_or(Fault::OutOfProtectedMemory)?;
    log::info!("Config ROM at {:#x}", rom.bus_addr());

    crom::build(regs, rom.as_mut_slice(), speed, info_ptr);
    crom::load(regs, &mut rom)?;

    Ok(rom)
}
