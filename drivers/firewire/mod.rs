//! IEEE-1394 (FireWire) OHCI lockdown driver
//!
//! Brings an OHCI controller into a known-safe state during the
//! pre-boot phase: soft reset, link-layer configuration, PHY power-up,
//! request-filter lockdown, SelfID buffer and Config ROM installation.
//! An unconfigured controller is an open DMA attack surface; after
//! bring-up the controller is link-enabled with no DMA context armed.

pub mod crom;
pub mod ohci;
pub mod phy;
pub mod regs;

#[cfg(test)]
pub mod sim;

pub use crom::LinkSpeed;
pub use ohci::OhciController;

use core::fmt;
use core::slice;

use regs::Register;

/// Unrecoverable boot-integrity faults. Any of these means the
/// controller's trust state cannot be established; the boot
/// orchestrator is expected to halt instead of continuing with an
/// unverified DMA-capable device on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// BAR0 read back as all-ones or zero.
    InvalidRegisterMapping,
    /// A DMA buffer does not meet its natural alignment requirement.
    MisalignedBuffer,
    /// A bounded register poll ran out of ticks.
    WaitTimeout {
        reg: Register,
        mask: u32,
        value: u32,
    },
    /// Page select attempted on a PHY without the enhanced register map.
    PageSelectUnsupported,
    /// PHY page index outside `[0, 7)`.
    BadPhyPage,
    /// PHY port index outside `[0, 16)`.
    BadPhyPort,
    /// SelfID word count points past the 504-quadlet buffer.
    SelfIdOverflow,
    /// SelfID reception was found disabled during bus-reset recovery.
    SelfIdReceiveDisabled,
    /// The boot-protected memory pool could not satisfy an allocation.
    OutOfProtectedMemory,
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::InvalidRegisterMapping => write!(f, "invalid OHCI register mapping"),
            Fault::MisalignedBuffer => write!(f, "misaligned DMA buffer"),
            Fault::WaitTimeout { reg, mask, value } => write!(
                f,
                "timed out waiting for {:?} mask {:#x} value {:#x}",
                reg, mask, value
            ),
            Fault::PageSelectUnsupported => write!(f, "no enhanced PHY map, page select impossible"),
            Fault::BadPhyPage => write!(f, "PHY page out of range"),
            Fault::BadPhyPort => write!(f, "PHY port out of range"),
            Fault::SelfIdOverflow => write!(f, "SelfID word count exceeds buffer"),
            Fault::SelfIdReceiveDisabled => write!(f, "SelfID reception disabled"),
            Fault::OutOfProtectedMemory => write!(f, "out of boot-protected memory"),
        }
    }
}

/// Why bring-up did not hand back a controller.
///
/// `UnsupportedVersion` and `LinkPowerTimeout` are reported failures:
/// the caller may continue booting without this controller locked down
/// by us, as it was never programmed for DMA. `Fatal` wraps an
/// integrity fault and must halt the boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    UnsupportedVersion { version: u8, revision: u8 },
    LinkPowerTimeout,
    Fatal(Fault),
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::UnsupportedVersion { version, revision } => {
                write!(f, "controller implements OHCI {}.{}, need 1.10", version, revision)
            }
            Failure::LinkPowerTimeout => write!(f, "LPS did not come up"),
            Failure::Fatal(fault) => write!(f, "fatal: {}", fault),
        }
    }
}

impl From<Fault> for Failure {
    fn from(fault: Fault) -> Self {
        Failure::Fatal(fault)
    }
}

/// An exclusively-owned, device-reachable quadlet buffer.
///
/// `bus_addr` is the address the controller DMAs against; in the
/// identity-mapped pre-boot environment it equals the virtual address,
/// in tests it is whatever the fake allocator says.
pub struct DmaBuffer {
    ptr: *mut u32,
    words: usize,
    bus_addr: u32,
}

impl DmaBuffer {
    /// Wrap raw protected memory.
    ///
    /// # Safety
    /// `ptr` must be valid for reads and writes of `words` quadlets for
    /// the rest of the boot stage and must not be aliased by safe code.
    pub unsafe fn new(ptr: *mut u32, words: usize, bus_addr: u32) -> Self {
        Self { ptr, words, bus_addr }
    }

    /// Address the controller uses to reach this buffer.
    pub fn bus_addr(&self) -> u32 {
        self.bus_addr
    }

    /// Capacity in quadlets.
    pub fn words(&self) -> usize {
        self.words
    }

    pub fn as_slice(&self) -> &[u32] {
        unsafe { slice::from_raw_parts(self.ptr, self.words) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u32] {
        unsafe { slice::from_raw_parts_mut(self.ptr, self.words) }
    }
}

/// Boot-protected memory allocator, provided by the boot stage.
///
/// Returned buffers are zero-initialized and naturally aligned to the
/// requested alignment. Allocation failure is fatal to bring-up: a
/// controller cannot be locked down without its DMA buffers.
pub trait BootMemory {
    fn allocate_protected(&mut self, words: usize, align: usize) -> Option<DmaBuffer>;
}
