#![cfg_attr(not(test), no_std)]

//! Pre-boot FireWire OHCI lockdown
//!
//! Part of a trusted-boot chain: an unconfigured IEEE-1394 OHCI
//! controller is a bus master that will read and write arbitrary
//! physical memory for any device on the bus. This crate discovers
//! such controllers over PCI and drives each one into a known-safe,
//! link-enabled state with no DMA context armed, then keeps polling
//! for bus resets until control passes to the next boot stage.
//!
//! Typical use from the boot orchestrator:
//!
//! ```ignore
//! serial::init();
//! let mut controllers = heapless::Vec::<_, 4>::new();
//! for dev in drivers::pci::find_firewire_controllers() {
//!     match OhciController::from_pci(&dev, &mut boot_mem, false, LinkSpeed::Max, mbi_addr) {
//!         Ok(ctrl) => { let _ = controllers.push(ctrl); }
//!         Err(Failure::Fatal(fault)) => halt(fault),
//!         Err(failure) => log::warn!("skipping controller: {}", failure),
//!     }
//! }
//! loop {
//!     for ctrl in controllers.iter_mut() {
//!         if let Err(fault) = ctrl.poll_events() {
//!             halt(fault);
//!         }
//!     }
//! }
//! ```

pub mod crc16;
pub mod drivers;
pub mod serial;

pub use drivers::firewire::{
    BootMemory, DmaBuffer, Failure, Fault, LinkSpeed, OhciController,
};
