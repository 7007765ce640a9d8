#[path = "../../drivers/pci.rs"]
pub mod pci;

#[path = "../../drivers/firewire/mod.rs"]
pub mod firewire;
