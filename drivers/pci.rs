//! Simple PCI bus scanning utilities
//!
//! Type-1 configuration mechanism, just enough to locate OHCI
//! FireWire controllers and read their BAR0 register mapping.

use heapless::Vec;
use x86_64::instructions::port::Port;

const CONFIG_ADDRESS: u16 = 0xCF8;
const CONFIG_DATA: u16 = 0xCFC;

/// FireWire host controllers live at class 0x0C (serial bus),
/// subclass 0x00, programming interface 0x10 (OHCI).
pub const FIREWIRE_CLASS: u8 = 0x0C;
pub const FIREWIRE_SUBCLASS: u8 = 0x00;

/// Config-space offset of the first base address register.
pub const CFG_BAR0: u8 = 0x10;
/// Config-space offset of the vendor/device ID dword.
pub const CFG_VENDOR_ID: u8 = 0x00;

const MAX_DEVICES: usize = 32;

/// PCI device identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PciDeviceId {
    pub vendor_id: u16,
    pub device_id: u16,
}

/// Basic PCI device information
#[derive(Debug, Clone, Copy)]
pub struct PciDevice {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
    pub id: PciDeviceId,
    pub class: u8,
    pub subclass: u8,
    pub bar0: u32,
}

impl PciDevice {
    /// Read a 32-bit config-space register of this device.
    pub fn config_read_u32(&self, offset: u8) -> u32 {
        read_config_dword(self.bus, self.device, self.function, offset)
    }
}

fn read_config_dword(bus: u8, device: u8, function: u8, offset: u8) -> u32 {
    let address = ((bus as u32) << 16)
        | ((device as u32) << 11)
        | ((function as u32) << 8)
        | ((offset as u32) & 0xFC)
        | 0x8000_0000;
    unsafe {
        let mut addr = Port::<u32>::new(CONFIG_ADDRESS);
        let mut data = Port::<u32>::new(CONFIG_DATA);
        addr.write(address);
        data.read()
    }
}

fn read_config_word(bus: u8, device: u8, function: u8, offset: u8) -> u16 {
    let dword = read_config_dword(bus, device, function, offset);
    ((dword >> ((offset & 2) * 8)) & 0xFFFF) as u16
}

fn device_exists(bus: u8, device: u8, function: u8) -> bool {
    read_config_word(bus, device, function, 0x00) != 0xFFFF
}

fn read_device(bus: u8, device: u8, function: u8) -> PciDevice {
    let vendor = read_config_word(bus, device, function, 0x00);
    let device_id = read_config_word(bus, device, function, 0x02);
    let class_info = read_config_dword(bus, device, function, 0x08);
    let class = (class_info >> 24) as u8;
    let subclass = (class_info >> 16) as u8;
    let bar0 = read_config_dword(bus, device, function, CFG_BAR0);
    PciDevice {
        bus,
        device,
        function,
        id: PciDeviceId { vendor_id: vendor, device_id },
        class,
        subclass,
        bar0,
    }
}

/// Scan the entire PCI bus.
pub fn scan_bus() -> Vec<PciDevice, MAX_DEVICES> {
    let mut devices = Vec::new();
    for bus in 0u8..=255 {
        for dev in 0u8..32 {
            for func in 0u8..8 {
                if !device_exists(bus, dev, func) {
                    if func == 0 {
                        break;
                    }
                    continue;
                }
                // Anything past capacity is silently dropped.
                let _ = devices.push(read_device(bus, dev, func));
            }
        }
    }
    devices
}

/// Find the first device with the given class and subclass.
pub fn find_device(class: u8, subclass: u8) -> Option<PciDevice> {
    scan_bus()
        .into_iter()
        .find(|d| d.class == class && d.subclass == subclass)
}

/// Find all FireWire OHCI controllers.
pub fn find_firewire_controllers() -> Vec<PciDevice, MAX_DEVICES> {
    scan_bus()
        .into_iter()
        .filter(|d| d.class == FIREWIRE_CLASS && d.subclass == FIREWIRE_SUBCLASS)
        .collect()
}
