//! Config ROM construction and loading
//!
//! Builds the CRC16-protected, quadlet-addressed identification block
//! this node exposes on the bus: bus info block, root directory, text
//! leaf and an info leaf carrying the boot stage's multiboot pointer
//! for forensic reference.

use bit_field::BitField;

use super::regs::{HcControl, RegisterIo, Register};
use super::{DmaBuffer, Fault};
use crate::crc16::crc16;

/// Quadlets in the ROM image (1 KiB).
pub const CONFIG_ROM_WORDS: usize = 256;
/// The image must sit on a 1 KiB boundary for the ConfigROMmap DMA.
pub const CONFIG_ROM_ALIGN: usize = 1024;

/// Vendor ID published in the root directory.
pub const NODE_VENDOR_ID: u32 = 0x005045;
/// Model ID published in the root directory.
pub const NODE_MODEL_ID: u32 = 0x000001;

/// Sixteen bytes of ASCII, packed four per quadlet into the text leaf.
const ID_TEXT: [u8; 16] = *b"Firelock OHCI v1";

// Root directory entry keys: immediate vendor/model, textual
// descriptor leaf, vendor-dependent info leaf.
const KEY_VENDOR: u32 = 0x03;
const KEY_MODEL: u32 = 0x17;
const KEY_TEXT_LEAF: u32 = 0x81;
const KEY_INFO_LEAF: u32 = 0xB8;

/// Requested link speed for the bus-options quadlet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSpeed {
    S100,
    S200,
    S400,
    /// Keep whatever the hardware reports.
    Max,
}

impl LinkSpeed {
    fn code(self) -> Option<u32> {
        match self {
            LinkSpeed::S100 => Some(0),
            LinkSpeed::S200 => Some(1),
            LinkSpeed::S400 => Some(2),
            LinkSpeed::Max => None,
        }
    }
}

/// Fill `rom` with the fixed 19-quadlet image.
///
/// Bus ID, bus options and GUID come from hardware. A speed override
/// above the hardware-reported maximum is rejected with a log line,
/// not an error.
pub fn build<R: RegisterIo>(io: &mut R, rom: &mut [u32], speed: LinkSpeed, info_ptr: u32) {
    for word in rom.iter_mut() {
        *word = 0;
    }

    // Bus info block.
    rom[1] = io.read(Register::BusId);

    // Mask the bus-manager capability bits; this node never contends.
    let mut bus_options = io.read(Register::BusOptions) & 0x0FFF_FFFF;
    if let Some(code) = speed.code() {
        if code > bus_options.get_bits(0..4) {
            log::warn!("requested link speed above hardware maximum, ignored");
        } else {
            bus_options.set_bits(0..4, code);
        }
    }
    log::info!("bus options set to {:#x}", bus_options);
    rom[2] = bus_options;

    rom[3] = io.read(Register::GuidHi);
    rom[4] = io.read(Register::GuidLo);

    let bib_crc = crc16(&rom[1..5]);
    rom[0] = 0x0404_0000 | u32::from(bib_crc);

    // Root directory.
    rom[6] = KEY_VENDOR << 24 | NODE_VENDOR_ID;
    rom[7] = KEY_MODEL << 24 | NODE_MODEL_ID;
    rom[8] = KEY_TEXT_LEAF << 24 | 2;
    rom[9] = KEY_INFO_LEAF << 24 | 8;
    let dir_crc = crc16(&rom[6..10]);
    rom[5] = 4 << 16 | u32::from(dir_crc);

    // Text leaf: language/charset quadlets stay zero, then the packed
    // identification string.
    for (i, chunk) in ID_TEXT.chunks_exact(4).enumerate() {
        rom[13 + i] = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    let text_crc = crc16(&rom[11..17]);
    rom[10] = 6 << 16 | u32::from(text_crc);

    // Info leaf: the multiboot information address, for whoever reads
    // our ROM off the bus later.
    rom[18] = info_ptr;
    let info_crc = crc16(&rom[18..19]);
    rom[17] = 1 << 16 | u32::from(info_crc);
}

/// Hand the built image to the controller.
pub fn load<R: RegisterIo>(io: &mut R, rom: &mut DmaBuffer) -> Result<(), Fault> {
    if rom.bus_addr() as usize & (CONFIG_ROM_ALIGN - 1) != 0 {
        return Err(Fault::MisalignedBuffer);
    }

    let link_enabled = io.read(Register::HcControlSet) & HcControl::LINK_ENABLE.bits() != 0;
    let words = rom.as_mut_slice();

    if !link_enabled {
        // Not up yet, so fill the shadow registers by hand.
        io.write(Register::ConfigRomHeader, words[0]);
        io.write(Register::BusOptions, words[2]);
    }

    // The bus wants network byte order.
    for word in words.iter_mut() {
        *word = word.to_be();
    }

    // Some TI controllers reload ConfigROMhdr and BusOptions from
    // memory after a bus reset and get the byte swapping wrong: block
    // reads of the ROM (served straight from memory) come out right
    // while quadlet reads return these two words swapped. Since the
    // spec mandates quadlet reads, swap the two fields once more in
    // memory so quadlet reads see the right values. Anyone doing block
    // reads now gets these two fields swapped, but they are off-spec
    // anyway.
    words[0] = words[0].swap_bytes();
    words[2] = words[2].swap_bytes();

    io.write(Register::ConfigRomMap, rom.bus_addr());
    io.write(Register::HcControlSet, HcControl::BIB_IMAGE_VALID.bits());

    Ok(())
}
