use anyhow::{anyhow, bail, Context, Result};
use bootcheck_core::memory::ProgramImage;
use goblin::elf::program_header::PT_LOAD;
use goblin::elf::section_header::SHT_NOBITS;
use goblin::elf::Elf;
use tracing::{debug, info, warn};

/// Section the firmware build places its reference flash checksum in.
pub const CHECKSUM_SECTION: &str = ".flash_checksum";

pub fn parse_elf(buffer: &[u8]) -> Result<ProgramImage> {
    let elf = Elf::parse(buffer).context("Failed to parse ELF binary")?;

    info!("ELF Entry Point: {:#x}", elf.entry);

    let mut program_image = ProgramImage::new(elf.entry);

    for ph in &elf.program_headers {
        if ph.p_type != PT_LOAD {
            continue;
        }
        // Load address, which is where the bytes sit in flash.
        let start_addr = ph.p_paddr;
        let size = ph.p_filesz as usize;
        let offset = ph.p_offset as usize;

        if size == 0 {
            continue;
        }

        debug!(
            "Found Loadable Segment: Addr={:#x}, Size={} bytes, Offset={:#x}",
            start_addr, size, offset
        );

        if offset + size > buffer.len() {
            return Err(anyhow!("Segment out of bounds in ELF file"));
        }

        program_image.add_segment(start_addr, buffer[offset..offset + size].to_vec());
    }

    if program_image.segments.is_empty() {
        warn!("No loadable segments found in ELF file");
    }

    program_image.stored_checksum = stored_checksum(&elf, buffer)?;
    if let Some(value) = program_image.stored_checksum {
        info!("Reference flash checksum from {}: {:#x}", CHECKSUM_SECTION, value);
    }

    Ok(program_image)
}

/// Little-endian u64 from the checksum section, when the image carries one.
fn stored_checksum(elf: &Elf, buffer: &[u8]) -> Result<Option<u64>> {
    let Some(sh) = elf
        .section_headers
        .iter()
        .find(|sh| elf.shdr_strtab.get_at(sh.sh_name) == Some(CHECKSUM_SECTION))
    else {
        return Ok(None);
    };

    if sh.sh_type == SHT_NOBITS || sh.sh_size < 8 {
        bail!(
            "{} section must hold at least 8 bytes of data (has {})",
            CHECKSUM_SECTION,
            sh.sh_size
        );
    }
    let offset = sh.sh_offset as usize;
    let bytes = buffer
        .get(offset..offset + 8)
        .ok_or_else(|| anyhow!("{} section out of bounds in ELF file", CHECKSUM_SECTION))?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(Some(u64::from_le_bytes(raw)))
}
