//! In-memory model of the two ELF images the overlay works on.
//!
//! Container parsing is delegated to `goblin`; this module lifts the pieces
//! the overlay engine consumes into owned structures:
//!
//! - `Segment`: a loadable (PT_LOAD) range with its file-backed bytes
//! - `Section`: a section with type/permission flags, its bytes, and the
//!   single bounds-checked mutation the engine is allowed to perform
//! - `Image`: both tables plus the identity fields needed for reporting
//!   and compatibility checks, and in-place persistence of patched bytes
//!
//! Segment and section tables are populated only for ELF64 images. For any
//! other class the loader records the identity fields and leaves both
//! tables empty, so no segment or section data is ever read from an image
//! the overlay cannot handle.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use goblin::elf::header::{
    EI_CLASS, EI_DATA, ELFCLASS32, ELFCLASS64, ELFDATA2LSB, EM_386, EM_AARCH64, EM_ARM, EM_IA_64,
    EM_MIPS, EM_NONE, EM_PPC, EM_PPC64, EM_RISCV, EM_S390, EM_SPARCV9, EM_X86_64, ET_CORE, ET_DYN,
    ET_EXEC, ET_NONE, ET_REL,
};
use goblin::elf::program_header::PT_LOAD;
use goblin::elf::section_header::{SHF_EXECINSTR, SHT_NOBITS, SHT_PROGBITS};
use goblin::elf::Elf;

/// A loadable memory range from the source image's program header table,
/// with the bytes actually present in the file.
///
/// `file_size` may be smaller than `mem_size` for segments that extend
/// into zero-initialized data; only the file-backed bytes are copyable.
/// The buffer always holds exactly `file_size` bytes.
pub struct Segment {
    pub vaddr: u64,
    pub file_size: u64,
    pub mem_size: u64,
    pub data: Vec<u8>,
}

/// A section from the target image's section header table.
///
/// The buffer holds exactly `size` bytes for file-backed sections and is
/// empty for SHT_NOBITS sections. All mutation goes through [`replace`],
/// which also records that the section needs to be written back.
///
/// [`replace`]: Section::replace
pub struct Section {
    pub name: String,
    pub addr: u64,
    pub size: u64,
    pub sh_type: u32,
    pub flags: u64,
    file_offset: u64,
    data: Vec<u8>,
    dirty: bool,
}

impl Section {
    /// Executable program data, the only kind of section the overlay
    /// engine writes to.
    pub fn is_executable_code(&self) -> bool {
        self.sh_type & SHT_PROGBITS != 0 && self.flags & u64::from(SHF_EXECINSTR) != 0
    }

    /// The section's current bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Whether the section has been modified since loading.
    pub fn is_patched(&self) -> bool {
        self.dirty
    }

    /// Overwrite exactly `bytes.len()` bytes at `offset`, leaving every
    /// other byte of the buffer untouched.
    ///
    /// The range must lie within the buffer; callers derive it from the
    /// same headers the buffer was sized from.
    pub fn replace(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.dirty = true;
    }
}

/// One fully-loaded ELF image: identity fields for reporting and
/// compatibility checks, plus the segment and section tables in their
/// original table order.
pub struct Image {
    path: PathBuf,
    raw: Vec<u8>,
    pub class: u8,
    pub little_endian: bool,
    pub machine: u16,
    pub elf_type: u16,
    pub segments: Vec<Segment>,
    pub sections: Vec<Section>,
}

impl Image {
    /// Read and parse an ELF image from disk.
    pub fn load(path: &Path) -> Result<Image> {
        let raw = fs::read(path).with_context(|| format!("reading '{}'", path.display()))?;
        Image::parse(path.to_path_buf(), raw)
    }

    /// Parse an ELF image from bytes already in memory.
    pub(crate) fn parse(path: PathBuf, raw: Vec<u8>) -> Result<Image> {
        let elf = Elf::parse(&raw).with_context(|| format!("parsing '{}' as ELF", path.display()))?;

        let class = elf.header.e_ident[EI_CLASS];
        let little_endian = elf.header.e_ident[EI_DATA] == ELFDATA2LSB;
        let machine = elf.header.e_machine;
        let elf_type = elf.header.e_type;

        let mut segments = Vec::new();
        let mut sections = Vec::new();
        if class == ELFCLASS64 {
            for (index, ph) in elf.program_headers.iter().enumerate() {
                if ph.p_type != PT_LOAD {
                    continue;
                }
                let end = ph
                    .p_offset
                    .checked_add(ph.p_filesz)
                    .filter(|&end| end <= raw.len() as u64)
                    .with_context(|| {
                        format!(
                            "segment {} of '{}' extends past the end of the file",
                            index,
                            path.display()
                        )
                    })?;
                segments.push(Segment {
                    vaddr: ph.p_vaddr,
                    file_size: ph.p_filesz,
                    mem_size: ph.p_memsz,
                    data: raw[ph.p_offset as usize..end as usize].to_vec(),
                });
            }

            for (index, sh) in elf.section_headers.iter().enumerate() {
                let name = elf.shdr_strtab.get_at(sh.sh_name).unwrap_or("").to_string();
                let data = if sh.sh_type == SHT_NOBITS || sh.sh_size == 0 {
                    Vec::new()
                } else {
                    let end = sh
                        .sh_offset
                        .checked_add(sh.sh_size)
                        .filter(|&end| end <= raw.len() as u64)
                        .with_context(|| {
                            format!(
                                "section {} ('{}') of '{}' extends past the end of the file",
                                index,
                                name,
                                path.display()
                            )
                        })?;
                    raw[sh.sh_offset as usize..end as usize].to_vec()
                };
                sections.push(Section {
                    name,
                    addr: sh.sh_addr,
                    size: sh.sh_size,
                    sh_type: sh.sh_type,
                    flags: sh.sh_flags,
                    file_offset: sh.sh_offset,
                    data,
                    dirty: false,
                });
            }
        }
        drop(elf);

        Ok(Image {
            path,
            raw,
            class,
            little_endian,
            machine,
            elf_type,
            segments,
            sections,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_64bit(&self) -> bool {
        self.class == ELFCLASS64
    }

    /// Sections holding executable program data, in section-table order.
    pub fn executable_sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(|s| s.is_executable_code())
    }

    /// Write every patched section's bytes back into the raw file image at
    /// its recorded file offset and rewrite the file in place. Every byte
    /// outside the patched section ranges is preserved exactly.
    pub fn save(&mut self) -> Result<()> {
        let Image { raw, sections, .. } = self;
        for section in sections.iter() {
            if !section.dirty {
                continue;
            }
            let start = section.file_offset as usize;
            raw[start..start + section.data.len()].copy_from_slice(&section.data);
        }
        fs::write(&self.path, &self.raw)
            .with_context(|| format!("writing '{}'", self.path.display()))
    }
}

/// Label for an `e_ident` class byte.
pub fn class_name(class: u8) -> &'static str {
    match class {
        ELFCLASS32 => "ELF32",
        ELFCLASS64 => "ELF64",
        _ => "unknown class",
    }
}

/// Label for an `e_machine` value. Unknown machines map to "Unknown".
pub fn machine_name(machine: u16) -> &'static str {
    match machine {
        EM_NONE => "None",
        EM_386 => "Intel 80386",
        EM_MIPS => "MIPS",
        EM_PPC => "PowerPC",
        EM_PPC64 => "PowerPC64",
        EM_S390 => "IBM S/390",
        EM_ARM => "ARM",
        EM_SPARCV9 => "SPARC v9",
        EM_IA_64 => "Intel IA-64",
        EM_X86_64 => "AMD x86-64",
        EM_AARCH64 => "AArch64",
        EM_RISCV => "RISC-V",
        _ => "Unknown",
    }
}

/// Label for an `e_type` value. Unknown types map to "Unknown".
pub fn type_name(elf_type: u16) -> &'static str {
    match elf_type {
        ET_NONE => "No file type",
        ET_REL => "Relocatable file",
        ET_EXEC => "Executable file",
        ET_DYN => "Shared object file",
        ET_CORE => "Core file",
        _ => "Unknown",
    }
}
