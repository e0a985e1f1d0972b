//! Test-only helpers: a byte-level synthetic ELF image builder and an
//! RAII temporary-file guard.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use goblin::elf::header::{ELFCLASS32, ELFCLASS64, EM_X86_64, ET_CORE, ET_EXEC};
use goblin::elf::program_header::PT_LOAD;
use goblin::elf::section_header::{SHT_NOBITS, SHT_STRTAB};

struct SegSpec {
    vaddr: u64,
    data: Vec<u8>,
    extra_mem: u64,
}

struct SecSpec {
    name: String,
    addr: u64,
    sh_type: u32,
    flags: u64,
    size: u64,
    data: Vec<u8>,
}

/// Builds a minimal but well-formed ELF image byte by byte, with any mix
/// of loadable segments and named sections. Images without sections get
/// no section table at all, like a real kcore dump.
pub struct ElfBuilder {
    class: u8,
    e_type: u16,
    segments: Vec<SegSpec>,
    sections: Vec<SecSpec>,
}

impl ElfBuilder {
    pub fn new() -> Self {
        Self {
            class: ELFCLASS64,
            e_type: ET_EXEC,
            segments: Vec::new(),
            sections: Vec::new(),
        }
    }

    /// Mark the image as a core dump (the shape of a kcore snapshot).
    pub fn core(mut self) -> Self {
        self.e_type = ET_CORE;
        self
    }

    /// Produce a 32-bit image instead; segments and sections are ignored.
    pub fn class32(mut self) -> Self {
        self.class = ELFCLASS32;
        self
    }

    /// Add a PT_LOAD segment whose file and memory sizes both equal the
    /// data length.
    pub fn segment(self, vaddr: u64, data: &[u8]) -> Self {
        self.segment_with_bss(vaddr, data, 0)
    }

    /// Add a PT_LOAD segment whose memory size exceeds its file size by
    /// `extra_mem` zero-initialized bytes.
    pub fn segment_with_bss(mut self, vaddr: u64, data: &[u8], extra_mem: u64) -> Self {
        self.segments.push(SegSpec {
            vaddr,
            data: data.to_vec(),
            extra_mem,
        });
        self
    }

    /// Add a file-backed section.
    pub fn section(mut self, name: &str, addr: u64, sh_type: u32, flags: u64, data: &[u8]) -> Self {
        self.sections.push(SecSpec {
            name: name.to_string(),
            addr,
            sh_type,
            flags,
            size: data.len() as u64,
            data: data.to_vec(),
        });
        self
    }

    /// Add an SHT_NOBITS section: a declared size with no file bytes.
    pub fn section_nobits(mut self, name: &str, addr: u64, flags: u64, size: u64) -> Self {
        self.sections.push(SecSpec {
            name: name.to_string(),
            addr,
            sh_type: SHT_NOBITS,
            flags,
            size,
            data: Vec::new(),
        });
        self
    }

    pub fn build(&self) -> Vec<u8> {
        if self.class == ELFCLASS32 {
            return self.build32();
        }

        let phoff = 64usize;
        let mut out = vec![0u8; phoff + self.segments.len() * 56];

        out[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        out[4] = ELFCLASS64;
        out[5] = 1; // little endian
        out[6] = 1; // ELF version
        put_u16(&mut out, 16, self.e_type);
        put_u16(&mut out, 18, EM_X86_64);
        put_u32(&mut out, 20, 1);
        put_u64(&mut out, 32, phoff as u64);
        put_u16(&mut out, 52, 64); // e_ehsize
        put_u16(&mut out, 54, 56); // e_phentsize
        put_u16(&mut out, 56, self.segments.len() as u16);
        put_u16(&mut out, 58, 64); // e_shentsize

        // Segment data blobs, then the program headers pointing at them.
        let mut seg_offsets = Vec::new();
        for seg in &self.segments {
            seg_offsets.push(out.len());
            out.extend_from_slice(&seg.data);
        }
        for (i, seg) in self.segments.iter().enumerate() {
            let p = phoff + i * 56;
            put_u32(&mut out, p, PT_LOAD);
            put_u32(&mut out, p + 4, 0x5); // PF_R | PF_X
            put_u64(&mut out, p + 8, seg_offsets[i] as u64);
            put_u64(&mut out, p + 16, seg.vaddr);
            put_u64(&mut out, p + 24, seg.vaddr);
            put_u64(&mut out, p + 32, seg.data.len() as u64);
            put_u64(&mut out, p + 40, seg.data.len() as u64 + seg.extra_mem);
            put_u64(&mut out, p + 48, 0x1000);
        }

        if !self.sections.is_empty() {
            // Section data blobs.
            let mut sec_offsets = Vec::new();
            for sec in &self.sections {
                if sec.sh_type == SHT_NOBITS {
                    sec_offsets.push(0);
                } else {
                    sec_offsets.push(out.len());
                    out.extend_from_slice(&sec.data);
                }
            }

            // Section name string table.
            let mut strtab = vec![0u8];
            let mut name_offsets = Vec::new();
            for sec in &self.sections {
                name_offsets.push(strtab.len() as u32);
                strtab.extend_from_slice(sec.name.as_bytes());
                strtab.push(0);
            }
            let shstrtab_name = strtab.len() as u32;
            strtab.extend_from_slice(b".shstrtab\0");
            let strtab_offset = out.len();
            out.extend_from_slice(&strtab);

            while out.len() % 8 != 0 {
                out.push(0);
            }
            let shoff = out.len();
            let shnum = self.sections.len() + 2; // null + ours + .shstrtab
            out.resize(shoff + shnum * 64, 0);

            // shdr[0] stays all-zero (SHT_NULL).
            for (i, sec) in self.sections.iter().enumerate() {
                let p = shoff + (i + 1) * 64;
                put_u32(&mut out, p, name_offsets[i]);
                put_u32(&mut out, p + 4, sec.sh_type);
                put_u64(&mut out, p + 8, sec.flags);
                put_u64(&mut out, p + 16, sec.addr);
                put_u64(&mut out, p + 24, sec_offsets[i] as u64);
                put_u64(&mut out, p + 32, sec.size);
                put_u64(&mut out, p + 48, 1); // sh_addralign
            }
            let p = shoff + (shnum - 1) * 64;
            put_u32(&mut out, p, shstrtab_name);
            put_u32(&mut out, p + 4, SHT_STRTAB);
            put_u64(&mut out, p + 24, strtab_offset as u64);
            put_u64(&mut out, p + 32, strtab.len() as u64);
            put_u64(&mut out, p + 48, 1);

            put_u64(&mut out, 40, shoff as u64); // e_shoff
            put_u16(&mut out, 60, shnum as u16); // e_shnum
            put_u16(&mut out, 62, (shnum - 1) as u16); // e_shstrndx
        }

        out
    }

    /// A bare 32-bit header with empty program and section tables; enough
    /// for class-gate tests.
    fn build32(&self) -> Vec<u8> {
        let mut out = vec![0u8; 52];
        out[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        out[4] = ELFCLASS32;
        out[5] = 1;
        out[6] = 1;
        put_u16(&mut out, 16, self.e_type);
        put_u16(&mut out, 18, EM_X86_64);
        put_u32(&mut out, 20, 1);
        put_u16(&mut out, 40, 52); // e_ehsize
        put_u16(&mut out, 42, 32); // e_phentsize
        put_u16(&mut out, 46, 40); // e_shentsize
        out
    }
}

fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_u64(buf: &mut [u8], offset: usize, value: u64) {
    buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// RAII guard around a file in the platform temp directory; the file is
/// removed on drop, even if the test fails.
pub struct TempFile {
    path: PathBuf,
}

impl TempFile {
    /// Write `bytes` to a fresh uniquely-named temp file.
    pub fn with_bytes(stem: &str, bytes: &[u8]) -> TempFile {
        let id = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let name = format!("patch_elf_test_{}_{}_{}", std::process::id(), id, stem);
        let path = std::env::temp_dir().join(name);
        std::fs::write(&path, bytes).expect("writing temp file");
        TempFile { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
