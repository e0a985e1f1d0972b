//! Tool driver: the configuration parsed from the command line and the
//! load -> inspect -> overlay -> save pipeline.
//!
//! Submodules handle distinct concerns:
//! - `cli.rs`: command-line argument parsing

mod cli;

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::image::{class_name, machine_name, type_name, Image};
use crate::overlay::{ensure_elf64, overlay, OverlayOutcome};

/// Orchestrates a single patch run. Fields are populated by
/// `parse_cli_args` before `run` is called.
pub struct Driver {
    verbose: bool,
    kcore_path: PathBuf,
    vmlinux_path: PathBuf,
}

impl Driver {
    pub fn new() -> Self {
        Self {
            verbose: false,
            kcore_path: PathBuf::new(),
            vmlinux_path: PathBuf::new(),
        }
    }

    /// Load both images, report their properties, verify compatibility,
    /// run the overlay, and persist the target if anything was patched.
    pub fn run(&self) -> Result<()> {
        let source = Image::load(&self.kcore_path).context("loading kcore image")?;
        let mut target = Image::load(&self.vmlinux_path).context("loading vmlinux image")?;

        self.print_image(&source);
        self.print_image(&target);

        ensure_elf64(&source, &target)?;

        let outcome = overlay(&source, &mut target);
        self.report_outcome(&outcome);

        if outcome.patched_any() {
            target.save().context("saving patched vmlinux image")?;
            println!(
                "wrote {} patched section(s) to '{}'",
                outcome.patched.len(),
                self.vmlinux_path.display()
            );
        } else {
            println!(
                "no executable section overlaps the kcore segments; '{}' left unmodified",
                self.vmlinux_path.display()
            );
        }
        Ok(())
    }

    /// Print an image's identity, its segment/section counts, and its
    /// executable sections. Verbose mode adds per-segment address lines.
    fn print_image(&self, image: &Image) {
        println!("{}:", image.path().display());
        println!("  class:    {}", class_name(image.class));
        println!(
            "  data:     {} endian",
            if image.little_endian { "little" } else { "big" }
        );
        println!("  machine:  {}", machine_name(image.machine));
        println!("  type:     {}", type_name(image.elf_type));

        println!("  segments: {}", image.segments.len());
        if self.verbose {
            for (i, seg) in image.segments.iter().enumerate() {
                println!(
                    "    [{:2}] vaddr {:#018x}  filesz {:#10x}  memsz {:#10x}",
                    i, seg.vaddr, seg.file_size, seg.mem_size
                );
            }
        }

        println!("  sections: {}", image.sections.len());
        let executable: Vec<_> = image.executable_sections().collect();
        if executable.is_empty() {
            println!("  executable sections: none");
        } else {
            println!("  executable sections:");
            for sec in executable {
                println!(
                    "    {:<20} addr {:#018x}  size {:#10x}",
                    sec.name, sec.addr, sec.size
                );
            }
        }
    }

    /// Report what the overlay did: one line per patched section, chunk
    /// detail when verbose, warnings for shortfalls and precondition
    /// violations on stderr.
    fn report_outcome(&self, outcome: &OverlayOutcome) {
        if outcome.segments_unordered {
            eprintln!(
                "warning: kcore segment table is not in ascending address order; \
                 sections spanning multiple segments may be left partially patched"
            );
        }

        for patch in &outcome.patched {
            println!(
                "patching section [{:2}] {} at {:#x}: {:#x} of {:#x} bytes",
                patch.index, patch.name, patch.addr, patch.copied, patch.size
            );
            if self.verbose {
                for chunk in &patch.chunks {
                    println!(
                        "    segment[{:2}] {:#x} bytes from segment offset {:#x} \
                         to section offset {:#x}",
                        chunk.segment, chunk.len, chunk.segment_offset, chunk.section_offset
                    );
                }
            }
        }

        for short in outcome.shortfalls() {
            eprintln!(
                "warning: section {} only partially covered ({:#x} of {:#x} bytes); \
                 the remainder keeps its original contents",
                short.name, short.copied, short.size
            );
        }
    }
}

impl Default for Driver {
    fn default() -> Self {
        Self::new()
    }
}
