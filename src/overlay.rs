//! Address-driven overlay of source-image segment bytes onto target-image
//! executable sections.
//!
//! For each executable program-data section of the target (in section-table
//! order), the engine walks the source image's loadable segments (in
//! segment-table order) and copies every overlapping byte range into the
//! section's buffer. A section whose address range spans several segments
//! is serviced by consecutive segments, each contributing the bytes it has
//! on file; only file-backed bytes are copied, never the zero-extended
//! in-memory tail of a segment.
//!
//! The engine assumes segment-table order corresponds to ascending address
//! order, which holds for the kernel images this tool targets; it does not
//! sort or search. The assumption is checked once per run and a violation
//! is reported in the outcome rather than repaired.
//!
//! The engine never prints and never fails: it returns an [`OverlayOutcome`]
//! describing exactly what was copied, and the caller decides what to
//! report at which verbosity.

use anyhow::{bail, Result};

use crate::image::{class_name, Image};

/// One contiguous copy from a single source segment into a section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyChunk {
    /// Index of the contributing segment in the source segment table.
    pub segment: usize,
    /// Virtual address of the first byte copied.
    pub addr: u64,
    /// Offset into the segment's buffer where the copy started.
    pub segment_offset: u64,
    /// Offset into the section's buffer where the bytes landed.
    pub section_offset: u64,
    /// Number of bytes copied.
    pub len: u64,
}

/// Overlay result for one section that received at least one byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionPatch {
    /// Index of the section in the target's section table.
    pub index: usize,
    pub name: String,
    pub addr: u64,
    pub size: u64,
    /// Bytes actually written; `copied < size` is a coverage shortfall.
    pub copied: u64,
    pub chunks: Vec<CopyChunk>,
}

impl SectionPatch {
    /// Whether the segments ran out before the section was fully covered.
    /// The uncovered tail keeps its original bytes.
    pub fn is_short(&self) -> bool {
        self.copied < self.size
    }
}

/// Everything the overlay engine did in one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayOutcome {
    /// Patched sections in section-table order. Sections no segment
    /// addressed are absent: they were not touched.
    pub patched: Vec<SectionPatch>,
    /// The source segment table was not in ascending address order, so a
    /// section spanning multiple segments may have been left incomplete.
    pub segments_unordered: bool,
}

impl OverlayOutcome {
    pub fn patched_any(&self) -> bool {
        !self.patched.is_empty()
    }

    /// Patched sections whose coverage fell short of their full size.
    pub fn shortfalls(&self) -> impl Iterator<Item = &SectionPatch> {
        self.patched.iter().filter(|p| p.is_short())
    }
}

/// Both images must be ELF64; the overlay's address arithmetic is
/// 64-bit only. Checked before any patching is attempted.
pub fn ensure_elf64(source: &Image, target: &Image) -> Result<()> {
    for image in [source, target] {
        if !image.is_64bit() {
            bail!(
                "'{}' is {}; only ELF64 images are supported",
                image.path().display(),
                class_name(image.class)
            );
        }
    }
    Ok(())
}

/// Copy overlapping bytes from the source image's loadable segments into
/// the target image's executable sections.
///
/// Sections are visited in section-table order, segments in segment-table
/// order. A section is complete as soon as its whole range has been
/// written; a section no segment addresses is left untouched; a section
/// only partially covered when the segments run out keeps its original
/// bytes in the uncovered tail and is reported as a shortfall.
pub fn overlay(source: &Image, target: &mut Image) -> OverlayOutcome {
    let segments_unordered = !source.segments.windows(2).all(|w| w[0].vaddr <= w[1].vaddr);

    let mut patched = Vec::new();
    for (index, section) in target.sections.iter_mut().enumerate() {
        if !section.is_executable_code() {
            continue;
        }
        let total = section.size;
        if total == 0 {
            continue;
        }

        // `copied` doubles as the cursor: the next byte to patch is always
        // `section.addr + copied`, whether this is the first contributing
        // segment or the continuation of a split.
        let mut copied: u64 = 0;
        let mut chunks = Vec::new();
        for (seg_index, segment) in source.segments.iter().enumerate() {
            // Only file-backed bytes are copyable; mem_size may be larger
            // for segments that extend into zero-initialized data.
            let Some(segment_end) = segment.vaddr.checked_add(segment.file_size) else {
                continue;
            };
            let Some(cursor) = section.addr.checked_add(copied) else {
                break;
            };
            if cursor < segment.vaddr || cursor >= segment_end {
                continue;
            }

            let offset = cursor - segment.vaddr;
            let available = segment.file_size - offset;
            let len = (total - copied).min(available);
            section.replace(
                copied as usize,
                &segment.data[offset as usize..(offset + len) as usize],
            );
            chunks.push(CopyChunk {
                segment: seg_index,
                addr: cursor,
                segment_offset: offset,
                section_offset: copied,
                len,
            });
            copied += len;
            if copied == total {
                break; // section complete
            }
        }

        if copied > 0 {
            patched.push(SectionPatch {
                index,
                name: section.name.clone(),
                addr: section.addr,
                size: total,
                copied,
                chunks,
            });
        }
    }

    OverlayOutcome {
        patched,
        segments_unordered,
    }
}
