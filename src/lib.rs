//! patch-elf overlays live kernel instruction bytes from a local copy of
//! `/proc/kcore` (a kernel memory snapshot) onto the executable sections of
//! a symbol-bearing vmlinux image, matched purely by virtual address.
//!
//! The ELF container format is read through `goblin`; this crate owns the
//! address-range reconciliation: deciding which loadable kcore segments
//! service which vmlinux sections, splitting copies across segment
//! boundaries, and writing the result back into the vmlinux file in place.

pub mod driver;
pub mod image;
pub mod overlay;

#[cfg(test)]
pub(crate) mod testutil;

/// Shared entry point for the patch-elf binary: parse arguments, run the
/// driver, and map any failure to a nonzero exit.
pub fn tool_main() {
    let args: Vec<String> = std::env::args().collect();

    let mut driver = driver::Driver::new();
    match driver.parse_cli_args(&args) {
        Ok(true) => return, // help was printed
        Ok(false) => {}
        Err(err) => {
            eprintln!("patch-elf: {}", err);
            std::process::exit(1);
        }
    }

    if let Err(err) = driver.run() {
        eprintln!("patch-elf: error: {:#}", err);
        std::process::exit(1);
    }
}
