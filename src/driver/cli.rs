//! Command-line argument parsing.
//!
//! The surface is deliberately small: an optional verbosity flag, a help
//! flag that short-circuits everything else, and exactly two positional
//! arguments (the kcore copy, then the vmlinux copy). A flat match loop
//! is used instead of an argument-parsing crate.

use std::path::PathBuf;

use anyhow::{bail, Result};

use super::Driver;

const USAGE: &str = "usage: patch-elf [-v|--verbose] <kcore_file> <vmlinux_file>";

impl Driver {
    /// Parse command-line arguments (including `argv[0]`) and populate the
    /// driver fields. Returns `Ok(true)` if help was requested and printed,
    /// in which case the caller should exit successfully without doing
    /// anything else; `Ok(false)` to proceed; or an error for any usage
    /// mistake.
    pub fn parse_cli_args(&mut self, args: &[String]) -> Result<bool> {
        let rest = args.get(1..).unwrap_or(&[]);

        // Help ignores every other argument.
        if rest.iter().any(|a| a == "-h" || a == "--help") {
            print_help();
            return Ok(true);
        }

        let mut inputs: Vec<&str> = Vec::new();
        for arg in rest {
            match arg.as_str() {
                "-v" | "--verbose" => self.verbose = true,
                flag if flag.starts_with('-') => {
                    bail!("unknown flag '{}'\n{}", flag, USAGE)
                }
                path => inputs.push(path),
            }
        }

        match inputs.as_slice() {
            [kcore, vmlinux] => {
                self.kcore_path = PathBuf::from(kcore);
                self.vmlinux_path = PathBuf::from(vmlinux);
                Ok(false)
            }
            _ => bail!(
                "expected exactly two file arguments, got {}\n{}",
                inputs.len(),
                USAGE
            ),
        }
    }
}

fn print_help() {
    println!("patch-elf overlays the kernel image from a local copy of");
    println!("'/proc/kcore' onto the corresponding (by address) executable");
    println!("sections of a local vmlinux ELF file.");
    println!();
    println!("A local '/proc/kcore' is created by:");
    println!("    perf report --kcore ...");
    println!("The patched vmlinux copy is then used by disassembly-driven");
    println!("trace tooling, for example:");
    println!("    perf script -s arm-cs-trace-disasm.py ...");
    println!();
    println!("{}", USAGE);
}
