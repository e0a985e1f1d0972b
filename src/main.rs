fn main() {
    patch_elf::tool_main();
}
