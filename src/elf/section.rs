//! Owned section records held by an [`ElfView`](super::view::ElfView).

/// A single section header plus its (possibly zero-filled) byte buffer.
///
/// Everything here is owned: the view does not keep the mapped file around
/// once it has been walked, so every byte a caller might need has already
/// been copied out.
#[derive(Debug, Clone)]
pub struct Section {
    /// Index into the original file's section header table.
    pub index: usize,
    /// Section name, already resolved through `.shstrtab`.
    pub name: String,
    /// `sh_type`.
    pub sh_type: u32,
    /// `sh_flags`.
    pub sh_flags: u64,
    /// `sh_link`.
    pub sh_link: u32,
    /// `sh_info`.
    pub sh_info: u32,
    /// `sh_entsize`.
    pub sh_entsize: u64,
    /// `sh_size` (kept separately from `data.len()` so that `SHT_NOBITS`
    /// sections can report their logical size even though `data` is empty).
    pub sh_size: u64,
    /// Section contents. Empty for `SHT_NOBITS` (`.bss`-style) sections.
    pub data: Vec<u8>,
}

impl Section {
    /// True when this section is one of the kernel live-patch "extra"
    /// sections that the extractor copies unconditionally.
    pub fn is_extra_section(&self) -> bool {
        matches!(
            self.name.as_str(),
            ".altinstructions" | ".altinstr_aux" | ".altinstr_replacement" | "__bug_table"
        )
    }

    /// True when this section's name marks it as holding a plain
    /// (non-string-literal) variable per §4.1: `.data.*`, `.bss.*`,
    /// `.rodata.*` (but not `.rodata.str*`), or the bare `.data`/`.bss`/
    /// `.rodata` names.
    pub fn is_variable_section(&self) -> bool {
        matches!(self.name.as_str(), ".data" | ".bss" | ".rodata")
            || self.name.starts_with(".data.")
            || self.name.starts_with(".bss.")
            || (self.name.starts_with(".rodata.") && !self.name.starts_with(".rodata.str"))
    }
}
