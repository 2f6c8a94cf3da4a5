//! Owned symbol records held by an [`ElfView`](super::view::ElfView).

use goblin::elf::sym;

/// A single `.symtab` entry, with the fields the rest of the engine
/// actually needs pulled out by value.
#[derive(Debug, Clone)]
pub struct SymbolRecord {
    /// Index into the original file's symbol table.
    pub index: usize,
    /// Symbol name, already resolved through `.strtab`. Empty for symbols
    /// with `st_name == 0` (most section symbols).
    pub name: String,
    /// `ELF64_ST_BIND(st_info)`.
    pub binding: u8,
    /// `ELF64_ST_TYPE(st_info)`.
    pub sym_type: u8,
    /// `st_shndx`. `0` means undefined (`SHN_UNDEF`).
    pub section_index: usize,
    /// `st_value`.
    pub value: u64,
    /// `st_size`.
    pub size: u64,
}

impl SymbolRecord {
    /// §4.1: a symbol is tagged `is_fun` when its type is `FUNC` and the
    /// name is nonempty.
    pub fn is_fun(&self) -> bool {
        self.sym_type == sym::STT_FUNC && !self.name.is_empty()
    }

    /// §4.1: a symbol is tagged `is_var` when its type is `OBJECT` and its
    /// defining section is one the caller identifies as a variable section
    /// (see [`Section::is_variable_section`](super::section::Section::is_variable_section)).
    pub fn is_object(&self) -> bool {
        self.sym_type == sym::STT_OBJECT
    }

    /// True for `STT_SECTION` symbols: zero value, zero size, used purely
    /// as a `(section, addend)` base.
    pub fn is_section_symbol(&self) -> bool {
        self.sym_type == sym::STT_SECTION
    }

    /// True when the symbol is undefined (`SHN_UNDEF`).
    pub fn is_undefined(&self) -> bool {
        self.section_index == 0
    }

    /// True when `value` falls within `[self.value, self.value + self.size)`.
    /// With `exact`, requires equality with `self.value` instead.
    pub fn covers(&self, value: u64, exact: bool) -> bool {
        if exact {
            self.value == value
        } else if self.size == 0 {
            self.value == value
        } else {
            value >= self.value && value < self.value + self.size
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(name: &str, sym_type: u8, value: u64, size: u64) -> SymbolRecord {
        SymbolRecord {
            index: 1,
            name: name.to_string(),
            binding: goblin::elf::sym::STB_GLOBAL,
            sym_type,
            section_index: 1,
            value,
            size,
        }
    }

    #[test]
    fn is_fun_requires_name() {
        let mut f = sym("foo", sym::STT_FUNC, 0, 10);
        assert!(f.is_fun());
        f.name.clear();
        assert!(!f.is_fun());
    }

    #[test]
    fn covers_range_vs_exact() {
        let s = sym("bar", sym::STT_OBJECT, 0x10, 0x8);
        assert!(s.covers(0x10, true));
        assert!(!s.covers(0x14, true));
        assert!(s.covers(0x14, false));
        assert!(!s.covers(0x18, false));
    }
}
