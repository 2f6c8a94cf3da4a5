//! ELF View (C1): read-only structural access to symbols, sections,
//! relocations and string tables of an ELF64 relocatable object.

pub mod reloc;
pub mod section;
pub mod symbol;
pub mod view;

pub use reloc::{RelaSection, Relocation};
pub use section::Section;
pub use symbol::SymbolRecord;
pub use view::ElfView;
