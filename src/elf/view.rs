//! Read-only structural access to an ELF64 relocatable object: symbols,
//! sections, relocations, string tables (§4.1, C1).

use goblin::container::{Container, Ctx, Endian};
use goblin::elf::{header, reloc, section_header, sym};
use scroll::Pread;

use crate::elf::reloc::{Relocation, RelaSection};
use crate::elf::section::Section;
use crate::elf::symbol::SymbolRecord;
use crate::error::{Error, Result};

/// x86-64 relocatable objects only: 64-bit container, little-endian.
fn ctx() -> Ctx {
    Ctx::new(Container::Big, Endian::Little)
}

fn cstr_at(buf: &[u8], offset: usize) -> String {
    if offset >= buf.len() {
        return String::new();
    }
    let end = buf[offset..]
        .iter()
        .position(|&b| b == 0)
        .map(|p| offset + p)
        .unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[offset..end]).into_owned()
}

/// An owned, read-only view over the symbols, sections and relocations of
/// one ELF64 relocatable object. Created once at open and never mutated
/// again; every component that needs to inspect an input object goes
/// through this.
#[derive(Debug)]
pub struct ElfView {
    /// Raw section headers plus owned byte buffers, indexed by original
    /// section index.
    pub sections: Vec<Section>,
    /// Owned symbol-table entries, indexed by original symbol index.
    pub symbols: Vec<SymbolRecord>,
    /// `.rela.*` sections, in file order.
    pub relas: Vec<RelaSection>,
    /// Machine type (`e_machine`), kept only for the "x86-64 only"
    /// Non-goal assertion at open time.
    pub machine: u16,
}

impl ElfView {
    /// Parse `buffer` as an ELF64 little-endian relocatable object.
    ///
    /// Tolerates inputs that lack `.symtab`/`.strtab`/any `.rela` sections:
    /// those simply yield empty tables rather than an error, per §4.1.
    pub fn parse(buffer: &[u8]) -> Result<ElfView> {
        let header = header::Header::parse(buffer).map_err(|_| {
            log::error!("ElfView::parse: could not parse ELF header");
            Error::malformed("could not parse ELF header")
        })?;
        if header.e_ident[header::EI_CLASS] != header::ELFCLASS64 {
            log::error!("ElfView::parse: object is not a 64-bit ELF");
            return Err(Error::malformed("only 64-bit ELF objects are supported"));
        }
        if header.e_ident[header::EI_DATA] != header::ELFDATA2LSB {
            log::error!("ElfView::parse: object is not little-endian");
            return Err(Error::malformed("only little-endian ELF objects are supported"));
        }
        let ctx = ctx();

        let shoff = header.e_shoff as usize;
        let shentsize = header.e_shentsize as usize;
        let shnum = header.e_shnum as usize;
        if shnum == 0 {
            log::error!("ElfView::parse: object has no section headers");
            return Err(Error::malformed("ELF object has no section headers"));
        }
        log::debug!("ElfView::parse: {} section headers at {:#x}", shnum, shoff);

        let mut raw_headers = Vec::with_capacity(shnum);
        for i in 0..shnum {
            let mut off = shoff + i * shentsize;
            let shdr: section_header::SectionHeader = buffer.gread_with(&mut off, ctx).map_err(|_| {
                log::error!("ElfView::parse: corrupt section header {}", i);
                Error::malformed_at("corrupt section header", i)
            })?;
            raw_headers.push(shdr);
        }

        let shstrtab_idx = header.e_shstrndx as usize;
        let shstrtab_bytes: &[u8] = raw_headers
            .get(shstrtab_idx)
            .map(|shdr| {
                let start = shdr.sh_offset as usize;
                let end = start + shdr.sh_size as usize;
                &buffer[start..end]
            })
            .unwrap_or(&[]);

        let mut sections = Vec::with_capacity(shnum);
        for (index, shdr) in raw_headers.iter().enumerate() {
            let name = cstr_at(shstrtab_bytes, shdr.sh_name as usize);
            let data = if shdr.sh_type == section_header::SHT_NOBITS || shdr.sh_size == 0 {
                Vec::new()
            } else {
                let start = shdr.sh_offset as usize;
                let end = start + shdr.sh_size as usize;
                if end > buffer.len() {
                    log::error!("ElfView::parse: section {} data out of bounds", index);
                    return Err(Error::malformed_at("section data out of bounds", index));
                }
                buffer[start..end].to_vec()
            };
            sections.push(Section {
                index,
                name,
                sh_type: shdr.sh_type,
                sh_flags: shdr.sh_flags,
                sh_link: shdr.sh_link,
                sh_info: shdr.sh_info,
                sh_entsize: shdr.sh_entsize,
                sh_size: shdr.sh_size,
                data,
            });
        }

        let symtab_idx = sections.iter().position(|s| s.name == ".symtab");
        let mut symbols = Vec::new();
        if let Some(symtab_idx) = symtab_idx {
            let symtab = &sections[symtab_idx];
            let strtab_idx = symtab.sh_link as usize;
            log::debug!("ElfView::parse: .symtab at section {}, .strtab at section {}", symtab_idx, strtab_idx);
            let strtab_bytes: &[u8] = sections
                .get(strtab_idx)
                .map(|s| s.data.as_slice())
                .unwrap_or(&[]);
            let entsize = if symtab.sh_entsize == 0 {
                sym::Sym::size(ctx.container)
            } else {
                symtab.sh_entsize as usize
            };
            let count = if entsize == 0 { 0 } else { symtab.data.len() / entsize };
            for i in 0..count {
                let mut off = i * entsize;
                let raw: sym::Sym = symtab.data.gread_with(&mut off, ctx).map_err(|_| {
                    log::error!("ElfView::parse: corrupt symbol table entry {}", i);
                    Error::malformed_at("corrupt symbol table entry", i)
                })?;
                symbols.push(SymbolRecord {
                    index: i,
                    name: cstr_at(strtab_bytes, raw.st_name),
                    binding: raw.st_bind(),
                    sym_type: raw.st_type(),
                    section_index: raw.st_shndx,
                    value: raw.st_value,
                    size: raw.st_size,
                });
            }
        }

        let mut relas = Vec::new();
        for (index, shdr) in raw_headers.iter().enumerate() {
            if shdr.sh_type != section_header::SHT_RELA {
                continue;
            }
            let data = &sections[index].data;
            let entsize = if shdr.sh_entsize == 0 {
                reloc::Reloc::size(true, ctx)
            } else {
                shdr.sh_entsize as usize
            };
            let count = if entsize == 0 { 0 } else { data.len() / entsize };
            let mut entries = Vec::with_capacity(count);
            for i in 0..count {
                let mut off = i * entsize;
                let raw: reloc::Reloc = data.gread_with(&mut off, (true, ctx)).map_err(|_| {
                    log::error!("ElfView::parse: corrupt relocation entry {}", i);
                    Error::malformed_at("corrupt relocation entry", i)
                })?;
                entries.push(Relocation {
                    offset: raw.r_offset,
                    addend: raw.r_addend.unwrap_or(0),
                    sym_index: raw.r_sym,
                    r_type: raw.r_type,
                });
            }
            relas.push(RelaSection {
                index,
                name: sections[index].name.clone(),
                target_section: shdr.sh_info as usize,
                link: shdr.sh_link as usize,
                entries,
            });
        }

        log::debug!(
            "ElfView::parse: {} sections, {} symbols, {} rela sections",
            sections.len(),
            symbols.len(),
            relas.len()
        );
        Ok(ElfView { sections, symbols, relas, machine: header.e_machine })
    }

    /// Look up a section by exact name.
    pub fn section_by_name(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Look up a section by its original index.
    pub fn section_by_index(&self, index: usize) -> Option<&Section> {
        self.sections.get(index)
    }

    /// The `.rela.*` section whose `sh_info` targets `section_index`, if any.
    pub fn rela_section_for(&self, section_index: usize) -> Option<&RelaSection> {
        self.relas.iter().find(|r| r.target_section == section_index)
    }

    /// A `.rela.*` section looked up by its own name (e.g.
    /// `.rela__jump_table`, which has no simple `sh_info` target since it
    /// relocates a table of pointers into many different sections).
    pub fn rela_section_by_name(&self, name: &str) -> Option<&RelaSection> {
        self.relas.iter().find(|r| r.name == name)
    }

    /// Find a symbol by name restricted to a given `STT_*` type.
    pub fn symbol_by_name_and_type(&self, name: &str, sym_type: u8) -> Option<&SymbolRecord> {
        self.symbols
            .iter()
            .find(|s| s.name == name && s.sym_type == sym_type)
    }

    /// Find a symbol by name, any type (used for extraction requests where
    /// the caller just names a symbol).
    pub fn symbol_by_name(&self, name: &str) -> Option<&SymbolRecord> {
        self.symbols.iter().find(|s| s.name == name && !s.name.is_empty())
    }

    /// Find the symbol defined in `section_index` whose range covers
    /// `offset`. `exact` requires `st_value == offset`.
    pub fn symbol_by_offset(&self, section_index: usize, offset: u64, exact: bool) -> Option<&SymbolRecord> {
        self.symbols
            .iter()
            .filter(|s| s.section_index == section_index)
            .find(|s| s.covers(offset, exact))
    }

    /// All symbols tagged `is_fun` per §4.1.
    pub fn functions(&self) -> impl Iterator<Item = &SymbolRecord> {
        self.symbols.iter().filter(|s| s.is_fun())
    }

    /// All symbols tagged `is_var` per §4.1: `OBJECT`-typed, defined in a
    /// section `is_variable_section` identifies as a variable section.
    pub fn variables(&self) -> impl Iterator<Item = &SymbolRecord> {
        self.symbols.iter().filter(move |s| {
            s.is_object()
                && self
                    .section_by_index(s.section_index)
                    .map(|sec| sec.is_variable_section())
                    .unwrap_or(false)
        })
    }
}
