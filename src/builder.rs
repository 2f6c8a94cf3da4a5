//! ELF Builder (C8): constructs a new relocatable object and owns the
//! section/symbol/string/relocation dedup tables (§4.8, §3 Extraction
//! State).
//!
//! Generalized from the teacher's emit-only `Elf<'a>` writer
//! (`examples/m4b-faerie/src/elf.rs`) into a copy-from-input builder: instead of
//! synthesizing sections/symbols from an `Artifact`'s declarations, every
//! `copy_*` method here pulls its data out of an input [`ElfView`] and
//! remembers the original→new index mapping so repeated requests for the
//! same original index are idempotent (§3's "copied at most once"
//! invariants).

use goblin::elf::{header, reloc, section_header, sym};
use indexmap::IndexMap;
use scroll::Pwrite;
use string_interner::{DefaultStringInterner, Symbol};

use crate::disasm::rewrite::rewrite_function;
use crate::elf::{ElfView, Relocation, Section, SymbolRecord};
use crate::error::{Error, Result};
use crate::resolve::resolve;

/// One section in the output object, still index-free (the final section
/// header table is only assembled at [`ElfBuilder::write`] time).
#[derive(Debug, Clone)]
struct OutSection {
    name: String,
    /// Byte offset of `name` inside the final `.shstrtab` buffer. Filled in
    /// as soon as the name is appended; `0` (the sentinel NUL) until then.
    name_offset: u64,
    sh_type: u32,
    sh_flags: u64,
    sh_link: u32,
    sh_info: u32,
    sh_entsize: u64,
    /// Logical section size. Equals `data.len()` for every section with
    /// real bytes, but for `SHT_NOBITS` (`.bss`-style) sections `data` is
    /// always empty, so the original size has to be carried separately or
    /// it would be lost on copy.
    sh_size: u64,
    data: Vec<u8>,
}

/// One symbol-table entry in the output object.
#[derive(Debug, Clone)]
struct OutSymbol {
    name: String,
    binding: u8,
    sym_type: u8,
    /// Index into `builder.sections` (the *output* table), or `None` for
    /// `SHN_UNDEF`.
    section: Option<usize>,
    value: u64,
    size: u64,
}

/// Extraction State (§3): owns every output buffer and the three dedup
/// tables (section remap, symbol remap, string appender). Created once per
/// extract/rewrite run, mutated only through these methods, and consumed by
/// [`ElfBuilder::write`].
pub struct ElfBuilder {
    sections: Vec<OutSection>,
    symbols: Vec<OutSymbol>,
    /// `.rela.*` sections, keyed by the *output* index of the section they
    /// target (mirrors `ElfView::relas`, but built incrementally).
    relas: IndexMap<usize, Vec<Relocation>>,
    strtab: Vec<u8>,
    shstrtab: Vec<u8>,
    /// Dedup table for `.shstrtab`: section names repeat often (every
    /// `.rela<name>` pairs with a `<name>` that's already in there, and
    /// distinct symbols can share a home section), so each unique name is
    /// appended at most once. `string_interner::Symbol::to_usize()` of a
    /// name's interned id doubles as the index into `shstrtab_offsets`.
    shstrtab_interner: DefaultStringInterner,
    shstrtab_offsets: Vec<u64>,
    /// Original section index → output section index.
    section_map: IndexMap<usize, usize>,
    /// Original symbol index → output symbol index. `0` means "not copied
    /// yet" (index 0 is always the null symbol, so this doubles as an
    /// Option without the enum tax).
    symbol_map: IndexMap<usize, usize>,
    strtab_index: usize,
    shstrtab_index: usize,
    symtab_index: usize,
}

fn append_string(buf: &mut Vec<u8>, s: &str) -> u64 {
    let offset = buf.len() as u64;
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
    offset
}

impl ElfBuilder {
    /// Seed `.strtab`, `.shstrtab` and `.symtab` in that fixed order (§4.8):
    /// each string table starts with a sentinel NUL byte at offset 0, and
    /// `.symtab` starts with the mandatory zero sentinel symbol at index 0.
    pub fn new() -> Self {
        let mut builder = ElfBuilder {
            sections: Vec::new(),
            symbols: Vec::new(),
            relas: IndexMap::new(),
            strtab: vec![0],
            shstrtab: vec![0],
            shstrtab_interner: DefaultStringInterner::new(),
            shstrtab_offsets: Vec::new(),
            section_map: IndexMap::new(),
            symbol_map: IndexMap::new(),
            strtab_index: 0,
            shstrtab_index: 0,
            symtab_index: 0,
        };

        let strtab_name_offset = builder.intern_section_name(".strtab");
        builder.strtab_index = builder.push_section(OutSection {
            name: ".strtab".to_string(),
            name_offset: strtab_name_offset,
            sh_type: section_header::SHT_STRTAB,
            sh_flags: 0,
            sh_link: 0,
            sh_info: 0,
            sh_entsize: 0,
            sh_size: 0,
            data: Vec::new(),
        });
        let shstrtab_name_offset = builder.intern_section_name(".shstrtab");
        builder.shstrtab_index = builder.push_section(OutSection {
            name: ".shstrtab".to_string(),
            name_offset: shstrtab_name_offset,
            sh_type: section_header::SHT_STRTAB,
            sh_flags: 0,
            sh_link: 0,
            sh_info: 0,
            sh_entsize: 0,
            sh_size: 0,
            data: Vec::new(),
        });
        let symtab_name_offset = builder.intern_section_name(".symtab");
        builder.symtab_index = builder.push_section(OutSection {
            name: ".symtab".to_string(),
            name_offset: symtab_name_offset,
            sh_type: section_header::SHT_SYMTAB,
            sh_flags: 0,
            sh_link: builder.strtab_index as u32,
            sh_info: 0,
            sh_entsize: sym::Sym::size(goblin::container::Container::Big) as u64,
            sh_size: 0,
            data: Vec::new(),
        });
        builder.symbols.push(OutSymbol {
            name: String::new(),
            binding: 0,
            sym_type: 0,
            section: None,
            value: 0,
            size: 0,
        });
        builder.symbol_map.insert(0, 0);
        builder
    }

    /// Intern `name` into `.shstrtab`, returning its byte offset. A name
    /// seen before (e.g. `.rela.text.foo` sharing `.text.foo`'s root, or two
    /// symbols copying the same home section) is never appended twice.
    fn intern_section_name(&mut self, name: &str) -> u64 {
        let id = self.shstrtab_interner.get_or_intern(name).to_usize();
        if id == self.shstrtab_offsets.len() {
            let offset = append_string(&mut self.shstrtab, name);
            self.shstrtab_offsets.push(offset);
        }
        self.shstrtab_offsets[id]
    }

    fn push_section(&mut self, section: OutSection) -> usize {
        let index = self.sections.len();
        log::debug!("builder: new output section {} ({})", index, section.name);
        self.sections.push(section);
        index
    }

    /// `.rodata.str`/merged-string intent per §9(b): treated as a plain
    /// variable section only when it starts with `.rodata.` but not
    /// `.rodata.str`. Exposed here too because the builder decides, on its
    /// own copy of a section's flags, whether a relocation target needs its
    /// defining section along for the ride.
    fn is_merge_strings(section: &Section) -> bool {
        section.sh_flags & (section_header::SHF_MERGE as u64 | section_header::SHF_STRINGS as u64)
            == (section_header::SHF_MERGE as u64 | section_header::SHF_STRINGS as u64)
    }

    /// Copy section `orig_idx` out of `view`, or return the already-copied
    /// output index (§3: "a section is copied at most once").
    pub fn copy_section(&mut self, view: &ElfView, orig_idx: usize) -> Result<usize> {
        if let Some(&existing) = self.section_map.get(&orig_idx) {
            return Ok(existing);
        }
        let section = view.section_by_index(orig_idx).ok_or_else(|| {
            log::error!("builder: copy_section: no such input section {}", orig_idx);
            Error::malformed_at("copy_section: no such input section", orig_idx)
        })?;

        let name_offset = self.intern_section_name(&section.name);
        let data = if section.sh_type == section_header::SHT_NOBITS {
            Vec::new()
        } else {
            section.data.clone()
        };
        let out = OutSection {
            name: section.name.clone(),
            name_offset,
            sh_type: section.sh_type,
            sh_flags: section.sh_flags,
            sh_link: 0,
            sh_info: 0,
            sh_entsize: section.sh_entsize,
            sh_size: section.sh_size,
            data,
        };
        let new_idx = self.push_section(out);
        self.section_map.insert(orig_idx, new_idx);
        log::debug!("builder: copied section {} -> {}", orig_idx, new_idx);
        Ok(new_idx)
    }

    /// Copy symbol `orig_idx` out of `view`, returning the remembered new
    /// index on repeat requests (§3).
    ///
    /// `copy_defining_section`: when true and the symbol is defined (has a
    /// valid section), its home section is copied too and the output
    /// symbol is marked `GLOBAL` with a flattened (`.`→`_`) name for
    /// functions. When false, the symbol is emitted as an external
    /// (`SHN_UNDEF`, `GLOBAL`, `st_size = 0`) reference instead.
    pub fn copy_symbol(&mut self, view: &ElfView, orig_idx: usize, copy_defining_section: bool) -> Result<usize> {
        if let Some(&existing) = self.symbol_map.get(&orig_idx) {
            return Ok(existing);
        }
        let sym = view
            .symbols
            .get(orig_idx)
            .ok_or_else(|| {
                log::error!("builder: copy_symbol: no such input symbol {}", orig_idx);
                Error::malformed_at("copy_symbol: no such input symbol", orig_idx)
            })?
            .clone();

        let defined = !sym.is_undefined() && view.section_by_index(sym.section_index).is_some();

        let out_symbol = if defined && copy_defining_section {
            let section_out = self.copy_section(view, sym.section_index)?;
            let name = if sym.is_fun() { sym.name.replace('.', "_") } else { sym.name.clone() };
            if sym.is_fun() {
                self.rewrite_function_section(view, &sym, section_out)?;
            }
            OutSymbol {
                name,
                binding: sym::STB_GLOBAL,
                sym_type: sym.sym_type,
                section: Some(section_out),
                value: sym.value,
                size: sym.size,
            }
        } else {
            OutSymbol {
                name: sym.name.clone(),
                binding: sym::STB_GLOBAL,
                sym_type: sym.sym_type,
                section: None,
                value: 0,
                size: 0,
            }
        };

        let new_idx = self.symbols.len();
        log::debug!("builder: copied symbol {} ({}) -> {}", orig_idx, sym.name, new_idx);
        self.symbols.push(out_symbol);
        self.symbol_map.insert(orig_idx, new_idx);
        Ok(new_idx)
    }

    /// Already-remembered output index for an original symbol, if any
    /// (used by callers that must avoid re-entrant `copy_symbol` calls,
    /// e.g. C7's `register_target` closure wiring).
    pub fn mapped_symbol(&self, orig_idx: usize) -> Option<usize> {
        self.symbol_map.get(&orig_idx).copied()
    }

    /// Run C7 over a just-copied function's output section bytes, wiring
    /// its `register_target` callback to `copy_symbol` with
    /// `copy_defining_section = false` (rewritten jump targets become
    /// external references the way §4.7 describes; the extractor's own
    /// mark phase is what decides whether a target should additionally be
    /// a full copy).
    fn rewrite_function_section(&mut self, view: &ElfView, function: &SymbolRecord, out_section_idx: usize) -> Result<()> {
        let mut code = self.sections[out_section_idx].data.clone();
        let new_relocs = {
            let this = &mut *self;
            rewrite_function(view, function, &mut code, |target_sym| {
                if let Some(existing) = this.symbol_map.get(&target_sym.index) {
                    return Ok(*existing);
                }
                this.copy_symbol(view, target_sym.index, false)
            })?
        };
        self.sections[out_section_idx].data = code;
        if !new_relocs.is_empty() {
            self.relas.entry(out_section_idx).or_default().extend(new_relocs);
        }
        Ok(())
    }

    /// Copy the `.rela.*` section targeting `orig_rela_idx` (an index into
    /// `view.relas`, *not* a section index), restricted to `restrict_to`'s
    /// `[value, value+size)` range if given (§4.8 `copy_rela_section`).
    ///
    /// `new_target_idx` is the output section index the copied RELA entries
    /// apply to.
    pub fn copy_rela_section(
        &mut self,
        view: &ElfView,
        orig_section_idx: usize,
        new_target_idx: usize,
        restrict_to: Option<&SymbolRecord>,
    ) -> Result<()> {
        let Some(rela) = view.rela_section_for(orig_section_idx) else { return Ok(()) };

        for entry in &rela.entries {
            if let Some(restrict) = restrict_to {
                if entry.offset < restrict.value || entry.offset >= restrict.value + restrict.size {
                    continue;
                }
            }

            let orig_sym = view.symbols.get(entry.sym_index).ok_or_else(|| {
                log::error!("builder: copy_rela_section: relocation references out-of-range symbol {}", entry.sym_index);
                Error::malformed_at("relocation references out-of-range symbol", entry.sym_index)
            })?;

            let target_section = view.section_by_index(orig_sym.section_index);
            let keep_with_section = orig_sym.is_section_symbol()
                && target_section
                    .map(|s| Self::is_merge_strings(s) || s.name.starts_with(".rodata.__func__"))
                    .unwrap_or(false);

            let (new_sym_idx, new_addend) = if keep_with_section {
                let new_idx = self.copy_symbol(view, entry.sym_index, true)?;
                (new_idx, entry.addend)
            } else {
                let was_section_symbol = orig_sym.is_section_symbol();
                let resolved = resolve(view, entry)?;
                let copy_with_section = !(resolved.symbol.is_fun() || resolved.symbol.is_object());
                let new_idx = self.copy_symbol(view, resolved.symbol.index, copy_with_section)?;
                let mut addend = entry.addend;
                if entry.is_specially_handled() && was_section_symbol && addend != -4 {
                    addend -= resolved.symbol.value as i64;
                }
                (new_idx, addend)
            };

            self.relas.entry(new_target_idx).or_default().push(Relocation {
                offset: entry.offset,
                addend: new_addend,
                sym_index: new_sym_idx,
                r_type: entry.r_type,
            });
        }
        log::debug!(
            "builder: copied rela section for original section {} into output section {}",
            orig_section_idx,
            new_target_idx
        );
        Ok(())
    }

    /// Append a single already-resolved relocation directly (used by C9's
    /// closure phase and `changeCallSymbol`-style rewrites that don't go
    /// through `copy_rela_section`'s per-entry resolution logic).
    pub fn push_relocation(&mut self, new_target_idx: usize, relocation: Relocation) {
        self.relas.entry(new_target_idx).or_default().push(relocation);
    }

    /// Whether `orig_idx` (a section index in the *input* view) has
    /// already been copied, and if so, its output index.
    pub fn mapped_section(&self, orig_idx: usize) -> Option<usize> {
        self.section_map.get(&orig_idx).copied()
    }

    /// Whether an output `.rela` section already exists targeting output
    /// section `new_target_idx`.
    pub fn has_rela_for(&self, new_target_idx: usize) -> bool {
        self.relas.contains_key(&new_target_idx)
    }

    /// §4.8 `sort_symtab`: scan from index 1, swapping any LOCAL found
    /// after a GLOBAL has been seen, rewriting every RELA entry that
    /// references either swapped index so relocations stay correct, and
    /// restarting the scan after each swap. Returns the final
    /// `sh_info` (the count of locals, i.e. the first global's index).
    pub fn sort_symtab(&mut self) -> u32 {
        loop {
            let mut seen_global: Option<usize> = None;
            let mut swap: Option<(usize, usize)> = None;
            for (i, sym) in self.symbols.iter().enumerate().skip(1) {
                if sym.binding == sym::STB_GLOBAL && seen_global.is_none() {
                    seen_global = Some(i);
                } else if sym.binding != sym::STB_GLOBAL {
                    if let Some(first_global) = seen_global {
                        swap = Some((first_global, i));
                        break;
                    }
                }
            }
            match swap {
                Some((a, b)) => {
                    log::debug!("builder: sort_symtab swapping {} <-> {}", a, b);
                    self.symbols.swap(a, b);
                    for entries in self.relas.values_mut() {
                        for reloc in entries.iter_mut() {
                            if reloc.sym_index == a {
                                reloc.sym_index = b;
                            } else if reloc.sym_index == b {
                                reloc.sym_index = a;
                            }
                        }
                    }
                }
                None => break,
            }
        }
        self.symbols.iter().position(|s| s.binding == sym::STB_GLOBAL).unwrap_or(self.symbols.len()) as u32
    }

    /// Finalize the object: assemble the section header table (string
    /// tables filled in, `.symtab` pointed at `.strtab` with `sh_info` set
    /// per `sort_symtab`, every `.rela.*` section emitted with `sh_link`
    /// pointing at `.symtab` and `sh_info` at its target), serialize every
    /// symbol and relocation entry, and write the complete ELF64 LE
    /// relocatable object to `out`.
    pub fn write(mut self) -> Result<Vec<u8>> {
        let first_global = self.sort_symtab();

        // `.rela<name>` names are computed against the live `shstrtab`
        // buffer (through the interner, so a repeated target name costs
        // nothing) before that buffer is moved into its own section.
        let rela_targets: Vec<usize> = self.relas.keys().copied().collect();
        let mut rela_name_offsets: IndexMap<usize, (String, u64)> = IndexMap::new();
        for target_idx in rela_targets {
            let target_name = self.sections[target_idx].name.clone();
            let rela_name = format!(".rela{}", target_name);
            let offset = self.intern_section_name(&rela_name);
            rela_name_offsets.insert(target_idx, (rela_name, offset));
        }

        self.sections[self.strtab_index].data = std::mem::take(&mut self.strtab);
        self.sections[self.shstrtab_index].data = std::mem::take(&mut self.shstrtab);
        self.sections[self.shstrtab_index].sh_size = self.sections[self.shstrtab_index].data.len() as u64;

        let symtab_data = {
            let ctx = goblin::container::Ctx::new(goblin::container::Container::Big, goblin::container::Endian::Little);
            let mut buf = vec![0u8; self.symbols.len() * sym::Sym::size(ctx.container)];
            let mut off = 0usize;
            for symbol in &self.symbols {
                let raw = sym::Sym {
                    st_name: append_string(&mut self.sections[self.strtab_index].data, &symbol.name) as usize,
                    st_info: (symbol.binding << 4) | (symbol.sym_type & 0xf),
                    st_other: 0,
                    st_shndx: symbol.section.map(|s| s + 1).unwrap_or(0),
                    st_value: symbol.value,
                    st_size: symbol.size,
                };
                buf.pwrite_with(raw, off, ctx).map_err(|_| {
                    log::error!("builder: failed to serialize symbol table entry for {}", symbol.name);
                    Error::malformed("failed to serialize symbol table entry")
                })?;
                off += sym::Sym::size(ctx.container);
            }
            buf
        };
        self.sections[self.symtab_index].data = symtab_data;
        self.sections[self.symtab_index].sh_info = first_global;
        self.sections[self.symtab_index].sh_link = (self.strtab_index + 1) as u32;
        self.sections[self.symtab_index].sh_size = self.sections[self.symtab_index].data.len() as u64;
        // Filled in above via `append_string` calls during symbol
        // serialization, so its final length is only known now.
        self.sections[self.strtab_index].sh_size = self.sections[self.strtab_index].data.len() as u64;

        // §4.8: every real (non-bookkeeping) output section is preceded,
        // in the final section header table, by exactly one SHN_UNDEF
        // entry at index 0; our in-memory `sections` vec already omits
        // that slot, so output section `i` lands at file section index
        // `i + 1` everywhere (symtab above, relas below, and in every
        // symbol's `st_shndx`).
        let ctx = goblin::container::Ctx::new(goblin::container::Container::Big, goblin::container::Endian::Little);
        let rela_entsize = reloc::Reloc::size(true, ctx);

        let mut extra_rela_sections: Vec<(usize, OutSection)> = Vec::new();
        for (&target_idx, entries) in self.relas.iter() {
            let (rela_name, name_offset) = rela_name_offsets[&target_idx].clone();
            let mut data = vec![0u8; entries.len() * rela_entsize];
            for (i, entry) in entries.iter().enumerate() {
                let raw = reloc::Reloc {
                    r_offset: entry.offset,
                    r_addend: Some(entry.addend),
                    r_sym: entry.sym_index,
                    r_type: entry.r_type,
                };
                data.pwrite_with(raw, i * rela_entsize, (true, ctx)).map_err(|_| {
                    log::error!("builder: failed to serialize relocation entry for target section {}", target_idx);
                    Error::malformed("failed to serialize relocation entry")
                })?;
            }
            extra_rela_sections.push((
                target_idx,
                OutSection {
                    name: rela_name,
                    name_offset,
                    sh_type: section_header::SHT_RELA,
                    sh_flags: 0,
                    sh_link: (self.symtab_index + 1) as u32,
                    sh_info: (target_idx + 1) as u32,
                    sh_entsize: rela_entsize as u64,
                    sh_size: data.len() as u64,
                    data,
                },
            ));
        }

        let mut all_sections = self.sections.clone();
        for (_, rela_section) in extra_rela_sections {
            all_sections.push(rela_section);
        }

        // Layout: header, then every section's bytes back to back, then
        // the section header table. Offsets are computed in one forward
        // pass; `.shstrtab` doubles as the section-name table the header's
        // `e_shstrndx` points at.
        let header_size = header::Header::size(&ctx);
        let mut data_offset = header_size as u64;
        let mut offsets = Vec::with_capacity(all_sections.len());
        for section in &all_sections {
            if section.sh_type == section_header::SHT_NOBITS {
                offsets.push(data_offset);
                continue;
            }
            offsets.push(data_offset);
            data_offset += section.data.len() as u64;
        }
        let shoff = data_offset;

        let mut header = header::Header::new(ctx);
        header.e_type = header::ET_REL;
        header.e_machine = header::EM_X86_64;
        header.e_shoff = shoff;
        header.e_shnum = (all_sections.len() + 1) as u16;
        header.e_shstrndx = (self.shstrtab_index + 1) as u16;

        let mut out = vec![0u8; shoff as usize + (all_sections.len() + 1) * section_header::SectionHeader::size(&ctx)];
        out.pwrite_with(header, 0, ctx).map_err(|_| {
            log::error!("builder: failed to serialize ELF header");
            Error::malformed("failed to serialize ELF header")
        })?;

        for (section, &offset) in all_sections.iter().zip(offsets.iter()) {
            if section.sh_type != section_header::SHT_NOBITS {
                out[offset as usize..offset as usize + section.data.len()].copy_from_slice(&section.data);
            }
        }

        let mut shdr_off = shoff as usize;
        out.pwrite_with(section_header::SectionHeader::default(), shdr_off, ctx).map_err(|_| {
            log::error!("builder: failed to serialize null section header");
            Error::malformed("failed to serialize null section header")
        })?;
        shdr_off += section_header::SectionHeader::size(&ctx);
        for (section, &offset) in all_sections.iter().zip(offsets.iter()) {
            let shdr = section_header::SectionHeader {
                sh_name: section.name_offset as usize,
                sh_type: section.sh_type,
                sh_flags: section.sh_flags as u64,
                sh_addr: 0,
                sh_offset: offset,
                sh_size: if section.sh_type == section_header::SHT_NOBITS { section.sh_size } else { section.data.len() as u64 },
                sh_link: section.sh_link,
                sh_info: section.sh_info,
                sh_addralign: 1,
                sh_entsize: section.sh_entsize,
            };
            out.pwrite_with(shdr, shdr_off, ctx).map_err(|_| {
                log::error!("builder: failed to serialize section header for {}", section.name);
                Error::malformed("failed to serialize section header")
            })?;
            shdr_off += section_header::SectionHeader::size(&ctx);
        }

        log::debug!("builder: wrote {} bytes, {} sections, {} symbols", out.len(), all_sections.len() + 1, self.symbols.len());
        Ok(out)
    }
}

impl Default for ElfBuilder {
    fn default() -> Self {
        Self::new()
    }
}
