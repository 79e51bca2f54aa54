//! A little assembler for the tests: builds well-formed ELF64 relocatable
//! objects (little endian, x86-64) out of a declarative description, the
//! way `-ffunction-sections -fdata-sections` compilations look.

#![allow(dead_code)]

use std::collections::HashMap;

pub const SHT_PROGBITS: u32 = 0x01;
pub const SHT_NOBITS: u32 = 0x08;

pub const SHF_WRITE: u64 = 0x01;
pub const SHF_ALLOC: u64 = 0x02;
pub const SHF_EXECINSTR: u64 = 0x04;
pub const SHF_MERGE: u64 = 0x10;
pub const SHF_STRINGS: u64 = 0x20;
pub const SHF_INFO_LINK: u64 = 0x40;

pub const STB_LOCAL: u8 = 0x00;
pub const STB_GLOBAL: u8 = 0x01;

pub const STT_NOTYPE: u8 = 0x00;
pub const STT_OBJECT: u8 = 0x01;
pub const STT_FUNC: u8 = 0x02;
pub const STT_SECTION: u8 = 0x03;
pub const STT_FILE: u8 = 0x04;

pub const SHN_ABS: u16 = 0xfff1;

pub const R_X86_64_64: u32 = 0x01;
pub const R_X86_64_PC32: u32 = 0x02;
pub const R_X86_64_32S: u32 = 0x0b;

/// How a relocation entry designates its symbol.
pub enum SymRef {
    /// A named function/object/undefined symbol.
    Named(&'static str),
    /// The `SECTION` symbol of the named section.
    Section(&'static str),
}

pub struct TestRela {
    pub offset: u64,
    pub symbol: SymRef,
    pub r#type: u32,
    pub addend: i64,
}

struct TestSection {
    name: String,
    r#type: u32,
    flags: u64,
    data: Vec<u8>,
    align: u64,
}

struct TestSymbol {
    name: String,
    bind: u8,
    r#type: u8,
    section: Option<String>,
    size: u64,
}

/// The object under construction.
pub struct TestObject {
    file_symbol: String,
    flags: u32,
    program_header_count: u16,
    sections: Vec<TestSection>,
    symbols: Vec<TestSymbol>,
    relas: Vec<(String, Vec<TestRela>)>,
}

impl Default for TestObject {
    fn default() -> Self {
        Self::new()
    }
}

impl TestObject {
    pub fn new() -> Self {
        Self {
            file_symbol: "test.c".to_string(),
            flags: 0,
            program_header_count: 0,
            sections: Vec::new(),
            symbols: Vec::new(),
            relas: Vec::new(),
        }
    }

    /// Override the `e_flags` field, to make two objects' file headers
    /// disagree.
    pub fn flags(&mut self, flags: u32) -> &mut Self {
        self.flags = flags;

        self
    }

    /// Pretend the object carries program headers, like a linked image.
    pub fn program_headers(&mut self, count: u16) -> &mut Self {
        self.program_header_count = count;

        self
    }

    pub fn section(
        &mut self,
        name: &str,
        r#type: u32,
        flags: u64,
        data: Vec<u8>,
        align: u64,
    ) -> &mut Self {
        self.sections.push(TestSection {
            name: name.to_string(),
            r#type,
            flags,
            data,
            align,
        });

        self
    }

    /// A function symbol, defined at offset 0 of its section.
    pub fn func(&mut self, name: &str, bind: u8, section: &str, size: u64) -> &mut Self {
        self.symbols.push(TestSymbol {
            name: name.to_string(),
            bind,
            r#type: STT_FUNC,
            section: Some(section.to_string()),
            size,
        });

        self
    }

    /// A data-object symbol, defined at offset 0 of its section.
    pub fn object(&mut self, name: &str, bind: u8, section: &str, size: u64) -> &mut Self {
        self.symbols.push(TestSymbol {
            name: name.to_string(),
            bind,
            r#type: STT_OBJECT,
            section: Some(section.to_string()),
            size,
        });

        self
    }

    /// A symbol with an explicit type, for the unreconcilable scenarios.
    pub fn symbol(&mut self, name: &str, bind: u8, r#type: u8, section: &str, size: u64) -> &mut Self {
        self.symbols.push(TestSymbol {
            name: name.to_string(),
            bind,
            r#type,
            section: Some(section.to_string()),
            size,
        });

        self
    }

    /// An undefined external reference.
    pub fn undef(&mut self, name: &str) -> &mut Self {
        self.symbols.push(TestSymbol {
            name: name.to_string(),
            bind: STB_GLOBAL,
            r#type: STT_NOTYPE,
            section: None,
            size: 0,
        });

        self
    }

    /// The relocation entries applying to `base`, emitted as a
    /// `.rela<base>` section.
    pub fn rela(&mut self, base: &str, entries: Vec<TestRela>) -> &mut Self {
        self.relas.push((base.to_string(), entries));

        self
    }

    /// Assemble the object.
    pub fn build(&self) -> Vec<u8> {
        // Final section order: user sections, relocation sections, then the
        // housekeeping trio. On-disk indices are 1-based (0 is the null
        // section header).
        let user_count = self.sections.len();
        let symtab_index = (user_count + self.relas.len() + 1) as u32;
        let strtab_index = symtab_index + 1;
        let shstrtab_index = symtab_index + 2;

        let section_index = |name: &str| -> u16 {
            let position = self
                .sections
                .iter()
                .position(|section| section.name == name)
                .unwrap_or_else(|| panic!("unknown test section `{name}`"));

            (position + 1) as u16
        };

        // Symbol table: null, FILE, one SECTION symbol per user section,
        // the LOCAL user symbols, then the non-LOCAL ones.
        struct Entry {
            name: Option<String>,
            info: u8,
            shndx: u16,
            size: u64,
        }

        let mut entries = vec![Entry { name: None, info: 0, shndx: 0, size: 0 }];
        let mut named_index = HashMap::new();
        let mut section_symbol_index = HashMap::new();

        entries.push(Entry {
            name: Some(self.file_symbol.clone()),
            info: STT_FILE,
            shndx: SHN_ABS,
            size: 0,
        });

        for section in &self.sections {
            section_symbol_index.insert(section.name.clone(), entries.len() as u32);
            entries.push(Entry {
                name: None,
                info: STT_SECTION,
                shndx: section_index(&section.name),
                size: 0,
            });
        }

        for symbol in self.symbols.iter().filter(|symbol| symbol.bind == STB_LOCAL) {
            named_index.insert(symbol.name.clone(), entries.len() as u32);
            entries.push(Entry {
                name: Some(symbol.name.clone()),
                info: (symbol.bind << 4) | symbol.r#type,
                shndx: symbol.section.as_deref().map_or(0, section_index),
                size: symbol.size,
            });
        }

        let first_global = entries.len() as u32;

        for symbol in self.symbols.iter().filter(|symbol| symbol.bind != STB_LOCAL) {
            named_index.insert(symbol.name.clone(), entries.len() as u32);
            entries.push(Entry {
                name: Some(symbol.name.clone()),
                info: (symbol.bind << 4) | symbol.r#type,
                shndx: symbol.section.as_deref().map_or(0, section_index),
                size: symbol.size,
            });
        }

        // Symbol-name string table.
        let mut strtab = vec![0u8];
        let mut name_offsets = vec![0u32; entries.len()];

        for (position, entry) in entries.iter().enumerate() {
            if let Some(name) = &entry.name {
                name_offsets[position] = strtab.len() as u32;
                strtab.extend_from_slice(name.as_bytes());
                strtab.push(0);
            }
        }

        // Symbol table bytes.
        let mut symtab = Vec::with_capacity(entries.len() * 24);

        for (position, entry) in entries.iter().enumerate() {
            symtab.extend_from_slice(&name_offsets[position].to_le_bytes());
            symtab.push(entry.info);
            symtab.push(0);
            symtab.extend_from_slice(&entry.shndx.to_le_bytes());
            symtab.extend_from_slice(&0u64.to_le_bytes());
            symtab.extend_from_slice(&entry.size.to_le_bytes());
        }

        // Assemble the final section list.
        struct Out {
            name: String,
            r#type: u32,
            flags: u64,
            data: Vec<u8>,
            align: u64,
            link: u32,
            info: u32,
            entsize: u64,
        }

        let mut sections = Vec::new();

        for section in &self.sections {
            sections.push(Out {
                name: section.name.clone(),
                r#type: section.r#type,
                flags: section.flags,
                data: section.data.clone(),
                align: section.align,
                link: 0,
                info: 0,
                entsize: 0,
            });
        }

        for (base, relas) in &self.relas {
            let mut data = Vec::with_capacity(relas.len() * 24);

            for rela in relas {
                let symbol = match &rela.symbol {
                    SymRef::Named(name) => *named_index
                        .get(*name)
                        .unwrap_or_else(|| panic!("unknown test symbol `{name}`")),
                    SymRef::Section(name) => *section_symbol_index
                        .get(*name)
                        .unwrap_or_else(|| panic!("unknown test section `{name}`")),
                };

                data.extend_from_slice(&rela.offset.to_le_bytes());
                data.extend_from_slice(
                    &((u64::from(symbol) << 32) | u64::from(rela.r#type)).to_le_bytes(),
                );
                data.extend_from_slice(&rela.addend.to_le_bytes());
            }

            sections.push(Out {
                name: format!(".rela{base}"),
                r#type: 0x04,
                flags: SHF_INFO_LINK,
                data,
                align: 8,
                link: symtab_index,
                info: u32::from(section_index(base)),
                entsize: 24,
            });
        }

        sections.push(Out {
            name: ".symtab".to_string(),
            r#type: 0x02,
            flags: 0,
            data: symtab,
            align: 8,
            link: strtab_index,
            info: first_global,
            entsize: 24,
        });

        sections.push(Out {
            name: ".strtab".to_string(),
            r#type: 0x03,
            flags: 0,
            data: strtab,
            align: 1,
            link: 0,
            info: 0,
            entsize: 0,
        });

        // Section-name string table.
        let mut shstrtab = vec![0u8];
        let mut section_name_offsets = Vec::with_capacity(sections.len() + 1);

        for section in &sections {
            section_name_offsets.push(shstrtab.len() as u32);
            shstrtab.extend_from_slice(section.name.as_bytes());
            shstrtab.push(0);
        }

        section_name_offsets.push(shstrtab.len() as u32);
        shstrtab.extend_from_slice(b".shstrtab");
        shstrtab.push(0);

        sections.push(Out {
            name: ".shstrtab".to_string(),
            r#type: 0x03,
            flags: 0,
            data: shstrtab,
            align: 1,
            link: 0,
            info: 0,
            entsize: 0,
        });

        // Layout: header, section data, section-header table.
        let mut offsets = Vec::with_capacity(sections.len());
        let mut offset = 64u64;

        for section in &sections {
            if section.align > 1 {
                offset = offset.div_ceil(section.align) * section.align;
            }

            offsets.push(offset);

            if section.r#type != SHT_NOBITS {
                offset += section.data.len() as u64;
            }
        }

        let shoff = offset.div_ceil(8) * 8;

        let mut bytes = Vec::new();

        // ELF header.
        bytes.extend_from_slice(&[0x7f, b'E', b'L', b'F', 0x02, 0x01, 0x01, 0x00]);
        bytes.extend_from_slice(&[0u8; 8]);
        bytes.extend_from_slice(&1u16.to_le_bytes()); // ET_REL
        bytes.extend_from_slice(&0x3eu16.to_le_bytes()); // EM_X86_64
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes()); // e_entry
        bytes.extend_from_slice(&0u64.to_le_bytes()); // e_phoff
        bytes.extend_from_slice(&shoff.to_le_bytes());
        bytes.extend_from_slice(&self.flags.to_le_bytes());
        bytes.extend_from_slice(&64u16.to_le_bytes());
        bytes.extend_from_slice(&0u16.to_le_bytes()); // e_phentsize
        bytes.extend_from_slice(&self.program_header_count.to_le_bytes());
        bytes.extend_from_slice(&64u16.to_le_bytes());
        bytes.extend_from_slice(&((sections.len() + 1) as u16).to_le_bytes());
        bytes.extend_from_slice(&(shstrtab_index as u16).to_le_bytes());

        // Section data.
        for (section, section_offset) in sections.iter().zip(&offsets) {
            if section.r#type == SHT_NOBITS {
                continue;
            }

            bytes.resize(*section_offset as usize, 0);
            bytes.extend_from_slice(&section.data);
        }

        // Section headers, starting with the null one.
        bytes.resize(shoff as usize, 0);
        bytes.extend_from_slice(&[0u8; 64]);

        for ((section, section_offset), name_offset) in
            sections.iter().zip(&offsets).zip(&section_name_offsets)
        {
            bytes.extend_from_slice(&name_offset.to_le_bytes());
            bytes.extend_from_slice(&section.r#type.to_le_bytes());
            bytes.extend_from_slice(&section.flags.to_le_bytes());
            bytes.extend_from_slice(&0u64.to_le_bytes()); // sh_addr
            bytes.extend_from_slice(&section_offset.to_le_bytes());
            bytes.extend_from_slice(&(section.data.len() as u64).to_le_bytes());
            bytes.extend_from_slice(&section.link.to_le_bytes());
            bytes.extend_from_slice(&section.info.to_le_bytes());
            bytes.extend_from_slice(&section.align.to_le_bytes());
            bytes.extend_from_slice(&section.entsize.to_le_bytes());
        }

        bytes
    }
}
