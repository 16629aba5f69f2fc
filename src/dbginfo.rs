//! # Debug information queries
//!
//! Loads the ELF image of the debuggee once and answers the questions the
//! engine asks while stepping: which function covers an address, which line
//! table row covers an address, where does a `file:line` spot live, and
//! what does a symbol name resolve to.
//!
//! All addresses going in and out of this module are link-time addresses as
//! recorded in DWARF. Translating them from and to runtime addresses is the
//! job of [`crate::memorymap::AddressSpace`].

use std::fmt::{self, Display};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use gimli::{
    AttributeValue, DW_AT_high_pc, DW_AT_low_pc, DW_AT_name, DW_TAG_subprogram, EndianRcSlice,
    Reader, RunTimeEndian, Unit,
};
use object::{Object, ObjectKind, ObjectSection, ObjectSymbol};

use crate::errors::{DebuggerError, Result};
use crate::Addr;

// the gimli::Reader we use: owned, refcounted section data
type GimliRd = EndianRcSlice<RunTimeEndian>;

/// One row of the DWARF line number program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineEntry {
    pub address: Addr,
    pub file: PathBuf,
    pub line: u64,
    pub is_stmt: bool,
}

/// A subprogram DIE, reduced to the attributes the engine works with.
#[derive(Debug, Clone)]
pub struct FunctionDie {
    pub name: Option<String>,
    pub low_pc: Addr,
    pub high_pc: Addr,
}

impl FunctionDie {
    pub fn contains(&self, pc: Addr) -> bool {
        self.low_pc <= pc && pc < self.high_pc
    }
}

/// ELF symbol types narrowed down to the ones the debugger distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    NoType,
    Object,
    Func,
    Section,
    File,
}

impl From<object::SymbolKind> for SymbolKind {
    fn from(kind: object::SymbolKind) -> Self {
        match kind {
            object::SymbolKind::Text => SymbolKind::Func,
            object::SymbolKind::Data => SymbolKind::Object,
            object::SymbolKind::Section => SymbolKind::Section,
            object::SymbolKind::File => SymbolKind::File,
            _ => SymbolKind::NoType,
        }
    }
}

impl Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SymbolKind::NoType => "notype",
            SymbolKind::Object => "object",
            SymbolKind::Func => "func",
            SymbolKind::Section => "section",
            SymbolKind::File => "file",
        };
        write!(f, "{name}")
    }
}

/// One entry of the static or dynamic symbol table.
#[derive(Debug, Clone)]
pub struct Sym {
    pub name: String,
    pub kind: SymbolKind,
    pub addr: Addr,
}

impl Display for Sym {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.kind, self.addr)
    }
}

/// `suffix` matches when it is the trailing part of `of`, the way a user
/// names `hello.c` for a CU compiled from `/home/u/proj/src/hello.c`.
pub(crate) fn is_suffix(suffix: &str, of: &str) -> bool {
    of.ends_with(suffix)
}

pub struct DebugInfo {
    dwarf: gimli::Dwarf<GimliRd>,
    symbols: Vec<Sym>,
    pie: bool,
}

impl DebugInfo {
    /// Read the target executable and load its DWARF sections and symbol
    /// tables. The section data is copied into refcounted buffers, so the
    /// file is touched exactly once.
    pub fn build(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read(path.as_ref())?;
        let obj = object::File::parse(&*raw)?;

        let endian = if obj.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };
        let loader = |section: gimli::SectionId| -> std::result::Result<GimliRd, gimli::Error> {
            let data = obj
                .section_by_name(section.name())
                .and_then(|s| s.uncompressed_data().ok())
                .unwrap_or_default();
            Ok(GimliRd::new(Rc::from(data.as_ref()), endian))
        };
        let dwarf = gimli::Dwarf::load(loader)?;

        let symbols = obj
            .symbols()
            .chain(obj.dynamic_symbols())
            .filter_map(|sym| {
                let name = sym.name().ok()?;
                if name.is_empty() {
                    return None;
                }
                Some(Sym {
                    name: name.to_string(),
                    kind: sym.kind().into(),
                    addr: sym.address().into(),
                })
            })
            .collect();

        // ET_DYN is what a position independent executable reports
        let pie = obj.kind() == ObjectKind::Dynamic;

        Ok(DebugInfo {
            dwarf,
            symbols,
            pie,
        })
    }

    pub fn is_pie(&self) -> bool {
        self.pie
    }

    /// All exact name matches across the static and dynamic symbol tables.
    pub fn lookup_symbol(&self, name: &str) -> Vec<Sym> {
        self.symbols
            .iter()
            .filter(|sym| sym.name == name)
            .cloned()
            .collect()
    }

    /// The subprogram whose PC range covers `pc`, searched in the
    /// compilation units whose own range covers `pc`.
    pub fn function_containing(&self, pc: Addr) -> Result<FunctionDie> {
        let mut units = self.dwarf.units();
        while let Some(header) = units.next()? {
            let unit = self.dwarf.unit(header)?;
            if !self.unit_contains(&unit, pc)? {
                continue;
            }
            let mut entries = unit.entries();
            while let Some((_, entry)) = entries.next_dfs()? {
                if entry.tag() != DW_TAG_subprogram {
                    continue;
                }
                let Some(func) = self.function_from_die(&unit, entry)? else {
                    continue;
                };
                if func.contains(pc) {
                    return Ok(func);
                }
            }
        }
        Err(DebuggerError::NotInFunction(pc))
    }

    /// Every subprogram DIE named `name`, across all compilation units.
    pub fn functions_by_name(&self, name: &str) -> Result<Vec<FunctionDie>> {
        let mut found = Vec::new();
        let mut units = self.dwarf.units();
        while let Some(header) = units.next()? {
            let unit = self.dwarf.unit(header)?;
            let mut entries = unit.entries();
            while let Some((_, entry)) = entries.next_dfs()? {
                if entry.tag() != DW_TAG_subprogram {
                    continue;
                }
                if self.die_name(&unit, entry)?.as_deref() != Some(name) {
                    continue;
                }
                if let Some(func) = self.function_from_die(&unit, entry)? {
                    found.push(func);
                }
            }
        }
        Ok(found)
    }

    /// The line table row covering `pc`: the last row at or before `pc`
    /// within a live sequence.
    pub fn line_for(&self, pc: Addr) -> Result<LineEntry> {
        let mut units = self.dwarf.units();
        while let Some(header) = units.next()? {
            let unit = self.dwarf.unit(header)?;
            if !self.unit_contains(&unit, pc)? {
                continue;
            }
            let rows = self.unit_line_rows(&unit)?;
            for idx in 1..rows.len() {
                let (entry, end_sequence) = &rows[idx - 1];
                let (next, _) = &rows[idx];
                if !end_sequence && entry.address <= pc && pc < next.address {
                    return Ok(entry.clone());
                }
            }
        }
        Err(DebuggerError::NoLineEntry(pc))
    }

    /// All line table rows of the compilation unit covering `pc`, in
    /// program order, without the end-of-sequence markers.
    pub fn line_table_covering(&self, pc: Addr) -> Result<Vec<LineEntry>> {
        let mut units = self.dwarf.units();
        while let Some(header) = units.next()? {
            let unit = self.dwarf.unit(header)?;
            if !self.unit_contains(&unit, pc)? {
                continue;
            }
            return Ok(self
                .unit_line_rows(&unit)?
                .into_iter()
                .filter(|(_, end_sequence)| !end_sequence)
                .map(|(entry, _)| entry)
                .collect());
        }
        Err(DebuggerError::NoLineEntry(pc))
    }

    /// The row following `entry` in its line table. Used to skip the
    /// function prologue: the row at `low_pc` points at it, the next row is
    /// the first real statement.
    pub fn line_entry_after(&self, entry: &LineEntry) -> Result<LineEntry> {
        let rows = self.line_table_covering(entry.address)?;
        let mut rows = rows
            .into_iter()
            .skip_while(|row| row.address != entry.address);
        rows.next();
        rows.next().ok_or(DebuggerError::NoLineEntry(entry.address))
    }

    /// The first `is_stmt` row with a matching line in the first
    /// compilation unit whose root name ends in `file`.
    pub fn line_for_source(&self, file: &str, line: u64) -> Result<LineEntry> {
        let mut units = self.dwarf.units();
        while let Some(header) = units.next()? {
            let unit = self.dwarf.unit(header)?;
            let Some(name) = unit.name.as_ref() else {
                continue;
            };
            if !is_suffix(file, name.to_string_lossy()?.as_ref()) {
                continue;
            }
            for (entry, end_sequence) in self.unit_line_rows(&unit)? {
                if !end_sequence && entry.is_stmt && entry.line == line {
                    return Ok(entry);
                }
            }
        }
        Err(DebuggerError::SourceLineNotFound(file.to_string(), line))
    }

    fn unit_contains(&self, unit: &Unit<GimliRd>, pc: Addr) -> Result<bool> {
        let mut ranges = self.dwarf.unit_ranges(unit)?;
        while let Some(range) = ranges.next()? {
            if range.begin <= pc.u64() && pc.u64() < range.end {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn die_name(
        &self,
        unit: &Unit<GimliRd>,
        entry: &gimli::DebuggingInformationEntry<'_, '_, GimliRd>,
    ) -> Result<Option<String>> {
        let Some(attr) = entry.attr(DW_AT_name)? else {
            return Ok(None);
        };
        let name = self.dwarf.attr_string(unit, attr.value())?;
        Ok(Some(name.to_string_lossy()?.into_owned()))
    }

    fn function_from_die(
        &self,
        unit: &Unit<GimliRd>,
        entry: &gimli::DebuggingInformationEntry<'_, '_, GimliRd>,
    ) -> Result<Option<FunctionDie>> {
        let low = match entry.attr_value(DW_AT_low_pc)? {
            Some(AttributeValue::Addr(addr)) => addr,
            Some(AttributeValue::DebugAddrIndex(index)) => self.dwarf.address(unit, index)?,
            _ => return Ok(None),
        };
        let high = match entry.attr_value(DW_AT_high_pc)? {
            Some(AttributeValue::Addr(addr)) => addr,
            // DW_AT_high_pc may also be an offset from low_pc
            Some(AttributeValue::Udata(offset)) => low + offset,
            _ => return Ok(None),
        };
        Ok(Some(FunctionDie {
            name: self.die_name(unit, entry)?,
            low_pc: low.into(),
            high_pc: high.into(),
        }))
    }

    /// Run the line number program of `unit` to completion. The returned
    /// flag marks end-of-sequence rows, whose addresses bound a sequence
    /// but do not describe an instruction.
    fn unit_line_rows(&self, unit: &Unit<GimliRd>) -> Result<Vec<(LineEntry, bool)>> {
        let Some(program) = unit.line_program.clone() else {
            return Ok(Vec::new());
        };
        let comp_dir = match &unit.comp_dir {
            Some(dir) => PathBuf::from(dir.to_string_lossy()?.into_owned()),
            None => PathBuf::new(),
        };

        let mut out = Vec::new();
        let mut rows = program.rows();
        while let Some((header, row)) = rows.next_row()? {
            let file = match row.file(header) {
                Some(file) => self.render_file(unit, file, header, &comp_dir)?,
                None => PathBuf::new(),
            };
            out.push((
                LineEntry {
                    address: row.address().into(),
                    file,
                    line: row.line().map_or(0, |line| line.get()),
                    is_stmt: row.is_stmt(),
                },
                row.end_sequence(),
            ));
        }
        Ok(out)
    }

    fn render_file(
        &self,
        unit: &Unit<GimliRd>,
        file: &gimli::FileEntry<GimliRd>,
        header: &gimli::LineProgramHeader<GimliRd>,
        comp_dir: &Path,
    ) -> Result<PathBuf> {
        let mut path = comp_dir.to_path_buf();
        if let Some(dir) = file.directory(header) {
            let dir = self.dwarf.attr_string(unit, dir)?;
            let dir = dir.to_string_lossy()?;
            let dir = Path::new(dir.as_ref());
            if dir.is_absolute() {
                path = dir.to_path_buf();
            } else {
                path.push(dir);
            }
        }
        let name = self.dwarf.attr_string(unit, file.path_name())?;
        path.push(name.to_string_lossy()?.as_ref());
        Ok(path)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_symbol_kind_mapping() {
        assert_eq!(SymbolKind::from(object::SymbolKind::Text), SymbolKind::Func);
        assert_eq!(
            SymbolKind::from(object::SymbolKind::Data),
            SymbolKind::Object
        );
        assert_eq!(
            SymbolKind::from(object::SymbolKind::Section),
            SymbolKind::Section
        );
        assert_eq!(SymbolKind::from(object::SymbolKind::File), SymbolKind::File);
        assert_eq!(
            SymbolKind::from(object::SymbolKind::Unknown),
            SymbolKind::NoType
        );
    }

    #[test]
    fn test_sym_display() {
        let sym = Sym {
            name: "main".to_string(),
            kind: SymbolKind::Func,
            addr: Addr::from(0x401130usize),
        };
        assert_eq!(format!("{sym}"), "main func 0x0000000000401130");
    }

    #[test]
    fn test_suffix_matching() {
        assert!(is_suffix("hello.c", "/home/u/proj/src/hello.c"));
        assert!(is_suffix("src/hello.c", "/home/u/proj/src/hello.c"));
        assert!(is_suffix("hello.c", "hello.c"));
        assert!(!is_suffix("hello.c", "/home/u/proj/src/hello.cpp"));
        assert!(!is_suffix("goodbye.c", "/home/u/proj/src/hello.c"));
    }

    #[test]
    fn test_function_die_containment() {
        let func = FunctionDie {
            name: Some("main".to_string()),
            low_pc: Addr::from(0x1000usize),
            high_pc: Addr::from(0x1040usize),
        };
        assert!(func.contains(Addr::from(0x1000usize)));
        assert!(func.contains(Addr::from(0x103fusize)));
        assert!(!func.contains(Addr::from(0x1040usize)));
        assert!(!func.contains(Addr::from(0xfffusize)));
    }
}
