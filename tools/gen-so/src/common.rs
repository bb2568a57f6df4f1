use elf::abi::{R_ARM_ABS32, R_ARM_GLOB_DAT, R_ARM_JUMP_SLOT, R_ARM_NONE, R_ARM_RELATIVE};

/// Type of an ELF symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolType {
    /// Thumb function; its value carries bit 0.
    ThumbFunc,
    /// ARM function.
    ArmFunc,
    /// Data object.
    Object,
}

/// Binding of an ELF symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolScope {
    Global,
    Local,
    Weak,
}

/// Description of a symbol to be generated.
#[derive(Clone, Debug)]
pub struct SymbolDesc {
    pub name: String,
    pub sym_type: SymbolType,
    pub scope: SymbolScope,
    /// Code or initial data. `None` makes the symbol undefined.
    pub content: Option<Vec<u8>>,
    /// Size written to `st_size`. Defaults to the content length.
    pub size: Option<u32>,
}

impl SymbolDesc {
    /// A global Thumb function with the given machine code.
    pub fn thumb_func(name: impl Into<String>, code: &[u8]) -> Self {
        Self::defined(name, SymbolType::ThumbFunc, code)
    }

    /// A global Thumb function from halfwords in execution order.
    pub fn thumb_func_halfwords(name: impl Into<String>, code: &[u16]) -> Self {
        let bytes: Vec<u8> = code.iter().flat_map(|half| half.to_le_bytes()).collect();
        Self::thumb_func(name, &bytes)
    }

    /// A global ARM function with the given machine code.
    pub fn arm_func(name: impl Into<String>, code: &[u8]) -> Self {
        Self::defined(name, SymbolType::ArmFunc, code)
    }

    /// A global data object.
    pub fn object(name: impl Into<String>, data: &[u8]) -> Self {
        Self::defined(name, SymbolType::Object, data)
    }

    /// An undefined function, imported by the module.
    pub fn undefined_func(name: impl Into<String>) -> Self {
        Self::undefined(name, SymbolType::ThumbFunc)
    }

    /// An undefined data object, imported by the module.
    pub fn undefined_object(name: impl Into<String>) -> Self {
        Self::undefined(name, SymbolType::Object)
    }

    fn defined(name: impl Into<String>, sym_type: SymbolType, content: &[u8]) -> Self {
        Self {
            name: name.into(),
            sym_type,
            scope: SymbolScope::Global,
            content: Some(content.to_vec()),
            size: None,
        }
    }

    fn undefined(name: impl Into<String>, sym_type: SymbolType) -> Self {
        Self {
            name: name.into(),
            sym_type,
            scope: SymbolScope::Global,
            content: None,
            size: None,
        }
    }

    pub fn with_size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_scope(mut self, scope: SymbolScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn weak(self) -> Self {
        self.with_scope(SymbolScope::Weak)
    }

    pub fn is_defined(&self) -> bool {
        self.content.is_some()
    }

    pub fn is_code(&self) -> bool {
        matches!(self.sym_type, SymbolType::ThumbFunc | SymbolType::ArmFunc)
    }
}

/// Where a relocated word lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelocPlace {
    /// A fresh word in the GOT area of the data segment.
    Slot,
    /// A word inside a defined symbol's content.
    InSymbol { name: String, offset: u32 },
}

/// Represents a relocation entry to be generated.
#[derive(Clone, Debug)]
pub struct RelocEntry {
    /// Referenced symbol, empty for symbol-less kinds.
    pub symbol_name: String,
    pub r_type: u32,
    /// The implicit addend stored at the target word.
    pub addend: u32,
    /// For `R_ARM_RELATIVE`: add this symbol's address to the addend.
    pub addend_symbol: Option<String>,
    pub place: RelocPlace,
}

impl RelocEntry {
    /// A relocation of type `r_type` referencing `symbol_name`.
    pub fn with_name(symbol_name: impl Into<String>, r_type: u32) -> Self {
        Self {
            symbol_name: symbol_name.into(),
            r_type,
            addend: 0,
            addend_symbol: None,
            place: RelocPlace::Slot,
        }
    }

    /// A relocation without a symbol reference.
    pub fn new(r_type: u32) -> Self {
        Self::with_name(String::new(), r_type)
    }

    pub fn with_addend(mut self, addend: u32) -> Self {
        self.addend = addend;
        self
    }

    /// Places the relocated word at `offset` inside the symbol `name`.
    pub fn in_symbol(mut self, name: impl Into<String>, offset: u32) -> Self {
        self.place = RelocPlace::InSymbol {
            name: name.into(),
            offset,
        };
        self
    }

    pub fn jump_slot(symbol_name: impl Into<String>) -> Self {
        Self::with_name(symbol_name, R_ARM_JUMP_SLOT)
    }

    pub fn glob_dat(symbol_name: impl Into<String>) -> Self {
        Self::with_name(symbol_name, R_ARM_GLOB_DAT)
    }

    pub fn abs(symbol_name: impl Into<String>) -> Self {
        Self::with_name(symbol_name, R_ARM_ABS32)
    }

    /// `R_ARM_RELATIVE` with a plain addend.
    pub fn relative(addend: u32) -> Self {
        Self::new(R_ARM_RELATIVE).with_addend(addend)
    }

    /// `R_ARM_RELATIVE` whose addend is the address of a defined symbol.
    pub fn relative_to(name: impl Into<String>) -> Self {
        let mut entry = Self::new(R_ARM_RELATIVE);
        entry.addend_symbol = Some(name.into());
        entry
    }

    pub fn none() -> Self {
        Self::new(R_ARM_NONE)
    }

    /// Whether the record belongs in DT_JMPREL.
    pub fn is_plt(&self) -> bool {
        self.r_type == R_ARM_JUMP_SLOT
    }
}

/// One DT_INIT_ARRAY element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InitEntry {
    /// Address of a defined function, filled by an `R_ARM_RELATIVE`.
    Func(String),
    /// A literal word such as 0 or -1.
    Raw(u32),
}

/// Which symbol hash tables the dynamic section points at.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HashStyle {
    #[default]
    Sysv,
    Gnu,
    Both,
}
