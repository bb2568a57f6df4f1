use crate::{
    Module, NativeAddressing, Result,
    elf::{
        ElfDynamic, ElfHeader, ElfPhdr, ElfStringTable, PHDR_SIZE, Phdr, SymbolIndex, SymbolTable,
        read_pod,
    },
    input::{ElfReader, IntoElfReader},
    malformed_error,
    os::{DefaultMmap, Mmap},
    segment::program::ProgramSegments,
};
use alloc::{
    borrow::ToOwned,
    string::{String, ToString},
    vec::Vec,
};
use core::marker::PhantomData;
use elf::abi::{PF_X, PT_DYNAMIC, PT_LOAD};

/// Load address requested when none is given.
pub const DEFAULT_BASE: u32 = 0x9800_0000;
/// Size of the executable area reserved after the image for generated stubs.
pub const DEFAULT_PATCH_AREA: usize = 16 * 1024;

pub(crate) struct ElfBuf {
    buf: Vec<u8>,
}

impl ElfBuf {
    fn new() -> Self {
        let mut buf = Vec::new();
        buf.resize(ElfHeader::size(), 0);
        ElfBuf { buf }
    }

    pub(crate) fn prepare_ehdr(&mut self, object: &mut impl ElfReader) -> Result<ElfHeader> {
        let size = ElfHeader::size();
        object
            .read(&mut self.buf[..size], 0)
            .map_err(|_| malformed_error("truncated ELF header"))?;
        ElfHeader::new(&self.buf[..size])
    }

    pub(crate) fn prepare_phdrs(
        &mut self,
        ehdr: &ElfHeader,
        object: &mut impl ElfReader,
    ) -> Result<Vec<ElfPhdr>> {
        let (phdr_start, phdr_end) = ehdr.phdr_range();
        let size = phdr_end - phdr_start;
        if size > self.buf.len() {
            self.buf.resize(size, 0);
        }
        object
            .read(&mut self.buf[..size], phdr_start)
            .map_err(|_| malformed_error("program headers lie outside the file"))?;
        let mut phdrs = Vec::with_capacity(ehdr.e_phnum());
        for idx in 0..ehdr.e_phnum() {
            let phdr: Phdr = read_pod(&self.buf[..size], idx * PHDR_SIZE)
                .ok_or_else(|| malformed_error("truncated program header"))?;
            phdrs.push(ElfPhdr::new(phdr));
        }
        Ok(phdrs)
    }
}

/// The module loader.
///
/// `Loader` maps the image, parses its dynamic section and builds the symbol
/// index. Relocation and import binding are separate steps
/// ([`crate::relocate`], [`crate::resolve`]) so the caller controls the order
/// of the bring-up phases.
///
/// # Examples
/// ```no_run
/// use so_loader::{Loader, input::ElfBinary};
///
/// let bytes = std::fs::read("libGTASA.so").unwrap();
/// let module = Loader::new()
///     .with_base(0x9800_0000)
///     .load(ElfBinary::new("libGTASA.so", &bytes))
///     .unwrap();
/// println!("text at 0x{:x}", module.text_base());
/// ```
pub struct Loader<M = DefaultMmap>
where
    M: Mmap,
{
    buf: ElfBuf,
    base: u32,
    patch_area: usize,
    placeholder: bool,
    _marker: PhantomData<M>,
}

impl Default for Loader<DefaultMmap> {
    fn default() -> Self {
        Self::new()
    }
}

impl Loader<DefaultMmap> {
    /// Creates a new `Loader` with default settings.
    pub fn new() -> Self {
        Self {
            buf: ElfBuf::new(),
            base: DEFAULT_BASE,
            patch_area: DEFAULT_PATCH_AREA,
            placeholder: false,
            _marker: PhantomData,
        }
    }
}

impl<M: Mmap> Loader<M> {
    /// Sets the preferred load address.
    ///
    /// The host may place the mapping elsewhere; when that address does not
    /// fit in 32 bits this value becomes the module's view of its base.
    pub fn with_base(mut self, base: u32) -> Self {
        self.base = base;
        self
    }

    /// Sets the size of the patch area reserved after the image.
    pub fn with_patch_area(mut self, len: usize) -> Self {
        self.patch_area = len;
        self
    }

    /// Gives the loaded module [`NativeAddressing::Placeholder`] addressing.
    pub fn with_placeholder_addresses(mut self, placeholder: bool) -> Self {
        self.placeholder = placeholder;
        self
    }

    /// Returns a new loader with a custom `Mmap` implementation.
    pub fn with_mmap<NewMmap: Mmap>(self) -> Loader<NewMmap> {
        Loader {
            buf: self.buf,
            base: self.base,
            patch_area: self.patch_area,
            placeholder: self.placeholder,
            _marker: PhantomData,
        }
    }

    /// Maps the module and indexes its symbols.
    ///
    /// The returned module is neither relocated nor bound.
    pub fn load<'a, I>(&mut self, input: I) -> Result<Module>
    where
        I: IntoElfReader<'a>,
    {
        let mut object = input.into_reader()?;
        let ehdr = self.buf.prepare_ehdr(&mut object)?;
        let phdrs = self.buf.prepare_phdrs(&ehdr, &mut object)?;
        let dynamic_phdr = phdrs
            .iter()
            .find(|phdr| phdr.p_type == PT_DYNAMIC)
            .ok_or_else(|| malformed_error("no PT_DYNAMIC segment"))?;
        let text_offset = phdrs
            .iter()
            .find(|phdr| phdr.p_type == PT_LOAD && phdr.p_flags & PF_X != 0)
            .map(|phdr| phdr.p_vaddr)
            .unwrap_or(0);

        let memory = ProgramSegments::new(&phdrs).load_segments::<M>(
            &mut object,
            self.base,
            self.patch_area,
        )?;

        let image = &memory.as_bytes()[..memory.image_len()];
        if dynamic_phdr.p_vaddr as usize >= image.len() {
            return Err(malformed_error("PT_DYNAMIC lies outside the image"));
        }
        let dynamic = ElfDynamic::new(image, dynamic_phdr.p_vaddr)?;
        let symtab = SymbolTable::new(image, &dynamic)?;
        let symbols = SymbolIndex::build(&symtab)?;
        let strtab = ElfStringTable::new(image, &dynamic)?;
        let soname = dynamic
            .soname_off
            .map(|off| strtab.get_str(off as usize).map(ToString::to_string))
            .transpose()?;
        let needed = dynamic
            .needed_libs
            .iter()
            .map(|&off| strtab.get_str(off as usize).map(ToString::to_string))
            .collect::<Result<Vec<String>>>()?;

        #[cfg(feature = "log")]
        log::debug!(
            "[{}] mapped at 0x{:x}, {} bytes, {} exported symbols, needs {:?}",
            object.shortname(),
            memory.guest_base(),
            memory.len(),
            symbols.len(),
            needed
        );

        let addressing = if self.placeholder {
            NativeAddressing::placeholder()
        } else {
            NativeAddressing::Direct
        };
        Ok(Module::new(
            object.shortname().to_owned(),
            soname,
            needed,
            memory,
            dynamic,
            symbols,
            ehdr.e_entry,
            text_offset,
            addressing,
        ))
    }
}
