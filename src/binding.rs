//! The binding table: everything the module may import, by exact name.
//!
//! Each subsystem contributes its entries through a [`BindingProvider`]; the
//! providers are composed into one [`BindingTable`] before the resolver runs.
use crate::{Error, Result, binding_error};
use alloc::{boxed::Box, format, vec::Vec};
use core::hash::{Hash, Hasher};
use foldhash::{SharedSeed, fast::FoldHasher};
use hashbrown::HashTable;

const HASHER: FoldHasher<'static> = FoldHasher::with_seed(0, SharedSeed::global_fixed());

/// Which trivial stub neutralizes an import.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StubKind {
    /// Returns 0.
    Ret0,
    /// Returns 1.
    Ret1,
}

/// What a binding points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingKind {
    /// A host function with the same contract as the imported one.
    Native,
    /// A host function adapting the calling convention or semantics.
    Shim,
    /// A host variable the module reads and writes directly.
    StateCell,
    /// An import that is safe to neutralize.
    Stub(StubKind),
}

/// One entry of the binding table.
#[derive(Clone, Debug)]
pub struct Binding {
    /// The exact import name.
    pub name: Box<str>,
    /// Host address of the function or state cell.
    pub address: usize,
    pub kind: BindingKind,
}

/// Host addresses of the trivial stub functions.
#[derive(Clone, Copy, Debug)]
pub struct StubSet {
    pub ret0: usize,
    pub ret1: usize,
}

impl StubSet {
    pub const fn new(ret0: usize, ret1: usize) -> Self {
        Self { ret0, ret1 }
    }

    /// The stub implementing `kind`.
    #[inline]
    pub fn address(&self, kind: StubKind) -> usize {
        match kind {
            StubKind::Ret0 => self.ret0,
            StubKind::Ret1 => self.ret1,
        }
    }
}

/// Imports that may be bound to a trivial stub, with the stub each one gets.
///
/// Everything else must be bound to a real implementation. The list is not
/// derived from anything: moving a load-bearing import here would make the
/// module silently misbehave instead of failing to load.
pub const SAFE_TO_STUB: &[(&str, StubKind)] = &[
    ("AAssetManager_fromJava", StubKind::Ret0),
    ("AAssetManager_open", StubKind::Ret0),
    ("AAsset_close", StubKind::Ret0),
    ("AAsset_getLength", StubKind::Ret0),
    ("AAsset_getRemainingLength", StubKind::Ret0),
    ("AAsset_read", StubKind::Ret0),
    ("AAsset_seek", StubKind::Ret0),
    ("_Z13SetJNEEnvFuncPFPvvE", StubKind::Ret0),
    ("IsProfileStatsBusy", StubKind::Ret1),
    ("_Z15EnterSocialCLubv", StubKind::Ret0),
    ("_Z12IsSCSignedInv", StubKind::Ret0),
    ("pthread_attr_destroy", StubKind::Ret0),
    ("pthread_cond_init", StubKind::Ret0),
    ("pthread_getspecific", StubKind::Ret0),
    ("pthread_key_create", StubKind::Ret0),
    ("pthread_mutexattr_init", StubKind::Ret0),
    ("pthread_mutexattr_settype", StubKind::Ret0),
    ("pthread_mutexattr_destroy", StubKind::Ret0),
    ("pthread_setspecific", StubKind::Ret0),
    ("sigaction", StubKind::Ret0),
    ("sigemptyset", StubKind::Ret0),
    ("eglGetDisplay", StubKind::Ret0),
    ("eglGetProcAddress", StubKind::Ret0),
    ("eglQueryString", StubKind::Ret0),
    ("glBindRenderbuffer", StubKind::Ret0),
    ("glDeleteRenderbuffers", StubKind::Ret0),
    ("glFramebufferRenderbuffer", StubKind::Ret0),
    ("glGenRenderbuffers", StubKind::Ret0),
    ("glRenderbufferStorage", StubKind::Ret0),
];

/// The stub `name` is allowed to be bound to, if any.
pub fn safe_stub_kind(name: &str) -> Option<StubKind> {
    SAFE_TO_STUB
        .iter()
        .find(|(stub, _)| *stub == name)
        .map(|&(_, kind)| kind)
}

/// A subsystem that contributes bindings.
///
/// # Examples
/// ```rust
/// use so_loader::{Result, binding::{BindingProvider, BindingTable}};
///
/// struct Math;
///
/// impl BindingProvider for Math {
///     fn name(&self) -> &'static str {
///         "math"
///     }
///
///     fn register(&self, table: &mut BindingTable) -> Result<()> {
///         table.native("sinf", 0x2001)?;
///         table.native("cosf", 0x2011)
///     }
/// }
/// ```
pub trait BindingProvider {
    /// Name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Adds this subsystem's entries to `table`.
    fn register(&self, table: &mut BindingTable) -> Result<()>;
}

/// Ordered name to address table consulted by [`crate::resolve`].
pub struct BindingTable {
    stubs: StubSet,
    entries: Vec<Binding>,
    index: HashTable<usize>,
}

impl BindingTable {
    pub fn new(stubs: StubSet) -> Self {
        Self {
            stubs,
            entries: Vec::new(),
            index: HashTable::new(),
        }
    }

    fn hash(name: &str) -> u64 {
        let mut hasher = HASHER.clone();
        name.as_bytes().hash(&mut hasher);
        hasher.finish()
    }

    /// Adds `binding`, rejecting a name that is already present.
    pub fn insert(&mut self, binding: Binding) -> Result<()> {
        let hash = Self::hash(&binding.name);
        let entries = &self.entries;
        if self
            .index
            .find(hash, |&idx| entries[idx].name == binding.name)
            .is_some()
        {
            return Err(Error::DuplicateBinding {
                name: binding.name.into_string().into(),
            });
        }
        let idx = self.entries.len();
        let entries = &self.entries;
        self.index
            .insert_unique(hash, idx, |&idx| Self::hash(&entries[idx].name));
        self.entries.push(binding);
        Ok(())
    }

    fn add(&mut self, name: &str, address: usize, kind: BindingKind) -> Result<()> {
        self.insert(Binding {
            name: name.into(),
            address,
            kind,
        })
    }

    /// Binds `name` to a host function with the same contract.
    pub fn native(&mut self, name: &str, address: usize) -> Result<()> {
        self.add(name, address, BindingKind::Native)
    }

    /// Binds `name` to an adapter function.
    pub fn shim(&mut self, name: &str, address: usize) -> Result<()> {
        self.add(name, address, BindingKind::Shim)
    }

    /// Binds `name` to a host variable.
    pub fn state_cell(&mut self, name: &str, address: usize) -> Result<()> {
        self.add(name, address, BindingKind::StateCell)
    }

    /// Binds `name` to a trivial stub.
    ///
    /// Only names listed in [`SAFE_TO_STUB`] are accepted, and only with the
    /// stub listed there.
    pub fn stub(&mut self, name: &str, kind: StubKind) -> Result<()> {
        match safe_stub_kind(name) {
            Some(expected) if expected == kind => {
                self.add(name, self.stubs.address(kind), BindingKind::Stub(kind))
            }
            Some(expected) => Err(binding_error(format!(
                "{name} must be stubbed with {expected:?}, not {kind:?}"
            ))),
            None => Err(binding_error(format!("{name} is not safe to stub"))),
        }
    }

    /// Stubs every entry of [`SAFE_TO_STUB`].
    pub fn stub_all_safe(&mut self) -> Result<()> {
        for &(name, kind) in SAFE_TO_STUB {
            self.stub(name, kind)?;
        }
        Ok(())
    }

    /// Lets `provider` register its entries.
    ///
    /// A failing provider is named in the error.
    pub fn register(&mut self, provider: &dyn BindingProvider) -> Result<()> {
        #[cfg(feature = "log")]
        let before = self.entries.len();
        provider.register(self).map_err(|err| match err {
            Error::DuplicateBinding { .. } => err,
            err => binding_error(format!("{}: {err}", provider.name())),
        })?;
        #[cfg(feature = "log")]
        log::debug!(
            "[Bindings] {} registered {} entries",
            provider.name(),
            self.entries.len() - before
        );
        Ok(())
    }

    /// Exact-name lookup.
    pub fn get(&self, name: &str) -> Option<&Binding> {
        let entries = &self.entries;
        self.index
            .find(Self::hash(name), |&idx| &*entries[idx].name == name)
            .map(|&idx| &entries[idx])
    }

    /// The stub addresses this table was built with.
    #[inline]
    pub fn stubs(&self) -> &StubSet {
        &self.stubs
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Binding> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
