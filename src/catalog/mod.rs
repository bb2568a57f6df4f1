//! Ordered, declarative patch lists.
//!
//! A [`Catalog`] is data: each [`PatchEntry`] names its site, what to do there
//! and why. Entries are applied once, in order, through a [`PatchEngine`]. An
//! entry behind a [`Gate`] is skipped entirely when the gate is closed; it is
//! neither applied nor reverted.
use crate::{
    Result, custom_error,
    patch::{PatchEngine, Site, Target, trampoline::TrampolineSpec},
};
use alloc::{format, vec::Vec};

/// A configuration switch an entry depends on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Gate {
    pub key: &'static str,
    /// The value the switch must have for the entry to apply.
    pub when: bool,
}

impl Gate {
    /// Applies when `key` is enabled.
    pub const fn on(key: &'static str) -> Self {
        Self { key, when: true }
    }

    /// Applies when `key` is disabled.
    pub const fn off(key: &'static str) -> Self {
        Self { key, when: false }
    }
}

/// Resolves gates to configuration values.
pub trait Gates {
    /// The value of `key`, or `None` if the configuration has no such switch.
    fn gate(&self, key: &str) -> Option<bool>;
}

impl<F> Gates for F
where
    F: Fn(&str) -> Option<bool>,
{
    fn gate(&self, key: &str) -> Option<bool> {
        self(key)
    }
}

/// How an entry redirects its site.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HookMode {
    /// Encoding chosen by the site's Thumb bit.
    #[default]
    Auto,
    Thumb,
    Arm,
}

/// What an entry does.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PatchAction {
    /// Full-function replacement or call-site redirection.
    Hook {
        site: Site,
        target: Target,
        mode: HookMode,
    },
    /// Literal instruction substitution or constant flip.
    Bytes { site: Site, bytes: Vec<u8> },
    /// Suppresses `count` Thumb instructions.
    Nop { site: Site, count: usize },
    /// Mid-function behavior override.
    Trampoline(TrampolineSpec),
    /// Stores a value into an exported variable.
    WriteData { symbol: &'static str, bytes: Vec<u8> },
}

impl PatchAction {
    fn apply(&self, engine: &mut PatchEngine<'_>) -> Result<u32> {
        match self {
            PatchAction::Hook { site, target, mode } => match mode {
                HookMode::Auto => engine.hook_address(site, target),
                HookMode::Thumb => engine.hook_thumb(site, target),
                HookMode::Arm => engine.hook_arm(site, target),
            },
            PatchAction::Bytes { site, bytes } => engine.patch_bytes(site, bytes),
            PatchAction::Nop { site, count } => engine.nop_thumb(site, *count),
            PatchAction::Trampoline(spec) => engine.build_trampoline(spec),
            PatchAction::WriteData { symbol, bytes } => engine.write_data(symbol, bytes),
        }
    }
}

/// One catalog entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PatchEntry {
    pub name: &'static str,
    /// Why the entry exists: the bug it fixes or the capability it restores.
    pub rationale: &'static str,
    pub gate: Option<Gate>,
    pub action: PatchAction,
}

impl PatchEntry {
    pub fn new(name: &'static str, rationale: &'static str, action: PatchAction) -> Self {
        Self {
            name,
            rationale,
            gate: None,
            action,
        }
    }

    pub fn gated(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }
}

/// Outcome of [`Catalog::apply`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub applied: usize,
    /// Entries whose gate was closed, in catalog order.
    pub skipped: Vec<&'static str>,
}

/// An ordered list of patch entries.
#[derive(Debug, Default, Clone)]
pub struct Catalog {
    entries: Vec<PatchEntry>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: PatchEntry) -> &mut Self {
        self.entries.push(entry);
        self
    }

    /// Adds every entry of `other` after the current ones.
    pub fn extend(&mut self, other: Catalog) -> &mut Self {
        self.entries.extend(other.entries);
        self
    }

    pub fn entries(&self) -> &[PatchEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Applies the entries in order.
    ///
    /// Every gate is resolved before the first entry is applied, so an unknown
    /// switch fails the call without touching the module. The first failing
    /// entry aborts the rest; its error is returned unchanged.
    pub fn apply(&self, engine: &mut PatchEngine<'_>, gates: &dyn Gates) -> Result<ApplyReport> {
        let enabled = self
            .entries
            .iter()
            .map(|entry| match entry.gate {
                None => Ok(true),
                Some(gate) => gates
                    .gate(gate.key)
                    .map(|value| value == gate.when)
                    .ok_or_else(|| {
                        custom_error(format!("{}: unknown configuration switch {}", entry.name, gate.key))
                    }),
            })
            .collect::<Result<Vec<bool>>>()?;

        let mut report = ApplyReport::default();
        for (entry, enabled) in self.entries.iter().zip(enabled) {
            if !enabled {
                #[cfg(feature = "log")]
                log::debug!("[Catalog] {} skipped", entry.name);
                report.skipped.push(entry.name);
                continue;
            }
            match entry.action.apply(engine) {
                Ok(_addr) => {
                    #[cfg(feature = "log")]
                    log::trace!("[Catalog] {} at 0x{:x}: {}", entry.name, _addr, entry.rationale);
                    report.applied += 1;
                }
                Err(err) => {
                    #[cfg(feature = "log")]
                    log::error!("[Catalog] {} failed: {}", entry.name, err);
                    return Err(err);
                }
            }
        }
        #[cfg(feature = "log")]
        log::debug!(
            "[Catalog] {} entries applied, {} skipped",
            report.applied,
            report.skipped.len()
        );
        Ok(report)
    }
}
