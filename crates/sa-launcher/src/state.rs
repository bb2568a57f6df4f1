//! Host variables the module reads and writes directly.
//!
//! Every cell lives in one static [`HostState`] so its address is stable for
//! the whole process; the binding table hands those addresses to the module.
use so_loader::Result;
use so_loader::binding::{BindingProvider, BindingTable};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicUsize, Ordering};

/// Screen size the engine is configured for.
pub const SCREEN_WIDTH: i32 = 960;
pub const SCREEN_HEIGHT: i32 = 544;
/// Size the screen falls back to when the display only offers a low-resolution mode.
pub const DEFAULT_SCREEN_WIDTH: i32 = 960;
pub const DEFAULT_SCREEN_HEIGHT: i32 = 544;

/// Value of the stack protector canary.
pub const STACK_CHK_GUARD: u32 = 0x4242_4242;

/// Bytes reserved per `FILE` of the foreign C library.
const FOREIGN_FILE_SIZE: usize = 0x54;
/// Number of `FILE` slots behind `__sF`.
const STREAM_SLOTS: usize = 0x100 * 3;

/// Raw memory the module owns the layout of.
#[repr(transparent)]
pub struct RawCell<T>(UnsafeCell<T>);

// SAFETY: the host never reads these bytes; the module serializes its own accesses.
unsafe impl<T> Sync for RawCell<T> {}

impl<T> RawCell<T> {
    pub const fn new(value: T) -> Self {
        Self(UnsafeCell::new(value))
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut T {
        self.0.get()
    }

    #[inline]
    pub fn address(&self) -> usize {
        self.as_ptr() as usize
    }
}

/// Every state cell of the process.
pub struct HostState {
    pub enter_game_from_sc: AtomicI32,
    pub signing_out_from_app: AtomicI32,
    pub has_touch_screen: AtomicI32,
    pub stack_chk_guard: AtomicU32,
    /// The foreign `stderr` pointer, set at bring-up.
    pub stderr: AtomicUsize,
    pub screen_width: AtomicI32,
    pub screen_height: AtomicI32,
    /// Field of view the patched camera code reads instead of its own.
    pub fake_fov: AtomicU32,
    /// Set by the free-aim binding until the game clears the mouse target.
    pub free_aim: AtomicBool,
    pub hydraulics_locked: AtomicBool,
    pub streams: RawCell<[u8; FOREIGN_FILE_SIZE * STREAM_SLOTS]>,
    /// Zeroed stand-in for the `JavaVM` handed to the entry point.
    pub java_vm: RawCell<[usize; 8]>,
    /// Zeroed stand-in for the `JNIEnv` of engine threads.
    pub jni_env: RawCell<[usize; 8]>,
}

impl HostState {
    pub const fn new() -> Self {
        Self {
            enter_game_from_sc: AtomicI32::new(0),
            signing_out_from_app: AtomicI32::new(0),
            has_touch_screen: AtomicI32::new(0),
            stack_chk_guard: AtomicU32::new(STACK_CHK_GUARD),
            stderr: AtomicUsize::new(0),
            screen_width: AtomicI32::new(SCREEN_WIDTH),
            screen_height: AtomicI32::new(SCREEN_HEIGHT),
            fake_fov: AtomicU32::new(0),
            free_aim: AtomicBool::new(false),
            hydraulics_locked: AtomicBool::new(false),
            streams: RawCell::new([0; FOREIGN_FILE_SIZE * STREAM_SLOTS]),
            java_vm: RawCell::new([0; 8]),
            jni_env: RawCell::new([0; 8]),
        }
    }

    pub fn screen_size(&self) -> (i32, i32) {
        (
            self.screen_width.load(Ordering::Relaxed),
            self.screen_height.load(Ordering::Relaxed),
        )
    }

    pub fn set_screen_size(&self, width: i32, height: i32) {
        self.screen_width.store(width, Ordering::Relaxed);
        self.screen_height.store(height, Ordering::Relaxed);
    }

    /// Falls back to the default screen size after the display reported a low-resolution mode.
    pub fn degrade_display(&self) {
        log::warn!(
            "display only offers a low-resolution mode, falling back to {}x{}",
            DEFAULT_SCREEN_WIDTH,
            DEFAULT_SCREEN_HEIGHT
        );
        self.set_screen_size(DEFAULT_SCREEN_WIDTH, DEFAULT_SCREEN_HEIGHT);
    }

    pub fn fake_fov(&self) -> f32 {
        f32::from_bits(self.fake_fov.load(Ordering::Relaxed))
    }

    pub fn set_fake_fov(&self, fov: f32) {
        self.fake_fov.store(fov.to_bits(), Ordering::Relaxed);
    }

    /// Flips the hydraulics lock when `pressed` and returns the new state.
    pub fn toggle_hydraulics(&self, pressed: bool) -> bool {
        self.hydraulics_locked.fetch_xor(pressed, Ordering::Relaxed) ^ pressed
    }
}

impl Default for HostState {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide state.
pub static HOST: HostState = HostState::new();

/// Address of an atomic cell, for the binding table.
pub fn cell_address<T>(cell: &T) -> usize {
    cell as *const T as usize
}

/// Exposes the process-wide cells the module addresses by name.
pub struct StateCells;

impl BindingProvider for StateCells {
    fn name(&self) -> &'static str {
        "state"
    }

    fn register(&self, table: &mut BindingTable) -> Result<()> {
        table.state_cell("EnterGameFromSCFunc", cell_address(&HOST.enter_game_from_sc))?;
        table.state_cell("SigningOutfromApp", cell_address(&HOST.signing_out_from_app))?;
        table.state_cell("hasTouchScreen", cell_address(&HOST.has_touch_screen))?;
        table.state_cell("__stack_chk_guard", cell_address(&HOST.stack_chk_guard))
    }
}
