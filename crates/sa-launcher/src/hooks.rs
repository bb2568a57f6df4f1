//! Host functions the game catalog sends module code to.
//!
//! The module uses the soft-float calling convention, so every `float`
//! crossing the boundary travels as raw bits in a core register. Handlers that
//! call back into the module do so through the addresses captured in
//! [`LINKS`] after loading; on hosts that cannot execute the module those
//! addresses are never called.
use crate::offsets::FREE_AIM_SETTING;
use crate::swim::{self, Pitch, SwimState, Vec3};
use crate::{config::Config, state::HOST};
use anyhow::{Context, Result};
use so_loader::Module;
use std::ffi::c_void;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};

/// `CEntity::m_nModelIndex`.
const MODEL_INDEX: usize = 0x26;
/// `CPlane` nozzle angle and its previous value.
const NOZZLE_ANGLE: usize = 0x880;
const PREV_NOZZLE_ANGLE: usize = 0x882;
/// `CPlane` rudder position.
const RUDDER: usize = 0x99C;
/// `CRenderQueue` flag that makes it take its mutex.
const RENDER_QUEUE_LOCKED: usize = 601;

const HYDRA: u16 = 520;
const VORTEX: u16 = 539;
/// Nozzle angle at which the Hydra flies like a helicopter.
const HOVER_NOZZLE_ANGLE: i16 = 3000;
const NOZZLE_ROTATE_LIMIT: i16 = 5000;
const NOZZLE_ROTATE_RATE: f32 = 25.0;

/// `CVehicle` driver.
const VEHICLE_DRIVER: usize = 0x464;
/// `CVehicle` flag byte; bit 1 says hydraulics are installed.
const VEHICLE_UPGRADES: usize = 0x392;
const HYDRAULICS_INSTALLED: u8 = 1 << 1;
/// `CPhysical` mass and turn mass.
const MASS: usize = 0x90;
const TURN_MASS: usize = 0xA8;
/// Axis and point the boost jump turns the car about.
const BOOST_TURN_AXIS: usize = 0x20;
const BOOST_TURN_POINT: usize = 0x24;
/// `CAutomobile` compression of the first wheel; 1.0 means airborne.
const WHEEL_COMPRESSION: usize = 0x7E8;
/// `CPad` flag set while the player has no control.
const PAD_CONTROLS_DISABLED: usize = 0x110;
/// `CPlayerPed` target of the third-person mouse aim.
const PED_MOUSE_TARGET: usize = 0x7A4;

/// `CEntity` matrix pointer and `RpClump` pointer.
const ENTITY_MATRIX: usize = 0x14;
const ENTITY_CLUMP: usize = 0x18;
/// `CMatrix` right, forward and position vectors.
const MATRIX_RIGHT: usize = 0x0;
const MATRIX_FORWARD: usize = 0x10;
const MATRIX_POS: usize = 0x30;
/// `CPhysical` move speed.
const MOVE_SPEED: usize = 0x48;
/// `CPed` animation-driven speeds along the matrix axes.
const PED_RIGHT_SPEED: usize = 0x4E4;
const PED_FORWARD_SPEED: usize = 0x4E8;
const PED_MASS: usize = 0x8C;
/// `CTaskSimpleSwim` state, pitch angle and pitch speed.
const SWIM_STATE: usize = 0xA;
const SWIM_PITCH: usize = 0x24;
const SWIM_PITCH_SPEED: usize = 0x34;
/// `CAnimBlendAssociation` fields, and the length inside its hierarchy.
const ANIM_HIERARCHY: usize = 0x14;
const ANIM_BLEND: usize = 0x18;
const ANIM_BLEND_DELTA: usize = 0x1C;
const ANIM_TIME: usize = 0x20;
const HIERARCHY_LENGTH: usize = 0x10;

const ANIM_SWIM_BREAST: u32 = 311;
const ANIM_SWIM_CRAWL: u32 = 312;
const ANIM_SWIM_DIVE_UNDER: u32 = 313;
const ANIM_SWIM_JUMPOUT: u32 = 316;
const ANIM_CLIMB_JUMP: u32 = 128;

/// `HIDMapping` entries of the extra bindings the controller layer reports.
pub const MAPPING_ENTER_FREE_AIM: i32 = 0x68;
pub const MAPPING_TAXI_BOOST_JUMP: i32 = 0x69;
pub const MAPPING_LOCK_HYDRAULICS: i32 = 0x6A;

/// `OSFileDataArea` of the save files.
const FILE_AREA_USER: i32 = 1;
const SAVE_SLOTS: i32 = 10;
/// `eSaveTypes` of the save taken when leaving the game.
const SAVE_FOR_EXIT: i32 = 3;

/// Functions and variables of the module the handlers use.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Link {
    GetPad,
    GetCarGunUpDown,
    GetSteeringLeftRight,
    GetTurretLeft,
    GetTurretRight,
    TimeStep,
    Fov,
    AspectRatio,
    SkinMap,
    SkinDirty,
    SkinNum,
    ProjectionMatrix,
    ViewMatrix,
    ObjectMatrix,
    ShiftTargetRightJustDown,
    FindNextWeaponLockOnTarget,
    IsJustPressed,
    IsPlayer,
    ApplyMoveForce,
    ApplyTurnForce,
    ClearWeaponTarget,
    CleanUpOldReference,
    FreeAimSetting,
    CheckSlotDataValid,
    GenerateGameFilename,
    FileGetDate,
    PcSaveHelper,
    LastSaveForResume,
    SaveGameForPause,
    GetAnimAssociation,
    GetWaterLevel,
}

const LINK_COUNT: usize = 31;

/// Where a [`Link`] is found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkSite {
    Symbol(&'static str),
    /// An unexported location, as an offset from the text base.
    Text(u32),
}

impl Link {
    pub const ALL: [Link; LINK_COUNT] = [
        Link::GetPad,
        Link::GetCarGunUpDown,
        Link::GetSteeringLeftRight,
        Link::GetTurretLeft,
        Link::GetTurretRight,
        Link::TimeStep,
        Link::Fov,
        Link::AspectRatio,
        Link::SkinMap,
        Link::SkinDirty,
        Link::SkinNum,
        Link::ProjectionMatrix,
        Link::ViewMatrix,
        Link::ObjectMatrix,
        Link::ShiftTargetRightJustDown,
        Link::FindNextWeaponLockOnTarget,
        Link::IsJustPressed,
        Link::IsPlayer,
        Link::ApplyMoveForce,
        Link::ApplyTurnForce,
        Link::ClearWeaponTarget,
        Link::CleanUpOldReference,
        Link::FreeAimSetting,
        Link::CheckSlotDataValid,
        Link::GenerateGameFilename,
        Link::FileGetDate,
        Link::PcSaveHelper,
        Link::LastSaveForResume,
        Link::SaveGameForPause,
        Link::GetAnimAssociation,
        Link::GetWaterLevel,
    ];

    pub const fn site(self) -> LinkSite {
        let symbol = match self {
            Link::FreeAimSetting => return LinkSite::Text(FREE_AIM_SETTING),
            Link::GetPad => "_ZN4CPad6GetPadEi",
            Link::GetCarGunUpDown => "_ZN4CPad15GetCarGunUpDownEbP11CAutomobilefb",
            Link::GetSteeringLeftRight => "_ZN4CPad20GetSteeringLeftRightEv",
            Link::GetTurretLeft => "_ZN4CPad13GetTurretLeftEv",
            Link::GetTurretRight => "_ZN4CPad14GetTurretRightEv",
            Link::TimeStep => "_ZN6CTimer12ms_fTimeStepE",
            Link::Fov => "_ZN5CDraw7ms_fFOVE",
            Link::AspectRatio => "_ZN5CDraw15ms_fAspectRatioE",
            Link::SkinMap => "skin_map",
            Link::SkinDirty => "skin_dirty",
            Link::SkinNum => "skin_num",
            Link::ProjectionMatrix => "_Z26GetCurrentProjectionMatrixv",
            Link::ViewMatrix => "_Z20GetCurrentViewMatrixv",
            Link::ObjectMatrix => "_Z22GetCurrentObjectMatrixv",
            Link::ShiftTargetRightJustDown => "_ZN4CPad24ShiftTargetRightJustDownEv",
            Link::FindNextWeaponLockOnTarget => "_ZN10CPlayerPed26FindNextWeaponLockOnTargetEP7CEntityb",
            Link::IsJustPressed => "_ZN4CHID13IsJustPressedE10HIDMapping",
            Link::IsPlayer => "_ZNK4CPed8IsPlayerEv",
            Link::ApplyMoveForce => "_ZN9CPhysical14ApplyMoveForceE7CVector",
            Link::ApplyTurnForce => "_ZN9CPhysical14ApplyTurnForceE7CVectorS0_",
            Link::ClearWeaponTarget => "_ZN10CPlayerPed17ClearWeaponTargetEv",
            Link::CleanUpOldReference => "_ZN7CEntity19CleanUpOldReferenceEPPS_",
            Link::CheckSlotDataValid => "_ZN19CGenericGameStorage18CheckSlotDataValidEib",
            Link::GenerateGameFilename => "_ZN8C_PcSave20GenerateGameFilenameEiPc",
            Link::FileGetDate => "_Z14OS_FileGetDate14OSFileDataAreaPKc",
            Link::PcSaveHelper => "PcSaveHelper",
            Link::LastSaveForResume => "lastSaveForResume",
            Link::SaveGameForPause => "_Z16SaveGameForPause10eSaveTypesPc",
            Link::GetAnimAssociation => "_Z30RpAnimBlendClumpGetAssociationP7RpClumpj",
            Link::GetWaterLevel => "_ZN11CWaterLevel13GetWaterLevelEfffPfbP7CVector",
        };
        LinkSite::Symbol(symbol)
    }

    /// The switch whose entries use this link. `None` means always used.
    pub const fn gate(self) -> Option<&'static str> {
        match self {
            Link::GetPad
            | Link::GetCarGunUpDown
            | Link::GetSteeringLeftRight
            | Link::GetTurretLeft
            | Link::GetTurretRight => Some("fix_heli_plane_camera"),
            Link::SkinMap | Link::SkinDirty | Link::SkinNum => Some("enable_bones_optimization"),
            Link::ProjectionMatrix | Link::ViewMatrix | Link::ObjectMatrix => {
                Some("enable_mvp_optimization")
            }
            Link::ApplyTurnForce => Some("boost_jump_binding"),
            Link::ClearWeaponTarget | Link::CleanUpOldReference | Link::FreeAimSetting => {
                Some("free_aim_binding")
            }
            Link::CheckSlotDataValid
            | Link::GenerateGameFilename
            | Link::FileGetDate
            | Link::PcSaveHelper
            | Link::LastSaveForResume => Some("resume_latest_save"),
            Link::SaveGameForPause => Some("save_on_exit"),
            Link::GetAnimAssociation | Link::GetWaterLevel => Some("fix_swimming"),
            Link::TimeStep
            | Link::Fov
            | Link::AspectRatio
            | Link::ShiftTargetRightJustDown
            | Link::FindNextWeaponLockOnTarget
            | Link::IsJustPressed
            | Link::IsPlayer
            | Link::ApplyMoveForce => None,
        }
    }
}

/// Module addresses captured after loading, by [`Link`].
pub struct GameLinks {
    addrs: [AtomicU32; LINK_COUNT],
}

impl GameLinks {
    pub const fn new() -> Self {
        Self {
            addrs: [const { AtomicU32::new(0) }; LINK_COUNT],
        }
    }

    /// Looks up every link the enabled entries need. Returns how many were captured.
    pub fn capture(&self, module: &Module, config: &Config) -> Result<usize> {
        let mut captured = 0;
        for link in Link::ALL {
            if let Some(key) = link.gate()
                && config.switch(key) == Some(false)
            {
                continue;
            }
            let addr = match link.site() {
                LinkSite::Symbol(name) => module
                    .symbol_address(name)
                    .with_context(|| format!("the module does not export {name}"))?,
                LinkSite::Text(offset) => module.text_base().wrapping_add(offset),
            };
            self.addrs[link as usize].store(addr, Ordering::Relaxed);
            captured += 1;
        }
        log::debug!("captured {captured} module links");
        Ok(captured)
    }

    #[inline]
    pub fn get(&self, link: Link) -> u32 {
        self.addrs[link as usize].load(Ordering::Relaxed)
    }

    /// Whether `link` was captured, i.e. its switch is on.
    #[inline]
    pub fn is_captured(&self, link: Link) -> bool {
        self.get(link) != 0
    }

    fn ptr<T>(&self, link: Link) -> *mut T {
        self.get(link) as usize as *mut T
    }

    /// The captured function as a host function pointer.
    ///
    /// # Safety
    /// `F` must be an `extern "C" fn` type matching the function behind `link`.
    unsafe fn func<F: Copy>(&self, link: Link) -> F {
        debug_assert_eq!(size_of::<F>(), size_of::<usize>());
        let addr = self.get(link) as usize;
        unsafe { core::mem::transmute_copy(&addr) }
    }
}

impl Default for GameLinks {
    fn default() -> Self {
        Self::new()
    }
}

pub static LINKS: GameLinks = GameLinks::new();

type GetPadFn = extern "C" fn(i32) -> *mut c_void;
type PadQueryFn = extern "C" fn(*mut c_void) -> i32;
type GetCarGunUpDownFn = extern "C" fn(*mut c_void, i32, *mut c_void, u32, i32) -> i32;
type MatrixFn = extern "C" fn() -> *mut u8;
type LockOnFn = extern "C" fn(*mut c_void, *mut c_void, i32) -> i32;
type IsJustPressedFn = extern "C" fn(i32) -> i32;
type IsPlayerFn = extern "C" fn(*mut c_void) -> u8;
/// `CVector` arguments travel as three words.
type ApplyMoveForceFn = extern "C" fn(*mut c_void, u32, u32, u32);
type ApplyTurnForceFn = extern "C" fn(*mut c_void, u32, u32, u32, u32, u32, u32);
type EntityFn = extern "C" fn(*mut c_void);
type CleanUpOldReferenceFn = extern "C" fn(*mut c_void, *mut *mut c_void);
type CheckSlotDataValidFn = extern "C" fn(i32, i32) -> i32;
type GenerateGameFilenameFn = extern "C" fn(*mut c_void, i32, *mut u8);
type FileGetDateFn = extern "C" fn(i32, *const u8) -> u64;
type SaveGameForPauseFn = extern "C" fn(i32, *mut u8) -> i32;
type GetAnimAssociationFn = extern "C" fn(*mut c_void, u32) -> *mut u8;
type GetWaterLevelFn = extern "C" fn(u32, u32, u32, *mut f32, u8, *mut c_void) -> u8;

unsafe fn time_step() -> f32 {
    unsafe { *LINKS.ptr::<f32>(Link::TimeStep) }
}

unsafe fn pad(index: i32) -> *mut c_void {
    unsafe { LINKS.func::<GetPadFn>(Link::GetPad)(index) }
}

unsafe fn just_pressed(mapping: i32) -> bool {
    unsafe { LINKS.func::<IsJustPressedFn>(Link::IsJustPressed)(mapping) != 0 }
}

unsafe fn is_player(ped: *mut c_void) -> bool {
    unsafe { LINKS.func::<IsPlayerFn>(Link::IsPlayer)(ped) != 0 }
}

unsafe fn apply_move_force(physical: *mut u8, force: Vec3) {
    unsafe {
        LINKS.func::<ApplyMoveForceFn>(Link::ApplyMoveForce)(
            physical.cast(),
            force.x.to_bits(),
            force.y.to_bits(),
            force.z.to_bits(),
        )
    }
}

/// Reads a field of a module object.
unsafe fn field<T>(base: *const u8, offset: usize) -> T {
    unsafe { base.add(offset).cast::<T>().read_unaligned() }
}

unsafe fn set_field<T>(base: *mut u8, offset: usize, value: T) {
    unsafe { base.add(offset).cast::<T>().write_unaligned(value) }
}

/// Camera arrangement for a vehicle: 2 for a hovering Hydra, 0 for the
/// Vortex, 3 otherwise.
pub fn camera_arrangement(model: u16, nozzle_angle: i16) -> i32 {
    match model {
        HYDRA if nozzle_angle >= HOVER_NOZZLE_ANGLE => 2,
        VORTEX => 0,
        _ => 3,
    }
}

/// Picks the follow-car camera arrangement of `vehicle`; the result lands in r9.
///
/// # Safety
/// `vehicle` must point at a `CVehicle`.
pub unsafe extern "C" fn cam_set_arr_pos(vehicle: *const u8) -> i32 {
    unsafe {
        let model = vehicle.add(MODEL_INDEX).cast::<u16>().read_unaligned();
        let angle = vehicle.add(NOZZLE_ANGLE).cast::<i16>().read_unaligned();
        camera_arrangement(model, angle)
    }
}

/// Right stick camera movement; the Hydra keeps the vertical axis for its nozzles.
///
/// The result packs x in the low word and y in the high word.
///
/// # Safety
/// `vehicle` must point at a `CVehicle`.
pub unsafe extern "C" fn cam_y_movement(vehicle: *const u8, x: u32, y: u32) -> u64 {
    let model = unsafe { vehicle.add(MODEL_INDEX).cast::<u16>().read_unaligned() };
    let y = if model == HYDRA { 0 } else { y };
    u64::from(x) | u64::from(y) << 32
}

/// New rudder position, easing towards `target` by `time_step`.
pub fn ease_rudder(current: f32, target: f32, time_step: f32) -> f32 {
    current + (target - current) * 0.2 * time_step
}

/// Rudder input of a plane: analog steering on the Vortex, turret buttons otherwise.
///
/// # Safety
/// `plane` must point at a `CPlane` and the heli-plane links must be captured.
pub unsafe extern "C" fn plane_rudder(plane: *mut u8, pad_index: i32) -> u32 {
    unsafe {
        let rudder = plane.add(RUDDER).cast::<f32>();
        let model = plane.add(MODEL_INDEX).cast::<u16>().read_unaligned();
        let pad = pad(pad_index);
        let target = if model == VORTEX {
            LINKS.func::<PadQueryFn>(Link::GetSteeringLeftRight)(pad) as f32 / 128.0
        } else if LINKS.func::<PadQueryFn>(Link::GetTurretLeft)(pad) != 0 {
            -1.0
        } else if LINKS.func::<PadQueryFn>(Link::GetTurretRight)(pad) != 0 {
            1.0
        } else {
            0.0
        };
        let value = ease_rudder(rudder.read_unaligned(), target, time_step());
        rudder.write_unaligned(value);
        value.to_bits()
    }
}

/// Nozzle angle after one step of right stick input.
pub fn rotate_nozzle(angle: i16, stick: f32, time_step: f32) -> i16 {
    if stick.abs() <= 10.0 {
        return angle;
    }
    let delta = (stick / 128.0 * NOZZLE_ROTATE_RATE * time_step) as i16;
    angle.wrapping_add(delta).clamp(0, NOZZLE_ROTATE_LIMIT)
}

/// Hydra nozzle control on the right stick.
///
/// # Safety
/// `plane` must point at a `CPlane` and the heli-plane links must be captured.
pub unsafe extern "C" fn plane_harrier(plane: *mut u8, pad_index: i32) {
    unsafe {
        if plane.add(MODEL_INDEX).cast::<u16>().read_unaligned() != HYDRA {
            return;
        }
        let stick = LINKS.func::<GetCarGunUpDownFn>(Link::GetCarGunUpDown)(
            pad(pad_index),
            0,
            core::ptr::null_mut(),
            2500.0f32.to_bits(),
            0,
        ) as f32;
        if stick.abs() <= 10.0 {
            return;
        }
        let angle = plane.add(NOZZLE_ANGLE).cast::<i16>();
        let current = angle.read_unaligned();
        plane.add(PREV_NOZZLE_ANGLE).cast::<i16>().write_unaligned(current);
        angle.write_unaligned(rotate_nozzle(current, stick, time_step()));
    }
}

/// Bone vectors per skinned draw.
///
/// # Safety
/// The bones links must be captured.
pub unsafe extern "C" fn skin_get_vector_count() -> i32 {
    unsafe { 4 * *LINKS.ptr::<i32>(Link::SkinNum) }
}

/// Copies a skin's bone matrices straight into the shared skin map.
///
/// # Safety
/// `skin` must point at a skin whose bone count is at offset 4, `matrix` at that many matrices.
pub unsafe extern "C" fn skin_set_matrices(skin: *const u8, matrix: *const f32) {
    unsafe {
        let num = skin.add(4).cast::<i32>().read_unaligned();
        let count = usize::try_from(num).unwrap_or_default() * 16;
        core::ptr::copy_nonoverlapping(matrix, LINKS.ptr::<f32>(Link::SkinMap), count);
        *LINKS.ptr::<i32>(Link::SkinDirty) = 1;
        *LINKS.ptr::<i32>(Link::SkinNum) = num;
    }
}

const MATRIX_PROJ: i32 = 0;
const MATRIX_VIEW: i32 = 1;
const MATRIX_OBJ: i32 = 2;
const MATRIX_TEX: i32 = 3;
/// Byte after the 16 floats of a current matrix: set when it changed.
const MATRIX_DIRTY: usize = 64;
const UNIFORM_STRIDE: usize = 0x4C;
const UNIFORM_DATA: usize = 0x2AC;
const UNIFORM_DIRTY: [usize; 2] = [0x2A8, 0x2EC];

/// Column-major 4x4 product `a * b`.
pub fn matmul4(a: &[f32; 16], b: &[f32; 16]) -> [f32; 16] {
    let mut out = [0.0; 16];
    for col in 0..4 {
        for row in 0..4 {
            out[col * 4 + row] = (0..4).map(|k| a[k * 4 + row] * b[col * 4 + k]).sum();
        }
    }
    out
}

unsafe fn upload_matrix(shader: *mut u8, id: i32, matrix: &[f32; 16]) {
    unsafe {
        let uniform = shader.add(UNIFORM_STRIDE * id as usize);
        let data = uniform.add(UNIFORM_DATA).cast::<[f32; 16]>();
        if data.read_unaligned() != *matrix {
            data.write_unaligned(*matrix);
            for flag in UNIFORM_DIRTY {
                *uniform.add(flag) = 1;
            }
        }
    }
}

/// Uploads one precomputed model-view-projection matrix instead of three.
///
/// # Safety
/// `shader` must point at an `ES2Shader`, `matrix` at 16 floats, and the MVP
/// links must be captured.
pub unsafe extern "C" fn set_matrix_constant(shader: *mut u8, id: i32, matrix: *const f32) {
    unsafe {
        if id == MATRIX_TEX {
            upload_matrix(shader, id, &matrix.cast::<[f32; 16]>().read_unaligned());
            return;
        }
        let proj = LINKS.func::<MatrixFn>(Link::ProjectionMatrix)();
        let view = LINKS.func::<MatrixFn>(Link::ViewMatrix)();
        let obj = LINKS.func::<MatrixFn>(Link::ObjectMatrix)();
        let dirty = |m: *mut u8| *m.add(MATRIX_DIRTY) != 0;
        let read = |m: *mut u8| m.cast::<[f32; 16]>().read_unaligned();

        let forced = (id == MATRIX_PROJ && !dirty(proj))
            || (id == MATRIX_VIEW && !dirty(view))
            || (id == MATRIX_OBJ && !dirty(obj));
        if forced || dirty(proj) || dirty(view) || dirty(obj) {
            let mvp = matmul4(&read(proj), &matmul4(&read(view), &read(obj)));
            upload_matrix(shader, MATRIX_PROJ, &mvp);
        }
        if forced || dirty(view) {
            upload_matrix(shader, MATRIX_VIEW, &read(view));
        }
        if forced || dirty(obj) {
            upload_matrix(shader, MATRIX_OBJ, &read(obj));
        }
        for m in [proj, view, obj] {
            *m.add(MATRIX_DIRTY) = 0;
        }
    }
}

/// Field of view widened for the aspect ratio, and the one the camera code
/// should use for the inverted ratio.
pub fn widened_fov(aspect: f32, fov: f32) -> (f32, f32) {
    let widen = |ratio: f32| (ratio - 1.3333) * 11.0 / 0.88888 + fov;
    (widen(aspect), widen(1.0 / aspect))
}

/// `CDraw::SetFOV`: stores the widened FOV and remembers the camera's one.
///
/// # Safety
/// The FOV links must be captured.
pub unsafe extern "C" fn set_fov(fov: u32, _interior: i32) -> u32 {
    unsafe {
        let aspect = *LINKS.ptr::<f32>(Link::AspectRatio);
        let (draw, camera) = widened_fov(aspect, f32::from_bits(fov));
        *LINKS.ptr::<f32>(Link::Fov) = draw;
        HOST.set_fake_fov(camera);
        camera.to_bits()
    }
}

/// Lock-on target switching on the player's weapon, and the free-aim binding.
///
/// # Safety
/// `pad` and `ped` must be the ones at the hooked site.
pub unsafe extern "C" fn process_player_weapon(pad: *mut c_void, prev_target: *mut c_void, ped: *mut c_void) {
    unsafe {
        if LINKS.func::<PadQueryFn>(Link::ShiftTargetRightJustDown)(pad) != 0 {
            LINKS.func::<LockOnFn>(Link::FindNextWeaponLockOnTarget)(ped, prev_target, 0);
        } else if LINKS.is_captured(Link::ClearWeaponTarget)
            && just_pressed(MAPPING_ENTER_FREE_AIM)
        {
            HOST.free_aim.store(true, Ordering::Relaxed);
            LINKS.func::<EntityFn>(Link::ClearWeaponTarget)(ped);
        }
    }
}

/// `CPlayerPed::Clear3rdPersonMouseTarget`: also leaves free aim.
///
/// # Safety
/// `ped` must point at a `CPlayerPed` and the free-aim links must be captured.
pub unsafe extern "C" fn clear_3rd_person_mouse_target(ped: *mut u8) {
    HOST.free_aim.store(false, Ordering::Relaxed);
    unsafe {
        let slot = ped.add(PED_MOUSE_TARGET).cast::<*mut c_void>();
        let target = slot.read_unaligned();
        if !target.is_null() {
            LINKS.func::<CleanUpOldReferenceFn>(Link::CleanUpOldReference)(target, slot);
        }
    }
}

/// `MobileSettings::IsFreeAimMode`: on while the binding holds free aim,
/// otherwise whatever the settings say.
///
/// # Safety
/// The free-aim links must be captured.
pub unsafe extern "C" fn is_free_aim_mode(_settings: *mut c_void) -> i32 {
    if HOST.free_aim.load(Ordering::Relaxed) {
        return 1;
    }
    unsafe { *LINKS.ptr::<i32>(Link::FreeAimSetting) }
}

/// Lift and turning force of the boost jump for a car of `mass` and `turn_mass`.
pub fn boost_jump(mass: f32, turn_mass: f32, axis: Vec3) -> (Vec3, Vec3) {
    (Vec3::new(0.0, 0.0, mass * 0.15), axis * (turn_mass * 0.01))
}

/// `CAutomobile::BoostJumpControl` on its own binding.
///
/// # Safety
/// `automobile` must point at a `CAutomobile` and the boost-jump links must be captured.
pub unsafe extern "C" fn boost_jump_control(automobile: *mut u8) {
    unsafe {
        let driver = field::<*mut c_void>(automobile, VEHICLE_DRIVER);
        if driver.is_null() || !is_player(driver) {
            return;
        }
        let airborne = field::<f32>(automobile, WHEEL_COMPRESSION) >= 1.0;
        if airborne || !just_pressed(MAPPING_TAXI_BOOST_JUMP) {
            return;
        }
        let (lift, torque) = boost_jump(
            field(automobile, MASS),
            field(automobile, TURN_MASS),
            field(automobile, BOOST_TURN_AXIS),
        );
        let point = field::<Vec3>(automobile, BOOST_TURN_POINT);
        apply_move_force(automobile, lift);
        LINKS.func::<ApplyTurnForceFn>(Link::ApplyTurnForce)(
            automobile.cast(),
            torque.x.to_bits(),
            torque.y.to_bits(),
            torque.z.to_bits(),
            point.x.to_bits(),
            point.y.to_bits(),
            point.z.to_bits(),
        );
    }
}

/// `CPad::GetHydraulicJump`: the hydraulics binding toggles a lock instead.
///
/// # Safety
/// `pad` must point at a `CPad`.
pub unsafe extern "C" fn get_hydraulic_jump(pad: *const u8) -> i32 {
    unsafe {
        if field::<i16>(pad, PAD_CONTROLS_DISABLED) != 0 {
            return 0;
        }
        HOST.toggle_hydraulics(just_pressed(MAPPING_LOCK_HYDRAULICS)) as i32
    }
}

/// Whether the right stick drives the suspension of a car with `upgrades`,
/// rather than the camera.
pub fn stick_drives_hydraulics(upgrades: Option<u8>, locked: bool) -> bool {
    upgrades.is_some_and(|flags| flags & HYDRAULICS_INSTALLED != 0) && !locked
}

/// Hydraulics check of `CPad::AimWeaponUpDown` and `AimWeaponLeftRight`.
///
/// A non-zero low word leaves the aim function early; the high word is the
/// value the module sees in r0 there.
///
/// # Safety
/// `vehicle` must be null or point at a `CVehicle`.
pub unsafe extern "C" fn aim_weapon_hydraulics(vehicle: *const u8) -> u64 {
    let upgrades = (!vehicle.is_null()).then(|| unsafe { field::<u8>(vehicle, VEHICLE_UPGRADES) });
    u64::from(stick_drives_hydraulics(upgrades, HOST.hydraulics_locked.load(Ordering::Relaxed)))
}

/// Slot holding the newest date. Ties keep the lower slot; `None` when no
/// slot has a save.
pub fn latest_slot(dates: impl IntoIterator<Item = u64>) -> Option<i32> {
    let mut latest = (0, None);
    for (slot, date) in (0..).zip(dates) {
        if date > latest.0 {
            latest = (date, Some(slot));
        }
    }
    latest.1
}

/// `MainMenuScreen::HasCPSave`: resume picks the newest save.
///
/// # Safety
/// The resume links must be captured.
pub unsafe extern "C" fn has_cp_save() -> i32 {
    unsafe {
        let last = LINKS.ptr::<i32>(Link::LastSaveForResume);
        if *last == -1 {
            let helper = LINKS.ptr::<c_void>(Link::PcSaveHelper);
            let dates = (0..SAVE_SLOTS).map(|slot| {
                let mut name = [0u8; 256];
                let generate = LINKS.func::<GenerateGameFilenameFn>(Link::GenerateGameFilename);
                generate(helper, slot, name.as_mut_ptr());
                LINKS.func::<FileGetDateFn>(Link::FileGetDate)(FILE_AREA_USER, name.as_ptr())
            });
            if let Some(slot) = latest_slot(dates) {
                log::debug!("resume picks save slot {slot}");
                *last = slot;
            }
        }
        LINKS.func::<CheckSlotDataValidFn>(Link::CheckSlotDataValid)(*last, 1)
    }
}

/// `MainMenuScreen::OnExit`: saves, then ends the process.
///
/// # Safety
/// The exit link must be captured.
pub unsafe extern "C" fn on_exit() -> i32 {
    let save = unsafe { LINKS.func::<SaveGameForPauseFn>(Link::SaveGameForPause) };
    save(SAVE_FOR_EXIT, core::ptr::null_mut());
    log::info!("exit requested from the main menu");
    std::process::exit(0)
}

/// `CTaskSimpleSwim::ProcessSwimmingResistance` with frame-rate independent drag.
///
/// # Safety
/// `task` must point at a `CTaskSimpleSwim`, `ped` at its `CPed`, and the
/// swimming links must be captured.
pub unsafe extern "C" fn process_swimming_resistance(task: *mut u8, ped: *mut u8) {
    unsafe {
        let ts = time_step();
        let clump = field::<*mut c_void>(ped, ENTITY_CLUMP);
        let anim = |id: u32| {
            let assoc = LINKS.func::<GetAnimAssociationFn>(Link::GetAnimAssociation)(clump, id);
            (!assoc.is_null()).then_some(assoc)
        };
        let length = |assoc: *mut u8| {
            let hierarchy = field::<*const u8>(assoc, ANIM_HIERARCHY);
            field::<f32>(hierarchy, HIERARCHY_LENGTH)
        };
        let matrix = field::<*const u8>(ped, ENTITY_MATRIX);
        let right = field::<Vec3>(matrix, MATRIX_RIGHT);
        let forward = field::<Vec3>(matrix, MATRIX_FORWARD);
        let right_speed = field::<f32>(ped, PED_RIGHT_SPEED);
        let forward_speed = field::<f32>(ped, PED_FORWARD_SPEED);
        let mut pitch = Pitch {
            state: field(task, SWIM_STATE),
            angle: field(task, SWIM_PITCH),
            speed: field(task, SWIM_PITCH_SPEED),
        };

        let (push, submerge) = match SwimState::from_raw(pitch.state) {
            Some(SwimState::Tread | SwimState::Sprint | SwimState::Sprinting) => {
                let blend = |id| anim(id).map(|assoc| field::<f32>(assoc, ANIM_BLEND));
                let depth = swim::surface_submerge(blend(ANIM_SWIM_BREAST), blend(ANIM_SWIM_CRAWL));
                (swim::stroke(right, forward, right_speed, forward_speed), depth)
            }
            Some(SwimState::DiveUnderwater) => {
                let mut push = swim::stroke(right, forward, right_speed, forward_speed);
                if let Some(dive) = anim(ANIM_SWIM_DIVE_UNDER) {
                    push.z = swim::dive_sink(field(dive, ANIM_TIME), length(dive), ts);
                }
                (push, -1.0)
            }
            Some(SwimState::UnderwaterSprinting) => {
                let push =
                    swim::underwater_stroke(right, forward, right_speed, forward_speed, pitch.angle, ts);
                (push, -1.0)
            }
            Some(SwimState::BackToSurface) => {
                if let Some(climb) = anim(ANIM_CLIMB_JUMP).or_else(|| anim(ANIM_SWIM_JUMPOUT))
                    && swim::climbing(
                        length(climb),
                        field(climb, ANIM_TIME),
                        field(climb, ANIM_BLEND),
                        field(climb, ANIM_BLEND_DELTA),
                    )
                {
                    let lift = swim::climb_force(field(ped, PED_MASS), ts);
                    apply_move_force(ped, Vec3::new(0.0, 0.0, lift));
                }
                return;
            }
            None => return,
        };

        let mut speed = swim::damp(field(ped, MOVE_SPEED), push, ts, is_player(ped.cast()));
        let pos = field::<Vec3>(matrix, MATRIX_POS);
        let ahead = pos + speed * ts;
        let mut level = 0.0f32;
        let found = LINKS.func::<GetWaterLevelFn>(Link::GetWaterLevel)(
            ahead.x.to_bits(),
            ahead.y.to_bits(),
            ahead.z.to_bits(),
            &mut level,
            1,
            core::ptr::null_mut(),
        ) != 0;
        let submerge = swim::update_pitch(&mut pitch, submerge, pos.z, found.then_some(level), ts);
        speed.z = swim::floor(swim::settle(speed.z, level, submerge, pos.z, ts), pos.z);

        set_field(ped, MOVE_SPEED, speed);
        set_field(task, SWIM_STATE, pitch.state);
        set_field(task, SWIM_PITCH, pitch.angle);
        set_field(task, SWIM_PITCH_SPEED, pitch.speed);
    }
}

/// Keeps the render queue from taking its mutex.
///
/// # Safety
/// `render_queue` must point at a `CRenderQueue`.
pub unsafe extern "C" fn thread_set_value(render_queue: *mut u8) -> *mut c_void {
    unsafe { *render_queue.add(RENDER_QUEUE_LOCKED) = 0 };
    core::ptr::null_mut()
}

/// Event pump. 1 would ask the engine to quit.
pub extern "C" fn process_events(_wait: i32) -> i32 {
    0
}

pub extern "C" fn current_jni_env() -> *mut c_void {
    HOST.jni_env.as_ptr().cast()
}

static GUARD_LOCK: Mutex<()> = Mutex::new(());
static GUARD_DONE: Condvar = Condvar::new();

/// `__cxa_guard_acquire` for the ARM guard layout: byte 0 says initialized,
/// byte 1 says another thread is running the initializer.
///
/// # Safety
/// `guard` must point at a 4-byte guard variable.
pub unsafe extern "C" fn cxa_guard_acquire(guard: *mut u32) -> i32 {
    let (done, pending) = unsafe { guard_bytes(guard) };
    if done.load(Ordering::Acquire) != 0 {
        return 0;
    }
    let mut lock = GUARD_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    loop {
        if done.load(Ordering::Acquire) != 0 {
            return 0;
        }
        if pending.load(Ordering::Relaxed) == 0 {
            pending.store(1, Ordering::Relaxed);
            return 1;
        }
        lock = GUARD_DONE.wait(lock).unwrap_or_else(PoisonError::into_inner);
    }
}

/// # Safety
/// `guard` must have been acquired by this thread.
pub unsafe extern "C" fn cxa_guard_release(guard: *mut u32) {
    let (done, pending) = unsafe { guard_bytes(guard) };
    let _lock = GUARD_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    pending.store(0, Ordering::Relaxed);
    done.store(1, Ordering::Release);
    GUARD_DONE.notify_all();
}

/// # Safety
/// `guard` must have been acquired by this thread.
pub unsafe extern "C" fn cxa_guard_abort(guard: *mut u32) {
    let (_, pending) = unsafe { guard_bytes(guard) };
    let _lock = GUARD_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    pending.store(0, Ordering::Relaxed);
    GUARD_DONE.notify_all();
}

unsafe fn guard_bytes<'a>(guard: *mut u32) -> (&'a AtomicU8, &'a AtomicU8) {
    let bytes = guard.cast::<u8>();
    unsafe { (AtomicU8::from_ptr(bytes), AtomicU8::from_ptr(bytes.add(1))) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn vehicle(model: u16, nozzle: i16) -> Vec<u8> {
        let mut buf = vec![0u8; 0xA00];
        buf[MODEL_INDEX..MODEL_INDEX + 2].copy_from_slice(&model.to_le_bytes());
        buf[NOZZLE_ANGLE..NOZZLE_ANGLE + 2].copy_from_slice(&nozzle.to_le_bytes());
        buf
    }

    #[rstest]
    #[case(HYDRA, 3000, 2)]
    #[case(HYDRA, 2999, 3)]
    #[case(VORTEX, 0, 0)]
    #[case(411, 4000, 3)]
    fn camera_arrangement_by_model(#[case] model: u16, #[case] nozzle: i16, #[case] expected: i32) {
        let buf = vehicle(model, nozzle);
        assert_eq!(unsafe { cam_set_arr_pos(buf.as_ptr()) }, expected);
    }

    #[test]
    fn hydra_keeps_vertical_stick_for_nozzles() {
        let hydra = vehicle(HYDRA, 0);
        let car = vehicle(411, 0);
        assert_eq!(unsafe { cam_y_movement(hydra.as_ptr(), 7, 9) }, 7);
        assert_eq!(unsafe { cam_y_movement(car.as_ptr(), 7, 9) }, 7 | 9 << 32);
    }

    #[test]
    fn nozzle_rotation_is_clamped() {
        assert_eq!(rotate_nozzle(100, 5.0, 1.0), 100);
        assert_eq!(rotate_nozzle(100, 128.0, 1.0), 125);
        assert_eq!(rotate_nozzle(10, -128.0, 1.0), 0);
        assert_eq!(rotate_nozzle(4990, 128.0, 2.0), NOZZLE_ROTATE_LIMIT);
    }

    #[test]
    fn rudder_eases_towards_target() {
        assert_eq!(ease_rudder(0.0, 1.0, 1.0), 0.2);
        assert_eq!(ease_rudder(0.5, 0.5, 3.0), 0.5);
    }

    #[test]
    fn matmul4_identity_and_translation() {
        let mut identity = [0.0; 16];
        for i in 0..4 {
            identity[i * 5] = 1.0;
        }
        let mut translate = identity;
        translate[12] = 3.0;
        assert_eq!(matmul4(&identity, &translate), translate);
        let twice = matmul4(&translate, &translate);
        assert_eq!(twice[12], 6.0);
    }

    #[test]
    fn fov_widens_with_the_aspect_ratio() {
        let (draw, camera) = widened_fov(1.3333, 70.0);
        assert_eq!(draw, 70.0);
        assert!(camera < draw);
        let (wide, _) = widened_fov(16.0 / 9.0, 70.0);
        assert!(wide > 75.0 && wide < 76.0);
    }

    #[test]
    fn render_queue_mutex_flag_cleared() {
        let mut queue = vec![0xFFu8; 0x300];
        assert!(unsafe { thread_set_value(queue.as_mut_ptr()) }.is_null());
        assert_eq!(queue[RENDER_QUEUE_LOCKED], 0);
        assert_eq!(queue[RENDER_QUEUE_LOCKED - 1], 0xFF);
    }

    #[rstest]
    #[case(vec![0; 10], None)]
    #[case(vec![5, 9, 9, 2], Some(1))]
    #[case(vec![0, 0, 0, 7], Some(3))]
    fn resume_picks_the_newest_save(#[case] dates: Vec<u64>, #[case] slot: Option<i32>) {
        assert_eq!(latest_slot(dates), slot);
    }

    #[rstest]
    #[case(None, false, false)]
    #[case(Some(0), false, false)]
    #[case(Some(HYDRAULICS_INSTALLED), false, true)]
    #[case(Some(HYDRAULICS_INSTALLED | 1), true, false)]
    fn right_stick_and_hydraulics(
        #[case] upgrades: Option<u8>,
        #[case] locked: bool,
        #[case] hydraulics: bool,
    ) {
        assert_eq!(stick_drives_hydraulics(upgrades, locked), hydraulics);
    }

    #[test]
    fn aim_weapon_leaves_early_for_hydraulics() {
        let mut car = vec![0u8; 0x400];
        assert_eq!(unsafe { aim_weapon_hydraulics(core::ptr::null()) }, 0);
        assert_eq!(unsafe { aim_weapon_hydraulics(car.as_ptr()) }, 0);
        car[VEHICLE_UPGRADES] = HYDRAULICS_INSTALLED;
        // The module's r0 at the early return is the high word: zero.
        assert_eq!(unsafe { aim_weapon_hydraulics(car.as_ptr()) }, 1);
    }

    #[test]
    fn hydraulics_ignored_without_player_control() {
        let mut pad = vec![0u8; 0x200];
        pad[PAD_CONTROLS_DISABLED] = 1;
        assert_eq!(unsafe { get_hydraulic_jump(pad.as_ptr()) }, 0);
        assert!(!HOST.hydraulics_locked.load(Ordering::Relaxed));
    }

    #[test]
    fn boost_jump_scales_with_mass() {
        let (lift, torque) = boost_jump(1000.0, 2000.0, Vec3::new(0.0, 1.0, 0.5));
        assert_eq!(lift, Vec3::new(0.0, 0.0, 150.0));
        assert_eq!(torque, Vec3::new(0.0, 20.0, 10.0));
    }

    #[test]
    fn clearing_the_mouse_target_leaves_free_aim() {
        let mut ped = vec![0u8; 0x800];
        HOST.free_aim.store(true, Ordering::Relaxed);
        assert_eq!(unsafe { is_free_aim_mode(core::ptr::null_mut()) }, 1);
        unsafe { clear_3rd_person_mouse_target(ped.as_mut_ptr()) };
        assert!(!HOST.free_aim.load(Ordering::Relaxed));
    }

    #[test]
    fn links_capture_exports_and_text_locations() {
        use so_loader::os::HeapMmap;

        let symbols: Vec<_> = Link::ALL
            .iter()
            .filter_map(|link| match link.site() {
                LinkSite::Symbol(name) => Some(gen_so::SymbolDesc::object(name, &[0; 4])),
                LinkSite::Text(_) => None,
            })
            .collect();
        let output = gen_so::SoWriter::new().write(&[], &symbols).unwrap();
        let module = so_loader::Loader::new()
            .with_base(0x4000_0000)
            .with_mmap::<HeapMmap>()
            .load(output.data.as_slice())
            .unwrap();

        let links = GameLinks::new();
        let config = Config {
            fix_swimming: false,
            ..Config::default()
        };
        // Bones and MVP links are off by default, swimming is off here.
        assert_eq!(links.capture(&module, &config).unwrap(), LINK_COUNT - 3 - 3 - 2);
        assert_eq!(
            links.get(Link::FreeAimSetting),
            module.text_base().wrapping_add(FREE_AIM_SETTING)
        );
        assert_eq!(
            links.get(Link::IsJustPressed),
            module.symbol_address("_ZN4CHID13IsJustPressedE10HIDMapping").unwrap()
        );
        assert!(!links.is_captured(Link::GetWaterLevel));
        assert!(!links.is_captured(Link::SkinMap));
    }

    #[test]
    fn guard_runs_the_initializer_once() {
        let mut guard = 0u32;
        let ptr = &mut guard as *mut u32;
        unsafe {
            assert_eq!(cxa_guard_acquire(ptr), 1);
            cxa_guard_release(ptr);
            assert_eq!(cxa_guard_acquire(ptr), 0);
        }
        assert_eq!(guard & 0xFF, 1);
    }

    #[test]
    fn aborted_guard_can_be_retried() {
        let mut guard = 0u32;
        let ptr = &mut guard as *mut u32;
        unsafe {
            assert_eq!(cxa_guard_acquire(ptr), 1);
            cxa_guard_abort(ptr);
            assert_eq!(cxa_guard_acquire(ptr), 1);
            cxa_guard_release(ptr);
        }
    }
}
