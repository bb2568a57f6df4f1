//! Fixed locations inside `libGTASA.so` (Android 2.00, armeabi-v7a).
//!
//! Offsets are relative to the text base. Code offsets that name a Thumb
//! instruction get bit 0 through [`thumb`]. Pairs are `(site, resume)`.

/// The Thumb-mode address of a code offset.
pub const fn thumb(offset: u32) -> u32 {
    offset | 1
}

// CAERadioTrackManager
/// `QueueUpTracksForStation`: skip the removed-track filter loop.
pub const QUEUE_UP_TRACKS: (u32, u32) = (0x3A152A, 0x3A1602);
/// `ChooseMusicTrackIndex`
pub const CHOOSE_MUSIC_TRACK: (u32, u32) = (0x3A35F6, 0x3A369A);
/// `ChooseIdentIndex`
pub const CHOOSE_IDENT: (u32, u32) = (0x3A37C2, 0x3A385E);
/// `ChooseAdvertIndex`
pub const CHOOSE_ADVERT: (u32, u32) = (0x3A3A1E, 0x3A3AA2);
/// `ChooseTalkRadioShow`
pub const CHOOSE_TALK_RADIO: (u32, u32) = (0x3A4374, 0x3A4416);
/// `ChooseDJBanterIndexFromList`
pub const CHOOSE_DJ_BANTER: (u32, u32) = (0x3A44D6, 0x3A4562);

/// Second siren: two `nop`s over the model check.
pub const SIREN_MODEL_CHECK: u32 = 0x590134;
/// Second siren: the result store replaced with `nop.w`.
pub const SIREN_RESULT: u32 = 0x590168;
pub const NOP_W: u32 = 0x8000_F3AF;

/// Muzzle flash: ten halfwords of the last-bullet branch.
pub const MUZZLE_FLASH: u32 = 0x4DDCCA;

/// `CCam::Process_FollowCar_SA`: speed-dependent FOV changes.
pub const CAR_FOV_EFFECT: [u32; 2] = [0x3C07E6, 0x3C082C];

/// Country rifle: first-person aiming check.
pub const COUNTRY_RIFLE_CHECK: u32 = 0x5378C0;
/// Country rifle: weapon type compared against the rifle.
pub const COUNTRY_RIFLE_TYPE: u32 = 0x53813C;

/// `FindPlayerVehicle` calls in the follow-car and aim code, patched to `movs r0, #0; nop`.
pub const FIND_PLAYER_VEHICLE_CALLS: [u32; 5] = [0x3C0866, 0x3C1518, 0x3C198A, 0x3FC462, 0x3FC754];
pub const MOVS_R0_0_NOP: u32 = 0xBF00_2000;

/// `CCam::Process_FollowCar_SA`: picks the camera arrangement (site, resume).
pub const CAM_SET_ARR_POS: (u32, u32) = (0x3C057C, 0x3C033A);
/// `CCam::Process_FollowCar_SA`: right stick vertical movement (site, resume).
pub const CAM_Y_MOVEMENT: (u32, u32) = (0x3C12F4, 0x3C1308);
/// `CPlane::ProcessControlInputs`: rudder input (site, resume).
pub const PLANE_RUDDER: (u32, u32) = (0x5760BA, 0x57611A);
/// `CPlane::ProcessControlInputs`: harrier nozzle input (site, resume).
pub const PLANE_HARRIER: (u32, u32) = (0x576432, 0x5765F0);

/// Skin weight type forced to `GL_UNSIGNED_SHORT` (`movs r1, #1`).
pub const SKIN_WEIGHT_TYPE: [u32; 2] = [0x1C8064, 0x1C8082];
pub const MOVS_R1_1: u16 = 0x2101;

/// `SkinSetMatrices`, not exported.
pub const SKIN_SET_MATRICES: u32 = 0x1C8670;

/// Cutscene skip button.
pub const MOBILE_WIDGETS: [u32; 2] = [0x43A7A0, 0x4627E6];
/// Steering control popup.
pub const STEERING_POPUP: u32 = 0x3F91B6;
/// Items of the controls menu.
pub const CONTROL_MENU_ITEMS: [u32; 4] = [0x29E4AE, 0x29E4E6, 0x29E50A, 0x29E530];
pub const NOP_NOP: u32 = 0xBF00_BF00;
pub const NOP: u16 = 0xBF00;

/// Map highlight of explored zones.
pub const MAP_HIGHLIGHT: (u32, u32) = (0x2AADE0, 0x2AAF9A);
/// Free aiming.
pub const FREE_AIM: (u32, u32) = (0x4C6D16, 0x4C6E28);
/// Target switching firing twice.
pub const TARGET_SWITCH: (u32, u32) = (0x3C73F8, 0x3C7424);
/// Automatic landing gear deployment and retraction.
pub const LANDING_GEAR: (u32, u32) = (0x57629C, 0x5762BC);

/// `CCamera::Process`: loads the FOV into s2 (site, resume). ARM-aligned site, Thumb code.
pub const CAMERA_FOV: (u32, u32) = (0x3DD880, 0x3DD888);

/// Visibility test of the wanted stars.
pub const WANTED_STARS: (u32, u32) = (0x2BDF82, 0x2BDFA4);
/// Vehicles removed when out of view.
pub const DESPAWN_VEHICLES: (u32, u32) = (0x2EC660, 0x2EC6D6);
/// Peds removed when out of view.
pub const DESPAWN_PEDS: (u32, u32) = (0x4CE4EA, 0x4CE55C);

/// `CTaskSimplePlayerOnFoot::ProcessPlayerWeapon`: lock-on target switch (site, resume).
pub const PLAYER_WEAPON_TARGET: (u32, u32) = (0x5387FC, 0x538A54);
/// Offset of the previous target inside `CPlayerPed`.
pub const PED_WEAPON_TARGET: u16 = 0x720;
/// `MobileSettings` free-aim option word.
pub const FREE_AIM_SETTING: u32 = 0x6E04BC;

// CPad
/// `AimWeaponUpDown`: hydraulics check (site, resume).
pub const AIM_WEAPON_UP_DOWN: (u32, u32) = (0x3FC778, 0x3FC782);
/// `AimWeaponUpDown` epilogue.
pub const AIM_WEAPON_UP_DOWN_RETURN: u32 = 0x3FC744;
/// `AimWeaponLeftRight`: hydraulics check (site, resume).
pub const AIM_WEAPON_LEFT_RIGHT: (u32, u32) = (0x3FC486, 0x3FC490);
/// `AimWeaponLeftRight` epilogue, starting with the move of its result into r0.
pub const AIM_WEAPON_LEFT_RIGHT_RETURN: u32 = 0x3FC44C;

/// Distance at which CJ is pulled towards stealable objects.
pub const MAGNET_DISTANCE: u32 = 0x40B162;
pub const MAGNET_PATCH: u32 = 0x0A00_EEB7;
/// Road reflections.
pub const ROAD_REFLECTIONS: u32 = 0x5A2E9C;
pub const ROAD_REFLECTIONS_PATCH: u32 = 0xBF00_982F;
/// Corona stretching in foggy weather.
pub const CORONAS_FOG: u32 = 0x5A27EC;
pub const CORONAS_PATCH: u32 = 0x0A44_EEB0;
/// Breathing bubbles underwater.
pub const BUBBLES: u32 = 0x53C4A0;
pub const BUBBLES_PATCH: u64 = 0x0238_F8D0_0B8C_EDD0;
/// Reflection buffer quality.
pub const REFLECTION_SIZE: u32 = 0x5C49E6;
pub const REFLECTION_PATCH: u32 = 0x6480_F44F;
/// Peds killed when their car is jacked.
pub const JACKED_PEDS: (u32, u32) = (0x4F5FC4, 0x4F5FD6);
/// Radar tile streaming.
pub const RADAR_STREAMING: (u32, u32) = (0x44313A, 0x443146);
