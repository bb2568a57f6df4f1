//! The patch list for `libGTASA.so`, in the order it is applied.
use crate::bindings::{platform, threading};
use crate::state::{HOST, cell_address};
use crate::{hooks, offsets::*, stubs};
use so_loader::catalog::{Catalog, Gate, HookMode, PatchAction, PatchEntry};
use so_loader::patch::trampoline::{Arg, Base, Dest, Source, TrampolineSpec, Writeback};
use so_loader::patch::{Site, Target};

fn code(offset: u32) -> Site {
    Site::Text(thumb(offset))
}

fn host(name: &'static str, addr: usize) -> Target {
    Target::native(name, addr)
}

fn ret0() -> Target {
    host("ret0", stubs::ret0 as usize)
}

fn ret1() -> Target {
    host("ret1", stubs::ret1 as usize)
}

/// Jumps from `site` straight to `resume` inside the same function.
fn skip(name: &'static str, rationale: &'static str, (site, resume): (u32, u32)) -> PatchEntry {
    hook(name, rationale, code(site), Target::Site(code(resume)))
}

fn hook(name: &'static str, rationale: &'static str, site: Site, target: Target) -> PatchEntry {
    PatchEntry::new(
        name,
        rationale,
        PatchAction::Hook {
            site,
            target,
            mode: HookMode::Auto,
        },
    )
}

/// Replaces the exported function `symbol`.
fn replace(name: &'static str, rationale: &'static str, symbol: &'static str, target: Target) -> PatchEntry {
    hook(name, rationale, Site::Symbol(symbol), target)
}

fn bytes(name: &'static str, rationale: &'static str, offset: u32, bytes: &[u8]) -> PatchEntry {
    PatchEntry::new(
        name,
        rationale,
        PatchAction::Bytes {
            site: Site::Text(offset),
            bytes: bytes.to_vec(),
        },
    )
}

fn nops(name: &'static str, rationale: &'static str, offset: u32, count: usize) -> PatchEntry {
    PatchEntry::new(
        name,
        rationale,
        PatchAction::Nop {
            site: Site::Text(offset),
            count,
        },
    )
}

fn write_data(name: &'static str, rationale: &'static str, symbol: &'static str, value: &[u8]) -> PatchEntry {
    PatchEntry::new(
        name,
        rationale,
        PatchAction::WriteData {
            symbol,
            bytes: value.to_vec(),
        },
    )
}

fn trampoline(rationale: &'static str, spec: TrampolineSpec) -> PatchEntry {
    PatchEntry::new(spec.name, rationale, PatchAction::Trampoline(spec))
}

fn stub(name: &'static str, (site, resume): (u32, u32)) -> TrampolineSpec {
    TrampolineSpec::new(name, code(site), code(resume))
}

/// Every entry of the game catalog.
pub fn game_catalog() -> Catalog {
    let mut catalog = Catalog::new();
    catalog.push(write_data(
        "cloud_saves",
        "there is no cloud save service",
        "UseCloudSaves",
        &[0],
    ));
    catalog.push(write_data(
        "touch_sense",
        "there is no haptics service",
        "UseTouchSense",
        &[0],
    ));
    catalog.push(
        write_data(
            "detail_textures",
            "detail textures cost fill rate",
            "gNoDetailTextures",
            &1u32.to_le_bytes(),
        )
        .gated(Gate::on("disable_detail_textures")),
    );

    catalog.push(replace(
        "removed_tracks",
        "radio plays the tracks the mobile release removed",
        "_Z14IsRemovedTracki",
        ret0(),
    ));
    for (name, offsets) in [
        ("radio_queue_up_tracks", QUEUE_UP_TRACKS),
        ("radio_music_track", CHOOSE_MUSIC_TRACK),
        ("radio_ident", CHOOSE_IDENT),
        ("radio_advert", CHOOSE_ADVERT),
        ("radio_talk_show", CHOOSE_TALK_RADIO),
        ("radio_dj_banter", CHOOSE_DJ_BANTER),
    ] {
        catalog.push(skip(name, "skip the removed-track filter", offsets));
    }

    catalog.push(nops(
        "second_siren_check",
        "emergency vehicles get their second siren back",
        SIREN_MODEL_CHECK,
        2,
    ));
    catalog.push(bytes(
        "second_siren_result",
        "emergency vehicles get their second siren back",
        SIREN_RESULT,
        &NOP_W.to_le_bytes(),
    ));
    catalog.push(nops(
        "muzzle_flash",
        "show the muzzle flash for the last bullet of a magazine",
        MUZZLE_FLASH,
        10,
    ));
    for (name, offset) in [("car_fov_effect", CAR_FOV_EFFECT[0]), ("car_fov_effect_2", CAR_FOV_EFFECT[1])] {
        catalog.push(
            nops(name, "keep the FOV steady while driving fast", offset, 1).gated(Gate::on("car_fov_effects")),
        );
    }
    catalog.push(nops(
        "country_rifle_check",
        "aim the country rifle in third person",
        COUNTRY_RIFLE_CHECK,
        3,
    ));
    catalog.push(bytes(
        "country_rifle_type",
        "aim the country rifle in third person",
        COUNTRY_RIFLE_TYPE,
        &0xFFu32.to_le_bytes(),
    ));

    catalog.extend(heli_plane_camera());

    let skin = Gate::on("fix_skin_weights");
    for (name, offset) in [("skin_weights", SKIN_WEIGHT_TYPE[0]), ("skin_weights_2", SKIN_WEIGHT_TYPE[1])] {
        catalog.push(
            bytes(name, "upload skin weights as GL_UNSIGNED_SHORT", offset, &MOVS_R1_1.to_le_bytes()).gated(skin),
        );
    }
    catalog.push(
        replace(
            "high_detail_player",
            "always draw the high detail player model",
            "_Z17UseHiDetailPlayerv",
            ret1(),
        )
        .gated(Gate::on("enable_high_detail_player")),
    );

    let bones = Gate::on("enable_bones_optimization");
    catalog.push(
        replace(
            "skin_vector_count",
            "upload only the bones in use",
            "_Z30emu_InternalSkinGetVectorCountv",
            host("skin_get_vector_count", hooks::skin_get_vector_count as usize),
        )
        .gated(bones),
    );
    catalog.push(
        hook(
            "skin_set_matrices",
            "copy bone matrices without conversion",
            code(SKIN_SET_MATRICES),
            host("skin_set_matrices", hooks::skin_set_matrices as usize),
        )
        .gated(bones),
    );
    catalog.push(
        replace(
            "mvp_matrix",
            "upload one premultiplied matrix per draw",
            "_ZN9ES2Shader17SetMatrixConstantE24RQShaderMatrixConstantIDPKf",
            host("set_matrix_constant", hooks::set_matrix_constant as usize),
        )
        .gated(Gate::on("enable_mvp_optimization")),
    );

    catalog.extend(mobile_widgets());

    catalog.push(skip(
        "map_highlight",
        "alpha blending the explored zones is too expensive",
        MAP_HIGHLIGHT,
    ));
    catalog.push(skip("free_aim", "free aiming works with a pad", FREE_AIM));
    catalog.push(skip(
        "target_switch",
        "switching targets no longer fires twice",
        TARGET_SWITCH,
    ));
    catalog.push(skip(
        "landing_gear",
        "no automatic landing gear deployment or retraction",
        LANDING_GEAR,
    ));

    catalog.push(PatchEntry::new(
        "set_fov",
        "widen the field of view for the screen aspect ratio",
        PatchAction::Hook {
            site: Site::Symbol("_ZN5CDraw6SetFOVEfb"),
            target: host("set_fov", hooks::set_fov as usize),
            mode: HookMode::Thumb,
        },
    ));
    catalog.push(trampoline(
        "the camera keeps the field of view emergency vehicles expect",
        stub("camera_fov", CAMERA_FOV).writeback(Writeback::new(
            Source::Cell(host("fake_fov", cell_address(&HOST.fake_fov))),
            Dest::Vfp(2),
        )),
    ));

    for (name, symbol) in [
        ("save_telemetry", "_Z13SaveTelemetryv"),
        ("load_telemetry", "_Z13LoadTelemetryv"),
        ("update_usage", "_Z11updateUsageb"),
    ] {
        catalog.push(replace(name, "no telemetry", symbol, ret0()));
    }
    catalog.push(replace(
        "file_updated",
        "no store downloads",
        "_Z14AND_FileUpdated",
        ret0(),
    ));
    catalog.push(replace(
        "billing_update",
        "no in-app billing",
        "_Z17AND_BillingUpdateb",
        ret0(),
    ));
    catalog.push(replace(
        "guard_acquire",
        "static initialization guards are shared with the host",
        "__cxa_guard_acquire",
        host("__cxa_guard_acquire", hooks::cxa_guard_acquire as usize),
    ));
    catalog.push(replace(
        "guard_release",
        "static initialization guards are shared with the host",
        "__cxa_guard_release",
        host("__cxa_guard_release", hooks::cxa_guard_release as usize),
    ));
    catalog.push(replace(
        "jni_env",
        "engine threads share the host's stand-in environment",
        "_Z24NVThreadGetCurrentJNIEnvv",
        host("current_jni_env", hooks::current_jni_env as usize),
    ));
    catalog.push(replace(
        "thread_launch",
        "engine threads are host threads with mapped priorities",
        "_Z15OS_ThreadLaunchPFjPvES_jPKci16OSThreadPriority",
        host("OS_ThreadLaunch", threading::os_thread_launch as usize),
    ));
    catalog.push(replace(
        "thread_set_value",
        "the render queue runs without its mutex",
        "_Z17OS_ThreadSetValuePv",
        host("thread_set_value", hooks::thread_set_value as usize),
    ));
    catalog.push(replace(
        "screen_width",
        "the screen size comes from the host",
        "_Z17OS_ScreenGetWidthv",
        host("OS_ScreenGetWidth", platform::screen_width as usize),
    ));
    catalog.push(replace(
        "screen_height",
        "the screen size comes from the host",
        "_Z18OS_ScreenGetHeightv",
        host("OS_ScreenGetHeight", platform::screen_height as usize),
    ));
    catalog.push(replace(
        "system_initialize",
        "there is no Android system to query",
        "_Z20AND_SystemInitializev",
        ret0(),
    ));
    catalog.push(replace(
        "process_events",
        "the host owns the event loop",
        "_Z13ProcessEventsb",
        host("process_events", hooks::process_events as usize),
    ));
    catalog.push(replace(
        "adjustable_hud_save",
        "the HUD layout is fixed",
        "_ZN14CAdjustableHUD10SaveToDiskEv",
        ret0(),
    ));
    catalog.push(replace(
        "reposition_widgets",
        "the HUD layout is fixed",
        "_ZN15CTouchInterface27RepositionAdjustableWidgetsEv",
        ret0(),
    ));

    catalog.push(trampoline(
        "switch lock-on targets with the pad",
        stub("player_weapon", PLAYER_WEAPON_TARGET)
            .handler(host("process_player_weapon", hooks::process_player_weapon as usize))
            .arg(Arg::Core(5))
            .arg(Arg::Mem {
                base: Base::Core(4),
                offset: PED_WEAPON_TARGET,
            })
            .arg(Arg::Core(4))
            .save_vfp(true),
    ));

    catalog.push(
        skip("wanted_stars", "always draw the wanted stars", WANTED_STARS).gated(Gate::on("show_wanted_stars")),
    );
    catalog.push(skip(
        "despawn_vehicles",
        "vehicles stay when the camera looks away",
        DESPAWN_VEHICLES,
    ));
    catalog.push(skip(
        "despawn_peds",
        "peds stay when the camera looks away",
        DESPAWN_PEDS,
    ));
    catalog.push(bytes(
        "magnet_distance",
        "CJ only snaps to stealable objects when very close",
        MAGNET_DISTANCE,
        &MAGNET_PATCH.to_le_bytes(),
    ));
    catalog.push(
        bytes(
            "road_reflections",
            "roads reflect again",
            ROAD_REFLECTIONS,
            &ROAD_REFLECTIONS_PATCH.to_le_bytes(),
        )
        .gated(Gate::on("road_reflections")),
    );
    catalog.push(bytes(
        "coronas_fog",
        "coronas no longer stretch in foggy weather",
        CORONAS_FOG,
        &CORONAS_PATCH.to_le_bytes(),
    ));
    catalog.push(bytes(
        "bubbles",
        "breathing underwater shows bubbles",
        BUBBLES,
        &BUBBLES_PATCH.to_le_bytes(),
    ));
    catalog.push(bytes(
        "reflection_size",
        "bigger reflection buffer",
        REFLECTION_SIZE,
        &REFLECTION_PATCH.to_le_bytes(),
    ));
    catalog.push(skip(
        "jacked_peds",
        "peds survive having their car jacked",
        JACKED_PEDS,
    ));
    catalog.push(replace(
        "sprint_surfaces",
        "sprinting is allowed on any surface",
        "_ZN14SurfaceInfos_c12CantSprintOnEj",
        ret0(),
    ));
    catalog.push(skip("radar_streaming", "radar tiles stream in", RADAR_STREAMING));
    catalog.push(replace(
        "air_resistance",
        "no extra air resistance for the player",
        "_ZN10CCullZones29DoExtraAirResistanceForPlayerEv",
        ret0(),
    ));
    catalog.extend(gameplay());
    catalog
}

/// Extra bindings and fixes that change how the game plays.
fn gameplay() -> Catalog {
    let mut catalog = Catalog::new();
    catalog.push(
        replace(
            "swimming_resistance",
            "water drag no longer depends on the frame rate",
            "_ZN15CTaskSimpleSwim25ProcessSwimmingResistanceEP4CPed",
            host("process_swimming_resistance", hooks::process_swimming_resistance as usize),
        )
        .gated(Gate::on("fix_swimming")),
    );
    catalog.push(
        replace(
            "boost_jump",
            "the taxi boost jump has its own binding",
            "_ZN11CAutomobile16BoostJumpControlEv",
            host("boost_jump_control", hooks::boost_jump_control as usize),
        )
        .gated(Gate::on("boost_jump_binding")),
    );

    let gate = Gate::on("lock_hydraulics");
    catalog.push(
        replace(
            "hydraulic_jump",
            "the hydraulics binding locks the suspension",
            "_ZN4CPad16GetHydraulicJumpEv",
            host("get_hydraulic_jump", hooks::get_hydraulic_jump as usize),
        )
        .gated(gate),
    );
    for (name, offsets, early_return) in [
        ("aim_weapon_up_down", AIM_WEAPON_UP_DOWN, AIM_WEAPON_UP_DOWN_RETURN),
        ("aim_weapon_left_right", AIM_WEAPON_LEFT_RIGHT, AIM_WEAPON_LEFT_RIGHT_RETURN),
    ] {
        catalog.push(
            trampoline(
                "the right stick aims the camera unless it drives unlocked hydraulics",
                stub(name, offsets)
                    .handler(host("aim_weapon_hydraulics", hooks::aim_weapon_hydraulics as usize))
                    .arg(Arg::Core(0))
                    .divert(code(early_return))
                    .writeback(Writeback::new(Source::R1, Dest::Core(0)))
                    .save_vfp(true),
            )
            .gated(gate),
        );
    }

    let gate = Gate::on("free_aim_binding");
    catalog.push(
        replace(
            "clear_mouse_target",
            "clearing the mouse target ends free aim",
            "_ZN10CPlayerPed25Clear3rdPersonMouseTargetEv",
            host("clear_3rd_person_mouse_target", hooks::clear_3rd_person_mouse_target as usize),
        )
        .gated(gate),
    );
    catalog.push(
        replace(
            "free_aim_mode",
            "the free-aim binding overrides the setting",
            "_ZN14MobileSettings13IsFreeAimModeEv",
            host("is_free_aim_mode", hooks::is_free_aim_mode as usize),
        )
        .gated(gate),
    );

    catalog.push(
        replace(
            "has_cp_save",
            "resume loads the newest save",
            "_ZN14MainMenuScreen9HasCPSaveEv",
            host("has_cp_save", hooks::has_cp_save as usize),
        )
        .gated(Gate::on("resume_latest_save")),
    );
    catalog.push(
        replace(
            "exit_with_save",
            "leaving from the main menu saves and ends the process",
            "_ZN14MainMenuScreen6OnExitEv",
            host("on_exit", hooks::on_exit as usize),
        )
        .gated(Gate::on("save_on_exit")),
    );
    catalog
}

/// Right stick camera in vehicles plus Hydra and rudder controls on the pad.
fn heli_plane_camera() -> Catalog {
    let gate = Gate::on("fix_heli_plane_camera");
    let mut catalog = Catalog::new();
    for (i, offset) in FIND_PLAYER_VEHICLE_CALLS.into_iter().enumerate() {
        const NAMES: [&str; 5] = [
            "follow_car_vehicle",
            "follow_car_vehicle_2",
            "follow_car_vehicle_3",
            "aim_vehicle",
            "aim_vehicle_2",
        ];
        catalog.push(
            bytes(
                NAMES[i],
                "the right stick moves the camera in vehicles",
                offset,
                &MOVS_R0_0_NOP.to_le_bytes(),
            )
            .gated(gate),
        );
    }
    catalog.push(
        trampoline(
            "the Hydra in hover mode gets the heli camera",
            stub("camera_arrangement", CAM_SET_ARR_POS)
                .handler(host("cam_set_arr_pos", hooks::cam_set_arr_pos as usize))
                .arg(Arg::Core(11))
                .writeback(Writeback::new(Source::R0, Dest::Core(9)))
                .save_vfp(true),
        )
        .gated(gate),
    );
    catalog.push(
        trampoline(
            "the Hydra keeps the vertical stick for its nozzles",
            stub("camera_y_movement", CAM_Y_MOVEMENT)
                .handler(host("cam_y_movement", hooks::cam_y_movement as usize))
                .arg(Arg::Core(11))
                .arg(Arg::Vfp(21))
                .arg(Arg::Vfp(28))
                .writeback(Writeback::new(Source::R0, Dest::Vfp(21)))
                .writeback(Writeback::new(Source::R1, Dest::Vfp(28)))
                .save_vfp(true),
        )
        .gated(gate),
    );
    catalog.push(
        trampoline(
            "rudder on the turret buttons",
            stub("plane_rudder", PLANE_RUDDER)
                .handler(host("plane_rudder", hooks::plane_rudder as usize))
                .arg(Arg::Core(4))
                .arg(Arg::Core(8))
                .writeback(Writeback::new(Source::R0, Dest::Vfp(0)))
                .save_vfp(true),
        )
        .gated(gate),
    );
    catalog.push(
        trampoline(
            "Hydra nozzles on the right stick",
            stub("plane_harrier", PLANE_HARRIER)
                .handler(host("plane_harrier", hooks::plane_harrier as usize))
                .arg(Arg::Core(4))
                .arg(Arg::Core(8))
                .save_vfp(true),
        )
        .gated(gate),
    );
    catalog
}

/// Widgets and popups that only make sense on a touch screen.
fn mobile_widgets() -> Catalog {
    let gate = Gate::on("ignore_mobile_stuff");
    let mut catalog = Catalog::new();
    let nop_nop = NOP_NOP.to_le_bytes();
    catalog.push(bytes("cutscene_skip", "no skip button", MOBILE_WIDGETS[0], &nop_nop).gated(gate));
    catalog.push(bytes("cutscene_skip_2", "no skip button", MOBILE_WIDGETS[1], &nop_nop).gated(gate));
    catalog.push(
        replace(
            "mission_start_button",
            "no side mission buttons",
            "_ZN25CWidgetButtonMissionStart6UpdateEv",
            ret0(),
        )
        .gated(gate),
    );
    catalog.push(
        replace(
            "mission_cancel_button",
            "no side mission buttons",
            "_ZN26CWidgetButtonMissionCancel6UpdateEv",
            ret0(),
        )
        .gated(gate),
    );
    catalog.push(
        bytes(
            "steering_popup",
            "no steering control popup",
            STEERING_POPUP,
            &NOP.to_le_bytes(),
        )
        .gated(gate),
    );
    catalog.push(replace("rating_nag", "no app rating popup", "_Z12Menu_ShowNagv", ret0()).gated(gate));
    const MENU_ITEMS: [&str; 4] = [
        "controls_menu_item",
        "controls_menu_item_2",
        "controls_menu_item_3",
        "controls_menu_item_4",
    ];
    for (name, offset) in MENU_ITEMS.into_iter().zip(CONTROL_MENU_ITEMS) {
        catalog.push(bytes(name, "touch-only controls menu items", offset, &nop_nop).gated(gate));
    }
    catalog
}
