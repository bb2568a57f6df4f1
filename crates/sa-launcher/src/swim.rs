//! Water resistance of `CTaskSimpleSwim`, computed on the host.
//!
//! The engine's own version scales with the frame rate; everything here takes
//! the time step in 30 fps frames the way `CTimer` reports it.
use std::f32::consts::PI;
use std::ops::{Add, Mul};

/// A `CVector`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;

    fn mul(self, rhs: f32) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// `eSwimState`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwimState {
    Tread = 0,
    Sprint = 1,
    Sprinting = 2,
    DiveUnderwater = 3,
    UnderwaterSprinting = 4,
    BackToSurface = 5,
}

impl SwimState {
    pub fn from_raw(raw: u16) -> Option<Self> {
        Some(match raw {
            0 => SwimState::Tread,
            1 => SwimState::Sprint,
            2 => SwimState::Sprinting,
            3 => SwimState::DiveUnderwater,
            4 => SwimState::UnderwaterSprinting,
            5 => SwimState::BackToSurface,
            _ => return None,
        })
    }
}

/// Frames per second the time step is measured against, over 30.
const MAGIC: f32 = 50.0 / 30.0;
/// How far the head sits below the surface when pitching.
const HEAD_DEPTH: f32 = 0.65;
/// Pitch above which an underwater sprint surfaces.
const SURFACE_PITCH: f32 = 0.7854;
const MIN_ROTATION_SPEED: f32 = 0.05 * 0.5;
const MAX_ROTATION_SPEED: f32 = 0.05;
/// Lowest point of the map.
const SEA_FLOOR: f32 = -69.0;

fn magic(time_step: f32) -> f32 {
    time_step / MAGIC
}

fn seconds(time_step: f32) -> f32 {
    time_step / 50.0
}

/// `min(max(value, lo), hi)`, without `f32::clamp`'s panic on odd bounds.
fn clamp(value: f32, lo: f32, hi: f32) -> f32 {
    value.max(lo).min(hi)
}

/// Depth a surface stroke keeps the ped at, from the blend of the breast
/// stroke and crawl animations that are playing.
pub fn surface_submerge(breast: Option<f32>, crawl: Option<f32>) -> f32 {
    let (mut sum, mut rest) = (0.0, 1.0);
    if let Some(blend) = breast {
        sum = 0.4 * blend;
        rest = 1.0 - blend;
    }
    if let Some(blend) = crawl {
        sum += 0.2 * blend;
        rest -= blend;
    }
    rest.max(0.0) * 0.55 + sum
}

/// Push from the ped's stroke: its `right` and `forward` axes scaled by its speeds.
pub fn stroke(right: Vec3, forward: Vec3, right_speed: f32, forward_speed: f32) -> Vec3 {
    right * right_speed + forward * forward_speed
}

/// Vertical push while the dive animation runs.
pub fn dive_sink(anim_time: f32, anim_length: f32, time_step: f32) -> f32 {
    anim_time / anim_length * (-0.1 * magic(time_step))
}

/// Push while sprinting underwater at `pitch`.
pub fn underwater_stroke(
    right: Vec3,
    forward: Vec3,
    right_speed: f32,
    forward_speed: f32,
    pitch: f32,
    time_step: f32,
) -> Vec3 {
    let mut push = stroke(right, forward, right_speed, pitch.cos() * forward_speed);
    push.z += (pitch.sin() * forward_speed + 0.01) / magic(time_step);
    push
}

/// Whether the climb-out animation still lifts the ped.
pub fn climbing(anim_length: f32, anim_time: f32, blend: f32, blend_delta: f32) -> bool {
    anim_length > anim_time && (blend >= 1.0 || blend_delta > 0.0)
}

/// Upward force that carries the ped out of the water.
pub fn climb_force(mass: f32, time_step: f32) -> f32 {
    time_step * mass * 0.3 * 0.008
}

/// Move speed after one step of water drag plus `push`.
pub fn damp(speed: Vec3, push: Vec3, time_step: f32, player: bool) -> Vec3 {
    let drag = 0.9f32.powf(time_step);
    let mut push = push * ((1.0 - drag) * MAGIC / time_step);
    if player {
        push = push * 1.25;
    }
    speed * drag + push
}

/// Swim task state the pitch update reads and writes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pitch {
    pub state: u16,
    /// Pitch angle in radians.
    pub angle: f32,
    pub speed: f32,
}

/// Pitches an underwater sprint towards the surface.
///
/// `water_level` is `None` when there is no water at the ped's next position.
/// Returns the depth to keep the ped at, replacing `submerge`.
pub fn update_pitch(
    pitch: &mut Pitch,
    submerge: f32,
    ped_z: f32,
    water_level: Option<f32>,
    time_step: f32,
) -> f32 {
    let Some(level) = water_level else {
        return -1.0;
    };
    if pitch.state != SwimState::UnderwaterSprinting as u16 || pitch.speed < 0.0 {
        return submerge;
    }
    if ped_z + HEAD_DEPTH > level && pitch.angle > SURFACE_PITCH {
        pitch.state = SwimState::Tread as u16;
        pitch.speed = 0.0;
        return submerge;
    }

    if pitch.angle >= 0.0 {
        if ped_z + HEAD_DEPTH <= level {
            pitch.speed = if pitch.speed <= 0.001 { 0.0 } else { pitch.speed * 0.95 };
            return submerge;
        }
        if pitch.speed > MIN_ROTATION_SPEED {
            pitch.speed *= 0.95;
        }
        if pitch.speed < MIN_ROTATION_SPEED {
            pitch.speed = (pitch.speed + seconds(time_step) / 10.0).min(MIN_ROTATION_SPEED);
        }
        pitch.angle += time_step * pitch.speed;
        (0.55 - 0.2) * (pitch.angle * 4.0 / PI) * 0.75 + 0.2
    } else {
        if ped_z - pitch.angle.sin() + HEAD_DEPTH <= level {
            pitch.speed = if pitch.speed > 0.001 { pitch.speed * 0.95 } else { 0.0 };
        } else {
            pitch.speed = (pitch.speed + seconds(time_step) / 10.0).min(MAX_ROTATION_SPEED);
        }
        pitch.angle += time_step * pitch.speed;
        submerge
    }
}

/// Vertical speed that pulls the ped towards `submerge` below the surface.
pub fn settle(speed_z: f32, water_level: f32, submerge: f32, ped_z: f32, time_step: f32) -> f32 {
    if submerge <= 0.0 {
        return speed_z;
    }
    let limit = time_step * 0.1;
    let wanted = clamp((water_level - (submerge + ped_z)) / time_step, -limit, limit);
    let limit = seconds(time_step);
    speed_z + clamp(wanted - speed_z, -limit, limit)
}

/// Keeps a ped at the bottom of the map from sinking further.
pub fn floor(speed_z: f32, ped_z: f32) -> f32 {
    if ped_z < SEA_FLOOR { speed_z.max(0.0) } else { speed_z }
}
