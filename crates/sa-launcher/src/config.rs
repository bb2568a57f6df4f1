//! The `key value` configuration file.
use anyhow::{Context, Result, bail};
use so_loader::catalog::Gates;
use std::path::Path;

/// File name looked up under the data directory.
pub const CONFIG_FILE: &str = "config.txt";

/// Launcher options, one per configuration key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub disable_detail_textures: bool,
    pub car_fov_effects: bool,
    pub fix_heli_plane_camera: bool,
    pub fix_skin_weights: bool,
    pub enable_high_detail_player: bool,
    pub enable_bones_optimization: bool,
    pub enable_mvp_optimization: bool,
    pub ignore_mobile_stuff: bool,
    pub show_wanted_stars: bool,
    pub road_reflections: bool,
    pub disable_mipmaps: bool,
    pub fix_swimming: bool,
    /// Resume loads the newest save instead of the last one resumed.
    pub resume_latest_save: bool,
    pub save_on_exit: bool,
    pub free_aim_binding: bool,
    pub boost_jump_binding: bool,
    /// The hydraulics lock binding, which also frees the right stick.
    pub lock_hydraulics: bool,
    /// Multisampling mode handed to the graphics layer.
    pub aa_mode: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            disable_detail_textures: false,
            car_fov_effects: false,
            fix_heli_plane_camera: true,
            fix_skin_weights: true,
            enable_high_detail_player: true,
            enable_bones_optimization: false,
            enable_mvp_optimization: false,
            ignore_mobile_stuff: true,
            show_wanted_stars: false,
            road_reflections: false,
            disable_mipmaps: false,
            fix_swimming: true,
            resume_latest_save: true,
            save_on_exit: true,
            free_aim_binding: true,
            boost_jump_binding: true,
            lock_hydraulics: true,
            aa_mode: 0,
        }
    }
}

impl Config {
    /// Reads `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text).with_context(|| format!("in {}", path.display())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::info!("{} not found, using the default configuration", path.display());
                Ok(Self::default())
            }
            Err(err) => Err(err).with_context(|| format!("cannot read {}", path.display())),
        }
    }

    /// Parses `key value` lines. `#` starts a comment.
    pub fn parse(text: &str) -> Result<Self> {
        let mut config = Self::default();
        for (idx, line) in text.lines().enumerate() {
            let line = line.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let lineno = idx + 1;
            let mut parts = line.split_whitespace();
            let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
                bail!("line {lineno}: expected `key value`, found `{line}`");
            };
            let value: i64 = value
                .parse()
                .with_context(|| format!("line {lineno}: `{value}` is not a number"))?;
            if key == "aa_mode" {
                config.aa_mode = u32::try_from(value)
                    .with_context(|| format!("line {lineno}: aa_mode must not be negative"))?;
                continue;
            }
            match config.switch_mut(key) {
                Some(switch) => *switch = value != 0,
                None => log::warn!("line {lineno}: unknown configuration key {key}"),
            }
        }
        Ok(config)
    }

    fn switch_mut(&mut self, key: &str) -> Option<&mut bool> {
        Some(match key {
            "disable_detail_textures" => &mut self.disable_detail_textures,
            "car_fov_effects" => &mut self.car_fov_effects,
            "fix_heli_plane_camera" => &mut self.fix_heli_plane_camera,
            "fix_skin_weights" => &mut self.fix_skin_weights,
            "enable_high_detail_player" => &mut self.enable_high_detail_player,
            "enable_bones_optimization" => &mut self.enable_bones_optimization,
            "enable_mvp_optimization" => &mut self.enable_mvp_optimization,
            "ignore_mobile_stuff" => &mut self.ignore_mobile_stuff,
            "show_wanted_stars" => &mut self.show_wanted_stars,
            "road_reflections" => &mut self.road_reflections,
            "disable_mipmaps" => &mut self.disable_mipmaps,
            "fix_swimming" => &mut self.fix_swimming,
            "resume_latest_save" => &mut self.resume_latest_save,
            "save_on_exit" => &mut self.save_on_exit,
            "free_aim_binding" => &mut self.free_aim_binding,
            "boost_jump_binding" => &mut self.boost_jump_binding,
            "lock_hydraulics" => &mut self.lock_hydraulics,
            _ => return None,
        })
    }

    /// The value of a boolean switch.
    pub fn switch(&self, key: &str) -> Option<bool> {
        Some(match key {
            "disable_detail_textures" => self.disable_detail_textures,
            "car_fov_effects" => self.car_fov_effects,
            "fix_heli_plane_camera" => self.fix_heli_plane_camera,
            "fix_skin_weights" => self.fix_skin_weights,
            "enable_high_detail_player" => self.enable_high_detail_player,
            "enable_bones_optimization" => self.enable_bones_optimization,
            "enable_mvp_optimization" => self.enable_mvp_optimization,
            "ignore_mobile_stuff" => self.ignore_mobile_stuff,
            "show_wanted_stars" => self.show_wanted_stars,
            "road_reflections" => self.road_reflections,
            "disable_mipmaps" => self.disable_mipmaps,
            "fix_swimming" => self.fix_swimming,
            "resume_latest_save" => self.resume_latest_save,
            "save_on_exit" => self.save_on_exit,
            "free_aim_binding" => self.free_aim_binding,
            "boost_jump_binding" => self.boost_jump_binding,
            "lock_hydraulics" => self.lock_hydraulics,
            _ => return None,
        })
    }
}

impl Gates for Config {
    fn gate(&self, key: &str) -> Option<bool> {
        self.switch(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn parses_keys_comments_and_blank_lines() {
        let text = "# graphics\n\
                    disable_detail_textures 1\n\
                    \n\
                    road_reflections 1   # re3\n\
                    fix_skin_weights 0\n\
                    aa_mode 2\n";
        let config = Config::parse(text).unwrap();
        assert!(config.disable_detail_textures);
        assert!(config.road_reflections);
        assert!(!config.fix_skin_weights);
        assert_eq!(config.aa_mode, 2);
        assert_eq!(config.fix_heli_plane_camera, Config::default().fix_heli_plane_camera);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let config = Config::parse("enable_touch_sense 1\n").unwrap();
        assert_eq!(config, Config::default());
    }

    #[rstest]
    #[case("car_fov_effects yes", "line 1")]
    #[case("\ncar_fov_effects", "line 2")]
    #[case("car_fov_effects 1 2", "line 1")]
    #[case("\n\naa_mode -1", "line 3")]
    fn malformed_lines_name_the_line(#[case] text: &str, #[case] line: &str) {
        let err = Config::parse(text).unwrap_err();
        assert!(format!("{err:#}").contains(line), "{err:#}");
    }

    #[test]
    fn gates_know_only_boolean_switches() {
        let config = Config::parse("show_wanted_stars 1").unwrap();
        assert_eq!(config.gate("show_wanted_stars"), Some(true));
        assert_eq!(config.gate("car_fov_effects"), Some(false));
        assert_eq!(config.gate("aa_mode"), None);
        assert_eq!(config.gate("no_such_switch"), None);
    }

    #[test]
    fn gameplay_fixes_default_on() {
        let config = Config::parse("free_aim_binding 0\n").unwrap();
        assert!(!config.free_aim_binding);
        for key in [
            "fix_swimming",
            "resume_latest_save",
            "save_on_exit",
            "boost_jump_binding",
            "lock_hydraulics",
        ] {
            assert_eq!(config.switch(key), Some(true), "{key}");
        }
    }

    #[test]
    fn missing_file_means_defaults() {
        let config = Config::load(Path::new("/nonexistent/config.txt")).unwrap();
        assert_eq!(config, Config::default());
    }
}
