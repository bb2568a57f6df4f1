//! Brings up `libGTASA.so`: checks the installation, loads and binds the
//! module, patches it and hands control to its entry export.
mod bindings;
mod catalog;
mod config;
mod entry;
mod hooks;
mod offsets;
mod state;
mod stubs;
mod swim;

use anyhow::{Context, Result, bail, ensure};
use bindings::graphics::{GL_LIBRARIES, Graphics};
use clap::Parser;
use config::{CONFIG_FILE, Config};
use so_loader::{DEFAULT_PATCH_AREA, Loader, input::ElfFile, patch::PatchEngine};
use state::{HOST, SCREEN_HEIGHT, SCREEN_WIDTH};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sa-launcher", version, about)]
struct Args {
    /// Directory holding the game data, the module and the configuration file
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,
    /// Module to load, relative to the data directory
    #[arg(long, default_value = "libGTASA.so")]
    module: PathBuf,
    /// Configuration file [default: <data-dir>/config.txt]
    #[arg(long)]
    config: Option<PathBuf>,
    /// Load address of the module, in hex
    #[arg(long, default_value = "0x98000000", value_parser = parse_hex)]
    base: u32,
    /// Bytes reserved for trampolines after the image
    #[arg(long, default_value_t = DEFAULT_PATCH_AREA)]
    patch_area: usize,
    /// Load, bind and patch without executing anything, then print a summary
    #[arg(long)]
    verify: bool,
    /// Export that receives control
    #[arg(long, default_value = entry::DEFAULT_ENTRY)]
    entry: String,
    /// Candidate locations of the runtime shader compiler; one must exist
    #[arg(long = "component", default_values = ["libshacccg.suprx", "external/libshacccg.suprx"])]
    components: Vec<PathBuf>,
    /// Data file whose absence means the game data is not installed
    #[arg(long, default_value = "data/rt.ini")]
    asset: PathBuf,
    /// Resolution the display offers, as WIDTHxHEIGHT
    #[arg(long, value_parser = parse_size)]
    display: Option<(i32, i32)>,
}

fn parse_hex(s: &str) -> std::result::Result<u32, std::num::ParseIntError> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(digits, 16)
}

fn parse_size(s: &str) -> std::result::Result<(i32, i32), String> {
    let (width, height) = s
        .split_once('x')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, found `{s}`"))?;
    let parse = |v: &str| v.parse::<i32>().map_err(|err| format!("`{v}`: {err}"));
    Ok((parse(width)?, parse(height)?))
}

/// Prints the diagnostic and exits with status 1.
fn fatal(err: anyhow::Error) -> ! {
    eprintln!("fatal: {err:#}");
    std::process::exit(1)
}

fn check_installation(args: &Args) -> Result<()> {
    let data = &args.data_dir;
    match args.components.iter().map(|c| data.join(c)).find(|p| p.exists()) {
        Some(path) => log::info!("shader compiler: {}", path.display()),
        None => bail!(
            "libshacccg.suprx is not installed (looked for {:?} under {})",
            args.components,
            data.display()
        ),
    }
    let asset = data.join(&args.asset);
    ensure!(
        asset.exists(),
        "missing files at {}: {} not found",
        data.display(),
        asset.display()
    );
    Ok(())
}

fn open_graphics(args: &Args, config: &Config) -> Result<Graphics> {
    match Graphics::open(GL_LIBRARIES, config.disable_mipmaps) {
        Ok(graphics) => Ok(graphics),
        Err(err) if args.verify => {
            log::warn!("{err:#}; GL entry points bind to null");
            Ok(Graphics::unavailable(config.disable_mipmaps))
        }
        Err(err) => Err(err),
    }
}

fn module_path(args: &Args) -> Result<String> {
    let path = args.data_dir.join(&args.module);
    path.to_str()
        .map(str::to_owned)
        .with_context(|| format!("{} is not valid UTF-8", path.display()))
}

fn config_path(args: &Args) -> PathBuf {
    args.config
        .clone()
        .unwrap_or_else(|| args.data_dir.join(CONFIG_FILE))
}

fn run(args: &Args) -> Result<()> {
    let config = Config::load(&config_path(args))?;
    log::debug!("{config:?}");
    check_installation(args)?;

    let graphics = open_graphics(args, &config)?;
    if !graphics.is_available() {
        log::warn!("running without a GL library");
    }
    let table = bindings::build_table(&graphics)?;
    bindings::streams::open_stderr()?;

    let path = module_path(args)?;
    let file = ElfFile::from_path(&path).with_context(|| format!("cannot open {path}"))?;
    let mut module = Loader::new()
        .with_base(args.base)
        .with_patch_area(args.patch_area)
        .with_placeholder_addresses(args.verify)
        .load(file)
        .with_context(|| format!("cannot load {path}"))?;
    log::info!("loaded {} at 0x{:x}", module.name(), module.guest_base());

    let relocs = so_loader::relocate(&mut module)?;
    log::info!(
        "relocated: {} relative, {} symbolic, {} import slots",
        relocs.relative,
        relocs.symbolic,
        relocs.import_slots
    );
    let bound = so_loader::resolve(&mut module, &table)?;
    log::info!(
        "bound {} imports: {} native, {} shims, {} state cells, {} stubbed",
        bound.bound(),
        bound.native,
        bound.shim,
        bound.state_cell,
        bound.stubbed.len()
    );
    module.flush();

    if !args.verify {
        let ran = entry::run_initializers(&module)?;
        log::info!("ran {ran} initializers");
    }

    hooks::LINKS.capture(&module, &config)?;
    let catalog = catalog::game_catalog();
    let mut engine = PatchEngine::new(&mut module);
    let patched = catalog.apply(&mut engine, &config)?;
    let trampolines = engine.trampolines().len();
    engine.flush();
    module.seal()?;
    log::info!(
        "patched: {} applied, {} skipped, {trampolines} trampolines",
        patched.applied,
        patched.skipped.len()
    );

    if args.verify {
        println!("{}: ok", module.name());
        println!("  base         0x{:08x}", module.guest_base());
        println!("  text         0x{:08x}", module.text_base());
        println!("  imports      {}", bound.bound());
        println!("  stubbed      {}", bound.stubbed.join(", "));
        println!("  patches      {} applied", patched.applied);
        println!("  skipped      {}", patched.skipped.join(", "));
        println!("  trampolines  {trampolines}");
        return Ok(());
    }

    if let Some((width, height)) = args.display
        && (width < SCREEN_WIDTH || height < SCREEN_HEIGHT)
    {
        HOST.degrade_display();
    }
    let status = entry::call_entry(&module, &args.entry)?;
    log::info!("{} returned {status}", args.entry);
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if let Err(err) = run(&args) {
        fatal(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::path::Path;

    #[rstest]
    #[case("0x98000000", 0x9800_0000)]
    #[case("98000000", 0x9800_0000)]
    #[case("0X1000", 0x1000)]
    fn hex_bases(#[case] text: &str, #[case] value: u32) {
        assert_eq!(parse_hex(text).unwrap(), value);
    }

    #[test]
    fn display_sizes() {
        assert_eq!(parse_size("960x544"), Ok((960, 544)));
        assert!(parse_size("960").is_err());
        assert!(parse_size("ax544").is_err());
    }

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(["sa-launcher"]).unwrap();
        assert_eq!(args.base, so_loader::DEFAULT_BASE);
        assert_eq!(args.patch_area, DEFAULT_PATCH_AREA);
        assert_eq!(args.entry, "JNI_OnLoad");
        assert_eq!(args.components.len(), 2);
        assert!(!args.verify);
        assert_eq!(config_path(&args), Path::new(".").join(CONFIG_FILE));
    }

    #[test]
    fn missing_component_is_fatal() {
        let dir = std::env::temp_dir().join(format!("sa-launcher-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("data")).unwrap();
        let args = Args::try_parse_from(["sa-launcher", "--data-dir", dir.to_str().unwrap()]).unwrap();
        let err = check_installation(&args).unwrap_err();
        assert!(err.to_string().contains("libshacccg.suprx"));

        std::fs::write(dir.join("libshacccg.suprx"), b"").unwrap();
        let err = check_installation(&args).unwrap_err();
        assert!(err.to_string().contains("rt.ini"));

        std::fs::write(dir.join("data/rt.ini"), b"").unwrap();
        check_installation(&args).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
