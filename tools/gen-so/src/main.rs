use anyhow::Result;
use clap::Parser;
use gen_so::{HashStyle, InitEntry, RelocEntry, SoWriter, SoWriterConfig, SymbolDesc};
use std::path::{Path, PathBuf};

const IMPORTED_FUNC_NAME: &str = "helper";
const IMPORTED_VAR_NAME: &str = "host_var";
const LOCAL_VAR_NAME: &str = "local_var";

/// `adds r0, r0, r1; bx lr`
const ADD: [u16; 2] = [0x1840, 0x4770];
/// `movs r0, #0; bx lr`
const RET0: [u16; 2] = [0x2000, 0x4770];

fn gen_sample(out_path: &Path, hash: HashStyle, padding: u32) -> Result<()> {
    let mut out = out_path.to_path_buf();
    if out.extension().and_then(|s| s.to_str()) != Some("so") {
        out.set_extension("so");
    }
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let relocs = vec![
        RelocEntry::jump_slot(IMPORTED_FUNC_NAME),
        RelocEntry::glob_dat(IMPORTED_VAR_NAME),
        RelocEntry::abs(LOCAL_VAR_NAME),
        RelocEntry::relative_to("add"),
    ];
    let symbols = vec![
        SymbolDesc::thumb_func_halfwords("add", &ADD),
        SymbolDesc::thumb_func_halfwords("init", &RET0),
        SymbolDesc::object(LOCAL_VAR_NAME, &[0u8; 8]),
        SymbolDesc::undefined_func(IMPORTED_FUNC_NAME),
        SymbolDesc::undefined_object(IMPORTED_VAR_NAME),
    ];
    let config = SoWriterConfig::default()
        .with_soname("libsample.so")
        .with_hash(hash)
        .with_text_padding(padding)
        .with_init_array(vec![InitEntry::Raw(u32::MAX), InitEntry::Func("init".into())]);
    let output = SoWriter::with_config(config).write_file(&out, &relocs, &symbols)?;
    println!("Wrote {} ({} bytes)", out.display(), output.data.len());
    for (name, addr) in &output.symbols {
        println!("  {name}: 0x{addr:x}");
    }
    Ok(())
}

#[derive(Parser)]
#[command(name = "gen-so")]
struct Args {
    /// Output file for the generated object
    #[arg(short)]
    output: Option<PathBuf>,
    /// Emit a GNU hash table instead of a SysV one
    #[arg(long, action = clap::ArgAction::SetTrue)]
    gnu_hash: bool,
    /// Bytes of nop padding after the text
    #[arg(long, default_value_t = 0)]
    padding: u32,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let output = match args.output {
        Some(p) => p,
        None => {
            let mut cwd = std::env::current_dir()?;
            cwd.push("out");
            cwd.push("libsample.so");
            cwd
        }
    };
    let hash = if args.gnu_hash {
        HashStyle::Gnu
    } else {
        HashStyle::Sysv
    };
    gen_sample(&output, hash, args.padding)
}
