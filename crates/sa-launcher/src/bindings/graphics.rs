//! OpenGL ES 2 entry points, resolved from the host GL library.
use anyhow::{Context, Result as AnyResult};
use libloading::Library;
use so_loader::Result;
use so_loader::binding::{BindingProvider, BindingTable};
use std::ffi::c_void;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Libraries tried in order.
pub const GL_LIBRARIES: &[&str] = &["libGLESv2.so.2", "libGLESv2.so"];

/// Functions the module calls that the host library provides unchanged.
const GL_FUNCTIONS: &[&str] = &[
    "glActiveTexture",
    "glAttachShader",
    "glBindAttribLocation",
    "glBindBuffer",
    "glBindFramebuffer",
    "glBindTexture",
    "glBlendFunc",
    "glBlendFuncSeparate",
    "glBufferData",
    "glCheckFramebufferStatus",
    "glClear",
    "glClearStencil",
    "glCompileShader",
    "glCreateProgram",
    "glCreateShader",
    "glCullFace",
    "glDeleteBuffers",
    "glDeleteFramebuffers",
    "glDeleteProgram",
    "glDeleteShader",
    "glDeleteTextures",
    "glDepthFunc",
    "glDepthMask",
    "glDisable",
    "glDisableVertexAttribArray",
    "glDrawArrays",
    "glDrawElements",
    "glEnable",
    "glEnableVertexAttribArray",
    "glFramebufferTexture2D",
    "glFrontFace",
    "glGenBuffers",
    "glGenFramebuffers",
    "glGenTextures",
    "glGetAttribLocation",
    "glGetError",
    "glGetIntegerv",
    "glGetProgramInfoLog",
    "glGetProgramiv",
    "glGetShaderInfoLog",
    "glGetShaderiv",
    "glGetString",
    "glGetUniformLocation",
    "glHint",
    "glLinkProgram",
    "glReadPixels",
    "glScissor",
    "glShaderSource",
    "glTexParameteri",
    "glUniform1fv",
    "glUniform1i",
    "glUniform2fv",
    "glUniform3fv",
    "glUniform4fv",
    "glUniformMatrix3fv",
    "glUniformMatrix4fv",
    "glUseProgram",
    "glVertexAttrib4fv",
    "glVertexAttribPointer",
    "glViewport",
];

/// Functions that get a host wrapper: texture uploads and float parameters.
const GL_WRAPPED: &[&str] = &[
    "glTexImage2D",
    "glCompressedTexImage2D",
    "glClearColor",
    "glClearDepthf",
    "glPolygonOffset",
    "glTexParameterf",
];

/// PVRTC 4bpp and 2bpp RGB formats, whose mips break below one 4x4 block.
const PVRTC_RGB_4BPP: u32 = 0x8C00;
const PVRTC_RGB_2BPP: u32 = 0x8C01;
const PVRTC_RGBA_4BPP: u32 = 0x8C02;

static DISABLE_MIPMAPS: AtomicBool = AtomicBool::new(false);

struct Real {
    tex_image_2d: AtomicUsize,
    compressed_tex_image_2d: AtomicUsize,
    clear_color: AtomicUsize,
    clear_depthf: AtomicUsize,
    polygon_offset: AtomicUsize,
    tex_parameterf: AtomicUsize,
}

static REAL: Real = Real {
    tex_image_2d: AtomicUsize::new(0),
    compressed_tex_image_2d: AtomicUsize::new(0),
    clear_color: AtomicUsize::new(0),
    clear_depthf: AtomicUsize::new(0),
    polygon_offset: AtomicUsize::new(0),
    tex_parameterf: AtomicUsize::new(0),
};

impl Real {
    fn slot(&self, name: &str) -> Option<&AtomicUsize> {
        Some(match name {
            "glTexImage2D" => &self.tex_image_2d,
            "glCompressedTexImage2D" => &self.compressed_tex_image_2d,
            "glClearColor" => &self.clear_color,
            "glClearDepthf" => &self.clear_depthf,
            "glPolygonOffset" => &self.polygon_offset,
            "glTexParameterf" => &self.tex_parameterf,
            _ => return None,
        })
    }
}

/// The host function behind `slot`.
///
/// # Safety
/// `F` must be the `extern "C" fn` type of that function, and it must have been resolved.
unsafe fn real<F: Copy>(slot: &AtomicUsize) -> F {
    let addr = slot.load(Ordering::Relaxed);
    unsafe { std::mem::transmute_copy(&addr) }
}

type TexImage2D = extern "C" fn(u32, i32, i32, i32, i32, i32, u32, u32, *const c_void);
type CompressedTexImage2D = extern "C" fn(u32, i32, u32, i32, i32, i32, i32, *const c_void);

/// Whether a texture level gets uploaded.
pub fn keep_uncompressed_level(level: i32) -> bool {
    level == 0
}

/// Whether a compressed texture level gets uploaded.
pub fn keep_compressed_level(level: i32, format: u32, width: i32, height: i32, disable_mipmaps: bool) -> bool {
    level == 0
        || (!disable_mipmaps
            && ((width >= 4 && height >= 4) || (format != PVRTC_RGB_2BPP && format != PVRTC_RGBA_4BPP)))
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn tex_image_2d(
    target: u32,
    level: i32,
    internal_format: i32,
    width: i32,
    height: i32,
    border: i32,
    format: u32,
    ty: u32,
    data: *const c_void,
) {
    if keep_uncompressed_level(level) {
        let real: TexImage2D = unsafe { real(&REAL.tex_image_2d) };
        real(target, level, internal_format, width, height, border, format, ty, data);
    }
}

#[allow(clippy::too_many_arguments)]
unsafe extern "C" fn compressed_tex_image_2d(
    target: u32,
    level: i32,
    format: u32,
    width: i32,
    height: i32,
    border: i32,
    size: i32,
    data: *const c_void,
) {
    if keep_compressed_level(level, format, width, height, DISABLE_MIPMAPS.load(Ordering::Relaxed)) {
        let real: CompressedTexImage2D = unsafe { real(&REAL.compressed_tex_image_2d) };
        real(target, level, format, width, height, border, size, data);
    }
}

unsafe extern "C" fn clear_color(r: u32, g: u32, b: u32, a: u32) {
    let real: extern "C" fn(f32, f32, f32, f32) = unsafe { real(&REAL.clear_color) };
    real(f32::from_bits(r), f32::from_bits(g), f32::from_bits(b), f32::from_bits(a));
}

unsafe extern "C" fn clear_depthf(depth: u32) {
    let real: extern "C" fn(f32) = unsafe { real(&REAL.clear_depthf) };
    real(f32::from_bits(depth));
}

unsafe extern "C" fn polygon_offset(factor: u32, units: u32) {
    let real: extern "C" fn(f32, f32) = unsafe { real(&REAL.polygon_offset) };
    real(f32::from_bits(factor), f32::from_bits(units));
}

unsafe extern "C" fn tex_parameterf(target: u32, name: u32, value: u32) {
    let real: extern "C" fn(u32, u32, f32) = unsafe { real(&REAL.tex_parameterf) };
    real(target, name, f32::from_bits(value));
}

fn wrapper(name: &str) -> usize {
    match name {
        "glTexImage2D" => tex_image_2d as usize,
        "glCompressedTexImage2D" => compressed_tex_image_2d as usize,
        "glClearColor" => clear_color as usize,
        "glClearDepthf" => clear_depthf as usize,
        "glPolygonOffset" => polygon_offset as usize,
        _ => tex_parameterf as usize,
    }
}

/// The GL binding set. Without a library every function is null, which only
/// placeholder addressing accepts. Renderbuffers and EGL queries are in the
/// safe-to-stub set and bound by the platform provider.
pub struct Graphics {
    library: Option<Library>,
    functions: Vec<(&'static str, usize)>,
}

impl Graphics {
    /// Opens the first library of `candidates` that loads.
    pub fn open(candidates: &[&str], disable_mipmaps: bool) -> AnyResult<Self> {
        DISABLE_MIPMAPS.store(disable_mipmaps, Ordering::Relaxed);
        let mut last_err = None;
        for name in candidates {
            // SAFETY: GL libraries have no initializers with preconditions.
            match unsafe { Library::new(name) } {
                Ok(library) => {
                    log::info!("using {name}");
                    return Self::from_library(library);
                }
                Err(err) => last_err = Some(err),
            }
        }
        match last_err {
            Some(err) => Err(err).context("no GL library could be loaded"),
            None => anyhow::bail!("no GL library candidates"),
        }
    }

    fn from_library(library: Library) -> AnyResult<Self> {
        let mut functions = Vec::with_capacity(GL_FUNCTIONS.len() + GL_WRAPPED.len());
        for &name in GL_FUNCTIONS.iter().chain(GL_WRAPPED) {
            // SAFETY: only the address is taken.
            let addr = unsafe { library.get::<*mut c_void>(name.as_bytes()) }
                .map(|sym| *sym as usize)
                .with_context(|| format!("{name} missing from the GL library"))?;
            functions.push((name, addr));
        }
        Ok(Self {
            library: Some(library),
            functions,
        })
    }

    /// A binding set without a library, for verify mode.
    pub fn unavailable(disable_mipmaps: bool) -> Self {
        DISABLE_MIPMAPS.store(disable_mipmaps, Ordering::Relaxed);
        let functions = GL_FUNCTIONS.iter().chain(GL_WRAPPED).map(|&name| (name, 0)).collect();
        Self {
            library: None,
            functions,
        }
    }

    pub fn is_available(&self) -> bool {
        self.library.is_some()
    }
}

impl BindingProvider for Graphics {
    fn name(&self) -> &'static str {
        "graphics"
    }

    fn register(&self, table: &mut BindingTable) -> Result<()> {
        for &(name, addr) in &self.functions {
            match REAL.slot(name) {
                Some(slot) => {
                    slot.store(addr, Ordering::Relaxed);
                    table.shim(name, wrapper(name))?;
                }
                None => table.native(name, addr)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, PVRTC_RGB_2BPP, 2, 2, true, true)]
    #[case(1, PVRTC_RGB_2BPP, 2, 2, false, false)]
    #[case(1, PVRTC_RGBA_4BPP, 4, 4, false, true)]
    #[case(1, PVRTC_RGB_4BPP, 2, 2, false, true)]
    #[case(1, PVRTC_RGB_4BPP, 8, 8, true, false)]
    fn compressed_levels(
        #[case] level: i32,
        #[case] format: u32,
        #[case] width: i32,
        #[case] height: i32,
        #[case] disable_mipmaps: bool,
        #[case] kept: bool,
    ) {
        assert_eq!(keep_compressed_level(level, format, width, height, disable_mipmaps), kept);
    }

    #[test]
    fn only_base_level_of_plain_textures() {
        assert!(keep_uncompressed_level(0));
        assert!(!keep_uncompressed_level(1));
    }

    #[test]
    fn unavailable_library_binds_null_functions() {
        let graphics = Graphics::unavailable(false);
        assert!(!graphics.is_available());
        let mut table = BindingTable::new(crate::stubs::stub_set());
        table.register(&graphics).unwrap();
        assert_eq!(table.get("glClear").map(|b| b.address), Some(0));
        assert_ne!(table.get("glTexImage2D").map(|b| b.address), Some(0));
        assert!(table.get("glGenRenderbuffers").is_none());
    }
}
