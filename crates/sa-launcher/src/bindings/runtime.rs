//! C runtime: memory, strings, time, math and the compiler helpers.
use so_loader::Result;
use so_loader::binding::{BindingProvider, BindingTable};
use std::ffi::{c_char, c_int, c_void};
use std::sync::{Mutex, PoisonError};

unsafe extern "C" {
    fn ctime(time: *const libc::time_t) -> *mut c_char;
    fn vasprintf(out: *mut *mut c_char, fmt: *const c_char, args: *mut c_void) -> c_int;
    fn _setjmp(env: *mut c_void) -> c_int;
    fn longjmp(env: *mut c_void, val: c_int) -> !;
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "arm")] {
        unsafe extern "C" {
            fn __aeabi_d2ulz();
            fn __aeabi_idiv();
            fn __aeabi_idivmod();
            fn __aeabi_l2d();
            fn __aeabi_l2f();
            fn __aeabi_ldivmod();
            fn __aeabi_uidiv();
            fn __aeabi_uidivmod();
            fn __aeabi_ul2d();
            fn __aeabi_ul2f();
            fn __aeabi_uldivmod();
        }

        fn aeabi_helpers() -> [(&'static str, usize); 11] {
            [
                ("__aeabi_d2ulz", __aeabi_d2ulz as usize),
                ("__aeabi_idiv", __aeabi_idiv as usize),
                ("__aeabi_idivmod", __aeabi_idivmod as usize),
                ("__aeabi_l2d", __aeabi_l2d as usize),
                ("__aeabi_l2f", __aeabi_l2f as usize),
                ("__aeabi_ldivmod", __aeabi_ldivmod as usize),
                ("__aeabi_uidiv", __aeabi_uidiv as usize),
                ("__aeabi_uidivmod", __aeabi_uidivmod as usize),
                ("__aeabi_ul2d", __aeabi_ul2d as usize),
                ("__aeabi_ul2f", __aeabi_ul2f as usize),
                ("__aeabi_uldivmod", __aeabi_uldivmod as usize),
            ]
        }
    } else {
        /// Stands in for the ARM run-time helpers on hosts that never run the module.
        extern "C" fn no_aeabi_helper() {
            log::error!("ARM run-time helper called on a host without one");
            std::process::abort();
        }

        fn aeabi_helpers() -> [(&'static str, usize); 11] {
            [
                "__aeabi_d2ulz",
                "__aeabi_idiv",
                "__aeabi_idivmod",
                "__aeabi_l2d",
                "__aeabi_l2f",
                "__aeabi_ldivmod",
                "__aeabi_uidiv",
                "__aeabi_uidivmod",
                "__aeabi_ul2d",
                "__aeabi_ul2f",
                "__aeabi_uldivmod",
            ]
            .map(|name| (name, no_aeabi_helper as usize))
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "android", target_os = "openbsd", target_os = "netbsd"))] {
        fn errno_location() -> usize {
            libc::__errno as usize
        }
    } else {
        fn errno_location() -> usize {
            libc::__errno_location as usize
        }
    }
}

// The module passes floats in core registers, so these take and return bits.

macro_rules! unary_bits {
    ($($name:ident: $float:ty => $op:ident;)*) => {
        $(
            extern "C" fn $name(x: <$float as FloatBits>::Bits) -> <$float as FloatBits>::Bits {
                <$float>::from_bits(x).$op().to_bits()
            }
        )*
    };
}

macro_rules! binary_bits {
    ($($name:ident: $float:ty => $op:expr;)*) => {
        $(
            extern "C" fn $name(
                x: <$float as FloatBits>::Bits,
                y: <$float as FloatBits>::Bits,
            ) -> <$float as FloatBits>::Bits {
                let op: fn($float, $float) -> $float = $op;
                op(<$float>::from_bits(x), <$float>::from_bits(y)).to_bits()
            }
        )*
    };
}

trait FloatBits {
    type Bits;
}

impl FloatBits for f32 {
    type Bits = u32;
}

impl FloatBits for f64 {
    type Bits = u64;
}

unary_bits! {
    acosf: f32 => acos;
    asinf: f32 => asin;
    atanf: f32 => atan;
    ceilf: f32 => ceil;
    cos: f64 => cos;
    cosf: f32 => cos;
    exp2: f64 => exp2;
    exp2f: f32 => exp2;
    exp: f64 => exp;
    floor: f64 => floor;
    floorf: f32 => floor;
    log10f: f32 => log10;
    log: f64 => ln;
    logf: f32 => ln;
    sin: f64 => sin;
    sinf: f32 => sin;
    tan: f64 => tan;
    tanf: f32 => tan;
}

binary_bits! {
    atan2f: f32 => f32::atan2;
    fmodf: f32 => |x, y| x % y;
    pow: f64 => f64::powf;
    powf: f32 => f32::powf;
}

extern "C" fn ldexpf(x: u32, exp: c_int) -> u32 {
    (f32::from_bits(x) * 2f32.powi(exp)).to_bits()
}

unsafe extern "C" fn modf(x: u64, int_part: *mut u64) -> u64 {
    let x = f64::from_bits(x);
    unsafe { *int_part = x.trunc().to_bits() };
    (x - x.trunc()).to_bits()
}

unsafe extern "C" fn modff(x: u32, int_part: *mut u32) -> u32 {
    let x = f32::from_bits(x);
    unsafe { *int_part = x.trunc().to_bits() };
    (x - x.trunc()).to_bits()
}

extern "C" fn isfinite(x: u64) -> c_int {
    f64::from_bits(x).is_finite().into()
}

extern "C" fn signbit(x: u64) -> c_int {
    f64::from_bits(x).is_sign_negative().into()
}

unsafe extern "C" fn atof(s: *const c_char) -> u64 {
    unsafe { libc::atof(s) }.to_bits()
}

unsafe extern "C" fn strtof(s: *const c_char, end: *mut *mut c_char) -> u32 {
    unsafe { libc::strtof(s, end) }.to_bits()
}

unsafe extern "C" fn memclr(dst: *mut c_void, len: usize) -> *mut c_void {
    unsafe { libc::memset(dst, 0, len) }
}

/// `__aeabi_memset` takes the length before the fill byte.
unsafe extern "C" fn aeabi_memset(dst: *mut c_void, len: usize, fill: c_int) -> *mut c_void {
    unsafe { libc::memset(dst, fill, len) }
}

unsafe extern "C" fn operator_new(size: usize) -> *mut c_void {
    let ptr = unsafe { libc::malloc(size.max(1)) };
    if ptr.is_null() {
        log::error!("out of memory allocating {size} bytes");
        std::process::abort();
    }
    ptr
}

unsafe extern "C" fn operator_delete(ptr: *mut c_void) {
    unsafe { libc::free(ptr) }
}

extern "C" fn stack_chk_fail() -> ! {
    log::error!("stack smashing detected in the module");
    std::process::abort();
}

type Destructor = unsafe extern "C" fn(*mut c_void);

/// Destructors registered through `__cxa_atexit`, as `(function, argument)`.
static DESTRUCTORS: Mutex<Vec<(usize, usize)>> = Mutex::new(Vec::new());

unsafe extern "C" fn cxa_atexit(func: Destructor, arg: *mut c_void, _dso: *mut c_void) -> c_int {
    DESTRUCTORS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push((func as usize, arg as usize));
    0
}

/// Runs every registered destructor, last registered first.
unsafe extern "C" fn cxa_finalize(_dso: *mut c_void) {
    let pending = std::mem::take(&mut *DESTRUCTORS.lock().unwrap_or_else(PoisonError::into_inner));
    for (func, arg) in pending.into_iter().rev() {
        // SAFETY: only `cxa_atexit` stores entries, and it stores function pointers.
        let func: Destructor = unsafe { std::mem::transmute::<usize, Destructor>(func) };
        unsafe { func(arg as *mut c_void) };
    }
}

/// The C and C++ runtime the module links against.
pub struct Runtime;

impl Runtime {
    fn natives() -> Vec<(&'static str, usize)> {
        vec![
            ("calloc", libc::calloc as usize),
            ("free", libc::free as usize),
            ("malloc", libc::malloc as usize),
            ("realloc", libc::realloc as usize),
            ("memchr", libc::memchr as usize),
            ("memcmp", libc::memcmp as usize),
            ("memcpy", libc::memcpy as usize),
            ("memmove", libc::memmove as usize),
            ("memset", libc::memset as usize),
            ("atoi", libc::atoi as usize),
            ("islower", libc::islower as usize),
            ("isprint", libc::isprint as usize),
            ("isspace", libc::isspace as usize),
            ("toupper", libc::toupper as usize),
            ("qsort", libc::qsort as usize),
            ("rand", libc::rand as usize),
            ("srand", libc::srand as usize),
            ("sscanf", libc::sscanf as usize),
            ("puts", libc::puts as usize),
            ("getenv", libc::getenv as usize),
            ("strcasecmp", libc::strcasecmp as usize),
            ("strcat", libc::strcat as usize),
            ("strchr", libc::strchr as usize),
            ("strcmp", libc::strcmp as usize),
            ("strcpy", libc::strcpy as usize),
            ("strerror", libc::strerror as usize),
            ("strlen", libc::strlen as usize),
            ("strncasecmp", libc::strncasecmp as usize),
            ("strncat", libc::strncat as usize),
            ("strncmp", libc::strncmp as usize),
            ("strncpy", libc::strncpy as usize),
            ("strpbrk", libc::strpbrk as usize),
            ("strrchr", libc::strrchr as usize),
            ("strstr", libc::strstr as usize),
            ("strtok", libc::strtok as usize),
            ("strtol", libc::strtol as usize),
            ("strtoul", libc::strtoul as usize),
            ("vasprintf", vasprintf as usize),
            ("ctime", ctime as usize),
            ("gettimeofday", libc::gettimeofday as usize),
            ("gmtime", libc::gmtime as usize),
            ("localtime_r", libc::localtime_r as usize),
            ("time", libc::time as usize),
            ("usleep", libc::usleep as usize),
            ("mkdir", libc::mkdir as usize),
            ("abort", libc::abort as usize),
            ("exit", libc::exit as usize),
            ("setjmp", _setjmp as usize),
            ("longjmp", longjmp as usize),
            ("__errno", errno_location()),
        ]
    }

    fn shims() -> Vec<(&'static str, usize)> {
        let mut shims = vec![
            ("_Znwj", operator_new as usize),
            ("_Znaj", operator_new as usize),
            ("_ZdlPv", operator_delete as usize),
            ("_ZdaPv", operator_delete as usize),
            ("__cxa_atexit", cxa_atexit as usize),
            ("__cxa_finalize", cxa_finalize as usize),
            ("__stack_chk_fail", stack_chk_fail as usize),
            ("__isfinite", isfinite as usize),
            ("__signbit", signbit as usize),
            ("atof", atof as usize),
            ("strtof", strtof as usize),
            ("__aeabi_memclr", memclr as usize),
            ("__aeabi_memclr4", memclr as usize),
            ("__aeabi_memclr8", memclr as usize),
            ("__aeabi_memcpy", libc::memcpy as usize),
            ("__aeabi_memcpy4", libc::memcpy as usize),
            ("__aeabi_memcpy8", libc::memcpy as usize),
            ("__aeabi_memmove", libc::memmove as usize),
            ("__aeabi_memmove4", libc::memmove as usize),
            ("__aeabi_memmove8", libc::memmove as usize),
            ("__aeabi_memset", aeabi_memset as usize),
            ("__aeabi_memset4", aeabi_memset as usize),
            ("__aeabi_memset8", aeabi_memset as usize),
            ("acosf", acosf as usize),
            ("asinf", asinf as usize),
            ("atan2f", atan2f as usize),
            ("atanf", atanf as usize),
            ("ceilf", ceilf as usize),
            ("cos", cos as usize),
            ("cosf", cosf as usize),
            ("exp2", exp2 as usize),
            ("exp2f", exp2f as usize),
            ("exp", exp as usize),
            ("floor", floor as usize),
            ("floorf", floorf as usize),
            ("fmodf", fmodf as usize),
            ("ldexpf", ldexpf as usize),
            ("log10f", log10f as usize),
            ("log", log as usize),
            ("logf", logf as usize),
            ("modf", modf as usize),
            ("modff", modff as usize),
            ("pow", pow as usize),
            ("powf", powf as usize),
            ("sin", sin as usize),
            ("sinf", sinf as usize),
            ("tan", tan as usize),
            ("tanf", tanf as usize),
        ];
        shims.extend(aeabi_helpers());
        shims
    }
}

impl BindingProvider for Runtime {
    fn name(&self) -> &'static str {
        "runtime"
    }

    fn register(&self, table: &mut BindingTable) -> Result<()> {
        for (name, addr) in Self::natives() {
            table.native(name, addr)?;
        }
        for (name, addr) in Self::shims() {
            table.shim(name, addr)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn math_travels_as_bits() {
        assert_eq!(f32::from_bits(sinf(0f32.to_bits())), 0.0);
        assert_eq!(f64::from_bits(pow(2f64.to_bits(), 10f64.to_bits())), 1024.0);
        assert_eq!(f32::from_bits(fmodf(7.5f32.to_bits(), 2f32.to_bits())), 1.5);
        assert_eq!(f32::from_bits(ldexpf(3f32.to_bits(), 2)), 12.0);
    }

    #[test]
    fn modf_splits_integer_and_fraction() {
        let mut int_part = 0u64;
        let frac = unsafe { modf((-2.25f64).to_bits(), &mut int_part) };
        assert_eq!(f64::from_bits(frac), -0.25);
        assert_eq!(f64::from_bits(int_part), -2.0);
    }

    #[test]
    fn classification_helpers() {
        assert_eq!(isfinite(f64::INFINITY.to_bits()), 0);
        assert_eq!(isfinite(1.0f64.to_bits()), 1);
        assert_eq!(signbit((-0.0f64).to_bits()), 1);
    }

    #[test]
    fn destructors_run_in_reverse() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static ORDER: AtomicUsize = AtomicUsize::new(0);
        unsafe extern "C" fn record(arg: *mut c_void) {
            let digit = arg as usize;
            ORDER.store(ORDER.load(Ordering::SeqCst) * 10 + digit, Ordering::SeqCst);
        }
        unsafe {
            cxa_atexit(record, 1 as *mut c_void, std::ptr::null_mut());
            cxa_atexit(record, 2 as *mut c_void, std::ptr::null_mut());
            cxa_finalize(std::ptr::null_mut());
        }
        assert_eq!(ORDER.load(Ordering::SeqCst), 21);
    }

    #[test]
    fn registers_without_duplicates() {
        let mut table = BindingTable::new(crate::stubs::stub_set());
        table.register(&Runtime).unwrap();
        assert!(table.get("sinf").is_some());
        assert!(table.get("__aeabi_uidiv").is_some());
    }
}
