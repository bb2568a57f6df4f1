//! Threads, mutexes and semaphores.
//!
//! The module's `pthread_mutex_t` and `sem_t` are single words. The shims keep
//! a pointer to a host object in that word, allocated on first use.
use so_loader::Result;
use so_loader::binding::{BindingProvider, BindingTable};
use std::ffi::{CStr, c_char, c_int, c_void};
use std::sync::atomic::{AtomicI32, Ordering};

/// Stack size of engine threads.
pub const THREAD_STACK_SIZE: usize = 128 * 1024;
/// Size of the handle `OS_ThreadLaunch` returns.
const HANDLE_SIZE: usize = 0x48;
/// Handle byte that says the thread is running.
const HANDLE_RUNNING: usize = 0x41;
/// Handle word holding the thread id.
const HANDLE_ID: usize = 0x24;

/// Scheduling parameters of an engine thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThreadParams {
    pub priority: u32,
    pub affinity: u32,
}

impl ThreadParams {
    /// Maps the engine's priority class and cpu number.
    pub const fn from_engine(cpu: i32, priority: i32) -> Self {
        let priority = match priority {
            0 => 127,
            1 => 106,
            2 => 85,
            3 => 64,
            _ => 0x1000_0100,
        };
        let affinity = match cpu {
            1 => 0x10000,
            2 => 0x20000,
            3 | 4 => 0x40000,
            _ => 0,
        };
        Self { priority, affinity }
    }

    /// The host cpu the affinity mask names, if any.
    pub fn core(&self) -> Option<usize> {
        (self.affinity != 0).then(|| (self.affinity >> 16).trailing_zeros() as usize)
    }
}

type StartRoutine = extern "C" fn() -> c_int;
type ThreadEntry = extern "C" fn(*mut c_void) -> u32;

/// Only used for the engine's main event thread: runs the start routine
/// stored at `arg + 4` on the calling thread.
unsafe extern "C" fn pthread_create(_thread: *mut c_void, _attr: *mut c_void, _start: *mut c_void, arg: *mut u8) -> c_int {
    let routine = unsafe { arg.add(4).cast::<usize>().read_unaligned() };
    // SAFETY: the engine stores its start routine there.
    let routine: StartRoutine = unsafe { std::mem::transmute::<usize, StartRoutine>(routine) };
    routine()
}

/// A recursive host mutex.
unsafe fn new_mutex() -> *mut libc::pthread_mutex_t {
    unsafe {
        let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
        libc::pthread_mutexattr_init(&mut attr);
        libc::pthread_mutexattr_settype(&mut attr, libc::PTHREAD_MUTEX_RECURSIVE);
        let mutex = Box::into_raw(Box::new(std::mem::zeroed::<libc::pthread_mutex_t>()));
        libc::pthread_mutex_init(mutex, &attr);
        libc::pthread_mutexattr_destroy(&mut attr);
        mutex
    }
}

unsafe extern "C" fn mutex_init(slot: *mut *mut libc::pthread_mutex_t) -> c_int {
    unsafe { *slot = new_mutex() };
    0
}

unsafe extern "C" fn mutex_destroy(slot: *mut *mut libc::pthread_mutex_t) -> c_int {
    unsafe {
        let mutex = std::mem::replace(&mut *slot, std::ptr::null_mut());
        if !mutex.is_null() {
            libc::pthread_mutex_destroy(mutex);
            drop(Box::from_raw(mutex));
        }
    }
    0
}

unsafe extern "C" fn mutex_lock(slot: *mut *mut libc::pthread_mutex_t) -> c_int {
    unsafe {
        if (*slot).is_null() {
            *slot = new_mutex();
        }
        libc::pthread_mutex_lock(*slot)
    }
}

unsafe extern "C" fn mutex_unlock(slot: *mut *mut libc::pthread_mutex_t) -> c_int {
    unsafe {
        if (*slot).is_null() {
            return -1;
        }
        libc::pthread_mutex_unlock(*slot)
    }
}

unsafe extern "C" fn sem_init(slot: *mut *mut libc::sem_t, _shared: c_int, value: u32) -> c_int {
    unsafe {
        let sem = Box::into_raw(Box::new(std::mem::zeroed::<libc::sem_t>()));
        if libc::sem_init(sem, 0, value) != 0 {
            drop(Box::from_raw(sem));
            return -1;
        }
        *slot = sem;
    }
    0
}

unsafe extern "C" fn sem_post(slot: *mut *mut libc::sem_t) -> c_int {
    unsafe { libc::sem_post(*slot) }
}

unsafe extern "C" fn sem_wait(slot: *mut *mut libc::sem_t) -> c_int {
    unsafe { libc::sem_wait(*slot) }
}

unsafe extern "C" fn sem_destroy(slot: *mut *mut libc::sem_t) -> c_int {
    unsafe {
        let sem = std::mem::replace(&mut *slot, std::ptr::null_mut());
        if sem.is_null() {
            return -1;
        }
        libc::sem_destroy(sem);
        drop(Box::from_raw(sem));
    }
    0
}

static NEXT_THREAD_ID: AtomicI32 = AtomicI32::new(1);

#[cfg(any(target_os = "linux", target_os = "android"))]
fn pin_to(core: usize) {
    // SAFETY: the set is fully initialized before use.
    let res = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(core, &mut set);
        libc::sched_setaffinity(0, size_of::<libc::cpu_set_t>(), &set)
    };
    if res != 0 {
        log::warn!("cannot pin thread to cpu {core}");
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn pin_to(_core: usize) {}

/// `OS_ThreadLaunch`: starts `func(arg)` on a named host thread and returns
/// a handle the engine polls.
///
/// # Safety
/// `func` must be callable with `arg` on another thread; `name` is null or a C string.
pub unsafe extern "C" fn os_thread_launch(
    func: ThreadEntry,
    arg: *mut c_void,
    cpu: c_int,
    name: *const c_char,
    _unused: c_int,
    priority: c_int,
) -> *mut c_void {
    let name = if name.is_null() {
        String::from("engine")
    } else {
        unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned()
    };
    let params = ThreadParams::from_engine(cpu, priority);
    let id = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
    let handle = Box::into_raw(Box::new([0u8; HANDLE_SIZE])).cast::<u8>();
    unsafe { handle.add(HANDLE_ID).cast::<i32>().write_unaligned(id) };
    log::debug!(
        "thread {name}: priority {:#x}, affinity {:#x}",
        params.priority,
        params.affinity
    );

    let (handle_addr, arg_addr) = (handle as usize, arg as usize);
    let spawned = std::thread::Builder::new()
        .name(name.clone())
        .stack_size(THREAD_STACK_SIZE)
        .spawn(move || {
            if let Some(core) = params.core() {
                pin_to(core);
            }
            // SAFETY: the handle is leaked to the engine and never freed.
            unsafe { *(handle_addr as *mut u8).add(HANDLE_RUNNING) = 1 };
            func(arg_addr as *mut c_void);
        });
    match spawned {
        Ok(_) => handle.cast(),
        Err(err) => {
            log::error!("cannot start thread {name}: {err}");
            drop(unsafe { Box::from_raw(handle.cast::<[u8; HANDLE_SIZE]>()) });
            std::ptr::null_mut()
        }
    }
}

/// Engine threads and their synchronization.
pub struct Threading;

impl BindingProvider for Threading {
    fn name(&self) -> &'static str {
        "threading"
    }

    fn register(&self, table: &mut BindingTable) -> Result<()> {
        table.shim("pthread_create", pthread_create as usize)?;
        table.shim("pthread_mutex_init", mutex_init as usize)?;
        table.shim("pthread_mutex_destroy", mutex_destroy as usize)?;
        table.shim("pthread_mutex_lock", mutex_lock as usize)?;
        table.shim("pthread_mutex_unlock", mutex_unlock as usize)?;
        table.shim("sem_init", sem_init as usize)?;
        table.shim("sem_post", sem_post as usize)?;
        table.shim("sem_wait", sem_wait as usize)?;
        table.shim("sem_destroy", sem_destroy as usize)
    }
}
