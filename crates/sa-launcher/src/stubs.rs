//! The trivial functions neutralized imports and hooks point at.
use so_loader::binding::StubSet;

pub extern "C" fn ret0() -> i32 {
    0
}

pub extern "C" fn ret1() -> i32 {
    1
}

pub fn stub_set() -> StubSet {
    StubSet::new(ret0 as usize, ret1 as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use so_loader::binding::StubKind;

    #[test]
    fn stubs_return_their_constant() {
        assert_eq!(ret0(), 0);
        assert_eq!(ret1(), 1);
        let stubs = stub_set();
        assert_ne!(stubs.address(StubKind::Ret0), stubs.address(StubKind::Ret1));
    }
}
