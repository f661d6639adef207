/// Aborts the process if `cond` is false, for invariant violations that
/// should never happen rather than conditions a caller can recover from.
/// Mirrors the original's treatment of `guarantee()`/`rassert()` failures as
/// fatal rather than as a `Result` to propagate.
#[macro_export]
macro_rules! guarantee {
    ($cond:expr $(,)?) => {
        $crate::guarantee!($cond, "guarantee failed: {}", stringify!($cond))
    };
    ($cond:expr, $($arg:tt)+) => {
        if !($cond) {
            panic!($($arg)+);
        }
    };
}

/// Alias for [`guarantee!`], kept distinct for call sites that read more
/// naturally as an assertion of an expected-always-true condition.
#[macro_export]
macro_rules! rassert {
    ($($arg:tt)+) => {
        $crate::guarantee!($($arg)+)
    };
}

#[cfg(test)]
mod test {
    #[test]
    fn guarantee_passes_on_true() {
        guarantee!(1 + 1 == 2);
    }

    #[test]
    #[should_panic(expected = "must be positive")]
    fn guarantee_panics_on_false() {
        let n = -1;
        guarantee!(n > 0, "must be positive");
    }
}
