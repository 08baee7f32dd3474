//! Embedded prelude
//!
//! The basic runtime class hierarchy and the optional coroutine extension
//! are embedded at compile time, so the compiler binary is self-contained.
//! The driver parses these before any user source so the required classes
//! are always present.

/// The basic class hierarchy (`Any`, `IO`, `Unit`, `Int`, `Boolean`,
/// `String`, `Symbol`, `ArrayAny`).
pub const BASIC: &str = include_str!("../prelude/basic.cool");

/// Cooperative coroutines (`Runnable`, `Coroutine`, `Channel`); only parsed
/// when compiling with coroutine support. The analyzer additionally
/// generates a `runtimeMain` bootstrap class whose `run` constructs the
/// user's `Main`.
pub const COROUTINE: &str = include_str!("../prelude/coroutine.cool");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_defines_required_classes() {
        for name in ["class Any()", "class Unit()", "class Int()", "class Boolean()"] {
            assert!(BASIC.contains(name), "prelude must define {name}");
        }
    }

    #[test]
    fn test_coroutine_defines_csp_classes() {
        assert!(COROUTINE.contains("class Runnable()"));
        assert!(COROUTINE.contains("class Coroutine("));
        assert!(COROUTINE.contains("class Channel()"));
    }
}
