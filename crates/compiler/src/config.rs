//! Compiler configuration
//!
//! Carries the driver flags into the analysis and code-generation phases.
//! Every optimization defaults to on; each can be disabled independently so
//! that code generation falls back to the universal code shapes.

/// Configuration for a single compilation.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Repeat the program this many times by wrapping `Main` in a counted
    /// loop. Values below 1 are clamped to 1 (no wrapping).
    pub benchmark: u32,
    /// Include the coroutine prelude and start `Main` inside a coroutine.
    pub coroutine: bool,

    /// Unboxed integer code shape for arithmetic and Int locals.
    pub opt_int: bool,
    /// Compare-and-branch shape for boolean conditions.
    pub opt_jump: bool,
    /// Dead-result elimination in statement positions, and removal of
    /// `var` binders that are never referenced.
    pub opt_unused: bool,
    /// Static dispatch of dynamic calls whose target is never overridden.
    pub opt_dispatch: bool,
    /// Integer constant folding.
    pub opt_fold: bool,
    /// Inlining of trivially-constant calls (literal `.length()`).
    pub opt_inline: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            benchmark: 1,
            coroutine: false,
            opt_int: true,
            opt_jump: true,
            opt_unused: true,
            opt_dispatch: true,
            opt_fold: true,
            opt_inline: true,
        }
    }
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    /// Disable every optimization; code generation uses only the universal
    /// fallback shapes. Used by tests to pin the unoptimized output.
    pub fn without_optimizations() -> Self {
        CompilerConfig {
            opt_int: false,
            opt_jump: false,
            opt_unused: false,
            opt_dispatch: false,
            opt_fold: false,
            opt_inline: false,
            ..CompilerConfig::default()
        }
    }

    pub fn with_benchmark(mut self, n: u32) -> Self {
        self.benchmark = n.max(1);
        self
    }

    pub fn with_coroutine(mut self, enabled: bool) -> Self {
        self.coroutine = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_enable_all_optimizations() {
        let config = CompilerConfig::default();
        assert_eq!(config.benchmark, 1);
        assert!(!config.coroutine);
        assert!(config.opt_int && config.opt_jump && config.opt_unused);
        assert!(config.opt_dispatch && config.opt_fold && config.opt_inline);
    }

    #[test]
    fn test_benchmark_clamps_to_one() {
        let config = CompilerConfig::new().with_benchmark(0);
        assert_eq!(config.benchmark, 1);
    }

    #[test]
    fn test_without_optimizations() {
        let config = CompilerConfig::without_optimizations();
        assert!(!config.opt_int && !config.opt_jump && !config.opt_unused);
        assert!(!config.opt_dispatch && !config.opt_fold && !config.opt_inline);
        assert_eq!(config.benchmark, 1);
    }
}
