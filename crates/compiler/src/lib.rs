//! Cool compiler library
//!
//! Whole-program compilation from Cool source to 32-bit x86 assembly
//! (AT&T syntax, for the GNU assembler). The embedded prelude is parsed
//! first, then every user source file, all into one [`Program`]; semantic
//! analysis, the optimizer, and code generation run over the combined
//! program and a single `.s` file comes out. The emitted file links
//! against the handwritten runtime (`libcool.a`, or the scheduler-enabled
//! `libcoolsched.a` for coroutine builds).
//!
//! ```rust,ignore
//! use coolc::{CompilerConfig, compile_files};
//!
//! let config = CompilerConfig::default();
//! compile_files(&[PathBuf::from("hello.cool")], Path::new("hello.s"), &config)?;
//! ```

pub mod ast;
pub mod codegen;
pub mod config;
pub mod diag;
pub mod lexer;
pub mod opt;
pub mod parser;
pub mod prelude;
pub mod semant;

pub use ast::Program;
pub use codegen::{CodeGen, CodeGenError};
pub use config::CompilerConfig;
pub use diag::{Diagnostic, Diagnostics};
pub use parser::parse_file;

use std::fs;
use std::path::{Path, PathBuf};

/// Failure of a whole compilation.
#[derive(Debug)]
pub enum CompileError {
    /// Reading a source file or writing the output failed.
    Io(String),
    /// Syntax or semantic errors in the program.
    Source(Vec<Diagnostic>),
    /// An internal inconsistency surfaced during code generation.
    Internal(String),
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::Io(message) => write!(f, "{}", message),
            CompileError::Source(diags) => {
                for (i, diag) in diags.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}", diag)?;
                }
                Ok(())
            }
            CompileError::Internal(message) => write!(f, "internal error: {}", message),
        }
    }
}

impl std::error::Error for CompileError {}

/// Compile the given source files into one assembly file at `output`.
pub fn compile_files(
    inputs: &[PathBuf],
    output: &Path,
    config: &CompilerConfig,
) -> Result<(), CompileError> {
    let mut sources = Vec::with_capacity(inputs.len());
    for path in inputs {
        let text = fs::read_to_string(path)
            .map_err(|e| CompileError::Io(format!("{}: {}", path.display(), e)))?;
        sources.push((path.clone(), text));
    }

    let asm = compile_sources(&sources, config)?;

    fs::write(output, asm)
        .map_err(|e| CompileError::Io(format!("{}: {}", output.display(), e)))?;
    tracing::debug!(output = %output.display(), "assembly written");
    Ok(())
}

/// Compile a single in-memory source (the test surface).
pub fn compile_to_asm(source: &str, config: &CompilerConfig) -> Result<String, CompileError> {
    compile_sources(&[(PathBuf::from("input.cool"), source.to_string())], config)
}

fn compile_sources(
    sources: &[(PathBuf, String)],
    config: &CompilerConfig,
) -> Result<String, CompileError> {
    let mut program = Program::new();

    parse_file(
        prelude::BASIC,
        Path::new("basic.cool"),
        true,
        &mut program,
    )
    .map_err(|e| CompileError::Internal(format!("prelude failed to parse: {}", e)))?;
    if config.coroutine {
        parse_file(
            prelude::COROUTINE,
            Path::new("coroutine.cool"),
            true,
            &mut program,
        )
        .map_err(|e| CompileError::Internal(format!("prelude failed to parse: {}", e)))?;
    }

    // Parse every file even after an error so all of them get reported.
    let mut parse_errors = Vec::new();
    for (path, text) in sources {
        if let Err(diag) = parse_file(text, path, false, &mut program) {
            parse_errors.push(diag);
        }
    }
    if !parse_errors.is_empty() {
        return Err(CompileError::Source(parse_errors));
    }
    tracing::debug!(classes = program.declared.len(), "parsed program");

    semant::analyze(&mut program, config).map_err(CompileError::Source)?;
    tracing::debug!(ordered = program.ordered.len(), "semantic analysis passed");

    opt::optimize(&mut program, config);

    codegen::codegen_program(&program, config)
        .map_err(|e| CompileError::Internal(e.to_string()))
}

/// Default output path: the first source with `.cool` replaced by `.s`
/// (or `.s` appended when the extension differs).
pub fn default_output_path(first_input: &Path) -> PathBuf {
    if first_input.extension().is_some_and(|ext| ext == "cool") {
        first_input.with_extension("s")
    } else {
        let mut name = first_input.as_os_str().to_os_string();
        name.push(".s");
        PathBuf::from(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_to_asm_end_to_end() {
        let asm = compile_to_asm(
            "class Main() { { new IO().out(\"hi\\n\") } }",
            &CompilerConfig::default(),
        )
        .expect("hello world compiles");
        assert!(asm.contains(".text"));
        assert!(asm.contains("main:"));
        assert!(asm.contains("Main.Main:"));
    }

    #[test]
    fn test_semantic_errors_are_source_errors() {
        let err = compile_to_asm("class Main() { { ghost } }", &CompilerConfig::default())
            .unwrap_err();
        match err {
            CompileError::Source(diags) => {
                assert!(diags.iter().any(|d| d.message.contains("ghost")));
            }
            other => panic!("expected source error, got {:?}", other),
        }
    }

    #[test]
    fn test_syntax_error_carries_file_name() {
        let err = compile_to_asm("class 42", &CompilerConfig::default()).unwrap_err();
        match err {
            CompileError::Source(diags) => {
                assert_eq!(diags.len(), 1);
                assert!(diags[0].to_string().starts_with("input.cool:"));
            }
            other => panic!("expected source error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_main_reported() {
        let err =
            compile_to_asm("class Helper() { }", &CompilerConfig::default()).unwrap_err();
        assert!(err.to_string().contains("missing required class: Main"));
    }

    #[test]
    fn test_compile_files_writes_assembly() {
        let dir = tempfile::tempdir().unwrap();
        let source_path = dir.path().join("hello.cool");
        fs::write(&source_path, "class Main() { { new IO().out(\"ok\") } }").unwrap();
        let output = default_output_path(&source_path);

        compile_files(
            &[source_path],
            &output,
            &CompilerConfig::default(),
        )
        .expect("compilation succeeds");

        assert_eq!(output.extension().unwrap(), "s");
        let asm = fs::read_to_string(output).unwrap();
        assert!(asm.contains(".globl main"));
    }

    #[test]
    fn test_compile_files_collects_errors_across_files() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("a.cool");
        let bad = dir.path().join("b.cool");
        fs::write(&good, "class Main() { }").unwrap();
        fs::write(&bad, "class {").unwrap();
        let out = dir.path().join("out.s");

        let err = compile_files(
            &[good, bad.clone()],
            &out,
            &CompilerConfig::default(),
        )
        .unwrap_err();
        match err {
            CompileError::Source(diags) => {
                assert!(diags[0].file.ends_with("b.cool"));
            }
            other => panic!("expected source error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_input_is_io_error() {
        let err = compile_files(
            &[PathBuf::from("/nonexistent/x.cool")],
            Path::new("/tmp/x.s"),
            &CompilerConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CompileError::Io(_)));
    }

    #[test]
    fn test_default_output_path() {
        assert_eq!(
            default_output_path(Path::new("dir/prog.cool")),
            PathBuf::from("dir/prog.s")
        );
        assert_eq!(
            default_output_path(Path::new("prog.src")),
            PathBuf::from("prog.src.s")
        );
    }

    #[test]
    fn test_multi_file_program_links_classes() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("lib.cool");
        let main = dir.path().join("main.cool");
        fs::write(&lib, "class Greeter() { def hi() : String = \"hi\"; }").unwrap();
        fs::write(&main, "class Main() { { new IO().out(new Greeter().hi()) } }").unwrap();
        let out = dir.path().join("out.s");

        compile_files(&[lib, main], &out, &CompilerConfig::default())
            .expect("classes resolve across files");
        let asm = fs::read_to_string(out).unwrap();
        assert!(asm.contains("Greeter.hi:"));
    }

    #[test]
    fn test_coroutine_build_compiles() {
        let asm = compile_to_asm(
            "class Main() { { new IO().out(\"co\") } }",
            &CompilerConfig::new().with_coroutine(true),
        )
        .expect("coroutine build compiles");
        assert!(asm.contains("call runtime.morestack"));
        assert!(asm.contains("Channel.send"));
    }
}
