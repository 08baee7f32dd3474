//! Method and entry-point emission
//!
//! One function per non-native method, named `ClassName.MethodName`. The
//! caller has pushed `this` and then the arguments left to right; the
//! callee establishes a frame with room for its temporaries, produces its
//! result in `%eax`, releases the references it received, and pops its
//! arguments with `ret`. When compiling with coroutines every prologue
//! calls `runtime.morestack`, the scheduler's yield point, so statically
//! dispatched calls yield exactly like table dispatch.

use super::frame::{count_vars, Frame};
use super::{CodeGen, CodeGenError};
use crate::ast::{Feature, Program};
use std::fmt::Write as _;

impl CodeGen {
    pub(super) fn emit_methods(&mut self, program: &Program) -> Result<(), CodeGenError> {
        for &c in &program.ordered {
            for fi in 0..program.class(c).features.len() {
                let Feature::Method(method) = &program.class(c).features[fi] else {
                    continue;
                };
                if method.is_native() {
                    continue;
                }
                self.emit_method(program, c, fi)?;
            }
        }
        self.emit_entry(program)
    }

    fn emit_method(
        &mut self,
        program: &Program,
        c: crate::ast::ClassId,
        fi: usize,
    ) -> Result<(), CodeGenError> {
        let Feature::Method(method) = &program.class(c).features[fi] else {
            unreachable!("emit_method called on a non-method feature");
        };
        let class_name = self.class_name(program, c);
        let fn_sym = format!("{class_name}.{}", method.name.name);
        let argc = method.args.len();
        let vars = count_vars(&method.body);
        self.frame = Frame::new(fn_sym.clone(), argc, vars);

        writeln!(self.out)?;
        writeln!(self.out, ".globl {fn_sym}")?;
        writeln!(self.out, "{fn_sym}:")?;
        writeln!(self.out, "\tenter ${}, $0", vars * 4)?;
        if self.config.coroutine {
            writeln!(self.out, "\tcall runtime.morestack")?;
        }

        self.gen_value(program, &method.body)?;

        // The caller transferred ownership of this and every argument;
        // release them without disturbing the result in %eax.
        for index in 0..argc {
            let offset = self.frame.arg_offset(index);
            self.release_slot(offset)?;
        }
        let this = self.frame.this_offset;
        self.release_slot(this)?;

        writeln!(self.out, "\tleave")?;
        writeln!(self.out, "\tret ${}", (argc + 1) * 4)?;
        Ok(())
    }

    /// The runtime's entry symbol: evaluates the generated entry
    /// expression (`new Main()`, possibly benchmark-wrapped or coroutine-
    /// wrapped) for effect and returns 0.
    fn emit_entry(&mut self, program: &Program) -> Result<(), CodeGenError> {
        let entry = program
            .main
            .as_ref()
            .ok_or_else(|| CodeGenError::Logic("no entry expression synthesized".into()))?;
        let vars = count_vars(entry);
        self.frame = Frame::new("main".to_string(), 0, vars);

        writeln!(self.out)?;
        writeln!(self.out, ".globl main")?;
        writeln!(self.out, "main:")?;
        writeln!(self.out, "\tenter ${}, $0", vars * 4)?;
        self.gen_unused(program, entry)?;
        writeln!(self.out, "\tmovl $0, %eax")?;
        writeln!(self.out, "\tleave")?;
        writeln!(self.out, "\tret")?;
        Ok(())
    }
}
