//! CodeGen state and shared emission helpers
//!
//! [`CodeGen`] owns the output buffer, the literal pool, and the current
//! method's [`Frame`]. The reference-counting helpers here are emitted
//! inline around every live reference:
//!
//! - `gen_ref`: bump the refcount of a non-null object unless its count is
//!   negative (the sentinel marking statically allocated roots).
//! - `gen_release`: drop the count of a non-null, non-static object; the
//!   runtime reclaims when a count reaches zero.
//!
//! The invariant is that every pointer produced by the value shape is owned
//! by its consumer: temporaries own what their slot holds, stack arguments
//! transfer ownership to the callee, and expressions leave the surrounding
//! slots' counts unchanged.

use super::frame::Frame;
use super::literals::Pool;
use super::CodeGenError;
use crate::ast::{ClassId, Ident, ObjectRef, Program};
use crate::config::CompilerConfig;
use std::fmt::Write as _;

pub struct CodeGen {
    pub(super) config: CompilerConfig,
    pub(super) pool: Pool,
    pub(super) out: String,
    pub(super) frame: Frame,
    pub(super) int_class: Option<ClassId>,
    pub(super) boolean_class: Option<ClassId>,
    pub(super) unit_class: Option<ClassId>,
}

impl CodeGen {
    pub(super) fn new(config: CompilerConfig) -> Self {
        CodeGen {
            config,
            pool: Pool::default(),
            out: String::new(),
            frame: Frame::default(),
            int_class: None,
            boolean_class: None,
            unit_class: None,
        }
    }

    pub(super) fn class_name<'p>(&self, program: &'p Program, id: ClassId) -> &'p str {
        &program.class(id).name.name
    }

    /// `test reg, reg; jz` — shared shape of the null guards.
    fn null_guard(&mut self, reg: &str, target: &str) -> Result<(), CodeGenError> {
        writeln!(self.out, "\ttest {reg}, {reg}")?;
        writeln!(self.out, "\tjz {target}")?;
        Ok(())
    }

    /// Increment the refcount of the object in `reg`, skipping null and
    /// static roots (negative count).
    pub(super) fn gen_ref(&mut self, reg: &str) -> Result<(), CodeGenError> {
        let skip = self.frame.label();
        self.null_guard(reg, &skip)?;
        writeln!(self.out, "\tcmpl $0, gc_offset({reg})")?;
        writeln!(self.out, "\tjl {skip}")?;
        writeln!(self.out, "\tincl gc_offset({reg})")?;
        writeln!(self.out, "{skip}:")?;
        Ok(())
    }

    /// Decrement the refcount of the object in `reg`, skipping null and
    /// static roots. Clobbers only flags.
    pub(super) fn gen_release(&mut self, reg: &str) -> Result<(), CodeGenError> {
        let skip = self.frame.label();
        self.null_guard(reg, &skip)?;
        writeln!(self.out, "\tcmpl $0, gc_offset({reg})")?;
        writeln!(self.out, "\tjle {skip}")?;
        writeln!(self.out, "\tdecl gc_offset({reg})")?;
        writeln!(self.out, "{skip}:")?;
        Ok(())
    }

    /// Release the owned reference held in a stack slot, preserving `%eax`.
    pub(super) fn release_slot(&mut self, offset: i32) -> Result<(), CodeGenError> {
        writeln!(self.out, "\tmovl {offset}(%ebp), %ecx")?;
        self.gen_release("%ecx")
    }

    /// `movl $size_of_T, %eax; movl $tag_of_T, %ebx; call gc_alloc` with a
    /// literal size expression.
    pub(super) fn gen_alloc_raw(&mut self, size: &str, tag: &str) -> Result<(), CodeGenError> {
        writeln!(self.out, "\tmovl ${size}, %eax")?;
        writeln!(self.out, "\tmovl ${tag}, %ebx")?;
        writeln!(self.out, "\tcall gc_alloc")?;
        Ok(())
    }

    /// Allocate a boxed Int; the new object lands in `%eax`.
    pub(super) fn gen_alloc_int(&mut self) -> Result<(), CodeGenError> {
        self.gen_alloc_raw("(size_of_Int + 4)", "tag_of_Int")
    }

    /// Resolved storage of an identifier occurrence.
    pub(super) fn object_of(&self, name: &Ident) -> Result<ObjectRef, CodeGenError> {
        name.object
            .ok_or_else(|| CodeGenError::Logic(format!("unresolved identifier {}", name.name)))
    }

    /// `%ebp` offset of a stack-resident binding.
    pub(super) fn stack_offset(&self, obj: &ObjectRef) -> Result<i32, CodeGenError> {
        match obj {
            ObjectRef::Formal { index } => Ok(self.frame.arg_offset(*index)),
            ObjectRef::Local { binding, .. } | ObjectRef::MatchBinder { binding } => {
                self.frame.binding_offset(*binding)
            }
            ObjectRef::Attribute { .. } => Err(CodeGenError::Logic(
                "attribute storage has no stack offset".to_string(),
            )),
        }
    }

    /// Load a named value into `%eax` as an owned boxed pointer.
    pub(super) fn load_object(
        &mut self,
        program: &Program,
        name: &Ident,
    ) -> Result<(), CodeGenError> {
        let obj = self.object_of(name)?;
        match obj {
            ObjectRef::Attribute { class } => {
                let this = self.frame.this_offset;
                let owner = self.class_name(program, class).to_string();
                writeln!(self.out, "\tmovl {this}(%ebp), %edx")?;
                writeln!(self.out, "\tmovl offset_of_{owner}.{}(%edx), %eax", name.name)?;
                self.gen_ref("%eax")
            }
            ObjectRef::Local { raw_int: true, .. } => {
                // Box the raw integer: allocate first, then read the slot.
                let offset = self.stack_offset(&obj)?;
                self.gen_alloc_int()?;
                writeln!(self.out, "\tmovl {offset}(%ebp), %ebx")?;
                writeln!(self.out, "\tmovl %ebx, offset_of_Int.value(%eax)")?;
                Ok(())
            }
            _ => {
                let offset = self.stack_offset(&obj)?;
                writeln!(self.out, "\tmovl {offset}(%ebp), %eax")?;
                self.gen_ref("%eax")
            }
        }
    }

    /// Store `%eax` into a named location, consuming ownership of the
    /// value. Stack slots release their old contents; heap slots are not
    /// counted, so the transferred reference is dropped instead.
    pub(super) fn store_object(
        &mut self,
        program: &Program,
        name: &Ident,
    ) -> Result<(), CodeGenError> {
        let obj = self.object_of(name)?;
        match obj {
            ObjectRef::Attribute { class } => {
                let this = self.frame.this_offset;
                let owner = self.class_name(program, class).to_string();
                writeln!(self.out, "\tmovl {this}(%ebp), %edx")?;
                writeln!(self.out, "\tmovl %eax, offset_of_{owner}.{}(%edx)", name.name)?;
                self.gen_release("%eax")
            }
            ObjectRef::Local { raw_int: true, .. } => {
                let offset = self.stack_offset(&obj)?;
                writeln!(self.out, "\tmovl %eax, {offset}(%ebp)")?;
                Ok(())
            }
            _ => {
                let offset = self.stack_offset(&obj)?;
                self.release_slot(offset)?;
                writeln!(self.out, "\tmovl %eax, {offset}(%ebp)")?;
                Ok(())
            }
        }
    }
}
