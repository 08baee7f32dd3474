//! Per-expression code shapes
//!
//! Every expression supports the *value* shape: produce an owned,
//! GC-managed pointer in `%eax`. Depending on context and the enabled
//! optimizations, a producer may instead request:
//!
//! - *raw-int*: an unboxed 32-bit integer in `%eax` (arithmetic, integer
//!   literals, raw locals, and the control-flow forms that forward it);
//! - *jump*: branch to one of two labels instead of materializing a
//!   boolean;
//! - *unused*: evaluate for side effects only, releasing any result.
//!
//! Fallbacks are universal, so any expression can satisfy any shape: the
//! raw-int fallback unboxes a produced value, the jump fallback compares a
//! produced boolean against `boolean_false`, and the unused fallback
//! releases a produced value. When an optimization flag is off the emitter
//! always takes the fallback.

use super::{CodeGen, CodeGenError};
use crate::ast::{BinaryOp, Case, Expr, Ident, Program};
use std::fmt::Write as _;

/// What a `match` should do with each arm's result.
#[derive(Clone, Copy)]
enum MatchSink<'a> {
    Value,
    Raw,
    Unused,
    Jump {
        false_label: &'a str,
        true_label: &'a str,
    },
}

/// How a call transfers control.
enum Dispatch {
    /// Direct call to the resolved method.
    Static,
    /// Receiver-driven: through the method table unless devirtualizable.
    Dynamic { has_override: bool },
}

impl CodeGen {
    /// True if the expression has a specialized raw-int emission.
    fn can_raw(&self, expr: &Expr) -> bool {
        if !self.config.opt_int {
            return false;
        }
        match expr {
            Expr::Int { .. }
            | Expr::Negative { .. }
            | Expr::If { .. }
            | Expr::Match { .. }
            | Expr::Chain { .. }
            | Expr::Var { .. } => true,
            Expr::Binary { op, .. } => !op.is_comparison(),
            Expr::NameRef { name } => name.object.is_some_and(|obj| obj.raw_int()),
            _ => false,
        }
    }

    /// True if the expression has a specialized compare-and-branch form.
    fn can_jump(&self, expr: &Expr) -> bool {
        if !self.config.opt_jump {
            return false;
        }
        match expr {
            Expr::Not { .. }
            | Expr::Bool { .. }
            | Expr::If { .. }
            | Expr::Match { .. }
            | Expr::Chain { .. } => true,
            Expr::Binary { op, .. } => op.is_comparison(),
            _ => false,
        }
    }

    // ----- value shape ----------------------------------------------------

    pub(super) fn gen_value(&mut self, p: &Program, expr: &Expr) -> Result<(), CodeGenError> {
        match expr {
            Expr::Int { value, .. } => {
                let id = self
                    .pool
                    .int_id(*value)
                    .ok_or_else(|| CodeGenError::Logic("integer literal not pooled".into()))?;
                writeln!(self.out, "\tleal int_lit_{id}, %eax")?;
                Ok(())
            }
            Expr::Str { value, .. } => {
                let id = self
                    .pool
                    .str_id(value)
                    .ok_or_else(|| CodeGenError::Logic("string literal not pooled".into()))?;
                writeln!(self.out, "\tleal string_lit_{id}, %eax")?;
                Ok(())
            }
            Expr::Bool { value, .. } => {
                let sym = if *value { "boolean_true" } else { "boolean_false" };
                writeln!(self.out, "\tleal {sym}, %eax")?;
                Ok(())
            }
            Expr::Unit { .. } => {
                writeln!(self.out, "\tleal unit_lit, %eax")?;
                Ok(())
            }
            Expr::Null { .. } => {
                writeln!(self.out, "\tmovl $0, %eax")?;
                Ok(())
            }
            Expr::This { .. } => {
                let this = self.frame.this_offset;
                writeln!(self.out, "\tmovl {this}(%ebp), %eax")?;
                self.gen_ref("%eax")
            }
            Expr::NameRef { name } => self.load_object(p, name),
            Expr::Not { expr, .. } => {
                self.gen_value(p, expr)?;
                let l_false = self.frame.label();
                let l_done = self.frame.label();
                writeln!(self.out, "\tleal boolean_true, %ebx")?;
                writeln!(self.out, "\tcmpl %eax, %ebx")?;
                writeln!(self.out, "\tje {l_false}")?;
                writeln!(self.out, "\tleal boolean_true, %eax")?;
                writeln!(self.out, "\tjmp {l_done}")?;
                writeln!(self.out, "{l_false}:")?;
                writeln!(self.out, "\tleal boolean_false, %eax")?;
                writeln!(self.out, "{l_done}:")?;
                Ok(())
            }
            Expr::Negative { expr, .. } => {
                if self.config.opt_int {
                    self.gen_raw_negative(p, expr)?;
                    return self.box_raw();
                }
                // Boxed path: unbox, negate, release the operand, rebox.
                self.gen_value(p, expr)?;
                let slot = self.frame.reserve()?;
                let off = slot.offset;
                writeln!(self.out, "\tmovl %eax, {off}(%ebp)")?;
                writeln!(self.out, "\tmovl offset_of_Int.value(%eax), %ebx")?;
                writeln!(self.out, "\tnegl %ebx")?;
                self.gen_release("%eax")?;
                writeln!(self.out, "\tmovl %ebx, {off}(%ebp)")?;
                self.gen_alloc_int()?;
                writeln!(self.out, "\tmovl {off}(%ebp), %ebx")?;
                writeln!(self.out, "\tmovl %ebx, offset_of_Int.value(%eax)")?;
                self.frame.release(slot)
            }
            Expr::Binary {
                op, left, right, ..
            } => {
                if op.is_comparison() {
                    self.gen_comparison_value(p, *op, left, right)
                } else if self.config.opt_int {
                    self.gen_raw_binary(p, *op, left, right)?;
                    self.box_raw()
                } else {
                    self.gen_boxed_arith(p, *op, left, right)
                }
            }
            Expr::If {
                cond,
                then_arm,
                else_arm,
                ..
            } => {
                let l_then = self.frame.label();
                let l_else = self.frame.label();
                let l_done = self.frame.label();
                self.gen_jump(p, cond, &l_else, &l_then)?;
                writeln!(self.out, "{l_then}:")?;
                self.gen_value(p, then_arm)?;
                writeln!(self.out, "\tjmp {l_done}")?;
                writeln!(self.out, "{l_else}:")?;
                self.gen_value(p, else_arm)?;
                writeln!(self.out, "{l_done}:")?;
                Ok(())
            }
            Expr::While { cond, body, .. } => {
                self.gen_while(p, cond, body)?;
                writeln!(self.out, "\tleal unit_lit, %eax")?;
                Ok(())
            }
            Expr::Match {
                scrutinee,
                cases,
                binding,
                ..
            } => self.gen_match(p, scrutinee, cases, *binding, MatchSink::Value),
            Expr::DynamicCall {
                recv,
                name,
                args,
                has_override,
            } => self.gen_call(
                p,
                Some(recv.as_ref()),
                name,
                args,
                Dispatch::Dynamic {
                    has_override: *has_override,
                },
            ),
            Expr::StaticCall { recv, name, args } => {
                self.gen_call(p, Some(recv.as_ref()), name, args, Dispatch::Static)
            }
            Expr::SuperCall { name, args, .. } => {
                self.gen_call(p, None, name, args, Dispatch::Static)
            }
            Expr::Alloc { ty } => self.gen_alloc_object(p, ty),
            Expr::Assign { name, expr } => {
                self.gen_assign(p, name, expr)?;
                writeln!(self.out, "\tleal unit_lit, %eax")?;
                Ok(())
            }
            Expr::Var {
                name,
                init,
                body,
                binding,
                ..
            } => self.gen_var(p, name, init, body, *binding, |cg, p, body| {
                cg.gen_value(p, body)
            }),
            Expr::Chain { pre, post } => {
                self.gen_unused(p, pre)?;
                self.gen_value(p, post)
            }
            Expr::Native { .. } => Err(CodeGenError::Logic(
                "native expression reached code generation".into(),
            )),
        }
    }

    // ----- raw-int shape --------------------------------------------------

    pub(super) fn gen_raw(&mut self, p: &Program, expr: &Expr) -> Result<(), CodeGenError> {
        if !self.can_raw(expr) {
            // Universal fallback: produce the box, read the payload,
            // release the box.
            self.gen_value(p, expr)?;
            writeln!(self.out, "\tmovl offset_of_Int.value(%eax), %ebx")?;
            self.gen_release("%eax")?;
            writeln!(self.out, "\tmovl %ebx, %eax")?;
            return Ok(());
        }
        match expr {
            Expr::Int { value, .. } => {
                writeln!(self.out, "\tmovl ${}, %eax", *value as i32)?;
                Ok(())
            }
            Expr::NameRef { name } => {
                let obj = self.object_of(name)?;
                let offset = self.stack_offset(&obj)?;
                writeln!(self.out, "\tmovl {offset}(%ebp), %eax")?;
                Ok(())
            }
            Expr::Negative { expr, .. } => self.gen_raw_negative(p, expr),
            Expr::Binary {
                op, left, right, ..
            } => self.gen_raw_binary(p, *op, left, right),
            Expr::If {
                cond,
                then_arm,
                else_arm,
                ..
            } => {
                let l_then = self.frame.label();
                let l_else = self.frame.label();
                let l_done = self.frame.label();
                self.gen_jump(p, cond, &l_else, &l_then)?;
                writeln!(self.out, "{l_then}:")?;
                self.gen_raw(p, then_arm)?;
                writeln!(self.out, "\tjmp {l_done}")?;
                writeln!(self.out, "{l_else}:")?;
                self.gen_raw(p, else_arm)?;
                writeln!(self.out, "{l_done}:")?;
                Ok(())
            }
            Expr::Match {
                scrutinee,
                cases,
                binding,
                ..
            } => self.gen_match(p, scrutinee, cases, *binding, MatchSink::Raw),
            Expr::Chain { pre, post } => {
                self.gen_unused(p, pre)?;
                self.gen_raw(p, post)
            }
            Expr::Var {
                name,
                init,
                body,
                binding,
                ..
            } => self.gen_var(p, name, init, body, *binding, |cg, p, body| {
                cg.gen_raw(p, body)
            }),
            _ => unreachable!("can_raw admitted an unhandled expression"),
        }
    }

    fn gen_raw_negative(&mut self, p: &Program, expr: &Expr) -> Result<(), CodeGenError> {
        self.gen_raw(p, expr)?;
        writeln!(self.out, "\tnegl %eax")?;
        Ok(())
    }

    /// Raw arithmetic: the left operand is parked in a temporary while the
    /// right evaluates.
    fn gen_raw_binary(
        &mut self,
        p: &Program,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
    ) -> Result<(), CodeGenError> {
        self.gen_raw(p, left)?;
        let slot = self.frame.reserve()?;
        let off = slot.offset;
        writeln!(self.out, "\tmovl %eax, {off}(%ebp)")?;
        self.gen_raw(p, right)?;
        writeln!(self.out, "\tmovl {off}(%ebp), %ebx")?;
        match op {
            BinaryOp::Add => writeln!(self.out, "\taddl %ebx, %eax")?,
            BinaryOp::Mul => writeln!(self.out, "\timull %ebx, %eax")?,
            BinaryOp::Sub => {
                writeln!(self.out, "\tsubl %eax, %ebx")?;
                writeln!(self.out, "\tmovl %ebx, %eax")?;
            }
            BinaryOp::Div => {
                writeln!(self.out, "\tmovl %eax, %ecx")?;
                writeln!(self.out, "\tmovl %ebx, %eax")?;
                writeln!(self.out, "\tcdq")?;
                writeln!(self.out, "\tidivl %ecx")?;
            }
            BinaryOp::LessEq | BinaryOp::Less => {
                return Err(CodeGenError::Logic(
                    "comparison has no raw-int result".into(),
                ));
            }
        }
        self.frame.release(slot)
    }

    /// Box the raw integer in `%eax`.
    fn box_raw(&mut self) -> Result<(), CodeGenError> {
        let slot = self.frame.reserve()?;
        let off = slot.offset;
        writeln!(self.out, "\tmovl %eax, {off}(%ebp)")?;
        self.gen_alloc_int()?;
        writeln!(self.out, "\tmovl {off}(%ebp), %ebx")?;
        writeln!(self.out, "\tmovl %ebx, offset_of_Int.value(%eax)")?;
        self.frame.release(slot)
    }

    /// Fully boxed arithmetic, used when integer unboxing is disabled.
    fn gen_boxed_arith(
        &mut self,
        p: &Program,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
    ) -> Result<(), CodeGenError> {
        self.gen_value(p, left)?;
        let s1 = self.frame.reserve()?;
        let off1 = s1.offset;
        writeln!(self.out, "\tmovl %eax, {off1}(%ebp)")?;
        self.gen_value(p, right)?;
        let s2 = self.frame.reserve()?;
        let off2 = s2.offset;
        writeln!(self.out, "\tmovl %eax, {off2}(%ebp)")?;

        writeln!(self.out, "\tmovl {off1}(%ebp), %eax")?;
        writeln!(self.out, "\tmovl offset_of_Int.value(%eax), %ebx")?;
        writeln!(self.out, "\tmovl {off2}(%ebp), %eax")?;
        writeln!(self.out, "\tmovl offset_of_Int.value(%eax), %ecx")?;
        match op {
            BinaryOp::Add => writeln!(self.out, "\taddl %ecx, %ebx")?,
            BinaryOp::Sub => writeln!(self.out, "\tsubl %ecx, %ebx")?,
            BinaryOp::Mul => writeln!(self.out, "\timull %ecx, %ebx")?,
            BinaryOp::Div => {
                writeln!(self.out, "\tmovl %ebx, %eax")?;
                writeln!(self.out, "\tcdq")?;
                writeln!(self.out, "\tidivl %ecx")?;
                writeln!(self.out, "\tmovl %eax, %ebx")?;
            }
            BinaryOp::LessEq | BinaryOp::Less => unreachable!("comparisons take the other path"),
        }
        writeln!(self.out, "\tmovl {off2}(%ebp), %eax")?;
        self.gen_release("%eax")?;
        writeln!(self.out, "\tmovl {off1}(%ebp), %eax")?;
        self.gen_release("%eax")?;
        writeln!(self.out, "\tmovl %ebx, {off1}(%ebp)")?;
        self.frame.release(s2)?;
        self.gen_alloc_int()?;
        writeln!(self.out, "\tmovl {off1}(%ebp), %ebx")?;
        writeln!(self.out, "\tmovl %ebx, offset_of_Int.value(%eax)")?;
        self.frame.release(s1)
    }

    /// Comparison producing a boolean object.
    fn gen_comparison_value(
        &mut self,
        p: &Program,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
    ) -> Result<(), CodeGenError> {
        let l_true = self.frame.label();
        let l_done = self.frame.label();
        self.gen_comparison_operands(p, left, right)?;
        let jcc = if op == BinaryOp::LessEq { "jle" } else { "jl" };
        writeln!(self.out, "\t{jcc} {l_true}")?;
        writeln!(self.out, "\tleal boolean_false, %eax")?;
        writeln!(self.out, "\tjmp {l_done}")?;
        writeln!(self.out, "{l_true}:")?;
        writeln!(self.out, "\tleal boolean_true, %eax")?;
        writeln!(self.out, "{l_done}:")?;
        Ok(())
    }

    /// Evaluate both comparison operands and leave the flags set for
    /// `left - right`. All owned references are already released when this
    /// returns, so a conditional jump may follow immediately.
    fn gen_comparison_operands(
        &mut self,
        p: &Program,
        left: &Expr,
        right: &Expr,
    ) -> Result<(), CodeGenError> {
        if self.config.opt_int {
            self.gen_raw(p, left)?;
            let slot = self.frame.reserve()?;
            let off = slot.offset;
            writeln!(self.out, "\tmovl %eax, {off}(%ebp)")?;
            self.gen_raw(p, right)?;
            writeln!(self.out, "\tmovl {off}(%ebp), %ebx")?;
            self.frame.release(slot)?;
            writeln!(self.out, "\tcmpl %eax, %ebx")?;
            return Ok(());
        }
        self.gen_value(p, left)?;
        let slot = self.frame.reserve()?;
        let off = slot.offset;
        writeln!(self.out, "\tmovl %eax, {off}(%ebp)")?;
        self.gen_value(p, right)?;
        writeln!(self.out, "\tmovl {off}(%ebp), %ebx")?;
        writeln!(self.out, "\tmovl offset_of_Int.value(%ebx), %edx")?;
        writeln!(self.out, "\tmovl offset_of_Int.value(%eax), %ecx")?;
        self.gen_release("%eax")?;
        writeln!(self.out, "\tmovl {off}(%ebp), %ebx")?;
        self.gen_release("%ebx")?;
        self.frame.release(slot)?;
        writeln!(self.out, "\tcmpl %ecx, %edx")?;
        Ok(())
    }

    // ----- jump shape -----------------------------------------------------

    pub(super) fn gen_jump(
        &mut self,
        p: &Program,
        expr: &Expr,
        false_label: &str,
        true_label: &str,
    ) -> Result<(), CodeGenError> {
        if !self.can_jump(expr) {
            // Universal fallback: materialize the boolean and compare it
            // against the false singleton.
            self.gen_value(p, expr)?;
            writeln!(self.out, "\tleal boolean_false, %ebx")?;
            writeln!(self.out, "\tcmpl %eax, %ebx")?;
            writeln!(self.out, "\tje {false_label}")?;
            writeln!(self.out, "\tjmp {true_label}")?;
            return Ok(());
        }
        match expr {
            // `!x` swaps the targets.
            Expr::Not { expr, .. } => self.gen_jump(p, expr, true_label, false_label),
            Expr::Bool { value, .. } => {
                let target = if *value { true_label } else { false_label };
                writeln!(self.out, "\tjmp {target}")?;
                Ok(())
            }
            Expr::Binary {
                op, left, right, ..
            } => {
                self.gen_comparison_operands(p, left, right)?;
                let jcc = if *op == BinaryOp::LessEq { "jle" } else { "jl" };
                writeln!(self.out, "\t{jcc} {true_label}")?;
                writeln!(self.out, "\tjmp {false_label}")?;
                Ok(())
            }
            Expr::If {
                cond,
                then_arm,
                else_arm,
                ..
            } => {
                let l_then = self.frame.label();
                let l_else = self.frame.label();
                self.gen_jump(p, cond, &l_else, &l_then)?;
                writeln!(self.out, "{l_then}:")?;
                self.gen_jump(p, then_arm, false_label, true_label)?;
                writeln!(self.out, "{l_else}:")?;
                self.gen_jump(p, else_arm, false_label, true_label)
            }
            Expr::Match {
                scrutinee,
                cases,
                binding,
                ..
            } => self.gen_match(
                p,
                scrutinee,
                cases,
                *binding,
                MatchSink::Jump {
                    false_label,
                    true_label,
                },
            ),
            Expr::Chain { pre, post } => {
                self.gen_unused(p, pre)?;
                self.gen_jump(p, post, false_label, true_label)
            }
            _ => unreachable!("can_jump admitted an unhandled expression"),
        }
    }

    // ----- unused shape ---------------------------------------------------

    pub(super) fn gen_unused(&mut self, p: &Program, expr: &Expr) -> Result<(), CodeGenError> {
        if !self.config.opt_unused {
            self.gen_value(p, expr)?;
            return self.gen_release("%eax");
        }
        match expr {
            // Dead results with no side effects vanish entirely.
            Expr::Int { .. }
            | Expr::Str { .. }
            | Expr::Bool { .. }
            | Expr::Unit { .. }
            | Expr::Null { .. }
            | Expr::This { .. }
            | Expr::NameRef { .. } => Ok(()),
            Expr::Not { expr, .. } | Expr::Negative { expr, .. } => self.gen_unused(p, expr),
            Expr::Binary { left, right, .. } => {
                self.gen_unused(p, left)?;
                self.gen_unused(p, right)
            }
            Expr::If {
                cond,
                then_arm,
                else_arm,
                ..
            } => {
                let l_then = self.frame.label();
                let l_else = self.frame.label();
                let l_done = self.frame.label();
                self.gen_jump(p, cond, &l_else, &l_then)?;
                writeln!(self.out, "{l_then}:")?;
                self.gen_unused(p, then_arm)?;
                writeln!(self.out, "\tjmp {l_done}")?;
                writeln!(self.out, "{l_else}:")?;
                self.gen_unused(p, else_arm)?;
                writeln!(self.out, "{l_done}:")?;
                Ok(())
            }
            Expr::While { cond, body, .. } => self.gen_while(p, cond, body),
            Expr::Match {
                scrutinee,
                cases,
                binding,
                ..
            } => self.gen_match(p, scrutinee, cases, *binding, MatchSink::Unused),
            Expr::Assign { name, expr } => self.gen_assign(p, name, expr),
            Expr::Var {
                name,
                init,
                body,
                binding,
                ..
            } => self.gen_var(p, name, init, body, *binding, |cg, p, body| {
                cg.gen_unused(p, body)
            }),
            Expr::Chain { pre, post } => {
                self.gen_unused(p, pre)?;
                self.gen_unused(p, post)
            }
            _ => {
                // Calls and allocations keep their effects; the result is
                // released.
                self.gen_value(p, expr)?;
                self.gen_release("%eax")
            }
        }
    }

    // ----- shared emitters ------------------------------------------------

    fn gen_while(&mut self, p: &Program, cond: &Expr, body: &Expr) -> Result<(), CodeGenError> {
        let l_cond = self.frame.label();
        let l_body = self.frame.label();
        let l_done = self.frame.label();
        writeln!(self.out, "{l_cond}:")?;
        self.gen_jump(p, cond, &l_done, &l_body)?;
        writeln!(self.out, "{l_body}:")?;
        self.gen_unused(p, body)?;
        writeln!(self.out, "\tjmp {l_cond}")?;
        writeln!(self.out, "{l_done}:")?;
        Ok(())
    }

    /// `x = y` without the unit result.
    fn gen_assign(&mut self, p: &Program, name: &Ident, expr: &Expr) -> Result<(), CodeGenError> {
        let obj = self.object_of(name)?;
        if obj.raw_int() {
            self.gen_raw(p, expr)?;
        } else {
            self.gen_value(p, expr)?;
        }
        self.store_object(p, name)
    }

    /// `var x : T = init; body`, with the body emitted by `emit_body` in
    /// whatever shape the context wants.
    fn gen_var(
        &mut self,
        p: &Program,
        name: &Ident,
        init: &Expr,
        body: &Expr,
        binding: crate::ast::BindingId,
        emit_body: impl FnOnce(&mut Self, &Program, &Expr) -> Result<(), CodeGenError>,
    ) -> Result<(), CodeGenError> {
        let raw = self.object_of(name)?.raw_int();
        if raw {
            self.gen_raw(p, init)?;
        } else {
            self.gen_value(p, init)?;
        }
        let slot = self.frame.reserve()?;
        let off = slot.offset;
        self.frame.bind(binding, off);
        writeln!(self.out, "\tmovl %eax, {off}(%ebp)")?;
        emit_body(self, p, body)?;
        if !raw {
            self.release_slot(off)?;
        }
        self.frame.release(slot)
    }

    /// Match dispatch: park the scrutinee, load its class tag (null is tag
    /// 0), test each case's tag interval in order, fall through to the
    /// runtime panic, and run the selected arm with the binder aliased to
    /// the scrutinee's slot.
    fn gen_match(
        &mut self,
        p: &Program,
        scrutinee: &Expr,
        cases: &[Case],
        binding: crate::ast::BindingId,
        sink: MatchSink<'_>,
    ) -> Result<(), CodeGenError> {
        self.gen_value(p, scrutinee)?;
        let slot = self.frame.reserve()?;
        let off = slot.offset;
        self.frame.bind(binding, off);
        writeln!(self.out, "\tmovl %eax, {off}(%ebp)")?;

        let l_tagged = self.frame.label();
        writeln!(self.out, "\ttest %eax, %eax")?;
        writeln!(self.out, "\tjz {l_tagged}")?;
        writeln!(self.out, "\tmovl tag_offset(%eax), %eax")?;
        writeln!(self.out, "{l_tagged}:")?;

        let case_labels: Vec<String> = cases.iter().map(|_| self.frame.label()).collect();
        for (case, label) in cases.iter().zip(&case_labels) {
            if case.is_null() {
                writeln!(self.out, "\tcmpl $0, %eax")?;
                writeln!(self.out, "\tje {label}")?;
                continue;
            }
            let class = case
                .ty
                .class
                .map(|id| p.class(id))
                .ok_or_else(|| CodeGenError::Logic("unresolved case type".into()))?;
            if class.order == class.max_order {
                writeln!(self.out, "\tcmpl ${}, %eax", class.order)?;
                writeln!(self.out, "\tje {label}")?;
            } else {
                let l_skip = self.frame.label();
                writeln!(self.out, "\tcmpl ${}, %eax", class.order)?;
                writeln!(self.out, "\tjl {l_skip}")?;
                writeln!(self.out, "\tcmpl ${}, %eax", class.max_order)?;
                writeln!(self.out, "\tjle {label}")?;
                writeln!(self.out, "{l_skip}:")?;
            }
        }
        writeln!(self.out, "\tjmp runtime.case_panic")?;

        match sink {
            MatchSink::Value | MatchSink::Raw | MatchSink::Unused => {
                let l_done = self.frame.label();
                for (case, label) in cases.iter().zip(&case_labels) {
                    writeln!(self.out, "{label}:")?;
                    match sink {
                        MatchSink::Value => self.gen_value(p, &case.body)?,
                        MatchSink::Raw => self.gen_raw(p, &case.body)?,
                        MatchSink::Unused => self.gen_unused(p, &case.body)?,
                        MatchSink::Jump { .. } => unreachable!(),
                    }
                    writeln!(self.out, "\tjmp {l_done}")?;
                }
                writeln!(self.out, "{l_done}:")?;
                self.release_slot(off)?;
            }
            MatchSink::Jump {
                false_label,
                true_label,
            } => {
                let l_false = self.frame.label();
                let l_true = self.frame.label();
                for (case, label) in cases.iter().zip(&case_labels) {
                    writeln!(self.out, "{label}:")?;
                    self.gen_jump(p, &case.body, &l_false, &l_true)?;
                }
                writeln!(self.out, "{l_false}:")?;
                self.release_slot(off)?;
                writeln!(self.out, "\tjmp {false_label}")?;
                writeln!(self.out, "{l_true}:")?;
                self.release_slot(off)?;
                writeln!(self.out, "\tjmp {true_label}")?;
            }
        }
        self.frame.release(slot)
    }

    /// Push the receiver and arguments (ownership transfers to the callee,
    /// which pops them on return) and dispatch.
    fn gen_call(
        &mut self,
        p: &Program,
        recv: Option<&Expr>,
        name: &Ident,
        args: &[Expr],
        dispatch: Dispatch,
    ) -> Result<(), CodeGenError> {
        match recv {
            Some(recv) => {
                self.gen_value(p, recv)?;
                if matches!(dispatch, Dispatch::Dynamic { .. }) {
                    writeln!(self.out, "\ttest %eax, %eax")?;
                    writeln!(self.out, "\tjz runtime.null_panic")?;
                }
            }
            None => {
                // Super call: the receiver is this method's own receiver.
                let this = self.frame.this_offset;
                writeln!(self.out, "\tmovl {this}(%ebp), %eax")?;
                self.gen_ref("%eax")?;
            }
        }
        writeln!(self.out, "\tpush %eax")?;
        for arg in args {
            self.gen_value(p, arg)?;
            writeln!(self.out, "\tpush %eax")?;
        }

        let slot = name
            .method
            .ok_or_else(|| CodeGenError::Logic(format!("unresolved call to {}", name.name)))?;
        let owner = self.class_name(p, slot.class).to_string();
        let method = p.method(slot).name.name.clone();

        let devirtualize = match dispatch {
            Dispatch::Static => true,
            Dispatch::Dynamic { has_override } => !has_override && self.config.opt_dispatch,
        };
        if devirtualize {
            writeln!(self.out, "\tcall {owner}.{method}")?;
            return Ok(());
        }
        writeln!(self.out, "\tmovl {}(%esp), %eax", args.len() * 4)?;
        writeln!(self.out, "\tmovl tag_offset(%eax), %eax")?;
        writeln!(self.out, "\tshll $2, %eax")?;
        writeln!(self.out, "\tmovl method_tables(%eax), %eax")?;
        writeln!(self.out, "\tmovl method_offset_{owner}.{method}(%eax), %eax")?;
        writeln!(self.out, "\tcall *%eax")?;
        Ok(())
    }

    /// `new T` allocation: zero-filled by the runtime, then the value-typed
    /// attribute slots get their statically allocated singletons (null is
    /// not a legal Int/Boolean/Unit).
    fn gen_alloc_object(&mut self, p: &Program, ty: &Ident) -> Result<(), CodeGenError> {
        let id = ty
            .class
            .ok_or_else(|| CodeGenError::Logic("unresolved allocation type".into()))?;
        let name = self.class_name(p, id).to_string();
        self.gen_alloc_raw(&format!("size_of_{name}"), &format!("tag_of_{name}"))?;

        let mut cur = Some(id);
        while let Some(k) = cur {
            let class = p.class(k);
            let owner = class.name.name.clone();
            for attr in class.attributes() {
                if attr.native {
                    continue;
                }
                let singleton = match attr.ty.class {
                    Some(t) if Some(t) == self.int_class => "int_lit_0",
                    Some(t) if Some(t) == self.boolean_class => "boolean_false",
                    Some(t) if Some(t) == self.unit_class => "unit_lit",
                    _ => continue,
                };
                writeln!(self.out, "\tleal {singleton}, %ebx")?;
                writeln!(
                    self.out,
                    "\tmovl %ebx, offset_of_{owner}.{}(%eax)",
                    attr.name.name
                )?;
            }
            cur = class.parent();
        }
        Ok(())
    }
}
