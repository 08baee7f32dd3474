//! Stack-frame layout
//!
//! Each emitted method reserves `V*4` bytes of temporaries below `%ebp`,
//! where `V` is computed by [`count_vars`] before emission. During emission
//! a cursor hands out slots in LIFO order; releasing out of order is an
//! internal error. Temporary slots back `var` locals, `match` scrutinees,
//! and the save-the-left-operand pattern of binary operators.
//!
//! Frame layout (32-bit, callee pops):
//!
//! ```text
//! this               at  8 + 4*argc (%ebp)
//! arg i              at  8 + 4*(argc-1-i)
//! return address     at  4(%ebp)
//! saved %ebp         at  0(%ebp)
//! temporary slot n   at  -4*n(%ebp)
//! ```

use super::CodeGenError;
use crate::ast::{BindingId, Case, Expr};
use std::collections::HashMap;

/// A reserved temporary. Must be released in LIFO order.
#[derive(Debug)]
pub(super) struct Slot {
    pub offset: i32,
    index: usize,
}

/// Per-method mutable emission state: the label counter, the slot cursor,
/// and the binder-to-slot map. Created at method entry, dropped at exit.
#[derive(Debug, Default)]
pub(super) struct Frame {
    fn_sym: String,
    labels: usize,
    vars: usize,
    used: usize,
    pub argc: usize,
    pub this_offset: i32,
    bindings: HashMap<BindingId, i32>,
}

impl Frame {
    pub fn new(fn_sym: String, argc: usize, vars: usize) -> Self {
        Frame {
            fn_sym,
            labels: 0,
            vars,
            used: 0,
            argc,
            this_offset: 8 + 4 * argc as i32,
            bindings: HashMap::new(),
        }
    }

    /// Offset of argument `i` from `%ebp`. The caller pushes `this` and
    /// then the arguments left to right.
    pub fn arg_offset(&self, index: usize) -> i32 {
        8 + 4 * (self.argc - 1 - index) as i32
    }

    /// A fresh local label.
    pub fn label(&mut self) -> String {
        self.labels += 1;
        format!("{}.L{}", self.fn_sym, self.labels)
    }

    /// Reserve the next temporary slot.
    pub fn reserve(&mut self) -> Result<Slot, CodeGenError> {
        if self.used == self.vars {
            return Err(CodeGenError::Logic(format!(
                "too many temporaries in {}",
                self.fn_sym
            )));
        }
        self.used += 1;
        Ok(Slot {
            offset: -4 * self.used as i32,
            index: self.used,
        })
    }

    /// Release a slot; the cursor must be at the slot's index.
    pub fn release(&mut self, slot: Slot) -> Result<(), CodeGenError> {
        if self.used != slot.index {
            return Err(CodeGenError::Logic(format!(
                "temporary released out of order in {}",
                self.fn_sym
            )));
        }
        self.used -= 1;
        Ok(())
    }

    /// Record where a binder lives for the rest of the method.
    pub fn bind(&mut self, binding: BindingId, offset: i32) {
        self.bindings.insert(binding, offset);
    }

    pub fn binding_offset(&self, binding: BindingId) -> Result<i32, CodeGenError> {
        self.bindings.get(&binding).copied().ok_or_else(|| {
            CodeGenError::Logic(format!("unbound local in {}", self.fn_sym))
        })
    }
}

/// Maximum number of live temporaries an expression needs, mirroring the
/// slot discipline of the emitters: binary operators park the left operand
/// (and one boxing scratch), `var` and `match` hold one slot across their
/// bodies.
pub(super) fn count_vars(expr: &Expr) -> usize {
    match expr {
        Expr::Not { expr, .. } => count_vars(expr),
        Expr::Negative { expr, .. } => count_vars(expr).max(1),
        Expr::If {
            cond,
            then_arm,
            else_arm,
            ..
        } => count_vars(cond)
            .max(count_vars(then_arm))
            .max(count_vars(else_arm)),
        Expr::While { cond, body, .. } => count_vars(cond).max(count_vars(body)),
        Expr::Binary { left, right, .. } => {
            count_vars(left).max(count_vars(right) + 1).max(2)
        }
        Expr::Match {
            scrutinee, cases, ..
        } => {
            let body_max = cases
                .iter()
                .map(|case: &Case| count_vars(&case.body))
                .max()
                .unwrap_or(0);
            count_vars(scrutinee).max(body_max + 1)
        }
        Expr::DynamicCall { recv, args, .. } | Expr::StaticCall { recv, args, .. } => args
            .iter()
            .map(count_vars)
            .fold(count_vars(recv), usize::max),
        Expr::SuperCall { args, .. } => args.iter().map(count_vars).max().unwrap_or(0),
        Expr::Alloc { .. } => 0,
        Expr::Assign { expr, .. } => count_vars(expr),
        Expr::Var { init, body, .. } => count_vars(init).max(count_vars(body) + 1),
        Expr::Chain { pre, post } => count_vars(pre).max(count_vars(post)),
        Expr::This { .. }
        | Expr::Null { .. }
        | Expr::Unit { .. }
        | Expr::NameRef { .. }
        | Expr::Str { .. }
        | Expr::Bool { .. }
        | Expr::Int { .. }
        | Expr::Native { .. } => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Span};

    fn int(value: i64) -> Expr {
        Expr::Int {
            pos: Span::default(),
            value,
        }
    }

    fn add(left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op: BinaryOp::Add,
            pos: Span::default(),
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[test]
    fn test_slots_are_lifo() {
        let mut frame = Frame::new("A.f".to_string(), 1, 2);
        let a = frame.reserve().unwrap();
        let b = frame.reserve().unwrap();
        assert_eq!(a.offset, -4);
        assert_eq!(b.offset, -8);
        assert!(frame.reserve().is_err(), "frame only has two slots");
        frame.release(b).unwrap();
        frame.release(a).unwrap();
    }

    #[test]
    fn test_out_of_order_release_is_an_error() {
        let mut frame = Frame::new("A.f".to_string(), 0, 2);
        let a = frame.reserve().unwrap();
        let _b = frame.reserve().unwrap();
        assert!(frame.release(a).is_err());
    }

    #[test]
    fn test_argument_offsets_follow_push_order() {
        // Two arguments: this at 16, arg0 at 12, arg1 at 8.
        let frame = Frame::new("A.f".to_string(), 2, 0);
        assert_eq!(frame.this_offset, 16);
        assert_eq!(frame.arg_offset(0), 12);
        assert_eq!(frame.arg_offset(1), 8);
    }

    #[test]
    fn test_count_vars_binary_nesting() {
        // A lone addition parks the left operand and boxes: two slots.
        assert_eq!(count_vars(&add(int(1), int(2))), 2);
        // Right-nested: the outer left is parked while the inner runs.
        assert_eq!(count_vars(&add(int(1), add(int(2), int(3)))), 3);
    }

    #[test]
    fn test_count_vars_var_and_chain() {
        let var = Expr::Var {
            name: crate::ast::Ident::synthetic("x"),
            ty: crate::ast::Ident::synthetic("Int"),
            init: Box::new(int(1)),
            body: Box::new(add(int(2), int(3))),
            binding: BindingId(0),
        };
        // The var's slot is held across the body's two.
        assert_eq!(count_vars(&var), 3);
        let chain = Expr::Chain {
            pre: Box::new(add(int(1), int(2))),
            post: Box::new(int(3)),
        };
        assert_eq!(count_vars(&chain), 2);
    }
}
