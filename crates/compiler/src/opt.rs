//! Expression-tree optimization
//!
//! A syntactic rewrite pass run after identifier resolution and before
//! code generation:
//!
//! - integer constant folding through `-`, `+`, `*`, `/` (wrapping 32-bit
//!   arithmetic, division only by a non-zero constant), gated by
//!   `-opt-fold`;
//! - replacing `"literal".length()` with the literal's byte length, gated
//!   by `-opt-inline`;
//! - rewriting a `var` whose binder is never referenced to `init; body`,
//!   gated by `-opt-unused`.
//!
//! Rewrites happen in place, bottom-up, so binder identities survive and
//! the pass is idempotent. Nothing here reasons across calls: an opaque
//! call (`resize`, any dispatch) is a hard boundary.

use crate::ast::{BinaryOp, BindingId, Case, ClassId, Expr, Feature, ObjectRef, Program};
use crate::config::CompilerConfig;

/// Optimize every method body and the entry expression.
pub fn optimize(program: &mut Program, config: &CompilerConfig) {
    if !config.opt_fold && !config.opt_inline && !config.opt_unused {
        return;
    }
    let pass = Pass {
        config,
        string: program.find_class("String"),
    };
    for i in 0..program.classes.len() {
        for fi in 0..program.classes[i].features.len() {
            if let Feature::Method(method) = &mut program.classes[i].features[fi] {
                pass.rewrite(&mut method.body);
            }
        }
    }
    if let Some(main) = &mut program.main {
        pass.rewrite(main);
    }
}

struct Pass<'a> {
    config: &'a CompilerConfig,
    string: Option<ClassId>,
}

impl Pass<'_> {
    fn rewrite(&self, expr: &mut Expr) {
        match expr {
            Expr::Not { expr, .. } | Expr::Negative { expr, .. } => self.rewrite(expr),
            Expr::If {
                cond,
                then_arm,
                else_arm,
                ..
            } => {
                self.rewrite(cond);
                self.rewrite(then_arm);
                self.rewrite(else_arm);
            }
            Expr::While { cond, body, .. } => {
                self.rewrite(cond);
                self.rewrite(body);
            }
            Expr::Binary { left, right, .. } => {
                self.rewrite(left);
                self.rewrite(right);
            }
            Expr::Match {
                scrutinee, cases, ..
            } => {
                self.rewrite(scrutinee);
                for case in cases {
                    self.rewrite(&mut case.body);
                }
            }
            Expr::DynamicCall { recv, args, .. } | Expr::StaticCall { recv, args, .. } => {
                self.rewrite(recv);
                for arg in args {
                    self.rewrite(arg);
                }
            }
            Expr::SuperCall { args, .. } => {
                for arg in args {
                    self.rewrite(arg);
                }
            }
            Expr::Assign { expr, .. } => self.rewrite(expr),
            Expr::Var { init, body, .. } => {
                self.rewrite(init);
                self.rewrite(body);
            }
            Expr::Chain { pre, post } => {
                self.rewrite(pre);
                self.rewrite(post);
            }
            _ => {}
        }
        self.fold(expr);
    }

    /// Apply the local rules to a node whose children are already
    /// optimized. Each rule copies what it needs out of the node before
    /// replacing it.
    fn fold(&self, expr: &mut Expr) {
        match expr {
            Expr::Negative {
                pos,
                expr: inner,
            } if self.config.opt_fold => {
                let pos = *pos;
                let Expr::Int { value, .. } = **inner else {
                    return;
                };
                *expr = Expr::Int {
                    pos,
                    value: i64::from((value as i32).wrapping_neg()),
                };
            }
            Expr::Binary {
                op,
                pos,
                left,
                right,
            } if self.config.opt_fold && !op.is_comparison() => {
                let (op, pos) = (*op, *pos);
                let (Expr::Int { value: a, .. }, Expr::Int { value: b, .. }) =
                    (&**left, &**right)
                else {
                    return;
                };
                let (a, b) = (*a as i32, *b as i32);
                let folded = match op {
                    BinaryOp::Add => a.wrapping_add(b),
                    BinaryOp::Sub => a.wrapping_sub(b),
                    BinaryOp::Mul => a.wrapping_mul(b),
                    BinaryOp::Div => {
                        if b == 0 {
                            return;
                        }
                        a.wrapping_div(b)
                    }
                    BinaryOp::LessEq | BinaryOp::Less => unreachable!(),
                };
                *expr = Expr::Int {
                    pos,
                    value: i64::from(folded),
                };
            }
            Expr::DynamicCall {
                recv, name, args, ..
            } if self.config.opt_inline
                && args.is_empty()
                && name.name == "length"
                && name
                    .method
                    .is_some_and(|slot| Some(slot.class) == self.string) =>
            {
                // The one inlined builtin: a literal's length is a literal.
                let Expr::Str { pos, value } = &**recv else {
                    return;
                };
                let (pos, value) = (*pos, value.len() as i64);
                *expr = Expr::Int { pos, value };
            }
            Expr::Var { binding, body, .. }
                if self.config.opt_unused && !refers_to(body, *binding) =>
            {
                let taken = std::mem::take(expr);
                let Expr::Var { init, body, .. } = taken else {
                    unreachable!();
                };
                *expr = Expr::Chain {
                    pre: init,
                    post: body,
                };
            }
            _ => {}
        }
    }
}

/// True if the binder is referenced (read or assigned) anywhere in the
/// expression.
fn refers_to(expr: &Expr, binding: BindingId) -> bool {
    let ident_hits = |object: Option<ObjectRef>| match object {
        Some(ObjectRef::Local { binding: b, .. }) | Some(ObjectRef::MatchBinder { binding: b }) => {
            b == binding
        }
        _ => false,
    };
    match expr {
        Expr::NameRef { name } => ident_hits(name.object),
        Expr::Assign { name, expr } => ident_hits(name.object) || refers_to(expr, binding),
        Expr::Not { expr, .. } | Expr::Negative { expr, .. } => refers_to(expr, binding),
        Expr::If {
            cond,
            then_arm,
            else_arm,
            ..
        } => {
            refers_to(cond, binding)
                || refers_to(then_arm, binding)
                || refers_to(else_arm, binding)
        }
        Expr::While { cond, body, .. } => refers_to(cond, binding) || refers_to(body, binding),
        Expr::Binary { left, right, .. } => {
            refers_to(left, binding) || refers_to(right, binding)
        }
        Expr::Match {
            scrutinee, cases, ..
        } => {
            refers_to(scrutinee, binding)
                || cases
                    .iter()
                    .any(|case: &Case| refers_to(&case.body, binding))
        }
        Expr::DynamicCall { recv, args, .. } | Expr::StaticCall { recv, args, .. } => {
            refers_to(recv, binding) || args.iter().any(|arg| refers_to(arg, binding))
        }
        Expr::SuperCall { args, .. } => args.iter().any(|arg| refers_to(arg, binding)),
        Expr::Var { init, body, .. } => refers_to(init, binding) || refers_to(body, binding),
        Expr::Chain { pre, post } => refers_to(pre, binding) || refers_to(post, binding),
        Expr::Alloc { .. }
        | Expr::This { .. }
        | Expr::Null { .. }
        | Expr::Unit { .. }
        | Expr::Str { .. }
        | Expr::Bool { .. }
        | Expr::Int { .. }
        | Expr::Native { .. } => false,
    }
}
