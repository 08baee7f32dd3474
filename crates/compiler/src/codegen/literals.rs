//! Literal pooling
//!
//! A single pre-pass walks every method body and the entry expression,
//! deduplicating integer and string literals. Index 0 of the integer pool
//! is always the value 0 (the zero sentinel written into fresh Int
//! attribute slots), the integers 0..=255 are pooled unconditionally for
//! the runtime's `byte_ints` table, and every string contributes its byte
//! length to the integer pool for the string object header.

use crate::ast::{Expr, Feature, Program};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub(super) struct Pool {
    ints: Vec<i64>,
    int_index: HashMap<i64, usize>,
    strings: Vec<String>,
    string_index: HashMap<String, usize>,
    /// Integer-pool index of each string's length, parallel to `strings`.
    string_len_ids: Vec<usize>,
}

impl Pool {
    /// Collect every literal in the program.
    pub fn collect(program: &Program) -> Pool {
        let mut pool = Pool::default();
        pool.add_int(0);
        for byte in 0..=255i64 {
            pool.add_int(byte);
        }
        pool.add_str("Null");
        for &c in &program.ordered {
            let class = program.class(c);
            pool.add_str(&class.name.name);
            for feature in &class.features {
                if let Feature::Method(method) = feature {
                    pool.walk(&method.body);
                }
            }
        }
        if let Some(main) = &program.main {
            pool.walk(main);
        }
        pool
    }

    fn walk(&mut self, expr: &Expr) {
        match expr {
            Expr::Int { value, .. } => {
                self.add_int(*value);
            }
            Expr::Str { value, .. } => {
                self.add_str(value);
            }
            Expr::Not { expr, .. } | Expr::Negative { expr, .. } => self.walk(expr),
            Expr::If {
                cond,
                then_arm,
                else_arm,
                ..
            } => {
                self.walk(cond);
                self.walk(then_arm);
                self.walk(else_arm);
            }
            Expr::While { cond, body, .. } => {
                self.walk(cond);
                self.walk(body);
            }
            Expr::Binary { left, right, .. } => {
                self.walk(left);
                self.walk(right);
            }
            Expr::Match {
                scrutinee, cases, ..
            } => {
                self.walk(scrutinee);
                for case in cases {
                    self.walk(&case.body);
                }
            }
            Expr::DynamicCall { recv, args, .. } | Expr::StaticCall { recv, args, .. } => {
                self.walk(recv);
                for arg in args {
                    self.walk(arg);
                }
            }
            Expr::SuperCall { args, .. } => {
                for arg in args {
                    self.walk(arg);
                }
            }
            Expr::Assign { expr, .. } => self.walk(expr),
            Expr::Var { init, body, .. } => {
                self.walk(init);
                self.walk(body);
            }
            Expr::Chain { pre, post } => {
                self.walk(pre);
                self.walk(post);
            }
            Expr::Alloc { .. }
            | Expr::This { .. }
            | Expr::Null { .. }
            | Expr::Unit { .. }
            | Expr::NameRef { .. }
            | Expr::Bool { .. }
            | Expr::Native { .. } => {}
        }
    }

    /// Intern an integer, returning its pool index.
    pub fn add_int(&mut self, value: i64) -> usize {
        if let Some(&index) = self.int_index.get(&value) {
            return index;
        }
        let index = self.ints.len();
        self.ints.push(value);
        self.int_index.insert(value, index);
        index
    }

    /// Intern a string, returning its pool index. The byte length is
    /// interned as an integer alongside.
    pub fn add_str(&mut self, value: &str) -> usize {
        if let Some(&index) = self.string_index.get(value) {
            return index;
        }
        let len_id = self.add_int(value.len() as i64);
        let index = self.strings.len();
        self.strings.push(value.to_string());
        self.string_index.insert(value.to_string(), index);
        self.string_len_ids.push(len_id);
        index
    }

    pub fn int_id(&self, value: i64) -> Option<usize> {
        self.int_index.get(&value).copied()
    }

    pub fn str_id(&self, value: &str) -> Option<usize> {
        self.string_index.get(value).copied()
    }

    pub fn ints(&self) -> &[i64] {
        &self.ints
    }

    pub fn strings(&self) -> impl Iterator<Item = (usize, &str, usize)> {
        self.strings
            .iter()
            .enumerate()
            .map(|(i, s)| (i, s.as_str(), self.string_len_ids[i]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_is_index_zero() {
        let mut pool = Pool::default();
        pool.add_int(0);
        pool.add_int(7);
        assert_eq!(pool.int_id(0), Some(0));
        assert_eq!(pool.int_id(7), Some(1));
    }

    #[test]
    fn test_interning_is_idempotent() {
        let mut pool = Pool::default();
        let a = pool.add_int(42);
        let b = pool.add_int(42);
        assert_eq!(a, b);
        let s1 = pool.add_str("hello");
        let s2 = pool.add_str("hello");
        assert_eq!(s1, s2);
        assert_eq!(pool.ints().iter().filter(|&&v| v == 42).count(), 1);
    }

    #[test]
    fn test_string_interns_its_length() {
        let mut pool = Pool::default();
        pool.add_str("four");
        let (_, s, len_id) = pool.strings().next().unwrap();
        assert_eq!(s, "four");
        assert_eq!(pool.ints()[len_id], 4);
    }
}
