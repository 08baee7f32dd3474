//! Static data emission
//!
//! The `.data` section carries, in order: the fixed singletons
//! (`boolean_false`, `boolean_true`, `unit_lit`), one object per pooled
//! integer and string literal, the runtime's `byte_ints` table, `gc_sizes`,
//! the per-class method tables with their `method_offset` constants, the
//! class-name table, the table-of-tables, and per-class tag/offset/size
//! constants plus `max_tag`. Statically allocated objects carry the
//! `gc_tag_root` refcount sentinel so the collector never touches them.

use super::{CodeGen, CodeGenError};
use crate::ast::{Feature, Program};
use std::fmt::Write as _;

impl CodeGen {
    pub(super) fn emit_data(&mut self, program: &Program) -> Result<(), CodeGenError> {
        writeln!(self.out, ".include \"basic_defs.s\"")?;
        writeln!(self.out)?;
        writeln!(self.out, ".data")?;
        writeln!(self.out)?;

        for singleton in ["boolean_false", "boolean_true", "unit_lit"] {
            let class = if singleton == "unit_lit" {
                "Unit"
            } else {
                "Boolean"
            };
            writeln!(self.out, ".globl {singleton}")?;
            writeln!(self.out, ".align 2")?;
            writeln!(self.out, "{singleton}:")?;
            writeln!(self.out, "\t.long tag_of_{class}")?;
            writeln!(self.out, "\t.long size_of_{class}")?;
            writeln!(self.out, "\t.long gc_tag_root")?;
            writeln!(self.out)?;
        }

        for (index, value) in self.pool.ints().to_vec().into_iter().enumerate() {
            writeln!(self.out, ".align 2")?;
            writeln!(self.out, "int_lit_{index}:")?;
            writeln!(self.out, "\t.long tag_of_Int")?;
            writeln!(self.out, "\t.long size_of_Int + 4")?;
            writeln!(self.out, "\t.long gc_tag_root")?;
            writeln!(self.out, "\t.long {value}")?;
            writeln!(self.out)?;
        }

        let strings: Vec<(usize, String, usize)> = self
            .pool
            .strings()
            .map(|(i, s, len)| (i, s.to_string(), len))
            .collect();
        for (index, value, len_id) in strings {
            writeln!(self.out, ".align 2")?;
            writeln!(self.out, "string_lit_{index}:")?;
            writeln!(self.out, "\t.long tag_of_String")?;
            writeln!(self.out, "\t.long size_of_String + {}", value.len())?;
            writeln!(self.out, "\t.long gc_tag_root")?;
            writeln!(self.out, "\t.long int_lit_{len_id}")?;
            for byte in value.bytes() {
                writeln!(self.out, "\t.byte {byte}")?;
            }
            writeln!(self.out)?;
        }

        // Boxed integers 0..=255 for the runtime's byte-level operations.
        writeln!(self.out, ".globl byte_ints")?;
        writeln!(self.out, ".align 2")?;
        writeln!(self.out, "byte_ints:")?;
        for byte in 0..=255i64 {
            let id = self
                .pool
                .int_id(byte)
                .ok_or_else(|| CodeGenError::Logic("byte pool not seeded".to_string()))?;
            writeln!(self.out, "\t.long int_lit_{id}")?;
        }
        writeln!(self.out)?;

        // Object sizes in words, indexed by class tag; tag 0 is null.
        writeln!(self.out, ".globl gc_sizes")?;
        writeln!(self.out, ".align 2")?;
        writeln!(self.out, "gc_sizes:")?;
        writeln!(self.out, "\t.long 0")?;
        for &c in &program.ordered {
            let name = self.class_name(program, c);
            writeln!(self.out, "\t.long (data_offset + size_of_{name}) / 4")?;
        }
        writeln!(self.out)?;

        for &c in &program.ordered {
            let class = program.class(c);
            let name = class.name.name.clone();
            writeln!(self.out, ".align 2")?;
            writeln!(self.out, "methods_of_{name}:")?;
            for slot in &class.methods {
                let owner = self.class_name(program, slot.class);
                let method = program.method(*slot);
                writeln!(self.out, "\t.long {owner}.{}", method.name.name)?;
            }
            writeln!(self.out)?;
            // Slot-index constants for the methods this class defines.
            for feature in &class.features {
                let Feature::Method(method) = feature else {
                    continue;
                };
                let Some(slot) = method.slot else {
                    continue;
                };
                if !class
                    .methods
                    .get(slot)
                    .is_some_and(|s| s.class == c)
                {
                    continue;
                }
                writeln!(self.out, ".globl method_offset_{name}.{}", method.name.name)?;
                writeln!(
                    self.out,
                    ".set method_offset_{name}.{}, {}",
                    method.name.name,
                    slot * 4
                )?;
            }
            writeln!(self.out)?;
        }

        // Class names by tag; tag 0 is the null pseudo-class.
        let null_name = self
            .pool
            .str_id("Null")
            .ok_or_else(|| CodeGenError::Logic("class-name pool not seeded".to_string()))?;
        writeln!(self.out, ".globl class_names")?;
        writeln!(self.out, ".align 2")?;
        writeln!(self.out, "class_names:")?;
        writeln!(self.out, "\t.long string_lit_{null_name}")?;
        for &c in &program.ordered {
            let id = self
                .pool
                .str_id(self.class_name(program, c))
                .ok_or_else(|| CodeGenError::Logic("class name missing from pool".to_string()))?;
            writeln!(self.out, "\t.long string_lit_{id}")?;
        }
        writeln!(self.out)?;

        writeln!(self.out, ".globl method_tables")?;
        writeln!(self.out, ".align 2")?;
        writeln!(self.out, "method_tables:")?;
        writeln!(self.out, "\t.long 0")?;
        for &c in &program.ordered {
            let name = self.class_name(program, c);
            writeln!(self.out, "\t.long methods_of_{name}")?;
        }
        writeln!(self.out)?;

        for &c in &program.ordered {
            self.emit_class_constants(program, c)?;
        }

        writeln!(self.out, ".globl max_tag")?;
        writeln!(self.out, ".set max_tag, {}", program.ordered.len())?;
        writeln!(self.out)?;
        Ok(())
    }

    /// `tag_of_C`, one `offset_of_C.a` per attribute, and `size_of_C`.
    ///
    /// Attribute offsets continue from the parent's size; native attributes
    /// get an offset (their storage is runtime-managed) but contribute
    /// nothing to the declared size.
    fn emit_class_constants(
        &mut self,
        program: &Program,
        c: crate::ast::ClassId,
    ) -> Result<(), CodeGenError> {
        let class = program.class(c);
        let name = class.name.name.clone();
        writeln!(self.out, ".globl tag_of_{name}")?;
        writeln!(self.out, ".set tag_of_{name}, {}", class.order)?;

        let parent_size = class
            .parent()
            .map(|p| program.class(p).size)
            .unwrap_or(0);
        let mut size = parent_size;
        for attr in class.attributes() {
            writeln!(self.out, ".globl offset_of_{name}.{}", attr.name.name)?;
            writeln!(
                self.out,
                ".set offset_of_{name}.{}, data_offset + {size}",
                attr.name.name
            )?;
            if !attr.native {
                size += 4;
            }
        }
        writeln!(self.out, ".globl size_of_{name}")?;
        writeln!(self.out, ".set size_of_{name}, {size}")?;
        writeln!(self.out)?;
        Ok(())
    }
}
