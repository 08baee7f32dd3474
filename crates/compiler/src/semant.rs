//! Semantic analysis
//!
//! Four ordered sub-phases over the parsed [`Program`]:
//!
//! 1. *Type resolution*: bind every type identifier to a class.
//! 2. *Hierarchy ordering*: preorder-number the class tree so each class
//!    owns the tag interval `[order, max_order]` of its descendants.
//! 3. *Feature synthesis*: turn constructor formals into attributes and
//!    synthesize a constructor method per class.
//! 4. *Method tables and identifier resolution*: build dispatch tables with
//!    override checking, then resolve and type-check every expression.
//!
//! Checks are local: each failure emits one diagnostic and substitutes the
//! internal error class (or `Nothing`) so analysis can continue without
//! cascading. Phase gates short-circuit where continuing would only produce
//! noise. The sentinel classes (`Nothing`, `Null`, the internal `native`
//! hierarchy root, and the error class) are arena entries owned by the
//! analyzer and compared by id.

use crate::ast::{
    Attribute, BinaryOp, Case, Class, ClassId, Expr, Extends, Feature, Ident, Method, MethodSlot,
    ObjectRef, Program, Span,
};
use crate::config::CompilerConfig;
use crate::diag::{Diagnostic, Diagnostics};
use crate::lexer::MAX_INT_LITERAL;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Run semantic analysis. On success the program's derived state (class
/// order, method tables, resolved identifiers, entry expression) is
/// populated; on failure all accumulated diagnostics are returned.
pub fn analyze(program: &mut Program, config: &CompilerConfig) -> Result<(), Vec<Diagnostic>> {
    if config.coroutine {
        inject_coroutine_bootstrap(program);
    }
    let mut analyzer = Analyzer::new(program, config);

    analyzer.check_class_names(program);
    // Continuing with duplicate class names would only produce noise.
    if !analyzer.diags.is_empty() {
        return Err(analyzer.diags.into_vec());
    }

    analyzer.resolve_types(program);
    if !analyzer.diags.is_empty() {
        return Err(analyzer.diags.into_vec());
    }

    analyzer.resolve_required_classes(program);
    if !analyzer.diags.is_empty() {
        return Err(analyzer.diags.into_vec());
    }

    analyzer.order_hierarchy(program);
    if !analyzer.diags.is_empty() {
        return Err(analyzer.diags.into_vec());
    }

    analyzer.synthesize_constructors(program);
    analyzer.compute_sizes(program);
    analyzer.build_method_tables(program);
    analyzer.resolve_identifiers(program);
    analyzer.synthesize_main(program);

    if analyzer.diags.is_empty() {
        Ok(())
    } else {
        Err(analyzer.diags.into_vec())
    }
}

/// The coroutine bootstrap: a generated `runtimeMain` whose `run`
/// constructs the user's `Main` from inside the initial coroutine. The
/// lowercase name keeps it out of reach of source programs.
fn inject_coroutine_bootstrap(program: &mut Program) {
    let body = Expr::Chain {
        pre: Box::new(Expr::StaticCall {
            recv: Box::new(Expr::Alloc {
                ty: Ident::synthetic("Main"),
            }),
            name: Ident::synthetic("Main"),
            args: Vec::new(),
        }),
        post: Box::new(Expr::Unit {
            pos: Span::default(),
        }),
    };
    program.declare_class(Class {
        file: PathBuf::from("<coroutine>"),
        is_prelude: true,
        name: Ident::synthetic("runtimeMain"),
        extends: Extends {
            ty: Ident::synthetic("Runnable"),
            args: Vec::new(),
        },
        features: vec![Feature::Method(Method {
            override_: true,
            name: Ident::synthetic("run"),
            args: Vec::new(),
            return_ty: Ident::synthetic("Unit"),
            body,
            slot: None,
        })],
        ..Class::default()
    });
}

/// One entry of the identifier scope used while checking a method body.
#[derive(Debug, Clone)]
struct ScopeEntry {
    name: String,
    file: PathBuf,
    span: Span,
    ty: ClassId,
    obj: ObjectRef,
}

struct Analyzer<'a> {
    config: &'a CompilerConfig,
    diags: Diagnostics,
    /// File of the class currently being analyzed.
    cur_file: PathBuf,

    // Sentinel classes installed into the arena.
    nothing: ClassId,
    null: ClassId,
    native: ClassId,
    error: ClassId,

    // Required classes, bound by `resolve_required_classes`.
    any: ClassId,
    unit: ClassId,
    main: ClassId,
    int: ClassId,
    boolean: ClassId,
    string: ClassId,
}

impl<'a> Analyzer<'a> {
    fn new(program: &mut Program, config: &'a CompilerConfig) -> Self {
        let native = program.add_class(Class {
            name: Ident::synthetic("native"),
            ..Class::default()
        });
        let sentinel = |name: &str| Class {
            name: Ident::synthetic(name),
            extends: Extends {
                ty: Ident {
                    name: "native".to_string(),
                    class: Some(native),
                    ..Ident::default()
                },
                args: Vec::new(),
            },
            ..Class::default()
        };
        let nothing = program.add_class(sentinel("Nothing"));
        let null = program.add_class(sentinel("Null"));
        let error = program.add_class(sentinel("$error$"));

        Analyzer {
            config,
            diags: Diagnostics::new(),
            cur_file: PathBuf::new(),
            nothing,
            null,
            native,
            error,
            any: error,
            unit: error,
            main: error,
            int: error,
            boolean: error,
            string: error,
        }
    }

    // ----- reporting ------------------------------------------------------

    fn report(&mut self, span: Span, message: impl Into<String>) {
        let file = self.cur_file.clone();
        self.diags.report(&file, span, message);
    }

    fn report_in(&mut self, file: &Path, span: Span, message: impl Into<String>) {
        self.diags.report(file, span, message);
    }

    fn class_name(&self, program: &Program, id: ClassId) -> String {
        program.class(id).name.name.clone()
    }

    // ----- the subtype lattice --------------------------------------------

    fn parent_of(&self, program: &Program, id: ClassId) -> ClassId {
        program.class(id).parent().unwrap_or(self.native)
    }

    /// `t1 <= t2` in the subtype ordering.
    fn le(&self, program: &Program, t1: ClassId, t2: ClassId) -> bool {
        if t1 == t2 {
            return true;
        }
        if t1 == self.nothing {
            return true;
        }
        if t1 == self.null {
            return t2 != self.nothing && t2 != self.boolean && t2 != self.int && t2 != self.unit;
        }
        let mut t = t1;
        while t != self.native {
            if t == t2 {
                return true;
            }
            t = self.parent_of(program, t);
        }
        false
    }

    /// Least upper bound of two classes.
    fn lub2(&self, program: &Program, t1: ClassId, t2: ClassId) -> ClassId {
        if self.le(program, t1, t2) {
            return t2;
        }
        if self.le(program, t2, t1) {
            return t1;
        }
        let mut a = t1;
        let mut b = t2;
        while program.class(a).depth > program.class(b).depth {
            a = self.parent_of(program, a);
        }
        while program.class(b).depth > program.class(a).depth {
            b = self.parent_of(program, b);
        }
        while a != b {
            if program.class(a).depth <= 1 {
                return self.any;
            }
            a = self.parent_of(program, a);
            b = self.parent_of(program, b);
        }
        a
    }

    /// Least upper bound of a set of classes; `Nothing` for the empty set.
    fn lub(&self, program: &Program, ts: &[ClassId]) -> ClassId {
        let mut acc = self.nothing;
        for &t in ts {
            acc = self.lub2(program, acc, t);
        }
        acc
    }

    /// Report unless `t` conforms to `target`. Skips the internal error
    /// class to avoid cascading diagnostics.
    fn conform(&mut self, program: &Program, t: ClassId, target: ClassId, span: Span) {
        if t == self.error || target == self.error {
            return;
        }
        if !self.le(program, t, target) {
            let message = format!(
                "type {} does not conform to type {}",
                self.class_name(program, t),
                self.class_name(program, target)
            );
            self.report(span, message);
        }
    }

    // ----- (a) class-name uniqueness --------------------------------------

    fn check_class_names(&mut self, program: &mut Program) {
        program
            .class_map
            .insert("Nothing".to_string(), self.nothing);
        program.class_map.insert("Null".to_string(), self.null);

        for i in 0..program.declared.len() {
            let c = program.declared[i];
            let name = program.class(c).name.name.clone();
            let span = program.class(c).name.span;
            self.cur_file = program.class(c).file.clone();
            if let Some(&prev) = program.class_map.get(&name) {
                self.report(span, format!("duplicate declaration of class {}", name));
                let prev_class = program.class(prev);
                let (prev_file, prev_span) = (prev_class.file.clone(), prev_class.name.span);
                self.report_in(&prev_file, prev_span, "(previous declaration was here)");
            } else {
                program.class_map.insert(name, c);
            }
        }
    }

    // ----- (b) type resolution --------------------------------------------

    fn lookup(&mut self, program: &Program, id: &mut Ident) {
        match program.class_map.get(&id.name) {
            Some(&c) => id.class = Some(c),
            None => {
                let message = format!("use of undeclared class {}", id.name);
                self.report(id.span, message);
                id.class = Some(self.error);
            }
        }
    }

    fn resolve_types(&mut self, program: &mut Program) {
        for i in 0..program.declared.len() {
            let c = program.declared[i];
            self.cur_file = program.class(c).file.clone();
            let mut class = std::mem::take(program.class_mut(c));
            self.resolve_class_types(program, &mut class);
            *program.class_mut(c) = class;
        }
    }

    fn resolve_class_types(&mut self, program: &Program, class: &mut Class) {
        self.lookup(program, &mut class.name);
        for formal in &mut class.formals {
            self.lookup(program, &mut formal.ty);
        }

        // Only the prelude roots may extend the internal native class.
        if class.extends.ty.name == "native"
            && matches!(class.name.name.as_str(), "Any" | "Null" | "Nothing")
        {
            class.extends.ty.class = Some(self.native);
        } else {
            self.lookup(program, &mut class.extends.ty);
        }
        let parent = class.extends.ty.class;
        for arg in &mut class.extends.args {
            self.resolve_expr_types(program, arg, parent);
        }

        let is_prelude = class.is_prelude;
        for feature in &mut class.features {
            match feature {
                Feature::Init(expr) => self.resolve_expr_types(program, expr, parent),
                Feature::Attribute(attr) => {
                    if attr.native {
                        if !is_prelude {
                            self.report(
                                attr.name.span,
                                "native features are only allowed in the standard classes",
                            );
                        }
                        continue;
                    }
                    self.lookup(program, &mut attr.ty);
                    if let Some(init) = &mut attr.init {
                        self.resolve_expr_types(program, init, parent);
                    }
                }
                Feature::Method(method) => {
                    for arg in &mut method.args {
                        self.lookup(program, &mut arg.ty);
                    }
                    self.lookup(program, &mut method.return_ty);
                    if method.is_native() {
                        if !is_prelude {
                            self.report(
                                method.name.span,
                                "native features are only allowed in the standard classes",
                            );
                        }
                        continue;
                    }
                    self.resolve_expr_types(program, &mut method.body, parent);
                }
            }
        }
    }

    fn resolve_expr_types(
        &mut self,
        program: &Program,
        expr: &mut Expr,
        parent: Option<ClassId>,
    ) {
        match expr {
            Expr::Not { expr, .. } | Expr::Negative { expr, .. } => {
                self.resolve_expr_types(program, expr, parent);
            }
            Expr::If {
                cond,
                then_arm,
                else_arm,
                ..
            } => {
                self.resolve_expr_types(program, cond, parent);
                self.resolve_expr_types(program, then_arm, parent);
                self.resolve_expr_types(program, else_arm, parent);
            }
            Expr::While { cond, body, .. } => {
                self.resolve_expr_types(program, cond, parent);
                self.resolve_expr_types(program, body, parent);
            }
            Expr::Binary { left, right, .. } => {
                self.resolve_expr_types(program, left, parent);
                self.resolve_expr_types(program, right, parent);
            }
            Expr::Match {
                scrutinee, cases, ..
            } => {
                self.resolve_expr_types(program, scrutinee, parent);
                for case in cases {
                    self.lookup(program, &mut case.ty);
                    self.resolve_expr_types(program, &mut case.body, parent);
                }
            }
            Expr::DynamicCall { recv, args, .. } => {
                self.resolve_expr_types(program, recv, parent);
                for arg in args {
                    self.resolve_expr_types(program, arg, parent);
                }
            }
            Expr::SuperCall {
                pos,
                args,
                parent: super_parent,
                ..
            } => {
                if parent.is_none() || parent == Some(self.native) {
                    let span = *pos;
                    self.report(span, "'super' used in a class with no parent");
                }
                *super_parent = parent;
                for arg in args {
                    self.resolve_expr_types(program, arg, parent);
                }
            }
            Expr::StaticCall { recv, args, .. } => {
                self.resolve_expr_types(program, recv, parent);
                for arg in args {
                    self.resolve_expr_types(program, arg, parent);
                }
            }
            Expr::Alloc { ty } => self.lookup(program, ty),
            Expr::Assign { expr, .. } => self.resolve_expr_types(program, expr, parent),
            Expr::Var { ty, init, body, .. } => {
                self.lookup(program, ty);
                self.resolve_expr_types(program, init, parent);
                self.resolve_expr_types(program, body, parent);
            }
            Expr::Chain { pre, post } => {
                self.resolve_expr_types(program, pre, parent);
                self.resolve_expr_types(program, post, parent);
            }
            Expr::This { .. }
            | Expr::Null { .. }
            | Expr::Unit { .. }
            | Expr::NameRef { .. }
            | Expr::Str { .. }
            | Expr::Bool { .. }
            | Expr::Int { .. }
            | Expr::Native { .. } => {}
        }
    }

    // ----- (c) required classes -------------------------------------------

    fn resolve_required_classes(&mut self, program: &Program) {
        self.any = self.require(program, "Any");
        self.unit = self.require(program, "Unit");
        self.main = self.require(program, "Main");
        self.int = self.require(program, "Int");
        self.boolean = self.require(program, "Boolean");
        // String is defined by the embedded prelude; it backs literals but
        // a missing prelude is a build error, not a user error.
        self.string = program.find_class("String").unwrap_or(self.error);
    }

    fn require(&mut self, program: &Program, name: &str) -> ClassId {
        match program.find_class(name) {
            Some(c) => c,
            None => {
                self.diags
                    .report_global(format!("missing required class: {}", name));
                self.error
            }
        }
    }

    // ----- (d) hierarchy ordering -----------------------------------------

    fn order_hierarchy(&mut self, program: &mut Program) {
        let mut children: HashMap<ClassId, Vec<ClassId>> = HashMap::new();
        for &c in &program.declared {
            if c == self.any {
                continue;
            }
            let parent = self.parent_of(program, c);
            children.entry(parent).or_default().push(c);
        }

        // Preorder numbering: a class's interval [order, max_order] then
        // covers exactly its subtree.
        let mut order = 0u32;
        let mut stack = vec![(self.any, 1u32)];
        program.class_mut(self.any).depth = 1;
        while let Some((c, depth)) = stack.pop() {
            if program.class(c).order != 0 {
                // Second visit: the whole subtree is numbered.
                program.class_mut(c).max_order = order;
                continue;
            }
            order += 1;
            {
                let class = program.class_mut(c);
                class.order = order;
                class.depth = depth;
            }
            program.ordered.push(c);
            // Re-visit after the children to close the interval.
            stack.push((c, depth));
            if let Some(kids) = children.get(&c) {
                for &kid in kids.iter().rev() {
                    stack.push((kid, depth + 1));
                }
            }
        }

        for i in 0..program.declared.len() {
            let c = program.declared[i];
            if program.class(c).order == 0 {
                let class = program.class(c);
                let (file, span, name) =
                    (class.file.clone(), class.name.span, class.name.name.clone());
                self.report_in(&file, span, format!("class hierarchy loop: {}", name));
            }
        }
    }

    // ----- (f) constructor synthesis --------------------------------------

    fn synthesize_constructors(&mut self, program: &mut Program) {
        for i in 0..program.declared.len() {
            let c = program.declared[i];
            self.synthesize_constructor(program, c);
        }
    }

    fn synthesize_constructor(&mut self, program: &mut Program, c: ClassId) {
        let class = program.class_mut(c);
        let class_name = class.name.name.clone();

        // Mirror each constructor formal as an attribute initialized from a
        // primed internal temporary, and rename the formal to match.
        let mut mirrors = Vec::with_capacity(class.formals.len());
        for formal in &mut class.formals {
            let primed = Ident::new(format!("'{}", formal.name.name), formal.name.span);
            mirrors.push(Feature::Attribute(Attribute {
                name: formal.name.clone(),
                ty: formal.ty.clone(),
                init: Some(Expr::NameRef {
                    name: primed.clone(),
                }),
                native: false,
            }));
            formal.name = primed;
        }
        let rest = std::mem::take(&mut class.features);
        class.features = mirrors;
        class.features.extend(rest);

        // The value-producing classes have no constructor at all.
        if matches!(class_name.as_str(), "Int" | "Boolean" | "Unit" | "Symbol") {
            return;
        }

        // Fold attribute initializers and block features, in declaration
        // order, in front of the final `this`.
        let mut body = Expr::This {
            pos: class.name.span,
            class: None,
        };
        for feature in class.features.iter_mut().rev() {
            match feature {
                Feature::Init(expr) => {
                    body = Expr::Chain {
                        pre: Box::new(std::mem::take(expr)),
                        post: Box::new(body),
                    };
                }
                Feature::Attribute(attr) if !attr.native => {
                    if let Some(init) = attr.init.take() {
                        body = Expr::Chain {
                            pre: Box::new(Expr::Assign {
                                name: Ident::new(attr.name.name.clone(), attr.name.span),
                                expr: Box::new(init),
                            }),
                            post: Box::new(body),
                        };
                    }
                }
                _ => {}
            }
        }
        class.features.retain(|f| !matches!(f, Feature::Init(_)));

        let body = match class_name.as_str() {
            // Runtime-constructed classes.
            "ArrayAny" | "Coroutine" | "Channel" => Expr::Native {
                pos: class.name.span,
            },
            // The root has no super constructor to call.
            "Any" => body,
            _ => {
                let parent_ident = class.extends.ty.clone();
                let args = std::mem::take(&mut class.extends.args);
                Expr::Chain {
                    pre: Box::new(Expr::StaticCall {
                        recv: Box::new(Expr::This {
                            pos: parent_ident.span,
                            class: parent_ident.class,
                        }),
                        name: Ident::new(parent_ident.name.clone(), parent_ident.span),
                        args,
                    }),
                    post: Box::new(body),
                }
            }
        };

        let args = std::mem::take(&mut class.formals);
        let return_ty = class.name.clone();
        let name = Ident::new(class_name, class.name.span);
        class.features.push(Feature::Method(Method {
            override_: false,
            name,
            args,
            return_ty,
            body,
            slot: None,
        }));
    }

    /// Instance sizes: the parent's size plus four bytes per non-native
    /// attribute. Native attributes get runtime-managed storage and do not
    /// count. Topological order guarantees the parent is already sized.
    fn compute_sizes(&self, program: &mut Program) {
        for i in 0..program.ordered.len() {
            let c = program.ordered[i];
            let parent = self.parent_of(program, c);
            let parent_size = if parent == self.native {
                0
            } else {
                program.class(parent).size
            };
            let own: u32 = program
                .class(c)
                .attributes()
                .filter(|attr| !attr.native)
                .count() as u32;
            program.class_mut(c).size = parent_size + 4 * own;
        }
    }

    // ----- (g) method tables ----------------------------------------------

    fn build_method_tables(&mut self, program: &mut Program) {
        for i in 0..program.ordered.len() {
            let c = program.ordered[i];
            self.cur_file = program.class(c).file.clone();
            self.build_method_table(program, c);
        }
    }

    fn build_method_table(&mut self, program: &mut Program, c: ClassId) {
        let class_name = self.class_name(program, c);
        let parent = self.parent_of(program, c);
        let mut table = program.class(parent).methods.clone();
        let mut used: HashMap<String, Span> = HashMap::new();
        let mut overridden_slots = Vec::new();

        for fi in 0..program.class(c).features.len() {
            let (name, span, is_override) = match &program.class(c).features[fi] {
                Feature::Method(m) => (m.name.name.clone(), m.name.span, m.override_),
                _ => continue,
            };

            if let Some(&prev) = used.get(&name) {
                self.report(span, format!("duplicate declaration of {}", name));
                self.report(prev, "(previous declaration was here)");
                continue;
            }
            used.insert(name.clone(), span);

            // The constructor never enters the dispatch table.
            if name == class_name {
                continue;
            }

            let inherited = table
                .iter()
                .position(|slot| program.method(*slot).name.name == name);

            match (is_override, inherited) {
                (false, None) => {
                    let slot = table.len();
                    table.push(MethodSlot {
                        class: c,
                        feature: fi,
                    });
                    self.set_slot(program, c, fi, slot);
                }
                (false, Some(k)) => {
                    self.report(
                        span,
                        format!("missing 'override' on method {}.{}", class_name, name),
                    );
                    let parent_method = program.method(table[k]);
                    let (file, prev) = (
                        program.class(table[k].class).file.clone(),
                        parent_method.name.span,
                    );
                    self.report_in(&file, prev, "(previous declaration was here)");
                }
                (true, None) => {
                    self.report(
                        span,
                        format!(
                            "missing parent for 'override' method {}.{}",
                            class_name, name
                        ),
                    );
                    // Keep the method anyway so later lookups still resolve.
                    let slot = table.len();
                    table.push(MethodSlot {
                        class: c,
                        feature: fi,
                    });
                    self.set_slot(program, c, fi, slot);
                }
                (true, Some(k)) => {
                    self.check_override(program, c, fi, table[k], &class_name, &name);
                    table[k] = MethodSlot {
                        class: c,
                        feature: fi,
                    };
                    self.set_slot(program, c, fi, k);
                    overridden_slots.push(k);
                }
            }
        }

        let len = table.len();
        {
            let class = program.class_mut(c);
            class.methods = table;
            class.has_override = vec![false; len];
        }

        // An override forces dynamic dispatch for every ancestor whose
        // table carries the slot.
        for k in overridden_slots {
            let mut a = parent;
            while a != self.native && k < program.class(a).has_override.len() {
                program.class_mut(a).has_override[k] = true;
                a = self.parent_of(program, a);
            }
        }
    }

    fn set_slot(&self, program: &mut Program, c: ClassId, feature: usize, slot: usize) {
        if let Feature::Method(m) = &mut program.class_mut(c).features[feature] {
            m.slot = Some(slot);
        }
    }

    fn check_override(
        &mut self,
        program: &Program,
        c: ClassId,
        fi: usize,
        parent_slot: MethodSlot,
        class_name: &str,
        name: &str,
    ) {
        let Feature::Method(mine) = &program.class(c).features[fi] else {
            return;
        };
        let theirs = program.method(parent_slot);
        let parent_file = program.class(parent_slot.class).file.clone();

        if mine.args.len() != theirs.args.len() {
            let span = mine.name.span;
            self.report(
                span,
                format!(
                    "invalid override: method {}.{} has the wrong number of arguments",
                    class_name, name
                ),
            );
            self.report_in(&parent_file, theirs.name.span, "(parent declaration is here)");
        } else {
            for (mine_arg, their_arg) in mine.args.iter().zip(&theirs.args) {
                if mine_arg.ty.class != their_arg.ty.class {
                    let span = mine_arg.ty.span;
                    self.report(
                        span,
                        format!(
                            "invalid override: method {}.{} has an incorrect argument type",
                            class_name, name
                        ),
                    );
                    self.report_in(
                        &parent_file,
                        their_arg.ty.span,
                        "(parent declaration is here)",
                    );
                }
            }
        }

        let mine_ret = mine.return_ty.class.unwrap_or(self.error);
        let their_ret = theirs.return_ty.class.unwrap_or(self.error);
        if !self.le(program, mine_ret, their_ret) {
            let span = mine.return_ty.span;
            let ret_name = mine.return_ty.name.clone();
            let their_name = theirs.return_ty.name.clone();
            let their_span = theirs.return_ty.span;
            self.report(
                span,
                format!(
                    "invalid override: method {}.{} has incompatible return type {}",
                    class_name, name, ret_name
                ),
            );
            self.report_in(
                &parent_file,
                their_span,
                format!("(parent return type is {})", their_name),
            );
        }
    }

    // ----- (h) identifier resolution --------------------------------------

    fn resolve_identifiers(&mut self, program: &mut Program) {
        for i in 0..program.declared.len() {
            let c = program.declared[i];
            self.cur_file = program.class(c).file.clone();
            self.resolve_class_identifiers(program, c);
        }
    }

    fn resolve_class_identifiers(&mut self, program: &mut Program, c: ClassId) {
        let mut scope: Vec<ScopeEntry> = Vec::new();

        // Inherited attributes, hierarchy root first. A native attribute in
        // an ancestor marks a sealed intrinsic.
        let mut chain = Vec::new();
        let mut a = self.parent_of(program, c);
        while a != self.native {
            chain.push(a);
            a = self.parent_of(program, a);
        }
        chain.reverse();
        for &ancestor in &chain {
            let ancestor_file = program.class(ancestor).file.clone();
            let mut sealed = false;
            for feature in &program.class(ancestor).features {
                let Feature::Attribute(attr) = feature else {
                    continue;
                };
                if attr.native {
                    sealed = true;
                    continue;
                }
                scope.push(ScopeEntry {
                    name: attr.name.name.clone(),
                    file: ancestor_file.clone(),
                    span: attr.name.span,
                    ty: attr.ty.class.unwrap_or(self.error),
                    obj: ObjectRef::Attribute { class: ancestor },
                });
            }
            if sealed {
                let span = program.class(c).extends.ty.span;
                let name = self.class_name(program, ancestor);
                self.report(span, format!("cannot extend {}", name));
            }
        }

        // This class's attributes.
        for fi in 0..program.class(c).features.len() {
            let Feature::Attribute(attr) = &program.class(c).features[fi] else {
                continue;
            };
            if attr.native {
                continue;
            }
            let (name, span, ty) = (
                attr.name.name.clone(),
                attr.name.span,
                attr.ty.class.unwrap_or(self.error),
            );
            if ty == self.nothing {
                let ty_span = attr.ty.span;
                self.report(ty_span, "cannot declare attribute of type Nothing");
            }
            if let Some(prev) = scope.iter().find(|entry| entry.name == name) {
                let (prev_file, prev_span) = (prev.file.clone(), prev.span);
                self.report(span, format!("duplicate declaration of {}", name));
                self.report_in(&prev_file, prev_span, "(previous declaration was here)");
            } else {
                scope.push(ScopeEntry {
                    name,
                    file: self.cur_file.clone(),
                    span,
                    ty,
                    obj: ObjectRef::Attribute { class: c },
                });
            }
        }

        // Method bodies, constructor included.
        for fi in 0..program.class(c).features.len() {
            let Feature::Method(method) = &program.class(c).features[fi] else {
                continue;
            };
            let mut method_scope = scope.clone();
            let mut seen: HashMap<String, Span> = HashMap::new();
            let mut arg_info = Vec::new();
            for (index, arg) in method.args.iter().enumerate() {
                arg_info.push((
                    arg.name.name.clone(),
                    arg.name.span,
                    arg.ty.class.unwrap_or(self.error),
                    index,
                ));
            }
            let return_ty = method.return_ty.class.unwrap_or(self.error);

            for (name, span, ty, index) in arg_info {
                if let Some(&prev) = seen.get(&name) {
                    self.report(span, format!("duplicate declaration of {}", name));
                    self.report(prev, "(previous declaration was here)");
                    continue;
                }
                seen.insert(name.clone(), span);
                method_scope.push(ScopeEntry {
                    name,
                    file: self.cur_file.clone(),
                    span,
                    ty,
                    obj: ObjectRef::Formal { index },
                });
            }

            // Detach the body so the arena stays borrowable while checking.
            let mut body = match &mut program.class_mut(c).features[fi] {
                Feature::Method(m) => std::mem::take(&mut m.body),
                _ => unreachable!(),
            };
            let body_ty = self.check_expr(program, c, &mut body, &mut method_scope);
            let body_span = body.pos();
            if let Feature::Method(m) = &mut program.class_mut(c).features[fi] {
                m.body = body;
            }
            self.conform(program, body_ty, return_ty, body_span);
        }
    }

    fn scope_lookup<'s>(scope: &'s [ScopeEntry], name: &str) -> Option<&'s ScopeEntry> {
        scope.iter().rev().find(|entry| entry.name == name)
    }

    /// Type-check an expression, binding identifiers as it goes. Returns
    /// the inferred class, substituting `Nothing`/the error class on
    /// failures that were already reported.
    fn check_expr(
        &mut self,
        program: &Program,
        cur: ClassId,
        expr: &mut Expr,
        scope: &mut Vec<ScopeEntry>,
    ) -> ClassId {
        match expr {
            Expr::Not { pos, expr } => {
                let pos = *pos;
                let t = self.check_expr(program, cur, expr, scope);
                self.conform(program, t, self.boolean, pos);
                self.boolean
            }
            Expr::Negative { pos, expr } => {
                // -2147483648 is the one place the maximum literal is legal.
                if matches!(**expr, Expr::Int { value, .. } if value == MAX_INT_LITERAL) {
                    return self.int;
                }
                let pos = *pos;
                let t = self.check_expr(program, cur, expr, scope);
                self.conform(program, t, self.int, pos);
                self.int
            }
            Expr::If {
                pos,
                cond,
                then_arm,
                else_arm,
            } => {
                let pos = *pos;
                let t = self.check_expr(program, cur, cond, scope);
                self.conform(program, t, self.boolean, pos);
                let then_t = self.check_expr(program, cur, then_arm, scope);
                let else_t = self.check_expr(program, cur, else_arm, scope);
                self.lub2(program, then_t, else_t)
            }
            Expr::While { pos, cond, body } => {
                let pos = *pos;
                let t = self.check_expr(program, cur, cond, scope);
                self.conform(program, t, self.boolean, pos);
                self.check_expr(program, cur, body, scope);
                self.unit
            }
            Expr::Binary {
                op,
                pos,
                left,
                right,
            } => {
                let (op, pos) = (*op, *pos);
                let left_t = self.check_expr(program, cur, left, scope);
                let right_t = self.check_expr(program, cur, right, scope);
                self.conform(program, left_t, self.int, pos);
                self.conform(program, right_t, self.int, pos);
                if op.is_comparison() {
                    self.boolean
                } else {
                    self.int
                }
            }
            Expr::Match {
                scrutinee,
                cases,
                binding,
                ..
            } => {
                let binding = *binding;
                let left = self.check_expr(program, cur, scrutinee, scope);
                self.check_match(program, cur, left, binding, cases, scope)
            }
            Expr::DynamicCall {
                recv,
                name,
                args,
                has_override,
            } => {
                let recv_t = self.check_expr(program, cur, recv, scope);
                let resolved = program
                    .class(recv_t)
                    .methods
                    .iter()
                    .enumerate()
                    .find(|(_, slot)| program.method(**slot).name.name == name.name)
                    .map(|(k, slot)| (k, *slot));
                match resolved {
                    Some((k, slot)) => {
                        name.method = Some(slot);
                        *has_override = program.class(recv_t).has_override[k];
                        let name_span = name.span;
                        self.check_call_args(program, cur, slot, name_span, args, scope)
                    }
                    None => {
                        let message = format!(
                            "undeclared method {}.{}",
                            self.class_name(program, recv_t),
                            name.name
                        );
                        let span = name.span;
                        self.report(span, message);
                        self.nothing
                    }
                }
            }
            Expr::SuperCall {
                name, args, parent, ..
            } => {
                let parent = parent.unwrap_or(self.error);
                let resolved = program
                    .class(parent)
                    .methods
                    .iter()
                    .find(|slot| program.method(**slot).name.name == name.name)
                    .copied();
                match resolved {
                    Some(slot) => {
                        name.method = Some(slot);
                        let name_span = name.span;
                        self.check_call_args(program, cur, slot, name_span, args, scope)
                    }
                    None => {
                        let message = format!(
                            "undeclared method {}.{}",
                            self.class_name(program, parent),
                            name.name
                        );
                        let span = name.span;
                        self.report(span, message);
                        self.nothing
                    }
                }
            }
            Expr::StaticCall { recv, name, args } => {
                let recv_t = self.check_expr(program, cur, recv, scope);
                let resolved = program
                    .class(recv_t)
                    .features
                    .iter()
                    .enumerate()
                    .find_map(|(fi, feature)| match feature {
                        Feature::Method(m) if m.name.name == name.name => Some(MethodSlot {
                            class: recv_t,
                            feature: fi,
                        }),
                        _ => None,
                    });
                match resolved {
                    Some(slot) => {
                        name.method = Some(slot);
                        let name_span = name.span;
                        self.check_call_args(program, cur, slot, name_span, args, scope)
                    }
                    None => {
                        let message = format!(
                            "undeclared method {}.{}",
                            self.class_name(program, recv_t),
                            name.name
                        );
                        let span = name.span;
                        self.report(span, message);
                        self.nothing
                    }
                }
            }
            Expr::Alloc { ty } => ty.class.unwrap_or(self.error),
            Expr::Assign { name, expr } => {
                match Self::scope_lookup(scope, &name.name) {
                    Some(entry) => {
                        name.object = Some(entry.obj);
                        let target = entry.ty;
                        let span = expr.pos();
                        let t = self.check_expr(program, cur, expr, scope);
                        self.conform(program, t, target, span);
                    }
                    None => {
                        let message = format!("undeclared identifier {}", name.name);
                        let span = name.span;
                        self.report(span, message);
                        self.check_expr(program, cur, expr, scope);
                    }
                }
                self.unit
            }
            Expr::Var {
                name,
                ty,
                init,
                body,
                binding,
            } => {
                let declared = ty.class.unwrap_or(self.error);
                let binding = *binding;
                if let Some(prev) = Self::scope_lookup(scope, &name.name) {
                    let (prev_file, prev_span) = (prev.file.clone(), prev.span);
                    let span = name.span;
                    let message = format!("duplicate declaration of {}", name.name);
                    self.report(span, message);
                    self.report_in(&prev_file, prev_span, "(previous declaration was here)");
                    return self.check_expr(program, cur, body, scope);
                }
                let init_span = init.pos();
                let init_t = self.check_expr(program, cur, init, scope);
                self.conform(program, init_t, declared, init_span);
                scope.push(ScopeEntry {
                    name: name.name.clone(),
                    file: self.cur_file.clone(),
                    span: name.span,
                    ty: declared,
                    obj: ObjectRef::Local {
                        binding,
                        raw_int: declared == self.int,
                    },
                });
                name.object = scope.last().map(|entry| entry.obj);
                let t = self.check_expr(program, cur, body, scope);
                scope.pop();
                t
            }
            Expr::Chain { pre, post } => {
                self.check_expr(program, cur, pre, scope);
                self.check_expr(program, cur, post, scope)
            }
            Expr::This { class, .. } => class.unwrap_or(cur),
            Expr::Null { .. } => self.null,
            Expr::Unit { .. } => self.unit,
            Expr::NameRef { name } => match Self::scope_lookup(scope, &name.name) {
                Some(entry) => {
                    name.object = Some(entry.obj);
                    entry.ty
                }
                None => {
                    let message = format!("undeclared identifier {}", name.name);
                    let span = name.span;
                    self.report(span, message);
                    self.nothing
                }
            },
            Expr::Str { .. } => self.string,
            Expr::Bool { .. } => self.boolean,
            Expr::Int { pos, value } => {
                if *value > MAX_INT_LITERAL - 1 {
                    let span = *pos;
                    self.report(span, format!("integer literal {} out of range", value));
                }
                self.int
            }
            Expr::Native { .. } => self.nothing,
        }
    }

    fn check_call_args(
        &mut self,
        program: &Program,
        cur: ClassId,
        slot: MethodSlot,
        call_span: Span,
        args: &mut [Expr],
        scope: &mut Vec<ScopeEntry>,
    ) -> ClassId {
        let method = program.method(slot);
        let return_ty = method.return_ty.class.unwrap_or(self.error);
        if method.args.len() != args.len() {
            let decl_span = method.name.span;
            let decl_file = program.class(slot.class).file.clone();
            self.report(call_span, "wrong number of method arguments");
            self.report_in(&decl_file, decl_span, "(method is declared here)");
            // Still check the argument expressions for their own errors.
            for arg in args {
                self.check_expr(program, cur, arg, scope);
            }
            return return_ty;
        }
        let expected: Vec<ClassId> = method
            .args
            .iter()
            .map(|arg| arg.ty.class.unwrap_or(self.error))
            .collect();
        for (arg, want) in args.iter_mut().zip(expected) {
            let span = arg.pos();
            let t = self.check_expr(program, cur, arg, scope);
            self.conform(program, t, want, span);
        }
        return_ty
    }

    fn check_match(
        &mut self,
        program: &Program,
        cur: ClassId,
        left: ClassId,
        binding: crate::ast::BindingId,
        cases: &mut [Case],
        scope: &mut Vec<ScopeEntry>,
    ) -> ClassId {
        let max_tag = program.ordered.len();
        let mut possible = vec![false; max_tag + 1];

        // A scrutinee of type Nothing has no values at all; reachability
        // accounting is skipped so the (vacuously correct) cases are not
        // flagged. The error class gets the same treatment to avoid
        // cascades.
        let vacuous = left == self.nothing || left == self.error;
        if !vacuous {
            if left == self.null {
                possible[0] = true;
            } else {
                if self.lub2(program, self.null, left) == left {
                    // Nullable scrutinee: the null tag is reachable.
                    possible[0] = true;
                }
                let class = program.class(left);
                for tag in class.order..=class.max_order {
                    possible[tag as usize] = true;
                }
                // Ancestors stay reachable so upcast cases are legal.
                let mut a = self.parent_of(program, left);
                while a != self.native {
                    possible[program.class(a).order as usize] = true;
                    a = self.parent_of(program, a);
                }
            }
        }

        let mut case_types = Vec::with_capacity(cases.len());
        for case in cases {
            let case_ty = case.ty.class.unwrap_or(self.error);
            let mut consumed = vacuous || case_ty == self.error;
            if !vacuous {
                let range = if case_ty == self.nothing {
                    // There are no values of type Nothing.
                    None
                } else if case_ty == self.null {
                    Some((0u32, 0u32))
                } else if case_ty == self.error {
                    None
                } else {
                    let class = program.class(case_ty);
                    Some((class.order, class.max_order))
                };
                if let Some((lo, hi)) = range {
                    for tag in lo..=hi {
                        if possible[tag as usize] {
                            possible[tag as usize] = false;
                            consumed = true;
                        }
                    }
                }
            }
            if !consumed {
                let span = case.ty.span;
                let message = format!("unreachable case for type {}", case.ty.name);
                self.report(span, message);
            }

            scope.push(ScopeEntry {
                name: case.name.name.clone(),
                file: self.cur_file.clone(),
                span: case.name.span,
                ty: case_ty,
                obj: ObjectRef::MatchBinder { binding },
            });
            case.name.object = scope.last().map(|entry| entry.obj);
            case_types.push(self.check_expr(program, cur, &mut case.body, scope));
            scope.pop();
        }

        self.lub(program, &case_types)
    }

    // ----- (j) entry expression -------------------------------------------

    fn synthesize_main(&mut self, program: &mut Program) {
        let new_of = |analyzer: &Analyzer, name: &str, args: Vec<Expr>| -> Expr {
            let class = program.find_class(name);
            let mut ty = Ident::synthetic(name);
            ty.class = Some(class.unwrap_or(analyzer.error));
            Expr::StaticCall {
                recv: Box::new(Expr::Alloc { ty }),
                name: Ident::synthetic(name),
                args,
            }
        };

        let mut entry = if self.config.coroutine {
            // The initial coroutine constructs the user's Main; the program
            // ends when that constructor returns.
            let runnable = new_of(self, "runtimeMain", Vec::new());
            new_of(self, "Coroutine", vec![runnable])
        } else {
            new_of(self, "Main", Vec::new())
        };

        if self.config.benchmark > 1 {
            let binding = program.fresh_binding();
            let mut int_ident = Ident::synthetic("Int");
            int_ident.class = Some(self.int);
            let counter = || Expr::NameRef {
                name: Ident::synthetic("'i"),
            };
            let int_lit = |value: i64| Expr::Int {
                pos: Span::default(),
                value,
            };
            entry = Expr::Var {
                name: Ident::synthetic("'i"),
                ty: int_ident,
                init: Box::new(int_lit(0)),
                body: Box::new(Expr::While {
                    pos: Span::default(),
                    cond: Box::new(Expr::Binary {
                        op: BinaryOp::Less,
                        pos: Span::default(),
                        left: Box::new(counter()),
                        right: Box::new(int_lit(i64::from(self.config.benchmark))),
                    }),
                    body: Box::new(Expr::Chain {
                        pre: Box::new(entry),
                        post: Box::new(Expr::Assign {
                            name: Ident::synthetic("'i"),
                            expr: Box::new(Expr::Binary {
                                op: BinaryOp::Add,
                                pos: Span::default(),
                                left: Box::new(counter()),
                                right: Box::new(int_lit(1)),
                            }),
                        }),
                    }),
                }),
                binding,
            };
        }

        self.cur_file = PathBuf::from("<main>");
        let mut scope = Vec::new();
        self.check_expr(program, self.main, &mut entry, &mut scope);
        program.main = Some(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_file;
    use crate::prelude;

    fn analyze_source(source: &str) -> Result<Program, Vec<Diagnostic>> {
        analyze_with(source, &CompilerConfig::default())
    }

    fn analyze_with(source: &str, config: &CompilerConfig) -> Result<Program, Vec<Diagnostic>> {
        let mut program = Program::new();
        parse_file(
            prelude::BASIC,
            Path::new("basic.cool"),
            true,
            &mut program,
        )
        .expect("prelude parses");
        parse_file(source, Path::new("test.cool"), false, &mut program)
            .map_err(|e| vec![e])?;
        analyze(&mut program, config)?;
        Ok(program)
    }

    fn messages(errs: Vec<Diagnostic>) -> String {
        errs.iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_minimal_program_analyzes() {
        let program = analyze_source("class Main() { }").expect("analysis succeeds");
        assert!(program.main.is_some());
        let main = program.find_class("Main").unwrap();
        assert!(program.class(main).order > 0);
    }

    #[test]
    fn test_order_intervals_cover_subtrees() {
        let program = analyze_source(
            "class Main() { }
             class A() { }
             class B() extends A() { }
             class C() extends A() { }
             class D() extends B() { }",
        )
        .unwrap();

        // Interval invariant: order <= max_order everywhere, and a class's
        // interval is exactly the orders of its descendants.
        for &c in &program.ordered {
            let class = program.class(c);
            assert!(class.order <= class.max_order, "{}", class.name.name);
        }
        let id = |name: &str| program.find_class(name).unwrap();
        for (child, ancestor) in [("B", "A"), ("C", "A"), ("D", "A"), ("D", "B")] {
            let child = program.class(id(child));
            let ancestor = program.class(id(ancestor));
            assert!(
                ancestor.order < child.order && child.order <= ancestor.max_order,
                "{} should fall inside {}'s interval",
                child.name.name,
                ancestor.name.name
            );
        }
        let b = program.class(id("B"));
        let c = program.class(id("C"));
        assert!(c.order > b.max_order || c.max_order < b.order);

        // Depth grows by one per extends link.
        assert_eq!(
            program.class(id("D")).depth,
            program.class(id("B")).depth + 1
        );
    }

    #[test]
    fn test_subtype_laws() {
        let mut program = Program::new();
        parse_file(prelude::BASIC, Path::new("basic.cool"), true, &mut program).unwrap();
        parse_file(
            "class Main() { }\nclass A() { }\nclass B() extends A() { }",
            Path::new("test.cool"),
            false,
            &mut program,
        )
        .unwrap();
        let config = CompilerConfig::default();
        let mut analyzer = Analyzer::new(&mut program, &config);
        analyzer.check_class_names(&mut program);
        analyzer.resolve_types(&mut program);
        analyzer.resolve_required_classes(&program);
        analyzer.order_hierarchy(&mut program);
        assert!(analyzer.diags.is_empty());

        let id = |name: &str| program.find_class(name).unwrap();
        let (a, b, any, int) = (id("A"), id("B"), id("Any"), id("Int"));

        // Reflexive, transitive along extends, antisymmetric.
        assert!(analyzer.le(&program, a, a));
        assert!(analyzer.le(&program, b, a) && analyzer.le(&program, a, any));
        assert!(analyzer.le(&program, b, any));
        assert!(!analyzer.le(&program, a, b));

        // Nothing below everything; Null below reference types only.
        assert!(analyzer.le(&program, analyzer.nothing, int));
        assert!(analyzer.le(&program, analyzer.null, a));
        assert!(analyzer.le(&program, analyzer.null, id("String")));
        assert!(!analyzer.le(&program, analyzer.null, int));
        assert!(!analyzer.le(&program, analyzer.null, id("Boolean")));
        assert!(!analyzer.le(&program, analyzer.null, id("Unit")));
        assert!(!analyzer.le(&program, analyzer.null, analyzer.nothing));

        // lub laws.
        assert_eq!(analyzer.lub2(&program, a, analyzer.nothing), a);
        assert_eq!(analyzer.lub2(&program, a, a), a);
        assert_eq!(analyzer.lub2(&program, a, b), a);
        assert_eq!(analyzer.lub2(&program, a, int), any);
        let join = analyzer.lub2(&program, b, id("IO"));
        assert!(analyzer.le(&program, b, join) && analyzer.le(&program, id("IO"), join));
    }

    #[test]
    fn test_duplicate_class_rejected() {
        let errs = analyze_source("class Main() { }\nclass Main() { }").unwrap_err();
        assert!(messages(errs).contains("duplicate declaration of class Main"));
    }

    #[test]
    fn test_unknown_type_reported() {
        let errs = analyze_source("class Main() { var x : Missing = null; }").unwrap_err();
        assert!(messages(errs).contains("use of undeclared class Missing"));
    }

    #[test]
    fn test_missing_main_is_fatal() {
        let errs = analyze_source("class NotMain() { }").unwrap_err();
        assert!(messages(errs).contains("missing required class: Main"));
    }

    #[test]
    fn test_hierarchy_loop_detected() {
        let errs = analyze_source(
            "class Main() { }
             class A() extends B() { }
             class B() extends A() { }",
        )
        .unwrap_err();
        let text = messages(errs);
        assert!(text.contains("class hierarchy loop: A"));
        assert!(text.contains("class hierarchy loop: B"));
    }

    #[test]
    fn test_extending_intrinsic_rejected() {
        let errs = analyze_source("class Main() { }\nclass MyInt() extends Int() { }").unwrap_err();
        assert!(messages(errs).contains("cannot extend Int"));
    }

    #[test]
    fn test_override_requires_keyword() {
        let errs = analyze_source(
            "class Main() { }
             class A() { def f() : Int = 1; }
             class B() extends A() { def f() : Int = 2; }",
        )
        .unwrap_err();
        assert!(messages(errs).contains("missing 'override' on method B.f"));
    }

    #[test]
    fn test_override_without_parent_rejected() {
        let errs =
            analyze_source("class Main() { override def f() : Int = 1; }").unwrap_err();
        assert!(messages(errs).contains("missing parent for 'override' method Main.f"));
    }

    #[test]
    fn test_override_arity_and_types_checked() {
        let errs = analyze_source(
            "class Main() { }
             class A() { def f(x : Int) : A = this; }
             class B() extends A() { override def f(x : String) : A = this; }
             class C() extends A() { override def f(x : Int, y : Int) : A = this; }
             class D() extends A() { override def f(x : Int) : Int = 1; }",
        )
        .unwrap_err();
        let text = messages(errs);
        assert!(text.contains("method B.f has an incorrect argument type"));
        assert!(text.contains("method C.f has the wrong number of arguments"));
        assert!(text.contains("method D.f has incompatible return type Int"));
    }

    #[test]
    fn test_covariant_return_override_allowed() {
        let program = analyze_source(
            "class Main() { }
             class A() { def self() : A = this; }
             class B() extends A() { override def self() : B = this; }",
        )
        .unwrap();
        let b = program.find_class("B").unwrap();
        // B's table patches the inherited slot with its own method.
        let slot_owner = program.class(b).methods.iter().find(|slot| {
            program.method(**slot).name.name == "self"
        });
        assert_eq!(slot_owner.unwrap().class, b);
    }

    #[test]
    fn test_override_marks_ancestor() {
        let program = analyze_source(
            "class Main() { }
             class A() { def greet() : String = \"A\"; }
             class B() extends A() { override def greet() : String = \"B\"; }",
        )
        .unwrap();
        let id = |name: &str| program.find_class(name).unwrap();
        let a = program.class(id("A"));
        let b = program.class(id("B"));
        let slot = a
            .methods
            .iter()
            .position(|s| program.method(*s).name.name == "greet")
            .unwrap();
        assert!(a.has_override[slot], "A must require dynamic dispatch");
        assert!(!b.has_override[slot], "B's own method is never overridden");
    }

    #[test]
    fn test_constructor_not_in_dispatch_table() {
        let program = analyze_source("class Main() { }").unwrap();
        let main = program.find_class("Main").unwrap();
        assert!(
            program
                .class(main)
                .methods
                .iter()
                .all(|slot| program.method(*slot).name.name != "Main")
        );
    }

    #[test]
    fn test_constructor_chains_to_parent_and_assigns_formals() {
        let program = analyze_source(
            "class Main() { }
             class A(var x : Int) { var y : Int = x + 1; }",
        )
        .unwrap();
        let a = program.find_class("A").unwrap();
        let class = program.class(a);
        // The formal is mirrored as an attribute that precedes y.
        let attrs: Vec<_> = class.attributes().map(|attr| attr.name.name.clone()).collect();
        assert_eq!(attrs, vec!["x", "y"]);
        // The constructor exists as a feature named after the class, with
        // the renamed formal and a body chaining the super call first.
        let ctor = class
            .features
            .iter()
            .find_map(|f| match f {
                Feature::Method(m) if m.name.name == "A" => Some(m),
                _ => None,
            })
            .expect("constructor synthesized");
        assert_eq!(ctor.args.len(), 1);
        assert_eq!(ctor.args[0].name.name, "'x");
        assert!(matches!(&ctor.body, Expr::Chain { pre, .. }
            if matches!(pre.as_ref(), Expr::StaticCall { .. })));
    }

    #[test]
    fn test_attribute_of_type_nothing_rejected() {
        let errs = analyze_source("class Main() { var x : Nothing = abort(\"\"); }")
            .unwrap_err();
        assert!(messages(errs).contains("cannot declare attribute of type Nothing"));
    }

    #[test]
    fn test_type_conformance_enforced() {
        let errs =
            analyze_source("class Main() { var x : Int = \"nope\"; }").unwrap_err();
        assert!(messages(errs).contains("type String does not conform to type Int"));
    }

    #[test]
    fn test_null_not_allowed_for_value_types() {
        let errs = analyze_source("class Main() { var x : Int = null; }").unwrap_err();
        assert!(messages(errs).contains("type Null does not conform to type Int"));
    }

    #[test]
    fn test_undeclared_identifier() {
        let errs = analyze_source("class Main() { { ghost } }").unwrap_err();
        assert!(messages(errs).contains("undeclared identifier ghost"));
    }

    #[test]
    fn test_undeclared_method() {
        let errs = analyze_source("class Main() { { new IO().shout(\"hi\") } }").unwrap_err();
        assert!(messages(errs).contains("undeclared method IO.shout"));
    }

    #[test]
    fn test_wrong_argument_count() {
        let errs = analyze_source("class Main() { { new IO().out() } }").unwrap_err();
        assert!(messages(errs).contains("wrong number of method arguments"));
    }

    #[test]
    fn test_duplicate_local_rejected() {
        let errs = analyze_source(
            "class Main() { def f() : Int = { var x : Int = 1; var x : Int = 2; x }; }",
        )
        .unwrap_err();
        assert!(messages(errs).contains("duplicate declaration of x"));
    }

    #[test]
    fn test_match_unreachable_case() {
        let errs = analyze_source(
            "class Main() { }
             class A() { }
             class B() extends A() { }
             class D() { }
             class T() {
               def f(x : A) : Int = x match {
                 case b:B => 1
                 case d:D => 2
               };
             }",
        )
        .unwrap_err();
        assert!(messages(errs).contains("unreachable case for type D"));
    }

    #[test]
    fn test_match_case_order_reachability() {
        // A case that repeats an already-consumed range is unreachable.
        let errs = analyze_source(
            "class Main() {
               def f(x : Any) : Int = x match {
                 case a:Any => 1
                 case b:Any => 2
               };
             }",
        )
        .unwrap_err();
        assert!(messages(errs).contains("unreachable case for type Any"));
    }

    #[test]
    fn test_match_upcast_case_is_reachable() {
        let result = analyze_source(
            "class Main() {
               def f(x : IO) : Int = x match {
                 case a:Any => 1
               };
             }",
        );
        assert!(result.is_ok(), "ancestor cases are reachable");
    }

    #[test]
    fn test_match_null_case_and_binder_type() {
        let program = analyze_source(
            "class Main() {
               def f(x : String) : String = x match {
                 case null => \"null\"
                 case s:String => s
               };
             }",
        )
        .unwrap();
        assert!(program.main.is_some());
    }

    #[test]
    fn test_match_on_nothing_is_vacuously_legal() {
        let result = analyze_source(
            "class Main() {
               def f() : Int = new IO().abort(\"gone\") match {
                 case x:Any => 1
               };
             }",
        );
        assert!(result.is_ok(), "match on Nothing must type-check");
    }

    #[test]
    fn test_negative_int_min_accepted_and_bare_max_rejected() {
        assert!(analyze_source("class Main() { var x : Int = -2147483648; }").is_ok());
        let errs = analyze_source("class Main() { var x : Int = 2147483648; }").unwrap_err();
        assert!(messages(errs).contains("out of range"));
    }

    #[test]
    fn test_if_type_is_lub_of_arms() {
        // lub(B, C) = A, so assigning to an A variable must be accepted.
        let result = analyze_source(
            "class Main() { }
             class A() { }
             class B() extends A() { }
             class C() extends A() { }
             class T() {
               def f(p : Boolean) : A = if (p) new B() else new C();
             }",
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_dynamic_call_records_override_flag() {
        let program = analyze_source(
            "class Main() { }
             class A() { def greet() : String = \"A\"; }
             class B() extends A() { override def greet() : String = \"B\"; }
             class T() {
               def f(a : A, b : B) : String = { a.greet(); b.greet() };
             }",
        )
        .unwrap();
        let t = program.find_class("T").unwrap();
        let Feature::Method(m) = program
            .class(t)
            .features
            .iter()
            .find(|f| matches!(f, Feature::Method(m) if m.name.name == "f"))
            .unwrap()
        else {
            unreachable!()
        };
        let Expr::Chain { pre, post } = &m.body else {
            panic!("expected chained calls");
        };
        assert!(
            matches!(pre.as_ref(), Expr::DynamicCall { has_override: true, .. }),
            "call through A needs table dispatch"
        );
        assert!(
            matches!(post.as_ref(), Expr::DynamicCall { has_override: false, .. }),
            "call through B can be devirtualized"
        );
    }

    #[test]
    fn test_super_call_resolves_against_parent() {
        let result = analyze_source(
            "class Main() { }
             class A() { def f() : Int = 1; }
             class B() extends A() { override def f() : Int = super.f() + 1; }",
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_benchmark_wraps_main_in_loop() {
        let config = CompilerConfig::new().with_benchmark(3);
        let program = analyze_with("class Main() { }", &config).unwrap();
        match program.main.as_ref().unwrap() {
            Expr::Var { body, .. } => {
                assert!(matches!(body.as_ref(), Expr::While { .. }));
            }
            other => panic!("expected benchmark loop, got {:?}", other),
        }
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let source = "class Main() { }
             class A(var x : Int) { def f() : Int = x; }
             class B() extends A(41) { override def f() : Int = super.f() + 1; }";
        let one = analyze_source(source).unwrap();
        let two = analyze_source(source).unwrap();
        for (&c1, &c2) in one.ordered.iter().zip(&two.ordered) {
            let (a, b) = (one.class(c1), two.class(c2));
            assert_eq!(a.name.name, b.name.name);
            assert_eq!((a.order, a.max_order, a.depth), (b.order, b.max_order, b.depth));
            assert_eq!(a.methods.len(), b.methods.len());
        }
    }
}
