//! Abstract syntax tree for Cool
//!
//! Classes live in an arena owned by [`Program`] and are referred to by
//! [`ClassId`] everywhere else, including from the sentinel classes the
//! analyzer installs (`Nothing`, `Null`, the internal `native` root, and the
//! error class). This keeps the class graph cyclic-reference-free while
//! still allowing O(1) dereference.
//!
//! Identifier occurrences ([`Ident`]) are created by the parser with only a
//! name and a position; semantic analysis late-binds at most one of a class,
//! a method, or an object storage location onto each occurrence.

use std::collections::HashMap;
use std::path::PathBuf;

/// Index of a class in the [`Program`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub u32);

/// Identity of a `var` local or `match` binder, assigned at parse time.
///
/// Code generation maps binding ids to stack slots, so binder identity must
/// survive optimizer rewrites; rewrites happen in place and never renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingId(pub u32);

/// A method's position in a class: the owning class and the index of the
/// `Feature::Method` in its feature list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSlot {
    pub class: ClassId,
    pub feature: usize,
}

/// Source position of a single token (0-indexed; displayed 1-indexed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(line: usize, column: usize) -> Self {
        Span { line, column }
    }
}

/// A whole program: every parsed class (prelude first), plus the derived
/// state filled in by semantic analysis.
#[derive(Debug, Default)]
pub struct Program {
    /// Class arena. Includes the analyzer's sentinel classes; use
    /// [`Program::declared`] to iterate source-declared classes only.
    pub classes: Vec<Class>,
    /// Source-declared classes in the order they were read.
    pub declared: Vec<ClassId>,
    /// Name to class, populated by the analyzer (includes `Nothing`/`Null`).
    pub class_map: HashMap<String, ClassId>,
    /// Topological ordering of the declared classes; position + 1 is the
    /// class tag.
    pub ordered: Vec<ClassId>,
    /// Generated entry expression, equivalent to `new Main()` (possibly
    /// wrapped for benchmarking or coroutine startup).
    pub main: Option<Expr>,
    next_binding: u32,
}

impl Program {
    pub fn new() -> Self {
        Program::default()
    }

    pub fn class(&self, id: ClassId) -> &Class {
        &self.classes[id.0 as usize]
    }

    pub fn class_mut(&mut self, id: ClassId) -> &mut Class {
        &mut self.classes[id.0 as usize]
    }

    /// Append a class to the arena, returning its id.
    pub fn add_class(&mut self, class: Class) -> ClassId {
        let id = ClassId(self.classes.len() as u32);
        self.classes.push(class);
        id
    }

    /// Append a source-declared class (parser entry point).
    pub fn declare_class(&mut self, class: Class) -> ClassId {
        let id = self.add_class(class);
        self.declared.push(id);
        id
    }

    /// A fresh binder identity for a `var` or `match` expression.
    pub fn fresh_binding(&mut self) -> BindingId {
        let id = BindingId(self.next_binding);
        self.next_binding += 1;
        id
    }

    /// The method a slot points at.
    pub fn method(&self, slot: MethodSlot) -> &Method {
        match &self.class(slot.class).features[slot.feature] {
            Feature::Method(m) => m,
            other => panic!("method slot points at non-method feature: {:?}", other),
        }
    }

    pub fn find_class(&self, name: &str) -> Option<ClassId> {
        self.class_map.get(name).copied()
    }
}

/// A Cool class declaration plus the state derived during analysis.
#[derive(Debug, Default)]
pub struct Class {
    /// File the class was declared in, used for diagnostics.
    pub file: PathBuf,
    /// True for classes from the embedded prelude; only these may use
    /// `native` features.
    pub is_prelude: bool,
    /// The class name.
    pub name: Ident,
    /// Constructor parameters as written. Moved into the synthesized
    /// constructor method during analysis.
    pub formals: Vec<Formal>,
    /// The `extends` clause, or a generated `extends Any()`.
    pub extends: Extends,
    /// Features in declaration order. Analysis prepends mirror attributes
    /// for the formals and appends the synthesized constructor.
    pub features: Vec<Feature>,

    /// Position in the topological ordering; doubles as the runtime class
    /// tag. A class with order x and max_order y is an ancestor of every
    /// class with x < order <= y.
    pub order: u32,
    /// Highest order of any descendant, or `order` for a leaf.
    pub max_order: u32,
    /// Depth in the hierarchy; `Any` is 1.
    pub depth: u32,

    /// Dispatch table: the parent's table with overrides patched in and new
    /// methods appended.
    pub methods: Vec<MethodSlot>,
    /// Per-slot flag: true if any descendant overrides the method, in which
    /// case a dynamic dispatch cannot be devirtualized.
    pub has_override: Vec<bool>,

    /// Instance size in bytes, excluding the object header and native
    /// fields. Includes inherited attributes.
    pub size: u32,
}

impl Class {
    /// Resolved parent class, if type resolution has run.
    pub fn parent(&self) -> Option<ClassId> {
        self.extends.ty.class
    }

    /// Iterate this class's attribute features.
    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.features.iter().filter_map(|f| match f {
            Feature::Attribute(a) => Some(a),
            _ => None,
        })
    }
}

/// The `extends` clause of a class.
#[derive(Debug, Default)]
pub struct Extends {
    pub ty: Ident,
    /// Arguments to the parent constructor. Moved into the synthesized
    /// constructor during analysis.
    pub args: Vec<Expr>,
}

/// A method or constructor parameter.
#[derive(Debug, Clone)]
pub struct Formal {
    pub name: Ident,
    pub ty: Ident,
}

/// A class feature.
#[derive(Debug)]
pub enum Feature {
    /// A block feature `{ expr }`, inlined into the constructor and then
    /// dropped from the feature list.
    Init(Expr),
    Attribute(Attribute),
    Method(Method),
}

/// A `var` feature.
#[derive(Debug)]
pub struct Attribute {
    pub name: Ident,
    /// Declared type; the name `native` for runtime-backed storage.
    pub ty: Ident,
    /// Initializer. `None` for native attributes, and taken by constructor
    /// synthesis for the rest.
    pub init: Option<Expr>,
    /// True for `var x = native`.
    pub native: bool,
}

/// A `def` feature, or the synthesized constructor (named after its class,
/// never placed in the dispatch table).
#[derive(Debug)]
pub struct Method {
    pub override_: bool,
    pub name: Ident,
    pub args: Vec<Formal>,
    pub return_ty: Ident,
    pub body: Expr,
    /// Dispatch-table index, assigned during method-table construction.
    /// `None` for constructors.
    pub slot: Option<usize>,
}

impl Method {
    /// True for methods implemented by the runtime; no code is emitted.
    pub fn is_native(&self) -> bool {
        matches!(self.body, Expr::Native { .. })
    }
}

/// Storage location of a named value, recorded on the identifier that
/// references it. The stack is reference-counted; the heap is garbage
/// collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectRef {
    /// Method parameter: stack-resident at a positive offset from `%ebp`.
    Formal { index: usize },
    /// Attribute: heap-resident at a named offset within `this`.
    Attribute { class: ClassId },
    /// `var` local: stack-resident at a negative offset from `%ebp`.
    /// Locals declared `Int` hold an unboxed 32-bit value.
    Local { binding: BindingId, raw_int: bool },
    /// `match` binder: aliases the scrutinee's stack slot.
    MatchBinder { binding: BindingId },
}

impl ObjectRef {
    /// True if the storage holds an unboxed integer rather than a pointer.
    pub fn raw_int(&self) -> bool {
        matches!(self, ObjectRef::Local { raw_int: true, .. })
    }
}

/// An object or type identifier occurrence. At most one of `class`,
/// `method`, `object` is bound by semantic analysis.
#[derive(Debug, Clone, Default)]
pub struct Ident {
    pub name: String,
    pub span: Span,
    pub class: Option<ClassId>,
    pub method: Option<MethodSlot>,
    pub object: Option<ObjectRef>,
}

impl Ident {
    pub fn new(name: impl Into<String>, span: Span) -> Self {
        Ident {
            name: name.into(),
            span,
            class: None,
            method: None,
            object: None,
        }
    }

    /// A generated identifier with no useful source position.
    pub fn synthetic(name: impl Into<String>) -> Self {
        Ident::new(name, Span::default())
    }
}

/// Binary operators. Comparisons produce `Boolean`; the rest produce `Int`.
/// `==` does not appear here: the parser desugars it to a dynamic `equals`
/// call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    LessEq,
    Less,
    Mul,
    Div,
    Add,
    Sub,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::LessEq => "<=",
            BinaryOp::Less => "<",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(self, BinaryOp::LessEq | BinaryOp::Less)
    }
}

/// An expression.
#[derive(Debug)]
pub enum Expr {
    /// `!x`
    Not { pos: Span, expr: Box<Expr> },
    /// `-x`
    Negative { pos: Span, expr: Box<Expr> },
    /// `if (c) t else e`
    If {
        pos: Span,
        cond: Box<Expr>,
        then_arm: Box<Expr>,
        else_arm: Box<Expr>,
    },
    /// `while (c) body`
    While {
        pos: Span,
        cond: Box<Expr>,
        body: Box<Expr>,
    },
    /// `x op y`
    Binary {
        op: BinaryOp,
        pos: Span,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `x match { case ... }`
    Match {
        pos: Span,
        scrutinee: Box<Expr>,
        cases: Vec<Case>,
        binding: BindingId,
    },
    /// `x.m(...)`, or `m(...)` with an implicit `this` receiver.
    DynamicCall {
        recv: Box<Expr>,
        name: Ident,
        args: Vec<Expr>,
        /// True if the resolved slot is overridden somewhere below the
        /// receiver's static type, forcing table dispatch.
        has_override: bool,
    },
    /// `super.m(...)`
    SuperCall {
        pos: Span,
        name: Ident,
        args: Vec<Expr>,
        /// Parent of the lexically enclosing class.
        parent: Option<ClassId>,
    },
    /// Direct call resolved against the receiver's own feature list; used
    /// for constructor calls (`new X(...)` and super-constructor chaining).
    StaticCall {
        recv: Box<Expr>,
        name: Ident,
        args: Vec<Expr>,
    },
    /// The allocation half of `new X(...)`.
    Alloc { ty: Ident },
    /// `x = y`
    Assign { name: Ident, expr: Box<Expr> },
    /// `var x : T = init; body`
    Var {
        name: Ident,
        ty: Ident,
        init: Box<Expr>,
        body: Box<Expr>,
        binding: BindingId,
    },
    /// `pre; post`
    Chain { pre: Box<Expr>, post: Box<Expr> },
    /// `this`. `class` overrides the lexical class for synthesized
    /// super-constructor receivers.
    This { pos: Span, class: Option<ClassId> },
    /// `null`
    Null { pos: Span },
    /// `()`
    Unit { pos: Span },
    /// A bare identifier.
    NameRef { name: Ident },
    /// `"..."` or `"""..."""` with escapes already processed.
    Str { pos: Span, value: String },
    /// `true` or `false`.
    Bool { pos: Span, value: bool },
    /// An integer literal. Never negative: `-n` parses as
    /// `Negative(IntLit(n))`, which is how -2147483648 stays representable.
    Int { pos: Span, value: i64 },
    /// `native`; legal only as the whole body of a prelude feature.
    Native { pos: Span },
}

impl Default for Expr {
    /// Placeholder used when a body is temporarily detached for checking.
    fn default() -> Self {
        Expr::Unit {
            pos: Span::default(),
        }
    }
}

impl Expr {
    /// The position diagnostics should point at.
    pub fn pos(&self) -> Span {
        match self {
            Expr::Not { pos, .. }
            | Expr::Negative { pos, .. }
            | Expr::If { pos, .. }
            | Expr::While { pos, .. }
            | Expr::Binary { pos, .. }
            | Expr::Match { pos, .. }
            | Expr::SuperCall { pos, .. }
            | Expr::This { pos, .. }
            | Expr::Null { pos }
            | Expr::Unit { pos }
            | Expr::Str { pos, .. }
            | Expr::Bool { pos, .. }
            | Expr::Int { pos, .. }
            | Expr::Native { pos } => *pos,
            Expr::DynamicCall { name, .. }
            | Expr::StaticCall { name, .. }
            | Expr::Assign { name, .. }
            | Expr::Var { name, .. }
            | Expr::NameRef { name } => name.span,
            Expr::Alloc { ty } => ty.span,
            Expr::Chain { pre, .. } => pre.pos(),
        }
    }
}

/// One arm of a `match`. `case null => e` is represented with a binder
/// named `null` of type `Null`.
#[derive(Debug)]
pub struct Case {
    pub name: Ident,
    pub ty: Ident,
    pub body: Expr,
}

impl Case {
    /// True for the `case null =>` arm.
    pub fn is_null(&self) -> bool {
        self.ty.name == "Null"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_ids_are_unique() {
        let mut program = Program::new();
        let a = program.fresh_binding();
        let b = program.fresh_binding();
        assert_ne!(a, b);
    }

    #[test]
    fn test_arena_roundtrip() {
        let mut program = Program::new();
        let id = program.declare_class(Class {
            name: Ident::synthetic("Main"),
            ..Class::default()
        });
        assert_eq!(program.class(id).name.name, "Main");
        assert_eq!(program.declared, vec![id]);
    }

    #[test]
    fn test_expr_pos_falls_through_chain() {
        let chain = Expr::Chain {
            pre: Box::new(Expr::Int {
                pos: Span::new(3, 7),
                value: 1,
            }),
            post: Box::new(Expr::Unit {
                pos: Span::new(4, 1),
            }),
        };
        assert_eq!(chain.pos(), Span::new(3, 7));
    }

    #[test]
    fn test_object_ref_raw_int() {
        let raw = ObjectRef::Local {
            binding: BindingId(0),
            raw_int: true,
        };
        let boxed = ObjectRef::MatchBinder {
            binding: BindingId(1),
        };
        assert!(raw.raw_int());
        assert!(!boxed.raw_int());
    }
}
