//! The lowered, immutable view of the analysed crate.
//!
//! A [`Program`] is produced once by [`crate::resolver::SourceResolver`] and then only read.
//! Expressions, variables, functions and constants live in flat arenas addressed by typed ids;
//! every expression knows its parent and the role it plays there, which is what the value
//! tracking engine walks upwards from a usage site.

pub mod types;

pub use types::{
    Field, NamedDef, NamedType, Primitive, TypeId, TypeKind, TypeTable, Variant, VariantData,
};

use std::collections::HashSet;
use std::path::{Path, PathBuf};

macro_rules! arena_id {
    ($($name:ident),* $(,)?) => {
        $(
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u32);

            impl $name {
                pub fn index(self) -> usize {
                    self.0 as usize
                }
            }
        )*
    };
}

arena_id!(ExprId, VarId, FnId, ConstId, FileId);

const WRAPPING_CONSTRUCTORS: &[&str] = &["Ok", "Some", "Box::new", "Arc::new", "Rc::new"];

/// Nesting limit for constant folding through constants and single-assignment variables.
const MAX_FOLD_DEPTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    pub file: FileId,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Receiver,
    Callee,
    Argument(usize),
    Operand,
    /// The operand of a [`ExprKind::Wrapped`], [`ExprKind::Try`] or [`ExprKind::Await`]
    Inner,
    ClosureBody,
    Element,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parent {
    Expr { id: ExprId, role: Role },
    /// Initialiser of a `let` or right-hand side of an assignment to this variable
    Binding(VarId),
    /// Tail expression or `return` operand of this function
    Return(FnId),
    /// Statement position, constant initialiser, or anything without a tracked parent
    Statement,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Lit(Literal),
    Var(VarId),
    Fn(FnId),
    Const(ConstId),
    /// A path that does not name a local item; holds the import-expanded path
    Path(String),
    Call {
        callee: ExprId,
        args: Vec<ExprId>,
    },
    MethodCall {
        receiver: ExprId,
        method: String,
        args: Vec<ExprId>,
        turbofish: Vec<TypeId>,
        /// Local impl method this call dispatches to, when the receiver type is known
        resolved: Option<FnId>,
    },
    Closure {
        /// One entry per parameter; `None` for destructuring patterns
        params: Vec<Option<VarId>>,
        body: ExprId,
    },
    Binary {
        op: BinaryOp,
        lhs: ExprId,
        rhs: ExprId,
    },
    /// Reference, dereference, parentheses
    Wrapped(ExprId),
    Try(ExprId),
    Await(ExprId),
    Struct {
        path: String,
        fields: Vec<ExprId>,
    },
    Macro {
        name: String,
        args: Vec<ExprId>,
    },
    Other(Vec<ExprId>),
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub parent: Parent,
    pub ty: Option<TypeId>,
    pub location: Location,
    pub owner: Option<FnId>,
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub ty: Option<TypeId>,
    pub owner: Option<FnId>,
    pub init: Option<ExprId>,
    pub is_param: bool,
    /// `let` initialiser plus later assignments
    pub assignments: u32,
    pub location: Location,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub vars: Vec<VarId>,
    pub ty: Option<TypeId>,
}

impl Param {
    /// The variable bound by a plain identifier pattern.
    pub fn simple_var(&self) -> Option<VarId> {
        match self.vars.as_slice() {
            [var] => Some(*var),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    /// `Type::name` for impl methods, `name` otherwise
    pub qualified: String,
    pub self_param: Option<VarId>,
    /// Self type of the enclosing impl block
    pub impl_type: Option<TypeId>,
    pub params: Vec<Param>,
    pub return_type: Option<TypeId>,
    pub docs: Vec<String>,
    pub body: Option<ExprId>,
    pub exprs: Vec<ExprId>,
    pub location: Location,
}

#[derive(Debug, Clone)]
pub struct Constant {
    pub name: String,
    pub value: Option<ExprId>,
    pub ty: Option<TypeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub var: VarId,
    pub value: ExprId,
}

/// The syntactic role of a usage site, seen through transparent wrappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Context {
    /// `site.method(..)`
    Receiver { call: ExprId },
    /// `f(.., site, ..)` or `x.m(.., site, ..)`
    Argument { call: ExprId, index: usize },
    Binding(VarId),
    Return(FnId),
    Other,
}

#[derive(Debug, Default)]
pub struct Program {
    pub(crate) files: Vec<PathBuf>,
    pub(crate) exprs: Vec<Expr>,
    pub(crate) vars: Vec<Variable>,
    pub(crate) functions: Vec<Function>,
    pub(crate) constants: Vec<Constant>,
    pub(crate) types: TypeTable,
    pub(crate) var_uses: Vec<Vec<ExprId>>,
    pub(crate) bindings: Vec<Binding>,
}

impl Program {
    pub fn file_path(&self, file: FileId) -> &Path {
        &self.files[file.index()]
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.index()]
    }

    pub fn kind(&self, id: ExprId) -> &ExprKind {
        &self.exprs[id.index()].kind
    }

    pub fn var(&self, id: VarId) -> &Variable {
        &self.vars[id.index()]
    }

    pub fn function(&self, id: FnId) -> &Function {
        &self.functions[id.index()]
    }

    pub fn constant(&self, id: ConstId) -> &Constant {
        &self.constants[id.index()]
    }

    pub fn types(&self) -> &TypeTable {
        &self.types
    }

    pub fn expr_count(&self) -> usize {
        self.exprs.len()
    }

    pub fn functions(&self) -> impl Iterator<Item = (FnId, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, f)| (FnId(i as u32), f))
    }

    pub fn variables(&self) -> impl Iterator<Item = (VarId, &Variable)> {
        self.vars
            .iter()
            .enumerate()
            .map(|(i, v)| (VarId(i as u32), v))
    }

    pub fn function_named(&self, qualified: &str) -> Option<FnId> {
        self.functions()
            .find(|(_, f)| f.qualified == qualified)
            .map(|(id, _)| id)
    }

    /// Occurrences of a variable, in discovery order.
    pub fn occurrences(&self, var: VarId) -> &[ExprId] {
        &self.var_uses[var.index()]
    }

    /// `let` and assignment bindings, in discovery order.
    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn type_of(&self, id: ExprId) -> Option<TypeId> {
        self.expr(id).ty
    }

    pub fn describe_location(&self, location: Location) -> String {
        format!(
            "{}:{}:{}",
            self.file_path(location.file).display(),
            location.line,
            location.column
        )
    }

    /// Strips references, dereferences and parentheses.
    pub fn peel(&self, mut id: ExprId) -> ExprId {
        while let ExprKind::Wrapped(inner) = self.kind(id) {
            id = *inner;
        }
        id
    }

    /// Computes the parent syntactic context of a usage site, looking through references,
    /// parentheses, `.await` and `?`.
    pub fn context_of(&self, mut id: ExprId) -> Context {
        loop {
            match self.expr(id).parent {
                Parent::Expr { id: parent, role } => match (self.kind(parent), role) {
                    // `build().await` and `build()?` hand on the router they unwrap
                    (
                        ExprKind::Wrapped(_) | ExprKind::Await(_) | ExprKind::Try(_),
                        Role::Inner,
                    ) => id = parent,
                    (ExprKind::Call { callee, args }, Role::Argument(0))
                        if args.len() == 1 && self.is_wrapping_constructor(*callee) =>
                    {
                        id = parent
                    }
                    (ExprKind::MethodCall { .. }, Role::Receiver) => {
                        return Context::Receiver { call: parent }
                    }
                    (ExprKind::MethodCall { .. }, Role::Argument(index))
                    | (ExprKind::Call { .. }, Role::Argument(index)) => {
                        return Context::Argument {
                            call: parent,
                            index,
                        }
                    }
                    _ => return Context::Other,
                },
                Parent::Binding(var) => return Context::Binding(var),
                Parent::Return(func) => return Context::Return(func),
                Parent::Statement => return Context::Other,
            }
        }
    }

    /// `Ok(x)`, `Some(x)` and pointer constructors such as `Arc::new(x)` still denote `x`.
    fn is_wrapping_constructor(&self, callee: ExprId) -> bool {
        match self.kind(self.peel(callee)) {
            ExprKind::Path(path) => WRAPPING_CONSTRUCTORS
                .iter()
                .any(|name| path == name || path.ends_with(&format!("::{}", name))),
            _ => false,
        }
    }

    /// Root receiver of a method chain: `a.b().c()` yields `a`.
    pub fn chain_root(&self, id: ExprId) -> ExprId {
        let mut current = self.peel(id);
        loop {
            match self.kind(current) {
                ExprKind::MethodCall { receiver, .. } => current = self.peel(*receiver),
                ExprKind::Try(inner) | ExprKind::Await(inner) => current = self.peel(*inner),
                _ => return current,
            }
        }
    }

    /// Outermost call of the method chain `id` is the receiver of.
    pub fn chain_top(&self, mut id: ExprId) -> ExprId {
        while let Parent::Expr {
            id: parent,
            role: Role::Receiver,
        } = self.expr(id).parent
        {
            if !matches!(self.kind(parent), ExprKind::MethodCall { .. }) {
                break;
            }
            id = parent;
        }
        id
    }

    pub fn children(&self, id: ExprId) -> Vec<ExprId> {
        match self.kind(id) {
            ExprKind::Lit(_)
            | ExprKind::Var(_)
            | ExprKind::Fn(_)
            | ExprKind::Const(_)
            | ExprKind::Path(_) => Vec::new(),
            ExprKind::Call { callee, args } => {
                let mut out = vec![*callee];
                out.extend(args.iter().copied());
                out
            }
            ExprKind::MethodCall { receiver, args, .. } => {
                let mut out = vec![*receiver];
                out.extend(args.iter().copied());
                out
            }
            ExprKind::Closure { body, .. } => vec![*body],
            ExprKind::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            ExprKind::Wrapped(inner) | ExprKind::Try(inner) | ExprKind::Await(inner) => {
                vec![*inner]
            }
            ExprKind::Struct { fields, .. } => fields.clone(),
            ExprKind::Macro { args, .. } => args.clone(),
            ExprKind::Other(children) => children.clone(),
        }
    }

    /// All expressions below `id` (inclusive), pre-order.
    pub fn descendants(&self, id: ExprId) -> Vec<ExprId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            let mut children = self.children(current);
            children.reverse();
            stack.extend(children);
        }
        out
    }

    /// Name of the called function or method: last path segment for calls.
    pub fn call_name(&self, call: ExprId) -> Option<&str> {
        match self.kind(call) {
            ExprKind::Call { callee, .. } => match self.kind(self.peel(*callee)) {
                ExprKind::Fn(func) => Some(self.function(*func).name.as_str()),
                ExprKind::Path(path) => path.rsplit("::").next(),
                _ => None,
            },
            ExprKind::MethodCall { method, .. } => Some(method.as_str()),
            _ => None,
        }
    }

    /// Candidate fully qualified names of a call's target, most specific first.
    pub fn callee_paths(&self, call: ExprId) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        match self.kind(call) {
            ExprKind::Call { callee, .. } => match self.kind(self.peel(*callee)) {
                ExprKind::Fn(func) => {
                    let func = self.function(*func);
                    out.push(func.qualified.clone());
                    out.push(func.name.clone());
                }
                ExprKind::Path(path) => out.push(path.clone()),
                _ => {}
            },
            ExprKind::MethodCall {
                receiver,
                method,
                resolved,
                ..
            } => {
                if let Some(func) = resolved {
                    out.push(self.function(*func).qualified.clone());
                }
                if let Some(ty) = self.type_of(*receiver) {
                    let ty = self.types.strip_pointers(ty);
                    if let Some(named) = self.types.named(ty) {
                        out.push(format!("{}::{}", named.path, method));
                        out.push(format!("{}::{}", named.name, method));
                    }
                }
                out.push(method.clone());
            }
            _ => {}
        }
        let mut seen = HashSet::new();
        out.retain(|c| seen.insert(c.clone()));
        out
    }

    /// Resolves an expression to a string constant: literals, constants, single-assignment
    /// locals, `+` concatenation, `concat!` and plain `format!("{}..", ..)`.
    pub fn string_value(&self, id: ExprId) -> Option<String> {
        self.fold_string(id, 0)
    }

    fn fold_string(&self, id: ExprId, depth: usize) -> Option<String> {
        if depth > MAX_FOLD_DEPTH {
            return None;
        }
        match self.kind(id) {
            ExprKind::Lit(Literal::Str(s)) => Some(s.clone()),
            ExprKind::Const(c) => self
                .constant(*c)
                .value
                .and_then(|v| self.fold_string(v, depth + 1)),
            ExprKind::Var(v) => self
                .single_init(*v)
                .and_then(|init| self.fold_string(init, depth + 1)),
            ExprKind::Wrapped(inner) => self.fold_string(*inner, depth),
            ExprKind::Binary {
                op: BinaryOp::Add,
                lhs,
                rhs,
            } => {
                let mut left = self.fold_string(*lhs, depth + 1)?;
                left.push_str(&self.fold_string(*rhs, depth + 1)?);
                Some(left)
            }
            ExprKind::MethodCall {
                receiver,
                method,
                args,
                ..
            } if args.is_empty()
                && matches!(method.as_str(), "to_string" | "to_owned" | "into" | "as_str") =>
            {
                self.fold_string(*receiver, depth + 1)
            }
            ExprKind::Call { args, .. } if args.len() == 1 => {
                let name = self.callee_paths(id).into_iter().next()?;
                if name.ends_with("String::from") || name == "String::from" {
                    self.fold_string(args[0], depth + 1)
                } else {
                    None
                }
            }
            ExprKind::Macro { name, args } if name == "concat" => {
                let mut out = String::new();
                for arg in args {
                    match self.kind(*arg) {
                        ExprKind::Lit(Literal::Int(i)) => out.push_str(&i.to_string()),
                        _ => out.push_str(&self.fold_string(*arg, depth + 1)?),
                    }
                }
                Some(out)
            }
            ExprKind::Macro { name, args } if name == "format" => {
                let (template, rest) = args.split_first()?;
                let template = self.fold_string(*template, depth + 1)?;
                self.fill_format(&template, rest, depth)
            }
            _ => None,
        }
    }

    fn fill_format(&self, template: &str, args: &[ExprId], depth: usize) -> Option<String> {
        let mut out = String::new();
        let mut args = args.iter();
        let mut chars = template.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '{' if chars.peek() == Some(&'}') => {
                    chars.next();
                    let arg = args.next()?;
                    out.push_str(&self.fold_string(*arg, depth + 1)?);
                }
                // Named or formatted placeholders are not folded
                '{' => return None,
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                _ => out.push(c),
            }
        }
        Some(out)
    }

    /// Resolves an expression to an integer constant, including `StatusCode::NAME` constants.
    pub fn int_value(&self, id: ExprId) -> Option<i64> {
        self.fold_int(id, 0)
    }

    fn fold_int(&self, id: ExprId, depth: usize) -> Option<i64> {
        if depth > MAX_FOLD_DEPTH {
            return None;
        }
        match self.kind(id) {
            ExprKind::Lit(Literal::Int(i)) => Some(*i),
            ExprKind::Const(c) => self
                .constant(*c)
                .value
                .and_then(|v| self.fold_int(v, depth + 1)),
            ExprKind::Var(v) => self
                .single_init(*v)
                .and_then(|init| self.fold_int(init, depth + 1)),
            ExprKind::Wrapped(inner) => self.fold_int(*inner, depth),
            ExprKind::Path(path) => {
                let mut segments = path.rsplit("::");
                let name = segments.next()?;
                if segments.next()? == "StatusCode" {
                    status_code_constant(name)
                } else {
                    None
                }
            }
            ExprKind::MethodCall {
                receiver, method, ..
            } if method == "as_u16" => self.fold_int(*receiver, depth + 1),
            ExprKind::Call { args, .. } if args.len() == 1 => {
                let name = self.callee_paths(id).into_iter().next()?;
                if name.ends_with("from_u16") {
                    self.fold_int(args[0], depth + 1)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    pub fn bool_value(&self, id: ExprId) -> Option<bool> {
        match self.kind(id) {
            ExprKind::Lit(Literal::Bool(b)) => Some(*b),
            ExprKind::Const(c) => self.constant(*c).value.and_then(|v| match self.kind(v) {
                ExprKind::Lit(Literal::Bool(b)) => Some(*b),
                _ => None,
            }),
            ExprKind::Wrapped(inner) => self.bool_value(*inner),
            _ => None,
        }
    }

    /// Initialiser of a variable that is bound exactly once.
    pub fn single_init(&self, var: VarId) -> Option<ExprId> {
        let var = self.var(var);
        if var.assignments == 1 {
            var.init
        } else {
            None
        }
    }
}

/// Whether any candidate callee name matches a configured pattern, exactly or as a
/// `::`-separated suffix.
pub fn matches_callee(candidates: &[String], pattern: &str) -> bool {
    candidates.iter().any(|candidate| {
        candidate == pattern
            || (candidate.len() > pattern.len()
                && candidate.ends_with(pattern)
                && candidate[..candidate.len() - pattern.len()].ends_with("::"))
    })
}

fn status_code_constant(name: &str) -> Option<i64> {
    let code = match name {
        "CONTINUE" => 100,
        "OK" => 200,
        "CREATED" => 201,
        "ACCEPTED" => 202,
        "NO_CONTENT" => 204,
        "MOVED_PERMANENTLY" => 301,
        "FOUND" => 302,
        "SEE_OTHER" => 303,
        "NOT_MODIFIED" => 304,
        "TEMPORARY_REDIRECT" => 307,
        "BAD_REQUEST" => 400,
        "UNAUTHORIZED" => 401,
        "FORBIDDEN" => 403,
        "NOT_FOUND" => 404,
        "METHOD_NOT_ALLOWED" => 405,
        "CONFLICT" => 409,
        "GONE" => 410,
        "UNPROCESSABLE_ENTITY" => 422,
        "TOO_MANY_REQUESTS" => 429,
        "INTERNAL_SERVER_ERROR" => 500,
        "NOT_IMPLEMENTED" => 501,
        "BAD_GATEWAY" => 502,
        "SERVICE_UNAVAILABLE" => 503,
        _ => return None,
    };
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::lower_sources;

    fn main_fn(program: &Program) -> &Function {
        program.function(program.function_named("main").unwrap())
    }

    fn binding_value(program: &Program, name: &str) -> ExprId {
        program
            .bindings()
            .iter()
            .find(|b| program.var(b.var).name == name)
            .map(|b| b.value)
            .unwrap()
    }

    #[test]
    fn test_string_value_folds_constants_and_concat() {
        let program = lower_sources(&[(
            "src/main.rs",
            r#"
            const API: &str = "/api";
            const V1: &str = concat!("/v", 1);
            fn main() {
                let a = API.to_string() + V1 + "/users";
                let b = format!("{}/items/{{id}}", API);
                let c = format!("{name}", name = API);
            }
            "#,
        )]);
        assert_eq!(
            program.string_value(binding_value(&program, "a")).as_deref(),
            Some("/api/v1/users")
        );
        assert_eq!(
            program.string_value(binding_value(&program, "b")).as_deref(),
            Some("/api/items/{id}")
        );
        assert_eq!(program.string_value(binding_value(&program, "c")), None);
    }

    #[test]
    fn test_string_value_rejects_reassigned_locals() {
        let program = lower_sources(&[(
            "src/main.rs",
            r#"
            fn main() {
                let mut base = "/a";
                base = "/b";
                let path = base;
            }
            "#,
        )]);
        assert_eq!(program.string_value(binding_value(&program, "path")), None);
    }

    #[test]
    fn test_int_value_status_codes() {
        let program = lower_sources(&[(
            "src/main.rs",
            r#"
            use axum::http::StatusCode;
            fn main() {
                let a = StatusCode::CREATED;
                let b = StatusCode::from_u16(418);
                let c = 204;
            }
            "#,
        )]);
        assert_eq!(program.int_value(binding_value(&program, "a")), Some(201));
        assert_eq!(program.int_value(binding_value(&program, "b")), Some(418));
        assert_eq!(program.int_value(binding_value(&program, "c")), Some(204));
    }

    #[test]
    fn test_context_sees_through_references() {
        let program = lower_sources(&[(
            "src/main.rs",
            r#"
            fn setup(r: &mut Router) {}
            fn main() {
                let mut r = Router::new();
                setup(&mut r);
                (r).merge();
            }
            "#,
        )]);
        let main = main_fn(&program);
        let r = program
            .bindings()
            .iter()
            .find(|b| program.var(b.var).name == "r")
            .unwrap()
            .var;
        let uses = program.occurrences(r);
        assert_eq!(uses.len(), 2);
        assert!(matches!(
            program.context_of(uses[0]),
            Context::Argument { index: 0, .. }
        ));
        assert!(matches!(program.context_of(uses[1]), Context::Receiver { .. }));
        assert!(!main.exprs.is_empty());
    }

    #[test]
    fn test_callee_matching_by_suffix() {
        let candidates = vec!["jsonwebtoken::decode".to_string(), "decode".to_string()];
        assert!(matches_callee(&candidates, "jsonwebtoken::decode"));
        assert!(matches_callee(&candidates, "decode"));
        assert!(!matches_callee(&candidates, "code"));
        assert!(!matches_callee(&candidates, "other::decode"));
    }
}
