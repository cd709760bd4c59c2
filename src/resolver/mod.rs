//! Lowers parsed syntax trees into a [`Program`].
//!
//! Lowering runs in four passes over all files:
//!
//! 1. collect item declarations, imports and module names
//! 2. lower function signatures (parameters become variables, return types are resolved)
//! 3. lower constant initialisers
//! 4. lower function bodies, resolving names through lexical scopes and the flat item namespace
//!
//! Typing is best-effort: an expression whose type cannot be determined simply has none.

mod collect;
mod lower_types;

use crate::parser::ParsedFile;
use crate::program::{
    Binding, BinaryOp, ConstId, Constant, Expr, ExprId, ExprKind, FileId, FnId, Function,
    Literal, Location, Param, Parent, Primitive, Program, Role, TypeId, TypeKind, VarId,
    Variable,
};
use collect::{doc_lines, module_name_of, Collected, FnDecl, ItemCollector};
use log::{debug, info};
use proc_macro2::Span;
use std::collections::HashMap;
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::visit::Visit;
use syn::Token;

/// Builds the symbol- and type-aware [`Program`] view from parsed files.
pub struct SourceResolver;

impl SourceResolver {
    /// Lowers all files into one program. The order of `files` fixes discovery order.
    pub fn resolve(files: &[ParsedFile]) -> Program {
        let mut lowerer = Lowerer::new(files);
        lowerer.collect_items();
        lowerer.lower_signatures();
        lowerer.lower_constants();
        lowerer.lower_bodies();
        let program = lowerer.program;
        info!(
            "Lowered {} files: {} functions, {} expressions, {} types",
            files.len(),
            program.functions.len(),
            program.exprs.len(),
            program.types.len()
        );
        program
    }
}

pub(crate) struct Lowerer<'a> {
    files: &'a [ParsedFile],
    collected: Collected<'a>,
    program: Program,
    type_decl_index: HashMap<String, Vec<usize>>,
    /// `name` for free functions, `Type::name` for impl methods
    fn_index: HashMap<String, Vec<FnId>>,
    const_index: HashMap<String, Vec<ConstId>>,
    param_scopes: Vec<HashMap<String, VarId>>,
    file: FileId,
    current_fn: Option<FnId>,
    self_type: Option<TypeId>,
    self_type_name: Option<String>,
    type_params: Vec<HashMap<String, TypeId>>,
    scopes: Vec<HashMap<String, VarId>>,
    closure_depth: usize,
}

impl<'a> Lowerer<'a> {
    fn new(files: &'a [ParsedFile]) -> Self {
        Self {
            files,
            collected: Collected::default(),
            program: Program::default(),
            type_decl_index: HashMap::new(),
            fn_index: HashMap::new(),
            const_index: HashMap::new(),
            param_scopes: Vec::new(),
            file: FileId(0),
            current_fn: None,
            self_type: None,
            self_type_name: None,
            type_params: Vec::new(),
            scopes: Vec::new(),
            closure_depth: 0,
        }
    }

    fn collect_items(&mut self) {
        let files = self.files;
        for (index, file) in files.iter().enumerate() {
            let file_id = FileId(index as u32);
            self.program.files.push(file.path.clone());
            self.collected.imports.push(HashMap::new());
            if let Some(module) = module_name_of(&file.path) {
                self.collected.modules.insert(module);
            }
            let mut collector = ItemCollector::new(file_id, &mut self.collected);
            collector.visit_file(&file.syntax_tree);
        }

        for (index, decl) in self.collected.types.iter().enumerate() {
            self.type_decl_index
                .entry(decl.item.ident().to_string())
                .or_default()
                .push(index);
        }

        for index in 0..self.collected.fns.len() {
            let decl = self.collected.fns[index];
            let id = FnId(index as u32);
            let name = decl.sig.ident.to_string();
            let owner = decl.impl_ty.and_then(type_name_of);
            let qualified = match &owner {
                Some(owner) => format!("{}::{}", owner, name),
                None => name.clone(),
            };
            self.file = decl.file;
            let location = self.location(decl.sig.ident.span());
            self.fn_index.entry(qualified.clone()).or_default().push(id);
            self.program.functions.push(Function {
                name,
                qualified,
                self_param: None,
                impl_type: None,
                params: Vec::new(),
                return_type: None,
                docs: doc_lines(decl.attrs),
                body: None,
                exprs: Vec::new(),
                location,
            });
        }

        for index in 0..self.collected.consts.len() {
            let decl = self.collected.consts[index];
            let name = decl.ident.to_string();
            self.const_index
                .entry(name.clone())
                .or_default()
                .push(ConstId(index as u32));
            self.program.constants.push(Constant {
                name,
                value: None,
                ty: None,
            });
        }
        debug!(
            "Collected {} types, {} functions, {} constants",
            self.collected.types.len(),
            self.collected.fns.len(),
            self.collected.consts.len()
        );
    }

    fn enter_fn(&mut self, decl: FnDecl<'a>, id: FnId) {
        self.file = decl.file;
        self.current_fn = Some(id);
        let mut params = HashMap::new();
        if let Some(generics) = decl.impl_generics {
            params.extend(self.generic_params(generics));
        }
        params.extend(self.generic_params(&decl.sig.generics));
        self.type_params.push(params);
        self.self_type = decl.impl_ty.map(|ty| self.lower_type(ty));
        self.self_type_name = decl.impl_ty.and_then(type_name_of);
    }

    fn leave_fn(&mut self) {
        self.type_params.pop();
        self.current_fn = None;
        self.self_type = None;
        self.self_type_name = None;
        self.scopes.clear();
        self.closure_depth = 0;
    }

    fn lower_signatures(&mut self) {
        for index in 0..self.collected.fns.len() {
            let decl = self.collected.fns[index];
            let id = FnId(index as u32);
            self.enter_fn(decl, id);
            self.scopes.push(HashMap::new());

            let mut params = Vec::new();
            let mut self_param = None;
            for input in &decl.sig.inputs {
                match input {
                    syn::FnArg::Receiver(receiver) => {
                        let ty = self.self_type;
                        self_param = Some(self.new_var("self", ty, true, receiver.span()));
                    }
                    syn::FnArg::Typed(pat_type) => {
                        let ty = self.lower_type(&pat_type.ty);
                        let vars = self.bind_pattern(&pat_type.pat, Some(ty), true);
                        params.push(Param { vars, ty: Some(ty) });
                    }
                }
            }
            let return_type = match &decl.sig.output {
                syn::ReturnType::Default => None,
                syn::ReturnType::Type(_, ty) => Some(self.lower_type(ty)),
            };

            let scope = self.scopes.pop().unwrap_or_default();
            self.param_scopes.push(scope);
            let impl_type = self.self_type;
            let function = &mut self.program.functions[index];
            function.impl_type = impl_type;
            function.params = params;
            function.self_param = self_param;
            function.return_type = return_type;
            self.leave_fn();
        }
    }

    fn lower_constants(&mut self) {
        for index in 0..self.collected.consts.len() {
            let decl = self.collected.consts[index];
            self.file = decl.file;
            self.type_params.push(HashMap::new());
            self.scopes.push(HashMap::new());
            let ty = self.lower_type(decl.ty);
            self.program.constants[index].ty = Some(ty);
            let value = self.lower_expr(decl.expr);
            self.program.constants[index].value = Some(value);
            self.scopes.pop();
            self.type_params.pop();
        }
    }

    fn lower_bodies(&mut self) {
        for index in 0..self.collected.fns.len() {
            let decl = self.collected.fns[index];
            let id = FnId(index as u32);
            self.enter_fn(decl, id);
            self.scopes.push(self.param_scopes[index].clone());
            let body = self.lower_block(decl.block, true);
            self.program.functions[index].body = Some(body);
            self.leave_fn();
        }
    }

    fn location(&self, span: Span) -> Location {
        let start = span.start();
        Location {
            file: self.file,
            line: start.line,
            column: start.column + 1,
        }
    }

    /// Allocates an expression, adopting its children and recording variable occurrences.
    fn alloc(&mut self, kind: ExprKind, span: Span) -> ExprId {
        let id = ExprId(self.program.exprs.len() as u32);
        let location = self.location(span);
        let children = child_roles(&kind);
        if let ExprKind::Var(var) = &kind {
            self.program.var_uses[var.index()].push(id);
        }
        self.program.exprs.push(Expr {
            kind,
            parent: Parent::Statement,
            ty: None,
            location,
            owner: self.current_fn,
        });
        if let Some(func) = self.current_fn {
            self.program.functions[func.index()].exprs.push(id);
        }
        for (child, role) in children {
            let child = &mut self.program.exprs[child.index()];
            // Binding and return positions were fixed when the child was lowered
            if child.parent == Parent::Statement {
                child.parent = Parent::Expr { id, role };
            }
        }
        let ty = self.infer_type(id);
        self.program.exprs[id.index()].ty = ty;
        id
    }

    fn set_parent(&mut self, id: ExprId, parent: Parent) {
        self.program.exprs[id.index()].parent = parent;
    }

    fn new_var(&mut self, name: &str, ty: Option<TypeId>, is_param: bool, span: Span) -> VarId {
        let id = VarId(self.program.vars.len() as u32);
        let location = self.location(span);
        self.program.vars.push(Variable {
            name: name.to_string(),
            ty,
            owner: self.current_fn,
            init: None,
            is_param,
            assignments: 0,
            location,
        });
        self.program.var_uses.push(Vec::new());
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), id);
        }
        id
    }

    fn bind_variable(&mut self, var: VarId, value: ExprId) {
        self.set_parent(value, Parent::Binding(var));
        let variable = &mut self.program.vars[var.index()];
        if variable.init.is_none() {
            variable.init = Some(value);
        }
        variable.assignments += 1;
        self.program.bindings.push(Binding { var, value });
    }

    fn lookup_var(&self, name: &str) -> Option<VarId> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    /// Binds the variables of a pattern in the current scope.
    fn bind_pattern(&mut self, pat: &syn::Pat, ty: Option<TypeId>, is_param: bool) -> Vec<VarId> {
        match pat {
            syn::Pat::Ident(ident) => {
                let mut vars = vec![self.new_var(&ident.ident.to_string(), ty, is_param, ident.ident.span())];
                if let Some((_, sub)) = &ident.subpat {
                    vars.extend(self.bind_pattern(sub, ty, is_param));
                }
                vars
            }
            syn::Pat::Type(pat_type) => {
                let ty = self.lower_type(&pat_type.ty);
                self.bind_pattern(&pat_type.pat, Some(ty), is_param)
            }
            syn::Pat::Reference(reference) => {
                let inner = ty.map(|t| self.program.types.strip_pointers(t));
                self.bind_pattern(&reference.pat, inner, is_param)
            }
            syn::Pat::Paren(paren) => self.bind_pattern(&paren.pat, ty, is_param),
            syn::Pat::Tuple(tuple) => {
                let elem_types = ty.and_then(|t| {
                    match self.program.types.kind(self.program.types.strip_pointers(t)) {
                        TypeKind::Tuple(elems) => Some(elems.clone()),
                        _ => None,
                    }
                });
                let mut vars = Vec::new();
                for (i, elem) in tuple.elems.iter().enumerate() {
                    let elem_ty = elem_types.as_ref().and_then(|e| e.get(i).copied());
                    vars.extend(self.bind_pattern(elem, elem_ty, is_param));
                }
                vars
            }
            syn::Pat::TupleStruct(tuple_struct) => {
                // `Path(id): Path<u32>` binds `id` to the wrapped type
                let inner = if tuple_struct.elems.len() == 1 {
                    ty.and_then(|t| self.wrapped_type(t))
                } else {
                    None
                };
                let mut vars = Vec::new();
                for elem in &tuple_struct.elems {
                    vars.extend(self.bind_pattern(elem, inner, is_param));
                }
                vars
            }
            syn::Pat::Struct(pat_struct) => {
                let mut vars = Vec::new();
                for field in &pat_struct.fields {
                    vars.extend(self.bind_pattern(&field.pat, None, is_param));
                }
                vars
            }
            syn::Pat::Slice(slice) => {
                let mut vars = Vec::new();
                for elem in &slice.elems {
                    vars.extend(self.bind_pattern(elem, None, is_param));
                }
                vars
            }
            syn::Pat::Or(or) => match or.cases.first() {
                Some(first) => self.bind_pattern(first, ty, is_param),
                None => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    fn wrapped_type(&self, ty: TypeId) -> Option<TypeId> {
        let types = &self.program.types;
        let ty = types.strip_pointers(ty);
        match types.kind(ty) {
            TypeKind::Optional(inner) => Some(*inner),
            TypeKind::Named(named) if named.args.len() == 1 => Some(named.args[0]),
            _ => None,
        }
    }

    fn import(&self, name: &str) -> Option<&String> {
        self.collected
            .imports
            .get(self.file.index())
            .and_then(|imports| imports.get(name))
    }

    /// Expands the leading segment through the file's imports and `Self`.
    fn expand_path(&self, segments: &[String]) -> Vec<String> {
        let Some(first) = segments.first() else {
            return Vec::new();
        };
        if first == "Self" {
            if let Some(name) = &self.self_type_name {
                let mut out = vec![name.clone()];
                out.extend(segments[1..].iter().cloned());
                return out;
            }
        }
        match self.import(first) {
            Some(full) => {
                let mut out: Vec<String> = full.split("::").map(str::to_string).collect();
                out.extend(segments[1..].iter().cloned());
                out
            }
            None => segments.to_vec(),
        }
    }

    fn is_local_path(&self, segments: &[String]) -> bool {
        match segments.first() {
            Some(first) => {
                matches!(first.as_str(), "crate" | "self" | "super")
                    || self.collected.modules.contains(first)
            }
            None => false,
        }
    }

    fn lookup_fn(&self, key: &str) -> Option<FnId> {
        let candidates = self.fn_index.get(key)?;
        candidates
            .iter()
            .copied()
            .find(|f| self.collected.fns[f.index()].file == self.file)
            .or_else(|| candidates.first().copied())
    }

    fn lookup_const(&self, name: &str) -> Option<ConstId> {
        let candidates = self.const_index.get(name)?;
        candidates
            .iter()
            .copied()
            .find(|c| self.collected.consts[c.index()].file == self.file)
            .or_else(|| candidates.first().copied())
    }

    fn local_item(&self, segments: &[String]) -> Option<ExprKind> {
        let name = segments.last()?;
        if let Some(func) = self.lookup_fn(name) {
            return Some(ExprKind::Fn(func));
        }
        self.lookup_const(name).map(ExprKind::Const)
    }

    fn lower_path_expr(&self, path: &syn::Path) -> ExprKind {
        let segments: Vec<String> = path.segments.iter().map(|s| s.ident.to_string()).collect();
        if segments.len() == 1 {
            let name = &segments[0];
            if let Some(var) = self.lookup_var(name) {
                return ExprKind::Var(var);
            }
            if let Some(full) = self.import(name) {
                let expanded: Vec<String> = full.split("::").map(str::to_string).collect();
                if self.is_local_path(&expanded) {
                    if let Some(kind) = self.local_item(&expanded) {
                        return kind;
                    }
                }
                return ExprKind::Path(full.clone());
            }
            return self
                .local_item(&segments)
                .unwrap_or_else(|| ExprKind::Path(name.clone()));
        }

        let expanded = self.expand_path(&segments);
        if expanded.len() >= 2 {
            let key = format!("{}::{}", expanded[expanded.len() - 2], expanded[expanded.len() - 1]);
            if let Some(func) = self.lookup_fn(&key) {
                return ExprKind::Fn(func);
            }
        }
        if self.is_local_path(&expanded) {
            if let Some(kind) = self.local_item(&expanded) {
                return kind;
            }
        }
        ExprKind::Path(expanded.join("::"))
    }

    fn lower_block(&mut self, block: &syn::Block, fn_body: bool) -> ExprId {
        self.scopes.push(HashMap::new());
        let mut children = Vec::new();
        let count = block.stmts.len();
        for (i, stmt) in block.stmts.iter().enumerate() {
            match stmt {
                syn::Stmt::Local(local) => {
                    if let Some(init) = self.lower_local(local) {
                        children.push(init);
                    }
                }
                syn::Stmt::Expr(expr, semi) => {
                    let id = self.lower_expr(expr);
                    if fn_body && semi.is_none() && i + 1 == count {
                        if let Some(func) = self.current_fn {
                            self.set_parent(id, Parent::Return(func));
                        }
                    }
                    children.push(id);
                }
                syn::Stmt::Macro(stmt_macro) => {
                    let kind = self.lower_macro(&stmt_macro.mac);
                    children.push(self.alloc(kind, stmt_macro.mac.span()));
                }
                syn::Stmt::Item(_) => {}
            }
        }
        self.scopes.pop();
        self.alloc(ExprKind::Other(children), block.span())
    }

    fn lower_local(&mut self, local: &syn::Local) -> Option<ExprId> {
        let mut init = None;
        if let Some(local_init) = &local.init {
            init = Some(self.lower_expr(&local_init.expr));
            if let Some((_, diverge)) = &local_init.diverge {
                self.lower_expr(diverge);
            }
        }
        let (annotation, pat) = match &local.pat {
            syn::Pat::Type(pat_type) => (Some(self.lower_type(&pat_type.ty)), &*pat_type.pat),
            other => (None, other),
        };
        let init_ty = init.and_then(|id| self.program.exprs[id.index()].ty);
        let vars = self.bind_pattern(pat, annotation.or(init_ty), false);
        if let (Some(value), syn::Pat::Ident(_), [var]) = (init, pat, vars.as_slice()) {
            self.bind_variable(*var, value);
        }
        init
    }

    fn lower_closure(&mut self, closure: &syn::ExprClosure) -> ExprKind {
        self.scopes.push(HashMap::new());
        self.closure_depth += 1;
        let mut params = Vec::new();
        for input in &closure.inputs {
            let (ty, pat) = match input {
                syn::Pat::Type(pat_type) => (Some(self.lower_type(&pat_type.ty)), &*pat_type.pat),
                other => (None, other),
            };
            let vars = self.bind_pattern(pat, ty, true);
            params.push(match (pat, vars.as_slice()) {
                (syn::Pat::Ident(_), [var]) => Some(*var),
                _ => None,
            });
        }
        let body = self.lower_expr(&closure.body);
        self.closure_depth -= 1;
        self.scopes.pop();
        ExprKind::Closure { params, body }
    }

    fn lower_macro(&mut self, mac: &syn::Macro) -> ExprKind {
        let name = mac
            .path
            .segments
            .last()
            .map(|s| s.ident.to_string())
            .unwrap_or_default();
        let args = match mac.parse_body_with(Punctuated::<syn::Expr, Token![,]>::parse_terminated) {
            Ok(list) => list.iter().map(|arg| self.lower_expr(arg)).collect(),
            Err(_) => Vec::new(),
        };
        ExprKind::Macro { name, args }
    }

    fn lower_exprs<'e>(&mut self, exprs: impl IntoIterator<Item = &'e syn::Expr>) -> Vec<ExprId> {
        exprs.into_iter().map(|e| self.lower_expr(e)).collect()
    }

    fn lower_expr(&mut self, expr: &syn::Expr) -> ExprId {
        let kind = match expr {
            syn::Expr::Lit(lit) => match lower_lit(&lit.lit) {
                Some(literal) => ExprKind::Lit(literal),
                None => ExprKind::Other(Vec::new()),
            },
            syn::Expr::Path(path) => self.lower_path_expr(&path.path),
            syn::Expr::Call(call) => {
                let callee = self.lower_expr(&call.func);
                let args = self.lower_exprs(&call.args);
                ExprKind::Call { callee, args }
            }
            syn::Expr::MethodCall(call) => {
                let receiver = self.lower_expr(&call.receiver);
                let args = self.lower_exprs(&call.args);
                let mut turbofish = Vec::new();
                if let Some(generics) = &call.turbofish {
                    for arg in &generics.args {
                        if let syn::GenericArgument::Type(ty) = arg {
                            turbofish.push(self.lower_type(ty));
                        }
                    }
                }
                let method = call.method.to_string();
                let resolved = self.resolve_method(receiver, &method);
                ExprKind::MethodCall {
                    receiver,
                    method,
                    args,
                    turbofish,
                    resolved,
                }
            }
            syn::Expr::Closure(closure) => self.lower_closure(closure),
            syn::Expr::Binary(binary) => {
                let lhs = self.lower_expr(&binary.left);
                let rhs = self.lower_expr(&binary.right);
                let op = match binary.op {
                    syn::BinOp::Add(_) => BinaryOp::Add,
                    _ => BinaryOp::Other,
                };
                ExprKind::Binary { op, lhs, rhs }
            }
            syn::Expr::Reference(reference) => ExprKind::Wrapped(self.lower_expr(&reference.expr)),
            syn::Expr::Paren(paren) => ExprKind::Wrapped(self.lower_expr(&paren.expr)),
            syn::Expr::Group(group) => ExprKind::Wrapped(self.lower_expr(&group.expr)),
            syn::Expr::Unary(unary) => {
                let inner = self.lower_expr(&unary.expr);
                match unary.op {
                    syn::UnOp::Deref(_) => ExprKind::Wrapped(inner),
                    _ => ExprKind::Other(vec![inner]),
                }
            }
            syn::Expr::Try(try_expr) => ExprKind::Try(self.lower_expr(&try_expr.expr)),
            syn::Expr::Await(await_expr) => ExprKind::Await(self.lower_expr(&await_expr.base)),
            syn::Expr::Struct(struct_expr) => {
                let mut fields: Vec<ExprId> = struct_expr
                    .fields
                    .iter()
                    .map(|field| self.lower_expr(&field.expr))
                    .collect();
                if let Some(rest) = &struct_expr.rest {
                    fields.push(self.lower_expr(rest));
                }
                let segments: Vec<String> = struct_expr
                    .path
                    .segments
                    .iter()
                    .map(|s| s.ident.to_string())
                    .collect();
                let path = self.expand_path(&segments).join("::");
                ExprKind::Struct { path, fields }
            }
            syn::Expr::Macro(mac) => self.lower_macro(&mac.mac),
            syn::Expr::Block(block) => return self.lower_block(&block.block, false),
            syn::Expr::Unsafe(block) => return self.lower_block(&block.block, false),
            syn::Expr::Async(block) => return self.lower_block(&block.block, false),
            syn::Expr::Const(block) => return self.lower_block(&block.block, false),
            syn::Expr::TryBlock(block) => return self.lower_block(&block.block, false),
            syn::Expr::Loop(looping) => ExprKind::Other(vec![self.lower_block(&looping.body, false)]),
            syn::Expr::Assign(assign) => {
                let value = self.lower_expr(&assign.right);
                match self.assign_target(&assign.left) {
                    Some(var) => {
                        self.bind_variable(var, value);
                        ExprKind::Other(vec![value])
                    }
                    None => {
                        let target = self.lower_expr(&assign.left);
                        ExprKind::Other(vec![target, value])
                    }
                }
            }
            syn::Expr::If(if_expr) => {
                self.scopes.push(HashMap::new());
                let cond = self.lower_expr(&if_expr.cond);
                let then = self.lower_block(&if_expr.then_branch, false);
                self.scopes.pop();
                let mut children = vec![cond, then];
                if let Some((_, else_branch)) = &if_expr.else_branch {
                    children.push(self.lower_expr(else_branch));
                }
                ExprKind::Other(children)
            }
            syn::Expr::Let(let_expr) => {
                let value = self.lower_expr(&let_expr.expr);
                self.bind_pattern(&let_expr.pat, None, false);
                ExprKind::Other(vec![value])
            }
            syn::Expr::Match(match_expr) => {
                let mut children = vec![self.lower_expr(&match_expr.expr)];
                for arm in &match_expr.arms {
                    self.scopes.push(HashMap::new());
                    self.bind_pattern(&arm.pat, None, false);
                    if let Some((_, guard)) = &arm.guard {
                        children.push(self.lower_expr(guard));
                    }
                    children.push(self.lower_expr(&arm.body));
                    self.scopes.pop();
                }
                ExprKind::Other(children)
            }
            syn::Expr::ForLoop(for_loop) => {
                let iterated = self.lower_expr(&for_loop.expr);
                self.scopes.push(HashMap::new());
                self.bind_pattern(&for_loop.pat, None, false);
                let body = self.lower_block(&for_loop.body, false);
                self.scopes.pop();
                ExprKind::Other(vec![iterated, body])
            }
            syn::Expr::While(while_expr) => {
                self.scopes.push(HashMap::new());
                let cond = self.lower_expr(&while_expr.cond);
                let body = self.lower_block(&while_expr.body, false);
                self.scopes.pop();
                ExprKind::Other(vec![cond, body])
            }
            syn::Expr::Return(ret) => {
                let mut children = Vec::new();
                if let Some(inner) = &ret.expr {
                    let value = self.lower_expr(inner);
                    if self.closure_depth == 0 {
                        if let Some(func) = self.current_fn {
                            self.set_parent(value, Parent::Return(func));
                        }
                    }
                    children.push(value);
                }
                ExprKind::Other(children)
            }
            syn::Expr::Break(brk) => ExprKind::Other(self.lower_exprs(brk.expr.as_deref())),
            syn::Expr::Array(array) => ExprKind::Other(self.lower_exprs(&array.elems)),
            syn::Expr::Tuple(tuple) => ExprKind::Other(self.lower_exprs(&tuple.elems)),
            syn::Expr::Index(index) => {
                ExprKind::Other(self.lower_exprs([&*index.expr, &*index.index]))
            }
            syn::Expr::Field(field) => ExprKind::Other(vec![self.lower_expr(&field.base)]),
            syn::Expr::Cast(cast) => ExprKind::Other(vec![self.lower_expr(&cast.expr)]),
            syn::Expr::Range(range) => {
                let parts = range.start.iter().chain(range.end.iter()).map(|e| &**e);
                ExprKind::Other(self.lower_exprs(parts))
            }
            syn::Expr::Repeat(repeat) => {
                ExprKind::Other(self.lower_exprs([&*repeat.expr, &*repeat.len]))
            }
            syn::Expr::Yield(yielded) => ExprKind::Other(self.lower_exprs(yielded.expr.as_deref())),
            _ => ExprKind::Other(Vec::new()),
        };
        self.alloc(kind, expr.span())
    }

    fn assign_target(&self, target: &syn::Expr) -> Option<VarId> {
        match target {
            syn::Expr::Path(path) if path.path.segments.len() == 1 => {
                path.path.get_ident().and_then(|ident| self.lookup_var(&ident.to_string()))
            }
            _ => None,
        }
    }

    /// Local impl method a call dispatches to, when the receiver's type is a known named type.
    fn resolve_method(&self, receiver: ExprId, method: &str) -> Option<FnId> {
        let types = &self.program.types;
        let ty = types.strip_pointers(self.program.exprs[receiver.index()].ty?);
        let named = types.named(ty)?;
        let func = self.lookup_fn(&format!("{}::{}", named.name, method))?;
        self.program.functions[func.index()]
            .self_param
            .map(|_| func)
    }

    fn infer_type(&mut self, id: ExprId) -> Option<TypeId> {
        let kind = self.program.exprs[id.index()].kind.clone();
        match kind {
            ExprKind::Lit(Literal::Str(_)) => Some(self.program.types.primitive(Primitive::Str)),
            ExprKind::Lit(Literal::Int(_)) => Some(self.program.types.primitive(Primitive::I32)),
            ExprKind::Lit(Literal::Float(_)) => Some(self.program.types.primitive(Primitive::F64)),
            ExprKind::Lit(Literal::Bool(_)) => Some(self.program.types.primitive(Primitive::Bool)),
            ExprKind::Var(var) => self.program.vars[var.index()].ty,
            ExprKind::Const(c) => self.program.constants[c.index()].ty,
            ExprKind::Call { callee, .. } => {
                let callee = self.program.peel(callee);
                match &self.program.exprs[callee.index()].kind {
                    ExprKind::Fn(func) => self.program.functions[func.index()].return_type,
                    ExprKind::Path(path) => {
                        let path = path.clone();
                        self.constructor_type(&path)
                    }
                    _ => None,
                }
            }
            ExprKind::MethodCall {
                receiver,
                method,
                resolved,
                ..
            } => match resolved {
                Some(func) => self.program.functions[func.index()].return_type,
                None => match method.as_str() {
                    "clone" | "to_owned" => self.program.exprs[receiver.index()].ty,
                    "to_string" => Some(self.program.types.primitive(Primitive::Str)),
                    _ => None,
                },
            },
            ExprKind::Struct { path, .. } => Some(self.type_from_path_str(&path)),
            ExprKind::Wrapped(inner) | ExprKind::Await(inner) => {
                self.program.exprs[inner.index()].ty
            }
            ExprKind::Try(inner) => {
                let ty = self.program.exprs[inner.index()].ty?;
                match self.program.types.kind(ty) {
                    TypeKind::Optional(inner) => Some(*inner),
                    TypeKind::Named(named) if named.name == "Result" => named.args.first().copied(),
                    _ => None,
                }
            }
            ExprKind::Macro { name, args } => match name.as_str() {
                "format" => Some(self.program.types.primitive(Primitive::Str)),
                "vec" => {
                    let elem = args.first().and_then(|a| self.program.exprs[a.index()].ty)?;
                    Some(self.program.types.sequence(elem))
                }
                _ => None,
            },
            _ => None,
        }
    }

    /// Type produced by an external associated constructor such as `Router::new()`.
    fn constructor_type(&mut self, path: &str) -> Option<TypeId> {
        let segments: Vec<&str> = path.split("::").collect();
        let (func, owner) = segments.split_last()?;
        let type_name = owner.last()?;
        if !type_name.starts_with(|c: char| c.is_ascii_uppercase()) {
            return None;
        }
        let is_constructor = matches!(*func, "new" | "default" | "from")
            || func.starts_with("new_")
            || func.starts_with("with_")
            || func.starts_with("from_");
        if !is_constructor {
            return None;
        }
        Some(self.type_from_path_str(&owner.join("::")))
    }
}

fn child_roles(kind: &ExprKind) -> Vec<(ExprId, Role)> {
    match kind {
        ExprKind::Call { callee, args } => {
            let mut out = vec![(*callee, Role::Callee)];
            out.extend(args.iter().enumerate().map(|(i, a)| (*a, Role::Argument(i))));
            out
        }
        ExprKind::MethodCall { receiver, args, .. } => {
            let mut out = vec![(*receiver, Role::Receiver)];
            out.extend(args.iter().enumerate().map(|(i, a)| (*a, Role::Argument(i))));
            out
        }
        ExprKind::Closure { body, .. } => vec![(*body, Role::ClosureBody)],
        ExprKind::Binary { lhs, rhs, .. } => vec![(*lhs, Role::Operand), (*rhs, Role::Operand)],
        ExprKind::Wrapped(inner) | ExprKind::Try(inner) | ExprKind::Await(inner) => {
            vec![(*inner, Role::Inner)]
        }
        ExprKind::Struct { fields: children, .. }
        | ExprKind::Macro { args: children, .. }
        | ExprKind::Other(children) => children.iter().map(|c| (*c, Role::Element)).collect(),
        _ => Vec::new(),
    }
}

fn lower_lit(lit: &syn::Lit) -> Option<Literal> {
    match lit {
        syn::Lit::Str(s) => Some(Literal::Str(s.value())),
        syn::Lit::Int(i) => i.base10_parse::<i64>().ok().map(Literal::Int),
        syn::Lit::Float(f) => f.base10_parse::<f64>().ok().map(Literal::Float),
        syn::Lit::Bool(b) => Some(Literal::Bool(b.value)),
        _ => None,
    }
}

fn type_name_of(ty: &syn::Type) -> Option<String> {
    match ty {
        syn::Type::Path(path) => path.path.segments.last().map(|s| s.ident.to_string()),
        syn::Type::Reference(reference) => type_name_of(&reference.elem),
        _ => None,
    }
}

/// Lowers inline sources; used by unit tests across the crate.
#[cfg(test)]
pub(crate) fn lower_sources(sources: &[(&str, &str)]) -> Program {
    let files: Vec<ParsedFile> = sources
        .iter()
        .map(|(path, code)| ParsedFile {
            path: std::path::PathBuf::from(path),
            syntax_tree: syn::parse_file(code).expect("test source must parse"),
        })
        .collect();
    SourceResolver::resolve(&files)
}
