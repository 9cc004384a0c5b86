//! Class declaration compilation and parent linking
//!
//! A class compiles to a single [`Class`] constant. Its methods are closures
//! with no captured values; `this` is local 0 of every method. The parent is
//! recorded by name only, and [`Compiler::link_classes`] resolves every
//! parent reference of the unit once the whole unit is compiled, so a
//! subclass may appear before its parent in source order.

use crate::ast::*;
use crate::bytecode::Opcode;
use crate::compiler::{ClassContext, CompileError, CompileResult, Compiler};
use crate::span::Span;
use crate::value::{Class, Closure, Value};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Partitioned class body
#[derive(Default)]
struct ClassMembers {
    properties: Vec<String>,
    methods: IndexMap<String, Arc<Closure>>,
}

impl Compiler {
    pub(super) fn compile_class(&mut self, decl: &ClassDecl) -> CompileResult<()> {
        let name = decl.name.name.clone();
        let span = decl.span;

        // Bound up front so methods can refer to their own class
        let symbol = self.define(&name, false, decl.name.span)?;

        // Placeholder so `super` calls can reference the class constant
        let constant = self.add_constant(Value::Null, span)?;
        self.class_spans.insert(name.clone(), span);

        self.classes.push(ClassContext {
            name: name.clone(),
            constant,
            has_parent: decl.parent.is_some(),
        });
        let members = self.compile_class_members(decl);
        self.classes.pop();
        let members = members?;

        let class = Class::new(
            name,
            decl.parent.as_ref().map(|p| p.name.clone()),
            members.properties,
            members.methods,
        );
        self.constants[constant] = Value::Class(Arc::new(class));

        self.emit(Opcode::Constant, &[constant], span);
        self.store_symbol(&symbol, span)?;
        self.emit(Opcode::Pop, &[], span);
        Ok(())
    }

    fn compile_class_members(&mut self, decl: &ClassDecl) -> CompileResult<ClassMembers> {
        let class = decl.name.name.as_str();
        let mut members = ClassMembers::default();

        for stmt in &decl.body {
            match stmt {
                Stmt::Let(LetStmt {
                    name,
                    value: Expr::Function(func),
                    ..
                }) => {
                    let method = self.compile_method(class, func, &name.name)?;
                    members.methods.insert(name.name.clone(), method);
                }
                Stmt::Let(LetStmt { name, .. }) => add_property(&mut members, &name.name),
                Stmt::Expr(ExprStmt {
                    expr: Expr::Function(func),
                    ..
                }) => {
                    let method_name = func.name.as_deref().ok_or_else(|| {
                        malformed(class, "method literal without a name", func.span)
                    })?;
                    let method = self.compile_method(class, func, method_name)?;
                    members.methods.insert(method_name.to_string(), method);
                }
                Stmt::Expr(ExprStmt {
                    expr: Expr::Identifier(ident),
                    ..
                }) => add_property(&mut members, &ident.name),
                other => {
                    return Err(malformed(
                        class,
                        "only property and method declarations are allowed",
                        other.span(),
                    ))
                }
            }
        }
        Ok(members)
    }

    /// Resolve the parent of every class added to the pool from `first`
    /// onward
    ///
    /// Parents are looked up by name across the whole pool, the latest
    /// declaration of a name winning. Nothing is linked unless every new
    /// class resolves and no chain loops back on itself.
    pub(super) fn link_classes(&mut self, first: usize) -> CompileResult<()> {
        let new_classes: Vec<Arc<Class>> = self.constants[first..]
            .iter()
            .filter_map(|c| match c {
                Value::Class(class) if class.parent().is_none() => Some(Arc::clone(class)),
                _ => None,
            })
            .collect();
        if new_classes.is_empty() {
            return Ok(());
        }

        let mut by_name: HashMap<&str, &Arc<Class>> = HashMap::new();
        for constant in &self.constants {
            if let Value::Class(class) = constant {
                by_name.insert(class.name.as_str(), class);
            }
        }

        let span_of = |name: &str| self.class_spans.get(name).copied().unwrap_or_else(Span::dummy);

        for class in &new_classes {
            let mut seen = HashSet::from([class.name.as_str()]);
            let mut current: &Class = class;
            while let (Some(parent_name), None) = (&current.parent_name, current.parent()) {
                let parent = by_name.get(parent_name.as_str()).ok_or_else(|| {
                    CompileError::UnknownParentClass {
                        class: current.name.clone(),
                        parent: parent_name.clone(),
                        span: span_of(&current.name),
                    }
                })?;
                if !seen.insert(parent.name.as_str()) {
                    return Err(CompileError::InheritanceCycle {
                        class: class.name.clone(),
                        span: span_of(&class.name),
                    });
                }
                current = parent.as_ref();
            }
        }

        for class in &new_classes {
            if let Some(parent) = class.parent_name.as_deref().and_then(|p| by_name.get(p)) {
                class.link_parent(Arc::clone(parent));
                tracing::debug!(class = %class.name, parent = %parent.name, "linked class");
            }
        }
        Ok(())
    }
}

fn add_property(members: &mut ClassMembers, name: &str) {
    if !members.properties.iter().any(|p| p == name) {
        members.properties.push(name.to_string());
    }
}

fn malformed(class: &str, reason: &str, span: Span) -> CompileError {
    CompileError::MalformedClassBody {
        class: class.to_string(),
        reason: reason.to_string(),
        span,
    }
}
