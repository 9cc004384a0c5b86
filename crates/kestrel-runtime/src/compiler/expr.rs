//! Expression compilation

use crate::ast::*;
use crate::bytecode::Opcode;
use crate::compiler::{CompileError, CompileResult, Compiler, MAX_ARGS};
use crate::span::Span;
use crate::value::{Closure, Value};
use crate::vm::arith::BinaryOp;
use std::sync::Arc;

impl Compiler {
    /// Compile an expression, leaving its value on the stack
    pub(super) fn compile_expr(&mut self, expr: &Expr) -> CompileResult<()> {
        match expr {
            Expr::Literal(lit, span) => self.compile_literal(lit, *span),
            Expr::Identifier(ident) => {
                let symbol = self.resolve(&ident.name, ident.span)?;
                self.load_symbol(&symbol, ident.span);
                Ok(())
            }
            Expr::Prefix(prefix) => self.compile_prefix(prefix),
            Expr::Infix(infix) => self.compile_infix(infix),
            Expr::Ternary(ternary) => self.compile_ternary(ternary),
            Expr::If(if_expr) => self.compile_if(if_expr),
            Expr::Function(func) => self.compile_function(func, None),
            Expr::Call(call) => self.compile_call(call),
            Expr::ArrayLiteral(array) => self.compile_array(array),
            Expr::Index(index) => {
                self.compile_expr(&index.target)?;
                self.compile_expr(&index.index)?;
                self.emit(Opcode::GetIndex, &[], index.span);
                Ok(())
            }
            Expr::HashLiteral(hash) => {
                for (key, value) in &hash.pairs {
                    self.compile_expr(key)?;
                    self.compile_expr(value)?;
                }
                self.emit(Opcode::Hash, &[hash.pairs.len() * 2], hash.span);
                Ok(())
            }
            Expr::Assign(assign) => self.compile_assign(assign),
            Expr::IndexAssign(assign) => {
                self.compile_expr(&assign.target)?;
                self.compile_expr(&assign.index)?;
                self.compile_expr(&assign.value)?;
                self.emit(Opcode::SetIndex, &[], assign.span);
                Ok(())
            }
            Expr::Member(member) => {
                self.compile_expr(&member.target)?;
                let name = self.add_constant(Value::string(&member.member.name), member.span)?;
                self.emit(Opcode::GetProperty, &[name], member.span);
                Ok(())
            }
            Expr::MemberAssign(assign) => {
                self.compile_expr(&assign.target)?;
                self.compile_expr(&assign.value)?;
                let name = self.add_constant(Value::string(&assign.member.name), assign.span)?;
                self.emit(Opcode::SetProperty, &[name], assign.span);
                Ok(())
            }
            Expr::Spawn(spawn) => {
                self.compile_expr(&spawn.callee)?;
                let argc = self.compile_args(&spawn.args, spawn.span)?;
                self.emit(Opcode::Spawn, &[argc], spawn.span);
                Ok(())
            }
            Expr::Channel(channel) => {
                let flag = match &channel.capacity {
                    Some(capacity) => {
                        self.compile_expr(capacity)?;
                        1
                    }
                    None => 0,
                };
                self.emit(Opcode::Channel, &[flag], channel.span);
                Ok(())
            }
            Expr::Send(send) => {
                self.compile_expr(&send.channel)?;
                self.compile_expr(&send.value)?;
                self.emit(Opcode::Send, &[], send.span);
                Ok(())
            }
            Expr::Receive(receive) => {
                self.compile_expr(&receive.channel)?;
                self.emit(Opcode::Receive, &[], receive.span);
                Ok(())
            }
            Expr::This(span) => self.compile_this(*span),
            Expr::Super(sup) => Err(CompileError::MisplacedKeyword {
                keyword: "super",
                context: "a method call",
                span: sup.span,
            }),
        }
    }

    fn compile_literal(&mut self, lit: &Literal, span: Span) -> CompileResult<()> {
        match lit {
            Literal::Integer(i) => self.emit_constant(Value::Integer(*i), span)?,
            Literal::Float(f) => self.emit_constant(Value::Float(*f), span)?,
            Literal::String(s) => self.emit_constant(Value::string(s), span)?,
            Literal::Boolean(true) => {
                self.emit(Opcode::True, &[], span);
            }
            Literal::Boolean(false) => {
                self.emit(Opcode::False, &[], span);
            }
            Literal::Null => {
                self.emit(Opcode::Null, &[], span);
            }
        }
        Ok(())
    }

    fn compile_prefix(&mut self, prefix: &PrefixExpr) -> CompileResult<()> {
        let opcode = match prefix.operator.as_str() {
            "-" => Opcode::Negate,
            "!" => Opcode::Not,
            other => {
                return Err(CompileError::UnknownOperator {
                    operator: other.to_string(),
                    span: prefix.span,
                })
            }
        };
        self.compile_expr(&prefix.operand)?;
        self.emit(opcode, &[], prefix.span);
        Ok(())
    }

    fn compile_infix(&mut self, infix: &InfixExpr) -> CompileResult<()> {
        match infix.operator.as_str() {
            "&&" => return self.compile_and(infix),
            "||" => return self.compile_or(infix),
            _ => {}
        }

        let (op, swap) = BinaryOp::from_operator(&infix.operator).ok_or_else(|| {
            CompileError::UnknownOperator {
                operator: infix.operator.clone(),
                span: infix.span,
            }
        })?;

        if swap {
            self.compile_expr(&infix.right)?;
            self.compile_expr(&infix.left)?;
        } else {
            self.compile_expr(&infix.left)?;
            self.compile_expr(&infix.right)?;
        }
        self.emit(op.opcode(), &[], infix.span);
        Ok(())
    }

    /// `a && b`: the result is `a` when it is falsy, otherwise `b`
    fn compile_and(&mut self, infix: &InfixExpr) -> CompileResult<()> {
        self.compile_expr(&infix.left)?;
        self.emit(Opcode::Dup, &[], infix.span);
        let end = self.emit_jump(Opcode::JumpIfFalse, infix.span);
        self.emit(Opcode::Pop, &[], infix.span);
        self.compile_expr(&infix.right)?;
        self.patch_jump(end, infix.span)
    }

    /// `a || b`: the result is `a` when it is truthy, otherwise `b`
    fn compile_or(&mut self, infix: &InfixExpr) -> CompileResult<()> {
        self.compile_expr(&infix.left)?;
        self.emit(Opcode::Dup, &[], infix.span);
        let rhs = self.emit_jump(Opcode::JumpIfFalse, infix.span);
        let end = self.emit_jump(Opcode::Jump, infix.span);
        self.patch_jump(rhs, infix.span)?;
        self.emit(Opcode::Pop, &[], infix.span);
        self.compile_expr(&infix.right)?;
        self.patch_jump(end, infix.span)
    }

    fn compile_ternary(&mut self, ternary: &TernaryExpr) -> CompileResult<()> {
        self.compile_expr(&ternary.condition)?;
        let else_jump = self.emit_jump(Opcode::JumpIfFalse, ternary.span);
        self.compile_expr(&ternary.then_branch)?;
        let end_jump = self.emit_jump(Opcode::Jump, ternary.span);
        self.patch_jump(else_jump, ternary.span)?;
        self.compile_expr(&ternary.else_branch)?;
        self.patch_jump(end_jump, ternary.span)
    }

    /// `if` is an expression: each branch leaves its value on the stack
    fn compile_if(&mut self, if_expr: &IfExpr) -> CompileResult<()> {
        self.compile_expr(&if_expr.condition)?;
        let else_jump = self.emit_jump(Opcode::JumpIfFalse, if_expr.span);

        self.compile_block_value(&if_expr.consequence)?;
        let end_jump = self.emit_jump(Opcode::Jump, if_expr.span);

        self.patch_jump(else_jump, if_expr.span)?;
        match &if_expr.alternative {
            Some(alternative) => self.compile_block_value(alternative)?,
            None => {
                self.emit(Opcode::Null, &[], if_expr.span);
            }
        }
        self.patch_jump(end_jump, if_expr.span)
    }

    /// Compile a block whose value is that of its trailing expression
    /// statement, or null
    fn compile_block_value(&mut self, block: &Block) -> CompileResult<()> {
        self.compile_statements(&block.statements)?;
        match block.statements.last() {
            Some(Stmt::Expr(_)) if self.last_instruction_is(Opcode::Pop) => {
                self.remove_last_pop();
            }
            _ => {
                self.emit(Opcode::Null, &[], block.span);
            }
        }
        Ok(())
    }

    /// Compile a function literal and emit the closure construction
    ///
    /// `binding` names the variable the literal is assigned to, so an
    /// anonymous function can still call itself.
    pub(super) fn compile_function(
        &mut self,
        func: &FunctionLiteral,
        binding: Option<&str>,
    ) -> CompileResult<()> {
        let name = func.name.as_deref().or(binding);

        self.enter_scope();
        if let Some(name) = name {
            self.symbol_table.define_function_name(name);
        }
        for param in &func.params {
            self.define(&param.name, false, param.span)?;
        }
        self.compile_function_body(&func.body)?;
        let (scope, num_locals, free) = self.leave_scope();

        for symbol in &free {
            self.capture_symbol(symbol, func.span);
        }

        let function = Self::finish_function(
            name.map(str::to_string),
            scope,
            num_locals,
            func.params.len(),
        );
        let index = self.add_constant(Value::CompiledFunction(Arc::new(function)), func.span)?;
        self.emit(Opcode::Closure, &[index, free.len()], func.span);
        Ok(())
    }

    /// Compile statements of a function body and make sure it returns
    pub(super) fn compile_function_body(&mut self, body: &Block) -> CompileResult<()> {
        self.compile_statements(&body.statements)?;
        if matches!(body.statements.last(), Some(Stmt::Expr(_)))
            && self.last_instruction_is(Opcode::Pop)
        {
            self.replace_last_pop_with_return();
        }
        if !self.last_instruction_is(Opcode::ReturnValue) && !self.last_instruction_is(Opcode::Return)
        {
            self.emit(Opcode::Return, &[], body.span);
        }
        Ok(())
    }

    /// Compile a method body into a closure with no captured values
    pub(super) fn compile_method(
        &mut self,
        class: &str,
        func: &FunctionLiteral,
        name: &str,
    ) -> CompileResult<Arc<Closure>> {
        self.enter_scope();
        self.define("this", true, func.span)?;
        for param in &func.params {
            self.define(&param.name, false, param.span)?;
        }
        self.compile_function_body(&func.body)?;
        let (scope, num_locals, free) = self.leave_scope();

        if let Some(captured) = free.first() {
            return Err(CompileError::MalformedClassBody {
                class: class.to_string(),
                reason: format!(
                    "method '{}' captures local '{}' of an enclosing function",
                    name, captured.name
                ),
                span: func.span,
            });
        }

        let function = Self::finish_function(
            Some(format!("{}.{}", class, name)),
            scope,
            num_locals,
            func.params.len(),
        );
        Ok(Arc::new(Closure::new(Arc::new(function), Vec::new())))
    }

    fn compile_args(&mut self, args: &[Expr], span: Span) -> CompileResult<usize> {
        if args.len() > MAX_ARGS {
            return Err(CompileError::TooManyArguments { span });
        }
        for arg in args {
            self.compile_expr(arg)?;
        }
        Ok(args.len())
    }

    fn compile_call(&mut self, call: &CallExpr) -> CompileResult<()> {
        match call.callee.as_ref() {
            Expr::Member(member) => {
                self.compile_expr(&member.target)?;
                let argc = self.compile_args(&call.args, call.span)?;
                let name = self.add_constant(Value::string(&member.member.name), call.span)?;
                self.emit(Opcode::Invoke, &[name, argc], call.span);
                Ok(())
            }
            Expr::Super(sup) => self.compile_super_call(sup, &call.args, call.span),
            callee => {
                self.compile_expr(callee)?;
                let argc = self.compile_args(&call.args, call.span)?;
                self.emit(Opcode::Call, &[argc], call.span);
                Ok(())
            }
        }
    }

    /// `super.method(args)`: receiver, args, the enclosing class, InvokeSuper
    fn compile_super_call(&mut self, sup: &SuperExpr, args: &[Expr], span: Span) -> CompileResult<()> {
        let class = match self.classes.last() {
            Some(class) if class.has_parent => class.clone(),
            _ => {
                return Err(CompileError::MisplacedKeyword {
                    keyword: "super",
                    context: "a subclass method",
                    span: sup.span,
                })
            }
        };
        self.compile_this(sup.span)?;
        let argc = self.compile_args(args, span)?;
        self.emit(Opcode::Constant, &[class.constant], span);
        let name = self.add_constant(Value::string(&sup.method.name), span)?;
        self.emit(Opcode::InvokeSuper, &[name, argc], span);
        Ok(())
    }

    fn compile_this(&mut self, span: Span) -> CompileResult<()> {
        if self.classes.is_empty() {
            return Err(CompileError::MisplacedKeyword {
                keyword: "this",
                context: "a class method",
                span,
            });
        }
        let symbol = self.resolve("this", span)?;
        self.load_symbol(&symbol, span);
        Ok(())
    }

    /// Array literal, or ordered map literal when flagged or keyed
    ///
    /// Unkeyed elements of an ordered map take the next integer index after
    /// the largest literal integer key so far.
    fn compile_array(&mut self, array: &ArrayLiteral) -> CompileResult<()> {
        if !array.is_ordered_map() {
            for element in &array.elements {
                self.compile_expr(&element.value)?;
            }
            self.emit(Opcode::Array, &[array.elements.len()], array.span);
            return Ok(());
        }

        let mut next_index: i64 = 0;
        for element in &array.elements {
            match &element.key {
                Some(key) => {
                    if let Some(Literal::Integer(k)) = key.as_literal() {
                        next_index = next_index.max(k.wrapping_add(1));
                    }
                    self.compile_expr(key)?;
                }
                None => {
                    self.emit_constant(Value::Integer(next_index), array.span)?;
                    next_index = next_index.wrapping_add(1);
                }
            }
            self.compile_expr(&element.value)?;
        }
        self.emit(Opcode::OrderedMap, &[array.elements.len() * 2], array.span);
        Ok(())
    }

    fn compile_assign(&mut self, assign: &AssignExpr) -> CompileResult<()> {
        let symbol = self.resolve(&assign.target.name, assign.target.span)?;
        if !symbol.is_assignable() {
            return Err(CompileError::InvalidAssignmentTarget {
                name: symbol.name,
                span: assign.span,
            });
        }
        self.compile_expr(&assign.value)?;
        self.store_symbol(&symbol, assign.span)
    }
}
