//! Statement compilation

use crate::ast::*;
use crate::bytecode::{Opcode, NO_TARGET};
use crate::compiler::{CompileError, CompileResult, Compiler, LoopContext};
use crate::span::Span;

impl Compiler {
    /// Compile a statement
    pub(super) fn compile_stmt(&mut self, stmt: &Stmt) -> CompileResult<()> {
        match stmt {
            Stmt::Let(decl) => self.compile_let(decl),
            Stmt::Expr(expr_stmt) => {
                // Expression statement: discard the value
                self.compile_expr(&expr_stmt.expr)?;
                self.emit(Opcode::Pop, &[], expr_stmt.span);
                Ok(())
            }
            // Blocks do not open a scope
            Stmt::Block(block) => self.compile_statements(&block.statements),
            Stmt::Return(ret) => self.compile_return(ret),
            Stmt::For(for_stmt) => self.compile_for(for_stmt),
            Stmt::While(while_stmt) => self.compile_while(while_stmt),
            Stmt::Break(span) => self.compile_break(*span),
            Stmt::Continue(span) => self.compile_continue(*span),
            Stmt::Class(decl) => self.compile_class(decl),
            Stmt::Try(try_stmt) => self.compile_try(try_stmt),
            Stmt::Throw(throw) => {
                self.compile_expr(&throw.value)?;
                self.emit(Opcode::Throw, &[], throw.span);
                Ok(())
            }
        }
    }

    /// Compile a variable declaration
    ///
    /// The initializer is compiled before the name is bound, so it cannot
    /// refer to the binding it initializes (function literals excepted, see
    /// [`Compiler::compile_function`]).
    fn compile_let(&mut self, decl: &LetStmt) -> CompileResult<()> {
        match &decl.value {
            Expr::Function(func) => self.compile_function(func, Some(&decl.name.name))?,
            value => self.compile_expr(value)?,
        }
        let symbol = self.define(&decl.name.name, decl.constant, decl.name.span)?;
        self.store_symbol(&symbol, decl.span)?;
        self.emit(Opcode::Pop, &[], decl.span);
        Ok(())
    }

    fn compile_return(&mut self, ret: &ReturnStmt) -> CompileResult<()> {
        if !self.function().is_function {
            return Err(CompileError::MisplacedKeyword {
                keyword: "return",
                context: "a function",
                span: ret.span,
            });
        }
        // The value is computed before any finally body runs
        if let Some(value) = &ret.value {
            self.compile_expr(value)?;
        }
        self.exit_try_regions(0, ret.span)?;
        let opcode = if ret.value.is_some() {
            Opcode::ReturnValue
        } else {
            Opcode::Return
        };
        self.emit(opcode, &[], ret.span);
        Ok(())
    }

    fn enter_loop(&mut self, continue_target: Option<usize>) {
        let try_depth = self.function().regions.len();
        self.function().loops.push(LoopContext {
            continue_target,
            try_depth,
            ..LoopContext::default()
        });
    }

    fn leave_loop(&mut self, span: Span) -> CompileResult<()> {
        let ctx = self.function().loops.pop().unwrap_or_default();
        for jump in ctx.break_jumps {
            self.patch_jump(jump, span)?;
        }
        Ok(())
    }

    /// Compile a while loop
    fn compile_while(&mut self, while_stmt: &WhileStmt) -> CompileResult<()> {
        let loop_start = self.current_offset();
        self.enter_loop(Some(loop_start));

        self.compile_expr(&while_stmt.condition)?;
        let exit_jump = self.emit_jump(Opcode::JumpIfFalse, while_stmt.span);

        self.compile_statements(&while_stmt.body.statements)?;
        self.emit_jump_to(Opcode::Jump, loop_start, while_stmt.span)?;

        self.patch_jump(exit_jump, while_stmt.span)?;
        self.leave_loop(while_stmt.span)
    }

    /// Compile a for loop
    ///
    /// `continue` jumps to the update clause, not to the condition.
    fn compile_for(&mut self, for_stmt: &ForStmt) -> CompileResult<()> {
        if let Some(init) = &for_stmt.init {
            self.compile_stmt(init)?;
        }

        let loop_start = self.current_offset();
        self.enter_loop(None);

        let exit_jump = match &for_stmt.condition {
            Some(condition) => {
                self.compile_expr(condition)?;
                Some(self.emit_jump(Opcode::JumpIfFalse, for_stmt.span))
            }
            None => None,
        };

        self.compile_statements(&for_stmt.body.statements)?;

        let continue_jumps = self
            .function()
            .loops
            .last_mut()
            .map(|ctx| std::mem::take(&mut ctx.continue_jumps))
            .unwrap_or_default();
        for jump in continue_jumps {
            self.patch_jump(jump, for_stmt.span)?;
        }
        if let Some(update) = &for_stmt.update {
            self.compile_expr(update)?;
            self.emit(Opcode::Pop, &[], for_stmt.span);
        }
        self.emit_jump_to(Opcode::Jump, loop_start, for_stmt.span)?;

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump, for_stmt.span)?;
        }
        self.leave_loop(for_stmt.span)
    }

    /// Leave every protected region above `depth`, innermost first
    ///
    /// Each region's handler is popped and its finally body, if any, is
    /// compiled inline. A finally body runs with only the regions outside
    /// it still open, so a throw or jump from it behaves as it would after
    /// a normal exit.
    fn exit_try_regions(&mut self, depth: usize, span: Span) -> CompileResult<()> {
        let regions = self.function().regions.clone();
        for level in (depth..regions.len()).rev() {
            self.function().regions.truncate(level);
            let next = self.current_offset() + Opcode::FinallyEnd.instruction_len();
            self.emit_jump_to(Opcode::FinallyEnd, next, span)?;
            if let Some(finally) = &regions[level] {
                self.compile_statements(&finally.statements)?;
            }
        }
        self.function().regions = regions;
        Ok(())
    }

    /// Compile a break statement
    fn compile_break(&mut self, span: Span) -> CompileResult<()> {
        let try_depth = match self.function().loops.last() {
            Some(ctx) => ctx.try_depth,
            None => {
                return Err(CompileError::MisplacedKeyword {
                    keyword: "break",
                    context: "a loop",
                    span,
                })
            }
        };
        self.exit_try_regions(try_depth, span)?;
        let jump = self.emit_jump(Opcode::Jump, span);
        if let Some(ctx) = self.function().loops.last_mut() {
            ctx.break_jumps.push(jump);
        }
        Ok(())
    }

    /// Compile a continue statement
    fn compile_continue(&mut self, span: Span) -> CompileResult<()> {
        let (try_depth, target) = match self.function().loops.last() {
            Some(ctx) => (ctx.try_depth, ctx.continue_target),
            None => {
                return Err(CompileError::MisplacedKeyword {
                    keyword: "continue",
                    context: "a loop",
                    span,
                })
            }
        };
        self.exit_try_regions(try_depth, span)?;
        match target {
            Some(target) => self.emit_jump_to(Opcode::Jump, target, span)?,
            None => {
                let jump = self.emit_jump(Opcode::Jump, span);
                if let Some(ctx) = self.function().loops.last_mut() {
                    ctx.continue_jumps.push(jump);
                }
            }
        }
        Ok(())
    }

    /// Compile try/catch/finally
    ///
    /// ```text
    ///     TryEnter  C, F
    ///     <body>
    ///     FinallyEnd N
    /// C:  <bind or pop the thrown value>
    ///     TryEnter  -, F          (only with finally)
    ///     <catch body>
    ///     FinallyEnd N            (Jump END without finally)
    /// N:  Null; False             (only with finally)
    /// F:  <finally body>
    ///     Rethrow
    /// END:
    /// ```
    ///
    /// A throw lands at C with the value pushed. Without a catch clause it
    /// lands at F with the value and `true` pushed; Rethrow then raises the
    /// value again once the finally body is done. `return`, `break` and
    /// `continue` leave the region through [`Compiler::exit_try_regions`],
    /// which runs the finally body before the jump.
    fn compile_try(&mut self, try_stmt: &TryStmt) -> CompileResult<()> {
        if try_stmt.catch.is_none() && try_stmt.finally.is_none() {
            return self.compile_statements(&try_stmt.body.statements);
        }
        let span = try_stmt.span;
        let has_finally = try_stmt.finally.is_some();

        let enter = self.emit(Opcode::TryEnter, &[NO_TARGET, NO_TARGET], span);
        self.function().regions.push(try_stmt.finally.clone());
        self.compile_statements(&try_stmt.body.statements)?;
        self.function().regions.pop();
        let mut exits = vec![self.emit_jump(Opcode::FinallyEnd, span)];

        let mut catch_enter = None;
        if let Some(catch) = &try_stmt.catch {
            self.patch_operand(enter, 0, self.current_offset(), span)?;
            match &catch.param {
                Some(param) => {
                    let symbol = self.define(&param.name, false, param.span)?;
                    self.store_symbol(&symbol, param.span)?;
                    self.emit(Opcode::Pop, &[], param.span);
                }
                None => {
                    self.emit(Opcode::Pop, &[], span);
                }
            }

            if has_finally {
                catch_enter = Some(self.emit(Opcode::TryEnter, &[NO_TARGET, NO_TARGET], span));
                self.function().regions.push(try_stmt.finally.clone());
                self.compile_statements(&catch.body.statements)?;
                self.function().regions.pop();
                exits.push(self.emit_jump(Opcode::FinallyEnd, span));
            } else {
                self.compile_statements(&catch.body.statements)?;
                exits.push(self.emit_jump(Opcode::Jump, span));
            }
        }

        if let Some(finally) = &try_stmt.finally {
            for exit in exits.drain(..) {
                self.patch_jump(exit, span)?;
            }
            self.emit(Opcode::Null, &[], span);
            self.emit(Opcode::False, &[], span);

            let finally_start = self.current_offset();
            self.patch_operand(enter, 1, finally_start, span)?;
            if let Some(catch_enter) = catch_enter {
                self.patch_operand(catch_enter, 1, finally_start, span)?;
            }
            self.compile_statements(&finally.statements)?;
            self.emit(Opcode::Rethrow, &[], span);
        }

        for exit in exits {
            self.patch_jump(exit, span)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::api::native::NativeRegistry;
    use crate::ast::build::*;
    use crate::bytecode::{decode, Instruction, Opcode, NO_TARGET};
    use crate::compiler::{CompileError, Compiler};

    fn compile(statements: Vec<crate::ast::Stmt>) -> Vec<Instruction> {
        let mut compiler = Compiler::new(&NativeRegistry::with_prelude());
        compiler.set_optimize(false);
        let bc = compiler.compile(&program(statements)).unwrap();
        decode(&bc.instructions).unwrap()
    }

    #[test]
    fn test_while_loop_jumps() {
        let ops = compile(vec![while_(boolean(true), vec![expr(int(1))])]);
        // 0000 True, 0001 JumpIfFalse 11, 0004 Constant, 0007 Pop, 0008 Jump 0, 0011 Halt
        assert_eq!(ops[1].opcode, Opcode::JumpIfFalse);
        assert_eq!(ops[1].operands, vec![11]);
        assert_eq!(ops[4].opcode, Opcode::Jump);
        assert_eq!(ops[4].operands, vec![0]);
        assert_eq!(ops[5].offset, 11);
    }

    #[test]
    fn test_for_continue_targets_update() {
        let ops = compile(vec![for_(
            Some(let_("i", int(0))),
            Some(infix("<", id("i"), int(3))),
            Some(assign("i", infix("+", id("i"), int(1)))),
            vec![continue_()],
        )]);
        let jif = ops.iter().position(|i| i.opcode == Opcode::JumpIfFalse).unwrap();
        let continue_jump = &ops[jif + 1];
        assert_eq!(continue_jump.opcode, Opcode::Jump);
        // The continue lands on the update clause right after itself
        assert_eq!(continue_jump.operands[0], continue_jump.next_offset());
    }

    #[test]
    fn test_break_inside_try_closes_handler() {
        let ops = compile(vec![while_(
            boolean(true),
            vec![try_(vec![break_()], Some((None, vec![])), None)],
        )]);
        let enter = ops.iter().position(|i| i.opcode == Opcode::TryEnter).unwrap();
        assert_eq!(ops[enter + 1].opcode, Opcode::FinallyEnd);
        assert_eq!(ops[enter + 1].operands[0], ops[enter + 2].offset);
        assert_eq!(ops[enter + 2].opcode, Opcode::Jump);
    }

    #[test]
    fn test_return_inside_try_inlines_finally() {
        // fn() { try { return 1 } finally { 2 } }
        let mut compiler = Compiler::new(&NativeRegistry::new());
        compiler.set_optimize(false);
        let bc = compiler
            .compile(&program(vec![expr(func(
                &[],
                vec![try_(vec![ret(int(1))], None, Some(vec![expr(int(2))]))],
            ))]))
            .unwrap();
        let body = bc.functions().next().unwrap();
        let ops: Vec<Opcode> = decode(&body.instructions)
            .unwrap()
            .into_iter()
            .map(|i| i.opcode)
            .collect();
        assert_eq!(
            ops[..6],
            [
                Opcode::TryEnter,
                Opcode::Constant,
                Opcode::FinallyEnd,
                Opcode::Constant,
                Opcode::Pop,
                Opcode::ReturnValue,
            ]
        );
    }

    #[test]
    fn test_try_catch_finally_layout() {
        let ops = compile(vec![
            let_("x", int(0)),
            try_(
                vec![throw(string("boom"))],
                Some((Some("e"), vec![expr(assign("x", int(2)))])),
                Some(vec![expr(assign("x", infix("+", id("x"), int(10))))]),
            ),
        ]);
        let enter = ops.iter().find(|i| i.opcode == Opcode::TryEnter).unwrap();
        let (catch, finally) = (enter.operands[0], enter.operands[1]);
        assert_ne!(catch, NO_TARGET);
        assert_ne!(finally, NO_TARGET);

        let at = |offset: usize| ops.iter().position(|i| i.offset == offset).unwrap();
        // The catch block binds the value first
        assert_eq!(ops[at(catch)].opcode, Opcode::SetGlobal);
        // The finally body is preceded by the normal-path marker
        assert_eq!(ops[at(finally) - 2].opcode, Opcode::Null);
        assert_eq!(ops[at(finally) - 1].opcode, Opcode::False);
        assert!(ops.iter().any(|i| i.opcode == Opcode::Rethrow));
    }

    #[test]
    fn test_try_without_catch_has_no_catch_target() {
        let ops = compile(vec![try_(vec![expr(int(1))], None, Some(vec![]))]);
        assert_eq!(ops[0].opcode, Opcode::TryEnter);
        assert_eq!(ops[0].operands[0], NO_TARGET);
    }

    #[test]
    fn test_return_at_top_level_rejected() {
        let mut compiler = Compiler::new(&NativeRegistry::new());
        let err = compiler.compile(&program(vec![ret(int(1))])).unwrap_err();
        assert!(matches!(err, CompileError::MisplacedKeyword { keyword: "return", .. }));
    }

    #[test]
    fn test_continue_outside_loop_in_function() {
        let mut compiler = Compiler::new(&NativeRegistry::new());
        let err = compiler
            .compile(&program(vec![while_(
                boolean(true),
                vec![expr(func(&[], vec![continue_()]))],
            )]))
            .unwrap_err();
        assert!(matches!(err, CompileError::MisplacedKeyword { keyword: "continue", .. }));
    }
}
