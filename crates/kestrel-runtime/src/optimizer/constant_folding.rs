//! Constant folding optimization pass
//!
//! Evaluates sub-expressions whose operands are integer, float, string or
//! boolean literals and replaces them with a literal:
//! - Arithmetic and comparison: `2 * 3` → `6`, `1 < 2` → `true`
//! - String concatenation: `"a" + "b"` → `"ab"`
//! - Logical: `true && false` → `false`
//! - Unary: `-5`, `!true`
//!
//! Folding goes through the same operator implementation the VM uses, so a
//! folded result is exactly what the VM would have computed. Anything the VM
//! would reject, including division or modulo by zero, is left in place so
//! the runtime error still fires.

use super::{OptimizationPass, OptimizationStats};
use crate::ast::*;
use crate::vm::arith::{self, BinaryOp};
use crate::span::Span;
use crate::value::Value;
use std::cell::Cell;

/// Constant folding optimization pass
///
/// Folds bottom-up in a single traversal, so the output is already a fixed
/// point.
pub struct ConstantFoldingPass;

impl OptimizationPass for ConstantFoldingPass {
    fn name(&self) -> &str {
        "constant-folding"
    }

    fn run(&self, program: &Program) -> (Program, OptimizationStats) {
        let folder = Folder { folded: Cell::new(0) };
        let statements = program.statements.iter().map(|s| folder.stmt(s)).collect();
        let stats = OptimizationStats {
            constants_folded: folder.folded.get(),
            passes_run: 1,
        };
        (Program { statements }, stats)
    }
}

struct Folder {
    folded: Cell<usize>,
}

impl Folder {
    fn block(&self, block: &Block) -> Block {
        Block {
            statements: block.statements.iter().map(|s| self.stmt(s)).collect(),
            span: block.span,
        }
    }

    fn boxed(&self, expr: &Expr) -> Box<Expr> {
        Box::new(self.expr(expr))
    }

    fn stmt(&self, stmt: &Stmt) -> Stmt {
        match stmt {
            Stmt::Let(l) => Stmt::Let(LetStmt {
                value: self.expr(&l.value),
                ..l.clone()
            }),
            Stmt::Expr(e) => Stmt::Expr(ExprStmt {
                expr: self.expr(&e.expr),
                span: e.span,
            }),
            Stmt::Block(b) => Stmt::Block(self.block(b)),
            Stmt::Return(r) => Stmt::Return(ReturnStmt {
                value: r.value.as_ref().map(|v| self.expr(v)),
                span: r.span,
            }),
            Stmt::For(f) => Stmt::For(ForStmt {
                init: f.init.as_ref().map(|s| Box::new(self.stmt(s))),
                condition: f.condition.as_ref().map(|c| self.expr(c)),
                update: f.update.as_ref().map(|u| self.expr(u)),
                body: self.block(&f.body),
                span: f.span,
            }),
            Stmt::While(w) => Stmt::While(WhileStmt {
                condition: self.expr(&w.condition),
                body: self.block(&w.body),
                span: w.span,
            }),
            Stmt::Break(_) | Stmt::Continue(_) => stmt.clone(),
            Stmt::Class(c) => Stmt::Class(ClassDecl {
                body: c.body.iter().map(|s| self.stmt(s)).collect(),
                ..c.clone()
            }),
            Stmt::Try(t) => Stmt::Try(TryStmt {
                body: self.block(&t.body),
                catch: t.catch.as_ref().map(|c| CatchClause {
                    param: c.param.clone(),
                    body: self.block(&c.body),
                }),
                finally: t.finally.as_ref().map(|f| self.block(f)),
                span: t.span,
            }),
            Stmt::Throw(t) => Stmt::Throw(ThrowStmt {
                value: self.expr(&t.value),
                span: t.span,
            }),
        }
    }

    fn expr(&self, expr: &Expr) -> Expr {
        match expr {
            Expr::Literal(..) | Expr::Identifier(_) | Expr::This(_) | Expr::Super(_) => {
                expr.clone()
            }
            Expr::Prefix(p) => {
                let operand = self.expr(&p.operand);
                if let Some(lit) = fold_prefix(&p.operator, &operand) {
                    return self.replaced(lit, p.span);
                }
                Expr::Prefix(PrefixExpr {
                    operator: p.operator.clone(),
                    operand: Box::new(operand),
                    span: p.span,
                })
            }
            Expr::Infix(i) => {
                let left = self.expr(&i.left);
                let right = self.expr(&i.right);
                if let Some(lit) = fold_infix(&i.operator, &left, &right) {
                    return self.replaced(lit, i.span);
                }
                Expr::Infix(InfixExpr {
                    operator: i.operator.clone(),
                    left: Box::new(left),
                    right: Box::new(right),
                    span: i.span,
                })
            }
            Expr::Ternary(t) => Expr::Ternary(TernaryExpr {
                condition: self.boxed(&t.condition),
                then_branch: self.boxed(&t.then_branch),
                else_branch: self.boxed(&t.else_branch),
                span: t.span,
            }),
            Expr::If(i) => Expr::If(IfExpr {
                condition: self.boxed(&i.condition),
                consequence: self.block(&i.consequence),
                alternative: i.alternative.as_ref().map(|a| self.block(a)),
                span: i.span,
            }),
            Expr::Function(f) => Expr::Function(FunctionLiteral {
                body: self.block(&f.body),
                ..f.clone()
            }),
            Expr::Call(c) => Expr::Call(CallExpr {
                callee: self.boxed(&c.callee),
                args: c.args.iter().map(|a| self.expr(a)).collect(),
                span: c.span,
            }),
            Expr::ArrayLiteral(a) => Expr::ArrayLiteral(ArrayLiteral {
                elements: a
                    .elements
                    .iter()
                    .map(|el| ArrayElement {
                        key: el.key.as_ref().map(|k| self.expr(k)),
                        value: self.expr(&el.value),
                    })
                    .collect(),
                ordered: a.ordered,
                span: a.span,
            }),
            Expr::Index(i) => Expr::Index(IndexExpr {
                target: self.boxed(&i.target),
                index: self.boxed(&i.index),
                span: i.span,
            }),
            Expr::HashLiteral(h) => Expr::HashLiteral(HashLiteral {
                pairs: h
                    .pairs
                    .iter()
                    .map(|(k, v)| (self.expr(k), self.expr(v)))
                    .collect(),
                span: h.span,
            }),
            Expr::Assign(a) => Expr::Assign(AssignExpr {
                target: a.target.clone(),
                value: self.boxed(&a.value),
                span: a.span,
            }),
            Expr::IndexAssign(a) => Expr::IndexAssign(IndexAssignExpr {
                target: self.boxed(&a.target),
                index: self.boxed(&a.index),
                value: self.boxed(&a.value),
                span: a.span,
            }),
            Expr::Member(m) => Expr::Member(MemberExpr {
                target: self.boxed(&m.target),
                member: m.member.clone(),
                span: m.span,
            }),
            Expr::MemberAssign(m) => Expr::MemberAssign(MemberAssignExpr {
                target: self.boxed(&m.target),
                member: m.member.clone(),
                value: self.boxed(&m.value),
                span: m.span,
            }),
            Expr::Spawn(s) => Expr::Spawn(SpawnExpr {
                callee: self.boxed(&s.callee),
                args: s.args.iter().map(|a| self.expr(a)).collect(),
                span: s.span,
            }),
            Expr::Channel(c) => Expr::Channel(ChannelExpr {
                capacity: c.capacity.as_ref().map(|cap| self.boxed(cap)),
                span: c.span,
            }),
            Expr::Send(s) => Expr::Send(SendExpr {
                channel: self.boxed(&s.channel),
                value: self.boxed(&s.value),
                span: s.span,
            }),
            Expr::Receive(r) => Expr::Receive(ReceiveExpr {
                channel: self.boxed(&r.channel),
                span: r.span,
            }),
        }
    }

    fn replaced(&self, lit: Literal, span: Span) -> Expr {
        self.folded.set(self.folded.get() + 1);
        Expr::Literal(lit, span)
    }
}

/// Value of a foldable literal (integer, float, string, boolean)
fn foldable(expr: &Expr) -> Option<Value> {
    match expr.as_literal()? {
        Literal::Integer(i) => Some(Value::Integer(*i)),
        Literal::Float(f) => Some(Value::Float(*f)),
        Literal::String(s) => Some(Value::string(s)),
        Literal::Boolean(b) => Some(Value::Boolean(*b)),
        Literal::Null => None,
    }
}

fn to_literal(value: Value) -> Option<Literal> {
    match value {
        Value::Integer(i) => Some(Literal::Integer(i)),
        Value::Float(f) => Some(Literal::Float(f)),
        Value::Boolean(b) => Some(Literal::Boolean(b)),
        Value::String(s) => Some(Literal::String(s.to_string())),
        _ => None,
    }
}

fn fold_prefix(operator: &str, operand: &Expr) -> Option<Literal> {
    let value = foldable(operand)?;
    let result = match operator {
        "-" => arith::negate(&value, Span::dummy()).ok()?,
        "!" => arith::not(&value),
        _ => return None,
    };
    to_literal(result)
}

fn fold_infix(operator: &str, left: &Expr, right: &Expr) -> Option<Literal> {
    let a = foldable(left)?;
    let b = foldable(right)?;

    // Short-circuit operators yield the deciding operand
    match operator {
        "&&" => return to_literal(if a.is_truthy() { b } else { a }),
        "||" => return to_literal(if a.is_truthy() { a } else { b }),
        _ => {}
    }

    let (op, swap) = BinaryOp::from_operator(operator)?;
    let (a, b) = if swap { (b, a) } else { (a, b) };
    to_literal(arith::binary(op, &a, &b, Span::dummy()).ok()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn fold(e: Expr) -> Expr {
        let (out, _) = ConstantFoldingPass.run(&program(vec![expr(e)]));
        match out.statements.into_iter().next() {
            Some(Stmt::Expr(ExprStmt { expr, .. })) => expr,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[rstest]
    #[case(infix("+", int(2), int(3)), int(5))]
    #[case(infix("-", int(2), int(3)), int(-1))]
    #[case(infix("*", int(4), float(0.5)), float(2.0))]
    #[case(infix("/", int(7), int(2)), int(3))]
    #[case(infix("/", int(-7), int(2)), int(-3))]
    #[case(infix("%", int(7), int(3)), int(1))]
    #[case(infix("<", int(1), int(2)), boolean(true))]
    #[case(infix("<=", int(2), int(2)), boolean(true))]
    #[case(infix(">", float(1.5), int(2)), boolean(false))]
    #[case(infix("==", string("a"), string("a")), boolean(true))]
    #[case(infix("!=", int(1), string("1")), boolean(true))]
    #[case(infix("+", string("foo"), string("bar")), string("foobar"))]
    #[case(infix("&&", boolean(true), boolean(false)), boolean(false))]
    #[case(infix("||", boolean(false), boolean(true)), boolean(true))]
    #[case(prefix("-", int(5)), int(-5))]
    #[case(prefix("-", float(2.5)), float(-2.5))]
    #[case(prefix("!", boolean(true)), boolean(false))]
    #[case(infix("+", int(i64::MAX), int(1)), int(i64::MIN))]
    fn test_folds(#[case] input: Expr, #[case] expected: Expr) {
        assert_eq!(fold(input), expected);
    }

    #[rstest]
    #[case(infix("/", int(1), int(0)))]
    #[case(infix("%", int(1), int(0)))]
    #[case(infix("/", float(1.0), float(0.0)))]
    #[case(infix("-", string("a"), int(1)))]
    #[case(infix("+", id("x"), int(1)))]
    #[case(infix("<>", int(1), int(2)))]
    #[case(prefix("-", string("s")))]
    fn test_leaves_unfoldable(#[case] input: Expr) {
        assert_eq!(fold(input.clone()), input);
    }

    #[test]
    fn test_folds_nested_inside_statements() {
        let p = program(vec![
            let_("f", func(&["x"], vec![ret(infix("+", id("x"), infix("*", int(2), int(21))))])),
            while_(infix("<", int(1), int(2)), vec![break_()]),
        ]);
        let (out, stats) = ConstantFoldingPass.run(&p);
        let expected = program(vec![
            let_("f", func(&["x"], vec![ret(infix("+", id("x"), int(42)))])),
            while_(boolean(true), vec![break_()]),
        ]);
        assert_eq!(out, expected);
        assert_eq!(stats.constants_folded, 2);
    }

    #[test]
    fn test_partial_fold_keeps_division_by_zero() {
        let input = infix("/", infix("+", int(1), int(1)), int(0));
        assert_eq!(fold(input), infix("/", int(2), int(0)));
    }

    fn arb_expr() -> impl Strategy<Value = Expr> {
        let leaf = prop_oneof![
            (-100i64..100).prop_map(int),
            (-10.0f64..10.0).prop_map(float),
            any::<bool>().prop_map(boolean),
            "[a-c]{0,2}".prop_map(|s| string(&s)),
            Just(id("x")),
        ];
        leaf.prop_recursive(4, 32, 2, |inner| {
            let ops = prop::sample::select(vec![
                "+", "-", "*", "/", "%", "<", "<=", ">", ">=", "==", "!=", "&&", "||",
            ]);
            prop_oneof![
                (ops, inner.clone(), inner.clone()).prop_map(|(op, l, r)| infix(op, l, r)),
                (prop::sample::select(vec!["-", "!"]), inner).prop_map(|(op, e)| prefix(op, e)),
            ]
        })
    }

    proptest! {
        #[test]
        fn prop_folding_is_idempotent(e in arb_expr()) {
            let p = program(vec![expr(e)]);
            let (once, _) = ConstantFoldingPass.run(&p);
            let (twice, stats) = ConstantFoldingPass.run(&once);
            prop_assert_eq!(stats.constants_folded, 0);
            prop_assert_eq!(once, twice);
        }
    }
}
