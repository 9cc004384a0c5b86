//! Abstract Syntax Tree (AST) definitions
//!
//! The runtime does not parse source text. A host parser hands over a finished
//! tree built from these nodes, either directly or as JSON via
//! [`VersionedProgram`]. Every node carries the [`Span`] of its source token.

use crate::span::Span;
use serde::{Deserialize, Serialize};

/// AST schema version
///
/// Included in JSON payloads; bump on breaking changes to node shapes.
pub const AST_VERSION: u32 = 1;

/// One compilation unit
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    pub statements: Vec<Stmt>,
}

/// Versioned AST wrapper for JSON exchange with host parsers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedProgram {
    pub ast_version: u32,
    #[serde(flatten)]
    pub program: Program,
}

impl VersionedProgram {
    pub fn new(program: Program) -> Self {
        Self {
            ast_version: AST_VERSION,
            program,
        }
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl From<Program> for VersionedProgram {
    fn from(program: Program) -> Self {
        Self::new(program)
    }
}

/// Identifier with span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identifier {
    pub name: String,
    pub span: Span,
}

/// Statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    Let(LetStmt),
    Expr(ExprStmt),
    Block(Block),
    Return(ReturnStmt),
    For(ForStmt),
    While(WhileStmt),
    Break(Span),
    Continue(Span),
    Class(ClassDecl),
    Try(TryStmt),
    Throw(ThrowStmt),
}

/// `let name = value;` or `const name = value;`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LetStmt {
    pub name: Identifier,
    pub value: Expr,
    pub constant: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExprStmt {
    pub expr: Expr,
    pub span: Span,
}

/// Braced statement list
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Block {
    pub statements: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnStmt {
    pub value: Option<Expr>,
    pub span: Span,
}

/// `for (init; condition; update) body`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForStmt {
    pub init: Option<Box<Stmt>>,
    pub condition: Option<Expr>,
    pub update: Option<Expr>,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhileStmt {
    pub condition: Expr,
    pub body: Block,
    pub span: Span,
}

/// `class Name extends Parent { ... }`
///
/// Body statements are partitioned by the compiler: a `let` whose value is a
/// function literal (or a bare named function literal) is a method, any other
/// `let` or bare identifier declares a property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassDecl {
    pub name: Identifier,
    pub parent: Option<Identifier>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

/// `try { ... } catch (e) { ... } finally { ... }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TryStmt {
    pub body: Block,
    pub catch: Option<CatchClause>,
    pub finally: Option<Block>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchClause {
    pub param: Option<Identifier>,
    pub body: Block,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrowStmt {
    pub value: Expr,
    pub span: Span,
}

/// Literal value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Null,
}

/// Expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal, Span),
    Identifier(Identifier),
    Prefix(PrefixExpr),
    Infix(InfixExpr),
    Ternary(TernaryExpr),
    If(IfExpr),
    Function(FunctionLiteral),
    Call(CallExpr),
    ArrayLiteral(ArrayLiteral),
    Index(IndexExpr),
    HashLiteral(HashLiteral),
    Assign(AssignExpr),
    IndexAssign(IndexAssignExpr),
    Member(MemberExpr),
    MemberAssign(MemberAssignExpr),
    Spawn(SpawnExpr),
    Channel(ChannelExpr),
    Send(SendExpr),
    Receive(ReceiveExpr),
    This(Span),
    Super(SuperExpr),
}

/// Operators are carried as source text so unknown ones reach the compiler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefixExpr {
    pub operator: String,
    pub operand: Box<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfixExpr {
    pub operator: String,
    pub left: Box<Expr>,
    pub right: Box<Expr>,
    pub span: Span,
}

/// `condition ? then_branch : else_branch`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TernaryExpr {
    pub condition: Box<Expr>,
    pub then_branch: Box<Expr>,
    pub else_branch: Box<Expr>,
    pub span: Span,
}

/// `if` is an expression: its value is the last expression of the taken branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IfExpr {
    pub condition: Box<Expr>,
    pub consequence: Block,
    pub alternative: Option<Block>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionLiteral {
    /// Set for `fn name(...)` and for literals bound directly by `let`
    pub name: Option<String>,
    pub params: Vec<Identifier>,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallExpr {
    pub callee: Box<Expr>,
    pub args: Vec<Expr>,
    pub span: Span,
}

/// `[a, b]` or `["k" => v, w]`
///
/// Lowers to an ordered map when `ordered` is set or any element carries a
/// key. An empty literal with `ordered` set is an empty ordered map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayLiteral {
    pub elements: Vec<ArrayElement>,
    #[serde(default)]
    pub ordered: bool,
    pub span: Span,
}

impl ArrayLiteral {
    pub fn is_ordered_map(&self) -> bool {
        self.ordered || self.elements.iter().any(|el| el.key.is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayElement {
    pub key: Option<Expr>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexExpr {
    pub target: Box<Expr>,
    pub index: Box<Expr>,
    pub span: Span,
}

/// `{k: v, ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HashLiteral {
    pub pairs: Vec<(Expr, Expr)>,
    pub span: Span,
}

/// `name = value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignExpr {
    pub target: Identifier,
    pub value: Box<Expr>,
    pub span: Span,
}

/// `target[index] = value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexAssignExpr {
    pub target: Box<Expr>,
    pub index: Box<Expr>,
    pub value: Box<Expr>,
    pub span: Span,
}

/// `target.member`; as a call callee this is a method invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberExpr {
    pub target: Box<Expr>,
    pub member: Identifier,
    pub span: Span,
}

/// `target.member = value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberAssignExpr {
    pub target: Box<Expr>,
    pub member: Identifier,
    pub value: Box<Expr>,
    pub span: Span,
}

/// `spawn callee(args)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnExpr {
    pub callee: Box<Expr>,
    pub args: Vec<Expr>,
    pub span: Span,
}

/// `channel` or `channel(n)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelExpr {
    pub capacity: Option<Box<Expr>>,
    pub span: Span,
}

/// `channel <- value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendExpr {
    pub channel: Box<Expr>,
    pub value: Box<Expr>,
    pub span: Span,
}

/// `<- channel`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiveExpr {
    pub channel: Box<Expr>,
    pub span: Span,
}

/// `super.method`; only meaningful as a call callee inside a method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuperExpr {
    pub method: Identifier,
    pub span: Span,
}

impl Expr {
    /// Get the span of this expression
    pub fn span(&self) -> Span {
        match self {
            Expr::Literal(_, span) | Expr::This(span) => *span,
            Expr::Identifier(id) => id.span,
            Expr::Prefix(p) => p.span,
            Expr::Infix(i) => i.span,
            Expr::Ternary(t) => t.span,
            Expr::If(i) => i.span,
            Expr::Function(f) => f.span,
            Expr::Call(c) => c.span,
            Expr::ArrayLiteral(a) => a.span,
            Expr::Index(i) => i.span,
            Expr::HashLiteral(h) => h.span,
            Expr::Assign(a) => a.span,
            Expr::IndexAssign(a) => a.span,
            Expr::Member(m) => m.span,
            Expr::MemberAssign(m) => m.span,
            Expr::Spawn(s) => s.span,
            Expr::Channel(c) => c.span,
            Expr::Send(s) => s.span,
            Expr::Receive(r) => r.span,
            Expr::Super(s) => s.span,
        }
    }

    /// Literal payload, if this node is a literal
    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Expr::Literal(lit, _) => Some(lit),
            _ => None,
        }
    }
}

impl Stmt {
    /// Get the span of this statement
    pub fn span(&self) -> Span {
        match self {
            Stmt::Let(l) => l.span,
            Stmt::Expr(e) => e.span,
            Stmt::Block(b) => b.span,
            Stmt::Return(r) => r.span,
            Stmt::For(f) => f.span,
            Stmt::While(w) => w.span,
            Stmt::Break(span) | Stmt::Continue(span) => *span,
            Stmt::Class(c) => c.span,
            Stmt::Try(t) => t.span,
            Stmt::Throw(t) => t.span,
        }
    }
}

/// Node constructors for hosts and tests that assemble trees by hand.
///
/// Every node gets a dummy span.
pub mod build {
    use super::*;

    fn sp() -> Span {
        Span::dummy()
    }

    pub fn program(statements: Vec<Stmt>) -> Program {
        Program { statements }
    }

    pub fn ident(name: &str) -> Identifier {
        Identifier {
            name: name.to_string(),
            span: sp(),
        }
    }

    pub fn block(statements: Vec<Stmt>) -> Block {
        Block {
            statements,
            span: sp(),
        }
    }

    // ===== Statements =====

    pub fn let_(name: &str, value: Expr) -> Stmt {
        Stmt::Let(LetStmt {
            name: ident(name),
            value,
            constant: false,
            span: sp(),
        })
    }

    pub fn const_(name: &str, value: Expr) -> Stmt {
        Stmt::Let(LetStmt {
            name: ident(name),
            value,
            constant: true,
            span: sp(),
        })
    }

    pub fn expr(expr: Expr) -> Stmt {
        Stmt::Expr(ExprStmt { expr, span: sp() })
    }

    pub fn ret(value: Expr) -> Stmt {
        Stmt::Return(ReturnStmt {
            value: Some(value),
            span: sp(),
        })
    }

    pub fn ret_void() -> Stmt {
        Stmt::Return(ReturnStmt {
            value: None,
            span: sp(),
        })
    }

    pub fn while_(condition: Expr, body: Vec<Stmt>) -> Stmt {
        Stmt::While(WhileStmt {
            condition,
            body: block(body),
            span: sp(),
        })
    }

    pub fn for_(
        init: Option<Stmt>,
        condition: Option<Expr>,
        update: Option<Expr>,
        body: Vec<Stmt>,
    ) -> Stmt {
        Stmt::For(ForStmt {
            init: init.map(Box::new),
            condition,
            update,
            body: block(body),
            span: sp(),
        })
    }

    pub fn break_() -> Stmt {
        Stmt::Break(sp())
    }

    pub fn continue_() -> Stmt {
        Stmt::Continue(sp())
    }

    pub fn class(name: &str, parent: Option<&str>, body: Vec<Stmt>) -> Stmt {
        Stmt::Class(ClassDecl {
            name: ident(name),
            parent: parent.map(ident),
            body,
            span: sp(),
        })
    }

    /// Method declaration inside a class body
    pub fn method(name: &str, params: &[&str], body: Vec<Stmt>) -> Stmt {
        let_(name, named_func(name, params, body))
    }

    /// Property declaration inside a class body
    pub fn property(name: &str) -> Stmt {
        expr(id(name))
    }

    pub fn try_(
        body: Vec<Stmt>,
        catch: Option<(Option<&str>, Vec<Stmt>)>,
        finally: Option<Vec<Stmt>>,
    ) -> Stmt {
        Stmt::Try(TryStmt {
            body: block(body),
            catch: catch.map(|(param, body)| CatchClause {
                param: param.map(ident),
                body: block(body),
            }),
            finally: finally.map(block),
            span: sp(),
        })
    }

    pub fn throw(value: Expr) -> Stmt {
        Stmt::Throw(ThrowStmt { value, span: sp() })
    }

    // ===== Expressions =====

    pub fn int(value: i64) -> Expr {
        Expr::Literal(Literal::Integer(value), sp())
    }

    pub fn float(value: f64) -> Expr {
        Expr::Literal(Literal::Float(value), sp())
    }

    pub fn string(value: &str) -> Expr {
        Expr::Literal(Literal::String(value.to_string()), sp())
    }

    pub fn boolean(value: bool) -> Expr {
        Expr::Literal(Literal::Boolean(value), sp())
    }

    pub fn null() -> Expr {
        Expr::Literal(Literal::Null, sp())
    }

    pub fn id(name: &str) -> Expr {
        Expr::Identifier(ident(name))
    }

    pub fn prefix(operator: &str, operand: Expr) -> Expr {
        Expr::Prefix(PrefixExpr {
            operator: operator.to_string(),
            operand: Box::new(operand),
            span: sp(),
        })
    }

    pub fn infix(operator: &str, left: Expr, right: Expr) -> Expr {
        Expr::Infix(InfixExpr {
            operator: operator.to_string(),
            left: Box::new(left),
            right: Box::new(right),
            span: sp(),
        })
    }

    pub fn ternary(condition: Expr, then_branch: Expr, else_branch: Expr) -> Expr {
        Expr::Ternary(TernaryExpr {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
            span: sp(),
        })
    }

    pub fn if_(condition: Expr, consequence: Vec<Stmt>, alternative: Option<Vec<Stmt>>) -> Expr {
        Expr::If(IfExpr {
            condition: Box::new(condition),
            consequence: block(consequence),
            alternative: alternative.map(block),
            span: sp(),
        })
    }

    pub fn func(params: &[&str], body: Vec<Stmt>) -> Expr {
        Expr::Function(FunctionLiteral {
            name: None,
            params: params.iter().map(|p| ident(p)).collect(),
            body: block(body),
            span: sp(),
        })
    }

    pub fn named_func(name: &str, params: &[&str], body: Vec<Stmt>) -> Expr {
        Expr::Function(FunctionLiteral {
            name: Some(name.to_string()),
            params: params.iter().map(|p| ident(p)).collect(),
            body: block(body),
            span: sp(),
        })
    }

    pub fn call(callee: Expr, args: Vec<Expr>) -> Expr {
        Expr::Call(CallExpr {
            callee: Box::new(callee),
            args,
            span: sp(),
        })
    }

    pub fn array(values: Vec<Expr>) -> Expr {
        Expr::ArrayLiteral(ArrayLiteral {
            elements: values
                .into_iter()
                .map(|value| ArrayElement { key: None, value })
                .collect(),
            ordered: false,
            span: sp(),
        })
    }

    /// Ordered-map literal; `None` keys take the next integer index
    pub fn ordered(entries: Vec<(Option<Expr>, Expr)>) -> Expr {
        Expr::ArrayLiteral(ArrayLiteral {
            elements: entries
                .into_iter()
                .map(|(key, value)| ArrayElement { key, value })
                .collect(),
            ordered: true,
            span: sp(),
        })
    }

    pub fn hash(pairs: Vec<(Expr, Expr)>) -> Expr {
        Expr::HashLiteral(HashLiteral { pairs, span: sp() })
    }

    pub fn index(target: Expr, index: Expr) -> Expr {
        Expr::Index(IndexExpr {
            target: Box::new(target),
            index: Box::new(index),
            span: sp(),
        })
    }

    pub fn assign(name: &str, value: Expr) -> Expr {
        Expr::Assign(AssignExpr {
            target: ident(name),
            value: Box::new(value),
            span: sp(),
        })
    }

    pub fn index_assign(target: Expr, index: Expr, value: Expr) -> Expr {
        Expr::IndexAssign(IndexAssignExpr {
            target: Box::new(target),
            index: Box::new(index),
            value: Box::new(value),
            span: sp(),
        })
    }

    pub fn member(target: Expr, name: &str) -> Expr {
        Expr::Member(MemberExpr {
            target: Box::new(target),
            member: ident(name),
            span: sp(),
        })
    }

    pub fn member_assign(target: Expr, name: &str, value: Expr) -> Expr {
        Expr::MemberAssign(MemberAssignExpr {
            target: Box::new(target),
            member: ident(name),
            value: Box::new(value),
            span: sp(),
        })
    }

    pub fn method_call(target: Expr, name: &str, args: Vec<Expr>) -> Expr {
        call(member(target, name), args)
    }

    pub fn spawn(callee: Expr, args: Vec<Expr>) -> Expr {
        Expr::Spawn(SpawnExpr {
            callee: Box::new(callee),
            args,
            span: sp(),
        })
    }

    pub fn channel(capacity: Option<Expr>) -> Expr {
        Expr::Channel(ChannelExpr {
            capacity: capacity.map(Box::new),
            span: sp(),
        })
    }

    pub fn send(channel: Expr, value: Expr) -> Expr {
        Expr::Send(SendExpr {
            channel: Box::new(channel),
            value: Box::new(value),
            span: sp(),
        })
    }

    pub fn recv(channel: Expr) -> Expr {
        Expr::Receive(ReceiveExpr {
            channel: Box::new(channel),
            span: sp(),
        })
    }

    pub fn this() -> Expr {
        Expr::This(sp())
    }

    pub fn super_call(method: &str, args: Vec<Expr>) -> Expr {
        call(
            Expr::Super(SuperExpr {
                method: ident(method),
                span: sp(),
            }),
            args,
        )
    }
}
