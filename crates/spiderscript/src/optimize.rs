//! Bottom-up AST optimizer: constant folding and chain flattening.
//!
//! Folding uses exactly the interpreter's semantics (wrap-around 64-bit
//! integers, IEEE binary64 reals, byte-wise string comparison) so an
//! optimized tree can never disagree with the unoptimized one. Operations
//! that could fail at runtime — integer division or modulo by zero — are
//! never folded, and the pass never crosses function boundaries or changes
//! an expression's static type. Applying the pass twice equals applying it
//! once.

use crate::ast::{BinOp, Expr, ExprLoc, ParsedScript, Stmt, UniOp};

/// Maximum operand count when flattening left-associative `+` chains.
const MAX_CHAIN: usize = 32;

/// Optimizes every function body, method body and global initializer.
pub fn optimize_script(script: &mut ParsedScript) {
    for function in &mut script.functions {
        optimize_stmt(&mut function.body);
    }
    for class in &mut script.classes {
        for method in &mut class.methods {
            optimize_stmt(&mut method.body);
        }
    }
    for global in &mut script.globals {
        if let Some(init) = &mut global.init {
            optimize_expr(init);
        }
    }
}

/// Rewrites one statement subtree.
pub fn optimize_stmt(stmt: &mut Stmt) {
    match stmt {
        Stmt::Nop => {}
        Stmt::Block(stmts) => {
            for s in stmts.iter_mut() {
                optimize_stmt(s);
            }
            stmts.retain(|s| !matches!(s, Stmt::Nop));
        }
        Stmt::VarDef { init, .. } => {
            if let Some(init) = init {
                optimize_expr(init);
            }
        }
        Stmt::If {
            cond,
            then_body,
            else_body,
        } => {
            optimize_expr(cond);
            optimize_stmt(then_body);
            if let Some(else_body) = else_body {
                optimize_stmt(else_body);
            }
        }
        Stmt::Loop {
            init,
            cond,
            increment,
            body,
            ..
        } => {
            if let Some(init) = init {
                optimize_stmt(init);
            }
            if let Some(cond) = cond {
                optimize_expr(cond);
            }
            if let Some(increment) = increment {
                optimize_expr(increment);
            }
            optimize_stmt(body);
        }
        Stmt::Switch { value, cases, .. } => {
            optimize_expr(value);
            for case in cases {
                if let Some(v) = &mut case.value {
                    optimize_expr(v);
                }
                for s in &mut case.body {
                    optimize_stmt(s);
                }
                case.body.retain(|s| !matches!(s, Stmt::Nop));
            }
        }
        Stmt::Return { value, .. } => {
            if let Some(value) = value {
                optimize_expr(value);
            }
        }
        Stmt::Break { .. } | Stmt::Continue { .. } => {}
        Stmt::Delete { target, .. } => optimize_expr(target),
        Stmt::Expr(expr) => optimize_expr(expr),
    }
}

/// Rewrites one expression subtree, children first.
pub fn optimize_expr(expr_loc: &mut ExprLoc) {
    match &mut expr_loc.expr {
        Expr::Null | Expr::Bool(_) | Expr::Int(_) | Expr::Real(_) | Expr::Str(_) | Expr::Variable(_) => {}
        Expr::Element { obj, .. } => optimize_expr(obj),
        Expr::Index { arr, index } => {
            optimize_expr(arr);
            optimize_expr(index);
        }
        Expr::Cast { value, .. } => optimize_expr(value),
        Expr::Assign { target, value, .. } => {
            optimize_expr(target);
            optimize_expr(value);
        }
        Expr::PostInc(v) | Expr::PostDec(v) => optimize_expr(v),
        Expr::Call { args, .. } => {
            for arg in args {
                optimize_expr(arg);
            }
        }
        Expr::MethodCall { obj, args, .. } => {
            optimize_expr(obj);
            for arg in args {
                optimize_expr(arg);
            }
        }
        Expr::CreateObject { args, .. } => {
            for arg in args {
                optimize_expr(arg);
            }
        }
        Expr::CreateArray { len, .. } => optimize_expr(len),
        Expr::ArrayLiteral(items) => {
            for item in items {
                optimize_expr(item);
            }
        }
        Expr::Ternary {
            cond,
            when_true,
            when_false,
        } => {
            optimize_expr(cond);
            if let Some(when_true) = when_true {
                optimize_expr(when_true);
            }
            optimize_expr(when_false);
        }
        Expr::BinOp { op, left, right } => {
            let op = *op;
            optimize_expr(left);
            optimize_expr(right);
            if let Some(folded) = fold_binop(op, &left.expr, &right.expr) {
                expr_loc.expr = folded;
                return;
            }
            if op == BinOp::Add {
                flatten_add_chain(expr_loc);
            }
        }
        Expr::UniOp { op, value } => {
            let op = *op;
            optimize_expr(value);
            if let Some(folded) = fold_uniop(op, &value.expr) {
                expr_loc.expr = folded;
            }
        }
    }
}

/// Folds a binary operator over two constants of compatible core types.
///
/// Returns `None` when the operands are not constants of the same core type,
/// or when the operation could fail at runtime.
fn fold_binop(op: BinOp, left: &Expr, right: &Expr) -> Option<Expr> {
    match (left, right) {
        (Expr::Int(a), Expr::Int(b)) => fold_int(op, *a, *b),
        (Expr::Real(a), Expr::Real(b)) => fold_real(op, *a, *b),
        (Expr::Bool(a), Expr::Bool(b)) => fold_bool(op, *a, *b),
        (Expr::Str(a), Expr::Str(b)) => fold_str(op, a, b),
        _ => None,
    }
}

fn fold_int(op: BinOp, a: i64, b: i64) -> Option<Expr> {
    let shift = (b as u64 & 63) as u32;
    Some(match op {
        BinOp::Add => Expr::Int(a.wrapping_add(b)),
        BinOp::Sub => Expr::Int(a.wrapping_sub(b)),
        BinOp::Mul => Expr::Int(a.wrapping_mul(b)),
        // Division and modulo by zero raise at runtime; leave them alone.
        BinOp::Div if b != 0 => Expr::Int(a.wrapping_div(b)),
        BinOp::Mod if b != 0 => Expr::Int(a.wrapping_rem(b)),
        BinOp::Div | BinOp::Mod => return None,
        BinOp::BitAnd => Expr::Int(a & b),
        BinOp::BitOr => Expr::Int(a | b),
        BinOp::BitXor => Expr::Int(a ^ b),
        BinOp::Shl => Expr::Int(((a as u64) << shift) as i64),
        BinOp::Shr => Expr::Int(((a as u64) >> shift) as i64),
        BinOp::Rol => Expr::Int((a as u64).rotate_left(shift) as i64),
        BinOp::Eq => Expr::Bool(a == b),
        BinOp::Ne => Expr::Bool(a != b),
        BinOp::Lt => Expr::Bool(a < b),
        BinOp::Le => Expr::Bool(a <= b),
        BinOp::Gt => Expr::Bool(a > b),
        BinOp::Ge => Expr::Bool(a >= b),
        BinOp::RefEq | BinOp::RefNe | BinOp::And | BinOp::Or | BinOp::Xor => return None,
    })
}

fn fold_real(op: BinOp, a: f64, b: f64) -> Option<Expr> {
    Some(match op {
        BinOp::Add => Expr::Real(a + b),
        BinOp::Sub => Expr::Real(a - b),
        BinOp::Mul => Expr::Real(a * b),
        BinOp::Div => Expr::Real(a / b),
        BinOp::Eq => Expr::Bool(a == b),
        BinOp::Ne => Expr::Bool(a != b),
        BinOp::Lt => Expr::Bool(a < b),
        BinOp::Le => Expr::Bool(a <= b),
        BinOp::Gt => Expr::Bool(a > b),
        BinOp::Ge => Expr::Bool(a >= b),
        _ => return None,
    })
}

fn fold_bool(op: BinOp, a: bool, b: bool) -> Option<Expr> {
    Some(match op {
        BinOp::And => Expr::Bool(a && b),
        BinOp::Or => Expr::Bool(a || b),
        BinOp::Xor => Expr::Bool(a != b),
        BinOp::Eq => Expr::Bool(a == b),
        BinOp::Ne => Expr::Bool(a != b),
        _ => return None,
    })
}

fn fold_str(op: BinOp, a: &[u8], b: &[u8]) -> Option<Expr> {
    Some(match op {
        BinOp::Add => {
            let mut bytes = Vec::with_capacity(a.len() + b.len());
            bytes.extend_from_slice(a);
            bytes.extend_from_slice(b);
            Expr::Str(bytes)
        }
        BinOp::Eq => Expr::Bool(a == b),
        BinOp::Ne => Expr::Bool(a != b),
        BinOp::Lt => Expr::Bool(a < b),
        BinOp::Le => Expr::Bool(a <= b),
        BinOp::Gt => Expr::Bool(a > b),
        BinOp::Ge => Expr::Bool(a >= b),
        _ => return None,
    })
}

fn fold_uniop(op: UniOp, value: &Expr) -> Option<Expr> {
    Some(match (op, value) {
        (UniOp::Neg, Expr::Int(v)) => Expr::Int(v.wrapping_neg()),
        (UniOp::Neg, Expr::Real(v)) => Expr::Real(-v),
        (UniOp::BitNot, Expr::Int(v)) => Expr::Int(!v),
        (UniOp::Not, Expr::Bool(v)) => Expr::Bool(!v),
        _ => return None,
    })
}

/// Collapses a left-associative `+` chain, folding adjacent constant runs.
///
/// `x + 1 + 2` parses as `(x + 1) + 2`, which bottom-up folding alone cannot
/// reduce; collecting the left spine gives `[x, 1, 2]`, whose constant tail
/// folds to `[x, 3]`. Chains longer than [`MAX_CHAIN`] operands are left
/// untouched.
fn flatten_add_chain(expr_loc: &mut ExprLoc) {
    let mut count = 1usize;
    {
        let mut cursor = &expr_loc.expr;
        while let Expr::BinOp {
            op: BinOp::Add,
            left,
            ..
        } = cursor
        {
            count += 1;
            if count > MAX_CHAIN {
                return;
            }
            cursor = &left.expr;
        }
    }
    if count <= 2 {
        return;
    }

    // Detach the spine into an operand list, leftmost first.
    let mut operands: Vec<ExprLoc> = Vec::with_capacity(count);
    let mut current = std::mem::replace(&mut expr_loc.expr, Expr::Null);
    loop {
        match current {
            Expr::BinOp {
                op: BinOp::Add,
                left,
                right,
            } => {
                operands.push(*right);
                current = left.expr;
            }
            other => {
                operands.push(ExprLoc::new(expr_loc.pos.clone(), other));
                break;
            }
        }
    }
    operands.reverse();

    // Fold adjacent constant pairs.
    let mut folded: Vec<ExprLoc> = Vec::with_capacity(operands.len());
    for operand in operands {
        if let Some(last) = folded.last_mut() {
            if let Some(merged) = fold_binop(BinOp::Add, &last.expr, &operand.expr) {
                last.expr = merged;
                continue;
            }
        }
        folded.push(operand);
    }

    // Rebuild the left-associative tree.
    let mut iter = folded.into_iter();
    let mut tree = iter.next().expect("chain has at least one operand");
    for operand in iter {
        let pos = tree.pos.clone();
        tree = ExprLoc::new(
            pos,
            Expr::BinOp {
                op: BinOp::Add,
                left: Box::new(tree),
                right: Box::new(operand),
            },
        );
    }
    *expr_loc = tree;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::CodeLoc;
    use crate::parser::{parse_source, NoIncludes};
    use crate::types::TypeTable;
    use pretty_assertions::assert_eq;

    fn parse_return_expr(body: &str) -> ExprLoc {
        let source = format!("Integer f(Integer x, String s, Real r) {{ return {body}; }}");
        let mut types = TypeTable::new();
        let (mut script, errors) = parse_source(&source, "test.ss", &mut types, &NoIncludes);
        assert!(errors.is_empty(), "parse errors: {errors:?}");
        optimize_script(&mut script);
        let Stmt::Block(stmts) = script.functions.remove(0).body else {
            panic!("expected block");
        };
        let Stmt::Return { value: Some(value), .. } = stmts.into_iter().next().unwrap() else {
            panic!("expected return");
        };
        value
    }

    #[test]
    fn folds_arithmetic() {
        assert_eq!(parse_return_expr("1 + 2 * 3").expr, Expr::Int(7));
    }

    #[test]
    fn folds_through_left_chain() {
        let folded = parse_return_expr("x + 1 + 2");
        let Expr::BinOp { op: BinOp::Add, left, right } = folded.expr else {
            panic!("expected +");
        };
        assert_eq!(left.expr, Expr::Variable("x".into()));
        assert_eq!(right.expr, Expr::Int(3));
    }

    #[test]
    fn folds_string_concat() {
        assert_eq!(
            parse_return_expr("\"a\" + \"b\"").expr,
            Expr::Str(b"ab".to_vec())
        );
    }

    #[test]
    fn never_folds_division_by_zero() {
        let expr = parse_return_expr("1 / 0");
        assert!(matches!(expr.expr, Expr::BinOp { op: BinOp::Div, .. }));
    }

    #[test]
    fn wraps_on_overflow() {
        assert_eq!(
            parse_return_expr("9223372036854775807 + 1").expr,
            Expr::Int(i64::MIN)
        );
    }

    #[test]
    fn negation_propagates_into_literal() {
        assert_eq!(parse_return_expr("-5").expr, Expr::Int(-5));
        assert_eq!(parse_return_expr("-(2 + 3)").expr, Expr::Int(-5));
    }

    #[test]
    fn removes_nops_from_blocks() {
        let mut stmt = Stmt::Block(vec![Stmt::Nop, Stmt::Nop, Stmt::Block(vec![Stmt::Nop])]);
        optimize_stmt(&mut stmt);
        let Stmt::Block(stmts) = stmt else { panic!() };
        assert_eq!(stmts.len(), 1);
        assert_eq!(stmts[0], Stmt::Block(vec![]));
    }

    #[test]
    fn mixed_types_do_not_fold() {
        let expr = parse_return_expr("1 + 1.5");
        assert!(matches!(expr.expr, Expr::BinOp { op: BinOp::Add, .. }));
    }

    /// O1: the optimizer is idempotent.
    #[test]
    fn optimizing_twice_equals_once() {
        let loc = CodeLoc::new("test.ss".into(), 1);
        let make = |expr| ExprLoc::new(loc.clone(), expr);
        let mut once = make(Expr::BinOp {
            op: BinOp::Add,
            left: Box::new(make(Expr::BinOp {
                op: BinOp::Add,
                left: Box::new(make(Expr::Variable("x".into()))),
                right: Box::new(make(Expr::Int(1))),
            })),
            right: Box::new(make(Expr::Int(2))),
        });
        optimize_expr(&mut once);
        let mut twice = once.clone();
        optimize_expr(&mut twice);
        assert_eq!(once, twice);
    }
}
