//! GCD (divisibility) analysis (§4.6).
//!
//! Infers, for every scalar SSA value, the product `p(v)` of its known
//! prime factors — not the value itself, just what it's provably
//! divisible by. For `%0 = constant 32; %1 = mul %0, %x` we know `%1` is
//! divisible by 32 without knowing anything about `%x`.
//!
//! Update rules (ported from the source's worked derivation):
//! `constant(c) → |c|`; `add/sub(a,b) → gcd(p(a), p(b))`;
//! `mul(a,b) → p(a) · p(b)`; `div(a,b) → p(a)/p(b)` when that divides
//! exactly, else `1`; `abs/not`, `cast`, `subgroup_broadcast` pass
//! through unchanged; unknown values default to `1` (§8 property 8).

use crate::ir::{ArithOp, ArithUnaryOp, ConstantValue, Function, Instruction, Op};
use crate::FastHashMap;
use crate::arena::Handle;
use crate::ir::Value;

fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.abs(), b.abs());
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

#[derive(Debug, Default)]
pub struct GcdAnalysisResult {
    p: FastHashMap<Handle<Value>, i64>,
}

impl GcdAnalysisResult {
    /// `p(v)`, defaulting to `1` when nothing is known (§8 property 8).
    pub fn get(&self, v: Handle<Value>) -> i64 {
        self.get_if(v).unwrap_or(1)
    }

    pub fn get_if(&self, v: Handle<Value>) -> Option<i64> {
        self.p.get(&v).copied()
    }

    fn set(&mut self, v: Handle<Value>, value: i64) {
        self.p.insert(v, value);
    }
}

fn visit_inst(inst: &Instruction, result: &mut GcdAnalysisResult) {
    match &inst.op {
        Op::Arith { op, a, b } => {
            let value = match op {
                ArithOp::Add | ArithOp::Sub => Some(gcd(result.get(*a), result.get(*b))),
                ArithOp::Mul => Some(result.get(*a) * result.get(*b)),
                ArithOp::Div => {
                    let (ga, gb) = (result.get(*a), result.get(*b));
                    Some(if gb != 0 && ga % gb == 0 { ga / gb } else { 1 })
                }
                _ => None,
            };
            if let (Some(v), Some(&r)) = (value, inst.results.first()) {
                result.set(r, v);
            }
        }
        Op::ArithUnary { op, a } => {
            let value = match op {
                ArithUnaryOp::Abs | ArithUnaryOp::Not => result.get_if(*a),
                ArithUnaryOp::Neg => None,
            };
            if let (Some(v), Some(&r)) = (value, inst.results.first()) {
                result.set(r, v);
            }
        }
        Op::Cast { a } => {
            if let (Some(v), Some(&r)) = (result.get_if(*a), inst.results.first()) {
                result.set(r, v);
            }
        }
        Op::Constant {
            value: ConstantValue::Int(c),
        } => {
            if let Some(&r) = inst.results.first() {
                result.set(r, c.abs());
            }
        }
        Op::For { from, step, .. } => {
            if let (Some(step), Some(&loop_var)) = (step, inst.results.first()) {
                result.set(*loop_var, gcd(result.get(*from), result.get(*step)));
            }
        }
        Op::SubgroupBroadcast { a, .. } => {
            if let (Some(v), Some(&r)) = (result.get_if(*a), inst.results.first()) {
                result.set(r, v);
            }
        }
        _ => {}
    }
}

/// Walks `fn_` in pre-order, threading results through nested regions the
/// way the source's `walk<walk_order::pre_order>` does.
pub fn run_on_function(func: &Function) -> GcdAnalysisResult {
    let mut result = GcdAnalysisResult::default();
    walk_region(&func.body, func, &mut result);
    result
}

fn walk_region(region: &crate::ir::Region, func: &Function, result: &mut GcdAnalysisResult) {
    for &handle in &region.insts {
        let inst = func.inst(handle);
        visit_inst(inst, result);
        for child in inst.child_regions() {
            walk_region(child, func, result);
        }
        if let Some((then_r, else_r)) = inst.op.if_regions() {
            walk_region(then_r, func, result);
            if let Some(else_r) = else_r {
                walk_region(else_r, func, result);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CompilerContext;
    use crate::ir::ConstantValue;
    use crate::ty::{ScalarType, Type};

    #[test]
    fn gcd_of_constant_is_absolute_value() {
        let ctx = CompilerContext::new();
        let mut func = Function::new("f");
        let i64_ty = ctx.get_type(Type::Scalar(ScalarType::I64));
        let results = func.with_body(|func, region| {
            let inst = Instruction::new(
                Op::Constant {
                    value: ConstantValue::Int(-32),
                },
                Default::default(),
            );
            func.push(region, inst, &[i64_ty]).1
        });
        let result = run_on_function(&func);
        assert_eq!(result.get(results[0]), 32);
    }

    #[test]
    fn gcd_of_mul_is_product_of_factors() {
        let ctx = CompilerContext::new();
        let mut func = Function::new("f");
        let i64_ty = ctx.get_type(Type::Scalar(ScalarType::I64));
        let mul = func.with_body(|func, region| {
            let (_, c1) = func.push(
                region,
                Instruction::new(
                    Op::Constant {
                        value: ConstantValue::Int(4),
                    },
                    Default::default(),
                ),
                &[i64_ty],
            );
            let (_, c2) = func.push(
                region,
                Instruction::new(
                    Op::Constant {
                        value: ConstantValue::Int(6),
                    },
                    Default::default(),
                ),
                &[i64_ty],
            );
            func.push(
                region,
                Instruction::new(
                    Op::Arith {
                        op: ArithOp::Mul,
                        a: c1[0],
                        b: c2[0],
                    },
                    Default::default(),
                ),
                &[i64_ty],
            )
            .1
        });
        let result = run_on_function(&func);
        assert_eq!(result.get(mul[0]), 24);
    }

    #[test]
    fn unknown_value_defaults_to_one() {
        let func = Function::new("f");
        let result = run_on_function(&func);
        let fake_handle = {
            let mut f2 = Function::new("g");
            let ctx = CompilerContext::new();
            let ty = ctx.get_type(Type::Scalar(ScalarType::I64));
            f2.add_param(ty)
        };
        assert_eq!(result.get(fake_handle), 1);
    }
}
