use std::collections::HashMap;

use remindee_script::{BinOp, Expr, UnOp, Value, ValueError};

use crate::engine::Engine;
use crate::err::Error;
use crate::funcs;

/// Local-variable frame of a user-function body: argument name (lower
/// case) to actual value.
pub type Frame = HashMap<String, Value>;

impl Engine {
    pub fn eval_str(&mut self, src: &str) -> Result<Value, Error> {
        let expr = remindee_script::parse_expr(src)?;
        self.eval_expr(&expr, None)
    }

    pub fn eval_expr(
        &mut self,
        expr: &Expr,
        locals: Option<&Frame>,
    ) -> Result<Value, Error> {
        if !self.expr_enabled {
            return Err(Error::ExpressionDisabled);
        }
        self.eval_node(expr, locals)
    }

    fn charge_node(&mut self) -> Result<(), Error> {
        self.nodes_this_line += 1;
        if self.nodes_this_line > self.tunables.expr_nodes_limit {
            return Err(Error::TimeExceeded);
        }
        if let Some(deadline) = self.expr_deadline {
            if std::time::Instant::now() > deadline {
                return Err(Error::TimeExceeded);
            }
        }
        Ok(())
    }

    pub(crate) fn eval_node(
        &mut self,
        expr: &Expr,
        locals: Option<&Frame>,
    ) -> Result<Value, Error> {
        self.charge_node()?;
        match expr {
            Expr::Const(v) => Ok(v.clone()),
            Expr::Var(name) => self.eval_var(name, locals),
            Expr::SysVar(name) => self.get_sys_var(name),
            Expr::Unary(op, inner) => {
                let v = self.eval_node(inner, locals)?;
                apply_unary(*op, v).map_err(Error::from)
            }
            Expr::Binary(BinOp::And, a, b) => {
                let lhs = self.eval_node(a, locals)?;
                if !lhs.is_true() {
                    return Ok(Value::Int(0));
                }
                let rhs = self.eval_node(b, locals)?;
                Ok(Value::Int(rhs.is_true() as i64))
            }
            Expr::Binary(BinOp::Or, a, b) => {
                let lhs = self.eval_node(a, locals)?;
                if lhs.is_true() {
                    return Ok(Value::Int(1));
                }
                let rhs = self.eval_node(b, locals)?;
                Ok(Value::Int(rhs.is_true() as i64))
            }
            Expr::Binary(op, a, b) => {
                let lhs = self.eval_node(a, locals)?;
                let rhs = self.eval_node(b, locals)?;
                self.apply_binary(*op, lhs, rhs)
            }
            Expr::Call { name, args } => {
                self.call_function(name, args, locals)
            }
        }
    }

    fn eval_var(
        &mut self,
        name: &str,
        locals: Option<&Frame>,
    ) -> Result<Value, Error> {
        if let Some(frame) = locals {
            if let Some(v) = frame.get(&name.to_ascii_lowercase()) {
                return Ok(v.clone());
            }
        }
        let constant = self
            .vars
            .lookup(name)
            .map(|var| var.is_constant)
            .unwrap_or(true);
        match self.vars.get(name) {
            Some(v) => {
                let v = v.clone();
                if !constant {
                    self.nonconst_flag = true;
                }
                Ok(v)
            }
            None => Err(Error::UndefinedVariable(name.to_owned())),
        }
    }

    fn apply_binary(
        &mut self,
        op: BinOp,
        lhs: Value,
        rhs: Value,
    ) -> Result<Value, Error> {
        let max_len = self.tunables.max_string_len;
        let out = match op {
            BinOp::Add => lhs.add(&rhs, max_len)?,
            BinOp::Sub => lhs.sub(&rhs)?,
            BinOp::Mul => lhs.mul(&rhs)?,
            BinOp::Div => lhs.div(&rhs)?,
            BinOp::Rem => lhs.rem(&rhs)?,
            BinOp::Eq => {
                Value::Int((lhs.compare(&rhs)? == std::cmp::Ordering::Equal)
                    as i64)
            }
            BinOp::Ne => {
                Value::Int((lhs.compare(&rhs)? != std::cmp::Ordering::Equal)
                    as i64)
            }
            BinOp::Lt => {
                Value::Int((lhs.compare(&rhs)? == std::cmp::Ordering::Less)
                    as i64)
            }
            BinOp::Le => Value::Int(
                (lhs.compare(&rhs)? != std::cmp::Ordering::Greater) as i64,
            ),
            BinOp::Gt => Value::Int(
                (lhs.compare(&rhs)? == std::cmp::Ordering::Greater) as i64,
            ),
            BinOp::Ge => Value::Int(
                (lhs.compare(&rhs)? != std::cmp::Ordering::Less) as i64,
            ),
            BinOp::And | BinOp::Or => unreachable!("short-circuited"),
        };
        Ok(out)
    }

    fn call_function(
        &mut self,
        name: &str,
        args: &[Expr],
        locals: Option<&Frame>,
    ) -> Result<Value, Error> {
        let lname = name.to_ascii_lowercase();
        if let Some(v) = funcs::call_special(self, &lname, args, locals)? {
            return Ok(v);
        }
        let mut vals = Vec::with_capacity(args.len());
        for arg in args {
            vals.push(self.eval_node(arg, locals)?);
        }
        if funcs::is_builtin(&lname) {
            return funcs::call_builtin(self, &lname, &vals);
        }
        self.call_user_func(&lname, vals)
    }

    pub(crate) fn call_user_func(
        &mut self,
        name: &str,
        vals: Vec<Value>,
    ) -> Result<Value, Error> {
        let (arg_names, body, is_constant) = match self.funcs.get(name) {
            Some(func) => (
                func.args.clone(),
                func.body.clone(),
                func.is_constant,
            ),
            None => return Err(Error::UndefinedFunction(name.to_owned())),
        };
        if vals.len() != arg_names.len() {
            return Err(Error::WrongArgCount(name.to_owned()));
        }
        if !is_constant {
            self.nonconst_flag = true;
        }
        self.eval_depth += 1;
        if self.eval_depth > self.tunables.max_recursion_level {
            self.eval_depth -= 1;
            return Err(Error::RecursiveCall(name.to_owned()));
        }
        let frame: Frame = arg_names
            .into_iter()
            .map(|n| n.to_ascii_lowercase())
            .zip(vals)
            .collect();
        let result = self.eval_node(&body, Some(&frame));
        self.eval_depth -= 1;
        result
    }
}

fn apply_unary(op: UnOp, v: Value) -> Result<Value, ValueError> {
    match op {
        UnOp::Not => Ok(Value::Int(!v.is_true() as i64)),
        UnOp::Plus => match v {
            Value::Int(_) => Ok(v),
            _ => Err(ValueError::BadType),
        },
        UnOp::Minus => match v {
            Value::Int(n) => n
                .checked_neg()
                .map(Value::Int)
                .ok_or(ValueError::Overflow),
            _ => Err(ValueError::BadType),
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::test_engine;
    use test_case::test_case;

    #[test_case("2+3*4" => Value::Int(14))]
    #[test_case("(2+3)*4" => Value::Int(20))]
    #[test_case("10/3" => Value::Int(3))]
    #[test_case("10%3" => Value::Int(1))]
    #[test_case("-4+1" => Value::Int(-3))]
    #[test_case("!0" => Value::Int(1))]
    #[test_case("1 && 2" => Value::Int(1); "logical_and")]
    #[test_case("0 || \"\"" => Value::Int(0))]
    #[test_case("\"a\"+\"b\"" => Value::Str("ab".into()))]
    #[test_case("1 < 2" => Value::Int(1); "less_than")]
    #[test_case("\"abc\" == \"abc\"" => Value::Int(1))]
    fn arithmetic(src: &str) -> Value {
        test_engine().eval_str(src).unwrap()
    }

    #[test]
    fn short_circuit_skips_errors() {
        let mut engine = test_engine();
        assert_eq!(
            engine.eval_str("0 && (1/0)").unwrap(),
            Value::Int(0)
        );
        assert_eq!(engine.eval_str("1 || (1/0)").unwrap(), Value::Int(1));
        assert!(engine.eval_str("1 && (1/0)").is_err());
    }

    #[test]
    fn mismatched_comparison_is_error() {
        let mut engine = test_engine();
        assert!(engine.eval_str("1 == \"1\"").is_err());
    }

    #[test]
    fn undefined_variable() {
        let mut engine = test_engine();
        assert_eq!(
            engine.eval_str("nope"),
            Err(Error::UndefinedVariable("nope".into()))
        );
    }

    #[test]
    fn variables_and_constness() {
        let mut engine = test_engine();
        engine
            .vars
            .set("x", Value::Int(5), false, "test", 1)
            .unwrap();
        engine.nonconst_flag = false;
        assert_eq!(engine.eval_str("x*2").unwrap(), Value::Int(10));
        assert!(engine.nonconst_flag);
    }

    #[test]
    fn user_function_recursion_fibonacci() {
        let mut engine = test_engine();
        engine
            .process_line("FSET f(n) = iif(n<=1, n, f(n-1)+f(n-2))")
            .unwrap();
        assert_eq!(engine.eval_str("f(10)").unwrap(), Value::Int(55));
    }

    #[test]
    fn recursion_depth_bounded() {
        let mut engine = test_engine();
        engine.process_line("FSET inf(n) = inf(n+1)").unwrap();
        assert!(matches!(
            engine.eval_str("inf(0)"),
            Err(Error::RecursiveCall(_))
        ));
    }

    #[test]
    fn node_budget_enforced() {
        let mut engine = test_engine();
        engine.tunables.expr_nodes_limit = 10;
        assert_eq!(
            engine.eval_str("1+1+1+1+1+1+1+1+1+1+1+1"),
            Err(Error::TimeExceeded)
        );
    }

    #[test]
    fn wrong_arity_reported() {
        let mut engine = test_engine();
        engine.process_line("FSET g(a, b) = a+b").unwrap();
        assert_eq!(
            engine.eval_str("g(1)"),
            Err(Error::WrongArgCount("g".into()))
        );
    }
}
