//! Demo `Arith` service served by `mrpc serve`.
//!
//! ```bash
//! mrpc call 127.0.0.1:9000 Arith.Add -a '{"num1": 1, "num2": 2}'
//! ```

use mrpc_server::{Methods, RpcService};
use serde::{Deserialize, Serialize};

/// Operands of every `Arith` method.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Args {
    pub num1: i64,
    pub num2: i64,
}

/// Quotient and remainder returned by `Arith.Divide`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quotient {
    pub quo: i64,
    pub rem: i64,
}

pub struct Arith;

impl Arith {
    pub fn add(&self, args: Args, reply: &mut i64) -> Result<(), String> {
        *reply = args
            .num1
            .checked_add(args.num2)
            .ok_or_else(|| "integer overflow".to_string())?;
        Ok(())
    }

    pub fn multiply(&self, args: Args, reply: &mut i64) -> Result<(), String> {
        *reply = args
            .num1
            .checked_mul(args.num2)
            .ok_or_else(|| "integer overflow".to_string())?;
        Ok(())
    }

    pub fn divide(&self, args: Args, reply: &mut Quotient) -> Result<(), String> {
        if args.num2 == 0 {
            return Err("divide by zero".to_string());
        }
        reply.quo = args.num1 / args.num2;
        reply.rem = args.num1 % args.num2;
        Ok(())
    }
}

impl RpcService for Arith {
    fn register_methods(methods: &mut Methods<Self>) {
        methods
            .method("Add", Self::add)
            .method("Multiply", Self::multiply)
            .method("Divide", Self::divide);
    }
}
