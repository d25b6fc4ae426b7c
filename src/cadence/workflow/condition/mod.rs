// SPDX-License-Identifier: MIT

//! Step conditions
//!
//! A step whose condition evaluates to false is skipped. Conditions are
//! either expressions such as:
//! - `mode == 'full'`
//! - `scan_data.findings and not scan_data.reviewed`
//! - `conf > 0.8 or (tags contains 'urgent')`
//!
//! or named predicates registered in code.

mod ast;
mod evaluator;
mod parser;

pub use ast::{CompareOp, Expression, Literal};
pub use evaluator::evaluate;
pub use parser::parse;

use crate::cadence::workflow::state::Context;

/// Pure predicate over the run context
pub trait Condition: Send + Sync {
    fn evaluate(&self, context: &Context) -> bool;
}

impl<F> Condition for F
where
    F: Fn(&Context) -> bool + Send + Sync,
{
    fn evaluate(&self, context: &Context) -> bool {
        self(context)
    }
}

impl Condition for Expression {
    fn evaluate(&self, context: &Context) -> bool {
        evaluate(self, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_closures_and_expressions_are_conditions() {
        let mut context = Context::new();
        context.insert("mode", "full");

        let conditions: Vec<Box<dyn Condition>> = vec![
            Box::new(|ctx: &Context| ctx.get("mode") == Some(&json!("full"))),
            Box::new(parse("mode == 'full'").unwrap()),
        ];
        assert!(conditions.iter().all(|c| c.evaluate(&context)));
    }
}
