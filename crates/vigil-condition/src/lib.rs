//! Boolean condition expressions evaluated against a probe context.
//!
//! A condition is a single-line expression of the form `lhs OP rhs`, where
//! either side is a `[KEY]` placeholder or a literal, e.g.
//! `[STATUS] == 200` or `[BODY].status == 'healthy'`. Each condition is
//! parsed once into a small AST at configuration load and evaluated by
//! walking the AST; parse or evaluation faults make that condition `false`
//! and never propagate.

pub mod eval;
pub mod parser;


use vigil_common::{ConditionOutcome, ProbeContext};

pub use parser::{Condition, Op};

/// Parses every condition string up front. Unparseable conditions are kept
/// (they evaluate to `false`) so outcomes stay parallel to the input list.
pub fn parse_all(conditions: &[String]) -> Vec<Condition> {
    conditions.iter().map(|c| Condition::parse(c)).collect()
}

/// Evaluates all conditions in order against one probe context.
pub fn evaluate_all(conditions: &[Condition], context: &ProbeContext) -> Vec<ConditionOutcome> {
    conditions
        .iter()
        .map(|condition| ConditionOutcome {
            condition: condition.raw().to_string(),
            passed: condition.evaluate(context),
        })
        .collect()
}
