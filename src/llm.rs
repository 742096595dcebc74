//! Reasoning invocation: provider routing, HTTP invoker, decision parsing.

pub mod decision;
pub mod invoker;
pub mod providers;

pub use decision::{ParsedDecision, parse_decision};
pub use invoker::{HttpReasoner, Reasoner, ReasonerReply};
