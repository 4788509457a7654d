//! Evaluation pipeline and isolation ports for exprbox.
//!
//! This crate defines the `Bridge` contract that isolation backends in
//! `exprbox-infra` implement, the lazy data store those backends read from,
//! and the `Evaluator` that ties caching, validation, execution and error
//! translation together. It depends only on `exprbox-types` -- never on a
//! JavaScript engine or any OS facility.

pub mod bridge;
pub mod evaluator;
pub mod observability;
pub mod store;
pub mod template;
pub mod tournament;
