mod common;
mod invariants;
mod runtime;
mod scenarios;
