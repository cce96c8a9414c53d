//! Behavioral tests across compilation, caching, binding and invocation

mod helpers;

mod binding_tests;
mod cache_tests;
mod exit_tests;
mod runner_tests;
