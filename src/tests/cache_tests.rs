//! Script block cache behavior

use std::sync::Arc;

use super::helpers::{engine, engine_with};
use crate::config::Config;
use crate::context::ExecutionContext;
use crate::errors::ScriptError;

#[test]
fn test_create_reuses_cached_code() {
    let engine = engine();
    let first = engine.create("module.tempo", "$x = 1").unwrap();
    let second = engine.create("module.tempo", "$x = 1").unwrap();

    assert!(Arc::ptr_eq(first.code(), second.code()));
    assert_eq!(engine.cache().len(), 1);

    // same text from another origin is a different entry
    let other = engine.create("other.tempo", "$x = 1").unwrap();
    assert!(!Arc::ptr_eq(first.code(), other.code()));
    assert_eq!(engine.cache().len(), 2);
}

#[test]
fn test_cached_handles_bind_independently() {
    let engine = engine();
    let mut ctx = ExecutionContext::new(engine.clone());
    let module = ctx.new_session();

    engine.create("m", "$x = 1").unwrap();
    let mut first = engine.cache().lookup("m", "$x = 1").unwrap().unwrap();
    let second = engine.cache().lookup("m", "$x = 1").unwrap().unwrap();

    first.bind_to(module);
    assert_eq!(first.session(), Some(module));
    assert!(!second.is_bound());

    let third = engine.cache().lookup("m", "$x = 1").unwrap().unwrap();
    assert!(!third.is_bound());
    assert!(Arc::ptr_eq(first.code(), third.code()));
}

#[test]
fn test_insert_stores_unbound_copy() {
    let engine = engine();
    let mut ctx = ExecutionContext::new(engine.clone());
    let module = ctx.new_session();

    let mut block = engine.create_deferred("m", "$y = 2");
    block.bind_to(module);
    engine.cache().insert("m", "$y = 2", &block);

    let cached = engine.cache().lookup("m", "$y = 2").unwrap().unwrap();
    assert!(!cached.is_bound());
}

#[test]
fn test_cache_clears_when_full() {
    let engine = engine();
    let block = engine.create_deferred("seed", "1");

    for i in 0..=1024 {
        engine.cache().insert("origin", &format!("$x = {}", i), &block);
    }
    assert_eq!(engine.cache().len(), 1025);

    engine.cache().insert("origin", "$x = 'next'", &block);
    assert_eq!(engine.cache().len(), 1);
    assert!(engine.cache().lookup("origin", "$x = 'next'").unwrap().is_some());
}

#[test]
fn test_external_declarations_are_not_cached() {
    let engine = engine();

    let using = engine.create("m", "using module Tools\n$x = 1").unwrap();
    let again = engine.create("m", "using module Tools\n$x = 1").unwrap();
    assert!(!Arc::ptr_eq(using.code(), again.code()));

    engine.register_keyword("Deploy");
    engine.create("m", "deploy('web')").unwrap();
    assert!(engine.is_keyword("DEPLOY"));

    assert!(engine.cache().is_empty());
}

#[test]
fn test_parse_failure_is_not_cached() {
    let engine = engine();
    let err = engine.create("m", "if ($x { }").unwrap_err();

    assert!(matches!(err, ScriptError::Parse(_)));
    assert!(engine.cache().is_empty());
}

#[test]
fn test_disabled_cache() {
    let mut config = Config::default();
    config.cache.enabled = false;
    let engine = engine_with(config);

    let first = engine.create("m", "$x = 1").unwrap();
    let second = engine.create("m", "$x = 1").unwrap();

    assert!(!Arc::ptr_eq(first.code(), second.code()));
    assert!(engine.cache().is_empty());
}

#[test]
fn test_clear() {
    let engine = engine();
    engine.create("m", "$x = 1").unwrap();
    engine.cache().clear();
    assert!(engine.cache().is_empty());
}
