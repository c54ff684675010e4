//! `define` registers source without forcing evaluation

use modloader::{DefineOptions, ErrorKind, ImportOptions, LoadError, Module, UnitState, Value};

mod common;
use common::*;

#[tokio::test]
async fn test_define_signals_before_evaluation() {
    let (loader, _hooks, ticks) = memory_loader(&[]);

    let (listener, outcome) = recorder::<()>();
    loader.define(
        "mod",
        "tick('mod'); export const x = 1;",
        DefineOptions::default(),
        listener,
    );
    // Nothing has run yet
    assert!(loader.get("mod").is_none());
    assert!(outcome.borrow().is_none());

    loader.run_until_idle().await.unwrap();
    assert!(matches!(outcome.borrow_mut().take(), Some(Ok(()))));
    assert_eq!(loader.unit_state("mod"), Some(UnitState::Loaded));
    assert!(loader.get("mod").is_none());
    assert_eq!(ticks.count("mod"), 0);

    // Importing it evaluates it once
    let (listener, imported) = recorder();
    loader.import("mod", ImportOptions::default(), listener);
    loader.run_until_idle().await.unwrap();
    let module = take_module(&imported);
    assert_eq!(module.get("x"), Some(Value::from(1)));
    assert!(Module::ptr_eq(&loader.get("mod").unwrap(), &module));
    assert_eq!(ticks.count("mod"), 1);

    loader
        .import_module("mod", ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(ticks.count("mod"), 1);
}

#[tokio::test]
async fn test_define_loads_but_does_not_evaluate_dependencies() {
    let (loader, hooks, ticks) = memory_loader(&[(
        "lib/dep",
        "tick('dep'); export const v = 20;",
    )]);

    loader
        .define_source(
            "lib/app",
            "import { v } from './dep'; tick('app'); export const w = v + 1;",
            DefineOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(hooks.fetch_count("lib/dep"), 1);
    assert_eq!(loader.unit_state("lib/dep"), Some(UnitState::Loaded));
    assert_eq!(ticks.count("dep"), 0);
    assert_eq!(ticks.count("app"), 0);

    let app = loader
        .import_module("lib/app", ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(number(&app, "w"), Some(21.0));
    assert_eq!(ticks.count("dep"), 1);
    assert_eq!(ticks.count("app"), 1);
    assert_eq!(hooks.fetch_count("lib/dep"), 1);
}

#[tokio::test]
async fn test_import_while_define_is_pending() {
    let (loader, hooks, ticks) = memory_loader(&[]);

    let (defined, define_out) = recorder::<()>();
    let (imported, import_out) = recorder();
    loader.define("m", "tick('m'); export const y = 2;", DefineOptions::default(), defined);
    loader.import("m", ImportOptions::default(), imported);
    loader.run_until_idle().await.unwrap();

    assert!(matches!(define_out.borrow_mut().take(), Some(Ok(()))));
    assert_eq!(number(&take_module(&import_out), "y"), Some(2.0));
    assert_eq!(ticks.count("m"), 1);
    // Defined source is never fetched
    assert_eq!(hooks.total_fetches(), 0);
}

#[tokio::test]
async fn test_redefinition_is_rejected() {
    let (loader, _hooks, _ticks) = memory_loader(&[("taken", "export const t = 0;")]);

    let (first, first_out) = recorder::<()>();
    let (second, second_out) = recorder::<()>();
    loader.define("dup", "export const a = 1;", DefineOptions::default(), first);
    loader.define("dup", "export const a = 2;", DefineOptions::default(), second);
    loader.run_until_idle().await.unwrap();

    assert!(matches!(first_out.borrow_mut().take(), Some(Ok(()))));
    let err = take_error(&second_out);
    assert_eq!(err.kind(), ErrorKind::AlreadyDefined);

    loader
        .import_module("taken", ImportOptions::default())
        .await
        .unwrap();
    let err = loader
        .define_source("taken", "export const t = 1;", DefineOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, LoadError::AlreadyDefined { ref name } if name == "taken"));
}

#[tokio::test]
async fn test_define_parse_error() {
    let (loader, _hooks, _ticks) = memory_loader(&[]);
    let err = loader
        .define_source("broken", "export const = 1;", DefineOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);
    assert_eq!(loader.unit_state("broken"), Some(UnitState::Failed));
}
