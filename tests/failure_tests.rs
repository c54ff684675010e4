//! Failure propagation through the dependency graph

use modloader::{ErrorKind, ImportOptions, LoadError, UnitState};

mod common;
use common::*;

#[tokio::test]
async fn test_dependency_failure_reaches_dependent() {
    let (loader, _hooks, ticks) = memory_loader(&[(
        "main",
        "import { d } from 'dep'; tick('main'); export const m = d;",
    )]);

    let (listener, outcome) = recorder();
    loader.import("main", ImportOptions::default(), listener);
    loader.run_until_idle().await.unwrap();

    let err = take_error(&outcome);
    match &err {
        LoadError::Dependency {
            name, dependency, ..
        } => {
            assert_eq!(name, "main");
            assert_eq!(dependency, "dep");
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(err.root_cause().kind(), ErrorKind::Fetch);
    assert_eq!(err.root_cause().module_name(), "dep");
    assert!(err.to_string().contains("dependency 'dep' failed"));

    assert_eq!(ticks.count("main"), 0);
    assert_eq!(loader.unit_state("main"), Some(UnitState::Failed));
    assert_eq!(loader.unit_state("dep"), Some(UnitState::Failed));
    assert!(loader.get("main").is_none());
    assert!(loader.in_flight().is_empty());
}

#[tokio::test]
async fn test_transitive_failure_chain() {
    let (loader, _hooks, ticks) = memory_loader(&[
        ("top", "import 'mid'; tick('top');"),
        ("mid", "import 'bad'; tick('mid');"),
        ("bad", "export let = ;"),
        ("side", "tick('side'); export const fine = 1;"),
    ]);

    let (top, top_out) = recorder();
    let (side, side_out) = recorder();
    loader.import("top", ImportOptions::default(), top);
    loader.import("side", ImportOptions::default(), side);
    loader.run_until_idle().await.unwrap();

    let err = take_error(&top_out);
    assert_eq!(err.kind(), ErrorKind::Dependency);
    let root = err.root_cause();
    assert!(matches!(root, LoadError::Parse { name, line: 1, .. } if name == "bad"));
    assert_eq!(ticks.count("top"), 0);
    assert_eq!(ticks.count("mid"), 0);

    // Unrelated loads are unaffected
    assert_eq!(number(&take_module(&side_out), "fine"), Some(1.0));
}

#[tokio::test]
async fn test_evaluation_error_fails_dependents() {
    let (loader, _hooks, ticks) = memory_loader(&[
        ("app", "import { v } from 'thrower'; tick('app');"),
        ("thrower", "export const v = 1; throw 'bad config';"),
    ]);

    let err = loader
        .import_module("app", ImportOptions::default())
        .await
        .unwrap_err();
    let root = err.root_cause();
    assert_eq!(root.kind(), ErrorKind::Evaluation);
    assert!(root.to_string().contains("uncaught exception: bad config"));
    assert_eq!(ticks.count("app"), 0);

    // A failed module never reaches the registry
    assert!(loader.get("thrower").is_none());
}

#[tokio::test]
async fn test_link_error_for_missing_export() {
    let (loader, _hooks, _ticks) = memory_loader(&[
        ("consumer", "import { nope } from 'provider';"),
        ("provider", "export const yes = 1;"),
    ]);

    let err = loader
        .import_module("consumer", ImportOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Link);
    assert!(err.to_string().contains("no export named 'nope'"));
    // The provider itself is fine
    assert_eq!(loader.unit_state("provider"), Some(UnitState::Ready));
}

#[tokio::test]
async fn test_every_listener_sees_the_failure() {
    let (loader, hooks, _ticks) = memory_loader(&[
        ("one", "import 'broken';"),
        ("two", "import 'broken';"),
    ]);

    let (direct, direct_out) = recorder();
    let (one, one_out) = recorder();
    let (two, two_out) = recorder();
    loader.import("broken", ImportOptions::default(), direct);
    loader.import("one", ImportOptions::default(), one);
    loader.import("two", ImportOptions::default(), two);
    loader.run_until_idle().await.unwrap();

    assert_eq!(take_error(&direct_out).kind(), ErrorKind::Fetch);
    assert_eq!(take_error(&one_out).kind(), ErrorKind::Dependency);
    assert_eq!(take_error(&two_out).kind(), ErrorKind::Dependency);
    assert_eq!(hooks.fetch_count("broken"), 1);
}

#[tokio::test]
async fn test_bad_specifier_in_source() {
    let (loader, hooks, _ticks) = memory_loader(&[("top", "import '../../outside';")]);

    let err = loader
        .import_module("top", ImportOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Normalization);
    assert_eq!(err.module_name(), "../../outside");
    assert_eq!(hooks.total_fetches(), 1);
}

#[tokio::test]
async fn test_failure_inside_cycle() {
    let (loader, _hooks, ticks) = memory_loader(&[
        ("a", "import { b } from 'b'; tick('a'); export const a = 1;"),
        ("b", "import { a } from 'a'; import 'missing'; tick('b'); export const b = 2;"),
    ]);

    let err = loader
        .import_module("a", ImportOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.root_cause().kind(), ErrorKind::Fetch);
    assert_eq!(loader.unit_state("a"), Some(UnitState::Failed));
    assert_eq!(loader.unit_state("b"), Some(UnitState::Failed));
    assert_eq!(ticks.count("a"), 0);
    assert_eq!(ticks.count("b"), 0);
}

#[tokio::test]
async fn test_deeply_nested_source_is_a_parse_error() {
    let (loader, _hooks, _ticks) = memory_loader(&[]);

    let source = format!("export const x = {}1;", "-".repeat(200_000));
    let err = loader
        .module_source(&source, ImportOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parse);
    assert!(err.to_string().contains("nesting exceeds"));

    // The loader stays usable afterwards
    let ok = loader
        .module_source("export const y = -(-(2));", ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(number(&ok, "y"), Some(2.0));
}

#[tokio::test]
async fn test_bad_specifier_starts_no_sibling_loads() {
    let (loader, hooks, ticks) = memory_loader(&[
        ("top", "import 'good'; import '../../outside';"),
        ("good", "tick('good'); export const g = 1;"),
    ]);

    let err = loader
        .import_module("top", ImportOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Normalization);

    // The resolvable sibling is never requested
    assert_eq!(hooks.fetch_count("good"), 0);
    assert_eq!(ticks.count("good"), 0);
    assert_eq!(loader.unit_state("good"), None);
    assert!(loader.in_flight().is_empty());
}
