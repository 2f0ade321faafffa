mod common;

use std::sync::Arc;
use std::thread;

use common::*;
use script::ModuleCache;

const AUTH: &str = r#"module auth

let prefix = "Bearer "

export fn header(token) {
  return prefix + token
}

export const scheme = "bearer"
"#;

#[test]
fn alias_defaults_to_the_declared_module_name() {
    let dir = TempDir::new("alias_default");
    let path = dir.write("auth.rts", AUTH);
    let runtime = Runtime::new().with_use(module_use(&path, None));
    let value = eval_with(&mut Ctx::new(), &runtime, "[auth.header(\"t\"), auth.scheme]")
        .expect("module should load");
    assert_eq!(value.to_string(), r#"["Bearer t","bearer"]"#);
}

#[test]
fn explicit_aliases_win_over_the_declared_name() {
    let dir = TempDir::new("alias_explicit");
    let path = dir.write("auth.rts", AUTH);
    let runtime = Runtime::new().with_use(module_use(&path, Some("a")));
    let value =
        eval_with(&mut Ctx::new(), &runtime, "a.header(\"x\")").expect("module should load");
    assert_eq!(value, Value::from("Bearer x"));
    let err = eval_with(&mut Ctx::new(), &runtime, "auth").expect_err("declared name is unbound");
    assert!(matches!(err.kind(), Some(ErrorKind::UndefinedVariable(_))));
}

#[test]
fn relative_paths_resolve_against_the_base_dir() {
    let dir = TempDir::new("alias_relative");
    dir.write("auth.rts", AUTH);
    let runtime = Runtime::new()
        .with_base_dir(&dir.path)
        .with_use(Use::new("./sub/../auth.rts", Pos::inline()));
    let value = eval_with(&mut Ctx::new(), &runtime, "auth.scheme").expect("module should load");
    assert_eq!(value, Value::from("bearer"));
}

#[test]
fn modules_without_a_header_need_an_alias() {
    let dir = TempDir::new("missing_name");
    let path = dir.write("anon.rts", "export let x = 1\n");
    let runtime = Runtime::new().with_use(module_use(&path, None));
    let err = eval_with(&mut Ctx::new(), &runtime, "1").expect_err("alias is required");
    assert!(matches!(err.kind(), Some(ErrorKind::MissingModuleName(_))));
    assert!(err.message().starts_with("missing module name"));

    let runtime = Runtime::new().with_use(module_use(&path, Some("anon")));
    let value = eval_with(&mut Ctx::new(), &runtime, "anon.x").expect("alias given");
    assert_eq!(value, Value::from(1.0));
}

#[test]
fn alias_collisions_fail_before_any_module_body_runs() {
    let dir = TempDir::new("collision");
    let first = dir.write("first.rts", "module shared\nfail(\"first body ran\")\n");
    let second = dir.write("second.rts", "module other\nfail(\"second body ran\")\n");
    let engine = Engine::new();
    let runtime = Runtime::new()
        .with_use(module_use(&first, None))
        .with_use(module_use(&second, Some("shared")));
    let err = engine
        .eval(&mut Ctx::new(), &runtime, "1", &Pos::inline())
        .expect_err("aliases collide");
    assert_eq!(err.message(), "alias already defined: shared");
    assert!(engine.modules().is_empty());
}

#[test]
fn aliases_may_not_shadow_host_objects_or_stdlib() {
    let dir = TempDir::new("reserved");
    let path = dir.write("auth.rts", AUTH);
    for reserved in ["request", "vars", "env", "stdlib", "json", "len"] {
        let engine = Engine::new();
        let runtime = Runtime::new().with_use(module_use(&path, Some(reserved)));
        let err = engine
            .eval(&mut Ctx::new(), &runtime, "1", &Pos::inline())
            .expect_err(reserved);
        assert_eq!(err.message(), format!("alias already defined: {reserved}"));
        assert!(engine.modules().is_empty());
    }
}

#[test]
fn module_scope_is_frozen_after_loading() {
    let dir = TempDir::new("frozen");
    let path = dir.write(
        "counter.rts",
        "module counter\nlet count = 0\nexport fn bump() {\n  count = count + 1\n  return count\n}\n",
    );
    let runtime = Runtime::new().with_use(module_use(&path, None));
    let err = eval_with(&mut Ctx::new(), &runtime, "counter.bump()")
        .expect_err("module state is read-only");
    assert!(matches!(err.kind(), Some(ErrorKind::ReadOnly(_))));
}

#[test]
fn modules_only_see_the_stdlib() {
    let dir = TempDir::new("isolated");
    let path = dir.write(
        "peek.rts",
        "module peek\nexport fn method() { return request.method }\nexport fn upper(s) { return text.upper(s) }\n",
    );
    let runtime = Runtime::new()
        .with_request(sample_request(), None)
        .with_use(module_use(&path, None));
    let value =
        eval_with(&mut Ctx::new(), &runtime, "peek.upper(\"a\")").expect("stdlib is visible");
    assert_eq!(value, Value::from("A"));
    let err = eval_with(&mut Ctx::new(), &runtime, "peek.method()")
        .expect_err("host objects are not visible");
    assert!(matches!(err.kind(), Some(ErrorKind::UndefinedVariable(name)) if name == "request"));
}

#[test]
fn module_errors_keep_the_inner_error() {
    let dir = TempDir::new("broken");
    let path = dir.write("broken.rts", "module broken\nexport let x = (\n");
    let runtime = Runtime::new().with_use(module_use(&path, None));
    let err = eval_with(&mut Ctx::new(), &runtime, "broken.x").expect_err("module does not parse");
    match err.kind() {
        Some(ErrorKind::Module { path: failed, source }) => {
            assert_eq!(failed, &path);
            assert!(matches!(**source, ScriptError::Parse(_)));
        }
        other => panic!("expected a module error, got {other:?}"),
    }
    assert_eq!(err.pos().map(|pos| pos.path()), Some("req.http"));
}

#[test]
fn cache_returns_the_same_instance_until_the_file_changes() {
    let dir = TempDir::new("cache_identity");
    dir.write("auth.rts", AUTH);
    let cache = ModuleCache::new();
    let mut ctx = Ctx::new();

    let (first, resolved) = cache
        .load(&mut ctx, &dir.path, "auth.rts")
        .expect("first load");
    let (second, _) = cache
        .load(&mut ctx, &dir.path, "./auth.rts")
        .expect("second load");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(resolved, dir.path.join("auth.rts"));
    assert_eq!(cache.len(), 1);

    dir.rewrite("auth.rts", "module auth\nexport const scheme = \"basic\"\n", 5);
    let (third, _) = cache
        .load(&mut ctx, &dir.path, "auth.rts")
        .expect("reload after change");
    assert!(!Arc::ptr_eq(&first, &third));
    assert_eq!(third.exports.get("scheme"), Some(&Value::from("basic")));
    assert!(!third.exports.contains_key("header"));
}

#[test]
fn failed_refresh_discards_the_entry() {
    let dir = TempDir::new("cache_discard");
    dir.write("auth.rts", AUTH);
    let cache = ModuleCache::new();
    let mut ctx = Ctx::new();
    cache
        .load(&mut ctx, &dir.path, "auth.rts")
        .expect("first load");

    dir.rewrite("auth.rts", "module auth\nexport let = \n", 5);
    assert!(cache.load(&mut ctx, &dir.path, "auth.rts").is_err());
    assert!(cache.is_empty());

    dir.rewrite("auth.rts", AUTH, 10);
    cache
        .load(&mut ctx, &dir.path, "auth.rts")
        .expect("load after fix");
    assert_eq!(cache.len(), 1);
}

#[test]
fn engines_share_a_cache_across_threads() {
    let dir = TempDir::new("concurrent");
    let path = dir.write("auth.rts", AUTH);
    let engine = Engine::new();
    let handles: Vec<_> = (0..4)
        .map(|idx| {
            let engine = engine.clone();
            let path = path.clone();
            thread::spawn(move || {
                let runtime = Runtime::new().with_use(module_use(&path, None));
                engine
                    .eval(
                        &mut Ctx::new(),
                        &runtime,
                        &format!("auth.header(\"{idx}\")"),
                        &Pos::inline(),
                    )
                    .expect("concurrent evaluation")
            })
        })
        .collect();
    for (idx, handle) in handles.into_iter().enumerate() {
        let value = handle.join().expect("thread should not panic");
        assert_eq!(value, Value::from(format!("Bearer {idx}")));
    }
    assert_eq!(engine.modules().len(), 1);
}

#[test]
fn use_directives_parse_from_request_file_text() {
    let directive = Use::parse_directive("@use ./lib/auth.rts as login", Pos::new("req.http", 3, 1))
        .expect("directive should parse");
    assert_eq!(directive.path, "./lib/auth.rts");
    assert_eq!(directive.alias.as_deref(), Some("login"));
    assert_eq!(directive.pos.line, 3);
}
