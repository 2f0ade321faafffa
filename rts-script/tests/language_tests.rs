mod common;

use common::*;

#[test]
fn statements_end_at_line_breaks() {
    let value = eval_ok("let a = 1\nlet b = a + 2\nb");
    assert_eq!(value, Value::from(3.0));
}

#[test]
fn expressions_continue_across_open_brackets() {
    let value = eval_ok("let total = len([\n  1,\n  2,\n  3\n])\ntotal");
    assert_eq!(value, Value::from(3.0));
}

#[test]
fn comments_are_ignored() {
    let value = eval_ok("# leading\nlet a = 2 // trailing\n/* block\n comment */ a * 3");
    assert_eq!(value, Value::from(6.0));
}

#[test]
fn closures_capture_their_scope() {
    let source = r#"
fn counter() {
  let n = 0
  return fn() { n = n + 1; return n }
}
let next = counter()
next()
next()
"#;
    assert_eq!(eval_ok(source), Value::from(2.0));
}

#[test]
fn for_loops_walk_lists_dicts_and_strings() {
    let indexed = eval_ok("let total = 0\nfor i, x in [10, 20] { total = total + i * x }\ntotal");
    assert_eq!(indexed, Value::from(20.0));

    let keyed = eval_ok("let out = \"\"\nfor k, v in {b: 2, a: 1} { out = out + k + str(v) }\nout");
    assert_eq!(keyed, Value::from("a1b2"));

    let chars = eval_ok("let out = []\nfor ch in \"hé\" { out = list.append(out, ch) }\nout");
    assert_eq!(chars.to_string(), r#"["h","é"]"#);
}

#[test]
fn break_and_continue_control_the_nearest_loop() {
    let source = r#"
let seen = []
for n in list.range(10) {
  if n % 2 == 0 { continue }
  if n > 6 { break }
  seen = list.append(seen, n)
}
seen
"#;
    assert_eq!(eval_ok(source).to_string(), "[1,3,5]");
}

#[test]
fn top_level_return_stops_the_script() {
    assert_eq!(eval_ok("return 5\n6"), Value::from(5.0));
}

#[test]
fn logical_operators_short_circuit() {
    assert_eq!(eval_ok("null ?? 5"), Value::from(5.0));
    assert_eq!(eval_ok("0 ?? 5"), Value::from(0.0));
    assert_eq!(eval_ok("false || \"x\""), Value::from("x"));
    assert_eq!(eval_ok("null && fail(\"never\")"), Value::Null);
    assert_eq!(eval_ok("1 > 2 ? \"a\" : \"b\""), Value::from("b"));
}

#[test]
fn dict_keys_are_always_sorted() {
    assert_eq!(eval_ok("str({b: 1, a: 2, c: 3})"), Value::from(r#"{"a":2,"b":1,"c":3}"#));
    assert_eq!(eval_ok("dict.keys({z: 1, m: 2, a: 3})").to_string(), r#"["a","m","z"]"#);
}

#[test]
fn equality_is_structural() {
    assert_eq!(eval_ok("[1, {a: 2}] == [1, {a: 2}]"), Value::Bool(true));
    assert_eq!(eval_ok("1 == \"1\""), Value::Bool(false));
    assert_eq!(eval_ok("contains([{a: 1}], {a: 1})"), Value::Bool(true));
}

#[test]
fn path_assignment_creates_missing_dicts() {
    let value = eval_ok("let d = {}\nd.a.b = 1\nd[\"c\"] = [0]\nd.c[0] = 2\nd");
    assert_eq!(value.to_string(), r#"{"a":{"b":1},"c":[2]}"#);
}

#[test]
fn path_assignment_leaves_other_references_untouched() {
    let value = eval_ok("let a = {x: 1}\nlet b = a\nb.x = 2\n[a.x, b.x]");
    assert_eq!(value.to_string(), "[1,2]");
}

#[test]
fn out_of_range_list_assignment_fails() {
    let err = eval_err("let l = [1]\nl[3] = 2");
    assert!(matches!(err.kind(), Some(ErrorKind::Invalid(_))));
}

#[test]
fn strings_index_by_character() {
    assert_eq!(eval_ok("\"héllo\"[1]"), Value::from("é"));
    assert_eq!(eval_ok("\"abc\"[-1]"), Value::from("c"));
    assert_eq!(eval_ok("len(\"héllo\")"), Value::from(5.0));
}

#[test]
fn constants_cannot_be_reassigned() {
    let err = eval_err("const a = 1\na = 2");
    assert!(matches!(err.kind(), Some(ErrorKind::ConstAssign(name)) if name == "a"));
}

#[test]
fn stdlib_names_can_be_shadowed_but_not_reassigned() {
    assert_eq!(eval_ok("let len = 3\nlen"), Value::from(3.0));
    let err = eval_err("len = 3");
    assert!(matches!(err.kind(), Some(ErrorKind::ConstAssign(_))));
}

#[test]
fn undefined_variables_report_their_position() {
    let err = eval_err("let a = 1\nmissing");
    assert_eq!(err.message(), "undefined variable 'missing'");
    let pos = err.pos().expect("runtime errors carry a position");
    assert_eq!((pos.path(), pos.line, pos.col), ("test.rts", 2, 1));
}

#[test]
fn errors_carry_the_call_chain_innermost_first() {
    let source = "fn inner() { return 1 / 0 }\nfn outer() { return inner() }\nouter()";
    let err = eval_err(source);
    assert!(matches!(err.kind(), Some(ErrorKind::DivisionByZero)));
    let names: Vec<&str> = err.frames().iter().map(|frame| frame.name.as_str()).collect();
    assert_eq!(names, ["inner", "outer"]);
    assert_eq!(err.pos().map(|pos| pos.line), Some(1));
}

#[test]
fn native_failures_record_the_native_frame() {
    let err = eval_err("fn check(x) { return fail(\"bad \" + x) }\ncheck(1)");
    assert_eq!(err.message(), "fail: bad 1");
    let names: Vec<&str> = err.frames().iter().map(|frame| frame.name.as_str()).collect();
    assert_eq!(names, ["fail", "check"]);
}

#[test]
fn runaway_recursion_hits_the_depth_limit() {
    let err = eval_err("fn f(n) { return f(n + 1) }\nf(0)");
    assert!(matches!(err.kind(), Some(ErrorKind::Limit(_))));
    assert!(err.message().contains("call depth"));
}

#[test]
fn recursion_up_to_the_depth_limit_succeeds() {
    let source = "fn f(n) {\n  if n <= 0 { return 0 }\n  return 1 + f(n - 1)\n}\n";
    let value = eval_ok(&format!("{source}f(127)"));
    assert_eq!(value, Value::from(127.0));

    let err = eval_err(&format!("{source}f(128)"));
    assert_eq!(err.message(), "resource limit exceeded: call depth 129 > 128");
}

#[test]
fn deeply_nested_source_is_a_parse_error() {
    let source = format!("{}1{}", "(".repeat(1000), ")".repeat(1000));
    let err = eval_err(&source);
    assert!(matches!(err, ScriptError::Parse(_)), "{err}");
    assert_eq!(err.message(), "expression nested too deeply");

    let err = eval_err(&"[".repeat(20000));
    assert_eq!(err.message(), "expression nested too deeply");
}

#[test]
fn values_cannot_nest_past_the_limit() {
    let source = concat!(
        "let x = []\n",
        "for i in list.range(10000) {\n",
        "  for j in list.range(50) {\n",
        "    x = [x]\n",
        "  }\n",
        "}\n",
        "list.append([], x)",
    );
    let err = eval_err(source);
    assert!(matches!(err.kind(), Some(ErrorKind::Limit(_))), "{err}");
    assert!(err.message().contains("nesting depth 129 > 128"), "{err}");
}

#[test]
fn nesting_limit_covers_literals_assignment_and_builtins() {
    let limits = Limits {
        max_nesting: 3,
        ..Limits::default()
    };
    let run = |source: &str| {
        eval_with(&mut Ctx::new().with_limits(limits), &Runtime::new(), source)
    };
    let fits = run("[[[1]]]").expect("three levels fit");
    assert_eq!(fits.to_string(), "[[[1]]]");
    for source in [
        "[[[[1]]]]",
        "{a: {b: {c: {}}}}",
        "let x = {a: {b: 1}}\nx.a.b = [[1]]\nx",
        "list.append([], [[[1]]])",
        r#"json.parse("[[[[1]]]]")"#,
    ] {
        let err = run(source).expect_err(source);
        assert!(
            matches!(err.kind(), Some(ErrorKind::Limit(_))),
            "{source}: {err}"
        );
        assert!(err.message().contains("nesting depth 4 > 3"), "{source}: {err}");
    }
}

#[test]
fn extra_arguments_are_rejected_and_missing_ones_are_null() {
    let err = eval_err("fn f(a) { return a }\nf(1, 2)");
    assert_eq!(err.message(), "f: expected at most 1 arguments, got 2");
    assert_eq!(eval_ok("fn f(a, b) { return b }\nf(1)"), Value::Null);
}

#[test]
fn literals_respect_limits() {
    let limits = Limits {
        max_list: 2,
        max_string: 4,
        ..Limits::default()
    };
    let err = eval_with(&mut Ctx::new().with_limits(limits), &Runtime::new(), "[1, 2, 3]")
        .expect_err("list literal over the limit");
    assert!(matches!(err.kind(), Some(ErrorKind::Limit(_))));

    let err = eval_with(
        &mut Ctx::new().with_limits(limits),
        &Runtime::new(),
        "\"ab\" + \"abc\"",
    )
    .expect_err("concatenation over the limit");
    assert_eq!(err.message(), "resource limit exceeded: string length 5 > 4");
}

#[test]
fn mixed_type_comparisons_are_type_errors() {
    let err = eval_err("1 < \"2\"");
    assert!(matches!(err.kind(), Some(ErrorKind::Type(_))));
}

#[test]
fn returned_closures_stay_callable() {
    let mut ctx = Ctx::new();
    let func = eval_with(&mut ctx, &Runtime::new(), "let k = 3\nfn(x) { return x * k }")
        .expect("script should evaluate");
    let result = ctx
        .call(&func, &[Value::from(2.0)])
        .expect("closure should still see its scope");
    assert_eq!(result, Value::from(6.0));
}

#[test]
fn parse_errors_do_not_evaluate_anything() {
    let err = eval_err("let a = (1 +\n");
    assert!(matches!(err, ScriptError::Parse(_)));
}

#[test]
fn inline_expressions_evaluate_alone() {
    let runtime = Runtime::new().with_var("name", "ada");
    let value = Engine::new()
        .eval_expr(&mut Ctx::new(), &runtime, "text.upper(vars.name)", &Pos::inline())
        .expect("expression should evaluate");
    assert_eq!(value, Value::from("ADA"));

    let err = Engine::new()
        .eval_expr(&mut Ctx::new(), &runtime, "1 2", &Pos::inline())
        .expect_err("trailing tokens");
    assert!(matches!(err, ScriptError::Parse(_)));
}

#[test]
fn stdlib_object_exposes_every_binding() {
    assert_eq!(eval_ok("stdlib.text.upper(\"a\")"), Value::from("A"));
    assert_eq!(eval_ok("stdlib.len([1, 2])"), Value::from(2.0));
}
