mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use common::*;
use script::GlobalVar;

fn mutable_request(recorder: &Arc<RecordingRequest>) -> Runtime {
    Runtime::new().with_request(sample_request(), Some(recorder.clone()))
}

#[test]
fn request_reads_see_earlier_writes() {
    let recorder = Arc::new(RecordingRequest::default());
    let runtime = mutable_request(&recorder);
    let value = eval_with(
        &mut Ctx::new(),
        &runtime,
        "request.setHeader(\"X-Id\", \"42\")\nrequest.header(\"x-id\")",
    )
    .expect("script should evaluate");
    assert_eq!(value, Value::from("42"));
    assert_eq!(
        recorder.edits.lock().as_slice(),
        &[RequestEdit::SetHeader {
            name: "X-Id".to_string(),
            value: "42".to_string(),
        }]
    );
}

#[test]
fn request_members_reflect_the_snapshot() {
    let value = eval_with(
        &mut Ctx::new(),
        &Runtime::new().with_request(sample_request(), None),
        "[request.method, request.url, request.query.page, request.headers.accept]",
    )
    .expect("script should evaluate");
    assert_eq!(
        value.to_string(),
        r#"["GET","https://api.test/users?page=1","1","application/json"]"#
    );
}

#[test]
fn repeated_headers_read_back_as_a_list() {
    let recorder = Arc::new(RecordingRequest::default());
    let value = eval_with(
        &mut Ctx::new(),
        &mutable_request(&recorder),
        "request.addHeader(\"x-trace\", \"t-2\")\nrequest.headers[\"x-trace\"]",
    )
    .expect("script should evaluate");
    assert_eq!(value.to_string(), r#"["t-1","t-2"]"#);
}

#[test]
fn query_and_body_mutations_round_trip() {
    let recorder = Arc::new(RecordingRequest::default());
    let source = r#"
request.setQueryParam("page", 2)
request.setQueryParam("tags", ["a", "b"])
request.setBody({name: "ada"})
request.setMethod("post")
[request.url, request.body, request.method]
"#;
    let value = eval_with(&mut Ctx::new(), &mutable_request(&recorder), source)
        .expect("script should evaluate");
    assert_eq!(
        value.to_string(),
        r#"["https://api.test/users?page=2&tags=a&tags=b","{\"name\":\"ada\"}","POST"]"#
    );
    assert_eq!(recorder.edits.lock().len(), 4);
}

#[test]
fn request_mutation_without_a_mutator_is_read_only() {
    let runtime = Runtime::new().with_request(sample_request(), None);
    let err = eval_with(&mut Ctx::new(), &runtime, "request.setHeader(\"A\", \"b\")")
        .expect_err("mutation should be rejected");
    assert_eq!(err.message(), "read-only: request.setHeader requires a mutable request");
    assert!(matches!(err.kind(), Some(ErrorKind::ReadOnly(_))));
}

#[test]
fn request_is_read_only_when_no_request_is_live() {
    assert_eq!(eval_ok("request.method"), Value::from(""));
    let err = eval_err("request.setURL(\"https://x.test\")");
    assert!(matches!(err.kind(), Some(ErrorKind::ReadOnly(_))));
}

#[test]
fn host_rejections_surface_as_host_errors() {
    let recorder = Arc::new(RecordingRequest {
        reject: true,
        ..RecordingRequest::default()
    });
    let err = eval_with(&mut Ctx::new(), &mutable_request(&recorder), "request.setBody(\"x\")")
        .expect_err("host should reject");
    assert_eq!(err.message(), "host error: request is frozen");
    let pos = err.pos().expect("host errors carry the call site");
    assert_eq!((pos.line, pos.col), (1, 16));
}

#[test]
fn vars_are_case_insensitive() {
    let runtime = Runtime::new().with_var("Token", "abc");
    let value = eval_with(
        &mut Ctx::new(),
        &runtime,
        "[vars.token, vars[\"TOKEN\"], vars.get(\"toKen\"), vars.has(\"token\"), vars.missing]",
    )
    .expect("script should evaluate");
    assert_eq!(value.to_string(), r#"["abc","abc","abc",true,null]"#);
}

#[test]
fn vars_set_forwards_and_reads_back() {
    let recorder = Arc::new(RecordingVars::default());
    let mut runtime = Runtime::new();
    runtime.vars_mut = Some(recorder.clone());
    let value = eval_with(&mut Ctx::new(), &runtime, "vars.set(\"Next\", 2)\nvars.next + 1")
        .expect("script should evaluate");
    assert_eq!(value, Value::from(3.0));
    assert_eq!(
        recorder.writes.lock().as_slice(),
        &[("Next".to_string(), Value::from(2.0))]
    );
}

#[test]
fn vars_set_without_a_mutator_is_read_only() {
    let err = eval_err("vars.set(\"a\", 1)");
    assert!(matches!(err.kind(), Some(ErrorKind::ReadOnly(_))));
}

#[test]
fn globals_forward_the_secret_flag() {
    let recorder = Arc::new(RecordingGlobals::default());
    let mut runtime = Runtime::new();
    runtime.global_mut = Some(recorder.clone());
    let source = r#"
vars.global.set("session", "s-1", {secret: true})
vars.global.set("region", "eu")
vars.global.delete("stale")
[vars.global.get("session"), vars.global.region, vars.global.has("stale")]
"#;
    let value = eval_with(&mut Ctx::new(), &runtime, source).expect("script should evaluate");
    assert_eq!(value.to_string(), r#"["s-1","eu",false]"#);
    assert_eq!(
        recorder.writes.lock().as_slice(),
        &[
            GlobalWrite::Set {
                name: "session".to_string(),
                value: Value::from("s-1"),
                secret: true,
            },
            GlobalWrite::Set {
                name: "region".to_string(),
                value: Value::from("eu"),
                secret: false,
            },
            GlobalWrite::Delete("stale".to_string()),
        ]
    );
}

#[test]
fn global_mutation_without_a_mutator_keeps_existing_values() {
    let mut globals = BTreeMap::new();
    globals.insert("session".to_string(), GlobalVar::secret("s-0"));
    let mut runtime = Runtime::new();
    runtime.globals = globals;
    let err = eval_with(&mut Ctx::new(), &runtime, "vars.global.delete(\"session\")")
        .expect_err("delete should be rejected");
    assert!(matches!(err.kind(), Some(ErrorKind::ReadOnly(_))));

    let value = eval_with(&mut Ctx::new(), &runtime, "vars.global.session")
        .expect("script should evaluate");
    assert_eq!(value, Value::from("s-0"));
}

#[test]
fn env_is_readable_but_not_writable() {
    let runtime = Runtime::new().with_env("API_HOST", "api.test");
    let value = eval_with(
        &mut Ctx::new(),
        &runtime,
        "[env.API_HOST, env.get(\"API_HOST\"), env[\"MISSING\"], env.has(\"API_HOST\")]",
    )
    .expect("script should evaluate");
    assert_eq!(value.to_string(), r#"["api.test","api.test",null,true]"#);

    let err = eval_with(&mut Ctx::new(), &runtime, "env.set(\"A\", \"b\")")
        .expect_err("env has no setters");
    assert!(matches!(err.kind(), Some(ErrorKind::UnknownMember { .. })));
}

#[test]
fn host_objects_cannot_be_rebound() {
    let err = eval_err("request = 1");
    assert!(matches!(err.kind(), Some(ErrorKind::ConstAssign(_))));
}

#[test]
fn each_evaluation_starts_from_the_runtime_snapshot() {
    let recorder = Arc::new(RecordingRequest::default());
    let runtime = mutable_request(&recorder);
    let engine = Engine::new();
    engine
        .eval(
            &mut Ctx::new(),
            &runtime,
            "request.setHeader(\"X-Once\", \"1\")",
            &Pos::inline(),
        )
        .expect("first evaluation");
    let value = engine
        .eval(&mut Ctx::new(), &runtime, "request.header(\"X-Once\")", &Pos::inline())
        .expect("second evaluation");
    assert_eq!(value, Value::Null);
}
