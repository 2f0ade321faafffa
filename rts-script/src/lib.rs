mod args;
pub mod ast;
pub mod ctx;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod eval;
pub mod host;
pub mod lexer;
pub mod module;
pub mod parser;
pub mod pos;
mod stack;
pub mod stdlib;
pub mod value;

pub use ctx::{Ctx, Frame, FrameKind, Limits};
pub use diagnostics::render_error;
pub use engine::{Engine, HOST_BINDINGS, Runtime};
pub use error::{ErrorKind, HostError, ParseError, RuntimeError, ScriptError};
pub use eval::Scope;
pub use host::{
    EnvObject, GlobalMutator, GlobalObject, GlobalVar, RequestEdit, RequestMutator,
    RequestObject, RequestSnapshot, VarsMutator, VarsObject,
};
pub use lexer::scan_module_header;
pub use module::{Module, ModuleCache, Use};
pub use parser::{parse_expression, parse_program};
pub use pos::Pos;
pub use value::{Closure, Dict, NativeFunction, NativeResult, Object, Value};
