//! Standard library. Every binding comes from the one declarative table in
//! this file and is rebuilt for each evaluation.

mod crypto;
mod dict;
mod encoding;
mod free;
mod headers;
mod json;
mod list;
mod math;
pub(crate) mod query;
mod text;
mod time;

use crate::ctx::Ctx;
use crate::error::{ErrorKind, RuntimeError};
use crate::value::{NativeFunction, NativeResult, Object, Value};

pub(crate) type Builtin = fn(&mut Ctx, &[Value]) -> NativeResult;

pub(crate) struct Namespace {
    pub(crate) name: &'static str,
    pub(crate) members: &'static [(&'static str, Builtin)],
}

impl Namespace {
    fn lookup(&self, member: &str) -> Option<Builtin> {
        self.members
            .iter()
            .find(|(name, _)| *name == member)
            .map(|(_, builtin)| *builtin)
    }
}

const FREE_FUNCTIONS: &[(&str, Builtin)] = &[
    ("fail", free::fail),
    ("len", free::len),
    ("contains", free::contains),
    ("match", free::match_regex),
    ("str", free::str),
    ("default", free::default),
    ("uuid", free::uuid),
    ("type", free::type_of),
    ("num", free::num),
];

const NAMESPACES: &[Namespace] = &[
    Namespace {
        name: "base64",
        members: &[
            ("encode", encoding::base64_encode),
            ("decode", encoding::base64_decode),
        ],
    },
    Namespace {
        name: "base64url",
        members: &[
            ("encode", encoding::base64url_encode),
            ("decode", encoding::base64url_decode),
        ],
    },
    Namespace {
        name: "hex",
        members: &[
            ("encode", encoding::hex_encode),
            ("decode", encoding::hex_decode),
        ],
    },
    Namespace {
        name: "url",
        members: &[
            ("encode", encoding::url_encode),
            ("decode", encoding::url_decode),
        ],
    },
    Namespace {
        name: "time",
        members: &[
            ("now", time::now),
            ("unix", time::unix),
            ("unixMs", time::unix_ms),
            ("format", time::format),
            ("parse", time::parse),
            ("add", time::add),
        ],
    },
    Namespace {
        name: "json",
        members: &[
            ("parse", json::parse),
            ("stringify", json::stringify),
            ("file", json::file),
            ("get", json::get),
        ],
    },
    Namespace {
        name: "headers",
        members: &[
            ("get", headers::get),
            ("has", headers::has),
            ("set", headers::set),
            ("remove", headers::remove),
            ("merge", headers::merge),
            ("normalize", headers::normalize),
        ],
    },
    Namespace {
        name: "query",
        members: &[
            ("parse", query::parse),
            ("encode", query::encode),
            ("merge", query::merge),
        ],
    },
    Namespace {
        name: "text",
        members: &[
            ("lower", text::lower),
            ("upper", text::upper),
            ("trim", text::trim),
            ("split", text::split),
            ("replace", text::replace),
            ("startsWith", text::starts_with),
            ("endsWith", text::ends_with),
            ("repeat", text::repeat),
            ("slice", text::slice),
            ("join", text::join),
        ],
    },
    Namespace {
        name: "list",
        members: &[
            ("append", list::append),
            ("concat", list::concat),
            ("slice", list::slice),
            ("reverse", list::reverse),
            ("sort", list::sort),
            ("map", list::map),
            ("filter", list::filter),
            ("first", list::first),
            ("last", list::last),
            ("index", list::index),
            ("unique", list::unique),
            ("range", list::range),
            ("join", list::join),
        ],
    },
    Namespace {
        name: "dict",
        members: &[
            ("keys", dict::keys),
            ("values", dict::values),
            ("items", dict::items),
            ("get", dict::get),
            ("set", dict::set),
            ("remove", dict::remove),
            ("merge", dict::merge),
            ("has", dict::has),
        ],
    },
    Namespace {
        name: "math",
        members: &[
            ("abs", math::abs),
            ("floor", math::floor),
            ("ceil", math::ceil),
            ("round", math::round),
            ("min", math::min),
            ("max", math::max),
            ("pow", math::pow),
            ("sqrt", math::sqrt),
            ("random", math::random),
        ],
    },
    Namespace {
        name: "crypto",
        members: &[
            ("hash", crypto::hash),
            ("hmac", crypto::hmac),
            ("sha256", crypto::sha256),
            ("hmacSha256", crypto::hmac_sha256),
        ],
    },
];

fn native(name: String, builtin: Builtin) -> Value {
    Value::Native(std::sync::Arc::new(NativeFunction::new(
        name,
        move |ctx: &mut Ctx, args: &[Value]| builtin(ctx, args),
    )))
}

/// A stdlib namespace such as `text` or `crypto`.
pub struct NamespaceObject {
    namespace: &'static Namespace,
}

impl Object for NamespaceObject {
    fn type_name(&self) -> &str {
        self.namespace.name
    }

    fn get_member(&self, name: &str) -> Option<Value> {
        self.namespace
            .lookup(name)
            .map(|builtin| native(format!("{}.{name}", self.namespace.name), builtin))
    }

    fn call_member(&self, ctx: &mut Ctx, name: &str, args: &[Value]) -> NativeResult {
        match self.namespace.lookup(name) {
            Some(builtin) => builtin(ctx, args),
            None => Err(RuntimeError::new(ErrorKind::UnknownMember {
                type_name: self.namespace.name.to_string(),
                member: name.to_string(),
            })),
        }
    }
}

/// The `stdlib` object: every namespace and free function as a member.
pub struct StdlibObject;

impl Object for StdlibObject {
    fn type_name(&self) -> &str {
        "stdlib"
    }

    fn get_member(&self, name: &str) -> Option<Value> {
        binding(name)
    }

    fn call_member(&self, ctx: &mut Ctx, name: &str, args: &[Value]) -> NativeResult {
        if let Some((_, builtin)) = FREE_FUNCTIONS.iter().find(|(free, _)| *free == name) {
            return builtin(ctx, args);
        }
        match binding(name) {
            Some(value) => Err(RuntimeError::new(ErrorKind::NotCallable(
                value.type_name().to_string(),
            ))),
            None => Err(RuntimeError::new(ErrorKind::UnknownMember {
                type_name: "stdlib".to_string(),
                member: name.to_string(),
            })),
        }
    }
}

fn binding(name: &str) -> Option<Value> {
    if let Some((free, builtin)) = FREE_FUNCTIONS.iter().find(|(free, _)| *free == name) {
        return Some(native(free.to_string(), *builtin));
    }
    NAMESPACES
        .iter()
        .find(|namespace| namespace.name == name)
        .map(|namespace| Value::object(NamespaceObject { namespace }))
}

/// Fresh stdlib bindings for one evaluation, including `stdlib` itself.
pub fn bindings() -> Vec<(&'static str, Value)> {
    let mut out = Vec::with_capacity(FREE_FUNCTIONS.len() + NAMESPACES.len() + 1);
    for (name, builtin) in FREE_FUNCTIONS {
        out.push((*name, native(name.to_string(), *builtin)));
    }
    for namespace in NAMESPACES {
        out.push((namespace.name, Value::object(NamespaceObject { namespace })));
    }
    out.push(("stdlib", Value::object(StdlibObject)));
    out
}

/// Every name the stdlib binds. Module aliases may not shadow them.
pub fn names() -> impl Iterator<Item = &'static str> {
    FREE_FUNCTIONS
        .iter()
        .map(|(name, _)| *name)
        .chain(NAMESPACES.iter().map(|namespace| namespace.name))
        .chain(std::iter::once("stdlib"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_namespace_member_is_reachable() {
        for namespace in NAMESPACES {
            let object = NamespaceObject { namespace };
            for (member, _) in namespace.members {
                let value = object
                    .get_member(member)
                    .expect("declared member should resolve");
                assert!(value.is_callable(), "{}.{member}", namespace.name);
            }
        }
    }

    #[test]
    fn names_are_unique() {
        let mut names: Vec<_> = names().collect();
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
    }

    #[test]
    fn bindings_are_rebuilt_per_call() {
        let first = bindings();
        let second = bindings();
        let (_, a) = first.iter().find(|(name, _)| *name == "text").expect("text");
        let (_, b) = second.iter().find(|(name, _)| *name == "text").expect("text");
        assert_ne!(a, b);
    }
}
