//! The builtin function table.
//!
//! Every builtin has a fixed parameter list, a permission family for the
//! security gate, and a lowering strategy. Signatures are written with a
//! small const-constructible [`Sig`] language and turned into [`Type`]s with
//! fresh variables at each call site.

use osprey_types::Type;

/// Capability a builtin needs from the security configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    None,
    Http,
    WebSocket,
    FileRead,
    FileWrite,
    Process,
    /// Calls through `extern` declarations.
    Ffi,
}

impl Permission {
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::None => "none",
            Permission::Http => "http",
            Permission::WebSocket => "websocket",
            Permission::FileRead => "file-read",
            Permission::FileWrite => "file-write",
            Permission::Process => "process",
            Permission::Ffi => "ffi",
        }
    }
}

/// How the code generator emits a builtin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lowering {
    /// Expanded inline by the code generator.
    Intrinsic,
    /// A call to a fixed C symbol. Arguments and the result cross as words.
    /// A `Result<T, String>` return is built from the word: zero means
    /// failure.
    Runtime(&'static str),
}

/// Signature shape. `Var(n)` is the n-th type variable of the builtin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sig {
    Int,
    Float,
    Bool,
    String,
    Unit,
    ProcessHandle,
    Var(u8),
    List(&'static Sig),
    Iter(&'static Sig),
    Result(&'static Sig, &'static Sig),
    Fn(&'static [Sig], &'static Sig),
}

impl Sig {
    pub fn to_type(&self, vars: &[Type]) -> Type {
        match self {
            Sig::Int => Type::int(),
            Sig::Float => Type::float(),
            Sig::Bool => Type::bool(),
            Sig::String => Type::string(),
            Sig::Unit => Type::unit(),
            Sig::ProcessHandle => Type::process_handle(),
            Sig::Var(n) => vars
                .get(usize::from(*n))
                .cloned()
                .unwrap_or_else(Type::unit),
            Sig::List(elem) => Type::list(elem.to_type(vars)),
            Sig::Iter(elem) => Type::iterator(elem.to_type(vars)),
            Sig::Result(ok, err) => Type::result(ok.to_type(vars), err.to_type(vars)),
            Sig::Fn(params, ret) => Type::function(
                params.iter().map(|p| p.to_type(vars)).collect(),
                ret.to_type(vars),
            ),
        }
    }

    fn max_var(&self) -> Option<u8> {
        match self {
            Sig::Var(n) => Some(*n),
            Sig::List(inner) | Sig::Iter(inner) => inner.max_var(),
            Sig::Result(a, b) => a.max_var().max(b.max_var()),
            Sig::Fn(params, ret) => params
                .iter()
                .filter_map(Sig::max_var)
                .max()
                .max(ret.max_var()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinParam {
    pub name: &'static str,
    pub sig: Sig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Builtin {
    pub name: &'static str,
    pub params: &'static [BuiltinParam],
    pub ret: Sig,
    pub permission: Permission,
    pub lowering: Lowering,
}

impl Builtin {
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn param_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.params.iter().map(|p| p.name)
    }

    /// Number of type variables the signature mentions.
    pub fn type_var_count(&self) -> usize {
        self.params
            .iter()
            .filter_map(|p| p.sig.max_var())
            .chain(self.ret.max_var())
            .max()
            .map_or(0, |n| usize::from(n) + 1)
    }

    /// Parameter and return types with `vars` substituted for `Var(n)`.
    pub fn signature(&self, vars: &[Type]) -> (Vec<Type>, Type) {
        let params = self.params.iter().map(|p| p.sig.to_type(vars)).collect();
        (params, self.ret.to_type(vars))
    }

    /// Does parameter `index` take an iterator? Lists are accepted there too.
    pub fn takes_iterable(&self, index: usize) -> bool {
        matches!(self.params.get(index), Some(BuiltinParam { sig: Sig::Iter(_), .. }))
    }
}

const fn p(name: &'static str, sig: Sig) -> BuiltinParam {
    BuiltinParam { name, sig }
}

const T: Sig = Sig::Var(0);
const U: Sig = Sig::Var(1);

pub const BUILTINS: &[Builtin] = &[
    // Core
    Builtin {
        name: "print",
        params: &[p("value", T)],
        ret: Sig::Unit,
        permission: Permission::None,
        lowering: Lowering::Intrinsic,
    },
    Builtin {
        name: "toString",
        params: &[p("value", T)],
        ret: Sig::String,
        permission: Permission::None,
        lowering: Lowering::Intrinsic,
    },
    // Strings
    Builtin {
        name: "length",
        params: &[p("text", Sig::String)],
        ret: Sig::Int,
        permission: Permission::None,
        lowering: Lowering::Intrinsic,
    },
    Builtin {
        name: "contains",
        params: &[p("haystack", Sig::String), p("needle", Sig::String)],
        ret: Sig::Bool,
        permission: Permission::None,
        lowering: Lowering::Intrinsic,
    },
    Builtin {
        name: "substring",
        params: &[
            p("s", Sig::String),
            p("start", Sig::Int),
            p("end", Sig::Int),
        ],
        ret: Sig::String,
        permission: Permission::None,
        lowering: Lowering::Runtime("osprey_substring"),
    },
    Builtin {
        name: "parseInt",
        params: &[p("text", Sig::String)],
        ret: Sig::Int,
        permission: Permission::None,
        lowering: Lowering::Runtime("osprey_parse_int"),
    },
    Builtin {
        name: "join",
        params: &[p("items", Sig::List(&Sig::String)), p("separator", Sig::String)],
        ret: Sig::String,
        permission: Permission::None,
        lowering: Lowering::Runtime("osprey_join"),
    },
    // Iterators
    Builtin {
        name: "range",
        params: &[p("start", Sig::Int), p("end", Sig::Int)],
        ret: Sig::Iter(&Sig::Int),
        permission: Permission::None,
        lowering: Lowering::Intrinsic,
    },
    Builtin {
        name: "forEach",
        params: &[p("iterator", Sig::Iter(&T)), p("function", Sig::Fn(&[T], &U))],
        ret: Sig::Unit,
        permission: Permission::None,
        lowering: Lowering::Intrinsic,
    },
    Builtin {
        name: "map",
        params: &[p("iterator", Sig::Iter(&T)), p("fn", Sig::Fn(&[T], &U))],
        ret: Sig::Iter(&U),
        permission: Permission::None,
        lowering: Lowering::Intrinsic,
    },
    Builtin {
        name: "filter",
        params: &[p("iterator", Sig::Iter(&T)), p("predicate", Sig::Fn(&[T], &Sig::Bool))],
        ret: Sig::Iter(&T),
        permission: Permission::None,
        lowering: Lowering::Intrinsic,
    },
    Builtin {
        name: "fold",
        params: &[
            p("iterator", Sig::Iter(&T)),
            p("initial", U),
            p("fn", Sig::Fn(&[U, T], &U)),
        ],
        ret: U,
        permission: Permission::None,
        lowering: Lowering::Intrinsic,
    },
    // Files
    Builtin {
        name: "readFile",
        params: &[p("filename", Sig::String)],
        ret: Sig::Result(&Sig::String, &Sig::String),
        permission: Permission::FileRead,
        lowering: Lowering::Runtime("osprey_read_file"),
    },
    Builtin {
        name: "writeFile",
        params: &[p("filename", Sig::String), p("content", Sig::String)],
        ret: Sig::Int,
        permission: Permission::FileWrite,
        lowering: Lowering::Runtime("osprey_write_file"),
    },
    Builtin {
        name: "deleteFile",
        params: &[p("filename", Sig::String)],
        ret: Sig::Int,
        permission: Permission::FileWrite,
        lowering: Lowering::Runtime("osprey_delete_file"),
    },
    // Processes
    Builtin {
        name: "spawnProcess",
        params: &[
            p("command", Sig::String),
            p("callback", Sig::Fn(&[Sig::Int, Sig::Int, Sig::String], &Sig::Unit)),
        ],
        ret: Sig::Result(&Sig::ProcessHandle, &Sig::String),
        permission: Permission::Process,
        lowering: Lowering::Runtime("spawn_process"),
    },
    Builtin {
        name: "awaitProcess",
        params: &[p("handle", Sig::ProcessHandle)],
        ret: Sig::Int,
        permission: Permission::Process,
        lowering: Lowering::Runtime("await_process"),
    },
    Builtin {
        name: "cleanupProcess",
        params: &[p("handle", Sig::ProcessHandle)],
        ret: Sig::Unit,
        permission: Permission::Process,
        lowering: Lowering::Runtime("cleanup_process"),
    },
    Builtin {
        name: "sleep",
        params: &[p("milliseconds", Sig::Int)],
        ret: Sig::Int,
        permission: Permission::None,
        lowering: Lowering::Runtime("fiber_sleep"),
    },
    // HTTP
    Builtin {
        name: "httpCreateServer",
        params: &[p("port", Sig::Int), p("address", Sig::String)],
        ret: Sig::Int,
        permission: Permission::Http,
        lowering: Lowering::Runtime("http_create_server"),
    },
    Builtin {
        name: "httpStopServer",
        params: &[p("serverID", Sig::Int)],
        ret: Sig::Int,
        permission: Permission::Http,
        lowering: Lowering::Runtime("http_stop_server"),
    },
    Builtin {
        name: "httpCreateClient",
        params: &[p("base_url", Sig::String), p("timeout", Sig::Int)],
        ret: Sig::Int,
        permission: Permission::Http,
        lowering: Lowering::Runtime("http_create_client"),
    },
    Builtin {
        name: "httpGet",
        params: &[
            p("clientID", Sig::Int),
            p("path", Sig::String),
            p("headers", Sig::String),
        ],
        ret: Sig::Int,
        permission: Permission::Http,
        lowering: Lowering::Runtime("http_get"),
    },
    Builtin {
        name: "httpPost",
        params: &[
            p("clientID", Sig::Int),
            p("path", Sig::String),
            p("body", Sig::String),
            p("headers", Sig::String),
        ],
        ret: Sig::Int,
        permission: Permission::Http,
        lowering: Lowering::Runtime("http_post"),
    },
    Builtin {
        name: "httpPut",
        params: &[
            p("clientID", Sig::Int),
            p("path", Sig::String),
            p("body", Sig::String),
            p("headers", Sig::String),
        ],
        ret: Sig::Int,
        permission: Permission::Http,
        lowering: Lowering::Runtime("http_put"),
    },
    Builtin {
        name: "httpDelete",
        params: &[
            p("clientID", Sig::Int),
            p("path", Sig::String),
            p("headers", Sig::String),
        ],
        ret: Sig::Int,
        permission: Permission::Http,
        lowering: Lowering::Runtime("http_delete"),
    },
    Builtin {
        name: "httpCloseClient",
        params: &[p("clientID", Sig::Int)],
        ret: Sig::Int,
        permission: Permission::Http,
        lowering: Lowering::Runtime("http_close_client"),
    },
    // WebSockets
    Builtin {
        name: "websocketConnect",
        params: &[
            p("url", Sig::String),
            p("messageHandler", Sig::Fn(&[Sig::String], &Sig::Unit)),
        ],
        ret: Sig::Int,
        permission: Permission::WebSocket,
        lowering: Lowering::Runtime("websocket_connect"),
    },
    Builtin {
        name: "websocketSend",
        params: &[p("wsID", Sig::Int), p("message", Sig::String)],
        ret: Sig::Int,
        permission: Permission::WebSocket,
        lowering: Lowering::Runtime("websocket_send"),
    },
    Builtin {
        name: "websocketClose",
        params: &[p("wsID", Sig::Int)],
        ret: Sig::Int,
        permission: Permission::WebSocket,
        lowering: Lowering::Runtime("websocket_close"),
    },
    Builtin {
        name: "websocketCreateServer",
        params: &[
            p("port", Sig::Int),
            p("address", Sig::String),
            p("path", Sig::String),
        ],
        ret: Sig::Int,
        permission: Permission::WebSocket,
        lowering: Lowering::Runtime("websocket_create_server"),
    },
    Builtin {
        name: "websocketServerListen",
        params: &[p("serverID", Sig::Int)],
        ret: Sig::Int,
        permission: Permission::WebSocket,
        lowering: Lowering::Runtime("websocket_server_listen"),
    },
    Builtin {
        name: "websocketServerBroadcast",
        params: &[p("serverID", Sig::Int), p("message", Sig::String)],
        ret: Sig::Int,
        permission: Permission::WebSocket,
        lowering: Lowering::Runtime("websocket_server_broadcast"),
    },
    Builtin {
        name: "websocketStopServer",
        params: &[p("serverID", Sig::Int)],
        ret: Sig::Int,
        permission: Permission::WebSocket,
        lowering: Lowering::Runtime("websocket_stop_server"),
    },
];

/// Why call arguments could not be lined up with a parameter list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentMismatch {
    Count { expected: usize, found: usize },
    Unknown(String),
    Duplicate(String),
    /// A call using named arguments left this parameter unfilled.
    Missing(String),
}

/// Map each argument to its parameter slot.
///
/// Positional arguments take the slot matching their position; named
/// arguments take the parameter with that name.
pub fn bind_arguments(
    param_names: &[&str],
    arg_names: &[Option<&str>],
) -> Result<Vec<usize>, ArgumentMismatch> {
    let count_error = || ArgumentMismatch::Count {
        expected: param_names.len(),
        found: arg_names.len(),
    };
    let mut taken = vec![false; param_names.len()];
    let mut slots = Vec::with_capacity(arg_names.len());
    for (position, name) in arg_names.iter().enumerate() {
        let slot = match name {
            None if position < param_names.len() => position,
            None => return Err(count_error()),
            Some(name) => param_names
                .iter()
                .position(|p| p == name)
                .ok_or_else(|| ArgumentMismatch::Unknown(name.to_string()))?,
        };
        if taken[slot] {
            return Err(ArgumentMismatch::Duplicate(param_names[slot].to_string()));
        }
        taken[slot] = true;
        slots.push(slot);
    }
    if slots.len() < param_names.len() {
        if arg_names.iter().any(Option::is_some) {
            let unfilled = taken.iter().position(|t| !t).unwrap_or(0);
            return Err(ArgumentMismatch::Missing(param_names[unfilled].to_string()));
        }
        return Err(count_error());
    }
    Ok(slots)
}

pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name == name)
}

pub fn is_builtin(name: &str) -> bool {
    lookup(name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique() {
        let mut seen = std::collections::BTreeSet::new();
        for builtin in BUILTINS {
            assert!(seen.insert(builtin.name), "duplicate builtin {}", builtin.name);
        }
    }

    #[test]
    fn fold_signature_uses_two_variables() {
        let fold = lookup("fold").expect("fold registered");
        assert_eq!(fold.type_var_count(), 2);
        let (params, ret) = fold.signature(&[Type::int(), Type::string()]);
        assert_eq!(params[0], Type::iterator(Type::int()));
        assert_eq!(
            params[2],
            Type::function(vec![Type::string(), Type::int()], Type::string())
        );
        assert_eq!(ret, Type::string());
        assert!(fold.takes_iterable(0));
        assert!(!fold.takes_iterable(1));
    }

    #[test]
    fn to_string_takes_exactly_one_argument() {
        let to_string = lookup("toString").expect("toString registered");
        assert_eq!(to_string.arity(), 1);
        assert_eq!(to_string.lowering, Lowering::Intrinsic);
    }

    #[test]
    fn named_arguments_map_to_slots() {
        let slots = bind_arguments(&["s", "start", "end"], &[None, Some("end"), Some("start")])
            .expect("bindable");
        assert_eq!(slots, vec![0, 2, 1]);
    }

    #[test]
    fn argument_binding_reports_problems() {
        assert_eq!(
            bind_arguments(&["value"], &[]),
            Err(ArgumentMismatch::Count {
                expected: 1,
                found: 0
            })
        );
        assert_eq!(
            bind_arguments(&["a", "b"], &[Some("a"), Some("c")]),
            Err(ArgumentMismatch::Unknown("c".into()))
        );
        assert_eq!(
            bind_arguments(&["a", "b"], &[None, Some("a")]),
            Err(ArgumentMismatch::Duplicate("a".into()))
        );
        assert_eq!(
            bind_arguments(&["a", "b"], &[Some("b")]),
            Err(ArgumentMismatch::Missing("a".into()))
        );
        assert_eq!(
            bind_arguments(&["a"], &[None, None]),
            Err(ArgumentMismatch::Count {
                expected: 1,
                found: 2
            })
        );
    }

    #[test]
    fn capability_builtins_carry_permissions() {
        assert_eq!(lookup("readFile").map(|b| b.permission), Some(Permission::FileRead));
        assert_eq!(lookup("httpGet").map(|b| b.permission), Some(Permission::Http));
        assert_eq!(
            lookup("websocketSend").map(|b| b.permission),
            Some(Permission::WebSocket)
        );
        assert_eq!(lookup("spawnProcess").map(|b| b.permission), Some(Permission::Process));
        assert_eq!(lookup("print").map(|b| b.permission), Some(Permission::None));
    }
}
