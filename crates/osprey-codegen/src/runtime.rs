//! Which library provides each imported symbol.

use std::collections::BTreeSet;

use osprey_mir::MirModule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RuntimeLibrary {
    /// The C runtime the linker driver pulls in anyway.
    Libc,
    /// Fibers, channels, strings, files and processes: `libfiber_runtime.a`.
    Fiber,
    /// HTTP and WebSocket: `libhttp_runtime.a`, which needs the fiber runtime.
    Http,
    /// An `extern` declaration; the user provides it at link time.
    Foreign,
}

impl RuntimeLibrary {
    /// Archive name without the `lib` prefix and `.a` suffix.
    pub fn archive(self) -> Option<&'static str> {
        match self {
            RuntimeLibrary::Fiber => Some("fiber_runtime"),
            RuntimeLibrary::Http => Some("http_runtime"),
            RuntimeLibrary::Libc | RuntimeLibrary::Foreign => None,
        }
    }
}

const LIBC: &[&str] = &["malloc", "puts", "strlen", "memcpy", "strcmp", "strstr"];

pub fn library_for(symbol: &str) -> RuntimeLibrary {
    if LIBC.contains(&symbol) {
        RuntimeLibrary::Libc
    } else if symbol.starts_with("http_") || symbol.starts_with("websocket_") {
        RuntimeLibrary::Http
    } else if symbol.starts_with("fiber_")
        || symbol.starts_with("channel_")
        || symbol.starts_with("osprey_")
        || symbol.ends_with("_process")
    {
        RuntimeLibrary::Fiber
    } else {
        RuntimeLibrary::Foreign
    }
}

/// Libraries the module's imports resolve against. HTTP implies the fiber
/// runtime.
pub fn required_libraries(module: &MirModule) -> BTreeSet<RuntimeLibrary> {
    let mut libraries: BTreeSet<RuntimeLibrary> =
        module.externals.keys().map(|s| library_for(s)).collect();
    if libraries.contains(&RuntimeLibrary::Http) {
        libraries.insert(RuntimeLibrary::Fiber);
    }
    libraries
}

#[cfg(test)]
mod tests {
    use super::*;
    use osprey_mir::abi;

    #[test]
    fn symbols_map_to_their_archive() {
        assert_eq!(library_for("strcmp"), RuntimeLibrary::Libc);
        assert_eq!(library_for("channel_select"), RuntimeLibrary::Fiber);
        assert_eq!(library_for("spawn_process"), RuntimeLibrary::Fiber);
        assert_eq!(library_for("websocket_send"), RuntimeLibrary::Http);
        assert_eq!(library_for("my_c_helper"), RuntimeLibrary::Foreign);
    }

    #[test]
    fn http_pulls_in_the_fiber_runtime() {
        let mut module = MirModule::default();
        module
            .externals
            .insert("http_get".into(), abi::word_signature(2));
        let libraries = required_libraries(&module);
        assert!(libraries.contains(&RuntimeLibrary::Fiber));
        assert_eq!(RuntimeLibrary::Http.archive(), Some("http_runtime"));
    }
}
