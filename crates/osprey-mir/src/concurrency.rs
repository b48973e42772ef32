//! Fiber and channel runtime interface.
//!
//! The compiler never schedules anything itself. Spawning, awaiting,
//! yielding and channel traffic are calls into the runtime table below, and
//! every value crosses it as an `i64` word (see [`crate::abi`]).

use crate::{MirSignature, MirType, MirValueId};

pub const FIBER_SPAWN: &str = "fiber_spawn";
pub const FIBER_AWAIT: &str = "fiber_await";
pub const FIBER_YIELD: &str = "fiber_yield";
pub const CHANNEL_CREATE: &str = "channel_create";
pub const CHANNEL_SEND: &str = "channel_send";
pub const CHANNEL_RECV: &str = "channel_recv";
pub const CHANNEL_SELECT: &str = "channel_select";

/// One `channel_select` case is `[channel, kind, value]`.
pub const SELECT_CASE_SIZE: i32 = 24;
pub const SELECT_CASE_CHANNEL: i32 = 0;
pub const SELECT_CASE_KIND: i32 = 8;
pub const SELECT_CASE_VALUE: i32 = 16;
pub const SELECT_RECV: i64 = 0;
pub const SELECT_SEND: i64 = 1;
/// Returned by a non-blocking select when no case was ready.
pub const SELECT_NONE: i64 = -1;

/// Capacity used by `Channel<T>()` without an argument.
pub const DEFAULT_CHANNEL_CAPACITY: i64 = 0;

pub fn signature(symbol: &str) -> Option<MirSignature> {
    let words = |n: usize| MirSignature::new(vec![MirType::I64; n], Some(MirType::I64));
    match symbol {
        FIBER_SPAWN => Some(words(2)),
        FIBER_AWAIT | FIBER_YIELD | CHANNEL_CREATE | CHANNEL_RECV => Some(words(1)),
        CHANNEL_SEND => Some(words(2)),
        CHANNEL_SELECT => Some(words(4)),
        _ => None,
    }
}

/// A spawned fiber's runtime handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiberHandle(pub MirValueId);

/// A channel's runtime handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelHandle(pub MirValueId);

impl FiberHandle {
    pub fn value(self) -> MirValueId {
        self.0
    }
}

impl ChannelHandle {
    pub fn value(self) -> MirValueId {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_table_is_all_words() {
        for symbol in [
            FIBER_SPAWN,
            FIBER_AWAIT,
            FIBER_YIELD,
            CHANNEL_CREATE,
            CHANNEL_SEND,
            CHANNEL_RECV,
            CHANNEL_SELECT,
        ] {
            let sig = signature(symbol).expect("known symbol");
            assert!(sig.params.iter().all(|p| *p == MirType::I64), "{symbol}");
            assert_eq!(sig.ret, Some(MirType::I64));
        }
        assert_eq!(signature(CHANNEL_SELECT).map(|s| s.params.len()), Some(4));
    }
}
