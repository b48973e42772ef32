//! Imported C symbols and the word-passing convention.
//!
//! Runtime builtins take and return `i64` words. A value crosses as a word by
//! zero-extension (`Bool`, `Unit`) or bit reinterpretation (`Float`);
//! pointers and `Int` pass unchanged.

use std::collections::BTreeMap;

use crate::{MirBuilder, MirConvert, MirSignature, MirType, MirValueId, concurrency};

pub const MALLOC: &str = "malloc";
pub const PUTS: &str = "puts";
pub const STRLEN: &str = "strlen";
pub const MEMCPY: &str = "memcpy";
pub const STRCMP: &str = "strcmp";
pub const STRSTR: &str = "strstr";
pub const INT_TO_STRING: &str = "osprey_int_to_string";
pub const FLOAT_TO_STRING: &str = "osprey_float_to_string";

/// Signature of a fixed libc or runtime symbol.
pub fn signature(symbol: &str) -> Option<MirSignature> {
    use MirType::{F64, I32, I64};
    let sig = |params: &[MirType], ret: MirType| MirSignature::new(params.to_vec(), Some(ret));
    match symbol {
        MALLOC => Some(sig(&[I64], I64)),
        PUTS => Some(sig(&[I64], I32)),
        STRLEN => Some(sig(&[I64], I64)),
        MEMCPY => Some(sig(&[I64, I64, I64], I64)),
        STRCMP => Some(sig(&[I64, I64], I32)),
        STRSTR => Some(sig(&[I64, I64], I64)),
        INT_TO_STRING => Some(sig(&[I64], I64)),
        FLOAT_TO_STRING => Some(sig(&[F64], I64)),
        _ => concurrency::signature(symbol),
    }
}

/// `(i64, ...) -> i64` with `arity` parameters.
pub fn word_signature(arity: usize) -> MirSignature {
    MirSignature::new(vec![MirType::I64; arity], Some(MirType::I64))
}

/// External symbols referenced by a module, declared on first use.
#[derive(Debug, Default)]
pub struct Imports {
    symbols: BTreeMap<String, MirSignature>,
}

impl Imports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, name: &str, signature: MirSignature) {
        self.symbols
            .entry(name.to_string())
            .or_insert(signature);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    pub fn into_map(self) -> BTreeMap<String, MirSignature> {
        self.symbols
    }
}

/// Widen `value` to an `i64` word.
pub fn to_word(b: &mut MirBuilder, value: MirValueId) -> MirValueId {
    match b.value_type(value) {
        MirType::I64 => value,
        MirType::I8 | MirType::I32 => b.convert(MirConvert::Uextend(MirType::I64), value),
        MirType::F64 => b.convert(MirConvert::FloatBits, value),
    }
}

/// Narrow a word back to a value of machine type `ty`.
pub fn from_word(b: &mut MirBuilder, word: MirValueId, ty: MirType) -> MirValueId {
    match ty {
        MirType::I64 => word,
        MirType::I8 | MirType::I32 => b.convert(MirConvert::Ireduce(ty), word),
        MirType::F64 => b.convert(MirConvert::BitsFloat, word),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MirLinkage;

    #[test]
    fn words_round_trip_through_conversions() {
        let mut b = MirBuilder::new(
            "f",
            MirSignature::new(vec![MirType::F64, MirType::I8, MirType::I64], None),
            MirLinkage::Local,
        );
        let (float, flag, int) = (b.param(0), b.param(1), b.param(2));
        let float_word = to_word(&mut b, float);
        assert_eq!(b.value_type(float_word), MirType::I64);
        let back = from_word(&mut b, float_word, MirType::F64);
        assert_eq!(b.value_type(back), MirType::F64);

        let flag_word = to_word(&mut b, flag);
        assert_eq!(b.value_type(flag_word), MirType::I64);

        // Ints pass through untouched.
        assert_eq!(to_word(&mut b, int), int);
    }

    #[test]
    fn libc_signatures_use_c_widths() {
        let puts = signature(PUTS).expect("puts");
        assert_eq!(puts.ret, Some(MirType::I32));
        let floats = signature(FLOAT_TO_STRING).expect("float_to_string");
        assert_eq!(floats.params, vec![MirType::F64]);
        assert!(signature("osprey_substring").is_none());
    }

    #[test]
    fn imports_keep_the_first_declaration() {
        let mut imports = Imports::new();
        imports.declare("f", word_signature(1));
        imports.declare("f", word_signature(3));
        assert_eq!(imports.into_map()["f"].params.len(), 1);
    }
}
