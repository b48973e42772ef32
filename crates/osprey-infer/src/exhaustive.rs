//! Exhaustiveness checking for `match` on unions.
//!
//! A variant counts as covered when some arm matches it with only
//! irrefutable sub-patterns. Literal scrutinees are not checked; the code
//! generator gives them a trapping default edge.

use osprey_hir::{HirPattern, HirPatternKind, TypeDef};

/// Variants of `def` that no arm covers, in declaration order.
pub fn missing_variants(def: &TypeDef, patterns: &[&HirPattern]) -> Vec<String> {
    if patterns.iter().any(|p| p.is_irrefutable()) {
        return Vec::new();
    }
    def.variants
        .iter()
        .filter(|variant| !patterns.iter().any(|p| covers(p, &variant.name)))
        .map(|variant| variant.name.clone())
        .collect()
}

fn covers(pattern: &HirPattern, variant_name: &str) -> bool {
    match &pattern.kind {
        HirPatternKind::Variant {
            variant, fields, ..
        } => variant == variant_name && fields.iter().all(|(_, sub)| sub.is_irrefutable()),
        HirPatternKind::Wildcard | HirPatternKind::Bind(_) => true,
        HirPatternKind::Lit(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osprey_hir::VariantDef;
    use osprey_types::Type;

    fn shape() -> TypeDef {
        TypeDef {
            name: "Shape".into(),
            params: vec![],
            variants: ["Circle", "Square", "Triangle"]
                .iter()
                .enumerate()
                .map(|(tag, name)| VariantDef {
                    name: name.to_string(),
                    tag: tag as u32,
                    fields: vec![],
                })
                .collect(),
            is_record: false,
        }
    }

    fn variant(name: &str, tag: u32) -> HirPattern {
        HirPattern {
            kind: HirPatternKind::Variant {
                type_name: "Shape".into(),
                variant: name.into(),
                tag,
                fields: vec![],
            },
            ty: Type::concrete("Shape"),
        }
    }

    #[test]
    fn reports_uncovered_variants_in_order() {
        let circle = variant("Circle", 0);
        assert_eq!(
            missing_variants(&shape(), &[&circle]),
            vec!["Square".to_string(), "Triangle".to_string()]
        );
    }

    #[test]
    fn wildcard_covers_everything() {
        let circle = variant("Circle", 0);
        let wild = HirPattern {
            kind: HirPatternKind::Wildcard,
            ty: Type::concrete("Shape"),
        };
        assert!(missing_variants(&shape(), &[&circle, &wild]).is_empty());
    }

    #[test]
    fn refutable_sub_pattern_does_not_cover() {
        let nested = HirPattern {
            kind: HirPatternKind::Variant {
                type_name: "Shape".into(),
                variant: "Circle".into(),
                tag: 0,
                fields: vec![(
                    0,
                    HirPattern {
                        kind: HirPatternKind::Lit(osprey_hir::Lit::Int(1)),
                        ty: Type::int(),
                    },
                )],
            },
            ty: Type::concrete("Shape"),
        };
        let missing = missing_variants(&shape(), &[&nested]);
        assert_eq!(missing.len(), 3);
    }
}
