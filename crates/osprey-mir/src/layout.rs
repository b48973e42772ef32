//! Value layout planning.
//!
//! Every source value lowers to one machine word or scalar. Aggregates live in
//! heap cells made of 8-byte slots:
//!
//! | kind | cell |
//! |---|---|
//! | union | `[tag: i32 (padded to 8), slot0, slot1, ...]`, sized to the largest variant |
//! | record | `[slot0, slot1, ...]` |
//! | list / iterator | `[len: i64, elem0, elem1, ...]` |
//! | closure | `[code address, capture0, capture1, ...]` |
//!
//! Fibers, channels and process handles are opaque runtime words.

use std::collections::BTreeMap;
use std::sync::Arc;

use osprey_hir::{FieldDef, TypeCatalog, TypeDef, VariantDef};
use osprey_types::{
    ERROR_FIELD, ERROR_VARIANT, FLOAT, INT, RESULT, SUCCESS_FIELD, SUCCESS_VARIANT, Type, TypeVarId,
};

use crate::{CodegenError, MirType};

/// Size of one payload slot.
pub const SLOT: i32 = 8;
pub const TAG_OFFSET: i32 = 0;
/// First payload slot of a union cell.
pub const PAYLOAD_OFFSET: i32 = 8;
pub const LIST_LEN_OFFSET: i32 = 0;
pub const LIST_ELEMS_OFFSET: i32 = 8;
pub const CLOSURE_CODE_OFFSET: i32 = 0;

/// Machine type of a value of `ty`.
pub fn value_type(ty: &Type) -> MirType {
    match ty {
        Type::Concrete(name) if name == INT => MirType::I64,
        Type::Concrete(name) if name == FLOAT => MirType::F64,
        _ if ty.is_bool() || ty.is_unit() => MirType::I8,
        _ => MirType::I64,
    }
}

/// Offset of capture `index` inside a closure cell.
pub fn capture_offset(index: usize) -> i32 {
    SLOT * (index as i32 + 1)
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldLayout {
    pub name: String,
    pub ty: Type,
    pub mir: MirType,
    pub offset: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantLayout {
    pub name: String,
    pub tag: u32,
    pub fields: Vec<FieldLayout>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnionLayout {
    pub type_name: String,
    pub variants: Vec<VariantLayout>,
    pub size: i32,
}

impl UnionLayout {
    pub fn variant(&self, name: &str) -> Option<&VariantLayout> {
        self.variants.iter().find(|v| v.name == name)
    }

    pub fn variant_by_tag(&self, tag: u32) -> Option<&VariantLayout> {
        self.variants.iter().find(|v| v.tag == tag)
    }

    /// A field every variant stores in the same slot.
    pub fn shared_field(&self, name: &str) -> Option<&FieldLayout> {
        let mut found: Option<&FieldLayout> = None;
        for variant in &self.variants {
            let field = variant.fields.iter().find(|f| f.name == name)?;
            match found {
                Some(prev) if prev.offset != field.offset => return None,
                Some(_) => {}
                None => found = Some(field),
            }
        }
        found
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordLayout {
    pub type_name: String,
    pub fields: Vec<FieldLayout>,
    pub size: i32,
}

impl RecordLayout {
    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Layout {
    Scalar(MirType),
    Union(UnionLayout),
    Record(RecordLayout),
    List { elem: Type, mir: MirType },
    Closure,
    /// Fiber, channel or process handle.
    Handle,
}

impl Layout {
    /// Storage for `field` when reading it through a value of this layout.
    pub fn field(&self, name: &str) -> Option<&FieldLayout> {
        match self {
            Layout::Record(record) => record.field(name),
            Layout::Union(union) => union.shared_field(name),
            _ => None,
        }
    }
}

/// Computes layouts once per concrete type.
pub struct LayoutPlanner<'a> {
    catalog: &'a TypeCatalog,
    cache: BTreeMap<Type, Arc<Layout>>,
}

impl<'a> LayoutPlanner<'a> {
    pub fn new(catalog: &'a TypeCatalog) -> Self {
        Self {
            catalog,
            cache: BTreeMap::new(),
        }
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    pub fn plan(&mut self, ty: &Type) -> Arc<Layout> {
        if let Some(layout) = self.cache.get(ty) {
            return layout.clone();
        }
        let layout = Arc::new(self.compute(ty));
        tracing::trace!(%ty, "layout planned");
        self.cache.insert(ty.clone(), layout.clone());
        layout
    }

    pub fn union(&mut self, ty: &Type) -> Result<UnionLayout, CodegenError> {
        match &*self.plan(ty) {
            Layout::Union(union) => Ok(union.clone()),
            _ => Err(CodegenError::UnsupportedExpression {
                detail: format!("`{ty}` is not a union type"),
            }),
        }
    }

    /// Storage of `field` on a value of type `ty`.
    pub fn field(&mut self, ty: &Type, field: &str) -> Result<FieldLayout, CodegenError> {
        self.plan(ty)
            .field(field)
            .cloned()
            .ok_or_else(|| CodegenError::FieldOnNonStruct {
                field: field.to_string(),
                ty: ty.to_string(),
            })
    }

    fn compute(&self, ty: &Type) -> Layout {
        if let Some(elem) = ty
            .element_of(osprey_types::LIST)
            .or_else(|| ty.element_of(osprey_types::ITERATOR))
        {
            return Layout::List {
                elem: elem.clone(),
                mir: value_type(elem),
            };
        }
        if ty.is_function() {
            return Layout::Closure;
        }
        if let Some(name) = ty.nominal_name()
            && matches!(
                name,
                osprey_types::FIBER | osprey_types::CHANNEL | osprey_types::PROCESS_HANDLE
            )
        {
            return Layout::Handle;
        }
        let def = match ty.nominal_name() {
            Some(name) => match self.catalog.get(name) {
                Some(def) => Some(def.clone()),
                None if name == RESULT => Some(result_def()),
                None => None,
            },
            None => None,
        };
        let Some(def) = def else {
            return Layout::Scalar(value_type(ty));
        };
        let args = ty.type_args();
        if def.is_record {
            let fields = field_layouts(&def, &def.variants[0], args, 0);
            let size = SLOT * (fields.len().max(1) as i32);
            return Layout::Record(RecordLayout {
                type_name: def.name.clone(),
                fields,
                size,
            });
        }
        let variants = def
            .variants
            .iter()
            .map(|variant| VariantLayout {
                name: variant.name.clone(),
                tag: variant.tag,
                fields: field_layouts(&def, variant, args, PAYLOAD_OFFSET),
            })
            .collect();
        Layout::Union(UnionLayout {
            type_name: def.name.clone(),
            variants,
            size: PAYLOAD_OFFSET + SLOT * def.max_fields() as i32,
        })
    }
}

fn field_layouts(def: &TypeDef, variant: &VariantDef, args: &[Type], base: i32) -> Vec<FieldLayout> {
    def.field_types(variant, args)
        .into_iter()
        .zip(&variant.fields)
        .enumerate()
        .map(|(slot, (ty, field))| FieldLayout {
            name: field.name.clone(),
            mir: value_type(&ty),
            ty,
            offset: base + SLOT * slot as i32,
        })
        .collect()
}

/// `Result<T, E>` for catalogs built without the builtin declaration.
fn result_def() -> TypeDef {
    let (ok, err) = (TypeVarId(0), TypeVarId(1));
    TypeDef {
        name: RESULT.to_string(),
        params: vec![ok, err],
        variants: vec![
            VariantDef {
                name: SUCCESS_VARIANT.to_string(),
                tag: 0,
                fields: vec![FieldDef {
                    name: SUCCESS_FIELD.to_string(),
                    ty: Type::Variable(ok),
                }],
            },
            VariantDef {
                name: ERROR_VARIANT.to_string(),
                tag: 1,
                fields: vec![FieldDef {
                    name: ERROR_FIELD.to_string(),
                    ty: Type::Variable(err),
                }],
            },
        ],
        is_record: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape_catalog() -> TypeCatalog {
        let mut catalog = TypeCatalog::new();
        catalog.insert(TypeDef {
            name: "Shape".into(),
            params: vec![],
            variants: vec![
                VariantDef {
                    name: "Circle".into(),
                    tag: 0,
                    fields: vec![FieldDef {
                        name: "radius".into(),
                        ty: Type::float(),
                    }],
                },
                VariantDef {
                    name: "Rect".into(),
                    tag: 1,
                    fields: vec![
                        FieldDef {
                            name: "width".into(),
                            ty: Type::int(),
                        },
                        FieldDef {
                            name: "height".into(),
                            ty: Type::int(),
                        },
                    ],
                },
            ],
            is_record: false,
        });
        catalog.insert(TypeDef {
            name: "Point".into(),
            params: vec![],
            variants: vec![VariantDef {
                name: "Point".into(),
                tag: 0,
                fields: vec![
                    FieldDef {
                        name: "x".into(),
                        ty: Type::int(),
                    },
                    FieldDef {
                        name: "visible".into(),
                        ty: Type::bool(),
                    },
                ],
            }],
            is_record: true,
        });
        catalog
    }

    #[test]
    fn union_payload_is_sized_to_the_largest_variant() {
        let catalog = shape_catalog();
        let mut planner = LayoutPlanner::new(&catalog);
        let union = planner.union(&Type::concrete("Shape")).expect("union");
        assert_eq!(union.size, 24);
        let rect = union.variant("Rect").expect("variant");
        assert_eq!(rect.tag, 1);
        assert_eq!(
            rect.fields.iter().map(|f| f.offset).collect::<Vec<_>>(),
            vec![8, 16]
        );
        assert_eq!(union.variant("Circle").expect("variant").fields[0].mir, MirType::F64);
    }

    #[test]
    fn records_have_no_discriminant() {
        let catalog = shape_catalog();
        let mut planner = LayoutPlanner::new(&catalog);
        let field = planner
            .field(&Type::concrete("Point"), "visible")
            .expect("field");
        assert_eq!(field.offset, 8);
        assert_eq!(field.mir, MirType::I8);
    }

    #[test]
    fn result_instantiation_substitutes_payload_types() {
        let catalog = TypeCatalog::new();
        let mut planner = LayoutPlanner::new(&catalog);
        let ty = Type::result(Type::float(), Type::string());
        let union = planner.union(&ty).expect("result is a union");
        assert_eq!(union.size, 16);
        assert_eq!(union.variant_by_tag(0).expect("success").fields[0].mir, MirType::F64);
        assert_eq!(union.variant_by_tag(1).expect("error").fields[0].mir, MirType::I64);
    }

    #[test]
    fn field_on_scalar_is_rejected_with_type_name() {
        let catalog = TypeCatalog::new();
        let mut planner = LayoutPlanner::new(&catalog);
        let err = planner.field(&Type::int(), "value").expect_err("scalar");
        insta::assert_snapshot!(err.to_string(), @"cannot access field `value` on non-struct type `Int`");
    }

    #[test]
    fn layouts_are_cached_per_type() {
        let catalog = shape_catalog();
        let mut planner = LayoutPlanner::new(&catalog);
        let first = planner.plan(&Type::concrete("Shape"));
        let second = planner.plan(&Type::concrete("Shape"));
        assert!(Arc::ptr_eq(&first, &second));
        planner.plan(&Type::list(Type::int()));
        assert_eq!(planner.cached(), 2);
    }

    #[test]
    fn scalar_machine_types() {
        assert_eq!(value_type(&Type::int()), MirType::I64);
        assert_eq!(value_type(&Type::float()), MirType::F64);
        assert_eq!(value_type(&Type::bool()), MirType::I8);
        assert_eq!(value_type(&Type::unit()), MirType::I8);
        assert_eq!(value_type(&Type::string()), MirType::I64);
        assert_eq!(value_type(&Type::fiber(Type::int())), MirType::I64);
    }
}
