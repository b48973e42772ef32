//! Type and effect declaration registries.
//!
//! Union and record declarations become [`TypeDef`]s in the [`TypeCatalog`];
//! effect declarations become [`EffectSignature`]s. Neither produces code.

use std::collections::BTreeMap;

use osprey_ast::{EffectDecl, Span, TypeDecl, TypeExpr};
use osprey_hir::{FieldDef, TypeCatalog, TypeDef, VariantDef};
use osprey_types::{
    ERROR_FIELD, ERROR_VARIANT, RESULT, SUCCESS_FIELD, SUCCESS_VARIANT, Type,
    builtin_type_constructor_arity,
};

use crate::{TypeError, VarSupply};

#[derive(Debug, Clone, PartialEq)]
pub struct OperationSig {
    pub name: String,
    pub params: Vec<Type>,
    pub ret: Type,
}

/// Ordered operations of one declared effect.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectSignature {
    pub name: String,
    pub operations: Vec<OperationSig>,
}

impl EffectSignature {
    pub fn operation(&self, name: &str) -> Option<&OperationSig> {
        self.operations.iter().find(|op| op.name == name)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EffectRegistry {
    effects: BTreeMap<String, EffectSignature>,
}

impl EffectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&EffectSignature> {
        self.effects.get(name)
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn register(&mut self, decl: &EffectDecl, types: &TypeCatalog) -> Result<(), TypeError> {
        let scope = BTreeMap::new();
        let operations = decl
            .operations
            .iter()
            .map(|op| {
                Ok(OperationSig {
                    name: op.name.clone(),
                    params: op
                        .params
                        .iter()
                        .map(|p| resolve_type_expr(p, types, &scope, decl.span))
                        .collect::<Result<_, TypeError>>()?,
                    ret: resolve_type_expr(&op.ret, types, &scope, decl.span)?,
                })
            })
            .collect::<Result<_, TypeError>>()?;
        tracing::trace!(effect = %decl.name, "registered effect");
        self.effects.insert(
            decl.name.clone(),
            EffectSignature {
                name: decl.name.clone(),
                operations,
            },
        );
        Ok(())
    }
}

/// `Result<T, E>` with fresh parameters: `Success { value: T }` is tag 0 and
/// `Error { message: E }` is tag 1.
pub fn builtin_result_def(supply: &mut VarSupply) -> TypeDef {
    let ok = supply.fresh();
    let err = supply.fresh();
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

/// Register a group of type declarations that may refer to each other.
///
/// Names are entered first so field types can mention any type in the
/// group, including the one being declared.
pub fn register_type_decls(
    decls: &[&TypeDecl],
    catalog: &mut TypeCatalog,
    supply: &mut VarSupply,
) -> Result<(), TypeError> {
    let mut params_of = BTreeMap::new();
    for decl in decls {
        let params: Vec<_> = decl.type_params.iter().map(|_| supply.fresh()).collect();
        catalog.insert(TypeDef {
            name: decl.name.clone(),
            params: params.clone(),
            variants: Vec::new(),
            is_record: decl.is_record(),
        });
        params_of.insert(decl.name.clone(), params);
    }

    for decl in decls {
        let params = params_of.get(&decl.name).cloned().unwrap_or_default();
        let scope: BTreeMap<String, Type> = decl
            .type_params
            .iter()
            .cloned()
            .zip(params.iter().map(|v| Type::Variable(*v)))
            .collect();
        let mut variants = Vec::with_capacity(decl.variants.len());
        for (tag, variant) in decl.variants.iter().enumerate() {
            let fields = variant
                .fields
                .iter()
                .map(|f| {
                    Ok(FieldDef {
                        name: f.name.clone(),
                        ty: resolve_type_expr(&f.ty, catalog, &scope, decl.span)?,
                    })
                })
                .collect::<Result<_, TypeError>>()?;
            variants.push(VariantDef {
                name: variant.name.clone(),
                tag: u32::try_from(tag).unwrap_or(u32::MAX),
                fields,
            });
        }
        tracing::trace!(type_name = %decl.name, variants = variants.len(), "registered type");
        catalog.insert(TypeDef {
            name: decl.name.clone(),
            params,
            variants,
            is_record: decl.is_record(),
        });
    }
    Ok(())
}

/// Resolve a written type. `scope` maps type parameter names in effect.
pub fn resolve_type_expr(
    expr: &TypeExpr,
    catalog: &TypeCatalog,
    scope: &BTreeMap<String, Type>,
    span: Span,
) -> Result<Type, TypeError> {
    match expr {
        TypeExpr::Named(name) => {
            if let Some(ty) = scope.get(name) {
                return Ok(ty.clone());
            }
            let arity = builtin_type_constructor_arity(name)
                .or_else(|| catalog.get(name).map(|def| def.params.len()));
            match arity {
                Some(0) => Ok(Type::concrete(name.clone())),
                _ => Err(TypeError::UnknownType {
                    name: name.clone(),
                    span,
                }),
            }
        }
        TypeExpr::Generic(name, args) => {
            let arity = builtin_type_constructor_arity(name)
                .or_else(|| catalog.get(name).map(|def| def.params.len()));
            if arity != Some(args.len()) || args.is_empty() {
                return Err(TypeError::UnknownType {
                    name: name.clone(),
                    span,
                });
            }
            let args = args
                .iter()
                .map(|a| resolve_type_expr(a, catalog, scope, span))
                .collect::<Result<_, _>>()?;
            Ok(Type::generic(name.clone(), args))
        }
        TypeExpr::Function(params, ret) => Ok(Type::function(
            params
                .iter()
                .map(|p| resolve_type_expr(p, catalog, scope, span))
                .collect::<Result<_, _>>()?,
            resolve_type_expr(ret, catalog, scope, span)?,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use osprey_ast::build;

    fn type_decl(stmt: osprey_ast::Stmt) -> TypeDecl {
        match stmt.node {
            osprey_ast::StmtKind::Type(decl) => decl,
            other => panic!("expected type declaration, got {other:?}"),
        }
    }

    #[test]
    fn recursive_union_resolves_its_own_name() {
        let decl = type_decl(build::union_stmt(
            "IntList",
            &[],
            vec![
                ("Nil", vec![]),
                (
                    "Cons",
                    vec![
                        ("head", TypeExpr::named("Int")),
                        ("tail", TypeExpr::named("IntList")),
                    ],
                ),
            ],
        ));
        let mut catalog = TypeCatalog::new();
        let mut supply = VarSupply::new();
        register_type_decls(&[&decl], &mut catalog, &mut supply).expect("register");
        let (def, cons) = catalog.lookup_variant("Cons").expect("Cons registered");
        assert_eq!(def.name, "IntList");
        assert_eq!(cons.tag, 1);
        assert_eq!(cons.fields[1].ty, Type::concrete("IntList"));
    }

    #[test]
    fn generic_union_fields_mention_parameters() {
        let decl = type_decl(build::union_stmt(
            "Maybe",
            &["T"],
            vec![("Just", vec![("item", TypeExpr::named("T"))]), ("Nothing", vec![])],
        ));
        let mut catalog = TypeCatalog::new();
        let mut supply = VarSupply::new();
        register_type_decls(&[&decl], &mut catalog, &mut supply).expect("register");
        let def = catalog.get("Maybe").expect("Maybe registered");
        let just = def.variant("Just").expect("Just");
        assert_eq!(
            def.field_types(just, &[Type::string()]),
            vec![Type::string()]
        );
    }

    #[test]
    fn unknown_field_type_is_rejected() {
        let decl = type_decl(build::record_stmt(
            "Point",
            vec![("x", TypeExpr::named("Nope"))],
        ));
        let err = register_type_decls(&[&decl], &mut TypeCatalog::new(), &mut VarSupply::new())
            .unwrap_err();
        assert!(matches!(err, TypeError::UnknownType { ref name, .. } if name == "Nope"));
    }

    #[test]
    fn effect_operations_keep_declaration_order() {
        let decl = match build::effect_stmt(
            "Logger",
            vec![
                ("log", vec![TypeExpr::named("String")], TypeExpr::named("Unit")),
                ("level", vec![], TypeExpr::named("Int")),
            ],
        )
        .node
        {
            osprey_ast::StmtKind::Effect(decl) => decl,
            other => panic!("expected effect, got {other:?}"),
        };
        let mut registry = EffectRegistry::new();
        registry.register(&decl, &TypeCatalog::new()).expect("register");
        let sig = registry.get("Logger").expect("Logger");
        let names: Vec<_> = sig.operations.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["log", "level"]);
        assert_eq!(sig.operation("level").map(|o| o.ret.clone()), Some(Type::int()));
    }

    #[test]
    fn result_def_has_success_then_error() {
        let def = builtin_result_def(&mut VarSupply::new());
        assert_eq!(def.variant("Success").map(|v| v.tag), Some(0));
        assert_eq!(def.variant("Error").map(|v| v.tag), Some(1));
        assert_eq!(def.max_fields(), 1);
    }
}
