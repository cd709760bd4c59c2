use crate::error::{Error, Result};
use crate::program::{
    Field, NamedDef, NamedType, Primitive, Program, TypeId, TypeKind, Variant, VariantData,
};
use crate::route_tree::ParamKind;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Prefix of component references.
pub const COMPONENT_REF_PREFIX: &str = "#/components/schemas/";

/// OpenAPI 3.1 schema object, or a `$ref` to a component
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    #[serde(rename = "$ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<BTreeMap<String, Schema>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Schema>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix_items: Option<Vec<Schema>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_properties: Option<Box<Schema>>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub one_of: Option<Vec<Schema>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_of: Option<Vec<Schema>>,
}

impl Schema {
    pub fn of_type(schema_type: &str) -> Self {
        Self {
            schema_type: Some(schema_type.to_string()),
            ..Self::default()
        }
    }

    pub fn with_format(schema_type: &str, format: &str) -> Self {
        Self {
            format: Some(format.to_string()),
            ..Self::of_type(schema_type)
        }
    }

    /// A `$ref` to the component called `name`.
    pub fn component_ref(name: &str) -> Self {
        Self {
            reference: Some(format!("{}{}", COMPONENT_REF_PREFIX, name)),
            ..Self::default()
        }
    }

    /// A schema that only describes what could not be converted.
    pub fn described(description: String) -> Self {
        Self {
            description: Some(description),
            ..Self::default()
        }
    }

    pub fn is_ref(&self) -> bool {
        self.reference.is_some()
    }
}

/// Schema of a path parameter of the given kind.
pub fn param_kind_schema(kind: ParamKind) -> Schema {
    match kind {
        ParamKind::String => Schema::of_type("string"),
        ParamKind::Integer => Schema::with_format("integer", "int64"),
        ParamKind::Number => Schema::with_format("number", "double"),
        ParamKind::Uuid => Schema::with_format("string", "uuid"),
    }
}

/// Schema generator: converts program types into schemas and reusable components.
///
/// Every generated schema is cached by [`TypeId`]. Named composite types reserve their
/// component slot before their fields are visited, so a recursive type finds its own
/// reference in the cache and generation terminates.
pub struct SchemaGenerator<'p> {
    program: &'p Program,
    cache: HashMap<TypeId, Schema>,
    components: BTreeMap<String, Schema>,
    /// Which type owns each component name
    owners: HashMap<String, TypeId>,
}

impl<'p> SchemaGenerator<'p> {
    pub fn new(program: &'p Program) -> Self {
        debug!("Initializing SchemaGenerator");
        Self {
            program,
            cache: HashMap::new(),
            components: BTreeMap::new(),
            owners: HashMap::new(),
        }
    }

    /// Generates the schema for `ty`. Repeated calls return the cached schema.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ComponentCollision`] when two distinct types need the same component
    /// name.
    pub fn generate(&mut self, ty: TypeId) -> Result<Schema> {
        if let Some(schema) = self.cache.get(&ty) {
            return Ok(schema.clone());
        }
        let program = self.program;
        let types = program.types();
        let schema = match types.kind(ty) {
            TypeKind::Primitive(primitive) => primitive_schema(*primitive),
            TypeKind::Pointer(inner) | TypeKind::Optional(inner) => self.generate(*inner)?,
            TypeKind::Sequence(inner) => Schema {
                items: Some(Box::new(self.generate(*inner)?)),
                ..Schema::of_type("array")
            },
            TypeKind::Map { value, .. } => Schema {
                additional_properties: Some(Box::new(self.generate(*value)?)),
                ..Schema::of_type("object")
            },
            TypeKind::Tuple(elems) if elems.is_empty() => Schema::of_type("null"),
            TypeKind::Tuple(elems) => {
                let elems = elems.clone();
                let mut prefix_items = Vec::with_capacity(elems.len());
                for elem in elems {
                    prefix_items.push(self.generate(elem)?);
                }
                Schema {
                    prefix_items: Some(prefix_items),
                    ..Schema::of_type("array")
                }
            }
            TypeKind::Named(named) => self.named_schema(ty, named)?,
            TypeKind::Param(name) => Schema::described(format!("generic parameter {}", name)),
            TypeKind::Unknown(description) => {
                Schema::described(format!("unsupported type: {}", description))
            }
        };
        self.cache.insert(ty, schema.clone());
        Ok(schema)
    }

    fn named_schema(&mut self, ty: TypeId, named: &'p NamedType) -> Result<Schema> {
        match &named.def {
            // Transparent wrappers produce no component of their own
            NamedDef::Alias(inner) | NamedDef::Newtype(inner) => self.generate(*inner),
            NamedDef::Struct(_) | NamedDef::Enum(_) => {
                let name = self.component_name(ty);
                self.reserve(&name, ty)?;
                let reference = Schema::component_ref(&name);
                self.cache.insert(ty, reference.clone());
                debug!("Generating component {} for {}", name, named.path);
                let schema = match &named.def {
                    NamedDef::Struct(fields) => self.fields_schema(fields)?,
                    NamedDef::Enum(variants) => self.enum_schema(variants)?,
                    _ => Schema::default(),
                };
                self.components.insert(name, schema);
                Ok(reference)
            }
            NamedDef::External => Ok(external_schema(named)),
            NamedDef::Pending => Ok(Schema::described(format!(
                "unresolved declaration of {}",
                named.path
            ))),
        }
    }

    /// Claims a component name for `ty` and inserts the placeholder.
    fn reserve(&mut self, name: &str, ty: TypeId) -> Result<()> {
        if let Some(existing) = self.owners.get(name) {
            if *existing != ty {
                return Err(Error::ComponentCollision {
                    name: name.to_string(),
                    existing: self.describe(*existing),
                    incoming: self.describe(ty),
                });
            }
        }
        self.owners.insert(name.to_string(), ty);
        self.components.insert(name.to_string(), Schema::default());
        Ok(())
    }

    /// Object schema of named fields; `#[serde(flatten)]` fields become `allOf` members.
    fn fields_schema(&mut self, fields: &[Field]) -> Result<Schema> {
        let program = self.program;
        let types = program.types();
        let mut properties = BTreeMap::new();
        let mut required = Vec::new();
        let mut flattened = Vec::new();

        for field in fields.iter().filter(|f| !f.skip) {
            let optional = matches!(types.kind(types.strip_pointers(field.ty)), TypeKind::Optional(_));
            let schema = self.generate(field.ty)?;
            if field.flatten {
                flattened.push(schema);
                continue;
            }
            if !optional && !field.has_default {
                required.push(field.serialized_name.clone());
            }
            properties.insert(field.serialized_name.clone(), schema);
        }

        let own = Schema {
            properties: Some(properties),
            required: (!required.is_empty()).then_some(required),
            ..Schema::of_type("object")
        };
        if flattened.is_empty() {
            return Ok(own);
        }
        flattened.push(own);
        Ok(Schema {
            all_of: Some(flattened),
            ..Schema::default()
        })
    }

    /// Unit-only enums are string enums; enums with data variants are a `oneOf` of the unit
    /// names and one single-key object per data variant, keyed by the variant name.
    fn enum_schema(&mut self, variants: &[Variant]) -> Result<Schema> {
        let units: Vec<String> = variants
            .iter()
            .filter(|v| v.is_unit())
            .map(|v| v.serialized_name.clone())
            .collect();
        let unit_schema = Schema {
            enum_values: Some(units.clone()),
            ..Schema::of_type("string")
        };
        if units.len() == variants.len() {
            return Ok(unit_schema);
        }
        let mut one_of = Vec::new();
        if !units.is_empty() {
            one_of.push(unit_schema);
        }
        for variant in variants.iter().filter(|v| !v.is_unit()) {
            let payload = match &variant.data {
                VariantData::Unit => Schema::default(),
                VariantData::Newtype(ty) => self.generate(*ty)?,
                VariantData::Tuple(elems) => {
                    let mut prefix_items = Vec::with_capacity(elems.len());
                    for elem in elems {
                        prefix_items.push(self.generate(*elem)?);
                    }
                    Schema {
                        prefix_items: Some(prefix_items),
                        ..Schema::of_type("array")
                    }
                }
                VariantData::Struct(fields) => self.fields_schema(fields)?,
            };
            let mut properties = BTreeMap::new();
            properties.insert(variant.serialized_name.clone(), payload);
            one_of.push(Schema {
                properties: Some(properties),
                required: Some(vec![variant.serialized_name.clone()]),
                ..Schema::of_type("object")
            });
        }
        Ok(Schema {
            one_of: Some(one_of),
            ..Schema::default()
        })
    }

    /// Component name of a named type: its declared name, with generic arguments appended
    /// (`Page<User>` becomes `Page_User`).
    fn component_name(&self, ty: TypeId) -> String {
        let types = self.program.types();
        match types.kind(ty) {
            TypeKind::Named(named) => {
                let mut name = named.name.clone();
                for arg in &named.args {
                    name.push('_');
                    name.push_str(&self.component_name(*arg));
                }
                name
            }
            TypeKind::Primitive(p) => p.rust_name().to_string(),
            TypeKind::Pointer(inner) | TypeKind::Optional(inner) => self.component_name(*inner),
            TypeKind::Sequence(inner) => format!("{}List", self.component_name(*inner)),
            TypeKind::Map { value, .. } => format!("{}Map", self.component_name(*value)),
            _ => "Value".to_string(),
        }
    }

    fn describe(&self, ty: TypeId) -> String {
        let types = self.program.types();
        let display = types.display(ty);
        match types.named(ty).and_then(|n| n.origin.as_ref()) {
            Some(origin) => format!("{} ({})", display, origin),
            None => display,
        }
    }

    pub fn components(&self) -> &BTreeMap<String, Schema> {
        &self.components
    }

    pub fn into_components(self) -> BTreeMap<String, Schema> {
        self.components
    }
}

fn primitive_schema(primitive: Primitive) -> Schema {
    match primitive {
        Primitive::Str | Primitive::Char => Schema::of_type("string"),
        Primitive::Bool => Schema::of_type("boolean"),
        Primitive::I8 | Primitive::I16 | Primitive::I32 | Primitive::U8 | Primitive::U16 => {
            Schema::with_format("integer", "int32")
        }
        Primitive::F32 | Primitive::F64 => Schema::with_format("number", "double"),
        _ => Schema::with_format("integer", "int64"),
    }
}

/// Well-known types declared outside the analysed sources.
fn external_schema(named: &NamedType) -> Schema {
    match named.name.as_str() {
        "Uuid" => Schema::with_format("string", "uuid"),
        "DateTime" | "NaiveDateTime" | "OffsetDateTime" | "SystemTime" => {
            Schema::with_format("string", "date-time")
        }
        "NaiveDate" | "Date" => Schema::with_format("string", "date"),
        "Decimal" => Schema::with_format("string", "decimal"),
        "Url" => Schema::with_format("string", "uri"),
        "Value" => Schema::default(),
        _ => Schema::described(format!("external type {}", named.path)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::lower_sources;
    use pretty_assertions::assert_eq;

    fn return_type(program: &Program, func: &str) -> TypeId {
        program
            .function(program.function_named(func).unwrap())
            .return_type
            .unwrap()
    }

    #[test]
    fn test_primitives() {
        let program = lower_sources(&[(
            "src/lib.rs",
            r#"
            fn a() -> String { todo!() }
            fn b() -> u64 { todo!() }
            fn c() -> f32 { todo!() }
            fn d() -> bool { todo!() }
            fn e() -> i16 { todo!() }
            "#,
        )]);
        let mut generator = SchemaGenerator::new(&program);
        let mut schema = |f: &str| generator.generate(return_type(&program, f)).unwrap();
        assert_eq!(schema("a"), Schema::of_type("string"));
        assert_eq!(schema("b"), Schema::with_format("integer", "int64"));
        assert_eq!(schema("c"), Schema::with_format("number", "double"));
        assert_eq!(schema("d"), Schema::of_type("boolean"));
        assert_eq!(schema("e"), Schema::with_format("integer", "int32"));
    }

    #[test]
    fn test_containers_and_aliases() {
        let program = lower_sources(&[(
            "src/lib.rs",
            r#"
            use std::collections::HashMap;
            pub type Name = String;
            pub struct UserId(u64);
            fn list() -> Vec<Option<Name>> { todo!() }
            fn index() -> HashMap<String, UserId> { todo!() }
            fn boxed() -> Box<Name> { todo!() }
            "#,
        )]);
        let mut generator = SchemaGenerator::new(&program);

        let list = generator.generate(return_type(&program, "list")).unwrap();
        assert_eq!(list.schema_type.as_deref(), Some("array"));
        assert_eq!(list.items.as_deref(), Some(&Schema::of_type("string")));

        let index = generator.generate(return_type(&program, "index")).unwrap();
        assert_eq!(index.schema_type.as_deref(), Some("object"));
        assert_eq!(
            index.additional_properties.as_deref(),
            Some(&Schema::with_format("integer", "int64"))
        );

        let boxed = generator.generate(return_type(&program, "boxed")).unwrap();
        assert_eq!(boxed, Schema::of_type("string"));
        assert!(generator.components().is_empty());
    }

    #[test]
    fn test_struct_component_fields() {
        let program = lower_sources(&[(
            "src/models.rs",
            r#"
            #[serde(rename_all = "camelCase")]
            pub struct User {
                pub user_id: u64,
                pub nick_name: Option<String>,
                #[serde(skip)]
                pub password: String,
                #[serde(default)]
                pub active: bool,
            }
            pub fn get() -> User { todo!() }
            "#,
        )]);
        let mut generator = SchemaGenerator::new(&program);
        let schema = generator.generate(return_type(&program, "get")).unwrap();
        assert_eq!(schema, Schema::component_ref("User"));

        let user = &generator.components()["User"];
        let properties = user.properties.as_ref().unwrap();
        let names: Vec<&str> = properties.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["active", "nickName", "userId"]);
        assert_eq!(user.required, Some(vec!["userId".to_string()]));
    }

    #[test]
    fn test_self_referential_type_terminates_with_ref() {
        let program = lower_sources(&[(
            "src/models.rs",
            r#"
            pub struct Category {
                pub name: String,
                pub children: Vec<Category>,
                pub parent: Option<Box<Category>>,
            }
            pub fn tree() -> Category { todo!() }
            "#,
        )]);
        let mut generator = SchemaGenerator::new(&program);
        let schema = generator.generate(return_type(&program, "tree")).unwrap();
        assert_eq!(schema, Schema::component_ref("Category"));

        let category = &generator.components()["Category"];
        let properties = category.properties.as_ref().unwrap();
        assert_eq!(
            properties["children"].items.as_deref(),
            Some(&Schema::component_ref("Category"))
        );
        assert_eq!(properties["parent"], Schema::component_ref("Category"));
    }

    #[test]
    fn test_generation_is_idempotent() {
        let program = lower_sources(&[(
            "src/models.rs",
            r#"
            pub struct Item { pub id: u32 }
            pub fn one() -> Item { todo!() }
            "#,
        )]);
        let mut generator = SchemaGenerator::new(&program);
        let ty = return_type(&program, "one");
        let first = generator.generate(ty).unwrap();
        let second = generator.generate(ty).unwrap();
        assert_eq!(first, second);
        assert_eq!(generator.components().len(), 1);
    }

    #[test]
    fn test_generic_component_names_and_enums() {
        let program = lower_sources(&[(
            "src/models.rs",
            r#"
            pub struct Page<T> { pub items: Vec<T>, pub total: u64 }
            pub struct User { pub id: u64 }
            #[serde(rename_all = "snake_case")]
            pub enum Status { Active, OnHold }
            pub enum Event { Started, Moved(u32) }
            pub fn users() -> Page<User> { todo!() }
            pub fn status() -> Status { todo!() }
            pub fn event() -> Event { todo!() }
            "#,
        )]);
        let mut generator = SchemaGenerator::new(&program);
        let page = generator.generate(return_type(&program, "users")).unwrap();
        assert_eq!(page, Schema::component_ref("Page_User"));
        let items = &generator.components()["Page_User"].properties.as_ref().unwrap()["items"];
        assert_eq!(items.items.as_deref(), Some(&Schema::component_ref("User")));

        generator.generate(return_type(&program, "status")).unwrap();
        assert_eq!(
            generator.components()["Status"].enum_values,
            Some(vec!["active".to_string(), "on_hold".to_string()])
        );

        generator.generate(return_type(&program, "event")).unwrap();
        let event = &generator.components()["Event"];
        assert_eq!(event.one_of.as_ref().map(Vec::len), Some(2));
    }

    #[test]
    fn test_enum_variant_payloads() {
        let program = lower_sources(&[(
            "src/models.rs",
            r#"
            pub struct Point { pub x: i64 }
            pub enum Shape {
                Empty,
                Moved(u32),
                Pair(String, Point),
                Sized { width: f64, label: Option<String> },
            }
            pub fn shape() -> Shape { todo!() }
            "#,
        )]);
        let mut generator = SchemaGenerator::new(&program);
        generator.generate(return_type(&program, "shape")).unwrap();
        let variants = generator.components()["Shape"].one_of.clone().unwrap();
        assert_eq!(variants.len(), 4);
        assert_eq!(variants[0].enum_values, Some(vec!["Empty".to_string()]));

        let payload = |index: usize, name: &str| {
            variants[index].properties.as_ref().unwrap()[name].clone()
        };
        assert_eq!(payload(1, "Moved"), Schema::with_format("integer", "int64"));
        assert_eq!(
            payload(2, "Pair").prefix_items,
            Some(vec![Schema::of_type("string"), Schema::component_ref("Point")])
        );
        let sized = payload(3, "Sized");
        assert_eq!(sized.required, Some(vec!["width".to_string()]));
        assert_eq!(
            sized.properties.unwrap()["width"],
            Schema::with_format("number", "double")
        );
        assert!(generator.components().contains_key("Point"));
    }

    #[test]
    fn test_same_name_from_two_declarations_collides() {
        let program = lower_sources(&[
            (
                "src/a.rs",
                "pub struct Record { pub id: u64 } pub fn first() -> Record { todo!() }",
            ),
            (
                "src/b.rs",
                "pub struct Record { pub name: String } pub fn second() -> Record { todo!() }",
            ),
        ]);
        let mut generator = SchemaGenerator::new(&program);
        generator.generate(return_type(&program, "first")).unwrap();
        let err = generator
            .generate(return_type(&program, "second"))
            .unwrap_err();
        match err {
            Error::ComponentCollision { name, .. } => assert_eq!(name, "Record"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_well_known_external_types() {
        let program = lower_sources(&[(
            "src/lib.rs",
            r#"
            use uuid::Uuid;
            use chrono::{DateTime, Utc};
            fn id() -> Uuid { todo!() }
            fn at() -> DateTime<Utc> { todo!() }
            fn other() -> sqlx::PgPool { todo!() }
            "#,
        )]);
        let mut generator = SchemaGenerator::new(&program);
        assert_eq!(
            generator.generate(return_type(&program, "id")).unwrap(),
            Schema::with_format("string", "uuid")
        );
        assert_eq!(
            generator.generate(return_type(&program, "at")).unwrap(),
            Schema::with_format("string", "date-time")
        );
        let other = generator.generate(return_type(&program, "other")).unwrap();
        assert_eq!(other.description.as_deref(), Some("external type sqlx::PgPool"));
    }
}
