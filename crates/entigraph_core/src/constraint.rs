//! Per-property rule evaluation.
//!
//! Rules are only evaluated at commit, and only for properties the
//! transaction changed, so an entity may pass through invalid intermediate
//! states while it is being built. Absence is never a rule violation; it is
//! reported separately as a missing required field.

use crate::entity::{EntityId, EntityRecord, Value};
use crate::error::{CoreError, CoreResult};
use crate::schema::{Constraint, PropertyDefinition, PropertyKind, SchemaRegistry, TypeInfo};
use std::collections::BTreeSet;

/// Evaluates property rules against a registered schema.
#[derive(Debug, Clone, Copy)]
pub struct Validator<'a> {
    schema: &'a SchemaRegistry,
}

impl<'a> Validator<'a> {
    /// Creates a validator for `schema`.
    #[must_use]
    pub fn new(schema: &'a SchemaRegistry) -> Self {
        Self { schema }
    }

    /// Checks `value` against every rule on `type_name.property`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConstraintViolation`] naming the first failing
    /// rule, or a lookup error if the type or property is not declared.
    pub fn validate(
        &self,
        type_name: &str,
        entity_id: EntityId,
        property: &str,
        value: &Value,
    ) -> CoreResult<()> {
        let ty = self.schema.describe(type_name)?;
        let def = ty
            .property_def(property)
            .ok_or_else(|| CoreError::unknown_field(type_name, property))?;
        self.check_value(def, value)
            .map_err(|rule| violation(type_name, entity_id, property, rule, value))
    }

    /// Validates a touched entity: rules on `changed` properties (all of them
    /// when `None`), then required-ness of every required property.
    pub(crate) fn check_entity(
        &self,
        info: &TypeInfo,
        entity_id: EntityId,
        record: &EntityRecord,
        changed: Option<&BTreeSet<String>>,
    ) -> CoreResult<()> {
        let type_name = info.def.name();
        for (property, value) in &record.properties {
            if changed.is_some_and(|c| !c.contains(property)) {
                continue;
            }
            let def = info
                .def
                .property_def(property)
                .ok_or_else(|| CoreError::unknown_field(type_name, property.as_str()))?;
            self.check_value(def, value)
                .map_err(|rule| violation(type_name, entity_id, property, rule, value))?;
        }

        for def in info.def.properties().iter().filter(|p| p.required) {
            if !record.properties.contains_key(&def.name) {
                return Err(CoreError::RequiredField {
                    entity_type: type_name.to_string(),
                    entity_id,
                    field: def.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Returns the rendered failing rule, if any.
    fn check_value(&self, def: &PropertyDefinition, value: &Value) -> Result<(), String> {
        match (&def.kind, value) {
            (PropertyKind::String, Value::Text(_)) | (PropertyKind::Integer, Value::Integer(_)) => {}
            (PropertyKind::EnumRef(target), Value::Text(key)) => {
                let known = self
                    .schema
                    .describe(target)
                    .ok()
                    .and_then(|ty| ty.members())
                    .is_some_and(|members| members.iter().any(|m| &m.key == key));
                if !known {
                    return Err(format!("member of {target}"));
                }
            }
            (kind, _) => return Err(format!("kind({kind})")),
        }

        for constraint in &def.constraints {
            if !self.satisfies(constraint, value) {
                return Err(constraint.to_string());
            }
        }
        Ok(())
    }

    fn satisfies(&self, constraint: &Constraint, value: &Value) -> bool {
        match (constraint, value) {
            (Constraint::Length { min, max }, Value::Text(s)) => {
                let len = s.chars().count();
                *min <= len && len <= *max
            }
            (Constraint::ContainsNone(forbidden), Value::Text(s)) => {
                !s.chars().any(|c| forbidden.contains(c))
            }
            (Constraint::Regex(source), Value::Text(s)) => self
                .schema
                .pattern(source)
                .is_some_and(|re| re.is_match(s)),
            (Constraint::Min(bound), Value::Integer(n)) => n >= bound,
            (Constraint::Max(bound), Value::Integer(n)) => n <= bound,
            // registration rejects rules on the wrong kind
            _ => true,
        }
    }
}

fn violation(
    entity_type: &str,
    entity_id: EntityId,
    property: &str,
    rule: String,
    value: &Value,
) -> CoreError {
    CoreError::ConstraintViolation {
        entity_type: entity_type.to_string(),
        entity_id,
        property: property.to_string(),
        rule,
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EntityType, EnumMember};
    use proptest::prelude::*;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::register(vec![
            EntityType::new("Author")
                .property(
                    PropertyDefinition::string("name")
                        .required()
                        .constraint(Constraint::contains_none("?!")),
                )
                .property(
                    PropertyDefinition::string("countryOfBirth")
                        .constraint(Constraint::length(3, 56))
                        .constraint(Constraint::regex("[A-Za-z.,]+")),
                )
                .property(
                    PropertyDefinition::integer("yearOfBirth")
                        .required()
                        .constraint(Constraint::max(2019)),
                )
                .property(PropertyDefinition::integer("yearOfDeath").constraint(Constraint::min(0)))
                .property(PropertyDefinition::enum_ref("favouriteGenre", "Genre")),
            EntityType::enumeration("Genre", [EnumMember::new("FANTASY")]),
        ])
        .unwrap()
    }

    fn rule_of(result: CoreResult<()>) -> String {
        match result {
            Err(CoreError::ConstraintViolation { rule, .. }) => rule,
            other => panic!("expected violation, got {other:?}"),
        }
    }

    #[test]
    fn length_bounds_are_inclusive() {
        let schema = registry();
        let v = Validator::new(&schema);
        let id = EntityId::new(1);
        assert!(v.validate("Author", id, "countryOfBirth", &"USA".into()).is_ok());
        assert!(v.validate("Author", id, "countryOfBirth", &"A".repeat(56).into()).is_ok());
        assert_eq!(
            rule_of(v.validate("Author", id, "countryOfBirth", &"UK".into())),
            "length(3..=56)"
        );
        assert!(v.validate("Author", id, "countryOfBirth", &"A".repeat(57).into()).is_err());
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        let schema = SchemaRegistry::register(vec![EntityType::new("Place")
            .property(PropertyDefinition::string("name").constraint(Constraint::length(3, 56)))])
        .unwrap();
        let v = Validator::new(&schema);
        let id = EntityId::new(1);
        // two characters, four bytes
        assert_eq!(rule_of(v.validate("Place", id, "name", &"ëë".into())), "length(3..=56)");
        // three characters, six bytes
        assert!(v.validate("Place", id, "name", &"ëëë".into()).is_ok());
        // 56 characters, 112 bytes
        assert!(v.validate("Place", id, "name", &"ë".repeat(56).into()).is_ok());
    }

    #[test]
    fn all_rules_must_pass() {
        let schema = registry();
        let v = Validator::new(&schema);
        assert_eq!(
            rule_of(v.validate("Author", EntityId::new(1), "countryOfBirth", &"New Zealand".into())),
            "regex([A-Za-z.,]+)"
        );
    }

    #[test]
    fn contains_none_and_numeric_bounds() {
        let schema = registry();
        let v = Validator::new(&schema);
        let id = EntityId::new(2);
        assert!(v.validate("Author", id, "name", &"George R. R. Martin".into()).is_ok());
        assert_eq!(rule_of(v.validate("Author", id, "name", &"Who?".into())), "containsNone(\"?!\")");
        assert!(v.validate("Author", id, "yearOfBirth", &2019.into()).is_ok());
        assert_eq!(rule_of(v.validate("Author", id, "yearOfBirth", &2020.into())), "max(2019)");
        assert_eq!(rule_of(v.validate("Author", id, "yearOfDeath", &(-1).into())), "min(0)");
    }

    #[test]
    fn kind_and_enum_membership() {
        let schema = registry();
        let v = Validator::new(&schema);
        let id = EntityId::new(3);
        assert_eq!(rule_of(v.validate("Author", id, "yearOfBirth", &"1816".into())), "kind(integer)");
        assert!(v.validate("Author", id, "favouriteGenre", &"FANTASY".into()).is_ok());
        assert_eq!(
            rule_of(v.validate("Author", id, "favouriteGenre", &"HORROR".into())),
            "member of Genre"
        );
    }

    #[test]
    fn violation_names_entity_and_value() {
        let schema = registry();
        let err = Validator::new(&schema)
            .validate("Author", EntityId::new(9), "countryOfBirth", &"UK".into())
            .unwrap_err();
        match err {
            CoreError::ConstraintViolation { entity_type, entity_id, property, value, .. } => {
                assert_eq!(entity_type, "Author");
                assert_eq!(entity_id, EntityId::new(9));
                assert_eq!(property, "countryOfBirth");
                assert_eq!(value, "\"UK\"");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_property() {
        let schema = registry();
        assert!(matches!(
            Validator::new(&schema).validate("Author", EntityId::new(1), "email", &"x".into()),
            Err(CoreError::UnknownField { .. })
        ));
    }

    #[test]
    fn entity_check_skips_unchanged_and_requires_fields() {
        let schema = registry();
        let v = Validator::new(&schema);
        let info = schema.info("Author").unwrap();
        let id = EntityId::new(4);

        let mut record = EntityRecord::new(info.id);
        record.properties.insert("name".into(), "Charlotte Brontë".into());
        record.properties.insert("countryOfBirth".into(), "UK".into());
        let err = v.check_entity(info, id, &record, Some(&BTreeSet::new())).unwrap_err();
        assert!(matches!(err, CoreError::RequiredField { ref field, .. } if field == "yearOfBirth"));

        record.properties.insert("yearOfBirth".into(), 1816.into());
        // the bad country is only reported when it changed
        assert!(v.check_entity(info, id, &record, Some(&BTreeSet::new())).is_ok());
        let changed: BTreeSet<String> = ["countryOfBirth".to_string()].into();
        assert!(v.check_entity(info, id, &record, Some(&changed)).is_err());
        assert!(v.check_entity(info, id, &record, None).is_err());
    }

    proptest! {
        #[test]
        fn length_rule_matches_char_count(s in "[a-zëø]{0,80}") {
            let schema = SchemaRegistry::register(vec![EntityType::new("T")
                .property(PropertyDefinition::string("p").constraint(Constraint::length(3, 56)))])
                .unwrap();
            let ok = Validator::new(&schema)
                .validate("T", EntityId::new(1), "p", &Value::from(s.as_str()))
                .is_ok();
            prop_assert_eq!(ok, (3..=56).contains(&s.chars().count()));
        }

        #[test]
        fn max_rule_is_inclusive(n in -5000i64..5000) {
            let schema = registry();
            let ok = Validator::new(&schema)
                .validate("Author", EntityId::new(1), "yearOfBirth", &Value::from(n))
                .is_ok();
            prop_assert_eq!(ok, n <= 2019);
        }
    }
}
