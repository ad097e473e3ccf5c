//! Schema validation and lookup.

use crate::error::{CoreError, CoreResult};
use crate::schema::definition::{
    Cardinality, Constraint, EntityType, LinkDefinition, PropertyKind,
};
use crate::types::EntityTypeId;
use regex_lite::Regex;
use std::collections::{HashMap, HashSet};

/// A registered type with its resolved id and incoming links.
#[derive(Debug)]
pub(crate) struct TypeInfo {
    pub id: EntityTypeId,
    pub def: EntityType,
    /// `(source type index, link index)` for every link targeting this type.
    pub incoming: Vec<(usize, usize)>,
}

/// The frozen set of entity types a store was opened with.
#[derive(Debug)]
pub struct SchemaRegistry {
    types: Vec<TypeInfo>,
    by_name: HashMap<String, usize>,
    by_id: HashMap<EntityTypeId, usize>,
    patterns: HashMap<String, Regex>,
}

impl SchemaRegistry {
    /// Validates `types` and assigns ids in declaration order, starting at 1.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Schema`] if any link, inverse pairing or
    /// constraint is inconsistent.
    pub fn register(types: Vec<EntityType>) -> CoreResult<Self> {
        let mut next = 0;
        Self::register_with_ids(types, |_| {
            next += 1;
            EntityTypeId::new(next)
        })
    }

    /// Validates `types`, asking `assign_id` for each type's stable id.
    pub fn register_with_ids(
        types: Vec<EntityType>,
        mut assign_id: impl FnMut(&str) -> EntityTypeId,
    ) -> CoreResult<Self> {
        let mut by_name = HashMap::new();
        for (idx, ty) in types.iter().enumerate() {
            if ty.name().is_empty() {
                return Err(CoreError::schema("entity type name must not be empty"));
            }
            if by_name.insert(ty.name().to_string(), idx).is_some() {
                return Err(CoreError::schema(format!(
                    "entity type '{}' is declared twice",
                    ty.name()
                )));
            }
        }

        let mut patterns = HashMap::new();
        for ty in &types {
            check_fields(ty, &types, &by_name, &mut patterns)?;
            for link in ty.links() {
                check_link(ty, link, &types, &by_name)?;
            }
        }

        let mut infos: Vec<TypeInfo> = types
            .into_iter()
            .map(|def| TypeInfo {
                id: assign_id(def.name()),
                def,
                incoming: Vec::new(),
            })
            .collect();

        let mut by_id = HashMap::new();
        for (idx, info) in infos.iter().enumerate() {
            if by_id.insert(info.id, idx).is_some() {
                return Err(CoreError::schema(format!(
                    "type id {} assigned to more than one type",
                    info.id
                )));
            }
        }

        // targets were checked above
        let edges: Vec<(usize, usize, usize)> = infos
            .iter()
            .enumerate()
            .flat_map(|(source, info)| {
                info.def
                    .links()
                    .iter()
                    .enumerate()
                    .filter_map(|(link_idx, link)| {
                        by_name.get(&link.target).map(|&target| (target, source, link_idx))
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        for (target, source, link_idx) in edges {
            infos[target].incoming.push((source, link_idx));
        }

        Ok(Self {
            types: infos,
            by_name,
            by_id,
            patterns,
        })
    }

    /// Returns the definition of `name`.
    pub fn describe(&self, name: &str) -> CoreResult<&EntityType> {
        self.info(name).map(|info| &info.def)
    }

    /// Returns the stable id of `name`.
    pub fn type_id(&self, name: &str) -> CoreResult<EntityTypeId> {
        self.info(name).map(|info| info.id)
    }

    /// All registered types in declaration order.
    pub fn types(&self) -> impl Iterator<Item = &EntityType> {
        self.types.iter().map(|info| &info.def)
    }

    pub(crate) fn info(&self, name: &str) -> CoreResult<&TypeInfo> {
        self.by_name
            .get(name)
            .map(|&idx| &self.types[idx])
            .ok_or_else(|| CoreError::unknown_type(name))
    }

    pub(crate) fn info_by_id(&self, id: EntityTypeId) -> CoreResult<&TypeInfo> {
        self.by_id
            .get(&id)
            .map(|&idx| &self.types[idx])
            .ok_or_else(|| CoreError::invalid_format(format!("stored record has unregistered {id}")))
    }

    /// Every `(source type, link)` whose target is `info`'s type.
    pub(crate) fn incoming_links<'a>(
        &'a self,
        info: &'a TypeInfo,
    ) -> impl Iterator<Item = (&'a TypeInfo, &'a LinkDefinition)> + 'a {
        info.incoming.iter().map(move |&(source, link)| {
            let source = &self.types[source];
            (source, &source.def.links()[link])
        })
    }

    /// The compiled, anchored form of a declared regex constraint.
    pub(crate) fn pattern(&self, source: &str) -> Option<&Regex> {
        self.patterns.get(source)
    }
}

fn check_fields(
    ty: &EntityType,
    types: &[EntityType],
    by_name: &HashMap<String, usize>,
    patterns: &mut HashMap<String, Regex>,
) -> CoreResult<()> {
    let mut names = HashSet::new();
    let fields = ty
        .properties()
        .iter()
        .map(|p| p.name.as_str())
        .chain(ty.links().iter().map(|l| l.name.as_str()));
    for field in fields {
        if !names.insert(field) {
            return Err(CoreError::schema(format!(
                "{}: field '{field}' is declared twice",
                ty.name()
            )));
        }
    }

    for prop in ty.properties() {
        if let PropertyKind::EnumRef(target) = &prop.kind {
            let is_enum = by_name.get(target).is_some_and(|&idx| types[idx].is_enum());
            if !is_enum {
                return Err(CoreError::schema(format!(
                    "{}.{}: '{target}' is not an enum type",
                    ty.name(),
                    prop.name
                )));
            }
        }

        let mut lower = i64::MIN;
        let mut upper = i64::MAX;
        for constraint in &prop.constraints {
            let textual_property = prop.kind == PropertyKind::String;
            let numeric_property = prop.kind == PropertyKind::Integer;
            if (constraint.is_textual() && !textual_property)
                || (!constraint.is_textual() && !numeric_property)
            {
                return Err(CoreError::schema(format!(
                    "{}.{}: {constraint} does not apply to {} properties",
                    ty.name(),
                    prop.name,
                    prop.kind
                )));
            }
            match constraint {
                Constraint::Length { min, max } if min > max => {
                    return Err(CoreError::schema(format!(
                        "{}.{}: empty length range {min}..={max}",
                        ty.name(),
                        prop.name
                    )));
                }
                Constraint::Regex(source) => {
                    let anchored = Regex::new(&format!("^(?:{source})$")).map_err(|e| {
                        CoreError::schema(format!(
                            "{}.{}: invalid regex {source:?}: {e}",
                            ty.name(),
                            prop.name
                        ))
                    })?;
                    patterns.insert(source.clone(), anchored);
                }
                Constraint::Min(n) => lower = lower.max(*n),
                Constraint::Max(n) => upper = upper.min(*n),
                _ => {}
            }
        }
        if lower > upper {
            return Err(CoreError::schema(format!(
                "{}.{}: min({lower}) exceeds max({upper})",
                ty.name(),
                prop.name
            )));
        }
    }

    if let Some(members) = ty.members() {
        let mut keys = HashSet::new();
        for member in members {
            if !keys.insert(member.key.as_str()) {
                return Err(CoreError::schema(format!(
                    "{}: enum member '{}' is declared twice",
                    ty.name(),
                    member.key
                )));
            }
            for (property, _) in &member.properties {
                if ty.property_def(property).is_none() {
                    return Err(CoreError::schema(format!(
                        "{}.{}: member sets undeclared property '{property}'",
                        ty.name(),
                        member.key
                    )));
                }
            }
        }
    }

    Ok(())
}

fn check_link(
    ty: &EntityType,
    link: &LinkDefinition,
    types: &[EntityType],
    by_name: &HashMap<String, usize>,
) -> CoreResult<()> {
    let Some(&target_idx) = by_name.get(&link.target) else {
        return Err(CoreError::schema(format!(
            "{}.{}: target type '{}' is not registered",
            ty.name(),
            link.name,
            link.target
        )));
    };

    // enum members are seeded without links, so they can't satisfy a floor
    if ty.is_enum() && link.cardinality == Cardinality::OneToMany {
        return Err(CoreError::schema(format!(
            "{}.{}: enum types cannot declare 1..N links",
            ty.name(),
            link.name
        )));
    }

    let Some(inverse_name) = &link.inverse else {
        return Ok(());
    };
    let target = &types[target_idx];
    let Some(inverse) = target.link_def(inverse_name) else {
        return Err(CoreError::schema(format!(
            "{}.{}: inverse '{}.{inverse_name}' does not exist",
            ty.name(),
            link.name,
            target.name()
        )));
    };
    if inverse.target != ty.name() {
        return Err(CoreError::schema(format!(
            "{}.{}: inverse '{}.{inverse_name}' points to '{}' instead",
            ty.name(),
            link.name,
            target.name(),
            inverse.target
        )));
    }
    if inverse.inverse.as_deref() != Some(link.name.as_str()) {
        return Err(CoreError::schema(format!(
            "{}.{} and {}.{inverse_name} declare conflicting inverse pairings",
            ty.name(),
            link.name,
            target.name()
        )));
    }
    Ok(())
}
