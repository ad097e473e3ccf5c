//! Schema building blocks.

use crate::entity::Value;
use std::fmt;

/// The kind of value a property holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyKind {
    /// UTF-8 text.
    String,
    /// 64-bit signed integer.
    Integer,
    /// Key of a member of the named enum type.
    EnumRef(String),
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => f.write_str("string"),
            Self::Integer => f.write_str("integer"),
            Self::EnumRef(target) => write!(f, "enum {target}"),
        }
    }
}

/// A per-value rule evaluated at commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// Inclusive bounds on the number of characters.
    Length {
        /// Minimum number of characters.
        min: usize,
        /// Maximum number of characters.
        max: usize,
    },
    /// The value must not contain any of these characters.
    ContainsNone(String),
    /// The whole value must match this pattern.
    Regex(String),
    /// Inclusive numeric minimum.
    Min(i64),
    /// Inclusive numeric maximum.
    Max(i64),
}

impl Constraint {
    /// Inclusive character-count bounds.
    #[must_use]
    pub const fn length(min: usize, max: usize) -> Self {
        Self::Length { min, max }
    }

    /// Forbids every character of `chars`.
    #[must_use]
    pub fn contains_none(chars: impl Into<String>) -> Self {
        Self::ContainsNone(chars.into())
    }

    /// Requires a full match of `pattern`.
    #[must_use]
    pub fn regex(pattern: impl Into<String>) -> Self {
        Self::Regex(pattern.into())
    }

    /// Inclusive minimum.
    #[must_use]
    pub const fn min(value: i64) -> Self {
        Self::Min(value)
    }

    /// Inclusive maximum.
    #[must_use]
    pub const fn max(value: i64) -> Self {
        Self::Max(value)
    }

    /// Whether the rule applies to text rather than integers.
    #[must_use]
    pub const fn is_textual(&self) -> bool {
        matches!(
            self,
            Self::Length { .. } | Self::ContainsNone(_) | Self::Regex(_)
        )
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Length { min, max } => write!(f, "length({min}..={max})"),
            Self::ContainsNone(chars) => write!(f, "containsNone({chars:?})"),
            Self::Regex(pattern) => write!(f, "regex({pattern})"),
            Self::Min(n) => write!(f, "min({n})"),
            Self::Max(n) => write!(f, "max({n})"),
        }
    }
}

/// A named, typed property of an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDefinition {
    /// Property name.
    pub name: String,
    /// Value kind.
    pub kind: PropertyKind,
    /// Whether the property must be set at commit.
    pub required: bool,
    /// Rules every written value must satisfy.
    pub constraints: Vec<Constraint>,
}

impl PropertyDefinition {
    fn with_kind(name: impl Into<String>, kind: PropertyKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            constraints: Vec::new(),
        }
    }

    /// A nullable text property.
    #[must_use]
    pub fn string(name: impl Into<String>) -> Self {
        Self::with_kind(name, PropertyKind::String)
    }

    /// A nullable integer property.
    #[must_use]
    pub fn integer(name: impl Into<String>) -> Self {
        Self::with_kind(name, PropertyKind::Integer)
    }

    /// A nullable reference to a member of enum type `target`.
    #[must_use]
    pub fn enum_ref(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::with_kind(name, PropertyKind::EnumRef(target.into()))
    }

    /// Marks the property as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Adds a rule.
    #[must_use]
    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }
}

/// Minimum number of targets a link must hold at commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// 0..N
    ZeroToMany,
    /// 1..N
    OneToMany,
}

impl Cardinality {
    /// The lower bound.
    #[must_use]
    pub const fn floor(self) -> usize {
        match self {
            Self::ZeroToMany => 0,
            Self::OneToMany => 1,
        }
    }
}

/// What happens to a referencing entity when its link target is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletePolicy {
    /// No policy: the reference may only be dropped if the target is being
    /// deleted explicitly and the link's floor still holds without it.
    /// Otherwise the commit fails with a dangling reference.
    #[default]
    Fail,
    /// Remove the deleted target from the link.
    Clear,
    /// Delete the referencing entity too.
    Cascade,
}

/// A relationship from the owning type to `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkDefinition {
    /// Link name.
    pub name: String,
    /// Target type name.
    pub target: String,
    /// Lower bound on the number of targets.
    pub cardinality: Cardinality,
    /// Name of the paired link on the target type.
    pub inverse: Option<String>,
    /// Policy applied to the owner when a target is deleted.
    pub on_target_delete: DeletePolicy,
}

impl LinkDefinition {
    fn with_cardinality(
        name: impl Into<String>,
        target: impl Into<String>,
        cardinality: Cardinality,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality,
            inverse: None,
            on_target_delete: DeletePolicy::Fail,
        }
    }

    /// An optional many-valued link.
    #[must_use]
    pub fn zero_to_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::with_cardinality(name, target, Cardinality::ZeroToMany)
    }

    /// A many-valued link that must hold at least one target.
    #[must_use]
    pub fn one_to_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::with_cardinality(name, target, Cardinality::OneToMany)
    }

    /// Pairs this link with `inverse` on the target type.
    #[must_use]
    pub fn inverse(mut self, inverse: impl Into<String>) -> Self {
        self.inverse = Some(inverse.into());
        self
    }

    /// Sets the policy applied when a target is deleted.
    #[must_use]
    pub fn on_target_delete(mut self, policy: DeletePolicy) -> Self {
        self.on_target_delete = policy;
        self
    }
}

/// A pre-registered member of an enum type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumMember {
    /// Symbolic key, e.g. `FANTASY`.
    pub key: String,
    /// Descriptive property values.
    pub properties: Vec<(String, Value)>,
}

impl EnumMember {
    /// A member with no properties.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            properties: Vec::new(),
        }
    }

    /// Adds a property value.
    #[must_use]
    pub fn with(mut self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.push((property.into(), value.into()));
        self
    }
}

/// An entity type: ordered properties, ordered links and, for enum types,
/// the fixed member list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityType {
    name: String,
    properties: Vec<PropertyDefinition>,
    links: Vec<LinkDefinition>,
    members: Option<Vec<EnumMember>>,
}

impl EntityType {
    /// A regular entity type.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Vec::new(),
            links: Vec::new(),
            members: None,
        }
    }

    /// An enum type whose instances are exactly `members`.
    #[must_use]
    pub fn enumeration(
        name: impl Into<String>,
        members: impl IntoIterator<Item = EnumMember>,
    ) -> Self {
        Self {
            members: Some(members.into_iter().collect()),
            ..Self::new(name)
        }
    }

    /// Adds a property.
    #[must_use]
    pub fn property(mut self, property: PropertyDefinition) -> Self {
        self.properties.push(property);
        self
    }

    /// Adds a link.
    #[must_use]
    pub fn link(mut self, link: LinkDefinition) -> Self {
        self.links.push(link);
        self
    }

    /// Type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared properties in order.
    #[must_use]
    pub fn properties(&self) -> &[PropertyDefinition] {
        &self.properties
    }

    /// Declared links in order.
    #[must_use]
    pub fn links(&self) -> &[LinkDefinition] {
        &self.links
    }

    /// Enum members, or `None` for regular types.
    #[must_use]
    pub fn members(&self) -> Option<&[EnumMember]> {
        self.members.as_deref()
    }

    /// Whether this is an enum type.
    #[must_use]
    pub fn is_enum(&self) -> bool {
        self.members.is_some()
    }

    /// Looks up a property by name.
    #[must_use]
    pub fn property_def(&self, name: &str) -> Option<&PropertyDefinition> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Looks up a link by name.
    #[must_use]
    pub fn link_def(&self, name: &str) -> Option<&LinkDefinition> {
        self.links.iter().find(|l| l.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_collect_in_order() {
        let author = EntityType::new("Author")
            .property(PropertyDefinition::string("name").required())
            .property(
                PropertyDefinition::string("countryOfBirth")
                    .constraint(Constraint::length(3, 56))
                    .constraint(Constraint::regex("[A-Za-z.,]+")),
            )
            .link(LinkDefinition::zero_to_many("books", "Book").inverse("authors"));

        assert_eq!(author.name(), "Author");
        assert_eq!(author.properties().len(), 2);
        assert!(author.property_def("name").unwrap().required);
        assert_eq!(
            author.property_def("countryOfBirth").unwrap().constraints.len(),
            2
        );
        let books = author.link_def("books").unwrap();
        assert_eq!(books.inverse.as_deref(), Some("authors"));
        assert_eq!(books.on_target_delete, DeletePolicy::Fail);
        assert!(!author.is_enum());
    }

    #[test]
    fn enumeration_carries_members() {
        let genre = EntityType::enumeration(
            "Genre",
            [EnumMember::new("FANTASY").with("label", "Fantasy"), EnumMember::new("ROMANCE")],
        );
        assert!(genre.is_enum());
        assert_eq!(genre.members().unwrap()[0].key, "FANTASY");
        assert_eq!(
            genre.members().unwrap()[0].properties,
            vec![("label".to_string(), Value::from("Fantasy"))]
        );
    }

    #[test]
    fn constraint_rendering() {
        assert_eq!(Constraint::length(3, 56).to_string(), "length(3..=56)");
        assert_eq!(Constraint::contains_none("?!").to_string(), "containsNone(\"?!\")");
        assert_eq!(Constraint::max(2019).to_string(), "max(2019)");
        assert!(Constraint::regex("x").is_textual());
        assert!(!Constraint::min(0).is_textual());
    }

    #[test]
    fn cardinality_floor() {
        assert_eq!(Cardinality::ZeroToMany.floor(), 0);
        assert_eq!(Cardinality::OneToMany.floor(), 1);
    }
}
