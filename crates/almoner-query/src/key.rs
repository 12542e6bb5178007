//! # Query Keys
//!
//! Deterministic, hierarchical identifiers for cached queries.
//!
//! ## Key Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Prefix Hierarchy                                │
//! │                                                                         │
//! │  [payments]                                                            │
//! │    └── [payments, byPledge]                                            │
//! │          └── [payments, byPledge, 7]                                   │
//! │                └── [payments, byPledge, 7, {page=1}]                   │
//! │                                                                         │
//! │  [pledges]                                                             │
//! │    ├── [pledges, list]                                                 │
//! │    │     └── [pledges, list, {contactId=3,page=1}]                     │
//! │    └── [pledges, detail]                                               │
//! │          └── [pledges, detail, 7]                                      │
//! │                                                                         │
//! │  Segment matching (prefix segment vs key segment):                     │
//! │    name / id   → equal                                                 │
//! │    params      → every prefix field present in the key with equal value│
//! │                                                                         │
//! │  so [pledges, list, {contactId=3}] covers                              │
//! │     [pledges, list, {contactId=3,page=2}]                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Keys serialize to a JSON array (`["pledges","list",{"contactId":3}]`) and
//! display as `[pledges, list, {contactId=3}]`. Parameter bags are ordered by
//! field, so structurally equal keys always render the same way.

use std::borrow::Cow;
use std::fmt;

use almoner_core::{EntityId, ParamBag, ParamField, ParamValue};
use serde::{Deserialize, Serialize};

// =============================================================================
// Key Segment
// =============================================================================

/// One element of a key path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeySegment {
    /// A static path name (`pledges`, `byPledge`).
    Name(Cow<'static, str>),
    /// An entity id scoping the query.
    Id(EntityId),
    /// Filter parameters.
    Params(ParamBag),
}

impl KeySegment {
    /// Whether this segment, used as part of a prefix, covers `other`.
    pub fn matches(&self, other: &KeySegment) -> bool {
        match (self, other) {
            (KeySegment::Params(prefix), KeySegment::Params(bag)) => prefix.is_subset_of(bag),
            _ => self == other,
        }
    }
}

impl fmt::Display for KeySegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySegment::Name(name) => f.write_str(name),
            KeySegment::Id(id) => write!(f, "{}", id),
            KeySegment::Params(bag) => write!(f, "{}", bag),
        }
    }
}

// =============================================================================
// Query Key
// =============================================================================

/// Identifier of a cached query. Equal keys hash equal.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey {
    segments: Vec<KeySegment>,
}

impl QueryKey {
    /// The empty key; a prefix of every key.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn from_segments(segments: Vec<KeySegment>) -> Self {
        QueryKey { segments }
    }

    /// A key made of static names only, e.g. `QueryKey::path(&["pledges", "list"])`.
    pub fn path(names: &[&'static str]) -> Self {
        names
            .iter()
            .fold(Self::root(), |key, name| key.with_name(*name))
    }

    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.segments.push(KeySegment::Name(name.into()));
        self
    }

    pub fn with_id(mut self, id: EntityId) -> Self {
        self.segments.push(KeySegment::Id(id));
        self
    }

    /// Appends a parameter segment. An empty bag adds nothing.
    pub fn with_params(mut self, params: ParamBag) -> Self {
        if !params.is_empty() {
            self.segments.push(KeySegment::Params(params));
        }
        self
    }

    pub fn segments(&self) -> &[KeySegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// True iff `other` extends `self` segment by segment.
    ///
    /// Every key is a prefix of itself, and the root key is a prefix of all.
    pub fn is_prefix_of(&self, other: &QueryKey) -> bool {
        self.segments.len() <= other.segments.len()
            && self
                .segments
                .iter()
                .zip(&other.segments)
                .all(|(prefix, segment)| prefix.matches(segment))
    }

    /// The entity family this key belongs to, if it is a family key.
    pub fn family(&self) -> Option<EntityFamily> {
        EntityFamily::ALL
            .into_iter()
            .find(|family| family.root().is_prefix_of(self))
    }

    /// Decodes the key back into `(family, params)` for the transport.
    ///
    /// The discriminator id, when present, is folded back into the bag under
    /// the family's discriminator field. Returns `None` for keys that are not
    /// shaped like a family key.
    pub fn decode(&self) -> Option<(EntityFamily, ParamBag)> {
        let family = self.family()?;
        let mut params = ParamBag::new();

        let mut rest = self.segments[family.root().len()..].iter();
        let mut next = rest.next();

        if let (Some(KeySegment::Id(id)), Some(field)) = (next, family.discriminator()) {
            params.insert(field, *id);
            next = rest.next();
        }

        if let Some(KeySegment::Params(bag)) = next {
            for (field, value) in bag.iter() {
                params.insert(*field, value.clone());
            }
            next = rest.next();
        }

        match next {
            None => Some((family, params)),
            Some(_) => None,
        }
    }

    /// The trailing parameter bag, if any.
    pub fn params(&self) -> Option<&ParamBag> {
        match self.segments.last() {
            Some(KeySegment::Params(bag)) => Some(bag),
            _ => None,
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", segment)?;
        }
        f.write_str("]")
    }
}

// =============================================================================
// Entity Family
// =============================================================================

/// The kinds of server reads the admin screens cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityFamily {
    /// Paginated, filterable pledge list.
    Pledges,
    /// One pledge with its payments.
    PledgeDetail,
    /// Payments recorded against one pledge.
    PaymentsByPledge,
    /// Payments made by one contact.
    PaymentsByContact,
}

impl EntityFamily {
    pub const ALL: [EntityFamily; 4] = [
        EntityFamily::Pledges,
        EntityFamily::PledgeDetail,
        EntityFamily::PaymentsByPledge,
        EntityFamily::PaymentsByContact,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityFamily::Pledges => "pledges",
            EntityFamily::PledgeDetail => "pledge-detail",
            EntityFamily::PaymentsByPledge => "payments-by-pledge",
            EntityFamily::PaymentsByContact => "payments-by-contact",
        }
    }

    /// Key path every key of this family starts with.
    pub fn root(&self) -> QueryKey {
        match self {
            EntityFamily::Pledges => QueryKey::path(&["pledges", "list"]),
            EntityFamily::PledgeDetail => QueryKey::path(&["pledges", "detail"]),
            EntityFamily::PaymentsByPledge => QueryKey::path(&["payments", "byPledge"]),
            EntityFamily::PaymentsByContact => QueryKey::path(&["payments", "byContact"]),
        }
    }

    /// Parameter lifted out of the bag into an id segment.
    pub fn discriminator(&self) -> Option<ParamField> {
        match self {
            EntityFamily::Pledges => None,
            EntityFamily::PledgeDetail | EntityFamily::PaymentsByPledge => {
                Some(ParamField::PledgeId)
            }
            EntityFamily::PaymentsByContact => Some(ParamField::ContactId),
        }
    }
}

impl fmt::Display for EntityFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Key Construction
// =============================================================================

/// Builds the key for `family` scoped by `params`.
///
/// Total and deterministic: the discriminator (if the family has one and the
/// bag carries it as an integer) becomes an id segment, the remaining fields
/// become a trailing parameter segment.
pub fn build_key(family: EntityFamily, mut params: ParamBag) -> QueryKey {
    let mut key = family.root();

    if let Some(field) = family.discriminator() {
        if let Some(ParamValue::Int(id)) = params.get(field).cloned() {
            params.remove(field);
            key = key.with_id(id);
        }
    }

    key.with_params(params)
}

/// `[pledges, list, {..}]`
pub fn pledge_list(params: ParamBag) -> QueryKey {
    build_key(EntityFamily::Pledges, params)
}

/// `[pledges, detail, pledgeId]`
pub fn pledge_detail(pledge_id: EntityId) -> QueryKey {
    EntityFamily::PledgeDetail.root().with_id(pledge_id)
}

/// `[payments, byPledge, pledgeId, {..}]`
pub fn payments_by_pledge(pledge_id: EntityId, params: ParamBag) -> QueryKey {
    EntityFamily::PaymentsByPledge
        .root()
        .with_id(pledge_id)
        .with_params(params)
}

/// `[payments, byContact, contactId, {..}]`
pub fn payments_by_contact(contact_id: EntityId, params: ParamBag) -> QueryKey {
    EntityFamily::PaymentsByContact
        .root()
        .with_id(contact_id)
        .with_params(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn bag(pairs: &[(ParamField, i64)]) -> ParamBag {
        pairs.iter().map(|(f, v)| (*f, ParamValue::Int(*v))).collect()
    }

    #[test]
    fn test_equal_bags_yield_equal_keys() {
        let a = pledge_list(bag(&[(ParamField::Page, 1), (ParamField::ContactId, 3)]));
        let b = pledge_list(bag(&[(ParamField::ContactId, 3), (ParamField::Page, 1)]));

        assert_eq!(a, b);
        let set: HashSet<_> = [a.clone(), b.clone()].into_iter().collect();
        assert_eq!(set.len(), 1);
        assert_eq!(a.to_string(), b.to_string());
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            r#"["pledges","list",{"contactId":3,"page":1}]"#
        );
    }

    #[test]
    fn test_discriminator_becomes_id_segment() {
        let key = build_key(
            EntityFamily::PaymentsByPledge,
            bag(&[(ParamField::PledgeId, 7), (ParamField::Page, 1)]),
        );
        assert_eq!(key, payments_by_pledge(7, bag(&[(ParamField::Page, 1)])));
        assert_eq!(key.to_string(), "[payments, byPledge, 7, {page=1}]");
    }

    #[test]
    fn test_prefix_chain() {
        let payments = QueryKey::path(&["payments"]);
        let by_pledge = QueryKey::path(&["payments", "byPledge"]);
        let pledge_7 = by_pledge.clone().with_id(7);
        let page_1 = payments_by_pledge(7, bag(&[(ParamField::Page, 1)]));

        assert!(QueryKey::root().is_prefix_of(&payments));
        assert!(payments.is_prefix_of(&by_pledge));
        assert!(by_pledge.is_prefix_of(&pledge_7));
        assert!(pledge_7.is_prefix_of(&page_1));
        assert!(page_1.is_prefix_of(&page_1));

        assert!(!page_1.is_prefix_of(&pledge_7));
        assert!(!pledge_7.is_prefix_of(&payments_by_pledge(8, ParamBag::new())));
    }

    #[test]
    fn test_param_prefix_uses_subset() {
        let by_contact = pledge_list(bag(&[(ParamField::ContactId, 3)]));
        let page_2 = pledge_list(bag(&[(ParamField::ContactId, 3), (ParamField::Page, 2)]));
        let other = pledge_list(bag(&[(ParamField::ContactId, 4), (ParamField::Page, 2)]));

        assert!(by_contact.is_prefix_of(&page_2));
        assert!(!by_contact.is_prefix_of(&other));
        assert!(!page_2.is_prefix_of(&by_contact));
    }

    #[test]
    fn test_decode_roundtrip() {
        let params = bag(&[(ParamField::ContactId, 3), (ParamField::Page, 2)]);
        let key = build_key(EntityFamily::PaymentsByContact, params.clone());

        assert_eq!(key.family(), Some(EntityFamily::PaymentsByContact));
        assert_eq!(key.decode(), Some((EntityFamily::PaymentsByContact, params)));

        let detail = pledge_detail(7);
        let (family, params) = detail.decode().unwrap();
        assert_eq!(family, EntityFamily::PledgeDetail);
        assert_eq!(params.get_int(ParamField::PledgeId), Some(7));
    }

    #[test]
    fn test_decode_rejects_foreign_keys() {
        assert_eq!(QueryKey::path(&["settings"]).decode(), None);
        assert_eq!(QueryKey::path(&["pledges"]).decode(), None);
        assert_eq!(pledge_detail(7).with_id(8).decode(), None);
    }

    #[test]
    fn test_json_roundtrip() {
        let key = payments_by_contact(3, bag(&[(ParamField::Limit, 50)]));
        let json = serde_json::to_string(&key).unwrap();
        let back: QueryKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
