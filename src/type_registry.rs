//! Process-wide OID-to-type-name registry.
//!
//! Static `Decode`/`Encode` impls in [`crate::types`] and [`crate::row`] already know the
//! handful of built-in scalar OIDs at compile time; this registry exists for everything
//! else (arrays, enums, composites, domains, ranges) so that callers working with raw
//! [`Column`][crate::row::Column] bytes can resolve an unfamiliar OID to a name without
//! hand-maintaining a copy of `pg_type`.
use std::{
    collections::HashMap,
    sync::{OnceLock, RwLock},
};

use crate::{Result, executor::Executor, postgres::Oid, query::query_as};

/// What kind of `pg_type` row an OID refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// A scalar type with no further structure (`typtype = 'b'` and no element type).
    Base,
    /// An array type; carries the element type's OID.
    Array(Oid),
    /// A range type; carries the range's subtype OID.
    Range(Oid),
    /// An enum type.
    Enum,
    /// A composite (row) type.
    Composite,
    /// A domain over another type; carries the base type's OID.
    Domain(Oid),
    /// `pg_type` reported a `typtype` this registry does not classify.
    Unknown,
}

/// A single resolved `pg_type` entry.
#[derive(Debug, Clone)]
pub struct TypeInfo {
    oid: Oid,
    name: String,
    kind: TypeKind,
}

impl TypeInfo {
    fn base(oid: Oid, name: &'static str) -> Self {
        Self { oid, name: name.to_string(), kind: TypeKind::Base }
    }

    /// The type's OID.
    pub fn oid(&self) -> Oid {
        self.oid
    }

    /// The type's name, as `pg_type.typname` reports it.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// What kind of type this is.
    pub fn kind(&self) -> TypeKind {
        self.kind
    }
}

type Registry = HashMap<(String, Oid), TypeInfo>;

fn registry() -> &'static RwLock<Registry> {
    static REGISTRY: OnceLock<RwLock<Registry>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(seed()))
}

/// Seed every pool name's registry shares with the built-in scalar OIDs
/// (see [`crate::postgres::pg_type`]), keyed under the empty pool name `""` so
/// [`known`] and [`lookup`] fall back to it regardless of which pool asks.
fn seed() -> Registry {
    let mut map = HashMap::new();

    let builtins: &[(Oid, &str)] = &[
        (16, "bool"),
        (18, "char"),
        (20, "int8"),
        (21, "int2"),
        (23, "int4"),
        (25, "text"),
        (700, "float4"),
        (701, "float8"),
    ];

    for &(oid, name) in builtins {
        map.insert((String::new(), oid), TypeInfo::base(oid, name));
    }

    #[cfg(feature = "time")]
    {
        map.insert((String::new(), 1114), TypeInfo::base(1114, "timestamp"));
        map.insert((String::new(), 1184), TypeInfo::base(1184, "timestamptz"));
    }

    #[cfg(feature = "json")]
    map.insert((String::new(), 3802), TypeInfo::base(3802, "jsonb"));

    map
}

/// Look up a previously resolved type, checking `pool_name`'s entries first and
/// falling back to the shared built-in set.
pub fn lookup(pool_name: &str, oid: Oid) -> Option<TypeInfo> {
    let map = registry().read().unwrap();
    map.get(&(pool_name.to_string(), oid))
        .or_else(|| map.get(&(String::new(), oid)))
        .cloned()
}

/// Whether `oid` is already resolved for `pool_name` (or as a shared built-in).
pub fn known(pool_name: &str, oid: Oid) -> bool {
    let map = registry().read().unwrap();
    map.contains_key(&(pool_name.to_string(), oid)) || map.contains_key(&(String::new(), oid))
}

/// Resolve `oids` against `pg_type` over `exe` and publish the results under `pool_name`.
///
/// Run this on its own connection (or a pooled one between queries), never pipelined
/// into an in-flight extended-query stream: it issues its own simple query and awaits
/// a full round trip.
pub async fn refresh<E: Executor>(pool_name: &str, oids: &[Oid], exe: E) -> Result<()> {
    let oids: Vec<Oid> = oids.iter().copied().filter(|oid| !known(pool_name, *oid)).collect();
    if oids.is_empty() {
        return Ok(());
    }

    let list = oids.iter().map(Oid::to_string).collect::<Vec<_>>().join(",");
    let sql = format!(
        "select oid::int4, typname::text, typtype::text, \
         coalesce(nullif(typelem,0),nullif(typbasetype,0))::int4 \
         from pg_type where oid in ({list})"
    );

    let rows = query_as::<_, _, (i32, String, String, Option<i32>)>(sql.as_str(), exe)
        .fetch_all()
        .await?;

    let mut map = registry().write().unwrap();
    for (oid, name, typtype, reference) in rows {
        let oid = oid as Oid;
        let kind = match (typtype.as_str(), reference) {
            ("b", Some(elem)) => TypeKind::Array(elem as Oid),
            ("b", None) => TypeKind::Base,
            ("r", Some(subtype)) => TypeKind::Range(subtype as Oid),
            ("e", _) => TypeKind::Enum,
            ("c", _) => TypeKind::Composite,
            ("d", Some(base)) => TypeKind::Domain(base as Oid),
            _ => TypeKind::Unknown,
        };
        map.insert((pool_name.to_string(), oid), TypeInfo { oid, name, kind });
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn builtins_are_known_under_any_pool_name() {
        assert!(known("some_pool", 23));
        let info = lookup("some_pool", 25).unwrap();
        assert_eq!(info.name(), "text");
        assert_eq!(info.kind(), TypeKind::Base);
    }

    #[test]
    fn unknown_oid_is_not_known() {
        assert!(!known("some_pool", 999_999));
    }
}
