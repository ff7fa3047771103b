//! Catalog/schema allowlist.
//!
//! Built once at startup from configuration and shared read-only behind an
//! `Arc`. Names are lowercased at load time and probes are lowercased the same
//! way, so `MAIN.Sales` and `main.sales` resolve to the same scope.

use crate::error::{GuardError, Result};
use crate::guardrails::identifier::is_valid_identifier;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeRegistry {
    catalogs: BTreeMap<String, BTreeSet<String>>,
}

impl ScopeRegistry {
    /// Build the registry from `(catalog, schemas)` entries.
    ///
    /// Fails if there are no catalogs, a catalog lists no schemas, or any
    /// name is not a plain identifier.
    pub fn new<C, S, I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (C, Vec<S>)>,
        C: AsRef<str>,
        S: AsRef<str>,
    {
        let mut catalogs: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for (catalog, schemas) in entries {
            let catalog = catalog.as_ref();
            if !is_valid_identifier(catalog) {
                return Err(GuardError::Config(format!(
                    "Allowlisted catalog '{}' is not a valid identifier",
                    catalog
                )));
            }
            if schemas.is_empty() {
                return Err(GuardError::Config(format!(
                    "Catalog {} must allowlist at least one schema",
                    catalog
                )));
            }

            let entry = catalogs.entry(normalize(catalog)).or_default();
            for schema in schemas {
                let schema = schema.as_ref();
                if !is_valid_identifier(schema) {
                    return Err(GuardError::Config(format!(
                        "Allowlisted schema '{}' in catalog {} is not a valid identifier",
                        schema, catalog
                    )));
                }
                entry.insert(normalize(schema));
            }
        }

        if catalogs.is_empty() {
            return Err(GuardError::Config(
                "At least one catalog must be allowlisted".to_string(),
            ));
        }

        Ok(Self { catalogs })
    }

    pub fn is_allowed(&self, catalog: &str, schema: &str) -> bool {
        self.catalogs
            .get(&normalize(catalog))
            .map(|schemas| schemas.contains(&normalize(schema)))
            .unwrap_or(false)
    }

    pub fn is_catalog_allowed(&self, catalog: &str) -> bool {
        self.catalogs.contains_key(&normalize(catalog))
    }

    /// Like [`is_allowed`](Self::is_allowed), but reports which half failed.
    pub fn check(&self, catalog: &str, schema: &str) -> Result<()> {
        let schemas = self
            .catalogs
            .get(&normalize(catalog))
            .ok_or_else(|| GuardError::catalog_not_allowed(catalog))?;

        if !schemas.contains(&normalize(schema)) {
            return Err(GuardError::schema_not_allowed(catalog, schema));
        }
        Ok(())
    }

    pub fn check_catalog(&self, catalog: &str) -> Result<()> {
        if self.is_catalog_allowed(catalog) {
            Ok(())
        } else {
            Err(GuardError::catalog_not_allowed(catalog))
        }
    }

    /// Allowlisted catalogs in sorted order.
    pub fn catalogs(&self) -> Vec<String> {
        self.catalogs.keys().cloned().collect()
    }

    /// Allowlisted schemas of `catalog` in sorted order.
    pub fn schemas(&self, catalog: &str) -> Result<Vec<String>> {
        self.catalogs
            .get(&normalize(catalog))
            .map(|schemas| schemas.iter().cloned().collect())
            .ok_or_else(|| GuardError::catalog_not_allowed(catalog))
    }
}

fn normalize(name: &str) -> String {
    name.to_ascii_lowercase()
}
