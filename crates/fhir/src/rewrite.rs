//! Reference and identity rewriting over JSON resources.

use crate::bundle::Bundle;
use crate::reference::Reference;
use mockpt_ids::{IdentityMapping, MappingSource};
use serde_json::Value;

/// Which type qualifies a rewritten `Type/token` reference.
///
/// Direct links (`urn:uuid:`) always take the mapped type because they carry none of their own.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReferenceTypePolicy {
    /// Keep the type written in the reference.
    #[default]
    StatedType,
    /// Use the type recorded in the mapping.
    MappedType,
}

/// Aggregate counts from a rewrite pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RewriteStats {
    /// References whose value changed.
    pub updated: usize,
    /// Of `updated`, how many were query-style.
    pub conditional: usize,
}

/// Rewrites reference fields in place using an [`IdentityMapping`].
///
/// Unresolvable references are left exactly as they are and are not counted.
#[derive(Clone, Copy, Debug)]
pub struct ReferenceRewriter<'m> {
    mapping: &'m IdentityMapping,
    policy: ReferenceTypePolicy,
}

impl<'m> ReferenceRewriter<'m> {
    pub fn new(mapping: &'m IdentityMapping) -> Self {
        Self {
            mapping,
            policy: ReferenceTypePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ReferenceTypePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Resolves one reference string.
    ///
    /// Returns the rewritten value and whether it was query-style, or `None` when the reference
    /// has no mapping entry or an unrecognised shape.
    pub fn resolve(&self, raw: &str) -> Option<(String, bool)> {
        match Reference::parse(raw) {
            Reference::Query {
                resource_type,
                value,
                ..
            } => match self.mapping.get(value) {
                Some(mapped) => Some((format!("{resource_type}/{}", mapped.id), true)),
                None => {
                    tracing::debug!("unresolved conditional reference left as-is: {raw}");
                    None
                }
            },
            Reference::DirectLink { token } => self
                .mapping
                .get(token)
                .map(|mapped| (format!("{}/{}", mapped.resource_type, mapped.id), false)),
            Reference::Typed {
                resource_type,
                token,
            } => self.mapping.get(token).map(|mapped| {
                let qualifier = match self.policy {
                    ReferenceTypePolicy::StatedType => resource_type,
                    ReferenceTypePolicy::MappedType => mapped.resource_type.as_str(),
                };
                (format!("{qualifier}/{}", mapped.id), false)
            }),
            Reference::Other => None,
        }
    }

    /// Walks `value` recursively, rewriting every object member named `reference`.
    pub fn rewrite_value(&self, value: &mut Value, stats: &mut RewriteStats) {
        match value {
            Value::Object(map) => {
                let resolved = match map.get("reference") {
                    Some(Value::String(raw)) => self
                        .resolve(raw)
                        .filter(|(rewritten, _)| rewritten != raw),
                    _ => None,
                };
                if let Some((rewritten, conditional)) = resolved {
                    map.insert("reference".into(), Value::String(rewritten));
                    stats.updated += 1;
                    if conditional {
                        stats.conditional += 1;
                    }
                }
                for child in map.values_mut() {
                    self.rewrite_value(child, stats);
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.rewrite_value(item, stats);
                }
            }
            _ => {}
        }
    }

    /// Rewrites every resource in `bundle`.
    pub fn rewrite_bundle(&self, bundle: &mut Bundle) -> RewriteStats {
        let mut stats = RewriteStats::default();
        for resource in bundle.resources_mut() {
            self.rewrite_value(resource, &mut stats);
        }
        tracing::info!(
            "updated {} references ({} conditional)",
            stats.updated,
            stats.conditional
        );
        stats
    }
}

/// Replaces each mapped resource id and turns its entry into an update with a client-chosen id.
///
/// For every entry whose `resource.id` is a primary identity of the same type:
/// - `resource.id` becomes the assigned identifier
/// - a `POST` request becomes `PUT {Type}/{assigned}`; a `PUT` has its url retargeted
/// - `fullUrl` is dropped
///
/// Returns the number of resources rewritten.
pub fn rewrite_resource_ids(bundle: &mut Bundle, mapping: &IdentityMapping) -> usize {
    let mut rewritten = 0;

    for entry in &mut bundle.entry {
        let (Some(resource_type), Some(id)) = (entry.resource_type(), entry.resource_id()) else {
            continue;
        };
        let Some(mapped) = mapping.get(id) else {
            continue;
        };
        if mapped.source != MappingSource::Primary || mapped.resource_type != resource_type {
            continue;
        }

        let resource_type = resource_type.to_string();
        let new_id = mapped.id.to_string();
        entry.resource["id"] = Value::String(new_id.clone());

        if let Some(request) = entry.request.as_mut() {
            if request.method.eq_ignore_ascii_case("POST") || request.method.eq_ignore_ascii_case("PUT")
            {
                request.method = "PUT".into();
                request.url = format!("{resource_type}/{new_id}");
            }
        }
        entry.full_url = None;
        rewritten += 1;
    }

    tracing::info!("rewrote {rewritten} resource ids");
    rewritten
}
