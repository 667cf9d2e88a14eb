//! Cache invalidation after mutations.
//!
//! An [`InvalidationRules`] table maps a mutation's method and endpoint to the
//! scopes it clears. Planning is pure; [`apply`] then runs the plan against a
//! store. Over-invalidation is preferred to serving stale reads.

use std::collections::BTreeSet;

use regex::Regex;
use reqwest::Method;

use super::cache_key::endpoint_prefix;
use super::context::{Context, ContextField};
use crate::error::{ClientError, Result};
use crate::storage::store::{CacheStore, TagFilter};

/// What a matching rule clears.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationScope {
    /// Entries sharing any of the mutation's user/institute/class/subject tags.
    ContextTags,
    /// Entries whose endpoint shares the mutation endpoint's first path segment.
    ResourceRoot,
    /// Entries under another resource root, e.g. `/invoices` after a payment.
    Resource(String),
    /// The whole cache.
    All,
}

/// A concrete deletion against the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum InvalidationTarget {
    Tags(TagKey),
    Prefix(String),
    All,
}

/// A single context tag to clear.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TagKey {
    pub field: ContextField,
    pub value: String,
}

/// One row of the table.
#[derive(Debug, Clone)]
pub struct InvalidationRule {
    methods: Option<Vec<Method>>,
    pattern: Option<Regex>,
    scopes: Vec<InvalidationScope>,
}

impl InvalidationRule {
    /// Rule for endpoints matching `pattern` (a regex), any method.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Config`] if the pattern is not a valid regex.
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| ClientError::Config(format!("invalid endpoint pattern '{pattern}': {e}")))?;
        Ok(Self {
            methods: None,
            pattern: Some(pattern),
            scopes: Vec::new(),
        })
    }

    /// Rule matching every mutation.
    #[must_use]
    pub const fn any() -> Self {
        Self {
            methods: None,
            pattern: None,
            scopes: Vec::new(),
        }
    }

    /// Restrict the rule to these methods.
    #[must_use]
    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = Some(methods.into_iter().collect());
        self
    }

    #[must_use]
    pub fn scope(mut self, scope: InvalidationScope) -> Self {
        self.scopes.push(scope);
        self
    }

    #[must_use]
    pub fn matches(&self, method: &Method, endpoint: &str) -> bool {
        self.methods
            .as_ref()
            .is_none_or(|methods| methods.contains(method))
            && self
                .pattern
                .as_ref()
                .is_none_or(|pattern| pattern.is_match(endpoint))
    }
}

/// The invalidation table. Every matching rule contributes its scopes.
#[derive(Debug, Clone)]
pub struct InvalidationRules {
    rules: Vec<InvalidationRule>,
}

impl Default for InvalidationRules {
    /// Any method, any endpoint: clear context tags and the resource root.
    fn default() -> Self {
        Self::empty().with_rule(
            InvalidationRule::any()
                .scope(InvalidationScope::ContextTags)
                .scope(InvalidationScope::ResourceRoot),
        )
    }
}

impl InvalidationRules {
    /// A table with no rules (mutations clear nothing).
    #[must_use]
    pub const fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    #[must_use]
    pub fn with_rule(mut self, rule: InvalidationRule) -> Self {
        self.rules.push(rule);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Deletions for a successful mutation, deduplicated and ordered.
    #[must_use]
    pub fn plan(&self, method: &Method, endpoint: &str, context: &Context) -> Vec<InvalidationTarget> {
        let mut targets = BTreeSet::new();
        for rule in self.rules.iter().filter(|r| r.matches(method, endpoint)) {
            for scope in &rule.scopes {
                match scope {
                    InvalidationScope::ContextTags => {
                        for (field, value) in context.fields() {
                            if field == ContextField::Role {
                                continue;
                            }
                            targets.insert(InvalidationTarget::Tags(TagKey {
                                field,
                                value: value.to_string(),
                            }));
                        }
                    }
                    InvalidationScope::ResourceRoot => {
                        targets.extend(root_prefixes(endpoint));
                    }
                    InvalidationScope::Resource(root) => {
                        targets.extend(root_prefixes(root));
                    }
                    InvalidationScope::All => {
                        targets.insert(InvalidationTarget::All);
                    }
                }
            }
        }

        if targets.contains(&InvalidationTarget::All) {
            return vec![InvalidationTarget::All];
        }
        targets.into_iter().collect()
    }
}

/// First path segment of `endpoint`, keeping its leading slash if any.
#[must_use]
pub fn resource_root(endpoint: &str) -> Option<String> {
    let slash = if endpoint.starts_with('/') { "/" } else { "" };
    let segment = endpoint
        .trim_start_matches('/')
        .split(['/', '?', '#'])
        .next()
        .filter(|s| !s.is_empty())?;
    Some(format!("{slash}{segment}"))
}

/// Key prefixes covering the root endpoint itself and everything below it.
fn root_prefixes(endpoint: &str) -> Vec<InvalidationTarget> {
    resource_root(endpoint)
        .map(|root| {
            vec![
                InvalidationTarget::Prefix(endpoint_prefix(&root)),
                InvalidationTarget::Prefix(format!("{root}/")),
            ]
        })
        .unwrap_or_default()
}

/// Run `targets` against `store`, returning how many entries were removed.
///
/// Best-effort: a failing target is logged and the rest still run.
pub fn apply(store: &dyn CacheStore, targets: &[InvalidationTarget]) -> u64 {
    let mut removed = 0;
    for target in targets {
        let result = match target {
            InvalidationTarget::Tags(tag) => match TagFilter::for_field(tag.field, &tag.value) {
                Some(filter) => store.remove_matching(&filter),
                None => Ok(0),
            },
            InvalidationTarget::Prefix(prefix) => store.remove_prefix(prefix),
            InvalidationTarget::All => store.clear(),
        };
        match result {
            Ok(count) => removed += count,
            Err(e) => tracing::warn!(invalidation = ?target, error = %e, "cache invalidation failed"),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::cache_key::build_key;
    use crate::storage::memory::MemoryStore;
    use crate::storage::store::CacheEntry;
    use serde_json::json;

    fn tag(field: ContextField, value: &str) -> InvalidationTarget {
        InvalidationTarget::Tags(TagKey {
            field,
            value: value.to_string(),
        })
    }

    #[test]
    fn default_plan_covers_tags_and_root() {
        let ctx = Context::new().with_institute("I1").with_class("C1").with_role("admin");
        let plan = InvalidationRules::default().plan(&Method::POST, "/students/12/grades", &ctx);
        assert_eq!(
            plan,
            vec![
                tag(ContextField::Institute, "I1"),
                tag(ContextField::Class, "C1"),
                InvalidationTarget::Prefix("/students/".to_string()),
                InvalidationTarget::Prefix("/students|".to_string()),
            ]
        );
    }

    #[test]
    fn empty_context_still_clears_root() {
        let plan = InvalidationRules::default().plan(&Method::DELETE, "/payments/9", &Context::new());
        assert_eq!(plan.len(), 2);
        assert!(plan.iter().all(|t| matches!(t, InvalidationTarget::Prefix(_))));
    }

    #[test]
    fn rules_filter_by_method_and_pattern() {
        let rules = InvalidationRules::empty().with_rule(
            InvalidationRule::new(r"^/payments")
                .unwrap()
                .methods([Method::POST])
                .scope(InvalidationScope::Resource("/invoices".into())),
        );
        assert!(rules.plan(&Method::PUT, "/payments", &Context::new()).is_empty());
        assert!(rules.plan(&Method::POST, "/students", &Context::new()).is_empty());
        assert_eq!(
            rules.plan(&Method::POST, "/payments", &Context::new()),
            vec![
                InvalidationTarget::Prefix("/invoices/".into()),
                InvalidationTarget::Prefix("/invoices|".into()),
            ]
        );
    }

    #[test]
    fn all_scope_collapses_plan() {
        let rules = InvalidationRules::default()
            .with_rule(InvalidationRule::new("^/sync$").unwrap().scope(InvalidationScope::All));
        let plan = rules.plan(&Method::POST, "/sync", &Context::new().with_user("U1"));
        assert_eq!(plan, vec![InvalidationTarget::All]);
    }

    #[test]
    fn invalid_pattern_is_config_error() {
        assert!(matches!(InvalidationRule::new("("), Err(ClientError::Config(_))));
    }

    #[test]
    fn resource_root_extraction() {
        assert_eq!(resource_root("/students/1").as_deref(), Some("/students"));
        assert_eq!(resource_root("classes?x=1").as_deref(), Some("classes"));
        assert_eq!(resource_root("/"), None);
    }

    #[test]
    fn apply_removes_tagged_and_rooted_entries() {
        let store = MemoryStore::new();
        let put = |endpoint: &str, ctx: Context| {
            let key = build_key(endpoint, None, &ctx);
            store.set(CacheEntry::new(key, json!({}), 60, ctx)).unwrap();
        };
        put("/classes", Context::new().with_institute("I1"));
        put("/subjects", Context::new().with_institute("I2"));
        put("/students/4", Context::new().with_institute("I2"));
        put("/studentsx", Context::new());

        let plan = InvalidationRules::default().plan(
            &Method::POST,
            "/students",
            &Context::new().with_institute("I1"),
        );
        assert_eq!(apply(&store, &plan), 2);
        assert_eq!(store.len(), 2);
    }
}
