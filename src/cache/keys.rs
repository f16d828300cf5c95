//! Cache key definitions.
//!
//! Every key is `<namespace>:<canonical encoding>`. The namespace decides
//! which invalidation epoch guards the entry and which prefix purge removes it.

use std::fmt::{self, Write};

use uuid::Uuid;

use crate::application::query::{NormalizedQuery, ProductQuery};

/// Key families that are invalidated as a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    /// Paginated, filtered product listings.
    ProductList,
    /// Single product looked up by id.
    ProductById,
    /// Single product looked up by slug.
    ProductBySlug,
    /// The category tree.
    CategoryList,
}

impl Namespace {
    pub const COUNT: usize = 4;

    pub const ALL: [Namespace; Self::COUNT] = [
        Namespace::ProductList,
        Namespace::ProductById,
        Namespace::ProductBySlug,
        Namespace::CategoryList,
    ];

    /// Namespaces touched by any product mutation.
    pub const PRODUCTS: [Namespace; 3] = [
        Namespace::ProductList,
        Namespace::ProductById,
        Namespace::ProductBySlug,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::ProductList => "products:list",
            Namespace::ProductById => "products:id",
            Namespace::ProductBySlug => "products:slug",
            Namespace::CategoryList => "categories:list",
        }
    }

    /// Prefix shared by every key in the namespace, separator included.
    pub fn prefix(self) -> String {
        format!("{}:", self.as_str())
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Namespace::ProductList => 0,
            Namespace::ProductById => 1,
            Namespace::ProductBySlug => 2,
            Namespace::CategoryList => 3,
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deterministic cache key. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: Namespace,
    encoded: String,
}

impl CacheKey {
    fn new(namespace: Namespace, suffix: &str) -> Self {
        Self {
            namespace,
            encoded: format!("{}:{suffix}", namespace.as_str()),
        }
    }

    /// Key for a product listing; the query is normalized first.
    pub fn product_list(query: &ProductQuery) -> Self {
        Self::normalized_product_list(&query.normalize())
    }

    pub fn normalized_product_list(query: &NormalizedQuery) -> Self {
        Self::new(Namespace::ProductList, &encode_query(query))
    }

    pub fn product_by_id(id: Uuid) -> Self {
        Self::new(Namespace::ProductById, &id.hyphenated().to_string())
    }

    pub fn product_by_slug(slug: &str) -> Self {
        Self::new(Namespace::ProductBySlug, slug)
    }

    pub fn category_list() -> Self {
        Self::new(Namespace::CategoryList, "all")
    }

    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

// Fixed field order; an unset field encodes as an empty value.
fn encode_query(query: &NormalizedQuery) -> String {
    let mut out = String::with_capacity(96);
    push_field(&mut out, "page", Some(query.page));
    push_field(&mut out, "size", Some(query.page_size));
    push_field(&mut out, "q", query.search.as_deref().map(escape_text));
    push_field(&mut out, "min", query.min_price_cents);
    push_field(&mut out, "max", query.max_price_cents);
    push_field(&mut out, "cat", query.category_id.map(|id| id.hyphenated()));
    push_field(&mut out, "sort", Some(query.sort_by));
    push_field(&mut out, "order", Some(query.sort_order));
    push_field(&mut out, "featured", query.featured);
    push_field(&mut out, "active", query.active);
    out
}

fn push_field<T: fmt::Display>(out: &mut String, name: &str, value: Option<T>) {
    if !out.is_empty() {
        out.push(';');
    }
    out.push_str(name);
    out.push('=');
    if let Some(value) = value {
        // Writing into a String cannot fail.
        let _ = write!(out, "{value}");
    }
}

/// Percent-escape the characters that carry structure in the encoding.
fn escape_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '%' => escaped.push_str("%25"),
            ';' => escaped.push_str("%3B"),
            '=' => escaped.push_str("%3D"),
            other => escaped.push(other),
        }
    }
    escaped
}
