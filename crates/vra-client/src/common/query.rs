//! OData query helpers for the IaaS API
//!
//! Builds `$filter` expressions. Values are quoted and single quotes escaped
//! the OData way (`'` becomes `''`), then the whole expression is URL encoded.

/// Filter matching machines that carry the tag `key=value`
pub fn tag_filter(key: &str, value: &str) -> String {
    format!(
        "tags.item.key eq '{}' and tags.item.value eq '{}'",
        escape(key),
        escape(value)
    )
}

/// Path for a filtered machine query
pub fn machines_path(filter: &str) -> String {
    format!("/iaas/api/machines?$filter={}", urlencoding::encode(filter))
}

fn escape(value: &str) -> String {
    value.replace('\'', "''")
}
