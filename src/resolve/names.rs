use once_cell::sync::Lazy;
use regex::Regex;

static IDENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid")
});

pub fn is_identifier(s: &str) -> bool {
    IDENT.is_match(s)
}

/// Display identifier: every underscore-delimited segment gets an upper-case
/// first letter, segments are concatenated. `order_item` → `OrderItem`.
pub fn camel_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for part in name.split('_') {
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

/// Field identifier. Keeps the declared name when the camel-cased form would
/// collide with an enum nested in the same message.
pub fn field_ident<'a, I>(name: &str, sibling_enums: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let ident = camel_case(name);
    if sibling_enums.into_iter().any(|e| e == ident) {
        name.to_string()
    } else {
        ident
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camel_case_segments() {
        assert_eq!(camel_case("order_item"), "OrderItem");
        assert_eq!(camel_case("outer"), "Outer");
        assert_eq!(camel_case("HTTPHeader"), "HTTPHeader");
        assert_eq!(camel_case("a__b_"), "AB");
    }

    #[test]
    fn field_ident_avoids_enum_collision() {
        assert_eq!(field_ident("status", ["Status"]), "status");
        assert_eq!(field_ident("status", ["Kind"]), "Status");
    }

    #[test]
    fn identifier_syntax() {
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier("a.b"));
        assert!(!is_identifier(""));
    }
}
