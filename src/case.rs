//! Identifier case conversion: entity names are kebab-case slugs of their file names,
//! controller path segments resolve to camelCase method names.

/// Convert a kebab-case or snake_case identifier to camelCase.
/// e.g. "retrieve-new" -> "retrieveNew", "just_a_string" -> "justAString"
pub fn to_camel_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut capitalize_next = false;
    for c in s.chars() {
        if c == '_' || c == '-' || c == ' ' {
            capitalize_next = !out.is_empty();
        } else if capitalize_next {
            out.extend(c.to_uppercase());
            capitalize_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Convert an identifier to a kebab-case slug.
/// e.g. "ProductOrder" -> "product-order", "user_profile" -> "user-profile"
pub fn to_kebab_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    let mut prev_lower_or_digit = false;
    for c in s.chars() {
        if c.is_uppercase() {
            if prev_lower_or_digit {
                out.push('-');
            }
            out.extend(c.to_lowercase());
            prev_lower_or_digit = false;
        } else if c == '_' || c == ' ' || c == '-' || c == '.' {
            if !out.is_empty() && !out.ends_with('-') {
                out.push('-');
            }
            prev_lower_or_digit = false;
        } else {
            out.push(c);
            prev_lower_or_digit = c.is_lowercase() || c.is_ascii_digit();
        }
    }
    out.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camel_case_from_path_segments() {
        assert_eq!(to_camel_case("retrieve-new"), "retrieveNew");
        assert_eq!(to_camel_case("just_a_string"), "justAString");
        assert_eq!(to_camel_case("oliviasFavorite"), "oliviasFavorite");
    }

    #[test]
    fn kebab_case_from_file_stems() {
        assert_eq!(to_kebab_case("ProductOrder"), "product-order");
        assert_eq!(to_kebab_case("user_profile"), "user-profile");
        assert_eq!(to_kebab_case("order"), "order");
    }
}
