//! The fixed vocabulary of OData canonical functions this parser accepts.
//! Kept as a flat list (rather than per-arity structs) because the planner
//! decides SQL shape per function name anyway; see `plan::sql`.

pub const STRING_FUNCTIONS: &[&str] = &[
    "contains",
    "startswith",
    "endswith",
    "tolower",
    "toupper",
    "trim",
    "length",
    "indexof",
    "substring",
    "concat",
];

pub const DATE_FUNCTIONS: &[&str] = &["year", "month", "day", "hour", "minute", "second"];

pub const MATH_FUNCTIONS: &[&str] = &["round", "floor", "ceiling"];

pub fn is_known_function(name: &str) -> bool {
    STRING_FUNCTIONS.contains(&name) || DATE_FUNCTIONS.contains(&name) || MATH_FUNCTIONS.contains(&name)
}

/// Functions whose return value is boolean and may stand alone as a
/// `$filter` predicate without an enclosing comparison.
pub fn is_predicate_function(name: &str) -> bool {
    matches!(name, "contains" | "startswith" | "endswith")
}
