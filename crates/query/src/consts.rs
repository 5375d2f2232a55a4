pub const XS: &str = "http://www.w3.org/2001/XMLSchema";
pub const FNS: &str = "http://www.w3.org/2005/xpath-functions";
pub const MATH_NS: &str = "http://www.w3.org/2005/xpath-functions/math";
pub const MAP_NS: &str = "http://www.w3.org/2005/xpath-functions/map";
pub const ARRAY_NS: &str = "http://www.w3.org/2005/xpath-functions/array";
pub const ERR_NS: &str = "http://www.w3.org/2005/xqt-errors";
pub const LOCAL_NS: &str = "http://www.w3.org/2005/xquery-local-functions";
pub const XML_URI: &str = "http://www.w3.org/XML/1998/namespace";
pub const XMLNS_URI: &str = "http://www.w3.org/2000/xmlns/";

pub const CODEPOINT_URI: &str = "http://www.w3.org/2005/xpath-functions/collation/codepoint";
pub const HTML_ASCII_CASE_URI: &str =
    "http://www.w3.org/2005/xpath-functions/collation/html-ascii-case-insensitive";
pub const SIMPLE_CASE_URI: &str = "urn:sylva:collation:simple-case";
pub const SIMPLE_ACCENT_URI: &str = "urn:sylva:collation:simple-accent";

/// Prefix bindings that every static context starts with.
pub const PREDECLARED_PREFIXES: &[(&str, &str)] = &[
    ("xml", XML_URI),
    ("xs", XS),
    ("fn", FNS),
    ("math", MATH_NS),
    ("map", MAP_NS),
    ("array", ARRAY_NS),
    ("err", ERR_NS),
    ("local", LOCAL_NS),
];
