//! Reference classification.
//!
//! A reference string is parsed once, up front, into one of the encodings the generator emits.
//! Rewriting then dispatches on the variant instead of re-matching patterns.

/// A parsed `reference` value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reference<'a> {
    /// `Type?identifier=system|value`: resolved through a natural key.
    Query {
        resource_type: &'a str,
        system: &'a str,
        value: &'a str,
    },
    /// `urn:uuid:token`: carries no type information.
    DirectLink { token: &'a str },
    /// `Type/token`, possibly followed by further path segments.
    Typed {
        resource_type: &'a str,
        token: &'a str,
    },
    /// Anything else (absolute URLs, contained references, malformed queries).
    Other,
}

const DIRECT_LINK_PREFIX: &str = "urn:uuid:";
const QUERY_PARAMETER: &str = "identifier=";

/// Leading run of word characters and hyphens.
fn leading_token(input: &str) -> &str {
    let end = input
        .char_indices()
        .find(|(_, c)| !(c.is_alphanumeric() || *c == '_' || *c == '-'))
        .map(|(i, _)| i)
        .unwrap_or(input.len());
    &input[..end]
}

impl<'a> Reference<'a> {
    pub fn parse(raw: &'a str) -> Self {
        if let Some(rest) = raw.strip_prefix(DIRECT_LINK_PREFIX) {
            let token = leading_token(rest);
            return if token.is_empty() {
                Reference::Other
            } else {
                Reference::DirectLink { token }
            };
        }

        let type_len = raw.bytes().take_while(u8::is_ascii_alphabetic).count();
        if type_len == 0 {
            return Reference::Other;
        }
        let (resource_type, rest) = raw.split_at(type_len);

        if let Some(query) = rest.strip_prefix('?') {
            let Some(parameter) = query.strip_prefix(QUERY_PARAMETER) else {
                return Reference::Other;
            };
            return match parameter.split_once('|') {
                Some((system, value)) if !system.is_empty() && !value.is_empty() => {
                    Reference::Query {
                        resource_type,
                        system,
                        value,
                    }
                }
                _ => Reference::Other,
            };
        }

        if let Some(path) = rest.strip_prefix('/') {
            let token = leading_token(path);
            if !token.is_empty() {
                return Reference::Typed {
                    resource_type,
                    token,
                };
            }
        }

        Reference::Other
    }
}
