// Copyright 2024 The rbldns developers.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! The `:A:TXT` return-value mini-language and TTL suffixes.
//!
//! Zone-file entries and dataset default lines carry an optional return
//! value in the forms `:<a>:<txt>`, `:<a>:`, `:<a>`, or a bare TXT
//! token. An `<a>` of one to three digits with no dots is shorthand for
//! `127.0.0.<a>`, and an omitted `<a>` means `127.0.0.2`.

////////////////////////////////////////////////////////////////////////
// RETURN VALUES                                                      //
////////////////////////////////////////////////////////////////////////

/// A parsed return value: the A record to answer with and the TXT
/// template (substitution markers unresolved). The two are kept as a
/// structured pair; no packed string form exists in memory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Value {
    pub a: String,
    pub txt: String,
}

impl Value {
    /// The value served when neither an entry nor its dataset provides
    /// one: `127.0.0.2` with no TXT.
    pub fn fallback() -> Self {
        Self {
            a: String::from("127.0.0.2"),
            txt: String::new(),
        }
    }
}

/// Parses a return value token.
///
/// * `:127.0.0.5:listed` gives A `127.0.0.5`, TXT `listed`.
/// * `:2:spam source` gives A `127.0.0.2` (digit shorthand).
/// * `:127.0.0.5` and `:127.0.0.5:` give A only.
/// * `see http://x.example/$` (no leading colon) gives the default A
///   `127.0.0.2` and the whole token as the TXT template.
pub fn parse_return_value(s: &str) -> Value {
    let s = s.trim();
    if s.is_empty() {
        return Value::fallback();
    }

    if let Some(rest) = s.strip_prefix(':') {
        let (a_part, txt) = match rest.split_once(':') {
            Some((a_part, txt)) => (a_part, txt),
            None => (rest, ""),
        };
        let a_part = a_part.trim();
        let a = if a_part.is_empty() {
            String::from("127.0.0.2")
        } else if a_part.len() <= 3 && a_part.bytes().all(|b| b.is_ascii_digit()) {
            format!("127.0.0.{}", a_part)
        } else {
            a_part.to_owned()
        };
        Value {
            a,
            txt: txt.to_owned(),
        }
    } else {
        Value {
            a: String::from("127.0.0.2"),
            txt: s.to_owned(),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TTLS                                                               //
////////////////////////////////////////////////////////////////////////

/// Parses a TTL token. Bare integers are seconds; the suffixes `s`,
/// `m`, `h`, `d`, and `w` scale to seconds, minutes, hours, days, and
/// weeks. Returns [`None`] for anything else (including overflow).
pub fn parse_ttl(s: &str) -> Option<u32> {
    let (digits, multiplier) = match s.as_bytes().last()? {
        b's' => (&s[..s.len() - 1], 1),
        b'm' => (&s[..s.len() - 1], 60),
        b'h' => (&s[..s.len() - 1], 3600),
        b'd' => (&s[..s.len() - 1], 86400),
        b'w' => (&s[..s.len() - 1], 604800),
        _ => (s, 1),
    };
    digits.parse::<u32>().ok()?.checked_mul(multiplier)
}

////////////////////////////////////////////////////////////////////////
// TXT TEMPLATE SUBSTITUTION                                          //
////////////////////////////////////////////////////////////////////////

/// Expands a TXT template for an IP dataset at query time.
///
/// `$TIMESTAMP` becomes the source file's modification time (epoch
/// seconds) and `$MAXRANGE4`/`$MAXRANGE6` (chosen by `v6`) becomes the
/// smallest prefix length seen while loading. Those are resolved before
/// the bare `$`, which becomes `subst` (the queried address); resolving
/// `$` first would mangle the longer markers.
pub fn substitute(template: &str, subst: &str, timestamp: i64, max_range: u8, v6: bool) -> String {
    if template.is_empty() {
        return String::new();
    }

    let mut result = template.to_owned();
    if timestamp > 0 {
        result = result.replace("$TIMESTAMP", &timestamp.to_string());
    }
    if max_range > 0 {
        let marker = if v6 { "$MAXRANGE6" } else { "$MAXRANGE4" };
        result = result.replace(marker, &max_range.to_string());
    }
    result.replace('$', subst)
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn value(a: &str, txt: &str) -> Value {
        Value {
            a: a.to_owned(),
            txt: txt.to_owned(),
        }
    }

    #[test]
    fn parse_return_value_handles_the_grammar() {
        assert_eq!(
            parse_return_value(":127.0.0.5:listed"),
            value("127.0.0.5", "listed"),
        );
        assert_eq!(
            parse_return_value(":2:spam source"),
            value("127.0.0.2", "spam source"),
        );
        assert_eq!(parse_return_value(":127"), value("127.0.0.127", ""));
        assert_eq!(parse_return_value(":127.0.0.5:"), value("127.0.0.5", ""));
        assert_eq!(parse_return_value(":127.0.0.5"), value("127.0.0.5", ""));
        assert_eq!(parse_return_value("::open relay"), value("127.0.0.2", "open relay"));
        assert_eq!(
            parse_return_value("see http://x.example/$"),
            value("127.0.0.2", "see http://x.example/$"),
        );
        assert_eq!(parse_return_value(""), Value::fallback());
    }

    #[test]
    fn parse_return_value_leaves_dotted_and_nonnumeric_alone() {
        assert_eq!(parse_return_value(":1.2"), value("1.2", ""));
        assert_eq!(parse_return_value(":2a:x"), value("2a", "x"));
    }

    #[test]
    fn parse_ttl_accepts_suffixes() {
        assert_eq!(parse_ttl("30"), Some(30));
        assert_eq!(parse_ttl("30s"), Some(30));
        assert_eq!(parse_ttl("5m"), Some(300));
        assert_eq!(parse_ttl("2h"), Some(7200));
        assert_eq!(parse_ttl("1d"), Some(86400));
        assert_eq!(parse_ttl("1w"), Some(604800));
        assert_eq!(parse_ttl("garbage"), None);
        assert_eq!(parse_ttl(""), None);
        assert_eq!(parse_ttl("9999999999w"), None);
    }

    #[test]
    fn substitute_resolves_markers_before_the_bare_dollar() {
        // If $ were replaced first, $TIMESTAMP would turn into
        // "<ip>TIMESTAMP".
        assert_eq!(
            substitute("$ listed since $TIMESTAMP", "192.0.2.5", 1700000000, 0, false),
            "192.0.2.5 listed since 1700000000",
        );
        assert_eq!(
            substitute("$ in /$MAXRANGE4", "192.0.2.5", 0, 24, false),
            "192.0.2.5 in /24",
        );
        assert_eq!(
            substitute("$ in /$MAXRANGE6", "2001:db8::1", 0, 64, true),
            "2001:db8::1 in /64",
        );
    }

    #[test]
    fn substitute_leaves_unresolvable_markers_to_the_dollar_rule() {
        // With no timestamp recorded, $TIMESTAMP decays into the plain
        // $ substitution like any other $-prefixed text.
        assert_eq!(
            substitute("$TIMESTAMP", "192.0.2.5", 0, 0, false),
            "192.0.2.5TIMESTAMP",
        );
    }
}
