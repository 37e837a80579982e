//! Message-body formatting
//!
//! Substitutes `{}` and `{name}` placeholders with decoded argument values.
//! Named-argument templates are parsed once into a positional template plus
//! the ordered key list; the backend caches the result by template string so
//! repeated dispatch of the same template never re-parses.

use crate::errors::{Error, Result};
use std::fmt::Write;
use swiftlog_transit::Value;

/// Render `template` into `out`, consuming `args` positionally. `{{` and
/// `}}` escape literal braces. Placeholder names are ignored here; named
/// templates are stripped by [`parse_named_template`] before formatting.
pub fn vformat(out: &mut String, template: &str, args: &[Value]) -> Result<()> {
    let mut rest = template;
    let mut arg_index = 0usize;
    loop {
        let Some(pos) = rest.find(['{', '}']) else {
            out.push_str(rest);
            return Ok(());
        };
        out.push_str(&rest[..pos]);
        let brace = rest.as_bytes()[pos];
        if brace == b'{' {
            if rest[pos + 1..].starts_with('{') {
                out.push('{');
                rest = &rest[pos + 2..];
                continue;
            }
            let close = rest[pos + 1..]
                .find('}')
                .ok_or_else(|| Error::Format(format!("unbalanced '{{' in \"{template}\"")))?
                + pos
                + 1;
            let arg = args.get(arg_index).ok_or_else(|| {
                Error::Format(format!("missing argument {arg_index} for \"{template}\""))
            })?;
            let _ = write!(out, "{arg}");
            arg_index += 1;
            rest = &rest[close + 1..];
        } else {
            if rest[pos + 1..].starts_with('}') {
                out.push('}');
                rest = &rest[pos + 2..];
                continue;
            }
            return Err(Error::Format(format!("unbalanced '}}' in \"{template}\"")));
        }
    }
}

/// Split a named-argument template into the positional template the
/// formatter consumes and the ordered key list. Escaped braces are kept
/// escaped so the stripped template still goes through [`vformat`].
pub fn parse_named_template(template: &str) -> (String, Vec<String>) {
    let mut stripped = String::with_capacity(template.len());
    let mut keys = Vec::new();
    let mut rest = template;
    loop {
        let Some(pos) = rest.find(['{', '}']) else {
            stripped.push_str(rest);
            return (stripped, keys);
        };
        stripped.push_str(&rest[..pos]);
        let brace = rest.as_bytes()[pos];
        if brace == b'{' {
            if rest[pos + 1..].starts_with('{') {
                stripped.push_str("{{");
                rest = &rest[pos + 2..];
                continue;
            }
            match rest[pos + 1..].find('}') {
                Some(offset) => {
                    let close = pos + 1 + offset;
                    keys.push(rest[pos + 1..close].to_owned());
                    stripped.push_str("{}");
                    rest = &rest[close + 1..];
                }
                None => {
                    // malformed; keep the tail verbatim and let vformat report it
                    stripped.push_str(&rest[pos..]);
                    return (stripped, keys);
                }
            }
        } else {
            if rest[pos + 1..].starts_with('}') {
                stripped.push_str("}}");
                rest = &rest[pos + 2..];
                continue;
            }
            stripped.push('}');
            rest = &rest[pos + 1..];
        }
    }
}
