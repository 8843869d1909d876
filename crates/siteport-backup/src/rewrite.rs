//! Repoints an origin base URL to a destination base URL inside a dump
//! script.
//!
//! Three encodings of the origin are rewritten:
//! - plain text occurrences
//! - length-prefixed serialized strings (`s:<len>:"<content>";`), whose
//!   declared length is recomputed from the rewritten content
//! - JSON-style escaped occurrences, where every `/` is written `\/`
//!
//! Besides the given pair, the scheme-flipped pair is derived (an
//! `http://` origin also rewrites its `https://` form, mapping to the
//! destination flipped the same way).
//!
//! All variants and encodings are matched in one left-to-right scan, so a
//! byte range is rewritten exactly once. Serialized strings take
//! precedence: an occurrence inside one is rewritten together with its
//! length prefix and never again by the plain or escaped rules. Because
//! the script is SQL, a doubled `''` inside the serialized content counts
//! as the single byte it stores. Serialized strings nested in serialized
//! content are rewritten recursively, so every prefix on the way out is
//! recomputed.

use crate::error::{Error, Result};
use regex::Regex;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::Write as _;

const HTTP: &str = "http://";
const HTTPS: &str = "https://";

/// One origin to destination mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlVariant {
    pub origin: String,
    pub dest: String,
}

/// Derives the mappings applied for an origin/destination pair.
///
/// Returns nothing when the origin is empty or equal to the destination.
/// The scheme-flipped pair is skipped when its origin is the destination
/// itself, as happens for a scheme-only migration, since applying it
/// would undo the migration.
pub fn url_variants(origin: &str, dest: &str) -> Vec<UrlVariant> {
    let origin = origin.trim().trim_end_matches('/');
    let dest = dest.trim().trim_end_matches('/');
    if origin.is_empty() || origin == dest {
        return Vec::new();
    }

    let mut variants = vec![UrlVariant {
        origin: origin.to_string(),
        dest: dest.to_string(),
    }];

    let flipped = if let Some(rest) = origin.strip_prefix(HTTPS) {
        Some((format!("{}{}", HTTP, rest), swap_scheme(dest, HTTPS, HTTP)))
    } else if let Some(rest) = origin.strip_prefix(HTTP) {
        Some((format!("{}{}", HTTPS, rest), swap_scheme(dest, HTTP, HTTPS)))
    } else {
        None
    };

    if let Some((alt_origin, alt_dest)) = flipped {
        if alt_origin != dest && alt_origin != alt_dest {
            variants.push(UrlVariant {
                origin: alt_origin,
                dest: alt_dest,
            });
        }
    }

    variants
}

fn swap_scheme(url: &str, from: &str, to: &str) -> String {
    match url.strip_prefix(from) {
        Some(rest) => format!("{}{}", to, rest),
        None => url.to_string(),
    }
}

/// JSON-style escaping of a URL (`/` becomes `\/`).
pub fn escape_url(url: &str) -> String {
    url.replace('/', "\\/")
}

/// Compiled rewriter for one origin/destination pair.
#[derive(Debug, Clone)]
pub struct UrlRewriter {
    origin: String,
    dest: String,
    variants: Vec<UrlVariant>,
    /// needle -> replacement, for plain and escaped forms of every variant
    replacements: HashMap<String, String>,
    /// Alternation of every needle
    needles: Option<Regex>,
    /// Serialized string head or a needle
    scanner: Option<Regex>,
}

impl UrlRewriter {
    /// Builds a rewriter. Trailing slashes are ignored on both URLs.
    pub fn new(origin: &str, dest: &str) -> Result<Self> {
        let variants = url_variants(origin, dest);

        let mut replacements = HashMap::new();
        for variant in &variants {
            replacements
                .entry(variant.origin.clone())
                .or_insert_with(|| variant.dest.clone());
            replacements
                .entry(escape_url(&variant.origin))
                .or_insert_with(|| escape_url(&variant.dest));
        }

        let (needles, scanner) = if replacements.is_empty() {
            (None, None)
        } else {
            // Longest first so a needle never shadows a longer one at the same offset
            let mut keys: Vec<&String> = replacements.keys().collect();
            keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
            let alternation = keys
                .iter()
                .map(|k| regex::escape(k))
                .collect::<Vec<_>>()
                .join("|");

            let needles = Regex::new(&alternation)
                .map_err(|e| Error::validation(format!("URL too complex to match: {}", e)))?;
            let scanner = Regex::new(&format!(r#"s:(\d+):"|({})"#, alternation))
                .map_err(|e| Error::validation(format!("URL too complex to match: {}", e)))?;
            (Some(needles), Some(scanner))
        };

        Ok(Self {
            origin: origin.trim().trim_end_matches('/').to_string(),
            dest: dest.trim().trim_end_matches('/').to_string(),
            variants,
            replacements,
            needles,
            scanner,
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn dest(&self) -> &str {
        &self.dest
    }

    pub fn variants(&self) -> &[UrlVariant] {
        &self.variants
    }

    /// True when rewriting can never change anything
    pub fn is_noop(&self) -> bool {
        self.variants.is_empty()
    }

    /// Rewrites `text`, borrowing it unchanged when nothing matches.
    pub fn rewrite<'a>(&self, text: &'a str) -> Cow<'a, str> {
        let (Some(needles), Some(scanner)) = (&self.needles, &self.scanner) else {
            return Cow::Borrowed(text);
        };
        if !needles.is_match(text) {
            return Cow::Borrowed(text);
        }

        let quotes = QuotePositions::of(text);
        let mut out = String::with_capacity(text.len() + text.len() / 8);
        let mut changed = false;
        let mut copied = 0;
        let mut pos = 0;

        while let Some(caps) = scanner.captures_at(text, pos) {
            let Some(whole) = caps.get(0) else {
                break;
            };

            if let Some(declared) = caps.get(1) {
                let body_start = whole.end();
                let body_end = declared
                    .as_str()
                    .parse::<usize>()
                    .ok()
                    .and_then(|len| quotes.body_end(text, body_start, len))
                    .or_else(|| quoted_body_end(text, body_start));

                match body_end {
                    Some(body_end) => {
                        let body = &text[body_start..body_end];
                        if needles.is_match(body) {
                            // Nested serialized strings get their own prefixes fixed
                            let new_body = self.rewrite(body);
                            out.push_str(&text[copied..whole.start()]);
                            let _ = write!(out, "s:{}:\"{}", stored_len(&new_body), new_body);
                            copied = body_end;
                            changed = true;
                        }
                        pos = body_end;
                    }
                    // Not a serialized string after all; keep scanning inside it
                    None => pos = whole.end(),
                }
                continue;
            }

            let needle = whole.as_str();
            if let Some(replacement) = self.replacements.get(needle) {
                out.push_str(&text[copied..whole.start()]);
                out.push_str(replacement);
                copied = whole.end();
                changed = true;
            }
            pos = whole.end();
        }

        if !changed {
            return Cow::Borrowed(text);
        }
        out.push_str(&text[copied..]);
        Cow::Owned(out)
    }
}

/// Rewrites `script` from `origin` to `dest`.
pub fn rewrite<'a>(script: &'a str, origin: &str, dest: &str) -> Result<Cow<'a, str>> {
    Ok(UrlRewriter::new(origin, dest)?.rewrite(script))
}

/// Bytes a serialized body stores once its SQL quoting is undone.
fn stored_len(body: &str) -> usize {
    body.len() - body.matches("''").count()
}

/// Byte offsets of every `'` in a text, ascending.
struct QuotePositions(Vec<usize>);

impl QuotePositions {
    fn of(text: &str) -> Self {
        Self(
            text.bytes()
                .enumerate()
                .filter_map(|(i, b)| (b == b'\'').then_some(i))
                .collect(),
        )
    }

    /// Finds the end of a serialized body that starts at `start` and
    /// declares `declared` stored bytes. The body must be followed by `";`.
    ///
    /// Each doubled `''` stores one byte and so pushes the end out by one.
    /// A lone `'` ends the surrounding SQL literal, so no body can contain
    /// one. Only the quotes inside the body are visited.
    fn body_end(&self, text: &str, start: usize, declared: usize) -> Option<usize> {
        let mut end = start.checked_add(declared)?;
        let mut k = self.0.partition_point(|&q| q < start);
        while let Some(&q) = self.0.get(k) {
            if q >= end {
                break;
            }
            if self.0.get(k + 1) != Some(&(q + 1)) {
                return None;
            }
            end += 1;
            k += 2;
        }
        let tail = text.get(end..)?;
        tail.starts_with("\";").then_some(end)
    }
}

/// Fallback for bodies whose declared length is already wrong: the body
/// runs to the first `"` and must be followed by `";`.
fn quoted_body_end(text: &str, start: usize) -> Option<usize> {
    let rest = &text[start..];
    let end = rest.find('"')?;
    let body = &rest[..end];
    if body.replace("''", "").contains('\'') || !rest[end..].starts_with("\";") {
        return None;
    }
    Some(start + end)
}
