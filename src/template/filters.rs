//! Functions callable from templates.
//!
//! Everything here is registered once by [`register`]; the names are the
//! ones template authors use (`groupBy`, `hashSha1`, ...).  Failures come
//! back as `minijinja::Error`, which aborts the render that called them.

use std::collections::BTreeMap;
use std::fs;
use std::io;

use minijinja::{Environment, Error, ErrorKind, Value};
use sha1::{Digest, Sha1};

use crate::resolve::resolve;

pub(crate) fn register(env: &mut Environment<'_>) {
    env.add_filter("groupBy", group_by);
    env.add_filter("groupByMulti", group_by_multi);
    env.add_filter("keys", map_keys);
    env.add_filter("contains", contains);
    env.add_filter("trimPrefix", trim_prefix);
    env.add_filter("trimSuffix", trim_suffix);
    env.add_filter("hashSha1", hash_sha1);
    env.add_filter("first", first);
    env.add_filter("last", last);
    env.add_filter("exists", exists);
    env.add_filter("dirList", dir_list);
    env.add_filter("jsonDecode", json_decode);
    env.add_filter("mute", mute);

    env.add_function("hasPrefix", has_prefix);
    env.add_function("hasSuffix", has_suffix);
    env.add_function("contains", contains);
    env.add_function("mapKeys", map_keys);
    env.add_function("exists", exists);
    env.add_function("dirList", dir_list);
}

fn invalid(msg: String) -> Error {
    Error::new(ErrorKind::InvalidOperation, msg)
}

/// The value at `path` when it is a non-empty string.
fn group_key(item: &Value, path: &str) -> Option<String> {
    resolve(item, path)?
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

/// `containers|groupBy("env.VIRTUAL_HOST")`
pub fn group_by(list: Value, path: &str) -> Result<Value, Error> {
    let mut groups: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for item in list.try_iter()? {
        if let Some(key) = group_key(&item, path) {
            groups.entry(key).or_default().push(item);
        }
    }
    Ok(Value::from(groups))
}

/// `containers|groupByMulti("env.VIRTUAL_HOST", ",")`
///
/// The legacy single-argument form `"env.VIRTUAL_HOST|,"` is accepted too.
pub fn group_by_multi(list: Value, path: &str, separator: Option<&str>) -> Result<Value, Error> {
    let (path, separator) = match separator {
        Some(separator) => (path, separator),
        None => path.split_once('|').ok_or_else(|| {
            invalid(format!("groupByMulti: no separator given for `{path}`"))
        })?,
    };
    if separator.is_empty() {
        return Err(invalid("groupByMulti: separator must not be empty".into()));
    }

    let mut groups: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for item in list.try_iter()? {
        if let Some(key) = group_key(&item, path) {
            for token in key.split(separator) {
                groups.entry(token.to_owned()).or_default().push(item.clone());
            }
        }
    }
    Ok(Value::from(groups))
}

pub fn map_keys(mapping: Value) -> Result<Vec<String>, Error> {
    Ok(mapping
        .try_iter()?
        .filter_map(|key| key.as_str().map(str::to_owned))
        .collect())
}

pub fn contains(mapping: Value, key: &str) -> bool {
    mapping
        .get_item(&Value::from(key))
        .is_ok_and(|value| !value.is_undefined())
}

pub fn has_prefix(prefix: &str, s: &str) -> bool {
    s.starts_with(prefix)
}

pub fn has_suffix(suffix: &str, s: &str) -> bool {
    s.ends_with(suffix)
}

pub fn trim_prefix(s: &str, prefix: &str) -> String {
    s.strip_prefix(prefix).unwrap_or(s).to_owned()
}

pub fn trim_suffix(s: &str, suffix: &str) -> String {
    s.strip_suffix(suffix).unwrap_or(s).to_owned()
}

pub fn hash_sha1(s: &str) -> String {
    hex::encode(Sha1::digest(s.as_bytes()))
}

/// First element, or undefined for an empty iterable.
pub fn first(list: Value) -> Result<Value, Error> {
    let mut iter = list
        .try_iter()
        .map_err(|_| invalid(format!("first: {} is not iterable", list.kind())))?;
    Ok(iter.next().unwrap_or(Value::UNDEFINED))
}

/// Last element, or undefined for an empty iterable.
pub fn last(list: Value) -> Result<Value, Error> {
    let iter = list
        .try_iter()
        .map_err(|_| invalid(format!("last: {} is not iterable", list.kind())))?;
    Ok(iter.last().unwrap_or(Value::UNDEFINED))
}

/// `true` if the path exists, `false` if it does not, an error otherwise.
pub fn exists(path: &str) -> Result<bool, Error> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(invalid(format!("exists: cannot stat `{path}`")).with_source(e)),
    }
}

/// Entry names directly under `path`, sorted by name.
pub fn dir_list(path: &str) -> Result<Vec<String>, Error> {
    let read_err = |e: io::Error| invalid(format!("dirList: cannot read `{path}`")).with_source(e);
    let mut names = Vec::new();
    for entry in fs::read_dir(path).map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

pub fn json_decode(s: &str) -> Result<Value, Error> {
    let decoded: serde_json::Value = serde_json::from_str(s)
        .map_err(|e| invalid("jsonDecode: malformed JSON".into()).with_source(e))?;
    Ok(Value::from_serialize(&decoded))
}

/// Used as `{% filter mute %}...{% endfilter %}`.
pub fn mute(rendered: &str) -> String {
    collapse_blank_lines(rendered)
}

/// Collapse every whitespace run holding two or more line breaks into a
/// single blank line.  Whitespace after the run's last line break (the next
/// line's indentation) is kept.
pub fn collapse_blank_lines(text: &str) -> String {
    let is_space = |c: char| c.is_ascii_whitespace();
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(is_space) {
        out.push_str(&rest[..start]);
        let run = &rest[start..];
        let len = run.find(|c: char| !is_space(c)).unwrap_or(run.len());
        let ws = &run[..len];

        match ws.rfind('\n') {
            Some(last) if ws.matches('\n').count() >= 2 => {
                out.push_str("\n\n");
                out.push_str(&ws[last + 1..]);
            }
            _ => out.push_str(ws),
        }
        rest = &run[len..];
    }

    out.push_str(rest);
    out
}
