//! Template environment and rendering.
//!
//! Templates are minijinja templates read from disk on every render, so an
//! edited template takes effect on the next regeneration.  The filtered
//! container list is bound as `containers`.

use std::borrow::Cow;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use minijinja::value::ValueKind;
use minijinja::{context, AutoEscape, Environment, Value};

use crate::resolve::{Shape, Structured};
use crate::types::{Address, ContainerRecord};

pub mod filters;

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("unable to read template {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unable to parse template {name}: {source}")]
    Parse {
        name: String,
        #[source]
        source: minijinja::Error,
    },
    #[error("template error in {name}: {source}")]
    Render {
        name: String,
        #[source]
        source: minijinja::Error,
    },
}

/// A fresh environment with every generator filter and function registered.
pub fn environment<'source>() -> Environment<'source> {
    let mut env = Environment::new();
    env.set_keep_trailing_newline(true);
    env.set_auto_escape_callback(|_| AutoEscape::None);
    filters::register(&mut env);
    env
}

pub fn render_file(path: &Path, containers: &[ContainerRecord]) -> Result<String, TemplateError> {
    let source = fs::read_to_string(path).map_err(|source| TemplateError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("template");
    render_source(name, &source, containers)
}

pub fn render_source(
    name: &str,
    source: &str,
    containers: &[ContainerRecord],
) -> Result<String, TemplateError> {
    let source = rewrite_mute_tags(source);
    let mut env = environment();
    env.add_template(name, &source)
        .map_err(|source| TemplateError::Parse {
            name: name.to_string(),
            source,
        })?;
    let template = env.get_template(name).map_err(|source| TemplateError::Parse {
        name: name.to_string(),
        source,
    })?;

    let containers: Vec<Value> = containers
        .iter()
        .cloned()
        .map(Value::from_object)
        .collect();
    template
        .render(context! { containers => containers })
        .map_err(|source| TemplateError::Render {
            name: name.to_string(),
            source,
        })
}

/// Rewrite `{% mute %}`/`{% endmute %}` into the equivalent filter block.
fn rewrite_mute_tags(source: &str) -> Cow<'_, str> {
    if !source.contains("mute") {
        return Cow::Borrowed(source);
    }

    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(start) = rest.find("{%") {
        let Some(len) = rest[start..].find("%}") else {
            break;
        };
        out.push_str(&rest[..start]);

        let tag = &rest[start + 2..start + len];
        let lead = if tag.starts_with(['-', '+']) { &tag[..1] } else { "" };
        let inner = &tag[lead.len()..];
        let trail = if inner.ends_with(['-', '+']) {
            &inner[inner.len() - 1..]
        } else {
            ""
        };
        match inner[..inner.len() - trail.len()].trim() {
            "mute" => out.push_str(&format!("{{%{lead} filter mute {trail}%}}")),
            "endmute" => out.push_str(&format!("{{%{lead} endfilter {trail}%}}")),
            _ => out.push_str(&rest[start..start + len + 2]),
        }
        rest = &rest[start + len + 2..];
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn defined(value: Result<Value, minijinja::Error>) -> Option<Value> {
    value.ok().filter(|v| !v.is_undefined())
}

impl Structured for Value {
    fn shape(&self) -> Shape {
        if self.downcast_object_ref::<ContainerRecord>().is_some()
            || self.downcast_object_ref::<Address>().is_some()
        {
            return Shape::Record;
        }
        match self.kind() {
            ValueKind::Map => Shape::Map,
            ValueKind::Seq | ValueKind::Iterable => Shape::Sequence,
            ValueKind::Undefined | ValueKind::None => Shape::Absent,
            _ => Shape::Scalar,
        }
    }

    fn field(&self, name: &str) -> Option<Self> {
        defined(self.get_attr(name))
    }

    fn entry(&self, key: &str) -> Option<Self> {
        defined(self.get_item(&Value::from(key)))
    }
}
